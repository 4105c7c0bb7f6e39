use crate::error::StudioError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Skipped,
    UseOriginal,
    SelectedForRegen,
}

/// Immutable set of item keys. Toggling yields a new set and leaves every
/// holder of the old one untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet(Arc<BTreeSet<String>>);

impl KeySet {
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn toggled(&self, key: &str) -> Self {
        let mut next = (*self.0).clone();
        if !next.remove(key) {
            next.insert(key.to_string());
        }
        Self(Arc::new(next))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for KeySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().map(Into::into).collect()))
    }
}

impl Serialize for KeySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionState {
    pub skipped: KeySet,
    pub use_original: KeySet,
    pub selected_for_regen: KeySet,
}

impl SelectionState {
    /// Flips `key` in one set. The other two sets are carried over as-is.
    pub fn toggle(&self, kind: SelectionKind, key: &str) -> Self {
        let mut next = self.clone();
        let target = match kind {
            SelectionKind::Skipped => &mut next.skipped,
            SelectionKind::UseOriginal => &mut next.use_original,
            SelectionKind::SelectedForRegen => &mut next.selected_for_regen,
        };
        *target = target.toggled(key);
        next
    }

    /// Keys that still need generation, in working order.
    pub fn pending<'a>(&self, working: &'a [String]) -> Vec<&'a str> {
        working
            .iter()
            .map(String::as_str)
            .filter(|key| !self.skipped.contains(key) && !self.use_original.contains(key))
            .collect()
    }

    pub fn ensure_runnable(&self, working: &[String]) -> Result<(), StudioError> {
        if working.iter().all(|key| self.skipped.contains(key)) {
            return Err(StudioError::AllItemsSkipped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn toggle_adds_then_removes() {
        let state = SelectionState::default();
        let once = state.toggle(SelectionKind::UseOriginal, "a");
        assert!(once.use_original.contains("a"));
        assert!(!state.use_original.contains("a"));
        let twice = once.toggle(SelectionKind::UseOriginal, "a");
        assert!(twice.use_original.is_empty());
    }

    #[test]
    fn skipping_leaves_other_sets_alone() {
        let state = SelectionState::default()
            .toggle(SelectionKind::UseOriginal, "b")
            .toggle(SelectionKind::SelectedForRegen, "b")
            .toggle(SelectionKind::Skipped, "b");
        assert!(state.skipped.contains("b"));
        assert!(state.use_original.contains("b"));
        assert!(state.selected_for_regen.contains("b"));

        let unskipped = state.toggle(SelectionKind::Skipped, "b");
        assert!(unskipped.use_original.contains("b"));
    }

    #[test]
    fn pending_excludes_skipped_and_original() {
        let working = keys(&["a", "b", "c", "d"]);
        let state = SelectionState::default()
            .toggle(SelectionKind::Skipped, "b")
            .toggle(SelectionKind::UseOriginal, "c");
        assert_eq!(state.pending(&working), vec!["a", "d"]);
    }

    #[test]
    fn everything_skipped_is_rejected() {
        let working = keys(&["a", "b"]);
        let state = SelectionState::default()
            .toggle(SelectionKind::Skipped, "a")
            .toggle(SelectionKind::Skipped, "b");
        assert!(matches!(
            state.ensure_runnable(&working),
            Err(StudioError::AllItemsSkipped)
        ));
        assert!(
            state
                .toggle(SelectionKind::Skipped, "a")
                .ensure_runnable(&working)
                .is_ok()
        );
        assert!(matches!(
            SelectionState::default().ensure_runnable(&[]),
            Err(StudioError::AllItemsSkipped)
        ));
    }
}
