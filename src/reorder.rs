use crate::error::StudioError;
use crate::merge::OutputList;
use crate::models::Artifact;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Output positions marked for regeneration. Every index refers to a live
/// position of the list it was built against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SelectedIndices(BTreeSet<usize>);

impl SelectedIndices {
    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn toggle(&mut self, index: usize, len: usize) -> Result<bool, StudioError> {
        if index >= len {
            return Err(StudioError::IndexOutOfRange { index, len });
        }
        if self.0.remove(&index) {
            Ok(false)
        } else {
            self.0.insert(index);
            Ok(true)
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl FromIterator<usize> for SelectedIndices {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What happens to the selection when an element is dragged elsewhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePolicy {
    /// The moved position is deselected; other indices stay as they are.
    #[default]
    DropMoved,
    /// Every selected index follows its element to its new position.
    FollowItems,
}

fn check(index: usize, len: usize) -> Result<(), StudioError> {
    if index >= len {
        return Err(StudioError::IndexOutOfRange { index, len });
    }
    Ok(())
}

/// Relocates the element at `from` so it ends up at `to`.
pub fn move_item(
    output: &mut OutputList,
    selection: &mut SelectedIndices,
    from: usize,
    to: usize,
    policy: MovePolicy,
) -> Result<(), StudioError> {
    let len = output.len();
    check(from, len)?;
    check(to, len)?;
    if from == to {
        return Ok(());
    }

    let items = output.items_mut();
    let moved = items.remove(from);
    items.insert(to, moved);

    selection.0 = match policy {
        MovePolicy::DropMoved => selection.iter().filter(|i| *i != from).collect(),
        MovePolicy::FollowItems => selection
            .iter()
            .map(|i| follow(i, from, to))
            .collect(),
    };
    Ok(())
}

fn follow(index: usize, from: usize, to: usize) -> usize {
    if index == from {
        to
    } else if from < to && index > from && index <= to {
        index - 1
    } else if to < from && index >= to && index < from {
        index + 1
    } else {
        index
    }
}

/// Deletes the element at `index`, shifting higher selected indices down.
pub fn remove_item(
    output: &mut OutputList,
    selection: &mut SelectedIndices,
    index: usize,
) -> Result<Artifact, StudioError> {
    check(index, output.len())?;
    let removed = output.items_mut().remove(index);
    selection.0 = selection
        .iter()
        .filter(|i| *i != index)
        .map(|i| if i > index { i - 1 } else { i })
        .collect();
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> OutputList {
        OutputList::new(items.iter().map(|s| Artifact::from(*s)).collect())
    }

    fn selected(indices: &[usize]) -> SelectedIndices {
        indices.iter().copied().collect()
    }

    #[test]
    fn remove_remaps_higher_indices() {
        let mut output = list(&["x", "y", "z"]);
        let mut selection = selected(&[0, 2]);
        let removed = remove_item(&mut output, &mut selection, 1).unwrap();
        assert_eq!(removed, Artifact::from("y"));
        assert_eq!(output, list(&["x", "z"]));
        assert_eq!(selection, selected(&[0, 1]));
    }

    #[test]
    fn remove_drops_the_removed_index() {
        let mut output = list(&["x", "y", "z"]);
        let mut selection = selected(&[1, 2]);
        remove_item(&mut output, &mut selection, 1).unwrap();
        assert_eq!(selection, selected(&[1]));
        assert!(selection.iter().all(|i| i < output.len()));
    }

    #[test]
    fn move_drops_the_moved_selection() {
        let mut output = list(&["x", "y", "z"]);
        let mut selection = selected(&[1]);
        move_item(&mut output, &mut selection, 1, 0, MovePolicy::DropMoved).unwrap();
        assert_eq!(output, list(&["y", "x", "z"]));
        assert!(selection.is_empty());
    }

    #[test]
    fn move_keeps_unrelated_indices_positional() {
        let mut output = list(&["a", "b", "c", "d"]);
        let mut selection = selected(&[0, 3]);
        move_item(&mut output, &mut selection, 0, 2, MovePolicy::DropMoved).unwrap();
        assert_eq!(output, list(&["b", "c", "a", "d"]));
        assert_eq!(selection, selected(&[3]));
    }

    #[test]
    fn follow_policy_tracks_elements() {
        let mut output = list(&["a", "b", "c", "d"]);
        let mut selection = selected(&[0, 2]);
        move_item(&mut output, &mut selection, 0, 3, MovePolicy::FollowItems).unwrap();
        assert_eq!(output, list(&["b", "c", "d", "a"]));
        // "a" moved to 3, "c" shifted from 2 to 1
        assert_eq!(selection, selected(&[1, 3]));

        move_item(&mut output, &mut selection, 3, 1, MovePolicy::FollowItems).unwrap();
        assert_eq!(output, list(&["b", "a", "c", "d"]));
        assert_eq!(selection, selected(&[1, 2]));
    }

    #[test]
    fn out_of_range_operations_are_rejected() {
        let mut output = list(&["x"]);
        let mut selection = SelectedIndices::default();
        assert!(matches!(
            move_item(&mut output, &mut selection, 0, 1, MovePolicy::DropMoved),
            Err(StudioError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(remove_item(&mut output, &mut selection, 4).is_err());
        assert!(selection.toggle(1, output.len()).is_err());
        assert!(selection.toggle(0, output.len()).unwrap());
        assert!(!selection.toggle(0, output.len()).unwrap());
    }
}
