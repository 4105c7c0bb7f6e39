//! Folds processed artifacts back into the user's working order.
//!
//! `processed` is aligned with the working items that actually went through
//! generation: not skipped and not kept as original. Merging walks the
//! working list once and consumes the next artifact for each of those items,
//! so the artifact order must match that subsequence exactly.

use crate::error::StudioError;
use crate::models::Artifact;
use crate::reorder::SelectedIndices;
use crate::selection::SelectionState;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OutputList(Vec<Artifact>);

impl OutputList {
    pub fn new(items: Vec<Artifact>) -> Self {
        Self(items)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Artifact> {
        self.0.get(index)
    }

    pub fn as_slice(&self) -> &[Artifact] {
        &self.0
    }

    pub(crate) fn items_mut(&mut self) -> &mut Vec<Artifact> {
        &mut self.0
    }
}

impl From<Vec<Artifact>> for OutputList {
    fn from(items: Vec<Artifact>) -> Self {
        Self(items)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub output: OutputList,
    /// Non-skipped keys left out because `processed` ran short.
    pub unmatched: Vec<String>,
}

impl MergeReport {
    pub fn is_partial(&self) -> bool {
        !self.unmatched.is_empty()
    }
}

pub fn merge(
    working: &[String],
    selection: &SelectionState,
    processed: &[Artifact],
) -> Result<MergeReport, StudioError> {
    selection.ensure_runnable(working)?;
    let expected = selection.pending(working).len();
    if processed.len() > expected {
        return Err(StudioError::Misaligned {
            expected,
            actual: processed.len(),
        });
    }

    let mut next = processed.iter();
    let mut output = Vec::with_capacity(working.len());
    let mut unmatched = Vec::new();
    for key in working {
        if selection.skipped.contains(key) {
            continue;
        }
        // Once an artifact is missing the rest of the list can no longer be
        // placed, including originals.
        if !unmatched.is_empty() {
            unmatched.push(key.clone());
            continue;
        }
        if selection.use_original.contains(key) {
            output.push(Artifact::from(key.as_str()));
            continue;
        }
        match next.next() {
            Some(artifact) => output.push(artifact.clone()),
            None => unmatched.push(key.clone()),
        }
    }

    if !unmatched.is_empty() {
        warn!(
            target = "studio.merge",
            expected,
            received = processed.len(),
            unmatched = unmatched.len(),
            "merge truncated; processed artifacts ran short"
        );
    }
    Ok(MergeReport {
        output: OutputList(output),
        unmatched,
    })
}

/// Output positions of the merged items that were marked as regeneration
/// candidates before merging.
pub fn carry_regen_selection(
    working: &[String],
    selection: &SelectionState,
    output: &OutputList,
) -> SelectedIndices {
    working
        .iter()
        .filter(|key| !selection.skipped.contains(key))
        .enumerate()
        .take(output.len())
        .filter(|(_, key)| selection.selected_for_regen.contains(key))
        .map(|(index, _)| index)
        .collect()
}

/// Artifacts at the selected positions, in ascending index order.
pub fn regeneration_sources(
    output: &OutputList,
    selected: &SelectedIndices,
) -> Result<Vec<Artifact>, StudioError> {
    selected
        .iter()
        .map(|index| {
            output
                .get(index)
                .cloned()
                .ok_or(StudioError::IndexOutOfRange {
                    index,
                    len: output.len(),
                })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegenReport {
    pub output: OutputList,
    /// Selected positions that received no result.
    pub unfilled: Vec<usize>,
}

/// Writes regenerated artifacts back at their selected positions. Results
/// pair with the selection in ascending index order.
pub fn apply_regenerated(
    output: &OutputList,
    selected: &SelectedIndices,
    results: &[Artifact],
) -> Result<RegenReport, StudioError> {
    if let Some(index) = selected.iter().find(|index| *index >= output.len()) {
        return Err(StudioError::IndexOutOfRange {
            index,
            len: output.len(),
        });
    }
    if results.len() > selected.len() {
        return Err(StudioError::Misaligned {
            expected: selected.len(),
            actual: results.len(),
        });
    }

    let mut next = output.clone();
    let mut indices = selected.iter();
    for (artifact, index) in results.iter().zip(indices.by_ref()) {
        next.0[index] = artifact.clone();
    }
    let unfilled: Vec<usize> = indices.collect();
    if !unfilled.is_empty() {
        warn!(target = "studio.merge", unfilled = unfilled.len(), "regeneration returned fewer results than selected");
    }
    Ok(RegenReport {
        output: next,
        unfilled,
    })
}
