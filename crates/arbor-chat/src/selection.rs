//! Active branch selection: which variant is chosen at each branch point

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sparse map from parent id to the chosen child index.
///
/// A missing entry means "the newest child". Stored values are never
/// validated on write; [`BranchSelection::selected_index`] clamps on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchSelection {
    entries: HashMap<String, usize>,
}

impl BranchSelection {
    /// Create an empty selection
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored index for a parent, if any
    pub fn get(&self, parent_id: &str) -> Option<usize> {
        self.entries.get(parent_id).copied()
    }

    /// Record an explicit choice
    pub fn set(&mut self, parent_id: impl Into<String>, index: usize) {
        self.entries.insert(parent_id.into(), index);
    }

    /// Forget the choice for a parent, re-enabling default-to-newest
    pub fn remove(&mut self, parent_id: &str) -> Option<usize> {
        self.entries.remove(parent_id)
    }

    /// Drop entries keyed by any of the given ids
    pub fn prune<'a>(&mut self, ids: impl IntoIterator<Item = &'a String>) {
        for id in ids {
            self.entries.remove(id);
        }
    }

    /// Resolve the effective index for a parent with `branch_count` children
    pub fn selected_index(&self, parent_id: &str, branch_count: usize) -> usize {
        selected_index(parent_id, branch_count, self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve which child is active under `parent_id`.
///
/// Returns 0 when there are no children, the stored index when it is in
/// range, and the newest child otherwise.
pub fn selected_index(parent_id: &str, branch_count: usize, selection: &BranchSelection) -> usize {
    if branch_count == 0 {
        return 0;
    }
    match selection.get(parent_id) {
        Some(index) if index < branch_count => index,
        _ => branch_count - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_children_selects_zero() {
        let mut selection = BranchSelection::new();
        assert_eq!(selected_index("p", 0, &selection), 0);
        selection.set("p", 5);
        assert_eq!(selected_index("p", 0, &selection), 0);
    }

    #[test]
    fn test_missing_entry_selects_newest() {
        let selection = BranchSelection::new();
        assert_eq!(selected_index("p", 1, &selection), 0);
        assert_eq!(selected_index("p", 3, &selection), 2);
    }

    #[test]
    fn test_in_range_entry_is_used() {
        let mut selection = BranchSelection::new();
        selection.set("p", 1);
        assert_eq!(selected_index("p", 3, &selection), 1);
        assert_eq!(selected_index("other", 3, &selection), 2);
    }

    #[test]
    fn test_out_of_range_entry_clamps_on_read_only() {
        let mut selection = BranchSelection::new();
        selection.set("p", 7);
        assert_eq!(selected_index("p", 3, &selection), 2);
        // the stored value is left untouched
        assert_eq!(selection.get("p"), Some(7));
    }

    #[test]
    fn test_selected_index_always_in_range() {
        let mut selection = BranchSelection::new();
        for stored in 0..6 {
            selection.set("p", stored);
            for count in 0..6 {
                let index = selection.selected_index("p", count);
                if count == 0 {
                    assert_eq!(index, 0);
                } else {
                    assert!(index < count, "stored={} count={}", stored, count);
                }
            }
        }
    }

    #[test]
    fn test_prune_removes_entries() {
        let mut selection = BranchSelection::new();
        selection.set("a", 0);
        selection.set("b", 1);
        selection.set("c", 2);
        let pruned = vec!["a".to_string(), "c".to_string(), "zzz".to_string()];
        selection.prune(&pruned);
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.get("b"), Some(1));
    }
}
