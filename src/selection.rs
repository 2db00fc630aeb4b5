use crate::tree::{Node, NodeKind, descendant_paths};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Empty,
    Partial,
    Full,
}

/// Toggle a node in the selection set, returning a new set. Files flip their
/// own membership; a directory toggle is all-or-nothing, with the
/// all-selected check taken against the incoming set before any mutation.
pub fn toggle(selected: &BTreeSet<String>, node: &Node) -> BTreeSet<String> {
    let mut next = selected.clone();
    match node.kind {
        NodeKind::File => {
            if !next.remove(&node.path) {
                next.insert(node.path.clone());
            }
        }
        NodeKind::Directory => {
            let desc = descendant_paths(node);
            let all_selected = !desc.is_empty() && desc.iter().all(|p| next.contains(p));
            if all_selected {
                for path in &desc {
                    next.remove(path);
                }
            } else {
                for path in desc {
                    next.insert(path);
                }
            }
        }
    }
    next
}

/// Tri-state indicator for a directory node. A directory with no eligible
/// descendants is always `Empty`.
pub fn directory_state(selected: &BTreeSet<String>, node: &Node) -> SelectionState {
    let desc = descendant_paths(node);
    if desc.is_empty() {
        return SelectionState::Empty;
    }
    let count = desc.iter().filter(|p| selected.contains(*p)).count();
    if count == 0 {
        SelectionState::Empty
    } else if count == desc.len() {
        SelectionState::Full
    } else {
        SelectionState::Partial
    }
}
