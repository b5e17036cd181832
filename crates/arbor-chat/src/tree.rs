//! Branch index, visible path and descendant walks over a flat message list
//!
//! Nothing here is stored between changes. Every structure is rebuilt from
//! the message list and the branch selection in a linear pass, so derived
//! state can never drift from its inputs.

use arbor_wire::{Message, Role};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::selection::BranchSelection;

/// Sentinel parent key for messages without a parent
pub const ROOT: &str = "root";

/// Parent key used for grouping: the parent id, or [`ROOT`]
pub fn parent_key(message: &Message) -> &str {
    message.parent_message_id.as_deref().unwrap_or(ROOT)
}

/// Forward adjacency derived from parent pointers.
///
/// Children are listed in input order, so the last entry is always the
/// most recently created variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchIndex {
    /// user message id -> alternate assistant replies
    pub assistant_children: HashMap<String, Vec<String>>,
    /// assistant message id or [`ROOT`] -> alternate user prompts
    pub user_children: HashMap<String, Vec<String>>,
}

impl BranchIndex {
    /// Group messages by `(role, parent)` in one pass
    pub fn build(messages: &[Message]) -> Self {
        let mut index = Self::default();
        for message in messages {
            let map = match message.role {
                Role::User => &mut index.user_children,
                Role::Assistant => &mut index.assistant_children,
                Role::System => continue,
            };
            map.entry(parent_key(message).to_string())
                .or_default()
                .push(message.message_id.clone());
        }
        index
    }

    /// Sibling list a message belongs to, if it is branchable
    pub fn siblings_of(&self, message: &Message) -> Option<&[String]> {
        let map = match message.role {
            Role::User => &self.user_children,
            Role::Assistant => &self.assistant_children,
            Role::System => return None,
        };
        map.get(parent_key(message)).map(Vec::as_slice)
    }

    /// Number of variants gated by `parent_id`, across both maps
    pub fn branch_count(&self, parent_id: &str) -> usize {
        let assistants = self.assistant_children.get(parent_id).map_or(0, Vec::len);
        let users = self.user_children.get(parent_id).map_or(0, Vec::len);
        assistants.max(users)
    }
}

/// Fully derived view of a conversation under a given branch selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationTree {
    pub assistant_branches: HashMap<String, Vec<String>>,
    pub user_branches: HashMap<String, Vec<String>>,
    pub branch_counts: HashMap<String, usize>,
    /// Ids on the visible path, root first
    pub visible_message_ids: Vec<String>,
    visible: HashSet<String>,
}

impl ConversationTree {
    /// Build the tree and resolve the visible path
    pub fn build(messages: &[Message], selection: &BranchSelection) -> Self {
        let BranchIndex {
            assistant_children,
            user_children,
        } = BranchIndex::build(messages);

        let mut branch_counts = HashMap::new();
        for (parent, children) in assistant_children.iter().chain(user_children.iter()) {
            let count = branch_counts.entry(parent.clone()).or_insert(0);
            *count = (*count).max(children.len());
        }

        let visible_message_ids = resolve_visible(&assistant_children, &user_children, selection);
        let visible = visible_message_ids.iter().cloned().collect();

        Self {
            assistant_branches: assistant_children,
            user_branches: user_children,
            branch_counts,
            visible_message_ids,
            visible,
        }
    }

    /// Whether a message is on the visible path
    pub fn is_visible(&self, message_id: &str) -> bool {
        self.visible.contains(message_id)
    }

    /// Variant count at a branch point (0 if none)
    pub fn branch_count(&self, parent_id: &str) -> usize {
        self.branch_counts.get(parent_id).copied().unwrap_or(0)
    }

    /// Id of the last message on the visible path
    pub fn leaf(&self) -> Option<&str> {
        self.visible_message_ids.last().map(String::as_str)
    }

    /// Visible messages in path order
    pub fn visible_messages<'a>(&self, messages: &'a [Message]) -> Vec<&'a Message> {
        let by_id: HashMap<&str, &Message> = messages
            .iter()
            .map(|m| (m.message_id.as_str(), m))
            .collect();
        self.visible_message_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect()
    }
}

/// Walk from the root along selected children, alternating user and
/// assistant, until a node has no children of the next role.
fn resolve_visible(
    assistant_children: &HashMap<String, Vec<String>>,
    user_children: &HashMap<String, Vec<String>>,
    selection: &BranchSelection,
) -> Vec<String> {
    let mut path = Vec::new();
    let mut seen = HashSet::new();
    let mut parent = ROOT.to_string();

    loop {
        let Some(user) = pick(user_children, &parent, selection) else {
            break;
        };
        // duplicate ids would otherwise revisit a node
        if !seen.insert(user.clone()) {
            break;
        }
        path.push(user.clone());

        let Some(assistant) = pick(assistant_children, &user, selection) else {
            break;
        };
        if !seen.insert(assistant.clone()) {
            break;
        }
        path.push(assistant.clone());
        parent = assistant;
    }

    path
}

fn pick(
    children: &HashMap<String, Vec<String>>,
    parent: &str,
    selection: &BranchSelection,
) -> Option<String> {
    let list = children.get(parent).filter(|list| !list.is_empty())?;
    let index = selection.selected_index(parent, list.len());
    list.get(index).cloned()
}

/// The assistant message a freshly sent user turn should attach to.
///
/// Scans from the end for the most recent assistant message that is on the
/// visible path, so a send while viewing an older branch continues that
/// branch rather than the temporally last one.
pub fn active_assistant_parent_id(messages: &[Message], tree: &ConversationTree) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && tree.is_visible(&m.message_id))
        .map(|m| m.message_id.clone())
}

/// Every message reachable from `message_id` through child links,
/// excluding `message_id` itself.
pub fn descendants_of(messages: &[Message], message_id: &str) -> HashSet<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for message in messages {
        if let Some(parent) = message.parent_message_id.as_deref() {
            children
                .entry(parent)
                .or_default()
                .push(message.message_id.as_str());
        }
    }

    let mut found = HashSet::new();
    let mut queue = VecDeque::from([message_id]);
    while let Some(id) = queue.pop_front() {
        for child in children.get(id).into_iter().flatten() {
            if *child != message_id && found.insert(child.to_string()) {
                queue.push_back(*child);
            }
        }
    }
    found
}
