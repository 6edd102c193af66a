//! Narrow lookups into the project/card domain model.
//!
//! The host application owns schema discovery, the user directory and tree membership; the
//! engine only ever asks the questions below.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyKind {
    /// Numeric property with a project-defined list of values.
    ManagedNumeric,
    /// Numeric property accepting any number; values keep the literal text they were entered with.
    FreeNumeric,
    ManagedText,
    FreeText,
    Date,
    User,
    /// Relationship to a card of a given type.
    Card,
    /// Relationship to an ancestor card inside a planning tree.
    TreeRelationship,
    /// Computed numeric property.
    Formula,
}

impl PropertyKind {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::ManagedNumeric | Self::FreeNumeric | Self::Formula
        )
    }

    pub fn is_card(self) -> bool {
        matches!(self, Self::Card | Self::TreeRelationship)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub identifier: String,
    pub name: String,
    /// chrono `strftime` pattern used to display dates.
    pub date_format: String,
    /// Number of decimals numeric values are stored and rendered with.
    pub precision: usize,
    /// Whether the current viewer is a member of the project.
    pub accessible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub kind: PropertyKind,
    /// Card type the relationship points at (card and tree relationships).
    pub card_type: Option<String>,
    /// Tree the relationship belongs to (tree relationships).
    pub tree: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub login: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
    pub id: u64,
    pub number: u64,
    pub name: String,
    pub card_type: String,
}

impl CardSummary {
    pub fn reference(&self) -> String {
        format!("#{} {}", self.number, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub number: u64,
    pub name: String,
    pub card_type: String,
    pub parent: Option<u64>,
}

/// A planning tree; `nodes` are in depth-first order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeInfo {
    pub name: String,
    pub nodes: Vec<TreeNode>,
}

impl TreeInfo {
    pub fn node(&self, number: u64) -> Option<&TreeNode> {
        self.nodes.iter().find(|n| n.number == number)
    }

    pub fn contains(&self, number: u64) -> bool {
        self.node(number).is_some()
    }

    /// Names from the root down to (and including) the card, or `None` when the card is not in
    /// the tree.
    pub fn path(&self, number: u64) -> Option<Vec<String>> {
        let mut out = Vec::new();
        let mut cur = self.node(number)?;
        out.push(cur.name.clone());
        let mut guard = self.nodes.len();
        while let Some(parent) = cur.parent {
            if guard == 0 {
                break;
            }
            guard -= 1;
            let Some(next) = self.node(parent) else {
                break;
            };
            out.push(next.name.clone());
            cur = next;
        }
        out.reverse();
        Some(out)
    }

    /// The card whose root-down name path equals `path`.
    pub fn find_by_path(&self, path: &[String]) -> Option<&TreeNode> {
        self.nodes
            .iter()
            .find(|n| self.path(n.number).is_some_and(|p| p.as_slice() == path))
    }
}

pub trait ProjectModel {
    fn project(&self, identifier: &str) -> Option<ProjectInfo>;

    fn property(&self, project: &str, name: &str) -> Option<PropertyDefinition>;

    /// Managed properties: the project-defined values in order. Everything else: the values in
    /// use, in first-seen order, with their literal text.
    fn property_values(&self, project: &str, property: &str) -> Vec<String>;

    fn users(&self, project: &str) -> Vec<UserInfo>;

    fn cards_of_type(&self, project: &str, card_type: &str) -> Vec<CardSummary>;

    fn card(&self, project: &str, number: u64) -> Option<CardSummary>;

    /// Raw stored value of a card property (logins for users, card numbers for relationships).
    fn card_property(&self, project: &str, number: u64, property: &str) -> Option<String>;

    fn tree(&self, project: &str, name: &str) -> Option<TreeInfo>;

    fn project_variable(&self, project: &str, name: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(number: u64, name: &str, parent: Option<u64>) -> TreeNode {
        TreeNode {
            number,
            name: name.to_string(),
            card_type: "t".to_string(),
            parent,
        }
    }

    #[test]
    fn tree_paths_walk_up_to_the_root() {
        let tree = TreeInfo {
            name: "Planning".to_string(),
            nodes: vec![
                node(1, "release1", None),
                node(2, "iteration1", Some(1)),
                node(3, "story", Some(2)),
            ],
        };
        assert_eq!(
            tree.path(3).unwrap(),
            vec!["release1", "iteration1", "story"]
        );
        assert_eq!(
            tree.find_by_path(&["release1".to_string(), "iteration1".to_string()])
                .map(|n| n.number),
            Some(2)
        );
        assert!(tree.path(9).is_none());
    }
}
