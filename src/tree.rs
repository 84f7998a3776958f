//! Typed task tree
//!
//! The `[tasks]` table of the configuration is a nested mapping. A table that
//! declares `desc`, `deps` or `action` is a leaf task; any other table is a
//! group whose entries are child nodes.

use serde::{Deserialize, Deserializer, Serialize};

use crate::action::ActionSpec;
use crate::config::RunOptions;
use crate::error::{Result, TaskTreeError};

/// Keys whose presence turns a table into a leaf task
pub const LEAF_KEYS: &[&str] = &["desc", "deps", "action"];

/// A node of the declarative task tree
#[derive(Debug, Clone)]
pub enum TaskNode {
    /// Namespacing node; children in declaration order
    Group(Vec<(String, TaskNode)>),
    /// Node that performs work
    Leaf(LeafSpec),
}

/// Definition of a leaf task as written in the configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LeafSpec {
    /// Human-readable description
    #[serde(default)]
    pub desc: Option<String>,

    /// Raw dependency references, relative or `/`-rooted
    #[serde(default, deserialize_with = "one_or_many")]
    pub deps: Vec<String>,

    /// Work to perform
    #[serde(default)]
    pub action: Option<ActionSpec>,

    /// Task configuration (sources, dry-run policy, script values)
    #[serde(default)]
    pub config: Option<TaskSettings>,
}

/// Per-task configuration value
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TaskSettings {
    /// Input glob patterns; `!`-prefixed patterns exclude
    #[serde(default, deserialize_with = "one_or_many")]
    pub src: Vec<String>,

    /// Still run the action after a dry-run preview
    #[serde(default, alias = "continueOnDryRun")]
    pub continue_on_dry_run: bool,

    /// Template applied to each `--include` item, `{}` marks the item
    #[serde(default)]
    pub include_format: Option<String>,

    /// Any other values, exposed to scripts
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl TaskSettings {
    /// Source patterns in effect for this run.
    ///
    /// `--include` replaces the configured patterns, but only for tasks that
    /// say how an included item maps to a path.
    pub fn sources(&self, options: &RunOptions) -> Vec<String> {
        match &self.include_format {
            Some(format) if !options.include.is_empty() => options
                .include
                .iter()
                .map(|item| format.replace("{}", item))
                .collect(),
            _ => self.src.clone(),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

impl TaskNode {
    /// Build the root of the tree. The root is always a group, whatever keys
    /// it holds.
    pub fn root(table: &toml::Table) -> Result<Self> {
        Self::group_from_table("tasks", table)
    }

    /// Build a node from a table found at `path` (dotted, for diagnostics)
    pub fn from_table(path: &str, table: &toml::Table) -> Result<Self> {
        if Self::is_leaf_table(table) {
            let leaf = toml::Value::Table(table.clone())
                .try_into::<LeafSpec>()
                .map_err(|e| TaskTreeError::InvalidTask {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(TaskNode::Leaf(leaf))
        } else {
            Self::group_from_table(path, table)
        }
    }

    fn group_from_table(path: &str, table: &toml::Table) -> Result<Self> {
        let mut children = Vec::with_capacity(table.len());
        for (key, value) in table {
            let child_path = format!("{path}.{key}");
            if key.is_empty() {
                return Err(TaskTreeError::InvalidTask {
                    path: child_path,
                    reason: "task keys cannot be empty".to_string(),
                });
            }
            let child = value.as_table().ok_or_else(|| TaskTreeError::InvalidTask {
                path: child_path.clone(),
                reason: format!(
                    "expected a task table, found {} (leaf tasks need one of: {})",
                    value.type_str(),
                    LEAF_KEYS.join(", ")
                ),
            })?;
            children.push((key.clone(), Self::from_table(&child_path, child)?));
        }
        Ok(TaskNode::Group(children))
    }

    /// A table is a leaf iff it declares at least one leaf key
    pub fn is_leaf_table(table: &toml::Table) -> bool {
        LEAF_KEYS.iter().any(|key| table.contains_key(*key))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TaskNode::Leaf(_))
    }

    /// Number of leaves in this subtree
    pub fn leaf_count(&self) -> usize {
        match self {
            TaskNode::Leaf(_) => 1,
            TaskNode::Group(children) => children.iter().map(|(_, c)| c.leaf_count()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> TaskNode {
        let table: toml::Table = toml::from_str(toml).unwrap();
        TaskNode::root(&table).unwrap()
    }

    #[test]
    fn test_classifies_leaves_and_groups() {
        let tree = parse(
            r#"
            [lint]
            desc = "Lint sources"

            [docs.build]
            deps = "prepare"

            [docs.prepare.action]
            kind = "mkdir"
            "#,
        );

        let TaskNode::Group(children) = &tree else {
            panic!("root must be a group");
        };
        assert!(children[0].1.is_leaf());
        assert!(!children[1].1.is_leaf());
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn test_deps_accepts_string_or_list() {
        let tree = parse(
            r#"
            [a]
            deps = "b"
            [c]
            deps = ["d", "/e"]
            "#,
        );
        let TaskNode::Group(children) = tree else { unreachable!() };
        let TaskNode::Leaf(a) = &children[0].1 else { unreachable!() };
        let TaskNode::Leaf(c) = &children[1].1 else { unreachable!() };
        assert_eq!(a.deps, vec!["b"]);
        assert_eq!(c.deps, vec!["d", "/e"]);
    }

    #[test]
    fn test_config_alone_does_not_make_a_leaf() {
        let table: toml::Table = toml::from_str(
            r#"
            [group.config]
            src = ["a.md"]
            "#,
        )
        .unwrap();
        let err = TaskNode::root(&table).unwrap_err();
        assert!(matches!(err, TaskTreeError::InvalidTask { ref path, .. } if path == "tasks.group.config.src"));
    }

    #[test]
    fn test_non_table_child_is_rejected() {
        let table: toml::Table = toml::from_str("lint = \"eslint\"").unwrap();
        let err = TaskNode::root(&table).unwrap_err();
        assert!(matches!(err, TaskTreeError::InvalidTask { ref path, .. } if path == "tasks.lint"));
    }

    #[test]
    fn test_unknown_leaf_key_is_rejected() {
        let table: toml::Table = toml::from_str(
            r#"
            [lint]
            desc = "Lint"
            task = "eslint"
            "#,
        )
        .unwrap();
        assert!(TaskNode::root(&table).is_err());
    }

    #[test]
    fn test_include_overrides_sources_with_format() {
        let settings = TaskSettings {
            src: vec!["spec/*Spec.js".to_string()],
            include_format: Some("spec/{}Spec.js".to_string()),
            ..Default::default()
        };
        let options = RunOptions {
            include: vec!["users".to_string(), "apps".to_string()],
            ..Default::default()
        };
        assert_eq!(
            settings.sources(&options),
            vec!["spec/usersSpec.js", "spec/appsSpec.js"]
        );
        assert_eq!(settings.sources(&RunOptions::default()), vec!["spec/*Spec.js"]);
    }

    #[test]
    fn test_include_ignored_without_format() {
        let settings = TaskSettings {
            src: vec!["dist/**/*".to_string()],
            ..Default::default()
        };
        let options = RunOptions {
            include: vec!["users".to_string()],
            ..Default::default()
        };
        assert_eq!(settings.sources(&options), vec!["dist/**/*"]);
    }

    #[test]
    fn test_camel_case_continue_flag() {
        let settings: TaskSettings = toml::from_str("continueOnDryRun = true").unwrap();
        assert!(settings.continue_on_dry_run);
    }
}
