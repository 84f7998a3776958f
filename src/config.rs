//! Configuration parsing for tasktree.toml
//!
//! Handles loading the task runner configuration and the immutable
//! [`RunOptions`] built once from the command line.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TaskTreeError};
use crate::tree::TaskNode;

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["tasktree.toml", "Tasktree.toml"];

/// Environment variables that mark an unattended run
pub const CI_ENV_VARS: &[&str] = &["CI", "JENKINS_URL"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Global environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// The nested task tree, kept raw until compiled
    #[serde(default)]
    pub tasks: toml::Table,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

/// Global settings for tasktree behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Key marking the node that stands for its group itself
    #[serde(default = "default_group_task")]
    pub default_group_task: String,

    /// Run commands through the platform shell by default
    #[serde(default)]
    pub shell: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_group_task: default_group_task(),
            shell: false,
        }
    }
}

fn default_group_task() -> String {
    "default".to_string()
}

impl Config {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(p) => {
                if p.exists() {
                    p.to_path_buf()
                } else {
                    return Err(TaskTreeError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config()?,
        };

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::parse(&content).map_err(|e| TaskTreeError::ConfigParse {
            source: e,
            path: config_path.clone(),
        })?;

        config.validate()?;

        Ok((config, config_path))
    }

    /// Parse configuration text without validating the task tree
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Search for config file starting from current directory
    fn find_config() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;
        let mut searched = Vec::new();

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                searched.push(candidate.clone());
                if candidate.exists() {
                    return Ok(candidate);
                }
            }

            if !current.pop() {
                break;
            }
        }

        Err(TaskTreeError::ConfigNotFound { searched })
    }

    fn validate(&self) -> Result<()> {
        if self.settings.default_group_task.is_empty() || self.settings.default_group_task.contains('/') {
            return Err(TaskTreeError::InvalidTask {
                path: "settings.default_group_task".to_string(),
                reason: "must be a non-empty key without '/'".to_string(),
            });
        }
        self.task_tree().map(|_| ())
    }

    /// Build the typed task tree from the `[tasks]` table
    pub fn task_tree(&self) -> Result<TaskNode> {
        TaskNode::root(&self.tasks)
    }

    /// Merge global environment variables with task-specific ones
    pub fn task_env(&self, task_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.extend(task_env.clone());
        env
    }
}

/// Run-wide options derived from the command line.
///
/// Built once at startup and shared by reference with the compiler and every
/// action; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    pub verbose: bool,
    /// Items from `--include`, already split and trimmed
    pub include: Vec<String>,
    /// Items from `--transaction`
    pub transactions: Vec<String>,
    pub log_body: bool,
    pub notify: bool,
    pub color: bool,
    pub log_level: Option<String>,
    /// Unattended run (CI server); disables notifications
    pub ci: bool,
    /// Use the platform shell for `run` commands
    pub shell: bool,
    pub cwd: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            verbose: false,
            include: Vec::new(),
            transactions: Vec::new(),
            log_body: false,
            notify: false,
            color: true,
            log_level: None,
            ci: false,
            shell: false,
            cwd: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl RunOptions {
    /// Apply the implications between flags: dry runs and body logging are
    /// always verbose.
    pub fn normalized(mut self) -> Self {
        if self.dry_run || self.log_body {
            self.verbose = true;
        }
        self
    }

    /// Whether a desktop notification should be sent at the end of a run
    pub fn notifications_enabled(&self) -> bool {
        self.notify && !self.ci
    }

    /// Detect an unattended run from the environment
    pub fn detect_ci() -> bool {
        CI_ENV_VARS
            .iter()
            .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
    }

    /// Environment exported to collaborating processes
    pub fn exported_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("TASKTREE_LOG_COLORS".to_string(), self.color.to_string());
        if let Some(level) = &self.log_level {
            env.insert("TASKTREE_LOG_LEVEL".to_string(), level.clone());
        }
        env
    }
}

/// Split a comma-separated option value into trimmed, non-empty items
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_config() {
        let toml = r#"
            [env]
            NODE_ENV = "test"

            [settings]
            default_group_task = "index"

            [tasks.apidoc.index]
            desc = "Build all docs"
            deps = ["aglio"]

            [tasks.apidoc.aglio]
            desc = "Build aglio docs"
            action = { kind = "run", commands = ["aglio -i api.apib"] }
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.env.get("NODE_ENV"), Some(&"test".to_string()));
        assert_eq!(config.settings.default_group_task, "index");
        assert!(config.tasks.contains_key("apidoc"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_settings() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.settings.default_group_task, "default");
        assert!(!config.settings.shell);
    }

    #[test]
    fn test_dry_run_implies_verbose() {
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        }
        .normalized();
        assert!(options.verbose);

        let options = RunOptions {
            log_body: true,
            ..Default::default()
        }
        .normalized();
        assert!(options.verbose);
    }

    #[test]
    fn test_notifications_suppressed_in_ci() {
        let options = RunOptions {
            notify: true,
            ci: true,
            ..Default::default()
        };
        assert!(!options.notifications_enabled());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" users, apps ,,roles"), vec!["users", "apps", "roles"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_exported_env() {
        let options = RunOptions {
            color: false,
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let env = options.exported_env();
        assert_eq!(env["TASKTREE_LOG_COLORS"], "false");
        assert_eq!(env["TASKTREE_LOG_LEVEL"], "debug");
    }
}
