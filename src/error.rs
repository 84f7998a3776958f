//! Error types for tasktree
//!
//! Uses `miette` for pretty error reporting with help text. Variants are
//! grouped the way failures surface: compilation errors abort before any task
//! runs, configuration and execution errors are reported per task, and
//! external tool errors carry the tool's own diagnostic payload.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tasktree operations
#[derive(Error, Diagnostic, Debug)]
pub enum TaskTreeError {
    // --- configuration file ---
    #[error("Configuration file not found")]
    #[diagnostic(
        code(tasktree::config::not_found),
        help("Create a tasktree.toml in your project root, or specify one with --config")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse configuration")]
    #[diagnostic(code(tasktree::config::parse))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid task definition at '{path}': {reason}")]
    #[diagnostic(code(tasktree::config::invalid_task))]
    InvalidTask { path: String, reason: String },

    // --- compilation ---
    #[error("Task '{name}' is defined twice (at '{first}' and '{second}')")]
    #[diagnostic(
        code(tasktree::compile::duplicate),
        help("A 'default' child takes the name of its group; rename one of the two definitions")
    )]
    DuplicateTask {
        name: String,
        first: String,
        second: String,
    },

    #[error("Task '{task}' depends on '{reference}', which does not exist")]
    #[diagnostic(
        code(tasktree::compile::unresolved),
        help("Relative references resolve from the enclosing group; prefix with '/' to start at the root")
    )]
    UnresolvedDependency {
        task: String,
        reference: String,
        tried: Vec<String>,
    },

    #[error("Invalid dependency reference '{reference}' in task '{task}'")]
    #[diagnostic(code(tasktree::compile::invalid_reference))]
    InvalidReference { task: String, reference: String },

    #[error("Task '{task}' depends on itself")]
    #[diagnostic(code(tasktree::compile::self_dependency))]
    SelfDependency { task: String },

    #[error("Circular dependency detected: {cycle}")]
    #[diagnostic(
        code(tasktree::compile::cycle),
        help("Check the 'deps' field in your task definitions")
    )]
    CyclicDependency { cycle: String },

    #[error("Task '{name}' not found")]
    #[diagnostic(
        code(tasktree::task::not_found),
        help("Run `tasktree list` to see available tasks")
    )]
    TaskNotFound { name: String, available: Vec<String> },

    // --- per-task configuration ---
    #[error("Task '{task}' declares no source patterns")]
    #[diagnostic(
        code(tasktree::config::missing_sources),
        help("Add `src` to the task's [config] table")
    )]
    MissingSources { task: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    #[diagnostic(code(tasktree::config::pattern))]
    InvalidPattern { pattern: String, reason: String },

    // --- execution ---
    #[error("Task '{task}' failed with exit code {code}")]
    #[diagnostic(code(tasktree::exec::failed))]
    TaskFailed {
        task: String,
        code: i32,
        #[help]
        stderr: Option<String>,
    },

    #[error("Command not found: {command}")]
    #[diagnostic(
        code(tasktree::exec::command_not_found),
        help("Ensure the command is installed and in your PATH")
    )]
    CommandNotFound { command: String },

    #[error("Script execution failed in task '{task}'")]
    #[diagnostic(code(tasktree::script::failed))]
    ScriptFailed {
        task: String,
        #[source]
        source: Box<rhai::EvalAltResult>,
    },

    #[error("{message}")]
    #[diagnostic(code(tasktree::exec::service))]
    Service { message: String },

    #[error("{count} task(s) failed, first failure in '{task}'")]
    #[diagnostic(code(tasktree::exec::run_failed))]
    RunFailed {
        task: String,
        count: usize,
        #[help]
        reason: Option<String>,
    },

    // --- external tools ---
    #[error("{tool} reported {failures} failure(s) and {errors} error(s)")]
    #[diagnostic(code(tasktree::external::failed))]
    ExternalTool {
        tool: String,
        failures: u64,
        errors: u64,
        #[help]
        payload: Option<String>,
    },

    #[error("Could not read {tool} output: {reason}")]
    #[diagnostic(code(tasktree::external::output))]
    ExternalOutput { tool: String, reason: String },

    #[error("I/O error")]
    #[diagnostic(code(tasktree::io))]
    Io(#[from] std::io::Error),

    #[error("JSON error")]
    #[diagnostic(code(tasktree::json))]
    Json(#[from] serde_json::Error),
}

impl TaskTreeError {
    /// True for errors raised while building the registry.
    pub fn is_compilation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTask { .. }
                | Self::UnresolvedDependency { .. }
                | Self::InvalidReference { .. }
                | Self::SelfDependency { .. }
                | Self::CyclicDependency { .. }
                | Self::InvalidTask { .. }
        )
    }
}

/// Result type alias for tasktree operations
pub type Result<T> = std::result::Result<T, TaskTreeError>;
