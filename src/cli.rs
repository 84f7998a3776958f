//! CLI command definitions
//!
//! Uses `clap` derive API for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{split_list, RunOptions};

/// tasktree - run tasks from a nested, namespaced task tree
#[derive(Parser, Debug)]
#[command(name = "tasktree")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to tasktree.toml config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log resolved configuration and task results
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Preview each task's inputs instead of running it (implies --verbose)
    #[arg(short, long, global = true)]
    pub dry_run: bool,

    /// Comma-separated items replacing each task's sources, formatted
    /// through the task's include_format
    #[arg(short, long, global = true, value_name = "LIST")]
    pub include: Option<String>,

    /// Comma-separated contract-test transactions to run
    #[arg(short, long, global = true, value_name = "LIST")]
    pub transaction: Option<String>,

    /// Log request and response bodies in contract tests (implies --verbose)
    #[arg(short, long, global = true)]
    pub log_body: bool,

    /// Send a desktop notification when the run ends
    #[arg(short, long, global = true)]
    pub notify: bool,

    /// Colorize output
    #[arg(long, global = true, value_name = "BOOL", conflicts_with = "no_color")]
    pub color: Option<bool>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log level passed on to the tools tasks run
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Working directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Use the platform shell for run commands
    #[arg(long, global = true)]
    pub shell: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Task to run (shorthand for `tasktree run <task>`)
    #[arg(trailing_var_arg = true)]
    pub task: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one or more tasks
    Run {
        /// Tasks to run
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// List available tasks
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: ListFormat,

        /// Show task dependencies
        #[arg(long)]
        deps: bool,
    },

    /// Show task dependency graph
    Graph {
        /// Task to show graph for (all tasks if not specified)
        task: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// Initialize a new tasktree.toml
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Validate tasktree.toml and compile the task tree
    Check,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Plain,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
}

impl Cli {
    /// Get the effective command, treating bare task names as `run <task>`
    pub fn effective_command(&self) -> EffectiveCommand<'_> {
        if let Some(cmd) = &self.command {
            EffectiveCommand::Subcommand(cmd)
        } else if !self.task.is_empty() {
            EffectiveCommand::RunTasks(&self.task)
        } else {
            EffectiveCommand::None
        }
    }

    pub fn colors_enabled(&self) -> bool {
        !self.no_color && self.color.unwrap_or(true)
    }

    /// Run options for this invocation. `config_shell` is the config file's
    /// `settings.shell`.
    pub fn run_options(&self, cwd: PathBuf, config_shell: bool) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            verbose: self.verbose,
            include: self.include.as_deref().map(split_list).unwrap_or_default(),
            transactions: self.transaction.as_deref().map(split_list).unwrap_or_default(),
            log_body: self.log_body,
            notify: self.notify,
            color: self.colors_enabled(),
            log_level: self.log_level.clone(),
            ci: RunOptions::detect_ci(),
            shell: self.shell || config_shell,
            cwd,
        }
        .normalized()
    }
}

pub enum EffectiveCommand<'a> {
    Subcommand(&'a Commands),
    RunTasks(&'a [String]),
    None,
}
