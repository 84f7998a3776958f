//! tasktree - a task runner built on nested, namespaced task trees
//!
//! This crate provides both a CLI tool and a library. Tasks are declared as
//! nested TOML tables and compiled into a flat registry of fully-qualified
//! names before anything runs.
//!
//! # Features
//!
//! - **Namespaced task trees** - groups nest, `default` stands for its group
//! - **Relative and absolute dependencies** - `build`, `../lint`, `/clean`
//! - **Dry runs** - preview each task's inputs without touching anything
//! - **Built-in actions** - commands, Rhai scripts, file operations and
//!   contract tests against a service started for the run
//!
//! # Example
//!
//! ```toml
//! # tasktree.toml
//!
//! [tasks.kibana.build]
//! desc = "Build kibana config"
//! action = { kind = "run", commands = ["node build.js"] }
//!
//! [tasks.kibana.default]
//! deps = "build"
//! ```
//!
//! `kibana.default` compiles to the task `kibana`, depending on
//! `kibana/build` and inheriting its description.
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tasktree::{build_registry, Config, Executor, RunOptions, TaskGraph};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (config, _) = Config::load(None)?;
//!     let options = RunOptions::default();
//!     let registry = build_registry(&config, &options)?;
//!     let graph = TaskGraph::from_registry(&registry)?;
//!
//!     let env = config.task_env(&options.exported_env());
//!     let executor = Executor::new(Arc::new(registry), Arc::new(options), env);
//!     executor.execute(&graph, &["kibana".to_string()]).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod deps;
pub mod dry_run;
pub mod error;
pub mod executor;
pub mod graph;
pub mod listing;
pub mod namespace;
pub mod notify;
pub mod orchestration;
pub mod script;
pub mod sources;
pub mod tree;

// Re-export main types
pub use action::{Action, ActionSpec, TaskContext};
pub use compiler::{apply_defaults, build_registry, CompiledTask, Registry, TaskCompiler};
pub use config::{Config, RunOptions};
pub use deps::DependencyResolver;
pub use dry_run::{Completion, DryRunGuard};
pub use error::{Result, TaskTreeError};
pub use executor::{Executor, TaskResult, TaskStatus};
pub use graph::{ExecutionPlan, TaskGraph};
pub use namespace::NamespaceResolver;
pub use orchestration::{ContractStats, ContractTestRunner};
pub use script::ScriptEngine;
pub use tree::TaskNode;
