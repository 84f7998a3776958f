//! Leaf task actions
//!
//! An action is the work a leaf performs. Actions are declared in the
//! configuration as a table tagged by `kind`; the compiler builds each one
//! once and wraps it in the dry-run guard.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use console::style;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::compiler::Registry;
use crate::config::RunOptions;
use crate::error::{Result, TaskTreeError};
use crate::listing;
use crate::orchestration::{ContractTestAction, ContractTestSpec};
use crate::script::ScriptRun;
use crate::sources::{self, SourceSet};
use crate::tree::TaskSettings;

/// Everything an action sees while it runs
pub struct TaskContext<'a> {
    /// Fully-qualified task name
    pub task: &'a str,
    pub settings: Option<&'a TaskSettings>,
    pub options: &'a RunOptions,
    pub registry: &'a Registry,
    /// Global environment (configuration `[env]` plus exported options)
    pub env: &'a HashMap<String, String>,
}

impl TaskContext<'_> {
    /// Source patterns in effect, empty when none are declared
    pub fn source_patterns(&self) -> Vec<String> {
        self.settings
            .map(|s| s.sources(self.options))
            .unwrap_or_default()
    }

    /// Source set for actions that cannot work without inputs
    pub fn required_sources(&self) -> Result<SourceSet> {
        let patterns = self.source_patterns();
        if patterns.is_empty() {
            return Err(TaskTreeError::MissingSources {
                task: self.task.to_string(),
            });
        }
        SourceSet::new(&patterns, &self.options.cwd)
    }

    /// Resolve a configured output path against the working directory
    pub fn path(&self, configured: &Path) -> Result<PathBuf> {
        let expanded = sources::expand(&configured.to_string_lossy())?;
        Ok(self.options.cwd.join(expanded))
    }

    fn relative<'p>(&self, path: &'p Path) -> std::path::Display<'p> {
        path.strip_prefix(&self.options.cwd).unwrap_or(path).display()
    }
}

/// Work performed by a leaf task.
///
/// Returns optional data describing the result, logged in verbose mode.
#[async_trait]
pub trait Action: Send + Sync + fmt::Debug {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>>;

    /// One-line description for plans and listings
    fn summary(&self) -> String;
}

/// Action declaration as written in the configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionSpec {
    /// External commands
    Run(RunSpec),
    /// Embedded Rhai script
    Script { source: String },
    /// Delete everything matched by `src`
    Remove,
    /// Create each directory listed in `src`
    Mkdir,
    /// Concatenate the `src` files into `dest`
    Concat { dest: PathBuf },
    /// Copy the `src` files into `dest_dir`, optionally rewriting content
    Copy {
        dest_dir: PathBuf,
        #[serde(default)]
        replace: Option<String>,
        #[serde(default)]
        with: String,
    },
    /// Merge the `src` JSON files into one object keyed by file stem
    JsonCombine { dest: PathBuf },
    /// Print the task listing
    Help,
    /// Contract tests against a service started for the run
    ContractTest(ContractTestSpec),
}

/// Commands to run for a `run` action
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RunSpec {
    pub commands: Vec<String>,

    /// Run commands concurrently
    #[serde(default)]
    pub parallel: bool,

    /// Use the platform shell
    #[serde(default)]
    pub shell: Option<bool>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ActionSpec {
    /// Build the runnable action
    pub fn build(&self) -> Result<Arc<dyn Action>> {
        Ok(match self {
            ActionSpec::Run(spec) => Arc::new(RunAction(spec.clone())),
            ActionSpec::Script { source } => Arc::new(ScriptAction {
                source: source.clone(),
            }),
            ActionSpec::Remove => Arc::new(RemoveAction),
            ActionSpec::Mkdir => Arc::new(MkdirAction),
            ActionSpec::Concat { dest } => Arc::new(ConcatAction { dest: dest.clone() }),
            ActionSpec::Copy {
                dest_dir,
                replace,
                with,
            } => {
                let rewrite = replace
                    .as_deref()
                    .map(|pattern| {
                        Regex::new(pattern)
                            .map(|re| (re, with.clone()))
                            .map_err(|e| TaskTreeError::InvalidPattern {
                                pattern: pattern.to_string(),
                                reason: e.to_string(),
                            })
                    })
                    .transpose()?;
                Arc::new(CopyAction {
                    dest_dir: dest_dir.clone(),
                    rewrite,
                })
            }
            ActionSpec::JsonCombine { dest } => Arc::new(JsonCombineAction { dest: dest.clone() }),
            ActionSpec::Help => Arc::new(HelpAction),
            ActionSpec::ContractTest(spec) => Arc::new(ContractTestAction::new(spec.clone())),
        })
    }
}

// ---------------------------------------------------------------------------
// run

#[derive(Debug)]
pub struct RunAction(pub RunSpec);

#[async_trait]
impl Action for RunAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        let spec = &self.0;
        let shell = spec.shell.unwrap_or(ctx.options.shell);

        if ctx.options.dry_run {
            for cmd in &spec.commands {
                println!("    {} {}", style("→").dim(), cmd);
            }
            return Ok(None);
        }

        let mut env = ctx.env.clone();
        env.extend(spec.env.clone());
        let cwd = match &spec.cwd {
            Some(dir) => ctx.path(dir)?,
            None => ctx.options.cwd.clone(),
        };

        let output = if spec.parallel {
            let runs = spec
                .commands
                .iter()
                .map(|cmd| execute_command(ctx.task, cmd, &env, &cwd, shell));
            futures::future::try_join_all(runs).await?.join("\n")
        } else {
            let mut all_output = String::new();
            for cmd in &spec.commands {
                tracing::debug!(task = %ctx.task, command = %cmd, "running command");
                let output = execute_command(ctx.task, cmd, &env, &cwd, shell).await?;
                all_output.push_str(&output);
            }
            all_output
        };

        Ok((!output.trim().is_empty()).then_some(output))
    }

    fn summary(&self) -> String {
        self.0.commands.join(" && ")
    }
}

/// Build a command, either through the platform shell or by splitting the
/// command line and resolving the program on `PATH`.
pub(crate) fn build_command(cmd: &str, shell: bool) -> Result<Command> {
    if shell {
        let (program, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let mut command = Command::new(program);
        command.arg(flag).arg(cmd);
        return Ok(command);
    }

    let parts = parse_command(cmd);
    let program = parts.first().ok_or_else(|| TaskTreeError::CommandNotFound {
        command: cmd.to_string(),
    })?;
    let resolved = which::which(program).map_err(|_| TaskTreeError::CommandNotFound {
        command: program.clone(),
    })?;
    let mut command = Command::new(resolved);
    command.args(&parts[1..]);
    Ok(command)
}

async fn execute_command(
    task: &str,
    cmd: &str,
    env: &HashMap<String, String>,
    cwd: &Path,
    shell: bool,
) -> Result<String> {
    let mut command = build_command(cmd, shell)?;
    command
        .current_dir(cwd)
        .envs(env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = command.output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TaskTreeError::TaskFailed {
            task: format!("{task}: {cmd}"),
            code: output.status.code().unwrap_or(1),
            stderr: (!stderr.trim().is_empty()).then(|| stderr.to_string()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Split a command line into program and arguments (handles quotes)
pub(crate) fn parse_command(cmd: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = '"';

    for c in cmd.chars() {
        match c {
            '"' | '\'' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            c if c == quote_char && in_quotes => {
                in_quotes = false;
            }
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

// ---------------------------------------------------------------------------
// script

#[derive(Debug)]
pub struct ScriptAction {
    source: String,
}

#[async_trait]
impl Action for ScriptAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        let run = ScriptRun::from_context(ctx);
        let source = self.source.clone();
        let output = tokio::task::spawn_blocking(move || run.execute(&source))
            .await
            .map_err(|e| TaskTreeError::Io(std::io::Error::other(e)))?
            .map_err(|e| TaskTreeError::ScriptFailed {
                task: ctx.task.to_string(),
                source: e,
            })?;
        Ok((!output.trim().is_empty()).then_some(output))
    }

    fn summary(&self) -> String {
        "[rhai script]".to_string()
    }
}

// ---------------------------------------------------------------------------
// filesystem

#[derive(Debug)]
pub struct RemoveAction;

#[async_trait]
impl Action for RemoveAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        let set = ctx.required_sources()?;
        let mut matched = set.resolve()?;
        matched.sort();

        let mut removed: Vec<PathBuf> = Vec::new();
        for path in matched {
            if removed.iter().any(|done| path.starts_with(done)) {
                continue;
            }
            if !ctx.options.dry_run {
                let result = if path.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                match result {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                }
            }
            removed.push(path);
        }

        Ok(Some(if removed.is_empty() {
            "Nothing deleted".to_string()
        } else {
            let verb = if ctx.options.dry_run { "would be deleted" } else { "deleted" };
            let list: Vec<String> = removed.iter().map(|p| set.display(p).to_string()).collect();
            format!("Files and folders {verb}: {}", list.join(", "))
        }))
    }

    fn summary(&self) -> String {
        "remove sources".to_string()
    }
}

#[derive(Debug)]
pub struct MkdirAction;

#[async_trait]
impl Action for MkdirAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        let dirs = ctx.source_patterns();
        if dirs.is_empty() {
            return Err(TaskTreeError::MissingSources {
                task: ctx.task.to_string(),
            });
        }

        let mut created = Vec::new();
        for dir in &dirs {
            let path = ctx.path(Path::new(dir))?;
            if path.is_dir() {
                continue;
            }
            if !ctx.options.dry_run {
                tokio::fs::create_dir_all(&path).await?;
            }
            created.push(ctx.relative(&path).to_string());
        }

        Ok(Some(if created.is_empty() {
            "Nothing created".to_string()
        } else {
            format!("Directory created: {}", created.join(", "))
        }))
    }

    fn summary(&self) -> String {
        "create directories".to_string()
    }
}

#[derive(Debug)]
pub struct ConcatAction {
    dest: PathBuf,
}

#[async_trait]
impl Action for ConcatAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        let inputs = ctx.required_sources()?.resolve()?;
        let dest = ctx.path(&self.dest)?;

        let mut parts = Vec::with_capacity(inputs.len());
        for input in &inputs {
            parts.push(tokio::fs::read_to_string(input).await?);
        }

        write_file(&dest, parts.join("\n").as_bytes()).await?;
        Ok(Some(format!(
            "Concatenated {} file(s) into {}",
            inputs.len(),
            ctx.relative(&dest)
        )))
    }

    fn summary(&self) -> String {
        format!("concat → {}", self.dest.display())
    }
}

#[derive(Debug)]
pub struct CopyAction {
    dest_dir: PathBuf,
    rewrite: Option<(Regex, String)>,
}

#[async_trait]
impl Action for CopyAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        let inputs = ctx.required_sources()?.resolve_relative()?;
        let dest_dir = ctx.path(&self.dest_dir)?;

        let mut copied = 0;
        for (input, relative) in inputs.iter().filter(|(p, _)| p.is_file()) {
            let content = tokio::fs::read_to_string(input).await?;
            let content = match &self.rewrite {
                Some((pattern, with)) => pattern.replace_all(&content, with.as_str()).into_owned(),
                None => content,
            };
            write_file(&dest_dir.join(relative), content.as_bytes()).await?;
            copied += 1;
        }

        Ok(Some(format!(
            "Copied {copied} file(s) to {}",
            ctx.relative(&dest_dir)
        )))
    }

    fn summary(&self) -> String {
        format!("copy → {}", self.dest_dir.display())
    }
}

#[derive(Debug)]
pub struct JsonCombineAction {
    dest: PathBuf,
}

#[async_trait]
impl Action for JsonCombineAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        let inputs = ctx.required_sources()?.resolve()?;
        let dest = ctx.path(&self.dest)?;

        let mut combined = serde_json::Map::new();
        for input in &inputs {
            let key = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let value: serde_json::Value =
                serde_json::from_str(&tokio::fs::read_to_string(input).await?)?;
            combined.insert(key, value);
        }

        let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(combined))?;
        write_file(&dest, rendered.as_bytes()).await?;
        Ok(Some(format!(
            "Combined {} file(s) into {}",
            inputs.len(),
            ctx.relative(&dest)
        )))
    }

    fn summary(&self) -> String {
        format!("json-combine → {}", self.dest.display())
    }
}

async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// help

#[derive(Debug)]
pub struct HelpAction;

#[async_trait]
impl Action for HelpAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        println!();
        println!("{}", style("Usage").bold());
        println!("  tasktree {}", style("<task>").cyan());
        println!();
        println!("{}", style("Tasks").bold());
        print!("{}", listing::task_table(ctx.registry, true));
        println!();
        Ok(None)
    }

    fn summary(&self) -> String {
        "print task descriptions".to_string()
    }
}
