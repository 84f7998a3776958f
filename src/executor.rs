//! Task execution
//!
//! Runs the tasks of an execution plan one after another, dependencies
//! first. A failing task does not stop the run: tasks that depend on it,
//! directly or not, are skipped and everything else still runs. The run
//! fails at the end if any task did.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::action::TaskContext;
use crate::compiler::{CompiledTask, Registry};
use crate::config::RunOptions;
use crate::dry_run::Completion;
use crate::error::{Result, TaskTreeError};
use crate::graph::{ExecutionPlan, TaskGraph};
use crate::notify::Notifier;

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    /// Dry run stopped after the preview
    Previewed,
    Failed(String),
    /// A dependency failed
    Skipped { because: String },
}

/// Result of executing a single task
#[derive(Debug)]
pub struct TaskResult {
    pub name: String,
    pub status: TaskStatus,
    pub duration: Duration,
    pub output: Option<String>,
}

impl TaskResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed(_))
    }

    fn blocks_dependents(&self) -> bool {
        matches!(self.status, TaskStatus::Failed(_) | TaskStatus::Skipped { .. })
    }
}

/// Task executor
pub struct Executor {
    registry: Arc<Registry>,
    options: Arc<RunOptions>,
    env: HashMap<String, String>,
}

impl Executor {
    pub fn new(registry: Arc<Registry>, options: Arc<RunOptions>, env: HashMap<String, String>) -> Self {
        Self {
            registry,
            options,
            env,
        }
    }

    /// Run `targets` and everything they depend on
    pub async fn execute(&self, graph: &TaskGraph, targets: &[String]) -> Result<Vec<TaskResult>> {
        let plan = ExecutionPlan::new(graph, targets)?;
        if self.options.dry_run {
            self.print_plan(&plan);
        }

        let results = self.run_plan(&plan).await?;
        self.print_summary(&results);

        let failures: Vec<&TaskResult> = results.iter().filter(|r| r.is_failure()).collect();
        if let Some(notifier) = Notifier::for_run(&self.options) {
            let message = match failures.first() {
                Some(first) => format!("{} failed", first.name),
                None => format!("{} task(s) completed", results.len()),
            };
            notifier.send("tasktree", &message).await;
        }

        if let Some(first) = failures.first() {
            let reason = match &first.status {
                TaskStatus::Failed(reason) => Some(reason.clone()),
                _ => None,
            };
            return Err(TaskTreeError::RunFailed {
                task: first.name.clone(),
                count: failures.len(),
                reason,
            });
        }

        Ok(results)
    }

    /// Run every task of `plan` in order and collect what happened to each
    pub async fn run_plan(&self, plan: &ExecutionPlan) -> Result<Vec<TaskResult>> {
        let mut results: Vec<TaskResult> = Vec::with_capacity(plan.tasks.len());
        let mut blocked: HashSet<String> = HashSet::new();

        for name in &plan.tasks {
            let Some(task) = self.registry.get(name) else {
                return Err(TaskTreeError::TaskNotFound {
                    name: name.clone(),
                    available: self.registry.names().map(str::to_string).collect(),
                });
            };

            let failed_dep = task.dependencies.iter().find(|dep| blocked.contains(*dep));
            let result = match failed_dep {
                Some(dep) => TaskResult {
                    name: name.clone(),
                    status: TaskStatus::Skipped {
                        because: dep.clone(),
                    },
                    duration: Duration::ZERO,
                    output: None,
                },
                None => self.run_task(task).await,
            };

            Self::print_task_result(&result);
            if result.blocks_dependents() {
                blocked.insert(name.clone());
            }
            results.push(result);
        }

        Ok(results)
    }

    async fn run_task(&self, task: &CompiledTask) -> TaskResult {
        let start = Instant::now();
        let Some(guard) = &task.action else {
            tracing::debug!(task = %task.name, "no action, dependencies only");
            return TaskResult {
                name: task.name.clone(),
                status: TaskStatus::Succeeded,
                duration: start.elapsed(),
                output: None,
            };
        };

        let spinner = (!self.options.verbose).then(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                pb.set_style(spinner_style);
            }
            pb.set_message(format!("Running {}", task.name));
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });

        let ctx = TaskContext {
            task: &task.name,
            settings: task.config.as_ref(),
            options: &self.options,
            registry: &self.registry,
            env: &self.env,
        };
        tracing::debug!(task = %task.name, action = %guard.action().summary(), "starting task");
        let outcome = guard.invoke(&ctx).await;

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }

        let (status, output) = match outcome {
            Ok(Completion::ShortCircuit { .. }) => (TaskStatus::Previewed, None),
            Ok(completion) => (TaskStatus::Succeeded, completion.output().map(str::to_string)),
            Err(e) => (TaskStatus::Failed(format_error(&e)), None),
        };

        TaskResult {
            name: task.name.clone(),
            status,
            duration: start.elapsed(),
            output,
        }
    }

    fn print_plan(&self, plan: &ExecutionPlan) {
        println!("{}", style("Execution plan (dry run):").bold().cyan());
        println!();

        for (i, stage) in plan.stages.iter().enumerate() {
            println!("{} {}", style(format!("Stage {}:", i + 1)).bold(), stage.join(", "));
        }
        println!();
    }

    fn print_task_result(result: &TaskResult) {
        let status = match &result.status {
            TaskStatus::Succeeded => style("✓".to_string()).green(),
            TaskStatus::Previewed => style("✓ dry run".to_string()).green(),
            TaskStatus::Failed(_) => style("✗".to_string()).red(),
            TaskStatus::Skipped { .. } => style("- skipped".to_string()).yellow(),
        };

        let duration = format!("{:.2}s", result.duration.as_secs_f64());
        println!(
            "{} {} {}",
            status,
            style(&result.name).bold(),
            style(duration).dim()
        );

        match &result.status {
            TaskStatus::Failed(error) => eprintln!("  {}", style(error).red()),
            TaskStatus::Skipped { because } => {
                println!("  {}", style(format!("dependency '{because}' did not succeed")).dim())
            }
            _ => {}
        }
    }

    fn print_summary(&self, results: &[TaskResult]) {
        println!();

        let total: Duration = results.iter().map(|r| r.duration).sum();
        let failed = results.iter().filter(|r| r.is_failure()).count();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Skipped { .. }))
            .count();
        let succeeded = results.len() - failed - skipped;

        if failed == 0 {
            println!(
                "{} {} tasks completed in {:.2}s",
                style("✓").green().bold(),
                succeeded,
                total.as_secs_f64()
            );
        } else {
            println!(
                "{} {} succeeded, {} failed, {} skipped in {:.2}s",
                style("✗").red().bold(),
                succeeded,
                failed,
                skipped,
                total.as_secs_f64()
            );
        }
    }
}

/// Error text including the diagnostic help, when there is one
fn format_error(error: &TaskTreeError) -> String {
    use miette::Diagnostic;

    match error.help() {
        Some(help) => format!("{error}\n{help}"),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::build_registry;
    use crate::config::Config;
    use tempfile::TempDir;

    fn setup(toml: &str, options: RunOptions) -> (Executor, TaskGraph) {
        let config = Config::parse(toml).unwrap();
        let registry = build_registry(&config, &options).unwrap();
        let graph = TaskGraph::from_registry(&registry).unwrap();
        let env = config.task_env(&options.exported_env());
        (
            Executor::new(Arc::new(registry), Arc::new(options), env),
            graph,
        )
    }

    fn options(dir: &TempDir) -> RunOptions {
        RunOptions {
            cwd: dir.path().to_path_buf(),
            verbose: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_runs_dependencies_first() {
        let dir = TempDir::new().unwrap();
        let (executor, graph) = setup(
            r#"
            [tasks.dirs]
            config = { src = ["out/a", "out/b"] }
            action = { kind = "mkdir" }

            [tasks.build]
            deps = "dirs"
            action = { kind = "script", source = "print(file_exists(\"out/a\"))" }
            "#,
            options(&dir),
        );

        let results = executor.execute(&graph, &["build".to_string()]).await.unwrap();

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["dirs", "build"]);
        assert!(results.iter().all(|r| r.status == TaskStatus::Succeeded));
        assert_eq!(results[1].output.as_deref().map(str::trim), Some("true"));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_but_runs_the_rest() {
        let dir = TempDir::new().unwrap();
        let (executor, graph) = setup(
            r#"
            [tasks.broken]
            action = { kind = "script", source = "throw \"boom\"" }

            [tasks.after]
            deps = "broken"
            action = { kind = "script", source = "print(\"after\")" }

            [tasks.last]
            deps = "after"

            [tasks.independent]
            action = { kind = "script", source = "print(\"fine\")" }

            [tasks.all]
            deps = ["last", "independent"]
            "#,
            options(&dir),
        );

        let err = executor
            .execute(&graph, &["all".to_string()])
            .await
            .unwrap_err();
        match err {
            TaskTreeError::RunFailed { task, count, reason } => {
                assert_eq!(task, "broken");
                assert_eq!(count, 1);
                assert!(reason.unwrap().contains("broken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_statuses_after_failure() {
        let dir = TempDir::new().unwrap();
        let (executor, graph) = setup(
            r#"
            [tasks.broken]
            action = { kind = "script", source = "throw \"boom\"" }

            [tasks.after]
            deps = "broken"

            [tasks.independent]
            action = { kind = "script", source = "print(\"fine\")" }
            "#,
            options(&dir),
        );

        let plan = ExecutionPlan::new(&graph, &["after".to_string(), "independent".to_string()]).unwrap();
        let results = executor.run_plan(&plan).await.unwrap();
        let statuses: HashMap<&str, &TaskStatus> =
            results.iter().map(|r| (r.name.as_str(), &r.status)).collect();

        assert!(matches!(statuses["broken"], TaskStatus::Failed(_)));
        assert_eq!(
            statuses["after"],
            &TaskStatus::Skipped {
                because: "broken".to_string()
            }
        );
        assert_eq!(statuses["independent"], &TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_dry_run_previews_without_running() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("stale.txt"), "x").unwrap();
        let (executor, graph) = setup(
            r#"
            [tasks.clean]
            config = { src = "stale.txt" }
            action = { kind = "remove" }
            "#,
            RunOptions {
                dry_run: true,
                ..options(&dir)
            }
            .normalized(),
        );

        let results = executor.execute(&graph, &["clean".to_string()]).await.unwrap();

        assert_eq!(results[0].status, TaskStatus::Previewed);
        assert!(dir.path().join("stale.txt").exists());
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let dir = TempDir::new().unwrap();
        let (executor, graph) = setup("[tasks.a]\ndesc = \"a\"\n", options(&dir));
        let err = executor
            .execute(&graph, &["nope".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, TaskTreeError::TaskNotFound { .. }));
    }
}
