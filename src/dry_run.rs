//! Dry-run interception
//!
//! Every compiled action is wrapped in a [`DryRunGuard`]. With dry-run
//! inactive the guard runs the action directly. With dry-run active it first
//! previews the task's matched inputs, then either stops there or, for tasks
//! marked `continue_on_dry_run`, runs the action too.
//!
//! ```text
//! Idle ─► Previewing ─┬─► ShortCircuit ─┐
//!   │                 └─► Continue ─────┴─► Completed
//!   └─────────────────────► Continue
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use console::style;

use crate::action::{Action, TaskContext};
use crate::config::RunOptions;
use crate::error::Result;
use crate::sources::SourceSet;
use crate::tree::TaskSettings;

/// States of a guarded invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    Previewing,
    ShortCircuit,
    Continue,
    Completed,
}

impl fmt::Display for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GuardState::Idle => "idle",
            GuardState::Previewing => "previewing",
            GuardState::ShortCircuit => "short-circuit",
            GuardState::Continue => "continue",
            GuardState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Inputs matched during a dry-run preview
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preview {
    pub matched: Vec<PathBuf>,
}

/// How a guarded invocation completed
#[derive(Debug)]
pub enum Completion {
    /// Dry run stopped before the action
    ShortCircuit { preview: Option<Preview> },
    /// The action ran
    Continued {
        preview: Option<Preview>,
        output: Option<String>,
    },
}

impl Completion {
    pub fn ran_action(&self) -> bool {
        matches!(self, Completion::Continued { .. })
    }

    pub fn preview(&self) -> Option<&Preview> {
        match self {
            Completion::ShortCircuit { preview } | Completion::Continued { preview, .. } => {
                preview.as_ref()
            }
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            Completion::Continued { output, .. } => output.as_deref(),
            Completion::ShortCircuit { .. } => None,
        }
    }
}

/// An action wrapped with the dry-run policy
#[derive(Clone)]
pub struct DryRunGuard {
    inner: Arc<dyn Action>,
    dry_run: bool,
    continue_on_dry_run: bool,
}

impl fmt::Debug for DryRunGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryRunGuard")
            .field("action", &self.inner.summary())
            .field("dry_run", &self.dry_run)
            .field("continue_on_dry_run", &self.continue_on_dry_run)
            .finish()
    }
}

impl DryRunGuard {
    pub fn wrap(inner: Arc<dyn Action>, settings: Option<&TaskSettings>, options: &RunOptions) -> Self {
        Self {
            inner,
            dry_run: options.dry_run,
            continue_on_dry_run: settings.is_some_and(|s| s.continue_on_dry_run),
        }
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.inner
    }

    pub fn continues_on_dry_run(&self) -> bool {
        self.continue_on_dry_run
    }

    /// Run the guarded action under the dry-run policy.
    ///
    /// Yields exactly one result per call; an action failure is returned
    /// as is.
    pub async fn invoke(&self, ctx: &TaskContext<'_>) -> Result<Completion> {
        let mut state = GuardState::Idle;

        let preview = if self.dry_run {
            advance(ctx.task, &mut state, GuardState::Previewing);
            let preview = self.preview(ctx)?;
            if !self.continue_on_dry_run {
                advance(ctx.task, &mut state, GuardState::ShortCircuit);
                advance(ctx.task, &mut state, GuardState::Completed);
                return Ok(Completion::ShortCircuit { preview });
            }
            preview
        } else {
            None
        };

        advance(ctx.task, &mut state, GuardState::Continue);
        let result = self.inner.run(ctx).await;
        advance(ctx.task, &mut state, GuardState::Completed);

        let output = result?;
        if ctx.options.verbose {
            if let Some(data) = &output {
                tracing::info!(task = %ctx.task, "Task result: {}", data.trim_end());
            }
        }
        Ok(Completion::Continued { preview, output })
    }

    /// List the inputs the task would read. Pure inspection.
    fn preview(&self, ctx: &TaskContext<'_>) -> Result<Option<Preview>> {
        let patterns = ctx.source_patterns();
        if patterns.is_empty() {
            tracing::debug!(task = %ctx.task, "no sources declared, nothing to preview");
            return Ok(None);
        }

        let set = SourceSet::new(&patterns, &ctx.options.cwd)?;
        let matched = set.resolve()?;

        for path in &matched {
            println!("{} {}", style(format!("{}:", ctx.task)).cyan(), set.display(path));
        }
        println!(
            "{} {}",
            style(format!("{}:", ctx.task)).cyan(),
            style(format!("{} item(s)", matched.len())).green()
        );

        Ok(Some(Preview { matched }))
    }
}

fn advance(task: &str, state: &mut GuardState, next: GuardState) {
    tracing::trace!(task = %task, from = %state, to = %next, "dry-run guard");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Registry;
    use crate::error::TaskTreeError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Action for Counting {
        async fn run(&self, _ctx: &TaskContext<'_>) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TaskTreeError::TaskFailed {
                    task: "counting".to_string(),
                    code: 2,
                    stderr: None,
                });
            }
            Ok(Some("done".to_string()))
        }

        fn summary(&self) -> String {
            "counting".to_string()
        }
    }

    fn settings(src: &[&str], continue_on_dry_run: bool) -> TaskSettings {
        TaskSettings {
            src: src.iter().map(|s| s.to_string()).collect(),
            continue_on_dry_run,
            ..Default::default()
        }
    }

    async fn invoke(
        action: Arc<Counting>,
        settings: Option<&TaskSettings>,
        options: &RunOptions,
    ) -> Result<Completion> {
        let guard = DryRunGuard::wrap(action, settings, options);
        let registry = Registry::default();
        let env = HashMap::new();
        let ctx = TaskContext {
            task: "docs",
            settings,
            options,
            registry: &registry,
            env: &env,
        };
        guard.invoke(&ctx).await
    }

    fn dry(dir: &Path) -> RunOptions {
        RunOptions {
            dry_run: true,
            cwd: dir.to_path_buf(),
            ..Default::default()
        }
        .normalized()
    }

    #[tokio::test]
    async fn test_dry_run_previews_and_short_circuits() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();

        let action = Arc::new(Counting::default());
        let config = settings(&["a.md", "b.md"], false);
        let completion = invoke(action.clone(), Some(&config), &dry(dir.path()))
            .await
            .unwrap();

        assert!(!completion.ran_action());
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);
        let matched = &completion.preview().unwrap().matched;
        assert_eq!(matched.len(), 2);
        assert!(matched[0].ends_with("a.md"));
        assert!(matched[1].ends_with("b.md"));
    }

    #[tokio::test]
    async fn test_dry_run_without_sources_still_short_circuits() {
        let dir = TempDir::new().unwrap();
        let action = Arc::new(Counting::default());
        let completion = invoke(action.clone(), None, &dry(dir.path())).await.unwrap();

        assert!(matches!(completion, Completion::ShortCircuit { preview: None }));
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_continue_on_dry_run_runs_after_preview() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();

        let action = Arc::new(Counting::default());
        let config = settings(&["*.md"], true);
        let completion = invoke(action.clone(), Some(&config), &dry(dir.path()))
            .await
            .unwrap();

        assert!(completion.ran_action());
        assert_eq!(completion.output(), Some("done"));
        assert_eq!(completion.preview().unwrap().matched.len(), 1);
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inactive_dry_run_skips_preview() {
        let dir = TempDir::new().unwrap();
        let action = Arc::new(Counting::default());
        let config = settings(&["*.md"], false);
        let options = RunOptions {
            cwd: dir.path().to_path_buf(),
            ..Default::default()
        };
        let completion = invoke(action.clone(), Some(&config), &options).await.unwrap();

        assert!(completion.ran_action());
        assert!(completion.preview().is_none());
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_action_failure_is_returned_once() {
        let dir = TempDir::new().unwrap();
        let action = Arc::new(Counting {
            fail: true,
            ..Default::default()
        });
        let config = settings(&[], true);
        let result = invoke(action.clone(), Some(&config), &dry(dir.path())).await;

        assert!(matches!(result, Err(TaskTreeError::TaskFailed { code: 2, .. })));
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
    }
}
