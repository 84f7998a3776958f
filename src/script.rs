//! Rhai scripting engine integration
//!
//! Script actions run in a sandboxed Rhai engine. The task's name, its
//! configuration table, its source patterns and the run flags are exposed
//! as variables. File helpers resolve relative paths against the run's
//! working directory, and `exec` runs there with the task environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rhai::{Dynamic, Engine, EvalAltResult, Scope};

use crate::action::TaskContext;
use crate::sources::SourceSet;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Script execution engine
#[derive(Debug, Clone, Default)]
pub struct ScriptEngine;

impl ScriptEngine {
    pub fn new() -> Self {
        Self
    }

    /// Execute a script for the task described by `ctx`, returning what it
    /// printed.
    pub fn execute(&self, script: &str, ctx: &TaskContext<'_>) -> ScriptResult<String> {
        ScriptRun::from_context(ctx).execute(script)
    }
}

/// Everything a script sees, detached from the task context so the script
/// can run on a blocking thread
#[derive(Debug, Clone)]
pub struct ScriptRun {
    task: String,
    cwd: PathBuf,
    env: HashMap<String, String>,
    dry_run: bool,
    verbose: bool,
    src: Vec<String>,
    config: toml::Table,
}

impl ScriptRun {
    pub fn from_context(ctx: &TaskContext<'_>) -> Self {
        Self {
            task: ctx.task.to_string(),
            cwd: ctx.options.cwd.clone(),
            env: ctx.env.clone(),
            dry_run: ctx.options.dry_run,
            verbose: ctx.options.verbose,
            src: ctx.source_patterns(),
            config: ctx.settings.map(|s| s.extra.clone()).unwrap_or_default(),
        }
    }

    pub fn execute(self, script: &str) -> ScriptResult<String> {
        let mut scope = Scope::new();

        let env_map: rhai::Map = self
            .env
            .iter()
            .map(|(k, v)| (k.clone().into(), Dynamic::from(v.clone())))
            .collect();
        scope.push("env", env_map);
        scope.push("cwd", self.cwd.to_string_lossy().to_string());
        scope.push("task", self.task.clone());
        scope.push("dry_run", self.dry_run);
        scope.push("verbose", self.verbose);

        let src: rhai::Array = self.src.iter().cloned().map(Dynamic::from).collect();
        scope.push("src", src);
        scope.push("config", rhai::serde::to_dynamic(&self.config)?);

        let output = Arc::new(Mutex::new(String::new()));
        let output_clone = Arc::clone(&output);

        let mut engine = self.create_engine();
        engine.on_print(move |s| {
            if let Ok(mut out) = output_clone.lock() {
                out.push_str(s);
                out.push('\n');
            }
        });

        engine.run_with_scope(&mut scope, script)?;

        let result = output.lock().map(|out| out.clone()).unwrap_or_default();
        Ok(result)
    }

    fn create_engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_expr_depths(64, 64);
        engine.set_max_operations(100_000);
        engine.set_max_modules(10);
        engine.set_max_string_size(1024 * 1024);

        self.register_files(&mut engine);
        self.register_process(&mut engine);
        register_data(&mut engine);

        engine
    }

    fn register_files(&self, engine: &mut Engine) {
        let base = Arc::new(self.cwd.clone());

        let cwd = Arc::clone(&base);
        engine.register_fn("read_file", move |path: &str| -> ScriptResult<String> {
            let path = cwd.join(path);
            std::fs::read_to_string(&path).map_err(|e| io_error("read", &path, e))
        });

        let cwd = Arc::clone(&base);
        engine.register_fn("write_file", move |path: &str, content: &str| -> ScriptResult<()> {
            let path = cwd.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
            }
            std::fs::write(&path, content).map_err(|e| io_error("write", &path, e))
        });

        let cwd = Arc::clone(&base);
        engine.register_fn("file_exists", move |path: &str| cwd.join(path).exists());

        let cwd = Arc::clone(&base);
        engine.register_fn("is_dir", move |path: &str| cwd.join(path).is_dir());

        let cwd = Arc::clone(&base);
        engine.register_fn("mkdir", move |path: &str| -> ScriptResult<()> {
            let path = cwd.join(path);
            std::fs::create_dir_all(&path).map_err(|e| io_error("create", &path, e))
        });

        engine.register_fn("join_path", |a: &str, b: &str| -> String {
            Path::new(a).join(b).to_string_lossy().to_string()
        });

        let cwd = Arc::clone(&base);
        engine.register_fn("glob", move |pattern: &str| -> ScriptResult<rhai::Array> {
            glob_paths(&cwd, &[pattern.to_string()])
        });

        let cwd = Arc::clone(&base);
        engine.register_fn("glob", move |patterns: rhai::Array| -> ScriptResult<rhai::Array> {
            let patterns: Vec<String> = patterns.into_iter().map(|p| p.to_string()).collect();
            glob_paths(&cwd, &patterns)
        });
    }

    fn register_process(&self, engine: &mut Engine) {
        let cwd = self.cwd.clone();
        let env = self.env.clone();
        engine.register_fn("exec", move |cmd: &str| -> ScriptResult<String> {
            let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
            let output = std::process::Command::new(shell)
                .args([flag, cmd])
                .current_dir(&cwd)
                .envs(&env)
                .output()
                .map_err(|e| format!("Failed to execute '{cmd}': {e}"))?;
            if !output.status.success() {
                return Err(format!(
                    "'{cmd}' failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim_end()
                )
                .into());
            }
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        });

        let env = self.env.clone();
        engine.register_fn("get_env", move |key: &str| -> String {
            env.get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
                .unwrap_or_default()
        });
    }
}

fn register_data(engine: &mut Engine) {
    engine.register_fn("parse_json", |s: &str| -> ScriptResult<Dynamic> {
        let value: serde_json::Value =
            serde_json::from_str(s).map_err(|e| format!("Failed to parse JSON: {e}"))?;
        rhai::serde::to_dynamic(value)
    });

    engine.register_fn("to_json", |value: Dynamic| -> ScriptResult<String> {
        let json: serde_json::Value = rhai::serde::from_dynamic(&value)?;
        serde_json::to_string_pretty(&json).map_err(|e| format!("Failed to serialize JSON: {e}").into())
    });
}

/// Paths matched by `patterns`, relative to `base` where possible
fn glob_paths(base: &Path, patterns: &[String]) -> ScriptResult<rhai::Array> {
    let set = SourceSet::new(patterns, base).map_err(|e| e.to_string())?;
    let matched = set.resolve().map_err(|e| e.to_string())?;
    Ok(matched
        .iter()
        .map(|path| Dynamic::from(set.display(path).to_string()))
        .collect())
}

fn io_error(verb: &str, path: &Path, e: std::io::Error) -> Box<EvalAltResult> {
    format!("Failed to {verb} '{}': {e}", path.display()).into()
}
