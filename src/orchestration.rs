//! Contract-test orchestration
//!
//! Runs a contract-test tool against a service started for the occasion:
//! start the service, run the suite, report the counts, write the report
//! artifacts, and stop the service exactly once whatever happened before.
//! The first error of the sequence is the one returned; a failure to stop
//! the service is logged and only returned when nothing failed earlier.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use console::style;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::action::{build_command, parse_command, Action, TaskContext};
use crate::config::RunOptions;
use crate::error::{Result, TaskTreeError};

/// Aggregate counts reported by a contract-test run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractStats {
    pub tests: u64,
    pub passes: u64,
    pub failures: u64,
    pub errors: u64,
    #[serde(default)]
    pub skipped: u64,
    /// Milliseconds
    #[serde(default)]
    pub duration: u64,
}

impl ContractStats {
    pub fn is_success(&self) -> bool {
        self.failures == 0 && self.errors == 0
    }

    /// Distinguish a clean process exit that still reports failing tests
    pub fn check(&self, tool: &str) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        Err(TaskTreeError::ExternalTool {
            tool: tool.to_string(),
            failures: self.failures,
            errors: self.errors,
            payload: serde_json::to_string(self).ok(),
        })
    }

    fn print_report(&self) {
        let paint = |ok: bool, text: String| {
            if ok {
                style(text).green()
            } else {
                style(text).red()
            }
        };
        println!(
            "{}",
            style(format!(
                "API tests report: {} tests, {} skipped",
                self.tests, self.skipped
            ))
            .bold()
        );
        println!(
            "{}, {}, {}",
            paint(self.passes > 0, format!("{} passes", self.passes)),
            paint(self.failures == 0, format!("{} failures", self.failures)),
            paint(
                self.errors == 0 && self.passes > 0,
                format!("{} errors", self.errors)
            )
        );
        println!("took {}ms", self.duration);
    }
}

/// The service the contract tests talk to
#[async_trait]
pub trait ServiceUnderTest: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// The contract-test suite
#[async_trait]
pub trait ContractSuite: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> Result<ContractStats>;
}

/// Writes artifacts derived from a finished run
#[async_trait]
pub trait CoverageWriter: Send + Sync {
    async fn write(&self, stats: &ContractStats) -> Result<()>;
}

/// Sequences service, suite and report writer
pub struct ContractTestRunner<'a> {
    service: &'a dyn ServiceUnderTest,
    suite: &'a dyn ContractSuite,
    writer: &'a dyn CoverageWriter,
}

impl<'a> ContractTestRunner<'a> {
    pub fn new(
        service: &'a dyn ServiceUnderTest,
        suite: &'a dyn ContractSuite,
        writer: &'a dyn CoverageWriter,
    ) -> Self {
        Self {
            service,
            suite,
            writer,
        }
    }

    pub async fn run(&self) -> Result<ContractStats> {
        let outcome = self.execute().await;
        let cleanup = self.service.stop().await;

        match (outcome, cleanup) {
            (Ok(stats), Ok(())) => {
                info!("service stopped");
                Ok(stats)
            }
            (Ok(_), Err(stop_error)) => Err(stop_error),
            (Err(e), Ok(())) => {
                info!("service stopped");
                Err(e)
            }
            (Err(e), Err(stop_error)) => {
                error!(error = %stop_error, "failed to stop service after an earlier failure");
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<ContractStats> {
        info!("starting service");
        self.service.start().await?;
        info!(suite = %self.suite.name(), "service started, running contract tests");

        let stats = self.suite.run().await?;
        stats.print_report();

        self.writer.write(&stats).await?;
        stats.check(self.suite.name())?;
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// process-backed implementations

/// A service started from a command line and killed on stop
pub struct ProcessService {
    command: String,
    ready_addr: Option<String>,
    ready_timeout: Duration,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    child: Mutex<Option<Child>>,
}

impl ProcessService {
    pub fn new(command: impl Into<String>, ready_addr: Option<String>, ready_timeout: Duration) -> Self {
        Self {
            command: command.into(),
            ready_addr,
            ready_timeout,
            env: Default::default(),
            cwd: None,
            child: Mutex::new(None),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>, cwd: PathBuf) -> Self {
        self.env = env;
        self.cwd = Some(cwd);
        self
    }

    async fn wait_until_ready(&self, addr: &str, child: &mut Child) -> Result<()> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Ok(Ok(_)) = tokio::time::timeout(remaining, TcpStream::connect(addr)).await {
                return Ok(());
            }
            if let Some(status) = child.try_wait()? {
                return Err(TaskTreeError::Service {
                    message: format!("service '{}' exited early with {status}", self.command),
                });
            }
            if Instant::now() >= deadline {
                return Err(TaskTreeError::Service {
                    message: format!(
                        "service did not accept connections on {addr} within {}s",
                        self.ready_timeout.as_secs()
                    ),
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[async_trait]
impl ServiceUnderTest for ProcessService {
    async fn start(&self) -> Result<()> {
        let mut command = build_command(&self.command, false)?;
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let ready = match &self.ready_addr {
            Some(addr) => self.wait_until_ready(addr, &mut child).await,
            None => Ok(()),
        };
        // Keep the handle even when readiness failed so stop() can kill it.
        *self.child.lock().await = Some(child);
        ready
    }

    async fn stop(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_none() {
            child.kill().await?;
        }
        Ok(())
    }
}

/// Runs the contract-test tool and reads its counts from stdout.
///
/// The tool prints its stats as a JSON object on a line of its own; the last
/// such line wins. A non-zero exit without stats is a transport failure.
pub struct CommandSuite {
    name: String,
    program: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl CommandSuite {
    pub fn new(name: impl Into<String>, program: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program,
            env: Default::default(),
            cwd: None,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>, cwd: PathBuf) -> Self {
        self.env = env;
        self.cwd = Some(cwd);
        self
    }
}

#[async_trait]
impl ContractSuite for CommandSuite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<ContractStats> {
        let Some((program, args)) = self.program.split_first() else {
            return Err(TaskTreeError::CommandNotFound {
                command: self.name.clone(),
            });
        };
        let mut command = build_command(program, false)?;
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
            .args(args)
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        match (parse_stats(&stdout), output.status.success()) {
            (Some(stats), _) => Ok(stats),
            (None, true) => Err(TaskTreeError::ExternalOutput {
                tool: self.name.clone(),
                reason: "no stats line in output".to_string(),
            }),
            (None, false) => Err(TaskTreeError::TaskFailed {
                task: self.name.clone(),
                code: output.status.code().unwrap_or(1),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            }),
        }
    }
}

/// Find the last line of `output` that holds contract stats
pub fn parse_stats(output: &str) -> Option<ContractStats> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

/// Writes `contract-report.json` into a report directory
pub struct JsonReportWriter {
    dir: PathBuf,
    tool: String,
}

impl JsonReportWriter {
    pub const FILE_NAME: &'static str = "contract-report.json";

    pub fn new(dir: PathBuf, tool: impl Into<String>) -> Self {
        Self {
            dir,
            tool: tool.into(),
        }
    }
}

#[async_trait]
impl CoverageWriter for JsonReportWriter {
    async fn write(&self, stats: &ContractStats) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let report = serde_json::json!({
            "tool": self.tool,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "stats": stats,
        });
        let path = self.dir.join(Self::FILE_NAME);
        tokio::fs::write(&path, serde_json::to_string_pretty(&report)?).await?;
        info!(path = %path.display(), "contract report written");
        Ok(())
    }
}

/// A service managed elsewhere; start and stop do nothing
struct ExternalService;

#[async_trait]
impl ServiceUnderTest for ExternalService {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// task action

/// Configuration of a `contract-test` action
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContractTestSpec {
    /// Command starting the service under test
    #[serde(default)]
    pub server: Option<String>,

    /// Address polled until the service accepts connections
    #[serde(default)]
    pub ready_addr: Option<String>,

    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Command running the contract-test tool
    pub suite: String,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Log level passed to the tool
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default = "default_tool")]
    pub tool: String,
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("dist/reports/contract-test")
}

fn default_tool() -> String {
    "dredd".to_string()
}

impl ContractTestSpec {
    /// Full suite command line for this run
    pub fn suite_command(&self, options: &RunOptions) -> Vec<String> {
        let mut args = parse_command(&self.suite);
        for transaction in &options.transactions {
            args.push("--only".to_string());
            args.push(transaction.clone());
        }
        if options.log_body {
            args.push("--header".to_string());
            args.push("X-Dredd-Log-Body: true".to_string());
        }
        if let Some(level) = options.log_level.as_ref().or(self.level.as_ref()) {
            args.push("--level".to_string());
            args.push(level.clone());
        }
        if !options.color {
            args.push("--color".to_string());
            args.push("false".to_string());
        }
        if options.ci {
            args.push("--reporter".to_string());
            args.push("junit".to_string());
            args.push("--output".to_string());
            args.push(self.report_dir.join("junit.xml").to_string_lossy().to_string());
        }
        args
    }
}

/// Task action driving a [`ContractTestRunner`]
#[derive(Debug)]
pub struct ContractTestAction {
    spec: ContractTestSpec,
}

impl ContractTestAction {
    pub fn new(spec: ContractTestSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Action for ContractTestAction {
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<Option<String>> {
        let spec = &self.spec;
        let suite_command = spec.suite_command(ctx.options);

        if ctx.options.verbose || ctx.options.dry_run {
            let shown = serde_json::json!({
                "server": spec.server,
                "ready_addr": spec.ready_addr,
                "suite": suite_command,
                "report_dir": spec.report_dir,
            });
            let rendered = serde_json::to_string_pretty(&shown)?;
            println!(
                "{}",
                style(format!("Execute {} with config:\n{}", spec.tool, rendered)).yellow()
            );
            if ctx.options.dry_run {
                return Ok(None);
            }
        }

        let report_dir = ctx.path(&spec.report_dir)?;
        let writer = JsonReportWriter::new(report_dir, spec.tool.clone());
        let suite = CommandSuite::new(spec.tool.clone(), suite_command)
            .with_env(ctx.env.clone(), ctx.options.cwd.clone());

        let stats = match &spec.server {
            Some(server) => {
                let service = ProcessService::new(
                    server.clone(),
                    spec.ready_addr.clone(),
                    Duration::from_secs(spec.ready_timeout_secs),
                )
                .with_env(ctx.env.clone(), ctx.options.cwd.clone());
                ContractTestRunner::new(&service, &suite, &writer).run().await?
            }
            None => {
                ContractTestRunner::new(&ExternalService, &suite, &writer)
                    .run()
                    .await?
            }
        };

        Ok(Some(serde_json::to_string(&stats)?))
    }

    fn summary(&self) -> String {
        format!("{} contract tests", self.spec.tool)
    }
}
