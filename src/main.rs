//! tasktree - run tasks from a nested, namespaced task tree
//!
//! Tasks are declared as nested TOML tables, compiled into a flat registry
//! of `group/task` names, and run dependencies first.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::style;

use tasktree::cli::{Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use tasktree::compiler::{build_registry, Registry};
use tasktree::config::{Config, RunOptions, CONFIG_FILES};
use tasktree::error::{Result, TaskTreeError};
use tasktree::executor::Executor;
use tasktree::graph::TaskGraph;
use tasktree::listing;

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());
    if cli.verbose || cli.dry_run || cli.log_body {
        if let Ok(directive) = "tasktree=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(cli.colors_enabled())
        .without_time()
        .init();

    if !cli.colors_enabled() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:?}", style("error").red().bold(), miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

/// Loaded configuration, run options and compiled registry
struct Session {
    config: Config,
    path: std::path::PathBuf,
    options: RunOptions,
    registry: Registry,
}

impl Session {
    fn load(cli: &Cli) -> Result<Self> {
        let (config, path) = Config::load(cli.config.as_deref())?;
        let options = cli.run_options(std::env::current_dir()?, config.settings.shell);
        tracing::debug!(options = ?options, "run options");
        let registry = build_registry(&config, &options)?;
        tracing::debug!(config = %path.display(), tasks = registry.len(), "task tree compiled");
        Ok(Self {
            config,
            path,
            options,
            registry,
        })
    }

    async fn run_tasks(self, tasks: &[String]) -> Result<()> {
        let graph = TaskGraph::from_registry(&self.registry)?;
        let env = self.config.task_env(&self.options.exported_env());
        let executor = Executor::new(Arc::new(self.registry), Arc::new(self.options), env);
        executor.execute(&graph, tasks).await?;
        Ok(())
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Change working directory if specified
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::RunTasks(tasks) => Session::load(&cli)?.run_tasks(tasks).await,
        EffectiveCommand::None => {
            let session = Session::load(&cli)?;
            let default = session.config.settings.default_group_task.clone();
            if session.registry.contains(&default) {
                session.run_tasks(&[default]).await
            } else {
                print_task_list(&session.registry, ListFormat::Table, false)
            }
        }
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<()> {
    match cmd {
        Commands::Run { tasks } => Session::load(cli)?.run_tasks(tasks).await,

        Commands::List { format, deps } => {
            let session = Session::load(cli)?;
            print_task_list(&session.registry, format.clone(), *deps)
        }

        Commands::Graph { task, format } => {
            let session = Session::load(cli)?;
            print_graph(&session.registry, task.as_deref(), format.clone())
        }

        Commands::Init { force } => init_config(*force),

        Commands::Check => {
            let session = Session::load(cli)?;
            println!(
                "{} {} is valid ({} tasks)",
                style("✓").green(),
                session.path.display(),
                session.registry.len()
            );
            Ok(())
        }
    }
}

fn print_task_list(registry: &Registry, format: ListFormat, show_deps: bool) -> Result<()> {
    match format {
        ListFormat::Table => {
            println!("{}", style("Available tasks:").bold());
            println!();
            print!("{}", listing::task_table(registry, show_deps));
        }
        ListFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&listing::json(registry, show_deps))?);
        }
        ListFormat::Plain => print!("{}", listing::plain(registry)),
    }
    Ok(())
}

fn print_graph(registry: &Registry, task: Option<&str>, format: GraphFormat) -> Result<()> {
    let graph = TaskGraph::from_registry(registry)?;
    let targets: Vec<String> = match task {
        Some(name) => vec![name.to_string()],
        None => registry.names().map(str::to_string).collect(),
    };
    let tasks = graph.execution_order(&targets)?;

    match format {
        GraphFormat::Text => {
            println!("{}", style("Task dependency graph:").bold());
            println!();

            for name in &tasks {
                let deps = graph.dependencies(name).unwrap_or_default();
                if deps.is_empty() {
                    println!("  {}", style(name).cyan().bold());
                } else {
                    println!(
                        "  {} {} {}",
                        style(name).cyan().bold(),
                        style("←").dim(),
                        deps.join(", ")
                    );
                }
            }
        }

        GraphFormat::Dot => {
            println!("digraph tasktree {{");
            println!("  rankdir=LR;");
            println!("  node [shape=box];");

            for name in &tasks {
                println!("  \"{name}\";");
                for dep in graph.dependencies(name).unwrap_or_default() {
                    println!("  \"{dep}\" -> \"{name}\";");
                }
            }

            println!("}}");
        }

        GraphFormat::Json => {
            let mut nodes = Vec::new();
            let mut edges = Vec::new();

            for name in &tasks {
                nodes.push(serde_json::json!({
                    "id": name,
                    "description": registry.get(name).and_then(|t| t.description.as_deref()),
                }));
                for dep in graph.dependencies(name).unwrap_or_default() {
                    edges.push(serde_json::json!({
                        "from": dep,
                        "to": name,
                    }));
                }
            }

            let output = serde_json::json!({
                "nodes": nodes,
                "edges": edges,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let name = CONFIG_FILES[0];
    let path = Path::new(name);

    if path.exists() && !force {
        return Err(TaskTreeError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{name} already exists (use --force to overwrite)"),
        )));
    }

    let template = r#"# tasktree.toml
#
# Tables under [tasks] are tasks when they have `desc`, `deps` or `action`,
# and groups otherwise. Tasks are named by their path: [tasks.docs.build]
# is `docs/build`. A `default` task stands for its group.

[settings]
# default_group_task = "default"
# shell = false

[env]
# NODE_ENV = "development"

[tasks.default]
desc = "Show available tasks"
action = { kind = "help" }

[tasks.clean]
desc = "Remove build output"
config = { src = ["dist/**"] }
action = { kind = "remove" }

[tasks.docs.mkdir]
desc = "Create the documentation folder"
config = { src = ["dist/docs"] }
action = { kind = "mkdir" }

[tasks.docs.default]
desc = "Assemble the API documentation"
deps = "mkdir"
config = { src = ["docs/*.md"], include_format = "docs/{}.md" }
action = { kind = "concat", dest = "dist/docs/api.md" }

[tasks.test]
desc = "Run tests"
action = { kind = "run", commands = ["cargo test"] }

[tasks.build]
deps = ["clean", "docs", "test"]
"#;

    std::fs::write(path, template)?;

    println!("{} Created {}", style("✓").green(), style(name).bold());

    Ok(())
}
