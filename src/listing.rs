//! Task listings shared by `list` and the `help` action

use console::style;

use crate::compiler::Registry;

/// Render the registry as an aligned table.
///
/// Each line shows the task name and description, then its dependencies in
/// brackets, a `⚒` when the task has configuration and an `ƒ` when it runs
/// an action. Groups without a task of their own are listed after the tasks.
pub fn task_table(registry: &Registry, show_deps: bool) -> String {
    let width = registry
        .names()
        .chain(registry.groups().map(|g| g.name.as_str()))
        .map(str::len)
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for task in registry.tasks() {
        let mut line = format!(
            "  {}  {}",
            style(format!("{:width$}", task.name)).cyan().bold(),
            style(task.description.as_deref().unwrap_or("")).dim()
        );
        if show_deps && !task.dependencies.is_empty() {
            line.push_str(&format!(
                " {}",
                style(format!("[{}]", task.dependencies.join(", "))).yellow()
            ));
        }
        if task.config.is_some() {
            line.push_str(&format!(" {}", style("⚒").yellow().bold()));
        }
        if task.action.is_some() {
            line.push_str(&format!(" {}", style("ƒ").green()));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }

    let groups: Vec<_> = registry
        .groups()
        .filter(|g| !registry.contains(&g.name))
        .collect();
    if !groups.is_empty() {
        out.push('\n');
        for group in groups {
            let line = format!(
                "  {}  {}",
                style(format!("{:width$}", format!("{}/", group.name))).cyan(),
                style(registry.description_of(&group.name).unwrap_or("")).dim()
            );
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }

    out
}

/// Task names, one per line
pub fn plain(registry: &Registry) -> String {
    registry.names().map(|name| format!("{name}\n")).collect()
}

/// Registry as JSON: name → { description, depends }
pub fn json(registry: &Registry, show_deps: bool) -> serde_json::Value {
    let mut tasks = serde_json::Map::new();
    for task in registry.tasks() {
        let mut obj = serde_json::Map::new();
        if let Some(desc) = &task.description {
            obj.insert("description".to_string(), serde_json::json!(desc));
        }
        if show_deps {
            obj.insert("depends".to_string(), serde_json::json!(task.dependencies));
        }
        if let Some(action) = &task.action {
            obj.insert("action".to_string(), serde_json::json!(action.action().summary()));
        }
        tasks.insert(task.name.clone(), serde_json::Value::Object(obj));
    }
    serde_json::Value::Object(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::build_registry;
    use crate::config::{Config, RunOptions};

    fn registry() -> Registry {
        let config = Config::parse(
            r#"
            [tasks.lint]
            desc = "Detect problems"
            config = { src = "lib/**/*.js" }
            action = { kind = "run", commands = ["eslint lib"] }

            [tasks.test]
            deps = "lint"

            [tasks.kibana.build]
            desc = "Build kibana config"
            "#,
        )
        .unwrap();
        build_registry(&config, &RunOptions::default()).unwrap()
    }

    #[test]
    fn test_table_lists_tasks_and_groups() {
        console::set_colors_enabled(false);
        let table = task_table(&registry(), true);
        assert!(table.contains("lint"));
        assert!(table.contains("Detect problems ⚒ ƒ"));
        assert!(table.contains("[lint]"));
        assert!(table.contains("kibana/"));
        assert!(table.contains("Build kibana config"));
    }

    #[test]
    fn test_plain() {
        assert_eq!(plain(&registry()), "kibana/build\nlint\ntest\n");
    }

    #[test]
    fn test_json_includes_inherited_description() {
        let value = json(&registry(), true);
        assert_eq!(value["test"]["description"], "Detect problems");
        assert_eq!(value["test"]["depends"][0], "lint");
        assert_eq!(value["lint"]["action"], "eslint lib");
    }
}
