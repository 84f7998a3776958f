//! Task graph construction and execution ordering
//!
//! Uses petgraph to build a DAG over the compiled registry, reject cycles,
//! and answer dependency queries. Execution order is a depth-first walk of
//! each task's dependencies in declaration order.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

use crate::compiler::Registry;
use crate::error::{Result, TaskTreeError};

/// The task dependency graph
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    /// Dependencies per task, in declaration order
    dependencies: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Build a task graph from a compiled registry
    pub fn from_registry(registry: &Registry) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        let mut dependencies = HashMap::new();

        for name in registry.names() {
            let idx = graph.add_node(name.to_string());
            name_to_index.insert(name.to_string(), idx);
        }

        for task in registry.tasks() {
            let task_idx = name_to_index[&task.name];

            for dep in &task.dependencies {
                let dep_idx = name_to_index.get(dep).ok_or_else(|| TaskTreeError::TaskNotFound {
                    name: dep.clone(),
                    available: registry.names().map(str::to_string).collect(),
                })?;

                // Edge goes from dependency TO dependent (dep must run first)
                graph.add_edge(*dep_idx, task_idx, ());
            }
            dependencies.insert(task.name.clone(), task.dependencies.clone());
        }

        if is_cyclic_directed(&graph) {
            let cycle = Self::find_cycle_description(&graph, &name_to_index);
            return Err(TaskTreeError::CyclicDependency { cycle });
        }

        Ok(Self {
            graph,
            name_to_index,
            dependencies,
        })
    }

    /// Tasks to run for `targets`, dependencies first.
    ///
    /// A task never appears before any of its dependencies, and siblings keep
    /// the order in which they were declared.
    pub fn execution_order(&self, targets: &[String]) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();

        for target in targets {
            if !self.has_task(target) {
                let mut available: Vec<String> = self.name_to_index.keys().cloned().collect();
                available.sort();
                return Err(TaskTreeError::TaskNotFound {
                    name: target.clone(),
                    available,
                });
            }
            self.visit(target, &mut visited, &mut order);
        }

        Ok(order)
    }

    fn visit(&self, name: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        for dep in self.dependencies.get(name).into_iter().flatten() {
            self.visit(dep, visited, order);
        }
        order.push(name.to_string());
    }

    /// Find a human-readable description of a cycle
    fn find_cycle_description(
        graph: &DiGraph<String, ()>,
        name_to_index: &HashMap<String, NodeIndex>,
    ) -> String {
        let mut names: Vec<&String> = name_to_index.keys().collect();
        names.sort();

        for name in names {
            let idx = name_to_index[name];
            let mut visited = HashSet::new();
            let mut path = vec![name.clone()];

            if Self::dfs_find_cycle(graph, idx, idx, &mut visited, &mut path) {
                return path.join(" -> ");
            }
        }

        "Unknown cycle".to_string()
    }

    fn dfs_find_cycle(
        graph: &DiGraph<String, ()>,
        current: NodeIndex,
        target: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        path: &mut Vec<String>,
    ) -> bool {
        for neighbor in graph.neighbors(current) {
            if neighbor == target {
                path.push(graph[target].clone());
                return true;
            }

            if visited.insert(neighbor) {
                path.push(graph[neighbor].clone());
                if Self::dfs_find_cycle(graph, neighbor, target, visited, path) {
                    return true;
                }
                path.pop();
            }
        }

        false
    }

    /// Check if a task exists
    pub fn has_task(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Direct dependencies of a task, in declaration order
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.dependencies.get(name).map(Vec::as_slice)
    }
}

/// Execution plan for a set of targets
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Tasks to execute in order
    pub tasks: Vec<String>,
    /// Stages by dependency depth; a stage only depends on earlier stages
    pub stages: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn new(graph: &TaskGraph, targets: &[String]) -> Result<Self> {
        let tasks = graph.execution_order(targets)?;

        let mut stages: Vec<Vec<String>> = Vec::new();
        let mut stage_of: HashMap<&str, usize> = HashMap::new();

        for task in &tasks {
            let target_stage = graph
                .dependencies(task)
                .unwrap_or_default()
                .iter()
                .filter_map(|dep| stage_of.get(dep.as_str()))
                .map(|stage| stage + 1)
                .max()
                .unwrap_or(0);

            while stages.len() <= target_stage {
                stages.push(Vec::new());
            }
            stages[target_stage].push(task.clone());
            stage_of.insert(task.as_str(), target_stage);
        }

        Ok(Self { tasks, stages })
    }
}
