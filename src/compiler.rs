//! Task tree compilation
//!
//! Walks the nested task tree once and produces a flat [`Registry`] keyed by
//! fully-qualified task names. Groups only contribute namespace segments;
//! every leaf becomes exactly one [`CompiledTask`]. Dependency references
//! are linked after the walk, when every name is known, and a compilation
//! error aborts the whole build.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use crate::config::{Config, RunOptions};
use crate::deps::{DependencyRef, DependencyResolver};
use crate::dry_run::DryRunGuard;
use crate::error::{Result, TaskTreeError};
use crate::graph::TaskGraph;
use crate::namespace::NamespaceResolver;
use crate::tree::{LeafSpec, TaskNode, TaskSettings};

/// A leaf task ready for scheduling
#[derive(Debug, Clone)]
pub struct CompiledTask {
    /// Fully-qualified, `/`-joined name
    pub name: String,
    pub description: Option<String>,
    /// Fully-qualified dependency names, in declaration order
    pub dependencies: Vec<String>,
    pub action: Option<DryRunGuard>,
    pub config: Option<TaskSettings>,
    /// Dotted path of the definition in the configuration
    pub origin: String,
}

/// A namespace introduced by a group
#[derive(Debug, Clone, Default)]
pub struct GroupSummary {
    pub name: String,
    /// Fully-qualified names of the group's children, excluding its own
    /// default task
    pub children: Vec<String>,
}

/// Flat mapping from fully-qualified name to compiled task
#[derive(Debug, Default)]
pub struct Registry {
    tasks: BTreeMap<String, CompiledTask>,
    groups: BTreeMap<String, GroupSummary>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&CompiledTask> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &CompiledTask> {
        self.tasks.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupSummary> {
        self.groups.values()
    }

    pub fn group(&self, name: &str) -> Option<&GroupSummary> {
        self.groups.get(name)
    }

    /// Description of a task or group.
    ///
    /// A group without a task of its own and with a single child borrows
    /// that child's description.
    pub fn description_of(&self, name: &str) -> Option<&str> {
        if let Some(task) = self.tasks.get(name) {
            return task.description.as_deref();
        }
        match self.groups.get(name) {
            Some(group) if group.children.len() == 1 => self.description_of(&group.children[0]),
            _ => None,
        }
    }
}

/// Compiles a task tree into a [`Registry`]
#[derive(Debug)]
pub struct TaskCompiler<'a> {
    namespaces: NamespaceResolver,
    resolver: DependencyResolver,
    options: &'a RunOptions,
}

/// Accumulated state of a single compilation
#[derive(Default)]
struct Assembly {
    tasks: BTreeMap<String, CompiledTask>,
    groups: BTreeMap<String, GroupSummary>,
    references: Vec<(String, Vec<DependencyRef>)>,
}

impl<'a> TaskCompiler<'a> {
    pub fn new(default_key: &str, options: &'a RunOptions) -> Self {
        Self {
            namespaces: NamespaceResolver::new(default_key),
            resolver: DependencyResolver,
            options,
        }
    }

    /// Compile `tree`, whose own namespace is `ancestry` (empty for the root)
    pub fn compile(&self, tree: &TaskNode, ancestry: &[String]) -> Result<Registry> {
        let mut assembly = Assembly::default();
        let origin = std::iter::once("tasks")
            .chain(ancestry.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".");

        match tree {
            TaskNode::Group(children) => {
                for (key, child) in children {
                    self.visit(key, child, ancestry, &origin, &mut assembly)?;
                }
            }
            TaskNode::Leaf(leaf) => {
                let Some((_, enclosing)) = ancestry.split_last() else {
                    return Err(TaskTreeError::InvalidTask {
                        path: origin,
                        reason: "the root of the tree must be a group".to_string(),
                    });
                };
                self.emit(ancestry.to_vec(), enclosing, leaf, origin.clone(), &mut assembly)?;
            }
        }

        self.link(assembly)
    }

    fn visit(
        &self,
        key: &str,
        node: &TaskNode,
        enclosing: &[String],
        parent_origin: &str,
        assembly: &mut Assembly,
    ) -> Result<()> {
        let namespace = self.namespaces.resolve(enclosing, key);
        let origin = format!("{parent_origin}.{key}");

        match node {
            TaskNode::Group(children) => {
                let name = NamespaceResolver::qualify(&namespace);
                let collapsed = namespace.len() == enclosing.len();
                if !collapsed {
                    let child_names = children
                        .iter()
                        .filter(|(k, _)| !self.namespaces.is_default(k))
                        .map(|(k, _)| NamespaceResolver::qualify(&self.namespaces.resolve(&namespace, k)))
                        .collect();
                    assembly.groups.insert(
                        name.clone(),
                        GroupSummary {
                            name,
                            children: child_names,
                        },
                    );
                }
                for (child_key, child) in children {
                    self.visit(child_key, child, &namespace, &origin, assembly)?;
                }
                Ok(())
            }
            TaskNode::Leaf(leaf) => self.emit(namespace, enclosing, leaf, origin, assembly),
        }
    }

    fn emit(
        &self,
        namespace: Vec<String>,
        enclosing: &[String],
        leaf: &LeafSpec,
        origin: String,
        assembly: &mut Assembly,
    ) -> Result<()> {
        let name = NamespaceResolver::qualify(&namespace);
        let references = self.resolver.references(&leaf.deps, enclosing, &name)?;
        let action = leaf
            .action
            .as_ref()
            .map(|spec| spec.build())
            .transpose()?
            .map(|action| DryRunGuard::wrap(action, leaf.config.as_ref(), self.options));

        tracing::trace!(task = %name, origin = %origin, "compiled leaf");

        match assembly.tasks.entry(name.clone()) {
            Entry::Occupied(existing) => Err(TaskTreeError::DuplicateTask {
                name,
                first: existing.get().origin.clone(),
                second: origin,
            }),
            Entry::Vacant(slot) => {
                slot.insert(CompiledTask {
                    name: name.clone(),
                    description: leaf.desc.clone(),
                    dependencies: Vec::new(),
                    action,
                    config: leaf.config.clone(),
                    origin,
                });
                assembly.references.push((name, references));
                Ok(())
            }
        }
    }

    /// Point every reference at an existing task
    fn link(&self, mut assembly: Assembly) -> Result<Registry> {
        for (task, references) in &assembly.references {
            let mut resolved = Vec::with_capacity(references.len());
            for reference in references {
                // A task never resolves to itself; the walk continues upwards.
                let target = reference
                    .candidates()
                    .iter()
                    .filter(|name| *name != task)
                    .find(|name| assembly.tasks.contains_key(name.as_str()));
                let Some(target) = target else {
                    if reference.candidates().iter().any(|name| name == task) {
                        return Err(TaskTreeError::SelfDependency { task: task.clone() });
                    }
                    return Err(TaskTreeError::UnresolvedDependency {
                        task: task.clone(),
                        reference: reference.raw.clone(),
                        tried: reference.candidates().to_vec(),
                    });
                };
                if target != reference.primary() {
                    tracing::debug!(task = %task, reference = %reference.raw, target = %target, "resolved from an ancestor group");
                }
                resolved.push(target.clone());
            }
            if let Some(compiled) = assembly.tasks.get_mut(task) {
                compiled.dependencies = resolved;
            }
        }

        Ok(Registry {
            tasks: assembly.tasks,
            groups: assembly.groups,
        })
    }
}

/// Fill in missing descriptions from a task's single dependency.
///
/// Runs over a completed registry. Descriptions are read from a snapshot
/// taken before the pass, so inheritance never chains beyond one hop.
pub fn apply_defaults(mut registry: Registry) -> Registry {
    let snapshot: HashMap<String, Option<String>> = registry
        .tasks
        .iter()
        .map(|(name, task)| (name.clone(), task.description.clone()))
        .collect();

    for task in registry.tasks.values_mut() {
        if task.description.is_some() {
            continue;
        }
        if let [only] = task.dependencies.as_slice() {
            task.description = snapshot.get(only).cloned().flatten();
        }
    }

    registry
}

/// Build the registry for a configuration: compile, inherit descriptions,
/// and reject dependency cycles.
pub fn build_registry(config: &Config, options: &RunOptions) -> Result<Registry> {
    let tree = config.task_tree()?;
    let compiler = TaskCompiler::new(&config.settings.default_group_task, options);
    let registry = apply_defaults(compiler.compile(&tree, &[])?);
    TaskGraph::from_registry(&registry)?;
    tracing::debug!(tasks = registry.len(), "registry built");
    Ok(registry)
}
