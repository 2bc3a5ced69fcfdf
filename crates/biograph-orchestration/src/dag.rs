//! Task dependency graph.
//!
//! - Forward edges: task -> the tasks it waits for
//! - Reverse edges: task -> the tasks waiting for it
//!
//! Both are built once from the task list and never change afterwards, so the
//! executor can walk the graph without locking it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use biograph_common::{BiographError, Result};

use crate::task::{Dependency, DependencyKind, Task};

pub struct TaskGraph {
    tasks: BTreeMap<String, Arc<dyn Task>>,
    edges: BTreeMap<String, Vec<Dependency>>,
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
    /// Topological order; ties keep declaration order.
    order: Vec<String>,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph").field("order", &self.order).field("edges", &self.edges).finish()
    }
}

impl TaskGraph {
    /// Build and validate. Rejects duplicate names, dependencies on unknown
    /// tasks and cycles.
    pub fn new(tasks: Vec<Arc<dyn Task>>) -> Result<Self> {
        let mut declared = Vec::with_capacity(tasks.len());
        let mut by_name = BTreeMap::new();
        for task in tasks {
            let name = task.name().to_string();
            if by_name.contains_key(&name) {
                return Err(BiographError::Workflow(format!("duplicate task '{name}'")));
            }
            declared.push(name.clone());
            by_name.insert(name, task);
        }

        let mut edges = BTreeMap::new();
        let mut reverse_edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for name in &declared {
            let deps = by_name[name].dependencies();
            for dep in &deps {
                if dep.task == *name {
                    return Err(BiographError::Workflow(format!("task '{name}' depends on itself")));
                }
                if !by_name.contains_key(&dep.task) {
                    return Err(BiographError::Workflow(format!(
                        "task '{name}' depends on unknown task '{}'",
                        dep.task
                    )));
                }
                let waiting = reverse_edges.entry(dep.task.clone()).or_default();
                if !waiting.insert(name.clone()) {
                    return Err(BiographError::Workflow(format!(
                        "task '{name}' lists '{}' more than once",
                        dep.task
                    )));
                }
            }
            edges.insert(name.clone(), deps);
        }

        let order = topological_order(&declared, &edges)?;
        Ok(Self { tasks: by_name, edges, reverse_edges, order })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, name: &str) -> Option<&Arc<dyn Task>> {
        self.tasks.get(name)
    }

    /// Task names, dependencies first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies(&self, name: &str) -> &[Dependency] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tasks that wait for `name`.
    pub fn dependents(&self, name: &str) -> impl Iterator<Item = &str> {
        self.reverse_edges.get(name).into_iter().flatten().map(String::as_str)
    }

    /// Every task reachable from `name` through reverse edges.
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents(name).collect();
        while let Some(next) = stack.pop() {
            if out.insert(next.to_string()) {
                stack.extend(self.dependents(next));
            }
        }
        out
    }

    /// One line per task: `name <- dep (hard), dep (soft)`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for name in &self.order {
            let deps = self.dependencies(name);
            let critical = self.tasks.get(name).map(|t| t.critical()).unwrap_or(true);
            out.push_str(name);
            if !critical {
                out.push_str(" [non-critical]");
            }
            if !deps.is_empty() {
                let list: Vec<String> = deps
                    .iter()
                    .map(|d| format!("{} ({})", d.task, dep_kind_label(d)))
                    .collect();
                out.push_str(" <- ");
                out.push_str(&list.join(", "));
            }
            out.push('\n');
        }
        out
    }
}

fn dep_kind_label(dep: &Dependency) -> &'static str {
    match dep.kind {
        DependencyKind::Hard => "hard",
        DependencyKind::Soft => "soft",
    }
}

/// Kahn's algorithm, picking ready tasks in declaration order.
fn topological_order(declared: &[String], edges: &BTreeMap<String, Vec<Dependency>>) -> Result<Vec<String>> {
    let mut remaining: BTreeMap<&str, BTreeSet<&str>> = declared
        .iter()
        .map(|name| {
            let deps = edges
                .get(name)
                .into_iter()
                .flatten()
                .map(|d| d.task.as_str())
                .collect();
            (name.as_str(), deps)
        })
        .collect();

    let mut order = Vec::with_capacity(declared.len());
    while order.len() < declared.len() {
        let ready: Vec<&str> = declared
            .iter()
            .map(String::as_str)
            .filter(|n| remaining.get(n).is_some_and(BTreeSet::is_empty))
            .collect();
        if ready.is_empty() {
            let stuck: Vec<&str> = remaining.keys().copied().collect();
            return Err(BiographError::Workflow(format!(
                "dependency cycle among: {}",
                stuck.join(", ")
            )));
        }
        for name in ready {
            remaining.remove(name);
            for deps in remaining.values_mut() {
                deps.remove(name);
            }
            order.push(name.to_string());
        }
    }
    Ok(order)
}
