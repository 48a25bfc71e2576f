//! Static task graphs: construction, dependency edges, validation.
//!
//! A graph is built once at startup and is immutable for the lifetime of a
//! run. Cycle prevention happens at edge insertion time (a reachability
//! check from the downstream task back to the upstream one), so a fully
//! constructed graph is acyclic by construction; [`TaskGraph::validate`]
//! re-derives the topological order as a final sanity check.

use crate::errors::{CycleError, DagrunError, DuplicateTaskError, UnknownTaskError};
use crate::task::Task;
use std::collections::{HashMap, HashSet, VecDeque};

/// A set of named tasks plus directed dependency edges.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    name: String,
    tasks: HashMap<String, Task>,
    upstream: HashMap<String, HashSet<String>>,
    downstream: HashMap<String, HashSet<String>>,
    /// Insertion order, kept for deterministic topological sorts.
    insertion_order: Vec<String>,
}

impl TaskGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: HashMap::new(),
            upstream: HashMap::new(),
            downstream: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Builds a linear chain, wiring one edge per adjacent pair.
    ///
    /// A linear `a >> b >> c` pipeline is just this special case of a
    /// general graph.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTaskError` if two tasks share a name.
    pub fn chain(
        name: impl Into<String>,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<Self, DagrunError> {
        let mut graph = Self::new(name);
        let mut previous: Option<String> = None;

        for task in tasks {
            let current = task.name.clone();
            graph.add_task(task)?;
            if let Some(prev) = previous {
                graph.add_dependency(&prev, &current)?;
            }
            previous = Some(current);
        }

        Ok(graph)
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the graph holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Looks up a task by name.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Returns the task names in insertion order.
    #[must_use]
    pub fn task_names(&self) -> &[String] {
        &self.insertion_order
    }

    /// Returns the direct upstream set of a task.
    #[must_use]
    pub fn upstream_of(&self, name: &str) -> Option<&HashSet<String>> {
        self.upstream.get(name)
    }

    /// Returns the direct downstream set of a task.
    #[must_use]
    pub fn downstream_of(&self, name: &str) -> Option<&HashSet<String>> {
        self.downstream.get(name)
    }

    /// Returns tasks with no incoming edges.
    #[must_use]
    pub fn roots(&self) -> Vec<&str> {
        self.insertion_order
            .iter()
            .filter(|name| self.upstream[name.as_str()].is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Returns tasks with no outgoing edges; these are the run's completion
    /// signal.
    #[must_use]
    pub fn sinks(&self) -> Vec<&str> {
        self.insertion_order
            .iter()
            .filter(|name| self.downstream[name.as_str()].is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Adds a task to the graph.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTaskError` if the name is already taken.
    pub fn add_task(&mut self, task: Task) -> Result<(), DuplicateTaskError> {
        if self.tasks.contains_key(&task.name) {
            return Err(DuplicateTaskError::new(&task.name, &self.name));
        }

        let name = task.name.clone();
        self.upstream.insert(name.clone(), HashSet::new());
        self.downstream.insert(name.clone(), HashSet::new());
        self.insertion_order.push(name.clone());
        self.tasks.insert(name, task);
        Ok(())
    }

    /// Adds a dependency edge: `downstream` may only start after `upstream`
    /// reaches a terminal, non-blocking state.
    ///
    /// The edge is checked before insertion, so the graph is unchanged on
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTaskError` if either endpoint is absent, or
    /// `CycleError` if the edge would close a cycle (including
    /// self-dependencies).
    pub fn add_dependency(&mut self, upstream: &str, downstream: &str) -> Result<(), DagrunError> {
        if !self.tasks.contains_key(upstream) {
            return Err(UnknownTaskError::new(upstream, &self.name).into());
        }
        if !self.tasks.contains_key(downstream) {
            return Err(UnknownTaskError::new(downstream, &self.name).into());
        }

        if let Some(mut path) = self.path_between(downstream, upstream) {
            // Close the loop for the error message: ... -> upstream -> downstream.
            path.push(downstream.to_string());
            return Err(CycleError::new(path).into());
        }

        if let Some(set) = self.downstream.get_mut(upstream) {
            set.insert(downstream.to_string());
        }
        if let Some(set) = self.upstream.get_mut(downstream) {
            set.insert(upstream.to_string());
        }
        Ok(())
    }

    /// Returns the topologically sorted task order.
    ///
    /// # Errors
    ///
    /// Returns `CycleError` if the edge relation is cyclic. This cannot
    /// happen for graphs built solely through [`add_dependency`](Self::add_dependency),
    /// but the check is kept as the construction-time invariant gate.
    pub fn validate(&self) -> Result<Vec<String>, CycleError> {
        let mut in_degree: HashMap<&str, usize> = self
            .insertion_order
            .iter()
            .map(|name| (name.as_str(), self.upstream[name.as_str()].len()))
            .collect();

        let mut queue: VecDeque<&str> = self
            .insertion_order
            .iter()
            .map(String::as_str)
            .filter(|name| in_degree[name] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());
            // Deterministic release order: walk insertion order, not the set.
            for candidate in &self.insertion_order {
                if self.downstream[name].contains(candidate.as_str()) {
                    let degree = in_degree
                        .get_mut(candidate.as_str())
                        .map(|d| {
                            *d -= 1;
                            *d
                        })
                        .unwrap_or(0);
                    if degree == 0 {
                        queue.push_back(candidate.as_str());
                    }
                }
            }
        }

        if order.len() == self.tasks.len() {
            Ok(order)
        } else {
            let stuck: Vec<String> = self
                .insertion_order
                .iter()
                .filter(|name| !order.contains(name))
                .cloned()
                .collect();
            Err(CycleError::new(stuck))
        }
    }

    /// Finds a directed path from `from` to `to` along existing edges, if
    /// one exists. Used for cycle prevention before edge insertion.
    fn path_between(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for next in &self.downstream[current] {
                if parents.contains_key(next.as_str()) {
                    continue;
                }
                parents.insert(next, current);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut walk = to;
                    while let Some(parent) = parents.get(walk) {
                        path.push((*parent).to_string());
                        walk = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }
}
