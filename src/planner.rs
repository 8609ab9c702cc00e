//! Dependency resolution: graph construction, cycle detection, and leveling

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

use crate::error::{OrchestratorError, Result};
use crate::types::{ExecutionPlan, OperationCall};

/// Dependency graph over the calls of a batch
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Calls keyed by id, preserving batch submission order
    calls: IndexMap<String, OperationCall>,

    /// Call id -> ids of calls that depend on it
    dependents: HashMap<String, Vec<String>>,

    /// Call id -> number of distinct dependencies
    in_degree: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Builds the graph, rejecting duplicate call ids and dependencies on
    /// ids that are not part of the batch.
    pub fn build(calls: &[OperationCall]) -> Result<Self> {
        let mut call_map: IndexMap<String, OperationCall> = IndexMap::with_capacity(calls.len());
        for call in calls {
            if call_map.insert(call.id.clone(), call.clone()).is_some() {
                return Err(OrchestratorError::duplicate_call_id(&call.id));
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> =
            call_map.keys().map(|id| (id.clone(), 0)).collect();

        for call in call_map.values() {
            // Repeated entries in depends_on count as a single edge.
            let mut seen: HashSet<&str> = HashSet::new();
            for dependency in &call.depends_on {
                if !call_map.contains_key(dependency) {
                    return Err(OrchestratorError::unknown_dependency(&call.id, dependency));
                }
                if seen.insert(dependency.as_str()) {
                    dependents
                        .entry(dependency.clone())
                        .or_default()
                        .push(call.id.clone());
                    if let Some(degree) = in_degree.get_mut(&call.id) {
                        *degree += 1;
                    }
                }
            }
        }

        Ok(Self {
            calls: call_map,
            dependents,
            in_degree,
        })
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn call(&self, id: &str) -> Option<&OperationCall> {
        self.calls.get(id)
    }

    pub fn call_ids(&self) -> impl Iterator<Item = &str> {
        self.calls.keys().map(String::as_str)
    }

    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.calls
            .get(id)
            .map(|call| call.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Depth-first search for a cycle. Returns the exact cycle path with the
    /// entry node repeated at the end, e.g. `["a", "b", "c", "a"]` when `a`
    /// depends on `b`, `b` on `c`, and `c` back on `a`. A self-dependency
    /// yields a two-element path.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut done: HashSet<&str> = HashSet::new();

        for start in self.calls.keys() {
            if done.contains(start.as_str()) {
                continue;
            }

            // Iterative DFS along depends_on edges, tracking the current
            // path and each on-path node's position in it.
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            let mut path: Vec<&str> = vec![start.as_str()];
            let mut on_path: HashMap<&str, usize> = HashMap::new();
            on_path.insert(start.as_str(), 0);

            loop {
                let (node, descend) = {
                    let top = match stack.last_mut() {
                        Some(top) => top,
                        None => break,
                    };
                    let current: &str = top.0;
                    let dependencies = self.dependencies_of(current);
                    if top.1 < dependencies.len() {
                        let next = dependencies[top.1].as_str();
                        top.1 += 1;
                        (current, Some(next))
                    } else {
                        (current, None)
                    }
                };

                match descend {
                    Some(next) => {
                        if let Some(&position) = on_path.get(next) {
                            let mut cycle: Vec<String> =
                                path[position..].iter().map(|s| s.to_string()).collect();
                            cycle.push(next.to_string());
                            return Some(cycle);
                        }
                        if !done.contains(next) {
                            stack.push((next, 0));
                            on_path.insert(next, path.len());
                            path.push(next);
                        }
                    }
                    None => {
                        done.insert(node);
                        on_path.remove(node);
                        path.pop();
                        stack.pop();
                    }
                }
            }
        }

        None
    }
}

/// Produces leveled execution plans from batches of calls
#[derive(Debug, Default)]
pub struct ExecutionPlanner;

impl ExecutionPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Builds the dependency graph and levels it. A cycle or structural
    /// problem fails the whole batch before anything executes.
    pub fn plan(&self, calls: &[OperationCall]) -> Result<ExecutionPlan> {
        let graph = DependencyGraph::build(calls)?;

        if let Some(cycle) = graph.find_cycle() {
            return Err(OrchestratorError::cycle(&cycle));
        }

        let levels = Self::build_levels(&graph)?;
        Ok(ExecutionPlan::from_levels(levels))
    }

    /// Exposes the graph itself for introspection.
    pub fn build_graph(&self, calls: &[OperationCall]) -> Result<DependencyGraph> {
        DependencyGraph::build(calls)
    }

    /// Kahn's algorithm: peel every zero-in-degree call as one level, then
    /// decrement the in-degrees of its dependents. Intra-level order follows
    /// batch submission order. Assumes the graph passed cycle detection.
    fn build_levels(graph: &DependencyGraph) -> Result<Vec<Vec<String>>> {
        let mut in_degree = graph.in_degree.clone();
        let mut placed: HashSet<String> = HashSet::with_capacity(graph.len());
        let mut levels: Vec<Vec<String>> = Vec::new();

        while placed.len() < graph.len() {
            let ready: Vec<String> = graph
                .call_ids()
                .filter(|id| {
                    !placed.contains(*id) && in_degree.get(*id).copied().unwrap_or(0) == 0
                })
                .map(str::to_string)
                .collect();

            if ready.is_empty() {
                // Cannot happen once find_cycle has passed.
                return Err(OrchestratorError::execution(
                    "dependency graph cannot be leveled",
                ));
            }

            for id in &ready {
                placed.insert(id.clone());
                for dependent in graph.dependents_of(id) {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }

            levels.push(ready);
        }

        Ok(levels)
    }
}
