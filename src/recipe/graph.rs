// src/recipe/graph.rs

//! Recipe dependency graph for whole-set analysis
//!
//! The resolver walks dependencies itself for a single request; this graph
//! answers questions about the whole recipe set: who uses a recipe, whether
//! the set has cycles, and a complete build order.
//!
//! # Example
//!
//! ```ignore
//! use larder::recipe::graph::RecipeGraph;
//!
//! let mut graph = RecipeGraph::new();
//! graph.add_recipe("tcpdump", &["libpcap", "openssl@1.1"]);
//! graph.add_recipe("libpcap", &[]);
//! graph.add_recipe("openssl@1.1", &[]);
//!
//! let order = graph.topological_sort().unwrap();
//! // order: ["libpcap", "openssl@1.1", "tcpdump"]
//! ```

use crate::error::{Error, Result};
use crate::recipe::format::Recipe;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A directed graph of recipe dependencies
///
/// Ordered maps keep every query deterministic.
#[derive(Debug, Default)]
pub struct RecipeGraph {
    /// recipe -> recipes it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
    /// recipe -> recipes that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl RecipeGraph {
    /// Create a new empty recipe graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipe with its dependencies
    ///
    /// If the recipe already exists, this merges the dependencies.
    pub fn add_recipe(&mut self, name: &str, dependencies: &[&str]) {
        self.edges.entry(name.to_string()).or_default();
        self.reverse_edges.entry(name.to_string()).or_default();

        for dep in dependencies {
            self.edges
                .entry(name.to_string())
                .or_default()
                .insert(dep.to_string());
            self.edges.entry(dep.to_string()).or_default();
            self.reverse_edges
                .entry(dep.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }

    /// Add a recipe with every dependency it may need, head-only ones included
    pub fn add_from_recipe(&mut self, recipe: &Recipe) {
        let mut deps: Vec<&str> = recipe.dependencies.iter().map(|d| d.name.as_str()).collect();
        if let Some(head) = &recipe.head {
            deps.extend(head.dependencies.iter().map(|d| d.name.as_str()));
        }
        self.add_recipe(&recipe.name, &deps);
    }

    /// Get the number of recipes in the graph
    pub fn recipe_count(&self) -> usize {
        self.edges.len()
    }

    /// Check if a recipe exists in the graph
    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Get the direct dependencies of a recipe
    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(name)
    }

    /// Get the recipes that directly depend on this recipe
    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.reverse_edges.get(name)
    }

    /// Perform topological sort using Kahn's algorithm
    ///
    /// Returns the recipes in build order (dependencies before dependents).
    /// A cycle is reported as [`Error::Cycle`] with one offending path.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        // In-degree here is the number of unbuilt prerequisites
        let mut in_degrees: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();
        let mut result = Vec::with_capacity(self.edges.len());

        let mut queue: VecDeque<&str> = in_degrees
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(name, _)| *name)
            .collect();

        while let Some(node) = queue.pop_front() {
            result.push(node.to_string());

            if let Some(dependents) = self.reverse_edges.get(node) {
                for dependent in dependents {
                    if let Some(deg) = in_degrees.get_mut(dependent.as_str()) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        if result.len() != self.edges.len() {
            let cycle = self.find_cycles().into_iter().next().unwrap_or_else(|| {
                // Kahn left nodes behind, so some cycle exists; fall back to the leftovers
                self.edges
                    .keys()
                    .filter(|k| !result.contains(k))
                    .cloned()
                    .collect()
            });
            return Err(Error::Cycle { cycle });
        }

        Ok(result)
    }

    /// Find cycles in the graph
    ///
    /// Each cycle is a closed path: `["a", "b", "a"]` means a depends on b,
    /// which depends on a.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut rec_stack = BTreeSet::new();
        let mut path = Vec::new();

        for start in self.edges.keys() {
            if !visited.contains(start) {
                self.find_cycles_dfs(start, &mut visited, &mut rec_stack, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn find_cycles_dfs(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        rec_stack: &mut BTreeSet<String>,
        path: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if !visited.contains(dep) {
                    self.find_cycles_dfs(dep, visited, rec_stack, path, cycles);
                } else if rec_stack.contains(dep)
                    && let Some(cycle_start) = path.iter().position(|x| x == dep)
                {
                    let mut cycle = path[cycle_start..].to_vec();
                    cycle.push(dep.clone());
                    cycles.push(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
    }

    /// Get all recipes that a given recipe transitively depends on
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        Self::walk(&self.edges, name)
    }

    /// Get all recipes that transitively depend on a given recipe
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        Self::walk(&self.reverse_edges, name)
    }

    fn walk(edges: &BTreeMap<String, BTreeSet<String>>, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&String> = edges.get(name).into_iter().flatten().collect();

        while let Some(next) = queue.pop_front() {
            if next != name && seen.insert(next.clone())
                && let Some(further) = edges.get(next)
            {
                queue.extend(further.iter().filter(|n| !seen.contains(*n)));
            }
        }

        seen
    }
}
