// src/resolver/plan.rs

//! Installation plan data structures
//!
//! Contains the result types for dependency resolution.

use crate::recipe::{BuildMethod, Recipe};

/// Knobs that change how a plan is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Ignore bottles and build everything from source
    pub build_from_source: bool,
    /// Build requested targets from their head source when they have one
    pub head: bool,
}

/// One recipe in the plan
#[derive(Debug, Clone)]
pub struct PlannedRecipe<'a> {
    pub recipe: &'a Recipe,
    pub method: BuildMethod,
    /// Named on the command line rather than pulled in as a dependency
    pub requested: bool,
    /// Dependencies of this recipe that are part of the plan
    pub dependencies: Vec<String>,
}

impl PlannedRecipe<'_> {
    pub fn name(&self) -> &str {
        &self.recipe.name
    }
}

/// Recipes in installation order (dependencies first)
///
/// Built fresh for each request and dropped once executed.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan<'a> {
    entries: Vec<PlannedRecipe<'a>>,
}

impl<'a> InstallPlan<'a> {
    pub(crate) fn from_entries(entries: Vec<PlannedRecipe<'a>>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PlannedRecipe<'a>] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedRecipe<'a>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recipe names in plan order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(PlannedRecipe::name).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&PlannedRecipe<'a>> {
        self.entries.iter().find(|e| e.name() == name)
    }
}

impl<'p, 'a> IntoIterator for &'p InstallPlan<'a> {
    type Item = &'p PlannedRecipe<'a>;
    type IntoIter = std::slice::Iter<'p, PlannedRecipe<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
