// src/resolver/mod.rs

//! Dependency resolution
//!
//! Turns one or more requested recipe names into an [`InstallPlan`]: a
//! depth-first walk that appends each recipe after all of its dependencies.
//! Ties between independent dependencies follow declaration order (build,
//! runtime, then platform-specific).

mod plan;

pub use plan::{InstallPlan, PlanOptions, PlannedRecipe};

use crate::error::{Error, Result};
use crate::recipe::{BuildMethod, Recipe, RecipeSet};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Resolves install plans against a recipe set
pub struct Resolver<'a> {
    set: &'a RecipeSet,
    options: PlanOptions,
}

struct Walk<'a> {
    requested: HashSet<&'a str>,
    marks: HashMap<String, Mark>,
    path: Vec<String>,
    entries: Vec<PlannedRecipe<'a>>,
}

impl<'a> Resolver<'a> {
    pub fn new(set: &'a RecipeSet) -> Self {
        Self {
            set,
            options: PlanOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PlanOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve the plan for a single target
    pub fn resolve(&self, target: &str) -> Result<InstallPlan<'a>> {
        self.resolve_many(&[target])
    }

    /// Resolve one plan covering several targets
    ///
    /// Shared dependencies appear once; targets keep their relative order
    /// except where one depends on another.
    pub fn resolve_many<S: AsRef<str>>(&self, targets: &[S]) -> Result<InstallPlan<'a>> {
        let mut walk = Walk {
            requested: HashSet::new(),
            marks: HashMap::new(),
            path: Vec::new(),
            entries: Vec::new(),
        };

        for target in targets {
            let recipe = self.set.require(target.as_ref())?;
            walk.requested.insert(recipe.name.as_str());
        }
        for target in targets {
            self.visit(target.as_ref(), None, &mut walk)?;
        }

        debug!(
            "Resolved plan: {}",
            walk.entries
                .iter()
                .map(|e| format!("{} ({})", e.name(), e.method))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(InstallPlan::from_entries(walk.entries))
    }

    /// How a recipe gets built in this plan
    pub fn method_for(&self, recipe: &Recipe, requested: bool) -> BuildMethod {
        if requested && self.options.head && recipe.head.is_some() {
            BuildMethod::Head
        } else if recipe.bottle.is_some() && !self.options.build_from_source {
            BuildMethod::Bottle
        } else {
            BuildMethod::Source
        }
    }

    fn visit(&self, name: &str, requester: Option<&str>, walk: &mut Walk<'a>) -> Result<()> {
        match walk.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = walk.path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle = walk.path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(Error::Cycle { cycle });
            }
            None => {}
        }

        let Some(recipe) = self.set.get(name) else {
            return Err(match requester {
                Some(parent) => Error::MissingDependency {
                    recipe: parent.to_string(),
                    dependency: name.to_string(),
                },
                None => Error::RecipeNotFound(name.to_string()),
            });
        };

        walk.marks.insert(name.to_string(), Mark::Visiting);
        walk.path.push(name.to_string());

        let requested = walk.requested.contains(name);
        let method = self.method_for(recipe, requested);
        let dependencies: Vec<String> = recipe
            .dependencies_for(method)
            .into_iter()
            .map(|d| d.name.clone())
            .collect();

        for dep in &dependencies {
            self.visit(dep, Some(&recipe.name), walk)?;
        }

        walk.path.pop();
        walk.marks.insert(name.to_string(), Mark::Done);
        walk.entries.push(PlannedRecipe {
            recipe,
            method,
            requested,
            dependencies,
        });
        Ok(())
    }
}
