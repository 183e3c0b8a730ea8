// src/recipe/set.rs

//! The collection of recipes available for one platform
//!
//! A [`RecipeSet`] is built once, validated, and then only read. It is passed
//! by reference to the resolver and kitchen instead of living in a global.

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::recipe::format::Recipe;
use crate::recipe::graph::RecipeGraph;
use crate::recipe::parser::parse_recipe_file;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Recipes keyed by name, resolved for one platform
#[derive(Debug, Clone)]
pub struct RecipeSet {
    platform: Platform,
    recipes: BTreeMap<String, Recipe>,
    /// File each recipe was loaded from, when it came from disk
    origins: BTreeMap<String, PathBuf>,
}

impl RecipeSet {
    /// Create an empty set for a platform
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            recipes: BTreeMap::new(),
            origins: BTreeMap::new(),
        }
    }

    /// Load every `*.toml` recipe below `dir` and validate the result
    pub fn load_dir(dir: &Path, platform: Platform) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("recipe directory {} not found", dir.display()),
            )));
        }

        let mut set = Self::new(platform);

        let walker = WalkDir::new(dir).follow_links(true).sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }

            debug!("Loading recipe {}", path.display());
            let recipe = parse_recipe_file(path, &platform).map_err(|e| match e {
                Error::Parse { field, message } => Error::Parse {
                    field,
                    message: format!("{} ({})", message, path.display()),
                },
                other => other,
            })?;
            set.insert_from(recipe, path)?;
        }

        set.validate()?;
        info!(
            "Loaded {} recipes from {} for {}",
            set.len(),
            dir.display(),
            set.platform
        );
        Ok(set)
    }

    /// Add a recipe; names must be unique
    pub fn insert(&mut self, recipe: Recipe) -> Result<()> {
        self.check_unique(&recipe.name)?;
        self.recipes.insert(recipe.name.clone(), recipe);
        Ok(())
    }

    fn insert_from(&mut self, recipe: Recipe, path: &Path) -> Result<()> {
        self.check_unique(&recipe.name)?;
        self.origins.insert(recipe.name.clone(), path.to_path_buf());
        self.recipes.insert(recipe.name.clone(), recipe);
        Ok(())
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.recipes.contains_key(name) {
            let previous = self
                .origins
                .get(name)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "an earlier insert".to_string());
            return Err(Error::DuplicateRecipe {
                name: name.to_string(),
                previous,
            });
        }
        Ok(())
    }

    /// Check that every dependency exists and the graph has no cycle
    pub fn validate(&self) -> Result<()> {
        for recipe in self.recipes.values() {
            let head_deps = recipe.head.iter().flat_map(|h| h.dependencies.iter());
            for dep in recipe.dependencies.iter().chain(head_deps) {
                if !self.recipes.contains_key(&dep.name) {
                    return Err(Error::MissingDependency {
                        recipe: recipe.name.clone(),
                        dependency: dep.name.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.graph().find_cycles().into_iter().next() {
            return Err(Error::Cycle { cycle });
        }

        Ok(())
    }

    /// Dependency graph over the whole set
    pub fn graph(&self) -> RecipeGraph {
        let mut graph = RecipeGraph::new();
        for recipe in self.recipes.values() {
            graph.add_from_recipe(recipe);
        }
        graph
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }

    /// Look up a recipe, failing with [`Error::RecipeNotFound`]
    pub fn require(&self, name: &str) -> Result<&Recipe> {
        self.recipes
            .get(name)
            .ok_or_else(|| Error::RecipeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    /// Recipes in name order
    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// File a recipe was loaded from
    pub fn origin(&self, name: &str) -> Option<&Path> {
        self.origins.get(name).map(PathBuf::as_path)
    }
}
