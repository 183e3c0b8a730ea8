// src/lib.rs

//! Larder: a recipe-driven package installer
//!
//! Recipes declare where a package's source lives, what it depends on and
//! which shell steps build, install and test it. Larder loads a directory of
//! recipes for one platform, resolves an install order for the requested
//! names and executes it into a shared prefix.
//!
//! # Architecture
//!
//! - [`recipe`]: recipe format, loader, recipe sets and the [`recipe::kitchen`]
//!   executor
//! - [`resolver`]: turns requested names into an [`InstallPlan`]
//! - [`hash`]: checksums used to verify every download
//! - [`platform`]: the target platform and `[target.*]` selectors
//! - [`config`]: the optional settings file
//!
//! ```no_run
//! use larder::{Kitchen, KitchenConfig, Platform, RecipeSet, Resolver};
//! use std::path::Path;
//!
//! let set = RecipeSet::load_dir(Path::new("recipes"), Platform::detect())?;
//! let plan = Resolver::new(&set).resolve("tcpdump")?;
//! let kitchen = Kitchen::new(KitchenConfig::default())?;
//! kitchen.install(&plan).into_result()?;
//! # Ok::<(), larder::Error>(())
//! ```

pub mod config;
mod error;
pub mod hash;
pub mod platform;
pub mod recipe;
pub mod resolver;

pub use config::Settings;
pub use error::{Error, Result, StepPhase};
pub use hash::{Checksum, HashAlgorithm, Hasher};
pub use platform::{Arch, Os, Platform, TargetSelector};
pub use recipe::{
    AbortHandle, BuildMethod, CookResult, InstallReport, Kitchen, KitchenConfig, Recipe,
    RecipeSet, RecipeState, parse_recipe, parse_recipe_file, validate_recipe,
};
pub use resolver::{InstallPlan, PlanOptions, PlannedRecipe, Resolver};
