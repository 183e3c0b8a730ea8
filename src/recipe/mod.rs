// src/recipe/mod.rs

//! Recipes: declarations of how to get a package into the prefix
//!
//! A recipe names a source (archive or git), its dependencies, the shell
//! steps that build and install it, and the steps that test the result.
//! Platform-specific sections are resolved once, when the recipe is loaded.
//!
//! # Culinary Terminology
//!
//! - **Recipe**: the build declaration
//! - **Kitchen**: executes install plans
//! - **Cook**: one recipe going through fetch, build, install and test
//! - **Keg**: the directory a recipe installs into
//! - **Bottle**: a precompiled keg, poured instead of built
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "tcpdump"
//! version = "4.99.1"
//!
//! [source]
//! url = "https://www.tcpdump.org/release/tcpdump-%(version)s.tar.gz"
//! checksum = "sha256:79b36985fb2703146618d87c4acde3e068b91c553fb93f021a337f175fd10ebe"
//!
//! [dependencies]
//! runtime = ["libpcap"]
//!
//! [build]
//! install = [
//!   "./configure --prefix=%(prefix)s %(flags)s",
//!   { run = "make install", serial = true },
//! ]
//!
//! [target.linux]
//! flags = ["--disable-smb"]
//! ```

pub mod format;
pub mod graph;
pub mod kitchen;
pub mod parser;
pub mod set;

pub use format::{
    BuildMethod, Dependency, DependencyPhase, GitReference, Recipe, SourceLocator, Step,
};
pub use graph::RecipeGraph;
pub use kitchen::{AbortHandle, CookResult, InstallReport, Kitchen, KitchenConfig, RecipeState};
pub use parser::{UNVERSIONED, parse_recipe, parse_recipe_file, validate_recipe};
pub use set::RecipeSet;
