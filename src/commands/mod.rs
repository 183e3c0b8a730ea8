// src/commands/mod.rs

//! Command handlers for the larder CLI

mod fetch;
mod install;
mod query;

pub use fetch::cmd_fetch;
pub use install::{cmd_install, cmd_test, InstallArgs};
pub use query::{cmd_check, cmd_deps, cmd_info, cmd_uses};

use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use larder::{Kitchen, KitchenConfig, Platform, RecipeSet, Settings};
use std::path::PathBuf;
use tracing::debug;

/// Lines of step output shown when an install fails
pub const OUTPUT_TAIL_LINES: usize = 20;

/// Global options merged with the settings file
pub struct Session {
    pub global: GlobalArgs,
    pub settings: Settings,
}

impl Session {
    pub fn new(global: GlobalArgs) -> Result<Self> {
        let settings = Settings::load(global.config.as_deref())
            .context("Failed to read settings")?;
        Ok(Self { global, settings })
    }

    pub fn platform(&self) -> Result<Platform> {
        match &self.global.platform {
            Some(p) => p
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid --platform '{}'", p)),
            None => Ok(Platform::detect()),
        }
    }

    pub fn recipes_dir(&self) -> PathBuf {
        self.global
            .recipes
            .clone()
            .unwrap_or_else(|| self.settings.recipes_dir())
    }

    /// Load and validate the recipe directory
    pub fn load_recipes(&self) -> Result<RecipeSet> {
        let dir = self.recipes_dir();
        let platform = self.platform()?;
        debug!("Loading recipes from {} for {}", dir.display(), platform);
        RecipeSet::load_dir(&dir, platform)
            .with_context(|| format!("Failed to load recipes from {}", dir.display()))
    }

    /// Defaults, then the settings file, then global flags
    pub fn kitchen_config(&self) -> KitchenConfig {
        let mut config = KitchenConfig::default();
        self.settings.apply_to(&mut config);
        if let Some(prefix) = &self.global.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(cache) = &self.global.cache {
            config.source_cache = cache.clone();
        }
        config
    }

    pub fn kitchen(&self, config: KitchenConfig) -> Result<Kitchen> {
        Kitchen::new(config).context("Failed to set up the kitchen")
    }
}

/// Last `n` lines of captured output
pub fn output_tail(output: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}
