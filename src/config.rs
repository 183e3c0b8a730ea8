// src/config.rs

//! User settings file
//!
//! Read from `--config` or `<config dir>/larder/config.toml`. Every field is
//! optional; unset fields keep the [`KitchenConfig`] defaults, and command
//! line flags override both.

use crate::error::{Error, Result};
use crate::recipe::KitchenConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Recipe directory used when neither the settings nor the CLI name one
pub const DEFAULT_RECIPES_DIR: &str = "recipes";

/// Settings file contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory of recipe files
    pub recipes: Option<PathBuf>,

    /// Shared install prefix
    pub prefix: Option<PathBuf>,

    /// Download cache
    pub cache: Option<PathBuf>,

    /// Parent directory for build directories
    pub build_root: Option<PathBuf>,

    pub jobs: Option<u32>,
    pub workers: Option<usize>,

    /// Per-step timeout in seconds
    pub timeout_seconds: Option<u64>,

    pub fetch_retries: Option<u32>,
    pub keep_builddir: Option<bool>,
    pub skip_tests: Option<bool>,

    /// Ignore bottles unless overridden on the command line
    pub build_from_source: Option<bool>,
}

impl Settings {
    /// Load settings
    ///
    /// A missing file at the default location yields defaults; a missing
    /// file that was asked for explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(Error::Config(format!("{} does not exist", p.display())));
                }
                p.to_path_buf()
            }
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        debug!("Reading settings from {}", config_path.display());
        let contents = std::fs::read_to_string(&config_path)?;
        Self::parse(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", config_path.display(), e)))
    }

    pub fn parse(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// `<config dir>/larder/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("larder").join("config.toml"))
    }

    pub fn recipes_dir(&self) -> PathBuf {
        self.recipes
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECIPES_DIR))
    }

    /// Overlay the set fields onto a kitchen configuration
    pub fn apply_to(&self, config: &mut KitchenConfig) {
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(cache) = &self.cache {
            config.source_cache = cache.clone();
        }
        if let Some(root) = &self.build_root {
            config.build_root = Some(root.clone());
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs.max(1);
        }
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(secs) = self.timeout_seconds {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.fetch_retries {
            config.fetch_retries = retries;
        }
        if let Some(keep) = self.keep_builddir {
            config.keep_builddir = keep;
        }
        if let Some(skip) = self.skip_tests {
            config.skip_tests = skip;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.prefix.is_none());
        assert_eq!(settings.recipes_dir(), PathBuf::from("recipes"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/larder/config.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_apply_overrides_only_set_fields() {
        let settings = Settings::parse(
            r#"
prefix = "/opt/larder"
jobs = 2
timeout_seconds = 60
skip_tests = true
"#,
        )
        .unwrap();

        let mut config = KitchenConfig::default();
        let cache_before = config.source_cache.clone();
        settings.apply_to(&mut config);

        assert_eq!(config.prefix, PathBuf::from("/opt/larder"));
        assert_eq!(config.jobs, 2);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.skip_tests);
        assert_eq!(config.source_cache, cache_before);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Settings::parse("prefx = \"/opt\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "recipes = \"/srv/recipes\"\nworkers = 3\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.recipes_dir(), PathBuf::from("/srv/recipes"));
        assert_eq!(settings.workers, Some(3));

        std::fs::write(&path, "workers = \"many\"\n").unwrap();
        assert!(matches!(Settings::load(Some(&path)), Err(Error::Config(_))));
    }
}
