// src/recipe/kitchen/config.rs

//! Configuration and result types for the Kitchen

use super::status::RecipeState;
use crate::error::Error;
use crate::recipe::BuildMethod;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the Kitchen
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Shared install prefix holding `kegs/`, `opt/` and the linked tree
    pub prefix: PathBuf,
    /// Directory for downloaded sources
    pub source_cache: PathBuf,
    /// Parent of the scoped build directories (system temp dir when unset)
    pub build_root: Option<PathBuf>,
    /// Timeout for a single step
    pub timeout: Duration,
    /// Parallel make jobs (`MAKEFLAGS=-j<jobs>`)
    pub jobs: u32,
    /// Recipes built concurrently; 1 builds strictly in plan order
    pub workers: usize,
    /// Keep build directory after completion (for debugging)
    pub keep_builddir: bool,
    /// Skip the test steps after install
    pub skip_tests: bool,
    /// Download attempts per URL before moving to the next mirror
    pub fetch_retries: u32,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);

        Self {
            prefix: dirs::data_local_dir()
                .map(|d| d.join("larder"))
                .unwrap_or_else(|| PathBuf::from("/opt/larder")),
            source_cache: dirs::cache_dir()
                .map(|d| d.join("larder").join("downloads"))
                .unwrap_or_else(|| PathBuf::from("/var/cache/larder/downloads")),
            build_root: None,
            timeout: Duration::from_secs(3600), // 1 hour
            jobs: cores as u32,
            workers: cores,
            keep_builddir: false,
            skip_tests: false,
            fetch_retries: 3,
        }
    }
}

impl KitchenConfig {
    /// Anchor relative directories at the current working directory
    ///
    /// Steps run inside the build directory, so every path handed to them
    /// must be absolute.
    pub fn make_absolute(&mut self) -> std::io::Result<()> {
        self.prefix = std::path::absolute(&self.prefix)?;
        self.source_cache = std::path::absolute(&self.source_cache)?;
        if let Some(root) = &self.build_root {
            self.build_root = Some(std::path::absolute(root)?);
        }
        Ok(())
    }
}

/// Result of cooking one recipe
#[derive(Debug)]
pub struct CookResult {
    pub name: String,
    pub version: String,
    pub method: BuildMethod,
    /// Keg the recipe lives in
    pub keg: PathBuf,
    /// Already installed before this run; nothing was built
    pub skipped: bool,
    /// Build log (step headers plus captured output)
    pub log: String,
    /// Warnings generated during build
    pub warnings: Vec<String>,
    pub caveats: Option<String>,
    /// Kept build directory, when `keep_builddir` is set
    pub build_dir: Option<PathBuf>,
    pub duration: Duration,
}

/// Outcome of [`Kitchen::install`](super::Kitchen::install)
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Final state of every planned recipe, in plan order
    pub states: Vec<(String, RecipeState)>,
    /// Recipes that finished, in completion order
    pub results: Vec<CookResult>,
    /// First failure; downstream recipes were not attempted
    pub error: Option<Error>,
}

impl InstallReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn state(&self, name: &str) -> Option<RecipeState> {
        self.states
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    pub fn result(&self, name: &str) -> Option<&CookResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Recipes built in this run (excluding already-installed ones)
    pub fn built(&self) -> impl Iterator<Item = &CookResult> {
        self.results.iter().filter(|r| !r.skipped)
    }

    /// Convert into a `Result`, surfacing the first failure
    pub fn into_result(self) -> crate::error::Result<Vec<CookResult>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kitchen_config_default() {
        let config = KitchenConfig::default();
        assert!(config.jobs > 0);
        assert!(config.workers > 0);
        assert!(!config.keep_builddir);
        assert!(!config.skip_tests);
        assert_eq!(config.timeout, Duration::from_secs(3600));
        assert!(config.source_cache.ends_with("downloads"));
    }

    #[test]
    fn test_make_absolute() {
        let mut config = KitchenConfig {
            prefix: PathBuf::from("p"),
            source_cache: PathBuf::from("./cache"),
            build_root: Some(PathBuf::from("build")),
            ..KitchenConfig::default()
        };
        config.make_absolute().unwrap();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.prefix, cwd.join("p"));
        assert!(config.source_cache.is_absolute());
        assert!(config.source_cache.ends_with("cache"));
        assert_eq!(config.build_root, Some(cwd.join("build")));
    }

    #[test]
    fn test_report_state_lookup() {
        let report = InstallReport {
            states: vec![
                ("a".to_string(), RecipeState::Installed),
                ("b".to_string(), RecipeState::Failed),
            ],
            results: Vec::new(),
            error: Some(Error::RecipeNotFound("x".to_string())),
        };
        assert_eq!(report.state("b"), Some(RecipeState::Failed));
        assert_eq!(report.state("c"), None);
        assert!(!report.is_success());
        assert!(report.into_result().is_err());
    }
}
