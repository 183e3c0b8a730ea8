// src/recipe/kitchen/mod.rs

//! Kitchen: executes install plans
//!
//! For every planned recipe the Kitchen:
//! - fetches and verifies the source (or bottle), resources and patches into
//!   the checksum-keyed source cache
//! - unpacks into a scoped build directory and applies patches, or pours
//!   the bottle straight into the keg
//! - runs the install steps into the keg
//! - runs the test steps in a scoped test directory
//! - writes the receipt and links the keg into the shared prefix
//!
//! A failing recipe has its partial keg removed and any earlier version of
//! it relinked; recipes finished before it stay installed and recipes after
//! it are never started.

mod archive;
mod config;
mod cook;
mod fetch;
mod keg;
mod scheduler;
mod status;
mod steps;

pub use config::{CookResult, InstallReport, KitchenConfig};
pub use fetch::{Fetcher, HttpFetcher, SourceCache};
pub use keg::{InstalledKeg, LINKED_DIRS, LinkReport, Prefix, RECEIPT_FILE, Receipt};
pub use status::{AbortHandle, RecipeState, StatusBoard};

use crate::error::{Error, Result, StepPhase};
use crate::recipe::format::{PatchLocation, SourceLocator};
use crate::recipe::{BuildMethod, Recipe};
use crate::resolver::{InstallPlan, PlannedRecipe};
use cook::{Cook, Fetched, FetchedSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use steps::StepRunner;
use tracing::{info, warn};

/// The Kitchen: where recipes are cooked
pub struct Kitchen {
    pub(crate) config: KitchenConfig,
    cache: SourceCache,
    prefix: Prefix,
    fetcher: Arc<dyn Fetcher>,
}

impl Kitchen {
    /// Create a Kitchen that downloads over HTTP
    pub fn new(config: KitchenConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.fetch_retries)?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Create a Kitchen with a custom fetcher
    ///
    /// Relative prefix, cache and build root are anchored at the current
    /// directory here.
    pub fn with_fetcher(mut config: KitchenConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        config.make_absolute()?;
        Ok(Self {
            cache: SourceCache::new(&config.source_cache),
            prefix: Prefix::new(&config.prefix),
            config,
            fetcher,
        })
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Execute a plan
    ///
    /// Never returns early: the report carries the final state of every
    /// recipe alongside the first error.
    pub fn install(&self, plan: &InstallPlan<'_>) -> InstallReport {
        self.install_with_abort(plan, &AbortHandle::new())
    }

    /// Execute a plan, stopping at the next step boundary once `abort` fires
    pub fn install_with_abort(&self, plan: &InstallPlan<'_>, abort: &AbortHandle) -> InstallReport {
        let board = StatusBoard::new(plan.names());

        if let Err(e) = self.prefix.ensure() {
            return InstallReport {
                states: board.snapshot(),
                results: Vec::new(),
                error: Some(e),
            };
        }

        let workers = self.config.workers.max(1).min(plan.len().max(1));
        let (results, error) = if workers == 1 {
            scheduler::run_sequential(self, plan, &board, abort)
        } else {
            match scheduler::run_parallel(self, plan, &board, abort, workers) {
                Ok(outcome) => outcome,
                Err(e) => (Vec::new(), Some(e)),
            }
        };

        if let Some(e) = &error {
            warn!("Installation stopped: {}", e);
        }
        InstallReport {
            states: board.snapshot(),
            results,
            error,
        }
    }

    /// Cook one plan entry, driving its state on the board
    pub(crate) fn cook_entry(
        &self,
        entry: &PlannedRecipe<'_>,
        board: &StatusBoard,
        abort: &AbortHandle,
    ) -> Result<CookResult> {
        let recipe = entry.recipe;
        if self.prefix.is_installed(&recipe.name, &recipe.version) {
            info!("{} {} is already installed", recipe.name, recipe.version);
            board.transition(&recipe.name, RecipeState::Installed);
            return Ok(CookResult {
                name: recipe.name.clone(),
                version: recipe.version.clone(),
                method: entry.method,
                keg: self.prefix.keg_path(&recipe.name, &recipe.version),
                skipped: true,
                log: String::new(),
                warnings: Vec::new(),
                caveats: recipe.caveats.clone(),
                build_dir: None,
                duration: Duration::ZERO,
            });
        }

        info!("Cooking {} {} ({})", recipe.name, recipe.version, entry.method);
        let started = Instant::now();
        let mut cook = match Cook::new(self, entry, abort) {
            Ok(cook) => cook,
            Err(e) => {
                board.transition(&recipe.name, RecipeState::Failed);
                return Err(e);
            }
        };

        match self.run_phases(&mut cook, recipe, board) {
            Ok(()) => {
                board.transition(&recipe.name, RecipeState::Installed);
                let result = cook.finish(started.elapsed());
                info!("Installed {} {} in {:?}", result.name, result.version, result.duration);
                Ok(result)
            }
            Err(e) => {
                board.transition(&recipe.name, RecipeState::Failed);
                if let Err(cleanup) = cook.discard() {
                    warn!("Failed to remove partial keg of {}: {}", recipe.name, cleanup);
                }
                Err(e)
            }
        }
    }

    fn run_phases(&self, cook: &mut Cook<'_>, recipe: &Recipe, board: &StatusBoard) -> Result<()> {
        board.transition(&recipe.name, RecipeState::Fetching);
        cook.fetch()?;
        board.transition(&recipe.name, RecipeState::Building);
        cook.build()?;
        board.transition(&recipe.name, RecipeState::Installing);
        cook.install()?;
        if !self.config.skip_tests && !recipe.test.is_empty() {
            board.transition(&recipe.name, RecipeState::Testing);
            cook.test()?;
        }
        cook.link()
    }

    /// Download and verify everything a build with `method` needs
    ///
    /// Returns the local paths: cached files, git mirrors and local patches.
    pub fn fetch(&self, recipe: &Recipe, method: BuildMethod) -> Result<Vec<PathBuf>> {
        let fetched = Fetched::fetch(self, recipe, method)?;
        let path_of = |source: FetchedSource| match source {
            FetchedSource::File { path, .. } => path,
            FetchedSource::Git { mirror, .. } => mirror,
        };

        let mut paths = vec![path_of(fetched.source)];
        paths.extend(fetched.resources.into_iter().map(|(_, r)| path_of(r)));
        paths.extend(fetched.patches.into_iter().map(|(p, _)| p));
        Ok(paths)
    }

    /// Whether every download for `method` is already in the cache
    pub fn sources_cached(&self, recipe: &Recipe, method: BuildMethod) -> bool {
        if method == BuildMethod::Bottle
            && let Some(bottle) = &recipe.bottle
        {
            return self.cache.is_cached(&bottle.checksum, &bottle.url);
        }

        let source = match recipe.source_for(method) {
            SourceLocator::Archive { url, checksum, .. } => self.cache.is_cached(checksum, url),
            SourceLocator::Git { .. } => {
                let key = match method {
                    BuildMethod::Head => format!("{}-head", recipe.name),
                    _ => recipe.name.clone(),
                };
                self.cache.git_path_for(&key).is_dir()
            }
        };

        source
            && recipe
                .resources
                .iter()
                .all(|r| self.cache.is_cached(&r.checksum, &r.url))
            && recipe.patches.iter().all(|p| match &p.location {
                PatchLocation::Remote { url, checksum } => self.cache.is_cached(checksum, url),
                PatchLocation::Local(path) => path.is_file(),
            })
    }

    /// Run a recipe's test steps against its installed keg
    ///
    /// Returns the captured step log.
    pub fn test(&self, recipe: &Recipe) -> Result<String> {
        let installed = self
            .prefix
            .installed(&recipe.name)
            .ok_or_else(|| Error::NotInstalled(recipe.name.clone()))?;

        if recipe.test.is_empty() {
            info!("{} has no test steps", recipe.name);
            return Ok(String::new());
        }

        let dir = tempfile::Builder::new()
            .prefix(&format!("larder-test-{}-", recipe.name))
            .tempdir()?;
        let testpath = dir.path().join("work");
        std::fs::create_dir_all(&testpath)?;

        let mut runner = StepRunner::new(self, recipe, BuildMethod::Source, &installed.path);
        runner.set_var("testpath", testpath.display().to_string());
        runner.set_var("buildpath", testpath.display().to_string());
        runner.run_all(StepPhase::Test, &recipe.test, &testpath, &dir.path().join("logs"))?;
        Ok(runner.into_log())
    }
}
