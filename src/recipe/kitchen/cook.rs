// src/recipe/kitchen/cook.rs

//! Cook: fetch, build, install and test a single planned recipe

use super::Kitchen;
use super::archive::{apply_patch, copy_tree, source_root, stage_file};
use super::config::CookResult;
use super::fetch::{checkout_git, update_git_mirror};
use super::keg::Receipt;
use super::status::AbortHandle;
use super::steps::StepRunner;
use crate::error::{Error, Result, StepPhase};
use crate::platform::Platform;
use crate::recipe::format::{GitReference, PatchLocation, SourceLocator, url_filename};
use crate::recipe::{BuildMethod, Recipe};
use crate::resolver::PlannedRecipe;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// A source that is available locally
#[derive(Debug, Clone)]
pub(super) enum FetchedSource {
    /// Verified file in the download cache
    File { path: PathBuf, filename: String },
    /// Bare mirror of a git repository
    Git {
        mirror: PathBuf,
        reference: GitReference,
    },
}

/// Everything a build needs, in the local cache
#[derive(Debug, Clone)]
pub(super) struct Fetched {
    pub(super) source: FetchedSource,
    pub(super) resources: Vec<(String, FetchedSource)>,
    pub(super) patches: Vec<(PathBuf, u32)>,
}

impl Fetched {
    /// Download and verify the sources a build with `method` needs
    ///
    /// Bottles need only the bottle itself.
    pub(super) fn fetch(kitchen: &Kitchen, recipe: &Recipe, method: BuildMethod) -> Result<Self> {
        if method == BuildMethod::Bottle
            && let Some(bottle) = &recipe.bottle
        {
            let path = kitchen.cache.fetch_verified(
                kitchen.fetcher.as_ref(),
                &recipe.name,
                &bottle.url,
                &[],
                &bottle.checksum,
            )?;
            return Ok(Self {
                source: FetchedSource::File {
                    path,
                    filename: url_filename(&bottle.url),
                },
                resources: Vec::new(),
                patches: Vec::new(),
            });
        }

        let source = fetch_locator(kitchen, recipe, method, recipe.source_for(method))?;

        let mut resources = Vec::with_capacity(recipe.resources.len());
        for resource in &recipe.resources {
            let path = kitchen.cache.fetch_verified(
                kitchen.fetcher.as_ref(),
                &recipe.name,
                &resource.url,
                &resource.mirrors,
                &resource.checksum,
            )?;
            resources.push((
                resource.name.clone(),
                FetchedSource::File {
                    path,
                    filename: url_filename(&resource.url),
                },
            ));
        }

        let mut patches = Vec::with_capacity(recipe.patches.len());
        for patch in &recipe.patches {
            let path = match &patch.location {
                PatchLocation::Remote { url, checksum } => kitchen.cache.fetch_verified(
                    kitchen.fetcher.as_ref(),
                    &recipe.name,
                    url,
                    &[],
                    checksum,
                )?,
                PatchLocation::Local(path) => {
                    if !path.is_file() {
                        return Err(Error::Download(format!(
                            "Patch for {} not found: {}",
                            recipe.name,
                            path.display()
                        )));
                    }
                    path.clone()
                }
            };
            patches.push((path, patch.strip));
        }

        Ok(Self {
            source,
            resources,
            patches,
        })
    }
}

fn fetch_locator(
    kitchen: &Kitchen,
    recipe: &Recipe,
    method: BuildMethod,
    locator: &SourceLocator,
) -> Result<FetchedSource> {
    match locator {
        SourceLocator::Archive {
            url,
            checksum,
            mirrors,
        } => {
            let path = kitchen.cache.fetch_verified(
                kitchen.fetcher.as_ref(),
                &recipe.name,
                url,
                mirrors,
                checksum,
            )?;
            Ok(FetchedSource::File {
                path,
                filename: url_filename(url),
            })
        }
        SourceLocator::Git { url, reference } => {
            let key = match method {
                BuildMethod::Head => format!("{}-head", recipe.name),
                _ => recipe.name.clone(),
            };
            let mirror = kitchen.cache.git_path_for(&key);
            update_git_mirror(url, &mirror)?;
            Ok(FetchedSource::Git {
                mirror,
                reference: reference.clone(),
            })
        }
    }
}

/// Scoped working directory of one cook
enum BuildDir {
    /// Removed when the cook is dropped
    Scoped(TempDir),
    /// Left behind for inspection (`keep_builddir`)
    Kept(PathBuf),
}

impl BuildDir {
    fn path(&self) -> &Path {
        match self {
            BuildDir::Scoped(dir) => dir.path(),
            BuildDir::Kept(path) => path,
        }
    }
}

/// A single cook operation
pub(super) struct Cook<'a> {
    kitchen: &'a Kitchen,
    recipe: &'a Recipe,
    method: BuildMethod,
    requested: bool,
    abort: &'a AbortHandle,
    build_dir: BuildDir,
    /// Where install steps run; set once the source is unpacked
    source_dir: PathBuf,
    keg: PathBuf,
    /// Whether this cook created the keg (and so owns cleanup)
    keg_created: bool,
    fetched: Option<Fetched>,
    resource_dirs: Vec<(String, PathBuf)>,
    log: String,
    warnings: Vec<String>,
}

impl<'a> Cook<'a> {
    pub(super) fn new(
        kitchen: &'a Kitchen,
        entry: &PlannedRecipe<'a>,
        abort: &'a AbortHandle,
    ) -> Result<Self> {
        let recipe = entry.recipe;
        let prefix = format!("larder-{}-", recipe.name);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &kitchen.config.build_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let build_dir = if kitchen.config.keep_builddir {
            BuildDir::Kept(dir.keep())
        } else {
            BuildDir::Scoped(dir)
        };
        debug!("Build directory for {}: {}", recipe.name, build_dir.path().display());

        let source_dir = build_dir.path().join("source");
        Ok(Self {
            kitchen,
            recipe,
            method: entry.method,
            requested: entry.requested,
            abort,
            source_dir,
            build_dir,
            keg: kitchen.prefix.keg_path(&recipe.name, &recipe.version),
            keg_created: false,
            fetched: None,
            resource_dirs: Vec::new(),
            log: String::new(),
            warnings: Vec::new(),
        })
    }

    fn check_abort(&self, stage: &str) -> Result<()> {
        if self.abort.is_aborted() {
            return Err(Error::Aborted {
                recipe: self.recipe.name.clone(),
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    /// Phase 1: fetch and verify everything into the source cache
    pub(super) fn fetch(&mut self) -> Result<()> {
        self.check_abort("fetching")?;
        let fetched = Fetched::fetch(self.kitchen, self.recipe, self.method)?;
        self.log_line(&format!("Fetched {} ({})", self.recipe.name, self.method));
        self.fetched = Some(fetched);
        Ok(())
    }

    /// Phase 2: unpack, stage resources and patch; bottles are poured here
    pub(super) fn build(&mut self) -> Result<()> {
        self.check_abort("building")?;
        let fetched = self
            .fetched
            .clone()
            .ok_or_else(|| Error::Archive(format!("{}: build before fetch", self.recipe.name)))?;

        if self.method == BuildMethod::Bottle {
            return self.pour(&fetched.source);
        }

        let staging = self.build_dir.path().join("source");
        self.source_dir = unpack(&fetched.source, &staging)?;
        self.log_line(&format!("Unpacked source into {}", self.source_dir.display()));

        for (name, resource) in &fetched.resources {
            let dest = self.build_dir.path().join("resources").join(name);
            let root = unpack(resource, &dest)?;
            self.log_line(&format!("Staged resource {} into {}", name, root.display()));
            self.resource_dirs.push((name.clone(), root));
        }

        for (patch, strip) in &fetched.patches {
            info!("Applying patch {} to {}", patch.display(), self.recipe.name);
            apply_patch(&self.source_dir, patch, *strip)?;
            self.log_line(&format!("Applied patch {}", patch.display()));
        }
        Ok(())
    }

    fn pour(&mut self, bottle: &FetchedSource) -> Result<()> {
        let staging = self.build_dir.path().join("bottle");
        unpack(bottle, &staging)?;

        // Bottles carry `<name>/<version>/` at the top
        let nested = staging.join(&self.recipe.name).join(&self.recipe.version);
        let root = if nested.is_dir() {
            nested
        } else {
            source_root(&staging)?
        };

        self.keg = self
            .kitchen
            .prefix
            .create_keg(&self.recipe.name, &self.recipe.version)?;
        self.keg_created = true;
        let copied = copy_tree(&root, &self.keg)?;
        info!("Poured bottle for {} ({} files)", self.recipe.name, copied);
        self.log_line(&format!("Poured {} files into {}", copied, self.keg.display()));
        Ok(())
    }

    fn runner(&self) -> StepRunner<'a> {
        let mut runner = StepRunner::new(self.kitchen, self.recipe, self.method, &self.keg)
            .with_abort(self.abort);
        runner.set_var("buildpath", self.source_dir.display().to_string());
        for (name, dir) in &self.resource_dirs {
            runner.set_var(format!("resource:{}", name), dir.display().to_string());
        }
        runner
    }

    /// Phase 3: run install steps into a fresh keg
    pub(super) fn install(&mut self) -> Result<()> {
        if self.method != BuildMethod::Bottle {
            self.keg = self
                .kitchen
                .prefix
                .create_keg(&self.recipe.name, &self.recipe.version)?;
            self.keg_created = true;

            let mut runner = self.runner();
            let logs = self.build_dir.path().join("logs");
            let outcome = runner.run_all(
                StepPhase::Install,
                &self.recipe.install,
                &self.source_dir,
                &logs,
            );
            self.log.push_str(&runner.into_log());
            outcome?;
        }
        Ok(())
    }

    /// Last phase: write the receipt and link the keg into the prefix
    ///
    /// Runs after the tests, so a failing build never touches the links of
    /// an installed version.
    pub(super) fn link(&mut self) -> Result<()> {
        self.check_abort("linking")?;
        let mut receipt = Receipt::new(&self.recipe.name, &self.recipe.version, self.method);
        receipt.installed_on_request = self.requested;
        receipt.runtime_dependencies = self
            .recipe
            .runtime_dependencies()
            .into_iter()
            .map(String::from)
            .collect();
        receipt.source_url = match (&self.method, &self.recipe.bottle) {
            (BuildMethod::Bottle, Some(bottle)) => bottle.url.clone(),
            _ => self.recipe.source_for(self.method).url().to_string(),
        };
        receipt.platform = Platform::detect().to_string();
        let links = self.kitchen.prefix.link(&self.recipe.name, &self.keg)?;
        for conflict in &links.conflicts {
            self.warnings.push(format!("{} was not linked: already exists", conflict));
        }
        receipt.linked_files = links.linked;
        receipt.save(&self.keg)?;

        self.log_line(&format!(
            "Installed {} {} into {} ({} links)",
            self.recipe.name,
            self.recipe.version,
            self.keg.display(),
            receipt.linked_files.len()
        ));
        Ok(())
    }

    /// Phase 4: run test steps in a scoped test directory
    pub(super) fn test(&mut self) -> Result<()> {
        let testpath = tempfile::Builder::new()
            .prefix("test-")
            .tempdir_in(self.build_dir.path())?;
        let mut runner = self.runner();
        runner.set_var("testpath", testpath.path().display().to_string());

        let logs = self.build_dir.path().join("logs");
        let outcome = runner.run_all(StepPhase::Test, &self.recipe.test, testpath.path(), &logs);
        self.log.push_str(&runner.into_log());
        outcome
    }

    /// Remove a keg left incomplete by a failed cook and relink the
    /// version that was installed before it
    pub(super) fn discard(&self) -> Result<()> {
        if !self.keg_created {
            return Ok(());
        }
        let prefix = &self.kitchen.prefix;
        prefix.remove_keg(&self.recipe.name, &self.keg)?;

        if let Some(previous) = prefix.installed(&self.recipe.name) {
            info!(
                "Restoring {} {} links",
                self.recipe.name, previous.receipt.version
            );
            prefix.link(&self.recipe.name, &previous.path)?;
        }
        Ok(())
    }

    /// Turn the finished cook into its result; a scoped build directory is
    /// removed here
    pub(super) fn finish(self, duration: Duration) -> CookResult {
        let build_dir = match &self.build_dir {
            BuildDir::Kept(path) => Some(path.clone()),
            BuildDir::Scoped(_) => None,
        };
        CookResult {
            name: self.recipe.name.clone(),
            version: self.recipe.version.clone(),
            method: self.method,
            keg: self.keg,
            skipped: false,
            log: self.log,
            warnings: self.warnings,
            caveats: self.recipe.caveats.clone(),
            build_dir,
            duration,
        }
    }

    fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }
}

/// Put a fetched source into `dest`; returns the directory steps run in
fn unpack(source: &FetchedSource, dest: &Path) -> Result<PathBuf> {
    match source {
        FetchedSource::File { path, filename } => {
            stage_file(path, filename, dest)?;
            source_root(dest)
        }
        FetchedSource::Git { mirror, reference } => {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            checkout_git(mirror, reference, dest)?;
            Ok(dest.to_path_buf())
        }
    }
}
