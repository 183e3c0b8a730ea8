// src/recipe/kitchen/keg.rs

//! Install prefix layout, kegs and install receipts
//!
//! ```text
//! <prefix>/
//!   kegs/<name>/<version>/        one keg per installed recipe
//!     .larder-receipt.json
//!   opt/<name> -> ../kegs/<name>/<version>
//!   bin/ sbin/ lib/ include/ share/ etc/   symlinks into kegs
//! ```

use crate::error::{Error, Result};
use crate::recipe::BuildMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Receipt file written into every completed keg
pub const RECEIPT_FILE: &str = ".larder-receipt.json";

/// Keg subdirectories linked into the shared prefix
pub const LINKED_DIRS: &[&str] = &["bin", "sbin", "lib", "include", "share", "etc"];

/// What was installed, how and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub name: String,
    pub version: String,
    /// `bottle`, `source` or `head`
    pub method: String,
    pub installed_on_request: bool,
    pub runtime_dependencies: Vec<String>,
    pub source_url: String,
    pub platform: String,
    pub installed_at: DateTime<Utc>,
    pub larder_version: String,
    /// Prefix-relative paths of the links created for this keg
    #[serde(default)]
    pub linked_files: Vec<String>,
}

impl Receipt {
    pub fn new(name: &str, version: &str, method: BuildMethod) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            method: method.to_string(),
            installed_on_request: false,
            runtime_dependencies: Vec::new(),
            source_url: String::new(),
            platform: String::new(),
            installed_at: Utc::now(),
            larder_version: env!("CARGO_PKG_VERSION").to_string(),
            linked_files: Vec::new(),
        }
    }

    pub fn load(keg: &Path) -> Result<Self> {
        let content = fs::read_to_string(keg.join(RECEIPT_FILE))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Archive(format!("Corrupt receipt in {}: {}", keg.display(), e)))
    }

    pub fn save(&self, keg: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Archive(format!("Failed to encode receipt: {}", e)))?;
        fs::write(keg.join(RECEIPT_FILE), json)?;
        Ok(())
    }
}

/// Outcome of linking a keg into the prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Prefix-relative paths now pointing into the keg
    pub linked: Vec<String>,
    /// Prefix-relative paths left alone because something else owns them
    pub conflicts: Vec<String>,
}

/// An installed recipe found in the prefix
#[derive(Debug, Clone)]
pub struct InstalledKeg {
    pub path: PathBuf,
    pub receipt: Receipt,
}

/// The shared install prefix
#[derive(Debug, Clone)]
pub struct Prefix {
    root: PathBuf,
}

impl Prefix {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the top-level directories
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.root.join("kegs"))?;
        fs::create_dir_all(self.root.join("opt"))?;
        Ok(())
    }

    pub fn bin(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join("kegs").join(name).join(version)
    }

    pub fn opt_path(&self, name: &str) -> PathBuf {
        self.root.join("opt").join(name)
    }

    /// Whether this exact version has a completed keg
    pub fn is_installed(&self, name: &str, version: &str) -> bool {
        self.keg_path(name, version).join(RECEIPT_FILE).is_file()
    }

    /// Find the installed keg of a recipe
    ///
    /// Prefers the keg `opt/<name>` points at, then the newest receipt.
    pub fn installed(&self, name: &str) -> Option<InstalledKeg> {
        if let Ok(target) = fs::canonicalize(self.opt_path(name))
            && let Ok(receipt) = Receipt::load(&target)
        {
            return Some(InstalledKeg {
                path: target,
                receipt,
            });
        }

        let versions = fs::read_dir(self.root.join("kegs").join(name)).ok()?;
        versions
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                Receipt::load(&path)
                    .ok()
                    .map(|receipt| InstalledKeg { path, receipt })
            })
            .max_by_key(|k| k.receipt.installed_at)
    }

    /// Start a fresh keg, clearing leftovers of an interrupted install
    pub fn create_keg(&self, name: &str, version: &str) -> Result<PathBuf> {
        let keg = self.keg_path(name, version);
        if keg.exists() {
            warn!("Removing incomplete keg {}", keg.display());
            fs::remove_dir_all(&keg)?;
        }
        fs::create_dir_all(&keg)?;
        Ok(keg)
    }

    /// Symlink the keg's public directories into the prefix
    ///
    /// Existing links owned by another version of the same recipe are
    /// replaced; anything else already present is left alone and reported.
    pub fn link(&self, name: &str, keg: &Path) -> Result<LinkReport> {
        let mut report = LinkReport::default();
        let own_kegs = self.root.join("kegs").join(name);

        for dir in LINKED_DIRS {
            let source_dir = keg.join(dir);
            if !source_dir.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&source_dir).min_depth(1) {
                let entry = entry.map_err(|e| Error::Io(e.into()))?;
                if entry.file_type().is_dir() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(keg)
                    .map_err(|e| Error::Archive(e.to_string()))?;
                let link = self.root.join(rel);

                if let Ok(existing) = fs::read_link(&link) {
                    if !existing.starts_with(&own_kegs) {
                        warn!(
                            "Not linking {}: already provided by {}",
                            link.display(),
                            existing.display()
                        );
                        report.conflicts.push(rel.to_string_lossy().into_owned());
                        continue;
                    }
                    fs::remove_file(&link)?;
                } else if link.exists() {
                    warn!("Not linking {}: file exists", link.display());
                    report.conflicts.push(rel.to_string_lossy().into_owned());
                    continue;
                }

                if let Some(parent) = link.parent() {
                    fs::create_dir_all(parent)?;
                }
                std::os::unix::fs::symlink(entry.path(), &link)?;
                report.linked.push(rel.to_string_lossy().into_owned());
            }
        }

        let opt = self.opt_path(name);
        if fs::symlink_metadata(&opt).is_ok() {
            fs::remove_file(&opt)?;
        }
        std::os::unix::fs::symlink(keg, &opt)?;

        debug!("Linked {} files for {}", report.linked.len(), name);
        Ok(report)
    }

    /// Remove a keg and every prefix link pointing into it
    pub fn remove_keg(&self, name: &str, keg: &Path) -> Result<()> {
        for dir in LINKED_DIRS.iter().chain(std::iter::once(&"opt")) {
            let top = self.root.join(dir);
            if !top.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&top).min_depth(1).into_iter().filter_map(|e| e.ok()) {
                if entry.path_is_symlink()
                    && let Ok(target) = fs::read_link(entry.path())
                    && target.starts_with(keg)
                {
                    fs::remove_file(entry.path())?;
                }
            }
        }

        if keg.exists() {
            info!("Removing keg {}", keg.display());
            fs::remove_dir_all(keg)?;
        }
        let parent = self.root.join("kegs").join(name);
        if fs::read_dir(&parent).map(|mut d| d.next().is_none()).unwrap_or(false) {
            fs::remove_dir(&parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keg_with_bin(prefix: &Prefix, name: &str, version: &str) -> PathBuf {
        let keg = prefix.create_keg(name, version).unwrap();
        fs::create_dir_all(keg.join("bin")).unwrap();
        fs::write(keg.join("bin").join(name), "#!/bin/sh\n").unwrap();
        fs::create_dir_all(keg.join("share/man/man1")).unwrap();
        fs::write(keg.join("share/man/man1").join(format!("{}.1", name)), "").unwrap();
        keg
    }

    #[test]
    fn test_receipt_round_trip_and_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = Prefix::new(tmp.path());
        prefix.ensure().unwrap();

        let keg = prefix.create_keg("jq", "1.7").unwrap();
        assert!(!prefix.is_installed("jq", "1.7"));

        let mut receipt = Receipt::new("jq", "1.7", BuildMethod::Source);
        receipt.runtime_dependencies = vec!["oniguruma".to_string()];
        receipt.save(&keg).unwrap();

        assert!(prefix.is_installed("jq", "1.7"));
        let installed = prefix.installed("jq").unwrap();
        assert_eq!(installed.receipt, receipt);
        assert_eq!(installed.receipt.method, "source");
        assert!(prefix.installed("nope").is_none());
    }

    #[test]
    fn test_link_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = Prefix::new(tmp.path());
        prefix.ensure().unwrap();
        let keg = keg_with_bin(&prefix, "jq", "1.7");

        let report = prefix.link("jq", &keg).unwrap();
        assert_eq!(report.linked, vec!["bin/jq", "share/man/man1/jq.1"]);
        assert!(report.conflicts.is_empty());
        assert_eq!(fs::read_link(tmp.path().join("bin/jq")).unwrap(), keg.join("bin/jq"));
        assert_eq!(fs::read_link(prefix.opt_path("jq")).unwrap(), keg);

        prefix.remove_keg("jq", &keg).unwrap();
        assert!(!keg.exists());
        assert!(fs::symlink_metadata(tmp.path().join("bin/jq")).is_err());
        assert!(fs::symlink_metadata(prefix.opt_path("jq")).is_err());
        assert!(!tmp.path().join("kegs/jq").exists());
    }

    #[test]
    fn test_link_does_not_steal_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = Prefix::new(tmp.path());
        prefix.ensure().unwrap();

        fs::create_dir_all(tmp.path().join("bin")).unwrap();
        fs::write(tmp.path().join("bin/jq"), "user file").unwrap();

        let keg = keg_with_bin(&prefix, "jq", "1.7");
        let report = prefix.link("jq", &keg).unwrap();
        assert_eq!(report.linked, vec!["share/man/man1/jq.1"]);
        assert_eq!(report.conflicts, vec!["bin/jq"]);
        assert_eq!(fs::read_to_string(tmp.path().join("bin/jq")).unwrap(), "user file");
    }

    #[test]
    fn test_relink_new_version() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = Prefix::new(tmp.path());
        prefix.ensure().unwrap();

        let old = keg_with_bin(&prefix, "jq", "1.6");
        prefix.link("jq", &old).unwrap();
        let new = keg_with_bin(&prefix, "jq", "1.7");
        prefix.link("jq", &new).unwrap();

        assert_eq!(fs::read_link(tmp.path().join("bin/jq")).unwrap(), new.join("bin/jq"));
        assert_eq!(fs::read_link(prefix.opt_path("jq")).unwrap(), new);
    }
}
