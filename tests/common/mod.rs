// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! Everything lives under one TempDir: recipe files, local sources served
//! over `file://`, the install prefix, the download cache and build roots.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use larder::hash::{HashAlgorithm, hash_bytes};
use larder::{Kitchen, KitchenConfig, Platform, RecipeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A local source file and the values a recipe needs to reference it
pub struct Source {
    pub url: String,
    pub checksum: String,
}

pub struct Fixture {
    pub tmp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        for dir in ["recipes", "sources", "build", "marks"] {
            fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        Self { tmp }
    }

    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    pub fn recipes_dir(&self) -> PathBuf {
        self.path().join("recipes")
    }

    pub fn prefix(&self) -> PathBuf {
        self.path().join("prefix")
    }

    pub fn build_root(&self) -> PathBuf {
        self.path().join("build")
    }

    /// Directory steps touch files in, to prove they ran
    pub fn marks(&self) -> PathBuf {
        self.path().join("marks")
    }

    /// Write a plain source file
    pub fn source(&self, filename: &str, content: &str) -> Source {
        let path = self.path().join("sources").join(filename);
        fs::write(&path, content).unwrap();
        Source {
            url: format!("file://{}", path.display()),
            checksum: sha256_of(content.as_bytes()),
        }
    }

    /// Write a `.tar.gz` whose entries are `(path, content)`
    pub fn tarball(&self, filename: &str, files: &[(&str, &str)]) -> Source {
        let path = self.path().join("sources").join(filename);
        let encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        Source {
            url: format!("file://{}", path.display()),
            checksum: sha256_of(&fs::read(&path).unwrap()),
        }
    }

    pub fn write_recipe(&self, name: &str, content: &str) {
        fs::write(self.recipes_dir().join(format!("{}.toml", name)), content).unwrap();
    }

    pub fn load(&self) -> RecipeSet {
        RecipeSet::load_dir(&self.recipes_dir(), Platform::detect()).unwrap()
    }

    pub fn config(&self) -> KitchenConfig {
        KitchenConfig {
            prefix: self.prefix(),
            source_cache: self.path().join("cache"),
            build_root: Some(self.build_root()),
            timeout: Duration::from_secs(30),
            jobs: 2,
            workers: 1,
            keep_builddir: false,
            skip_tests: false,
            fetch_retries: 1,
        }
    }

    pub fn kitchen(&self) -> Kitchen {
        Kitchen::new(self.config()).unwrap()
    }

    /// Entries left under the build root
    pub fn build_dirs(&self) -> usize {
        fs::read_dir(self.build_root()).unwrap().count()
    }

    pub fn keg(&self, name: &str) -> PathBuf {
        self.prefix().join("kegs").join(name).join("1.0")
    }

    /// Lines appended to `marks/order` by steps, in execution order
    pub fn order(&self) -> Vec<String> {
        fs::read_to_string(self.marks().join("order"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }
}

pub fn sha256_of(data: &[u8]) -> String {
    format!("sha256:{}", hash_bytes(HashAlgorithm::Sha256, data))
}

/// A version-1.0 recipe with runtime dependencies and install steps
///
/// Steps are written as TOML literal strings, so they must not contain `'`.
pub fn recipe_toml<S: AsRef<str>>(
    name: &str,
    source: &Source,
    runtime: &[&str],
    install: &[S],
) -> String {
    let deps = runtime
        .iter()
        .map(|d| format!("\"{}\"", d))
        .collect::<Vec<_>>()
        .join(", ");
    let steps = install
        .iter()
        .map(|s| format!("  '{}',", s.as_ref()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"[package]
name = "{name}"
version = "1.0"
description = "Test recipe {name}"
license = "MIT"

[source]
url = "{url}"
checksum = "{checksum}"

[dependencies]
runtime = [{deps}]

[build]
install = [
{steps}
]
"#,
        name = name,
        url = source.url,
        checksum = source.checksum,
        deps = deps,
        steps = steps,
    )
}

/// Install step that records the recipe in `marks/order` and installs a
/// script into the keg's bin
pub fn record_and_install(fixture: &Fixture, name: &str) -> Vec<String> {
    vec![
        format!("echo {} >> {}/order", name, fixture.marks().display()),
        "mkdir -p %(bin)s".to_string(),
        format!("printf \"#!/bin/sh\\necho {}\\n\" > %(bin)s/{}", name, name),
        format!("chmod +x %(bin)s/{}", name),
    ]
}

/// `path` written relative to the current directory, through `..` up to `/`
pub fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let mut relative = PathBuf::new();
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.join(path.strip_prefix("/").unwrap())
}
