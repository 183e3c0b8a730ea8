// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files. The on-disk sections ([`RecipeFile`] and friends)
//! are deserialized first; the parser then resolves them for one target
//! platform into an immutable [`Recipe`].

use crate::error::{Error, Result};
use crate::hash::Checksum;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use strum_macros::{AsRefStr, Display};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\(([A-Za-z0-9_:@.+-]+)\)s").expect("placeholder regex"));

static VERSION_IN_STEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[-_])[vV]?(\d+(?:\.\d+)*(?:[-_.]?(?:alpha|beta|rc|pre)\d*)?)$")
        .expect("version regex")
});

const ARCHIVE_EXTENSIONS: &[&str] = &[
    ".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".tbz2", ".tar.zst", ".tar", ".zip",
    ".gz", ".xz",
];

// =============================================================================
// On-disk sections
// =============================================================================

/// `[package]`: recipe metadata
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    #[serde(default)]
    pub name: Option<String>,
    /// Detected from the source URL when omitted
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,
    /// Text shown to the user after install
    #[serde(default)]
    pub caveats: Option<String>,
}

/// `[source]`: either an archive (`url` + `checksum`) or a git checkout
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub mirrors: Vec<String>,
    #[serde(default)]
    pub git: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
}

/// `[head]`: build from the development branch instead of a release
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub git: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    /// Extra dependencies needed only for head builds
    #[serde(default)]
    pub dependencies: DependencySection,
}

impl HeadSection {
    pub fn as_source(&self) -> SourceSection {
        SourceSection {
            url: self.url.clone(),
            checksum: self.checksum.clone(),
            mirrors: Vec::new(),
            git: self.git.clone(),
            branch: self.branch.clone(),
            tag: self.tag.clone(),
            revision: self.revision.clone(),
        }
    }
}

/// `[dependencies]`: recipe names, split by phase
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySection {
    /// Needed only while building
    #[serde(default)]
    pub build: Vec<String>,
    /// Needed at build time and by the installed package
    #[serde(default)]
    pub runtime: Vec<String>,
}

/// `[build]`: how to install
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Configure flags, available to steps as `%(flags)s`
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Parallel make jobs (default: kitchen setting)
    #[serde(default)]
    pub jobs: Option<u32>,
    #[serde(default)]
    pub install: Vec<StepSpec>,
}

/// `[test]`: smoke tests run after install
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSection {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// `[target.<selector>]`: platform-conditional additions
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
    #[serde(default)]
    pub dependencies: DependencySection,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// `[[resource]]`: an additional checksummed download staged next to the source
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSection {
    pub name: String,
    pub url: String,
    pub checksum: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
}

/// `[[patch]]`: a patch applied to the unpacked source
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSection {
    /// Patch URL or path relative to the recipe file
    pub file: String,
    /// Required for remote patches
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default = "default_strip")]
    pub strip: u32,
}

fn default_strip() -> u32 {
    1
}

/// `[[bottle]]`: a precompiled artifact for one platform
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BottleSection {
    pub platform: String,
    pub url: String,
    pub checksum: String,
}

/// A step as written: a bare command or a table
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    Command(String),
    Detailed(StepTable),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepTable {
    pub run: String,
    #[serde(default)]
    pub expect_status: Option<i32>,
    #[serde(default)]
    pub expect_output: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Directory relative to the build (or test) directory
    #[serde(default)]
    pub workdir: Option<String>,
    /// Run with `MAKEFLAGS=-j1`
    #[serde(default)]
    pub serial: bool,
}

impl From<StepSpec> for Step {
    fn from(spec: StepSpec) -> Self {
        match spec {
            StepSpec::Command(run) => Step::new(run),
            StepSpec::Detailed(table) => Step {
                run: table.run,
                expect_status: table.expect_status.unwrap_or(0),
                expect_output: table.expect_output,
                environment: table.environment,
                workdir: table.workdir,
                serial: table.serial,
            },
        }
    }
}

/// A whole recipe file, section by section
#[derive(Debug, Clone, Default)]
pub struct RecipeFile {
    pub package: PackageSection,
    pub source: Option<SourceSection>,
    pub head: Option<HeadSection>,
    pub dependencies: DependencySection,
    pub build: BuildSection,
    pub test: TestSection,
    pub target: BTreeMap<String, TargetSection>,
    pub resource: Vec<ResourceSection>,
    pub patch: Vec<PatchSection>,
    pub bottle: Vec<BottleSection>,
    pub variables: BTreeMap<String, String>,
}

impl RecipeFile {
    const SECTIONS: &'static [&'static str] = &[
        "package",
        "source",
        "head",
        "dependencies",
        "build",
        "test",
        "target",
        "resource",
        "patch",
        "bottle",
        "variables",
    ];

    /// Deserialize a recipe section by section
    ///
    /// Errors name the section (or `target.<key>`) that failed to deserialize.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut table: toml::Table = content
            .parse()
            .map_err(|e: toml::de::Error| Error::parse("recipe", e.message()))?;

        if let Some(unknown) = table.keys().find(|k| !Self::SECTIONS.contains(&k.as_str())) {
            return Err(Error::parse(unknown.as_str(), "unknown section"));
        }

        let mut file = RecipeFile {
            package: take_section(&mut table, "package")?.unwrap_or_default(),
            source: take_section(&mut table, "source")?,
            head: take_section(&mut table, "head")?,
            dependencies: take_section(&mut table, "dependencies")?.unwrap_or_default(),
            build: take_section(&mut table, "build")?.unwrap_or_default(),
            test: take_section(&mut table, "test")?.unwrap_or_default(),
            resource: take_section(&mut table, "resource")?.unwrap_or_default(),
            patch: take_section(&mut table, "patch")?.unwrap_or_default(),
            bottle: take_section(&mut table, "bottle")?.unwrap_or_default(),
            variables: take_section(&mut table, "variables")?.unwrap_or_default(),
            ..Default::default()
        };

        if let Some(targets) = table.remove("target") {
            let targets = match targets {
                toml::Value::Table(t) => t,
                _ => return Err(Error::parse("target", "expected a table of platform sections")),
            };
            for (key, value) in targets {
                let field = format!("target.{}", key);
                let section: TargetSection = value
                    .try_into()
                    .map_err(|e: toml::de::Error| Error::parse(&field, e.message()))?;
                file.target.insert(key, section);
            }
        }

        Ok(file)
    }
}

fn take_section<T: DeserializeOwned>(table: &mut toml::Table, name: &str) -> Result<Option<T>> {
    let Some(value) = table.remove(name) else {
        return Ok(None);
    };
    match value.clone().try_into::<T>() {
        Ok(section) => Ok(Some(section)),
        Err(e) => Err(locate_error::<T>(name, value, e)),
    }
}

/// Narrow a section error down to the offending key
///
/// Table sections have only optional keys, so a table holding just one key
/// deserializes exactly when that key is valid. Arrays of tables are labelled
/// by element index.
fn locate_error<T: DeserializeOwned>(name: &str, value: toml::Value, err: toml::de::Error) -> Error {
    match value {
        toml::Value::Table(section) => {
            for (key, item) in section {
                let single = toml::Table::from_iter([(key.clone(), item)]);
                if let Err(e) = toml::Value::Table(single).try_into::<T>() {
                    return Error::parse(format!("{}.{}", name, key), e.message());
                }
            }
            Error::parse(name, err.message())
        }
        toml::Value::Array(items) => {
            for (i, item) in items.into_iter().enumerate() {
                if let Err(e) = toml::Value::Array(vec![item]).try_into::<T>() {
                    return Error::parse(format!("{}[{}]", name, i), e.message());
                }
            }
            Error::parse(name, err.message())
        }
        _ => Error::parse(name, err.message()),
    }
}

// =============================================================================
// Resolved recipe
// =============================================================================

/// Whether a dependency is needed only to build or also at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum DependencyPhase {
    Build,
    Runtime,
}

/// A declared dependency on another recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub phase: DependencyPhase,
}

impl Dependency {
    pub fn new(name: impl Into<String>, phase: DependencyPhase) -> Self {
        Self {
            name: name.into(),
            phase,
        }
    }
}

/// Reference to check out from a git repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitReference {
    DefaultBranch,
    Branch(String),
    Tag(String),
    Revision(String),
}

/// Where the source comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Archive {
        url: String,
        checksum: Checksum,
        mirrors: Vec<String>,
    },
    Git {
        url: String,
        reference: GitReference,
    },
}

impl SourceLocator {
    /// Primary URL of the source
    pub fn url(&self) -> &str {
        match self {
            SourceLocator::Archive { url, .. } | SourceLocator::Git { url, .. } => url,
        }
    }

    pub fn is_git(&self) -> bool {
        matches!(self, SourceLocator::Git { .. })
    }
}

/// The development-branch source and its extra dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadSource {
    pub source: SourceLocator,
    pub dependencies: Vec<Dependency>,
}

/// An extra download staged into the build directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub url: String,
    pub checksum: Checksum,
    pub mirrors: Vec<String>,
}

/// Where a patch comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchLocation {
    Remote { url: String, checksum: Checksum },
    Local(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    pub location: PatchLocation,
    pub strip: u32,
}

/// Precompiled artifact selected for the load platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bottle {
    pub url: String,
    pub checksum: Checksum,
}

/// One shell step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Command line run through `sh -c`, with `%(var)s` placeholders
    pub run: String,
    pub expect_status: i32,
    /// Substrings that must appear in the combined output
    pub expect_output: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub workdir: Option<String>,
    pub serial: bool,
}

impl Step {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            expect_status: 0,
            expect_output: Vec::new(),
            environment: BTreeMap::new(),
            workdir: None,
            serial: false,
        }
    }
}

/// How a planned recipe gets into its keg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum BuildMethod {
    /// Pour the precompiled bottle; install steps are skipped
    Bottle,
    /// Build the release source
    Source,
    /// Build the development-branch source
    Head,
}

/// A recipe resolved for one platform
///
/// Recipes are built once by the parser and only shared by reference after
/// that; nothing in the crate mutates a loaded recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub license: Option<String>,
    pub caveats: Option<String>,
    pub source: SourceLocator,
    pub head: Option<HeadSource>,
    pub resources: Vec<Resource>,
    pub patches: Vec<PatchInfo>,
    /// In declaration order: build, runtime, then platform-specific
    pub dependencies: Vec<Dependency>,
    pub flags: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub jobs: Option<u32>,
    pub install: Vec<Step>,
    pub test: Vec<Step>,
    pub bottle: Option<Bottle>,
    pub variables: BTreeMap<String, String>,
}

impl Recipe {
    /// Dependencies that must be installed before building with `method`
    pub fn dependencies_for(&self, method: BuildMethod) -> Vec<&Dependency> {
        let mut deps: Vec<&Dependency> = match method {
            BuildMethod::Bottle => self
                .dependencies
                .iter()
                .filter(|d| d.phase == DependencyPhase::Runtime)
                .collect(),
            BuildMethod::Source | BuildMethod::Head => self.dependencies.iter().collect(),
        };
        if method == BuildMethod::Head
            && let Some(head) = &self.head
        {
            for dep in &head.dependencies {
                if !deps.iter().any(|d| d.name == dep.name) {
                    deps.push(dep);
                }
            }
        }
        deps
    }

    /// Runtime dependency names, recorded in the install receipt
    pub fn runtime_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|d| d.phase == DependencyPhase::Runtime)
            .map(|d| d.name.as_str())
            .collect()
    }

    /// The source used for a build method
    pub fn source_for(&self, method: BuildMethod) -> &SourceLocator {
        match (method, &self.head) {
            (BuildMethod::Head, Some(head)) => &head.source,
            _ => &self.source,
        }
    }

    /// Substitute `%(var)s` placeholders
    ///
    /// `context` supplies execution-time values (prefix, buildpath, ...).
    /// Name, version and context values take precedence over the recipe's
    /// own `[variables]`, which may themselves reference them. Unknown
    /// placeholders are left untouched.
    pub fn substitute(&self, template: &str, context: &BTreeMap<String, String>) -> String {
        let mut vars = context.clone();
        vars.insert("name".to_string(), self.name.clone());
        vars.insert("version".to_string(), self.version.clone());

        for (key, value) in &self.variables {
            if !vars.contains_key(key) {
                let expanded = expand_placeholders(value, &vars);
                vars.insert(key.clone(), expanded);
            }
        }

        expand_placeholders(template, &vars)
    }
}

/// Replace every known `%(key)s` in `template`
pub fn expand_placeholders(template: &str, vars: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Last path segment of a URL, without query or fragment
pub fn url_filename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("source")
        .to_string()
}

/// Detect a version string from an archive URL
///
/// `tcpdump-4.99.1.tar.gz` → `4.99.1`, `v2024.6.0.tar.gz` → `2024.6.0`.
pub fn detect_version(url: &str) -> Option<String> {
    let filename = url_filename(url);
    let stem = ARCHIVE_EXTENSIONS
        .iter()
        .find_map(|ext| filename.strip_suffix(ext))
        .unwrap_or(&filename);

    VERSION_IN_STEM
        .captures(stem)
        .map(|caps| caps[1].to_string())
}
