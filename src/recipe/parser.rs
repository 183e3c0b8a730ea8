// src/recipe/parser.rs

//! Recipe file parsing
//!
//! Turns recipe TOML into a [`Recipe`] resolved for one [`Platform`]:
//! target sections are merged, the bottle is selected and URLs are expanded.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::platform::{Platform, TargetSelector};
use crate::recipe::format::{
    Bottle, BottleSection, Dependency, DependencyPhase, DependencySection, GitReference,
    HeadSource, PatchInfo, PatchLocation, Recipe, RecipeFile, Resource, SourceLocator,
    SourceSection, Step, StepSpec, detect_version, expand_placeholders,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Version used when none is declared or detectable
pub const UNVERSIONED: &str = "unversioned";

/// Parse a recipe from a TOML string
///
/// Relative local patch paths resolve against the current directory; use
/// [`parse_recipe_file`] to resolve them against the recipe's own directory.
pub fn parse_recipe(content: &str, platform: &Platform) -> Result<Recipe> {
    resolve_recipe(RecipeFile::from_toml(content)?, platform, None)
}

/// Parse a recipe from a file
pub fn parse_recipe_file(path: &Path, platform: &Platform) -> Result<Recipe> {
    let content = std::fs::read_to_string(path)?;
    let file = RecipeFile::from_toml(&content)?;
    resolve_recipe(file, platform, path.parent())
}

/// Validate a recipe for completeness
///
/// Returns non-fatal warnings; anything fatal was already rejected by the parser.
pub fn validate_recipe(recipe: &Recipe) -> Vec<String> {
    let mut warnings = Vec::new();

    if recipe.description.is_none() {
        warnings.push("Missing package description".to_string());
    }
    if recipe.license.is_none() {
        warnings.push("Missing package license".to_string());
    }
    if recipe.install.is_empty() && recipe.bottle.is_none() {
        warnings.push("No install steps and no bottle for this platform".to_string());
    }
    if recipe.test.is_empty() {
        warnings.push("No test steps".to_string());
    }
    if recipe.version == UNVERSIONED {
        warnings.push("Version could not be determined".to_string());
    }
    if recipe.source.url().starts_with("http://") {
        warnings.push(format!("Source uses plain http: {}", recipe.source.url()));
    }

    warnings
}

fn resolve_recipe(file: RecipeFile, platform: &Platform, base_dir: Option<&Path>) -> Result<Recipe> {
    let name = match file.package.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(Error::parse("package.name", "required")),
    };
    if name.contains(['/', '\\']) || name.chars().any(char::is_whitespace) {
        return Err(Error::parse(
            "package.name",
            format!("'{}' must not contain slashes or whitespace", name),
        ));
    }

    let source = file
        .source
        .as_ref()
        .ok_or_else(|| Error::parse("source", "required (url + checksum, or git)"))?;

    let version = resolve_version(&file, source)?;

    // Name, version and custom variables are known now; later placeholders
    // (prefix, buildpath, ...) stay in steps until execution.
    let mut vars = BTreeMap::from([
        ("name".to_string(), name.clone()),
        ("version".to_string(), version.clone()),
    ]);
    for (key, value) in &file.variables {
        if !vars.contains_key(key) {
            let expanded = expand_placeholders(value, &vars);
            vars.insert(key.clone(), expanded);
        }
    }

    let source_locator = resolve_source(source, "source", &vars)?;

    let head = match &file.head {
        Some(head) => Some(HeadSource {
            source: resolve_source(&head.as_source(), "head", &vars)?,
            dependencies: flatten_dependencies(&head.dependencies),
        }),
        None => None,
    };

    let mut dependencies = flatten_dependencies(&file.dependencies);
    let mut flags = file.build.flags.clone();
    let mut environment = file.build.environment.clone();

    for (key, section) in &file.target {
        let selector: TargetSelector = key
            .parse()
            .map_err(|e: String| Error::parse(format!("target.{}", key), e))?;
        if !selector.matches(platform) {
            debug!("{}: skipping [target.{}] on {}", name, key, platform);
            continue;
        }
        debug!("{}: applying [target.{}]", name, key);
        for dep in flatten_dependencies(&section.dependencies) {
            merge_dependency(&mut dependencies, dep);
        }
        flags.extend(section.flags.iter().cloned());
        environment.extend(section.environment.clone());
    }

    if dependencies.iter().any(|d| d.name == name) {
        return Err(Error::parse("dependencies", format!("'{}' depends on itself", name)));
    }

    if file.build.jobs == Some(0) {
        return Err(Error::parse("build.jobs", "must be at least 1"));
    }

    let mut resources: Vec<Resource> = Vec::with_capacity(file.resource.len());
    for (i, res) in file.resource.iter().enumerate() {
        if resources.iter().any(|r| r.name == res.name) {
            return Err(Error::parse(
                format!("resource[{}].name", i),
                format!("duplicate resource '{}'", res.name),
            ));
        }
        resources.push(Resource {
            name: res.name.clone(),
            url: expand_placeholders(&res.url, &vars),
            checksum: parse_checksum(&res.checksum, &format!("resource[{}].checksum", i))?,
            mirrors: res
                .mirrors
                .iter()
                .map(|m| expand_placeholders(m, &vars))
                .collect(),
        });
    }

    let mut patches = Vec::with_capacity(file.patch.len());
    for (i, patch) in file.patch.iter().enumerate() {
        let location = if is_remote(&patch.file) {
            let checksum = patch.checksum.as_deref().ok_or_else(|| {
                Error::parse(format!("patch[{}].checksum", i), "required for remote patches")
            })?;
            PatchLocation::Remote {
                url: expand_placeholders(&patch.file, &vars),
                checksum: parse_checksum(checksum, &format!("patch[{}].checksum", i))?,
            }
        } else {
            if patch.checksum.is_some() {
                return Err(Error::parse(
                    format!("patch[{}].checksum", i),
                    "only used for remote patches",
                ));
            }
            let file = expand_placeholders(&patch.file, &vars);
            let path = match base_dir {
                Some(dir) if Path::new(&file).is_relative() => dir.join(&file),
                _ => file.into(),
            };
            PatchLocation::Local(path)
        };
        patches.push(PatchInfo {
            location,
            strip: patch.strip,
        });
    }

    let bottle = select_bottle(&file.bottle, platform, &vars)?;

    let install = resolve_steps(file.build.install, "build.install")?;
    let test = resolve_steps(file.test.steps, "test.steps")?;

    Ok(Recipe {
        name,
        version,
        description: file.package.description,
        homepage: file.package.homepage,
        license: file.package.license,
        caveats: file.package.caveats,
        source: source_locator,
        head,
        resources,
        patches,
        dependencies,
        flags,
        environment,
        jobs: file.build.jobs,
        install,
        test,
        bottle,
        variables: file.variables,
    })
}

fn resolve_version(file: &RecipeFile, source: &SourceSection) -> Result<String> {
    if let Some(version) = file.package.version.as_deref().map(str::trim) {
        if version.is_empty() || version.contains('/') || version.chars().any(char::is_whitespace) {
            return Err(Error::parse(
                "package.version",
                format!("'{}' is not a usable version", version),
            ));
        }
        return Ok(version.to_string());
    }

    if let Some(url) = &source.url {
        if url.contains("%(version)s") {
            return Err(Error::parse(
                "package.version",
                "required when source.url references %(version)s",
            ));
        }
        return Ok(detect_version(url).unwrap_or_else(|| UNVERSIONED.to_string()));
    }

    if source.git.is_some() {
        return Ok(match &source.tag {
            Some(tag) => tag.strip_prefix('v').unwrap_or(tag).to_string(),
            None => "HEAD".to_string(),
        });
    }

    Ok(UNVERSIONED.to_string())
}

fn resolve_source(
    section: &SourceSection,
    field: &str,
    vars: &BTreeMap<String, String>,
) -> Result<SourceLocator> {
    match (&section.url, &section.git) {
        (Some(_), Some(_)) => Err(Error::parse(field, "give either url or git, not both")),
        (None, None) => Err(Error::parse(field, "one of url or git is required")),
        (Some(url), None) => {
            if section.branch.is_some() || section.tag.is_some() || section.revision.is_some() {
                return Err(Error::parse(field, "branch, tag and revision need a git source"));
            }
            let checksum = section.checksum.as_deref().ok_or_else(|| {
                Error::parse(format!("{}.checksum", field), "required for archive sources")
            })?;
            Ok(SourceLocator::Archive {
                url: expand_placeholders(url, vars),
                checksum: parse_checksum(checksum, &format!("{}.checksum", field))?,
                mirrors: section
                    .mirrors
                    .iter()
                    .map(|m| expand_placeholders(m, vars))
                    .collect(),
            })
        }
        (None, Some(git)) => {
            if section.checksum.is_some() {
                return Err(Error::parse(
                    format!("{}.checksum", field),
                    "not used for git sources",
                ));
            }
            if !section.mirrors.is_empty() {
                return Err(Error::parse(
                    format!("{}.mirrors", field),
                    "not used for git sources",
                ));
            }
            let reference = match (&section.branch, &section.tag, &section.revision) {
                (None, None, None) => GitReference::DefaultBranch,
                (Some(b), None, None) => GitReference::Branch(b.clone()),
                (None, Some(t), None) => GitReference::Tag(expand_placeholders(t, vars)),
                (None, None, Some(r)) => GitReference::Revision(r.clone()),
                _ => {
                    return Err(Error::parse(
                        field,
                        "at most one of branch, tag or revision",
                    ));
                }
            };
            Ok(SourceLocator::Git {
                url: expand_placeholders(git, vars),
                reference,
            })
        }
    }
}

fn parse_checksum(value: &str, field: &str) -> Result<Checksum> {
    Checksum::parse_prefixed(value).map_err(|e| Error::parse(field, e))
}

fn is_remote(file: &str) -> bool {
    file.starts_with("http://") || file.starts_with("https://")
}

/// Build dependencies first, then runtime, each in declaration order
fn flatten_dependencies(section: &DependencySection) -> Vec<Dependency> {
    let mut deps = Vec::new();
    for name in &section.build {
        merge_dependency(&mut deps, Dependency::new(name.clone(), DependencyPhase::Build));
    }
    for name in &section.runtime {
        merge_dependency(&mut deps, Dependency::new(name.clone(), DependencyPhase::Runtime));
    }
    deps
}

/// Add a dependency, keeping the first position; runtime wins over build
fn merge_dependency(deps: &mut Vec<Dependency>, dep: Dependency) {
    match deps.iter_mut().find(|d| d.name == dep.name) {
        Some(existing) => {
            if dep.phase == DependencyPhase::Runtime {
                existing.phase = DependencyPhase::Runtime;
            }
        }
        None => deps.push(dep),
    }
}

/// Pick the most specific matching bottle; earlier declarations win ties
fn select_bottle(
    bottles: &[BottleSection],
    platform: &Platform,
    vars: &BTreeMap<String, String>,
) -> Result<Option<Bottle>> {
    let mut best: Option<(u8, Bottle)> = None;

    for (i, section) in bottles.iter().enumerate() {
        let selector: TargetSelector = section
            .platform
            .parse()
            .map_err(|e: String| Error::parse(format!("bottle[{}].platform", i), e))?;
        let checksum = parse_checksum(&section.checksum, &format!("bottle[{}].checksum", i))?;

        if !selector.matches(platform) {
            continue;
        }
        let specificity = selector.specificity();
        if best.as_ref().is_none_or(|(s, _)| specificity > *s) {
            best = Some((
                specificity,
                Bottle {
                    url: expand_placeholders(&section.url, vars),
                    checksum,
                },
            ));
        }
    }

    Ok(best.map(|(_, bottle)| bottle))
}

fn resolve_steps(specs: Vec<StepSpec>, field: &str) -> Result<Vec<Step>> {
    specs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| {
            let step = Step::from(spec);
            if step.run.trim().is_empty() {
                return Err(Error::parse(format!("{}[{}]", field, i), "empty command"));
            }
            Ok(step)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};

    const SHA: &str = "79b36985fb2703146618d87c4acde3e068b91c553fb93f021a337f3e5e1cd95d";

    fn linux() -> Platform {
        Platform::new(Os::Linux, Arch::X86_64)
    }

    fn macos() -> Platform {
        Platform::new(Os::Macos, Arch::Aarch64)
    }

    fn tcpdump() -> String {
        format!(
            r#"
[package]
name = "tcpdump"
version = "4.99.1"
description = "Command-line packet analyzer"
license = "BSD-3-Clause"

[source]
url = "https://www.tcpdump.org/release/tcpdump-%(version)s.tar.gz"
checksum = "sha256:{sha}"
mirrors = ["https://mirror.example/%(name)s/tcpdump-%(version)s.tar.gz"]

[dependencies]
build = ["pkg-config"]
runtime = ["libpcap", "openssl@1.1"]

[build]
flags = ["--disable-smb"]
install = [
  "./configure --prefix=%(prefix)s %(flags)s",
  {{ run = "make install", serial = true }},
]

[test]
steps = [{{ run = "%(bin)s/tcpdump --help 2>&1", expect_output = ["tcpdump version %(version)s"] }}]

[target.linux]
dependencies = {{ runtime = ["mesa-glu"] }}
flags = ["--with-linux"]
environment = {{ CC = "gcc" }}

[target.macos]
dependencies = {{ build = ["xcode"] }}
flags = ["--with-macos"]

[[bottle]]
platform = "linux"
url = "https://example.com/%(name)s-%(version)s.linux.bottle.tar.gz"
checksum = "{sha}"

[[bottle]]
platform = "linux-x86_64"
url = "https://example.com/%(name)s-%(version)s.x86_64_linux.bottle.tar.gz"
checksum = "{sha}"
"#,
            sha = SHA
        )
    }

    fn names(recipe: &Recipe) -> Vec<&str> {
        recipe.dependencies.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_parse_valid_recipe() {
        let recipe = parse_recipe(&tcpdump(), &linux()).unwrap();

        assert_eq!(recipe.name, "tcpdump");
        assert_eq!(recipe.version, "4.99.1");
        match &recipe.source {
            SourceLocator::Archive { url, checksum, mirrors } => {
                assert_eq!(url, "https://www.tcpdump.org/release/tcpdump-4.99.1.tar.gz");
                assert_eq!(checksum.digest, SHA);
                assert_eq!(mirrors[0], "https://mirror.example/tcpdump/tcpdump-4.99.1.tar.gz");
            }
            other => panic!("unexpected source {:?}", other),
        }
        assert_eq!(recipe.install.len(), 2);
        assert!(recipe.install[1].serial);
        // Step placeholders wait for execution
        assert_eq!(recipe.install[0].run, "./configure --prefix=%(prefix)s %(flags)s");
        assert_eq!(recipe.test[0].expect_output, vec!["tcpdump version %(version)s"]);
        assert!(validate_recipe(&recipe).is_empty());
    }

    #[test]
    fn test_platform_sections_resolve_to_match_only() {
        let on_linux = parse_recipe(&tcpdump(), &linux()).unwrap();
        assert_eq!(names(&on_linux), vec!["pkg-config", "libpcap", "openssl@1.1", "mesa-glu"]);
        assert_eq!(on_linux.flags, vec!["--disable-smb", "--with-linux"]);
        assert_eq!(on_linux.environment.get("CC").map(String::as_str), Some("gcc"));

        let on_macos = parse_recipe(&tcpdump(), &macos()).unwrap();
        assert_eq!(names(&on_macos), vec!["pkg-config", "libpcap", "openssl@1.1", "xcode"]);
        assert_eq!(on_macos.flags, vec!["--disable-smb", "--with-macos"]);
        assert!(on_macos.environment.is_empty());
    }

    #[test]
    fn test_most_specific_bottle_selected() {
        let on_linux = parse_recipe(&tcpdump(), &linux()).unwrap();
        let bottle = on_linux.bottle.unwrap();
        assert!(bottle.url.ends_with("tcpdump-4.99.1.x86_64_linux.bottle.tar.gz"));

        let on_arm_linux =
            parse_recipe(&tcpdump(), &Platform::new(Os::Linux, Arch::Aarch64)).unwrap();
        assert!(on_arm_linux.bottle.unwrap().url.ends_with(".linux.bottle.tar.gz"));

        let on_macos = parse_recipe(&tcpdump(), &macos()).unwrap();
        assert!(on_macos.bottle.is_none());
    }

    #[test]
    fn test_missing_name() {
        let content = format!("[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\n", SHA);
        let err = parse_recipe(&content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "package.name"));
    }

    #[test]
    fn test_missing_source() {
        let err = parse_recipe("[package]\nname = \"a\"\n", &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "source"));
    }

    #[test]
    fn test_archive_needs_checksum() {
        let content = "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\n";
        let err = parse_recipe(content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "source.checksum"));

        let content = "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"md5:abc\"\n";
        let err = parse_recipe(content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "source.checksum"));
    }

    #[test]
    fn test_url_and_git_conflict() {
        let content = format!(
            "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\ngit = \"https://x/a.git\"\n",
            SHA
        );
        let err = parse_recipe(&content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "source"));
    }

    #[test]
    fn test_unknown_target_key() {
        let content = format!(
            "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\n[target.on_linux]\nflags = []\n",
            SHA
        );
        let err = parse_recipe(&content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "target.on_linux"));
    }

    #[test]
    fn test_version_detection() {
        let content = format!(
            "[package]\nname = \"mise\"\n[source]\nurl = \"https://github.com/jdx/mise/archive/refs/tags/v2024.6.0.tar.gz\"\nchecksum = \"{}\"\n",
            SHA
        );
        assert_eq!(parse_recipe(&content, &linux()).unwrap().version, "2024.6.0");

        let content = "[package]\nname = \"g\"\n[source]\ngit = \"https://x/g.git\"\ntag = \"v1.2.3\"\n";
        let recipe = parse_recipe(content, &linux()).unwrap();
        assert_eq!(recipe.version, "1.2.3");
        assert_eq!(
            recipe.source,
            SourceLocator::Git {
                url: "https://x/g.git".to_string(),
                reference: GitReference::Tag("v1.2.3".to_string()),
            }
        );

        let content = "[package]\nname = \"g\"\n[source]\ngit = \"https://x/g.git\"\n";
        assert_eq!(parse_recipe(content, &linux()).unwrap().version, "HEAD");

        let content = format!(
            "[package]\nname = \"d\"\n[source]\nurl = \"https://x/download\"\nchecksum = \"{}\"\n",
            SHA
        );
        let recipe = parse_recipe(&content, &linux()).unwrap();
        assert_eq!(recipe.version, UNVERSIONED);
        assert!(validate_recipe(&recipe).iter().any(|w| w.contains("Version")));
    }

    #[test]
    fn test_version_placeholder_needs_version() {
        let content = format!(
            "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-%(version)s.tar.gz\"\nchecksum = \"{}\"\n",
            SHA
        );
        let err = parse_recipe(&content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "package.version"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let content = format!(
            "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\n[dependencies]\nruntime = [\"a\"]\n",
            SHA
        );
        let err = parse_recipe(&content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "dependencies"));
    }

    #[test]
    fn test_duplicate_dependency_promoted_to_runtime() {
        let content = format!(
            "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\n[dependencies]\nbuild = [\"b\", \"c\"]\nruntime = [\"c\"]\n",
            SHA
        );
        let recipe = parse_recipe(&content, &linux()).unwrap();
        assert_eq!(names(&recipe), vec!["b", "c"]);
        assert_eq!(recipe.dependencies[1].phase, DependencyPhase::Runtime);
    }

    #[test]
    fn test_remote_patch_needs_checksum() {
        let content = format!(
            "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\n[[patch]]\nfile = \"https://x/fix.patch\"\n",
            SHA
        );
        let err = parse_recipe(&content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "patch[0].checksum"));
    }

    #[test]
    fn test_local_patch_relative_to_recipe_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.toml");
        std::fs::write(
            &path,
            format!(
                "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\n[[patch]]\nfile = \"patches/fix.patch\"\nstrip = 0\n",
                SHA
            ),
        )
        .unwrap();

        let recipe = parse_recipe_file(&path, &linux()).unwrap();
        assert_eq!(
            recipe.patches[0],
            PatchInfo {
                location: PatchLocation::Local(dir.path().join("patches/fix.patch")),
                strip: 0,
            }
        );
    }

    #[test]
    fn test_empty_step_rejected() {
        let content = format!(
            "[package]\nname = \"a\"\n[source]\nurl = \"https://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\n[test]\nsteps = [\"true\", \"  \"]\n",
            SHA
        );
        let err = parse_recipe(&content, &linux()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "test.steps[1]"));
    }

    #[test]
    fn test_validate_warnings() {
        let content = format!(
            "[package]\nname = \"a\"\n[source]\nurl = \"http://x/a-1.0.tar.gz\"\nchecksum = \"{}\"\n",
            SHA
        );
        let recipe = parse_recipe(&content, &linux()).unwrap();
        let warnings = validate_recipe(&recipe);
        assert!(warnings.iter().any(|w| w.contains("description")));
        assert!(warnings.iter().any(|w| w.contains("license")));
        assert!(warnings.iter().any(|w| w.contains("install steps")));
        assert!(warnings.iter().any(|w| w.contains("test steps")));
        assert!(warnings.iter().any(|w| w.contains("plain http")));
    }
}
