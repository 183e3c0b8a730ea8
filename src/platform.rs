// src/platform.rs

//! Target platform and platform-conditional selectors
//!
//! Recipes carry `[target.<selector>]` sections and per-platform bottles.
//! Both are resolved exactly once, when a recipe is loaded for a [`Platform`].

use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Os {
    Linux,
    #[strum(to_string = "macos", serialize = "darwin")]
    Macos,
    Freebsd,
    Windows,
    Unknown,
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Arch {
    #[strum(to_string = "x86_64", serialize = "amd64")]
    X86_64,
    #[strum(to_string = "aarch64", serialize = "arm64")]
    Aarch64,
    #[strum(to_string = "unknown")]
    Unknown,
}

/// The platform recipes are resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detect the platform of the running host
    pub fn detect() -> Self {
        let os = std::env::consts::OS.parse().unwrap_or(Os::Unknown);
        let arch = std::env::consts::ARCH.parse().unwrap_or(Arch::Unknown);
        Self { os, arch }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::detect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = String;

    /// Parse `os-arch`, e.g. `linux-x86_64` or `macos-arm64`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (os, arch) = s
            .split_once('-')
            .ok_or_else(|| format!("expected <os>-<arch>, got '{}'", s))?;
        let os = os.parse().map_err(|_| format!("unknown os '{}'", os))?;
        let arch = arch.parse().map_err(|_| format!("unknown arch '{}'", arch))?;
        Ok(Self { os, arch })
    }
}

/// A platform condition from a recipe: `linux`, `aarch64` or `macos-aarch64`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSelector {
    Os(Os),
    Arch(Arch),
    Exact(Os, Arch),
}

impl TargetSelector {
    /// Whether this selector applies to the platform
    pub fn matches(&self, platform: &Platform) -> bool {
        match self {
            Self::Os(os) => *os == platform.os,
            Self::Arch(arch) => *arch == platform.arch,
            Self::Exact(os, arch) => *os == platform.os && *arch == platform.arch,
        }
    }

    /// Higher is more specific; used to pick between matching bottles
    pub fn specificity(&self) -> u8 {
        match self {
            Self::Os(_) | Self::Arch(_) => 1,
            Self::Exact(..) => 2,
        }
    }
}

impl FromStr for TargetSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(platform) = s.parse::<Platform>() {
            return Ok(Self::Exact(platform.os, platform.arch));
        }
        if let Ok(os) = s.parse::<Os>() {
            return Ok(Self::Os(os));
        }
        if let Ok(arch) = s.parse::<Arch>() {
            return Ok(Self::Arch(arch));
        }
        Err(format!(
            "unknown platform selector '{}' (expected an os, an arch, or <os>-<arch>)",
            s
        ))
    }
}
