// src/error.rs

//! Error types for recipe loading, resolution and execution

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Which list of a recipe a failing step came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum StepPhase {
    Install,
    Test,
}

/// Errors surfaced by the loader, resolver and kitchen
#[derive(Error, Debug)]
pub enum Error {
    /// A recipe declaration is malformed or missing a required field
    #[error("Invalid recipe field '{field}': {message}")]
    Parse { field: String, message: String },

    /// Fetched content does not match the declared checksum
    #[error("Checksum mismatch for {recipe} ({url}): expected {expected}, got {actual}")]
    ChecksumMismatch {
        recipe: String,
        url: String,
        expected: String,
        actual: String,
    },

    /// The dependency graph contains a cycle
    #[error("Circular dependency: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// A recipe declares a dependency that is not in the recipe set
    #[error("{recipe} depends on '{dependency}', which has no recipe")]
    MissingDependency { recipe: String, dependency: String },

    /// A build or test step failed
    #[error("{recipe}: {phase} step {} (`{command}`) failed: {reason}", .index + 1)]
    StepExecution {
        recipe: String,
        phase: StepPhase,
        /// Zero-based position of the step in its list
        index: usize,
        command: String,
        status: Option<i32>,
        output: String,
        reason: String,
    },

    /// No recipe with this name
    #[error("No recipe named '{0}'")]
    RecipeNotFound(String),

    /// Two recipes share a name
    #[error("Duplicate recipe '{name}' (also defined in {previous})")]
    DuplicateRecipe { name: String, previous: String },

    /// Network or local copy failure while fetching
    #[error("Download failed: {0}")]
    Download(String),

    /// Archive could not be unpacked
    #[error("Archive error: {0}")]
    Archive(String),

    /// Execution stopped by an abort request
    #[error("Aborted before {recipe} {stage}")]
    Aborted { recipe: String, stage: String },

    /// Operation requires an installed keg
    #[error("{0} is not installed")]
    NotInstalled(String),

    /// Settings file problem
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a parse error on a named field
    pub fn parse(field: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Parse {
            field: field.into(),
            message: message.to_string(),
        }
    }

    /// Name of the recipe the error is about, when there is one
    pub fn recipe(&self) -> Option<&str> {
        match self {
            Error::ChecksumMismatch { recipe, .. }
            | Error::MissingDependency { recipe, .. }
            | Error::StepExecution { recipe, .. }
            | Error::Aborted { recipe, .. } => Some(recipe),
            Error::RecipeNotFound(name) | Error::NotInstalled(name) => Some(name),
            Error::DuplicateRecipe { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Captured output of a failed step
    pub fn step_output(&self) -> Option<&str> {
        match self {
            Error::StepExecution { output, .. } => Some(output),
            _ => None,
        }
    }
}
