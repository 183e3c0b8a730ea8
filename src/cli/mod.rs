// src/cli/mod.rs
//! CLI definitions for larder
//!
//! The command implementations live in the `commands` module.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "larder")]
#[command(author = "Larder Contributors")]
#[command(version)]
#[command(about = "Recipe-driven package installer", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory of recipe files
    #[arg(long, global = true)]
    pub recipes: Option<PathBuf>,

    /// Shared install prefix
    #[arg(long, global = true)]
    pub prefix: Option<PathBuf>,

    /// Download cache directory
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// Settings file (default: <config dir>/larder/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Load recipes for another platform (os-arch, e.g. macos-aarch64)
    #[arg(long, global = true)]
    pub platform: Option<String>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install recipes and everything they depend on
    Install {
        /// Recipe names
        #[arg(required = true)]
        names: Vec<String>,

        /// Ignore bottles and build from source
        #[arg(short = 's', long)]
        build_from_source: bool,

        /// Build the requested recipes from their head source
        #[arg(long)]
        head: bool,

        /// Do not run test steps after installing
        #[arg(long)]
        skip_tests: bool,

        /// Recipes built concurrently (default: number of cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Parallel make jobs per build (default: number of cores)
        #[arg(short, long)]
        jobs: Option<u32>,

        /// Keep build directories after completion (for debugging)
        #[arg(long)]
        keep_builddir: bool,

        /// Print the plan without installing
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a recipe's test steps against its installed keg
    Test {
        name: String,
    },

    /// Show the installation plan for a recipe
    Deps {
        name: String,

        /// Plan as if building from source
        #[arg(short = 's', long)]
        build_from_source: bool,

        /// Plan the head build
        #[arg(long)]
        head: bool,
    },

    /// Show recipes that depend on a recipe
    Uses {
        name: String,

        /// Include indirect dependents
        #[arg(short, long)]
        recursive: bool,
    },

    /// Download and verify sources without building
    Fetch {
        /// Recipe names
        #[arg(required = true)]
        names: Vec<String>,

        /// Fetch the source even when a bottle exists
        #[arg(short = 's', long)]
        build_from_source: bool,

        /// Fetch the head source
        #[arg(long)]
        head: bool,
    },

    /// Show recipe metadata, dependencies and install state
    Info {
        name: String,
    },

    /// Load and validate every recipe
    Check,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
