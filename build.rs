// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: a single recipe name
fn name_arg() -> Arg {
    Arg::new("name").required(true).help("Recipe name")
}

/// Common argument: build from source even when a bottle exists
fn build_from_source_arg() -> Arg {
    Arg::new("build_from_source")
        .short('s')
        .long("build-from-source")
        .action(ArgAction::SetTrue)
        .help("Ignore bottles and build from source")
}

fn head_arg() -> Arg {
    Arg::new("head")
        .long("head")
        .action(ArgAction::SetTrue)
        .help("Use the head (development) source")
}

fn build_cli() -> Command {
    Command::new("larder")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Larder Contributors")
        .about("Recipe-driven package installer")
        .arg(Arg::new("recipes").long("recipes").global(true).help("Directory of recipe files"))
        .arg(Arg::new("prefix").long("prefix").global(true).help("Shared install prefix"))
        .arg(Arg::new("cache").long("cache").global(true).help("Download cache directory"))
        .arg(Arg::new("config").long("config").global(true).help("Settings file"))
        .arg(
            Arg::new("platform")
                .long("platform")
                .global(true)
                .help("Load recipes for another platform (os-arch)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("More output (-v debug, -vv trace)"),
        )
        .subcommand(
            Command::new("install")
                .about("Install recipes and everything they depend on")
                .arg(Arg::new("names").required(true).num_args(1..).help("Recipe names"))
                .arg(build_from_source_arg())
                .arg(head_arg())
                .arg(
                    Arg::new("skip_tests")
                        .long("skip-tests")
                        .action(ArgAction::SetTrue)
                        .help("Do not run test steps after installing"),
                )
                .arg(
                    Arg::new("workers")
                        .short('w')
                        .long("workers")
                        .help("Recipes built concurrently"),
                )
                .arg(Arg::new("jobs").short('j').long("jobs").help("Parallel make jobs per build"))
                .arg(
                    Arg::new("keep_builddir")
                        .long("keep-builddir")
                        .action(ArgAction::SetTrue)
                        .help("Keep build directories after completion"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Print the plan without installing"),
                ),
        )
        .subcommand(
            Command::new("test")
                .about("Run a recipe's test steps against its installed keg")
                .arg(name_arg()),
        )
        .subcommand(
            Command::new("deps")
                .about("Show the installation plan for a recipe")
                .arg(name_arg())
                .arg(build_from_source_arg())
                .arg(head_arg()),
        )
        .subcommand(
            Command::new("uses")
                .about("Show recipes that depend on a recipe")
                .arg(name_arg())
                .arg(
                    Arg::new("recursive")
                        .short('r')
                        .long("recursive")
                        .action(ArgAction::SetTrue)
                        .help("Include indirect dependents"),
                ),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download and verify sources without building")
                .arg(Arg::new("names").required(true).num_args(1..).help("Recipe names"))
                .arg(build_from_source_arg())
                .arg(head_arg()),
        )
        .subcommand(
            Command::new("info")
                .about("Show recipe metadata, dependencies and install state")
                .arg(name_arg()),
        )
        .subcommand(Command::new("check").about("Load and validate every recipe"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true).help("Shell to generate completions for")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("larder.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
