// src/commands/install.rs

//! Install and test commands

use super::{OUTPUT_TAIL_LINES, Session, output_tail};
use anyhow::{Context, Result};
use larder::{InstallReport, PlanOptions, RecipeState, Resolver};
use tracing::info;

/// Options of `larder install`
#[derive(Debug, Clone, Default)]
pub struct InstallArgs {
    pub names: Vec<String>,
    pub build_from_source: bool,
    pub head: bool,
    pub skip_tests: bool,
    pub workers: Option<usize>,
    pub jobs: Option<u32>,
    pub keep_builddir: bool,
    pub dry_run: bool,
}

/// Install recipes with their dependencies
pub fn cmd_install(session: &Session, args: InstallArgs) -> Result<()> {
    let set = session.load_recipes()?;
    let options = PlanOptions {
        build_from_source: args.build_from_source
            || session.settings.build_from_source.unwrap_or(false),
        head: args.head,
    };
    let plan = Resolver::new(&set)
        .with_options(options)
        .resolve_many(&args.names)
        .with_context(|| format!("Failed to resolve {}", args.names.join(", ")))?;

    let mut config = session.kitchen_config();
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs.max(1);
    }
    config.keep_builddir |= args.keep_builddir;
    config.skip_tests |= args.skip_tests;

    let kitchen = session.kitchen(config)?;

    println!("Installation plan ({} recipes):", plan.len());
    for entry in &plan {
        let installed = kitchen
            .prefix()
            .is_installed(entry.name(), &entry.recipe.version);
        println!(
            "  {} {} ({}){}",
            entry.name(),
            entry.recipe.version,
            entry.method,
            if installed { " [installed]" } else { "" }
        );
    }

    if args.dry_run {
        println!("\nDry run: nothing installed");
        return Ok(());
    }

    info!(
        "Installing into {} with {} workers",
        kitchen.config().prefix.display(),
        kitchen.config().workers
    );
    let report = kitchen.install(&plan);
    print_report(&report);

    let results = report.into_result().context("Installation failed")?;
    let built = results.iter().filter(|r| !r.skipped).count();
    println!("\n[COMPLETE] {} built, {} already installed", built, results.len() - built);
    Ok(())
}

fn print_report(report: &InstallReport) {
    println!();
    for result in report.built() {
        println!(
            "Installed {} {} ({}) in {:.1}s -> {}",
            result.name,
            result.version,
            result.method,
            result.duration.as_secs_f64(),
            result.keg.display()
        );
        for warning in &result.warnings {
            println!("  Warning: {}", warning);
        }
        if let Some(dir) = &result.build_dir {
            println!("  Build directory kept at {}", dir.display());
        }
        if let Some(caveats) = &result.caveats {
            println!("\n==> Caveats for {}\n{}", result.name, caveats.trim_end());
        }
    }

    let Some(error) = &report.error else {
        return;
    };

    eprintln!("\n[FAILED] {}", error);
    if let Some(output) = error.step_output() {
        let tail = output_tail(output, OUTPUT_TAIL_LINES);
        if !tail.is_empty() {
            eprintln!("--- last {} lines of output ---", tail.len());
            for line in tail {
                eprintln!("{}", line);
            }
        }
    }

    let pending: Vec<&str> = report
        .states
        .iter()
        .filter(|(_, s)| *s == RecipeState::Pending)
        .map(|(n, _)| n.as_str())
        .collect();
    if !pending.is_empty() {
        eprintln!("Not attempted: {}", pending.join(", "));
    }
}

/// Run a recipe's tests against its installed keg
pub fn cmd_test(session: &Session, name: &str) -> Result<()> {
    let set = session.load_recipes()?;
    let recipe = set.require(name)?;
    let kitchen = session.kitchen(session.kitchen_config())?;

    println!("Testing {} {}", recipe.name, recipe.version);
    match kitchen.test(recipe) {
        Ok(log) => {
            if recipe.test.is_empty() {
                println!("{} has no test steps", recipe.name);
            } else {
                print!("{}", log);
                println!("[OK] {} test step(s) passed", recipe.test.len());
            }
            Ok(())
        }
        Err(e) => {
            if let Some(output) = e.step_output() {
                for line in output_tail(output, OUTPUT_TAIL_LINES) {
                    eprintln!("{}", line);
                }
            }
            Err(e).with_context(|| format!("Tests failed for {}", name))
        }
    }
}
