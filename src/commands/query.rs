// src/commands/query.rs

//! Read-only commands: deps, uses, info and check

use super::Session;
use anyhow::{Context, Result};
use larder::recipe::{DependencyPhase, RecipeSet, SourceLocator};
use larder::{PlanOptions, Resolver, validate_recipe};

/// Print the installation plan for a recipe
pub fn cmd_deps(session: &Session, name: &str, build_from_source: bool, head: bool) -> Result<()> {
    let set = session.load_recipes()?;
    let plan = Resolver::new(&set)
        .with_options(PlanOptions {
            build_from_source,
            head,
        })
        .resolve(name)
        .with_context(|| format!("Failed to resolve {}", name))?;

    for (i, entry) in plan.iter().enumerate() {
        let deps = if entry.dependencies.is_empty() {
            String::new()
        } else {
            format!("  <- {}", entry.dependencies.join(", "))
        };
        println!("{:>3}. {} {} ({}){}", i + 1, entry.name(), entry.recipe.version, entry.method, deps);
    }
    Ok(())
}

/// Print recipes that depend on `name`
pub fn cmd_uses(session: &Session, name: &str, recursive: bool) -> Result<()> {
    let set = session.load_recipes()?;
    set.require(name)?;
    let users = dependents(&set, name, recursive);

    if users.is_empty() {
        println!("No recipes depend on {}", name);
    } else {
        for user in users {
            println!("{}", user);
        }
    }
    Ok(())
}

fn dependents(set: &RecipeSet, name: &str, recursive: bool) -> Vec<String> {
    let graph = set.graph();
    if recursive {
        graph.transitive_dependents(name).into_iter().collect()
    } else {
        graph
            .dependents(name)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Show recipe metadata and install state
pub fn cmd_info(session: &Session, name: &str) -> Result<()> {
    let set = session.load_recipes()?;
    let recipe = set.require(name)?;
    let kitchen = session.kitchen(session.kitchen_config())?;

    println!("{} {}", recipe.name, recipe.version);
    if let Some(desc) = &recipe.description {
        println!("{}", desc);
    }
    if let Some(homepage) = &recipe.homepage {
        println!("Homepage: {}", homepage);
    }
    if let Some(license) = &recipe.license {
        println!("License:  {}", license);
    }
    match &recipe.source {
        SourceLocator::Archive { url, .. } => println!("Source:   {}", url),
        SourceLocator::Git { url, reference } => println!("Source:   {} ({:?})", url, reference),
    }
    if let Some(head) = &recipe.head {
        println!("Head:     {}", head.source.url());
    }
    println!("Bottle:   {}", if recipe.bottle.is_some() { "yes" } else { "no" });
    if let Some(origin) = set.origin(name) {
        println!("Recipe:   {}", origin.display());
    }

    for phase in [DependencyPhase::Build, DependencyPhase::Runtime] {
        let names: Vec<&str> = recipe
            .dependencies
            .iter()
            .filter(|d| d.phase == phase)
            .map(|d| d.name.as_str())
            .collect();
        if !names.is_empty() {
            println!("{} dependencies: {}", phase, names.join(", "));
        }
    }

    match kitchen.prefix().installed(name) {
        Some(keg) => println!(
            "Installed: {} ({}, {})",
            keg.path.display(),
            keg.receipt.method,
            keg.receipt.installed_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("Not installed"),
    }

    if let Some(caveats) = &recipe.caveats {
        println!("\n==> Caveats\n{}", caveats.trim_end());
    }
    for warning in validate_recipe(recipe) {
        println!("Warning: {}", warning);
    }
    Ok(())
}

/// Load and validate the whole recipe directory
pub fn cmd_check(session: &Session) -> Result<()> {
    let set = session.load_recipes()?;
    let order = set
        .graph()
        .topological_sort()
        .context("Recipe graph is not installable")?;

    let mut warnings = 0;
    for recipe in set.iter() {
        for warning in validate_recipe(recipe) {
            println!("{}: {}", recipe.name, warning);
            warnings += 1;
        }
    }

    println!(
        "[OK] {} recipes for {} ({} warnings)",
        order.len(),
        set.platform(),
        warnings
    );
    Ok(())
}
