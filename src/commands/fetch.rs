// src/commands/fetch.rs

//! Fetch command - download and verify sources only

use super::Session;
use anyhow::{Context, Result};
use larder::{PlanOptions, Resolver};

/// Fetch sources for the named recipes (not their dependencies)
pub fn cmd_fetch(session: &Session, names: &[String], build_from_source: bool, head: bool) -> Result<()> {
    let set = session.load_recipes()?;
    let kitchen = session.kitchen(session.kitchen_config())?;
    let resolver = Resolver::new(&set).with_options(PlanOptions {
        build_from_source,
        head,
    });

    for name in names {
        let recipe = set.require(name)?;
        let method = resolver.method_for(recipe, true);

        if kitchen.sources_cached(recipe, method) {
            println!("{} ({}): already cached", name, method);
            continue;
        }

        println!("Fetching {} ({})...", name, method);
        let paths = kitchen
            .fetch(recipe, method)
            .with_context(|| format!("Failed to fetch sources for {}", name))?;
        for path in &paths {
            println!("  - {}", path.display());
        }
    }

    println!("\n[OK] All sources are cached. Ready for offline build.");
    Ok(())
}
