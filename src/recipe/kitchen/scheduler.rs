// src/recipe/kitchen/scheduler.rs

//! Dispatching planned recipes to cooks
//!
//! With one worker the plan runs strictly in order. With more, a rayon pool
//! cooks every recipe whose in-plan dependencies are Installed; workers
//! report back over a channel and the calling thread does all dispatching.

use super::Kitchen;
use super::config::CookResult;
use super::status::{AbortHandle, RecipeState, StatusBoard};
use crate::error::{Error, Result};
use crate::resolver::{InstallPlan, PlannedRecipe};
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info, warn};

/// Results in completion order plus the first failure
pub(super) type Outcome = (Vec<CookResult>, Option<Error>);

fn aborted_at(entry: &PlannedRecipe<'_>) -> Error {
    Error::Aborted {
        recipe: entry.name().to_string(),
        stage: "fetching".to_string(),
    }
}

pub(super) fn run_sequential(
    kitchen: &Kitchen,
    plan: &InstallPlan<'_>,
    board: &StatusBoard,
    abort: &AbortHandle,
) -> Outcome {
    let mut results = Vec::with_capacity(plan.len());
    for entry in plan {
        if abort.is_aborted() {
            return (results, Some(aborted_at(entry)));
        }
        match kitchen.cook_entry(entry, board, abort) {
            Ok(result) => results.push(result),
            Err(e) => return (results, Some(e)),
        }
    }
    (results, None)
}

pub(super) fn run_parallel(
    kitchen: &Kitchen,
    plan: &InstallPlan<'_>,
    board: &StatusBoard,
    abort: &AbortHandle,
    workers: usize,
) -> Result<Outcome> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("larder-cook-{}", i))
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    let entries = plan.entries();
    let position: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name(), i))
        .collect();

    // Unfinished in-plan dependencies per entry, and the reverse edges
    let mut waiting = vec![0usize; entries.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (i, entry) in entries.iter().enumerate() {
        for dep in &entry.dependencies {
            if let Some(&d) = position.get(dep.as_str()) {
                waiting[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    // Plan positions, so ties dispatch in plan order
    let mut ready: BTreeSet<usize> = (0..entries.len()).filter(|&i| waiting[i] == 0).collect();
    let mut results = Vec::with_capacity(entries.len());
    let mut error: Option<Error> = None;
    let mut panicked: Option<Box<dyn std::any::Any + Send>> = None;
    let mut in_flight = 0usize;
    let (tx, rx) = mpsc::channel::<(usize, thread::Result<Result<CookResult>>)>();

    info!("Cooking {} recipes with {} workers", entries.len(), workers);

    pool.in_place_scope(|scope| {
        loop {
            while error.is_none() && panicked.is_none() && !abort.is_aborted() && in_flight < workers
            {
                let Some(i) = ready.pop_first() else { break };
                let entry = &entries[i];
                let tx = tx.clone();
                in_flight += 1;
                debug!("Dispatching {}", entry.name());
                scope.spawn(move |_| {
                    // Caught so the dispatcher always hears back
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        kitchen.cook_entry(entry, board, abort)
                    }));
                    let _ = tx.send((i, outcome));
                });
            }

            if in_flight == 0 {
                break;
            }
            let Ok((i, outcome)) = rx.recv() else { break };
            in_flight -= 1;

            match outcome {
                Err(payload) => {
                    warn!("Worker cooking {} panicked", entries[i].name());
                    board.transition(entries[i].name(), RecipeState::Failed);
                    panicked.get_or_insert(payload);
                }
                Ok(Ok(result)) => {
                    results.push(result);
                    for &d in &dependents[i] {
                        waiting[d] -= 1;
                        if waiting[d] == 0 {
                            ready.insert(d);
                        }
                    }
                }
                Ok(Err(e)) if error.is_none() => {
                    warn!("{} failed; waiting for in-flight recipes", entries[i].name());
                    error = Some(e);
                }
                Ok(Err(e)) => warn!("{} also failed: {}", entries[i].name(), e),
            }
        }
    });

    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }

    if error.is_none()
        && results.len() < entries.len()
        && let Some(entry) = entries
            .iter()
            .find(|e| !results.iter().any(|r| r.name == e.name()))
    {
        error = Some(aborted_at(entry));
    }

    Ok((results, error))
}
