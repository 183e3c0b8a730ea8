// src/recipe/kitchen/status.rs

//! Per-installation recipe state tracking
//!
//! ```text
//! Pending -> Fetching -> Building -> Installing -> Testing -> Installed
//!    |          |           |            |            |
//!    +----------+-----------+------------+------------+--> Failed
//!
//! Pending -> Installed   (keg already present)
//! Installing -> Installed (tests skipped)
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, warn};

/// Where a recipe is in its install lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RecipeState {
    Pending,
    Fetching,
    Building,
    Installing,
    Testing,
    Installed,
    Failed,
}

impl RecipeState {
    /// Returns true for Installed and Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Installed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: RecipeState) -> bool {
        use RecipeState::*;
        match (self, next) {
            (Pending, Fetching) | (Pending, Installed) => true,
            (Fetching, Building) | (Building, Installing) => true,
            (Installing, Testing) | (Installing, Installed) | (Testing, Installed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Shared map of recipe name to state for one installation run
///
/// Entries keep plan order. Workers update their own recipe; the
/// dispatcher reads the whole board.
#[derive(Debug)]
pub struct StatusBoard {
    states: Mutex<Vec<(String, RecipeState)>>,
}

impl StatusBoard {
    /// Create a board with every recipe Pending
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = names
            .into_iter()
            .map(|n| (n.into(), RecipeState::Pending))
            .collect();
        Self {
            states: Mutex::new(states),
        }
    }

    /// Move a recipe to a new state
    ///
    /// Invalid transitions are refused and logged; returns whether the
    /// state changed.
    pub fn transition(&self, name: &str, next: RecipeState) -> bool {
        let mut states = self.states.lock();
        let Some((_, state)) = states.iter_mut().find(|(n, _)| n == name) else {
            warn!("State change for unknown recipe {}", name);
            return false;
        };
        if !state.can_transition_to(next) {
            warn!("Refusing state change for {}: {} -> {}", name, state, next);
            return false;
        }
        debug!("{}: {} -> {}", name, state, next);
        *state = next;
        true
    }

    pub fn get(&self, name: &str) -> Option<RecipeState> {
        self.states
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    /// Copy of all states in plan order
    pub fn snapshot(&self) -> Vec<(String, RecipeState)> {
        self.states.lock().clone()
    }

    /// Names currently in a given state
    pub fn in_state(&self, wanted: RecipeState) -> Vec<String> {
        self.states
            .lock()
            .iter()
            .filter(|(_, s)| *s == wanted)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

/// Requests that an installation stop at the next step boundary
///
/// Cloning shares the flag. Running steps are never interrupted; the
/// request is seen before the next step or dispatch.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
