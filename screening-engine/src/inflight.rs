//! At most one computation per query fingerprint
//!
//! The computation runs as its own task, so it finishes (and populates the cache)
//! even when every caller waiting on it has given up.

use crate::error::ScreeningError;
use crate::types::ScreeningResult;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub type ScreeningOutcome = Result<Arc<ScreeningResult>, ScreeningError>;
pub type SharedScreening = Shared<BoxFuture<'static, ScreeningOutcome>>;

#[derive(Default)]
pub struct InFlight {
    calls: Mutex<HashMap<String, SharedScreening>>,
}

/// Removes the map entry when the computation ends, including by panic
pub struct CompletionGuard {
    inflight: Arc<InFlight>,
    key: String,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.inflight.calls.lock().remove(&self.key);
    }
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Joins the computation for `key`, or spawns `make(guard)` as the new one.
    /// The spawned future must hold the guard until its result is visible to
    /// later callers (cached or deliberately not cached).
    /// Returns the shared handle and whether this call started it.
    pub fn join_or_spawn<F, Fut>(self: &Arc<Self>, key: &str, make: F) -> (SharedScreening, bool)
    where
        F: FnOnce(CompletionGuard) -> Fut,
        Fut: Future<Output = ScreeningOutcome> + Send + 'static,
    {
        let mut calls = self.calls.lock();
        if let Some(existing) = calls.get(key) {
            debug!("Joining in-flight screening {}", key);
            return (existing.clone(), false);
        }

        let guard = CompletionGuard {
            inflight: self.clone(),
            key: key.to_string(),
        };
        let handle = tokio::spawn(make(guard));
        let shared = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ScreeningError::Internal(e.to_string())),
            }
        }
        .boxed()
        .shared();

        calls.insert(key.to_string(), shared.clone());
        (shared, true)
    }
}
