//! Bounded concurrent fetching
//!
//! The controller is a small embedded board; a few hundred parallel requests
//! make it time out. Admission is throttled instead: at most `limit` requests
//! are unresolved at any instant, and every item gets exactly one outcome.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LimitError {
    #[error("Concurrency limit {0} is not one of {allowed:?}", allowed = ConcurrencyLimit::ALLOWED)]
    NotAllowed(usize),
}

/// Maximum number of parallel requests against one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct ConcurrencyLimit(usize);

impl ConcurrencyLimit {
    pub const ALLOWED: [usize; 7] = [1, 2, 3, 5, 8, 10, 15];
    pub const DEFAULT: ConcurrencyLimit = ConcurrencyLimit(5);

    pub fn new(value: usize) -> Result<Self, LimitError> {
        if Self::ALLOWED.contains(&value) {
            Ok(Self(value))
        } else {
            Err(LimitError::NotAllowed(value))
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<usize> for ConcurrencyLimit {
    type Error = LimitError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConcurrencyLimit> for usize {
    fn from(limit: ConcurrencyLimit) -> Self {
        limit.0
    }
}

impl std::fmt::Display for ConcurrencyLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-item results of a batch, split by outcome
#[derive(Debug)]
pub struct BatchOutcome<K, T, E> {
    pub successes: Vec<(K, T)>,
    pub failures: Vec<(K, E)>,
}

impl<K, T, E> BatchOutcome<K, T, E> {
    /// Total number of items that produced an outcome
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.failures.is_empty()
    }
}

/// Run `fetch` for every item with at most `limit` calls in flight.
///
/// A failing item never cancels its siblings. Outcomes arrive in completion
/// order.
pub async fn fetch_all<K, T, E, F, Fut>(items: Vec<K>, limit: ConcurrencyLimit, fetch: F) -> BatchOutcome<K, T, E>
where
    F: Fn(&K) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = items.len();
    let results: Vec<(K, Result<T, E>)> = stream::iter(items)
        .map(|item| {
            let fut = fetch(&item);
            async move { (item, fut.await) }
        })
        .buffer_unordered(limit.get())
        .collect()
        .await;

    let mut outcome = BatchOutcome {
        successes: Vec::with_capacity(total),
        failures: Vec::new(),
    };
    for (item, result) in results {
        match result {
            Ok(value) => outcome.successes.push((item, value)),
            Err(e) => outcome.failures.push((item, e)),
        }
    }

    debug!(
        total,
        ok = outcome.successes.len(),
        failed = outcome.failures.len(),
        limit = limit.get(),
        "Batch finished"
    );
    outcome
}
