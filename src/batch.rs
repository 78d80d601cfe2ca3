//! Batched execution of per-item Gmail operations
//!
//! Groups a sequence of same-kind per-item calls into bounded-concurrency
//! chunks and reports a per-item outcome for every input, in input order.
//! One item failing never cancels its siblings; callers decide what partial
//! success means for them.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::{EngineError, ErrorKind};

/// Outcome of one item inside a batch.
#[derive(Debug)]
pub struct ItemOutcome<T> {
    pub id: String,
    pub outcome: Result<T, ItemError>,
}

/// Error recorded for a failed item, wire-ready.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for ItemError {
    fn from(err: &EngineError) -> Self {
        ItemError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Per-item failure annotated with its target id, as surfaced in summaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Executes per-item operations in chunks with bounded concurrency.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    batch_size: usize,
    concurrency: usize,
}

impl BatchExecutor {
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run `op` once per id. Chunks of `batch_size` run sequentially; items
    /// within a chunk run concurrently up to the concurrency bound. Outcomes
    /// come back in input order, one per input id.
    pub async fn run<T, F, Fut>(&self, ids: Vec<String>, op: F) -> Vec<ItemOutcome<T>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
        T: Send,
    {
        let mut outcomes: Vec<ItemOutcome<T>> = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(self.batch_size) {
            let mut chunk_results: Vec<(usize, ItemOutcome<T>)> = stream::iter(
                chunk.iter().cloned().enumerate(),
            )
            .map(|(index, id)| {
                let fut = op(id.clone());
                async move {
                    let outcome = match fut.await {
                        Ok(value) => Ok(value),
                        Err(err) => Err(ItemError::from(&err)),
                    };
                    (index, ItemOutcome { id, outcome })
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

            chunk_results.sort_by_key(|(index, _)| *index);
            outcomes.extend(chunk_results.into_iter().map(|(_, outcome)| outcome));
        }

        outcomes
    }
}

/// Split outcomes into a success count and the failure list.
pub fn summarize<T>(outcomes: &[ItemOutcome<T>]) -> (usize, Vec<ItemFailure>) {
    let mut ok = 0;
    let mut failures = Vec::new();
    for item in outcomes {
        match &item.outcome {
            Ok(_) => ok += 1,
            Err(err) => failures.push(ItemFailure {
                id: item.id.clone(),
                kind: err.kind,
                message: err.message.clone(),
            }),
        }
    }
    (ok, failures)
}
