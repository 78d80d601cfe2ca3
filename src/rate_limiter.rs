//! Quota-aware rate limiter for the Gmail surface
//!
//! Gmail enforces per-user quota that differs for read and write traffic, so
//! the limiter keeps one token bucket per operation class:
//! - `Read` covers list/get calls (1 token each)
//! - `Write` covers modify/trash/delete/send calls; batched mutations cost
//!   one token per affected message, capped per call
//!
//! Buckets refill continuously at the configured rate, allow bursting up to
//! the configured capacity, and block callers when drained.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::RateLimitConfig;

/// Operation class an outbound Gmail call is billed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// messages.list, messages.get, threads.get, drafts.list, settings getters
    Read,
    /// modify, trash, delete, batchModify, drafts create/send, settings setters
    Write,
}

/// Token cost of one call.
///
/// Batched mutations are charged proportionally to the number of targets so a
/// single batchModify cannot sidestep the write budget.
pub fn write_cost(affected: usize) -> f64 {
    const PER_CALL_CAP: f64 = 25.0;
    (affected.max(1) as f64).min(PER_CALL_CAP)
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
    total_consumed: u64,
    total_operations: u64,
}

impl BucketState {
    fn new(refill_rate: f64, capacity: f64) -> Self {
        Self {
            available: capacity, // Start with full bucket
            capacity,
            refill_rate,
            last_refill: Instant::now(),
            total_consumed: 0,
            total_operations: 0,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Two-bucket rate limiter shared by every Gmail-touching component.
///
/// Cloning shares state; the limiter is constructed once at startup and
/// threaded into the client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    read: Arc<Mutex<BucketState>>,
    write: Arc<Mutex<BucketState>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            read: Arc::new(Mutex::new(BucketState::new(
                config.read_tokens_per_second,
                config.burst,
            ))),
            write: Arc::new(Mutex::new(BucketState::new(
                config.write_tokens_per_second,
                config.burst,
            ))),
        }
    }

    fn bucket(&self, class: OpClass) -> &Arc<Mutex<BucketState>> {
        match class {
            OpClass::Read => &self.read,
            OpClass::Write => &self.write,
        }
    }

    /// Acquire `cost` tokens from the class bucket, waiting if necessary.
    pub async fn acquire(&self, class: OpClass, cost: f64) {
        let bucket = self.bucket(class);

        loop {
            let wait = {
                let mut state = bucket.lock().await;
                state.refill();

                trace!(
                    ?class,
                    available = state.available,
                    capacity = state.capacity,
                    cost,
                    "rate limiter state"
                );

                if state.available >= cost {
                    state.available -= cost;
                    state.total_consumed += cost as u64;
                    state.total_operations += 1;
                    return;
                }

                let deficit = cost - state.available;
                std::time::Duration::from_secs_f64(deficit / state.refill_rate)
            };

            // Wait outside the lock so other classes keep moving
            debug!(?class, cost, wait_ms = wait.as_millis() as u64, "rate limiter drained, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Acquire a single read token.
    pub async fn acquire_read(&self) {
        self.acquire(OpClass::Read, 1.0).await;
    }

    /// Acquire write tokens proportional to the number of affected targets.
    pub async fn acquire_write(&self, affected: usize) {
        self.acquire(OpClass::Write, write_cost(affected)).await;
    }

    /// Try to take `cost` tokens without waiting.
    pub async fn try_acquire(&self, class: OpClass, cost: f64) -> bool {
        let mut state = self.bucket(class).lock().await;
        state.refill();
        if state.available >= cost {
            state.available -= cost;
            state.total_consumed += cost as u64;
            state.total_operations += 1;
            true
        } else {
            false
        }
    }

    /// Current available tokens without consuming any.
    pub async fn available(&self, class: OpClass) -> f64 {
        let mut state = self.bucket(class).lock().await;
        state.refill();
        state.available
    }

    /// Usage statistics for one class.
    pub async fn stats(&self, class: OpClass) -> RateLimiterStats {
        let state = self.bucket(class).lock().await;
        RateLimiterStats {
            available: state.available,
            capacity: state.capacity,
            refill_rate: state.refill_rate,
            total_consumed: state.total_consumed,
            total_operations: state.total_operations,
        }
    }
}

/// Statistics about one bucket's usage
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub available: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub total_consumed: u64,
    pub total_operations: u64,
}
