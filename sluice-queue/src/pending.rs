//! Pending-result rendezvous.
//!
//! A submitter registers a query id before submission, the worker that
//! completes the matching query signals exactly once, and the submitter
//! blocks with a deadline. Slots are condvar-guarded; the manager mutex
//! covers only structural mutation of the table.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use sluice_core::errors::QueueError;
use sluice_core::types::QueryResult;

#[derive(Debug, Default)]
struct SlotState {
    result: Option<QueryResult>,
    completed: bool,
    timed_out: bool,
}

#[derive(Debug)]
struct PendingSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

/// The submitter's half of one rendezvous slot. Dropping it after
/// retrieval releases the slot; the table entry is removed by the signal
/// or by expiry cleanup.
#[derive(Debug)]
pub struct PendingQueryResult {
    query_id: String,
    slot: Arc<PendingSlot>,
    submitted_at: Instant,
    timeout: Duration,
}

impl PendingQueryResult {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn is_completed(&self) -> bool {
        self.slot.state.lock().map(|s| s.completed).unwrap_or(false)
    }

    pub fn is_timed_out(&self) -> bool {
        self.slot.state.lock().map(|s| s.timed_out).unwrap_or(false)
    }

    /// Block until the matching query completes or the deadline
    /// (submission time + timeout) passes. A timeout is distinguishable
    /// from a failed wait; a failure of the wait primitive itself is a
    /// failure, not a success.
    pub fn wait(&self) -> Result<QueryResult, QueueError> {
        let deadline = self.submitted_at + self.timeout;
        let failed = |message: &str| QueueError::PendingFailed {
            query_id: self.query_id.clone(),
            message: message.to_string(),
        };

        let mut state = self
            .slot
            .state
            .lock()
            .map_err(|_| failed("slot lock poisoned"))?;
        loop {
            if state.completed {
                return state.result.take().ok_or_else(|| failed("result already taken"));
            }
            if state.timed_out {
                return Err(QueueError::PendingTimeout {
                    query_id: self.query_id.clone(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                state.timed_out = true;
                return Err(QueueError::PendingTimeout {
                    query_id: self.query_id.clone(),
                });
            }
            let (guard, _) = self
                .slot
                .ready
                .wait_timeout(state, deadline - now)
                .map_err(|_| failed("condvar wait failed"))?;
            state = guard;
        }
    }
}

struct PendingEntry {
    query_id: String,
    slot: Arc<PendingSlot>,
    submitted_at: Instant,
    timeout: Duration,
}

/// Table of in-flight rendezvous slots, shared by all worker threads and
/// submitters.
pub struct PendingResultManager {
    entries: Mutex<Vec<PendingEntry>>,
}

impl PendingResultManager {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(64)),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Register a slot for `query_id`. A given id may be registered at
    /// most once concurrently.
    pub fn register(
        &self,
        query_id: &str,
        timeout: Duration,
    ) -> Result<PendingQueryResult, QueueError> {
        let mut entries = self.entries.lock().map_err(|_| QueueError::PendingFailed {
            query_id: query_id.to_string(),
            message: "manager lock poisoned".to_string(),
        })?;
        if entries.iter().any(|e| e.query_id == query_id) {
            return Err(QueueError::DuplicateQueryId {
                query_id: query_id.to_string(),
            });
        }
        let slot = Arc::new(PendingSlot {
            state: Mutex::new(SlotState::default()),
            ready: Condvar::new(),
        });
        let submitted_at = Instant::now();
        entries.push(PendingEntry {
            query_id: query_id.to_string(),
            slot: Arc::clone(&slot),
            submitted_at,
            timeout,
        });
        Ok(PendingQueryResult {
            query_id: query_id.to_string(),
            slot,
            submitted_at,
            timeout,
        })
    }

    /// Deliver a result to the waiter for `query_id`, waking it. The entry
    /// is consumed, so a second signal for the same id finds no match. On
    /// no match the result is handed back — the manager takes ownership
    /// only on success.
    pub fn signal_ready(&self, query_id: &str, result: QueryResult) -> Result<(), QueryResult> {
        let entry = {
            let Ok(mut entries) = self.entries.lock() else {
                return Err(result);
            };
            match entries.iter().position(|e| e.query_id == query_id) {
                Some(index) => entries.swap_remove(index),
                None => {
                    debug!("no pending entry for query '{query_id}'");
                    return Err(result);
                }
            }
        };

        let outcome = match entry.slot.state.lock() {
            Ok(mut state) => {
                state.result = Some(result);
                state.completed = true;
                entry.slot.ready.notify_one();
                Ok(())
            }
            Err(_) => {
                warn!("pending slot for '{query_id}' poisoned; dropping result");
                Ok(())
            }
        };
        outcome
    }

    /// Sweep entries whose deadline has passed or that were already marked
    /// timed out, waking any stuck waiters. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let mut cleaned = 0;
        entries.retain(|entry| {
            let expired = entry.submitted_at.elapsed() >= entry.timeout
                || entry.slot.state.lock().map(|s| s.timed_out).unwrap_or(true);
            if expired {
                if let Ok(mut state) = entry.slot.state.lock() {
                    state.timed_out = true;
                }
                entry.slot.ready.notify_all();
                cleaned += 1;
            }
            !expired
        });
        if cleaned > 0 {
            debug!("cleaned up {cleaned} expired pending results");
        }
        cleaned
    }
}

impl Default for PendingResultManager {
    fn default() -> Self {
        Self::new()
    }
}
