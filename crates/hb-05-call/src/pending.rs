//! Pending call store.
//!
//! Maps call ids to callers waiting on `call:result`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use shared_types::{CallError, CallId, InvocationError};
use tokio::sync::oneshot;
use tracing::debug;

/// What a waiting caller receives.
pub type CallOutcome = Result<Value, InvocationError>;

/// A call waiting for its result.
struct PendingCall {
    responder: oneshot::Sender<CallOutcome>,
    requested_at: Instant,
    method: String,
}

/// Counters for the pending store.
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_timeouts: AtomicU64,
    pub total_aborted: AtomicU64,
    /// Results that matched no pending call.
    pub total_discarded: AtomicU64,
}

/// Correlation records for outstanding calls.
///
/// Flow:
/// 1. `register()` creates a record and returns its id and a receiver
/// 2. The caller publishes the request and awaits the receiver
/// 3. The result listener calls `complete()`
/// 4. On timeout the caller calls `expire()`; on shutdown `close()` drops
///    every responder
#[derive(Default)]
pub struct PendingCalls {
    pending: DashMap<CallId, PendingCall>,
    closed: AtomicBool,
    stats: PendingStats,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new call under a fresh id.
    ///
    /// Fails with `CallAborted` once the store is closed.
    pub fn register(
        &self,
        method: &str,
    ) -> Result<(CallId, oneshot::Receiver<CallOutcome>), CallError> {
        if self.is_closed() {
            return Err(CallError::CallAborted {
                method: method.to_string(),
            });
        }

        let (tx, rx) = oneshot::channel();
        let call_id = loop {
            let call_id = CallId::generate();
            match self.pending.entry(call_id.clone()) {
                Entry::Occupied(_) => {
                    debug!(%call_id, "Call id collision, regenerating");
                }
                Entry::Vacant(slot) => {
                    slot.insert(PendingCall {
                        responder: tx,
                        requested_at: Instant::now(),
                        method: method.to_string(),
                    });
                    break call_id;
                }
            }
        };

        // close() may have drained the map between the check and the insert.
        if self.is_closed() {
            self.pending.remove(&call_id);
            return Err(CallError::CallAborted {
                method: method.to_string(),
            });
        }

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(%call_id, method, "Registered pending call");
        Ok((call_id, rx))
    }

    /// Resolve a call. Returns `false` when the id is not pending.
    pub fn complete(&self, call_id: &CallId, outcome: CallOutcome) -> bool {
        let Some((_, call)) = self.pending.remove(call_id) else {
            self.stats.total_discarded.fetch_add(1, Ordering::Relaxed);
            debug!(%call_id, "Result for unknown or expired call discarded");
            return false;
        };

        let elapsed = call.requested_at.elapsed();
        if call.responder.send(outcome).is_ok() {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                %call_id,
                method = call.method,
                response_time_ms = elapsed.as_millis(),
                "Completed pending call"
            );
            true
        } else {
            debug!(%call_id, method = call.method, "Caller went away before the result");
            false
        }
    }

    /// Drop a call whose wait bound elapsed. Returns `false` if it already
    /// resolved.
    pub fn expire(&self, call_id: &CallId) -> bool {
        if self.pending.remove(call_id).is_some() {
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Drop a call without counting it as a timeout.
    pub fn cancel(&self, call_id: &CallId) -> bool {
        self.pending.remove(call_id).is_some()
    }

    /// Refuse new calls and drop every responder. Waiting callers observe a
    /// closed channel. Returns the number of calls aborted.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<CallId> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut aborted = 0usize;
        for id in &ids {
            if self.pending.remove(id).is_some() {
                aborted += 1;
            }
        }
        self.stats
            .total_aborted
            .fetch_add(aborted as u64, Ordering::Relaxed);
        aborted
    }

    /// Accept new calls again.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_pending(&self, call_id: &CallId) -> bool {
        self.pending.contains_key(call_id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}
