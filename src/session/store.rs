//! In-memory registry of live sessions plus their per-shard counters.
//!
//! The original tracked sessions in a persistent store (`sessions.RenterSession`
//! backed by on-disk state); this redesign keeps sessions in memory for the
//! lifetime of the process, which is sufficient for the state machine the
//! spec describes (a session is destroyed once its status goes terminal).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::{Session, SessionStatus};

/// A session plus the counters the aggregator polls (spec §4.5: "queries
/// `(completed, errored)` counters").
pub struct SessionHandle {
    pub session: Arc<Session>,
    completed: AtomicU32,
    errored: AtomicU32,
    pub shard_count: u32,
    /// Every shard's signed guard contract bytes, handed to the Finalizer's
    /// `do_guard` step once the session completes.
    guard_contracts: std::sync::Mutex<Vec<Vec<u8>>>,
}

impl SessionHandle {
    pub fn new(session: Arc<Session>, shard_count: u32) -> Self {
        Self {
            session,
            completed: AtomicU32::new(0),
            errored: AtomicU32::new(0),
            shard_count,
            guard_contracts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn push_guard_contract(&self, bytes: Vec<u8>) {
        self.guard_contracts.lock().unwrap().push(bytes);
    }

    pub fn guard_contracts_snapshot(&self) -> Vec<Vec<u8>> {
        self.guard_contracts.lock().unwrap().clone()
    }

    pub fn mark_shard_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_shard_errored(&self) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }

    /// `(completed, errored)`, satisfying the universal invariant
    /// `completed + errored <= N` (spec §8).
    pub fn counts(&self) -> (u32, u32) {
        (
            self.completed.load(Ordering::SeqCst),
            self.errored.load(Ordering::SeqCst),
        )
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions
            .insert(handle.session.params.session_id.clone(), handle);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    /// Destroy a session once its status has gone terminal (spec §3:
    /// "destroyed when status becomes terminal (Done or Error)").
    pub fn remove_if_terminal(&self, session_id: &str) {
        if let Some(handle) = self.get(session_id) {
            if handle.session.status().is_terminal() {
                self.sessions.remove(session_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn statuses(&self) -> Vec<(String, SessionStatus)> {
        self.sessions
            .iter()
            .map(|r| (r.key().clone(), r.value().session.status()))
            .collect()
    }
}
