//! Ordered iterator over candidate hosts (spec §4.1).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::UploadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub peer_id: String,
    pub advertised_price: i64,
}

/// Consumed with concurrent workers: safe under concurrent access, and
/// callers may receive the same host simultaneously (a host may legitimately
/// serve several shards of one file, per spec §4.1).
pub struct HostPool {
    candidates: Vec<Host>,
    cursor: AtomicUsize,
    /// Hosts a worker has already tried and failed against for this
    /// session; skipped on subsequent draws so a retried shard doesn't
    /// immediately re-select a host that just rejected it.
    excluded: Mutex<Vec<String>>,
}

impl HostPool {
    pub fn new(candidates: Vec<Host>) -> Self {
        Self {
            candidates,
            cursor: AtomicUsize::new(0),
            excluded: Mutex::new(Vec::new()),
        }
    }

    /// Returns the next host whose `advertised_price <= max_price`, skipping
    /// hosts already marked failed for this session. Returns
    /// `HostPoolExhausted` once the candidate list is drained.
    pub fn next_valid_host(&self, max_price: i64) -> Result<Host, UploadError> {
        loop {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(candidate) = self.candidates.get(idx) else {
                return Err(UploadError::HostPoolExhausted);
            };
            if candidate.advertised_price > max_price {
                continue;
            }
            let excluded = self.excluded.lock().unwrap();
            if excluded.contains(&candidate.peer_id) {
                continue;
            }
            return Ok(candidate.clone());
        }
    }

    /// Mark a host as failed so future draws within this session skip it.
    pub fn mark_failed(&self, peer_id: &str) {
        self.excluded.lock().unwrap().push(peer_id.to_string());
    }
}
