//! Process-wide (in this redesign: orchestrator-owned) rendezvous maps
//! keyed by shard-id / contract-id / session-id (spec §4.2).
//!
//! Re-architected per Design Note §9 as a single `SignerHub` value owned by
//! the session orchestrator, with three typed sub-registries, instead of
//! the original's three global `cmap.New()` instances. This keeps the
//! single-sender/single-receiver contract but removes global mutable
//! state, which is what makes the registries testable in isolation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use tokio::sync::oneshot;

use crate::error::UploadError;

/// A keyed rendezvous: `register` creates the single-shot channel and
/// stores its sending half under `key`, returning the receiving half to
/// the caller. `deliver` looks the sender up, removes it, and sends.
/// `remove` is the cleanup path for a receiver that gives up without ever
/// being delivered to (e.g. a timeout) — it is idempotent, so calling it
/// after `deliver` already consumed the entry is a no-op.
pub struct Registry<K, V> {
    pub(crate) inner: DashMap<K, oneshot::Sender<V>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Register a new rendezvous under `key`. A key already in use is a
    /// programming error (spec §3 Signer Channel invariant (iii)) — the
    /// caller is expected to mint a fresh key per attempt (e.g. a fresh
    /// `contract_id`) rather than reuse one still in flight.
    pub fn register(&self, key: K) -> Result<oneshot::Receiver<V>, UploadError> {
        let (tx, rx) = oneshot::channel();
        match self.inner.entry(key) {
            Entry::Occupied(_) => Err(UploadError::Other(anyhow::anyhow!(
                "signer registry: key already has a live rendezvous"
            ))),
            Entry::Vacant(e) => {
                e.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Deliver a value to the waiter registered under `key`. Returns
    /// `false` if there is no live rendezvous for `key` (already delivered,
    /// removed, or never registered) or if the receiver was dropped.
    pub fn deliver(&self, key: &K, value: V) -> bool {
        match self.inner.remove(key) {
            Some((_, tx)) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Remove a rendezvous without delivering — the cleanup path for a
    /// receiver that gave up (timed out, or the session was cancelled).
    pub fn remove(&self, key: &K) {
        self.inner.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The host's asynchronous reply to a `/storage/upload/init` dispatch:
/// `Ok(())` means the host accepted, `Err` carries the rejection reason.
pub type GuardReply = Result<(), UploadError>;

/// The three rendezvous registries a shard worker and the finalizer
/// synchronise through, per spec §4.2's table.
#[derive(Default)]
pub struct SignerHub {
    /// Keyed by `shard_id`: renter signature bytes for the escrow contract.
    pub escrow: Registry<String, Vec<u8>>,
    /// Keyed by `contract_id`: the host-reply outcome from
    /// `/storage/upload/init`.
    pub guard: Registry<String, GuardReply>,
    /// Keyed by `session_id`: marshalled signed pay-in request bytes.
    pub pay_in: Registry<String, Vec<u8>>,
}

impl SignerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain every rendezvous belonging to `session_id`'s shards so a
    /// cancelled session doesn't leak entries forever (Design Note §9:
    /// the orchestrator, not the worker, owns cancellation cleanup).
    pub fn drain_session(&self, session_id: &str) {
        // escrow keys are shard_ids ("{session_id}/{shard_hash}/{shard_index}"),
        // guard keys are contract_ids ("{session_id}:{uuid}") — the two
        // registries use distinct separators (session::Shard::shard_id,
        // session::new_contract_id), so each needs its own prefix.
        self.escrow
            .inner
            .retain(|k, _| !k.starts_with(&format!("{session_id}/")));
        self.guard
            .inner
            .retain(|k, _| !k.starts_with(&format!("{session_id}:")));
        self.pay_in.remove(&session_id.to_string());
    }
}
