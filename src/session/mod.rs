//! Session and shard data model (spec §3) and the session state machine
//! (spec §4.5).

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::UploadError;

/// `(session_id, shard_hash, shard_index)` — a Shard is owned by exactly
/// one Shard Worker for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub session_id: String,
    pub shard_hash: String,
    pub shard_index: i32,
}

impl Shard {
    /// The canonical rendezvous key for this shard's escrow registration.
    pub fn shard_id(&self) -> String {
        format!("{}/{}/{}", self.session_id, self.shard_hash, self.shard_index)
    }
}

/// Mint a fresh contract id for one shard attempt. Every retried attempt
/// gets a distinct id (spec §3 Contract-Id, and the round-trip property in
/// spec §8: "retrying a shard whose previous attempt timed out yields a
/// fresh contract_id distinct from the previous one").
pub fn new_contract_id(session_id: &str) -> String {
    format!("{session_id}:{}", Uuid::new_v4())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Init,
    InitSigned,
    SubmitReady,
    Submitted,
    PayReady,
    PayinRequestSigned,
    PaidIn,
    Guarded,
    Done,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Error)
    }

    /// Valid next states from this state — a straight-line pipeline with
    /// `Error` reachable (absorbing) from every non-terminal state, per
    /// spec §4.5's diagram.
    fn valid_transitions(&self) -> &'static [SessionStatus] {
        use SessionStatus::*;
        match self {
            Init => &[InitSigned, Error],
            InitSigned => &[SubmitReady, Error],
            SubmitReady => &[Submitted, Error],
            Submitted => &[PayReady, Error],
            PayReady => &[PayinRequestSigned, Error],
            PayinRequestSigned => &[PaidIn, Error],
            PaidIn => &[Guarded, Error],
            Guarded => &[Done, Error],
            Done => &[],
            Error => &[],
        }
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// One upload attempt of one file (spec §3).
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub session_id: String,
    pub file_hash: String,
    pub shard_hashes: Vec<String>,
    pub shard_indexes: Vec<i32>,
    pub renter_id: String,
    pub offline_signing: bool,
    pub price: i64,
    pub shard_size: i64,
    pub storage_length_months: i64,
    pub created_at: DateTime<Utc>,
}

impl SessionParams {
    /// Validates the `shard_hashes`/`shard_indexes` length invariant from
    /// spec §3 before a `Session` is constructed from these params.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.shard_hashes.len() != self.shard_indexes.len() {
            return Err(UploadError::Other(anyhow::anyhow!(
                "shard_hashes and shard_indexes must have equal length ({} vs {})",
                self.shard_hashes.len(),
                self.shard_indexes.len(),
            )));
        }
        Ok(())
    }

    pub fn shard_count(&self) -> usize {
        self.shard_hashes.len()
    }

    pub fn shards(&self) -> Vec<Shard> {
        self.shard_hashes
            .iter()
            .zip(self.shard_indexes.iter())
            .map(|(hash, idx)| Shard {
                session_id: self.session_id.clone(),
                shard_hash: hash.clone(),
                shard_index: *idx,
            })
            .collect()
    }
}

/// The live, mutable half of a session: status and the cancellation token.
/// Only the Session State Machine (the aggregator) may mutate `status`;
/// only the Orchestrator may cancel (spec §3).
pub struct Session {
    pub params: SessionParams,
    status: std::sync::Mutex<SessionStatus>,
    pub cancellation_token: CancellationToken,
    /// The first terminal error observed for this session. Subsequent
    /// errors from other shards are only logged (spec §7).
    pub first_error: std::sync::Mutex<Option<String>>,
}

impl Session {
    pub fn new(params: SessionParams) -> Self {
        Self {
            params,
            status: std::sync::Mutex::new(SessionStatus::Init),
            cancellation_token: CancellationToken::new(),
            first_error: std::sync::Mutex::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    /// Attempt a transition. An illegal transition (spec §4.5) is rejected
    /// with `BadState`, which callers are expected to ignore (it is never
    /// user-visible, spec §7).
    pub fn transition_to(&self, next: SessionStatus) -> Result<(), UploadError> {
        let mut guard = self.status.lock().unwrap();
        if guard.is_terminal() {
            // A terminal Error status is absorbing (spec §3): subsequent
            // attempts to advance the session are ignored.
            return Err(UploadError::BadState {
                from: format!("{guard:?}"),
                to: format!("{next:?}"),
            });
        }
        if !guard.can_transition_to(next) {
            return Err(UploadError::BadState {
                from: format!("{guard:?}"),
                to: format!("{next:?}"),
            });
        }
        *guard = next;
        Ok(())
    }

    /// Move the session to `Error`, recording the first cause. Idempotent:
    /// a session already in `Error` just logs subsequent causes.
    pub fn fail(&self, cause: &UploadError) {
        let mut first = self.first_error.lock().unwrap();
        let already_failed = self.status() == SessionStatus::Error;
        if already_failed {
            tracing::warn!(
                session_id = %self.params.session_id,
                error = %cause,
                "session already in Error; logging additional cause"
            );
            return;
        }
        *first = Some(cause.to_string());
        drop(first);
        let mut guard = self.status.lock().unwrap();
        *guard = SessionStatus::Error;
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n: usize) -> SessionParams {
        SessionParams {
            session_id: "sess-1".into(),
            file_hash: "filehash".into(),
            shard_hashes: (0..n).map(|i| format!("shard-{i}")).collect(),
            shard_indexes: (0..n as i32).collect(),
            renter_id: "renter-1".into(),
            offline_signing: false,
            price: 10,
            shard_size: 1024,
            storage_length_months: 6,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut p = params(3);
        p.shard_indexes.pop();
        assert!(p.validate().is_err());
    }

    #[test]
    fn happy_path_linear_transitions() {
        let session = Session::new(params(1));
        use SessionStatus::*;
        for next in [
            InitSigned,
            SubmitReady,
            Submitted,
            PayReady,
            PayinRequestSigned,
            PaidIn,
            Guarded,
            Done,
        ] {
            session.transition_to(next).unwrap();
        }
        assert_eq!(session.status(), Done);
    }

    #[test]
    fn error_is_absorbing() {
        let session = Session::new(params(1));
        session.fail(&UploadError::HostPoolExhausted);
        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.transition_to(SessionStatus::InitSigned).is_err());
        assert!(session.is_cancelled());
    }

    #[test]
    fn skipping_a_state_is_bad_state() {
        let session = Session::new(params(1));
        let err = session.transition_to(SessionStatus::Submitted).unwrap_err();
        assert!(matches!(err, UploadError::BadState { .. }));
    }

    #[test]
    fn contract_ids_are_fresh_per_mint() {
        let a = new_contract_id("sess-1");
        let b = new_contract_id("sess-1");
        assert_ne!(a, b);
    }

    #[test]
    fn shard_id_is_stable_for_the_same_shard() {
        let shard = Shard {
            session_id: "sess-1".into(),
            shard_hash: "h0".into(),
            shard_index: 0,
        };
        assert_eq!(shard.shard_id(), shard.shard_id());
    }
}
