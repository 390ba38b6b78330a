//! The libp2p peer-RPC transport (spec §6): "a typed
//! `call(peer, method, args…) → bytes | Error`". Here specialised to the
//! single method the coordinator dispatches, `/storage/upload/init`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Positional arguments for `/storage/upload/init` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitArgs {
    pub session_id: String,
    pub file_hash: String,
    pub shard_hash: String,
    pub price: i64,
    pub escrow_contract_bytes: Vec<u8>,
    pub guard_contract_bytes: Vec<u8>,
    pub storage_length: i64,
    pub shard_size: i64,
    pub shard_index: i32,
    pub renter_peer_id: String,
}

/// Error classes on the *outbound* `/storage/upload/init` call itself
/// (spec §6) — distinct from the host's asynchronous reply, which arrives
/// out-of-band on the guard rendezvous.
#[derive(Debug, thiserror::Error)]
pub enum PeerRpcError {
    /// Transport-level failure (connection refused, timed out, peer
    /// unreachable). The host may still complete via the reply rendezvous,
    /// so the dispatcher swallows this (spec §4.4 phase 5).
    #[error("io error calling peer: {0}")]
    Io(String),

    /// The host rejected the call at the application layer (bad contract,
    /// already full, etc).
    #[error("business error from peer: {0}")]
    Business(String),

    #[error("peer rpc error: {0}")]
    Other(String),
}

#[async_trait]
pub trait PeerRpcClient: Send + Sync {
    async fn upload_init(&self, peer: &str, args: UploadInitArgs) -> Result<(), PeerRpcError>;
}

/// A reqwest-backed adapter standing in for the libp2p transport. Peer ids
/// are expected to resolve directly to an HTTP base URL in this
/// environment; real peer routing/dialing is the out-of-scope
/// collaborator this trait boundary exists to isolate.
pub struct HttpPeerRpcClient {
    client: reqwest::Client,
}

impl HttpPeerRpcClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PeerRpcClient for HttpPeerRpcClient {
    async fn upload_init(&self, peer: &str, args: UploadInitArgs) -> Result<(), PeerRpcError> {
        let url = format!("{peer}/storage/upload/init");
        let resp = self
            .client
            .post(&url)
            .json(&args)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    PeerRpcError::Io(e.to_string())
                } else {
                    PeerRpcError::Other(e.to_string())
                }
            })?;

        if resp.status().is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PeerRpcError::Business(body));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(PeerRpcError::Other(format!("unexpected status {status}")));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// A mock that records every dispatched call, used by the shard-worker
    /// and integration tests to assert fire-and-forget dispatch behaviour
    /// without a network.
    #[derive(Default)]
    pub struct MockPeerRpcClient {
        pub calls: Mutex<Vec<(String, UploadInitArgs)>>,
        pub result: Mutex<Option<Result<(), String>>>,
    }

    #[async_trait]
    impl PeerRpcClient for MockPeerRpcClient {
        async fn upload_init(&self, peer: &str, args: UploadInitArgs) -> Result<(), PeerRpcError> {
            self.calls
                .lock()
                .unwrap()
                .push((peer.to_string(), args));
            match self.result.lock().unwrap().clone() {
                Some(Ok(())) | None => Ok(()),
                Some(Err(e)) => Err(PeerRpcError::Business(e)),
            }
        }
    }
}
