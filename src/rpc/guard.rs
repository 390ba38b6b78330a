//! The guard gRPC service client (SPEC_FULL.md §4.6 `do_guard`, specified
//! by analogy with `pay`/escrow's `PayIn`): submits the signed guard
//! contracts collected from every shard and activates the session so the
//! guard service starts policing host availability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::UploadError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardActivationRequest {
    pub session_id: String,
    pub file_hash: String,
    pub guard_contracts: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardActivationResult {
    pub session_id: String,
    pub activated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedGuardActivationResult {
    pub result: GuardActivationResult,
    pub guard_signature: Vec<u8>,
}

#[async_trait]
pub trait GuardClient: Send + Sync {
    async fn activate(
        &self,
        request: GuardActivationRequest,
    ) -> Result<SignedGuardActivationResult, UploadError>;
}

/// A reqwest-backed stand-in for the guard service's protobuf stub, the
/// same stand-in shape as `rpc::escrow::HttpEscrowClient`.
pub struct HttpGuardClient {
    client: reqwest::Client,
    base_url: String,
    guard_pub_key: String,
}

impl HttpGuardClient {
    pub fn new(client: reqwest::Client, base_url: String, guard_pub_key: String) -> Self {
        Self {
            client,
            base_url,
            guard_pub_key,
        }
    }
}

#[async_trait]
impl GuardClient for HttpGuardClient {
    async fn activate(
        &self,
        request: GuardActivationRequest,
    ) -> Result<SignedGuardActivationResult, UploadError> {
        let url = format!("{}/guard/Activate", self.base_url);
        let resp: SignedGuardActivationResult = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| UploadError::GuardRpcFailure(e.to_string()))?
            .json()
            .await
            .map_err(|e| UploadError::GuardRpcFailure(e.to_string()))?;

        verify_guard_result(&self.guard_pub_key, &resp)?;
        if !resp.result.activated {
            return Err(UploadError::GuardRpcFailure(
                "guard service declined activation".into(),
            ));
        }
        Ok(resp)
    }
}

pub fn verify_guard_result(
    guard_pub_key: &str,
    result: &SignedGuardActivationResult,
) -> Result<(), UploadError> {
    let payload = serde_json::to_vec(&result.result)
        .map_err(|e| UploadError::GuardRpcFailure(e.to_string()))?;
    let ok = crypto::verify(guard_pub_key, &payload, &result.guard_signature)?;
    if ok {
        Ok(())
    } else {
        Err(UploadError::GuardRpcFailure(
            "guard signature verification failed".into(),
        ))
    }
}
