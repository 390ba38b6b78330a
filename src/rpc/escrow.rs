//! The escrow gRPC service client (spec §4.6, §6): `Submit(file_hash,
//! file_size) → SignedSubmitResult` followed by `PayIn(SignedPayinRequest)
//! → SignedPayinResult`, both carrying a renter-side signature check.

use async_trait::async_trait;

use crate::crypto;
use crate::error::UploadError;
use crate::payin::{SignedPayinRequest, SignedPayinResult, SignedSubmitResult};

#[async_trait]
pub trait EscrowClient: Send + Sync {
    /// The Finalizer's first step (spec §4.6): submit the file for escrow
    /// bookkeeping and get back the buyer channel state to countersign.
    async fn submit(
        &self,
        session_id: &str,
        file_hash: &str,
        file_size: i64,
    ) -> Result<SignedSubmitResult, UploadError>;

    async fn pay_in(
        &self,
        request: SignedPayinRequest,
    ) -> Result<SignedPayinResult, UploadError>;
}

/// A reqwest-backed stand-in for the generated gRPC stub. The escrow
/// service's protobuf schema is an external collaborator (spec §1); this
/// adapter speaks the same request/response shape over JSON so the
/// coordinator's signature-verification logic is exercised the same way a
/// real tonic client would drive it.
pub struct HttpEscrowClient {
    client: reqwest::Client,
    base_url: String,
    /// `Services.GuardPubKeys[0]`-style configured escrow verifying key,
    /// used to check `SignedPayinResult::escrow_signature`.
    escrow_pub_key: String,
}

impl HttpEscrowClient {
    pub fn new(client: reqwest::Client, base_url: String, escrow_pub_key: String) -> Self {
        Self {
            client,
            base_url,
            escrow_pub_key,
        }
    }
}

#[async_trait]
impl EscrowClient for HttpEscrowClient {
    async fn submit(
        &self,
        session_id: &str,
        file_hash: &str,
        file_size: i64,
    ) -> Result<SignedSubmitResult, UploadError> {
        let url = format!("{}/escrow/Submit", self.base_url);
        let req = crate::payin::SubmitRequest {
            session_id: session_id.to_string(),
            file_hash: file_hash.to_string(),
            file_size,
        };
        let resp: SignedSubmitResult = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| UploadError::EscrowRpcFailure(e.to_string()))?
            .json()
            .await
            .map_err(|e| UploadError::EscrowRpcFailure(e.to_string()))?;

        let payload = serde_json::to_vec(&resp.result)
            .map_err(|e| UploadError::EscrowRpcFailure(e.to_string()))?;
        let ok = crypto::verify(&self.escrow_pub_key, &payload, &resp.escrow_signature)?;
        if !ok {
            return Err(UploadError::EscrowSignatureInvalid);
        }
        Ok(resp)
    }

    async fn pay_in(
        &self,
        request: SignedPayinRequest,
    ) -> Result<SignedPayinResult, UploadError> {
        let url = format!("{}/escrow/PayIn", self.base_url);
        let resp: SignedPayinResult = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| UploadError::EscrowRpcFailure(e.to_string()))?
            .json()
            .await
            .map_err(|e| UploadError::EscrowRpcFailure(e.to_string()))?;

        verify_escrow_result(&self.escrow_pub_key, &resp)?;
        Ok(resp)
    }
}

/// Verify the escrow service's signature on a `PayIn` result against the
/// configured escrow public key (spec §4.6 step 6).
pub fn verify_escrow_result(
    escrow_pub_key: &str,
    result: &SignedPayinResult,
) -> Result<(), UploadError> {
    let payload = serde_json::to_vec(&result.result)
        .map_err(|e| UploadError::EscrowRpcFailure(e.to_string()))?;
    let ok = crypto::verify(escrow_pub_key, &payload, &result.escrow_signature)?;
    if ok {
        Ok(())
    } else {
        Err(UploadError::EscrowSignatureInvalid)
    }
}
