//! Pure constructors for escrow and guard contract messages (spec §4.3).
//!
//! No I/O, no blocking — every function here is a plain data
//! transformation. The on-wire encoding is JSON rather than the original's
//! protobuf, since the protobuf schemas themselves are an external
//! collaborator this repo does not own (spec §1: escrow/guard gRPC
//! services are "consumed as request/response RPCs").

use serde::{Deserialize, Serialize};

use crate::error::{UploadError, UploadResult};

/// Payment schedule for an escrow contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Schedule {
    Monthly,
    Customized { period_days: u32 },
}

/// Repair parameters carried on the guard contract. Promoted to a
/// first-class type per SPEC_FULL.md §3 — the original's
/// `ContractParams.RepairParams` field, dropped from the distilled data
/// model. Repair scheduling *policy* stays out of scope (spec §1
/// Non-goals); these are just the parameters a guard contract records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RepairParams {
    pub min_repair_hosts: u32,
    pub max_repair_hosts: u32,
    pub repair_reward_ratio: f64,
}

/// `total_pay = price · shard_size · storage_length_months` (spec §3).
pub fn total_pay(shard_size: i64, price: i64, storage_length_months: i64) -> i64 {
    price.saturating_mul(shard_size).saturating_mul(storage_length_months)
}

// ---------------------------------------------------------------------------
// Escrow contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowContract {
    pub contract_id: String,
    pub payer_pub_key: String,
    pub host_pub_key: String,
    pub auth_pub_key: String,
    pub total_pay: i64,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEscrowContract {
    pub contract: EscrowContract,
    pub buyer_signature: Vec<u8>,
    pub seller_signature: Option<Vec<u8>>,
}

/// Build an unsigned escrow contract. Fails with `ConfigMissing` if no
/// guard ("auth") public key is configured (spec §4.3), or
/// `InvalidPeerKey` if a supplied key is not well-formed hex.
pub fn new_escrow_contract(
    contract_id: impl Into<String>,
    payer_pub_key: &str,
    host_pub_key: &str,
    guard_pub_keys: &[String],
    total_pay: i64,
    schedule: Schedule,
) -> UploadResult<EscrowContract> {
    let auth_pub_key = guard_pub_keys
        .first()
        .ok_or_else(|| UploadError::ConfigMissing("Services.GuardPubKeys is empty".into()))?
        .clone();

    for key in [payer_pub_key, host_pub_key, auth_pub_key.as_str()] {
        if hex::decode(key).is_err() {
            return Err(UploadError::InvalidPeerKey(key.to_string()));
        }
    }

    Ok(EscrowContract {
        contract_id: contract_id.into(),
        payer_pub_key: payer_pub_key.to_string(),
        host_pub_key: host_pub_key.to_string(),
        auth_pub_key,
        total_pay,
        schedule,
    })
}

/// Attach the renter's (buyer's) signature and, once the host countersigns,
/// the host's (seller's) signature, then marshal to bytes.
pub fn sign_and_marshal_escrow(
    contract: EscrowContract,
    buyer_signature: Vec<u8>,
    seller_signature: Option<Vec<u8>>,
) -> UploadResult<Vec<u8>> {
    let signed = SignedEscrowContract {
        contract,
        buyer_signature,
        seller_signature,
    };
    serde_json::to_vec(&signed).map_err(|e| UploadError::Other(e.into()))
}

pub fn unmarshal_escrow(bytes: &[u8]) -> UploadResult<SignedEscrowContract> {
    serde_json::from_slice(bytes).map_err(|e| UploadError::Other(e.into()))
}

// ---------------------------------------------------------------------------
// Guard contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardContractParams {
    pub contract_id: String,
    pub renter_peer: String,
    pub host_peer: String,
    pub shard_index: i32,
    pub shard_hash: String,
    pub shard_size: i64,
    pub file_hash: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub storage_length_months: i64,
    pub price: i64,
    pub total_pay: i64,
    pub repair_params: RepairParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardContract {
    pub params: GuardContractParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedGuardContract {
    pub contract: GuardContract,
    pub renter_signature: Vec<u8>,
}

pub fn new_guard_contract(params: GuardContractParams) -> GuardContract {
    GuardContract { params }
}

pub fn sign_and_marshal_guard(
    contract: GuardContract,
    renter_signature: Vec<u8>,
) -> UploadResult<Vec<u8>> {
    let signed = SignedGuardContract {
        contract,
        renter_signature,
    };
    serde_json::to_vec(&signed).map_err(|e| UploadError::Other(e.into()))
}

pub fn unmarshal_guard(bytes: &[u8]) -> UploadResult<SignedGuardContract> {
    serde_json::from_slice(bytes).map_err(|e| UploadError::Other(e.into()))
}
