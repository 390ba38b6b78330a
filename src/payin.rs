//! Pay-in wire types exchanged with the escrow service during finalization
//! (spec §4.6, grounded on `upload_cmd_pay.go`'s `pay` function).

use serde::{Deserialize, Serialize};

/// The channel state the escrow service returned from `Submit`, which the
/// renter must countersign before pay-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel: Vec<u8>,
    pub from_signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub session_id: String,
    pub file_hash: String,
    pub file_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub payin_id: String,
    pub buyer_channel_state: ChannelState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedSubmitResult {
    pub result: SubmitResult,
    pub escrow_signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayinRequest {
    pub payin_id: String,
    pub payer_pub_key: String,
    pub buyer_channel_state: ChannelState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayinRequest {
    pub request: PayinRequest,
    pub payin_signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayinResult {
    pub payin_id: String,
    pub settled_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayinResult {
    pub result: PayinResult,
    pub escrow_signature: Vec<u8>,
}

pub fn marshal_submit_result(result: &SignedSubmitResult) -> Vec<u8> {
    serde_json::to_vec(result).expect("SignedSubmitResult is always serializable")
}
