//! Status / metrics HTTP surface (SPEC_FULL.md §2 ambient additions) plus
//! the one inbound route this coordinator actually needs: the host's
//! asynchronous reply to `/storage/upload/init`, delivered here and
//! forwarded to the guard rendezvous (spec §4.2, §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::contracts::RepairParams;
use crate::error::{ApiError, ApiResult, UploadError};
use crate::host_pool::Host;
use crate::orchestrator::Orchestrator;
use crate::session::store::SessionStore;
use crate::session::SessionParams;
use crate::signer_registry::SignerHub;

#[derive(Clone)]
pub struct StatusState {
    pub session_store: Arc<SessionStore>,
    pub signer_hub: Arc<SignerHub>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(session_status))
        .route("/rpc/upload/reply/:contract_id", post(upload_reply))
        .with_state(state)
}

async fn healthz(State(state): State<StatusState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "live_sessions": state.session_store.len() }))
}

#[derive(Debug, Serialize)]
struct SessionStatusResponse {
    session_id: String,
    status: crate::session::SessionStatus,
}

async fn session_status(
    State(state): State<StatusState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let handle = state
        .session_store
        .get(&session_id)
        .ok_or_else(|| ApiError::NotFound(format!("no such session: {session_id}")))?;
    Ok(Json(SessionStatusResponse {
        session_id,
        status: handle.session.status(),
    }))
}

/// Request body to start a new upload session (spec §3, §4).
#[derive(Debug, Deserialize)]
struct CreateSessionBody {
    session_id: String,
    file_hash: String,
    shard_hashes: Vec<String>,
    shard_indexes: Vec<i32>,
    renter_id: String,
    #[serde(default)]
    offline_signing: bool,
    price: i64,
    shard_size: i64,
    storage_length_months: i64,
    hosts: Vec<CreateSessionHost>,
    repair_params: CreateSessionRepairParams,
}

#[derive(Debug, Deserialize)]
struct CreateSessionHost {
    peer_id: String,
    advertised_price: i64,
}

#[derive(Debug, Deserialize)]
struct CreateSessionRepairParams {
    min_repair_hosts: u32,
    max_repair_hosts: u32,
    repair_reward_ratio: f64,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    session_id: String,
    status: crate::session::SessionStatus,
}

async fn create_session(
    State(state): State<StatusState>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<Json<CreateSessionResponse>> {
    let params = SessionParams {
        session_id: body.session_id.clone(),
        file_hash: body.file_hash,
        shard_hashes: body.shard_hashes,
        shard_indexes: body.shard_indexes,
        renter_id: body.renter_id,
        offline_signing: body.offline_signing,
        price: body.price,
        shard_size: body.shard_size,
        storage_length_months: body.storage_length_months,
        created_at: chrono::Utc::now(),
    };
    let hosts = body
        .hosts
        .into_iter()
        .map(|h| Host {
            peer_id: h.peer_id,
            advertised_price: h.advertised_price,
        })
        .collect();
    let repair_params = RepairParams {
        min_repair_hosts: body.repair_params.min_repair_hosts,
        max_repair_hosts: body.repair_params.max_repair_hosts,
        repair_reward_ratio: body.repair_params.repair_reward_ratio,
    };

    let handle = state
        .orchestrator
        .start_session(params, hosts, repair_params)?;

    Ok(Json(CreateSessionResponse {
        session_id: handle.session.params.session_id.clone(),
        status: handle.session.status(),
    }))
}

/// Body a host posts back in reply to `/storage/upload/init`. `ok = true`
/// delivers success to the guard rendezvous; otherwise `error` is forwarded
/// as a `HostBusinessRejection` (spec §4.4 phase 6).
#[derive(Debug, Deserialize)]
struct UploadReplyBody {
    ok: bool,
    error: Option<String>,
}

async fn upload_reply(
    State(state): State<StatusState>,
    Path(contract_id): Path<String>,
    Json(body): Json<UploadReplyBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let result = if body.ok {
        Ok(())
    } else {
        Err(UploadError::HostBusinessRejection(
            body.error.unwrap_or_else(|| "rejected".into()),
        ))
    };
    let delivered = state.signer_hub.guard.deliver(&contract_id, result);
    Ok(Json(json!({ "delivered": delivered })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crypto::Ed25519Signer;
    use crate::rpc::escrow::mock::MockEscrowClient;
    use crate::rpc::guard::mock::MockGuardClient;
    use crate::rpc::peer::mock::MockPeerRpcClient;
    use std::sync::Mutex;
    use std::time::Duration;

    fn state() -> StatusState {
        let escrow_signer = Ed25519Signer::from_hex_seed(&hex::encode([41u8; 32])).unwrap();
        let guard_signer = Ed25519Signer::from_hex_seed(&hex::encode([42u8; 32])).unwrap();
        let renter_signer = Ed25519Signer::from_hex_seed(&hex::encode([43u8; 32])).unwrap();
        let signer_hub = Arc::new(SignerHub::new());
        let session_store = Arc::new(SessionStore::new());
        let orchestrator = Arc::new(Orchestrator {
            config: Arc::new(Config {
                host: "0.0.0.0".into(),
                port: 8000,
                escrow_domain: "http://escrow.test".into(),
                guard_domain: "http://guard.test".into(),
                guard_pub_keys: vec![hex::encode([3u8; 32])],
                identity_private_key: None,
                max_shard_attempts: 2,
                backoff_initial: Duration::from_millis(1),
                backoff_max: Duration::from_millis(5),
                host_reply_timeout: Duration::from_millis(50),
                aggregator_tick: Duration::from_millis(10),
            }),
            signer_hub: signer_hub.clone(),
            session_store: session_store.clone(),
            peer_client: Arc::new(MockPeerRpcClient::default()),
            escrow_client: Arc::new(MockEscrowClient {
                signer: escrow_signer,
                calls: Mutex::new(0),
                fail: false,
            }),
            guard_client: Arc::new(MockGuardClient {
                signer: guard_signer,
                calls: Mutex::new(0),
                activated: true,
            }),
            local_signer: Some(Arc::new(renter_signer.clone())),
            renter_pub_key: renter_signer.public_key_hex(),
        });
        StatusState {
            session_store,
            signer_hub,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn create_session_then_lookup_by_id() {
        let state = state();
        let body = CreateSessionBody {
            session_id: "sess-api-1".into(),
            file_hash: "filehash".into(),
            shard_hashes: vec![],
            shard_indexes: vec![],
            renter_id: "renter-1".into(),
            offline_signing: false,
            price: 10,
            shard_size: 100,
            storage_length_months: 1,
            hosts: vec![],
            repair_params: CreateSessionRepairParams {
                min_repair_hosts: 1,
                max_repair_hosts: 3,
                repair_reward_ratio: 0.1,
            },
        };
        let created = create_session(State(state.clone()), Json(body)).await.unwrap();
        assert_eq!(created.0.session_id, "sess-api-1");

        let found = session_status(State(state), Path("sess-api-1".to_string())).await.unwrap();
        assert_eq!(found.0.session_id, "sess-api-1");
    }

    #[tokio::test]
    async fn session_status_for_unknown_id_is_not_found() {
        let state = state();
        let err = session_status(State(state), Path("nope".to_string())).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn upload_reply_rejection_is_forwarded_as_business_rejection() {
        let state = state();
        let rx = state.signer_hub.guard.register("contract-1".into()).unwrap();

        let body = UploadReplyBody {
            ok: false,
            error: Some("already full".into()),
        };
        let resp = upload_reply(State(state), Path("contract-1".into()), Json(body))
            .await
            .unwrap();
        assert_eq!(resp.0["delivered"], true);

        let delivered = rx.await.unwrap();
        assert!(matches!(delivered, Err(UploadError::HostBusinessRejection(_))));
    }
}
