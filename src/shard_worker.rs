//! Per-shard goroutine (spec §4.4): pick host, sign two contracts in
//! parallel, dispatch to the host, await its reply, retry with backoff on
//! retryable failure.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

use crate::config::Config;
use crate::contracts::{self, RepairParams, Schedule};
use crate::crypto::Signer;
use crate::error::UploadError;
use crate::host_pool::HostPool;
use crate::rpc::peer::{PeerRpcClient, PeerRpcError, UploadInitArgs};
use crate::session::store::SessionHandle;
use crate::session::Shard;
use crate::signer_registry::SignerHub;

/// Everything one shard worker needs, shared with its siblings.
pub struct ShardWorkerContext {
    pub handle: Arc<SessionHandle>,
    pub shard: Shard,
    pub file_hash: String,
    pub price: i64,
    pub shard_size: i64,
    pub storage_length_months: i64,
    pub renter_id: String,
    pub renter_pub_key: String,
    pub offline_signing: bool,
    pub repair_params: RepairParams,
    pub guard_pub_keys: Vec<String>,
    pub host_pool: Arc<HostPool>,
    pub signer_hub: Arc<SignerHub>,
    pub peer_client: Arc<dyn PeerRpcClient>,
    /// The local signing key, present only when the session signs online.
    pub local_signer: Option<Arc<dyn Signer>>,
    pub config: Arc<Config>,
}

/// Run the retry envelope for one shard to completion, reporting into the
/// session's counters. Never panics and never returns an error — all
/// outcomes are reported via `handle`/`session`.
pub async fn run(ctx: ShardWorkerContext) {
    let mut backoff: ExponentialBackoff = backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(ctx.config.backoff_initial)
        .with_max_interval(ctx.config.backoff_max)
        .with_max_elapsed_time(None)
        .build();

    for attempt in 1..=ctx.config.max_shard_attempts {
        match attempt_once(&ctx).await {
            Ok(()) => {
                ctx.handle.mark_shard_completed();
                metrics::counter!("shards_completed_total").increment(1);
                return;
            }
            Err(e) if e.is_silent() => {
                // Cancellation observed mid-attempt: success-without-work
                // (spec §4.4 phase 1). The aggregator discovers cancellation
                // independently.
                return;
            }
            Err(e) if e.is_retryable() && attempt < ctx.config.max_shard_attempts => {
                tracing::warn!(
                    session_id = %ctx.shard.session_id,
                    shard_hash = %ctx.shard.shard_hash,
                    attempt,
                    error = %e,
                    "shard attempt failed, retrying"
                );
                metrics::counter!("shards_retried_total").increment(1);
                let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(1));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.handle.session.cancellation_token.cancelled() => return,
                }
            }
            Err(e) => {
                fail_shard(&ctx, &e);
                return;
            }
        }
    }

    fail_shard(&ctx, &UploadError::HostTimeout);
}

fn fail_shard(ctx: &ShardWorkerContext, cause: &UploadError) {
    ctx.handle.mark_shard_errored();
    metrics::counter!("shards_errored_total").increment(1);
    ctx.handle.session.fail(cause);
    tracing::error!(
        session_id = %ctx.shard.session_id,
        shard_hash = %ctx.shard.shard_hash,
        error = %cause,
        "shard attempt terminally failed"
    );
}

/// One attempt through phases 1–6 of spec §4.4.
async fn attempt_once(ctx: &ShardWorkerContext) -> Result<(), UploadError> {
    // Phase 1: cancellation check.
    if ctx.handle.session.is_cancelled() {
        return Err(UploadError::Cancelled);
    }

    // Phase 2: host selection.
    let host = ctx.host_pool.next_valid_host(ctx.price).map_err(|e| {
        tracing::error!(session_id = %ctx.shard.session_id, "host pool exhausted");
        e
    })?;

    // Phase 3: contract id.
    let contract_id = crate::session::new_contract_id(&ctx.shard.session_id);

    // Phase 4: parallel signing.
    let (escrow_bytes, guard_bytes) = tokio::try_join!(
        sign_escrow(ctx, &host, &contract_id),
        sign_guard(ctx, &host, &contract_id),
    )
    .map_err(|e| {
        ctx.host_pool.mark_failed(&host.peer_id);
        e
    })?;
    ctx.handle.push_guard_contract(guard_bytes.clone());

    // Phase 5 + 6: peer dispatch and bounded await on the reply rendezvous.
    // The rendezvous is created before dispatch so the reply can never
    // arrive before a receiver exists (spec §4.4 invariant).
    let guard_rx = ctx
        .signer_hub
        .guard
        .register(contract_id.clone())?;

    let dispatch_args = UploadInitArgs {
        session_id: ctx.shard.session_id.clone(),
        file_hash: ctx.file_hash.clone(),
        shard_hash: ctx.shard.shard_hash.clone(),
        price: ctx.price,
        escrow_contract_bytes: escrow_bytes,
        guard_contract_bytes: guard_bytes,
        storage_length: ctx.storage_length_months,
        shard_size: ctx.shard_size,
        shard_index: ctx.shard.shard_index,
        renter_peer_id: ctx.renter_id.clone(),
    };

    let peer = host.peer_id.clone();
    let peer_client = ctx.peer_client.clone();
    let hub = ctx.signer_hub.clone();
    let dispatch_contract_id = contract_id.clone();
    let cancellation = ctx.handle.session.cancellation_token.clone();

    // Fire-and-forget, attached to the session's cancellation token (Design
    // Note §9): its result is discarded if the session is torn down first.
    tokio::spawn(async move {
        tokio::select! {
            result = peer_client.upload_init(&peer, dispatch_args) => {
                match result {
                    Ok(()) => {}
                    // IoError is swallowed: the host may still complete via
                    // the reply rendezvous (spec §4.4 phase 5).
                    Err(PeerRpcError::Io(e)) => {
                        tracing::warn!(contract_id = %dispatch_contract_id, error = %e, "peer rpc io error, swallowed");
                    }
                    Err(PeerRpcError::Business(e)) => {
                        hub.guard.deliver(&dispatch_contract_id, Err(UploadError::HostBusinessRejection(e)));
                    }
                    Err(PeerRpcError::Other(e)) => {
                        hub.guard.deliver(&dispatch_contract_id, Err(UploadError::HostUnreachable(e)));
                    }
                }
            }
            _ = cancellation.cancelled() => {}
        }
    });

    let timeout = ctx.config.host_reply_timeout;
    let outcome = tokio::time::timeout(timeout, guard_rx).await;
    ctx.signer_hub.guard.remove(&contract_id);

    match outcome {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => {
            ctx.host_pool.mark_failed(&host.peer_id);
            Err(e)
        }
        Ok(Err(_recv_error)) => {
            // Sender dropped without delivering: treat as an unreachable
            // host, retryable against a fresh draw.
            ctx.host_pool.mark_failed(&host.peer_id);
            Err(UploadError::HostUnreachable(
                "reply rendezvous dropped".into(),
            ))
        }
        Err(_timeout) => {
            ctx.host_pool.mark_failed(&host.peer_id);
            Err(UploadError::HostTimeout)
        }
    }
}

async fn sign_escrow(
    ctx: &ShardWorkerContext,
    host: &crate::host_pool::Host,
    contract_id: &str,
) -> Result<Vec<u8>, UploadError> {
    let contract = contracts::new_escrow_contract(
        contract_id,
        &ctx.renter_pub_key,
        &host.peer_id,
        &ctx.guard_pub_keys,
        contracts::total_pay(ctx.shard_size, ctx.price, ctx.storage_length_months),
        Schedule::Monthly,
    )?;

    let shard_id = ctx.shard.shard_id();
    let rx = ctx
        .signer_hub
        .escrow
        .register(shard_id.clone())?;

    if let Some(signer) = &ctx.local_signer {
        let payload = serde_json::to_vec(&contract).map_err(|e| UploadError::Other(e.into()))?;
        let sig = signer.sign(&payload)?;
        ctx.signer_hub.escrow.deliver(&shard_id, sig);
    }
    // Offline: an external actor delivers the renter's signature to this
    // rendezvous via the offline-signing slot (spec §4.6).

    let buyer_signature = rx
        .await
        .map_err(|_| UploadError::LocalSignFailure("escrow rendezvous dropped".into()))?;
    ctx.signer_hub.escrow.remove(&shard_id);

    contracts::sign_and_marshal_escrow(contract, buyer_signature, None)
}

async fn sign_guard(
    ctx: &ShardWorkerContext,
    host: &crate::host_pool::Host,
    contract_id: &str,
) -> Result<Vec<u8>, UploadError> {
    let params = contracts::GuardContractParams {
        contract_id: contract_id.to_string(),
        renter_peer: ctx.renter_id.clone(),
        host_peer: host.peer_id.clone(),
        shard_index: ctx.shard.shard_index,
        shard_hash: ctx.shard.shard_hash.clone(),
        shard_size: ctx.shard_size,
        file_hash: ctx.file_hash.clone(),
        start_time: chrono::Utc::now(),
        storage_length_months: ctx.storage_length_months,
        price: ctx.price,
        total_pay: contracts::total_pay(ctx.shard_size, ctx.price, ctx.storage_length_months),
        repair_params: ctx.repair_params,
    };
    let contract = contracts::new_guard_contract(params);

    // The guard contract's renter signature rides the same rendezvous
    // mechanism as the escrow signature (the source's escrowChanMaps is the
    // only signing channel the original shows), keyed distinctly so the two
    // signatures never collide.
    let key = format!("{}#guard", ctx.shard.shard_id());
    let rx = ctx
        .signer_hub
        .escrow
        .register(key.clone())?;

    if let Some(signer) = &ctx.local_signer {
        let payload = serde_json::to_vec(&contract).map_err(|e| UploadError::Other(e.into()))?;
        let sig = signer.sign(&payload)?;
        ctx.signer_hub.escrow.deliver(&key, sig);
    }

    let renter_signature = rx
        .await
        .map_err(|_| UploadError::LocalSignFailure("guard rendezvous dropped".into()))?;
    ctx.signer_hub.escrow.remove(&key);

    contracts::sign_and_marshal_guard(contract, renter_signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crypto::Ed25519Signer;
    use crate::host_pool::Host;
    use crate::rpc::peer::mock::MockPeerRpcClient;
    use crate::session::store::SessionHandle;
    use crate::session::{Session, SessionParams};
    use chrono::Utc;
    use std::time::Duration;

    fn config() -> Arc<Config> {
        Arc::new(Config {
            host: "0.0.0.0".into(),
            port: 8000,
            escrow_domain: "http://escrow.test".into(),
            guard_domain: "http://guard.test".into(),
            guard_pub_keys: vec![hex::encode([3u8; 32])],
            identity_private_key: None,
            max_shard_attempts: 3,
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            host_reply_timeout: Duration::from_millis(200),
            aggregator_tick: Duration::from_millis(50),
        })
    }

    fn session_handle(n: usize) -> Arc<SessionHandle> {
        let params = SessionParams {
            session_id: "sess-1".into(),
            file_hash: "filehash".into(),
            shard_hashes: (0..n).map(|i| format!("shard-{i}")).collect(),
            shard_indexes: (0..n as i32).collect(),
            renter_id: "renter-1".into(),
            offline_signing: false,
            price: 10,
            shard_size: 100,
            storage_length_months: 1,
            created_at: Utc::now(),
        };
        Arc::new(SessionHandle::new(Arc::new(Session::new(params)), n as u32))
    }

    fn ctx(
        handle: Arc<SessionHandle>,
        host_pool: Arc<HostPool>,
        peer_client: Arc<dyn PeerRpcClient>,
    ) -> ShardWorkerContext {
        let signer = Ed25519Signer::from_hex_seed(&hex::encode([5u8; 32])).unwrap();
        ShardWorkerContext {
            handle,
            shard: Shard {
                session_id: "sess-1".into(),
                shard_hash: "shard-0".into(),
                shard_index: 0,
            },
            file_hash: "filehash".into(),
            price: 10,
            shard_size: 100,
            storage_length_months: 1,
            renter_id: "renter-1".into(),
            renter_pub_key: signer.public_key_hex(),
            offline_signing: false,
            repair_params: RepairParams {
                min_repair_hosts: 1,
                max_repair_hosts: 3,
                repair_reward_ratio: 0.1,
            },
            guard_pub_keys: vec![hex::encode([3u8; 32])],
            host_pool,
            signer_hub: Arc::new(SignerHub::new()),
            peer_client,
            local_signer: Some(Arc::new(signer)),
            config: config(),
        }
    }

    #[tokio::test]
    async fn business_rejection_is_forwarded_and_excludes_the_host() {
        // A single-host pool: the host's business rejection is forwarded to
        // the reply rendezvous (spec §4.4 phase 5), the attempt is retried,
        // and the (now-excluded) host pool is exhausted on the next draw.
        let handle = session_handle(1);
        let pool = Arc::new(HostPool::new(vec![Host {
            peer_id: hex::encode([1u8; 32]),
            advertised_price: 5,
        }]));
        let mock = MockPeerRpcClient::default();
        *mock.result.lock().unwrap() = Some(Err("quota full".into()));
        let peer_client: Arc<dyn PeerRpcClient> = Arc::new(mock);
        let c = ctx(handle.clone(), pool, peer_client);

        run(c).await;

        let (_completed, errored) = handle.counts();
        assert_eq!(errored, 1);
        assert_eq!(handle.session.status(), crate::session::SessionStatus::Error);
    }

    #[tokio::test]
    async fn host_pool_exhaustion_is_terminal() {
        let handle = session_handle(1);
        let pool = Arc::new(HostPool::new(vec![]));
        let peer_client: Arc<dyn PeerRpcClient> = Arc::new(MockPeerRpcClient::default());
        let c = ctx(handle.clone(), pool, peer_client);
        run(c).await;
        let (_completed, errored) = handle.counts();
        assert_eq!(errored, 1);
        assert_eq!(handle.session.status(), crate::session::SessionStatus::Error);
    }
}
