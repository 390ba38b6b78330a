//! Session State Machine (spec §4.5): a single task per session that polls
//! `(completed, errored)` and drives the session from `InitSigned` into the
//! Finalizer once every shard has reported in.

use std::sync::Arc;

use crate::finalizer::{self, FinalizerContext};
use crate::session::store::SessionHandle;
use crate::session::SessionStatus;

/// Poll `handle` every `tick` until the session goes terminal. Invokes the
/// Finalizer at most once (spec §3 invariant), the moment `completed == N`
/// — including the `N = 0` boundary case, where this fires on the very
/// first tick (spec §8).
pub async fn run(handle: Arc<SessionHandle>, finalizer_ctx: Arc<FinalizerContext>, tick: std::time::Duration) {
    let mut interval = tokio::time::interval(tick);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = handle.session.cancellation_token.cancelled() => {
                tracing::info!(session_id = %handle.session.params.session_id, "aggregator exiting: session cancelled");
                return;
            }
        }

        if handle.session.status().is_terminal() {
            return;
        }

        let (completed, errored) = handle.counts();
        if errored > 0 {
            handle.session.fail(&crate::error::UploadError::Other(anyhow::anyhow!(
                "there are some error shards"
            )));
            metrics::counter!("sessions_failed_total").increment(1);
            return;
        }

        if completed == handle.shard_count {
            // Ignore BadState: a session that started at Init and never
            // got an explicit InitSigned transition (e.g. in tests) still
            // proceeds — transition_to is a no-op failure here since the
            // Finalizer itself drives the remaining states.
            let _ = handle.session.transition_to(SessionStatus::SubmitReady);
            let session = handle.session.clone();
            finalizer::run(finalizer_ctx, handle).await;
            if session.status() == SessionStatus::Done {
                metrics::counter!("sessions_done_total").increment(1);
            } else {
                metrics::counter!("sessions_failed_total").increment(1);
            }
            return;
        }
    }
}
