//! Session Orchestrator (spec §2, §4.4 Design Note §9): spawns N Shard
//! Workers and one aggregator for a session, and owns cleanup of the
//! session's signer-registry entries once it finishes.

use std::sync::Arc;

use crate::aggregator;
use crate::config::Config;
use crate::contracts::RepairParams;
use crate::crypto::Signer;
use crate::finalizer::FinalizerContext;
use crate::host_pool::HostPool;
use crate::rpc::escrow::EscrowClient;
use crate::rpc::guard::GuardClient;
use crate::rpc::peer::PeerRpcClient;
use crate::session::store::{SessionHandle, SessionStore};
use crate::session::{Session, SessionParams, SessionStatus};
use crate::shard_worker::{self, ShardWorkerContext};
use crate::signer_registry::SignerHub;

/// Everything the orchestrator needs to spawn a session's workers, shared
/// process-wide across many sessions.
pub struct Orchestrator {
    pub config: Arc<Config>,
    pub signer_hub: Arc<SignerHub>,
    pub session_store: Arc<SessionStore>,
    pub peer_client: Arc<dyn PeerRpcClient>,
    pub escrow_client: Arc<dyn EscrowClient>,
    pub guard_client: Arc<dyn GuardClient>,
    pub local_signer: Option<Arc<dyn Signer>>,
    pub renter_pub_key: String,
}

impl Orchestrator {
    /// Create the session, spawn its shard workers and aggregator, and
    /// register it in the session store. Returns immediately; the session
    /// runs to completion (or cancellation) in the background.
    pub fn start_session(
        self: &Arc<Self>,
        params: SessionParams,
        hosts: Vec<crate::host_pool::Host>,
        repair_params: RepairParams,
    ) -> Result<Arc<SessionHandle>, crate::error::UploadError> {
        params.validate()?;
        let shard_count = params.shard_count() as u32;
        let session = Arc::new(Session::new(params));
        let handle = Arc::new(SessionHandle::new(session.clone(), shard_count));
        self.session_store.insert(handle.clone());

        // Init -> InitSigned happens as soon as the session's workers are
        // dispatched (spec §4.5: the aggregator only drives InitSigned ->
        // SubmitReady, implying InitSigned is already reached by then).
        session.transition_to(SessionStatus::InitSigned)?;

        let host_pool = Arc::new(HostPool::new(hosts));

        for shard in session.params.shards() {
            let ctx = ShardWorkerContext {
                handle: handle.clone(),
                shard,
                file_hash: session.params.file_hash.clone(),
                price: session.params.price,
                shard_size: session.params.shard_size,
                storage_length_months: session.params.storage_length_months,
                renter_id: session.params.renter_id.clone(),
                renter_pub_key: self.renter_pub_key.clone(),
                offline_signing: session.params.offline_signing,
                repair_params,
                guard_pub_keys: self.config.guard_pub_keys.clone(),
                host_pool: host_pool.clone(),
                signer_hub: self.signer_hub.clone(),
                peer_client: self.peer_client.clone(),
                local_signer: self.local_signer.clone(),
                config: self.config.clone(),
            };
            tokio::spawn(shard_worker::run(ctx));
        }

        let finalizer_ctx = Arc::new(FinalizerContext {
            escrow_client: self.escrow_client.clone(),
            guard_client: self.guard_client.clone(),
            signer_hub: self.signer_hub.clone(),
            local_signer: self.local_signer.clone(),
            renter_pub_key: self.renter_pub_key.clone(),
            config: self.config.clone(),
        });

        let this = self.clone();
        let aggregator_handle = handle.clone();
        let tick = self.config.aggregator_tick;
        tokio::spawn(async move {
            aggregator::run(aggregator_handle.clone(), finalizer_ctx, tick).await;
            this.teardown(&aggregator_handle.session.params.session_id);
        });

        Ok(handle)
    }

    /// Drain the session's signer-registry entries and remove it from the
    /// store once it has gone terminal (Design Note §9).
    fn teardown(&self, session_id: &str) {
        self.signer_hub.drain_session(session_id);
        self.session_store.remove_if_terminal(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Signer;
    use crate::host_pool::Host;
    use crate::rpc::escrow::mock::MockEscrowClient;
    use crate::rpc::guard::mock::MockGuardClient;
    use crate::rpc::peer::mock::MockPeerRpcClient;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn orchestrator() -> Arc<Orchestrator> {
        orchestrator_with_attempts(2, Duration::from_millis(100))
    }

    fn orchestrator_with_attempts(max_shard_attempts: u32, host_reply_timeout: Duration) -> Arc<Orchestrator> {
        let escrow_signer = Ed25519Signer::from_hex_seed(&hex::encode([31u8; 32])).unwrap();
        let guard_signer = Ed25519Signer::from_hex_seed(&hex::encode([32u8; 32])).unwrap();
        let renter_signer = Ed25519Signer::from_hex_seed(&hex::encode([33u8; 32])).unwrap();
        Arc::new(Orchestrator {
            config: Arc::new(Config {
                host: "0.0.0.0".into(),
                port: 8000,
                escrow_domain: "http://escrow.test".into(),
                guard_domain: "http://guard.test".into(),
                guard_pub_keys: vec![hex::encode([3u8; 32])],
                identity_private_key: None,
                max_shard_attempts,
                backoff_initial: Duration::from_millis(1),
                backoff_max: Duration::from_millis(5),
                host_reply_timeout,
                aggregator_tick: Duration::from_millis(10),
            }),
            signer_hub: Arc::new(SignerHub::new()),
            session_store: Arc::new(SessionStore::new()),
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
        })
    }

    fn params(n: usize) -> SessionParams {
        SessionParams {
            session_id: format!("sess-{n}-shards"),
            file_hash: "filehash".into(),
            shard_hashes: (0..n).map(|i| format!("shard-{i}")).collect(),
            shard_indexes: (0..n as i32).collect(),
            renter_id: "renter-1".into(),
            offline_signing: false,
            price: 10,
            shard_size: 100,
            storage_length_months: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn zero_shard_session_reaches_done_and_is_torn_down() {
        let orchestrator = orchestrator();
        let handle = orchestrator
            .start_session(params(0), vec![], RepairParams {
                min_repair_hosts: 1,
                max_repair_hosts: 3,
                repair_reward_ratio: 0.1,
            })
            .unwrap();

        let session_id = handle.session.params.session_id.clone();
        // Poll until teardown has removed the session from the store.
        for _ in 0..50 {
            if orchestrator.session_store.get(&session_id).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.session.status(), SessionStatus::Done);
        assert!(orchestrator.session_store.get(&session_id).is_none());
    }

    #[tokio::test]
    async fn happy_path_reaches_done_once_the_host_replies() {
        // Spec §8 scenario 1 (single-shard form): the host's acceptance
        // arrives on the guard rendezvous (simulating the inbound
        // `/rpc/upload/reply/:contract_id` route a real host would call),
        // and the session runs the full pipeline through to `Done`.
        let orchestrator = orchestrator();
        let hosts = vec![Host {
            peer_id: hex::encode([10u8; 32]),
            advertised_price: 1,
        }];
        let handle = orchestrator
            .start_session(params(1), hosts, RepairParams {
                min_repair_hosts: 1,
                max_repair_hosts: 3,
                repair_reward_ratio: 0.1,
            })
            .unwrap();
        let signer_hub = orchestrator.signer_hub.clone();

        // Poll until the shard worker's dispatch registers the guard
        // rendezvous, then extract the contract_id from the escrow
        // contract bytes the host would have received and deliver success.
        for _ in 0..100 {
            if !signer_hub.guard.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let contract_id = signer_hub
            .guard
            .inner
            .iter()
            .next()
            .map(|e| e.key().clone())
            .expect("guard rendezvous registered by the shard worker");
        assert!(signer_hub.guard.deliver(&contract_id, Ok(())));

        for _ in 0..100 {
            if handle.session.status().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.session.status(), SessionStatus::Done);
    }

    #[tokio::test]
    async fn retried_shard_gets_a_fresh_contract_id_each_attempt() {
        // Spec §8 scenario 2: a shard that times out against two hosts
        // before succeeding against a third mints three distinct
        // contract_ids, one per attempt.
        let orchestrator = orchestrator_with_attempts(3, Duration::from_millis(30));
        let hosts = vec![
            Host { peer_id: hex::encode([1u8; 32]), advertised_price: 1 },
            Host { peer_id: hex::encode([2u8; 32]), advertised_price: 1 },
            Host { peer_id: hex::encode([3u8; 32]), advertised_price: 1 },
        ];
        let handle = orchestrator
            .start_session(params(1), hosts, RepairParams {
                min_repair_hosts: 1,
                max_repair_hosts: 3,
                repair_reward_ratio: 0.1,
            })
            .unwrap();
        let signer_hub = orchestrator.signer_hub.clone();

        let mut seen_contract_ids = Vec::new();
        for _ in 0..2 {
            for _ in 0..200 {
                if !signer_hub.guard.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            let contract_id = signer_hub
                .guard
                .inner
                .iter()
                .next()
                .map(|e| e.key().clone())
                .expect("guard rendezvous registered by the shard worker");
            seen_contract_ids.push(contract_id);
            // Let this attempt's host-reply timeout elapse without
            // delivering, forcing a retry against the next host.
            for _ in 0..60 {
                if signer_hub.guard.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        // Third attempt: deliver success.
        for _ in 0..200 {
            if !signer_hub.guard.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let contract_id = signer_hub
            .guard
            .inner
            .iter()
            .next()
            .map(|e| e.key().clone())
            .expect("guard rendezvous registered by the shard worker");
        seen_contract_ids.push(contract_id.clone());
        assert!(signer_hub.guard.deliver(&contract_id, Ok(())));

        for _ in 0..100 {
            if handle.session.status().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.session.status(), SessionStatus::Done);

        let mut unique = seen_contract_ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), seen_contract_ids.len(), "every attempt minted a fresh contract_id");
    }

    #[tokio::test]
    async fn business_rejection_from_one_host_recovers_on_the_next() {
        // Spec §8 scenario 4: the first host rejects via the reply
        // rendezvous with a business error ("quota full"); the shard
        // retries against a fresh host, which accepts, and the session
        // still reaches Done end to end.
        let orchestrator = orchestrator_with_attempts(3, Duration::from_millis(500));
        let hosts = vec![
            Host { peer_id: hex::encode([5u8; 32]), advertised_price: 1 },
            Host { peer_id: hex::encode([6u8; 32]), advertised_price: 1 },
        ];
        let handle = orchestrator
            .start_session(params(1), hosts, RepairParams {
                min_repair_hosts: 1,
                max_repair_hosts: 3,
                repair_reward_ratio: 0.1,
            })
            .unwrap();
        let signer_hub = orchestrator.signer_hub.clone();

        // First attempt: reject with a business error over the reply
        // rendezvous (simulating the host's own RPC-layer rejection or the
        // inbound `/rpc/upload/reply/:contract_id` route).
        for _ in 0..200 {
            if !signer_hub.guard.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let first_contract_id = signer_hub
            .guard
            .inner
            .iter()
            .next()
            .map(|e| e.key().clone())
            .expect("guard rendezvous registered by the shard worker");
        assert!(signer_hub.guard.deliver(
            &first_contract_id,
            Err(crate::error::UploadError::HostBusinessRejection("quota full".into())),
        ));

        // Second attempt, against the other host: accept.
        for _ in 0..200 {
            if !signer_hub.guard.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let second_contract_id = signer_hub
            .guard
            .inner
            .iter()
            .next()
            .map(|e| e.key().clone())
            .expect("guard rendezvous registered by the shard worker");
        assert_ne!(first_contract_id, second_contract_id);
        assert!(signer_hub.guard.deliver(&second_contract_id, Ok(())));

        for _ in 0..100 {
            if handle.session.status().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.session.status(), SessionStatus::Done);
    }

    #[tokio::test]
    async fn exhausted_host_pool_fails_the_session() {
        let orchestrator = orchestrator();
        let hosts = vec![Host {
            peer_id: hex::encode([9u8; 32]),
            advertised_price: 1000,
        }];
        let handle = orchestrator
            .start_session(params(1), hosts, RepairParams {
                min_repair_hosts: 1,
                max_repair_hosts: 3,
                repair_reward_ratio: 0.1,
            })
            .unwrap();

        // Offered price (10) is below the only host's advertised price
        // (1000), so the pool is exhausted on the very first draw.
        for _ in 0..50 {
            if handle.session.status().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.session.status(), SessionStatus::Error);
    }
}
