use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Process configuration, loaded once at startup from the environment.
///
/// Mirrors the keys spec §6 names under `Services.*` / `Identity.*`, plus
/// the coordinator's own tuning knobs.
#[derive(Debug, Clone)]
pub struct Config {
    // Status/metrics HTTP surface.
    pub host: String,
    pub port: u16,

    // Services.EscrowDomain — escrow gRPC/RPC target (required).
    pub escrow_domain: String,
    // Services.GuardDomain — guard service RPC target (required).
    pub guard_domain: String,
    // Services.GuardPubKeys — non-empty; first entry is the auth pubkey
    // embedded in escrow contracts. Empty is a ConfigMissing error at
    // escrow-contract construction time, not at startup, per spec §4.3.
    pub guard_pub_keys: Vec<String>,

    // Identity.PrivateKey — renter signing key, hex-encoded. Used only
    // when a session has `offline_signing = false`.
    pub identity_private_key: Option<String>,

    // Host pool / shard worker tuning.
    pub max_shard_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub host_reply_timeout: Duration,

    // Session state machine.
    pub aggregator_tick: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env("HOST", "0.0.0.0"),
            port: env("PORT", "8000").parse().expect("PORT must be a number"),

            escrow_domain: require_env("ESCROW_DOMAIN"),
            guard_domain: require_env("GUARD_DOMAIN"),
            guard_pub_keys: env("GUARD_PUB_KEYS", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            identity_private_key: env_opt("IDENTITY_PRIVATE_KEY"),

            max_shard_attempts: env("MAX_SHARD_ATTEMPTS", "5").parse().unwrap_or(5),
            backoff_initial: Duration::from_millis(
                env("BACKOFF_INITIAL_MS", "500").parse().unwrap_or(500),
            ),
            backoff_max: Duration::from_secs(
                env("BACKOFF_MAX_SECS", "60").parse().unwrap_or(60),
            ),
            host_reply_timeout: Duration::from_secs(
                env("HOST_REPLY_TIMEOUT_SECS", "30").parse().unwrap_or(30),
            ),

            aggregator_tick: Duration::from_secs(
                env("AGGREGATOR_TICK_SECS", "5").parse().unwrap_or(5),
            ),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port).parse().expect("Invalid address")
    }
}

fn env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn require_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
