// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-driven gateway configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Gateway configuration.
///
/// The persistent key layout, the history cap, and the item TTL are
/// store constants and deliberately not configurable here.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection URL (`RUNQ_REDIS_URL`)
    pub redis_url: String,
    /// WebSocket listen address (`RUNQ_BIND`)
    pub bind: SocketAddr,
    /// Server-initiated ping cadence (`RUNQ_PING_INTERVAL_SECS`)
    pub ping_interval: Duration,
    /// No pong for this long means the session is stale (`RUNQ_PONG_TIMEOUT_SECS`)
    pub pong_timeout: Duration,
    /// Pending items included in a snapshot (`RUNQ_PENDING_LIMIT`)
    pub pending_limit: usize,
}

impl Config {
    /// Load configuration from the environment, with defaults for
    /// everything.
    pub fn load() -> Self {
        Self {
            redis_url: env_string("RUNQ_REDIS_URL", "redis://127.0.0.1:6379"),
            bind: std::env::var("RUNQ_BIND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_bind),
            ping_interval: Duration::from_secs(env_u64("RUNQ_PING_INTERVAL_SECS", 20)),
            pong_timeout: Duration::from_secs(env_u64("RUNQ_PONG_TIMEOUT_SECS", 30)),
            pending_limit: env_u64("RUNQ_PENDING_LIMIT", 10) as usize,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            bind: default_bind(),
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(30),
            pending_limit: 10,
        }
    }
}

fn default_bind() -> SocketAddr {
    // Loopback by default; deployments front this with their own ingress.
    SocketAddr::from(([127, 0, 0, 1], 8787))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|s| !s.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
