// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration schema for the coordinator and worker roles.

use serde::{Deserialize, Serialize};
use serde_valid::Validate;

use crate::dispatch::{MONITOR_POLL_INTERVAL, MONITOR_POLL_TIMEOUT};
use crate::summarizer::PREFERRED_SUMMARY_MODEL;

/// Root configuration structure.
///
/// Configuration sources are merged in this precedence (highest to lowest):
/// 1. CLI arguments
/// 2. Environment variables (`FOGMESH_` prefix)
/// 3. Config file (`~/.config/fogmesh/config.toml`)
/// 4. Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Coordinator process settings.
    #[validate]
    pub coordinator: CoordinatorConfig,
    /// Worker process settings.
    #[validate]
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Coordinator-side settings: binding, the RPC handler pool, the status
/// monitor cadence, and the summarizer's preferred model.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CoordinatorConfig {
    /// `host:port` the coordinator's gRPC service binds to.
    #[validate(min_length = 1)]
    pub bind_address: String,

    /// Advisory sizing for the tokio runtime's RPC-handling worker threads.
    #[validate(minimum = 1)]
    #[validate(maximum = 256)]
    pub handler_pool_size: usize,

    /// How often the dispatch monitor loop polls incomplete workers, in
    /// seconds.
    #[validate(minimum = 1)]
    pub poll_interval_seconds: u64,

    /// Per-poll timeout budget, in seconds. A poll that doesn't answer in
    /// time is treated as "still working", not failed.
    #[validate(minimum = 1)]
    pub status_poll_timeout_seconds: u64,

    /// Seconds of missed heartbeats before a worker is marked stale.
    #[validate(minimum = 1)]
    pub worker_heartbeat_timeout_seconds: i64,

    /// Model identifier the summarizer tries first.
    #[validate(min_length = 1)]
    pub summary_model: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:50051".to_string(),
            handler_pool_size: 20,
            poll_interval_seconds: MONITOR_POLL_INTERVAL.as_secs(),
            status_poll_timeout_seconds: MONITOR_POLL_TIMEOUT.as_secs(),
            worker_heartbeat_timeout_seconds: 30,
            summary_model: PREFERRED_SUMMARY_MODEL.to_string(),
        }
    }
}

/// Worker-side settings: which coordinator to register with, where this
/// worker's own gRPC service binds, and which models it advertises.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct WorkerConfig {
    /// Address of the coordinator to register with.
    #[validate(min_length = 1)]
    pub coordinator_address: String,

    /// `host:port` this worker's gRPC service binds to.
    #[validate(min_length = 1)]
    pub bind_address: String,

    /// Locally-installed model identifiers this worker advertises at
    /// registration.
    pub installed_models: Vec<String>,

    /// Heartbeat cadence, in seconds.
    #[validate(minimum = 1)]
    pub heartbeat_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_address: "http://localhost:50051".to_string(),
            bind_address: "0.0.0.0:50052".to_string(),
            installed_models: Vec::new(),
            heartbeat_interval_seconds: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_ports_match_documented_endpoints() {
        let config = Config::default();
        assert!(config.coordinator.bind_address.ends_with(":50051"));
        assert!(config.worker.bind_address.ends_with(":50052"));
    }

    #[test]
    fn default_handler_pool_size_is_twenty() {
        assert_eq!(Config::default().coordinator.handler_pool_size, 20);
    }

    #[test]
    fn config_serialization_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let deserialized: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn invalid_handler_pool_size_fails_validation() {
        let mut config = Config::default();
        config.coordinator.handler_pool_size = 0;
        assert!(config.validate().is_err());
    }
}
