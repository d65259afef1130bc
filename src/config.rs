//! Configuration file support for the Vela node.
//!
//! Loads optional `vela.toml` from the data directory. The file carries the
//! consensus timing parameters; anything it leaves unset keeps the protocol
//! default. If no config file exists, defaults are used.

use std::path::Path;

use serde::Deserialize;

use crate::constants;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct VelaConfig {
    pub consensus: ConsensusConfig,
}

/// Consensus timing parameters.
///
/// Defaults preserve the protocol constants bit-exactly; overriding them
/// produces a node that cannot interoperate with the main network.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Timestamp window covered by one round, nanoseconds.
    pub round_gap: u64,
    /// Staleness multiplier for cross-chain references.
    pub reference_threshold: u64,
    /// Staleness factor for participant-side empty-head reference refresh.
    pub participant_refresh_factor: u64,
    /// Staleness factor for proposer-side empty-head reference refresh.
    pub proposer_refresh_factor: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            round_gap: constants::SNAPSHOT_ROUND_GAP,
            reference_threshold: constants::SNAPSHOT_REFERENCE_THRESHOLD,
            participant_refresh_factor: constants::PARTICIPANT_REFRESH_FACTOR,
            proposer_refresh_factor: constants::PROPOSER_REFRESH_FACTOR,
        }
    }
}

impl ConsensusConfig {
    /// Nanoseconds a cross-chain reference may lag before it counts as stale.
    pub fn reference_window(&self) -> u64 {
        self.reference_threshold * self.round_gap
    }
}

impl VelaConfig {
    /// Load configuration from `vela.toml` in the given directory.
    /// Returns `Default` if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("vela.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}
