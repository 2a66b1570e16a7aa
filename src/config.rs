//! Consensus parameters and mempool policy configuration
//!
//! Both structs deserialize from JSON; missing fields fall back to the
//! defaults below and unknown fields are rejected.

use crate::constants::*;
use crate::policy::FeeRate;
use crate::txmempool::AncestorLimits;
use crate::types::{ConsensusFlags, Integer, Natural};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Network-specific consensus parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsensusParams {
    /// Coinbase height commitment and version 2 headers
    pub bip34_height: Natural,
    /// Strict DER signatures and version 3 headers
    pub bip66_height: Natural,
    /// CHECKLOCKTIMEVERIFY and version 4 headers
    pub bip65_height: Natural,
    /// CHECKSEQUENCEVERIFY and median-time-past lock times
    pub csv_height: Natural,
    /// Witness validation
    pub segwit_height: Natural,
    /// Compact encoding of the easiest permitted target
    pub pow_limit_bits: u32,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            bip34_height: 227_931,
            bip66_height: 363_725,
            bip65_height: 388_381,
            csv_height: 419_328,
            segwit_height: 481_824,
            pow_limit_bits: 0x1d00ffff,
        }
    }
}

impl ConsensusParams {
    /// Every soft fork active from genesis, minimal difficulty
    pub fn regtest() -> Self {
        Self {
            bip34_height: 0,
            bip66_height: 0,
            bip65_height: 0,
            csv_height: 0,
            segwit_height: 0,
            pow_limit_bits: 0x207fffff,
        }
    }

    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Lowest header version accepted at `height`
    pub fn minimum_block_version(&self, height: Natural) -> i32 {
        if height >= self.bip65_height {
            4
        } else if height >= self.bip66_height {
            3
        } else if height >= self.bip34_height {
            2
        } else {
            1
        }
    }

    /// Rule variants in force for a block at `height`
    pub fn flags_at(&self, height: Natural) -> ConsensusFlags {
        let mut script_flags = SCRIPT_VERIFY_P2SH;
        if height >= self.bip66_height {
            script_flags |= SCRIPT_VERIFY_DERSIG;
        }
        if height >= self.bip65_height {
            script_flags |= SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY;
        }
        if height >= self.csv_height {
            script_flags |= SCRIPT_VERIFY_CHECKSEQUENCEVERIFY;
        }
        if height >= self.segwit_height {
            script_flags |= SCRIPT_VERIFY_WITNESS | SCRIPT_VERIFY_NULLDUMMY;
        }

        ConsensusFlags {
            script_flags,
            locktime_median_time_past: height >= self.csv_height,
            enforce_bip34: height >= self.bip34_height,
            min_block_version: self.minimum_block_version(height),
        }
    }
}

/// Relay and capacity policy of the mempool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MempoolConfig {
    // =========================================================================
    // Capacity
    // =========================================================================
    /// Maximum total virtual size of pooled transactions, in megabytes
    pub max_mempool_mb: u64,
    /// Entries older than this are expired on every admission
    pub mempool_expiry_hours: u64,

    // =========================================================================
    // Package limits
    // =========================================================================
    pub limit_ancestor_count: u64,
    pub limit_ancestor_size_kb: u64,
    pub limit_descendant_count: u64,
    pub limit_descendant_size_kb: u64,

    // =========================================================================
    // Fees
    // =========================================================================
    /// Minimum relay fee, satoshis per 1000 bytes
    pub min_relay_tx_fee: Integer,
    /// Fee-rate step added to the rolling minimum after a trim, satoshis per 1000 bytes
    pub incremental_relay_fee: Integer,
    /// Budget for transactions below the relay fee, in kB per minute
    pub limit_free_relay_kb_per_min: u64,
    /// Let high-priority transactions skip the relay fee
    pub relay_priority: bool,

    // =========================================================================
    // Standardness and replacement
    // =========================================================================
    pub require_standard: bool,
    pub enable_replacement: bool,
    pub max_replacement_evictions: u64,
    pub permit_bare_multisig: bool,
    pub max_op_return_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_mempool_mb: 300,
            mempool_expiry_hours: 336,

            limit_ancestor_count: 25,
            limit_ancestor_size_kb: 101,
            limit_descendant_count: 25,
            limit_descendant_size_kb: 101,

            min_relay_tx_fee: 1000,
            incremental_relay_fee: 1000,
            limit_free_relay_kb_per_min: 0,
            relay_priority: true,

            require_standard: true,
            enable_replacement: true,
            max_replacement_evictions: MAX_REPLACEMENT_CANDIDATES,
            permit_bare_multisig: true,
            max_op_return_bytes: crate::script::MAX_OP_RETURN_RELAY,
        }
    }
}

impl MempoolConfig {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn max_mempool_bytes(&self) -> u64 {
        self.max_mempool_mb * 1_000_000
    }

    pub fn expiry_seconds(&self) -> Natural {
        self.mempool_expiry_hours * 60 * 60
    }

    pub fn min_relay_fee(&self) -> FeeRate {
        FeeRate::from_per_k(self.min_relay_tx_fee)
    }

    pub fn incremental_fee(&self) -> FeeRate {
        FeeRate::from_per_k(self.incremental_relay_fee)
    }

    pub fn ancestor_limits(&self) -> AncestorLimits {
        AncestorLimits {
            ancestor_count: self.limit_ancestor_count,
            ancestor_size: self.limit_ancestor_size_kb * 1000,
            descendant_count: self.limit_descendant_count,
            descendant_size: self.limit_descendant_size_kb * 1000,
        }
    }
}

/// Load a JSON configuration file
pub fn load_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_flags() {
        let params = ConsensusParams::default();

        let early = params.flags_at(100_000);
        assert_eq!(early.script_flags, SCRIPT_VERIFY_P2SH);
        assert!(!early.enforce_bip34);
        assert!(!early.locktime_median_time_past);
        assert_eq!(early.min_block_version, 1);

        let late = params.flags_at(500_000);
        assert!(late.enforce_bip34);
        assert!(late.locktime_median_time_past);
        assert!(late.witness_active());
        assert_eq!(late.min_block_version, 4);
    }

    #[test]
    fn test_minimum_block_version_schedule() {
        let params = ConsensusParams::default();
        assert_eq!(params.minimum_block_version(227_930), 1);
        assert_eq!(params.minimum_block_version(227_931), 2);
        assert_eq!(params.minimum_block_version(363_725), 3);
        assert_eq!(params.minimum_block_version(388_381), 4);
    }

    #[test]
    fn test_mempool_defaults() {
        let config = MempoolConfig::default();
        assert_eq!(config.max_mempool_bytes(), 300_000_000);
        assert_eq!(config.expiry_seconds(), 336 * 3600);
        assert_eq!(config.ancestor_limits().ancestor_size, 101_000);
        assert_eq!(config.min_relay_fee().get_fee(250), 250);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = MempoolConfig::from_json_str(r#"{"max_mempool_mb": 5, "enable_replacement": false}"#).unwrap();
        assert_eq!(config.max_mempool_mb, 5);
        assert!(!config.enable_replacement);
        assert_eq!(config.limit_ancestor_count, 25);

        let params = ConsensusParams::from_json_str(r#"{"segwit_height": 10}"#).unwrap();
        assert_eq!(params.segwit_height, 10);
        assert_eq!(params.bip34_height, 227_931);
    }

    #[test]
    fn test_unknown_json_field_rejected() {
        assert!(MempoolConfig::from_json_str(r#"{"max_mempool_gb": 1}"#).is_err());
    }

    #[test]
    fn test_load_json_file_reports_path() {
        let err = load_json_file::<MempoolConfig>("/nonexistent/mempool.json").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/mempool.json"));

        let path = std::env::temp_dir().join(format!("mempool-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"relay_priority": false}"#).unwrap();
        let config: MempoolConfig = load_json_file(&path).unwrap();
        assert!(!config.relay_priority);
        std::fs::remove_file(&path).unwrap();
    }
}
