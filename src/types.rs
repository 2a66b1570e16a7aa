//! Core Bitcoin types for consensus validation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hash type: 256-bit hash, in internal (little-endian) byte order
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Natural number type
pub type Natural = u64;

/// Integer type
pub type Integer = i64;

/// Witness Data: 𝒲 = 𝕊* (stack of witness elements for one input)
pub type Witness = Vec<ByteString>;

/// OutPoint: 𝒪 = ℍ × ℕ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// The outpoint referenced by a coinbase input
    pub fn null() -> Self {
        OutPoint { hash: [0u8; 32], index: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32] && self.index == u32::MAX
    }
}

/// Transaction Input: ℐ = 𝒪 × 𝕊 × ℕ × 𝒲
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
    #[serde(default)]
    pub witness: Witness,
}

/// Transaction Output: 𝒯 = ℤ × 𝕊
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Integer,
    pub script_pubkey: ByteString,
}

/// Transaction: 𝒯𝒳 = ℤ × ℐ* × 𝒯* × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// True if any input carries witness data
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }
}

/// Block Header: ℋ = ℤ × ℍ × ℍ × ℕ × ℕ × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Block: ℬ = ℋ × 𝒯𝒳*
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// UTXO: 𝒰 = ℤ × 𝕊 × ℕ × 𝔹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UTXO {
    pub value: Integer,
    pub script_pubkey: ByteString,
    pub height: Natural,
    pub is_coinbase: bool,
}

/// UTXO Set: 𝒰𝒮 = 𝒪 → 𝒰
pub type UtxoSet = HashMap<OutPoint, UTXO>;

/// Rule variants active for one block height.
///
/// Derived by the caller from chain height and deployment state
/// (see [`crate::config::ConsensusParams::flags_at`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusFlags {
    /// `SCRIPT_VERIFY_*` bits handed to the script verifier
    pub script_flags: u32,
    /// Evaluate lock times against the ancestor median-time-past (BIP113)
    pub locktime_median_time_past: bool,
    /// Coinbase must commit to the block height (BIP34)
    pub enforce_bip34: bool,
    /// Lowest header version accepted at this height
    pub min_block_version: i32,
}

impl ConsensusFlags {
    pub fn witness_active(&self) -> bool {
        self.script_flags & crate::constants::SCRIPT_VERIFY_WITNESS != 0
    }
}

impl Default for ConsensusFlags {
    fn default() -> Self {
        ConsensusFlags {
            script_flags: crate::constants::SCRIPT_VERIFY_P2SH,
            locktime_median_time_past: false,
            enforce_bip34: false,
            min_block_version: 1,
        }
    }
}

/// Snapshot of the active chain tip, supplied by the chain-state collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContext {
    /// Height of the current tip
    pub height: Natural,
    /// Median time of the last 11 blocks ending at the tip
    pub median_time_past: Natural,
    /// Compact target the next block must carry
    pub next_work_required: u32,
    /// Network-adjusted local time
    pub adjusted_time: Natural,
}

impl ChainContext {
    /// Height of the block that would extend the tip
    pub fn next_height(&self) -> Natural {
        self.height + 1
    }
}
