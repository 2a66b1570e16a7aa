//! Error types for consensus validation and mempool admission
//!
//! Every rejection carries the stable short reason string peers see in
//! `reject` messages (e.g. `bad-txnmrklroot`), a reject code and a
//! category used by callers to decide how to treat the sender.

use crate::types::{Hash, Integer, Natural};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reject codes of the p2p `reject` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectCode {
    Malformed,
    Invalid,
    Obsolete,
    Duplicate,
    Nonstandard,
    InsufficientFee,
    HighFee,
    AlreadyKnown,
    Conflict,
}

impl RejectCode {
    pub fn code(self) -> u16 {
        match self {
            RejectCode::Malformed => 0x01,
            RejectCode::Invalid => 0x10,
            RejectCode::Obsolete => 0x11,
            RejectCode::Duplicate => 0x12,
            RejectCode::Nonstandard => 0x40,
            RejectCode::InsufficientFee => 0x42,
            RejectCode::HighFee => 0x100,
            RejectCode::AlreadyKnown => 0x101,
            RejectCode::Conflict => 0x102,
        }
    }
}

/// Broad classification of a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed or consensus-violating: no chain could ever contain it
    Consensus,
    /// Valid by consensus but refused by local relay policy
    Policy,
    /// Refused because of capacity limits
    Resource,
    /// Internal invariant violated; the engine itself is at fault
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    // Block structure
    #[error("bad-txnmrklroot: hashMerkleRoot mismatch")]
    BadMerkleRoot,
    #[error("bad-txns-duplicate: duplicate transaction")]
    DuplicateTransactions,
    #[error("bad-blk-length: size limits failed")]
    BadBlockLength,
    #[error("bad-cb-missing: first tx is not coinbase")]
    MissingCoinbase,
    #[error("bad-cb-multiple: more than one coinbase (tx {index})")]
    MultipleCoinbase { index: usize },
    #[error("bad-blk-sigops: out-of-bounds SigOpCount ({cost})")]
    BadBlockSigops { cost: u64 },

    // Transaction structure
    #[error("bad-txns-vin-empty")]
    NoInputs,
    #[error("bad-txns-vout-empty")]
    NoOutputs,
    #[error("bad-txns-oversize: {size} bytes")]
    OversizedTransaction { size: usize },
    #[error("bad-txns-vout-negative: output {index}")]
    NegativeOutput { index: usize },
    #[error("bad-txns-vout-toolarge: output {index}")]
    OutputTooLarge { index: usize },
    #[error("bad-txns-txouttotal-toolarge")]
    OutputTotalTooLarge,
    #[error("bad-txns-inputs-duplicate")]
    DuplicateInputs,
    #[error("bad-cb-length: scriptSig is {length} bytes")]
    BadCoinbaseLength { length: usize },
    #[error("bad-txns-prevout-null: input {index}")]
    NullPrevout { index: usize },

    // Block context
    #[error("bad-txns-nonfinal: non-final transaction {index}")]
    NonFinalTransaction { index: usize },
    #[error("bad-cb-height: block height mismatch in coinbase")]
    BadCoinbaseHeight,
    #[error("bad-witness-nonce-size: invalid witness nonce size")]
    BadWitnessNonceSize,
    #[error("bad-witness-merkle-match: witness merkle commitment mismatch")]
    BadWitnessMerkleMatch,
    #[error("unexpected-witness: witness data without commitment")]
    UnexpectedWitness,
    #[error("bad-blk-weight: weight limit failed ({weight})")]
    BadBlockWeight { weight: Natural },

    // Header
    #[error("high-hash: proof of work failed")]
    HighHash,
    #[error("bad-diffbits: incorrect proof of work (got {actual:#010x}, expected {expected:#010x})")]
    BadDiffBits { actual: u32, expected: u32 },
    #[error("time-too-old: block's timestamp is too early")]
    TimeTooOld,
    #[error("time-too-new: block timestamp too far in the future")]
    TimeTooNew,
    #[error("bad-version: rejected nVersion={version} block (minimum {minimum})")]
    BadVersion { version: i32, minimum: i32 },

    // Inputs
    #[error("bad-txns-inputs-missingorspent: input {index}")]
    MissingInputs { index: usize },
    #[error("bad-txns-premature-spend-of-coinbase: depth {depth}")]
    PrematureCoinbaseSpend { depth: Natural },
    #[error("bad-txns-inputvalues-outofrange")]
    InputValuesOutOfRange,
    #[error("bad-txns-in-belowout: value in {value_in} < value out {value_out}")]
    InputsBelowOutputs { value_in: Integer, value_out: Integer },
    #[error("bad-txns-fee-outofrange")]
    FeeOutOfRange,
    #[error("mandatory-script-verify-flag-failed: input {index}")]
    MandatoryScriptVerifyFailed { index: usize },
}

impl ConsensusError {
    /// Short reason string carried in `reject` messages
    pub fn reject_reason(&self) -> &'static str {
        use ConsensusError::*;
        match self {
            BadMerkleRoot => "bad-txnmrklroot",
            DuplicateTransactions => "bad-txns-duplicate",
            BadBlockLength => "bad-blk-length",
            MissingCoinbase => "bad-cb-missing",
            MultipleCoinbase { .. } => "bad-cb-multiple",
            BadBlockSigops { .. } => "bad-blk-sigops",
            NoInputs => "bad-txns-vin-empty",
            NoOutputs => "bad-txns-vout-empty",
            OversizedTransaction { .. } => "bad-txns-oversize",
            NegativeOutput { .. } => "bad-txns-vout-negative",
            OutputTooLarge { .. } => "bad-txns-vout-toolarge",
            OutputTotalTooLarge => "bad-txns-txouttotal-toolarge",
            DuplicateInputs => "bad-txns-inputs-duplicate",
            BadCoinbaseLength { .. } => "bad-cb-length",
            NullPrevout { .. } => "bad-txns-prevout-null",
            NonFinalTransaction { .. } => "bad-txns-nonfinal",
            BadCoinbaseHeight => "bad-cb-height",
            BadWitnessNonceSize => "bad-witness-nonce-size",
            BadWitnessMerkleMatch => "bad-witness-merkle-match",
            UnexpectedWitness => "unexpected-witness",
            BadBlockWeight { .. } => "bad-blk-weight",
            HighHash => "high-hash",
            BadDiffBits { .. } => "bad-diffbits",
            TimeTooOld => "time-too-old",
            TimeTooNew => "time-too-new",
            BadVersion { .. } => "bad-version",
            MissingInputs { .. } => "bad-txns-inputs-missingorspent",
            PrematureCoinbaseSpend { .. } => "bad-txns-premature-spend-of-coinbase",
            InputValuesOutOfRange => "bad-txns-inputvalues-outofrange",
            InputsBelowOutputs { .. } => "bad-txns-in-belowout",
            FeeOutOfRange => "bad-txns-fee-outofrange",
            MandatoryScriptVerifyFailed { .. } => "mandatory-script-verify-flag-failed",
        }
    }

    pub fn reject_code(&self) -> RejectCode {
        match self {
            ConsensusError::BadVersion { .. } => RejectCode::Obsolete,
            _ => RejectCode::Invalid,
        }
    }

    /// True when the failure may stem from data corrupted in transit rather
    /// than an invalid block, so the block hash must not be marked invalid.
    pub fn is_corruption_possible(&self) -> bool {
        matches!(
            self,
            ConsensusError::BadMerkleRoot
                | ConsensusError::DuplicateTransactions
                | ConsensusError::BadWitnessNonceSize
                | ConsensusError::BadWitnessMerkleMatch
                | ConsensusError::UnexpectedWitness
        )
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Why the mempool refused a transaction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MempoolError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error("coinbase: coinbase as individual tx")]
    Coinbase,
    #[error("{reason}")]
    NonStandard { reason: &'static str },
    #[error("non-final")]
    NonFinal,
    #[error("txn-already-in-mempool")]
    AlreadyInMempool,
    #[error("txn-mempool-conflict")]
    ReplacementDisabled,
    #[error("txn-already-known")]
    AlreadyKnown,
    #[error("bad-txns-inputs-spent")]
    InputsSpent,
    #[error("bad-txns-nonstandard-inputs")]
    NonStandardInputs,
    #[error("bad-txns-too-many-sigops: {cost}")]
    TooManySigops { cost: u64 },
    #[error("mempool-min-fee-not-met: {fee} < {required}")]
    MinFeeNotMet { fee: Integer, required: Integer },
    #[error("insufficient priority")]
    InsufficientPriority,
    #[error("rate limited free transaction")]
    RateLimited,
    #[error("absurdly-high-fee: {fee} > {limit}")]
    AbsurdFee { fee: Integer, limit: Integer },
    #[error("too-long-mempool-chain: {detail}")]
    TooLongChain { detail: String },
    #[error("bad-txns-spends-conflicting-tx: spends conflicting transaction {}", crate::serialize::hash_to_hex(.ancestor))]
    SpendsConflictingTx { ancestor: Hash },
    #[error("insufficient fee: new feerate {new_rate} <= old feerate {old_rate} of {}", crate::serialize::hash_to_hex(.conflict))]
    ReplacementFeeRateTooLow { conflict: Hash, new_rate: Integer, old_rate: Integer },
    #[error("too many potential replacements: {count} > {max}")]
    TooManyReplacements { count: u64, max: u64 },
    #[error("replacement-adds-unconfirmed: input {index}")]
    ReplacementAddsUnconfirmed { index: usize },
    #[error("insufficient fee: less fees than conflicting txs; {fee} < {conflicting_fees}")]
    ReplacementFeeTooLow { fee: Integer, conflicting_fees: Integer },
    #[error("insufficient fee: not enough additional fees to relay; {delta} < {required}")]
    ReplacementRelayFeeNotPaid { delta: Integer, required: Integer },
    #[error("non-mandatory-script-verify-flag: input {index}")]
    NonMandatoryScriptFailure { index: usize },
    #[error("mempool-full")]
    MempoolFull,
    #[error("internal invariant violated: {detail}")]
    InternalInvariant { detail: String },
}

impl MempoolError {
    /// Short reason string carried in `reject` messages
    pub fn reject_reason(&self) -> &'static str {
        use MempoolError::*;
        match self {
            Consensus(e) => e.reject_reason(),
            Coinbase => "coinbase",
            NonStandard { reason } => reason,
            NonFinal => "non-final",
            AlreadyInMempool => "txn-already-in-mempool",
            ReplacementDisabled => "txn-mempool-conflict",
            AlreadyKnown => "txn-already-known",
            InputsSpent => "bad-txns-inputs-spent",
            NonStandardInputs => "bad-txns-nonstandard-inputs",
            TooManySigops { .. } => "bad-txns-too-many-sigops",
            MinFeeNotMet { .. } => "mempool-min-fee-not-met",
            InsufficientPriority => "insufficient priority",
            RateLimited => "rate limited free transaction",
            AbsurdFee { .. } => "absurdly-high-fee",
            TooLongChain { .. } => "too-long-mempool-chain",
            SpendsConflictingTx { .. } => "bad-txns-spends-conflicting-tx",
            ReplacementFeeRateTooLow { .. } => "insufficient fee",
            TooManyReplacements { .. } => "too many potential replacements",
            ReplacementAddsUnconfirmed { .. } => "replacement-adds-unconfirmed",
            ReplacementFeeTooLow { .. } => "insufficient fee",
            ReplacementRelayFeeNotPaid { .. } => "insufficient fee",
            NonMandatoryScriptFailure { .. } => "non-mandatory-script-verify-flag",
            MempoolFull => "mempool-full",
            InternalInvariant { .. } => "BUG! PLEASE REPORT THIS!",
        }
    }

    pub fn reject_code(&self) -> RejectCode {
        use MempoolError::*;
        match self {
            Consensus(e) => e.reject_code(),
            Coinbase | SpendsConflictingTx { .. } => RejectCode::Invalid,
            NonStandard { .. }
            | NonFinal
            | NonStandardInputs
            | TooManySigops { .. }
            | TooLongChain { .. }
            | TooManyReplacements { .. }
            | ReplacementAddsUnconfirmed { .. }
            | NonMandatoryScriptFailure { .. } => RejectCode::Nonstandard,
            AlreadyInMempool | InputsSpent => RejectCode::Duplicate,
            AlreadyKnown => RejectCode::AlreadyKnown,
            ReplacementDisabled => RejectCode::Conflict,
            MinFeeNotMet { .. }
            | InsufficientPriority
            | RateLimited
            | ReplacementFeeRateTooLow { .. }
            | ReplacementFeeTooLow { .. }
            | ReplacementRelayFeeNotPaid { .. }
            | MempoolFull => RejectCode::InsufficientFee,
            AbsurdFee { .. } => RejectCode::HighFee,
            InternalInvariant { .. } => RejectCode::Invalid,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        use MempoolError::*;
        match self {
            Consensus(_) | Coinbase | SpendsConflictingTx { .. } => ErrorCategory::Consensus,
            MempoolFull | RateLimited => ErrorCategory::Resource,
            InternalInvariant { .. } => ErrorCategory::Internal,
            _ => ErrorCategory::Policy,
        }
    }

    /// Only consensus violations are attributable to the relaying peer
    pub fn is_peer_penalizable(&self) -> bool {
        self.category() == ErrorCategory::Consensus
    }
}
