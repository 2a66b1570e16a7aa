//! # Consensus-Validation
//!
//! Transaction and block validation engine for a Bitcoin-family node.
//!
//! The crate decides whether a block or a loose transaction may be accepted.
//! Block rules are pure functions over the block, the active rule flags and a
//! snapshot of the chain tip. Mempool admission runs against a shared index
//! guarded by a read/write lock: every check happens under the read guard and
//! only the final eviction, insertion and trimming take the write guard.
//!
//! ## Architecture
//!
//! - `merkle`, `serialize`: identifiers and the merkle computer
//! - `transaction`, `segwit`, `pow`, `block`: consensus rules
//! - `policy`, `txmempool`, `mempool`: relay policy, the pending-transaction
//!   index and the admission protocol
//! - `coins`, `script`: seams to the UTXO store and the script interpreter
//!
//! Nothing here performs I/O. The UTXO set, chain state and script
//! interpreter are supplied by the caller through [`coins::CoinView`],
//! [`ChainContext`] and [`script::ScriptVerifier`].
//!
//! ## Usage
//!
//! ```rust
//! use consensus_validation::ConsensusValidator;
//! use consensus_validation::types::*;
//!
//! let validator = ConsensusValidator::default();
//! let transaction = Transaction {
//!     version: 1,
//!     inputs: vec![],
//!     outputs: vec![TransactionOutput {
//!         value: 1000,
//!         script_pubkey: vec![0x51],
//!     }],
//!     lock_time: 0,
//! };
//! let error = validator.check_transaction(&transaction).unwrap_err();
//! assert_eq!(error.reject_reason(), "bad-txns-vin-empty");
//! ```

pub mod block;
pub mod coins;
pub mod config;
pub mod constants;
pub mod error;
pub mod mempool;
pub mod merkle;
pub mod policy;
pub mod pow;
pub mod script;
pub mod segwit;
pub mod serialize;
pub mod transaction;
pub mod txmempool;
pub mod types;

// Re-export commonly used types
pub use config::{ConsensusParams, MempoolConfig};
pub use constants::*;
pub use error::{ConsensusError, ErrorCategory, MempoolError, RejectCode, Result};
pub use mempool::{AcceptOptions, AcceptOutcome, MempoolValidator};
pub use types::*;

use tracing::debug;

/// Entry point for the consensus rules of one network
///
/// # Examples
///
/// ```
/// use consensus_validation::{ConsensusParams, ConsensusValidator};
///
/// let mainnet = ConsensusValidator::default();
/// let regtest = ConsensusValidator::new(ConsensusParams::regtest());
/// assert_eq!(regtest.params().segwit_height, 0);
/// assert_ne!(mainnet.params(), regtest.params());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConsensusValidator {
    params: ConsensusParams,
}

impl ConsensusValidator {
    pub fn new(params: ConsensusParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Merkle root of `leaves` and whether the tree contains a duplicated subtree
    ///
    /// # Examples
    ///
    /// ```
    /// use consensus_validation::ConsensusValidator;
    ///
    /// let validator = ConsensusValidator::default();
    /// let (root, mutated) = validator.compute_merkle_root(&[]);
    /// assert_eq!(root, [0u8; 32]);
    /// assert!(!mutated);
    ///
    /// let (_, mutated) = validator.compute_merkle_root(&[[1u8; 32], [1u8; 32]]);
    /// assert!(mutated);
    /// ```
    pub fn compute_merkle_root(&self, leaves: &[Hash]) -> (Hash, bool) {
        merkle::compute_merkle_root(leaves)
    }

    /// Context-free transaction rules
    ///
    /// # Examples
    ///
    /// ```
    /// use consensus_validation::{ConsensusError, ConsensusValidator};
    /// use consensus_validation::types::*;
    ///
    /// let validator = ConsensusValidator::default();
    /// let input = TransactionInput {
    ///     prevout: OutPoint { hash: [1; 32], index: 0 },
    ///     script_sig: vec![0x51],
    ///     sequence: 0xffffffff,
    ///     witness: vec![],
    /// };
    /// let tx = Transaction {
    ///     version: 1,
    ///     inputs: vec![input.clone(), input],
    ///     outputs: vec![TransactionOutput { value: 1000, script_pubkey: vec![0x51] }],
    ///     lock_time: 0,
    /// };
    /// assert_eq!(validator.check_transaction(&tx), Err(ConsensusError::DuplicateInputs));
    /// ```
    pub fn check_transaction(&self, tx: &Transaction) -> Result<()> {
        transaction::check_transaction(tx)
    }

    /// Proof of work against the header's own target
    pub fn check_block_header(&self, header: &BlockHeader) -> Result<()> {
        block::check_block_header(header, &self.params)
    }

    /// Context-free block rules
    pub fn check_block(&self, block: &Block) -> Result<()> {
        block::check_block(block)
    }

    pub fn contextual_check_block_header(&self, header: &BlockHeader, ctx: &ChainContext) -> Result<()> {
        let flags = self.params.flags_at(ctx.next_height());
        block::contextual_check_block_header(header, &flags, ctx)
    }

    pub fn contextual_check_block(&self, block: &Block, ctx: &ChainContext) -> Result<()> {
        let flags = self.params.flags_at(ctx.next_height());
        block::contextual_check_block(block, &flags, ctx)
    }

    /// All four block phases in order, for a block extending the tip in `ctx`
    pub fn validate_block(&self, block: &Block, ctx: &ChainContext) -> Result<()> {
        let flags = self.params.flags_at(ctx.next_height());
        let result = block::check_block_header(&block.header, &self.params)
            .and_then(|()| block::check_block(block))
            .and_then(|()| block::contextual_check_block_header(&block.header, &flags, ctx))
            .and_then(|()| block::contextual_check_block(block, &flags, ctx));

        if let Err(e) = &result {
            debug!(
                block = %serialize::hash_to_hex(&serialize::calculate_block_hash(&block.header)),
                height = ctx.next_height(),
                reason = e.reject_reason(),
                corruption_possible = e.is_corruption_possible(),
                "block rejected: {}", e
            );
        }
        result
    }

    /// Relay standardness under `config`; returns the reason on failure
    pub fn is_standard_tx(&self, tx: &Transaction, config: &MempoolConfig) -> std::result::Result<(), &'static str> {
        policy::is_standard_tx(tx, config)
    }

    /// Weight(b) = 3 × stripped size + total size
    pub fn block_weight(&self, block: &Block) -> Natural {
        segwit::calculate_block_weight(block)
    }
}
