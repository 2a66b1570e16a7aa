//! Bitcoin consensus and relay-policy constants

use crate::types::Natural;

/// Maximum money supply: 21,000,000 BTC in satoshis
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// Satoshis per BTC
pub const COIN: i64 = 100_000_000;

/// Maximum serialized size of a block or transaction, excluding witness data
pub const MAX_BLOCK_BASE_SIZE: usize = 1_000_000;

/// Maximum block weight (BIP141)
pub const MAX_BLOCK_WEIGHT: Natural = 4_000_000;

/// Maximum scaled signature-operation cost per block
pub const MAX_BLOCK_SIGOPS_COST: u64 = 80_000;

/// Non-witness bytes count this many times towards weight and sigop cost
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Confirmations required before a coinbase output may be spent
pub const COINBASE_MATURITY: Natural = 100;

/// Lock time threshold: transactions with lock time < this are block height
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Highest input sequence that opts in to replacement
pub const MAX_BIP125_RBF_SEQUENCE: u32 = SEQUENCE_FINAL - 2;

/// Maximum amount a block timestamp may run ahead of adjusted local time, in seconds
pub const MAX_FUTURE_BLOCK_TIME: Natural = 2 * 60 * 60;

/// Coinbase scriptSig length bounds
pub const MIN_COINBASE_SCRIPT_SIG_SIZE: usize = 2;
pub const MAX_COINBASE_SCRIPT_SIG_SIZE: usize = 100;

/// Witness commitment output prefix: OP_RETURN, push 36, 0xaa21a9ed
pub const WITNESS_COMMITMENT_HEADER: [u8; 6] = [0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];

/// Minimum script length of a witness commitment output
pub const MINIMUM_WITNESS_COMMITMENT: usize = 38;

/// Height stamped on coins that only exist in the mempool
pub const MEMPOOL_HEIGHT: Natural = 0x7fff_ffff;

// ============================================================================
// SCRIPT VERIFICATION FLAGS
// ============================================================================

pub const SCRIPT_VERIFY_NONE: u32 = 0;
pub const SCRIPT_VERIFY_P2SH: u32 = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: u32 = 1 << 1;
pub const SCRIPT_VERIFY_DERSIG: u32 = 1 << 2;
pub const SCRIPT_VERIFY_LOW_S: u32 = 1 << 3;
pub const SCRIPT_VERIFY_NULLDUMMY: u32 = 1 << 4;
pub const SCRIPT_VERIFY_SIGPUSHONLY: u32 = 1 << 5;
pub const SCRIPT_VERIFY_MINIMALDATA: u32 = 1 << 6;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
pub const SCRIPT_VERIFY_CLEANSTACK: u32 = 1 << 8;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
pub const SCRIPT_VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;
pub const SCRIPT_VERIFY_WITNESS: u32 = 1 << 11;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM: u32 = 1 << 12;
pub const SCRIPT_VERIFY_MINIMALIF: u32 = 1 << 13;
pub const SCRIPT_VERIFY_NULLFAIL: u32 = 1 << 14;
pub const SCRIPT_VERIFY_WITNESS_PUBKEYTYPE: u32 = 1 << 15;

/// Flags every valid block must satisfy; a failure here is a consensus failure
pub const MANDATORY_SCRIPT_VERIFY_FLAGS: u32 = SCRIPT_VERIFY_P2SH;

/// Flags applied to loose transactions offered to the mempool
pub const STANDARD_SCRIPT_VERIFY_FLAGS: u32 = MANDATORY_SCRIPT_VERIFY_FLAGS
    | SCRIPT_VERIFY_DERSIG
    | SCRIPT_VERIFY_STRICTENC
    | SCRIPT_VERIFY_MINIMALDATA
    | SCRIPT_VERIFY_NULLDUMMY
    | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | SCRIPT_VERIFY_CLEANSTACK
    | SCRIPT_VERIFY_MINIMALIF
    | SCRIPT_VERIFY_NULLFAIL
    | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY
    | SCRIPT_VERIFY_CHECKSEQUENCEVERIFY
    | SCRIPT_VERIFY_LOW_S
    | SCRIPT_VERIFY_WITNESS
    | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM
    | SCRIPT_VERIFY_WITNESS_PUBKEYTYPE;

// ============================================================================
// RELAY POLICY
// ============================================================================

/// Largest weight of a transaction relayed as standard
pub const MAX_STANDARD_TX_WEIGHT: Natural = 400_000;

/// Largest standard scriptSig (a 15-of-15 P2SH multisig redemption)
pub const MAX_STANDARD_SCRIPTSIG_SIZE: usize = 1650;

/// Largest accurate sigop count of a standard P2SH redeem script
pub const MAX_P2SH_SIGOPS: u32 = 15;

/// Transaction versions relayed as standard
pub const MIN_STANDARD_TX_VERSION: i32 = 1;
pub const MAX_STANDARD_TX_VERSION: i32 = 2;

/// Coin-age priority above which a zero-fee transaction may be relayed
pub const FREE_PRIORITY_THRESHOLD: f64 = (COIN as f64) * 144.0 / 250.0;

/// Decay window of the free-transaction rate limiter, in seconds
pub const FREE_LIMITER_WINDOW_SECS: f64 = 600.0;

/// Half-life of the mempool's rolling minimum fee rate, in seconds
pub const ROLLING_FEE_HALFLIFE: Natural = 60 * 60 * 12;

/// Default cap on transactions evicted by a single replacement
pub const MAX_REPLACEMENT_CANDIDATES: u64 = 100;
