//! Consensus serialization and identifiers
//!
//! Transactions serialize in the legacy layout for txids and stripped
//! sizes, and in the BIP144 layout (marker, flag, witness stacks) for
//! wtxids and total sizes. Hashes are double SHA-256 kept in internal
//! byte order; [`hash_to_hex`] renders the conventional reversed form.

use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};

/// Double SHA-256 of arbitrary bytes
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256d::Hash::hash(data).into_inner()
}

/// Encode a number as a Bitcoin varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffffffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

/// Serialized length of a varint, without encoding it
pub fn varint_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

fn write_bytes(data: &mut Vec<u8>, bytes: &[u8]) {
    data.extend_from_slice(&encode_varint(bytes.len() as u64));
    data.extend_from_slice(bytes);
}

/// Serialize a transaction.
///
/// With `include_witness` set and at least one non-empty witness, the
/// BIP144 extended layout is produced; otherwise the legacy layout.
pub fn serialize_transaction(tx: &Transaction, include_witness: bool) -> Vec<u8> {
    let extended = include_witness && tx.has_witness();
    let mut data = Vec::new();

    // Version (4 bytes, little-endian)
    data.extend_from_slice(&tx.version.to_le_bytes());

    // Marker and flag
    if extended {
        data.extend_from_slice(&[0x00, 0x01]);
    }

    // Inputs
    data.extend_from_slice(&encode_varint(tx.inputs.len() as u64));
    for input in &tx.inputs {
        data.extend_from_slice(&input.prevout.hash);
        data.extend_from_slice(&input.prevout.index.to_le_bytes());
        write_bytes(&mut data, &input.script_sig);
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }

    // Outputs
    data.extend_from_slice(&encode_varint(tx.outputs.len() as u64));
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        write_bytes(&mut data, &output.script_pubkey);
    }

    // Witness stacks, one per input
    if extended {
        for input in &tx.inputs {
            data.extend_from_slice(&encode_varint(input.witness.len() as u64));
            for item in &input.witness {
                write_bytes(&mut data, item);
            }
        }
    }

    // Lock time (4 bytes, little-endian)
    data.extend_from_slice(&tx.lock_time.to_le_bytes());

    data
}

/// Serialize an 80-byte block header
pub fn serialize_header(header: &BlockHeader) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(80);
    bytes.extend_from_slice(&header.version.to_le_bytes());
    bytes.extend_from_slice(&header.prev_block_hash);
    bytes.extend_from_slice(&header.merkle_root);
    bytes.extend_from_slice(&header.timestamp.to_le_bytes());
    bytes.extend_from_slice(&header.bits.to_le_bytes());
    bytes.extend_from_slice(&header.nonce.to_le_bytes());
    bytes
}

/// Transaction id: hash of the legacy serialization
pub fn calculate_tx_id(tx: &Transaction) -> Hash {
    double_sha256(&serialize_transaction(tx, false))
}

/// Witness transaction id: hash of the extended serialization.
///
/// Equal to the txid when the transaction carries no witness.
pub fn calculate_wtx_id(tx: &Transaction) -> Hash {
    double_sha256(&serialize_transaction(tx, true))
}

pub fn calculate_block_hash(header: &BlockHeader) -> Hash {
    double_sha256(&serialize_header(header))
}

/// Size of the transaction without witness data
pub fn stripped_size(tx: &Transaction) -> usize {
    serialize_transaction(tx, false).len()
}

/// Size of the transaction including witness data
pub fn total_size(tx: &Transaction) -> usize {
    serialize_transaction(tx, true).len()
}

/// Block size without witness data: header, tx count, stripped transactions
pub fn block_stripped_size(block: &Block) -> usize {
    80 + varint_len(block.transactions.len() as u64)
        + block.transactions.iter().map(stripped_size).sum::<usize>()
}

/// Block size including witness data
pub fn block_total_size(block: &Block) -> usize {
    80 + varint_len(block.transactions.len() as u64)
        + block.transactions.iter().map(total_size).sum::<usize>()
}

/// Display form of a hash: byte-reversed lowercase hex
pub fn hash_to_hex(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parse the display form of a hash back into internal byte order
pub fn hash_from_hex(s: &str) -> Option<Hash> {
    let mut hash = [0u8; 32];
    hex::decode_to_slice(s, &mut hash).ok()?;
    hash.reverse();
    Some(hash)
}
