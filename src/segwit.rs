//! Segregated Witness (SegWit) functions from Orange Paper Section 11.1

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::merkle::block_witness_merkle_root;
use crate::serialize::{block_stripped_size, block_total_size, double_sha256, stripped_size, total_size};
use crate::types::*;

/// Calculate transaction weight for SegWit
/// Weight(tx) = 3 × |Serialize(tx ∖ witness)| + |Serialize(tx)|
pub fn calculate_transaction_weight(tx: &Transaction) -> Natural {
    let base_size = stripped_size(tx) as Natural;
    let total = total_size(tx) as Natural;
    base_size * (WITNESS_SCALE_FACTOR - 1) + total
}

/// Virtual size: weight / 4, rounded up
pub fn virtual_size(tx: &Transaction) -> usize {
    calculate_transaction_weight(tx).div_ceil(WITNESS_SCALE_FACTOR) as usize
}

/// Weight(block) = 3 × |block|_stripped + |block|_total
pub fn calculate_block_weight(block: &Block) -> Natural {
    block_stripped_size(block) as Natural * (WITNESS_SCALE_FACTOR - 1) + block_total_size(block) as Natural
}

/// Index of the coinbase output carrying the witness commitment.
///
/// An output qualifies if its script is at least 38 bytes and starts with
/// `OP_RETURN 0x24 0xaa21a9ed`. When several qualify the last one wins.
pub fn get_witness_commitment_index(block: &Block) -> Option<usize> {
    let coinbase = block.transactions.first()?;
    coinbase.outputs.iter().rposition(|output| {
        output.script_pubkey.len() >= MINIMUM_WITNESS_COMMITMENT
            && output.script_pubkey[..WITNESS_COMMITMENT_HEADER.len()] == WITNESS_COMMITMENT_HEADER
    })
}

/// Validate the block's witness commitment (BIP141).
///
/// With a commitment output present:
/// 1. The coinbase input witness must be exactly one 32-byte item (the nonce)
/// 2. SHA256d(witness_root ‖ nonce) must equal script bytes 6..38
///
/// Without one, no transaction may carry witness data.
pub fn check_witness_commitment(block: &Block) -> Result<()> {
    if let Some(index) = get_witness_commitment_index(block) {
        let coinbase = &block.transactions[0];
        let nonce = match coinbase.inputs.first().map(|input| input.witness.as_slice()) {
            Some([nonce]) if nonce.len() == 32 => nonce,
            _ => return Err(ConsensusError::BadWitnessNonceSize),
        };

        let (witness_root, _) = block_witness_merkle_root(block);
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(&witness_root);
        preimage[32..].copy_from_slice(nonce);
        let commitment = double_sha256(&preimage);

        let script = &coinbase.outputs[index].script_pubkey;
        if script[WITNESS_COMMITMENT_HEADER.len()..MINIMUM_WITNESS_COMMITMENT] != commitment {
            return Err(ConsensusError::BadWitnessMerkleMatch);
        }
        return Ok(());
    }

    if block.transactions.iter().any(Transaction::has_witness) {
        return Err(ConsensusError::UnexpectedWitness);
    }
    Ok(())
}

/// Build the commitment output script for a witness root and nonce
pub fn witness_commitment_script(witness_root: &Hash, nonce: &Hash) -> ByteString {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(witness_root);
    preimage[32..].copy_from_slice(nonce);
    let mut script = WITNESS_COMMITMENT_HEADER.to_vec();
    script.extend_from_slice(&double_sha256(&preimage));
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coinbase() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prevout: OutPoint::null(),
                script_sig: vec![0x01, 0x01],
                sequence: SEQUENCE_FINAL,
                witness: vec![],
            }],
            outputs: vec![TransactionOutput { value: 50 * COIN, script_pubkey: vec![0x51] }],
            lock_time: 0,
        }
    }

    fn witness_spend() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TransactionInput {
                prevout: OutPoint { hash: [7; 32], index: 0 },
                script_sig: vec![],
                sequence: SEQUENCE_FINAL,
                witness: vec![vec![0x30; 72], vec![0x02; 33]],
            }],
            outputs: vec![TransactionOutput { value: 1000, script_pubkey: vec![0x51] }],
            lock_time: 0,
        }
    }

    fn header() -> BlockHeader {
        BlockHeader { version: 4, prev_block_hash: [0; 32], merkle_root: [0; 32], timestamp: 0, bits: 0, nonce: 0 }
    }

    fn committed_block() -> Block {
        let mut block = Block { header: header(), transactions: vec![coinbase(), witness_spend()] };
        block.transactions[0].inputs[0].witness = vec![vec![0u8; 32]];
        let (root, _) = block_witness_merkle_root(&block);
        let script = witness_commitment_script(&root, &[0u8; 32]);
        block.transactions[0].outputs.push(TransactionOutput { value: 0, script_pubkey: script });
        block
    }

    #[test]
    fn test_weight_without_witness() {
        let tx = coinbase();
        let size = stripped_size(&tx) as Natural;
        assert_eq!(calculate_transaction_weight(&tx), size * 4);
        assert_eq!(virtual_size(&tx) as Natural, size);
    }

    #[test]
    fn test_weight_with_witness() {
        let tx = witness_spend();
        let base = stripped_size(&tx) as Natural;
        let total = total_size(&tx) as Natural;
        assert!(total > base);
        assert_eq!(calculate_transaction_weight(&tx), base * 3 + total);
        assert!((virtual_size(&tx) as Natural) < total);
    }

    #[test]
    fn test_commitment_index_last_match_wins() {
        let mut block = committed_block();
        assert_eq!(get_witness_commitment_index(&block), Some(1));
        let decoy = witness_commitment_script(&[1; 32], &[2; 32]);
        block.transactions[0].outputs.push(TransactionOutput { value: 0, script_pubkey: decoy });
        assert_eq!(get_witness_commitment_index(&block), Some(2));
        // The decoy is now authoritative and does not match
        assert_eq!(check_witness_commitment(&block), Err(ConsensusError::BadWitnessMerkleMatch));
    }

    #[test]
    fn test_short_script_is_not_a_commitment() {
        let mut block = Block { header: header(), transactions: vec![coinbase()] };
        let mut script = WITNESS_COMMITMENT_HEADER.to_vec();
        script.extend_from_slice(&[0u8; 31]);
        block.transactions[0].outputs.push(TransactionOutput { value: 0, script_pubkey: script });
        assert_eq!(get_witness_commitment_index(&block), None);
    }

    #[test]
    fn test_valid_commitment() {
        assert_eq!(check_witness_commitment(&committed_block()), Ok(()));
    }

    #[test]
    fn test_bad_nonce_size() {
        let mut block = committed_block();
        block.transactions[0].inputs[0].witness = vec![vec![0u8; 31]];
        assert_eq!(check_witness_commitment(&block), Err(ConsensusError::BadWitnessNonceSize));

        block.transactions[0].inputs[0].witness = vec![vec![0u8; 32], vec![]];
        assert_eq!(check_witness_commitment(&block), Err(ConsensusError::BadWitnessNonceSize));
    }

    #[test]
    fn test_tampered_witness_breaks_commitment() {
        let mut block = committed_block();
        block.transactions[1].inputs[0].witness[0][0] ^= 0x01;
        assert_eq!(check_witness_commitment(&block), Err(ConsensusError::BadWitnessMerkleMatch));
    }

    #[test]
    fn test_unexpected_witness() {
        let block = Block { header: header(), transactions: vec![coinbase(), witness_spend()] };
        assert_eq!(check_witness_commitment(&block), Err(ConsensusError::UnexpectedWitness));

        let plain = Block { header: header(), transactions: vec![coinbase()] };
        assert_eq!(check_witness_commitment(&plain), Ok(()));
    }
}
