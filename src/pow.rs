//! Proof of Work functions from Orange Paper Section 7

use crate::error::{ConsensusError, Result};
use crate::serialize::calculate_block_hash;
use crate::types::*;

/// 256-bit integer for Bitcoin target calculations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U256([u64; 4]); // little-endian words

impl U256 {
    pub fn zero() -> Self {
        U256([0; 4])
    }

    fn from_u32(value: u32) -> Self {
        U256([value as u64, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }

        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }

        result
    }

    /// Interpret a hash (internal byte order) as a little-endian number
    pub fn from_hash(bytes: &Hash) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(chunk);
        }
        U256(words)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                std::cmp::Ordering::Equal => continue,
                other => return other,
            }
        }
        std::cmp::Ordering::Equal
    }
}

/// Expand target from compact representation
///
/// The format is 0xEEMMMMMM: an exponent byte and a 23-bit mantissa with a
/// sign bit. The target is mantissa × 256^(exponent − 3).
///
/// Returns `None` for negative, zero or overflowing encodings.
pub fn expand_target(bits: u32) -> Option<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    let negative = mantissa != 0 && bits & 0x0080_0000 != 0;
    let overflow = mantissa != 0
        && (exponent > 34 || (mantissa > 0xff && exponent > 33) || (mantissa > 0xffff && exponent > 32));
    if negative || overflow {
        return None;
    }

    let target = if exponent <= 3 {
        U256::from_u32(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from_u32(mantissa).shl(8 * (exponent - 3))
    };

    if target.is_zero() {
        None
    } else {
        Some(target)
    }
}

/// CheckProofOfWork: ℋ × ℕ → {valid, invalid}
///
/// 1. ExpandTarget(h.bits) is a positive target no easier than the limit
/// 2. SHA256d(h) ≤ target
pub fn check_proof_of_work(header: &BlockHeader, pow_limit_bits: u32) -> Result<()> {
    let target = expand_target(header.bits).ok_or(ConsensusError::HighHash)?;
    let limit = expand_target(pow_limit_bits).ok_or(ConsensusError::HighHash)?;
    if target > limit {
        return Err(ConsensusError::HighHash);
    }

    let hash = U256::from_hash(&calculate_block_hash(header));
    if hash > target {
        return Err(ConsensusError::HighHash);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::hash_from_hex;

    fn genesis_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root: hash_from_hex("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b").unwrap(),
            timestamp: 1231006505,
            bits: 0x1d00ffff,
            nonce: 2083236893,
        }
    }

    #[test]
    fn test_expand_target() {
        let target = expand_target(0x1d00ffff).unwrap();
        // 0xffff << 208
        assert_eq!(target.0, [0, 0, 0, 0x0000_0000_ffff_0000]);

        assert_eq!(expand_target(0x03123456).unwrap().0[0], 0x123456);
        assert_eq!(expand_target(0x02123400).unwrap().0[0], 0x1234);
    }

    #[test]
    fn test_expand_target_rejects_invalid() {
        assert!(expand_target(0x00000000).is_none());
        assert!(expand_target(0x1d000000).is_none());
        assert!(expand_target(0x04923456).is_none()); // negative
        assert!(expand_target(0xff123456).is_none()); // overflow
    }

    #[test]
    fn test_check_proof_of_work_genesis() {
        assert_eq!(check_proof_of_work(&genesis_header(), 0x1d00ffff), Ok(()));
    }

    #[test]
    fn test_check_proof_of_work_wrong_nonce() {
        let mut header = genesis_header();
        header.nonce += 1;
        assert_eq!(check_proof_of_work(&header, 0x1d00ffff), Err(ConsensusError::HighHash));
    }

    #[test]
    fn test_target_above_limit() {
        let mut header = genesis_header();
        header.bits = 0x1e00ffff;
        assert_eq!(check_proof_of_work(&header, 0x1d00ffff), Err(ConsensusError::HighHash));
    }

    #[test]
    fn test_easy_target_is_found_quickly() {
        let mut header = genesis_header();
        header.bits = 0x207fffff;
        let found = (0..64u32).any(|nonce| {
            header.nonce = nonce;
            check_proof_of_work(&header, 0x207fffff).is_ok()
        });
        assert!(found);
    }
}
