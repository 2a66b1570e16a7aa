//! Script parsing, templates and signature-operation counting
//!
//! Script *execution* is delegated to a [`ScriptVerifier`]; this module only
//! reads scripts structurally: push decoding, standard template matching,
//! sigop counting and the BIP34 height push.

use crate::types::*;

// ============================================================================
// OPCODES
// ============================================================================

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
pub const OP_INVALIDOPCODE: u8 = 0xff;

/// Sigops charged for a bare CHECKMULTISIG when the key count is unknown
pub const MAX_PUBKEYS_PER_MULTISIG: u32 = 20;

/// Largest standard OP_RETURN output script
pub const MAX_OP_RETURN_RELAY: usize = 83;

/// Decode OP_1..OP_16 (and OP_0) into its small integer
pub fn decode_op_n(opcode: u8) -> u32 {
    if opcode == OP_0 {
        0
    } else {
        (opcode - (OP_1 - 1)) as u32
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// A single parsed script element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// Any opcode up to OP_PUSHDATA4 together with the bytes it pushes
    Push { opcode: u8, data: &'a [u8] },
    Op(u8),
}

impl Instruction<'_> {
    pub fn opcode(&self) -> u8 {
        match *self {
            Instruction::Push { opcode, .. } => opcode,
            Instruction::Op(opcode) => opcode,
        }
    }
}

/// A push whose declared length runs past the end of the script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedPush;

/// Iterator over the elements of a script; stops after the first error
pub struct Instructions<'a> {
    script: &'a [u8],
    pos: usize,
}

pub fn instructions(script: &[u8]) -> Instructions<'_> {
    Instructions { script, pos: 0 }
}

impl<'a> Instructions<'a> {
    fn read_len(&mut self, width: usize) -> Option<usize> {
        let bytes = self.script.get(self.pos..self.pos + width)?;
        self.pos += width;
        let mut buf = [0u8; 4];
        buf[..width].copy_from_slice(bytes);
        Some(u32::from_le_bytes(buf) as usize)
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = std::result::Result<Instruction<'a>, TruncatedPush>;

    fn next(&mut self) -> Option<Self::Item> {
        let opcode = *self.script.get(self.pos)?;
        self.pos += 1;

        if opcode > OP_PUSHDATA4 {
            return Some(Ok(Instruction::Op(opcode)));
        }

        let len = match opcode {
            OP_PUSHDATA1 => self.read_len(1),
            OP_PUSHDATA2 => self.read_len(2),
            OP_PUSHDATA4 => self.read_len(4),
            n => Some(n as usize),
        };
        let data = len.and_then(|n| {
            let end = self.pos.checked_add(n)?;
            self.script.get(self.pos..end)
        });
        match data {
            Some(data) => {
                self.pos += data.len();
                Some(Ok(Instruction::Push { opcode, data }))
            }
            None => {
                self.pos = self.script.len();
                Some(Err(TruncatedPush))
            }
        }
    }
}

/// True if the script consists only of push operations (OP_16 and below)
pub fn is_push_only(script: &[u8]) -> bool {
    instructions(script).all(|ins| matches!(ins, Ok(ins) if ins.opcode() <= OP_16))
}

/// The data pushed last by a push-only script (the P2SH redeem script)
pub fn last_push(script: &[u8]) -> Option<&[u8]> {
    let mut last: Option<&[u8]> = None;
    for ins in instructions(script) {
        match ins.ok()? {
            Instruction::Push { data, .. } => last = Some(data),
            Instruction::Op(op) if op <= OP_16 => last = Some(&script[..0]),
            Instruction::Op(_) => return None,
        }
    }
    last
}

// ============================================================================
// SIGNATURE OPERATIONS
// ============================================================================

/// GetSigOpCount: 𝕊 × 𝔹 → ℕ
///
/// 1. CHECKSIG / CHECKSIGVERIFY count 1
/// 2. CHECKMULTISIG / CHECKMULTISIGVERIFY count the preceding OP_N when
///    `accurate` and the key count is encoded, 20 otherwise
/// 3. Counting stops at the first malformed push
pub fn get_sigop_count(script: &[u8], accurate: bool) -> u32 {
    let mut count = 0u32;
    let mut last_opcode = OP_INVALIDOPCODE;
    for ins in instructions(script) {
        let Ok(ins) = ins else { break };
        let opcode = ins.opcode();
        match opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                if accurate && (OP_1..=OP_16).contains(&last_opcode) {
                    count += decode_op_n(last_opcode);
                } else {
                    count += MAX_PUBKEYS_PER_MULTISIG;
                }
            }
            _ => {}
        }
        last_opcode = opcode;
    }
    count
}

/// Sigops of a witness program as spent by `witness`
pub fn witness_sigop_count(version: u8, program: &[u8], witness: &Witness) -> u32 {
    if version != 0 {
        return 0;
    }
    match (program.len(), witness.last()) {
        (20, _) => 1,
        (32, Some(witness_script)) => get_sigop_count(witness_script, true),
        _ => 0,
    }
}

// ============================================================================
// TEMPLATES
// ============================================================================

pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Decode a witness program: a version opcode followed by one 2..=40 byte push
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => decode_op_n(op) as u8,
        _ => return None,
    };
    if script[1] as usize + 2 != script.len() {
        return None;
    }
    Some((version, &script[2..]))
}

/// An OP_RETURN output followed only by pushes
pub fn is_null_data(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN) && is_push_only(&script[1..])
}

/// Standard output script templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    PubKey,
    PubKeyHash,
    ScriptHash,
    MultiSig { required: u32, keys: u32 },
    NullData,
    WitnessV0KeyHash,
    WitnessV0ScriptHash,
    WitnessUnknown,
    NonStandard,
}

fn is_pubkey_push(ins: &Instruction<'_>) -> bool {
    matches!(ins, Instruction::Push { data, .. } if data.len() == 33 || data.len() == 65)
}

fn match_multisig(script: &[u8]) -> Option<ScriptType> {
    let parsed: Vec<Instruction<'_>> = instructions(script).collect::<std::result::Result<_, _>>().ok()?;
    if parsed.len() < 4 {
        return None;
    }
    let required = match parsed[0] {
        Instruction::Op(op @ OP_1..=OP_16) => decode_op_n(op),
        _ => return None,
    };
    let keys = match parsed[parsed.len() - 2] {
        Instruction::Op(op @ OP_1..=OP_16) => decode_op_n(op),
        _ => return None,
    };
    if parsed[parsed.len() - 1] != Instruction::Op(OP_CHECKMULTISIG) {
        return None;
    }
    let pubkeys = &parsed[1..parsed.len() - 2];
    if pubkeys.len() as u32 != keys || required > keys || !pubkeys.iter().all(is_pubkey_push) {
        return None;
    }
    Some(ScriptType::MultiSig { required, keys })
}

/// Match an output script against the standard templates
pub fn classify_script(script: &[u8]) -> ScriptType {
    if is_pay_to_script_hash(script) {
        return ScriptType::ScriptHash;
    }
    if let Some((version, program)) = witness_program(script) {
        return match (version, program.len()) {
            (0, 20) => ScriptType::WitnessV0KeyHash,
            (0, 32) => ScriptType::WitnessV0ScriptHash,
            (0, _) => ScriptType::NonStandard,
            _ => ScriptType::WitnessUnknown,
        };
    }
    if is_null_data(script) {
        return ScriptType::NullData;
    }
    if script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
    {
        return ScriptType::PubKeyHash;
    }
    if (script.len() == 35 && script[0] == 33 || script.len() == 67 && script[0] == 65)
        && script[script.len() - 1] == OP_CHECKSIG
    {
        return ScriptType::PubKey;
    }
    match_multisig(script).unwrap_or(ScriptType::NonStandard)
}

// ============================================================================
// NUMBERS
// ============================================================================

/// Minimal little-endian sign-magnitude encoding of a script number
pub fn encode_script_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut out = Vec::new();
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

/// Script fragment pushing `value` the way a script builder does:
/// small-integer opcodes for -1 and 0..=16, a minimal data push otherwise.
pub fn push_int(value: i64) -> Vec<u8> {
    match value {
        0 => vec![OP_0],
        -1 => vec![OP_1NEGATE],
        1..=16 => vec![OP_1 + (value as u8) - 1],
        _ => {
            let data = encode_script_num(value);
            let mut script = Vec::with_capacity(data.len() + 1);
            script.push(data.len() as u8);
            script.extend_from_slice(&data);
            script
        }
    }
}

// ============================================================================
// VERIFICATION
// ============================================================================

/// The spending side of one script check
#[derive(Debug, Clone, Copy)]
pub struct ScriptCheck<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    /// Value of the output being spent
    pub amount: Integer,
}

impl ScriptCheck<'_> {
    pub fn witness(&self) -> &Witness {
        &self.tx.inputs[self.input_index].witness
    }
}

/// Executes a scriptSig/scriptPubKey pair (plus witness) under `flags`.
///
/// Implementations must be deterministic and free of side effects; the
/// mempool may call them twice for the same input with different flags.
pub trait ScriptVerifier: Send + Sync {
    fn verify(&self, script_sig: &[u8], script_pubkey: &[u8], flags: u32, check: &ScriptCheck<'_>) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2pkh() -> Vec<u8> {
        let mut script = vec![OP_DUP, OP_HASH160, 0x14];
        script.extend_from_slice(&[0x11; 20]);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        script
    }

    fn multisig(required: u8, keys: u8) -> Vec<u8> {
        let mut script = vec![OP_1 + required - 1];
        for _ in 0..keys {
            script.push(33);
            script.extend_from_slice(&[0x02; 33]);
        }
        script.extend_from_slice(&[OP_1 + keys - 1, OP_CHECKMULTISIG]);
        script
    }

    #[test]
    fn test_instructions_pushdata() {
        let script = [OP_PUSHDATA1, 2, 0xaa, 0xbb, 0x01, 0xcc, OP_CHECKSIG];
        let parsed: Vec<_> = instructions(&script).map(|i| i.unwrap()).collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], Instruction::Push { opcode: OP_PUSHDATA1, data: &[0xaa, 0xbb] });
        assert_eq!(parsed[1], Instruction::Push { opcode: 0x01, data: &[0xcc] });
        assert_eq!(parsed[2], Instruction::Op(OP_CHECKSIG));
    }

    #[test]
    fn test_instructions_truncated() {
        let script = [0x05, 0x01, 0x02];
        let mut iter = instructions(&script);
        assert_eq!(iter.next(), Some(Err(TruncatedPush)));
        assert_eq!(iter.next(), None);
        assert!(!is_push_only(&script));
    }

    #[test]
    fn test_sigop_count() {
        assert_eq!(get_sigop_count(&p2pkh(), false), 1);
        assert_eq!(get_sigop_count(&multisig(2, 3), true), 3);
        assert_eq!(get_sigop_count(&multisig(2, 3), false), 20);
        assert_eq!(get_sigop_count(&[OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_CHECKMULTISIG], true), 22);
        // Counting stops at a malformed push
        assert_eq!(get_sigop_count(&[OP_CHECKSIG, 0x10, OP_CHECKSIG], false), 1);
    }

    #[test]
    fn test_witness_sigops() {
        assert_eq!(witness_sigop_count(0, &[0u8; 20], &vec![]), 1);
        let witness = vec![vec![0x30], multisig(1, 2)];
        assert_eq!(witness_sigop_count(0, &[0u8; 32], &witness), 2);
        assert_eq!(witness_sigop_count(1, &[0u8; 32], &witness), 0);
    }

    #[test]
    fn test_classify_script() {
        assert_eq!(classify_script(&p2pkh()), ScriptType::PubKeyHash);
        let mut p2sh = vec![OP_HASH160, 0x14];
        p2sh.extend_from_slice(&[0x22; 20]);
        p2sh.push(OP_EQUAL);
        assert_eq!(classify_script(&p2sh), ScriptType::ScriptHash);
        assert_eq!(classify_script(&multisig(1, 3)), ScriptType::MultiSig { required: 1, keys: 3 });
        assert_eq!(classify_script(&[OP_RETURN, 0x02, 0xde, 0xad]), ScriptType::NullData);
        let mut wpkh = vec![OP_0, 0x14];
        wpkh.extend_from_slice(&[0x33; 20]);
        assert_eq!(classify_script(&wpkh), ScriptType::WitnessV0KeyHash);
        let mut future = vec![OP_1, 0x20];
        future.extend_from_slice(&[0x44; 32]);
        assert_eq!(classify_script(&future), ScriptType::WitnessUnknown);
        assert_eq!(classify_script(&[OP_DUP]), ScriptType::NonStandard);
    }

    #[test]
    fn test_last_push() {
        let script = [0x01, 0xaa, 0x02, 0xbb, 0xcc];
        assert_eq!(last_push(&script), Some(&[0xbb, 0xcc][..]));
        assert_eq!(last_push(&[0x01, 0xaa, OP_CHECKSIG]), None);
        assert_eq!(last_push(&[]), None);
    }

    #[test]
    fn test_push_int() {
        assert_eq!(push_int(0), vec![OP_0]);
        assert_eq!(push_int(16), vec![OP_16]);
        assert_eq!(push_int(17), vec![0x01, 0x11]);
        assert_eq!(push_int(128), vec![0x02, 0x80, 0x00]);
        assert_eq!(push_int(227_931), vec![0x03, 0x5b, 0x7a, 0x03]);
        assert_eq!(push_int(-1), vec![OP_1NEGATE]);
        assert_eq!(encode_script_num(-255), vec![0xff, 0x80]);
    }
}
