//! Block validation through the public API

use consensus_validation::merkle::{block_merkle_root, compute_merkle_root};
use consensus_validation::script::push_int;
use consensus_validation::serialize::{calculate_block_hash, calculate_tx_id, double_sha256, hash_from_hex, hash_to_hex};
use consensus_validation::*;

fn genesis_block() -> Block {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint::null(),
            script_sig: hex::decode("04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73").unwrap(),
            sequence: 0xffffffff,
            witness: vec![],
        }],
        outputs: vec![TransactionOutput {
            value: 50 * COIN,
            script_pubkey: hex::decode("4104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac").unwrap(),
        }],
        lock_time: 0,
    };
    Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root: calculate_tx_id(&coinbase),
            timestamp: 1231006505,
            bits: 0x1d00ffff,
            nonce: 2083236893,
        },
        transactions: vec![coinbase],
    }
}

fn coinbase_at(height: Natural) -> Transaction {
    let mut script_sig = push_int(height as i64);
    script_sig.extend_from_slice(b"/test/");
    Transaction {
        version: 1,
        inputs: vec![TransactionInput { prevout: OutPoint::null(), script_sig, sequence: SEQUENCE_FINAL, witness: vec![] }],
        outputs: vec![TransactionOutput { value: 50 * COIN, script_pubkey: vec![0x51] }],
        lock_time: 0,
    }
}

fn payment(tag: u8) -> Transaction {
    Transaction {
        version: 2,
        inputs: vec![TransactionInput {
            prevout: OutPoint { hash: [tag; 32], index: 1 },
            script_sig: vec![0x01, tag],
            sequence: SEQUENCE_FINAL,
            witness: vec![],
        }],
        outputs: vec![TransactionOutput { value: 25_000, script_pubkey: vec![0x51] }],
        lock_time: 0,
    }
}

/// Regtest block extending `ctx`, with a nonce meeting the easy target
fn mine(transactions: Vec<Transaction>, ctx: &ChainContext) -> Block {
    let mut block = Block {
        header: BlockHeader {
            version: 4,
            prev_block_hash: [0xab; 32],
            merkle_root: [0; 32],
            timestamp: (ctx.median_time_past + 1) as u32,
            bits: ctx.next_work_required,
            nonce: 0,
        },
        transactions,
    };
    block.header.merkle_root = block_merkle_root(&block).0;
    let params = ConsensusParams::regtest();
    while block::check_block_header(&block.header, &params).is_err() {
        block.header.nonce += 1;
    }
    block
}

fn regtest_context() -> ChainContext {
    ChainContext { height: 199, median_time_past: 1_700_000_000, next_work_required: 0x207fffff, adjusted_time: 1_700_000_100 }
}

#[test]
fn test_genesis_block_passes_context_free_checks() {
    let validator = ConsensusValidator::default();
    let genesis = genesis_block();
    assert_eq!(
        hash_to_hex(&calculate_block_hash(&genesis.header)),
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
    );
    assert_eq!(validator.check_block_header(&genesis.header), Ok(()));
    assert_eq!(validator.check_block(&genesis), Ok(()));
}

#[test]
fn test_two_transaction_merkle_fixture() {
    // Block 170: coinbase plus the first bitcoin payment
    let coinbase = hash_from_hex("b1fea52486ce0c62bb442b530a3f0132b826c74e473d1f2c220bfa78111c5082").unwrap();
    let payment = hash_from_hex("f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16").unwrap();

    let mut concatenated = coinbase.to_vec();
    concatenated.extend_from_slice(&payment);
    let expected = double_sha256(&concatenated);

    let validator = ConsensusValidator::default();
    let (root, mutated) = validator.compute_merkle_root(&[coinbase, payment]);
    assert_eq!(root, expected);
    assert_eq!(hash_to_hex(&root), "7dac2c5666815c17a3b36427de37bb9d2e2c5ccec3f8633eb91a4205cb4c10ff");
    assert!(!mutated);
}

#[test]
fn test_empty_merkle_root() {
    assert_eq!(compute_merkle_root(&[]), ([0u8; 32], false));
}

#[test]
fn test_duplicated_subtree_block_rejected() {
    let validator = ConsensusValidator::default();
    let honest = mine(vec![coinbase_at(200), payment(1), payment(2)], &regtest_context());

    // Repeating the unpaired last transaction reproduces the same root
    let mut forged = honest.clone();
    forged.transactions.push(payment(2));
    assert_eq!(block_merkle_root(&forged).0, honest.header.merkle_root);

    let err = validator.check_block(&forged).unwrap_err();
    assert_eq!(err, ConsensusError::DuplicateTransactions);
    assert_eq!(err.reject_reason(), "bad-txns-duplicate");
    assert!(err.is_corruption_possible());
    assert_eq!(validator.check_block(&honest), Ok(()));
}

#[test]
fn test_validate_block_regtest() {
    let validator = ConsensusValidator::new(ConsensusParams::regtest());
    let ctx = regtest_context();
    let block = mine(vec![coinbase_at(200), payment(1)], &ctx);
    assert_eq!(validator.validate_block(&block, &ctx), Ok(()));
    assert_eq!(validator.block_weight(&block), 4 * block_stripped(&block));
}

fn block_stripped(block: &Block) -> Natural {
    serialize::block_stripped_size(block) as Natural
}

#[test]
fn test_validate_block_phase_order() {
    let validator = ConsensusValidator::new(ConsensusParams::regtest());
    let ctx = regtest_context();

    // Context-free failure is reported before the contextual one
    let mut block = mine(vec![coinbase_at(999), payment(1)], &ctx);
    let dup_input = block.transactions[1].inputs[0].clone();
    block.transactions[1].inputs.push(dup_input);
    block.header.merkle_root = block_merkle_root(&block).0;
    while validator.check_block_header(&block.header).is_err() {
        block.header.nonce += 1;
    }
    assert_eq!(validator.validate_block(&block, &ctx), Err(ConsensusError::DuplicateInputs));

    let block = mine(vec![coinbase_at(999), payment(1)], &ctx);
    assert_eq!(validator.validate_block(&block, &ctx), Err(ConsensusError::BadCoinbaseHeight));
}

#[test]
fn test_bad_version_after_activation() {
    let params = ConsensusParams { bip34_height: 100, bip66_height: 150, bip65_height: 180, ..ConsensusParams::regtest() };
    let validator = ConsensusValidator::new(params);
    let ctx = regtest_context();
    let mut block = mine(vec![coinbase_at(200), payment(1)], &ctx);
    block.header.version = 3;
    while validator.check_block_header(&block.header).is_err() {
        block.header.nonce += 1;
    }
    let err = validator.validate_block(&block, &ctx).unwrap_err();
    assert_eq!(err, ConsensusError::BadVersion { version: 3, minimum: 4 });
    assert_eq!(err.reject_code(), RejectCode::Obsolete);
}

#[test]
fn test_coinbase_script_length_bounds() {
    let validator = ConsensusValidator::default();
    let mut coinbase = coinbase_at(200);
    coinbase.inputs[0].script_sig = vec![0x01];
    assert_eq!(validator.check_transaction(&coinbase), Err(ConsensusError::BadCoinbaseLength { length: 1 }));
    coinbase.inputs[0].script_sig = vec![0x00; 101];
    assert_eq!(validator.check_transaction(&coinbase), Err(ConsensusError::BadCoinbaseLength { length: 101 }));
    coinbase.inputs[0].script_sig = vec![0x00; 100];
    assert_eq!(validator.check_transaction(&coinbase), Ok(()));
}

#[test]
fn test_output_value_bounds() {
    let validator = ConsensusValidator::default();
    let mut tx = payment(1);
    tx.outputs[0].value = -1;
    assert_eq!(validator.check_transaction(&tx), Err(ConsensusError::NegativeOutput { index: 0 }));

    tx.outputs[0].value = MAX_MONEY + 1;
    assert_eq!(validator.check_transaction(&tx), Err(ConsensusError::OutputTooLarge { index: 0 }));

    tx.outputs[0].value = MAX_MONEY;
    tx.outputs.push(TransactionOutput { value: 1, script_pubkey: vec![] });
    assert_eq!(validator.check_transaction(&tx), Err(ConsensusError::OutputTotalTooLarge));
}

#[test]
fn test_null_prevout_in_regular_transaction() {
    let validator = ConsensusValidator::default();
    let mut tx = payment(1);
    tx.inputs.push(TransactionInput { prevout: OutPoint::null(), script_sig: vec![], sequence: 0, witness: vec![] });
    assert_eq!(validator.check_transaction(&tx), Err(ConsensusError::NullPrevout { index: 1 }));
}
