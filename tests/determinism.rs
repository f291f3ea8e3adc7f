//! Determinism Test - Golden Master verification.
//!
//! Verifies that the data path produces identical state and identical
//! order operations across runs when given the same input sequence.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tickpath::codec::{OrderBookResponse, OrderEntryOperation, UdpMeta, Word, LEVELS, RESPONSE_BEATS};
use tickpath::engine::{DataPath, DataPathStreams, STREAM_DEPTH};

const FEED_ADDR: u32 = 0xc0a8_0101;
const FEED_PORT: u16 = 0x2000;

#[derive(Clone, Copy)]
struct Frame {
    seq: u32,
    port: usize,
    response: OrderBookResponse,
}

/// Generate a deterministic frame schedule: mostly in-sequence, with
/// duplicates on the B line and occasional gaps.
fn generate_frames(seed: u64, count: usize) -> Vec<Frame> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut frames = Vec::with_capacity(count * 2);
    let mut seq = 0u32;

    for _ in 0..count {
        // occasional gap in the feed
        seq += if rng.gen_bool(0.05) { 2 } else { 1 };

        let response = OrderBookResponse {
            symbol_index: rng.gen_range(0..64),
            timestamp: u64::from(seq),
            bid_price: rng.gen_range(9_900..10_100),
            ask_price: rng.gen_range(10_100..10_300),
            bid_quantity: [rng.gen_range(1..1000); LEVELS],
            ask_quantity: [rng.gen_range(1..1000); LEVELS],
        };
        frames.push(Frame { seq, port: 0, response });
        if rng.gen_bool(0.6) {
            frames.push(Frame { seq, port: 1, response });
        }
    }
    frames
}

fn queue_frame(streams: &mut DataPathStreams, frame: &Frame) {
    let meta = UdpMeta { src_address: FEED_ADDR, src_port: FEED_PORT };
    streams.filter[frame.port].meta_in.push(meta).unwrap();
    streams.filter[frame.port]
        .data_in
        .push(Word::body(u64::from(frame.seq)))
        .unwrap();
    let pack = frame.response.pack();
    for (i, &beat) in pack.beats.iter().enumerate() {
        let word = if i == RESPONSE_BEATS - 1 {
            Word::tail(beat)
        } else {
            Word::body(beat)
        };
        streams.filter[frame.port].data_in.push(word).unwrap();
    }
}

fn hash_operations(operations: &[OrderEntryOperation]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for op in operations {
        op.op_code.hash(&mut hasher);
        op.symbol_index.hash(&mut hasher);
        op.order_id.hash(&mut hasher);
        op.price.hash(&mut hasher);
        op.quantity.hash(&mut hasher);
        (op.direction as u8).hash(&mut hasher);
    }
    hasher.finish()
}

/// Run the data path over a frame schedule and return hashes.
fn run_path(frames: &[Frame]) -> (u64, u64) {
    let mut path = DataPath::new(32);
    path.filters[0].set_rule(0, FEED_ADDR, u32::from(FEED_PORT), 0);
    path.filters[1].set_rule(0, FEED_ADDR, u32::from(FEED_PORT), 0);
    path.pricing.strategy_control = tickpath::StrategyControl::GLOBAL_STRATEGY
        | tickpath::StrategyControl(1); // peg every symbol

    let mut streams = DataPathStreams::new(STREAM_DEPTH);
    let mut operations = Vec::new();

    for frame in frames {
        queue_frame(&mut streams, frame);
        for _ in 0..48 {
            path.step(&mut streams);
        }
        while let Some(pack) = streams.pricing.operation_out.pop() {
            operations.push(OrderEntryOperation::unpack(&pack));
        }
    }

    (hash_operations(&operations), path.state_hash())
}

#[test]
fn test_determinism_small() {
    const SEED: u64 = 0xDEADBEEF;
    const COUNT: usize = 500;
    const RUNS: usize = 10;

    let frames = generate_frames(SEED, COUNT);

    let (first_op_hash, first_state_hash) = run_path(&frames);

    for run in 1..RUNS {
        let (op_hash, state_hash) = run_path(&frames);
        assert_eq!(op_hash, first_op_hash, "Operation hash mismatch on run {}", run);
        assert_eq!(state_hash, first_state_hash, "State hash mismatch on run {}", run);
    }

    println!("Determinism test passed!");
    println!("  Frames: {}", COUNT);
    println!("  Runs: {}", RUNS);
    println!("  Operation hash: {:#018x}", first_op_hash);
    println!("  State hash: {:#018x}", first_state_hash);
}

#[test]
fn test_determinism_large() {
    const SEED: u64 = 0xCAFEBABE;
    const COUNT: usize = 20_000;
    const RUNS: usize = 3;

    let frames = generate_frames(SEED, COUNT);

    let (first_op_hash, first_state_hash) = run_path(&frames);

    for run in 1..RUNS {
        let (op_hash, state_hash) = run_path(&frames);
        assert_eq!(op_hash, first_op_hash, "Operation hash mismatch on run {}", run);
        assert_eq!(state_hash, first_state_hash, "State hash mismatch on run {}", run);
    }

    println!("Large determinism test passed!");
    println!("  Frames: {}", COUNT);
    println!("  Operation hash: {:#018x}", first_op_hash);
    println!("  State hash: {:#018x}", first_state_hash);
}

#[test]
fn test_different_seeds_produce_different_results() {
    let frames1 = generate_frames(1, 500);
    let frames2 = generate_frames(2, 500);

    let (hash1, _) = run_path(&frames1);
    let (hash2, _) = run_path(&frames2);

    assert_ne!(hash1, hash2, "Different seeds should produce different results");
}
