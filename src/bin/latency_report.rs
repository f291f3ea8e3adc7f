use hdrhistogram::Histogram;
use std::time::Instant;
use tickpath::codec::{OrderBookResponse, Word, LEVELS, RESPONSE_BEATS};
use tickpath::engine::{DataPath, DataPathStreams, STREAM_DEPTH};
use tickpath::UdpMeta;

const FEED_ADDR: u32 = 0xc0a8_0101;
const FEED_PORT: u16 = 0x2000;

fn queue_frame(streams: &mut DataPathStreams, seq: u32, symbol: u8, bid: u32) {
    let meta = UdpMeta { src_address: FEED_ADDR, src_port: FEED_PORT };
    streams.filter[0].meta_in.push(meta).unwrap();
    streams.filter[0].data_in.push(Word::body(u64::from(seq))).unwrap();
    let response = OrderBookResponse {
        symbol_index: symbol,
        timestamp: u64::from(seq),
        bid_price: bid,
        ask_price: bid + 4,
        bid_quantity: [10; LEVELS],
        ask_quantity: [10; LEVELS],
    };
    let pack = response.pack();
    for (i, &beat) in pack.beats.iter().enumerate() {
        let word = if i == RESPONSE_BEATS - 1 {
            Word::tail(beat)
        } else {
            Word::body(beat)
        };
        streams.filter[0].data_in.push(word).unwrap();
    }
}

fn main() {
    println!("Preparing Latency Benchmark...");

    // Setup
    let mut path = DataPath::new(32);
    path.filters[0].set_rule(0, FEED_ADDR, u32::from(FEED_PORT), 0);
    path.warm_up();

    let mut streams = DataPathStreams::new(STREAM_DEPTH);
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 1_000_000, 3).unwrap();

    const ITERATIONS: u64 = 1_000_000;
    // enough steps to carry one frame through every stage
    const STEPS_PER_FRAME: usize = 24;

    println!("Running {} iterations...", ITERATIONS);

    let mut total_duration = std::time::Duration::new(0, 0);

    for seq in 0..ITERATIONS {
        queue_frame(&mut streams, seq as u32, (seq % 64) as u8, 10_000 + (seq % 100) as u32);

        // Critical measurement section
        let start = Instant::now();

        for _ in 0..STEPS_PER_FRAME {
            path.step(std::hint::black_box(&mut streams));
        }
        while streams.pricing.operation_out.pop().is_some() {}

        let elapsed = start.elapsed();

        histogram.record(elapsed.as_nanos() as u64).unwrap_or(());
        total_duration += elapsed;
    }

    let status = path.status();

    println!("\n=== Frame Latency Report (ns) ===");
    println!("Total Frames: {}", ITERATIONS);
    println!("Processed:    {}", status.pricing.processed);
    println!("Malformed:    {}", status.malformed_frames);
    println!("Throughput:   {:.2} frames/sec", ITERATIONS as f64 / total_duration.as_secs_f64());
    println!("---------------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------------");

    // Quick ASCII histogram
    println!("\nDistribution:");
    for v in histogram.iter_log(1_000_000, 2.0) {
        let count = v.count_at_value();
        if count > 0 {
            println!("up to {:8} ns: {:10} count", v.value_iterated_to(), count);
        }
    }
}
