//! Replay a CSV tick file through the data path and report what came
//! out the other end.

use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use tickpath::codec::OrderEntryOperation;
use tickpath::config::DataPathConfig;
use tickpath::engine::{DataPath, DataPathStreams, FeedInput, STREAM_DEPTH};
use tickpath::feed::TickRow;
use tickpath::UdpMeta;

#[derive(Parser, Debug)]
#[command(about = "Replay a CSV tick file through the data path")]
struct Args {
    /// CSV tick file to replay
    ticks: PathBuf,

    /// JSON config applied before the run
    #[arg(long)]
    config: Option<PathBuf>,

    /// Price multiplier applied to decimal prices
    #[arg(long, default_value_t = 100)]
    price_mult: u64,

    /// Source address stamped on every frame
    #[arg(long, default_value_t = 0xc0a8_0101)]
    src_address: u32,

    /// Source port stamped on every frame
    #[arg(long, default_value_t = 0x2000)]
    src_port: u16,

    /// Print every emitted order operation
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => serde_json::from_reader(File::open(path)?)?,
        None => {
            let mut config = DataPathConfig::default();
            config.reset_timer_interval = 32;
            config.port0_rules.push(tickpath::config::FilterRuleConfig {
                slot: 0,
                address: args.src_address,
                port: args.src_port,
                split_id: 0,
            });
            config
        }
    };
    let mut path = DataPath::from_config(&config)?;
    path.warm_up();

    let mut streams = DataPathStreams::new(STREAM_DEPTH);
    let meta = UdpMeta { src_address: args.src_address, src_port: args.src_port };

    let mut reader = csv::Reader::from_path(&args.ticks)?;
    let mut rows = 0u64;
    let mut operations = 0u64;

    for result in reader.deserialize() {
        let row: TickRow = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(%err, "skipping unparseable row");
                continue;
            }
        };
        let symbol_index = match path.directory.index_of(row.security_id) {
            Ok(index) => index as u8,
            Err(_) if config.securities.is_empty() => (row.security_id & 63) as u8,
            Err(err) => {
                warn!(%err, "skipping row for unknown security");
                continue;
            }
        };

        let frame = row.to_frame(symbol_index, meta, args.price_mult);
        path.feed(FeedInput::Meta { port: 0, meta: frame.meta }, &mut streams);
        for word in &frame.words {
            path.feed(FeedInput::Data { port: 0, word: *word }, &mut streams);
        }
        rows += 1;

        // enough steps to carry one frame through every stage
        for _ in 0..24 {
            path.step(&mut streams);
        }
        while let Some(pack) = streams.pricing.operation_out.pop() {
            operations += 1;
            if args.verbose {
                let op = OrderEntryOperation::unpack(&pack);
                info!(
                    symbol = op.symbol_index,
                    order_id = op.order_id,
                    price = op.price,
                    quantity = op.quantity,
                    "order operation"
                );
            }
        }
    }

    let status = path.status();
    info!(rows, operations, "replay finished");
    info!(
        forwarded = status.arbitrator.total_sent,
        missed = status.arbitrator.total_missed,
        discarded_port0 = status.arbitrator.discarded[0],
        discarded_port1 = status.arbitrator.discarded[1],
        "arbitration"
    );
    info!(
        responses = status.pricing.rx_responses,
        processed = status.pricing.processed,
        operations = status.pricing.tx_operations,
        malformed = status.malformed_frames,
        "pricing"
    );
    Ok(())
}
