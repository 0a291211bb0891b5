//! `bench` subcommands: isolated micro-benchmarks for the publish, convert,
//! and queue stages.

use bolson::buffer::{Allocator, JsonBuffer};
use bolson::convert::{resize, serialize, IpcMessage};
use bolson::parse::arrow_backend::{ArrowParser, ArrowParserOptions};
use bolson::parse::Parser;
use bolson::publish::PulsarPublisher;
use bolson::queue::IpcQueue;
use bolson_types::{AllocatorKind, PublishOptions, SeqRange};
use clap::{Args, Subcommand};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Subcommand)]
pub enum BenchCommand {
    /// Benchmarks send throughput against a live Pulsar broker.
    Publish(PublishBenchArgs),
    /// Benchmarks the parse + resize + serialize chain against synthetic
    /// JSON, without touching the network or a broker.
    Convert(ConvertBenchArgs),
    /// Benchmarks push/pop throughput on the IPC queue in isolation.
    Queue(QueueBenchArgs),
}

#[derive(Args)]
pub struct PublishBenchArgs {
    /// Pulsar broker service URL.
    #[clap(long, default_value = "pulsar://localhost:6650")]
    pub pulsar_url: String,

    /// Topic to publish synthetic messages to.
    #[clap(long, default_value = "bolson-bench")]
    pub topic: String,

    /// Number of synthetic IPC messages to send.
    #[clap(long, default_value = "1000")]
    pub messages: u64,

    /// Size, in bytes, of each synthetic message payload.
    #[clap(long, default_value = "4096")]
    pub bytes_per_message: usize,

    /// Print machine-readable CSV instead of a human-readable summary.
    #[clap(long)]
    pub csv: bool,
}

#[derive(Args)]
pub struct ConvertBenchArgs {
    /// Number of synthetic JSON records to generate and convert.
    #[clap(long, default_value = "100000")]
    pub records: u64,

    /// Maximum rows per serialized IPC message.
    #[clap(long, default_value = "10000")]
    pub max_rows: usize,

    /// Maximum serialized size, in bytes, of an IPC message.
    #[clap(long, default_value_t = bolson_types::config::default_max_ipc_size())]
    pub max_ipc_size: usize,

    /// Print machine-readable CSV instead of a human-readable summary.
    #[clap(long)]
    pub csv: bool,
}

#[derive(Args)]
pub struct QueueBenchArgs {
    /// Number of messages to push and pop.
    #[clap(long, default_value = "1000000")]
    pub messages: u64,

    /// Queue capacity.
    #[clap(long, default_value = "1024")]
    pub capacity: usize,

    /// Print machine-readable CSV instead of a human-readable summary.
    #[clap(long)]
    pub csv: bool,
}

pub fn run(cmd: BenchCommand) -> anyhow::Result<()> {
    match cmd {
        BenchCommand::Publish(args) => bench_publish(args),
        BenchCommand::Convert(args) => bench_convert(args),
        BenchCommand::Queue(args) => bench_queue(args),
    }
}

/// Connects one producer and sends `args.messages` synthetic payloads
/// sequentially, reporting wall-clock throughput. A single connection is
/// enough to characterize per-message send latency; `stream`'s own
/// `--producers` flag is what scales this to a pool.
fn bench_publish(args: PublishBenchArgs) -> anyhow::Result<()> {
    let opts = PublishOptions {
        url: args.pulsar_url.clone(),
        topic: args.topic.clone(),
        ..Default::default()
    };
    let publisher = PulsarPublisher::connect(&opts)?;
    let payload = vec![0u8; args.bytes_per_message];

    let start = Instant::now();
    for i in 0..args.messages {
        let msg = IpcMessage {
            bytes: payload.clone(),
            seq_range: SeqRange::new(i, i),
            num_rows: 1,
        };
        publisher.publish(&msg)?;
    }
    let elapsed = start.elapsed();

    report(
        args.csv,
        &[
            ("messages", args.messages.to_string()),
            ("elapsed_ms", format!("{:.3}", elapsed.as_secs_f64() * 1000.0)),
            (
                "messages_per_sec",
                format!("{:.0}", args.messages as f64 / elapsed.as_secs_f64().max(1e-9)),
            ),
            (
                "bytes_per_sec",
                format!(
                    "{:.0}",
                    (args.messages as f64 * args.bytes_per_message as f64) / elapsed.as_secs_f64().max(1e-9)
                ),
            ),
        ],
    );
    Ok(())
}

fn bench_convert(args: ConvertBenchArgs) -> anyhow::Result<()> {
    use arrow_schema::{DataType, Field, Schema};

    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
    let allocator = Allocator::new(AllocatorKind::System, 0);
    let mut buf = JsonBuffer::new(allocator.allocate(256 * 1024 * 1024)?);
    for seq in 0..args.records {
        let line = format!(r#"{{"v":{seq}}}"#);
        if buf.would_overflow(line.len() + 1) {
            break;
        }
        buf.append(seq, line.as_bytes());
    }

    let parser = ArrowParser::new(ArrowParserOptions {
        input_schema: schema.clone(),
        seq_column: true,
        batch_size: args.records as usize,
    });

    let start = Instant::now();
    let parsed = parser.parse(&[&buf])?;
    let output_schema = parser.output_schema();
    let mut total_bytes = 0usize;
    for batch in parsed {
        for piece in resize(batch, args.max_rows) {
            let msg = serialize(output_schema.clone(), piece, args.max_ipc_size)?;
            total_bytes += msg.bytes.len();
        }
    }
    let elapsed = start.elapsed();

    report(
        args.csv,
        &[
            ("records", buf.num_jsons().to_string()),
            ("elapsed_ms", format!("{:.3}", elapsed.as_secs_f64() * 1000.0)),
            (
                "records_per_sec",
                format!("{:.0}", buf.num_jsons() as f64 / elapsed.as_secs_f64().max(1e-9)),
            ),
            ("serialized_bytes", total_bytes.to_string()),
        ],
    );
    Ok(())
}

fn bench_queue(args: QueueBenchArgs) -> anyhow::Result<()> {
    let queue = Arc::new(IpcQueue::new(args.capacity));
    let producer_queue = queue.clone();
    let n = args.messages;

    let start = Instant::now();
    let producer = std::thread::spawn(move || {
        for i in 0..n {
            let msg = bolson::convert::IpcMessage {
                bytes: vec![0u8; 64],
                seq_range: SeqRange::new(i, i),
                num_rows: 1,
            };
            let mut pending = msg;
            loop {
                match producer_queue.push(pending, Duration::from_millis(100)) {
                    Ok(None) => break,
                    Ok(Some(returned)) => pending = returned,
                    Err(_) => return,
                }
            }
        }
    });

    let mut received = 0u64;
    while received < n {
        if queue.pop(Duration::from_millis(100))?.is_some() {
            received += 1;
        }
    }
    producer.join().ok();
    let elapsed = start.elapsed();

    report(
        args.csv,
        &[
            ("messages", n.to_string()),
            ("elapsed_ms", format!("{:.3}", elapsed.as_secs_f64() * 1000.0)),
            (
                "messages_per_sec",
                format!("{:.0}", n as f64 / elapsed.as_secs_f64().max(1e-9)),
            ),
        ],
    );
    Ok(())
}

fn report(csv: bool, rows: &[(&str, String)]) {
    if csv {
        println!("{}", rows.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(","));
        println!("{}", rows.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>().join(","));
        return;
    }
    let mut table = prettytable::Table::new();
    for (k, v) in rows {
        table.add_row(prettytable::row![k, v]);
    }
    table.printstd();
}
