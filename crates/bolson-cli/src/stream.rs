//! The `stream` subcommand: runs Ingest, convert, and publish until killed.

use crate::schema::load_schema;
use bolson::parse::arrow_backend::{ArrowParser, ArrowParserOptions};
use bolson::parse::fpga::context::FpgaContext;
use bolson::parse::SharedParser;
use bolson::Pipeline;
use bolson_types::{ParserKind, PipelineOptions};
use clap::Args;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Clone)]
pub struct StreamArgs {
    /// Address to listen for incoming JSON on, e.g. "0.0.0.0:5000".
    #[clap(long, default_value = "0.0.0.0:5000")]
    pub host: String,

    /// Which parser backend converts JSON into Arrow record batches.
    #[clap(long, value_enum, default_value = "arrow")]
    pub parser: ParserArg,

    /// Path to the JSON schema description file, required for `--parser arrow`.
    #[clap(long)]
    pub schema: Option<PathBuf>,

    /// Number of converter threads.
    #[clap(long, default_value = "1")]
    pub threads: usize,

    /// Number of staging buffers shared between Ingest and the converters.
    #[clap(long, default_value = "16")]
    pub buffers: usize,

    /// Capacity, in bytes, of each staging buffer.
    #[clap(long, default_value_t = bolson_types::config::default_buffer_capacity())]
    pub buffer_capacity: usize,

    /// Maximum rows per serialized IPC message.
    #[clap(long, default_value = "1000000")]
    pub max_rows: usize,

    /// Maximum serialized size, in bytes, of an IPC message.
    #[clap(long, default_value_t = bolson_types::config::default_max_ipc_size())]
    pub max_ipc_size: usize,

    /// Number of FPGA kernel instances (FPGA backends only).
    #[clap(long, default_value_t = bolson_types::config::default_fpga_parsers())]
    pub fpga_parsers: usize,

    /// Pulsar broker URL.
    #[clap(long, default_value = "pulsar://localhost:6650")]
    pub pulsar_url: String,

    /// Pulsar topic to publish to.
    #[clap(long, default_value = "bolson")]
    pub topic: String,

    /// Number of concurrent Pulsar producer threads.
    #[clap(long, default_value = "1")]
    pub producers: usize,

    /// Enable Pulsar producer-side batching.
    #[clap(long)]
    pub batching: bool,

    /// Append a `bolson_seq` sequence-number column to each output batch
    /// (Arrow backend only; FPGA backends never add it).
    #[clap(long)]
    pub seq_column: bool,

    /// Write per-record latency samples to this CSV file on shutdown.
    #[clap(long)]
    pub latency_file: Option<PathBuf>,

    /// Sample every Nth sequence number for latency tracking (0 disables
    /// tracking).
    #[clap(long, default_value = "0")]
    pub latency_interval: usize,

    /// Maximum number of sequence numbers tracked for latency.
    #[clap(long, default_value = "0")]
    pub latency_samples: usize,

    /// Print only a single summary line on shutdown instead of a table.
    #[clap(long)]
    pub succinct: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum ParserArg {
    Arrow,
    FpgaBattery,
    FpgaTrip,
}

impl From<ParserArg> for ParserKind {
    fn from(p: ParserArg) -> Self {
        match p {
            ParserArg::Arrow => ParserKind::Arrow,
            ParserArg::FpgaBattery => ParserKind::FpgaBattery,
            ParserArg::FpgaTrip => ParserKind::FpgaTrip,
        }
    }
}

pub fn run(args: StreamArgs) -> anyhow::Result<()> {
    let mut opts = PipelineOptions {
        parser: args.parser.into(),
        ..Default::default()
    };
    opts.buffer.num_buffers = args.buffers;
    opts.buffer.buffer_capacity = args.buffer_capacity;
    opts.convert.num_threads = args.threads;
    opts.convert.max_rows = args.max_rows;
    opts.convert.max_ipc_size = args.max_ipc_size;
    opts.publish.url = args.pulsar_url.clone();
    opts.publish.topic = args.topic.clone();
    opts.publish.num_producers = args.producers;
    opts.publish.batching.enable = args.batching;
    opts.latency.interval = args.latency_interval.max(1);
    opts.latency.max_samples = args.latency_samples;
    opts.fpga.num_parsers = args.fpga_parsers;

    let (parser, _fpga_context): (SharedParser, Option<FpgaContext>) = match opts.parser {
        ParserKind::Arrow => {
            let schema_path = args
                .schema
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--schema is required for the arrow parser"))?;
            let schema = load_schema(&schema_path)?;
            let parser = Arc::new(ArrowParser::new(ArrowParserOptions {
                input_schema: schema,
                seq_column: args.seq_column,
                batch_size: args.max_rows,
            }));
            (parser, None)
        }
        ParserKind::FpgaBattery | ParserKind::FpgaTrip => {
            anyhow::bail!(
                "FPGA backends require a platform-specific MmioTarget, which this CLI does not \
                 provision on its own; embed bolson as a library and call FpgaContext::enable \
                 with your platform's MmioTarget instead"
            );
        }
    };

    let listener = TcpListener::bind(&args.host)?;
    log::info!("listening on {}", args.host);
    let pipeline = Pipeline::start(listener, parser, opts)?;
    let latency = pipeline.latency.clone();
    let convert_stats = pipeline.convert_stats.clone();
    let publish_stats = pipeline.publish_stats.clone();

    // No signal-based graceful shutdown is wired up here (see DESIGN.md):
    // the process runs until Ingest observes a disconnect (which sets the
    // shared shutdown flag itself, see `pipeline::ingest`) or a worker hits
    // an unrecoverable error. Either way `join` returns once every worker
    // has wound down, at which point the latency samples collected so far
    // are final and safe to flush.
    let result = pipeline.join();

    if let Some(path) = &args.latency_file {
        let mut file = std::fs::File::create(path)
            .map_err(|e| anyhow::anyhow!("failed to create latency file {path:?}: {e}"))?;
        latency
            .write_csv(&mut file)
            .map_err(|e| anyhow::anyhow!("failed to write latency file {path:?}: {e}"))?;
    }

    print_summary(args.succinct, &convert_stats, &publish_stats);

    result.map_err(|e| anyhow::anyhow!(e.to_string()))
}

/// Prints end-of-run convert/publish totals: a human-readable table by
/// default, or two CSV lines (header, values) with `--succinct`.
fn print_summary(succinct: bool, convert_stats: &bolson::convert::ConvertStats, publish_stats: &bolson::publish::PublishStats) {
    let rows: Vec<(&str, String)> = vec![
        ("rows_converted", convert_stats.rows_converted().to_string()),
        ("batches_converted", convert_stats.batches_converted().to_string()),
        ("messages_serialized", convert_stats.messages_serialized().to_string()),
        ("bytes_serialized", convert_stats.bytes_serialized().to_string()),
        ("parse_errors", convert_stats.parse_errors().to_string()),
        ("messages_published", publish_stats.messages_published().to_string()),
        ("rows_published", publish_stats.rows_published().to_string()),
        ("bytes_published", publish_stats.bytes_published().to_string()),
        ("publish_errors", publish_stats.publish_errors().to_string()),
        ("publish_time_ms", format!("{:.3}", publish_stats.publish_time().as_secs_f64() * 1000.0)),
    ];

    if succinct {
        println!("{}", rows.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(","));
        println!("{}", rows.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>().join(","));
        return;
    }
    let mut table = prettytable::Table::new();
    for (k, v) in &rows {
        table.add_row(prettytable::row![k, v]);
    }
    table.printstd();
}
