use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

mod bench;
mod schema;
mod stream;

/// Command-line interface for the JSON-to-Arrow-to-Pulsar conversion
/// pipeline.
#[derive(Parser)]
#[clap(version = "1.0", author = "Feldera Inc.")]
struct Opts {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Runs Ingest, convert, and publish until the process is killed.
    Stream(stream::StreamArgs),
    /// Isolated micro-benchmarks for individual pipeline stages.
    Bench {
        #[clap(subcommand)]
        cmd: bench::BenchCommand,
    },
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let multi = MultiProgress::new();
    LogWrapper::new(multi, logger).try_init().unwrap();

    match opts.subcmd {
        SubCommand::Stream(args) => stream::run(args),
        SubCommand::Bench { cmd } => bench::run(cmd),
    }
}
