use anyhow::Context;
use chunksync::{download_chunks_with_cancel, CancellationToken, DownloadConfig, EndOfStreamPolicy};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chunksync")]
#[command(about = "Download segmented chunks over HTTP, resuming where the last run stopped", long_about = None)]
#[command(version)]
struct Args {
    /// Destination directory for downloaded segments
    #[arg(short, long)]
    output: PathBuf,

    /// Base URL segments are served under (`<url>/<chunk>_<segment>`)
    #[arg(short, long)]
    url: String,

    /// Highest chunk identifier to download, inclusive
    #[arg(short, long)]
    last_chunk: u64,

    /// Re-download every chunk from this one up to --last-chunk, even if present
    #[arg(short, long)]
    reset_from: Option<u64>,

    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Log a progress report every N completed chunks
    #[arg(long, default_value_t = 100)]
    report_every: u64,

    /// Timeout for a single segment request (e.g. "60s", "2m")
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Connect timeout for a single segment request
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    connect_timeout: Duration,

    /// Give up on a chunk once it has this many segments
    #[arg(long, default_value_t = 100_000)]
    max_segments: u64,

    /// Keep other workers running after a chunk with no segments is found
    #[arg(long)]
    keep_going: bool,

    /// Write a JSON run summary to this file
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("chunksync={}", log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    info!("Output directory: {:?}", args.output);
    info!("Source: {}", args.url);

    let config = DownloadConfig {
        base_url: args.url,
        output_dir: args.output,
        last_chunk: args.last_chunk,
        reset_from: args.reset_from,
        workers: args.workers,
        report_every: args.report_every,
        request_timeout: args.timeout,
        connect_timeout: args.connect_timeout,
        max_segments_per_chunk: args.max_segments,
        end_of_stream: if args.keep_going {
            EndOfStreamPolicy::StopWorker
        } else {
            EndOfStreamPolicy::StopAll
        },
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing chunks in flight");
            on_signal.cancel();
        }
    });

    let summary = download_chunks_with_cancel(&config, cancel)
        .await
        .context("download failed")?;

    if let Some(path) = &args.summary {
        summary
            .save(path)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
        info!("Wrote run summary to {}", path.display());
    }

    if !summary.failed.is_empty() {
        anyhow::bail!(
            "{} chunks failed; re-run to retry them",
            summary.failed.len()
        );
    }
    Ok(())
}
