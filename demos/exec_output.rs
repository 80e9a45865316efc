//! Reads JSON metrics from stdin, one per line, and writes them in batches
//! through an exec output.
//!
//! ```text
//! echo '{"name":"cpu","tags":{"host":"a"},"fields":{"value":1}}' \
//!     | cargo run --example exec_output -- --config exec.toml
//! ```
use clap::Parser;
use log::{error, info, warn};
use macready_exec::prelude::*;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about = "Pipe metric batches into an external command")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, conflicts_with = "command")]
    config: Option<PathBuf>,

    /// Command to run for each batch, instead of a configuration file
    #[arg(long)]
    command: Option<String>,

    /// Timeout for each command, e.g. "5s"
    #[arg(long, requires = "command")]
    timeout: Option<String>,

    /// Number of metrics per batch
    #[arg(short, long, default_value = "100")]
    batch_size: usize,
}

impl Args {
    fn exec_config(&self) -> anyhow::Result<ExecConfig> {
        match (&self.config, &self.command) {
            (Some(path), _) => Ok(ExecConfig::load(path)?),
            (None, Some(command)) => Ok(ExecConfig {
                command: command.clone(),
                timeout: self.timeout.clone(),
                data_format: DataFormat::default(),
                log_level: LogLevel::default(),
            }),
            (None, None) => Err(anyhow::anyhow!("either --config or --command is required")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = args.exec_config()?;
    macready_exec::util::logging::init(config.log_level);

    let sink = ExecSink::<Metric>::from_config(&config)?;
    sink.connect().await?;
    info!(
        "Writing batches of up to {} metrics to {:?}",
        args.batch_size,
        sink.spec().command_line()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch = Vec::with_capacity(args.batch_size);
    let mut failed = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Metric>(&line) {
            Ok(metric) => batch.push(metric),
            Err(e) => {
                warn!("Skipping malformed metric: {}", e);
                continue;
            }
        }

        if batch.len() >= args.batch_size {
            failed += flush(&sink, &mut batch).await;
        }
    }
    failed += flush(&sink, &mut batch).await;

    sink.close().await?;

    if failed > 0 {
        return Err(anyhow::anyhow!("{} batch(es) failed", failed));
    }

    info!("Done");
    Ok(())
}

/// Write and clear the pending batch, returning 1 if the write failed
async fn flush(sink: &ExecSink<Metric>, batch: &mut Vec<Metric>) -> usize {
    let result = sink.write(batch.as_slice()).await;
    let count = batch.len();
    batch.clear();

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("Failed to write {} metrics: {}", count, e);
            1
        }
    }
}
