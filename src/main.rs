use anyhow::Context as _;
use clog::{Clog, Config};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args_and_env(std::env::args_os())?;
    let clog = Clog::init(config)
        .await
        .context("failed to initialize logging")?;

    // Internal diagnostics go to stderr; everything else through the logger.
    let diagnostics = EnvFilter::try_from_env("CLOG_DIAGNOSTICS")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(clog.layer())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(diagnostics),
        )
        .init();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => {
                if let Err(e) = clog.ingest(fields) {
                    eprintln!("failed to submit line: {e}");
                }
            }
            Ok(other) => clog.logger().info(other),
            Err(e) => eprintln!("skipping malformed line: {e}"),
        }
    }

    clog.shutdown().await;
    Ok(())
}
