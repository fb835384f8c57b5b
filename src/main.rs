use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use file_convert_bot::converters::ConverterDispatch;
use file_convert_bot::transport::{InboundEvent, StdioTransport};
use file_convert_bot::{Config, Orchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory where converted documents are delivered
    #[arg(short, long, default_value = "converted")]
    out_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "file_convert_bot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "🚀 Starting File Converter Bot: max size={}MB, timeout={}s, workers={}, token={}",
        config.max_file_size / 1024 / 1024,
        config.convert_timeout.as_secs(),
        config.max_concurrent_conversions,
        if config.transport_token.is_some() {
            "set"
        } else {
            "unset"
        }
    );

    let transport = Arc::new(StdioTransport::new(args.out_dir));
    let orchestrator = Arc::new(Orchestrator::new(
        ConverterDispatch::new(),
        transport,
        config,
    ));

    // Single-threaded cooperative dispatch: events are read in arrival order
    // and handed to the orchestrator as independent tasks, so a long
    // conversion never blocks unrelated sessions.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        match serde_json::from_str::<InboundEvent>(&line) {
                            Ok(event) => {
                                let orchestrator = orchestrator.clone();
                                tokio::spawn(async move {
                                    orchestrator.handle_event(event).await;
                                });
                            }
                            Err(e) => warn!(error = %e, "skipping malformed event"),
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        info!("Event stream closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "failed to read event stream");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
