//! fleetmon-hub - runs the monitoring engine over a sample feed
//!
//! Samples arrive as JSON lines on stdin (one MetricSample per line, the
//! collector's output format); status-change and alert events are logged.
//! Analytics run on the scheduler's cadence.

use clap::Parser;
use fleetmon::MetricSample;
use fleetmon::config::{Config, read_config_file};
use fleetmon::engine::MonitorEngine;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON); engine defaults are used when omitted
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetmon", LevelFilter::DEBUG),
        ("hub", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => {
            debug!("no config file given, using defaults");
            Config::default()
        }
    };

    let engine = MonitorEngine::new(config).await?;

    let mut status_rx = engine.on_status_change();
    tokio::spawn(async move {
        while let Ok(event) = status_rx.recv().await {
            info!(
                server_id = %event.server_id,
                "status {} -> {} ({}, confidence {:.0})",
                event.old_status, event.new_status, event.reason, event.confidence
            );
        }
    });

    let mut alert_rx = engine.on_alert_event();
    tokio::spawn(async move {
        while let Ok(event) = alert_rx.recv().await {
            info!(
                server_id = %event.instance.server_id,
                condition = %event.instance.condition_id,
                "alert {:?}: {}",
                event.kind, event.reason
            );
        }
    });

    info!("reading samples from stdin (one JSON object per line)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<MetricSample>(&line) {
                            Ok(sample) => {
                                if let Err(e) = engine.push_sample(sample).await {
                                    warn!("sample rejected: {e}");
                                }
                            }
                            Err(e) => error!("unparseable sample line: {e}"),
                        }
                    }
                    Ok(None) => {
                        debug!("sample feed closed");
                        break;
                    }
                    Err(e) => {
                        error!("error reading stdin: {e}");
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    engine.shutdown().await?;
    info!("engine stopped");
    Ok(())
}
