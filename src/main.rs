use clap::Parser;
use log::{error, info, warn};

use ishare_tracker::app::Tracker;
use ishare_tracker::cli::Args;
use ishare_tracker::config::TrackerConfig;
use ishare_tracker::signals;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match TrackerConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Bad configuration: {}", err);
            std::process::exit(1);
        }
    };
    args.apply(&mut config);

    env_logger::Builder::new()
        .parse_filters(config.log_level())
        .init();

    if !args.no_i2pd {
        start_local_router();
    }

    let tracker = match Tracker::start(config).await {
        Ok(tracker) => tracker,
        Err(err) => {
            error!("Tracker start failed: {}", err);
            std::process::exit(1);
        }
    };

    signals::global_shutdown_signal().await;
    info!("Shutting down tracker...");
    tracker.stop().await;
}

/// Best-effort launch of a local i2pd with SAM enabled. Failure is fine:
/// an external router may already be serving the bridge.
fn start_local_router() {
    match std::process::Command::new("i2pd")
        .args(["--daemon", "--sam.enabled=true"])
        .spawn()
    {
        Ok(_) => info!("Started local i2pd router"),
        Err(err) => warn!("Could not start i2pd ({}); assuming an external router", err),
    }
}
