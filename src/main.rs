use clap::Parser;
use log::{error, info};

use kube_downscaler::cli::Config;
use kube_downscaler::driver::Driver;
use kube_downscaler::shutdown::Shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logger with custom timestamp format
    env_logger::Builder::from_default_env()
        .filter_level(if config.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format(|buf, record| {
            use std::io::Write;
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(buf, "[{}] [{}] [{}:{}] {}",
                timestamp,
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();

    if config.dry_run {
        info!("**DRY-RUN**: no changes will be applied to the cluster");
    }

    let client = kube::Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to build Kubernetes client: {e}"))?;

    let interval = std::time::Duration::from_secs(config.interval);
    let once = config.once;
    let driver = Driver::new(client, config)?;
    let shutdown = Shutdown::install();

    loop {
        if let Err(e) = driver.run_once().await {
            error!("reconcile pass failed: {e}");
        }

        if once || shutdown.requested() {
            break;
        }

        shutdown.safe_sleep(interval).await;
        if shutdown.requested() {
            break;
        }
    }

    info!("exiting");
    Ok(())
}
