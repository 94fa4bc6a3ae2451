/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use anyhow::Result;
use clap::Parser;
use statsd_rs::config::StatsdConfig;
use statsd_rs::Statsd;
use std::path::PathBuf;
use tracing::{info, warn, Level};

/// Statsd-compatible metrics aggregation daemon
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the JSON config file
    #[arg(long, short, default_value = "./statsd.json")]
    conf: PathBuf,

    /// Enable debug logging regardless of the config file
    #[arg(long, short)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // A missing config falls back to defaults; a broken one is fatal
    let (mut config, missing) = if args.conf.is_file() {
        (StatsdConfig::from_file(&args.conf)?, false)
    } else {
        (StatsdConfig::default(), true)
    };
    config.debug |= args.debug;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(if config.debug { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    if missing {
        warn!(
            "Couldn't find config at {}, using defaults",
            args.conf.display()
        );
    } else {
        info!("Loaded config from {}", args.conf.display());
    }

    let mut statsd = Statsd::new(config);
    statsd.start().await?;
    info!("statsd started successfully");

    // Wait for shutdown signal
    statsd.wait_for_shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
