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

//! # statsd-rs
//!
//! A statsd-compatible metrics aggregation daemon. Counters, timers and
//! gauges arrive as UDP datagrams, are aggregated in memory, and every flush
//! interval the computed summaries are shipped to Graphite over TCP.
//!
//! ## Pipeline
//!
//! - **Sources** ([`sources`]): the UDP listener splits datagrams into lines
//!   and decodes each line into an [`model::Event`]
//! - **Aggregation** ([`aggregation`]): a single task owns the store, applies
//!   events in arrival order and periodically snapshots, resets and
//!   summarizes it
//! - **Sinks** ([`sinks`]): datapoints are serialized as plaintext lines or
//!   pickle batches and delivered best-effort with a bounded timeout
//!
//! ## Example
//!
//! ```rust,no_run
//! use statsd_rs::{Statsd, config::StatsdConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut statsd = Statsd::new(StatsdConfig::default());
//!     statsd.start().await?;
//!     statsd.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod aggregation;
pub mod config;
pub mod model;
pub mod sinks;
pub mod sources;

use aggregation::{AggregationEngine, Summarizer};
use config::StatsdConfig;
use sinks::{DeliveryClient, GraphiteSink, TcpTransport};
use sources::{MetricsSource, UdpSource};

/// Main daemon instance
pub struct Statsd {
    config: StatsdConfig,
    shutdown_notify: Arc<Notify>,
    stop: watch::Sender<bool>,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Statsd {
    /// Create a new daemon instance with the given configuration
    pub fn new(config: StatsdConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            shutdown_notify: Arc::new(Notify::new()),
            stop,
            local_addr: None,
            tasks: Vec::new(),
        }
    }

    /// Address the statsd listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and spawn the ingest and flush tasks
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting statsd services");
        self.config.validate()?;

        let source = UdpSource::bind(self.config.listen_address()).await?;
        self.local_addr = Some(source.local_addr()?);

        let transport = TcpTransport::new(
            self.config.graphite_host.clone(),
            self.config.graphite_port_for_protocol(),
        );
        let sink = GraphiteSink::new(
            self.config.protocol(),
            DeliveryClient::new(transport, self.config.graphite_timeout()),
        );
        let summarizer = Summarizer::new(
            self.config.namespace(),
            self.config.percent_threshold,
            self.config.flush_period(),
        );
        let engine = AggregationEngine::new(summarizer, sink, self.config.flush_period());
        info!(
            "Reporting to graphite at {} using {:?}",
            self.config.graphite_address(),
            self.config.protocol()
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        self.tasks
            .push(tokio::spawn(engine.run(receiver, self.stop.subscribe())));

        self.tasks.push(spawn_source(
            source,
            sender,
            self.stop.subscribe(),
            Arc::clone(&self.shutdown_notify),
        ));

        self.setup_signal_handlers();

        info!("All services started successfully");
        Ok(())
    }

    /// Request shutdown without waiting for a signal
    pub fn shutdown(&self) {
        self.shutdown_notify.notify_one();
    }

    /// Wait for a shutdown signal, then stop the source and let the engine
    /// perform its final flush
    pub async fn wait_for_shutdown(self) -> Result<()> {
        self.shutdown_notify.notified().await;
        info!("Shutdown signal received, stopping services...");

        if self.stop.send(true).is_err() {
            debug!("All tasks already stopped");
        }
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!("Task ended abnormally: {}", err);
            }
        }
        Ok(())
    }

    fn setup_signal_handlers(&self) {
        let shutdown_notify = Arc::clone(&self.shutdown_notify);

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown_notify.notify_one();
                }
                Err(err) => {
                    warn!("Failed to listen for SIGINT: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let shutdown_notify = Arc::clone(&self.shutdown_notify);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(err) => {
                            warn!("Failed to register SIGTERM handler: {}", err);
                            return;
                        }
                    };

                sigterm.recv().await;
                info!("Received SIGTERM, initiating shutdown");
                shutdown_notify.notify_one();
            });
        }
    }
}

/// Run a source to completion. A failed source brings the whole daemon down.
fn spawn_source<S>(
    source: S,
    sender: sources::MetricSender,
    stop: watch::Receiver<bool>,
    shutdown_notify: Arc<Notify>,
) -> JoinHandle<()>
where
    S: MetricsSource + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = source.run(sender, stop).await {
            error!("{} source failed, shutting down: {:#}", source.name(), err);
            shutdown_notify.notify_one();
        }
    })
}
