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

//! Datagram listener for statsd traffic

use super::{decode_datagram, MetricSender, MetricsSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Largest datagram read per receive call.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Statsd source listening on a UDP socket
pub struct UdpSource {
    socket: UdpSocket,
}

impl UdpSource {
    /// Bind the listening socket.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .context("Failed to bind statsd listener")?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl MetricsSource for UdpSource {
    async fn run(&self, sender: MetricSender, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        info!("Listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(err) => {
                            // ICMP errors from earlier sends surface here; keep listening
                            warn!("Failed to receive datagram: {}", err);
                            continue;
                        }
                    };
                    if len == 0 {
                        continue;
                    }
                    let events = decode_datagram(&buf[..len]);
                    debug!("Decoded {} events from {}", events.len(), peer);
                    if events.is_empty() {
                        continue;
                    }
                    if sender.send(events).is_err() {
                        debug!("Aggregation engine stopped, closing {}", self.name());
                        return Ok(());
                    }
                }
                _ = shutdown.changed() => {
                    info!("Stopping {}", self.name());
                    return Ok(());
                }
            }
        }
    }

    fn name(&self) -> &str {
        "udp"
    }
}
