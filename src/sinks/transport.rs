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

//! Best-effort delivery of payloads to the collector
//!
//! Every payload is written over a fresh TCP connection. An attempt that
//! exceeds the timeout is abandoned (dropping, and thereby closing, its
//! connection) and retried once; any other failure is final.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Total attempts for a payload whose first attempt timed out.
pub const MAX_ATTEMPTS: usize = 2;

/// Default bound on a single delivery attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {attempts} attempts")]
    Timeout { attempts: usize },
    #[error("connection failure: {0}")]
    Connection(#[from] io::Error),
}

/// One delivery attempt over a new connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, payload: &[u8]) -> io::Result<()>;

    /// Human-readable destination, for logs.
    fn destination(&self) -> String;
}

/// Connect, write, close
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    port: u16,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn deliver(&self, payload: &[u8]) -> io::Result<()> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.write_all(payload).await?;
        stream.shutdown().await
    }

    fn destination(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Applies the timeout and retry policy on top of a [`Transport`]
#[derive(Debug, Clone)]
pub struct DeliveryClient<T> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Deliver `payload`, retrying once if the first attempt times out.
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        for attempt in 1..=MAX_ATTEMPTS {
            match timeout(self.timeout, self.transport.deliver(payload)).await {
                Ok(Ok(())) => {
                    debug!(
                        "Sent {} bytes to {} on attempt {}",
                        payload.len(),
                        self.transport.destination(),
                        attempt
                    );
                    return Ok(());
                }
                Ok(Err(err)) => return Err(TransportError::Connection(err)),
                Err(_) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        "Timed out sending to {} after {:?}, retrying",
                        self.transport.destination(),
                        self.timeout
                    );
                }
                Err(_) => {}
            }
        }
        Err(TransportError::Timeout {
            attempts: MAX_ATTEMPTS,
        })
    }
}
