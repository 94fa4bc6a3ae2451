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

//! Metric sinks for outputting aggregated data
//!
//! Sinks receive the datapoints of each flush and forward them to an external
//! time-series store.

use crate::model::FlushBatch;
use anyhow::Result;
use async_trait::async_trait;

pub mod graphite;
pub mod transport;

pub use graphite::{GraphiteSink, Protocol, SerializeError};
pub use transport::{DeliveryClient, TcpTransport, Transport, TransportError};

/// Trait for all metric sinks
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Send one flush worth of datapoints to this sink.
    ///
    /// Delivery is best-effort; an `Err` means the batch could not even be
    /// prepared for sending.
    async fn send(&self, batch: &FlushBatch) -> Result<()>;

    /// Get the name of this sink
    fn name(&self) -> &str;
}
