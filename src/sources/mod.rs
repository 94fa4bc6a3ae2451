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

//! Metric sources for ingesting data from the network
//!
//! Sources receive raw statsd traffic, decode it into [`Event`]s and hand
//! them to the aggregation engine over a channel.

use crate::model::Event;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

pub mod statsd;
pub mod udp;

pub use statsd::{decode, decode_datagram, DecodeError};
pub use udp::UdpSource;

/// Trait for all metric sources
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Receive metrics until `shutdown` flips to `true`, forwarding the
    /// decoded events of each datagram in order.
    async fn run(&self, sender: MetricSender, shutdown: watch::Receiver<bool>) -> Result<()>;

    /// Get the name of this source
    fn name(&self) -> &str;
}

/// Channel for sending decoded events from sources to aggregation
pub type MetricSender = mpsc::UnboundedSender<Vec<Event>>;

/// Channel for receiving decoded events in aggregation
pub type MetricReceiver = mpsc::UnboundedReceiver<Vec<Event>>;
