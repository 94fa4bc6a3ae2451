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

//! Core data model for metrics aggregation
//!
//! Defines the events decoded from the wire, the keys they are aggregated
//! under, and the datapoints emitted on every flush.

mod key;

pub use key::MetricKey;

/// Type of metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// Summed over a flush interval, reported as rate and count
    Counter,
    /// Duration samples, reported as order statistics
    Timer,
    /// Point-in-time value
    Gauge,
}

impl MetricType {
    /// Resolve the statsd type tag (`c`, `ms`, `g`).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "c" => Some(Self::Counter),
            "ms" => Some(Self::Timer),
            "g" => Some(Self::Gauge),
            _ => None,
        }
    }
}

/// The typed payload of a decoded event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// A counter increment, `value` is the raw observed amount.
    Counter { value: f64, sample_rate: f64 },
    /// A single duration sample.
    Timer(f64),
    /// A gauge reading.
    Gauge(f64),
}

/// A single decoded metric event, consumed as soon as it is aggregated
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub key: MetricKey,
    pub value: MetricValue,
}

/// One emitted `(name, timestamp, value)` triple
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    /// Fully qualified metric path
    pub name: String,

    /// Unix timestamp in seconds
    pub timestamp: i64,

    pub value: f64,
}

impl Datapoint {
    pub fn new(name: impl Into<String>, timestamp: i64, value: f64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            value,
        }
    }
}

/// All datapoints produced by one flush cycle, in emission order.
pub type FlushBatch = Vec<Datapoint>;
