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

//! Configuration parsing
//!
//! Options are read from a flat JSON object whose keys match the classic
//! statsd option names (`graphite_host`, `flush_interval`, ...). Values copied
//! from INI-style configs work too: booleans may be spelled `"yes"`/`"on"`
//! and numbers may be quoted.

use crate::aggregation::Namespace;
use crate::sinks::Protocol;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest accepted flush interval, in seconds (one day).
pub const MAX_FLUSH_INTERVAL: u64 = 86_400;

/// Longest accepted per-attempt send timeout, in seconds.
pub const MAX_GRAPHITE_TIMEOUT: f64 = 3_600.0;

/// Main daemon configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsdConfig {
    /// Collector host
    pub graphite_host: String,

    /// Collector plaintext port
    #[serde(deserialize_with = "lenient::number")]
    pub graphite_port: u16,

    /// Collector pickle port
    #[serde(deserialize_with = "lenient::number")]
    pub graphite_pickle_port: u16,

    /// Per-attempt send timeout in seconds
    #[serde(deserialize_with = "lenient::number")]
    pub graphite_timeout: f64,

    /// Send length-prefixed pickle batches instead of plaintext lines
    #[serde(deserialize_with = "lenient::boolean")]
    pub pickle_protocol: bool,

    /// Maximum datapoints per pickle batch
    #[serde(deserialize_with = "lenient::number")]
    pub pickle_batch_size: usize,

    /// Statsd listener bind address
    pub listen_addr: String,

    /// Statsd listener port
    #[serde(deserialize_with = "lenient::number")]
    pub listen_port: u16,

    /// Verbose logging
    #[serde(deserialize_with = "lenient::boolean")]
    pub debug: bool,

    /// Seconds between flushes
    #[serde(deserialize_with = "lenient::number")]
    pub flush_interval: u64,

    /// Percentile reported as `upper_<n>` for timers
    #[serde(deserialize_with = "lenient::number")]
    pub percent_threshold: u32,

    /// Use the `stats.<key>` / `stats_counts.<key>` counter names
    #[serde(deserialize_with = "lenient::boolean")]
    pub legacy_namespace: bool,

    pub global_prefix: String,
    pub prefix_counter: String,
    pub prefix_gauge: String,
    pub prefix_timer: String,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            graphite_host: "127.0.0.1".to_string(),
            graphite_port: 2003,
            graphite_pickle_port: 2004,
            graphite_timeout: 5.0,
            pickle_protocol: false,
            pickle_batch_size: 300,
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 8125,
            debug: false,
            flush_interval: 10,
            percent_threshold: 90,
            legacy_namespace: true,
            global_prefix: "stats".to_string(),
            prefix_counter: "counters".to_string(),
            prefix_gauge: "gauges".to_string(),
            prefix_timer: "timers".to_string(),
        }
    }
}

impl StatsdConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FLUSH_INTERVAL).contains(&self.flush_interval) {
            bail!(
                "flush_interval must be between 1 and {} seconds, got {}",
                MAX_FLUSH_INTERVAL,
                self.flush_interval
            );
        }
        if self.pickle_batch_size == 0 {
            bail!("pickle_batch_size must be at least 1");
        }
        if !(1..=100).contains(&self.percent_threshold) {
            bail!(
                "percent_threshold must be between 1 and 100, got {}",
                self.percent_threshold
            );
        }
        if !(self.graphite_timeout > 0.0 && self.graphite_timeout <= MAX_GRAPHITE_TIMEOUT) {
            bail!(
                "graphite_timeout must be greater than 0 and at most {} seconds, got {}",
                MAX_GRAPHITE_TIMEOUT,
                self.graphite_timeout
            );
        }
        Ok(())
    }

    /// `host:port` the statsd listener binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    /// Collector port for the configured protocol
    pub fn graphite_port_for_protocol(&self) -> u16 {
        if self.pickle_protocol {
            self.graphite_pickle_port
        } else {
            self.graphite_port
        }
    }

    /// `host:port` of the collector for the configured protocol
    pub fn graphite_address(&self) -> String {
        format!("{}:{}", self.graphite_host, self.graphite_port_for_protocol())
    }

    pub fn protocol(&self) -> Protocol {
        if self.pickle_protocol {
            Protocol::Pickle {
                batch_size: self.pickle_batch_size,
            }
        } else {
            Protocol::Plaintext
        }
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }

    pub fn graphite_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.graphite_timeout)
    }

    pub fn namespace(&self) -> Namespace {
        Namespace {
            legacy: self.legacy_namespace,
            global_prefix: self.global_prefix.clone(),
            prefix_counter: self.prefix_counter.clone(),
            prefix_timer: self.prefix_timer.clone(),
            prefix_gauge: self.prefix_gauge.clone(),
        }
    }
}

// Accept the loosely typed values INI-style configs produce
mod lenient {
    use serde::de::{self, Deserializer};
    use serde::Deserialize;
    use std::fmt::Display;
    use std::str::FromStr;

    const TRUE_VALUES: [&str; 6] = ["true", "1", "yes", "on", "t", "y"];

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Int(i64),
        String(String),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString<T> {
        Number(T),
        String(String),
    }

    pub fn boolean<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match BoolOrString::deserialize(deserializer)? {
            BoolOrString::Bool(value) => value,
            BoolOrString::Int(value) => value == 1,
            BoolOrString::String(value) => {
                let value = value.trim().to_ascii_lowercase();
                TRUE_VALUES.contains(&value.as_str())
            }
        })
    }

    pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        match NumberOrString::<T>::deserialize(deserializer)? {
            NumberOrString::Number(value) => Ok(value),
            NumberOrString::String(value) => value
                .trim()
                .parse()
                .map_err(|err| de::Error::custom(format!("invalid number {value:?}: {err}"))),
        }
    }
}
