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

//! Statistics computed from a store snapshot
//!
//! Turns the raw per-interval buckets into the datapoints that are shipped to
//! Graphite: rate and count for counters, order statistics for timers, and
//! the latest value for gauges.

use super::store::Snapshot;
use crate::model::{Datapoint, FlushBatch, MetricKey};
use std::time::Duration;

/// Metric path scheme for emitted datapoints
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    /// Fixed `stats.<key>`, `stats_counts.<key>`, `stats.timers.<key>.<stat>`
    /// and `stats.gauges.<key>` paths; the prefixes below are ignored
    pub legacy: bool,
    pub global_prefix: String,
    pub prefix_counter: String,
    pub prefix_timer: String,
    pub prefix_gauge: String,
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            legacy: true,
            global_prefix: "stats".to_string(),
            prefix_counter: "counters".to_string(),
            prefix_timer: "timers".to_string(),
            prefix_gauge: "gauges".to_string(),
        }
    }
}

impl Namespace {
    fn join(&self, segments: &[&str]) -> String {
        std::iter::once(self.global_prefix.as_str())
            .chain(segments.iter().copied())
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Path of the per-second rate of a counter.
    pub fn counter_rate(&self, key: &MetricKey) -> String {
        if self.legacy {
            format!("stats.{key}")
        } else {
            self.join(&[&self.prefix_counter, key.as_str(), "rate"])
        }
    }

    /// Path of the raw interval total of a counter.
    pub fn counter_count(&self, key: &MetricKey) -> String {
        if self.legacy {
            format!("stats_counts.{key}")
        } else {
            self.join(&[&self.prefix_counter, key.as_str(), "count"])
        }
    }

    pub fn timer(&self, key: &MetricKey, stat: &str) -> String {
        if self.legacy {
            format!("stats.timers.{key}.{stat}")
        } else {
            self.join(&[&self.prefix_timer, key.as_str(), stat])
        }
    }

    pub fn gauge(&self, key: &MetricKey) -> String {
        if self.legacy {
            format!("stats.gauges.{key}")
        } else {
            self.join(&[&self.prefix_gauge, key.as_str()])
        }
    }
}

/// Order statistics for one interval of timer samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerStats {
    pub count: usize,
    pub lower: f64,
    pub upper: f64,
    pub sum: f64,
    pub mean: f64,
    /// Sample at the configured percentile threshold
    pub upper_threshold: f64,
}

impl TimerStats {
    /// Summarize a sample set; `None` when there are no samples.
    pub fn compute(mut samples: Vec<f64>, percent_threshold: u32) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(f64::total_cmp);

        let count = samples.len();
        let lower = samples[0];
        let upper = samples[count - 1];
        let sum: f64 = samples.iter().sum();

        if count == 1 {
            return Some(Self {
                count,
                lower,
                upper,
                sum,
                mean: lower,
                upper_threshold: upper,
            });
        }

        let rank = (f64::from(percent_threshold) / 100.0 * count as f64).floor() as i64 - 1;
        let index = rank.clamp(0, count as i64 - 1) as usize;

        Some(Self {
            count,
            lower,
            upper,
            sum,
            mean: sum / count as f64,
            upper_threshold: samples[index],
        })
    }
}

/// Converts snapshots into flush batches
#[derive(Debug, Clone)]
pub struct Summarizer {
    namespace: Namespace,
    percent_threshold: u32,
    flush_interval: Duration,
}

impl Summarizer {
    pub fn new(namespace: Namespace, percent_threshold: u32, flush_interval: Duration) -> Self {
        Self {
            namespace,
            percent_threshold,
            flush_interval,
        }
    }

    /// Build the datapoints for one flush, all stamped with `timestamp`.
    pub fn summarize(&self, snapshot: Snapshot, timestamp: i64) -> FlushBatch {
        let mut batch = FlushBatch::new();
        let interval = self.flush_interval.as_secs_f64();

        for (key, total) in &snapshot.counters {
            batch.push(Datapoint::new(
                self.namespace.counter_rate(key),
                timestamp,
                total / interval,
            ));
            batch.push(Datapoint::new(
                self.namespace.counter_count(key),
                timestamp,
                *total,
            ));
        }

        let upper_name = format!("upper_{}", self.percent_threshold);
        for (key, samples) in snapshot.timers {
            let Some(stats) = TimerStats::compute(samples, self.percent_threshold) else {
                continue;
            };
            let points = [
                ("mean", stats.mean),
                ("upper", stats.upper),
                (upper_name.as_str(), stats.upper_threshold),
                ("lower", stats.lower),
                ("count", stats.count as f64),
                ("total", stats.sum),
            ];
            for (stat, value) in points {
                batch.push(Datapoint::new(
                    self.namespace.timer(&key, stat),
                    timestamp,
                    value,
                ));
            }
        }

        for (key, value) in &snapshot.gauges {
            batch.push(Datapoint::new(self.namespace.gauge(key), timestamp, *value));
        }

        batch
    }
}
