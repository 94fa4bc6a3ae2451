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

//! In-memory accumulator partitioned by metric type

use crate::model::{Event, MetricKey, MetricValue};
use ahash::{HashMap, HashMapExt};
use std::mem;
use tracing::info;

/// Mutable per-interval state for counters, timers and gauges.
///
/// All methods are synchronous; the owning task applies events and takes
/// snapshots without yielding in between.
#[derive(Debug, Default)]
pub struct AggregationStore {
    counters: HashMap<MetricKey, f64>,
    timers: HashMap<MetricKey, Vec<f64>>,
    gauges: HashMap<MetricKey, f64>,
    seen: u64,
}

/// The contents of the store at the start of a flush, sorted by key
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    pub counters: Vec<(MetricKey, f64)>,
    /// Only keys with at least one sample
    pub timers: Vec<(MetricKey, Vec<f64>)>,
    pub gauges: Vec<(MetricKey, f64)>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.timers.is_empty() && self.gauges.is_empty()
    }
}

impl AggregationStore {
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
            timers: HashMap::new(),
            gauges: HashMap::new(),
            seen: 0,
        }
    }

    /// Apply one decoded event to its bucket.
    pub fn apply(&mut self, event: Event) {
        let Event { key, value } = event;
        match value {
            MetricValue::Counter { value, sample_rate } => {
                *self.counters.entry(key).or_insert(0.0) += value / sample_rate;
            }
            MetricValue::Timer(sample) => {
                self.timers.entry(key).or_default().push(sample);
            }
            MetricValue::Gauge(value) => {
                self.gauges.insert(key, value);
            }
        }

        if self.seen == u64::MAX {
            info!("hit maximum, reset seen counter");
            self.seen = 0;
        }
        self.seen += 1;
    }

    /// Copy out everything observed since the last flush and reset.
    ///
    /// Counters are zeroed but keep their keys, timer sample lists are
    /// emptied, gauges are removed.
    pub fn snapshot_and_reset(&mut self) -> Snapshot {
        let mut counters: Vec<_> = self
            .counters
            .iter_mut()
            .map(|(key, total)| (key.clone(), mem::take(total)))
            .collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));

        let mut timers: Vec<_> = self
            .timers
            .iter_mut()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(key, samples)| (key.clone(), mem::take(samples)))
            .collect();
        timers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut gauges: Vec<_> = mem::take(&mut self.gauges).into_iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));

        Snapshot {
            counters,
            timers,
            gauges,
        }
    }

    /// Number of events applied since start, for diagnostics.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// True when nothing has ever been recorded.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.timers.is_empty() && self.gauges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::decode;

    fn store_with(lines: &[&str]) -> AggregationStore {
        let mut store = AggregationStore::new();
        for line in lines {
            store.apply(decode(line).unwrap());
        }
        store
    }

    fn key(raw: &str) -> MetricKey {
        MetricKey::normalize(raw)
    }

    #[test]
    fn test_counter_accumulates_with_sample_rate() {
        let mut store = store_with(&["foo:1|c", "foo:10|c|@0.5", "foo:|c"]);
        let snapshot = store.snapshot_and_reset();
        assert_eq!(snapshot.counters, vec![(key("foo"), 22.0)]);
        assert_eq!(store.seen(), 3);
    }

    #[test]
    fn test_timer_appends_samples() {
        let mut store = store_with(&["rt:3|ms", "rt:1|ms", "rt:2|ms"]);
        let snapshot = store.snapshot_and_reset();
        assert_eq!(snapshot.timers, vec![(key("rt"), vec![3.0, 1.0, 2.0])]);
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let mut store = store_with(&["load:1|g", "load:7|g", "load:3|g"]);
        let snapshot = store.snapshot_and_reset();
        assert_eq!(snapshot.gauges, vec![(key("load"), 3.0)]);
    }

    #[test]
    fn test_same_key_in_every_type() {
        let mut store = store_with(&["x:1|c", "x:2|ms", "x:3|g"]);
        let snapshot = store.snapshot_and_reset();
        assert_eq!(snapshot.counters, vec![(key("x"), 1.0)]);
        assert_eq!(snapshot.timers, vec![(key("x"), vec![2.0])]);
        assert_eq!(snapshot.gauges, vec![(key("x"), 3.0)]);
    }

    #[test]
    fn test_reset_semantics() {
        let mut store = store_with(&["hits:5|c", "rt:10|ms", "load:2|g"]);
        store.snapshot_and_reset();

        let second = store.snapshot_and_reset();
        assert_eq!(second.counters, vec![(key("hits"), 0.0)]);
        assert!(second.timers.is_empty());
        assert!(second.gauges.is_empty());
        assert!(!store.is_empty());
    }

    #[test]
    fn test_empty_store_snapshots_nothing() {
        let mut store = AggregationStore::new();
        assert!(store.is_empty());
        assert!(store.snapshot_and_reset().is_empty());
        assert_eq!(store.seen(), 0);
    }

    #[test]
    fn test_events_after_snapshot_belong_to_next_cycle() {
        let mut store = store_with(&["hits:1|c"]);
        let first = store.snapshot_and_reset();
        store.apply(decode("hits:4|c").unwrap());
        let second = store.snapshot_and_reset();
        assert_eq!(first.counters, vec![(key("hits"), 1.0)]);
        assert_eq!(second.counters, vec![(key("hits"), 4.0)]);
    }

    #[test]
    fn test_snapshot_sorted_by_key() {
        let mut store = store_with(&["b:1|c", "c:1|c", "a:1|c"]);
        let snapshot = store.snapshot_and_reset();
        let keys: Vec<_> = snapshot.counters.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn test_seen_counter_wraps() {
        let mut store = AggregationStore::new();
        store.seen = u64::MAX;
        store.apply(decode("hits:1|c").unwrap());
        assert_eq!(store.seen(), 1);
    }
}
