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

//! Time-based metrics aggregation engine
//!
//! The engine is the single owner of the [`AggregationStore`]. It applies
//! decoded events as they arrive from the sources and, on every tick of the
//! flush interval, snapshots and resets the store, summarizes the snapshot
//! and hands the resulting datapoints to a sink.

use crate::model::{Event, FlushBatch};
use crate::sinks::MetricsSink;
use crate::sources::MetricReceiver;
use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

pub mod store;
pub mod summary;

pub use store::{AggregationStore, Snapshot};
pub use summary::{Namespace, Summarizer, TimerStats};

/// Aggregation engine that processes metrics and periodically flushes them
pub struct AggregationEngine<S> {
    store: AggregationStore,
    summarizer: Summarizer,
    sink: S,
    flush_interval: Duration,
}

impl<S: MetricsSink> AggregationEngine<S> {
    /// Create a new aggregation engine with an empty store
    pub fn new(summarizer: Summarizer, sink: S, flush_interval: Duration) -> Self {
        Self {
            store: AggregationStore::new(),
            summarizer,
            sink,
            flush_interval,
        }
    }

    /// Apply the events of one datagram, in order
    pub fn apply(&mut self, events: Vec<Event>) {
        for event in events {
            self.store.apply(event);
        }
    }

    /// Flush everything aggregated so far, stamped with the current time.
    ///
    /// Returns the number of datapoints handed to the sink.
    pub async fn flush(&mut self) -> Result<usize> {
        self.flush_at(Utc::now().timestamp()).await
    }

    /// Flush with an explicit Unix timestamp
    pub async fn flush_at(&mut self, timestamp: i64) -> Result<usize> {
        debug!("seen {} stats so far", self.store.seen());

        let snapshot = self.store.snapshot_and_reset();
        let batch: FlushBatch = self.summarizer.summarize(snapshot, timestamp);
        if batch.is_empty() {
            debug!("nothing to flush");
            return Ok(0);
        }

        debug!("flushing {} datapoints to {}", batch.len(), self.sink.name());
        self.sink
            .send(&batch)
            .await
            .with_context(|| format!("Failed to send flush to {}", self.sink.name()))?;
        Ok(batch.len())
    }

    /// Run until shutdown is signalled or every source has gone away,
    /// then flush one final time.
    pub async fn run(mut self, mut receiver: MetricReceiver, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Flushing every {:?}", self.flush_interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.flush_cycle().await,
                events = receiver.recv() => match events {
                    Some(events) => self.apply(events),
                    None => {
                        info!("All sources closed");
                        break;
                    }
                },
            }
        }

        while let Ok(events) = receiver.try_recv() {
            self.apply(events);
        }
        self.flush_cycle().await;
        info!("Aggregation engine stopped");
    }

    async fn flush_cycle(&mut self) {
        if let Err(err) = self.flush().await {
            error!("flush cycle failed: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Datapoint;
    use crate::sources::decode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Forwards every batch to a channel; fails the first `failures` sends
    struct ChannelSink {
        batches: mpsc::UnboundedSender<FlushBatch>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl MetricsSink for ChannelSink {
        async fn send(&self, batch: &FlushBatch) -> Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("collector unavailable");
            }
            self.batches.send(batch.clone())?;
            Ok(())
        }

        fn name(&self) -> &str {
            "channel"
        }
    }

    fn engine(
        failures: usize,
    ) -> (
        AggregationEngine<ChannelSink>,
        mpsc::UnboundedReceiver<FlushBatch>,
    ) {
        let (batches, rx) = mpsc::unbounded_channel();
        let sink = ChannelSink {
            batches,
            failures: AtomicUsize::new(failures),
        };
        let interval = Duration::from_secs(10);
        let summarizer = Summarizer::new(Namespace::default(), 90, interval);
        (AggregationEngine::new(summarizer, sink, interval), rx)
    }

    fn events(lines: &[&str]) -> Vec<Event> {
        lines.iter().map(|line| decode(line).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_flush_summarizes_and_resets() {
        let (mut engine, mut rx) = engine(0);
        engine.apply(events(&[
            "foo:1|ms", "foo:2|ms", "foo:3|ms", "foo:4|ms", "foo:5|ms", "hits:10|c|@0.5",
        ]));

        assert_eq!(engine.flush_at(42).await.unwrap(), 8);
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch[0], Datapoint::new("stats.hits", 42, 2.0));
        assert_eq!(batch[1], Datapoint::new("stats_counts.hits", 42, 20.0));
        assert!(batch.contains(&Datapoint::new("stats.timers.foo.upper_90", 42, 4.0)));
        assert!(batch.contains(&Datapoint::new("stats.timers.foo.mean", 42, 3.0)));

        // Only the zeroed counter survives into the next cycle
        assert_eq!(engine.flush_at(52).await.unwrap(), 2);
        let batch = rx.recv().await.unwrap();
        assert_eq!(
            batch,
            vec![
                Datapoint::new("stats.hits", 52, 0.0),
                Datapoint::new("stats_counts.hits", 52, 0.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_flush_sends_nothing() {
        let (mut engine, mut rx) = engine(0);
        assert_eq!(engine.flush_at(1).await.unwrap(), 0);
        drop(engine);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_send_is_an_error() {
        let (mut engine, _rx) = engine(1);
        engine.apply(events(&["load:3|g"]));
        assert!(engine.flush_at(1).await.is_err());
        // The snapshot was taken; the gauge is not re-sent
        assert_eq!(engine.flush_at(2).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_on_interval_and_survives_failures() {
        let (engine, mut batches) = engine(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        sender.send(events(&["lost:1|g"])).unwrap();
        let handle = tokio::spawn(engine.run(receiver, shutdown_rx));

        // The first cycle fails; the scheduler keeps going
        tokio::time::sleep(Duration::from_secs(11)).await;
        sender.send(events(&["load:7|g"])).unwrap();

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name, "stats.gauges.load");
        assert_eq!(batch[0].value, 7.0);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_final_flush_on_shutdown() {
        let (engine, mut batches) = engine(0);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        sender.send(events(&["hits:3|c"])).unwrap();
        drop(sender);
        drop(shutdown_tx);
        tokio::spawn(engine.run(receiver, shutdown_rx)).await.unwrap();

        let batch = batches.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].name, "stats_counts.hits");
        assert_eq!(batch[1].value, 3.0);
    }
}
