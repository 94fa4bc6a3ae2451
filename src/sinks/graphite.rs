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

//! Graphite sink
//!
//! Supports both carbon receivers: the plaintext line protocol
//! (`<name> <value> <timestamp>\n`) and the pickle protocol, where every
//! frame is a 4-byte big-endian length followed by a pickled list of
//! `(name, (timestamp, value))` tuples.

use super::transport::{DeliveryClient, Transport};
use super::MetricsSink;
use crate::model::{Datapoint, FlushBatch};
use anyhow::Result;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde_pickle::SerOptions;
use std::fmt::Write;
use thiserror::Error;
use tracing::{debug, error};

/// Default number of datapoints per pickle frame.
pub const DEFAULT_BATCH_SIZE: usize = 300;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to format plaintext batch")]
    Format(#[from] std::fmt::Error),
    #[error("failed to pickle batch: {0}")]
    Pickle(#[from] serde_pickle::Error),
    #[error("pickled batch of {0} bytes does not fit a 4-byte length prefix")]
    FrameTooLarge(usize),
}

/// Wire format for the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Plaintext,
    Pickle { batch_size: usize },
}

impl Protocol {
    /// Render a flush batch into the payloads to send, one transport call each.
    ///
    /// An empty batch yields no payloads.
    pub fn encode(&self, batch: &[Datapoint]) -> Result<Vec<Bytes>, SerializeError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        match *self {
            Protocol::Plaintext => Ok(vec![encode_plaintext(batch)?]),
            Protocol::Pickle { batch_size } => batch
                .chunks(batch_size.max(1))
                .map(encode_pickle_frame)
                .collect(),
        }
    }
}

fn encode_plaintext(batch: &[Datapoint]) -> Result<Bytes, SerializeError> {
    let mut text = String::new();
    for point in batch {
        writeln!(text, "{} {} {}", point.name, point.value, point.timestamp)?;
    }
    Ok(Bytes::from(text))
}

fn encode_pickle_frame(chunk: &[Datapoint]) -> Result<Bytes, SerializeError> {
    let tuples: Vec<(&str, (i64, f64))> = chunk
        .iter()
        .map(|point| (point.name.as_str(), (point.timestamp, point.value)))
        .collect();
    let body = serde_pickle::to_vec(&tuples, SerOptions::new())?;
    let len = u32::try_from(body.len()).map_err(|_| SerializeError::FrameTooLarge(body.len()))?;

    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(len);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Ships flush batches to a carbon receiver
pub struct GraphiteSink<T> {
    protocol: Protocol,
    client: DeliveryClient<T>,
}

impl<T: Transport> GraphiteSink<T> {
    pub fn new(protocol: Protocol, client: DeliveryClient<T>) -> Self {
        Self { protocol, client }
    }
}

#[async_trait]
impl<T: Transport> MetricsSink for GraphiteSink<T> {
    async fn send(&self, batch: &FlushBatch) -> Result<()> {
        let payloads = self.protocol.encode(batch)?;
        for payload in payloads {
            debug!("Reporting {} bytes of stats", payload.len());
            if let Err(err) = self.client.send(&payload).await {
                error!(
                    "error connecting to graphite at {}: {}",
                    self.client.transport().destination(),
                    err
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "graphite"
    }
}
