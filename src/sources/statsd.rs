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

//! Statsd line protocol decoder
//!
//! Parses lines of the form `<key>:<value>|<type>[|@<sample-rate>]`.

use crate::model::{Event, MetricKey, MetricType, MetricValue};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

static SAMPLE_RATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@[0-9.]+").expect("valid regex"));

/// Reasons a single line could not be decoded
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid request: expected exactly one ':' separator with a non-empty key")]
    MalformedEvent,
    #[error("not enough fields received")]
    InsufficientFields,
    #[error("unsupported stats type {0:?}")]
    UnsupportedType(String),
    #[error("bad sample rate {0:?}")]
    InvalidSampleRate(String),
    #[error("invalid value {0:?}")]
    InvalidValue(String),
}

/// Decode one statsd line into an [`Event`].
pub fn decode(line: &str) -> Result<Event, DecodeError> {
    let mut bits = line.split(':');
    let (raw_key, rest) = match (bits.next(), bits.next(), bits.next()) {
        (Some(raw_key), Some(rest), None) => (raw_key, rest),
        _ => return Err(DecodeError::MalformedEvent),
    };
    if raw_key.is_empty() {
        return Err(DecodeError::MalformedEvent);
    }
    let key = MetricKey::normalize(raw_key);

    let fields: Vec<&str> = rest.split('|').collect();
    if fields.len() < 2 {
        return Err(DecodeError::InsufficientFields);
    }

    let ty = MetricType::from_tag(fields[1])
        .ok_or_else(|| DecodeError::UnsupportedType(fields[1].to_string()))?;

    let sample_rate = match fields.get(2) {
        Some(field) => parse_sample_rate(field)?,
        None => 1.0,
    };

    let value = match ty {
        MetricType::Counter => MetricValue::Counter {
            value: parse_value(fields[0], 1.0)?,
            sample_rate,
        },
        MetricType::Timer => MetricValue::Timer(parse_value(fields[0], 0.0)?),
        MetricType::Gauge => MetricValue::Gauge(parse_value(fields[0], 0.0)?),
    };

    Ok(Event { key, value })
}

/// Split a datagram into lines and decode each one.
///
/// Malformed lines are logged and skipped; the remaining events are returned
/// in line order.
pub fn decode_datagram(data: &[u8]) -> Vec<Event> {
    let text = String::from_utf8_lossy(data);
    text.lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| match decode(line) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!("dropping metric {:?}: {}", line, err);
                None
            }
        })
        .collect()
}

fn parse_sample_rate(field: &str) -> Result<f64, DecodeError> {
    let invalid = || DecodeError::InvalidSampleRate(field.to_string());
    if !SAMPLE_RATE.is_match(field) {
        return Err(invalid());
    }
    let rate: f64 = field[1..].parse().map_err(|_| invalid())?;
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(invalid())
    }
}

fn parse_value(field: &str, empty: f64) -> Result<f64, DecodeError> {
    if field.is_empty() {
        return Ok(empty);
    }
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DecodeError::InvalidValue(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(value: f64, sample_rate: f64) -> MetricValue {
        MetricValue::Counter { value, sample_rate }
    }

    #[test]
    fn test_decode_counter() {
        let event = decode("foo:1|c").unwrap();
        assert_eq!(event.key.as_str(), "foo");
        assert_eq!(event.value, counter(1.0, 1.0));
    }

    #[test]
    fn test_decode_sampled_counter() {
        let event = decode("foo:10|c|@0.5").unwrap();
        assert_eq!(event.value, counter(10.0, 0.5));
    }

    #[test]
    fn test_decode_timer_and_gauge() {
        assert_eq!(decode("rt:320.5|ms").unwrap().value, MetricValue::Timer(320.5));
        assert_eq!(decode("load:0.75|g").unwrap().value, MetricValue::Gauge(0.75));
    }

    #[test]
    fn test_decode_normalizes_key() {
        let event = decode("my app/requests:1|c").unwrap();
        assert_eq!(event.key.as_str(), "my_app_requests");
    }

    #[test]
    fn test_empty_value_defaults() {
        assert_eq!(decode("hits:|c").unwrap().value, counter(1.0, 1.0));
        assert_eq!(decode("rt:|ms").unwrap().value, MetricValue::Timer(0.0));
        assert_eq!(decode("load:|g").unwrap().value, MetricValue::Gauge(0.0));
    }

    #[test]
    fn test_sample_rate_only_scales_counters() {
        assert_eq!(decode("rt:5|ms|@0.1").unwrap().value, MetricValue::Timer(5.0));
    }

    #[test]
    fn test_malformed_events() {
        assert_eq!(decode("."), Err(DecodeError::MalformedEvent));
        assert_eq!(decode(" "), Err(DecodeError::MalformedEvent));
        assert_eq!(decode("a:b:1|c"), Err(DecodeError::MalformedEvent));
        assert_eq!(decode(":1|c"), Err(DecodeError::MalformedEvent));
    }

    #[test]
    fn test_insufficient_fields() {
        assert_eq!(decode("foo:1"), Err(DecodeError::InsufficientFields));
    }

    #[test]
    fn test_unsupported_type() {
        assert_eq!(
            decode("bad:1|k"),
            Err(DecodeError::UnsupportedType("k".to_string()))
        );
    }

    #[test]
    fn test_invalid_sample_rates() {
        for line in [
            "baditem:1|c|@",
            "baditem:1|c|@wtf",
            "baditem:1|c|@05f.6",
            "baditem:1|c|0.5",
            "baditem:1|c|@0",
            "baditem:1|c|@0.5.5",
        ] {
            assert!(
                matches!(decode(line), Err(DecodeError::InvalidSampleRate(_))),
                "{line} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            decode("badtimer:5.0f|ms"),
            Err(DecodeError::InvalidValue("5.0f".to_string()))
        );
        assert!(matches!(decode(" : |c"), Err(DecodeError::InvalidValue(_))));
        assert!(matches!(decode("x:NaN|g"), Err(DecodeError::InvalidValue(_))));
        assert!(matches!(decode("x:inf|c"), Err(DecodeError::InvalidValue(_))));
    }

    #[test]
    fn test_datagram_skips_bad_lines() {
        let events = decode_datagram(b"a:1|c\nbaditem:1|k\n\nb:300|ms\r\nc:2|g\n");
        let keys: Vec<_> = events.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(events[1].value, MetricValue::Timer(300.0));
    }

    #[test]
    fn test_datagram_with_invalid_utf8() {
        let events = decode_datagram(b"k\xffey:1|c");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key.as_str(), "k_ey");
    }
}
