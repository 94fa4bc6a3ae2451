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

//! Metric key normalization

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Any run of characters that may not appear in a Graphite path segment.
static DISALLOWED_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\s|/|[^A-Za-z0-9_.\-])+").expect("valid regex"));

/// A normalized metric name
///
/// Only ever contains `[A-Za-z0-9_.-]`. Counters, timers and gauges keep
/// separate buckets, so the same key may appear under several types.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey(String);

impl MetricKey {
    /// Normalize a raw key, collapsing each run of disallowed characters
    /// into a single `_`.
    pub fn normalize(raw: &str) -> Self {
        Self(DISALLOWED_RUN.replace_all(raw, "_").into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_clean(key: &MetricKey) -> bool {
        key.as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    }

    #[test]
    fn test_clean_key_unchanged() {
        assert_eq!(MetricKey::normalize("api.requests-total_2").as_str(), "api.requests-total_2");
    }

    #[test]
    fn test_runs_collapse_to_single_underscore() {
        assert_eq!(MetricKey::normalize("foo  bar").as_str(), "foo_bar");
        assert_eq!(MetricKey::normalize("foo//bar").as_str(), "foo_bar");
        assert_eq!(MetricKey::normalize("foo \t/ bar").as_str(), "foo_bar");
        assert_eq!(MetricKey::normalize("héllo wörld").as_str(), "h_llo_w_rld");
    }

    #[test]
    fn test_normalize_is_idempotent_and_clean() {
        let inputs = [
            "te$t_key !fix{\\)\\/?@#%th'is^&*be\"ok",
            " ",
            ".",
            "a_/b",
            "trailing/",
            "",
            "ünïcödé/ keys\n",
        ];
        for raw in inputs {
            let once = MetricKey::normalize(raw);
            assert!(is_clean(&once), "{raw:?} normalized to {once}");
            assert_eq!(MetricKey::normalize(once.as_str()), once);
        }
    }

    #[test]
    fn test_garbage_key_transform() {
        let key = MetricKey::normalize("te$t_key !fix{\\)\\/?@#%th'is^&*be\"ok");
        assert_eq!(key.as_str(), "te_t_key_fix_th_is_be_ok");
    }
}
