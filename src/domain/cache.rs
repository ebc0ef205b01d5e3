//! TTL-gated cache wrapper for externally sourced derivatives metrics
//! (`GammaProfile`, basis APR, options skew) — single-writer (a periodic
//! refresher task), single-reader (the consumer loop) by construction.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    pub fn new(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self { value, fetched_at }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl_seconds: i64) -> bool {
        (now - self.fetched_at).num_seconds() >= ttl_seconds
    }

    /// `Some(&value)` unless it has outlived `ttl_seconds` — the
    /// `STALE_DERIVATIVES` gate: callers treat a stale reading as absent
    /// rather than erroring.
    pub fn fresh(&self, now: DateTime<Utc>, ttl_seconds: i64) -> Option<&T> {
        if self.is_stale(now, ttl_seconds) { None } else { Some(&self.value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(s, 0).unwrap()
    }

    #[test]
    fn fresh_returns_none_past_ttl() {
        let cached = Cached::new(42, t(0));
        assert!(cached.fresh(t(1800), 1800).is_none());
        assert!(cached.fresh(t(1799), 1800).is_some());
    }
}
