//! Wall-clock timestamps at storage precision.
//!
//! Timestamps are truncated to microseconds so that a value read back from
//! SQLite compares equal to the value that was written. [`MonotonicClock`]
//! additionally never goes backwards, which keeps activity log timestamps
//! non-decreasing in append order even if the system clock is adjusted.

use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::{Error, Result};

pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 rendering, so lexical order equals time order.
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_storage(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::parse(format!("invalid timestamp '{raw}': {e}")))
}

#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        let current = now();
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let next = last.map_or(current, |prev| prev.max(current));
        *last = Some(next);
        next
    }
}
