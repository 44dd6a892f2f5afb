//! In-flight window for conflict detection.
//!
//! Per resource id, remembers operations that are still running or finished
//! less than `window` ago. A newly beginning operation that finds one is
//! reported as overlapping the most recent of them.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

use super::command::CommandClass;
use crate::domain::{OperationRef, Severity};

#[derive(Debug, Clone)]
struct Tracked {
    operation: OperationRef,
    class: CommandClass,
    finished: Option<Instant>,
}

/// An earlier operation the new one overlaps with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub earlier: OperationRef,
    pub severity: Severity,
}

#[derive(Debug)]
pub struct ConflictDetector {
    window: Duration,
    tracked: Mutex<HashMap<String, Vec<Tracked>>>,
}

/// HIGH for opposing lifecycle transitions, LOW for everything else.
pub const fn severity(earlier: CommandClass, later: CommandClass) -> Severity {
    if earlier.opposes(later) {
        Severity::High
    } else {
        Severity::Low
    }
}

impl ConflictDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Track `operation` on `resource` and report the operation it overlaps,
    /// if any.
    pub fn begin(
        &self,
        resource: &str,
        operation: OperationRef,
        class: CommandClass,
    ) -> Option<Overlap> {
        let now = Instant::now();
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        let ops = tracked.entry(resource.to_string()).or_default();
        ops.retain(|t| self.live(t, now));

        let overlap = ops.last().map(|t| Overlap {
            earlier: t.operation.clone(),
            severity: severity(t.class, class),
        });
        ops.push(Tracked {
            operation,
            class,
            finished: None,
        });
        overlap
    }

    /// Mark the operation logged as `log_id` finished; it stays visible for
    /// the rest of the window.
    pub fn finish(&self, resource: &str, log_id: i64) {
        let now = Instant::now();
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ops) = tracked.get_mut(resource) {
            if let Some(op) = ops.iter_mut().find(|t| t.operation.log_id == log_id) {
                op.finished = Some(now);
            }
        }
        tracked.retain(|_, ops| {
            ops.retain(|t| self.live(t, now));
            !ops.is_empty()
        });
    }

    /// Resources with at least one tracked operation.
    pub fn tracked_resources(&self) -> usize {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn live(&self, tracked: &Tracked, now: Instant) -> bool {
        tracked
            .finished
            .map_or(true, |at| now.saturating_duration_since(at) < self.window)
    }
}
