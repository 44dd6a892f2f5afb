//! Host metrics for the dashboard's periodic stream.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use sysinfo::{Networks, System};
use tokio::time::{Instant, MissedTickBehavior};

use crate::clock;

/// One sample: `{cpu, memory, networkIn, networkOut, uptime, timestamp}`.
///
/// `cpu` and `memory` are percentages, network figures are bytes per second
/// since the previous sample, `uptime` is host uptime in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu: f32,
    pub memory: f32,
    pub network_in: u64,
    pub network_out: u64,
    pub uptime: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct MetricsSampler {
    system: System,
    networks: Networks,
    last: Option<(u64, u64, Instant)>,
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            last: None,
        }
    }

    pub fn sample(&mut self) -> SystemMetrics {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.networks.refresh(true);

        let total = self.system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };

        let (rx, tx) = self
            .networks
            .iter()
            .fold((0_u64, 0_u64), |(rx, tx), (_, data)| {
                (
                    rx.saturating_add(data.total_received()),
                    tx.saturating_add(data.total_transmitted()),
                )
            });
        let now = Instant::now();
        let (network_in, network_out) = match self.last {
            Some((prev_rx, prev_tx, at)) => {
                let secs = now.saturating_duration_since(at).as_secs_f64().max(1e-3);
                (
                    (rx.saturating_sub(prev_rx) as f64 / secs) as u64,
                    (tx.saturating_sub(prev_tx) as f64 / secs) as u64,
                )
            }
            None => (0, 0),
        };
        self.last = Some((rx, tx, now));

        SystemMetrics {
            cpu: self.system.global_cpu_usage().clamp(0.0, 100.0),
            memory: memory.clamp(0.0, 100.0),
            network_in,
            network_out,
            uptime: System::uptime(),
            timestamp: clock::now(),
        }
    }
}

/// Endless stream of samples, one per `interval`, the first immediately.
/// Ticks missed by a slow consumer are skipped rather than bunched.
pub fn metrics_stream(interval: Duration) -> BoxStream<'static, SystemMetrics> {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    futures::stream::unfold(
        (ticker, MetricsSampler::new()),
        |(mut ticker, mut sampler)| async move {
            ticker.tick().await;
            let sample = sampler.sample();
            Some((sample, (ticker, sampler)))
        },
    )
    .boxed()
}
