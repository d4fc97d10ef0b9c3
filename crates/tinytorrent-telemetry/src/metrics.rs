//! Prometheus-backed metrics registry.
//!
//! # Design
//! - Collectors are registered once at construction; the public API only records values.
//! - The engine loop is the only writer; readers render the text exposition format.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

struct MetricsInner {
    registry: Registry,
    ticks_total: IntCounter,
    tasks_total: IntCounter,
    task_failures_total: IntCounter,
    alerts_total: IntCounterVec,
    pending_tasks: IntGauge,
    torrents: IntGauge,
    active_torrents: IntGauge,
    download_rate_bps: IntGauge,
    upload_rate_bps: IntGauge,
}

/// Point-in-time copy of the engine metrics.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Completed engine ticks.
    pub ticks_total: u64,
    /// Engine tasks executed.
    pub tasks_total: u64,
    /// Engine tasks that returned an error.
    pub task_failures_total: u64,
    /// Tasks waiting in the engine queue.
    pub pending_tasks: i64,
    /// Torrents in the session.
    pub torrents: i64,
    /// Torrents transferring data.
    pub active_torrents: i64,
    /// Session download rate.
    pub download_rate_bps: i64,
    /// Session upload rate.
    pub upload_rate_bps: i64,
}

fn counter(name: &'static str, help: &str) -> TelemetryResult<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn gauge(name: &'static str, help: &str) -> TelemetryResult<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a registry with the engine collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let ticks_total = counter("engine_ticks_total", "Engine loop iterations")?;
        let tasks_total = counter("engine_tasks_total", "Engine tasks executed")?;
        let task_failures_total =
            counter("engine_task_failures_total", "Engine tasks that failed")?;
        let alerts_total = IntCounterVec::new(
            Opts::new("engine_alerts_total", "Session alerts processed by kind"),
            &["kind"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "engine_alerts_total",
            source,
        })?;
        let pending_tasks = gauge("engine_pending_tasks", "Tasks waiting in the engine queue")?;
        let torrents = gauge("engine_torrents", "Torrents in the session")?;
        let active_torrents = gauge("engine_active_torrents", "Torrents transferring data")?;
        let download_rate_bps =
            gauge("engine_download_rate_bps", "Session download rate in bytes/s")?;
        let upload_rate_bps = gauge("engine_upload_rate_bps", "Session upload rate in bytes/s")?;

        register(&registry, "engine_ticks_total", &ticks_total)?;
        register(&registry, "engine_tasks_total", &tasks_total)?;
        register(&registry, "engine_task_failures_total", &task_failures_total)?;
        register(&registry, "engine_alerts_total", &alerts_total)?;
        register(&registry, "engine_pending_tasks", &pending_tasks)?;
        register(&registry, "engine_torrents", &torrents)?;
        register(&registry, "engine_active_torrents", &active_torrents)?;
        register(&registry, "engine_download_rate_bps", &download_rate_bps)?;
        register(&registry, "engine_upload_rate_bps", &upload_rate_bps)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                ticks_total,
                tasks_total,
                task_failures_total,
                alerts_total,
                pending_tasks,
                torrents,
                active_torrents,
                download_rate_bps,
                upload_rate_bps,
            }),
        })
    }

    /// Count one engine loop iteration.
    pub fn inc_tick(&self) {
        self.inner.ticks_total.inc();
    }

    /// Count executed tasks and their failures.
    pub fn record_tasks(&self, executed: u64, failed: u64) {
        self.inner.tasks_total.inc_by(executed);
        self.inner.task_failures_total.inc_by(failed);
    }

    /// Count one processed alert.
    pub fn inc_alert(&self, kind: &str) {
        self.inner.alerts_total.with_label_values(&[kind]).inc();
    }

    /// Set the pending task gauge.
    pub fn set_pending_tasks(&self, depth: i64) {
        self.inner.pending_tasks.set(depth);
    }

    /// Set the torrent count gauges.
    pub fn set_torrents(&self, total: i64, active: i64) {
        self.inner.torrents.set(total);
        self.inner.active_torrents.set(active);
    }

    /// Set the session rate gauges.
    pub fn set_rates(&self, download_bps: i64, upload_bps: i64) {
        self.inner.download_rate_bps.set(download_bps);
        self.inner.upload_rate_bps.set(upload_bps);
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the engine metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_total: self.inner.ticks_total.get(),
            tasks_total: self.inner.tasks_total.get(),
            task_failures_total: self.inner.task_failures_total.get(),
            pending_tasks: self.inner.pending_tasks.get(),
            torrents: self.inner.torrents.get(),
            active_torrents: self.inner.active_torrents.get(),
            download_rate_bps: self.inner.download_rate_bps.get(),
            upload_rate_bps: self.inner.upload_rate_bps.get(),
        }
    }
}
