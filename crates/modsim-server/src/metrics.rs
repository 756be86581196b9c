// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Metrics collection and the HTTP endpoint.
//!
//! A background sampler copies the supervisor's aggregate counters once a
//! second into a short history window, from which request rates are derived.
//! The HTTP server exposes:
//!
//! - the metrics endpoint (Prometheus text by default, JSON with
//!   `?format=json` or `Accept: application/json`)
//! - `/health`: always healthy while the process runs
//! - `/ready`: 503 until the supervisor is `Running`

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use modsim_core::types::SupervisorState;

use crate::supervisor::Supervisor;

/// Sampling period of the background collector.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Samples retained for rate computation (one minute at 1 Hz).
const MAX_HISTORY: usize = 60;

// =============================================================================
// MetricsCollector
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    requests: u64,
}

/// Periodically samples the supervisor and produces snapshots.
pub struct MetricsCollector {
    supervisor: Arc<Supervisor>,
    started_at: Instant,
    history: Mutex<VecDeque<Sample>>,
}

impl MetricsCollector {
    /// Creates a collector over the fleet supervisor.
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            started_at: Instant::now(),
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
        }
    }

    /// Takes one sample; called by the background loop.
    pub fn collect(&self) {
        let stats = self.supervisor.stats();
        let mut history = self.history.lock();
        if history.len() == MAX_HISTORY {
            history.pop_front();
        }
        history.push_back(Sample {
            at: Instant::now(),
            requests: stats.total_requests,
        });
    }

    /// Requests per second over the retained window.
    fn requests_per_sec(&self) -> f64 {
        let history = self.history.lock();
        let (Some(first), Some(last)) = (history.front(), history.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (last.requests.saturating_sub(first.requests)) as f64 / elapsed
    }

    /// Builds a point-in-time snapshot of the fleet.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let stats = self.supervisor.stats();

        let error_rate = if stats.total_requests > 0 {
            stats.total_errors as f64 / stats.total_requests as f64 * 100.0
        } else {
            0.0
        };

        // Sample register readings from an arbitrary slave; the fleet runs
        // the same scenario everywhere.
        let mut sample_voltage = None;
        let mut sample_current = None;
        let mut sample_frequency = None;
        let mut sample_power = None;
        if let Some(slave) = self.supervisor.slaves().into_iter().next() {
            let registers = slave.registers();
            sample_voltage = registers.get_scaled_value(40001).ok();
            sample_current = registers.get_scaled_value(40002).ok();
            sample_frequency = registers.get_scaled_value(40003).ok();
            sample_power = registers.get_scaled_value(40007).ok();
        }

        MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            supervisor_state: stats.state.as_str(),
            current_scenario: stats.scenario.as_str(),
            total_slaves: stats.slave_count,
            active_slaves: stats.active_slaves,
            stopped_slaves: stats.slave_count - stats.active_slaves,
            total_requests: stats.total_requests,
            total_errors: stats.total_errors,
            error_rate,
            requests_per_sec: self.requests_per_sec(),
            bytes_received: stats.bytes_in,
            bytes_sent: stats.bytes_out,
            sample_voltage,
            sample_current,
            sample_frequency,
            sample_power,
        }
    }

    fn is_ready(&self) -> bool {
        self.supervisor.state() == SupervisorState::Running
    }
}

// =============================================================================
// MetricsSnapshot
// =============================================================================

/// Point-in-time view of the fleet, served as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Snapshot time.
    pub timestamp: DateTime<Utc>,

    /// Seconds since the collector came up.
    pub uptime_seconds: f64,

    /// Supervisor lifecycle state.
    pub supervisor_state: &'static str,

    /// Scenario currently applied to the fleet.
    pub current_scenario: &'static str,

    /// Slaves owned by the supervisor.
    pub total_slaves: usize,

    /// Slaves currently running.
    pub active_slaves: usize,

    /// Slaves not running.
    pub stopped_slaves: usize,

    /// Completed requests across the fleet.
    pub total_requests: u64,

    /// Errors across the fleet.
    pub total_errors: u64,

    /// Errors as a percentage of requests.
    pub error_rate: f64,

    /// Request rate over the sampling window.
    pub requests_per_sec: f64,

    /// Bytes received across the fleet.
    pub bytes_received: u64,

    /// Bytes sent across the fleet.
    pub bytes_sent: u64,

    /// Voltage reading sampled from one slave.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_voltage: Option<f64>,

    /// Current reading sampled from one slave.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_current: Option<f64>,

    /// Frequency reading sampled from one slave.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_frequency: Option<f64>,

    /// Power reading sampled from one slave.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_power: Option<f64>,
}

/// Renders a snapshot in the Prometheus text exposition format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::with_capacity(1024);
    let mut gauge = |name: &str, help: &str, value: f64| {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n\n"
        ));
    };

    gauge(
        "modsim_uptime_seconds",
        "Uptime in seconds",
        snapshot.uptime_seconds,
    );
    gauge(
        "modsim_slaves_total",
        "Total number of slaves",
        snapshot.total_slaves as f64,
    );
    gauge(
        "modsim_slaves_active",
        "Active number of slaves",
        snapshot.active_slaves as f64,
    );
    gauge(
        "modsim_requests_per_second",
        "Requests per second",
        snapshot.requests_per_sec,
    );

    let mut counter = |name: &str, help: &str, value: u64| {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n"
        ));
    };
    counter(
        "modsim_requests_total",
        "Total number of requests",
        snapshot.total_requests,
    );
    counter(
        "modsim_errors_total",
        "Total number of errors",
        snapshot.total_errors,
    );
    counter(
        "modsim_bytes_received_total",
        "Total bytes received",
        snapshot.bytes_received,
    );
    counter(
        "modsim_bytes_sent_total",
        "Total bytes sent",
        snapshot.bytes_sent,
    );

    let mut sample = |name: &str, help: &str, value: Option<f64>| {
        if let Some(value) = value {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n\n"
            ));
        }
    };
    sample(
        "modsim_sample_voltage",
        "Sample voltage reading",
        snapshot.sample_voltage,
    );
    sample(
        "modsim_sample_current",
        "Sample current reading",
        snapshot.sample_current,
    );
    sample(
        "modsim_sample_frequency",
        "Sample frequency reading",
        snapshot.sample_frequency,
    );
    sample(
        "modsim_sample_power",
        "Sample power reading",
        snapshot.sample_power,
    );

    out
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Serves the metrics endpoint until shutdown is signaled.
///
/// Also runs the 1 Hz sampling loop for the collector.
pub async fn serve(
    collector: Arc<MetricsCollector>,
    addr: SocketAddr,
    endpoint: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let sampler = tokio::spawn({
        let collector = Arc::clone(&collector);
        let mut shutdown = shutdown.resubscribe();
        async move {
            let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => collector.collect(),
                }
            }
        }
    });

    let app = Router::new()
        .route(endpoint, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(collector);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, endpoint, "metrics server listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;

    sampler.abort();
    result
}

async fn metrics_handler(
    State(collector): State<Arc<MetricsCollector>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let snapshot = collector.snapshot();

    let wants_json = query.get("format").is_some_and(|format| format == "json")
        || headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|accept| accept.contains("application/json"));

    if wants_json {
        Json(snapshot).into_response()
    } else {
        (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            render_prometheus(&snapshot),
        )
            .into_response()
    }
}

async fn health_handler() -> Response {
    Json(serde_json::json!({ "status": "healthy" })).into_response()
}

async fn ready_handler(State(collector): State<Arc<MetricsCollector>>) -> Response {
    if collector.is_ready() {
        Json(serde_json::json!({ "status": "ready" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not ready" })),
        )
            .into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================
