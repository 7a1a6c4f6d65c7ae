// observability/metrics.rs - Prometheus Metrics

use metrics::{counter, gauge, histogram, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for metrics
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Address to expose metrics endpoint
    pub listen_addr: SocketAddr,

    /// Histogram buckets for handler execution time (in seconds)
    pub handling_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            handling_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
            ],
        }
    }
}

/// Handle to the Prometheus metrics exporter
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Agent-related metrics
pub struct AgentMetrics;

impl AgentMetrics {
    pub const STARTED_TOTAL: &'static str = "fipa_agents_started_total";
    pub const STOPPED_TOTAL: &'static str = "fipa_agents_stopped_total";
    pub const ACTIVE: &'static str = "fipa_agents_active";
    pub const HANDLER_FAILURES_TOTAL: &'static str = "fipa_agent_handler_failures_total";
}

/// Message-related metrics
pub struct MessageMetrics;

impl MessageMetrics {
    pub const RECEIVED_TOTAL: &'static str = "fipa_messages_received_total";
    pub const DELIVERED_TOTAL: &'static str = "fipa_messages_delivered_total";
    pub const DELIVERY_FAILURES_TOTAL: &'static str = "fipa_message_delivery_failures_total";
    pub const HANDLING_SECONDS: &'static str = "fipa_message_handling_seconds";
}

/// Cluster-related metrics
pub struct ClusterMetrics;

impl ClusterMetrics {
    pub const FRAMES_SENT_TOTAL: &'static str = "fipa_bridge_frames_sent_total";
    pub const FRAMES_RECEIVED_TOTAL: &'static str = "fipa_bridge_frames_received_total";
    pub const REGISTRY_CONFLICTS_TOTAL: &'static str = "fipa_registry_conflicts_total";
    pub const MEMBERS: &'static str = "fipa_cluster_members";
}

/// Initialize the metrics system
///
/// Starts an HTTP server on the configured address to expose Prometheus metrics.
/// Returns a handle that can be used to render metrics programmatically.
/// Must run inside a Tokio runtime.
pub fn init_metrics(config: MetricsConfig) -> Result<MetricsHandle, BuildError> {
    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        metrics_exporter_prometheus::Matcher::Full(MessageMetrics::HANDLING_SECONDS.into()),
        &config.handling_buckets,
    )?;

    let handle = builder.install_recorder()?;
    let metrics_handle = MetricsHandle { handle: handle.clone() };

    // Start HTTP server for metrics endpoint
    let listen_addr = config.listen_addr;
    let shared_handle = std::sync::Arc::new(handle);

    tokio::spawn(async move {
        use axum::{routing::get, Router, Json, http::StatusCode};
        use serde::Serialize;

        #[derive(Serialize)]
        struct HealthResponse {
            status: &'static str,
            version: &'static str,
            uptime_secs: u64,
        }

        let start_time = std::time::Instant::now();

        let handle_for_route = shared_handle.clone();
        let app = Router::new()
            .route("/metrics", get(move || {
                let h = handle_for_route.clone();
                async move { h.render() }
            }))
            .route("/health", get(move || {
                let uptime = start_time.elapsed().as_secs();
                async move {
                    Json(HealthResponse {
                        status: "healthy",
                        version: env!("CARGO_PKG_VERSION"),
                        uptime_secs: uptime,
                    })
                }
            }))
            .route("/ready", get(|| async { StatusCode::OK }))
            .route("/live", get(|| async { StatusCode::OK }));

        match tokio::net::TcpListener::bind(listen_addr).await {
            Ok(listener) => {
                tracing::info!(addr = %listen_addr, "Metrics HTTP server started");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "Metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, addr = %listen_addr, "Failed to bind metrics server");
            }
        }
    });

    // Register metric descriptions
    describe_counter!(
        AgentMetrics::STARTED_TOTAL,
        "Total number of agents started"
    );
    describe_counter!(
        AgentMetrics::STOPPED_TOTAL,
        "Total number of agents stopped"
    );
    describe_gauge!(
        AgentMetrics::ACTIVE,
        "Current number of agents running on this node"
    );
    describe_counter!(
        AgentMetrics::HANDLER_FAILURES_TOTAL,
        "Handler errors and panics caught at the actor boundary"
    );

    describe_counter!(
        MessageMetrics::RECEIVED_TOTAL,
        "Messages taken from agent mailboxes"
    );
    describe_counter!(
        MessageMetrics::DELIVERED_TOTAL,
        "Per-receiver deliveries by route"
    );
    describe_counter!(
        MessageMetrics::DELIVERY_FAILURES_TOTAL,
        "Per-receiver delivery failures by reason"
    );
    describe_histogram!(
        MessageMetrics::HANDLING_SECONDS,
        "Handler execution time in seconds"
    );

    describe_counter!(
        ClusterMetrics::FRAMES_SENT_TOTAL,
        "Bridge frames sent"
    );
    describe_counter!(
        ClusterMetrics::FRAMES_RECEIVED_TOTAL,
        "Bridge frames received"
    );
    describe_counter!(
        ClusterMetrics::REGISTRY_CONFLICTS_TOTAL,
        "Duplicate agent claims resolved"
    );
    describe_gauge!(
        ClusterMetrics::MEMBERS,
        "Reachable cluster members, including this node"
    );

    tracing::info!(addr = %config.listen_addr, "Metrics initialized");

    Ok(metrics_handle)
}

// Recording functions

/// Record an agent being started
pub fn record_agent_started(class_name: &str) {
    counter!(AgentMetrics::STARTED_TOTAL, "class" => class_name.to_string()).increment(1);
    gauge!(AgentMetrics::ACTIVE, "class" => class_name.to_string()).increment(1.0);
}

/// Record an agent being stopped
pub fn record_agent_stopped(class_name: &str, reason: &str) {
    counter!(
        AgentMetrics::STOPPED_TOTAL,
        "class" => class_name.to_string(),
        "reason" => reason.to_string()
    ).increment(1);
    gauge!(AgentMetrics::ACTIVE, "class" => class_name.to_string()).decrement(1.0);
}

/// Record a handler error or panic
pub fn record_handler_failure(class_name: &str) {
    counter!(AgentMetrics::HANDLER_FAILURES_TOTAL, "class" => class_name.to_string()).increment(1);
}

/// Record a message being taken from a mailbox
pub fn record_message_received(performative: &str) {
    counter!(
        MessageMetrics::RECEIVED_TOTAL,
        "performative" => performative.to_string()
    ).increment(1);
}

/// Record handler execution time
pub fn record_message_handling(duration: Duration, performative: &str) {
    histogram!(
        MessageMetrics::HANDLING_SECONDS,
        "performative" => performative.to_string()
    ).record(duration.as_secs_f64());
}

/// Record a successful per-receiver delivery (`local`, `remote` or `relay`)
pub fn record_message_delivered(route: &'static str) {
    counter!(MessageMetrics::DELIVERED_TOTAL, "route" => route).increment(1);
}

/// Record a failed per-receiver delivery
pub fn record_delivery_failure(reason: &'static str) {
    counter!(MessageMetrics::DELIVERY_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_bridge_frame_sent(kind: &'static str) {
    counter!(ClusterMetrics::FRAMES_SENT_TOTAL, "kind" => kind).increment(1);
}

pub fn record_bridge_frame_received(kind: &'static str) {
    counter!(ClusterMetrics::FRAMES_RECEIVED_TOTAL, "kind" => kind).increment(1);
}

/// Record a duplicate claim resolved by the registry
pub fn record_registry_conflict() {
    counter!(ClusterMetrics::REGISTRY_CONFLICTS_TOTAL).increment(1);
}

pub fn record_cluster_members(count: usize) {
    gauge!(ClusterMetrics::MEMBERS).set(count as f64);
}
