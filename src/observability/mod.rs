// observability/mod.rs - Tracing and Metrics

//! Observability module providing structured logging and Prometheus metrics.
//!
//! # Features
//!
//! - **Tracing**: Structured logging with span context propagation
//! - **Metrics**: Prometheus-compatible metrics export
//!
//! Recording functions are no-ops until a recorder is installed, so the
//! runtime calls them unconditionally.
//!
//! # Example
//!
//! ```ignore
//! use fipa_cluster_agents::observability::{init_tracing, init_metrics, MetricsConfig, TracingConfig};
//!
//! // Initialize tracing
//! init_tracing(TracingConfig::default());
//!
//! // Initialize metrics
//! let handle = init_metrics(MetricsConfig::default()).unwrap();
//! ```

mod metrics;
mod tracing_setup;

pub use metrics::{
    init_metrics, record_agent_started, record_agent_stopped, record_bridge_frame_received,
    record_bridge_frame_sent, record_cluster_members, record_delivery_failure,
    record_handler_failure, record_message_delivered, record_message_handling,
    record_message_received, record_registry_conflict, AgentMetrics, ClusterMetrics,
    MessageMetrics, MetricsConfig, MetricsHandle,
};

pub use tracing_setup::{init_tracing, TracingConfig, TracingFormat};
