// observability/tracing_setup.rs - Tracing Configuration

use serde::Deserialize;
use std::str::FromStr;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Tracing output format
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    /// Human-readable format (default)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(TracingFormat::Pretty),
            "compact" => Ok(TracingFormat::Compact),
            "json" => Ok(TracingFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Subscriber settings for a node
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Filter directives, e.g. "info,fipa_cluster_agents=debug". `RUST_LOG`
    /// takes precedence when set.
    pub filter: String,

    pub format: TracingFormat,

    /// Log span open and close, useful around agent handlers
    pub span_events: bool,

    /// Source file and line of each event
    pub file_lines: bool,

    pub thread_ids: bool,

    /// Terminal colors; never used for JSON
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info,fipa_cluster_agents=debug".into(),
            format: TracingFormat::Pretty,
            span_events: false,
            file_lines: false,
            thread_ids: false,
            ansi: true,
        }
    }
}

impl TracingConfig {
    /// Defaults suited to `format`: JSON output is for machines, so no
    /// colors and a quieter crate filter
    pub fn for_format(format: TracingFormat) -> Self {
        match format {
            TracingFormat::Json => Self {
                filter: "info".into(),
                format,
                ansi: false,
                ..Self::default()
            },
            _ => Self {
                format,
                ..Self::default()
            },
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.filter))
    }

    fn fmt_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let layer = fmt::layer()
            .with_span_events(self.span_events())
            .with_file(self.file_lines)
            .with_line_number(self.file_lines)
            .with_thread_ids(self.thread_ids)
            .with_target(true);

        match self.format {
            TracingFormat::Pretty => layer.with_ansi(self.ansi).boxed(),
            TracingFormat::Compact => layer.compact().with_ansi(self.ansi).boxed(),
            TracingFormat::Json => layer.json().with_ansi(false).boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// Call once at startup; later calls leave the first subscriber in place
/// and return `false`.
pub fn init_tracing(config: TracingConfig) -> bool {
    let installed = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(config.fmt_layer())
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(filter = %config.filter, format = ?config.format, "Tracing initialized");
    }
    installed
}
