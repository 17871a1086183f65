//! Tracing setup shared by the hetero runtime crates, example programs and
//! benchmarks.
//!
//! Library crates only *emit* events; installing a subscriber is left to the
//! binary. Binaries call [`init_global_tracing`] (or [`init_from_env`]) once at
//! start-up so every program gets the same filter and formatting rules.
//!
//! ```text
//! HETERO_TRACING_* env ──► TracingConfig ──► EnvFilter + fmt layer ──► Registry
//! ```

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// How the process-wide subscriber should filter and format events.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Explicit filter directives (e.g. `hetero_core=debug,info`). When absent
    /// `RUST_LOG` is consulted, then [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Fallback directive used when nothing else resolves to a valid filter.
    pub default_directive: String,
    /// Print event targets (module paths).
    pub include_targets: bool,
    /// ANSI colour codes. Disabled for CI and JSON output.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Output format for the formatter layer.
    pub output: TracingOutput,
    /// When false, [`performance::PerformanceSpan`] guards skip their
    /// completion event entirely.
    pub enable_performance_tracing: bool,
    /// Minimum span duration in microseconds worth reporting.
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for interactive runs.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "warn".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            enable_performance_tracing: cfg!(debug_assertions),
            performance_threshold_us: None,
        }
    }

    /// JSON lines without colour, for log collection.
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Json,
            enable_performance_tracing: false,
            performance_threshold_us: None,
        }
    }

    /// Debug-level runtime events with span close timings. Useful when
    /// chasing kernel build or stream ordering problems.
    pub fn for_kernel_debugging() -> Self {
        Self {
            directives: Some("hetero_core=debug,hetero_backends=debug,hetero_lang=debug,info".to_string()),
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Compact,
            enable_performance_tracing: true,
            performance_threshold_us: None,
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `HETERO_TRACING_PROFILE` - `local` (default), `ci` or `debug`
    /// - `HETERO_TRACING_DIRECTIVES` - overrides filter directives
    /// - `HETERO_TRACING_FORMAT` - `pretty`, `compact` or `json`
    /// - `HETERO_PERF_TRACING` - `true`/`1`/`yes` enables performance spans
    /// - `HETERO_PERF_THRESHOLD_US` - minimum duration to report
    pub fn from_env() -> Self {
        let profile = env::var("HETERO_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "debug" => Self::for_kernel_debugging(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("HETERO_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var("HETERO_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if config.output == TracingOutput::Json {
                    config.ansi = false;
                }
            }
        }

        if let Ok(perf) = env::var("HETERO_PERF_TRACING") {
            config.enable_performance_tracing =
                perf.eq_ignore_ascii_case("true") || perf == "1" || perf.eq_ignore_ascii_case("yes");
        }

        if let Ok(threshold) = env::var("HETERO_PERF_THRESHOLD_US") {
            if let Ok(threshold_us) = threshold.trim().parse::<u64>() {
                config.performance_threshold_us = Some(threshold_us);
            }
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),

    /// Usually means another subscriber is already installed.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber from `config` without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let (filter, fmt_layer) = subscriber_layers(config)?;
    Ok(Registry::default().with(fmt_layer).with(filter))
}

/// The filter and formatting layers, for callers composing their own registry.
pub fn subscriber_layers(
    config: &TracingConfig,
) -> Result<(EnvFilter, Box<dyn Layer<Registry> + Send + Sync>), TracingSetupError> {
    let filter = config.resolve_filter()?;
    let span_events = config.span_events.clone();

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Compact => Box::new(
            tracing_fmt::layer()
                .compact()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(span_events),
        ),
        TracingOutput::Pretty => Box::new(
            tracing_fmt::layer()
                .pretty()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(span_events),
        ),
        TracingOutput::Json => Box::new(
            tracing_fmt::layer()
                .json()
                .with_target(config.include_targets)
                .with_span_events(span_events)
                .with_ansi(false),
        ),
    };

    Ok((filter, layer))
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    performance::set_performance_tracing(config.enable_performance_tracing, config.performance_threshold_us);
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// [`init_global_tracing`] with [`TracingConfig::from_env`], tolerating an
/// already-installed subscriber. Example programs call this first thing.
pub fn init_from_env() -> Result<(), TracingSetupError> {
    match init_global_tracing(&TracingConfig::from_env()) {
        Err(TracingSetupError::SubscriberInit(_)) => Ok(()),
        other => other,
    }
}

/// Output format choices for the formatter layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}
