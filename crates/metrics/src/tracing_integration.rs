//! Tracing subscriber setup.
//!
//! With the `tracing` feature, span fields are also propagated to metric
//! labels through [`metrics_tracing_context`].

#[cfg(feature = "tracing")]
use {
    metrics_tracing_context::MetricsLayer,
    tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt},
};

/// Install a global subscriber: `RUST_LOG`-style env filter, human readable
/// output, plus the metrics label layer.
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "tracing")]
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(MetricsLayer::new())
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .is_ok()
}
