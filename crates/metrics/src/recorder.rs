//! Recorder installation.

use {anyhow::Result, shredder_config::ShredderConfig, tracing::info};

use crate::labels;

/// Access to what the installed recorder collected.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Prometheus text exposition of every `shredder_*` metric. Empty when
    /// no recorder was installed.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        if let Some(handle) = &self.prometheus {
            return handle.render();
        }
        String::new()
    }

    pub fn is_recording(&self) -> bool {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus.is_some()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            false
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    /// Added to every metric, e.g. `("service", "billing")`.
    pub global_labels: Vec<(String, String)>,
}

impl MetricsRecorderConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            global_labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_labels.push((key.into(), value.into()));
        self
    }
}

/// Honors `metrics.enabled` and labels every metric with the materials mode
/// and key-store backend in use.
impl From<&ShredderConfig> for MetricsRecorderConfig {
    fn from(config: &ShredderConfig) -> Self {
        Self {
            enabled: config.metrics.enabled,
            global_labels: vec![
                (labels::MODE.to_string(), config.materials.mode.as_str().to_string()),
                (labels::BACKEND.to_string(), config.key_store.backend.as_str().to_string()),
            ],
        }
    }
}

/// Install the process-wide recorder. Call once at startup; when disabled,
/// or built without `prometheus`, the facade's no-op recorder stays in place
/// and the handle renders nothing.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("shredder metrics disabled");
        return Ok(MetricsHandle::default());
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = install_prometheus(config.global_labels)?;
        info!("shredder metrics recorder installed");
        Ok(MetricsHandle {
            prometheus: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!(
            labels = config.global_labels.len(),
            "metrics requested but the prometheus feature is off"
        );
        Ok(MetricsHandle::default())
    }
}

#[cfg(feature = "prometheus")]
fn install_prometheus(
    global_labels: Vec<(String, String)>,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use {
        crate::{buckets, decryption, encryption},
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new();
    for name in [encryption::DURATION_SECONDS, decryption::DURATION_SECONDS] {
        builder = builder.set_buckets_for_metric(Matcher::Full(name.to_string()), &buckets::CRYPTO_DURATION)?;
    }
    builder = global_labels
        .into_iter()
        .fold(builder, |builder, (key, value)| builder.add_global_label(key, value));

    Ok(builder.install_recorder()?)
}
