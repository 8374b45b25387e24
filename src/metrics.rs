// Numan Thabit 2026
// metrics.rs - Prometheus and tracing
use prometheus::{IntCounter, IntCounterVec, IntGauge, Registry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    pub sessions_active: IntGauge,
    pub records_dropped: IntCounter,
    pub usage_reports: IntCounterVec,
    pub monitor_reports: IntCounter,
    pub flow_activations: IntCounter,
    pub flow_activation_failures: IntCounter,
    pub flow_deactivations: IntCounter,
    pub flow_deactivation_failures: IntCounter,
    pub scheduled_activations_pending: IntGauge,
    pub terminations: IntCounter,
    pub reauth_answers: IntCounterVec,
    pub grants_applied: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new_custom(Some("creditgate".into()), None)?;

        macro_rules! register_counter {
            ($name:expr, $help:expr) => {{
                let counter = IntCounter::new($name, $help)?;
                registry.register(Box::new(counter.clone()))?;
                counter
            }};
        }

        macro_rules! register_counter_vec {
            ($name:expr, $help:expr, $labels:expr) => {{
                let counter = IntCounterVec::new(prometheus::Opts::new($name, $help), $labels)?;
                registry.register(Box::new(counter.clone()))?;
                counter
            }};
        }

        macro_rules! register_gauge {
            ($name:expr, $help:expr) => {{
                let gauge = IntGauge::new($name, $help)?;
                registry.register(Box::new(gauge.clone()))?;
                gauge
            }};
        }

        let sessions_active = register_gauge!("sessions_active", "Sessions currently enforced");
        let records_dropped = register_counter!(
            "records_dropped_total",
            "Usage records dropped for unknown subscribers or rules"
        );
        let usage_reports = register_counter_vec!(
            "usage_reports_total",
            "Credit usage reports emitted per update type",
            &["type"]
        );
        let monitor_reports = register_counter!(
            "monitor_reports_total",
            "Usage monitor reports emitted towards the policy peer"
        );
        let flow_activations =
            register_counter!("flow_activations_total", "Flow activation commands issued");
        let flow_activation_failures = register_counter!(
            "flow_activation_failures_total",
            "Flow activation commands the data plane rejected"
        );
        let flow_deactivations = register_counter!(
            "flow_deactivations_total",
            "Flow deactivation commands issued"
        );
        let flow_deactivation_failures = register_counter!(
            "flow_deactivation_failures_total",
            "Flow deactivation commands the data plane rejected"
        );
        let scheduled_activations_pending = register_gauge!(
            "scheduled_activations_pending",
            "Rule activations waiting on their wall-clock deadline"
        );
        let terminations =
            register_counter!("terminations_total", "Subscriber terminations reported");
        let reauth_answers = register_counter_vec!(
            "reauth_answers_total",
            "Charging re-auth answers per result",
            &["result"]
        );
        let grants_applied =
            register_counter!("grants_applied_total", "Peer grants folded into trackers");

        Ok(Self {
            registry,
            sessions_active,
            records_dropped,
            usage_reports,
            monitor_reports,
            flow_activations,
            flow_activation_failures,
            flow_deactivations,
            flow_deactivation_failures,
            scheduled_activations_pending,
            terminations,
            reauth_answers,
            grants_applied,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_metrics_registry() {
        let metrics = Metrics::new().expect("metrics");
        metrics.sessions_active.set(3);
        metrics.records_dropped.inc();
        metrics
            .usage_reports
            .with_label_values(&["quota_exhausted"])
            .inc();
        metrics.flow_activations.inc();
        assert!(!metrics.gather().is_empty());
    }
}
