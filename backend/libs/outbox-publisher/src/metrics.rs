use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

/// Prometheus instrumentation for a publisher instance.
#[derive(Clone)]
pub struct PublisherMetrics {
    /// Outbox rows currently awaiting publication
    pub pending: IntGauge,
    /// Outbox rows drained after all processors succeeded
    pub published: IntCounter,
}

impl PublisherMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let pending = IntGauge::with_opts(
            Opts::new(
                "publish_pending_count",
                "Number of outbox rows currently pending publication",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for publish_pending_count");

        let published = IntCounter::with_opts(
            Opts::new(
                "publish_published_total",
                "Total number of outbox rows drained after successful processing",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for publish_published_total");

        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(published.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register publisher metric: {}", e);
            }
        }

        Self { pending, published }
    }
}
