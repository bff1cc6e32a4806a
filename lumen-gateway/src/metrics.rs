//! Aggregate counters and the Prometheus registry.
//!
//! Every successful mutation and every request bumps a counter here; the
//! `/metrics` route renders the registry as Prometheus text for private
//! peers, and `/wallet/usage` reads a couple of the aggregates.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    pub http_requests: IntCounterVec,
    pub ingests: IntCounter,
    pub ingest_bytes: IntCounter,
    pub pins: IntCounter,
    pub unpins: IntCounter,
    pub searches: IntCounter,
    pub views: IntCounter,
    pub webhook_deliveries: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new(
                "lumen_http_requests_total",
                "HTTP requests by route and status",
            ),
            &["route", "status"],
        )
        .expect("Valid metric opts");
        let ingests = IntCounter::new(
            "lumen_ingests_total",
            "Completed CAR imports",
        )
        .expect("Valid metric opts");
        let ingest_bytes = IntCounter::new(
            "lumen_ingest_bytes_total",
            "Bytes accepted by CAR ingest",
        )
        .expect("Valid metric opts");
        let pins = IntCounter::new("lumen_pins_total", "Successful pins")
            .expect("Valid metric opts");
        let unpins =
            IntCounter::new("lumen_unpins_total", "Successful unpins")
                .expect("Valid metric opts");
        let searches =
            IntCounter::new("lumen_searches_total", "Search requests")
                .expect("Valid metric opts");
        let views = IntCounter::new(
            "lumen_views_total",
            "Authenticated content views",
        )
        .expect("Valid metric opts");
        let webhook_deliveries = IntCounterVec::new(
            Opts::new(
                "lumen_webhook_deliveries_total",
                "Webhook delivery attempts by outcome",
            ),
            &["outcome"],
        )
        .expect("Valid metric opts");

        for collector in [
            Box::new(http_requests.clone())
                as Box<dyn prometheus::core::Collector>,
            Box::new(ingests.clone()),
            Box::new(ingest_bytes.clone()),
            Box::new(pins.clone()),
            Box::new(unpins.clone()),
            Box::new(searches.clone()),
            Box::new(views.clone()),
            Box::new(webhook_deliveries.clone()),
        ] {
            registry
                .register(collector)
                .expect("Metric names are unique");
        }

        Self {
            registry,
            http_requests,
            ingests,
            ingest_bytes,
            pins,
            unpins,
            searches,
            views,
            webhook_deliveries,
        }
    }

    pub fn record_ingest(&self, bytes: u64) {
        self.ingests.inc();
        self.ingest_bytes.inc_by(bytes);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) =
            encoder.encode(&self.registry.gather(), &mut buf)
        {
            tracing::error!("Failed to encode metrics: {e:#}");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_render() {
        let metrics = Metrics::new();
        metrics.record_ingest(1024);
        metrics.pins.inc();
        metrics
            .http_requests
            .with_label_values(&["/pin", "200"])
            .inc();

        let text = metrics.render();
        assert!(text.contains("lumen_ingests_total 1"));
        assert!(text.contains("lumen_ingest_bytes_total 1024"));
        assert!(text.contains("lumen_pins_total 1"));
        assert!(text.contains("lumen_http_requests_total"));
    }
}
