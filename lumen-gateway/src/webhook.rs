//! Fire-and-forget webhook events.
//!
//! Every successful mutation posts `{event, ...fields}` to the configured
//! URL. Delivery is best-effort: failures are logged and counted, never
//! propagated to the request that triggered them.

use std::sync::Arc;

use lumen_tokio::task::LmTask;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct WebhookSender {
    url: Option<String>,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl WebhookSender {
    pub fn new(url: Option<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            metrics,
        }
    }

    /// Post `{event, ...payload}` without waiting for the result.
    pub fn send(&self, event: &'static str, payload: Value) {
        let Some(url) = self.url.clone() else {
            debug!(%event, "No webhook URL configured; dropping event");
            return;
        };

        let mut body = json!({ "event": event });
        if let (Some(obj), Some(extra)) =
            (body.as_object_mut(), payload.as_object())
        {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }

        let client = self.client.clone();
        let metrics = self.metrics.clone();
        LmTask::spawn_unnamed(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    metrics
                        .webhook_deliveries
                        .with_label_values(&["ok"])
                        .inc();
                }
                Ok(resp) => {
                    metrics
                        .webhook_deliveries
                        .with_label_values(&["bad_status"])
                        .inc();
                    warn!(
                        %event,
                        status = resp.status().as_u16(),
                        "Webhook delivery got non-success status"
                    );
                }
                Err(e) => {
                    metrics
                        .webhook_deliveries
                        .with_label_values(&["error"])
                        .inc();
                    warn!(%event, "Webhook delivery failed: {e:#}");
                }
            }
        })
        .detach();
    }
}
