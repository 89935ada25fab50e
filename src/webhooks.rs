//! Outbound webhook dispatch.
//!
//! Terminal meeting events fan out as HTTP POSTs to every active
//! [`WebhookConfig`] subscribed to the event type. When a shared secret is
//! configured, the body is signed with HMAC-SHA256 and the hex digest sent
//! in `X-Webhook-Signature`. Delivery failures are logged and never affect
//! the meeting.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::bus::MeetingEvent;
use crate::store::MeetingStore;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Compute the hex signature for a payload under a shared secret.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Delivers meeting events to configured webhook endpoints.
pub struct WebhookDispatcher {
    store: Arc<dyn MeetingStore>,
    http: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn MeetingStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { store, http }
    }

    /// Deliver one event to every active hook subscribed to its type.
    pub async fn dispatch(&self, meeting_id: &str, event: &MeetingEvent) {
        let hooks = match self.store.list_active_webhooks().await {
            Ok(hooks) => hooks,
            Err(e) => {
                log::warn!("webhook dispatch skipped, store error: {e}");
                return;
            }
        };
        if hooks.is_empty() {
            return;
        }

        let event_type = event.event_type();
        let payload = serde_json::json!({
            "meeting_id": meeting_id,
            "event": event,
        });
        let body = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("webhook payload encoding failed: {e}");
                return;
            }
        };

        for hook in hooks {
            if !hook.events.iter().any(|e| e == event_type) {
                continue;
            }
            let mut request = self
                .http
                .post(&hook.url)
                .header("Content-Type", "application/json")
                .body(body.clone());
            if let Some(ref secret) = hook.secret {
                request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body));
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    log::warn!(
                        "webhook {} returned {} for {event_type}",
                        hook.url,
                        response.status()
                    );
                }
                Err(e) => {
                    log::warn!("webhook {} delivery failed: {e}", hook.url);
                }
            }
        }
    }
}
