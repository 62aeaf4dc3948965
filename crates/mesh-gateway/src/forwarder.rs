use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::dedup::DedupTable;
use crate::error::GatewayError;
use crate::payload::{GatewayAckPayload, GatewayDataPayload};

/// Seam over "deliver this request to the Internet". A real primary posts
/// through `reqwest`; tests substitute a scripted responder so the
/// forwarding/dedup/ack logic can be exercised without a network.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<u16, GatewayError>;
}

/// `reqwest`-backed sender (§4.8, §10.6): the gateway's one outbound HTTP
/// dependency, grounded the same way the source's own outbound-client code
/// constructs a bare `reqwest::Client`.
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl Default for ReqwestSender {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<u16, GatewayError> {
        let header = HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, header)
            .body(body)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

/// Primary-side half of the forwarding round trip (§4.8): relays
/// `GatewayData` requests over HTTP and builds the `GatewayAck` to send
/// back. Outbound requests are capped at `max_concurrent_http` in flight,
/// matching the spec's "concurrent outbound HTTP capped" note.
pub struct GatewayForwarder {
    sender: Box<dyn HttpSender>,
    dedup: DedupTable,
    concurrency: Arc<Semaphore>,
}

impl GatewayForwarder {
    pub fn new(config: &GatewayConfig) -> Self {
        Self::with_sender(config, Box::new(ReqwestSender::default()))
    }

    pub fn with_sender(config: &GatewayConfig, sender: Box<dyn HttpSender>) -> Self {
        Self {
            sender,
            dedup: DedupTable::new(config),
            concurrency: Arc::new(Semaphore::new(config.max_concurrent_http.max(1))),
        }
    }

    /// Handle an inbound `GatewayData` request. Returns `None` if this
    /// `(messageId, originNode)` pair was already forwarded (a duplicate
    /// reaching the primary via a second mesh path is dropped silently, not
    /// acked again) or the sender didn't ask for an ack; `Some(ack)`
    /// otherwise, whether or not the HTTP call itself succeeded.
    pub async fn handle(&self, data: &GatewayDataPayload, now_micros: u64) -> Option<GatewayAckPayload> {
        if self.dedup.seen(data.origin_node, data.message_id, now_micros) {
            info!(
                message_id = data.message_id,
                origin = %data.origin_node,
                "dropping duplicate gateway data"
            );
            return None;
        }

        let _permit = self.concurrency.acquire().await.expect("semaphore not closed");
        let ack = match self.forward(data).await {
            Ok(status) => GatewayAckPayload {
                message_id: data.message_id,
                success: (200..300).contains(&status),
                http_status: Some(status),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "gateway forward failed");
                GatewayAckPayload {
                    message_id: data.message_id,
                    success: false,
                    http_status: None,
                    error: Some(e.to_string()),
                }
            }
        };

        if data.requires_ack {
            Some(ack)
        } else {
            None
        }
    }

    async fn forward(&self, data: &GatewayDataPayload) -> Result<u16, GatewayError> {
        let body = data.decoded_payload()?;
        self.sender.post(&data.destination, &data.content_type, body).await
    }

    pub fn dedup_table_len(&self) -> usize {
        self.dedup.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::NodeId;
    use std::sync::Mutex;

    fn data(message_id: u64, origin: u32, requires_ack: bool) -> GatewayDataPayload {
        use base64::Engine;
        GatewayDataPayload {
            message_id,
            origin_node: NodeId::new(origin),
            destination: "https://example.com/hook".to_string(),
            content_type: "application/json".to_string(),
            payload_base64: base64::engine::general_purpose::STANDARD.encode(b"{}"),
            priority: crate::payload::GatewayPriority::Normal,
            requires_ack,
        }
    }

    struct ScriptedSender {
        results: Mutex<std::collections::VecDeque<Result<u16, GatewayError>>>,
    }

    #[async_trait]
    impl HttpSender for ScriptedSender {
        async fn post(&self, _url: &str, _content_type: &str, _body: Vec<u8>) -> Result<u16, GatewayError> {
            self.results.lock().unwrap().pop_front().expect("scripted response")
        }
    }

    #[tokio::test]
    async fn successful_forward_acks_success() {
        let sender = ScriptedSender {
            results: Mutex::new(vec![Ok(200)].into()),
        };
        let forwarder = GatewayForwarder::with_sender(&GatewayConfig::default(), Box::new(sender));
        let ack = forwarder.handle(&data(1, 9, true), 0).await.unwrap();
        assert!(ack.success);
        assert_eq!(ack.http_status, Some(200));
    }

    #[tokio::test]
    async fn http_error_acks_failure_with_message() {
        let sender = ScriptedSender {
            results: Mutex::new(vec![Err(GatewayError::Probe("connection refused".into()))].into()),
        };
        let forwarder = GatewayForwarder::with_sender(&GatewayConfig::default(), Box::new(sender));
        let ack = forwarder.handle(&data(1, 9, true), 0).await.unwrap();
        assert!(!ack.success);
        assert!(ack.error.is_some());
    }

    #[tokio::test]
    async fn request_without_requires_ack_produces_no_ack() {
        let sender = ScriptedSender {
            results: Mutex::new(vec![Ok(200)].into()),
        };
        let forwarder = GatewayForwarder::with_sender(&GatewayConfig::default(), Box::new(sender));
        let ack = forwarder.handle(&data(1, 9, false), 0).await;
        assert!(ack.is_none());
    }

    #[tokio::test]
    async fn duplicate_message_is_dropped_without_a_second_http_call() {
        let sender = ScriptedSender {
            results: Mutex::new(vec![Ok(200)].into()),
        };
        let forwarder = GatewayForwarder::with_sender(&GatewayConfig::default(), Box::new(sender));
        assert!(forwarder.handle(&data(1, 9, true), 0).await.is_some());
        // A second scripted response was never queued; a duplicate attempt
        // would panic this test on an empty queue if it reached the sender.
        assert!(forwarder.handle(&data(1, 9, true), 1_000).await.is_none());
    }
}
