use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use mesh_core::{Message, NodeId};
use tracing::warn;

use crate::config::GatewayConfig;
use crate::forwarder::{HttpSender, ReqwestSender};
use crate::payload::{GatewayAckPayload, GatewayDataPayload, GatewayPriority};

/// Outcome delivered to the caller's `sendToInternet` callback (§4.8).
#[derive(Debug, Clone)]
pub struct GatewaySendResult {
    pub success: bool,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

pub type GatewayCallback = Box<dyn FnOnce(GatewaySendResult) + Send + 'static>;

struct Pending {
    callback: GatewayCallback,
    deadline_micros: u64,
}

/// Origin-side API for `sendToInternet` (§4.8): mints a globally unique
/// message id from `(nodeId, counter)`, and either serves the request
/// directly (this node already has Internet) or hands a `GatewayData`
/// message back to the caller to route to the elected primary, tracking
/// the callback until a `GatewayAck` arrives or the ack timeout fires.
pub struct GatewayClient {
    node_id: NodeId,
    config: GatewayConfig,
    sender: Box<dyn HttpSender>,
    counter: AtomicU32,
    pending: Mutex<HashMap<u64, Pending>>,
}

impl GatewayClient {
    pub fn new(node_id: NodeId, config: GatewayConfig) -> Self {
        Self::with_sender(node_id, config, Box::new(ReqwestSender::default()))
    }

    pub fn with_sender(node_id: NodeId, config: GatewayConfig, sender: Box<dyn HttpSender>) -> Self {
        Self {
            node_id,
            config,
            sender,
            counter: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn next_message_id(&self) -> u64 {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        ((self.node_id.value() as u64) << 32) | counter as u64
    }

    /// Queue a request, returning its message id and, when this node must
    /// hand the request off to the primary, the `GatewayData` message the
    /// caller should route through the mesh. `available` and `primary`
    /// reflect this node's current view of Internet reachability and the
    /// elected gateway: that state is owned by the facade since it's
    /// shared with the health checker and election.
    pub async fn send_to_internet(
        &self,
        destination: impl Into<String>,
        content_type: impl Into<String>,
        body: Vec<u8>,
        priority: GatewayPriority,
        callback: GatewayCallback,
        available: bool,
        primary: Option<NodeId>,
        now_micros: u64,
    ) -> (u64, Option<Message>) {
        let message_id = self.next_message_id();
        let destination = destination.into();
        let content_type = content_type.into();

        if available {
            let result = match self.sender.post(&destination, &content_type, body).await {
                Ok(status) => GatewaySendResult {
                    success: (200..300).contains(&status),
                    http_status: Some(status),
                    error: None,
                },
                Err(e) => GatewaySendResult {
                    success: false,
                    http_status: None,
                    error: Some(e.to_string()),
                },
            };
            callback(result);
            return (message_id, None);
        }

        let Some(primary) = primary else {
            callback(GatewaySendResult {
                success: false,
                http_status: None,
                error: Some("no-primary".to_string()),
            });
            return (message_id, None);
        };

        use base64::Engine;
        let data = GatewayDataPayload {
            message_id,
            origin_node: self.node_id,
            destination,
            content_type,
            payload_base64: base64::engine::general_purpose::STANDARD.encode(&body),
            priority,
            requires_ack: true,
        };
        let message = data.to_message(self.node_id, primary);

        self.pending.lock().unwrap().insert(
            message_id,
            Pending {
                callback,
                deadline_micros: now_micros + self.config.ack_timeout_ms * 1000,
            },
        );

        (message_id, Some(message))
    }

    pub fn on_ack(&self, ack: &GatewayAckPayload) {
        if let Some(pending) = self.pending.lock().unwrap().remove(&ack.message_id) {
            (pending.callback)(GatewaySendResult {
                success: ack.success,
                http_status: ack.http_status,
                error: ack.error.clone(),
            });
        }
    }

    /// Fire `ack-timeout` for every request that has outlived
    /// `ack_timeout_ms` without a reply.
    pub fn tick(&self, now_micros: u64) {
        let expired: Vec<u64> = {
            let pending = self.pending.lock().unwrap();
            pending
                .iter()
                .filter(|(_, p)| now_micros >= p.deadline_micros)
                .map(|(id, _)| *id)
                .collect()
        };
        for message_id in expired {
            if let Some(pending) = self.pending.lock().unwrap().remove(&message_id) {
                warn!(message_id, "gateway request timed out waiting for ack");
                (pending.callback)(GatewaySendResult {
                    success: false,
                    http_status: None,
                    error: Some("ack-timeout".to_string()),
                });
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct ScriptedSender {
        result: Mutex<Option<Result<u16, GatewayError>>>,
    }

    #[async_trait]
    impl HttpSender for ScriptedSender {
        async fn post(&self, _url: &str, _content_type: &str, _body: Vec<u8>) -> Result<u16, GatewayError> {
            self.result.lock().unwrap().take().expect("scripted response")
        }
    }

    #[tokio::test]
    async fn direct_path_performs_the_request_when_available() {
        let sender = ScriptedSender {
            result: Mutex::new(Some(Ok(200))),
        };
        let client = GatewayClient::with_sender(NodeId::new(1), GatewayConfig::default(), Box::new(sender));
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let (_, action) = client
            .send_to_internet(
                "https://example.com",
                "application/json",
                b"{}".to_vec(),
                GatewayPriority::Normal,
                Box::new(move |r| {
                    assert!(r.success);
                    assert_eq!(r.http_status, Some(200));
                    fired2.store(true, Ordering::SeqCst);
                }),
                true,
                None,
                0,
            )
            .await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(action.is_none());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_without_primary_fails_immediately() {
        let client = GatewayClient::new(NodeId::new(1), GatewayConfig::default());
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let (_, action) = client
            .send_to_internet(
                "https://example.com",
                "application/json",
                b"{}".to_vec(),
                GatewayPriority::Normal,
                Box::new(move |r| {
                    assert!(!r.success);
                    assert_eq!(r.error.as_deref(), Some("no-primary"));
                    fired2.store(true, Ordering::SeqCst);
                }),
                false,
                None,
                0,
            )
            .await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(action.is_none());
    }

    #[tokio::test]
    async fn unavailable_with_primary_forwards_and_tracks_pending() {
        let client = GatewayClient::new(NodeId::new(1), GatewayConfig::default());
        let (message_id, action) = client
            .send_to_internet(
                "https://example.com",
                "application/json",
                b"{}".to_vec(),
                GatewayPriority::Normal,
                Box::new(|_| {}),
                false,
                Some(NodeId::new(2)),
                0,
            )
            .await;
        assert!(action.is_some());
        assert_eq!(client.pending_count(), 1);

        let ack = GatewayAckPayload {
            message_id,
            success: true,
            http_status: Some(200),
            error: None,
        };
        client.on_ack(&ack);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn ack_timeout_fires_when_no_reply_arrives() {
        let config = GatewayConfig::default().with_ack_timeout_ms(1_000);
        let client = GatewayClient::new(NodeId::new(1), config);
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        client
            .send_to_internet(
                "https://example.com",
                "application/json",
                b"{}".to_vec(),
                GatewayPriority::Normal,
                Box::new(move |r| {
                    assert!(!r.success);
                    assert_eq!(r.error.as_deref(), Some("ack-timeout"));
                    fired2.store(true, Ordering::SeqCst);
                }),
                false,
                Some(NodeId::new(2)),
                0,
            )
            .await;
        client.tick(500_000);
        assert!(!fired.load(Ordering::SeqCst));
        client.tick(1_000_001);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn message_ids_are_unique_per_node() {
        let client = GatewayClient::new(NodeId::new(7), GatewayConfig::default());
        let (a, _) = client
            .send_to_internet(
                "https://example.com",
                "application/json",
                vec![],
                GatewayPriority::Normal,
                Box::new(|_| {}),
                false,
                Some(NodeId::new(2)),
                0,
            )
            .await;
        let (b, _) = client
            .send_to_internet(
                "https://example.com",
                "application/json",
                vec![],
                GatewayPriority::Normal,
                Box::new(|_| {}),
                false,
                Some(NodeId::new(2)),
                0,
            )
            .await;
        assert_ne!(a, b);
        assert_eq!(a >> 32, 7);
        assert_eq!(b >> 32, 7);
    }
}
