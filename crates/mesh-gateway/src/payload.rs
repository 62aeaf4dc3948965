use mesh_core::{Message, NodeId};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Type ids for the gateway layer's plugin traffic (§4.8). The core
/// protocol fixes types 3–11; everything >= `TYPE_USER_MIN` is free for
/// plugin consumers, and the gateway claims a small range of its own here.
pub const TYPE_GATEWAY_HEARTBEAT: u16 = 110;
pub const TYPE_GATEWAY_DATA: u16 = 111;
pub const TYPE_GATEWAY_ACK: u16 = 112;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayPriority {
    Low,
    Normal,
    High,
}

impl Default for GatewayPriority {
    fn default() -> Self {
        GatewayPriority::Normal
    }
}

/// Broadcast by every gateway-capable node (§4.8). `participates` is not
/// named explicitly in the package table but is carried here so peers can
/// evaluate election eligibility from the heartbeat alone, without a side
/// channel; receivers that don't understand it simply ignore the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub is_primary: bool,
    pub has_internet: bool,
    pub router_rssi: i32,
    pub uptime_ms: u64,
    pub participates: bool,
}

impl HeartbeatPayload {
    pub fn to_message(&self, from: NodeId) -> Message {
        Message::User {
            from,
            dest: None,
            type_id: TYPE_GATEWAY_HEARTBEAT,
            payload: serde_json::to_value(self).expect("HeartbeatPayload always serializes"),
        }
    }

    pub fn from_message(msg: &Message) -> Result<Self, GatewayError> {
        match msg {
            Message::User { type_id, payload, .. } if *type_id == TYPE_GATEWAY_HEARTBEAT => {
                Ok(serde_json::from_value(payload.clone())?)
            }
            other => Err(GatewayError::WrongType(other.type_id())),
        }
    }
}

/// Unicast to the primary gateway, asking it to relay `payload` to
/// `destination` over the Internet (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayDataPayload {
    pub message_id: u64,
    pub origin_node: NodeId,
    pub destination: String,
    pub content_type: String,
    /// Base64-encoded request body, mirroring how OTA carries binary chunks
    /// over the JSON wire.
    pub payload_base64: String,
    pub priority: GatewayPriority,
    pub requires_ack: bool,
}

impl GatewayDataPayload {
    pub fn to_message(&self, from: NodeId, dest: NodeId) -> Message {
        Message::User {
            from,
            dest: Some(dest),
            type_id: TYPE_GATEWAY_DATA,
            payload: serde_json::to_value(self).expect("GatewayDataPayload always serializes"),
        }
    }

    pub fn from_message(msg: &Message) -> Result<Self, GatewayError> {
        match msg {
            Message::User { type_id, payload, .. } if *type_id == TYPE_GATEWAY_DATA => {
                Ok(serde_json::from_value(payload.clone())?)
            }
            other => Err(GatewayError::WrongType(other.type_id())),
        }
    }

    pub fn decoded_payload(&self) -> Result<Vec<u8>, GatewayError> {
        use base64::Engine;
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.payload_base64)?)
    }
}

/// Unicast back to the origin node once the primary has attempted the HTTP
/// request (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayAckPayload {
    pub message_id: u64,
    pub success: bool,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

impl GatewayAckPayload {
    pub fn to_message(&self, from: NodeId, dest: NodeId) -> Message {
        Message::User {
            from,
            dest: Some(dest),
            type_id: TYPE_GATEWAY_ACK,
            payload: serde_json::to_value(self).expect("GatewayAckPayload always serializes"),
        }
    }

    pub fn from_message(msg: &Message) -> Result<Self, GatewayError> {
        match msg {
            Message::User { type_id, payload, .. } if *type_id == TYPE_GATEWAY_ACK => {
                Ok(serde_json::from_value(payload.clone())?)
            }
            other => Err(GatewayError::WrongType(other.type_id())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_roundtrips_through_a_message() {
        let hb = HeartbeatPayload {
            is_primary: true,
            has_internet: true,
            router_rssi: -55,
            uptime_ms: 123_456,
            participates: true,
        };
        let msg = hb.to_message(NodeId::new(7));
        let back = HeartbeatPayload::from_message(&msg).unwrap();
        assert_eq!(back.router_rssi, -55);
        assert!(back.is_primary);
    }

    #[test]
    fn gateway_data_wrong_type_is_rejected() {
        let hb = HeartbeatPayload {
            is_primary: false,
            has_internet: false,
            router_rssi: 0,
            uptime_ms: 0,
            participates: true,
        };
        let msg = hb.to_message(NodeId::new(1));
        assert!(matches!(
            GatewayDataPayload::from_message(&msg),
            Err(GatewayError::WrongType(TYPE_GATEWAY_HEARTBEAT))
        ));
    }

    #[test]
    fn gateway_data_payload_base64_roundtrips() {
        let data = GatewayDataPayload {
            message_id: 42,
            origin_node: NodeId::new(3),
            destination: "https://example.com/hook".to_string(),
            content_type: "application/json".to_string(),
            payload_base64: {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(b"{\"ok\":true}")
            },
            priority: GatewayPriority::High,
            requires_ack: true,
        };
        let decoded = data.decoded_payload().unwrap();
        assert_eq!(decoded, b"{\"ok\":true}");
    }
}
