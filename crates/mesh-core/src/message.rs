//! The wire message model: package type ids (§3), the [`Message`] tagged
//! union over the known package kinds, and JSON encode/decode.
//!
//! Rather than leaning on `#[derive(Serialize, Deserialize)]` for one big
//! enum (which fights the "shared envelope fields + variant payload fields"
//! shape of the wire format), `Message` exposes explicit [`Message::encode`]
//! and [`Message::decode`] built on a small envelope struct. This mirrors the
//! source protocol's tagged-union replacement called for in the design notes:
//! a plain match over `type`, not virtual dispatch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MessageError;
use crate::node_id::NodeId;

/// Default wire size cap (§3): messages above this are rejected outright.
pub const DEFAULT_MESSAGE_CAP_BYTES: usize = 4096;

pub const TYPE_NODE_SYNC_REQUEST: u16 = 3;
pub const TYPE_NODE_SYNC_REPLY: u16 = 4;
pub const TYPE_TIME_SYNC: u16 = 5;
pub const TYPE_NODE_SYNC: u16 = 6;
pub const TYPE_TIME_DELAY: u16 = 7;
pub const TYPE_BROADCAST: u16 = 8;
pub const TYPE_SINGLE: u16 = 9;
/// OTA announce: always broadcast, carries no chunk payload (§4.7).
pub const TYPE_OTA_ANNOUNCE: u16 = 10;
/// OTA transfer: covers both DataRequest and Data; the two are
/// distinguished by the presence of the `data` field, matching how the
/// source layers DataRequest's fields as a strict subset of Data's.
pub const TYPE_OTA_TRANSFER: u16 = 11;
/// First type id reserved for user/plugin payloads (§4.6).
pub const TYPE_USER_MIN: u16 = 100;

/// `TIME_SYNC`'s three-phase exchange (§4.5) is encoded as a `phase` tag on
/// one message type rather than three distinct types, matching the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TimeSyncPhase {
    /// Child -> parent, carries `t0` only.
    Request = 0,
    /// Parent -> child, carries `t0`, `t1`, `t2`.
    Reply = 1,
}

/// Payload of a `TIME_SYNC` message at whichever phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncBody {
    pub phase: TimeSyncPhase,
    pub t0: u32,
    pub t1: Option<u32>,
    pub t2: Option<u32>,
}

/// Shared fields of an OTA announce/transfer (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaAnnouncePayload {
    pub role: String,
    pub hardware: String,
    pub md5: String,
    #[serde(rename = "noPart")]
    pub no_part: u32,
    pub forced: bool,
    pub broadcasted: bool,
    pub compressed: bool,
}

/// `OtaTransfer` layers `partNo` over an announce, and `data` over that
/// (present only for `Data`, absent for `DataRequest`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaTransferPayload {
    pub announce: OtaAnnouncePayload,
    pub part_no: u32,
    /// Base64-encoded chunk bytes. `None` means this is a DataRequest.
    pub data: Option<String>,
}

impl OtaTransferPayload {
    pub fn is_data(&self) -> bool {
        self.data.is_some()
    }
}

/// A decoded mesh message. Every variant carries `from`; `dest` is folded
/// into the accessor below since only some variants address one peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    NodeSyncRequest {
        from: NodeId,
        dest: NodeId,
        subtree: Vec<NodeId>,
    },
    NodeSyncReply {
        from: NodeId,
        dest: NodeId,
        subtree: Vec<NodeId>,
    },
    TimeSync {
        from: NodeId,
        dest: NodeId,
        body: TimeSyncBody,
    },
    NodeSync {
        from: NodeId,
        dest: NodeId,
        subtree: Vec<NodeId>,
        /// The lowest-NodeId root claimant known to be reachable through
        /// the sender, if any. Carrying the id (not just a `containsRoot`
        /// flag) is what lets a receiving node's root-conflict tie-break
        /// (§4.4, lowest NodeId wins) actually compare candidates.
        root_id: Option<NodeId>,
    },
    TimeDelay {
        from: NodeId,
        dest: NodeId,
        delay_micros: u32,
    },
    Broadcast {
        from: NodeId,
        payload: Value,
    },
    Single {
        from: NodeId,
        dest: NodeId,
        payload: Value,
    },
    OtaAnnounce {
        from: NodeId,
        announce: OtaAnnouncePayload,
    },
    OtaTransfer {
        from: NodeId,
        dest: NodeId,
        transfer: OtaTransferPayload,
    },
    /// Type id >= 100: opaque plugin payload, routed either broadcast
    /// (`dest.is_none()`) or single (`dest.is_some()`).
    User {
        from: NodeId,
        dest: Option<NodeId>,
        type_id: u16,
        payload: Value,
    },
}

impl Message {
    pub fn type_id(&self) -> u16 {
        match self {
            Message::NodeSyncRequest { .. } => TYPE_NODE_SYNC_REQUEST,
            Message::NodeSyncReply { .. } => TYPE_NODE_SYNC_REPLY,
            Message::TimeSync { .. } => TYPE_TIME_SYNC,
            Message::NodeSync { .. } => TYPE_NODE_SYNC,
            Message::TimeDelay { .. } => TYPE_TIME_DELAY,
            Message::Broadcast { .. } => TYPE_BROADCAST,
            Message::Single { .. } => TYPE_SINGLE,
            Message::OtaAnnounce { .. } => TYPE_OTA_ANNOUNCE,
            Message::OtaTransfer { .. } => TYPE_OTA_TRANSFER,
            Message::User { type_id, .. } => *type_id,
        }
    }

    pub fn from(&self) -> NodeId {
        match self {
            Message::NodeSyncRequest { from, .. }
            | Message::NodeSyncReply { from, .. }
            | Message::TimeSync { from, .. }
            | Message::NodeSync { from, .. }
            | Message::TimeDelay { from, .. }
            | Message::Broadcast { from, .. }
            | Message::Single { from, .. }
            | Message::OtaAnnounce { from, .. }
            | Message::OtaTransfer { from, .. }
            | Message::User { from, .. } => *from,
        }
    }

    /// `None` means flooded (§3 BROADCAST, or a user package sent without a
    /// destination).
    pub fn dest(&self) -> Option<NodeId> {
        match self {
            Message::NodeSyncRequest { dest, .. }
            | Message::NodeSyncReply { dest, .. }
            | Message::TimeSync { dest, .. }
            | Message::NodeSync { dest, .. }
            | Message::TimeDelay { dest, .. }
            | Message::Single { dest, .. }
            | Message::OtaTransfer { dest, .. } => Some(*dest),
            Message::Broadcast { .. } | Message::OtaAnnounce { .. } => None,
            Message::User { dest, .. } => *dest,
        }
    }

    /// Flooded to every reachable node exactly once, per §3/§4.3.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Message::Broadcast { .. } | Message::OtaAnnounce { .. })
            || matches!(self, Message::User { dest: None, .. })
    }

    /// Encode to the framed wire body (JSON, without the `\0` delimiters;
    /// those are mesh-buffer's responsibility). Rejects payloads above `cap`.
    pub fn encode(&self, cap: usize) -> Result<Vec<u8>, MessageError> {
        let value = self.to_json();
        let bytes = serde_json::to_vec(&value)?;
        if bytes.len() > cap {
            return Err(MessageError::TooLarge {
                cap,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Decode one JSON body (as produced by [`Message::encode`]).
    pub fn decode(bytes: &[u8], cap: usize) -> Result<Message, MessageError> {
        if bytes.len() > cap {
            return Err(MessageError::TooLarge {
                cap,
                actual: bytes.len(),
            });
        }
        let value: Value = serde_json::from_slice(bytes)?;
        Message::from_json(value)
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), Value::from(self.type_id()));
        map.insert("from".into(), Value::from(self.from().value()));
        if let Some(dest) = self.dest() {
            map.insert("dest".into(), Value::from(dest.value()));
        }
        match self {
            Message::NodeSyncRequest { subtree, .. } | Message::NodeSyncReply { subtree, .. } => {
                map.insert("subtree".into(), node_ids_to_value(subtree));
            }
            Message::NodeSync { subtree, root_id, .. } => {
                map.insert("subtree".into(), node_ids_to_value(subtree));
                if let Some(root_id) = root_id {
                    map.insert("rootId".into(), Value::from(root_id.value()));
                }
            }
            Message::TimeSync { body, .. } => {
                map.insert("phase".into(), Value::from(body.phase as u8));
                map.insert("t0".into(), Value::from(body.t0));
                if let Some(t1) = body.t1 {
                    map.insert("t1".into(), Value::from(t1));
                }
                if let Some(t2) = body.t2 {
                    map.insert("t2".into(), Value::from(t2));
                }
            }
            Message::TimeDelay { delay_micros, .. } => {
                map.insert("delay".into(), Value::from(*delay_micros));
            }
            Message::Broadcast { payload, .. } | Message::Single { payload, .. } => {
                merge_payload(&mut map, payload);
            }
            Message::OtaAnnounce { announce, .. } => {
                merge_announce(&mut map, announce);
            }
            Message::OtaTransfer { transfer, .. } => {
                merge_announce(&mut map, &transfer.announce);
                map.insert("partNo".into(), Value::from(transfer.part_no));
                if let Some(data) = &transfer.data {
                    map.insert("data".into(), Value::from(data.clone()));
                }
            }
            Message::User { payload, .. } => {
                merge_payload(&mut map, payload);
            }
        }
        Value::Object(map)
    }

    fn from_json(value: Value) -> Result<Message, MessageError> {
        let obj = value
            .as_object()
            .ok_or(MessageError::MissingField("type"))?;
        let type_id = obj
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(MessageError::MissingField("type"))? as u16;
        let from = NodeId::new(
            obj.get("from")
                .and_then(Value::as_u64)
                .ok_or(MessageError::MissingField("from"))? as u32,
        );
        let dest = obj
            .get("dest")
            .and_then(Value::as_u64)
            .map(|v| NodeId::new(v as u32));

        let require_dest = || dest.ok_or(MessageError::MissingField("dest"));

        match type_id {
            TYPE_NODE_SYNC_REQUEST | TYPE_NODE_SYNC_REPLY => {
                let subtree = parse_subtree(obj)?;
                let dest = require_dest()?;
                Ok(if type_id == TYPE_NODE_SYNC_REQUEST {
                    Message::NodeSyncRequest { from, dest, subtree }
                } else {
                    Message::NodeSyncReply { from, dest, subtree }
                })
            }
            TYPE_NODE_SYNC => Ok(Message::NodeSync {
                from,
                dest: require_dest()?,
                subtree: parse_subtree(obj)?,
                root_id: obj
                    .get("rootId")
                    .and_then(Value::as_u64)
                    .map(|v| NodeId::new(v as u32)),
            }),
            TYPE_TIME_SYNC => {
                let phase = match obj.get("phase").and_then(Value::as_u64) {
                    Some(0) => TimeSyncPhase::Request,
                    Some(1) => TimeSyncPhase::Reply,
                    _ => return Err(MessageError::MissingField("phase")),
                };
                let t0 = obj
                    .get("t0")
                    .and_then(Value::as_u64)
                    .ok_or(MessageError::MissingField("t0"))? as u32;
                let t1 = obj.get("t1").and_then(Value::as_u64).map(|v| v as u32);
                let t2 = obj.get("t2").and_then(Value::as_u64).map(|v| v as u32);
                Ok(Message::TimeSync {
                    from,
                    dest: require_dest()?,
                    body: TimeSyncBody { phase, t0, t1, t2 },
                })
            }
            TYPE_TIME_DELAY => Ok(Message::TimeDelay {
                from,
                dest: require_dest()?,
                delay_micros: obj
                    .get("delay")
                    .and_then(Value::as_u64)
                    .ok_or(MessageError::MissingField("delay"))? as u32,
            }),
            TYPE_BROADCAST => Ok(Message::Broadcast {
                from,
                payload: strip_envelope(obj),
            }),
            TYPE_SINGLE => Ok(Message::Single {
                from,
                dest: require_dest()?,
                payload: strip_envelope(obj),
            }),
            TYPE_OTA_ANNOUNCE => Ok(Message::OtaAnnounce {
                from,
                announce: parse_announce(obj)?,
            }),
            TYPE_OTA_TRANSFER => {
                let announce = parse_announce(obj)?;
                let part_no = obj
                    .get("partNo")
                    .and_then(Value::as_u64)
                    .ok_or(MessageError::MissingField("partNo"))? as u32;
                let data = obj
                    .get("data")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned);
                Ok(Message::OtaTransfer {
                    from,
                    dest: require_dest()?,
                    transfer: OtaTransferPayload {
                        announce,
                        part_no,
                        data,
                    },
                })
            }
            t if t >= TYPE_USER_MIN => Ok(Message::User {
                from,
                dest,
                type_id: t,
                payload: strip_envelope(obj),
            }),
            other => Err(MessageError::MissingField(type_name_hint(other))),
        }
    }
}

fn type_name_hint(_type_id: u16) -> &'static str {
    "type"
}

fn node_ids_to_value(ids: &[NodeId]) -> Value {
    Value::Array(ids.iter().map(|id| Value::from(id.value())).collect())
}

fn parse_subtree(obj: &Map<String, Value>) -> Result<Vec<NodeId>, MessageError> {
    let arr = obj
        .get("subtree")
        .and_then(Value::as_array)
        .ok_or(MessageError::MissingField("subtree"))?;
    Ok(arr
        .iter()
        .filter_map(Value::as_u64)
        .map(|v| NodeId::new(v as u32))
        .collect())
}

fn parse_announce(obj: &Map<String, Value>) -> Result<OtaAnnouncePayload, MessageError> {
    Ok(OtaAnnouncePayload {
        role: obj
            .get("role")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingField("role"))?
            .to_owned(),
        hardware: obj
            .get("hardware")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingField("hardware"))?
            .to_owned(),
        md5: obj
            .get("md5")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingField("md5"))?
            .to_owned(),
        no_part: obj
            .get("noPart")
            .and_then(Value::as_u64)
            .ok_or(MessageError::MissingField("noPart"))? as u32,
        forced: obj.get("forced").and_then(Value::as_bool).unwrap_or(false),
        broadcasted: obj
            .get("broadcasted")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        compressed: obj
            .get("compressed")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn merge_announce(map: &mut Map<String, Value>, announce: &OtaAnnouncePayload) {
    map.insert("role".into(), Value::from(announce.role.clone()));
    map.insert("hardware".into(), Value::from(announce.hardware.clone()));
    map.insert("md5".into(), Value::from(announce.md5.clone()));
    map.insert("noPart".into(), Value::from(announce.no_part));
    map.insert("forced".into(), Value::from(announce.forced));
    map.insert("broadcasted".into(), Value::from(announce.broadcasted));
    map.insert("compressed".into(), Value::from(announce.compressed));
}

fn merge_payload(map: &mut Map<String, Value>, payload: &Value) {
    if let Some(payload_obj) = payload.as_object() {
        for (k, v) in payload_obj {
            map.insert(k.clone(), v.clone());
        }
    }
}

/// Payload fields minus the envelope fields every message carries; used to
/// reconstruct the user-visible JSON object for BROADCAST/SINGLE/user types.
fn strip_envelope(obj: &Map<String, Value>) -> Value {
    let mut out = Map::new();
    for (k, v) in obj {
        if !matches!(k.as_str(), "type" | "from" | "dest") {
            out.insert(k.clone(), v.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_sync_request_roundtrips() {
        let msg = Message::NodeSyncRequest {
            from: NodeId::new(2),
            dest: NodeId::new(1),
            subtree: vec![NodeId::new(2)],
        };
        let bytes = msg.encode(DEFAULT_MESSAGE_CAP_BYTES).unwrap();
        let back = Message::decode(&bytes, DEFAULT_MESSAGE_CAP_BYTES).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn broadcast_has_no_dest() {
        let msg = Message::Broadcast {
            from: NodeId::new(2),
            payload: serde_json::json!({"hello": "world"}),
        };
        assert!(msg.dest().is_none());
        assert!(msg.is_broadcast());
        let bytes = msg.encode(DEFAULT_MESSAGE_CAP_BYTES).unwrap();
        let back = Message::decode(&bytes, DEFAULT_MESSAGE_CAP_BYTES).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn user_type_without_dest_is_broadcast() {
        let msg = Message::User {
            from: NodeId::new(3),
            dest: None,
            type_id: 150,
            payload: serde_json::json!({"x": 1}),
        };
        assert!(msg.is_broadcast());
    }

    #[test]
    fn oversize_message_is_rejected() {
        let huge = "x".repeat(DEFAULT_MESSAGE_CAP_BYTES * 2);
        let msg = Message::Single {
            from: NodeId::new(1),
            dest: NodeId::new(2),
            payload: serde_json::json!({"blob": huge}),
        };
        let err = msg.encode(DEFAULT_MESSAGE_CAP_BYTES).unwrap_err();
        assert!(matches!(err, MessageError::TooLarge { .. }));
    }

    #[test]
    fn ota_transfer_data_request_has_no_data_field() {
        let announce = OtaAnnouncePayload {
            role: "node".into(),
            hardware: "esp32".into(),
            md5: "abc123".into(),
            no_part: 10,
            forced: false,
            broadcasted: false,
            compressed: false,
        };
        let msg = Message::OtaTransfer {
            from: NodeId::new(2),
            dest: NodeId::new(1),
            transfer: OtaTransferPayload {
                announce,
                part_no: 3,
                data: None,
            },
        };
        let bytes = msg.encode(DEFAULT_MESSAGE_CAP_BYTES).unwrap();
        let back = Message::decode(&bytes, DEFAULT_MESSAGE_CAP_BYTES).unwrap();
        match back {
            Message::OtaTransfer { transfer, .. } => assert!(!transfer.is_data()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_core_type_below_user_range_is_rejected() {
        let value = serde_json::json!({"type": 42, "from": 1});
        let err = Message::from_json(value).unwrap_err();
        assert!(matches!(err, MessageError::MissingField(_)));
    }
}
