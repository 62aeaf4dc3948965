//! Sender side of the OTA protocol (§4.7 "Sender state machine").

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use mesh_core::{Message, NodeId, OtaAnnouncePayload, OtaTransferPayload};
use tracing::instrument;

use crate::config::OtaConfig;
use crate::error::OtaError;

/// Supplies firmware bytes one chunk at a time, so the sender never has to
/// hold the whole image in memory. Mirrors §4.7's `loadChunk(partNo) →
/// bytes` callback.
pub trait ChunkSource: Send + Sync {
    fn load_chunk(&self, part_no: u32) -> Result<Vec<u8>, OtaError>;
}

/// An in-memory `ChunkSource` over a full image buffer, for tests and for
/// small embedded-style images where holding the whole thing in RAM is fine.
pub struct InMemoryChunkSource {
    image: Vec<u8>,
    chunk_size: usize,
}

impl InMemoryChunkSource {
    pub fn new(image: Vec<u8>, chunk_size: usize) -> Self {
        Self { image, chunk_size }
    }
}

impl ChunkSource for InMemoryChunkSource {
    fn load_chunk(&self, part_no: u32) -> Result<Vec<u8>, OtaError> {
        let start = part_no as usize * self.chunk_size;
        if start >= self.image.len() {
            return Err(OtaError::ChunkLoad {
                part_no,
                reason: "offset past end of image".into(),
            });
        }
        let end = (start + self.chunk_size).min(self.image.len());
        Ok(self.image[start..end].to_vec())
    }
}

/// Offers one firmware image to the mesh: periodically (re)announces it and
/// answers DataRequests while active.
pub struct OtaSender {
    announce: OtaAnnouncePayload,
    source: Box<dyn ChunkSource>,
    config: OtaConfig,
    next_announce_due_micros: u64,
    active: bool,
}

impl OtaSender {
    pub fn new(
        announce: OtaAnnouncePayload,
        source: Box<dyn ChunkSource>,
        config: OtaConfig,
        now_micros: u64,
    ) -> Self {
        Self {
            announce,
            source,
            config,
            next_announce_due_micros: now_micros,
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn md5(&self) -> &str {
        &self.announce.md5
    }

    /// Stop re-announcing. Already-issued Data chunks in flight are
    /// unaffected; the sender just goes quiet.
    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_announce_due(&self, now_micros: u64) -> bool {
        self.active && now_micros >= self.next_announce_due_micros
    }

    /// Build the (always-broadcast) Announce and reschedule the next one
    /// (§4.7: "periodically... broadcasts Announce until told to stop").
    pub fn build_announce(&mut self, from: NodeId, now_micros: u64) -> Message {
        self.next_announce_due_micros = now_micros + self.config.announce_interval_ms * 1_000;
        Message::OtaAnnounce {
            from,
            announce: self.announce.clone(),
        }
    }

    /// Answer a DataRequest, if it's for the firmware this sender is
    /// currently offering. Returns `Ok(None)` for a request naming a
    /// different md5 (not ours to answer, not an error).
    #[instrument(skip(self), fields(md5 = %self.announce.md5))]
    pub fn handle_request(
        &self,
        requester: NodeId,
        from: NodeId,
        transfer: &OtaTransferPayload,
    ) -> Result<Option<Message>, OtaError> {
        if transfer.announce.md5 != self.announce.md5 {
            return Ok(None);
        }
        let chunk = self.source.load_chunk(transfer.part_no)?;
        let data = STANDARD.encode(chunk);
        Ok(Some(Message::OtaTransfer {
            from,
            dest: requester,
            transfer: OtaTransferPayload {
                announce: self.announce.clone(),
                part_no: transfer.part_no,
                data: Some(data),
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announce(md5: &str) -> OtaAnnouncePayload {
        OtaAnnouncePayload {
            role: "node".into(),
            hardware: "esp32".into(),
            md5: md5.into(),
            no_part: 10,
            forced: false,
            broadcasted: false,
            compressed: false,
        }
    }

    fn request(md5: &str, part_no: u32) -> OtaTransferPayload {
        OtaTransferPayload {
            announce: announce(md5),
            part_no,
            data: None,
        }
    }

    #[test]
    fn announce_is_due_immediately_then_reschedules() {
        let source = InMemoryChunkSource::new(vec![0u8; 10_240], 1024);
        let mut sender = OtaSender::new(announce("abc"), Box::new(source), OtaConfig::default(), 0);
        assert!(sender.is_announce_due(0));
        sender.build_announce(NodeId::new(1), 0);
        assert!(!sender.is_announce_due(0));
        assert!(sender.is_announce_due(60_000_000));
    }

    #[test]
    fn stopped_sender_never_announces_again() {
        let source = InMemoryChunkSource::new(vec![0u8; 1024], 1024);
        let mut sender = OtaSender::new(announce("abc"), Box::new(source), OtaConfig::default(), 0);
        sender.stop();
        assert!(!sender.is_announce_due(1_000_000_000));
    }

    #[test]
    fn answers_matching_data_request_with_encoded_chunk() {
        let image = (0u8..=9).collect::<Vec<u8>>();
        let source = InMemoryChunkSource::new(image.clone(), 10);
        let sender = OtaSender::new(announce("abc"), Box::new(source), OtaConfig::default(), 0);
        let reply = sender
            .handle_request(NodeId::new(2), NodeId::new(1), &request("abc", 0))
            .unwrap()
            .unwrap();
        match reply {
            Message::OtaTransfer { transfer, dest, .. } => {
                assert_eq!(dest, NodeId::new(2));
                let decoded = STANDARD.decode(transfer.data.unwrap()).unwrap();
                assert_eq!(decoded, image);
            }
            _ => panic!("expected OtaTransfer"),
        }
    }

    #[test]
    fn ignores_request_for_a_different_firmware() {
        let source = InMemoryChunkSource::new(vec![0u8; 1024], 1024);
        let sender = OtaSender::new(announce("abc"), Box::new(source), OtaConfig::default(), 0);
        let reply = sender
            .handle_request(NodeId::new(2), NodeId::new(1), &request("different", 0))
            .unwrap();
        assert!(reply.is_none());
    }
}
