//! Receiver side of the OTA protocol (§4.7 "Receiver state machine").

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use mesh_core::{Message, NodeId, OtaAnnouncePayload, OtaTransferPayload};
use tracing::{debug, instrument, warn};

use crate::config::OtaConfig;
use crate::digest::md5_hex;
use crate::error::OtaError;
use crate::firmware::ChunkBitmap;
use crate::persistence::OtaReceiverSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaReceiverState {
    Idle,
    Downloading,
    Finalizing,
    Complete,
}

/// Side effect the façade must carry out after feeding the receiver an
/// event.
#[derive(Debug, Clone, PartialEq)]
pub enum OtaAction {
    /// Send a DataRequest for `part_no` to `dest` (§4.7: unicast sequential
    /// in unicast mode, stall-triggered fallback in broadcast mode).
    RequestChunk { dest: NodeId, message: Message },
    /// The image verified and should be committed (flip boot partition).
    Commit,
    /// md5 mismatch after finalize; state has already dropped back to idle.
    IntegrityFailed,
}

struct Download {
    announce: OtaAnnouncePayload,
    announcer: NodeId,
    image: Vec<u8>,
    bitmap: ChunkBitmap,
    bytes_written: usize,
    last_progress_micros: u64,
}

/// Downloads at most one firmware at a time, matching §5's "singleton flash
/// partition, one download in progress per receiver" resource constraint.
pub struct OtaReceiver {
    node_id: NodeId,
    role: String,
    hardware: String,
    config: OtaConfig,
    state: OtaReceiverState,
    download: Option<Download>,
}

impl OtaReceiver {
    pub fn new(
        node_id: NodeId,
        role: impl Into<String>,
        hardware: impl Into<String>,
        config: OtaConfig,
    ) -> Self {
        Self {
            node_id,
            role: role.into(),
            hardware: hardware.into(),
            config,
            state: OtaReceiverState::Idle,
            download: None,
        }
    }

    pub fn state(&self) -> OtaReceiverState {
        self.state
    }

    pub fn current_md5(&self) -> Option<&str> {
        self.download.as_ref().map(|d| d.announce.md5.as_str())
    }

    /// §4.7 idle -> downloading: a matching, newer (or forced) Announce.
    /// A repeat of the announce we're already downloading is a no-op; an
    /// announce for a different md5 while downloading restarts (§5: a new
    /// Announce with a different md5 cancels the old attempt).
    #[instrument(skip(self, announce), fields(role = %self.role, hardware = %self.hardware))]
    pub fn on_announce(
        &mut self,
        from: NodeId,
        announce: OtaAnnouncePayload,
        running_md5: &str,
        now_micros: u64,
    ) -> Vec<OtaAction> {
        if announce.role != self.role || announce.hardware != self.hardware {
            return Vec::new();
        }
        let already_current = !announce.forced && announce.md5 == running_md5;
        if already_current {
            return Vec::new();
        }
        if let Some(active) = &self.download {
            if active.announce.md5 == announce.md5 {
                return Vec::new(); // already in progress, idempotent
            }
        }

        debug!(md5 = %announce.md5, no_part = announce.no_part, "starting OTA download");
        let no_part = announce.no_part;
        let chunk_size = self.config.chunk_size_bytes;
        self.download = Some(Download {
            announce: announce.clone(),
            announcer: from,
            image: vec![0u8; no_part as usize * chunk_size],
            bitmap: ChunkBitmap::new(no_part),
            bytes_written: 0,
            last_progress_micros: now_micros,
        });
        self.state = OtaReceiverState::Downloading;

        if announce.broadcasted {
            // Passive: listen for the sender's own broadcast chunks first;
            // `tick` covers the stall fallback.
            Vec::new()
        } else {
            self.request_chunk(0).into_iter().collect()
        }
    }

    /// §4.7 downloading: a Data chunk arrives. Ignored if it's for a
    /// firmware we're not currently downloading (stray/stale traffic).
    #[instrument(skip(self, transfer), fields(part_no = transfer.part_no))]
    pub fn on_data(
        &mut self,
        transfer: OtaTransferPayload,
        now_micros: u64,
    ) -> Result<Vec<OtaAction>, OtaError> {
        let Some(data) = &transfer.data else {
            return Ok(Vec::new()); // a DataRequest, not Data; not our concern
        };
        let download = match &mut self.download {
            Some(d) if d.announce.md5 == transfer.announce.md5 => d,
            _ => return Ok(Vec::new()),
        };

        let bytes = STANDARD.decode(data)?;
        let offset = transfer.part_no as usize * self.config.chunk_size_bytes;
        let end = (offset + bytes.len()).min(download.image.len());
        if offset >= download.image.len() {
            return Err(OtaError::ChunkOutOfRange {
                part_no: transfer.part_no,
                no_part: download.bitmap.no_part(),
            });
        }
        download.image[offset..end].copy_from_slice(&bytes[..end - offset]);
        download.bitmap.mark_received(transfer.part_no)?;
        download.bytes_written += end - offset;
        download.last_progress_micros = now_micros;

        if download.bitmap.is_complete() {
            return Ok(self.finalize());
        }
        if !download.announce.broadcasted {
            let next = download.bitmap.first_missing();
            return Ok(match next {
                Some(part_no) => self.request_chunk(part_no).into_iter().collect(),
                None => Vec::new(),
            });
        }
        Ok(Vec::new())
    }

    /// §4.7 Failure semantics: in broadcast mode, recover missing chunks by
    /// falling back to unicast DataRequest after a stall.
    pub fn tick(&mut self, now_micros: u64) -> Vec<OtaAction> {
        let Some(download) = &mut self.download else {
            return Vec::new();
        };
        if self.state != OtaReceiverState::Downloading || !download.announce.broadcasted {
            return Vec::new();
        }
        let elapsed_ms = now_micros.saturating_sub(download.last_progress_micros) / 1_000;
        if elapsed_ms < self.config.stall_timeout_ms {
            return Vec::new();
        }
        download.last_progress_micros = now_micros; // avoid a request storm every tick
        let missing: Vec<u32> = download.bitmap.missing().collect();
        warn!(missing = missing.len(), "OTA broadcast stall, falling back to unicast requests");
        missing
            .into_iter()
            .filter_map(|part_no| self.request_chunk(part_no))
            .collect()
    }

    fn request_chunk(&self, part_no: u32) -> Option<OtaAction> {
        let download = self.download.as_ref()?;
        let message = Message::OtaTransfer {
            from: self.node_id,
            dest: download.announcer,
            transfer: OtaTransferPayload {
                announce: download.announce.clone(),
                part_no,
                data: None,
            },
        };
        Some(OtaAction::RequestChunk {
            dest: download.announcer,
            message,
        })
    }

    /// §4.7 Integrity: md5 is computed over the full assembled,
    /// *decompressed* image. The chunks received over the wire are the raw
    /// compressed stream sliced at `chunkSize` boundaries; decompression
    /// only happens once the whole stream has landed, matching "chunks are
    /// not individually checksummed."
    fn finalize(&mut self) -> Vec<OtaAction> {
        self.state = OtaReceiverState::Finalizing;
        let download = self.download.as_ref().expect("finalize called with no download");
        let assembled = &download.image[..download.bytes_written.min(download.image.len())];

        let decompressed = if download.announce.compressed {
            match decompress_gzip(assembled) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "OTA decompression failed");
                    self.state = OtaReceiverState::Idle;
                    self.download = None;
                    return vec![OtaAction::IntegrityFailed];
                }
            }
        } else {
            assembled.to_vec()
        };

        let actual = md5_hex(&decompressed);
        if actual == download.announce.md5 {
            self.state = OtaReceiverState::Complete;
            if download.announce.compressed {
                self.download.as_mut().expect("checked above").image = decompressed;
            }
            debug!(md5 = %actual, "OTA image verified");
            vec![OtaAction::Commit]
        } else {
            warn!(expected = %download.announce.md5, actual = %actual, "OTA integrity check failed");
            self.state = OtaReceiverState::Idle;
            self.download = None;
            vec![OtaAction::IntegrityFailed]
        }
    }

    /// The assembled image, once complete (for tests/persistence).
    pub fn image(&self) -> Option<&[u8]> {
        self.download.as_ref().map(|d| d.image.as_slice())
    }

    /// The assembled, decompressed image once `finalize` has run (for
    /// persistence handoff to the bootloader).
    pub fn snapshot(&self) -> Option<OtaReceiverSnapshot> {
        let download = self.download.as_ref()?;
        Some(OtaReceiverSnapshot {
            role: self.role.clone(),
            hardware: self.hardware.clone(),
            md5: download.announce.md5.clone(),
            no_part: download.bitmap.no_part(),
            bitmap: (0..download.bitmap.no_part())
                .map(|i| download.bitmap.is_received(i))
                .collect(),
            broadcasted: download.announce.broadcasted,
            compressed: download.announce.compressed,
            bytes_written: download.bytes_written,
        })
    }
}

fn decompress_gzip(bytes: &[u8]) -> Result<Vec<u8>, OtaError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| OtaError::Decompression(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn announce(md5: &str, no_part: u32, broadcasted: bool) -> OtaAnnouncePayload {
        OtaAnnouncePayload {
            role: "node".into(),
            hardware: "esp32".into(),
            md5: md5.into(),
            no_part,
            forced: false,
            broadcasted,
            compressed: false,
        }
    }

    fn data_payload(md5: &str, part_no: u32, bytes: &[u8], broadcasted: bool) -> OtaTransferPayload {
        OtaTransferPayload {
            announce: announce(md5, 3, broadcasted),
            part_no,
            data: Some(STANDARD.encode(bytes)),
        }
    }

    #[test]
    fn matching_announce_starts_unicast_download_with_first_request() {
        let mut receiver = OtaReceiver::new(NodeId::new(1), "node", "esp32", OtaConfig::default().with_chunk_size_bytes(4));
        let actions = receiver.on_announce(NodeId::new(9), announce("abc", 3, false), "old", 0);
        assert_eq!(receiver.state(), OtaReceiverState::Downloading);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], OtaAction::RequestChunk { dest, .. } if dest == NodeId::new(9)));
    }

    #[test]
    fn announce_for_already_running_firmware_is_ignored() {
        let mut receiver = OtaReceiver::new(NodeId::new(1), "node", "esp32", OtaConfig::default());
        let actions = receiver.on_announce(NodeId::new(9), announce("abc", 3, false), "abc", 0);
        assert!(actions.is_empty());
        assert_eq!(receiver.state(), OtaReceiverState::Idle);
    }

    #[test]
    fn announce_for_different_role_is_ignored() {
        let mut receiver = OtaReceiver::new(NodeId::new(1), "sensor", "esp32", OtaConfig::default());
        let actions = receiver.on_announce(NodeId::new(9), announce("abc", 3, false), "old", 0);
        assert!(actions.is_empty());
    }

    #[test]
    fn unicast_download_completes_and_verifies() {
        let chunks: Vec<Vec<u8>> = vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10, 11, 12]];
        let full_image: Vec<u8> = chunks.iter().flatten().copied().collect();
        let md5 = md5_hex(&full_image);

        let mut receiver = OtaReceiver::new(NodeId::new(1), "node", "esp32", OtaConfig::default().with_chunk_size_bytes(4));
        receiver.on_announce(NodeId::new(9), announce(&md5, 3, false), "old", 0);

        for (part_no, chunk) in chunks.iter().enumerate() {
            let payload = data_payload(&md5, part_no as u32, chunk, false);
            let actions = receiver.on_data(payload, (part_no as u64 + 1) * 1_000).unwrap();
            if part_no < chunks.len() - 1 {
                assert!(matches!(actions[0], OtaAction::RequestChunk { .. }));
            } else {
                assert_eq!(actions, vec![OtaAction::Commit]);
            }
        }
        assert_eq!(receiver.state(), OtaReceiverState::Complete);
        assert_eq!(receiver.image().unwrap(), full_image.as_slice());
    }

    #[test]
    fn integrity_mismatch_resets_to_idle() {
        let mut receiver = OtaReceiver::new(NodeId::new(1), "node", "esp32", OtaConfig::default().with_chunk_size_bytes(4));
        receiver.on_announce(NodeId::new(9), announce("bad-md5", 1, false), "old", 0);
        let payload = data_payload("bad-md5", 0, &[1, 2, 3, 4], false);
        let actions = receiver.on_data(payload, 1_000).unwrap();
        assert_eq!(actions, vec![OtaAction::IntegrityFailed]);
        assert_eq!(receiver.state(), OtaReceiverState::Idle);
    }

    #[test]
    fn compressed_download_decompresses_before_verifying() {
        let original: Vec<u8> = (0u8..64).collect();
        let compressed = gzip(&original);
        let md5 = md5_hex(&original);
        let chunk_size = 16;
        let chunks: Vec<&[u8]> = compressed.chunks(chunk_size).collect();
        let no_part = chunks.len() as u32;

        let mut receiver = OtaReceiver::new(NodeId::new(1), "node", "esp32", OtaConfig::default().with_chunk_size_bytes(chunk_size));
        let mut ann = announce(&md5, no_part, false);
        ann.compressed = true;
        receiver.on_announce(NodeId::new(9), ann.clone(), "old", 0);

        let mut last_actions = Vec::new();
        for (part_no, chunk) in chunks.iter().enumerate() {
            let payload = OtaTransferPayload {
                announce: ann.clone(),
                part_no: part_no as u32,
                data: Some(STANDARD.encode(chunk)),
            };
            last_actions = receiver.on_data(payload, (part_no as u64 + 1) * 1_000).unwrap();
        }

        assert_eq!(last_actions, vec![OtaAction::Commit]);
        assert_eq!(receiver.state(), OtaReceiverState::Complete);
        assert_eq!(receiver.image().unwrap(), original.as_slice());
    }

    #[test]
    fn broadcast_mode_stays_passive_until_stall() {
        let mut receiver =
            OtaReceiver::new(NodeId::new(1), "node", "esp32", OtaConfig::default().with_chunk_size_bytes(4).with_stall_timeout_ms(1_000));
        let actions = receiver.on_announce(NodeId::new(9), announce("abc", 3, true), "old", 0);
        assert!(actions.is_empty());
        assert!(receiver.tick(500_000).is_empty());
        let fallback = receiver.tick(1_000_001);
        assert_eq!(fallback.len(), 3); // all three chunks still missing
    }
}
