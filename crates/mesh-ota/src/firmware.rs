//! Firmware identity and the receive bitmap (§4.7).

use mesh_core::OtaAnnouncePayload;

/// A firmware is identified by `(role, hardware, md5)` (§4.7 Addressing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareId {
    pub role: String,
    pub hardware: String,
    pub md5: String,
}

impl FirmwareId {
    pub fn matches_target(&self, role: &str, hardware: &str) -> bool {
        self.role == role && self.hardware == hardware
    }
}

impl From<&OtaAnnouncePayload> for FirmwareId {
    fn from(announce: &OtaAnnouncePayload) -> Self {
        Self {
            role: announce.role.clone(),
            hardware: announce.hardware.clone(),
            md5: announce.md5.clone(),
        }
    }
}

/// Which chunks of the current download have landed. A plain `Vec<bool>`
/// rather than a packed bitset: `noPart` is small (an image of a few
/// hundred KiB at 1 KiB chunks is a few hundred entries), and this stays
/// trivially serde-serializable for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBitmap {
    received: Vec<bool>,
}

impl ChunkBitmap {
    pub fn new(no_part: u32) -> Self {
        Self {
            received: vec![false; no_part as usize],
        }
    }

    pub fn no_part(&self) -> u32 {
        self.received.len() as u32
    }

    pub fn mark_received(&mut self, part_no: u32) -> Result<(), crate::error::OtaError> {
        let idx = self.index(part_no)?;
        self.received[idx] = true;
        Ok(())
    }

    pub fn is_received(&self, part_no: u32) -> bool {
        self.received.get(part_no as usize).copied().unwrap_or(false)
    }

    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|&b| b)
    }

    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, &received)| !received)
            .map(|(idx, _)| idx as u32)
    }

    pub fn first_missing(&self) -> Option<u32> {
        self.missing().next()
    }

    fn index(&self, part_no: u32) -> Result<usize, crate::error::OtaError> {
        let idx = part_no as usize;
        if idx >= self.received.len() {
            return Err(crate::error::OtaError::ChunkOutOfRange {
                part_no,
                no_part: self.no_part(),
            });
        }
        Ok(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_incomplete() {
        let bitmap = ChunkBitmap::new(3);
        assert!(!bitmap.is_complete());
        assert_eq!(bitmap.first_missing(), Some(0));
    }

    #[test]
    fn marking_all_chunks_completes() {
        let mut bitmap = ChunkBitmap::new(3);
        for part in 0..3 {
            bitmap.mark_received(part).unwrap();
        }
        assert!(bitmap.is_complete());
        assert_eq!(bitmap.first_missing(), None);
    }

    #[test]
    fn out_of_range_chunk_is_rejected() {
        let mut bitmap = ChunkBitmap::new(3);
        assert!(bitmap.mark_received(5).is_err());
    }

    #[test]
    fn missing_lists_every_unreceived_chunk_in_order() {
        let mut bitmap = ChunkBitmap::new(4);
        bitmap.mark_received(1).unwrap();
        let missing: Vec<u32> = bitmap.missing().collect();
        assert_eq!(missing, vec![0, 2, 3]);
    }
}
