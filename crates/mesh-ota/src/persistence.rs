//! Per-receiver OTA persistence (§4.7 Persistence): "opaque blob, rewritten
//! after each successful chunk commit" so an interrupted download resumes
//! after a reboot. The wire format of the blob is not normative; only its
//! fields are. The actual storage medium (flash, a file, ...) is a façade
//! concern, so this crate only defines the snapshot shape and a trait seam.

use serde::{Deserialize, Serialize};

use crate::error::OtaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaReceiverSnapshot {
    pub role: String,
    pub hardware: String,
    pub md5: String,
    pub no_part: u32,
    pub bitmap: Vec<bool>,
    pub broadcasted: bool,
    pub compressed: bool,
    pub bytes_written: usize,
}

/// Storage seam for receiver OTA state. A production embedding backs this
/// with flash or a file; tests use [`InMemoryOtaStore`].
pub trait OtaStore: Send + Sync {
    fn save(&self, snapshot: &OtaReceiverSnapshot) -> Result<(), OtaError>;
    fn load(&self) -> Result<Option<OtaReceiverSnapshot>, OtaError>;
    fn clear(&self) -> Result<(), OtaError>;
}

#[derive(Default)]
pub struct InMemoryOtaStore {
    slot: std::sync::Mutex<Option<OtaReceiverSnapshot>>,
}

impl InMemoryOtaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OtaStore for InMemoryOtaStore {
    fn save(&self, snapshot: &OtaReceiverSnapshot) -> Result<(), OtaError> {
        let mut slot = self.slot.lock().map_err(|_| OtaError::Persistence("poisoned lock".into()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<OtaReceiverSnapshot>, OtaError> {
        let slot = self.slot.lock().map_err(|_| OtaError::Persistence("poisoned lock".into()))?;
        Ok(slot.clone())
    }

    fn clear(&self) -> Result<(), OtaError> {
        let mut slot = self.slot.lock().map_err(|_| OtaError::Persistence("poisoned lock".into()))?;
        *slot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> OtaReceiverSnapshot {
        OtaReceiverSnapshot {
            role: "node".into(),
            hardware: "esp32".into(),
            md5: "abc".into(),
            no_part: 3,
            bitmap: vec![true, false, false],
            broadcasted: false,
            compressed: false,
            bytes_written: 1024,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let store = InMemoryOtaStore::new();
        store.save(&snapshot()).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot()));
    }

    #[test]
    fn clear_empties_the_slot() {
        let store = InMemoryOtaStore::new();
        store.save(&snapshot()).unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
