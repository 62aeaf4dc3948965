//! Mesh-wide wrapping microsecond clock and the offset that keeps it in sync
//! with a node's parent (§4.5 of the design).

use std::sync::atomic::{AtomicI64, Ordering};

/// A 32-bit microsecond timestamp that wraps, matching the wire representation
/// used by TIME_SYNC and every other timestamped field on the mesh.
pub type MeshTimestamp = u32;

/// Source of monotonic local microseconds. Abstracted so tests can drive a
/// virtual clock instead of the OS clock (needed for P5's convergence proof).
pub trait Clock: Send + Sync {
    /// Monotonic microseconds since an arbitrary, implementation-chosen epoch.
    fn now_micros(&self) -> u64;
}

/// `Clock` backed by `std::time::Instant`, used outside of tests.
#[derive(Debug, Default)]
pub struct SystemClock {
    start: std::sync::OnceLock<std::time::Instant>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        let start = self.start.get_or_init(std::time::Instant::now);
        start.elapsed().as_micros() as u64
    }
}

/// A clock that can be advanced and offset by hand, for deterministic tests
/// of the time-sync convergence properties.
#[derive(Debug, Default)]
pub struct VirtualClock {
    micros: AtomicI64,
}

impl VirtualClock {
    pub fn new(start_micros: i64) -> Self {
        Self {
            micros: AtomicI64::new(start_micros),
        }
    }

    pub fn advance(&self, delta_micros: i64) {
        self.micros.fetch_add(delta_micros, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst).max(0) as u64
    }
}

/// `nodeTime() = localMicros() + offset`. `offset` is owned by time sync and
/// applied wholesale whenever a new measurement lands; `MeshClock` itself only
/// knows how to fold the two together and wrap to 32 bits.
pub struct MeshClock<C: Clock> {
    clock: C,
    offset_micros: AtomicI64,
}

impl<C: Clock> MeshClock<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            offset_micros: AtomicI64::new(0),
        }
    }

    /// The current mesh timestamp, matching painlessMesh's `nodeTime()`.
    /// Not guaranteed monotonic across an offset adjustment (§4.5).
    pub fn node_time(&self) -> MeshTimestamp {
        let local = self.clock.now_micros() as i64;
        let offset = self.offset_micros.load(Ordering::SeqCst);
        local.wrapping_add(offset) as u32
    }

    pub fn local_micros(&self) -> u64 {
        self.clock.now_micros()
    }

    pub fn offset_micros(&self) -> i64 {
        self.offset_micros.load(Ordering::SeqCst)
    }

    /// Replace the current offset. Time sync calls this after every
    /// successful three-phase exchange; it is a wholesale replace, not an
    /// incremental nudge, matching the source's offset-assignment semantics.
    pub fn set_offset_micros(&self, offset: i64) {
        self.offset_micros.store(offset, Ordering::SeqCst);
    }
}
