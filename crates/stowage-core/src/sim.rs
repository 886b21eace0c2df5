//! Clock and determinism fingerprint.

use std::hash::Hasher;

use crate::fixed::{SimTime, Weight};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// The single global clock of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimClock {
    /// Time reached by the last completed tick.
    pub time: SimTime,
    /// Number of completed ticks.
    pub ticks: u64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// Order-sensitive FNV-1a fingerprint of kernel state.
///
/// Integer feeds are little-endian regardless of host, so two machines
/// running the same seed agree on the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(u64);

impl StateHash {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    pub fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    /// Times and positions go in by bit pattern, so `-0.0 != 0.0`.
    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    pub fn write_weight(&mut self, v: Weight) {
        self.write_i64(v.to_bits());
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for StateHash {
    fn write(&mut self, bytes: &[u8]) {
        self.0 = bytes
            .iter()
            .fold(self.0, |h, &b| (h ^ u64::from(b)).wrapping_mul(Self::PRIME));
    }

    fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
