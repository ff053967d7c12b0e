//! Frame identifiers and the modular space they live in.
//!
//! Identifiers travel as `u16` but may be restricted to a narrower space of
//! `2^bits` values. Ordering between two identifiers is only meaningful as a
//! signed distance modulo the space size, so `<` on the raw integers is never
//! used to decide which frame is newer.

use crate::constants::{DEFAULT_ID_BITS, MAX_ID_BITS, MIN_ID_BITS};

pub type FrameId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIdSpace {
    bits: u8,
}

impl Default for FrameIdSpace {
    fn default() -> Self {
        Self {
            bits: DEFAULT_ID_BITS,
        }
    }
}

impl FrameIdSpace {
    /// Returns `None` unless `2 <= bits <= 16`. A single bit leaves no
    /// identifier strictly newer than another.
    pub fn new(bits: u8) -> Option<Self> {
        (MIN_ID_BITS..=MAX_ID_BITS).contains(&bits).then_some(Self { bits })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    fn mask(&self) -> u32 {
        (1u32 << self.bits) - 1
    }

    /// Half the space; no id is newer than another by this much or more.
    pub fn half(&self) -> u32 {
        1u32 << (self.bits - 1)
    }

    pub fn max_id(&self) -> FrameId {
        self.mask() as FrameId
    }

    pub fn contains(&self, id: FrameId) -> bool {
        u32::from(id) <= self.mask()
    }

    pub fn next(&self, id: FrameId) -> FrameId {
        self.add(id, 1)
    }

    pub fn add(&self, id: FrameId, offset: u16) -> FrameId {
        ((u32::from(id) + u32::from(offset)) & self.mask()) as FrameId
    }

    pub fn sub(&self, id: FrameId, offset: u16) -> FrameId {
        (u32::from(id).wrapping_sub(u32::from(offset)) & self.mask()) as FrameId
    }

    /// Forward distance from `from` to `to`, modulo the space.
    pub fn distance(&self, from: FrameId, to: FrameId) -> u32 {
        u32::from(to).wrapping_sub(u32::from(from)) & self.mask()
    }

    /// `candidate` is newer than `reference` iff it is reachable by a forward
    /// step shorter than half the space. The exact half-way point counts as
    /// older.
    pub fn is_newer(&self, candidate: FrameId, reference: FrameId) -> bool {
        let d = self.distance(reference, candidate);
        d != 0 && d < self.half()
    }
}
