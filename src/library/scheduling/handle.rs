use std::fmt;

/// Opaque identifier of a registered job family
///
/// Packs the slot index of the family in the lower 32 bits and a generation tag in the upper 32 bits.
/// Generations are never reused while a scheduler is alive (and never zero), so a handle kept around
/// after its family was unregistered can not address an unrelated family that later reclaimed the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(u64);

impl JobHandle {
    /// Handle that never refers to a job family
    pub const INVALID: JobHandle = JobHandle(0);

    pub(super) fn new(generation: u32, slot: u32) -> Self {
        Self(((generation as u64) << 32) | slot as u64)
    }

    /// Generation tag assigned at registration
    pub fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Index into the scheduler's slot table
    pub fn slot(&self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    /// Whether the handle could refer to a family at all
    pub fn is_valid(&self) -> bool {
        self.generation() != 0
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.generation(), self.slot())
    }
}
