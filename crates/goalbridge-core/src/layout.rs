//! Byte-exact schema of the game's shared state block.
//!
//! ```text
//! offset  width   field
//!      0  u64     next collectible index
//!      8  u64     next sub-collectible index
//!     16  u64     next milestone index
//!     24  u32×101 checked collectibles
//!    428  u32×112 checked sub-collectibles
//!    876  u32×32  checked milestones
//!   1004  u8×16   received sub-collectibles (per level)
//!   1020  u8×32   received milestones
//!   1052  -       end marker
//! ```
//!
//! All integers are little-endian. Offsets are schema constants; nothing is
//! discovered at runtime except the block's base address.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::ids::{Category, LocalId};

pub const COUNTER_WIDTH: u64 = 8;
pub const ELEMENT_WIDTH: u64 = 4;

pub const NEXT_COLLECTIBLE_INDEX_OFFSET: u64 = 0;
pub const NEXT_SUBCOLLECTIBLE_INDEX_OFFSET: u64 = 8;
pub const NEXT_MILESTONE_INDEX_OFFSET: u64 = 16;

pub const COLLECTIBLES_CHECKED_OFFSET: u64 = 24;
pub const SUBCOLLECTIBLES_CHECKED_OFFSET: u64 = 428;
pub const MILESTONES_CHECKED_OFFSET: u64 = 876;

pub const SUBCOLLECTIBLES_RECEIVED_OFFSET: u64 = 1004;
pub const MILESTONES_RECEIVED_OFFSET: u64 = 1020;

pub const END_MARKER_OFFSET: u64 = 1052;

/// Milestone written when the final boss cutscene plays. Never a normal event.
pub const COMPLETION_SENTINEL: LocalId = 112;

/// Source of raw bytes addressed in the external process's address space.
pub trait MemorySource {
    /// Fill `buf` from `address`. Short or failed reads are a `MemoryReadFault`.
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<(), SyncError>;
}

impl<T: MemorySource + ?Sized> MemorySource for &T {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<(), SyncError> {
        (**self).read_bytes(address, buf)
    }
}

// ─── Checked arrays ───────────────────────────────────────────────

/// The three counter-prefixed arrays the poll agent scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckedArray {
    Collectibles,
    SubCollectibles,
    Milestones,
}

impl CheckedArray {
    /// Scan order.
    pub const ALL: [Self; 3] = [Self::Collectibles, Self::SubCollectibles, Self::Milestones];

    pub fn counter_offset(self) -> u64 {
        match self {
            Self::Collectibles => NEXT_COLLECTIBLE_INDEX_OFFSET,
            Self::SubCollectibles => NEXT_SUBCOLLECTIBLE_INDEX_OFFSET,
            Self::Milestones => NEXT_MILESTONE_INDEX_OFFSET,
        }
    }

    pub fn array_offset(self) -> u64 {
        match self {
            Self::Collectibles => COLLECTIBLES_CHECKED_OFFSET,
            Self::SubCollectibles => SUBCOLLECTIBLES_CHECKED_OFFSET,
            Self::Milestones => MILESTONES_CHECKED_OFFSET,
        }
    }

    fn array_end(self) -> u64 {
        match self {
            Self::Collectibles => SUBCOLLECTIBLES_CHECKED_OFFSET,
            Self::SubCollectibles => MILESTONES_CHECKED_OFFSET,
            Self::Milestones => SUBCOLLECTIBLES_RECEIVED_OFFSET,
        }
    }

    /// Number of elements that fit before the next field.
    pub fn capacity(self) -> u64 {
        (self.array_end() - self.array_offset()) / ELEMENT_WIDTH
    }

    pub fn category(self) -> Category {
        match self {
            Self::Collectibles => Category::Collectible,
            Self::SubCollectibles => Category::SubCollectible,
            Self::Milestones => Category::Milestone,
        }
    }
}

// ─── Snapshot ─────────────────────────────────────────────────────

/// One complete, consistent read of the checked arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSnapshot {
    pub collectibles: Vec<LocalId>,
    pub subcollectibles: Vec<LocalId>,
    pub milestones: Vec<LocalId>,
}

impl LayoutSnapshot {
    pub fn get(&self, array: CheckedArray) -> &[LocalId] {
        match array {
            CheckedArray::Collectibles => &self.collectibles,
            CheckedArray::SubCollectibles => &self.subcollectibles,
            CheckedArray::Milestones => &self.milestones,
        }
    }

    /// Render this snapshot as a state-block image as the game would lay it out.
    #[cfg(any(test, feature = "test-util"))]
    pub fn to_block_image(&self) -> Vec<u8> {
        let mut image = vec![0u8; END_MARKER_OFFSET as usize];
        for array in CheckedArray::ALL {
            let ids = self.get(array);
            let counter = array.counter_offset() as usize;
            image[counter..counter + 8].copy_from_slice(&(ids.len() as u64).to_le_bytes());
            let start = array.array_offset() as usize;
            let cap = usize::try_from(array.capacity()).unwrap_or(0);
            for (k, id) in ids.iter().take(cap).enumerate() {
                let at = start + k * 4;
                image[at..at + 4].copy_from_slice(&id.to_le_bytes());
            }
        }
        image
    }
}

// ─── Layout reader ────────────────────────────────────────────────

/// Typed reads over a state block located at `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    base: u64,
}

impl StateLayout {
    pub fn new(base: u64) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Read a checked-array counter.
    pub fn read_count(
        &self,
        src: &impl MemorySource,
        array: CheckedArray,
    ) -> Result<u64, SyncError> {
        let mut buf = [0u8; 8];
        src.read_bytes(self.base + array.counter_offset(), &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read the first `count` elements of a checked array in index order.
    pub fn read_checked(
        &self,
        src: &impl MemorySource,
        array: CheckedArray,
        count: u64,
    ) -> Result<Vec<LocalId>, SyncError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        // Validates the last index against capacity before any byte is read.
        self.element_address(array, count - 1)?;
        let len = usize::try_from(count * ELEMENT_WIDTH).map_err(|_| self.past_end(array, count))?;
        let mut buf = vec![0u8; len];
        src.read_bytes(self.base + array.array_offset(), &mut buf)?;
        Ok(buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Read all three counters, then all three arrays.
    ///
    /// Either the whole snapshot is returned or an error; nothing partial.
    pub fn scan(&self, src: &impl MemorySource) -> Result<LayoutSnapshot, SyncError> {
        let mut counts = [0u64; 3];
        for (slot, array) in counts.iter_mut().zip(CheckedArray::ALL) {
            *slot = self.read_count(src, array)?;
        }
        Ok(LayoutSnapshot {
            collectibles: self.read_checked(src, CheckedArray::Collectibles, counts[0])?,
            subcollectibles: self.read_checked(src, CheckedArray::SubCollectibles, counts[1])?,
            milestones: self.read_checked(src, CheckedArray::Milestones, counts[2])?,
        })
    }

    fn element_address(&self, array: CheckedArray, index: u64) -> Result<u64, SyncError> {
        if index >= array.capacity() {
            return Err(self.past_end(array, index));
        }
        Ok(self.base + array.array_offset() + index * ELEMENT_WIDTH)
    }

    fn past_end(&self, array: CheckedArray, index: u64) -> SyncError {
        SyncError::MemoryReadFault {
            address: self.base + array.array_offset() + index.saturating_mul(ELEMENT_WIDTH),
            detail: format!(
                "{} index {index} exceeds capacity {}",
                array.category(),
                array.capacity()
            ),
        }
    }
}

// ─── In-memory source ─────────────────────────────────────────────

/// A captured copy of process memory starting at `base`.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferSource {
    pub base: u64,
    pub bytes: Vec<u8>,
}

#[cfg(any(test, feature = "test-util"))]
impl BufferSource {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl MemorySource for BufferSource {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<(), SyncError> {
        let fault = |detail: &str| SyncError::MemoryReadFault {
            address,
            detail: detail.to_string(),
        };
        let start = address
            .checked_sub(self.base)
            .ok_or_else(|| fault("address below buffer"))?;
        let start = usize::try_from(start).map_err(|_| fault("address out of range"))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| fault("read past end of buffer"))?;
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x7f00_0000;

    fn source(snapshot: &LayoutSnapshot) -> BufferSource {
        BufferSource::new(BASE, snapshot.to_block_image())
    }

    #[test]
    fn capacities_follow_offsets() {
        assert_eq!(CheckedArray::Collectibles.capacity(), 101);
        assert_eq!(CheckedArray::SubCollectibles.capacity(), 112);
        assert_eq!(CheckedArray::Milestones.capacity(), 32);
    }

    #[test]
    fn received_arrays_end_at_marker() {
        assert_eq!(SUBCOLLECTIBLES_RECEIVED_OFFSET + 16, MILESTONES_RECEIVED_OFFSET);
        assert_eq!(MILESTONES_RECEIVED_OFFSET + 32, END_MARKER_OFFSET);
    }

    #[test]
    fn scan_reads_counts_and_arrays_in_order() {
        let snap = LayoutSnapshot {
            collectibles: vec![39, 41],
            subcollectibles: vec![262_197],
            milestones: vec![5, 112],
        };
        let layout = StateLayout::new(BASE);
        let read = layout.scan(&source(&snap)).expect("scan");
        assert_eq!(read, snap);
    }

    #[test]
    fn counters_are_little_endian_u64() {
        let mut image = LayoutSnapshot::default().to_block_image();
        image[8..16].copy_from_slice(&3u64.to_le_bytes());
        let src = BufferSource::new(BASE, image);
        let layout = StateLayout::new(BASE);
        assert_eq!(
            layout
                .read_count(&src, CheckedArray::SubCollectibles)
                .expect("count"),
            3
        );
    }

    #[test]
    fn elements_read_at_offset_plus_index_times_width() {
        let mut image = LayoutSnapshot::default().to_block_image();
        let third = (MILESTONES_CHECKED_OFFSET + 2 * ELEMENT_WIDTH) as usize;
        image[third..third + 4].copy_from_slice(&33u32.to_le_bytes());
        let src = BufferSource::new(BASE, image);
        let values = StateLayout::new(BASE)
            .read_checked(&src, CheckedArray::Milestones, 3)
            .expect("elements");
        assert_eq!(values, vec![0, 0, 33]);
    }

    #[test]
    fn count_past_capacity_is_fault() {
        let layout = StateLayout::new(BASE);
        let src = source(&LayoutSnapshot::default());
        assert!(layout.read_checked(&src, CheckedArray::Milestones, 32).is_ok());
        let err = layout
            .read_checked(&src, CheckedArray::Milestones, 33)
            .expect_err("past end");
        assert!(matches!(err, SyncError::MemoryReadFault { .. }));
    }

    #[test]
    fn counter_larger_than_capacity_faults_whole_scan() {
        let mut image = LayoutSnapshot {
            collectibles: vec![1, 2],
            ..Default::default()
        }
        .to_block_image();
        image[16..24].copy_from_slice(&33u64.to_le_bytes());
        let src = BufferSource::new(BASE, image);
        let err = StateLayout::new(BASE).scan(&src).expect_err("corrupt counter");
        assert!(matches!(err, SyncError::MemoryReadFault { .. }));
    }

    #[test]
    fn truncated_block_is_fault() {
        let image = LayoutSnapshot {
            collectibles: vec![1],
            ..Default::default()
        }
        .to_block_image();
        let src = BufferSource::new(BASE, image[..20].to_vec());
        let err = StateLayout::new(BASE).scan(&src).expect_err("short");
        assert!(err.is_connection_fault());
    }

    #[test]
    fn empty_block_scans_to_empty_snapshot() {
        let src = source(&LayoutSnapshot::default());
        let read = StateLayout::new(BASE).scan(&src).expect("scan");
        assert_eq!(read, LayoutSnapshot::default());
    }
}
