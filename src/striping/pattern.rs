//! Stripe pattern arithmetic
//!
//! A [`StripePattern`] describes how one logical file is spread across
//! storage targets: a power-of-two chunk size, an ordered target list, and
//! whether each list entry names a plain target or a buddy mirror group.
//!
//! All functions here are pure; the same inputs always yield the same
//! outputs, and nothing is cached between calls.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::target::TargetId;

/// Pattern type for a striped file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    /// Plain striping; each entry in the target list is a storage target
    Raid0,
    /// Mirrored striping; each entry is a buddy mirror group, resolved to
    /// a primary/secondary target pair at exchange time
    BuddyMirror,
}

/// Striping layout of one logical file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripePattern {
    kind: PatternKind,
    chunk_size: u64,
    targets: Vec<TargetId>,
}

impl StripePattern {
    /// Create a new pattern.
    ///
    /// `chunk_size` must be a power of two and `targets` non-empty; both
    /// are relied on by the offset arithmetic below.
    pub fn new(kind: PatternKind, chunk_size: u64, targets: Vec<TargetId>) -> Result<Self> {
        if chunk_size == 0 || !chunk_size.is_power_of_two() {
            return Err(Error::InvalidConfig(
                "chunk_size must be a power of two".into(),
            ));
        }
        if targets.is_empty() {
            return Err(Error::InvalidConfig(
                "pattern needs at least one target".into(),
            ));
        }
        Ok(Self {
            kind,
            chunk_size,
            targets,
        })
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Whether the target list names buddy mirror groups.
    pub fn is_mirrored(&self) -> bool {
        self.kind == PatternKind::BuddyMirror
    }

    /// Index of the target owning the stripe that contains `pos`.
    pub fn target_index(&self, pos: u64) -> usize {
        ((pos / self.chunk_size) % self.targets.len() as u64) as usize
    }

    /// Target (or mirror group) ID owning the stripe that contains `pos`.
    pub fn target_at(&self, index: usize) -> TargetId {
        self.targets[index]
    }

    /// Offset of the last byte in the same chunk as `pos`.
    pub fn chunk_end(&self, pos: u64) -> u64 {
        // chunk_size is a power of two, so the mask replaces a modulo
        pos | (self.chunk_size - 1)
    }

    /// Map a logical position to the offset inside the owning target's
    /// chunk file.
    ///
    /// `target_index` must be the index owning the stripe that contains
    /// `pos` (callers track it incrementally while planning a round).
    pub fn chunk_local_offset(&self, pos: u64, target_index: usize) -> u64 {
        debug_assert_eq!(target_index, self.target_index(pos));

        let num_targets = self.targets.len() as u64;
        let pos_mod_chunk = pos & (self.chunk_size - 1);
        let stripe_set_start = pos - pos_mod_chunk - target_index as u64 * self.chunk_size;

        // division fast path when the target count is a power of two
        let start_div_targets = if num_targets.is_power_of_two() {
            stripe_set_start >> num_targets.trailing_zeros()
        } else {
            stripe_set_start / num_targets
        };

        start_div_targets + pos_mod_chunk
    }
}
