//! Striping layout
//!
//! Pure arithmetic mapping logical file offsets onto stripe targets, plus
//! the per-round planner that slices a byte range into chunk spans.

mod pattern;
mod plan;

#[cfg(test)]
mod proptest;

pub use pattern::{PatternKind, StripePattern};
pub use plan::{plan_round, ChunkSpan};
