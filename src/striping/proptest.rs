//! Property-Based Tests for Stripe Arithmetic
//!
//! Uses proptest to verify the offset calculator across a wide range of
//! chunk sizes, target counts and positions.
//!
//! # Test Properties
//!
//! 1. **Periodicity**: target assignment repeats every full stripe set
//! 2. **Chunk coherence**: a position and its chunk end share a target
//! 3. **Idempotence**: the calculator is a pure function
//! 4. **Coverage**: a planned round covers the request without gaps

#![cfg(test)]

use proptest::prelude::*;

use super::{plan_round, PatternKind, StripePattern};
use crate::target::TargetId;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for power-of-two chunk sizes between 512B and 1MiB.
fn chunk_size_strategy() -> impl Strategy<Value = u64> {
    (9u32..=20).prop_map(|shift| 1u64 << shift)
}

/// Strategy for target counts, covering both power-of-two and odd counts.
fn target_count_strategy() -> impl Strategy<Value = u16> {
    1u16..=12
}

/// Strategy for logical file positions.
fn pos_strategy() -> impl Strategy<Value = u64> {
    0u64..1 << 40
}

fn pattern(chunk_size: u64, n: u16) -> StripePattern {
    let targets = (1..=n).map(TargetId).collect();
    StripePattern::new(PatternKind::Raid0, chunk_size, targets).unwrap()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: the target index is periodic with period
    /// `target_count * chunk_size`, for both index and local offset.
    #[test]
    fn prop_striping_is_periodic(
        chunk_size in chunk_size_strategy(),
        n in target_count_strategy(),
        pos in pos_strategy(),
        k in 1u64..8,
    ) {
        let pattern = pattern(chunk_size, n);
        let period = chunk_size * n as u64;

        let index = pattern.target_index(pos);
        prop_assert_eq!(index, pattern.target_index(pos + k * period));

        let local = pattern.chunk_local_offset(pos, index);
        let shifted = pattern.chunk_local_offset(pos + k * period, index);
        prop_assert_eq!(shifted, local + k * chunk_size);
    }

    /// Property: a position and the end of its chunk map to the same target.
    #[test]
    fn prop_chunk_end_shares_target(
        chunk_size in chunk_size_strategy(),
        n in target_count_strategy(),
        pos in pos_strategy(),
    ) {
        let pattern = pattern(chunk_size, n);
        let end = pattern.chunk_end(pos);

        prop_assert!(end >= pos);
        prop_assert!(end - pos < chunk_size);
        prop_assert_eq!(pattern.target_index(pos), pattern.target_index(end));
    }

    /// Property: the calculator has no hidden state.
    #[test]
    fn prop_calculator_is_idempotent(
        chunk_size in chunk_size_strategy(),
        n in target_count_strategy(),
        pos in pos_strategy(),
    ) {
        let pattern = pattern(chunk_size, n);
        let index = pattern.target_index(pos);

        prop_assert_eq!(
            pattern.chunk_local_offset(pos, index),
            pattern.chunk_local_offset(pos, index)
        );
    }

    /// Property: local offsets agree with the unoptimized formula for any
    /// target count, power of two or not.
    #[test]
    fn prop_local_offset_matches_reference(
        chunk_size in chunk_size_strategy(),
        n in target_count_strategy(),
        pos in pos_strategy(),
    ) {
        let pattern = pattern(chunk_size, n);
        let i = pattern.target_index(pos) as u64;

        let pos_mod = pos % chunk_size;
        let reference = (pos - pos_mod - i * chunk_size) / n as u64 + pos_mod;

        prop_assert_eq!(pattern.chunk_local_offset(pos, i as usize), reference);
    }

    /// Property: a planned round covers the request prefix contiguously,
    /// in increasing target-index order, without crossing chunk bounds.
    #[test]
    fn prop_plan_round_is_contiguous(
        chunk_size in chunk_size_strategy(),
        n in target_count_strategy(),
        pos in pos_strategy(),
        len in 1u64..1 << 22,
        fan_out in 1usize..8,
    ) {
        let pattern = pattern(chunk_size, n);
        let spans = plan_round(&pattern, pos, len, fan_out);

        prop_assert!(!spans.is_empty());
        prop_assert!(spans.len() <= fan_out);

        let covered: u64 = spans.iter().map(|s| s.len).sum();
        prop_assert!(covered <= len);
        if spans.len() < fan_out {
            prop_assert_eq!(covered, len);
        }

        let mut current = pos;
        let mut index = pattern.target_index(pos);
        for span in &spans {
            prop_assert_eq!(span.target_index, index);
            prop_assert_eq!(span.local_offset, pattern.chunk_local_offset(current, index));
            prop_assert!(span.len <= pattern.chunk_end(current) - current + 1);
            current += span.len;
            index = (index + 1) % n as usize;
        }
    }
}
