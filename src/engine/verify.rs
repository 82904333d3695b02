//! Result verification
//!
//! Folds the per-target outcomes of one completed round into a single
//! logical result, in target-index order. The first mismatching target
//! decides the round; a byte count and an error are never reported
//! together.

use tracing::{debug, error, info};

use crate::error::Error;
use crate::target::TargetId;

use super::exchange::TargetOutcome;
use super::FileHandle;

/// Per-target record handed to the verifier after a round completed.
#[derive(Debug, Clone)]
pub(crate) struct RoundEntry {
    pub target: TargetId,
    pub target_index: usize,
    pub expected: u64,
    pub outcome: TargetOutcome,
}

/// Verdict for one read round.
#[derive(Debug)]
pub(crate) enum ReadRoundResult {
    /// Every target delivered in full; `usable` is the updated running
    /// total across rounds
    Complete { usable: u64 },

    /// A target delivered short: end of data. `total` is the final byte
    /// count of the whole call
    EndOfData { total: u64 },

    Failed(Error),
}

/// Fold one read round. `usable_before` is the byte total of all fully
/// delivered targets of earlier rounds.
pub(crate) fn verify_read(
    entries: &[RoundEntry],
    handle_id: &str,
    usable_before: u64,
) -> ReadRoundResult {
    let mut usable = usable_before;

    for entry in entries {
        match &entry.outcome {
            Ok(actual) if *actual == entry.expected => {
                usable += actual;
            }
            Ok(actual) => {
                // end of data; everything before this target arrived whole
                return ReadRoundResult::EndOfData {
                    total: usable + actual,
                };
            }
            Err(err) => {
                if *err == Error::Interrupted {
                    // normal on cancellation, not worth an error line
                    debug!(target = %entry.target, handle = handle_id, "read interrupted");
                } else {
                    error!(
                        target = %entry.target,
                        handle = handle_id,
                        error = %err,
                        "read failed on storage target"
                    );
                }
                return ReadRoundResult::Failed(err.clone());
            }
        }
    }

    ReadRoundResult::Complete { usable }
}

/// Verdict for one write round.
#[derive(Debug)]
pub(crate) enum WriteRoundResult {
    /// Every target accepted its full span
    Complete,

    /// A target accepted fewer bytes than expected (device full or
    /// similar); `round_written` counts this round's bytes up to and
    /// including the short target
    ShortWrite { round_written: u64 },

    Failed(Error),
}

/// Fold one write round and update the session's first-write bits.
///
/// Aborts on the first mismatch in target order: with a stripe count > 1
/// later targets may have been written, but that cannot be reported to
/// the caller.
pub(crate) fn verify_write(
    entries: &[RoundEntry],
    handle: &FileHandle,
    expected_total: u64,
) -> WriteRoundResult {
    for (i, entry) in entries.iter().enumerate() {
        match &entry.outcome {
            Ok(actual) if *actual == entry.expected => {
                handle.mark_first_write_done(entry.target_index);
            }
            Ok(actual) => {
                info!(
                    target = %entry.target,
                    wrote = actual,
                    expected = entry.expected,
                    handle = handle.id(),
                    "storage target wrote less than requested"
                );

                // subtract the shortfall plus every later target's expected
                // bytes; the caller only learns about bytes that are known
                // to be on stable targets
                let mut unwritten = entry.expected - actual;
                for later in &entries[i + 1..] {
                    unwritten += later.expected;
                }

                handle.mark_first_write_done(entry.target_index);
                return WriteRoundResult::ShortWrite {
                    round_written: expected_total - unwritten,
                };
            }
            Err(err) => {
                if *err == Error::Interrupted {
                    debug!(target = %entry.target, handle = handle.id(), "write interrupted");
                } else {
                    error!(
                        target = %entry.target,
                        handle = handle.id(),
                        error = %err,
                        "write failed on storage target"
                    );
                }
                return WriteRoundResult::Failed(err.clone());
            }
        }
    }

    WriteRoundResult::Complete
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::striping::{PatternKind, StripePattern};

    fn entry(index: usize, expected: u64, outcome: TargetOutcome) -> RoundEntry {
        RoundEntry {
            target: TargetId(index as u16 + 1),
            target_index: index,
            expected,
            outcome,
        }
    }

    fn handle(n: u16) -> FileHandle {
        let targets = (1..=n).map(TargetId).collect();
        let pattern = StripePattern::new(PatternKind::Raid0, 4096, targets).unwrap();
        FileHandle::new("h-1", pattern)
    }

    // =========================================================================
    // Read Verification
    // =========================================================================

    #[test]
    fn test_read_all_complete_sums_expected() {
        let entries = vec![
            entry(0, 4096, Ok(4096)),
            entry(1, 4096, Ok(4096)),
            entry(2, 100, Ok(100)),
        ];

        assert_matches!(
            verify_read(&entries, "h-1", 0),
            ReadRoundResult::Complete { usable: 8292 }
        );
    }

    #[test]
    fn test_read_accumulates_across_rounds() {
        let entries = vec![entry(0, 4096, Ok(4096))];

        assert_matches!(
            verify_read(&entries, "h-1", 10_000),
            ReadRoundResult::Complete { usable: 14_096 }
        );
    }

    #[test]
    fn test_read_short_target_is_end_of_data() {
        let entries = vec![
            entry(0, 4096, Ok(4096)),
            entry(1, 4096, Ok(100)),
            entry(2, 4096, Ok(4096)),
        ];

        // later targets' bytes are not usable past the end of data
        assert_matches!(
            verify_read(&entries, "h-1", 0),
            ReadRoundResult::EndOfData { total: 4196 }
        );
    }

    #[test]
    fn test_read_zero_length_stream_is_clean_eof() {
        let entries = vec![entry(0, 10, Ok(0))];

        assert_matches!(
            verify_read(&entries, "h-1", 0),
            ReadRoundResult::EndOfData { total: 0 }
        );
    }

    #[test]
    fn test_read_error_dominates_regardless_of_others() {
        let entries = vec![
            entry(0, 4096, Ok(4096)),
            entry(1, 4096, Err(Error::Communication)),
            entry(2, 4096, Ok(10)),
        ];

        assert_matches!(
            verify_read(&entries, "h-1", 0),
            ReadRoundResult::Failed(Error::Communication)
        );
    }

    #[test]
    fn test_read_first_offender_in_index_order_wins() {
        let entries = vec![
            entry(0, 4096, Err(Error::UnknownTarget)),
            entry(1, 4096, Err(Error::Communication)),
        ];

        assert_matches!(
            verify_read(&entries, "h-1", 0),
            ReadRoundResult::Failed(Error::UnknownTarget)
        );
    }

    // =========================================================================
    // Write Verification
    // =========================================================================

    #[test]
    fn test_write_complete_marks_session_bits() {
        let handle = handle(3);
        let entries = vec![
            entry(0, 4096, Ok(4096)),
            entry(1, 4096, Ok(4096)),
            entry(2, 64, Ok(64)),
        ];

        assert_matches!(
            verify_write(&entries, &handle, 8256),
            WriteRoundResult::Complete
        );
        assert!(handle.first_write_done(0));
        assert!(handle.first_write_done(1));
        assert!(handle.first_write_done(2));
    }

    #[test]
    fn test_write_short_subtracts_unattempted_targets() {
        let handle = handle(3);
        let entries = vec![
            entry(0, 4096, Ok(4096)),
            entry(1, 4096, Ok(1000)),
            entry(2, 4096, Ok(4096)),
        ];

        // 4096 (target 0) + 1000 (short target 1); target 2's bytes are
        // not reported even though it delivered
        assert_matches!(
            verify_write(&entries, &handle, 3 * 4096),
            WriteRoundResult::ShortWrite { round_written: 5096 }
        );

        // the short target still counts as written-to for session checks
        assert!(handle.first_write_done(0));
        assert!(handle.first_write_done(1));
        assert!(!handle.first_write_done(2));
    }

    #[test]
    fn test_write_error_dominates() {
        let handle = handle(3);
        let entries = vec![
            entry(0, 4096, Ok(4096)),
            entry(1, 4096, Err(Error::Interrupted)),
            entry(2, 4096, Ok(4096)),
        ];

        assert_matches!(
            verify_write(&entries, &handle, 3 * 4096),
            WriteRoundResult::Failed(Error::Interrupted)
        );
        assert!(handle.first_write_done(0));
        assert!(!handle.first_write_done(1));
    }
}
