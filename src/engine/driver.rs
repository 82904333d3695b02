//! Parallel round driver
//!
//! Single-threaded and cooperative: one call drives every exchange of a
//! stripe-set round to completion. Each pass steps all non-terminal
//! exchanges once (with in-pass stage cascades), then either waits on the
//! round's readiness set or, when every surviving exchange is stalled on a
//! retryable error, consults the retry policy.
//!
//! The wait uses a zero timeout while any exchange still has non-blocking
//! work to do, so the CPU is only yielded when nothing else can progress.
//! A wait expiry or failure cancels every waiting exchange.

use std::time::Duration;

use tracing::{debug, error};

use crate::conn::PollOutcome;
use crate::error::Error;

use super::exchange::{step_pass, Direction, Exchange, RoundContext, RoundState, Stage};
use super::retry;

/// Drive all exchanges of one round to `Done`.
///
/// This function cannot fail; per-target results are read from the
/// exchanges afterwards.
pub(crate) fn communicate<'t, D: Direction>(
    ctx: &RoundContext<'t>,
    exchanges: &mut [Exchange<'t, D>],
    seq: u64,
) {
    let mut round = RoundState::new(exchanges.len(), ctx.config, seq);
    ctx.stats.record_round();

    let span = tracing::debug_span!("stripe_set", seq);
    let _enter = span.enter();

    while round.done < round.total {
        round.unconnectable = 0;
        round.poll_entries.clear();

        if ctx.cancel.is_cancelled() {
            cancel_in_flight(exchanges, &mut round);
        }

        for i in 0..exchanges.len() {
            step_pass(&mut exchanges[i], ctx, &mut round);
        }

        let waiting = round.poll_entries.len();
        debug_assert!(
            waiting + round.retry_waiters + round.done + round.unconnectable <= round.total,
            "round counters exceed exchange count"
        );

        if waiting > 0 {
            poll_wait(ctx, exchanges, &mut round);
        } else if round.retry_waiters > 0 && round.done + round.retry_waiters == round.total {
            // every survivor is stalled on a retryable error
            retry::start_retry(ctx, exchanges, &mut round);
        }
    }
}

/// Route in-flight exchanges to their error paths after cancellation.
///
/// Exchanges holding a live network operation classify through the
/// exception path; idle ones finalize directly with an interrupted
/// outcome. No further retries are scheduled either way.
fn cancel_in_flight<'t, D: Direction>(exchanges: &mut [Exchange<'t, D>], round: &mut RoundState) {
    for ex in exchanges.iter_mut() {
        match ex.stage {
            stage if stage.is_transfer() => {
                ex.stage = Stage::SocketException;
            }
            Stage::Prepare => {
                ex.outcome = Err(Error::Interrupted);
                ex.stage = Stage::Cleanup;
            }
            Stage::RetryWait => {
                round.retry_waiters -= 1;
                ex.outcome = Err(Error::Interrupted);
                ex.stage = Stage::Cleanup;
            }
            _ => {}
        }
    }
}

/// Block on the round's wait set and distribute readiness.
fn poll_wait<'t, D: Direction>(
    ctx: &RoundContext<'t>,
    exchanges: &mut [Exchange<'t, D>],
    round: &mut RoundState,
) {
    // zero timeout while some exchange can still do useful work right now;
    // a zero timeout never yields the CPU, so it must not become permanent
    let num_waiters =
        round.poll_entries.len() + round.retry_waiters + round.done + round.unconnectable;
    let timeout = if num_waiters < round.total {
        Duration::ZERO
    } else {
        ctx.config.poll_timeout
    };

    let outcome = ctx.transport.poll(&mut round.poll_entries, timeout);

    match outcome {
        PollOutcome::Ready(_) => {
            for entry in &round.poll_entries {
                if entry.ready {
                    exchanges[entry.slot].wait_ready = true;
                }
            }
        }
        PollOutcome::TimedOut if timeout.is_zero() => {
            // nothing ready yet; the next pass re-arms
        }
        PollOutcome::TimedOut | PollOutcome::Failed => {
            // expiry and failure are handled alike: every waiting exchange
            // is pushed to its invalidate path
            if !round.poll_failure_logged {
                if ctx.cancel.is_cancelled() {
                    debug!("readiness wait interrupted by caller");
                } else if outcome == PollOutcome::TimedOut {
                    error!(
                        sockets = round.poll_entries.len(),
                        "readiness wait timed out"
                    );
                } else {
                    error!(sockets = round.poll_entries.len(), "readiness wait failed");
                }
                round.poll_failure_logged = true;
            }
            round.poll_timed_out = true;
        }
    }
}
