//! Retry and failover policy
//!
//! Invoked once per round when every non-terminal exchange is parked in
//! `RetryWait`. Re-reads the health oracle per target and decides, per
//! exchange, between giving up, switching to the mirror buddy, holding
//! for a state change, and a plain backoff retry.
//!
//! A round never makes partial progress past a permanently dead target:
//! one unusable target finalizes every still-retryable exchange of the
//! round (stripe-set atomicity).

use tracing::debug;

use crate::error::Error;
use crate::target::TargetHealth;

use super::exchange::{Direction, Exchange, RoundContext, RoundState, Stage};

fn usable(state: Option<TargetHealth>) -> bool {
    state.is_some_and(|s| s.is_usable())
}

pub(crate) fn start_retry<'t, D: Direction>(
    ctx: &RoundContext<'t>,
    exchanges: &mut [Exchange<'t, D>],
    round: &mut RoundState,
) {
    // reset round values for the retry pass
    round.retry_waiters = 0;
    round.poll_timed_out = false;

    let mut cancel_all = false;
    let mut reset_retries = false;
    let mut sleep_on_reset = true;

    for ex in exchanges.iter_mut() {
        if ex.stage != Stage::RetryWait {
            continue;
        }

        // resolve the currently selected replica and its buddy
        let (current_id, buddy_id) = if ctx.mirrored {
            (
                ctx.resolver
                    .resolve_stripe_target(ex.target, ex.use_secondary)
                    .ok(),
                ctx.resolver
                    .resolve_stripe_target(ex.target, !ex.use_secondary)
                    .ok(),
            )
        } else {
            (Some(ex.target), Some(ex.target))
        };

        let current = current_id.and_then(|t| ctx.oracle.get_state(t));
        let buddy = if current_id == buddy_id {
            current
        } else {
            buddy_id.and_then(|t| ctx.oracle.get_state(t))
        };

        let distinct = current_id != buddy_id;
        let both_unknown = current.is_none() && distinct && buddy.is_none();
        let both_offline = current.is_some_and(|s| s.is_offline())
            && buddy.is_some_and(|s| s.is_offline());

        if both_unknown || both_offline {
            // no replica path left for this target; no retry can help
            debug!(target = %ex.target, "skipping communication with offline target");
            cancel_all = true;
            break;
        }

        if !usable(current) && usable(buddy) {
            debug!(
                target = %ex.target,
                state = ?current,
                "switching to buddy with good target state"
            );
            ex.use_secondary = !ex.use_secondary;
            ex.stage = Stage::Prepare;
            reset_retries = true;
            if !ex.has_switched {
                // first substitution goes out immediately; repeats get the
                // cool-down below
                sleep_on_reset = false;
            }
            ex.has_switched = true;
            ctx.stats.record_failover();
            continue;
        }

        if ctx.mirrored && !usable(current) {
            // neither offline nor good on either side; hold until the
            // management service settles the state
            debug!(
                target = %ex.target,
                state = ?current,
                "waiting for target state to settle"
            );
            ex.stage = Stage::Prepare;
            reset_retries = true;
            continue;
        }

        if matches!(&ex.outcome, Err(Error::Again)) {
            debug!(target = %ex.target, "target asked for unconditional retry");
            ex.stage = Stage::Prepare;
            reset_retries = true;
            continue;
        }

        // normal retry
        ex.stage = Stage::Prepare;
    }

    if cancel_all {
        // finalize everything still retryable with its existing error
        for ex in exchanges.iter_mut() {
            if ex.stage == Stage::RetryWait || ex.stage == Stage::Prepare {
                round.done += 1;
                ex.stage = Stage::Done;
            }
        }
        return;
    }

    if reset_retries {
        // don't deplete the budget while target states are in flux
        if sleep_on_reset && !ctx.cancel.is_cancelled() {
            std::thread::sleep(ctx.config.state_cooldown);
        }
        round.retry_num = 0;
    } else {
        if !ctx.cancel.is_cancelled() {
            std::thread::sleep(ctx.config.retry_backoff(round.retry_num));
        }
        round.retry_num += 1;
        ctx.stats.record_retry();
    }
}
