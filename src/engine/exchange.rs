//! Per-target exchange state machine
//!
//! One [`Exchange`] drives one network operation against one stripe target
//! through its protocol stages. The stages shared by both transfer
//! directions (prepare, error classification, connection teardown,
//! cleanup/retry admission) live here; the direction-specific transfer
//! stages are supplied through the [`Direction`] trait and implemented
//! once for reads and once for writes.
//!
//! Stage transitions cascade within a driver pass: a stage function
//! returns [`StepFlow::Continue`] to keep stepping the same exchange and
//! [`StepFlow::Pass`] once the exchange can make no more progress without
//! waiting (armed for readiness, pending a connection, or terminal).

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::conn::{ConnGuard, Connection, Interest, PollEntry, Transport};
use crate::error::Error;
use crate::stats::EngineStats;
use crate::striping::ChunkSpan;
use crate::target::{NodeHandle, ReplicaResolver, TargetHealthOracle, TargetId};
use crate::wire::WireCodec;

use super::FileHandle;

/// Outcome of one exchange: bytes moved, or the dominant error.
pub(crate) type TargetOutcome = std::result::Result<u64, Error>;

// =============================================================================
// Stages
// =============================================================================

/// Protocol stage of an exchange.
///
/// Reads pass through `SendRequest → RecvHeader → RecvData` (looping back
/// to `RecvHeader` per length-prefixed piece); writes through
/// `SendRequest → SendData → RecvResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Prepare,
    SendRequest,
    SendData,
    RecvHeader,
    RecvData,
    RecvResponse,
    SocketException,
    SocketInvalidate,
    Cleanup,
    RetryWait,
    Done,
}

impl Stage {
    /// Whether the exchange holds an in-flight network operation.
    pub(crate) fn is_transfer(self) -> bool {
        matches!(
            self,
            Stage::SendRequest
                | Stage::SendData
                | Stage::RecvHeader
                | Stage::RecvData
                | Stage::RecvResponse
        )
    }
}

/// Continue stepping this exchange within the current pass, or yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepFlow {
    Continue,
    Pass,
}

/// Readiness gate result for receive/send-data stages.
pub(crate) enum Readiness {
    Ready,
    NotReady,
    Aborted,
}

// =============================================================================
// Direction Trait
// =============================================================================

/// Direction-specific behavior of an exchange.
pub(crate) trait Direction: Sized {
    /// Serialized request message for this exchange.
    fn encode_request(ex: &Exchange<'_, Self>, ctx: &RoundContext<'_>) -> Bytes;

    /// Run one direction-specific transfer stage.
    fn step_transfer(
        ex: &mut Exchange<'_, Self>,
        ctx: &RoundContext<'_>,
        round: &mut RoundState,
    ) -> StepFlow;

    /// Whether a terminal error admits a retry.
    fn is_retryable(err: &Error) -> bool;
}

// =============================================================================
// Round Context & State
// =============================================================================

/// Immutable collaborators shared by all exchanges of one call.
pub(crate) struct RoundContext<'a> {
    pub config: &'a EngineConfig,
    pub transport: &'a dyn Transport,
    pub oracle: &'a dyn TargetHealthOracle,
    pub resolver: &'a dyn ReplicaResolver,
    pub codec: &'a dyn WireCodec,
    pub stats: &'a EngineStats,
    pub cancel: &'a CancelToken,
    pub handle: &'a FileHandle,
    pub mirrored: bool,
}

/// Mutable bookkeeping shared by all exchanges of one round.
///
/// Invariant, checked every pass:
/// `waiting + retry_waiters + done + unconnectable <= total`.
pub(crate) struct RoundState {
    /// Exchanges in this round
    pub total: usize,

    /// Exchanges that reached `Done`
    pub done: usize,

    /// Exchanges parked in `RetryWait`
    pub retry_waiters: usize,

    /// Exchanges that could not get a connection this pass
    pub unconnectable: usize,

    /// Connections currently held by this round's exchanges
    pub acquired_conns: usize,

    /// Wait-set registrations of the current pass
    pub poll_entries: Vec<PollEntry>,

    /// The wait primitive expired or failed; waiting exchanges must abort
    pub poll_timed_out: bool,

    /// One-shot latches against log storms
    pub poll_failure_logged: bool,
    pub conn_failure_logged: bool,

    /// Shared retry counter and its configured bound (0 = unlimited)
    pub retry_num: u32,
    pub max_retries: u32,

    /// Stripe-set sequence number, for tracing only
    pub seq: u64,
}

impl RoundState {
    pub(crate) fn new(total: usize, config: &EngineConfig, seq: u64) -> Self {
        Self {
            total,
            done: 0,
            retry_waiters: 0,
            unconnectable: 0,
            acquired_conns: 0,
            poll_entries: Vec::with_capacity(total),
            poll_timed_out: false,
            poll_failure_logged: false,
            conn_failure_logged: false,
            retry_num: 0,
            max_retries: config.max_retries,
            seq,
        }
    }
}

// =============================================================================
// Exchange
// =============================================================================

/// One per-target, per-round protocol state machine instance.
pub(crate) struct Exchange<'t, D: Direction> {
    /// Slot of this exchange within the round (wait-set bookkeeping)
    pub slot: usize,

    /// Logical stripe target (mirror group ID for mirrored patterns)
    pub target: TargetId,

    /// Index of the target within the pattern's target list
    pub target_index: usize,

    /// Offset inside the target's chunk file
    pub local_offset: u64,

    pub stage: Stage,

    /// Bytes moved so far in the current transfer
    pub transmitted: u64,

    /// Bytes expected by the current transfer
    pub to_be_transmitted: u64,

    /// Serialized request message
    pub msg: Bytes,

    pub conn: Option<ConnGuard<'t>>,
    pub node: Option<NodeHandle>,

    /// Terminal result; primed with a communication error so that any
    /// abnormal path reports something sensible
    pub outcome: TargetOutcome,

    /// Bytes this exchange must move for the round to count it complete
    pub expected: u64,

    /// Address the mirror group's secondary member
    pub use_secondary: bool,

    /// A write to this target already succeeded in this session
    pub first_write_done: bool,

    /// This exchange already failed over once in this round
    pub has_switched: bool,

    /// Readiness reported by the last wait
    pub wait_ready: bool,

    pub dir: D,
}

impl<'t, D: Direction> Exchange<'t, D> {
    pub(crate) fn new(slot: usize, span: &ChunkSpan, dir: D, first_write_done: bool) -> Self {
        Self {
            slot,
            target: span.target,
            target_index: span.target_index,
            local_offset: span.local_offset,
            stage: Stage::Prepare,
            transmitted: 0,
            to_be_transmitted: 0,
            msg: Bytes::new(),
            conn: None,
            node: None,
            outcome: Err(Error::Communication),
            expected: span.len,
            use_secondary: false,
            first_write_done,
            has_switched: false,
            wait_ready: false,
            dir,
        }
    }

    pub(crate) fn conn_mut(&mut self) -> &mut dyn Connection {
        self.conn
            .as_mut()
            .expect("exchange has no connection in a transfer stage")
            .conn_mut()
    }

    /// Node name for log lines; falls back to the target ID before the
    /// node is resolved.
    pub(crate) fn peer_label(&self) -> String {
        match &self.node {
            Some(node) => node.to_string(),
            None => format!("target {}", self.target),
        }
    }
}

// =============================================================================
// Shared Stage Functions
// =============================================================================

/// Step one exchange until it yields for this pass.
pub(crate) fn step_pass<'t, D: Direction>(
    ex: &mut Exchange<'t, D>,
    ctx: &RoundContext<'t>,
    round: &mut RoundState,
) {
    loop {
        let flow = match ex.stage {
            Stage::Prepare => prepare(ex, ctx, round),
            Stage::SocketException => socket_exception(ex, ctx),
            Stage::SocketInvalidate => socket_invalidate(ex, round),
            Stage::Cleanup => cleanup(ex, ctx, round),
            Stage::RetryWait | Stage::Done => StepFlow::Pass,
            _ => D::step_transfer(ex, ctx, round),
        };
        if flow == StepFlow::Pass {
            break;
        }
    }
}

/// Resolve the replica, gate on its health, acquire a connection and
/// buffer the request.
fn prepare<'t, D: Direction>(
    ex: &mut Exchange<'t, D>,
    ctx: &RoundContext<'t>,
    round: &mut RoundState,
) -> StepFlow {
    debug_assert!(ex.conn.is_none(), "connection held on prepare entry");

    ex.outcome = Err(Error::Communication);

    // select the concrete replica
    let concrete = if ctx.mirrored {
        match ctx
            .resolver
            .resolve_stripe_target(ex.target, ex.use_secondary)
        {
            Ok(target) => target,
            Err(err) => {
                error!(group = %ex.target, "invalid mirror buddy group");
                ex.outcome = Err(err);
                ex.stage = Stage::Cleanup;
                return StepFlow::Continue;
            }
        }
    } else {
        ex.target
    };

    // gate on target health before touching the network; the retry policy
    // decides later whether this becomes a failover or a dead end
    let unusable = match ctx.oracle.get_state(concrete) {
        None => true,
        Some(state) => {
            state.is_offline()
                || (ctx.mirrored && state.consistency != crate::target::Consistency::Good)
        }
    };
    if unusable {
        ex.stage = Stage::Cleanup;
        return StepFlow::Continue;
    }

    let node = match ctx.resolver.resolve_node(concrete) {
        Ok(node) => node,
        Err(err) => {
            ex.outcome = Err(err);
            ex.stage = Stage::Cleanup;
            return StepFlow::Continue;
        }
    };

    // never wait for a second connection while holding a first one; a
    // symmetric round going the other direction could be doing the same,
    // and both would block forever
    let allow_wait = round.acquired_conns == 0;

    match ctx.transport.acquire(&node, allow_wait) {
        Ok(Some(conn)) => {
            round.acquired_conns += 1;
            ex.conn = Some(ConnGuard::new(ctx.transport, conn));
            ex.node = Some(node);
        }
        Ok(None) if !allow_wait => {
            // didn't want to wait; keep the stage, try again next pass
            round.unconnectable += 1;
            return StepFlow::Pass;
        }
        Ok(None) | Err(_) => {
            if !round.conn_failure_logged {
                if ctx.cancel.is_cancelled() {
                    debug!(node = %node, "connect cancelled by caller");
                } else {
                    warn!(node = %node, "unable to connect to storage node");
                }
            }
            round.conn_failure_logged = true;
            ex.node = Some(node);
            ex.stage = Stage::Cleanup;
            return StepFlow::Continue;
        }
    }

    let msg = D::encode_request(ex, ctx);
    ex.transmitted = 0;
    ex.to_be_transmitted = msg.len() as u64;
    ex.msg = msg;
    ex.stage = Stage::SendRequest;
    StepFlow::Continue
}

/// Send the buffered request message in one non-blocking push.
///
/// Returns true when the whole message went out; a short or failed send
/// already moved the exchange to `SocketException`.
pub(crate) fn send_request<'t, D: Direction>(ex: &mut Exchange<'t, D>) -> bool {
    let msg = ex.msg.clone();
    match ex.conn_mut().send(&msg) {
        Ok(n) if n == msg.len() => true,
        Ok(n) => {
            warn!(peer = %ex.peer_label(), sent = n, len = msg.len(), "short send of request message");
            ex.stage = Stage::SocketException;
            false
        }
        Err(err) => {
            warn!(peer = %ex.peer_label(), error = %err, "failed to send request message");
            ex.stage = Stage::SocketException;
            false
        }
    }
}

/// Register this exchange's connection with the round's wait set.
pub(crate) fn arm_wait<'t, D: Direction>(
    ex: &mut Exchange<'t, D>,
    round: &mut RoundState,
    interest: Interest,
) {
    ex.wait_ready = false;
    let token = ex
        .conn
        .as_ref()
        .expect("exchange has no connection to wait on")
        .token();
    round.poll_entries.push(PollEntry::new(token, interest, ex.slot));
}

/// Gate a transfer stage on readiness of the exchange's connection.
pub(crate) fn readiness_gate<'t, D: Direction>(
    ex: &mut Exchange<'t, D>,
    round: &mut RoundState,
    interest: Interest,
) -> Readiness {
    // a wait failure cancels every waiting exchange
    if round.poll_timed_out {
        ex.outcome = Err(Error::Communication);
        ex.stage = Stage::SocketInvalidate;
        return Readiness::Aborted;
    }

    if !ex.wait_ready {
        arm_wait(ex, round, interest);
        return Readiness::NotReady;
    }

    ex.wait_ready = false;
    Readiness::Ready
}

/// Classify the failure and route to connection teardown.
fn socket_exception<'t, D: Direction>(
    ex: &mut Exchange<'t, D>,
    ctx: &RoundContext<'t>,
) -> StepFlow {
    if ctx.cancel.is_cancelled() {
        info!(peer = %ex.peer_label(), "communication interrupted by caller");
    } else {
        error!(peer = %ex.peer_label(), "communication error");
        debug!(
            handle = ctx.handle.id(),
            offset = ex.local_offset,
            len = ex.expected,
            "failed request details"
        );
    }

    ex.outcome = Err(Error::Communication);
    ex.stage = Stage::SocketInvalidate;
    StepFlow::Continue
}

/// Drop the connection as unusable.
fn socket_invalidate<'t, D: Direction>(
    ex: &mut Exchange<'t, D>,
    round: &mut RoundState,
) -> StepFlow {
    if let Some(guard) = ex.conn.take() {
        guard.invalidate();
        round.acquired_conns -= 1;
    }
    ex.stage = Stage::Cleanup;
    StepFlow::Continue
}

/// Release remaining references and decide between retry and done.
fn cleanup<'t, D: Direction>(
    ex: &mut Exchange<'t, D>,
    ctx: &RoundContext<'t>,
    round: &mut RoundState,
) -> StepFlow {
    debug_assert!(ex.conn.is_none(), "connection held on cleanup entry");

    ex.node = None;

    let retryable = matches!(&ex.outcome, Err(err) if D::is_retryable(err));
    if retryable {
        if ctx.cancel.is_cancelled() {
            // cancelled mid-retry; report interruption, not data loss
            ex.outcome = Err(Error::Interrupted);
        } else if ctx.config.retries_enabled
            && (round.max_retries == 0 || round.retry_num < round.max_retries)
        {
            round.retry_waiters += 1;
            ex.stage = Stage::RetryWait;
            return StepFlow::Pass;
        }
    }

    round.done += 1;
    ex.stage = Stage::Done;
    StepFlow::Pass
}
