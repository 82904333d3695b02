//! Write-direction exchange behavior
//!
//! A write exchange pushes the request message, then the chunk payload in
//! as many non-blocking pieces as the socket accepts, and finishes with a
//! single response message carrying the server-reported write count (or a
//! negated wire error code).

use std::io;

use bytes::Bytes;
use tracing::{error, warn};

use crate::conn::Interest;
use crate::error::Error;
use crate::wire::{RequestFlags, WriteRequest, MAX_MSG_SIZE};

use super::exchange::{
    arm_wait, readiness_gate, send_request, Direction, Exchange, Readiness, RoundContext,
    RoundState, Stage, StepFlow,
};

/// Source cursor of one write exchange.
pub(crate) struct WriteDir<'b> {
    src: &'b [u8],
}

impl<'b> WriteDir<'b> {
    pub(crate) fn new(src: &'b [u8]) -> Self {
        Self { src }
    }
}

impl Direction for WriteDir<'_> {
    fn encode_request(ex: &Exchange<'_, Self>, ctx: &RoundContext<'_>) -> Bytes {
        let req = WriteRequest {
            handle_id: ctx.handle.id(),
            target: ex.target,
            local_offset: ex.local_offset,
            len: ex.dir.src.len() as u64,
            flags: RequestFlags {
                session_check: ex.first_write_done,
                mirror: ctx.mirrored,
                mirror_second: ex.use_secondary,
                // mirroring is forwarded server-side; the client only ever
                // writes to the selected replica
                mirror_forward: ctx.mirrored,
                disable_io: ctx.config.bench_disable_io,
            },
            quota: if ctx.config.quota_enabled {
                ctx.handle.quota()
            } else {
                None
            },
        };
        ctx.codec.encode_write(&req)
    }

    fn step_transfer(
        ex: &mut Exchange<'_, Self>,
        ctx: &RoundContext<'_>,
        round: &mut RoundState,
    ) -> StepFlow {
        match ex.stage {
            Stage::SendRequest => {
                if !send_request(ex) {
                    return StepFlow::Continue;
                }
                ex.transmitted = 0;
                ex.to_be_transmitted = ex.dir.src.len() as u64;
                ex.stage = Stage::SendData;
                arm_wait(ex, round, Interest::Write);
                StepFlow::Pass
            }

            Stage::SendData => {
                match readiness_gate(ex, round, Interest::Write) {
                    Readiness::Ready => {}
                    Readiness::NotReady => return StepFlow::Pass,
                    Readiness::Aborted => return StepFlow::Continue,
                }

                let start = ex.transmitted as usize;
                let end = ex.to_be_transmitted as usize;
                let (conn, dir) = (&mut ex.conn, &ex.dir);
                let res = conn
                    .as_mut()
                    .expect("exchange has no connection in a transfer stage")
                    .conn_mut()
                    .send(&dir.src[start..end]);

                match res {
                    Ok(0) => {
                        error!(peer = %ex.peer_label(), "connection closed while sending data");
                        ex.stage = Stage::SocketException;
                        StepFlow::Continue
                    }
                    Ok(n) => {
                        ex.transmitted += n as u64;
                        if ex.to_be_transmitted == ex.transmitted {
                            // payload out; wait for the response message
                            ex.stage = Stage::RecvResponse;
                            arm_wait(ex, round, Interest::Read);
                        } else {
                            arm_wait(ex, round, Interest::Write);
                        }
                        StepFlow::Pass
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        arm_wait(ex, round, Interest::Write);
                        StepFlow::Pass
                    }
                    Err(err) => {
                        error!(peer = %ex.peer_label(), error = %err, "communication error sending data");
                        ex.stage = Stage::SocketException;
                        StepFlow::Continue
                    }
                }
            }

            Stage::RecvResponse => {
                match readiness_gate(ex, round, Interest::Read) {
                    Readiness::Ready => {}
                    Readiness::NotReady => return StepFlow::Pass,
                    Readiness::Aborted => return StepFlow::Continue,
                }

                let mut buf = [0u8; MAX_MSG_SIZE];
                let n = match ex.conn_mut().recv(&mut buf) {
                    Ok(0) => {
                        warn!(peer = %ex.peer_label(), "connection closed before response");
                        ex.stage = Stage::SocketException;
                        return StepFlow::Continue;
                    }
                    Ok(n) => n,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        arm_wait(ex, round, Interest::Read);
                        return StepFlow::Pass;
                    }
                    Err(err) => {
                        if !ctx.cancel.is_cancelled() {
                            warn!(peer = %ex.peer_label(), error = %err, "receive of response failed");
                        }
                        ex.stage = Stage::SocketException;
                        return StepFlow::Continue;
                    }
                };

                match ctx.codec.decode_write_response(&buf[..n]) {
                    Err(err) => {
                        warn!(
                            peer = %ex.peer_label(),
                            error = %err,
                            "received invalid response message, disconnecting"
                        );
                        ex.stage = Stage::SocketInvalidate;
                        StepFlow::Continue
                    }
                    Ok(resp) => {
                        if resp.value == -Error::Communication.code() && !round.conn_failure_logged
                        {
                            // the server could not reach its mirror buddy
                            round.conn_failure_logged = true;
                            warn!(
                                peer = %ex.peer_label(),
                                group = %ex.target,
                                "server reported indirect communication error"
                            );
                        }

                        if let Some(guard) = ex.conn.take() {
                            guard.release();
                            round.acquired_conns -= 1;
                        }

                        ex.outcome = if resp.value < 0 {
                            Err(Error::from_code(-resp.value))
                        } else {
                            Ok(resp.value as u64)
                        };
                        ex.stage = Stage::Cleanup;
                        StepFlow::Continue
                    }
                }
            }

            stage => {
                debug_assert!(false, "write exchange in unexpected stage {:?}", stage);
                ex.stage = Stage::SocketException;
                StepFlow::Continue
            }
        }
    }

    fn is_retryable(err: &Error) -> bool {
        matches!(err, Error::Communication | Error::Again)
    }
}
