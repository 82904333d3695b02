//! Read-direction exchange behavior
//!
//! The storage server answers a read request with a stream of
//! length-prefixed data pieces and terminates it with a zero prefix
//! (clean end of data) or a negative prefix (wire error code).

use std::io;

use bytes::Bytes;
use tracing::{error, warn};

use crate::conn::Interest;
use crate::error::Error;
use crate::wire::{ReadRequest, RequestFlags, DATA_LEN_PREFIX_SIZE};

use super::exchange::{
    arm_wait, readiness_gate, send_request, Direction, Exchange, Readiness, RoundContext,
    RoundState, Stage, StepFlow,
};

/// Destination cursor of one read exchange.
pub(crate) struct ReadDir<'b> {
    dest: &'b mut [u8],
}

impl<'b> ReadDir<'b> {
    pub(crate) fn new(dest: &'b mut [u8]) -> Self {
        Self { dest }
    }
}

impl Direction for ReadDir<'_> {
    fn encode_request(ex: &Exchange<'_, Self>, ctx: &RoundContext<'_>) -> Bytes {
        let req = ReadRequest {
            handle_id: ctx.handle.id(),
            target: ex.target,
            local_offset: ex.local_offset,
            len: ex.dir.dest.len() as u64,
            flags: RequestFlags {
                session_check: ex.first_write_done,
                mirror: ctx.mirrored,
                mirror_second: ex.use_secondary,
                mirror_forward: false,
                disable_io: ctx.config.bench_disable_io,
            },
        };
        ctx.codec.encode_read(&req)
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
                ex.to_be_transmitted = 0;
                ex.stage = Stage::RecvHeader;
                arm_wait(ex, round, Interest::Read);
                StepFlow::Pass
            }

            Stage::RecvHeader => {
                match readiness_gate(ex, round, Interest::Read) {
                    Readiness::Ready => {}
                    Readiness::NotReady => return StepFlow::Pass,
                    Readiness::Aborted => return StepFlow::Continue,
                }

                let mut prefix = [0u8; DATA_LEN_PREFIX_SIZE];
                if let Err(err) = ex.conn_mut().recv_exact(&mut prefix) {
                    warn!(peer = %ex.peer_label(), error = %err, "failed to receive data length prefix");
                    ex.stage = Stage::SocketException;
                    return StepFlow::Continue;
                }

                let len = ctx.codec.decode_data_len(&prefix);

                if len <= 0 {
                    // end of the data stream; the exchange is complete
                    if let Some(guard) = ex.conn.take() {
                        guard.release();
                        round.acquired_conns -= 1;
                    }
                    ex.outcome = if len < 0 {
                        Err(Error::from_code(-len))
                    } else {
                        Ok(ex.transmitted)
                    };
                    ex.stage = Stage::Cleanup;
                    return StepFlow::Continue;
                }

                let room = ex.dir.dest.len() as u64 - ex.transmitted;
                if len as u64 > room {
                    error!(
                        peer = %ex.peer_label(),
                        len,
                        room,
                        "bug: data length prefix exceeds remaining buffer"
                    );
                    ex.outcome = Err(Error::Internal(format!(
                        "data length {} exceeds remaining buffer {}",
                        len, room
                    )));
                    ex.stage = Stage::SocketInvalidate;
                    return StepFlow::Continue;
                }

                ex.to_be_transmitted += len as u64;
                ex.stage = Stage::RecvData;
                StepFlow::Continue
            }

            Stage::RecvData => {
                match readiness_gate(ex, round, Interest::Read) {
                    Readiness::Ready => {}
                    Readiness::NotReady => return StepFlow::Pass,
                    Readiness::Aborted => return StepFlow::Continue,
                }

                let start = ex.transmitted as usize;
                let end = ex.to_be_transmitted as usize;
                let (conn, dir) = (&mut ex.conn, &mut ex.dir);
                let res = conn
                    .as_mut()
                    .expect("exchange has no connection in a transfer stage")
                    .conn_mut()
                    .recv(&mut dir.dest[start..end]);

                match res {
                    Ok(0) => {
                        error!(peer = %ex.peer_label(), "connection closed mid data stream");
                        ex.stage = Stage::SocketException;
                        StepFlow::Continue
                    }
                    Ok(n) => {
                        ex.transmitted += n as u64;
                        if ex.to_be_transmitted == ex.transmitted {
                            // piece complete; the next length prefix follows
                            ex.stage = Stage::RecvHeader;
                        }
                        arm_wait(ex, round, Interest::Read);
                        StepFlow::Pass
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        arm_wait(ex, round, Interest::Read);
                        StepFlow::Pass
                    }
                    Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                        error!(peer = %ex.peer_label(), "communication timeout receiving data");
                        ex.stage = Stage::SocketException;
                        StepFlow::Continue
                    }
                    Err(err) => {
                        error!(peer = %ex.peer_label(), error = %err, "communication error receiving data");
                        ex.stage = Stage::SocketException;
                        StepFlow::Continue
                    }
                }
            }

            stage => {
                debug_assert!(false, "read exchange in unexpected stage {:?}", stage);
                ex.stage = Stage::SocketException;
                StepFlow::Continue
            }
        }
    }

    fn is_retryable(err: &Error) -> bool {
        matches!(err, Error::Communication)
    }
}
