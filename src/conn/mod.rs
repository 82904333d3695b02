//! Connection provider port
//!
//! The engine does not own sockets. It borrows connections from a provider,
//! returns them when a protocol exchange finished cleanly, and invalidates
//! them whenever the protocol state of the connection is unknown (any error
//! mid-exchange). The provider also supplies the single wait-for-readiness
//! primitive the round driver blocks on.
//!
//! Ownership rule: a connection belongs to exactly one exchange from
//! `acquire` until `release`/`invalidate`. Retries never reuse a connection
//! object; they re-acquire.

use std::io;
use std::time::Duration;

use crate::error::Result;
use crate::target::NodeHandle;

// =============================================================================
// Readiness Types
// =============================================================================

/// Stable identifier of a connection for poll registration.
pub type ConnToken = u64;

/// Readiness direction an exchange waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Incoming data available
    Read,
    /// Send buffer has room
    Write,
}

/// One registration in the round driver's wait set.
#[derive(Debug, Clone)]
pub struct PollEntry {
    /// Connection to watch
    pub token: ConnToken,

    /// Direction to watch for
    pub interest: Interest,

    /// Set by the provider when the connection became ready
    pub ready: bool,

    /// Driver-private slot of the owning exchange; providers ignore it
    pub slot: usize,
}

impl PollEntry {
    pub fn new(token: ConnToken, interest: Interest, slot: usize) -> Self {
        Self {
            token,
            interest,
            ready: false,
            slot,
        }
    }
}

/// Result of one wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Poll returned; `ready` flags are up to date. The count may be zero
    /// for a zero-timeout poll.
    Ready(usize),

    /// A non-zero timeout elapsed without any readiness
    TimedOut,

    /// The wait primitive itself failed
    Failed,
}

// =============================================================================
// Connection Port
// =============================================================================

/// One borrowed network connection.
///
/// `send` and `recv` never block: they move what the socket accepts right
/// now and report `WouldBlock` otherwise. `recv_exact` is only called once
/// the wait primitive reported readiness and may block up to the
/// connection's own I/O timeout, surfacing `TimedOut` on expiry.
pub trait Connection: Send {
    /// Stable token for poll registration.
    fn token(&self) -> ConnToken;

    /// Peer name for log lines.
    fn peer(&self) -> &str;

    /// Non-blocking send; returns the number of bytes accepted.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Non-blocking receive; returns the number of bytes read.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Receive exactly `buf.len()` bytes.
    fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.recv(&mut buf[filled..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Port for acquiring connections and multiplexing their readiness.
pub trait Transport: Send + Sync {
    /// Borrow a connection to `node`.
    ///
    /// With `allow_wait` false this must return `Ok(None)` immediately when
    /// no connection is available, never block. With `allow_wait` true it
    /// may block while establishing a connection; a `None`/`Err` then means
    /// the node is not connectable.
    fn acquire(&self, node: &NodeHandle, allow_wait: bool) -> Result<Option<Box<dyn Connection>>>;

    /// Return a connection whose protocol exchange completed cleanly.
    fn release(&self, conn: Box<dyn Connection>);

    /// Discard a connection whose protocol state is unknown.
    fn invalidate(&self, conn: Box<dyn Connection>);

    /// Wait until some registered connection is ready or `timeout` expires.
    ///
    /// A zero timeout checks readiness without yielding the CPU and
    /// reports `Ready` even when nothing is ready yet.
    fn poll(&self, entries: &mut [PollEntry], timeout: Duration) -> PollOutcome;
}

// =============================================================================
// Connection Guard
// =============================================================================

/// Scope-bound connection ownership.
///
/// Holds the borrowed connection of one exchange and guarantees the
/// provider gets it back on every exit path: explicit `release` on the
/// clean path, explicit or drop-implied `invalidate` everywhere else.
/// Dropping without release invalidates, never leaks.
pub struct ConnGuard<'t> {
    transport: &'t dyn Transport,
    conn: Option<Box<dyn Connection>>,
}

impl<'t> ConnGuard<'t> {
    pub fn new(transport: &'t dyn Transport, conn: Box<dyn Connection>) -> Self {
        Self {
            transport,
            conn: Some(conn),
        }
    }

    pub fn conn_mut(&mut self) -> &mut dyn Connection {
        // invariant: conn is only None after release/invalidate consumed self
        self.conn.as_mut().expect("connection already returned").as_mut()
    }

    pub fn token(&self) -> ConnToken {
        self.conn.as_ref().expect("connection already returned").token()
    }

    pub fn peer(&self) -> String {
        self.conn
            .as_ref()
            .expect("connection already returned")
            .peer()
            .to_string()
    }

    /// Return the connection to the provider for reuse.
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.transport.release(conn);
        }
    }

    /// Hand the connection back as unusable.
    pub fn invalidate(mut self) {
        if let Some(conn) = self.conn.take() {
            self.transport.invalidate(conn);
        }
    }
}

impl Drop for ConnGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.transport.invalidate(conn);
        }
    }
}

impl std::fmt::Debug for ConnGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnGuard")
            .field("held", &self.conn.is_some())
            .finish()
    }
}
