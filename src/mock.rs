//! Mock cluster for tests
//!
//! In-memory implementations of every collaborator port: a transport
//! whose connections are byte queues served by simulated storage targets,
//! a resolver over a static target/mirror-group map, the shared
//! [`TargetStateStore`] as health oracle, and a simple length-framed
//! binary codec.
//!
//! Each simulated target owns a chunk-file byte vector, so engine writes
//! land in the same place engine reads fetch from, and failure injection
//! knobs (connect, send, receive, response withholding, error responses)
//! cover the engine's retry and failover paths.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::conn::{ConnToken, Connection, Interest, PollEntry, PollOutcome, Transport};
use crate::engine::IoEngine;
use crate::error::{Error, Result};
use crate::target::{
    Consistency, NodeHandle, NodeId, Reachability, ReplicaResolver, TargetHealth, TargetId,
    TargetStateStore,
};
use crate::wire::{
    ReadRequest, RequestFlags, WireCodec, WriteRequest, WriteResponse, DATA_LEN_PREFIX_SIZE,
};

// =============================================================================
// Mock Codec
// =============================================================================

const MSG_KIND_READ: u8 = 1;
const MSG_KIND_WRITE: u8 = 2;
const MSG_KIND_WRITE_RESP: u8 = 3;

const FLAG_SESSION_CHECK: u8 = 1 << 0;
const FLAG_MIRROR: u8 = 1 << 1;
const FLAG_MIRROR_SECOND: u8 = 1 << 2;
const FLAG_MIRROR_FORWARD: u8 = 1 << 3;
const FLAG_DISABLE_IO: u8 = 1 << 4;

fn flags_to_bits(flags: &RequestFlags) -> u8 {
    let mut bits = 0;
    if flags.session_check {
        bits |= FLAG_SESSION_CHECK;
    }
    if flags.mirror {
        bits |= FLAG_MIRROR;
    }
    if flags.mirror_second {
        bits |= FLAG_MIRROR_SECOND;
    }
    if flags.mirror_forward {
        bits |= FLAG_MIRROR_FORWARD;
    }
    if flags.disable_io {
        bits |= FLAG_DISABLE_IO;
    }
    bits
}

fn bits_to_flags(bits: u8) -> RequestFlags {
    RequestFlags {
        session_check: bits & FLAG_SESSION_CHECK != 0,
        mirror: bits & FLAG_MIRROR != 0,
        mirror_second: bits & FLAG_MIRROR_SECOND != 0,
        mirror_forward: bits & FLAG_MIRROR_FORWARD != 0,
        disable_io: bits & FLAG_DISABLE_IO != 0,
    }
}

/// Length-framed little-endian codec used by the mock cluster.
#[derive(Debug, Default)]
pub struct MockCodec;

impl MockCodec {
    fn encode_common(
        kind: u8,
        target: TargetId,
        local_offset: u64,
        len: u64,
        flags: u8,
        uid: u32,
        gid: u32,
        handle_id: &str,
    ) -> Bytes {
        let handle = handle_id.as_bytes();
        let total = 4 + 1 + 2 + 8 + 8 + 1 + 4 + 4 + 2 + handle.len();

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32_le(total as u32);
        buf.put_u8(kind);
        buf.put_u16_le(target.0);
        buf.put_u64_le(local_offset);
        buf.put_u64_le(len);
        buf.put_u8(flags);
        buf.put_u32_le(uid);
        buf.put_u32_le(gid);
        buf.put_u16_le(handle.len() as u16);
        buf.put_slice(handle);
        buf.freeze()
    }
}

impl WireCodec for MockCodec {
    fn encode_read(&self, req: &ReadRequest<'_>) -> Bytes {
        Self::encode_common(
            MSG_KIND_READ,
            req.target,
            req.local_offset,
            req.len,
            flags_to_bits(&req.flags),
            0,
            0,
            req.handle_id,
        )
    }

    fn encode_write(&self, req: &WriteRequest<'_>) -> Bytes {
        let (uid, gid) = req.quota.map_or((0, 0), |q| (q.uid, q.gid));
        Self::encode_common(
            MSG_KIND_WRITE,
            req.target,
            req.local_offset,
            req.len,
            flags_to_bits(&req.flags),
            uid,
            gid,
            req.handle_id,
        )
    }

    fn decode_write_response(&self, buf: &[u8]) -> Result<WriteResponse> {
        if buf.len() < 13 {
            return Err(Error::Internal("truncated write response".into()));
        }
        let mut cursor = buf;
        let total = cursor.get_u32_le() as usize;
        let kind = cursor.get_u8();
        if total != 13 || kind != MSG_KIND_WRITE_RESP {
            return Err(Error::Internal("malformed write response".into()));
        }
        Ok(WriteResponse {
            value: cursor.get_i64_le(),
        })
    }

    fn decode_data_len(&self, buf: &[u8; DATA_LEN_PREFIX_SIZE]) -> i64 {
        i64::from_le_bytes(*buf)
    }
}

fn encode_write_response(value: i64) -> [u8; 13] {
    let mut out = [0u8; 13];
    out[..4].copy_from_slice(&13u32.to_le_bytes());
    out[4] = MSG_KIND_WRITE_RESP;
    out[5..].copy_from_slice(&value.to_le_bytes());
    out
}

/// One request as seen by a simulated target.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub write: bool,
    pub target: TargetId,
    pub local_offset: u64,
    pub len: u64,
    pub flags: RequestFlags,
    pub uid: u32,
    pub gid: u32,
}

fn parse_request(msg: &[u8]) -> Option<MockRequest> {
    if msg.len() < 32 {
        return None;
    }
    let mut cursor = msg;
    let _total = cursor.get_u32_le();
    let kind = cursor.get_u8();
    let target = TargetId(cursor.get_u16_le());
    let local_offset = cursor.get_u64_le();
    let len = cursor.get_u64_le();
    let flags = bits_to_flags(cursor.get_u8());
    let uid = cursor.get_u32_le();
    let gid = cursor.get_u32_le();

    match kind {
        MSG_KIND_READ | MSG_KIND_WRITE => Some(MockRequest {
            write: kind == MSG_KIND_WRITE,
            target,
            local_offset,
            len,
            flags,
            uid,
            gid,
        }),
        _ => None,
    }
}

// =============================================================================
// Simulated Targets
// =============================================================================

#[derive(Default)]
struct TargetSim {
    /// Chunk-file content of this target
    data: Mutex<Vec<u8>>,

    /// Applied writes, in arrival order
    written: Mutex<Vec<(u64, Vec<u8>)>>,

    /// Requests this target has parsed
    requests: Mutex<Vec<MockRequest>>,

    /// Fail the next n acquires with a connect error
    fail_acquires: Mutex<u32>,

    /// Report "no connection available" for the next n no-wait acquires
    defer_acquires: Mutex<u32>,

    /// Fail the next n sends
    fail_sends: Mutex<u32>,

    /// Fail the next n receives
    fail_recvs: Mutex<u32>,

    /// Error codes to answer the next read requests with
    read_errors: Mutex<VecDeque<Error>>,

    /// Overrides for the next write response values
    write_values: Mutex<VecDeque<i64>>,

    /// Answer reads with a prefix one byte larger than requested
    oversize_prefix: AtomicBool,

    /// Parse requests but never produce a response
    withhold_responses: AtomicBool,

    /// Split read payloads into pieces of this size (0 = one piece)
    read_piece: Mutex<usize>,

    /// Connections handed out for this target
    contacted: AtomicU32,
}

fn take_one(counter: &Mutex<u32>) -> bool {
    let mut left = counter.lock();
    if *left > 0 {
        *left -= 1;
        true
    } else {
        false
    }
}

// =============================================================================
// Mock Connection
// =============================================================================

struct ConnState {
    target: TargetId,
    /// Bytes queued for the engine to receive
    rx: VecDeque<u8>,
    /// Bytes the engine sent, not yet consumed by the target
    tx: Vec<u8>,
    pending_write: Option<PendingWrite>,
}

struct PendingWrite {
    local_offset: u64,
    expected: usize,
    got: Vec<u8>,
}

struct MockConnection {
    token: ConnToken,
    peer: String,
    state: Arc<Mutex<ConnState>>,
    net: Arc<NetInner>,
}

impl Connection for MockConnection {
    fn token(&self) -> ConnToken {
        self.token
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();

        if let Some(sim) = self.net.targets.get(&state.target) {
            if take_one(&sim.fail_sends) {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
        }

        state.tx.extend_from_slice(buf);
        self.net.pump(&mut state);
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();

        if let Some(sim) = self.net.targets.get(&state.target) {
            if take_one(&sim.fail_recvs) {
                return Err(io::ErrorKind::TimedOut.into());
            }
        }

        if state.rx.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(state.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.rx.pop_front().unwrap_or(0);
        }
        Ok(n)
    }
}

// =============================================================================
// Mock Network
// =============================================================================

struct NetInner {
    targets: DashMap<TargetId, TargetSim>,
    groups: DashMap<TargetId, (TargetId, TargetId)>,
    conns: DashMap<ConnToken, Arc<Mutex<ConnState>>>,
    conn_seq: AtomicU64,
    released: AtomicU32,
    invalidated: AtomicU32,
    fail_polls: AtomicU32,
}

impl NetInner {
    /// Let the target consume request/payload bytes and produce responses.
    fn pump(&self, state: &mut ConnState) {
        loop {
            let Some(sim) = self.targets.get(&state.target) else {
                return;
            };

            // drain payload bytes of an in-progress write first
            if let Some(pending) = state.pending_write.as_mut() {
                let need = pending.expected - pending.got.len();
                let take = need.min(state.tx.len());
                pending.got.extend(state.tx.drain(..take));

                if pending.got.len() < pending.expected {
                    return;
                }

                let pending = match state.pending_write.take() {
                    Some(p) => p,
                    None => return,
                };

                {
                    let mut data = sim.data.lock();
                    let end = pending.local_offset as usize + pending.got.len();
                    if data.len() < end {
                        data.resize(end, 0);
                    }
                    data[pending.local_offset as usize..end].copy_from_slice(&pending.got);
                }
                sim.written
                    .lock()
                    .push((pending.local_offset, pending.got.clone()));

                if sim.withhold_responses.load(Ordering::Relaxed) {
                    return;
                }

                let value = sim
                    .write_values
                    .lock()
                    .pop_front()
                    .unwrap_or(pending.got.len() as i64);
                state.rx.extend(encode_write_response(value));
                continue;
            }

            // need one full framed request message
            if state.tx.len() < 4 {
                return;
            }
            let total = u32::from_le_bytes([state.tx[0], state.tx[1], state.tx[2], state.tx[3]])
                as usize;
            if state.tx.len() < total {
                return;
            }
            let msg: Vec<u8> = state.tx.drain(..total).collect();
            let Some(req) = parse_request(&msg) else {
                return;
            };
            sim.requests.lock().push(req.clone());

            if req.write {
                state.pending_write = Some(PendingWrite {
                    local_offset: req.local_offset,
                    expected: req.len as usize,
                    got: Vec::with_capacity(req.len as usize),
                });
                continue;
            }

            // read request: queue the response stream
            if sim.withhold_responses.load(Ordering::Relaxed) {
                return;
            }

            if let Some(err) = sim.read_errors.lock().pop_front() {
                state.rx.extend((-err.code()).to_le_bytes());
                continue;
            }

            if sim.oversize_prefix.load(Ordering::Relaxed) {
                state.rx.extend((req.len as i64 + 1).to_le_bytes());
                continue;
            }

            let data = sim.data.lock();
            let start = (req.local_offset as usize).min(data.len());
            let end = ((req.local_offset + req.len) as usize).min(data.len());
            let payload = &data[start..end];

            let piece = match *sim.read_piece.lock() {
                0 => payload.len().max(1),
                n => n,
            };
            for part in payload.chunks(piece) {
                state.rx.extend((part.len() as i64).to_le_bytes());
                state.rx.extend(part.iter().copied());
            }
            state.rx.extend(0i64.to_le_bytes());
        }
    }
}

/// Mock transport + resolver over simulated storage targets.
pub struct MockNet {
    inner: Arc<NetInner>,
}

impl Default for MockNet {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetInner {
                targets: DashMap::new(),
                groups: DashMap::new(),
                conns: DashMap::new(),
                conn_seq: AtomicU64::new(1),
                released: AtomicU32::new(0),
                invalidated: AtomicU32::new(0),
                fail_polls: AtomicU32::new(0),
            }),
        }
    }

    /// Register a plain storage target.
    pub fn add_target(&self, target: TargetId) {
        self.inner.targets.entry(target).or_default();
    }

    /// Register a buddy mirror group and both member targets.
    pub fn add_mirror_group(&self, group: TargetId, primary: TargetId, secondary: TargetId) {
        self.add_target(primary);
        self.add_target(secondary);
        self.inner.groups.insert(group, (primary, secondary));
    }

    fn with_sim<R>(&self, target: TargetId, f: impl FnOnce(&TargetSim) -> R) -> R {
        let sim = self
            .inner
            .targets
            .get(&target)
            .unwrap_or_else(|| panic!("unknown mock target {}", target));
        f(&sim)
    }

    pub fn set_target_data(&self, target: TargetId, data: Vec<u8>) {
        self.with_sim(target, |sim| *sim.data.lock() = data);
    }

    pub fn target_data(&self, target: TargetId) -> Vec<u8> {
        self.with_sim(target, |sim| sim.data.lock().clone())
    }

    pub fn writes_to(&self, target: TargetId) -> Vec<(u64, Vec<u8>)> {
        self.with_sim(target, |sim| sim.written.lock().clone())
    }

    pub fn requests_to(&self, target: TargetId) -> Vec<MockRequest> {
        self.with_sim(target, |sim| sim.requests.lock().clone())
    }

    /// Connections handed out for this target so far.
    pub fn times_contacted(&self, target: TargetId) -> u32 {
        self.with_sim(target, |sim| sim.contacted.load(Ordering::Relaxed))
    }

    pub fn fail_acquires(&self, target: TargetId, n: u32) {
        self.with_sim(target, |sim| *sim.fail_acquires.lock() = n);
    }

    pub fn defer_acquires(&self, target: TargetId, n: u32) {
        self.with_sim(target, |sim| *sim.defer_acquires.lock() = n);
    }

    pub fn fail_sends(&self, target: TargetId, n: u32) {
        self.with_sim(target, |sim| *sim.fail_sends.lock() = n);
    }

    pub fn fail_recvs(&self, target: TargetId, n: u32) {
        self.with_sim(target, |sim| *sim.fail_recvs.lock() = n);
    }

    pub fn push_read_error(&self, target: TargetId, err: Error) {
        self.with_sim(target, |sim| sim.read_errors.lock().push_back(err));
    }

    pub fn push_write_value(&self, target: TargetId, value: i64) {
        self.with_sim(target, |sim| sim.write_values.lock().push_back(value));
    }

    pub fn set_oversize_prefix(&self, target: TargetId, on: bool) {
        self.with_sim(target, |sim| {
            sim.oversize_prefix.store(on, Ordering::Relaxed)
        });
    }

    pub fn set_withhold_responses(&self, target: TargetId, on: bool) {
        self.with_sim(target, |sim| {
            sim.withhold_responses.store(on, Ordering::Relaxed)
        });
    }

    /// Split read payloads into pieces of `n` bytes (0 = single piece).
    pub fn set_read_piece(&self, target: TargetId, n: usize) {
        self.with_sim(target, |sim| *sim.read_piece.lock() = n);
    }

    /// Fail the next `n` readiness waits.
    pub fn fail_polls(&self, n: u32) {
        self.inner.fail_polls.store(n, Ordering::Relaxed);
    }

    pub fn released_count(&self) -> u32 {
        self.inner.released.load(Ordering::Relaxed)
    }

    pub fn invalidated_count(&self) -> u32 {
        self.inner.invalidated.load(Ordering::Relaxed)
    }

    /// Connections currently outstanding (acquired, not yet returned).
    pub fn open_conns(&self) -> usize {
        self.inner.conns.len()
    }

    fn target_for_node(&self, node: &NodeHandle) -> TargetId {
        TargetId(node.id().0 as u16)
    }
}

impl Transport for MockNet {
    fn acquire(&self, node: &NodeHandle, allow_wait: bool) -> Result<Option<Box<dyn Connection>>> {
        let target = self.target_for_node(node);
        let Some(sim) = self.inner.targets.get(&target) else {
            return Err(Error::UnknownNode);
        };

        if !allow_wait && take_one(&sim.defer_acquires) {
            return Ok(None);
        }
        if take_one(&sim.fail_acquires) {
            return Err(Error::Communication);
        }

        sim.contacted.fetch_add(1, Ordering::Relaxed);
        drop(sim);

        let token = self.inner.conn_seq.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(Mutex::new(ConnState {
            target,
            rx: VecDeque::new(),
            tx: Vec::new(),
            pending_write: None,
        }));
        self.inner.conns.insert(token, Arc::clone(&state));

        Ok(Some(Box::new(MockConnection {
            token,
            peer: node.to_string(),
            state,
            net: Arc::clone(&self.inner),
        })))
    }

    fn release(&self, conn: Box<dyn Connection>) {
        self.inner.conns.remove(&conn.token());
        self.inner.released.fetch_add(1, Ordering::Relaxed);
    }

    fn invalidate(&self, conn: Box<dyn Connection>) {
        self.inner.conns.remove(&conn.token());
        self.inner.invalidated.fetch_add(1, Ordering::Relaxed);
    }

    fn poll(&self, entries: &mut [PollEntry], timeout: Duration) -> PollOutcome {
        {
            let mut left = self.inner.fail_polls.load(Ordering::Relaxed);
            while left > 0 {
                match self.inner.fail_polls.compare_exchange(
                    left,
                    left - 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return PollOutcome::Failed,
                    Err(now) => left = now,
                }
            }
        }

        let mut ready = 0;
        for entry in entries.iter_mut() {
            entry.ready = match entry.interest {
                Interest::Write => true,
                Interest::Read => self
                    .inner
                    .conns
                    .get(&entry.token)
                    .map(|state| !state.lock().rx.is_empty())
                    .unwrap_or(false),
            };
            if entry.ready {
                ready += 1;
            }
        }

        if ready == 0 && !timeout.is_zero() {
            return PollOutcome::TimedOut;
        }
        PollOutcome::Ready(ready)
    }
}

impl ReplicaResolver for MockNet {
    fn resolve_stripe_target(&self, logical: TargetId, use_secondary: bool) -> Result<TargetId> {
        if let Some(group) = self.inner.groups.get(&logical) {
            let (primary, secondary) = *group;
            return Ok(if use_secondary { secondary } else { primary });
        }
        if self.inner.targets.contains_key(&logical) {
            return Ok(logical);
        }
        Err(Error::UnknownTarget)
    }

    fn resolve_node(&self, target: TargetId) -> Result<NodeHandle> {
        if self.inner.targets.contains_key(&target) {
            Ok(NodeHandle::new(
                NodeId(target.0 as u32),
                format!("storage-{}", target),
            ))
        } else {
            Err(Error::UnknownNode)
        }
    }
}

// =============================================================================
// Mock Cluster
// =============================================================================

/// A ready-wired mock cluster: transport, resolver, health store, codec.
pub struct MockCluster {
    pub net: Arc<MockNet>,
    pub states: Arc<TargetStateStore>,
}

impl MockCluster {
    /// Plain striping over targets `1..=n`, all online and good.
    pub fn raid0(n: u16, chunk_size: u64) -> (Self, crate::StripePattern) {
        let cluster = Self {
            net: Arc::new(MockNet::new()),
            states: Arc::new(TargetStateStore::new()),
        };

        let targets: Vec<TargetId> = (1..=n).map(TargetId).collect();
        for &target in &targets {
            cluster.net.add_target(target);
            cluster.mark_good(target);
        }

        let pattern =
            crate::StripePattern::new(crate::PatternKind::Raid0, chunk_size, targets)
                .expect("valid test pattern");
        (cluster, pattern)
    }

    /// Mirrored striping over groups `1..=n`; group g maps to primary
    /// `100 + g` and secondary `200 + g`, all online and good.
    pub fn mirrored(n: u16, chunk_size: u64) -> (Self, crate::StripePattern) {
        let cluster = Self {
            net: Arc::new(MockNet::new()),
            states: Arc::new(TargetStateStore::new()),
        };

        let groups: Vec<TargetId> = (1..=n).map(TargetId).collect();
        for &group in &groups {
            let primary = TargetId(100 + group.0);
            let secondary = TargetId(200 + group.0);
            cluster.net.add_mirror_group(group, primary, secondary);
            cluster.mark_good(primary);
            cluster.mark_good(secondary);
        }

        let pattern =
            crate::StripePattern::new(crate::PatternKind::BuddyMirror, chunk_size, groups)
                .expect("valid test pattern");
        (cluster, pattern)
    }

    /// Primary target of mirror group `g` under the `mirrored` layout.
    pub fn primary(group: u16) -> TargetId {
        TargetId(100 + group)
    }

    /// Secondary target of mirror group `g` under the `mirrored` layout.
    pub fn secondary(group: u16) -> TargetId {
        TargetId(200 + group)
    }

    pub fn mark_good(&self, target: TargetId) {
        self.states.set_state(
            target,
            TargetHealth::new(Reachability::Online, Consistency::Good),
        );
    }

    pub fn set_state(
        &self,
        target: TargetId,
        reachability: Reachability,
        consistency: Consistency,
    ) {
        self.states
            .set_state(target, TargetHealth::new(reachability, consistency));
    }

    /// Build an engine over this cluster's collaborators.
    pub fn engine(&self, config: EngineConfig) -> IoEngine {
        IoEngine::new(
            config,
            Arc::clone(&self.net) as Arc<dyn Transport>,
            Arc::clone(&self.states) as Arc<dyn crate::TargetHealthOracle>,
            Arc::clone(&self.net) as Arc<dyn ReplicaResolver>,
            Arc::new(MockCodec),
        )
        .expect("valid test engine config")
    }
}

/// Engine config with test-friendly short delays.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        retry_backoff_base: Duration::from_millis(1),
        retry_backoff_cap: Duration::from_millis(2),
        state_cooldown: Duration::from_millis(5),
        poll_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::QuotaInfo;

    // =========================================================================
    // Codec Tests
    // =========================================================================

    #[test]
    fn test_codec_read_request_roundtrip() {
        let codec = MockCodec;
        let req = ReadRequest {
            handle_id: "h-42",
            target: TargetId(7),
            local_offset: 8192,
            len: 4096,
            flags: RequestFlags {
                session_check: true,
                mirror: true,
                mirror_second: false,
                mirror_forward: false,
                disable_io: true,
            },
        };

        let bytes = codec.encode_read(&req);
        let parsed = parse_request(&bytes).unwrap();

        assert!(!parsed.write);
        assert_eq!(parsed.target, TargetId(7));
        assert_eq!(parsed.local_offset, 8192);
        assert_eq!(parsed.len, 4096);
        assert!(parsed.flags.session_check);
        assert!(parsed.flags.mirror);
        assert!(!parsed.flags.mirror_second);
        assert!(parsed.flags.disable_io);
    }

    #[test]
    fn test_codec_write_request_carries_quota() {
        let codec = MockCodec;
        let req = WriteRequest {
            handle_id: "h",
            target: TargetId(1),
            local_offset: 0,
            len: 16,
            flags: RequestFlags::default(),
            quota: Some(QuotaInfo { uid: 1000, gid: 100 }),
        };

        let parsed = parse_request(&codec.encode_write(&req)).unwrap();
        assert!(parsed.write);
        assert_eq!(parsed.uid, 1000);
        assert_eq!(parsed.gid, 100);
    }

    #[test]
    fn test_codec_write_response_roundtrip() {
        let codec = MockCodec;
        let bytes = encode_write_response(-3);
        assert_eq!(
            codec.decode_write_response(&bytes).unwrap(),
            WriteResponse { value: -3 }
        );

        assert!(codec.decode_write_response(&bytes[..4]).is_err());
    }

    // =========================================================================
    // Transport Tests
    // =========================================================================

    #[test]
    fn test_acquire_defer_only_applies_without_wait() {
        let net = MockNet::new();
        net.add_target(TargetId(1));
        net.defer_acquires(TargetId(1), 1);

        let node = net.resolve_node(TargetId(1)).unwrap();
        assert!(net.acquire(&node, false).unwrap().is_none());
        assert!(net.acquire(&node, false).unwrap().is_some());
    }

    #[test]
    fn test_read_stream_served_in_pieces() {
        let net = MockNet::new();
        net.add_target(TargetId(1));
        net.set_target_data(TargetId(1), (0..32).collect());
        net.set_read_piece(TargetId(1), 10);

        let node = net.resolve_node(TargetId(1)).unwrap();
        let mut conn = net.acquire(&node, true).unwrap().unwrap();

        let codec = MockCodec;
        let req = codec.encode_read(&ReadRequest {
            handle_id: "h",
            target: TargetId(1),
            local_offset: 0,
            len: 32,
            flags: RequestFlags::default(),
        });
        conn.send(&req).unwrap();

        // stream: 10 + 10 + 10 + 2 byte pieces, each with a prefix, then 0
        let mut prefix = [0u8; DATA_LEN_PREFIX_SIZE];
        let mut collected = Vec::new();
        loop {
            conn.recv_exact(&mut prefix).unwrap();
            let len = codec.decode_data_len(&prefix);
            if len == 0 {
                break;
            }
            let mut piece = vec![0u8; len as usize];
            conn.recv_exact(&mut piece).unwrap();
            collected.extend(piece);
        }
        assert_eq!(collected, (0..32).collect::<Vec<u8>>());
    }

    #[test]
    fn test_write_applies_to_target_data() {
        let net = MockNet::new();
        net.add_target(TargetId(2));

        let node = net.resolve_node(TargetId(2)).unwrap();
        let mut conn = net.acquire(&node, true).unwrap().unwrap();

        let codec = MockCodec;
        let req = codec.encode_write(&WriteRequest {
            handle_id: "h",
            target: TargetId(2),
            local_offset: 4,
            len: 3,
            flags: RequestFlags::default(),
            quota: None,
        });
        conn.send(&req).unwrap();
        conn.send(b"abc").unwrap();

        let mut resp = [0u8; 13];
        conn.recv_exact(&mut resp).unwrap();
        assert_eq!(
            codec.decode_write_response(&resp).unwrap(),
            WriteResponse { value: 3 }
        );

        assert_eq!(net.target_data(TargetId(2)), b"\0\0\0\0abc".to_vec());
        assert_eq!(net.writes_to(TargetId(2)), vec![(4, b"abc".to_vec())]);
    }
}
