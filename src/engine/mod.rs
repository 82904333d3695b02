//! Parallel I/O engine
//!
//! The client-side data path: one logical read or write of a byte range
//! becomes a sequence of stripe-set rounds, each round a set of parallel
//! per-target exchanges driven by a cooperative, non-blocking round
//! driver.
//!
//! # Architecture
//!
//! ```text
//! read()/write()
//!      │
//!      ▼
//! ┌──────────────────┐   per round   ┌─────────────────────────────┐
//! │ stripe planner   │──────────────▶│ round driver                │
//! │ (offset → spans) │               │  ┌───────────┐ ┌──────────┐ │
//! └──────────────────┘               │  │ exchange 0│…│exchange N│ │
//!      ▲                             │  └───────────┘ └──────────┘ │
//!      │ next offset                 │   readiness wait + retry/   │
//!      │                             │   failover policy           │
//! ┌──────────────────┐               └──────────────┬──────────────┘
//! │ result verifier  │◀─────────────────────────────┘
//! │ (outcomes → one  │    per-target outcomes
//! │  logical result) │
//! └──────────────────┘
//! ```
//!
//! The engine owns no sockets and no health state; targets, nodes,
//! connections and message encoding come from the collaborator ports in
//! [`target`](crate::target), [`conn`](crate::conn) and
//! [`wire`](crate::wire).

mod driver;
mod exchange;
mod read;
mod retry;
mod verify;
mod write;

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::instrument;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::conn::Transport;
use crate::error::{Error, Result};
use crate::stats::EngineStats;
use crate::striping::{plan_round, StripePattern};
use crate::target::{ReplicaResolver, TargetHealthOracle};
use crate::wire::{QuotaInfo, WireCodec};

use exchange::{Direction, Exchange, RoundContext};
use read::ReadDir;
use verify::{verify_read, verify_write, ReadRoundResult, RoundEntry, WriteRoundResult};
use write::WriteDir;

// =============================================================================
// File Handle
// =============================================================================

/// Per-open-file I/O context.
///
/// Carries the striping layout plus the session-scoped state the engine
/// maintains across calls: which targets have already accepted a write
/// (drives the idempotent session-check request flag), the quota identity
/// forwarded on writes, and the highest stripe target index the session
/// has touched.
pub struct FileHandle {
    handle_id: String,
    pattern: StripePattern,
    first_write_done: Mutex<Vec<bool>>,
    quota: Option<QuotaInfo>,
    prefer_secondary_read: bool,
    max_used_target_index: AtomicI32,
}

impl FileHandle {
    /// Create a handle for one open file.
    pub fn new(handle_id: impl Into<String>, pattern: StripePattern) -> Self {
        let target_count = pattern.target_count();
        Self {
            handle_id: handle_id.into(),
            pattern,
            first_write_done: Mutex::new(vec![false; target_count]),
            quota: None,
            prefer_secondary_read: false,
            max_used_target_index: AtomicI32::new(-1),
        }
    }

    /// Attach the owner identity forwarded on writes when quota
    /// accounting is enabled.
    pub fn with_quota(mut self, quota: QuotaInfo) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Prefer the secondary replica for mirrored reads (spreads read load
    /// across the buddy group).
    pub fn with_prefer_secondary_read(mut self, prefer: bool) -> Self {
        self.prefer_secondary_read = prefer;
        self
    }

    pub fn id(&self) -> &str {
        &self.handle_id
    }

    pub fn pattern(&self) -> &StripePattern {
        &self.pattern
    }

    pub fn quota(&self) -> Option<QuotaInfo> {
        self.quota
    }

    pub fn prefer_secondary_read(&self) -> bool {
        self.prefer_secondary_read
    }

    /// Whether a write to the target at `target_index` already succeeded
    /// in this session.
    pub fn first_write_done(&self, target_index: usize) -> bool {
        self.first_write_done
            .lock()
            .get(target_index)
            .copied()
            .unwrap_or(false)
    }

    pub(crate) fn mark_first_write_done(&self, target_index: usize) {
        let mut bits = self.first_write_done.lock();
        if let Some(bit) = bits.get_mut(target_index) {
            *bit = true;
        }
    }

    /// Highest stripe target index touched so far (-1 before any I/O).
    pub fn max_used_target_index(&self) -> i32 {
        self.max_used_target_index.load(Ordering::Relaxed)
    }

    fn note_used_target_index(&self, index: i32) {
        self.max_used_target_index
            .fetch_max(index, Ordering::Relaxed);
    }
}

// =============================================================================
// I/O Engine
// =============================================================================

/// The parallel I/O engine.
///
/// Thread-safe: the engine itself holds no per-call state, so concurrent
/// calls only share the collaborator ports (which must be thread-safe on
/// their own) and the statistics counters.
pub struct IoEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    oracle: Arc<dyn TargetHealthOracle>,
    resolver: Arc<dyn ReplicaResolver>,
    codec: Arc<dyn WireCodec>,
    stats: Arc<EngineStats>,
    round_seq: AtomicU64,
}

impl std::fmt::Debug for IoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IoEngine {
    /// Create an engine over the given collaborators.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        oracle: Arc<dyn TargetHealthOracle>,
        resolver: Arc<dyn ReplicaResolver>,
        codec: Arc<dyn WireCodec>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            transport,
            oracle,
            resolver,
            codec,
            stats: Arc::new(EngineStats::default()),
            round_seq: AtomicU64::new(0),
        })
    }

    /// Get engine statistics.
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    fn round_context<'a>(&'a self, handle: &'a FileHandle, cancel: &'a CancelToken) -> RoundContext<'a> {
        RoundContext {
            config: &self.config,
            transport: self.transport.as_ref(),
            oracle: self.oracle.as_ref(),
            resolver: self.resolver.as_ref(),
            codec: self.codec.as_ref(),
            stats: self.stats.as_ref(),
            cancel,
            handle,
            mirrored: handle.pattern().is_mirrored(),
        }
    }

    /// Read `dest.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; fewer than requested means the
    /// end of the data was reached. On an error, some prefix of the range
    /// may or may not have been transferred.
    #[instrument(skip_all, fields(handle = handle.id(), offset, len = dest.len()))]
    pub fn read(
        &self,
        handle: &FileHandle,
        offset: u64,
        dest: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<usize> {
        let pattern = handle.pattern();
        let max_spans = self.config.max_fan_out.min(pattern.target_count());
        let ctx = self.round_context(handle, cancel);

        let mut usable: u64 = 0;
        let mut current = offset;
        let mut to_read = dest.len() as u64;
        let mut remaining: &mut [u8] = dest;
        let mut max_used = handle.max_used_target_index();

        let result = loop {
            if to_read == 0 {
                break Ok(usable as usize);
            }

            let spans = plan_round(pattern, current, to_read, max_spans);

            let mut exchanges = Vec::with_capacity(spans.len());
            for (slot, span) in spans.iter().enumerate() {
                let tail = std::mem::take(&mut remaining);
                let (chunk, rest) = tail.split_at_mut(span.len as usize);
                remaining = rest;

                max_used = max_used.max(span.target_index as i32);

                let mut ex = Exchange::new(
                    slot,
                    span,
                    ReadDir::new(chunk),
                    handle.first_write_done(span.target_index),
                );
                ex.use_secondary = ctx.mirrored && handle.prefer_secondary_read();
                exchanges.push(ex);

                self.stats.record_remote_read();
                current += span.len;
                to_read -= span.len;
            }

            let seq = self.round_seq.fetch_add(1, Ordering::Relaxed);
            driver::communicate(&ctx, &mut exchanges, seq);

            let entries = collect_entries(&exchanges);
            match verify_read(&entries, handle.id(), usable) {
                ReadRoundResult::Complete { usable: new_usable } => usable = new_usable,
                ReadRoundResult::EndOfData { total } => break Ok(total as usize),
                ReadRoundResult::Failed(err) => break Err(err),
            }
        };

        handle.note_used_target_index(max_used);
        self.account_result(&result);
        result
    }

    /// Write `src` starting at `offset`.
    ///
    /// Returns the number of bytes written; fewer than requested means a
    /// target stopped accepting data (typically a full device). On an
    /// error, some prefix of the range may or may not have been
    /// transferred.
    #[instrument(skip_all, fields(handle = handle.id(), offset, len = src.len()))]
    pub fn write(
        &self,
        handle: &FileHandle,
        offset: u64,
        src: &[u8],
        cancel: &CancelToken,
    ) -> Result<usize> {
        let pattern = handle.pattern();
        let max_spans = self.config.max_fan_out.min(pattern.target_count());
        let ctx = self.round_context(handle, cancel);

        let mut written: u64 = 0;
        let mut current = offset;
        let mut to_write = src.len() as u64;
        let mut remaining: &[u8] = src;
        let mut max_used = handle.max_used_target_index();

        let result = loop {
            if to_write == 0 {
                break Ok(written as usize);
            }

            let spans = plan_round(pattern, current, to_write, max_spans);
            let round_expected: u64 = spans.iter().map(|s| s.len).sum();

            let mut exchanges = Vec::with_capacity(spans.len());
            for (slot, span) in spans.iter().enumerate() {
                let (chunk, rest) = remaining.split_at(span.len as usize);
                remaining = rest;

                max_used = max_used.max(span.target_index as i32);

                let ex = Exchange::new(
                    slot,
                    span,
                    WriteDir::new(chunk),
                    handle.first_write_done(span.target_index),
                );
                exchanges.push(ex);

                self.stats.record_remote_write();
                current += span.len;
                to_write -= span.len;
            }

            let seq = self.round_seq.fetch_add(1, Ordering::Relaxed);
            driver::communicate(&ctx, &mut exchanges, seq);

            let entries = collect_entries(&exchanges);
            match verify_write(&entries, handle, round_expected) {
                WriteRoundResult::Complete => written += round_expected,
                WriteRoundResult::ShortWrite { round_written } => {
                    break Ok((written + round_written) as usize);
                }
                WriteRoundResult::Failed(err) => break Err(err),
            }
        };

        handle.note_used_target_index(max_used);
        self.account_result_write(&result);
        result
    }

    fn account_result(&self, result: &Result<usize>) {
        match result {
            Ok(n) => self.stats.record_bytes_read(*n as u64),
            Err(Error::Interrupted) => self.stats.record_cancelled(),
            Err(_) => {}
        }
    }

    fn account_result_write(&self, result: &Result<usize>) {
        match result {
            Ok(n) => self.stats.record_bytes_written(*n as u64),
            Err(Error::Interrupted) => self.stats.record_cancelled(),
            Err(_) => {}
        }
    }
}

fn collect_entries<D: Direction>(exchanges: &[Exchange<'_, D>]) -> Vec<RoundEntry> {
    exchanges
        .iter()
        .map(|ex| RoundEntry {
            target: ex.target,
            target_index: ex.target_index,
            expected: ex.expected,
            outcome: ex.outcome.clone(),
        })
        .collect()
}
