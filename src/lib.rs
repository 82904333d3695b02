//! TideFS Client I/O Engine
//!
//! The client-side data path of the TideFS distributed file system: turns
//! one logical read or write of a byte range into a set of parallel,
//! per-target network exchanges, drives every exchange through a
//! non-blocking protocol state machine, aggregates the partial results,
//! and decides per target whether to retry, fail over to the mirror
//! buddy, or give up.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          IoEngine                              │
//! │                                                                │
//! │  offset → StripePattern/plan_round → Exchange per target       │
//! │                         │                                      │
//! │                         ▼                                      │
//! │        round driver: step all exchanges, wait once,            │
//! │        retry/failover policy when all survivors stall          │
//! │                         │                                      │
//! │                         ▼                                      │
//! │        result verifier: N target outcomes → 1 result           │
//! └────────────────────────────────────────────────────────────────┘
//!          │                │                  │
//!          ▼                ▼                  ▼
//!   TargetHealthOracle  ReplicaResolver   Transport + WireCodec
//!   (health snapshots)  (group → target   (connections, readiness
//!                        → node)           wait, message framing)
//! ```
//!
//! The engine is single-threaded and cooperative per call: the only
//! blocking point is the round driver's readiness wait. Sockets, health
//! state, target maps and message byte layout are collaborator ports
//! owned by the embedding client.
//!
//! # Modules
//!
//! - [`cancel`] - Caller-side cancellation token
//! - [`config`] - Engine configuration
//! - [`conn`] - Connection provider and readiness ports
//! - [`engine`] - Exchange state machines, round driver, entry points
//! - [`error`] - Error types and wire error codes
//! - [`mock`] - In-memory mock cluster for tests and embedder test suites
//! - [`stats`] - Engine statistics
//! - [`striping`] - Stripe arithmetic and round planning
//! - [`target`] - Target identities, health oracle, replica resolver
//! - [`wire`] - Request/response types and codec port

pub mod cancel;
pub mod config;
pub mod conn;
pub mod engine;
pub mod error;
pub mod mock;
pub mod stats;
pub mod striping;
pub mod target;
pub mod wire;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use engine::{FileHandle, IoEngine};
pub use error::{Error, Result};
pub use stats::{EngineStats, EngineStatsSnapshot};
pub use striping::{PatternKind, StripePattern};
pub use target::{
    Consistency, NodeHandle, NodeId, Reachability, ReplicaResolver, TargetHealth,
    TargetHealthOracle, TargetId, TargetStateStore,
};
