//! splitcache - hybrid block-cache split-ratio engine
//!
//! `splitcache` is the core of a hybrid block-cache that splits a read
//! workload between a fast local cache device and a remote backend volume
//! reached over an RDMA transport whose throughput varies with contention.
//! It decides, for every incoming read, whether to serve from cache, serve
//! from the backend, and/or promote the result into cache, so that
//! aggregate throughput stays high as network conditions change.
//!
//! # Architecture
//!
//! - **Bandwidth table** ([`bandwidth`]): pure `(io_depth, num_jobs, split%)
//!   -> IOPS` lookup.
//! - **Network monitor** ([`network`]): samples RDMA latency/throughput and
//!   derives IOPS from cumulative counters.
//! - **Split controller** ([`controller`]): a background mode machine that
//!   turns network samples into a published split ratio and data-admit
//!   flag.
//! - **Admission source** ([`admission`]): the boundary the spec calls out
//!   as a process-wide "simple monitor vs. netCAS" toggle, modeled here as
//!   the [`admission::AdmissionSource`] trait so the choice is made once,
//!   polymorphically, at cache-instance construction.
//! - **Load-admit dispatcher** ([`dispatcher`]): turns the published split
//!   ratio into a deterministic per-request cache/backend decision.
//! - **MFCWT engines** ([`engine_mfcwt`]): the read and write request state
//!   machines that consult the above and drive the out-of-scope
//!   collaborators in [`collab`].
//!
//! Cache metadata layout, cache-line locking, block IO submission, stats
//! accounting, pass-through/invalidate/backfill engines, and the RDMA
//! reporting mechanism itself are external collaborators, specified here
//! only as the traits in [`collab`] that this crate depends on.

pub mod admission;
pub mod bandwidth;
pub mod collab;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod engine_mfcwt;
pub mod error;
pub mod network;
pub mod request;
pub mod stats;
pub mod util;

pub use admission::AdmissionSource;
pub use config::Tunables;
pub use controller::SplitController;
pub use dispatcher::Dispatcher;
pub use error::SplitcacheError;
pub use request::{LoadAdmitDecision, Mapping, Request};

/// Result type used throughout splitcache's fallible setup paths.
///
/// Per-request failure modes that callers need to match on use
/// [`SplitcacheError`] directly instead.
pub type Result<T> = anyhow::Result<T>;
