//! Typed errors for the per-request failure modes a caller may need to
//! match on (§7 of the specification's error handling table).
//!
//! Fallible setup paths (building a [`crate::SplitController`], validating
//! [`crate::Tunables`]) use `anyhow` instead, via the crate-level
//! [`crate::Result`] alias — the same split the teacher's CLI uses between
//! `anyhow::Result` for "something in the call chain failed, report it"
//! and a dedicated enum where a caller branches on the kind of failure.

use thiserror::Error;

/// A per-request failure reported by the read/write engines.
///
/// Unlike the engines' internal retries (there are none — retry is a
/// property of the external pass-through/invalidate/backfill engines),
/// this enum is what ultimately reaches a request's completion callback
/// when the request did not succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitcacheError {
    /// Cache metadata could not satisfy the request; the engine forwarded
    /// it to pass-through and the callback still reports success.
    #[error("cache metadata could not map the request")]
    MappingError,

    /// Acquiring a cache-line lock failed.
    #[error("failed to acquire {0} lock on cache line")]
    LockError(LockKind),

    /// `submit_cache_reqs` reported a failure for one or more sub-requests.
    #[error("cache IO failed")]
    CacheIoError,

    /// `submit_volume_req` reported a failure for the backend request.
    #[error("backend IO failed")]
    BackendIoError,

    /// A page-aligned buffer could not be allocated for promotion.
    #[error("failed to allocate promotion buffer")]
    AllocationFailure,
}

/// Which lock kind was being acquired when [`SplitcacheError::LockError`]
/// was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKind::Read => write!(f, "read"),
            LockKind::Write => write!(f, "write"),
        }
    }
}
