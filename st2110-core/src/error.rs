//! Structured error kinds returned from library code.
//!
//! Binaries use `anyhow::Result` at their application boundary; this
//! library keeps that split but types its own boundary errors so
//! callers and statistics can distinguish *why* a tick produced
//! nothing, not just that it did.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    // --- Transient: recovered locally by the caller retrying next tick ---
    #[error("tx queue reported busy")]
    QueueBusy,
    #[error("application callback reported busy")]
    AppBusy,
    #[error("packet ring is full")]
    RingFull,
    #[error("packet ring is empty")]
    DequeueEmpty,

    // --- Recoverable: trigger a local recovery action ---
    #[error("tx queue burst returned zero for longer than the hang threshold")]
    TxHang,
    #[error("frame refcount was nonzero when picked by get_next_frame")]
    FrameRefcntNonzeroOnPick,

    // --- Fatal (session): session is marked inactive, app notified ---
    #[error("failed to rebind tx queue after fatal error")]
    QueueRebindFailed,
    #[error("failed to reallocate frame pool after fatal error")]
    MempoolAllocFailed,

    // --- Fatal (process): init aborts ---
    #[error("failed to attach lcore registry shared segment")]
    LcoreShmAttachFailed,
    #[error("failed to acquire lcore registry file lock")]
    FileLockFailed,
    #[error("no free lcore available for the requested socket")]
    NoCore,
    #[error("requested NUMA socket is invalid")]
    BadSocket,

    // --- Boundary errors ---
    #[error("frame user-metadata exceeds the configured per-frame buffer")]
    ErrTxFrame,
    #[error("app-supplied timestamp is in the past")]
    ErrUserTimestamp,

    // --- Session manager ---
    #[error("no free session slot for this kind")]
    NoSessionSlot,
    #[error("session is not active")]
    SessionInactive,
}

pub type CoreResult<T> = Result<T, CoreError>;
