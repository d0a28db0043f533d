// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error taxonomy.

use thiserror::Error;

/// Errors from store operations.
///
/// Precondition failures (retry on a non-failed item, cancel on a
/// non-pending one) are not errors: those return `None`/`false` from the
/// queue operations without side effects.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Operation invoked before `connect` (or after `disconnect`).
    #[error("store not connected")]
    NotConnected,

    /// Transport or server-side failure talking to the store.
    #[error("store I/O error: {0}")]
    Transport(#[from] ::redis::RedisError),
}
