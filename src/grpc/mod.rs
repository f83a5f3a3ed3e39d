// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! gRPC plumbing: wire messages, channel construction and pooling, and the
//! per-endpoint client that attaches authentication metadata and reports
//! transport failures for pessimization.

pub mod api;
pub mod client;
mod conversions;
pub mod pool;

use std::{future::Future, time::Duration};

use crate::error::YdbError;

/// The maximum message size accepted and sent by the clients.
pub const GRPC_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Races a future against a timer; an elapsed timer wins as
/// [`YdbError::TimeoutExpired`] and the future is dropped, cancelling the
/// underlying call best-effort.
pub(crate) async fn with_timeout<F>(future: F, limit: Duration) -> Result<F::Output, YdbError>
where
    F: Future,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| YdbError::TimeoutExpired(limit))
}
