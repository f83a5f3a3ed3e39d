// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The retry engine: a declarative wrapper that re-runs an operation while
//! its failures stay in a retryable class, with capped exponential backoff.

use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::trace;

use crate::error::{ErrorClass, YdbError};

/// Default maximum backoff exponent, giving a ceiling of `slot * 2^6` per
/// delay, in line with the usual gRPC connection-backoff recommendations:
/// <https://github.com/grpc/grpc/blob/master/doc/connection-backoff.md>
const DEFAULT_BACKOFF_CEILING: u32 = 6;

/// Configuration for [`with_retries`].
#[derive(Clone, Debug)]
pub struct RetryParameters {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Cap on the backoff exponent.
    pub backoff_ceiling: u32,
    /// Base delay unit for the exponential backoff.
    pub backoff_slot: Duration,
    /// Overall time budget across all attempts. `None` leaves the budget
    /// bounded by `max_retries` alone.
    pub deadline: Option<Duration>,
}

impl Default for RetryParameters {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_ceiling: DEFAULT_BACKOFF_CEILING,
            backoff_slot: Duration::from_millis(1000),
            deadline: None,
        }
    }
}

impl RetryParameters {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_slot(mut self, backoff_slot: Duration) -> Self {
        self.backoff_slot = backoff_slot;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The delay before retry number `attempt`: `slot * 2^min(attempt,
    /// ceiling)` plus up to one slot of jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.backoff_ceiling);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let base = self.backoff_slot.saturating_mul(factor);
        let slot_ms = self.backoff_slot.as_millis() as u64;
        let jitter = if slot_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..slot_ms))
        } else {
            Duration::ZERO
        };
        base + jitter
    }
}

/// Runs `op`, retrying failures classified as retryable until one attempt
/// succeeds, the retry budget runs out, or a non-retryable error surfaces.
/// The last classified error is re-raised.
///
/// Fast-class errors retry immediately the first time and back off
/// exponentially afterwards; slow-class errors always back off.
pub async fn with_retries<T, F, Fut>(params: &RetryParameters, mut op: F) -> Result<T, YdbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, YdbError>>,
{
    let started = tokio::time::Instant::now();
    let mut attempt = 0;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let class = error.classify();
        let retryable = matches!(class, ErrorClass::RetryableFast | ErrorClass::RetryableSlow);
        if !retryable || attempt >= params.max_retries {
            return Err(error);
        }
        if let Some(deadline) = params.deadline {
            if started.elapsed() >= deadline {
                return Err(error);
            }
        }
        let delay = if class == ErrorClass::RetryableFast && attempt == 0 {
            Duration::ZERO
        } else {
            params.backoff_delay(attempt)
        };
        trace!(attempt, ?delay, %error, "retrying operation");
        attempt += 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
