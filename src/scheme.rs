// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The scheme client. Schema-service operations live behind the same
//! session and retry plumbing as the table client; only that plumbing is
//! part of the runtime.

use std::{sync::Arc, time::Duration};

use crate::{
    error::YdbError,
    session::Session,
    session_pool::{SessionPool, SessionPoolSettings, SessionProvider},
};

pub struct SchemeClient {
    pool: SessionPool,
}

impl SchemeClient {
    pub(crate) fn new(provider: Arc<dyn SessionProvider>, settings: SessionPoolSettings) -> Self {
        Self {
            pool: SessionPool::new(provider, settings),
        }
    }

    /// Runs `operation` on a pooled session.
    pub async fn with_session<T, F, Fut>(
        &self,
        operation: F,
        timeout: Option<Duration>,
    ) -> Result<T, YdbError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: std::future::Future<Output = Result<T, YdbError>>,
    {
        self.pool.with_session(operation, timeout).await
    }

    pub async fn destroy(&self) {
        self.pool.destroy().await;
    }
}
