// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Server-side sessions: the stateful handles required to run schema
//! operations, queries and transactions, bound for life to the endpoint they
//! were created on.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{instrument, trace, warn};

use crate::{
    discovery::Endpoint,
    error::{ErrorClass, YdbError},
    grpc::api,
    retry::{with_retries, RetryParameters},
    table::TableDescription,
};

/// How a statement participates in a transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionMode {
    SerializableReadWrite,
    OnlineReadOnly,
    StaleReadOnly,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionSettings {
    pub mode: TransactionMode,
}

/// Selects the transaction a statement runs in: an already-open one, or a
/// fresh one opened by the server for this statement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TxSelector {
    Id(String),
    Begin(TransactionSettings),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransactionControl {
    pub selector: TxSelector,
    pub commit_tx: bool,
}

/// A query to execute: raw YQL text or a handle previously returned by
/// [`Session::prepare_query`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Query {
    Yql(String),
    Prepared(PreparedQuery),
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::Yql(text.to_string())
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::Yql(text)
    }
}

impl From<PreparedQuery> for Query {
    fn from(prepared: PreparedQuery) -> Self {
        Query::Prepared(prepared)
    }
}

/// A server-side prepared statement handle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreparedQuery {
    pub query_id: String,
}

/// Result of one `execute_query` call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub result_sets: Vec<api::ResultSet>,
    pub tx_id: Option<String>,
}

/// Query parameters, keyed by their `$name` placeholders.
pub type QueryParams = HashMap<String, api::TypedValue>;

/// Lifecycle notifications from a session to its pool. There is exactly one
/// subscriber, installed when the session is created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    Released(String),
    Broken(String),
}

/// The wire operations a session issues, behind a seam so the pool and
/// session logic can be exercised against scripted servers.
#[async_trait]
pub trait TableRpc: Send + Sync + fmt::Debug {
    async fn create_session(&self) -> Result<String, YdbError>;
    async fn delete_session(&self, session_id: &str) -> Result<(), YdbError>;
    async fn keep_alive(&self, session_id: &str) -> Result<(), YdbError>;
    async fn create_table(
        &self,
        session_id: &str,
        path: &str,
        description: &TableDescription,
    ) -> Result<(), YdbError>;
    async fn drop_table(&self, session_id: &str, path: &str) -> Result<(), YdbError>;
    async fn describe_table(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<TableDescription, YdbError>;
    async fn begin_transaction(
        &self,
        session_id: &str,
        settings: TransactionSettings,
    ) -> Result<String, YdbError>;
    async fn commit_transaction(&self, session_id: &str, tx_id: &str) -> Result<(), YdbError>;
    async fn rollback_transaction(&self, session_id: &str, tx_id: &str) -> Result<(), YdbError>;
    async fn prepare_query(&self, session_id: &str, yql: &str) -> Result<String, YdbError>;
    async fn execute_query(
        &self,
        session_id: &str,
        query: &Query,
        parameters: QueryParams,
        tx_control: &TransactionControl,
    ) -> Result<QueryResult, YdbError>;
}

/// A server-side session handle.
///
/// Freshly created sessions are free; the pool acquires and releases them.
/// `Broken` is an orthogonal flag set when a response classifies as a
/// session-scoped failure, and `Deleted` is terminal.
pub struct Session {
    id: String,
    endpoint: Endpoint,
    database: String,
    rpc: Arc<dyn TableRpc>,
    retry: RetryParameters,
    acquired: AtomicBool,
    broken: AtomicBool,
    deleted: AtomicBool,
    events: UnboundedSender<SessionEvent>,
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("acquired", &self.acquired.load(Ordering::SeqCst))
            .field("broken", &self.broken.load(Ordering::SeqCst))
            .field("deleted", &self.deleted.load(Ordering::SeqCst))
            .finish()
    }
}

impl Session {
    /// The default transaction control: begin a serializable read-write
    /// transaction and commit it at statement end.
    pub const AUTO_TX: TransactionControl = TransactionControl {
        selector: TxSelector::Begin(TransactionSettings {
            mode: TransactionMode::SerializableReadWrite,
        }),
        commit_tx: true,
    };

    pub(crate) fn new(
        id: String,
        endpoint: Endpoint,
        database: String,
        rpc: Arc<dyn TableRpc>,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            endpoint,
            database,
            rpc,
            retry: RetryParameters::default(),
            acquired: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Free, not broken, not deleted: eligible to be handed to an acquirer.
    pub(crate) fn is_free(&self) -> bool {
        !self.acquired.load(Ordering::SeqCst)
            && !self.broken.load(Ordering::SeqCst)
            && !self.deleted.load(Ordering::SeqCst)
    }

    /// Claims the session; returns whether it was free.
    pub(crate) fn acquire(&self) -> bool {
        !self.acquired.swap(true, Ordering::SeqCst)
    }

    /// Returns the session to the free state and notifies the pool, which
    /// may hand it to a queued waiter.
    pub fn release(&self) {
        if self.acquired.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(SessionEvent::Released(self.id.clone()));
        }
    }

    /// Drops the acquired flag without emitting an event. Used by the pool
    /// when undoing a handover to a vanished waiter.
    pub(crate) fn unacquire(&self) {
        self.acquired.store(false, Ordering::SeqCst);
    }

    /// Whether a response has classified this session as unusable.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            trace!(session = %self.id, "session is broken");
            let _ = self.events.send(SessionEvent::Broken(self.id.clone()));
        }
    }

    /// Flags the session as broken when `result` carries a session-scoped
    /// failure, then passes the result through.
    fn observe<T>(&self, result: Result<T, YdbError>) -> Result<T, YdbError> {
        if let Err(error) = &result {
            if error.classify() == ErrorClass::SessionBroken {
                self.mark_broken();
            }
        }
        result
    }

    fn full_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.database, path)
        }
    }

    #[instrument(target = "session", skip_all, fields(session = %self.id))]
    pub async fn keep_alive(&self) -> Result<(), YdbError> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(YdbError::Destroyed("session"));
        }
        let result = with_retries(&self.retry, || self.rpc.keep_alive(&self.id)).await;
        self.observe(result)
    }

    #[instrument(target = "session", skip_all, fields(session = %self.id, path))]
    pub async fn create_table(
        &self,
        path: &str,
        description: TableDescription,
    ) -> Result<(), YdbError> {
        let path = self.full_path(path);
        let result = with_retries(&self.retry, || {
            self.rpc.create_table(&self.id, &path, &description)
        })
        .await;
        self.observe(result)
    }

    /// Drops a table. A scheme error (for instance because the table does
    /// not exist) counts as success.
    #[instrument(target = "session", skip_all, fields(session = %self.id, path))]
    pub async fn drop_table(&self, path: &str) -> Result<(), YdbError> {
        let path = self.full_path(path);
        let result = with_retries(&self.retry, || self.rpc.drop_table(&self.id, &path)).await;
        match self.observe(result) {
            Err(error) if error.is_scheme_error() => {
                trace!(%error, "tolerating scheme error on drop");
                Ok(())
            }
            other => other,
        }
    }

    #[instrument(target = "session", skip_all, fields(session = %self.id, path))]
    pub async fn describe_table(&self, path: &str) -> Result<TableDescription, YdbError> {
        let path = self.full_path(path);
        let result = with_retries(&self.retry, || self.rpc.describe_table(&self.id, &path)).await;
        self.observe(result)
    }

    /// Opens a transaction and returns its id.
    #[instrument(target = "session", skip_all, fields(session = %self.id))]
    pub async fn begin_transaction(
        &self,
        settings: TransactionSettings,
    ) -> Result<String, YdbError> {
        let result = with_retries(&self.retry, || {
            self.rpc.begin_transaction(&self.id, settings)
        })
        .await;
        self.observe(result)
    }

    #[instrument(target = "session", skip_all, fields(session = %self.id, tx_id))]
    pub async fn commit_transaction(&self, tx_id: &str) -> Result<(), YdbError> {
        let result = with_retries(&self.retry, || {
            self.rpc.commit_transaction(&self.id, tx_id)
        })
        .await;
        self.observe(result)
    }

    #[instrument(target = "session", skip_all, fields(session = %self.id, tx_id))]
    pub async fn rollback_transaction(&self, tx_id: &str) -> Result<(), YdbError> {
        let result = with_retries(&self.retry, || {
            self.rpc.rollback_transaction(&self.id, tx_id)
        })
        .await;
        self.observe(result)
    }

    /// Prepares a YQL statement server-side and returns its handle.
    #[instrument(target = "session", skip_all, fields(session = %self.id))]
    pub async fn prepare_query(&self, yql: &str) -> Result<PreparedQuery, YdbError> {
        let result = with_retries(&self.retry, || self.rpc.prepare_query(&self.id, yql)).await;
        self.observe(result)
            .map(|query_id| PreparedQuery { query_id })
    }

    /// Executes a query in a single attempt. Retries are the caller's
    /// responsibility, composed through the retry engine, because replaying
    /// a statement inside an open transaction is not generally safe.
    ///
    /// When `tx_control` is `None`, [`Session::AUTO_TX`] is used.
    #[instrument(target = "session", skip_all, fields(session = %self.id))]
    pub async fn execute_query(
        &self,
        query: impl Into<Query>,
        parameters: QueryParams,
        tx_control: Option<TransactionControl>,
    ) -> Result<QueryResult, YdbError> {
        let tx_control = tx_control.unwrap_or(Session::AUTO_TX);
        let result = self
            .rpc
            .execute_query(&self.id, &query.into(), parameters, &tx_control)
            .await;
        self.observe(result)
    }

    /// Deletes the server-side session. Idempotent: only the first call
    /// issues the RPC, and the deleted state is terminal.
    #[instrument(target = "session", skip_all, fields(session = %self.id))]
    pub async fn delete(&self) -> Result<(), YdbError> {
        if self.deleted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = with_retries(&self.retry, || self.rpc.delete_session(&self.id)).await;
        if let Err(error) = &result {
            warn!(session = %self.id, %error, "failed to delete session");
        }
        self.observe(result)
    }
}
