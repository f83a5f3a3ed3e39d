// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scripted implementations of the RPC seams, standing in for a cluster in
//! unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    discovery::{DiscoveryRpc, Endpoint},
    error::{StatusCode, YdbError},
    grpc::api,
    session::{
        Query, QueryParams, QueryResult, Session, SessionEvent, TableRpc, TransactionControl,
        TransactionSettings,
    },
    session_pool::SessionProvider,
    table::TableDescription,
};

pub(crate) fn bad_session() -> YdbError {
    YdbError::ServerStatus {
        code: StatusCode::BadSession,
        message: "session no longer exists".to_string(),
    }
}

fn scheme_error(message: &str) -> YdbError {
    YdbError::ServerStatus {
        code: StatusCode::SchemeError,
        message: message.to_string(),
    }
}

/// A scripted table service: an in-memory schema registry, per-method call
/// counters, and injectable failures.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTableRpc {
    next_id: AtomicU32,
    calls: Mutex<HashMap<&'static str, u32>>,
    failures: Mutex<HashMap<&'static str, VecDeque<YdbError>>>,
    tables: Mutex<HashMap<String, TableDescription>>,
    last_tx_control: Mutex<Option<TransactionControl>>,
}

impl ScriptedTableRpc {
    /// Schedules the next call of `method` to fail with `error`.
    pub(crate) fn enqueue_failure(&self, method: &'static str, error: YdbError) {
        self.failures
            .lock()
            .expect("failures lock")
            .entry(method)
            .or_default()
            .push_back(error);
    }

    pub(crate) fn calls(&self, method: &'static str) -> u32 {
        *self
            .calls
            .lock()
            .expect("calls lock")
            .get(method)
            .unwrap_or(&0)
    }

    pub(crate) fn table_paths(&self) -> Vec<String> {
        self.tables
            .lock()
            .expect("tables lock")
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn last_tx_control(&self) -> Option<TransactionControl> {
        self.last_tx_control
            .lock()
            .expect("tx control lock")
            .clone()
    }

    fn enter(&self, method: &'static str) -> Result<(), YdbError> {
        *self
            .calls
            .lock()
            .expect("calls lock")
            .entry(method)
            .or_insert(0) += 1;
        if let Some(error) = self
            .failures
            .lock()
            .expect("failures lock")
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(())
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl TableRpc for ScriptedTableRpc {
    async fn create_session(&self) -> Result<String, YdbError> {
        self.enter("create_session")?;
        Ok(self.next("session"))
    }

    async fn delete_session(&self, _session_id: &str) -> Result<(), YdbError> {
        self.enter("delete_session")
    }

    async fn keep_alive(&self, _session_id: &str) -> Result<(), YdbError> {
        self.enter("keep_alive")
    }

    async fn create_table(
        &self,
        _session_id: &str,
        path: &str,
        description: &TableDescription,
    ) -> Result<(), YdbError> {
        self.enter("create_table")?;
        self.tables
            .lock()
            .expect("tables lock")
            .insert(path.to_string(), description.clone());
        Ok(())
    }

    async fn drop_table(&self, _session_id: &str, path: &str) -> Result<(), YdbError> {
        self.enter("drop_table")?;
        match self.tables.lock().expect("tables lock").remove(path) {
            Some(_) => Ok(()),
            None => Err(scheme_error("path does not exist")),
        }
    }

    async fn describe_table(
        &self,
        _session_id: &str,
        path: &str,
    ) -> Result<TableDescription, YdbError> {
        self.enter("describe_table")?;
        self.tables
            .lock()
            .expect("tables lock")
            .get(path)
            .cloned()
            .ok_or_else(|| scheme_error("path does not exist"))
    }

    async fn begin_transaction(
        &self,
        _session_id: &str,
        _settings: TransactionSettings,
    ) -> Result<String, YdbError> {
        self.enter("begin_transaction")?;
        Ok(self.next("tx"))
    }

    async fn commit_transaction(&self, _session_id: &str, _tx_id: &str) -> Result<(), YdbError> {
        self.enter("commit_transaction")
    }

    async fn rollback_transaction(&self, _session_id: &str, _tx_id: &str) -> Result<(), YdbError> {
        self.enter("rollback_transaction")
    }

    async fn prepare_query(&self, _session_id: &str, _yql: &str) -> Result<String, YdbError> {
        self.enter("prepare_query")?;
        Ok(self.next("query"))
    }

    async fn execute_query(
        &self,
        _session_id: &str,
        query: &Query,
        _parameters: QueryParams,
        tx_control: &TransactionControl,
    ) -> Result<QueryResult, YdbError> {
        self.enter("execute_query")?;
        *self.last_tx_control.lock().expect("tx control lock") = Some(tx_control.clone());
        let result_sets = match query {
            Query::Yql(text) if text == "SELECT 1" => vec![api::ResultSet {
                columns: vec![api::ColumnMeta {
                    name: "column0".to_string(),
                    column_type: api::PrimitiveType::Int64 as i32,
                }],
                rows: vec![api::Row {
                    items: vec![api::TypedValue {
                        value: Some(api::typed_value::Value::Int64(1)),
                    }],
                }],
            }],
            _ => Vec::new(),
        };
        Ok(QueryResult {
            result_sets,
            tx_id: Some(self.next("tx")),
        })
    }
}

/// A scripted discovery service returning a programmable endpoint set.
#[derive(Debug)]
pub(crate) struct ScriptedDiscoveryRpc {
    endpoints: Mutex<Vec<Endpoint>>,
    fail: bool,
    calls: AtomicU32,
}

impl ScriptedDiscoveryRpc {
    pub(crate) fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: Mutex::new(endpoints),
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    /// A discovery service whose every call fails.
    pub(crate) fn failing() -> Self {
        Self {
            endpoints: Mutex::new(Vec::new()),
            fail: true,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        *self.endpoints.lock().expect("endpoints lock") = endpoints;
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryRpc for ScriptedDiscoveryRpc {
    async fn list_endpoints(&self, _database: &str) -> Result<Vec<Endpoint>, YdbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(YdbError::Transport {
                message: "discovery is unreachable".to_string(),
            });
        }
        Ok(self.endpoints.lock().expect("endpoints lock").clone())
    }
}

/// A session provider minting sessions against a scripted table service.
pub(crate) struct ScriptedProvider {
    rpc: Arc<ScriptedTableRpc>,
    endpoint: Endpoint,
}

impl ScriptedProvider {
    pub(crate) fn new(rpc: Arc<ScriptedTableRpc>) -> Self {
        Self {
            rpc,
            endpoint: Endpoint::new("scripted", 2135, 0.0),
        }
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn make_session(
        &self,
        events: UnboundedSender<SessionEvent>,
    ) -> Result<Arc<Session>, YdbError> {
        let session_id = self.rpc.create_session().await?;
        Ok(Arc::new(Session::new(
            session_id,
            self.endpoint.clone(),
            "/Root/test".to_string(),
            self.rpc.clone(),
            events,
        )))
    }
}
