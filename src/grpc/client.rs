// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tonic::{Code, Request, Status};
use tracing::{debug, instrument, trace};

use super::{api, with_timeout};
use crate::{
    credentials::Credentials,
    discovery::{DiscoveryRpc, Endpoint, EndpointRegistry},
    error::{StatusCode, YdbError},
    session::{Query, QueryParams, QueryResult, TableRpc, TransactionControl, TransactionSettings},
    table::TableDescription,
};

/// A client bound to one endpoint's channel. Attaches auth metadata to every
/// unary call, races calls against the request timeout, and reports
/// transport-level failures for pessimization.
#[derive(Clone)]
pub struct GrpcClient {
    endpoint: Endpoint,
    database: String,
    credentials: Arc<dyn Credentials>,
    registry: Arc<EndpointRegistry>,
    table: api::TableServiceClient,
    discovery: api::DiscoveryServiceClient,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for GrpcClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("GrpcClient")
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Whether this gRPC status indicates a transport-level failure that should
/// pessimize the endpoint, as opposed to an application error carried in the
/// response body.
fn is_transport_status(status: &Status) -> bool {
    match status.code() {
        Code::DeadlineExceeded | Code::Unavailable | Code::Cancelled | Code::Unknown => true,
        // HTTP/2 connection reset errors are transient network issues, not
        // real internal errors.
        Code::Internal if status.message().contains("h2 protocol error") => true,
        _ => false,
    }
}

/// Fails on any embedded status other than success.
fn check_status(status: i32, issues: &str, handler: &'static str) -> Result<(), YdbError> {
    match StatusCode::from_wire(status) {
        StatusCode::Success => Ok(()),
        code => Err(YdbError::ServerStatus {
            code,
            message: if issues.is_empty() {
                format!("[{handler}] failed")
            } else {
                issues.to_string()
            },
        }),
    }
}

macro_rules! client_delegate {
    ($self:ident, $service:ident, $handler:ident, $req:expr) => {{
        $self
            .delegate(
                &$self.$service,
                |mut client, request| async move { client.$handler(request).await },
                $req,
                stringify!($handler),
            )
            .await
    }};
}

impl GrpcClient {
    pub fn new(
        endpoint: Endpoint,
        channel: tonic::transport::Channel,
        database: impl Into<String>,
        credentials: Arc<dyn Credentials>,
        registry: Arc<EndpointRegistry>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            endpoint,
            database: database.into(),
            credentials,
            registry,
            table: api::TableServiceClient::new(channel.clone()),
            discovery: api::DiscoveryServiceClient::new(channel),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn delegate<C, F, Fut, R, S>(
        &self,
        client: &C,
        f: F,
        request: R,
        handler: &'static str,
    ) -> Result<S, YdbError>
    where
        C: Clone,
        F: FnOnce(C, Request<R>) -> Fut,
        Fut: Future<Output = Result<tonic::Response<S>, Status>>,
    {
        let mut request = Request::new(request);
        let metadata = self.credentials.auth_metadata().await?;
        metadata.apply(request.metadata_mut())?;
        debug!(handler, endpoint = %self.endpoint, "sending gRPC request");

        let call = f(client.clone(), request);
        let outcome = match self.timeout {
            Some(limit) => match with_timeout(call, limit).await {
                Ok(outcome) => outcome,
                Err(expired) => {
                    self.registry.pessimize(&self.endpoint).await;
                    return Err(expired);
                }
            },
            None => call.await,
        };
        match outcome {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                if is_transport_status(&status) {
                    trace!(endpoint = %self.endpoint, code = ?status.code(), "transport failure");
                    self.registry.pessimize(&self.endpoint).await;
                }
                Err(YdbError::Transport {
                    message: format!("remote request [{handler}] failed with status: {status:?}"),
                })
            }
        }
    }
}

#[async_trait]
impl DiscoveryRpc for GrpcClient {
    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn list_endpoints(&self, database: &str) -> Result<Vec<Endpoint>, YdbError> {
        let request = api::ListEndpointsRequest {
            database: database.to_string(),
        };
        let response = client_delegate!(self, discovery, list_endpoints, request)?;
        check_status(response.status, &response.issues, "list_endpoints")?;
        let result = response
            .result
            .ok_or(YdbError::EmptyPayload("list_endpoints result"))?;
        Ok(result.endpoints.into_iter().map(Endpoint::from).collect())
    }
}

#[async_trait]
impl TableRpc for GrpcClient {
    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn create_session(&self) -> Result<String, YdbError> {
        let response = client_delegate!(self, table, create_session, api::CreateSessionRequest {})?;
        check_status(response.status, &response.issues, "create_session")?;
        if response.session_id.is_empty() {
            return Err(YdbError::EmptyPayload("session_id"));
        }
        Ok(response.session_id)
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn delete_session(&self, session_id: &str) -> Result<(), YdbError> {
        let request = api::DeleteSessionRequest {
            session_id: session_id.to_string(),
        };
        let response = client_delegate!(self, table, delete_session, request)?;
        check_status(response.status, &response.issues, "delete_session")
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn keep_alive(&self, session_id: &str) -> Result<(), YdbError> {
        let request = api::KeepAliveRequest {
            session_id: session_id.to_string(),
        };
        let response = client_delegate!(self, table, keep_alive, request)?;
        check_status(response.status, &response.issues, "keep_alive")?;
        if !response.session_ready {
            return Err(YdbError::ServerStatus {
                code: StatusCode::BadSession,
                message: "session is no longer ready".to_string(),
            });
        }
        Ok(())
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint, path))]
    async fn create_table(
        &self,
        session_id: &str,
        path: &str,
        description: &TableDescription,
    ) -> Result<(), YdbError> {
        let request = api::CreateTableRequest {
            session_id: session_id.to_string(),
            path: path.to_string(),
            ..api::CreateTableRequest::from(description)
        };
        let response = client_delegate!(self, table, create_table, request)?;
        check_status(response.status, &response.issues, "create_table")
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint, path))]
    async fn drop_table(&self, session_id: &str, path: &str) -> Result<(), YdbError> {
        let request = api::DropTableRequest {
            session_id: session_id.to_string(),
            path: path.to_string(),
        };
        let response = client_delegate!(self, table, drop_table, request)?;
        check_status(response.status, &response.issues, "drop_table")
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint, path))]
    async fn describe_table(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<TableDescription, YdbError> {
        let request = api::DescribeTableRequest {
            session_id: session_id.to_string(),
            path: path.to_string(),
        };
        let response = client_delegate!(self, table, describe_table, request)?;
        check_status(response.status, &response.issues, "describe_table")?;
        response
            .result
            .ok_or(YdbError::EmptyPayload("table description"))?
            .try_into()
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn begin_transaction(
        &self,
        session_id: &str,
        settings: TransactionSettings,
    ) -> Result<String, YdbError> {
        let request = api::BeginTransactionRequest {
            session_id: session_id.to_string(),
            settings: Some(settings.into()),
        };
        let response = client_delegate!(self, table, begin_transaction, request)?;
        check_status(response.status, &response.issues, "begin_transaction")?;
        let tx_meta = response.tx_meta.ok_or(YdbError::EmptyPayload("tx_meta"))?;
        if tx_meta.id.is_empty() {
            return Err(YdbError::EmptyPayload("tx_meta"));
        }
        Ok(tx_meta.id)
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn commit_transaction(&self, session_id: &str, tx_id: &str) -> Result<(), YdbError> {
        let request = api::CommitTransactionRequest {
            session_id: session_id.to_string(),
            tx_id: tx_id.to_string(),
        };
        let response = client_delegate!(self, table, commit_transaction, request)?;
        check_status(response.status, &response.issues, "commit_transaction")
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn rollback_transaction(&self, session_id: &str, tx_id: &str) -> Result<(), YdbError> {
        let request = api::RollbackTransactionRequest {
            session_id: session_id.to_string(),
            tx_id: tx_id.to_string(),
        };
        let response = client_delegate!(self, table, rollback_transaction, request)?;
        check_status(response.status, &response.issues, "rollback_transaction")
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn prepare_query(&self, session_id: &str, yql: &str) -> Result<String, YdbError> {
        let request = api::PrepareDataQueryRequest {
            session_id: session_id.to_string(),
            yql_text: yql.to_string(),
        };
        let response = client_delegate!(self, table, prepare_data_query, request)?;
        check_status(response.status, &response.issues, "prepare_data_query")?;
        if response.query_id.is_empty() {
            return Err(YdbError::EmptyPayload("query_id"));
        }
        Ok(response.query_id)
    }

    #[instrument(target = "grpc_client", skip_all, fields(endpoint = %self.endpoint))]
    async fn execute_query(
        &self,
        session_id: &str,
        query: &Query,
        parameters: QueryParams,
        tx_control: &TransactionControl,
    ) -> Result<QueryResult, YdbError> {
        let request = api::ExecuteDataQueryRequest {
            session_id: session_id.to_string(),
            tx_control: Some(tx_control.into()),
            query: Some(query.into()),
            parameters,
        };
        let response = client_delegate!(self, table, execute_data_query, request)?;
        check_status(response.status, &response.issues, "execute_data_query")?;
        let result = response
            .result
            .ok_or(YdbError::EmptyPayload("query result"))?;
        Ok(QueryResult {
            result_sets: result.result_sets,
            tx_id: result.tx_meta.map(|tx_meta| tx_meta.id),
        })
    }
}
