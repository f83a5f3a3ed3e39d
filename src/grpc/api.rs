// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire messages and unary stubs mirroring the server IDL.
//!
//! The stubs follow the shape of `tonic`-generated clients but are written by
//! hand against [`tonic::client::Grpc`], so the crate builds without a
//! protobuf toolchain. Every response embeds a [`StatusCode`] and an issue
//! string; payloads ride next to them.
//!
//! [`StatusCode`]: crate::error::StatusCode

use std::collections::HashMap;

use tonic::{
    codec::ProstCodec, codegen::http::uri::PathAndQuery, transport::Channel, Request, Response,
    Status,
};

use super::GRPC_MAX_MESSAGE_SIZE;

// Discovery service.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEndpointsRequest {
    #[prost(string, tag = "1")]
    pub database: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EndpointInfo {
    #[prost(string, tag = "1")]
    pub address: String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    #[prost(float, tag = "3")]
    pub load_factor: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEndpointsResult {
    #[prost(message, repeated, tag = "1")]
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEndpointsResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
    #[prost(message, optional, tag = "3")]
    pub result: Option<ListEndpointsResult>,
}

// Table service: session lifecycle.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSessionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSessionResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
    #[prost(string, tag = "3")]
    pub session_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSessionRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSessionResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeepAliveRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeepAliveResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
    /// Whether the server still considers the session usable.
    #[prost(bool, tag = "3")]
    pub session_ready: bool,
}

// Table service: schema operations.

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, ::prost::Enumeration)]
#[repr(i32)]
pub enum PrimitiveType {
    Unspecified = 0,
    Bool = 1,
    Int64 = 2,
    Uint64 = 3,
    Double = 4,
    Bytes = 5,
    Text = 6,
    Timestamp = 7,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnMeta {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "PrimitiveType", tag = "2")]
    pub column_type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateTableRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(message, repeated, tag = "3")]
    pub columns: Vec<ColumnMeta>,
    #[prost(string, repeated, tag = "4")]
    pub primary_key: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateTableResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DropTableRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DropTableResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DescribeTableRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DescribeTableResult {
    #[prost(message, repeated, tag = "1")]
    pub columns: Vec<ColumnMeta>,
    #[prost(string, repeated, tag = "2")]
    pub primary_key: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DescribeTableResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
    #[prost(message, optional, tag = "3")]
    pub result: Option<DescribeTableResult>,
}

// Table service: transactions.

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, ::prost::Enumeration)]
#[repr(i32)]
pub enum TransactionMode {
    Unspecified = 0,
    SerializableReadWrite = 1,
    OnlineReadOnly = 2,
    StaleReadOnly = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionSettings {
    #[prost(enumeration = "TransactionMode", tag = "1")]
    pub mode: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionMeta {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BeginTransactionRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(message, optional, tag = "2")]
    pub settings: Option<TransactionSettings>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BeginTransactionResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
    #[prost(message, optional, tag = "3")]
    pub tx_meta: Option<TransactionMeta>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommitTransactionRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub tx_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommitTransactionResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RollbackTransactionRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub tx_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RollbackTransactionResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
}

// Table service: queries.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PrepareDataQueryRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub yql_text: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PrepareDataQueryResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
    #[prost(string, tag = "3")]
    pub query_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionControl {
    #[prost(bool, tag = "1")]
    pub commit_tx: bool,
    #[prost(oneof = "transaction_control::TxSelector", tags = "2, 3")]
    pub tx_selector: Option<transaction_control::TxSelector>,
}

pub mod transaction_control {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum TxSelector {
        #[prost(string, tag = "2")]
        TxId(String),
        #[prost(message, tag = "3")]
        BeginTx(super::TransactionSettings),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedValue {
    #[prost(oneof = "typed_value::Value", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub value: Option<typed_value::Value>,
}

pub mod typed_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(bool, tag = "1")]
        Bool(bool),
        #[prost(int64, tag = "2")]
        Int64(i64),
        #[prost(uint64, tag = "3")]
        Uint64(u64),
        #[prost(double, tag = "4")]
        Double(f64),
        #[prost(bytes, tag = "5")]
        Bytes(Vec<u8>),
        #[prost(string, tag = "6")]
        Text(String),
        #[prost(bool, tag = "7")]
        Null(bool),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteDataQueryRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(message, optional, tag = "2")]
    pub tx_control: Option<TransactionControl>,
    #[prost(oneof = "execute_data_query_request::Query", tags = "3, 4")]
    pub query: Option<execute_data_query_request::Query>,
    #[prost(map = "string, message", tag = "5")]
    pub parameters: HashMap<String, TypedValue>,
}

pub mod execute_data_query_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Query {
        #[prost(string, tag = "3")]
        YqlText(String),
        #[prost(string, tag = "4")]
        QueryId(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Row {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<TypedValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultSet {
    #[prost(message, repeated, tag = "1")]
    pub columns: Vec<ColumnMeta>,
    #[prost(message, repeated, tag = "2")]
    pub rows: Vec<Row>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteQueryResult {
    #[prost(message, repeated, tag = "1")]
    pub result_sets: Vec<ResultSet>,
    #[prost(message, optional, tag = "2")]
    pub tx_meta: Option<TransactionMeta>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteDataQueryResponse {
    #[prost(enumeration = "crate::error::StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub issues: String,
    #[prost(message, optional, tag = "3")]
    pub result: Option<ExecuteQueryResult>,
}

// IAM token service.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateIamTokenRequest {
    #[prost(string, tag = "1")]
    pub jwt: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateIamTokenResponse {
    #[prost(string, tag = "1")]
    pub iam_token: String,
}

async fn unary<M1, M2>(
    grpc: &mut tonic::client::Grpc<Channel>,
    request: Request<M1>,
    path: &'static str,
) -> Result<Response<M2>, Status>
where
    M1: prost::Message + 'static,
    M2: prost::Message + Default + 'static,
{
    grpc.ready()
        .await
        .map_err(|error| Status::unknown(format!("service was not ready: {error}")))?;
    let codec: ProstCodec<M1, M2> = ProstCodec::default();
    grpc.unary(request, PathAndQuery::from_static(path), codec)
        .await
}

fn stub(channel: Channel) -> tonic::client::Grpc<Channel> {
    tonic::client::Grpc::new(channel)
        .max_decoding_message_size(GRPC_MAX_MESSAGE_SIZE)
        .max_encoding_message_size(GRPC_MAX_MESSAGE_SIZE)
}

#[derive(Clone, Debug)]
pub struct DiscoveryServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl DiscoveryServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: stub(channel),
        }
    }

    pub async fn list_endpoints(
        &mut self,
        request: Request<ListEndpointsRequest>,
    ) -> Result<Response<ListEndpointsResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Discovery.V1.DiscoveryService/ListEndpoints",
        )
        .await
    }
}

#[derive(Clone, Debug)]
pub struct TableServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl TableServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: stub(channel),
        }
    }

    pub async fn create_session(
        &mut self,
        request: Request<CreateSessionRequest>,
    ) -> Result<Response<CreateSessionResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/CreateSession",
        )
        .await
    }

    pub async fn delete_session(
        &mut self,
        request: Request<DeleteSessionRequest>,
    ) -> Result<Response<DeleteSessionResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/DeleteSession",
        )
        .await
    }

    pub async fn keep_alive(
        &mut self,
        request: Request<KeepAliveRequest>,
    ) -> Result<Response<KeepAliveResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/KeepAlive",
        )
        .await
    }

    pub async fn create_table(
        &mut self,
        request: Request<CreateTableRequest>,
    ) -> Result<Response<CreateTableResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/CreateTable",
        )
        .await
    }

    pub async fn drop_table(
        &mut self,
        request: Request<DropTableRequest>,
    ) -> Result<Response<DropTableResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/DropTable",
        )
        .await
    }

    pub async fn describe_table(
        &mut self,
        request: Request<DescribeTableRequest>,
    ) -> Result<Response<DescribeTableResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/DescribeTable",
        )
        .await
    }

    pub async fn begin_transaction(
        &mut self,
        request: Request<BeginTransactionRequest>,
    ) -> Result<Response<BeginTransactionResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/BeginTransaction",
        )
        .await
    }

    pub async fn commit_transaction(
        &mut self,
        request: Request<CommitTransactionRequest>,
    ) -> Result<Response<CommitTransactionResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/CommitTransaction",
        )
        .await
    }

    pub async fn rollback_transaction(
        &mut self,
        request: Request<RollbackTransactionRequest>,
    ) -> Result<Response<RollbackTransactionResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/RollbackTransaction",
        )
        .await
    }

    pub async fn prepare_data_query(
        &mut self,
        request: Request<PrepareDataQueryRequest>,
    ) -> Result<Response<PrepareDataQueryResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/PrepareDataQuery",
        )
        .await
    }

    pub async fn execute_data_query(
        &mut self,
        request: Request<ExecuteDataQueryRequest>,
    ) -> Result<Response<ExecuteDataQueryResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/Ydb.Table.V1.TableService/ExecuteDataQuery",
        )
        .await
    }
}

#[derive(Clone, Debug)]
pub struct IamTokenServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl IamTokenServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: stub(channel),
        }
    }

    pub async fn create(
        &mut self,
        request: Request<CreateIamTokenRequest>,
    ) -> Result<Response<CreateIamTokenResponse>, Status> {
        unary(
            &mut self.inner,
            request,
            "/yandex.cloud.iam.v1.IamTokenService/Create",
        )
        .await
    }
}
