// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client runtime for a distributed SQL database speaking a gRPC protocol.
//!
//! The runtime mediates between user code and a cluster of database nodes:
//! it discovers serving endpoints and avoids the ones that recently failed,
//! keeps a bounded pool of server-side sessions alive, authenticates every
//! request, and retries transient failures under a declarative policy.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use ydb_client::{Driver, DriverSettings, QueryParams, StaticCredentials};
//!
//! # async fn example() -> Result<(), ydb_client::YdbError> {
//! let credentials = Arc::new(StaticCredentials::new("token", "/Root/db"));
//! let driver = Driver::new("grpc://db.local:2135", "/Root/db", credentials, DriverSettings::default()).await?;
//! assert!(driver.ready(Duration::from_secs(5)).await);
//!
//! let row_count = driver
//!     .table_client()
//!     .with_session(
//!         |session| async move {
//!             let result = session
//!                 .execute_query("SELECT 1", QueryParams::new(), None)
//!                 .await?;
//!             Ok(result.result_sets[0].rows.len())
//!         },
//!         None,
//!     )
//!     .await?;
//! assert_eq!(row_count, 1);
//! driver.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod grpc;
pub mod retry;
pub mod scheme;
pub mod session;
pub mod session_pool;
pub mod table;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::{
    credentials::{
        AuthMetadata, Credentials, IamJwtCredentials, MetadataCredentials, ServiceAccountKey,
        StaticCredentials, TokenService,
    },
    discovery::{DiscoveryEvent, DiscoveryService, DiscoverySettings, Endpoint},
    driver::{Driver, DriverSettings},
    error::{ErrorClass, StatusCode, YdbError},
    retry::{with_retries, RetryParameters},
    scheme::SchemeClient,
    session::{
        PreparedQuery, Query, QueryParams, QueryResult, Session, SessionEvent,
        TransactionControl, TransactionMode, TransactionSettings, TxSelector,
    },
    session_pool::{SessionPool, SessionPoolSettings, SessionProvider},
    table::{Column, ColumnType, TableClient, TableDescription},
};

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedSender;

    use crate::{
        discovery::{DiscoveryService, DiscoverySettings, EndpointRegistry},
        error::YdbError,
        grpc::api,
        session::{QueryParams, Session, SessionEvent, TableRpc as _},
        session_pool::{SessionPool, SessionPoolSettings, SessionProvider},
        test_utils::{ScriptedDiscoveryRpc, ScriptedTableRpc},
        Endpoint,
    };

    /// A provider that routes through discovery before minting a session,
    /// the way the driver does.
    struct RoutedProvider {
        discovery: Arc<DiscoveryService>,
        rpc: Arc<ScriptedTableRpc>,
    }

    #[async_trait]
    impl SessionProvider for RoutedProvider {
        async fn make_session(
            &self,
            events: UnboundedSender<SessionEvent>,
        ) -> Result<Arc<Session>, YdbError> {
            let endpoint = self.discovery.endpoint().await?;
            let session_id = self.rpc.create_session().await?;
            Ok(Arc::new(Session::new(
                session_id,
                endpoint,
                "/Root/db".to_string(),
                self.rpc.clone(),
                events,
            )))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_executes_a_query() {
        let discovery_rpc = Arc::new(ScriptedDiscoveryRpc::new(vec![Endpoint::new(
            "node-1", 2135, 0.0,
        )]));
        let registry = Arc::new(EndpointRegistry::new(Duration::from_secs(60)));
        let (discovery, _events) = DiscoveryService::new(
            discovery_rpc,
            "/Root/db",
            registry,
            DiscoverySettings::default(),
        );
        discovery.start().await;
        assert!(discovery.ready(Duration::from_secs(5)).await);

        let table_rpc = Arc::new(ScriptedTableRpc::default());
        let pool = SessionPool::new(
            Arc::new(RoutedProvider {
                discovery: discovery.clone(),
                rpc: table_rpc,
            }),
            SessionPoolSettings::default(),
        );

        let rows = pool
            .with_session(
                |session| async move {
                    let result = session
                        .execute_query("SELECT 1", QueryParams::new(), None)
                        .await?;
                    Ok(result.result_sets[0].rows.clone())
                },
                Some(Duration::from_secs(5)),
            )
            .await
            .expect("query");

        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].items[0].value,
            Some(api::typed_value::Value::Int64(1))
        );

        pool.destroy().await;
        discovery.destroy().await;
    }
}
