// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The driver: owns discovery, the channel pool, the per-endpoint session
//! factories, and the table and scheme clients.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::debug;

use crate::{
    credentials::Credentials,
    discovery::{
        DiscoveryEvent, DiscoveryRpc, DiscoveryService, DiscoverySettings, Endpoint,
        EndpointRegistry,
    },
    error::YdbError,
    grpc::{client::GrpcClient, pool::GrpcConnectionPool},
    retry::{with_retries, RetryParameters},
    scheme::SchemeClient,
    session::{Session, SessionEvent, TableRpc},
    session_pool::{SessionPoolSettings, SessionProvider},
    table::TableClient,
};

/// The default port of a database node.
const DEFAULT_PORT: u16 = 2135;

#[derive(Clone, Debug)]
pub struct DriverSettings {
    pub discovery: DiscoverySettings,
    pub pool: SessionPoolSettings,
    /// Timeout for establishing a connection to an endpoint.
    pub connect_timeout: Option<Duration>,
    /// Per-request deadline; `None` leaves deadlines to the retry engine.
    pub request_timeout: Option<Duration>,
    /// Retry policy for session creation.
    pub session_creation_retry: RetryParameters,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            discovery: DiscoverySettings::default(),
            pool: SessionPoolSettings::default(),
            connect_timeout: Some(Duration::from_secs(10)),
            request_timeout: None,
            session_creation_retry: RetryParameters::default(),
        }
    }
}

/// One endpoint's session mint: issues `CreateSession` on that endpoint's
/// client and binds the resulting session to it.
#[derive(Clone)]
struct SessionFactory {
    endpoint: Endpoint,
    rpc: Arc<GrpcClient>,
    database: String,
    retry: RetryParameters,
}

impl SessionFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<Session>, YdbError> {
        let session_id = with_retries(&self.retry, || self.rpc.create_session()).await?;
        debug!(session = %session_id, endpoint = %self.endpoint, "created session");
        Ok(Arc::new(Session::new(
            session_id,
            self.endpoint.clone(),
            self.database.clone(),
            self.rpc.clone() as Arc<dyn TableRpc>,
            events,
        )))
    }
}

struct DriverInner {
    database: String,
    credentials: Arc<dyn Credentials>,
    channels: GrpcConnectionPool,
    registry: Arc<EndpointRegistry>,
    discovery: Arc<DiscoveryService>,
    factories: DashMap<(String, u16), SessionFactory>,
    settings: DriverSettings,
}

impl DriverInner {
    fn client_for(&self, endpoint: &Endpoint) -> Result<Arc<GrpcClient>, YdbError> {
        let channel = self.channels.channel(endpoint)?;
        Ok(Arc::new(GrpcClient::new(
            endpoint.clone(),
            channel,
            self.database.clone(),
            self.credentials.clone(),
            self.registry.clone(),
            self.settings.request_timeout,
        )))
    }

    /// The session factory for an endpoint, created on first use and dropped
    /// again when discovery reports the endpoint as removed.
    fn factory(&self, endpoint: &Endpoint) -> Result<SessionFactory, YdbError> {
        if let Some(factory) = self.factories.get(&endpoint.key()) {
            return Ok(factory.clone());
        }
        let factory = SessionFactory {
            endpoint: endpoint.clone(),
            rpc: self.client_for(endpoint)?,
            database: self.database.clone(),
            retry: self.settings.session_creation_retry.clone(),
        };
        self.factories.insert(endpoint.key(), factory.clone());
        Ok(factory)
    }

    fn invalidate(&self, endpoint: &Endpoint) {
        self.factories.remove(&endpoint.key());
        self.channels.evict(endpoint);
    }
}

#[async_trait]
impl SessionProvider for DriverInner {
    async fn make_session(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<Session>, YdbError> {
        let endpoint = self.discovery.endpoint().await?;
        let factory = self.factory(&endpoint)?;
        factory.create(events).await
    }
}

/// The entry object of the driver runtime.
///
/// Owns the discovery service, the transport channels, and the table and
/// scheme clients; everything is torn down by [`Driver::destroy`].
///
/// Creating a driver requires a running `tokio` runtime, since discovery and
/// the session pools spawn background tasks immediately.
pub struct Driver {
    inner: Arc<DriverInner>,
    discovery: Arc<DiscoveryService>,
    table_client: TableClient,
    scheme_client: SchemeClient,
    event_pump: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl Driver {
    /// Connects the runtime to a cluster reachable through `entry_point`
    /// (`grpc://host:port` or `grpcs://host:port`).
    pub async fn new(
        entry_point: &str,
        database: impl Into<String>,
        credentials: Arc<dyn Credentials>,
        settings: DriverSettings,
    ) -> Result<Self, YdbError> {
        let database = database.into();
        let (secure, host, port) = parse_entry_point(entry_point)?;
        let registry = Arc::new(EndpointRegistry::new(settings.discovery.pessimization_delay));
        let channels = GrpcConnectionPool::new(
            secure,
            settings.connect_timeout,
            settings.request_timeout,
        );

        let bootstrap_endpoint = Endpoint::new(host, port, 0.0);
        let bootstrap_channel = channels.channel(&bootstrap_endpoint)?;
        let bootstrap = Arc::new(GrpcClient::new(
            bootstrap_endpoint,
            bootstrap_channel,
            database.clone(),
            credentials.clone(),
            registry.clone(),
            settings.request_timeout,
        ));

        let (discovery, events) = DiscoveryService::new(
            bootstrap as Arc<dyn DiscoveryRpc>,
            database.clone(),
            registry.clone(),
            settings.discovery.clone(),
        );
        discovery.start().await;

        let inner = Arc::new(DriverInner {
            database,
            credentials,
            channels,
            registry,
            discovery: discovery.clone(),
            factories: DashMap::new(),
            settings: settings.clone(),
        });

        let event_pump = tokio::spawn(Self::run_event_pump(inner.clone(), events));
        let table_client = TableClient::new(inner.clone(), settings.pool.clone());
        let scheme_client = SchemeClient::new(inner.clone(), settings.pool);

        Ok(Self {
            inner,
            discovery,
            table_client,
            scheme_client,
            event_pump: Mutex::new(Some(event_pump)),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Consumes discovery events to invalidate per-endpoint caches.
    async fn run_event_pump(
        inner: Arc<DriverInner>,
        mut events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if let DiscoveryEvent::Removed(endpoint) = event {
                debug!(%endpoint, "invalidating removed endpoint");
                inner.invalidate(&endpoint);
            }
        }
    }

    /// Resolves `true` once the first discovery refresh has succeeded,
    /// `false` if `timeout` elapses first.
    pub async fn ready(&self, timeout: Duration) -> bool {
        self.discovery.ready(timeout).await
    }

    /// A healthy endpoint, for diagnostics.
    pub async fn endpoint(&self) -> Result<Endpoint, YdbError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(YdbError::Destroyed("driver"));
        }
        self.discovery.endpoint().await
    }

    pub fn table_client(&self) -> &TableClient {
        &self.table_client
    }

    pub fn scheme_client(&self) -> &SchemeClient {
        &self.scheme_client
    }

    /// Tears down clients, discovery, and background work. Idempotent; no
    /// timer stays armed afterwards.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.table_client.destroy().await;
        self.scheme_client.destroy().await;
        self.discovery.destroy().await;
        if let Some(pump) = self.event_pump.lock().await.take() {
            pump.abort();
        }
        self.inner.factories.clear();
    }
}

fn parse_entry_point(address: &str) -> Result<(bool, String, u16), YdbError> {
    let (secure, rest) = if let Some(rest) = address.strip_prefix("grpcs://") {
        (true, rest)
    } else if let Some(rest) = address.strip_prefix("grpc://") {
        (false, rest)
    } else {
        return Err(YdbError::CannotResolveAddress {
            address: address.to_string(),
        });
    };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| YdbError::CannotResolveAddress {
                    address: address.to_string(),
                })?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(YdbError::CannotResolveAddress {
            address: address.to_string(),
        });
    }
    Ok((secure, host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::credentials::StaticCredentials;

    #[test]
    fn entry_points_parse() {
        assert_eq!(
            parse_entry_point("grpc://localhost:2135").expect("plain"),
            (false, "localhost".to_string(), 2135)
        );
        assert_eq!(
            parse_entry_point("grpcs://db.example.com:2136").expect("tls"),
            (true, "db.example.com".to_string(), 2136)
        );
        assert_eq!(
            parse_entry_point("grpc://localhost").expect("default port"),
            (false, "localhost".to_string(), DEFAULT_PORT)
        );
        assert_matches!(
            parse_entry_point("http://localhost:2135"),
            Err(YdbError::CannotResolveAddress { .. })
        );
        assert_matches!(
            parse_entry_point("grpc://localhost:notaport"),
            Err(YdbError::CannotResolveAddress { .. })
        );
        assert_matches!(
            parse_entry_point("grpc://"),
            Err(YdbError::CannotResolveAddress { .. })
        );
    }

    #[tokio::test]
    async fn driver_constructs_and_destroys_without_a_server() {
        let credentials = Arc::new(StaticCredentials::new("token", "/Root/test"));
        let driver = Driver::new(
            "grpc://127.0.0.1:2135",
            "/Root/test",
            credentials,
            DriverSettings::default(),
        )
        .await
        .expect("driver construction is lazy");

        // No server is listening, so the first refresh cannot succeed.
        assert!(!driver.ready(Duration::from_millis(200)).await);
        assert_matches!(driver.endpoint().await, Err(_));

        driver.destroy().await;
        driver.destroy().await;
        assert_matches!(driver.endpoint().await, Err(YdbError::Destroyed(_)));
        assert_matches!(
            driver
                .table_client()
                .with_session(|_session| async move { Ok(()) }, None)
                .await,
            Err(YdbError::Destroyed(_))
        );
    }
}
