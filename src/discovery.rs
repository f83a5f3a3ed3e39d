// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Endpoint discovery: a periodic refresh of the serving-endpoint set, a
//! pessimization scheme that temporarily demotes endpoints observed to fail,
//! and least-loaded routing over what remains.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::{
    sync::{mpsc, watch, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use crate::error::YdbError;

/// A network address of one database node, as reported by discovery.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub load_factor: f32,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, load_factor: f32) -> Self {
        Self {
            host: host.into(),
            port,
            load_factor,
        }
    }

    /// The identity of an endpoint; the load factor is advisory and excluded.
    pub(crate) fn key(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.host, self.port)
    }
}

/// How the endpoint set changed between two discovery responses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiscoveryEvent {
    Added(Endpoint),
    Removed(Endpoint),
}

/// The wire call discovery relies on, kept behind a seam so tests can script
/// endpoint sets.
#[async_trait]
pub trait DiscoveryRpc: Send + Sync + fmt::Debug {
    async fn list_endpoints(&self, database: &str) -> Result<Vec<Endpoint>, YdbError>;
}

#[derive(Clone, Debug)]
pub struct DiscoverySettings {
    pub discovery_period: Duration,
    pub pessimization_delay: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            discovery_period: Duration::from_secs(60),
            pessimization_delay: Duration::from_secs(60),
        }
    }
}

struct EndpointEntry {
    endpoint: Endpoint,
    pessimized_until: Option<tokio::time::Instant>,
}

/// The shared endpoint table. Discovery replaces it atomically on refresh;
/// the transport layer stamps pessimization marks into it.
pub struct EndpointRegistry {
    entries: RwLock<Vec<EndpointEntry>>,
    pessimization_delay: Duration,
}

impl EndpointRegistry {
    pub(crate) fn new(pessimization_delay: Duration) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            pessimization_delay,
        }
    }

    /// Installs a fresh endpoint set and reports the diff against the
    /// previous one. Fresh entries carry no pessimization mark.
    async fn replace(&self, endpoints: Vec<Endpoint>) -> Vec<DiscoveryEvent> {
        let mut entries = self.entries.write().await;
        let mut events = Vec::new();
        for endpoint in &endpoints {
            if !entries.iter().any(|entry| entry.endpoint == *endpoint) {
                events.push(DiscoveryEvent::Added(endpoint.clone()));
            }
        }
        for entry in entries.iter() {
            if !endpoints.contains(&entry.endpoint) {
                events.push(DiscoveryEvent::Removed(entry.endpoint.clone()));
            }
        }
        *entries = endpoints
            .into_iter()
            .map(|endpoint| EndpointEntry {
                endpoint,
                pessimized_until: None,
            })
            .collect();
        events
    }

    /// Marks an endpoint as undesirable for routing until the pessimization
    /// delay elapses. Unknown endpoints are ignored.
    pub async fn pessimize(&self, endpoint: &Endpoint) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|entry| entry.endpoint == *endpoint) {
            entry.pessimized_until =
                Some(tokio::time::Instant::now() + self.pessimization_delay);
            trace!(%endpoint, delay = ?self.pessimization_delay, "pessimized endpoint");
        }
    }

    /// The least-loaded non-pessimized endpoint, ties broken randomly.
    /// `None` when the table is empty or fully pessimized.
    async fn best(&self) -> Option<Endpoint> {
        let entries = self.entries.read().await;
        let now = tokio::time::Instant::now();
        let available: Vec<&EndpointEntry> = entries
            .iter()
            .filter(|entry| match entry.pessimized_until {
                Some(until) => until <= now,
                None => true,
            })
            .collect();
        let lowest = available
            .iter()
            .map(|entry| entry.endpoint.load_factor)
            .min_by(f32::total_cmp)?;
        let candidates: Vec<&&EndpointEntry> = available
            .iter()
            .filter(|entry| entry.endpoint.load_factor == lowest)
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .map(|entry| entry.endpoint.clone())
    }

    async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Maintains the endpoint set through a periodic `ListEndpoints` loop and
/// hands out healthy endpoints for routing.
pub struct DiscoveryService {
    rpc: Arc<dyn DiscoveryRpc>,
    database: String,
    registry: Arc<EndpointRegistry>,
    settings: DiscoverySettings,
    // A refresh does not start while another one is in flight.
    refresh_lock: Mutex<()>,
    ready_tx: watch::Sender<bool>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    destroyed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// Creates the service and the receiving half of its event channel. The
    /// single subscriber is expected to consume `Added`/`Removed` events to
    /// invalidate per-endpoint caches.
    pub fn new(
        rpc: Arc<dyn DiscoveryRpc>,
        database: impl Into<String>,
        registry: Arc<EndpointRegistry>,
        settings: DiscoverySettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (ready_tx, _) = watch::channel(false);
        let service = Arc::new(Self {
            rpc,
            database: database.into(),
            registry,
            settings,
            refresh_lock: Mutex::new(()),
            ready_tx,
            events,
            destroyed: AtomicBool::new(false),
            task: Mutex::new(None),
        });
        (service, receiver)
    }

    /// Starts the periodic refresh loop; the first refresh runs immediately.
    pub async fn start(self: &Arc<Self>) {
        let service = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.settings.discovery_period);
            loop {
                interval.tick().await;
                if let Err(error) = service.refresh().await {
                    warn!(%error, "endpoint discovery failed");
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    async fn refresh(&self) -> Result<(), YdbError> {
        let _guard = self.refresh_lock.lock().await;
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(YdbError::Destroyed("discovery service"));
        }
        let endpoints = self.rpc.list_endpoints(&self.database).await?;
        let events = self.registry.replace(endpoints).await;
        for event in events {
            match &event {
                DiscoveryEvent::Added(endpoint) => debug!(%endpoint, "endpoint added"),
                DiscoveryEvent::Removed(endpoint) => debug!(%endpoint, "endpoint removed"),
            }
            // The subscriber may already be gone during shutdown.
            let _ = self.events.send(event);
        }
        self.ready_tx.send_replace(true);
        Ok(())
    }

    /// Returns a healthy endpoint for new work. When every known endpoint is
    /// pessimized (or none is known yet), forces an immediate refresh first.
    pub async fn endpoint(&self) -> Result<Endpoint, YdbError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(YdbError::Destroyed("discovery service"));
        }
        if let Some(endpoint) = self.registry.best().await {
            return Ok(endpoint);
        }
        if !self.registry.is_empty().await {
            trace!("all endpoints are pessimized; forcing discovery");
        }
        self.refresh().await?;
        self.registry.best().await.ok_or(YdbError::NoEndpoints)
    }

    /// Resolves `true` once the first successful refresh completes, `false`
    /// if `timeout` elapses first.
    pub async fn ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready_tx.subscribe();
        if *ready.borrow() {
            return true;
        }
        tokio::time::timeout(timeout, async move {
            while ready.changed().await.is_ok() {
                if *ready.borrow() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    /// Stops the refresh loop. Idempotent; subsequent `endpoint()` calls fail.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}
