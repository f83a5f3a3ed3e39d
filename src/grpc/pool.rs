// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! One lazily-dialed HTTP/2 channel per endpoint, shared by every client
//! bound to that endpoint and dropped again when discovery reports the
//! endpoint gone.

use std::time::Duration;

use tonic::transport::{channel::ClientTlsConfig, Channel};
use tracing::debug;

use crate::{discovery::Endpoint, error::YdbError};

/// The channel cache plus the connection knobs every dial shares.
pub struct GrpcConnectionPool {
    secure: bool,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    channels: papaya::HashMap<(String, u16), Channel>,
}

impl GrpcConnectionPool {
    /// A pool dialing endpoints over `https` when `secure` is set, `http`
    /// otherwise, with the driver's connect and per-request deadlines baked
    /// into every channel.
    pub fn new(
        secure: bool,
        connect_timeout: Option<Duration>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            secure,
            connect_timeout,
            request_timeout,
            channels: papaya::HashMap::new(),
        }
    }

    /// The channel for `endpoint`, keyed by its `(host, port)` identity.
    /// The first caller dials; everyone else shares the same connection.
    /// Dialing is lazy, so this never blocks on the network.
    pub fn channel(&self, endpoint: &Endpoint) -> Result<Channel, YdbError> {
        let channels = self.channels.pin();
        match channels.get(&endpoint.key()) {
            Some(channel) => Ok(channel.clone()),
            None => {
                let dialed = self.dial(endpoint)?;
                Ok(channels.get_or_insert(endpoint.key(), dialed).clone())
            }
        }
    }

    fn dial(&self, endpoint: &Endpoint) -> Result<Channel, YdbError> {
        let scheme = if self.secure { "https" } else { "http" };
        let mut builder = Channel::from_shared(format!("{scheme}://{endpoint}")).map_err(
            |error| YdbError::CannotResolveAddress {
                address: format!("{endpoint}: {error}"),
            },
        )?;
        if self.secure {
            builder = builder
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|error| YdbError::Transport {
                    message: format!("TLS setup for {endpoint} failed: {error}"),
                })?;
        }
        if let Some(connect_timeout) = self.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(request_timeout) = self.request_timeout {
            builder = builder.timeout(request_timeout);
        }
        Ok(builder.connect_lazy())
    }

    /// Forgets an endpoint's channel after discovery removed it. Clients
    /// still holding a clone keep their connection until they drop it; new
    /// lookups dial afresh.
    pub fn evict(&self, endpoint: &Endpoint) {
        if self.channels.pin().remove(&endpoint.key()).is_some() {
            debug!(%endpoint, "dropped channel of removed endpoint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> Endpoint {
        Endpoint::new(host, 2135, 0.0)
    }

    #[tokio::test]
    async fn channels_are_shared_per_endpoint_until_evicted() {
        let pool = GrpcConnectionPool::new(false, None, None);
        let node = endpoint("node-1");

        pool.channel(&node).expect("first dial");
        pool.channel(&node).expect("cached lookup");
        pool.channel(&endpoint("node-2")).expect("second dial");
        assert_eq!(pool.channels.pin().len(), 2);

        pool.evict(&node);
        assert_eq!(pool.channels.pin().len(), 1);
        // Evicting twice is harmless.
        pool.evict(&node);

        pool.channel(&node).expect("redial after eviction");
        assert_eq!(pool.channels.pin().len(), 2);
    }

    #[test]
    fn unresolvable_hosts_are_rejected() {
        let pool = GrpcConnectionPool::new(false, None, None);
        let error = pool
            .channel(&endpoint("not a host"))
            .expect_err("spaces cannot form a URI");
        assert!(matches!(error, YdbError::CannotResolveAddress { .. }));
    }
}
