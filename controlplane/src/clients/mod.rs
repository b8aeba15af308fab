//  Copyright 2020, The Tari Project
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Interfaces to the collaborators the engine talks to over RPC. The engine never depends on a concrete
//! transport: a process wires in gRPC-backed implementations, tests wire in the mocks from
//! `test_utils` (enabled by the `test-mocks` feature).

use std::{fmt, net::IpAddr};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::{
    connection::{Connection, CrossConnect, NetworkServiceRequest},
    model::{Endpoint, Forwarder},
    monitor::{ConnectionEvent, CrossConnectEvent},
    registry::{FindNetworkServiceResponse, NetworkServiceManager, NseRegistration},
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Remote peer returned an error: {0}")]
    Remote(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Stream closed")]
    StreamClosed,
}

pub type ClientStream<T> = BoxStream<'static, Result<T, ClientError>>;

#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn find_network_service(&self, network_service: &str) -> Result<FindNetworkServiceResponse, ClientError>;

    async fn register_nse(&self, registration: NseRegistration) -> Result<NseRegistration, ClientError>;

    async fn remove_nse(&self, endpoint_name: &str) -> Result<(), ClientError>;
}

/// A client bound to one endpoint (local) or one remote manager. Must be cleaned up after use.
#[async_trait]
pub trait NseClient: Send + Sync {
    async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ClientError>;

    async fn close(&self, connection: Connection) -> Result<(), ClientError>;

    async fn cleanup(&self) -> Result<(), ClientError>;
}

#[async_trait]
pub trait NseConnector: Send + Sync {
    /// Connect to an endpoint registered with this manager.
    async fn connect_local(&self, endpoint: &Endpoint) -> Result<Box<dyn NseClient>, ClientError>;

    /// Connect to the manager that owns a remote endpoint.
    async fn connect_remote(&self, manager: &NetworkServiceManager) -> Result<Box<dyn NseClient>, ClientError>;
}

#[async_trait]
pub trait ForwarderClient: Send + Sync {
    async fn request(&self, forwarder: &Forwarder, cross_connect: CrossConnect) -> Result<CrossConnect, ClientError>;

    async fn close(&self, forwarder: &Forwarder, cross_connect: CrossConnect) -> Result<(), ClientError>;

    /// Stream of cross-connect events programmed on the forwarder. The first event is the initial state transfer.
    async fn monitor_cross_connects(&self, forwarder: &Forwarder) -> Result<ClientStream<CrossConnectEvent>, ClientError>;
}

#[async_trait]
pub trait RemoteMonitorClient: Send + Sync {
    /// Monitor connections on a remote manager scoped to connections that reference `scope` (this manager).
    async fn monitor_connections(
        &self,
        manager: &NetworkServiceManager,
        scope: &str,
    ) -> Result<ClientStream<ConnectionEvent>, ClientError>;
}

#[async_trait]
pub trait EndpointMonitorClient: Send + Sync {
    /// Monitor the connections a local endpoint holds. The stream ending or failing means the endpoint is gone.
    async fn monitor_connections(&self, endpoint: &Endpoint) -> Result<ClientStream<ConnectionEvent>, ClientError>;
}

/// Source of prefixes that endpoints must not hand out.
pub trait PrefixPool: Send + Sync {
    fn prefixes(&self) -> Vec<String>;

    fn intersects(&self, addr: &IpAddr) -> bool;
}

/// A fixed list of excluded prefixes in CIDR notation. Malformed entries are ignored.
#[derive(Debug, Clone, Default)]
pub struct StaticPrefixPool {
    prefixes: Vec<String>,
    cidrs: Vec<cidr::IpCidr>,
}

impl StaticPrefixPool {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = prefixes.into_iter().map(Into::into).collect::<Vec<String>>();
        let cidrs = prefixes.iter().filter_map(|p| p.parse::<cidr::IpCidr>().ok()).collect();
        Self { prefixes, cidrs }
    }
}

impl PrefixPool for StaticPrefixPool {
    fn prefixes(&self) -> Vec<String> {
        self.prefixes.clone()
    }

    fn intersects(&self, addr: &IpAddr) -> bool {
        self.cidrs.iter().any(|c| c.contains(addr))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginVerdict {
    Accept,
    Reject(String),
}

/// Hook invoked on connections flowing through the request pipeline.
#[async_trait]
pub trait ConnectionPlugin: Send + Sync {
    async fn update_connection(&self, connection: Connection) -> Connection {
        connection
    }

    async fn validate_connection(&self, _connection: &Connection) -> PluginVerdict {
        PluginVerdict::Accept
    }
}

/// Plugin that accepts everything unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlugin;

#[async_trait]
impl ConnectionPlugin for NoopPlugin {}

impl fmt::Display for PluginVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginVerdict::Accept => write!(f, "Accept"),
            PluginVerdict::Reject(reason) => write!(f, "Reject({})", reason),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn static_prefix_pool_intersects() {
        let pool = StaticPrefixPool::new(vec!["10.96.0.0/12", "fd00::/8", "garbage"]);
        assert_eq!(pool.prefixes().len(), 3);
        assert!(pool.intersects(&"10.96.1.1".parse().unwrap()));
        assert!(pool.intersects(&"fd00::1".parse().unwrap()));
        assert!(!pool.intersects(&"192.168.0.1".parse().unwrap()));
    }
}
