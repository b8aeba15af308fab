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

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use futures::lock::Mutex;

use crate::{
    clients::{ClientError, NseClient, NseConnector},
    connection::{params, Connection, ConnectionState, MechanismType, NetworkServiceRequest, NEW_CONNECTION_ID},
    model::Endpoint,
    registry::NetworkServiceManager,
};

pub const DEFAULT_SRC_IP: &str = "10.20.1.1/30";
pub const DEFAULT_DST_IP: &str = "10.20.1.2/30";
pub const REMOTE_FORWARDER_IP: &str = "10.0.0.2";

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    /// Endpoint names (local) or manager names (remote) that cannot be connected to
    unreachable: HashSet<String>,
    /// Targets that fail every request
    failing: HashSet<String>,
    failing_closes: HashSet<String>,
    response_ips: HashMap<String, (String, String)>,
    /// Connections handed out and not yet closed, keyed by target
    active: HashMap<String, HashSet<String>>,
    next_id: u64,
}

/// Connects to in-memory endpoints. A local endpoint is addressed by its name and a remote manager by its name.
///
/// The endpoints accept every request: the first mechanism preference is completed with the parameters a real
/// endpoint would set, and the context gets addresses assigned.
#[derive(Debug, Clone, Default)]
pub struct NseConnectorMock {
    inner: Arc<Mutex<State>>,
}

impl NseConnectorMock {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn set_unreachable(&self, target: &str) {
        self.with_state(|state| state.unreachable.insert(target.to_string()))
            .await;
    }

    pub async fn set_reachable(&self, target: &str) {
        self.with_state(|state| state.unreachable.remove(target)).await;
    }

    pub async fn set_failing(&self, target: &str, failing: bool) {
        self.with_state(|state| {
            if failing {
                state.failing.insert(target.to_string());
            } else {
                state.failing.remove(target);
            }
        })
        .await
    }

    pub async fn set_failing_closes(&self, target: &str) {
        self.with_state(|state| state.failing_closes.insert(target.to_string()))
            .await;
    }

    pub async fn set_response_ips(&self, target: &str, src_ip: &str, dst_ip: &str) {
        self.with_state(|state| {
            state
                .response_ips
                .insert(target.to_string(), (src_ip.to_string(), dst_ip.to_string()))
        })
        .await;
    }

    /// Ids of the connections the target handed out and that were not closed since.
    pub async fn active_connections(&self, target: &str) -> HashSet<String> {
        self.with_state(|state| state.active.get(target).cloned().unwrap_or_default())
            .await
    }

    pub async fn take_calls(&self) -> Vec<String> {
        self.with_state(|state| state.calls.drain(..).collect()).await
    }

    pub async fn calls(&self) -> Vec<String> {
        self.with_state(|state| state.calls.clone()).await
    }

    pub async fn count_calls_containing(&self, pat: &str) -> usize {
        self.with_state(|state| state.calls.iter().filter(|s| s.contains(pat)).count())
            .await
    }

    async fn with_state<F, R>(&self, f: F) -> R
    where F: FnOnce(&mut State) -> R {
        let mut lock = self.inner.lock().await;
        (f)(&mut *lock)
    }

    async fn connect(&self, call: &str, target: &str) -> Result<Box<dyn NseClient>, ClientError> {
        let reachable = self
            .with_state(|state| {
                state.calls.push(format!("{}:{}", call, target));
                !state.unreachable.contains(target)
            })
            .await;
        if !reachable {
            return Err(ClientError::Transport(format!("{} is unreachable", target)));
        }
        Ok(Box::new(NseClientMock {
            target: target.to_string(),
            connector: self.clone(),
        }))
    }
}

#[async_trait]
impl NseConnector for NseConnectorMock {
    async fn connect_local(&self, endpoint: &Endpoint) -> Result<Box<dyn NseClient>, ClientError> {
        self.connect("connect_local", endpoint.name()).await
    }

    async fn connect_remote(&self, manager: &NetworkServiceManager) -> Result<Box<dyn NseClient>, ClientError> {
        self.connect("connect_remote", &manager.name).await
    }
}

pub struct NseClientMock {
    target: String,
    connector: NseConnectorMock,
}

impl NseClientMock {
    fn complete_connection(state: &mut State, target: &str, request: NetworkServiceRequest) -> Connection {
        let mut connection = request.connection;
        if connection.id.is_empty() || connection.id == NEW_CONNECTION_ID {
            state.next_id += 1;
            connection.id = format!("{}-{}", target, state.next_id);
        }

        let mut mechanism = request.mechanism_preferences.into_iter().next();
        if let Some(m) = mechanism.as_mut() {
            let defaults = match m.mechanism_type {
                MechanismType::KernelInterface => vec![(params::NETNS_INODE, "1000".to_string())],
                MechanismType::MemInterface => vec![(params::WORKSPACE, format!("nse-{}", target))],
                MechanismType::Vxlan => vec![
                    (params::DST_IP, REMOTE_FORWARDER_IP.to_string()),
                    (params::VNI, state.next_id.max(1).to_string()),
                ],
                _ => Vec::new(),
            };
            for (key, value) in defaults {
                m.parameters.entry(key.to_string()).or_insert_with(|| value.clone());
            }
        }
        connection.mechanism = mechanism;

        let (src_ip, dst_ip) = state
            .response_ips
            .get(target)
            .cloned()
            .unwrap_or_else(|| (DEFAULT_SRC_IP.to_string(), DEFAULT_DST_IP.to_string()));
        let context = connection.context.get_or_insert_with(Default::default);
        context.ip_context.src_ip_addr = src_ip;
        context.ip_context.dst_ip_addr = dst_ip;
        connection.state = ConnectionState::Up;
        connection
    }
}

#[async_trait]
impl NseClient for NseClientMock {
    async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, ClientError> {
        let target = self.target.clone();
        self.connector
            .with_state(move |state| {
                state.calls.push(format!("request:{}:{}", target, request.connection.id));
                if state.failing.contains(&target) {
                    return Err(ClientError::Remote(format!("{} refused the request", target)));
                }
                let connection = Self::complete_connection(state, &target, request);
                state.active.entry(target).or_default().insert(connection.id.clone());
                Ok(connection)
            })
            .await
    }

    async fn close(&self, connection: Connection) -> Result<(), ClientError> {
        let target = self.target.clone();
        self.connector
            .with_state(move |state| {
                state.calls.push(format!("close:{}:{}", target, connection.id));
                if state.failing_closes.contains(&target) {
                    return Err(ClientError::Remote(format!("{} failed to close", target)));
                }
                if let Some(active) = state.active.get_mut(&target) {
                    active.remove(&connection.id);
                }
                Ok(())
            })
            .await
    }

    async fn cleanup(&self) -> Result<(), ClientError> {
        let target = self.target.clone();
        self.connector
            .with_state(move |state| state.calls.push(format!("cleanup:{}", target)))
            .await;
        Ok(())
    }
}
