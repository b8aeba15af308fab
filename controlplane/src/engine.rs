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

use std::sync::Arc;

use log::*;
use nsm_shutdown::{Shutdown, ShutdownSignal};
use tokio::sync::mpsc;

use crate::{
    client_connection_manager::ClientConnectionManager,
    clients::{
        ConnectionPlugin,
        DiscoveryClient,
        EndpointMonitorClient,
        ForwarderClient,
        NseConnector,
        PrefixPool,
        RemoteMonitorClient,
    },
    config::NsmConfig,
    connection::{Connection, CrossConnect, NetworkServiceRequest},
    heal::{HealProcessor, HealRequester},
    mechanism::{MechanismSelector, VniAllocator},
    model::Model,
    monitor::{spawn_monitor_server, CrossConnectMonitorClient, MonitorError, MonitorRequester, MonitorSubscription},
    nse_manager::{EndpointSelector, MatchSelector, NseManager},
    pipeline::{PipelineDependencies, RequestError, RequestPipeline},
    registry::{NetworkServiceManager, NseRegistryFile},
};

const LOG_TARGET: &str = "nsm::engine";

const HEAL_REQUEST_BUFFER_SIZE: usize = 100;
const MONITOR_REQUEST_BUFFER_SIZE: usize = 100;

/// The collaborators the engine talks to.
#[derive(Clone)]
pub struct EngineClients {
    pub discovery: Arc<dyn DiscoveryClient>,
    pub nse_connector: Arc<dyn NseConnector>,
    pub forwarder: Arc<dyn ForwarderClient>,
    pub remote_monitor: Arc<dyn RemoteMonitorClient>,
    pub endpoint_monitor: Arc<dyn EndpointMonitorClient>,
    pub prefix_pool: Arc<dyn PrefixPool>,
    pub plugin: Arc<dyn ConnectionPlugin>,
    pub vni_allocator: Arc<dyn VniAllocator>,
    /// Selects endpoints by the network service's match rules when `None`
    pub endpoint_selector: Option<Arc<dyn EndpointSelector>>,
    /// Endpoints deleted because of a broken connection are also removed from this file
    pub registry_file: Option<Arc<NseRegistryFile>>,
}

/// A running connection lifecycle engine for one network service manager.
///
/// All background services stop when the engine is shut down or dropped.
pub struct ConnectionEngine {
    shutdown: Shutdown,
    config: Arc<NsmConfig>,
    model: Model,
    pipeline: RequestPipeline,
    heal: HealRequester,
    ccm: ClientConnectionManager,
    cross_connect_monitor: MonitorRequester<CrossConnect>,
    connection_monitor: MonitorRequester<Connection>,
}

impl ConnectionEngine {
    /// Wire every component together and spawn the background services. Must be called within a tokio runtime.
    pub fn spawn(config: NsmConfig, nsm: NetworkServiceManager, clients: EngineClients) -> Self {
        let config = Arc::new(config);
        let shutdown = Shutdown::new();
        info!(
            target: LOG_TARGET,
            "Starting connection engine for network service manager '{}' (heal enabled: {})",
            nsm.name,
            config.heal_enabled
        );

        let model = Model::new(nsm);
        let selector: Arc<dyn EndpointSelector> = match clients.endpoint_selector.clone() {
            Some(selector) => selector,
            None => Arc::new(MatchSelector::new()),
        };
        let nse_manager = NseManager::new(
            model.clone(),
            clients.discovery.clone(),
            clients.nse_connector.clone(),
            selector,
            config.clone(),
        );
        let pipeline = RequestPipeline::build(PipelineDependencies {
            model: model.clone(),
            nse_manager: nse_manager.clone(),
            forwarder_client: clients.forwarder.clone(),
            mechanism_selector: MechanismSelector::new(clients.vni_allocator.clone()),
            prefix_pool: clients.prefix_pool.clone(),
            plugin: clients.plugin.clone(),
            config: config.clone(),
        });

        let (heal_tx, heal_rx) = mpsc::channel(HEAL_REQUEST_BUFFER_SIZE);
        HealProcessor {
            config: config.clone(),
            model: model.clone(),
            pipeline: pipeline.clone(),
            nse_manager: nse_manager.clone(),
            request_rx: heal_rx,
            shutdown_signal: shutdown.to_signal(),
        }
        .create()
        .spawn();
        let heal = HealRequester::new(heal_tx);

        let mut ccm = ClientConnectionManager::new(
            model.clone(),
            pipeline.clone(),
            heal.clone(),
            nse_manager,
            clients.discovery.clone(),
            clients.vni_allocator.clone(),
            config.clone(),
        );
        if let Some(registry_file) = clients.registry_file.clone() {
            ccm = ccm.with_registry_file(registry_file);
        }

        let cross_connect_monitor =
            spawn_monitor_server("cross-connect", MONITOR_REQUEST_BUFFER_SIZE, shutdown.to_signal());
        let connection_monitor = spawn_monitor_server("connection", MONITOR_REQUEST_BUFFER_SIZE, shutdown.to_signal());
        CrossConnectMonitorClient {
            model: model.clone(),
            ccm: ccm.clone(),
            forwarder_client: clients.forwarder,
            remote_monitor: clients.remote_monitor,
            endpoint_monitor: clients.endpoint_monitor,
            cross_connect_monitor: cross_connect_monitor.clone(),
            connection_monitor: connection_monitor.clone(),
            shutdown_signal: shutdown.to_signal(),
        }
        .create()
        .spawn();

        Self {
            shutdown,
            config,
            model,
            pipeline,
            heal,
            ccm,
            cross_connect_monitor,
            connection_monitor,
        }
    }

    /// Handle a request from a local client or a remote manager.
    pub async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, RequestError> {
        self.pipeline.request(request).await
    }

    pub async fn close(&self, connection_id: &str) -> Result<(), RequestError> {
        self.pipeline.close(connection_id).await
    }

    /// Subscribe to every cross-connect programmed through this manager.
    pub async fn subscribe_cross_connects(&self) -> Result<MonitorSubscription<CrossConnect>, MonitorError> {
        self.cross_connect_monitor.subscribe("").await
    }

    /// Subscribe to the connections that reference the manager `scope`.
    pub async fn subscribe_connections<S: Into<String>>(
        &self,
        scope: S,
    ) -> Result<MonitorSubscription<Connection>, MonitorError>
    {
        self.connection_monitor.subscribe(scope).await
    }

    /// Called when the connection monitor stream of a remote manager has ended. Connections that manager requested
    /// are closed unless it re-requests them within the heal timeout.
    pub fn remote_monitor_done(&self, manager_name: &str) {
        self.ccm.update_remote_monitor_done(manager_name);
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &NsmConfig {
        &self.config
    }

    pub fn client_connection_manager(&self) -> &ClientConnectionManager {
        &self.ccm
    }

    pub fn heal_requester(&self) -> HealRequester {
        self.heal.clone()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.to_signal()
    }

    /// Stop every background service.
    pub fn shutdown(mut self) {
        info!(target: LOG_TARGET, "Shutting down connection engine for '{}'", self.model.nsm_name());
        self.shutdown.trigger();
    }
}
