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

//! # Client connection manager
//!
//! Translates what the monitors observe (cross-connect updates from forwarders, connection events from remote
//! managers, forwarders and endpoints going away) into model updates and heal triggers. It also rebuilds the model
//! from the cross-connects a forwarder reports after a restart.
//!
//! Connections deleted from the model are remembered for `deleted_connection_lifetime` so that late events about
//! them can still be matched.

mod error;

#[cfg(test)]
mod test;

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use log::*;
use tokio::{sync::watch, task, time};

pub use self::error::ClientConnectionManagerError;
use crate::{
    clients::DiscoveryClient,
    config::NsmConfig,
    connection::{params, Connection, CrossConnect, NetworkServiceRequest},
    heal::{HealRequester, HealTrigger},
    mechanism::VniAllocator,
    model::{ClientConnection, ClientConnectionState, Forwarder, ForwarderState, Model, ModelEvent},
    nse_manager::NseManager,
    pipeline::RequestPipeline,
    registry::{NseRegistration, NseRegistryFile},
};

const LOG_TARGET: &str = "nsm::client_connection_manager";

#[derive(Debug, Clone)]
struct DeletedConnection {
    deleted_at: Instant,
    connection: ClientConnection,
}

#[derive(Clone)]
pub struct ClientConnectionManager {
    model: Model,
    pipeline: RequestPipeline,
    heal: HealRequester,
    nse_manager: NseManager,
    discovery: Arc<dyn DiscoveryClient>,
    vni_allocator: Arc<dyn VniAllocator>,
    config: Arc<NsmConfig>,
    registry_file: Option<Arc<NseRegistryFile>>,
    deleted: Arc<RwLock<HashMap<String, DeletedConnection>>>,
    state_restored_tx: Arc<watch::Sender<bool>>,
    state_restored_rx: watch::Receiver<bool>,
}

impl ClientConnectionManager {
    pub fn new(
        model: Model,
        pipeline: RequestPipeline,
        heal: HealRequester,
        nse_manager: NseManager,
        discovery: Arc<dyn DiscoveryClient>,
        vni_allocator: Arc<dyn VniAllocator>,
        config: Arc<NsmConfig>,
    ) -> Self
    {
        let (state_restored_tx, state_restored_rx) = watch::channel(false);
        Self {
            model,
            pipeline,
            heal,
            nse_manager,
            discovery,
            vni_allocator,
            config,
            registry_file: None,
            deleted: Arc::new(RwLock::new(HashMap::new())),
            state_restored_tx: Arc::new(state_restored_tx),
            state_restored_rx,
        }
    }

    /// Also remove endpoints from this registry file when they are deleted.
    pub fn with_registry_file(mut self, registry_file: Arc<NseRegistryFile>) -> Self {
        self.registry_file = Some(registry_file);
        self
    }

    pub fn nsm_name(&self) -> String {
        self.model.nsm_name()
    }

    //---------------------------------- Event handling -----------------------------------//

    /// The forwarder reported a changed cross-connect for the connection.
    pub async fn update_xcon(&self, connection: &ClientConnection, xcon: CrossConnect) {
        let updated = self.model.apply_client_connection_changes(connection.id(), |cc| {
            cc.xcon = Some(xcon.clone());
        });
        let cc = match updated {
            Some(cc) => cc,
            None => {
                warn!(
                    target: LOG_TARGET,
                    "Trying to update not existing connection: {}",
                    connection.id()
                );
                return;
            },
        };

        if xcon.local_source().map(|src| src.state.is_down()).unwrap_or(false) {
            info!(target: LOG_TARGET, "Connection '{}' source is down, closing it", cc.id());
            if let Err(err) = self.pipeline.close(cc.id()).await {
                error!(target: LOG_TARGET, "Error closing connection '{}': {}", cc.id(), err);
            }
            return;
        }

        if xcon.local_destination().map(|dst| dst.state.is_down()).unwrap_or(false) {
            info!(target: LOG_TARGET, "Connection '{}' destination is down, healing it", cc.id());
            self.request_heal(cc, HealTrigger::DstDown).await;
        }
    }

    /// The destination of the connection went away. `nsmd_down` means the manager owning it is unreachable.
    pub async fn destination_down(&self, connection: ClientConnection, nsmd_down: bool) {
        let trigger = if nsmd_down {
            HealTrigger::DstNmgrDown
        } else {
            HealTrigger::DstDown
        };
        self.request_heal(connection, trigger).await;
    }

    /// Heal every connection programmed on the forwarder.
    pub async fn forwarder_down(&self, forwarder: &Forwarder) {
        let connections = self
            .model
            .get_all_client_connections()
            .into_iter()
            .filter(|cc| cc.forwarder_registered_name == forwarder.registered_name)
            .collect::<Vec<_>>();
        info!(
            target: LOG_TARGET,
            "Forwarder '{}' is down, healing {} connection(s)",
            forwarder.registered_name,
            connections.len()
        );
        for cc in connections {
            self.request_heal(cc, HealTrigger::ForwarderDown).await;
        }
    }

    /// A local endpoint reported changed connection parameters.
    pub async fn local_destination_updated(&self, connection: &ClientConnection, mut destination: Connection) {
        if !connection.state().is_ready() {
            return;
        }
        // The endpoint does not know about the workspace parameters
        let current = connection.destination().and_then(|dst| dst.mechanism.as_ref());
        if let (Some(current), Some(mechanism)) = (current, destination.mechanism.as_mut()) {
            for key in &[params::WORKSPACE, params::WORKSPACE_NSE_NAME] {
                if let Some(value) = current.parameter(key) {
                    mechanism.parameters.insert(key.to_string(), value.to_string());
                }
            }
        }
        self.destination_updated(connection, destination).await;
    }

    /// A remote manager reported changed connection parameters. Connections reported Up are left to the remote side.
    pub async fn remote_destination_updated(&self, connection: &ClientConnection, destination: Connection) {
        if !connection.state().is_ready() {
            debug!(target: LOG_TARGET, "Connection '{}' is not Ready, ignoring update", connection.id());
            return;
        }
        if destination.state.is_up() {
            trace!(target: LOG_TARGET, "Remote destination of '{}' is Up", connection.id());
            return;
        }
        self.destination_updated(connection, destination).await;
    }

    async fn destination_updated(&self, connection: &ClientConnection, destination: Connection) {
        if connection.destination() == Some(&destination) {
            trace!(target: LOG_TARGET, "Destination of '{}' is unchanged", connection.id());
            return;
        }
        let updated = self.model.apply_client_connection_changes(connection.id(), |cc| {
            if let Some(xcon) = cc.xcon.as_mut() {
                xcon.destination = Some(destination.clone());
            }
        });
        match updated {
            Some(cc) => self.request_heal(cc, HealTrigger::DstUpdate).await,
            None => warn!(
                target: LOG_TARGET,
                "Trying to update not existing connection: {}",
                connection.id()
            ),
        }
    }

    async fn request_heal(&self, connection: ClientConnection, trigger: HealTrigger) {
        let id = connection.id().to_string();
        if let Err(err) = self.heal.heal(connection, trigger).await {
            error!(target: LOG_TARGET, "Failed to request {} heal of '{}': {}", trigger, id, err);
        }
    }

    //---------------------------------- Lookups -----------------------------------//

    /// Connections in the model plus recently deleted ones.
    fn client_connections(&self) -> Vec<ClientConnection> {
        let mut connections = self.model.get_all_client_connections();
        let deleted = acquire_read_lock!(self.deleted);
        connections.extend(deleted.values().map(|d| d.connection.clone()));
        connections
    }

    /// The cross-connect id is the connection id, so recently deleted connections are found too.
    pub fn get_client_connection_by_xcon(&self, xcon: &CrossConnect) -> Option<ClientConnection> {
        self.model.get_client_connection(&xcon.id).or_else(|| {
            acquire_read_lock!(self.deleted)
                .get(&xcon.id)
                .map(|d| d.connection.clone())
        })
    }

    pub fn get_client_connection_by_local_dst(&self, dst_id: &str) -> Option<ClientConnection> {
        self.client_connections().into_iter().find(|cc| {
            cc.xcon
                .as_ref()
                .and_then(|xcon| xcon.local_destination())
                .map(|dst| dst.id == dst_id)
                .unwrap_or(false)
        })
    }

    pub fn get_client_connection_by_remote_dst(&self, dst_id: &str, remote_name: &str) -> Option<ClientConnection> {
        self.client_connections().into_iter().find(|cc| {
            cc.xcon
                .as_ref()
                .and_then(|xcon| xcon.remote_destination())
                .map(|dst| dst.id == dst_id && dst.destination_manager() == Some(remote_name))
                .unwrap_or(false)
        })
    }

    /// Connections whose destination is owned by the remote manager.
    pub fn get_client_connections_by_remote(&self, manager_name: &str) -> Vec<ClientConnection> {
        self.client_connections()
            .into_iter()
            .filter(|cc| cc.remote_nsm.as_ref().map(|m| m.name == manager_name).unwrap_or(false))
            .collect()
    }

    pub fn get_client_connections_by_forwarder(&self, forwarder_name: &str) -> Vec<ClientConnection> {
        self.client_connections()
            .into_iter()
            .filter(|cc| cc.forwarder_registered_name == forwarder_name)
            .collect()
    }

    /// Connections requested by the remote manager.
    pub fn get_client_connections_by_source(&self, manager_name: &str) -> Vec<ClientConnection> {
        self.client_connections()
            .into_iter()
            .filter(|cc| {
                cc.xcon
                    .as_ref()
                    .and_then(|xcon| xcon.remote_source())
                    .and_then(|src| src.source_manager())
                    .map(|name| name == manager_name)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Wait for in-flight requests and heals to settle, then look for the connection with remote destination `id`
    /// on `remote_name`.
    ///
    /// Returns `Ok(None)` if every pending connection settled without matching.
    pub async fn wait_pending_connections(
        &self,
        id: &str,
        remote_name: &str,
    ) -> Result<Option<ClientConnection>, ClientConnectionManagerError>
    {
        let (listener, mut events) = self.model.add_listener();
        let mut pending = self
            .model
            .get_all_client_connections()
            .into_iter()
            .filter(|cc| cc.state().is_pending())
            .map(|cc| cc.id().to_string())
            .collect::<HashSet<_>>();

        if pending.is_empty() {
            self.model.remove_listener(listener);
            return match self.get_client_connection_by_remote_dst(id, remote_name) {
                Some(cc) => Ok(Some(cc)),
                None => Err(ClientConnectionManagerError::ConnectionNotFound {
                    id: id.to_string(),
                    remote: remote_name.to_string(),
                }),
            };
        }

        debug!(
            target: LOG_TARGET,
            "Waiting for {} pending connection(s) to match {}@{}",
            pending.len(),
            id,
            remote_name
        );
        let deadline = time::Instant::now() + self.config.pending_connections_timeout;
        let result = loop {
            if pending.is_empty() {
                break Ok(None);
            }
            let event = match time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => break Ok(None),
                Err(_) => {
                    break Err(ClientConnectionManagerError::PendingTimeout {
                        id: id.to_string(),
                        remote: remote_name.to_string(),
                    })
                },
            };
            let settled = match &*event {
                ModelEvent::ClientConnectionUpdated { new, .. } if !new.state().is_pending() => new.id(),
                ModelEvent::ClientConnectionDeleted(cc) => cc.id(),
                _ => continue,
            };
            if pending.remove(settled) {
                if let Some(cc) = self.get_client_connection_by_remote_dst(id, remote_name) {
                    break Ok(Some(cc));
                }
            }
        };
        self.model.remove_listener(listener);
        result
    }

    //---------------------------------- Deleted connections -----------------------------------//

    pub fn mark_connection_deleted(&self, connection: ClientConnection) {
        acquire_write_lock!(self.deleted).insert(connection.id().to_string(), DeletedConnection {
            deleted_at: Instant::now(),
            connection,
        });
        self.cleanup_deleted_connections();
    }

    pub fn is_connection_deleted(&self, id: &str) -> bool {
        acquire_read_lock!(self.deleted)
            .get(id)
            .map(|d| d.deleted_at.elapsed() <= self.config.deleted_connection_lifetime)
            .unwrap_or(false)
    }

    /// Forget deleted connections older than `deleted_connection_lifetime`.
    pub fn cleanup_deleted_connections(&self) {
        let lifetime = self.config.deleted_connection_lifetime;
        acquire_write_lock!(self.deleted).retain(|_, d| d.deleted_at.elapsed() <= lifetime);
    }

    //---------------------------------- Remote sources -----------------------------------//

    /// The monitor of a remote manager that requested connections from us has ended.
    pub fn update_remote_monitor_done(&self, manager_name: &str) {
        for cc in self.get_client_connections_by_source(manager_name) {
            self.remote_connection_lost(&cc);
        }
    }

    /// Put a connection requested by a remote manager into Healing and close it if the remote side has not
    /// re-requested it within `heal_timeout`.
    pub fn remote_connection_lost(&self, connection: &ClientConnection) {
        let id = connection.id().to_string();
        let current = match self.model.get_client_connection(&id) {
            Some(cc) => cc,
            None => return,
        };
        if !current.state().is_healing() {
            if let Err(err) = self
                .model
                .change_client_connection_state(&id, ClientConnectionState::Healing)
            {
                debug!(target: LOG_TARGET, "Connection '{}' cannot wait for its source: {}", id, err);
                return;
            }
        }
        info!(
            target: LOG_TARGET,
            "Connection '{}' lost its remote source and is Healing for {:.2?}", id, self.config.heal_timeout
        );

        let model = self.model.clone();
        let pipeline = self.pipeline.clone();
        let heal_timeout = self.config.heal_timeout;
        task::spawn(async move {
            time::sleep(heal_timeout).await;
            let still_healing = model
                .get_client_connection(&id)
                .map(|cc| cc.state().is_healing())
                .unwrap_or(false);
            if still_healing {
                warn!(
                    target: LOG_TARGET,
                    "Connection '{}' was not healed from the remote side, closing it", id
                );
                if let Err(err) = pipeline.close(&id).await {
                    error!(target: LOG_TARGET, "Error closing connection '{}': {}", id, err);
                }
            }
        });
    }

    //---------------------------------- Endpoints -----------------------------------//

    /// Remove an endpoint whose connection is broken and heal the connections that used it.
    pub async fn delete_endpoint_with_broken_connection(
        &self,
        endpoint_name: &str,
    ) -> Result<(), ClientConnectionManagerError>
    {
        info!(target: LOG_TARGET, "Deleting endpoint '{}' with broken connection", endpoint_name);
        self.model.delete_endpoint(endpoint_name);
        let file_result = match &self.registry_file {
            Some(file) => file.delete_nse(endpoint_name),
            None => Ok(()),
        };
        let discovery_result = self.discovery.remove_nse(endpoint_name).await;

        let affected = self
            .model
            .get_all_client_connections()
            .into_iter()
            .filter(|cc| cc.endpoint_name() == Some(endpoint_name) && cc.state().is_ready())
            .collect::<Vec<_>>();
        for cc in affected {
            self.destination_down(cc, false).await;
        }

        file_result?;
        discovery_result?;
        Ok(())
    }

    //---------------------------------- Restore -----------------------------------//

    /// Rebuild connections from the cross-connects a forwarder reported in its initial state transfer.
    pub async fn restore_connections(&self, xcons: Vec<CrossConnect>, forwarder_name: &str) {
        for xcon in xcons {
            self.model.correct_id_generator(&xcon.id);
            if self.model.get_client_connection(&xcon.id).is_some() {
                continue;
            }
            info!(target: LOG_TARGET, "Restoring state of active connection {}", xcon);
            self.restore_connection(xcon, forwarder_name).await;
        }
        info!(target: LOG_TARGET, "All connections of forwarder '{}' are restored", forwarder_name);
        let _ = self.state_restored_tx.send(true);
    }

    async fn restore_connection(&self, xcon: CrossConnect, forwarder_name: &str) {
        let mut state = ClientConnectionState::Ready;
        let mut endpoint_name = String::new();
        let mut network_service = String::new();

        if let Some(src) = xcon.remote_source() {
            state = ClientConnectionState::Healing;
            network_service = src.network_service.clone();
            endpoint_name = src.network_service_endpoint_name.clone();
        }
        if let Some(dst) = xcon.local_destination() {
            state = ClientConnectionState::Ready;
            network_service = dst.network_service.clone();
            endpoint_name = dst
                .mechanism
                .as_ref()
                .and_then(|m| m.parameter(params::WORKSPACE_NSE_NAME))
                .unwrap_or_default()
                .to_string();
        }
        if let Some(dst) = xcon.remote_destination() {
            state = ClientConnectionState::Ready;
            network_service = dst.network_service.clone();
            endpoint_name = dst.network_service_endpoint_name.clone();
            self.restore_vni(dst);
        }

        let endpoint = self.restore_endpoint(&xcon, &endpoint_name, &network_service).await;

        let mut cc = ClientConnection::new(xcon.id.clone());
        cc.endpoint = endpoint.clone();
        cc.forwarder_registered_name = forwarder_name.to_string();
        cc.forwarder_state = ForwarderState::Ready;
        if xcon.remote_destination().is_some() {
            cc.remote_nsm = endpoint.as_ref().map(|ep| ep.network_service_manager.clone());
        }
        if let Some(src) = xcon.local_source() {
            cc.request = Some(NetworkServiceRequest::new(
                src.clone(),
                src.mechanism.iter().cloned().collect(),
            ));
        }
        cc.xcon = Some(xcon.clone());

        let id = xcon.id.clone();
        if let Err(err) = self.model.add_client_connection(cc, state) {
            error!(target: LOG_TARGET, "Failed to restore connection '{}': {}", id, err);
            return;
        }
        let cc = match self.model.get_client_connection(&id) {
            Some(cc) => cc,
            None => return,
        };

        if let Some(src) = xcon.local_source() {
            if src.state.is_down() {
                info!(target: LOG_TARGET, "Restored connection '{}' has its source down, closing it", id);
                self.close_restored(&id).await;
                return;
            }
        }

        if xcon.remote_source().is_some() {
            if endpoint.is_some() {
                self.remote_connection_lost(&cc);
            } else {
                self.close_restored(&id).await;
            }
        } else if xcon.remote_destination().is_some() {
            self.request_heal(cc, HealTrigger::DstNmgrDown).await;
        } else if xcon.local_destination().is_some() {
            if endpoint.is_some() {
                self.request_heal(cc, HealTrigger::DstNmgrDown).await;
            } else {
                self.close_restored(&id).await;
            }
        }
    }

    fn restore_vni(&self, dst: &Connection) {
        let mechanism = match dst.mechanism.as_ref() {
            Some(m) if m.mechanism_type.is_vxlan() => m,
            _ => return,
        };
        let vni = mechanism.parameter(params::VNI).and_then(|v| v.parse::<u32>().ok());
        match (mechanism.parameter(params::SRC_IP), mechanism.parameter(params::DST_IP), vni) {
            (Some(src_ip), Some(dst_ip), Some(vni)) => self.vni_allocator.restore(src_ip, dst_ip, vni),
            _ => error!(
                target: LOG_TARGET,
                "Error retrieving src/dst ip or vni from remote connection {}", dst
            ),
        }
    }

    async fn restore_endpoint(
        &self,
        xcon: &CrossConnect,
        endpoint_name: &str,
        network_service: &str,
    ) -> Option<NseRegistration>
    {
        if endpoint_name.is_empty() {
            return None;
        }
        if let Some(endpoint) = self.model.get_endpoint(endpoint_name) {
            debug!(target: LOG_TARGET, "Local endpoint selected: {}", endpoint);
            return Some(endpoint.registration);
        }
        let dst = xcon.remote_destination()?;
        match self
            .nse_manager
            .find_network_service(network_service, self.config.request_timeout)
            .await
        {
            Ok(response) => {
                let found = response
                    .network_service_endpoints
                    .iter()
                    .find(|ep| ep.name == dst.network_service_endpoint_name)
                    .map(|ep| NseManager::registration_from(&response, ep));
                if found.is_none() {
                    error!(target: LOG_TARGET, "Failed to find endpoint '{}'", endpoint_name);
                }
                found
            },
            Err(err) => {
                error!(target: LOG_TARGET, "Failed to find endpoint '{}' to restore: {}", endpoint_name, err);
                None
            },
        }
    }

    async fn close_restored(&self, id: &str) {
        if let Err(err) = self.pipeline.close(id).await {
            error!(target: LOG_TARGET, "Failed to close restored connection '{}': {}", id, err);
        }
    }

    /// Wait until a forwarder's connections are restored. Returns false on timeout.
    pub async fn wait_state_restored(&self, timeout: Duration) -> bool {
        let mut restored = self.state_restored_rx.clone();
        let deadline = time::Instant::now() + timeout;
        loop {
            if *restored.borrow() {
                return true;
            }
            match time::timeout_at(deadline, restored.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return *restored.borrow(),
            }
        }
    }
}
