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
    sync::{Arc, Mutex},
};

use futures::StreamExt;
use log::*;
use nsm_shutdown::{Shutdown, ShutdownSignal};
use tokio::{task, task::JoinHandle};

use super::{ConnectionEvent, CrossConnectEvent, EventType, MonitorRequester};
use crate::{
    client_connection_manager::ClientConnectionManager,
    clients::{EndpointMonitorClient, ForwarderClient, RemoteMonitorClient},
    connection::{Connection, ConnectionState, CrossConnect},
    model::{ClientConnection, Endpoint, Forwarder, Model, ModelEvent},
    registry::NetworkServiceManager,
};

const LOG_TARGET: &str = "nsm::monitor::client";

/// Watches the model and runs one monitor task per forwarder, one per local endpoint and one per remote manager
/// referenced by a live connection. Events from those streams are published to the monitor servers and handed to the client connection
/// manager.
pub struct CrossConnectMonitorClient {
    pub model: Model,
    pub ccm: ClientConnectionManager,
    pub forwarder_client: Arc<dyn ForwarderClient>,
    pub remote_monitor: Arc<dyn RemoteMonitorClient>,
    pub endpoint_monitor: Arc<dyn EndpointMonitorClient>,
    pub cross_connect_monitor: MonitorRequester<CrossConnect>,
    pub connection_monitor: MonitorRequester<Connection>,
    pub shutdown_signal: ShutdownSignal,
}

impl CrossConnectMonitorClient {
    pub fn create(self) -> CrossConnectMonitorActor {
        let handler = EventHandler {
            model: self.model,
            ccm: self.ccm,
            forwarder_client: self.forwarder_client,
            remote_monitor: self.remote_monitor,
            endpoint_monitor: self.endpoint_monitor,
            cross_connect_monitor: self.cross_connect_monitor,
            connection_monitor: self.connection_monitor,
            peers: Arc::new(Mutex::new(PeerTable::default())),
        };
        CrossConnectMonitorActor {
            handler,
            shutdown_signal: self.shutdown_signal,
            tasks_shutdown: Shutdown::new(),
            monitors: HashMap::new(),
            next_generation: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MonitorKey {
    Forwarder(String),
    Endpoint(String),
}

struct RemotePeer {
    connections: HashSet<String>,
    shutdown: Shutdown,
    generation: u64,
}

#[derive(Default)]
struct PeerTable {
    peers: HashMap<String, RemotePeer>,
    /// Connection id to the name of the remote manager it is counted against
    assignments: HashMap<String, String>,
}

pub struct CrossConnectMonitorActor {
    handler: EventHandler,
    shutdown_signal: ShutdownSignal,
    tasks_shutdown: Shutdown,
    monitors: HashMap<MonitorKey, Shutdown>,
    next_generation: u64,
}

impl CrossConnectMonitorActor {
    pub fn spawn(self) -> JoinHandle<()> {
        task::spawn(self.run())
    }

    pub async fn run(mut self) {
        let (listener, mut events) = self.handler.model.add_listener();
        debug!(target: LOG_TARGET, "Cross-connect monitor client started ({})", listener);

        for forwarder in self.handler.model.get_forwarders() {
            self.start_forwarder_monitor(forwarder);
        }
        for endpoint in self.handler.model.get_endpoints() {
            self.start_endpoint_monitor(endpoint);
        }
        for cc in self.handler.model.get_all_client_connections() {
            self.on_connection_changed(&cc).await;
        }

        let mut shutdown_signal = self.shutdown_signal.clone();
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    self.handle_model_event(&event).await;
                },

                _ = &mut shutdown_signal => {
                    info!(target: LOG_TARGET, "Cross-connect monitor client is shutting down because it received the shutdown signal");
                    break;
                },

                else => break,
            }
        }

        self.handler.model.remove_listener(listener);
        self.tasks_shutdown.trigger();
    }

    async fn handle_model_event(&mut self, event: &ModelEvent) {
        use ModelEvent::*;
        trace!(target: LOG_TARGET, "Model event: {}", event);
        match event {
            ForwarderAdded(forwarder) => self.start_forwarder_monitor(forwarder.clone()),
            ForwarderDeleted(forwarder) => {
                self.handler.ccm.forwarder_down(forwarder).await;
                self.stop_monitor(&MonitorKey::Forwarder(forwarder.registered_name.clone()));
            },
            EndpointAdded(endpoint) => self.start_endpoint_monitor(endpoint.clone()),
            EndpointDeleted(endpoint) => self.stop_monitor(&MonitorKey::Endpoint(endpoint.name().to_string())),
            ClientConnectionAdded(cc) => self.on_connection_changed(cc).await,
            ClientConnectionUpdated { new, .. } => self.on_connection_changed(new).await,
            ClientConnectionDeleted(cc) => self.on_connection_deleted(cc).await,
            EndpointUpdated(_) | ForwarderUpdated(_) => {},
        }
    }

    fn start_forwarder_monitor(&mut self, forwarder: Forwarder) {
        let signal = self.register_monitor(MonitorKey::Forwarder(forwarder.registered_name.clone()));
        info!(target: LOG_TARGET, "Starting cross-connect monitor of forwarder '{}'", forwarder.registered_name);
        task::spawn(self.handler.clone().monitor_forwarder(forwarder, signal));
    }

    fn start_endpoint_monitor(&mut self, endpoint: Endpoint) {
        let signal = self.register_monitor(MonitorKey::Endpoint(endpoint.name().to_string()));
        info!(target: LOG_TARGET, "Starting connection monitor of endpoint '{}'", endpoint.name());
        task::spawn(self.handler.clone().monitor_endpoint(endpoint, signal));
    }

    fn register_monitor(&mut self, key: MonitorKey) -> ShutdownSignal {
        let shutdown = self.tasks_shutdown.child();
        let signal = shutdown.to_signal();
        if let Some(mut previous) = self.monitors.insert(key, shutdown) {
            previous.trigger();
        }
        signal
    }

    fn stop_monitor(&mut self, key: &MonitorKey) {
        if let Some(mut shutdown) = self.monitors.remove(key) {
            debug!(target: LOG_TARGET, "Stopping {:?} monitor", key);
            shutdown.trigger();
        }
    }

    async fn on_connection_changed(&mut self, cc: &ClientConnection) {
        match cc.remote_nsm.as_ref() {
            Some(manager) if !cc.state().is_closing() => self.assign_peer(cc.id(), manager),
            _ => self.handler.release_peer(cc.id()),
        }

        if cc.state().is_ready() && cc.has_remote_source() {
            if let Some(source) = cc.source() {
                if let Err(err) = self.handler.connection_monitor.update(source.clone()).await {
                    warn!(target: LOG_TARGET, "Failed to publish connection '{}': {}", source.id, err);
                }
            }
        }
    }

    async fn on_connection_deleted(&mut self, cc: &ClientConnection) {
        self.handler.release_peer(cc.id());
        self.handler.ccm.mark_connection_deleted(cc.clone());

        if cc.has_remote_source() {
            if let Some(source) = cc.source() {
                let mut source = source.clone();
                source.state = ConnectionState::Down;
                if let Err(err) = self.handler.connection_monitor.delete(source).await {
                    warn!(target: LOG_TARGET, "Failed to publish deletion of '{}': {}", cc.id(), err);
                }
            }
        }
    }

    /// Count the connection against `manager`, starting a monitor of that manager if none is running.
    fn assign_peer(&mut self, id: &str, manager: &NetworkServiceManager) {
        let mut table = acquire_lock!(self.handler.peers);
        if table.assignments.get(id).map(|name| name == &manager.name).unwrap_or(false) {
            return;
        }
        if let Some(previous) = table.assignments.remove(id) {
            release_from(&mut table, id, &previous);
        }
        table.assignments.insert(id.to_string(), manager.name.clone());

        if let Some(peer) = table.peers.get_mut(&manager.name) {
            peer.connections.insert(id.to_string());
            return;
        }

        self.next_generation += 1;
        let shutdown = self.tasks_shutdown.child();
        let signal = shutdown.to_signal();
        let mut connections = HashSet::new();
        connections.insert(id.to_string());
        table.peers.insert(manager.name.clone(), RemotePeer {
            connections,
            shutdown,
            generation: self.next_generation,
        });
        info!(target: LOG_TARGET, "Starting connection monitor of remote manager '{}'", manager.name);
        task::spawn(
            self.handler
                .clone()
                .monitor_peer(manager.clone(), self.next_generation, signal),
        );
    }

    #[cfg(test)]
    pub(super) fn peers_handle(&self) -> PeersHandle {
        PeersHandle(self.handler.peers.clone())
    }
}

/// Read access to the remote peer table.
#[cfg(test)]
pub(super) struct PeersHandle(Arc<Mutex<PeerTable>>);

#[cfg(test)]
impl PeersHandle {
    pub fn connection_count(&self, manager: &str) -> usize {
        acquire_lock!(self.0)
            .peers
            .get(manager)
            .map(|p| p.connections.len())
            .unwrap_or(0)
    }

    pub fn is_monitored(&self, manager: &str) -> bool {
        acquire_lock!(self.0).peers.contains_key(manager)
    }
}

fn release_from(table: &mut PeerTable, id: &str, manager: &str) {
    let now_unused = match table.peers.get_mut(manager) {
        Some(peer) => {
            peer.connections.remove(id);
            peer.connections.is_empty()
        },
        None => false,
    };
    if now_unused {
        if let Some(mut peer) = table.peers.remove(manager) {
            info!(
                target: LOG_TARGET,
                "No connections left to remote manager '{}', stopping its monitor", manager
            );
            peer.shutdown.trigger();
        }
    }
}

#[derive(Clone)]
struct EventHandler {
    model: Model,
    ccm: ClientConnectionManager,
    forwarder_client: Arc<dyn ForwarderClient>,
    remote_monitor: Arc<dyn RemoteMonitorClient>,
    endpoint_monitor: Arc<dyn EndpointMonitorClient>,
    cross_connect_monitor: MonitorRequester<CrossConnect>,
    connection_monitor: MonitorRequester<Connection>,
    peers: Arc<Mutex<PeerTable>>,
}

impl EventHandler {
    fn release_peer(&self, id: &str) {
        let mut table = acquire_lock!(self.peers);
        if let Some(manager) = table.assignments.remove(id) {
            release_from(&mut table, id, &manager);
        }
    }

    //---------------------------------- Forwarders -----------------------------------//

    async fn monitor_forwarder(self, forwarder: Forwarder, mut shutdown_signal: ShutdownSignal) {
        let name = forwarder.registered_name.clone();
        let mut stream = match self.forwarder_client.monitor_cross_connects(&forwarder).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(target: LOG_TARGET, "Failed to monitor forwarder '{}': {}", name, err);
                self.forwarder_lost(&name, &shutdown_signal);
                return;
            },
        };

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle_cross_connect_event(event, &name).await,
                    Some(Err(err)) => {
                        warn!(target: LOG_TARGET, "Cross-connect monitor of forwarder '{}' failed: {}", name, err);
                        break;
                    },
                    None => {
                        warn!(target: LOG_TARGET, "Cross-connect monitor of forwarder '{}' ended", name);
                        break;
                    },
                },

                _ = &mut shutdown_signal => {
                    debug!(target: LOG_TARGET, "Cross-connect monitor of forwarder '{}' stopped", name);
                    return;
                },
            }
        }
        self.forwarder_lost(&name, &shutdown_signal);
    }

    fn forwarder_lost(&self, name: &str, shutdown_signal: &ShutdownSignal) {
        if shutdown_signal.is_triggered() {
            return;
        }
        warn!(target: LOG_TARGET, "Lost forwarder '{}', removing it", name);
        self.model.delete_forwarder(name);
    }

    async fn handle_cross_connect_event(&self, event: CrossConnectEvent, forwarder_name: &str) {
        debug!(
            target: LOG_TARGET,
            "{} event with {} cross-connect(s) from forwarder '{}'",
            event.event_type,
            event.entities.len(),
            forwarder_name
        );
        let event_type = event.event_type;
        let xcons = event.entities.into_iter().map(|(_, xcon)| xcon).collect::<Vec<_>>();
        for xcon in &xcons {
            match event_type {
                EventType::InitialStateTransfer => self.publish_xcon(xcon.clone()).await,
                EventType::Update => {
                    self.publish_xcon(xcon.clone()).await;
                    if let Some(cc) = self.ccm.get_client_connection_by_xcon(xcon) {
                        self.ccm.update_xcon(&cc, xcon.clone()).await;
                    }
                },
                EventType::Delete => {
                    let closing = self
                        .ccm
                        .get_client_connection_by_xcon(xcon)
                        .map(|cc| cc.state().is_closing())
                        .unwrap_or(false);
                    if closing {
                        if let Err(err) = self.cross_connect_monitor.delete(xcon.clone()).await {
                            warn!(target: LOG_TARGET, "Failed to publish deletion of {}: {}", xcon, err);
                        }
                    }
                },
            }
        }
        if event_type.is_initial_state_transfer() {
            self.ccm.restore_connections(xcons, forwarder_name).await;
        }
    }

    async fn publish_xcon(&self, xcon: CrossConnect) {
        if let Err(err) = self.cross_connect_monitor.update(xcon).await {
            warn!(target: LOG_TARGET, "Failed to publish cross-connect: {}", err);
        }
    }

    //---------------------------------- Local endpoints -----------------------------------//

    async fn monitor_endpoint(self, endpoint: Endpoint, mut shutdown_signal: ShutdownSignal) {
        let name = endpoint.name().to_string();
        let mut stream = match self.endpoint_monitor.monitor_connections(&endpoint).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(target: LOG_TARGET, "Failed to monitor endpoint '{}': {}", name, err);
                self.endpoint_lost(&name, &shutdown_signal).await;
                return;
            },
        };

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle_endpoint_event(event, &name).await,
                    Some(Err(err)) => {
                        warn!(target: LOG_TARGET, "Connection monitor of endpoint '{}' failed: {}", name, err);
                        break;
                    },
                    None => {
                        warn!(target: LOG_TARGET, "Connection monitor of endpoint '{}' ended", name);
                        break;
                    },
                },

                _ = &mut shutdown_signal => {
                    debug!(target: LOG_TARGET, "Connection monitor of endpoint '{}' stopped", name);
                    return;
                },
            }
        }
        self.endpoint_lost(&name, &shutdown_signal).await;
    }

    async fn endpoint_lost(&self, name: &str, shutdown_signal: &ShutdownSignal) {
        if shutdown_signal.is_triggered() {
            return;
        }
        if let Err(err) = self.ccm.delete_endpoint_with_broken_connection(name).await {
            error!(target: LOG_TARGET, "Failed to delete endpoint '{}': {}", name, err);
        }
    }

    async fn handle_endpoint_event(&self, event: ConnectionEvent, endpoint_name: &str) {
        let event_type = event.event_type;
        for (_, connection) in event.entities {
            let cc = match self.ccm.get_client_connection_by_local_dst(&connection.id) {
                Some(cc) => cc,
                None => continue,
            };
            match event_type {
                EventType::InitialStateTransfer => {},
                EventType::Update => self.ccm.local_destination_updated(&cc, connection).await,
                EventType::Delete => {
                    if cc.state().is_closing() {
                        continue;
                    }
                    info!(
                        target: LOG_TARGET,
                        "Endpoint '{}' deleted connection '{}' of '{}'",
                        endpoint_name,
                        connection.id,
                        cc.id()
                    );
                    self.ccm.destination_down(cc, false).await;
                },
            }
        }
    }

    //---------------------------------- Remote peers -----------------------------------//

    async fn monitor_peer(self, manager: NetworkServiceManager, generation: u64, mut shutdown_signal: ShutdownSignal) {
        let name = manager.name.clone();
        let mut stream = match self
            .remote_monitor
            .monitor_connections(&manager, &self.model.nsm_name())
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(target: LOG_TARGET, "Failed to monitor remote manager '{}': {}", name, err);
                self.peer_lost(&name, generation, &shutdown_signal).await;
                return;
            },
        };

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle_connection_event(event, &name).await,
                    Some(Err(err)) => {
                        warn!(target: LOG_TARGET, "Connection monitor of remote manager '{}' failed: {}", name, err);
                        break;
                    },
                    None => {
                        warn!(target: LOG_TARGET, "Connection monitor of remote manager '{}' ended", name);
                        break;
                    },
                },

                _ = &mut shutdown_signal => {
                    debug!(target: LOG_TARGET, "Connection monitor of remote manager '{}' stopped", name);
                    return;
                },
            }
        }
        self.peer_lost(&name, generation, &shutdown_signal).await;
    }

    /// The remote manager is unreachable. Its connections are healed as destination manager down.
    async fn peer_lost(&self, name: &str, generation: u64, shutdown_signal: &ShutdownSignal) {
        if shutdown_signal.is_triggered() {
            return;
        }
        {
            let mut table = acquire_lock!(self.peers);
            let current = table
                .peers
                .get(name)
                .map(|peer| peer.generation == generation)
                .unwrap_or(false);
            if current {
                if let Some(peer) = table.peers.remove(name) {
                    for id in peer.connections {
                        table.assignments.remove(&id);
                    }
                }
            }
        }
        for cc in self.ccm.get_client_connections_by_remote(name) {
            self.ccm.destination_down(cc, true).await;
        }
    }

    /// Events for known connections are applied in stream order. Only an event for a connection that is still being
    /// requested waits in the background.
    async fn handle_connection_event(&self, event: ConnectionEvent, remote_name: &str) {
        for (_, connection) in event.entities {
            let event_type = event.event_type;
            match self.ccm.get_client_connection_by_remote_dst(&connection.id, remote_name) {
                Some(cc) => self.handle_remote_connection(event_type, cc, connection).await,
                None => {
                    let handler = self.clone();
                    let remote_name = remote_name.to_string();
                    task::spawn(async move {
                        match handler.ccm.wait_pending_connections(&connection.id, &remote_name).await {
                            Ok(Some(cc)) => handler.handle_remote_connection(event_type, cc, connection).await,
                            Ok(None) => debug!(
                                target: LOG_TARGET,
                                "No connection matches {}@{} after pending connections settled", connection.id, remote_name
                            ),
                            Err(err) => debug!(target: LOG_TARGET, "Ignoring remote event: {}", err),
                        }
                    });
                },
            }
        }
    }

    async fn handle_remote_connection(&self, event_type: EventType, cc: ClientConnection, connection: Connection) {
        match event_type {
            EventType::InitialStateTransfer | EventType::Update => {
                self.ccm.remote_destination_updated(&cc, connection).await;
            },
            EventType::Delete => {
                let live = self
                    .model
                    .get_client_connection(cc.id())
                    .map(|current| !current.state().is_closing())
                    .unwrap_or(false);
                if !live {
                    return;
                }
                info!(
                    target: LOG_TARGET,
                    "Remote destination '{}' of connection '{}' was deleted",
                    connection.id,
                    cc.id()
                );
                if let Some(mut xcon) = cc.xcon.clone() {
                    let mut destination = connection;
                    destination.state = ConnectionState::Down;
                    xcon.destination = Some(destination);
                    self.publish_xcon(xcon).await;
                }
                self.ccm.destination_down(cc, false).await;
            },
        }
    }
}
