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

//! # Model
//!
//! The in-memory store of endpoints, forwarders and client connections. The model owns the canonical copy of every
//! entity. Reads return copies and writes replace the stored value, so no caller ever holds a reference to state that
//! the model (or another task) continues to mutate.
//!
//! Listeners registered with [Model::add_listener] receive a [ModelEvent] for every mutation. Events are sent while the
//! write lock is held, so each listener observes the mutations in the order they were applied.
//!
//! Client connection state is changed exclusively through [Model::change_client_connection_state] and
//! [Model::compare_and_change_state], which reject any transition outside the table in
//! [ClientConnectionState::can_transition_to].

mod client_connection;
mod editor;
mod endpoint;
mod error;
mod events;
mod forwarder;


use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
    time::Duration,
};

use log::*;
use tokio::{sync::mpsc, time};

pub use self::{
    client_connection::{ClientConnection, ClientConnectionState, ForwarderState},
    editor::ClientConnectionEditor,
    endpoint::Endpoint,
    error::ModelError,
    events::{ListenerId, ModelEvent, ModelEventRx},
    forwarder::Forwarder,
};
use self::events::ModelEventTx;
use crate::registry::NetworkServiceManager;

const LOG_TARGET: &str = "nsm::model";

#[derive(Debug)]
struct StoredConnection {
    connection: ClientConnection,
    /// Incremented on every state change. Editors issued before the latest change are stale.
    version: u64,
}

#[derive(Debug, Default)]
struct ModelState {
    nsm: NetworkServiceManager,
    endpoints: HashMap<String, Endpoint>,
    forwarders: BTreeMap<String, Forwarder>,
    client_connections: HashMap<String, StoredConnection>,
    last_connection_id: u64,
    listeners: BTreeMap<ListenerId, ModelEventTx>,
    next_listener_id: u64,
}

impl ModelState {
    fn notify(&mut self, event: ModelEvent) {
        trace!(target: LOG_TARGET, "Publishing {}", event);
        let event = Arc::new(event);
        let mut closed = Vec::new();
        for (id, tx) in &self.listeners {
            if tx.send(event.clone()).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            debug!(target: LOG_TARGET, "{} has gone away and was removed", id);
            self.listeners.remove(&id);
        }
    }

    fn stored_connection_mut(&mut self, id: &str) -> Result<&mut StoredConnection, ModelError> {
        self.client_connections
            .get_mut(id)
            .ok_or_else(|| ModelError::UnknownConnection(id.to_string()))
    }

    fn transition(
        &mut self,
        id: &str,
        expected: Option<ClientConnectionState>,
        to: ClientConnectionState,
    ) -> Result<ClientConnectionEditor, ModelError>
    {
        let stored = self.stored_connection_mut(id)?;
        let from = stored.connection.state;
        let expected_matches = expected.map(|e| e == from).unwrap_or(true);
        if !expected_matches || !from.can_transition_to(to) {
            return Err(ModelError::NotAllowedTransition {
                id: id.to_string(),
                from,
                to,
            });
        }

        let old = stored.connection.clone();
        stored.connection.state = to;
        stored.version += 1;
        let editor = ClientConnectionEditor::new(stored.connection.clone(), stored.version);
        let new = stored.connection.clone();
        debug!(target: LOG_TARGET, "Client connection '{}' changed state {} -> {}", id, from, to);
        self.notify(ModelEvent::ClientConnectionUpdated { old, new });
        Ok(editor)
    }
}

/// Cheaply cloneable handle to the shared model.
#[derive(Debug, Clone, Default)]
pub struct Model {
    state: Arc<RwLock<ModelState>>,
}

impl Model {
    pub fn new(nsm: NetworkServiceManager) -> Self {
        Self {
            state: Arc::new(RwLock::new(ModelState {
                nsm,
                ..Default::default()
            })),
        }
    }

    /// The manager this model belongs to.
    pub fn nsm(&self) -> NetworkServiceManager {
        acquire_read_lock!(self.state).nsm.clone()
    }

    pub fn set_nsm(&self, nsm: NetworkServiceManager) {
        acquire_write_lock!(self.state).nsm = nsm;
    }

    pub fn nsm_name(&self) -> String {
        acquire_read_lock!(self.state).nsm.name.clone()
    }

    //---------------------------------- Listeners --------------------------------------------//

    pub fn add_listener(&self) -> (ListenerId, ModelEventRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = acquire_write_lock!(self.state);
        state.next_listener_id += 1;
        let id = ListenerId(state.next_listener_id);
        state.listeners.insert(id, tx);
        debug!(target: LOG_TARGET, "{} added", id);
        (id, rx)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        acquire_write_lock!(self.state).listeners.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        acquire_read_lock!(self.state).listeners.len()
    }

    //---------------------------------- Endpoints --------------------------------------------//

    /// Add an endpoint, replacing (and publishing an update for) an existing endpoint of the same name.
    pub fn add_endpoint(&self, endpoint: Endpoint) {
        let mut state = acquire_write_lock!(self.state);
        let name = endpoint.name().to_string();
        let event = match state.endpoints.insert(name, endpoint.clone()) {
            Some(_) => ModelEvent::EndpointUpdated(endpoint),
            None => ModelEvent::EndpointAdded(endpoint),
        };
        state.notify(event);
    }

    pub fn update_endpoint(&self, endpoint: Endpoint) -> bool {
        let mut state = acquire_write_lock!(self.state);
        match state.endpoints.get_mut(endpoint.name()) {
            Some(existing) => {
                *existing = endpoint.clone();
                state.notify(ModelEvent::EndpointUpdated(endpoint));
                true
            },
            None => false,
        }
    }

    pub fn delete_endpoint(&self, name: &str) -> Option<Endpoint> {
        let mut state = acquire_write_lock!(self.state);
        let removed = state.endpoints.remove(name)?;
        state.notify(ModelEvent::EndpointDeleted(removed.clone()));
        Some(removed)
    }

    pub fn get_endpoint(&self, name: &str) -> Option<Endpoint> {
        acquire_read_lock!(self.state).endpoints.get(name).cloned()
    }

    pub fn get_endpoints(&self) -> Vec<Endpoint> {
        acquire_read_lock!(self.state).endpoints.values().cloned().collect()
    }

    pub fn get_endpoints_by_network_service(&self, network_service: &str) -> Vec<Endpoint> {
        acquire_read_lock!(self.state)
            .endpoints
            .values()
            .filter(|ep| ep.network_service() == network_service)
            .cloned()
            .collect()
    }

    //---------------------------------- Forwarders -------------------------------------------//

    pub fn add_forwarder(&self, forwarder: Forwarder) {
        let mut state = acquire_write_lock!(self.state);
        let name = forwarder.registered_name.clone();
        let event = match state.forwarders.insert(name, forwarder.clone()) {
            Some(_) => ModelEvent::ForwarderUpdated(forwarder),
            None => ModelEvent::ForwarderAdded(forwarder),
        };
        state.notify(event);
    }

    pub fn update_forwarder(&self, forwarder: Forwarder) -> bool {
        let mut state = acquire_write_lock!(self.state);
        match state.forwarders.get_mut(&forwarder.registered_name) {
            Some(existing) => {
                *existing = forwarder.clone();
                state.notify(ModelEvent::ForwarderUpdated(forwarder));
                true
            },
            None => false,
        }
    }

    pub fn delete_forwarder(&self, name: &str) -> Option<Forwarder> {
        let mut state = acquire_write_lock!(self.state);
        let removed = state.forwarders.remove(name)?;
        state.notify(ModelEvent::ForwarderDeleted(removed.clone()));
        Some(removed)
    }

    pub fn get_forwarder(&self, name: &str) -> Option<Forwarder> {
        acquire_read_lock!(self.state).forwarders.get(name).cloned()
    }

    pub fn get_forwarders(&self) -> Vec<Forwarder> {
        acquire_read_lock!(self.state).forwarders.values().cloned().collect()
    }

    /// Select the first forwarder (by registered name) that has configured mechanisms and satisfies `predicate`.
    pub fn select_forwarder<P>(&self, predicate: P) -> Result<Forwarder, ModelError>
    where P: Fn(&Forwarder) -> bool {
        acquire_read_lock!(self.state)
            .forwarders
            .values()
            .filter(|fwd| fwd.mechanisms_configured)
            .find(|fwd| predicate(fwd))
            .cloned()
            .ok_or(ModelError::NoForwarderAvailable)
    }

    pub fn has_ready_forwarder(&self) -> bool {
        acquire_read_lock!(self.state)
            .forwarders
            .values()
            .any(|fwd| fwd.mechanisms_configured)
    }

    /// Poll until a forwarder with configured mechanisms exists or `timeout` elapses.
    pub async fn wait_for_forwarder(&self, timeout: Duration, poll_interval: Duration) -> Result<(), ModelError> {
        let deadline = time::Instant::now() + timeout;
        loop {
            if self.has_ready_forwarder() {
                return Ok(());
            }
            if time::Instant::now() >= deadline {
                warn!(
                    target: LOG_TARGET,
                    "No forwarder with configured mechanisms became available within {:.2?}", timeout
                );
                return Err(ModelError::NoForwarderAvailable);
            }
            time::sleep(poll_interval).await;
        }
    }

    //---------------------------------- Client connections -----------------------------------//

    /// Generate a new connection id. Ids are lowercase hex and strictly increasing.
    pub fn connection_id(&self) -> String {
        let mut state = acquire_write_lock!(self.state);
        state.last_connection_id += 1;
        format!("{:x}", state.last_connection_id)
    }

    /// Advance the id generator past an id observed elsewhere (e.g. restored from a forwarder). Never moves backwards.
    /// Ids that are not hex numbers are ignored.
    pub fn correct_id_generator(&self, seen: &str) {
        match u64::from_str_radix(seen, 16) {
            Ok(value) => {
                let mut state = acquire_write_lock!(self.state);
                if value > state.last_connection_id {
                    debug!(target: LOG_TARGET, "Correcting connection id generator to {:x}", value);
                    state.last_connection_id = value;
                }
            },
            Err(_) => {
                trace!(target: LOG_TARGET, "Ignoring non-numeric connection id '{}'", seen);
            },
        }
    }

    /// Add a new client connection in the given state, returning an editor for it.
    pub fn add_client_connection(
        &self,
        mut connection: ClientConnection,
        state: ClientConnectionState,
    ) -> Result<ClientConnectionEditor, ModelError>
    {
        let mut model = acquire_write_lock!(self.state);
        if model.client_connections.contains_key(&connection.id) {
            return Err(ModelError::DuplicateConnection(connection.id));
        }
        connection.state = state;
        let editor = ClientConnectionEditor::new(connection.clone(), 0);
        debug!(target: LOG_TARGET, "Client connection '{}' added in state {}", connection.id, state);
        model.client_connections.insert(connection.id.clone(), StoredConnection {
            connection: connection.clone(),
            version: 0,
        });
        model.notify(ModelEvent::ClientConnectionAdded(connection));
        Ok(editor)
    }

    pub fn get_client_connection(&self, id: &str) -> Option<ClientConnection> {
        acquire_read_lock!(self.state)
            .client_connections
            .get(id)
            .map(|s| s.connection.clone())
    }

    pub fn get_all_client_connections(&self) -> Vec<ClientConnection> {
        acquire_read_lock!(self.state)
            .client_connections
            .values()
            .map(|s| s.connection.clone())
            .collect()
    }

    /// Replace the stored connection's data. The stored id and state are kept.
    pub fn update_client_connection(&self, connection: &ClientConnection) -> Result<(), ModelError> {
        self.apply_client_connection_changes(&connection.id, |cc| {
            let id = cc.id.clone();
            let state = cc.state;
            *cc = connection.clone();
            cc.id = id;
            cc.state = state;
        })
        .map(|_| ())
        .ok_or_else(|| ModelError::UnknownConnection(connection.id.clone()))
    }

    /// Atomically apply `f` to the stored connection and return a copy of the result. Returns `None`, without
    /// publishing anything, if the connection does not exist.
    pub fn apply_client_connection_changes<F>(&self, id: &str, f: F) -> Option<ClientConnection>
    where F: FnOnce(&mut ClientConnection) {
        let mut state = acquire_write_lock!(self.state);
        let stored = state.client_connections.get_mut(id)?;
        let old = stored.connection.clone();
        let mut new = stored.connection.clone();
        f(&mut new);
        // Identity and state belong to the model
        new.id = old.id.clone();
        new.state = old.state;
        stored.connection = new.clone();
        state.notify(ModelEvent::ClientConnectionUpdated { old, new: new.clone() });
        Some(new)
    }

    pub fn delete_client_connection(&self, id: &str) -> Option<ClientConnection> {
        let mut state = acquire_write_lock!(self.state);
        let removed = state.client_connections.remove(id)?;
        debug!(target: LOG_TARGET, "Client connection '{}' deleted", id);
        state.notify(ModelEvent::ClientConnectionDeleted(removed.connection.clone()));
        Some(removed.connection)
    }

    /// Move the connection to `to` from whatever state it is in, if the transition is allowed.
    pub fn change_client_connection_state(
        &self,
        id: &str,
        to: ClientConnectionState,
    ) -> Result<ClientConnectionEditor, ModelError>
    {
        acquire_write_lock!(self.state).transition(id, None, to)
    }

    /// Move the connection from `from` to `to`. Fails if the connection is not currently in `from`.
    pub fn compare_and_change_state(
        &self,
        id: &str,
        from: ClientConnectionState,
        to: ClientConnectionState,
    ) -> Result<ClientConnectionEditor, ModelError>
    {
        acquire_write_lock!(self.state).transition(id, Some(from), to)
    }

    /// Store the editor's working copy. Only an editor issued for the latest state change, in a Requesting or Healing
    /// state, can be committed.
    pub fn commit_client_connection_changes(&self, editor: &ClientConnectionEditor) -> Result<(), ModelError> {
        let mut state = acquire_write_lock!(self.state);
        let stored = state.stored_connection_mut(&editor.id)?;
        if stored.version != editor.version || stored.connection.state != editor.state {
            return Err(ModelError::EditorCompleted(editor.id.clone()));
        }
        if !editor.is_committable() {
            return Err(ModelError::NotCommittable {
                id: editor.id.clone(),
                state: editor.state,
            });
        }
        let old = stored.connection.clone();
        let mut new = editor.connection.clone();
        new.id = editor.id.clone();
        new.state = editor.state;
        stored.connection = new.clone();
        state.notify(ModelEvent::ClientConnectionUpdated { old, new });
        Ok(())
    }

    /// Discard the editor's working copy and reload it from the stored connection.
    pub fn reset_client_connection_changes(&self, editor: &mut ClientConnectionEditor) -> Result<(), ModelError> {
        let state = acquire_read_lock!(self.state);
        let stored = state
            .client_connections
            .get(&editor.id)
            .ok_or_else(|| ModelError::UnknownConnection(editor.id.clone()))?;
        editor.connection = stored.connection.clone();
        editor.connection.state = editor.state;
        Ok(())
    }
}
