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

use std::{collections::HashMap, fmt};

use crate::connection::{Connection, CrossConnect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Full snapshot, always the first event a new subscriber receives
    InitialStateTransfer,
    Update,
    Delete,
}

impl EventType {
    is_fn!(is_initial_state_transfer, EventType::InitialStateTransfer);

    is_fn!(is_update, EventType::Update);

    is_fn!(is_delete, EventType::Delete);
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::InitialStateTransfer => write!(f, "INITIAL_STATE_TRANSFER"),
            EventType::Update => write!(f, "UPDATE"),
            EventType::Delete => write!(f, "DELETE"),
        }
    }
}

/// An entity that can be monitored, keyed by its id.
pub trait MonitorEntity: Clone + Send + Sync + 'static {
    fn entity_id(&self) -> &str;

    /// True if the entity should be delivered to a subscriber that asked for `scope`. An empty scope matches
    /// everything.
    fn matches_scope(&self, scope: &str) -> bool;
}

impl MonitorEntity for CrossConnect {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn matches_scope(&self, scope: &str) -> bool {
        scope.is_empty() ||
            self.source.references_manager(scope) ||
            self.destination
                .as_ref()
                .map(|d| d.references_manager(scope))
                .unwrap_or(false)
    }
}

impl MonitorEntity for Connection {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn matches_scope(&self, scope: &str) -> bool {
        scope.is_empty() || self.references_manager(scope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEvent<T> {
    pub event_type: EventType,
    pub entities: HashMap<String, T>,
}

impl<T: MonitorEntity> MonitorEvent<T> {
    pub fn new<I: IntoIterator<Item = T>>(event_type: EventType, entities: I) -> Self {
        Self {
            event_type,
            entities: entities
                .into_iter()
                .map(|e| (e.entity_id().to_string(), e))
                .collect(),
        }
    }

    /// Copy of this event restricted to the entities within `scope`. Returns `None` if nothing is left, except for
    /// an initial state transfer which is always delivered.
    pub fn filter_scope(&self, scope: &str) -> Option<Self> {
        let entities = self
            .entities
            .iter()
            .filter(|(_, e)| e.matches_scope(scope))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect::<HashMap<_, _>>();
        if entities.is_empty() && !self.event_type.is_initial_state_transfer() {
            return None;
        }
        Some(Self {
            event_type: self.event_type,
            entities,
        })
    }
}

impl<T> fmt::Display for MonitorEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids = self.entities.keys().collect::<Vec<_>>();
        ids.sort();
        write!(f, "MonitorEvent({}, {:?})", self.event_type, ids)
    }
}

pub type CrossConnectEvent = MonitorEvent<CrossConnect>;
pub type ConnectionEvent = MonitorEvent<Connection>;
