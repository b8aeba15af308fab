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

use std::{fmt, sync::Arc};

use tokio::sync::mpsc;

use super::{ClientConnection, Endpoint, Forwarder};

pub type ModelEventRx = mpsc::UnboundedReceiver<Arc<ModelEvent>>;
pub(super) type ModelEventTx = mpsc::UnboundedSender<Arc<ModelEvent>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(super) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener#{}", self.0)
    }
}

/// Change notification published by the [Model](super::Model). Every event carries its own copy of the entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    EndpointAdded(Endpoint),
    EndpointUpdated(Endpoint),
    EndpointDeleted(Endpoint),
    ForwarderAdded(Forwarder),
    ForwarderUpdated(Forwarder),
    ForwarderDeleted(Forwarder),
    ClientConnectionAdded(ClientConnection),
    ClientConnectionUpdated {
        old: ClientConnection,
        new: ClientConnection,
    },
    ClientConnectionDeleted(ClientConnection),
}

impl ModelEvent {
    /// The client connection this event concerns, if any. For updates this is the new value.
    pub fn client_connection(&self) -> Option<&ClientConnection> {
        use ModelEvent::*;
        match self {
            ClientConnectionAdded(cc) | ClientConnectionDeleted(cc) => Some(cc),
            ClientConnectionUpdated { new, .. } => Some(new),
            _ => None,
        }
    }
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ModelEvent::*;
        match self {
            EndpointAdded(ep) => write!(f, "EndpointAdded({})", ep.name()),
            EndpointUpdated(ep) => write!(f, "EndpointUpdated({})", ep.name()),
            EndpointDeleted(ep) => write!(f, "EndpointDeleted({})", ep.name()),
            ForwarderAdded(fwd) => write!(f, "ForwarderAdded({})", fwd.registered_name),
            ForwarderUpdated(fwd) => write!(f, "ForwarderUpdated({})", fwd.registered_name),
            ForwarderDeleted(fwd) => write!(f, "ForwarderDeleted({})", fwd.registered_name),
            ClientConnectionAdded(cc) => write!(f, "ClientConnectionAdded({}, {})", cc.id(), cc.state()),
            ClientConnectionUpdated { old, new } => write!(
                f,
                "ClientConnectionUpdated({}, {} -> {})",
                new.id(),
                old.state(),
                new.state()
            ),
            ClientConnectionDeleted(cc) => write!(f, "ClientConnectionDeleted({})", cc.id()),
        }
    }
}
