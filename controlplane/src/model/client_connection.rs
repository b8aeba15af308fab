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

use std::fmt;

use crate::{
    connection::{Connection, CrossConnect, NetworkServiceRequest},
    registry::{NetworkServiceManager, NseRegistration},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientConnectionState {
    Ready,
    Requesting,
    Broken,
    Healing,
    Closing,
}

impl ClientConnectionState {
    is_fn!(is_ready, ClientConnectionState::Ready);

    is_fn!(is_requesting, ClientConnectionState::Requesting);

    is_fn!(is_broken, ClientConnectionState::Broken);

    is_fn!(is_healing, ClientConnectionState::Healing);

    is_fn!(is_closing, ClientConnectionState::Closing);

    /// Returns true if the transition `self -> to` is permitted.
    pub fn can_transition_to(self, to: ClientConnectionState) -> bool {
        use ClientConnectionState::*;
        matches!(
            (self, to),
            (Ready, Requesting) |
                (Ready, Healing) |
                (Ready, Closing) |
                (Requesting, Ready) |
                (Requesting, Broken) |
                (Requesting, Closing) |
                (Broken, Healing) |
                (Broken, Closing) |
                (Healing, Requesting) |
                (Healing, Closing)
        )
    }

    /// A request or heal is in flight for the connection.
    pub fn is_pending(self) -> bool {
        matches!(self, ClientConnectionState::Requesting | ClientConnectionState::Healing)
    }

    pub fn all() -> [ClientConnectionState; 5] {
        use ClientConnectionState::*;
        [Ready, Requesting, Broken, Healing, Closing]
    }
}

impl fmt::Display for ClientConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    None,
    Ready,
}

impl ForwarderState {
    is_fn!(is_ready, ForwarderState::Ready);
}

/// One established or in-flight connection.
///
/// The id and state are owned by the [Model](super::Model): they are set when the connection is added and the state
/// only changes through the model's compare-and-swap operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    pub(super) id: String,
    pub(super) state: ClientConnectionState,
    /// The request that established the connection, replayed when healing
    pub request: Option<NetworkServiceRequest>,
    pub xcon: Option<CrossConnect>,
    /// Set when the destination endpoint is owned by another manager
    pub remote_nsm: Option<NetworkServiceManager>,
    pub endpoint: Option<NseRegistration>,
    pub forwarder_registered_name: String,
    pub forwarder_state: ForwarderState,
}

impl ClientConnection {
    pub fn new<I: Into<String>>(id: I) -> Self {
        Self {
            id: id.into(),
            state: ClientConnectionState::Requesting,
            request: None,
            xcon: None,
            remote_nsm: None,
            endpoint: None,
            forwarder_registered_name: String::new(),
            forwarder_state: ForwarderState::None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ClientConnectionState {
        self.state
    }

    /// The network service this connection is for, taken from the resolved endpoint or else the request.
    pub fn network_service(&self) -> &str {
        match (&self.endpoint, &self.request) {
            (Some(endpoint), _) => &endpoint.network_service.name,
            (None, Some(request)) => &request.connection.network_service,
            (None, None) => "",
        }
    }

    pub fn source(&self) -> Option<&Connection> {
        self.xcon.as_ref().map(|xcon| &xcon.source)
    }

    pub fn destination(&self) -> Option<&Connection> {
        self.xcon.as_ref().and_then(|xcon| xcon.destination.as_ref())
    }

    /// True if the caller-facing leg came from another manager.
    pub fn has_remote_source(&self) -> bool {
        self.source().map(|c| c.is_remote()).unwrap_or(false)
    }

    pub fn has_remote_destination(&self) -> bool {
        self.destination().map(|c| c.is_remote()).unwrap_or(false)
    }

    pub fn endpoint_name(&self) -> Option<&str> {
        self.endpoint.as_ref().map(|e| e.endpoint_name())
    }
}

impl fmt::Display for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClientConnection(id={}, state={}, ns={}, endpoint={}, forwarder={})",
            self.id,
            self.state,
            self.network_service(),
            self.endpoint_name().unwrap_or("<none>"),
            if self.forwarder_registered_name.is_empty() {
                "<none>"
            } else {
                &self.forwarder_registered_name
            }
        )
    }
}
