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

//! Connection, request and cross-connect records.
//!
//! Local and remote connections share one concrete [Connection] type. Which side of a manager boundary a
//! connection lives on is carried by its [ConnectionKind], chosen once where the connection enters the engine.

mod context;
mod cross_connect;
mod error;
mod mechanism;

use std::{collections::HashMap, fmt};

pub use context::{parse_address, ConnectionContext, IpContext};
pub use cross_connect::CrossConnect;
pub use error::ValidationError;
pub use mechanism::{params, Mechanism, MechanismType, LINUX_IFNAME_MAX_LEN, VNI_MAX};

/// Destination id placeholder meaning "a new destination connection is required".
pub const NEW_CONNECTION_ID: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Up,
    Down,
}

impl ConnectionState {
    is_fn!(is_up, ConnectionState::Up);

    is_fn!(is_down, ConnectionState::Down);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Between this manager and a workload or endpoint on the same host
    Local,
    /// Between this manager and a manager on another host
    Remote {
        source_manager: String,
        destination_manager: String,
    },
}

impl ConnectionKind {
    is_fn!(is_local, ConnectionKind::Local);

    is_fn!(is_remote, ConnectionKind::Remote { .. });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: String,
    pub network_service: String,
    pub mechanism: Option<Mechanism>,
    pub context: Option<ConnectionContext>,
    pub labels: HashMap<String, String>,
    pub state: ConnectionState,
    /// Pins the request to a named endpoint when non-empty
    pub network_service_endpoint_name: String,
    pub kind: ConnectionKind,
}

impl Connection {
    pub fn local<I: Into<String>, N: Into<String>>(id: I, network_service: N) -> Self {
        Self {
            id: id.into(),
            network_service: network_service.into(),
            mechanism: None,
            context: None,
            labels: HashMap::new(),
            state: ConnectionState::Up,
            network_service_endpoint_name: String::new(),
            kind: ConnectionKind::Local,
        }
    }

    pub fn remote<I, N, S, D>(id: I, network_service: N, source_manager: S, destination_manager: D) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        S: Into<String>,
        D: Into<String>,
    {
        Self {
            kind: ConnectionKind::Remote {
                source_manager: source_manager.into(),
                destination_manager: destination_manager.into(),
            },
            ..Self::local(id, network_service)
        }
    }

    pub fn is_remote(&self) -> bool {
        self.kind.is_remote()
    }

    pub fn source_manager(&self) -> Option<&str> {
        match &self.kind {
            ConnectionKind::Remote { source_manager, .. } => Some(source_manager),
            ConnectionKind::Local => None,
        }
    }

    pub fn destination_manager(&self) -> Option<&str> {
        match &self.kind {
            ConnectionKind::Remote {
                destination_manager, ..
            } => Some(destination_manager),
            ConnectionKind::Local => None,
        }
    }

    /// True if this connection references the given manager on either end.
    pub fn references_manager(&self, manager: &str) -> bool {
        self.source_manager() == Some(manager) || self.destination_manager() == Some(manager)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.network_service.is_empty() {
            return Err(ValidationError::EmptyNetworkService);
        }
        if let Some(mechanism) = &self.mechanism {
            mechanism.validate()?;
        }
        if let Some(context) = &self.context {
            context.validate()?;
        }
        Ok(())
    }

    /// A connection returned by an endpoint must be complete before it is cross-connected.
    pub fn validate_complete(&self) -> Result<(), ValidationError> {
        self.validate()?;
        if self.id.is_empty() {
            return Err(ValidationError::EmptyConnectionId);
        }
        if self.mechanism.is_none() {
            return Err(ValidationError::MissingMechanism);
        }
        match &self.context {
            Some(context) => context.validate_complete(),
            None => Err(ValidationError::MissingContext),
        }
    }

    /// Adopt the context offered by the other side, provided it satisfies this connection's requirements.
    pub fn update_context(&mut self, offered: &ConnectionContext) -> Result<(), ValidationError> {
        let current = self.context.clone().unwrap_or_default();
        offered.meets_requirements(&current)?;
        self.context = Some(offered.clone());
        Ok(())
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Connection(id={}, ns={}, kind={}, state={:?})",
            self.id,
            self.network_service,
            if self.is_remote() { "remote" } else { "local" },
            self.state
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkServiceRequest {
    pub connection: Connection,
    pub mechanism_preferences: Vec<Mechanism>,
}

impl NetworkServiceRequest {
    pub fn new(connection: Connection, mechanism_preferences: Vec<Mechanism>) -> Self {
        Self {
            connection,
            mechanism_preferences,
        }
    }

    /// A request is remote when it arrives from another manager.
    pub fn is_remote(&self) -> bool {
        self.connection.is_remote()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.connection.network_service.is_empty() {
            return Err(ValidationError::EmptyNetworkService);
        }
        if self.mechanism_preferences.is_empty() {
            return Err(ValidationError::NoMechanismPreferences);
        }
        self.connection.validate()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kernel() -> Mechanism {
        Mechanism::new(MechanismType::KernelInterface).with_parameter(params::NETNS_INODE, "12")
    }

    #[test]
    fn request_validation() {
        let request = NetworkServiceRequest::new(Connection::local("", ""), vec![kernel()]);
        assert_eq!(request.validate(), Err(ValidationError::EmptyNetworkService));

        let request = NetworkServiceRequest::new(Connection::local("", "secure-intranet"), vec![]);
        assert_eq!(request.validate(), Err(ValidationError::NoMechanismPreferences));

        let request = NetworkServiceRequest::new(Connection::local("", "secure-intranet"), vec![kernel()]);
        assert!(request.validate().is_ok());

        let mut conn = Connection::local("", "secure-intranet");
        let mut context = ConnectionContext::default();
        context.ip_context.src_ip_required = true;
        context.ip_context.dst_ip_required = true;
        conn.context = Some(context);
        assert!(NetworkServiceRequest::new(conn, vec![kernel()]).validate().is_ok());
    }

    #[test]
    fn complete_connection_requires_id_and_context() {
        let mut conn = Connection::local("", "secure-intranet");
        conn.mechanism = Some(kernel());
        assert_eq!(conn.validate_complete(), Err(ValidationError::EmptyConnectionId));

        conn.id = "1".to_string();
        assert_eq!(conn.validate_complete(), Err(ValidationError::MissingContext));

        conn.context = Some(ConnectionContext::default());
        assert!(conn.validate_complete().is_ok());

        let mut context = ConnectionContext::default();
        context.ip_context.dst_ip_required = true;
        conn.context = Some(context);
        assert_eq!(conn.validate_complete(), Err(ValidationError::RequiredIpMissing("dstIP")));
    }

    #[test]
    fn remote_references_manager() {
        let conn = Connection::remote("1", "icmp", "nsm-a", "nsm-b");
        assert!(conn.references_manager("nsm-a"));
        assert!(conn.references_manager("nsm-b"));
        assert!(!conn.references_manager("nsm-c"));
        assert!(!Connection::local("1", "icmp").references_manager("nsm-a"));
    }
}
