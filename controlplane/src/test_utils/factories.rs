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

use std::time::Duration;

use crate::{
    config::NsmConfig,
    connection::{params, Connection, ConnectionContext, Mechanism, MechanismType, NetworkServiceRequest},
    model::{Endpoint, Forwarder, Model},
    registry::{NetworkService, NetworkServiceEndpoint, NetworkServiceManager, NseRegistration},
};

pub const FORWARDER_SRC_IP: &str = "10.0.0.1";

pub fn nsm(name: &str) -> NetworkServiceManager {
    NetworkServiceManager {
        name: name.to_string(),
        url: format!("{}:5001", name),
        state: "RUNNING".to_string(),
    }
}

/// Configuration with every wait shortened so tests finish quickly.
pub fn test_config() -> NsmConfig {
    NsmConfig {
        heal_enabled: true,
        heal_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_secs(1),
        heal_request_timeout: Duration::from_secs(1),
        heal_request_connect_timeout: Duration::from_millis(500),
        heal_request_connect_check_timeout: Duration::from_millis(200),
        heal_forwarder_timeout: Duration::from_millis(500),
        heal_retry_count: 2,
        heal_retry_delay: Duration::from_millis(10),
        heal_dst_wait_timeout: Duration::from_millis(300),
        heal_dst_wait_tick: Duration::from_millis(20),
        forwarder_wait_timeout: Duration::from_millis(200),
        forwarder_poll_interval: Duration::from_millis(10),
        forwarder_retry_count: 3,
        forwarder_retry_delay: Duration::from_millis(10),
        forwarder_request_timeout: Duration::from_millis(500),
        pending_connections_timeout: Duration::from_millis(300),
        deleted_connection_lifetime: Duration::from_secs(1),
    }
}

pub fn registration(endpoint: &str, network_service: &str, manager: &str) -> NseRegistration {
    NseRegistration {
        network_service: NetworkService {
            name: network_service.to_string(),
            payload: "IP".to_string(),
            matches: Vec::new(),
        },
        network_service_manager: nsm(manager),
        network_service_endpoint: NetworkServiceEndpoint {
            name: endpoint.to_string(),
            network_service_name: network_service.to_string(),
            network_service_manager_name: manager.to_string(),
            payload: "IP".to_string(),
            ..Default::default()
        },
    }
}

/// Register an endpoint with the model as if it was registered through this manager.
pub fn add_local_endpoint(model: &Model, name: &str, network_service: &str) -> Endpoint {
    let endpoint = Endpoint::new(
        registration(name, network_service, &model.nsm_name()),
        format!("/var/lib/networkservicemesh/{}.sock", name),
        format!("ws-{}", name),
    );
    model.add_endpoint(endpoint.clone());
    endpoint
}

/// A forwarder offering kernel and memif locally and VXLAN remotely.
pub fn forwarder(name: &str) -> Forwarder {
    Forwarder::new(name, format!("/var/lib/networkservicemesh/{}.sock", name)).with_mechanisms(
        vec![
            Mechanism::new(MechanismType::KernelInterface),
            Mechanism::new(MechanismType::MemInterface),
        ],
        vec![Mechanism::new(MechanismType::Vxlan).with_parameter(params::SRC_IP, FORWARDER_SRC_IP)],
    )
}

pub fn add_forwarder(model: &Model, name: &str) -> Forwarder {
    let forwarder = forwarder(name);
    model.add_forwarder(forwarder.clone());
    forwarder
}

/// A new request from a local workload for a kernel interface.
pub fn local_request(network_service: &str) -> NetworkServiceRequest {
    let mut connection = Connection::local("", network_service);
    connection.context = Some(ConnectionContext::default());
    NetworkServiceRequest::new(connection, vec![kernel_mechanism()])
}

/// A new request arriving from the manager `source_manager` for a VXLAN tunnel.
pub fn remote_request(network_service: &str, source_manager: &str, destination_manager: &str) -> NetworkServiceRequest {
    let mut connection = Connection::remote(
        crate::connection::NEW_CONNECTION_ID,
        network_service,
        source_manager,
        destination_manager,
    );
    connection.context = Some(ConnectionContext::default());
    NetworkServiceRequest::new(connection, vec![
        Mechanism::new(MechanismType::Vxlan).with_parameter(params::SRC_IP, "10.0.0.2")
    ])
}

pub fn kernel_mechanism() -> Mechanism {
    Mechanism::new(MechanismType::KernelInterface)
        .with_parameter(params::NETNS_INODE, "12345")
        .with_parameter(params::INTERFACE_NAME, "nsm0")
}
