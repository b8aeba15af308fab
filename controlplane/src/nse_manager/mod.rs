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

//! Endpoint resolution: finds a network service endpoint for a request and creates clients to talk to it.

mod error;
mod selector;

use std::{collections::HashSet, sync::Arc, time::Duration};

use log::*;
use tokio::time;

pub use self::{
    error::NseManagerError,
    selector::{EndpointSelector, MatchSelector, RoundRobinSelector},
};
use crate::{
    clients::{ClientError, DiscoveryClient, NseClient, NseConnector},
    config::NsmConfig,
    connection::Connection,
    model::Model,
    registry::{FindNetworkServiceResponse, NetworkServiceEndpoint, NseRegistration},
};

const LOG_TARGET: &str = "nsm::nse_manager";

#[derive(Clone)]
pub struct NseManager {
    model: Model,
    discovery: Arc<dyn DiscoveryClient>,
    connector: Arc<dyn NseConnector>,
    selector: Arc<dyn EndpointSelector>,
    config: Arc<NsmConfig>,
}

impl NseManager {
    pub fn new(
        model: Model,
        discovery: Arc<dyn DiscoveryClient>,
        connector: Arc<dyn NseConnector>,
        selector: Arc<dyn EndpointSelector>,
        config: Arc<NsmConfig>,
    ) -> Self
    {
        Self {
            model,
            discovery,
            connector,
            selector,
            config,
        }
    }

    /// Find an endpoint for the request connection that is not in `ignored` (a set of
    /// [endpoint keys](NseRegistration::endpoint_key)).
    ///
    /// A connection pinned to an endpoint name is resolved against the endpoints registered with this manager only.
    pub async fn get_endpoint(
        &self,
        connection: &Connection,
        ignored: &HashSet<String>,
    ) -> Result<NseRegistration, NseManagerError>
    {
        let target = &connection.network_service_endpoint_name;
        if !target.is_empty() {
            return match self.model.get_endpoint(target) {
                Some(endpoint) if !ignored.contains(&endpoint.registration.endpoint_key()) => Ok(endpoint.registration),
                _ => Err(NseManagerError::EndpointNotFoundLocally(target.clone())),
            };
        }

        let response = self
            .find_network_service(&connection.network_service, self.config.request_timeout)
            .await?;
        let total = response.network_service_endpoints.len();
        let candidates = response
            .network_service_endpoints
            .iter()
            .filter(|ep| !ignored.contains(&Self::registration_from(&response, ep).endpoint_key()))
            .cloned()
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return Err(NseManagerError::NoCandidates {
                network_service: connection.network_service.clone(),
                checked: ignored.len(),
                total,
            });
        }

        let selected = self
            .selector
            .select_endpoint(connection, &response.network_service, &candidates)
            .ok_or_else(|| NseManagerError::NoEndpointSelected(connection.network_service.clone()))?;
        debug!(
            target: LOG_TARGET,
            "Selected endpoint '{}' of {} candidate(s) for '{}'",
            selected.name,
            candidates.len(),
            connection.network_service
        );
        Ok(Self::registration_from(&response, &selected))
    }

    /// Ask discovery for the endpoints of a network service, giving up after `timeout`.
    pub async fn find_network_service(
        &self,
        network_service: &str,
        timeout: Duration,
    ) -> Result<FindNetworkServiceResponse, NseManagerError>
    {
        time::timeout(timeout, self.discovery.find_network_service(network_service))
            .await
            .unwrap_or(Err(ClientError::Timeout(timeout)))
            .map_err(NseManagerError::Discovery)
    }

    /// Create a client for the endpoint, bounded by `timeout`. A local endpoint that cannot be reached is evicted from
    /// the model.
    pub async fn create_nse_client(
        &self,
        endpoint: &NseRegistration,
        timeout: Duration,
    ) -> Result<Box<dyn NseClient>, NseManagerError>
    {
        if self.is_local_endpoint(endpoint) {
            let model_endpoint = self
                .model
                .get_endpoint(endpoint.endpoint_name())
                .ok_or_else(|| NseManagerError::EndpointNotInModel(endpoint.endpoint_name().to_string()))?;
            debug!(target: LOG_TARGET, "Create local NSE connection to endpoint: {}", model_endpoint);
            let result = time::timeout(timeout, self.connector.connect_local(&model_endpoint))
                .await
                .unwrap_or(Err(ClientError::Timeout(timeout)));
            match result {
                Ok(client) => Ok(client),
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        "Failed to connect to local endpoint '{}' ({}). Removing it from the model",
                        model_endpoint.name(),
                        err
                    );
                    let _ = self.model.delete_endpoint(model_endpoint.name());
                    Err(NseManagerError::ClientCreation {
                        endpoint: endpoint.endpoint_name().to_string(),
                        source: err,
                    })
                },
            }
        } else {
            debug!(target: LOG_TARGET, "Create remote NSE connection to endpoint: {}", endpoint);
            time::timeout(timeout, self.connector.connect_remote(&endpoint.network_service_manager))
                .await
                .unwrap_or(Err(ClientError::Timeout(timeout)))
                .map_err(|err| NseManagerError::ClientCreation {
                    endpoint: endpoint.endpoint_name().to_string(),
                    source: err,
                })
        }
    }

    pub fn is_local_endpoint(&self, endpoint: &NseRegistration) -> bool {
        self.model.nsm_name() == endpoint.network_service_endpoint.network_service_manager_name
    }

    /// Check that the endpoint can be reached, cleaning up the client straight away.
    pub async fn check_update_nse(&self, endpoint: &NseRegistration) -> bool {
        match self
            .create_nse_client(endpoint, self.config.heal_request_connect_check_timeout)
            .await
        {
            Ok(client) => {
                if let Err(err) = client.cleanup().await {
                    debug!(target: LOG_TARGET, "Reachability check client cleanup failed: {}", err);
                }
                true
            },
            Err(err) => {
                debug!(target: LOG_TARGET, "Endpoint '{}' is not reachable: {}", endpoint.endpoint_name(), err);
                false
            },
        }
    }

    /// Build a registration for one endpoint of a discovery response.
    pub fn registration_from(response: &FindNetworkServiceResponse, endpoint: &NetworkServiceEndpoint) -> NseRegistration {
        NseRegistration {
            network_service: response.network_service.clone(),
            network_service_manager: response
                .network_service_managers
                .get(&endpoint.network_service_manager_name)
                .cloned()
                .unwrap_or_default(),
            network_service_endpoint: endpoint.clone(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &NsmConfig {
        &self.config
    }
}
