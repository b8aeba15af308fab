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
    sync::Arc,
    time::{Duration, Instant},
};

use log::*;
use tokio::time;

use super::{HealOutcome, HealTrigger};
use crate::{
    config::NsmConfig,
    connection::{ConnectionState, NetworkServiceRequest, NEW_CONNECTION_ID},
    model::{ClientConnection, ClientConnectionState, ForwarderState, Model},
    nse_manager::NseManager,
    pipeline::RequestPipeline,
    registry::NseRegistration,
};

const LOG_TARGET: &str = "nsm::heal::state_machine";

/// Recovery algorithms for each [HealTrigger].
///
/// The connection handed to [heal](HealStateMachine::heal) must already be in the Healing state. When `heal`
/// returns, the connection is either Ready again or has been closed and removed from the model.
#[derive(Clone)]
pub struct HealStateMachine {
    config: Arc<NsmConfig>,
    model: Model,
    pipeline: RequestPipeline,
    nse_manager: NseManager,
}

impl HealStateMachine {
    pub fn new(config: Arc<NsmConfig>, model: Model, pipeline: RequestPipeline, nse_manager: NseManager) -> Self {
        Self {
            config,
            model,
            pipeline,
            nse_manager,
        }
    }

    pub async fn heal(&self, connection: ClientConnection, trigger: HealTrigger) -> HealOutcome {
        let id = connection.id().to_string();
        info!(target: LOG_TARGET, "Healing connection '{}' after {}", id, trigger);
        let healed = match trigger {
            HealTrigger::DstDown => self.heal_dst_down(connection).await,
            HealTrigger::ForwarderDown => self.heal_forwarder_down(connection).await,
            HealTrigger::DstUpdate => self.heal_dst_update(connection).await,
            HealTrigger::DstNmgrDown => self.heal_dst_nmgr_down(connection).await,
        };

        if healed {
            info!(target: LOG_TARGET, "Connection '{}' healed", id);
            return HealOutcome::Healed;
        }
        warn!(target: LOG_TARGET, "Connection '{}' could not be healed, closing it", id);
        if let Err(err) = self.pipeline.close(&id).await {
            error!(target: LOG_TARGET, "Error closing unhealed connection '{}': {}", id, err);
        }
        HealOutcome::Closed
    }

    async fn heal_dst_down(&self, mut connection: ClientConnection) -> bool {
        if let Some(endpoint) = connection.endpoint.clone() {
            if !self.nse_manager.is_local_endpoint(&endpoint) && !self.nse_manager.check_update_nse(&endpoint).await {
                debug!(
                    target: LOG_TARGET,
                    "Manager '{}' of endpoint '{}' is unreachable, healing as {}",
                    endpoint.manager_name(),
                    endpoint.endpoint_name(),
                    HealTrigger::DstNmgrDown
                );
                return self.heal_dst_nmgr_down(connection).await;
            }
        }

        if connection.has_remote_source() {
            debug!(
                target: LOG_TARGET,
                "Connection '{}' has a remote source, healing is done on the source side",
                connection.id()
            );
            return false;
        }

        let ignored = connection.endpoint_name().unwrap_or_default().to_string();
        match self.wait_nse(&ignored, connection.network_service()).await {
            Some(endpoint) => self.set_endpoint(&mut connection, Some(endpoint)),
            None => self.set_endpoint(&mut connection, None),
        }
        self.request(connection, true).await
    }

    async fn heal_forwarder_down(&self, connection: ClientConnection) -> bool {
        if let Err(err) = self
            .model
            .wait_for_forwarder(self.config.heal_forwarder_timeout, self.config.forwarder_poll_interval)
            .await
        {
            warn!(
                target: LOG_TARGET,
                "No forwarder became available within {:.2?}: {}", self.config.heal_forwarder_timeout, err
            );
            return false;
        }

        let connection = match self.model.apply_client_connection_changes(connection.id(), |cc| {
            cc.forwarder_state = ForwarderState::None;
            if let Some(xcon) = cc.xcon.as_mut() {
                xcon.source.state = ConnectionState::Down;
            }
        }) {
            Some(cc) => cc,
            None => {
                debug!(target: LOG_TARGET, "Connection '{}' was removed while healing", connection.id());
                return false;
            },
        };

        if connection.has_remote_source() {
            debug!(
                target: LOG_TARGET,
                "Connection '{}' has a remote source, healing continues on the source side",
                connection.id()
            );
            return self.restore_ready(connection.id());
        }

        self.request_from_source(connection).await
    }

    async fn heal_dst_update(&self, connection: ClientConnection) -> bool {
        self.request_from_source(connection).await
    }

    async fn heal_dst_nmgr_down(&self, mut connection: ClientConnection) -> bool {
        let initial_endpoint = connection.endpoint.clone();
        let network_service = connection.network_service().to_string();

        if let Some(endpoint) = &initial_endpoint {
            if !self.wait_specific_nse(endpoint).await {
                self.set_endpoint(&mut connection, None);
            }
        }
        let id = connection.id().to_string();
        if self.request(connection.clone(), true).await {
            return true;
        }

        let initial_endpoint = match initial_endpoint {
            Some(endpoint) => endpoint,
            None => return false,
        };
        debug!(
            target: LOG_TARGET,
            "Connection '{}' failed to heal with the same endpoint, waiting for another one", id
        );
        let endpoint = match self.wait_nse(initial_endpoint.endpoint_name(), &network_service).await {
            Some(endpoint) => endpoint,
            None => return false,
        };
        if let Err(err) =
            self.model
                .compare_and_change_state(&id, ClientConnectionState::Broken, ClientConnectionState::Healing)
        {
            debug!(target: LOG_TARGET, "Connection '{}' cannot be retried: {}", id, err);
            return false;
        }
        self.set_endpoint(&mut connection, Some(endpoint));
        self.request(connection, true).await
    }

    /// Point the connection at a new endpoint (or none, to let the pipeline resolve one). The destination has to be
    /// requested anew.
    fn set_endpoint(&self, connection: &mut ClientConnection, endpoint: Option<NseRegistration>) {
        let changed = match (&connection.endpoint, &endpoint) {
            (Some(old), Some(new)) => old.endpoint_key() != new.endpoint_key(),
            _ => true,
        };
        if changed {
            if let Some(dst) = connection.xcon.as_mut().and_then(|x| x.destination.as_mut()) {
                dst.id = NEW_CONNECTION_ID.to_string();
            }
        }
        connection.endpoint = endpoint;
    }

    /// Re-request the connection from its current source leg, up to `heal_retry_count` times.
    async fn request_from_source(&self, mut connection: ClientConnection) -> bool {
        let request = match (&connection.request, connection.source()) {
            (Some(request), Some(source)) => NetworkServiceRequest::new(source.clone(), request.mechanism_preferences.clone()),
            _ => {
                debug!(target: LOG_TARGET, "Connection '{}' has no request to replay", connection.id());
                return false;
            },
        };
        let id = connection.id().to_string();
        let attempts = self.config.heal_retry_count.max(1);
        for attempt in 1..=attempts {
            // A failed attempt closes the endpoint leg, so later attempts request it again
            if self.run_pipeline(request.clone(), connection, attempt > 1).await {
                return true;
            }
            if attempt == attempts {
                break;
            }
            connection = match self
                .model
                .compare_and_change_state(&id, ClientConnectionState::Broken, ClientConnectionState::Healing)
            {
                Ok(editor) => editor.connection,
                Err(err) => {
                    debug!(target: LOG_TARGET, "Connection '{}' cannot be retried: {}", id, err);
                    return false;
                },
            };
            debug!(
                target: LOG_TARGET,
                "Retrying heal of '{}' in {:.2?} (attempt {}/{})",
                id,
                self.config.heal_retry_delay,
                attempt + 1,
                attempts
            );
            time::sleep(self.config.heal_retry_delay).await;
        }
        false
    }

    /// Replay the stored request.
    async fn request(&self, connection: ClientConnection, nse_request_required: bool) -> bool {
        let request = match &connection.request {
            Some(request) => request.clone(),
            None => {
                debug!(target: LOG_TARGET, "Connection '{}' has no request to replay", connection.id());
                return false;
            },
        };
        self.run_pipeline(request, connection, nse_request_required).await
    }

    async fn run_pipeline(
        &self,
        mut request: NetworkServiceRequest,
        connection: ClientConnection,
        nse_request_required: bool,
    ) -> bool
    {
        let id = connection.id().to_string();
        request.connection.id = id.clone();
        match self
            .pipeline
            .request_existing(request, connection, nse_request_required)
            .await
        {
            Ok(conn) => {
                debug!(target: LOG_TARGET, "Heal request for '{}' succeeded: {}", id, conn);
                true
            },
            Err(err) => {
                warn!(target: LOG_TARGET, "Heal request for '{}' failed: {}", id, err);
                false
            },
        }
    }

    /// Move a connection that needed no re-request back to Ready.
    fn restore_ready(&self, id: &str) -> bool {
        let result = self
            .model
            .compare_and_change_state(id, ClientConnectionState::Healing, ClientConnectionState::Requesting)
            .and_then(|_| {
                self.model
                    .compare_and_change_state(id, ClientConnectionState::Requesting, ClientConnectionState::Ready)
            });
        match result {
            Ok(_) => true,
            Err(err) => {
                debug!(target: LOG_TARGET, "Connection '{}' could not be returned to Ready: {}", id, err);
                false
            },
        }
    }

    /// Bound a single discovery lookup by what is left of the destination wait.
    fn discovery_timeout(&self, started: Instant) -> Duration {
        self.config
            .heal_dst_wait_timeout
            .checked_sub(started.elapsed())
            .unwrap_or_default()
            .min(self.config.request_timeout)
            .max(self.config.heal_dst_wait_tick)
    }

    /// Wait for an endpoint of the network service other than `ignored`. A local endpoint qualifies straight away, a
    /// remote one only if its manager can be reached.
    async fn wait_nse(&self, ignored: &str, network_service: &str) -> Option<NseRegistration> {
        let started = Instant::now();
        let nsm_name = self.model.nsm_name();
        loop {
            match self
                .nse_manager
                .find_network_service(network_service, self.discovery_timeout(started))
                .await
            {
                Ok(response) => {
                    for ep in &response.network_service_endpoints {
                        if !ignored.is_empty() && ep.name == ignored {
                            continue;
                        }
                        let registration = NseManager::registration_from(&response, ep);
                        if ep.network_service_manager_name == nsm_name ||
                            self.nse_manager.check_update_nse(&registration).await
                        {
                            debug!(
                                target: LOG_TARGET,
                                "Endpoint '{}' is available after {:.2?}",
                                ep.name,
                                started.elapsed()
                            );
                            return Some(registration);
                        }
                    }
                },
                Err(err) => {
                    debug!(target: LOG_TARGET, "Discovery failed while waiting for an endpoint: {}", err);
                },
            }
            if started.elapsed() > self.config.heal_dst_wait_timeout {
                warn!(
                    target: LOG_TARGET,
                    "Timeout waiting for an endpoint of network service '{}'", network_service
                );
                return None;
            }
            time::sleep(self.config.heal_dst_wait_tick).await;
        }
    }

    /// Wait for exactly this endpoint to be registered again with its manager reachable.
    async fn wait_specific_nse(&self, endpoint: &NseRegistration) -> bool {
        let started = Instant::now();
        loop {
            if let Ok(response) = self
                .nse_manager
                .find_network_service(&endpoint.network_service.name, self.discovery_timeout(started))
                .await
            {
                for ep in &response.network_service_endpoints {
                    if ep.name != endpoint.endpoint_name() {
                        continue;
                    }
                    if self
                        .nse_manager
                        .check_update_nse(&NseManager::registration_from(&response, ep))
                        .await
                    {
                        debug!(
                            target: LOG_TARGET,
                            "Endpoint '{}' is back after {:.2?}",
                            ep.name,
                            started.elapsed()
                        );
                        return true;
                    }
                }
            }
            if started.elapsed() > self.config.heal_dst_wait_timeout {
                warn!(
                    target: LOG_TARGET,
                    "Timeout waiting for endpoint '{}'",
                    endpoint.endpoint_name()
                );
                return false;
            }
            time::sleep(self.config.heal_dst_wait_tick).await;
        }
    }
}
