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

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::{future, lock::Mutex};

use crate::{
    clients::{ClientError, DiscoveryClient},
    registry::{FindNetworkServiceResponse, NetworkService, NseRegistration},
};

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    registrations: Vec<NseRegistration>,
    unavailable: bool,
    stalled: bool,
}

/// In-memory discovery service. Registrations are returned in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryMock {
    inner: Arc<Mutex<State>>,
}

impl DiscoveryMock {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn add_registration(&self, registration: NseRegistration) {
        self.with_state(|state| state.registrations.push(registration)).await
    }

    pub async fn remove_endpoint(&self, endpoint_name: &str) {
        self.with_state(|state| state.registrations.retain(|r| r.endpoint_name() != endpoint_name))
            .await
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.with_state(|state| state.unavailable = unavailable).await
    }

    /// Lookups never complete while stalled.
    pub async fn set_stalled(&self, stalled: bool) {
        self.with_state(|state| state.stalled = stalled).await
    }

    pub async fn registrations(&self) -> Vec<NseRegistration> {
        self.with_state(|state| state.registrations.clone()).await
    }

    pub async fn take_calls(&self) -> Vec<String> {
        self.with_state(|state| state.calls.drain(..).collect()).await
    }

    pub async fn count_calls_containing(&self, pat: &str) -> usize {
        self.with_state(|state| state.calls.iter().filter(|s| s.contains(pat)).count())
            .await
    }

    async fn with_state<F, R>(&self, f: F) -> R
    where F: FnOnce(&mut State) -> R {
        let mut lock = self.inner.lock().await;
        (f)(&mut *lock)
    }
}

#[async_trait]
impl DiscoveryClient for DiscoveryMock {
    async fn find_network_service(&self, network_service: &str) -> Result<FindNetworkServiceResponse, ClientError> {
        let stalled = self
            .with_state(|state| {
                state.calls.push(format!("find:{}", network_service));
                state.stalled
            })
            .await;
        if stalled {
            future::pending::<()>().await;
        }
        self.with_state(|state| {
            if state.unavailable {
                return Err(ClientError::Transport("discovery unavailable".to_string()));
            }
            let matching = state
                .registrations
                .iter()
                .filter(|r| r.network_service.name == network_service)
                .collect::<Vec<_>>();
            let network_service = matching
                .first()
                .map(|r| r.network_service.clone())
                .unwrap_or_else(|| NetworkService {
                    name: network_service.to_string(),
                    ..Default::default()
                });
            let network_service_managers = matching
                .iter()
                .map(|r| (r.manager_name().to_string(), r.network_service_manager.clone()))
                .collect::<HashMap<_, _>>();
            Ok(FindNetworkServiceResponse {
                payload: network_service.payload.clone(),
                network_service,
                network_service_managers,
                network_service_endpoints: matching.iter().map(|r| r.network_service_endpoint.clone()).collect(),
            })
        })
        .await
    }

    async fn register_nse(&self, registration: NseRegistration) -> Result<NseRegistration, ClientError> {
        self.with_state(|state| {
            state.calls.push(format!("register:{}", registration.endpoint_name()));
            if state.unavailable {
                return Err(ClientError::Transport("discovery unavailable".to_string()));
            }
            state
                .registrations
                .retain(|r| r.endpoint_name() != registration.endpoint_name());
            state.registrations.push(registration.clone());
            Ok(registration)
        })
        .await
    }

    async fn remove_nse(&self, endpoint_name: &str) -> Result<(), ClientError> {
        self.with_state(|state| {
            state.calls.push(format!("remove:{}", endpoint_name));
            state.registrations.retain(|r| r.endpoint_name() != endpoint_name);
            Ok(())
        })
        .await
    }
}
