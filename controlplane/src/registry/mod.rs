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

//! Registration records exchanged with the discovery service, and the on-disk registry of granted client and
//! endpoint registrations.

mod file;

use std::{collections::HashMap, fmt};

use serde_derive::{Deserialize, Serialize};

pub use file::{NseRegistryFile, RegistryFileError, RegistryRecords};

pub type Labels = HashMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub destination_selector: Labels,
    pub weight: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub source_selector: Labels,
    pub routes: Vec<Destination>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkService {
    pub name: String,
    pub payload: String,
    pub matches: Vec<Match>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceEndpoint {
    pub name: String,
    pub network_service_name: String,
    pub payload: String,
    pub network_service_manager_name: String,
    pub labels: Labels,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceManager {
    pub name: String,
    pub url: String,
    pub state: String,
}

/// A network service endpoint together with the service it provides and the manager that owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NseRegistration {
    pub network_service: NetworkService,
    pub network_service_manager: NetworkServiceManager,
    pub network_service_endpoint: NetworkServiceEndpoint,
}

impl NseRegistration {
    pub fn endpoint_name(&self) -> &str {
        &self.network_service_endpoint.name
    }

    pub fn manager_name(&self) -> &str {
        &self.network_service_manager.name
    }

    /// Key that identifies an endpoint across managers.
    pub fn endpoint_key(&self) -> String {
        format!("{}:{}", self.endpoint_name(), self.manager_name())
    }
}

impl fmt::Display for NseRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NSE '{}' ({}) on '{}'",
            self.endpoint_name(),
            self.network_service.name,
            self.manager_name()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindNetworkServiceResponse {
    pub payload: String,
    pub network_service: NetworkService,
    pub network_service_managers: HashMap<String, NetworkServiceManager>,
    pub network_service_endpoints: Vec<NetworkServiceEndpoint>,
}
