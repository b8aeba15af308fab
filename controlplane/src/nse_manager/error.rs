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

use thiserror::Error;

use crate::clients::ClientError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NseManagerError {
    #[error("Could not find endpoint with name: {0} at local registry")]
    EndpointNotFoundLocally(String),
    #[error("Failed to find NSE for NetworkService {network_service}. Checked: {checked} of total NSEs: {total}")]
    NoCandidates {
        network_service: String,
        checked: usize,
        total: usize,
    },
    #[error("Endpoint selector returned no endpoint for NetworkService {0}")]
    NoEndpointSelected(String),
    #[error("Discovery failed: {0}")]
    Discovery(ClientError),
    #[error("Endpoint '{0}' is not registered with this manager")]
    EndpointNotInModel(String),
    #[error("Failed to create NSE Client for '{endpoint}': {source}")]
    ClientCreation { endpoint: String, source: ClientError },
    #[error("Timed out after {0:?} connecting to endpoint")]
    ConnectTimeout(Duration),
}
