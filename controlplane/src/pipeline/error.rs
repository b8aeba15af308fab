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

use crate::{
    clients::ClientError,
    connection::ValidationError,
    mechanism::MechanismError,
    model::{ClientConnectionState, ModelError},
    nse_manager::NseManagerError,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Mechanism selection failed: {0}")]
    Mechanism(#[from] MechanismError),
    #[error("Endpoint resolution failed: {0}")]
    NseManager(#[from] NseManagerError),
    #[error("Trying to request not existing connection '{0}'")]
    UnknownConnection(String),
    #[error("Trying to request connection '{id}' in bad state {state}")]
    ConnectionInProgress { id: String, state: ClientConnectionState },
    #[error("Connection '{0}' could not be closed, it is already closing")]
    AlreadyClosing(String),
    #[error("Request context does not carry the {0}")]
    MissingContext(&'static str),
    #[error("{error}. Last NSE Error: {last_nse_error}")]
    EndpointExhausted {
        error: NseManagerError,
        last_nse_error: String,
    },
    #[error("Failed to create NSE Client. {0}")]
    NseClient(NseManagerError),
    #[error("Error requesting network service from '{endpoint}': {error}")]
    NseRequest { endpoint: String, error: ClientError },
    #[error("Failure validating NSE connection: {0}")]
    InvalidNseConnection(ValidationError),
    #[error("Failed to update source connection context: {0}")]
    ContextUpdate(ValidationError),
    #[error("Forwarder '{forwarder}' request failed after {attempts} attempt(s): {error}")]
    ForwarderRequest {
        forwarder: String,
        attempts: usize,
        error: ClientError,
    },
    #[error("Forwarder '{forwarder}' close failed: {error}")]
    ForwarderClose { forwarder: String, error: ClientError },
    #[error("NSE close failed: {0}")]
    NseClose(ClientError),
    #[error("{field} '{value}' intersects excluded prefixes list")]
    ExcludedPrefix { field: &'static str, value: String },
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Close error: [{}]", .0.join("; "))]
    Close(Vec<String>),
}

impl RequestError {
    /// Fold close results of several legs into one result, keeping every leg error.
    pub fn combine_close_results<I>(results: I) -> Result<(), RequestError>
    where I: IntoIterator<Item = Result<(), RequestError>> {
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(_) => {},
                Err(RequestError::Close(nested)) => errors.extend(nested),
                Err(err) => errors.push(err.to_string()),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RequestError::Close(errors))
        }
    }
}
