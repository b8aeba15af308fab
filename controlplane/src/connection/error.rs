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

use thiserror::Error;

use super::MechanismType;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Network service must not be empty")]
    EmptyNetworkService,
    #[error("Request must carry at least one mechanism preference")]
    NoMechanismPreferences,
    #[error("Connection id must not be empty")]
    EmptyConnectionId,
    #[error("Connection context is required")]
    MissingContext,
    #[error("Connection mechanism is required")]
    MissingMechanism,
    #[error("{mechanism} mechanism requires parameter '{parameter}'")]
    MissingParameter {
        mechanism: MechanismType,
        parameter: &'static str,
    },
    #[error("{mechanism} mechanism parameter '{parameter}' has invalid value '{value}': {details}")]
    InvalidParameter {
        mechanism: MechanismType,
        parameter: &'static str,
        value: String,
        details: String,
    },
    #[error("Interface name '{name}' exceeds {max} characters")]
    InterfaceNameTooLong { name: String, max: usize },
    #[error("{0} is required but was not provided")]
    RequiredIpMissing(&'static str),
    #[error("{field} '{value}' is not a valid IP address")]
    InvalidIpAddress { field: &'static str, value: String },
    #[error("Cross-connect id must not be empty")]
    EmptyCrossConnectId,
    #[error("Connection rejected by plugin: {0}")]
    RejectedByPlugin(String),
}
