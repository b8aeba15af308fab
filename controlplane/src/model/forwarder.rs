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

use crate::connection::{Mechanism, MechanismType};

/// A local forwarding-plane agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forwarder {
    pub registered_name: String,
    pub socket_location: String,
    pub local_mechanisms: Vec<Mechanism>,
    pub remote_mechanisms: Vec<Mechanism>,
    /// Not selectable until the forwarder has reported its mechanisms
    pub mechanisms_configured: bool,
}

impl Forwarder {
    pub fn new<N: Into<String>, S: Into<String>>(registered_name: N, socket_location: S) -> Self {
        Self {
            registered_name: registered_name.into(),
            socket_location: socket_location.into(),
            local_mechanisms: Vec::new(),
            remote_mechanisms: Vec::new(),
            mechanisms_configured: false,
        }
    }

    pub fn with_mechanisms(mut self, local: Vec<Mechanism>, remote: Vec<Mechanism>) -> Self {
        self.local_mechanisms = local;
        self.remote_mechanisms = remote;
        self.mechanisms_configured = true;
        self
    }

    pub fn find_local_mechanism(&self, mechanism_type: MechanismType) -> Option<&Mechanism> {
        self.local_mechanisms.iter().find(|m| m.mechanism_type == mechanism_type)
    }

    pub fn find_remote_mechanism(&self, mechanism_type: MechanismType) -> Option<&Mechanism> {
        self.remote_mechanisms.iter().find(|m| m.mechanism_type == mechanism_type)
    }
}

impl fmt::Display for Forwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Forwarder({}, local={}, remote={}, configured={})",
            self.registered_name,
            self.local_mechanisms.len(),
            self.remote_mechanisms.len(),
            self.mechanisms_configured
        )
    }
}
