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

use super::{Connection, ValidationError};

/// The forwarder-facing pairing of the caller-facing (source) connection and the endpoint-facing (destination)
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossConnect {
    pub id: String,
    pub payload: String,
    pub source: Connection,
    pub destination: Option<Connection>,
}

impl CrossConnect {
    pub fn new<I: Into<String>, P: Into<String>>(id: I, payload: P, source: Connection) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            source,
            destination: None,
        }
    }

    pub fn with_destination(mut self, destination: Connection) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn local_source(&self) -> Option<&Connection> {
        Some(&self.source).filter(|c| !c.is_remote())
    }

    pub fn remote_source(&self) -> Option<&Connection> {
        Some(&self.source).filter(|c| c.is_remote())
    }

    pub fn local_destination(&self) -> Option<&Connection> {
        self.destination.as_ref().filter(|c| !c.is_remote())
    }

    pub fn remote_destination(&self) -> Option<&Connection> {
        self.destination.as_ref().filter(|c| c.is_remote())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyCrossConnectId);
        }
        self.source.validate()?;
        if let Some(dst) = &self.destination {
            dst.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for CrossConnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CrossConnect(id={}, src={}", self.id, self.source)?;
        match &self.destination {
            Some(dst) => write!(f, ", dst={})", dst),
            None => write!(f, ", dst=none)"),
        }
    }
}
