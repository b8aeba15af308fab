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

use std::net::IpAddr;

use super::ValidationError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpContext {
    pub src_ip_addr: String,
    pub dst_ip_addr: String,
    pub src_ip_required: bool,
    pub dst_ip_required: bool,
    pub excluded_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionContext {
    pub ip_context: IpContext,
    pub labels: Vec<(String, String)>,
}

impl ConnectionContext {
    /// Addresses that are present must parse. Required addresses may still be missing, the endpoint assigns them.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let ip = &self.ip_context;
        if !ip.src_ip_addr.is_empty() {
            parse_address("srcIP", &ip.src_ip_addr)?;
        }
        if !ip.dst_ip_addr.is_empty() {
            parse_address("dstIP", &ip.dst_ip_addr)?;
        }
        Ok(())
    }

    /// Like `validate`, but every address flagged as required must also be present.
    pub fn validate_complete(&self) -> Result<(), ValidationError> {
        self.meets_requirements(self)
    }

    /// Check that this (endpoint provided) context satisfies the requirements stated in `original`.
    pub fn meets_requirements(&self, original: &ConnectionContext) -> Result<(), ValidationError> {
        let ip = &self.ip_context;
        if original.ip_context.src_ip_required && ip.src_ip_addr.is_empty() {
            return Err(ValidationError::RequiredIpMissing("srcIP"));
        }
        if original.ip_context.dst_ip_required && ip.dst_ip_addr.is_empty() {
            return Err(ValidationError::RequiredIpMissing("dstIP"));
        }
        self.validate()
    }
}

/// Parse an address in either `a.b.c.d` or `a.b.c.d/len` form, returning the host address.
pub fn parse_address(field: &'static str, value: &str) -> Result<IpAddr, ValidationError> {
    let invalid = || ValidationError::InvalidIpAddress {
        field,
        value: value.to_string(),
    };
    let mut parts = value.splitn(2, '/');
    let addr = parts
        .next()
        .and_then(|a| a.trim().parse::<IpAddr>().ok())
        .ok_or_else(invalid)?;
    if let Some(prefix) = parts.next() {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        match prefix.trim().parse::<u8>() {
            Ok(len) if len <= max => {},
            _ => return Err(invalid()),
        }
    }
    Ok(addr)
}
