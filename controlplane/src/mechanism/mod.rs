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

//! Selection of the mechanism used on the caller-facing leg of a connection, and allocation of VXLAN identifiers for
//! remote legs.

mod error;
mod vni;

use std::sync::Arc;

use log::*;

pub use self::{
    error::MechanismError,
    vni::{SequentialVniAllocator, VniAllocator},
};
use crate::{
    connection::{params, Mechanism, MechanismType, NetworkServiceRequest},
    model::Forwarder,
};

const LOG_TARGET: &str = "nsm::mechanism";

#[derive(Clone)]
pub struct MechanismSelector {
    vni_allocator: Arc<dyn VniAllocator>,
}

impl MechanismSelector {
    pub fn new(vni_allocator: Arc<dyn VniAllocator>) -> Self {
        Self { vni_allocator }
    }

    pub fn vni_allocator(&self) -> &Arc<dyn VniAllocator> {
        &self.vni_allocator
    }

    /// Find a mechanism of the given type advertised by the forwarder. Remote requests look at the remote mechanisms.
    pub fn find<'a>(forwarder: &'a Forwarder, mechanism_type: MechanismType, remote: bool) -> Option<&'a Mechanism> {
        if remote {
            forwarder.find_remote_mechanism(mechanism_type)
        } else {
            forwarder.find_local_mechanism(mechanism_type)
        }
    }

    /// Pick the first of the request's mechanism preferences that the forwarder supports.
    ///
    /// For a remote VXLAN request the forwarder's source IP becomes the tunnel destination and a fresh VNI is
    /// allocated for the (local, remote) address pair.
    pub fn select(&self, request: &NetworkServiceRequest, forwarder: &Forwarder) -> Result<Mechanism, MechanismError> {
        let remote = request.is_remote();
        for preference in &request.mechanism_preferences {
            let forwarder_mechanism = match Self::find(forwarder, preference.mechanism_type, remote) {
                Some(m) => m,
                None => continue,
            };
            let mut selected = preference.clone();
            if remote && selected.mechanism_type.is_vxlan() {
                self.fill_vxlan_parameters(&mut selected, forwarder_mechanism, forwarder)?;
            }
            debug!(
                target: LOG_TARGET,
                "{} mechanism selected on forwarder '{}': {}",
                if remote { "Remote" } else { "Local" },
                forwarder.registered_name,
                selected.mechanism_type
            );
            return Ok(selected);
        }

        let preferences = request
            .mechanism_preferences
            .iter()
            .map(|m| m.mechanism_type.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(MechanismError::NoMatchedMechanism(preferences))
    }

    fn fill_vxlan_parameters(
        &self,
        mechanism: &mut Mechanism,
        forwarder_mechanism: &Mechanism,
        forwarder: &Forwarder,
    ) -> Result<(), MechanismError>
    {
        let forwarder_src = forwarder_mechanism
            .parameter(params::SRC_IP)
            .ok_or_else(|| MechanismError::MissingForwarderSourceIp {
                forwarder: forwarder.registered_name.clone(),
                mechanism: forwarder_mechanism.mechanism_type.to_string(),
            })?
            .to_string();
        let remote_src = mechanism.parameter(params::SRC_IP).unwrap_or_default().to_string();

        // Behind NAT the tunnel endpoints seen by the peers differ from the addresses the forwarders bind to
        let src = mechanism
            .parameter(params::SRC_ORIGINAL_IP)
            .map(ToString::to_string)
            .unwrap_or_else(|| remote_src.clone());
        let ext_dst = mechanism
            .parameter(params::DST_EXTERNAL_IP)
            .map(ToString::to_string)
            .unwrap_or_else(|| forwarder_src.clone());

        let vni = if ext_dst != remote_src {
            self.vni_allocator.vni(&ext_dst, &remote_src)?
        } else {
            self.vni_allocator.vni(&forwarder_src, &src)?
        };

        mechanism.parameters.insert(params::DST_IP.to_string(), forwarder_src);
        mechanism.parameters.insert(params::VNI.to_string(), vni.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::Connection;

    fn forwarder() -> Forwarder {
        Forwarder::new("fwd-1", "/var/lib/nsm/fwd-1.sock").with_mechanisms(
            vec![
                Mechanism::new(MechanismType::MemInterface),
                Mechanism::new(MechanismType::KernelInterface),
            ],
            vec![Mechanism::new(MechanismType::Vxlan).with_parameter(params::SRC_IP, "10.0.0.1")],
        )
    }

    fn selector() -> MechanismSelector {
        MechanismSelector::new(Arc::new(SequentialVniAllocator::new()))
    }

    fn local_request(preferences: Vec<MechanismType>) -> NetworkServiceRequest {
        NetworkServiceRequest::new(
            Connection::local("-", "icmp"),
            preferences.into_iter().map(Mechanism::new).collect(),
        )
    }

    fn remote_request() -> NetworkServiceRequest {
        NetworkServiceRequest::new(Connection::remote("-", "icmp", "nsm-2", "nsm-1"), vec![
            Mechanism::new(MechanismType::Vxlan).with_parameter(params::SRC_IP, "10.0.0.2"),
        ])
    }

    #[test]
    fn local_selects_first_supported_preference() {
        let request = local_request(vec![
            MechanismType::SriovInterface,
            MechanismType::KernelInterface,
            MechanismType::MemInterface,
        ]);
        let selected = selector().select(&request, &forwarder()).unwrap();
        assert_eq!(selected.mechanism_type, MechanismType::KernelInterface);
    }

    #[test]
    fn no_matching_mechanism() {
        let request = local_request(vec![MechanismType::SriovInterface]);
        let err = selector().select(&request, &forwarder()).unwrap_err();
        assert!(matches!(err, MechanismError::NoMatchedMechanism(_)));
        assert!(err.to_string().contains("no matched mechanisms"));
    }

    #[test]
    fn remote_vxlan_parameters() {
        let selector = selector();
        let first = selector.select(&remote_request(), &forwarder()).unwrap();
        assert_eq!(first.parameter(params::DST_IP), Some("10.0.0.1"));
        assert_eq!(first.parameter(params::SRC_IP), Some("10.0.0.2"));

        let second = selector.select(&remote_request(), &forwarder()).unwrap();
        assert_eq!(second.parameter(params::DST_IP), first.parameter(params::DST_IP));
        assert_ne!(second.parameter(params::VNI), first.parameter(params::VNI));
        assert!(first.validate().is_ok());
    }

    #[test]
    fn remote_requires_forwarder_source_ip() {
        let forwarder = Forwarder::new("fwd-1", "sock").with_mechanisms(vec![], vec![Mechanism::new(
            MechanismType::Vxlan,
        )]);
        let err = selector().select(&remote_request(), &forwarder).unwrap_err();
        assert!(matches!(err, MechanismError::MissingForwarderSourceIp { .. }));
    }

    #[test]
    fn find_distinguishes_local_and_remote() {
        let fwd = forwarder();
        assert!(MechanismSelector::find(&fwd, MechanismType::Vxlan, true).is_some());
        assert!(MechanismSelector::find(&fwd, MechanismType::Vxlan, false).is_none());
        assert!(MechanismSelector::find(&fwd, MechanismType::MemInterface, false).is_some());
    }
}
