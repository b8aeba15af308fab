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

use std::{collections::HashMap, fmt, net::IpAddr};

use super::ValidationError;

pub mod params {
    pub const NETNS_INODE: &str = "netnsInode";
    pub const INTERFACE_NAME: &str = "name";
    pub const WORKSPACE: &str = "workspace";
    pub const WORKSPACE_NSE_NAME: &str = "workspaceNseName";
    pub const SRC_IP: &str = "src_ip";
    pub const DST_IP: &str = "dst_ip";
    pub const VNI: &str = "vni";
    pub const SRC_ORIGINAL_IP: &str = "src_original_ip";
    pub const DST_EXTERNAL_IP: &str = "dst_external_ip";
}

/// Maximum length of a Linux interface name.
pub const LINUX_IFNAME_MAX_LEN: usize = 15;
/// VXLAN network identifiers are 24 bits wide.
pub const VNI_MAX: u32 = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MechanismType {
    KernelInterface,
    MemInterface,
    VhostInterface,
    SriovInterface,
    Vxlan,
    Gre,
    Srv6,
}

impl MechanismType {
    is_fn!(is_vxlan, MechanismType::Vxlan);

    /// True for mechanisms that cross a host boundary.
    pub fn is_remote(&self) -> bool {
        matches!(self, MechanismType::Vxlan | MechanismType::Gre | MechanismType::Srv6)
    }
}

impl fmt::Display for MechanismType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MechanismType::*;
        match self {
            KernelInterface => write!(f, "KERNEL_INTERFACE"),
            MemInterface => write!(f, "MEM_INTERFACE"),
            VhostInterface => write!(f, "VHOST_INTERFACE"),
            SriovInterface => write!(f, "SRIOV_INTERFACE"),
            Vxlan => write!(f, "VXLAN"),
            Gre => write!(f, "GRE"),
            Srv6 => write!(f, "SRV6"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mechanism {
    pub mechanism_type: MechanismType,
    pub parameters: HashMap<String, String>,
}

impl Mechanism {
    pub fn new(mechanism_type: MechanismType) -> Self {
        Self {
            mechanism_type,
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn is_remote(&self) -> bool {
        self.mechanism_type.is_remote()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        use MechanismType::*;
        match self.mechanism_type {
            KernelInterface => {
                let inode = self.require(params::NETNS_INODE)?;
                inode.parse::<u64>().map_err(|err| self.invalid(params::NETNS_INODE, inode, err))?;
                if let Some(name) = self.parameter(params::INTERFACE_NAME) {
                    if name.len() > LINUX_IFNAME_MAX_LEN {
                        return Err(ValidationError::InterfaceNameTooLong {
                            name: name.to_string(),
                            max: LINUX_IFNAME_MAX_LEN,
                        });
                    }
                }
                Ok(())
            },
            MemInterface => self.require(params::WORKSPACE).map(|_| ()),
            Vxlan => {
                self.require_ip(params::SRC_IP)?;
                self.require_ip(params::DST_IP)?;
                let vni = self.require(params::VNI)?;
                match vni.parse::<u32>() {
                    Ok(v) if v <= VNI_MAX => Ok(()),
                    Ok(v) => Err(self.invalid(params::VNI, vni, format!("{} does not fit in 24 bits", v))),
                    Err(err) => Err(self.invalid(params::VNI, vni, err)),
                }
            },
            Gre => {
                self.require_ip(params::SRC_IP)?;
                self.require_ip(params::DST_IP).map(|_| ())
            },
            VhostInterface | SriovInterface | Srv6 => Ok(()),
        }
    }

    fn require(&self, parameter: &'static str) -> Result<&str, ValidationError> {
        self.parameter(parameter)
            .filter(|v| !v.is_empty())
            .ok_or(ValidationError::MissingParameter {
                mechanism: self.mechanism_type,
                parameter,
            })
    }

    fn require_ip(&self, parameter: &'static str) -> Result<IpAddr, ValidationError> {
        let value = self.require(parameter)?;
        value.parse::<IpAddr>().map_err(|err| self.invalid(parameter, value, err))
    }

    fn invalid<E: ToString>(&self, parameter: &'static str, value: &str, err: E) -> ValidationError {
        ValidationError::InvalidParameter {
            mechanism: self.mechanism_type,
            parameter,
            value: value.to_string(),
            details: err.to_string(),
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params = self.parameters.iter().collect::<Vec<_>>();
        params.sort();
        write!(f, "{}{:?}", self.mechanism_type, params)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vxlan(src: &str, dst: &str, vni: &str) -> Mechanism {
        Mechanism::new(MechanismType::Vxlan)
            .with_parameter(params::SRC_IP, src)
            .with_parameter(params::DST_IP, dst)
            .with_parameter(params::VNI, vni)
    }

    #[test]
    fn vxlan_validation() {
        assert!(vxlan("10.0.0.1", "10.0.0.2", "5").validate().is_ok());
        assert!(vxlan("10.0.0.1", "10.0.0.2", "16777215").validate().is_ok());

        let err = vxlan("10.0.0.1", "10.0.0.2", "16777216").validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter { parameter: params::VNI, .. }));

        let err = vxlan("not-an-ip", "10.0.0.2", "1").validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidParameter {
            parameter: params::SRC_IP,
            ..
        }));

        let err = Mechanism::new(MechanismType::Vxlan)
            .with_parameter(params::SRC_IP, "10.0.0.1")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingParameter {
            parameter: params::DST_IP,
            ..
        }));
    }

    #[test]
    fn kernel_interface_validation() {
        let ok = Mechanism::new(MechanismType::KernelInterface)
            .with_parameter(params::NETNS_INODE, "4026531993")
            .with_parameter(params::INTERFACE_NAME, "nsm0");
        assert!(ok.validate().is_ok());

        let bad_inode = Mechanism::new(MechanismType::KernelInterface).with_parameter(params::NETNS_INODE, "abc");
        assert!(bad_inode.validate().is_err());

        let long_name = Mechanism::new(MechanismType::KernelInterface)
            .with_parameter(params::NETNS_INODE, "1")
            .with_parameter(params::INTERFACE_NAME, "a-very-long-interface");
        assert!(matches!(
            long_name.validate().unwrap_err(),
            ValidationError::InterfaceNameTooLong { max: 15, .. }
        ));
    }

    #[test]
    fn mem_interface_requires_workspace() {
        assert!(Mechanism::new(MechanismType::MemInterface).validate().is_err());
        assert!(Mechanism::new(MechanismType::MemInterface)
            .with_parameter(params::WORKSPACE, "nsm-1")
            .validate()
            .is_ok());
    }
}
