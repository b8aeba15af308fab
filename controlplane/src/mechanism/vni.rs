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

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    net::IpAddr,
    sync::Mutex,
};

use log::*;

use super::MechanismError;
use crate::connection::VNI_MAX;

const LOG_TARGET: &str = "nsm::mechanism::vni";

/// Allocates VXLAN network identifiers for a pair of tunnel endpoints.
pub trait VniAllocator: Send + Sync {
    fn vni(&self, local_ip: &str, remote_ip: &str) -> Result<u32, MechanismError>;

    /// Mark a VNI as in use, typically one observed on a cross-connect restored after a restart.
    fn restore(&self, local_ip: &str, remote_ip: &str, vni: u32);
}

/// Hands out VNIs from a per-pair sequence.
///
/// The two managers on either side of a tunnel allocate without talking to each other. The side with the
/// greater IP takes odd VNIs and the other side even ones, so the two sequences never overlap.
#[derive(Debug, Default)]
pub struct SequentialVniAllocator {
    pairs: Mutex<HashMap<(String, String), PairState>>,
}

#[derive(Debug, Default)]
struct PairState {
    last: u32,
    in_use: HashSet<u32>,
}

impl SequentialVniAllocator {
    pub fn new() -> Self {
        Default::default()
    }
}

impl VniAllocator for SequentialVniAllocator {
    fn vni(&self, local_ip: &str, remote_ip: &str) -> Result<u32, MechanismError> {
        let first = first_vni(local_ip, remote_ip);
        let mut pairs = acquire_lock!(self.pairs);
        let pair = pairs
            .entry((local_ip.to_string(), remote_ip.to_string()))
            .or_insert_with(Default::default);

        let mut candidate = if pair.last == 0 { first } else { pair.last + 2 };
        while pair.in_use.contains(&candidate) {
            candidate += 2;
        }
        if candidate > VNI_MAX {
            warn!(
                target: LOG_TARGET,
                "VNI space exhausted for {} <-> {}", local_ip, remote_ip
            );
            return Err(MechanismError::VniExhausted {
                local: local_ip.to_string(),
                remote: remote_ip.to_string(),
            });
        }
        pair.last = candidate;
        pair.in_use.insert(candidate);
        trace!(target: LOG_TARGET, "Allocated VNI {} for {} <-> {}", candidate, local_ip, remote_ip);
        Ok(candidate)
    }

    fn restore(&self, local_ip: &str, remote_ip: &str, vni: u32) {
        let mut pairs = acquire_lock!(self.pairs);
        let pair = pairs
            .entry((local_ip.to_string(), remote_ip.to_string()))
            .or_insert_with(Default::default);
        pair.in_use.insert(vni);
        if vni > pair.last && vni % 2 == first_vni(local_ip, remote_ip) % 2 {
            pair.last = vni;
        }
        debug!(target: LOG_TARGET, "Restored VNI {} for {} <-> {}", vni, local_ip, remote_ip);
    }
}

/// 1 (odd sequence) if `local` orders after `remote`, otherwise 2.
fn first_vni(local: &str, remote: &str) -> u32 {
    match compare_ips(local, remote) {
        Ordering::Greater => 1,
        _ => 2,
    }
}

/// Compare two addresses octet by octet. IPv4 orders before IPv6. Strings that are not IP addresses fall back to
/// string comparison.
fn compare_ips(a: &str, b: &str) -> Ordering {
    match (a.parse::<IpAddr>(), b.parse::<IpAddr>()) {
        (Ok(IpAddr::V4(a)), Ok(IpAddr::V4(b))) => a.octets().cmp(&b.octets()),
        (Ok(IpAddr::V6(a)), Ok(IpAddr::V6(b))) => a.octets().cmp(&b.octets()),
        (Ok(IpAddr::V4(_)), Ok(IpAddr::V6(_))) => Ordering::Less,
        (Ok(IpAddr::V6(_)), Ok(IpAddr::V4(_))) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parity_is_split_between_peers() {
        let a = SequentialVniAllocator::new();
        let b = SequentialVniAllocator::new();
        let from_a = (0..10)
            .map(|_| a.vni("10.0.0.2", "10.0.0.10").unwrap())
            .collect::<HashSet<_>>();
        let from_b = (0..10)
            .map(|_| b.vni("10.0.0.10", "10.0.0.2").unwrap())
            .collect::<HashSet<_>>();
        // 10.0.0.10 > 10.0.0.2 numerically even though it is smaller as a string
        assert!(from_b.iter().all(|v| v % 2 == 1));
        assert!(from_a.iter().all(|v| v % 2 == 0));
        assert!(from_a.is_disjoint(&from_b));
    }

    #[test]
    fn never_repeats_for_a_pair() {
        let alloc = SequentialVniAllocator::new();
        let vnis = (0..1000)
            .map(|_| alloc.vni("192.168.1.1", "192.168.1.2").unwrap())
            .collect::<Vec<_>>();
        let unique = vnis.iter().copied().collect::<HashSet<_>>();
        assert_eq!(unique.len(), vnis.len());
        assert!(vnis.iter().all(|v| *v > 0 && *v <= VNI_MAX));
    }

    #[test]
    fn restored_vnis_are_skipped() {
        let alloc = SequentialVniAllocator::new();
        alloc.restore("10.0.0.1", "10.0.0.2", 2);
        alloc.restore("10.0.0.1", "10.0.0.2", 6);
        assert_eq!(alloc.vni("10.0.0.1", "10.0.0.2").unwrap(), 8);

        let alloc = SequentialVniAllocator::new();
        // Restoring a VNI of the other parity does not move the sequence
        alloc.restore("10.0.0.1", "10.0.0.2", 5);
        assert_eq!(alloc.vni("10.0.0.1", "10.0.0.2").unwrap(), 2);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let alloc = SequentialVniAllocator::new();
        alloc.restore("10.0.0.1", "10.0.0.2", VNI_MAX - 1);
        let err = alloc.vni("10.0.0.1", "10.0.0.2").unwrap_err();
        assert!(matches!(err, MechanismError::VniExhausted { .. }));
    }

    #[test]
    fn ip_ordering() {
        assert_eq!(compare_ips("10.0.0.10", "10.0.0.9"), Ordering::Greater);
        assert_eq!(compare_ips("fe80::1", "10.0.0.1"), Ordering::Greater);
        assert_eq!(compare_ips("1.1.1.1", "1.1.1.1"), Ordering::Equal);
    }
}
