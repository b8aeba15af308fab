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

use std::{collections::HashMap, sync::Mutex};

use log::*;

use crate::{
    connection::Connection,
    registry::{Labels, NetworkService, NetworkServiceEndpoint},
};

const LOG_TARGET: &str = "nsm::nse_manager::selector";

/// Policy used to pick one endpoint out of the candidates discovered for a network service.
pub trait EndpointSelector: Send + Sync {
    fn select_endpoint(
        &self,
        connection: &Connection,
        network_service: &NetworkService,
        candidates: &[NetworkServiceEndpoint],
    ) -> Option<NetworkServiceEndpoint>;
}

/// Cycles through the candidates, keeping one position per network service.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    positions: Mutex<HashMap<String, usize>>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Default::default()
    }
}

impl EndpointSelector for RoundRobinSelector {
    fn select_endpoint(
        &self,
        _connection: &Connection,
        network_service: &NetworkService,
        candidates: &[NetworkServiceEndpoint],
    ) -> Option<NetworkServiceEndpoint>
    {
        if candidates.is_empty() {
            return None;
        }
        let mut positions = acquire_lock!(self.positions);
        let position = positions.entry(network_service.name.clone()).or_insert(0);
        let selected = candidates[*position % candidates.len()].clone();
        *position = position.wrapping_add(1);
        trace!(
            target: LOG_TARGET,
            "Round robin selected '{}' for network service '{}'",
            selected.name,
            network_service.name
        );
        Some(selected)
    }
}

/// Selects endpoints using the network service's match rules.
///
/// A match applies when its source selector is a subset of the request labels. A match with an empty source selector
/// is only considered when no non-empty selector has applied. Candidates of the first applying match with any
/// endpoint whose labels contain a route's destination selector are handed to round robin. A service without match
/// rules falls back to round robin over every candidate.
#[derive(Debug, Default)]
pub struct MatchSelector {
    round_robin: RoundRobinSelector,
}

impl MatchSelector {
    pub fn new() -> Self {
        Default::default()
    }

    fn match_endpoint(
        &self,
        connection: &Connection,
        network_service: &NetworkService,
        candidates: &[NetworkServiceEndpoint],
    ) -> Option<NetworkServiceEndpoint>
    {
        let labels = &connection.labels;
        let mut matched_non_empty_selector = false;
        for rule in &network_service.matches {
            if !is_subset(labels, &rule.source_selector) {
                continue;
            }
            if rule.source_selector.is_empty() && matched_non_empty_selector {
                continue;
            }
            if !rule.source_selector.is_empty() {
                matched_non_empty_selector = true;
            }

            let matching = rule
                .routes
                .iter()
                .flat_map(|route| {
                    candidates
                        .iter()
                        .filter(move |nse| is_subset(&nse.labels, &route.destination_selector))
                })
                .cloned()
                .collect::<Vec<_>>();

            if !matching.is_empty() {
                return self.round_robin.select_endpoint(connection, network_service, &matching);
            }
        }
        debug!(
            target: LOG_TARGET,
            "No match rule of '{}' selected an endpoint for labels {:?}", network_service.name, labels
        );
        None
    }
}

impl EndpointSelector for MatchSelector {
    fn select_endpoint(
        &self,
        connection: &Connection,
        network_service: &NetworkService,
        candidates: &[NetworkServiceEndpoint],
    ) -> Option<NetworkServiceEndpoint>
    {
        if network_service.matches.is_empty() {
            return self.round_robin.select_endpoint(connection, network_service, candidates);
        }
        self.match_endpoint(connection, network_service, candidates)
    }
}

/// Every entry of `subset` is present in `labels` with the same value.
fn is_subset(labels: &Labels, subset: &Labels) -> bool {
    labels.len() >= subset.len() && subset.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{Destination, Match};

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn nse(name: &str, pairs: &[(&str, &str)]) -> NetworkServiceEndpoint {
        NetworkServiceEndpoint {
            name: name.to_string(),
            network_service_name: "secure-intranet".to_string(),
            labels: labels(pairs),
            ..Default::default()
        }
    }

    fn service(matches: Vec<Match>) -> NetworkService {
        NetworkService {
            name: "secure-intranet".to_string(),
            matches,
            ..Default::default()
        }
    }

    fn rule(source: &[(&str, &str)], destinations: &[&[(&str, &str)]]) -> Match {
        Match {
            source_selector: labels(source),
            routes: destinations
                .iter()
                .map(|d| Destination {
                    destination_selector: labels(d),
                    weight: 100,
                })
                .collect(),
        }
    }

    fn request(pairs: &[(&str, &str)]) -> Connection {
        let mut conn = Connection::local("1", "secure-intranet");
        conn.labels = labels(pairs);
        conn
    }

    #[test]
    fn round_robin_cycles_per_service() {
        let selector = RoundRobinSelector::new();
        let candidates = vec![nse("a", &[]), nse("b", &[]), nse("c", &[])];
        let ns = service(vec![]);
        let picked = (0..4)
            .map(|_| selector.select_endpoint(&request(&[]), &ns, &candidates).unwrap().name)
            .collect::<Vec<_>>();
        assert_eq!(picked, vec!["a", "b", "c", "a"]);

        let other = NetworkService {
            name: "icmp".to_string(),
            ..Default::default()
        };
        assert_eq!(
            selector.select_endpoint(&request(&[]), &other, &candidates).unwrap().name,
            "a"
        );
        assert!(selector.select_endpoint(&request(&[]), &ns, &[]).is_none());
    }

    #[test]
    fn match_by_labels() {
        let selector = MatchSelector::new();
        let ns = service(vec![
            rule(&[("app", "firewall")], &[&[("app", "vpn-gateway")]]),
            rule(&[], &[&[("app", "firewall")]]),
        ]);
        let candidates = vec![nse("fw", &[("app", "firewall")]), nse("gw", &[("app", "vpn-gateway")])];

        let selected = selector
            .select_endpoint(&request(&[("app", "firewall")]), &ns, &candidates)
            .unwrap();
        assert_eq!(selected.name, "gw");

        let selected = selector.select_endpoint(&request(&[("app", "client")]), &ns, &candidates).unwrap();
        assert_eq!(selected.name, "fw");
    }

    #[test]
    fn empty_selector_skipped_after_non_empty_match() {
        let selector = MatchSelector::new();
        let ns = service(vec![
            rule(&[("app", "firewall")], &[&[("app", "missing")]]),
            rule(&[], &[&[("app", "firewall")]]),
        ]);
        let candidates = vec![nse("fw", &[("app", "firewall")])];
        assert!(selector
            .select_endpoint(&request(&[("app", "firewall")]), &ns, &candidates)
            .is_none());
    }

    #[test]
    fn no_matches_falls_back_to_round_robin() {
        let selector = MatchSelector::new();
        let candidates = vec![nse("a", &[]), nse("b", &[])];
        let ns = service(vec![]);
        assert_eq!(selector.select_endpoint(&request(&[]), &ns, &candidates).unwrap().name, "a");
        assert_eq!(selector.select_endpoint(&request(&[]), &ns, &candidates).unwrap().name, "b");
    }
}
