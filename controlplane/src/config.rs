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

use std::{env, time::Duration};

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_HEAL_ENABLED: &str = "NSMD_HEAL_ENABLED";
pub const ENV_HEAL_DST_TIMEOUT: &str = "NSMD_HEAL_DST_TIMEOUT";
pub const ENV_HEAL_RETRY_COUNT: &str = "NSMD_HEAL_RETRY_COUNT";
pub const ENV_REQUEST_TIMEOUT: &str = "NSMD_REQUEST_TIMEOUT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {name}: {details}")]
    InvalidValue {
        name: &'static str,
        value: String,
        details: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NsmConfig {
    /// False to close broken connections instead of healing them.
    /// Default: true
    pub heal_enabled: bool,
    /// Time a connection with a lost remote source may stay in Healing before it is closed.
    /// Default: 1 min
    #[serde(with = "serializers::seconds")]
    pub heal_timeout: Duration,
    /// Bound on the endpoint leg of a close.
    /// Default: 5 secs
    #[serde(with = "serializers::seconds")]
    pub close_timeout: Duration,
    /// Bound on a client request and on establishing an endpoint client.
    /// Default: 15 secs
    #[serde(with = "serializers::seconds")]
    pub request_timeout: Duration,
    /// Bound on a request re-issued by the heal processor.
    /// Default: 20 secs
    #[serde(with = "serializers::seconds")]
    pub heal_request_timeout: Duration,
    /// Bound on connecting to an endpoint while healing.
    /// Default: 15 secs
    #[serde(with = "serializers::seconds")]
    pub heal_request_connect_timeout: Duration,
    /// Bound on the reachability check of a remote manager.
    /// Default: 1 sec
    #[serde(with = "serializers::seconds")]
    pub heal_request_connect_check_timeout: Duration,
    /// Time to wait for a forwarder to reappear when healing a ForwarderDown.
    /// Default: 1 min
    #[serde(with = "serializers::seconds")]
    pub heal_forwarder_timeout: Duration,
    /// Default: 10
    pub heal_retry_count: usize,
    /// Default: 5 secs
    #[serde(with = "serializers::seconds")]
    pub heal_retry_delay: Duration,
    /// Time to wait for a replacement endpoint when healing DstDown/DstNmgrDown.
    /// Default: 30 secs
    #[serde(with = "serializers::seconds")]
    pub heal_dst_wait_timeout: Duration,
    /// Discovery poll period while waiting for a replacement endpoint.
    /// Default: 500 ms
    #[serde(with = "serializers::milliseconds")]
    pub heal_dst_wait_tick: Duration,
    /// Time a request waits for a forwarder with configured mechanisms.
    /// Default: 15 secs
    #[serde(with = "serializers::seconds")]
    pub forwarder_wait_timeout: Duration,
    /// Default: 100 ms
    #[serde(with = "serializers::milliseconds")]
    pub forwarder_poll_interval: Duration,
    /// Number of attempts to program the forwarder with a cross-connect.
    /// Default: 10
    pub forwarder_retry_count: usize,
    /// Default: 500 ms
    #[serde(with = "serializers::milliseconds")]
    pub forwarder_retry_delay: Duration,
    /// Bound on a single forwarder request.
    /// Default: 15 secs
    #[serde(with = "serializers::seconds")]
    pub forwarder_request_timeout: Duration,
    /// Time to wait for in-flight requests before giving up on an unknown remote connection event.
    /// Default: 30 secs
    #[serde(with = "serializers::seconds")]
    pub pending_connections_timeout: Duration,
    /// How long a closed connection id is remembered.
    /// Default: 3 mins
    #[serde(with = "serializers::seconds")]
    pub deleted_connection_lifetime: Duration,
}

impl Default for NsmConfig {
    fn default() -> Self {
        Self {
            heal_enabled: true,
            heal_timeout: Duration::from_secs(60),
            close_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            heal_request_timeout: Duration::from_secs(20),
            heal_request_connect_timeout: Duration::from_secs(15),
            heal_request_connect_check_timeout: Duration::from_secs(1),
            heal_forwarder_timeout: Duration::from_secs(60),
            heal_retry_count: 10,
            heal_retry_delay: Duration::from_secs(5),
            heal_dst_wait_timeout: Duration::from_secs(30),
            heal_dst_wait_tick: Duration::from_millis(500),
            forwarder_wait_timeout: Duration::from_secs(15),
            forwarder_poll_interval: Duration::from_millis(100),
            forwarder_retry_count: 10,
            forwarder_retry_delay: Duration::from_millis(500),
            forwarder_request_timeout: Duration::from_secs(15),
            pending_connections_timeout: Duration::from_secs(30),
            deleted_connection_lifetime: Duration::from_secs(3 * 60),
        }
    }
}

impl NsmConfig {
    /// Defaults with the `NSMD_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name. Unset (or empty) variables keep the current value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where F: Fn(&str) -> Option<String> {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(value) = lookup(ENV_HEAL_ENABLED) {
            self.heal_enabled = parse_bool(ENV_HEAL_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_HEAL_DST_TIMEOUT) {
            self.heal_dst_wait_timeout = Duration::from_secs(parse_u64(ENV_HEAL_DST_TIMEOUT, &value)?);
        }
        if let Some(value) = lookup(ENV_HEAL_RETRY_COUNT) {
            self.heal_retry_count = parse_u64(ENV_HEAL_RETRY_COUNT, &value)? as usize;
        }
        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT) {
            self.request_timeout = Duration::from_secs(parse_u64(ENV_REQUEST_TIMEOUT, &value)?);
        }
        Ok(())
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|err| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
        details: err.to_string(),
    })
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|err| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
        details: err.to_string(),
    })
}

pub mod serializers {
    pub mod seconds {
        //! Serialise a `Duration` as a whole number of seconds.
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where D: Deserializer<'de> {
            Ok(Duration::from_secs(u64::deserialize(deserializer)?))
        }

        pub fn serialize<S>(duration: &Duration, s: S) -> Result<S::Ok, S::Error>
        where S: Serializer {
            s.serialize_u64(duration.as_secs())
        }
    }

    pub mod milliseconds {
        //! Serialise a `Duration` as a whole number of milliseconds.
        use std::{convert::TryFrom, time::Duration};

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where D: Deserializer<'de> {
            Ok(Duration::from_millis(u64::deserialize(deserializer)?))
        }

        pub fn serialize<S>(duration: &Duration, s: S) -> Result<S::Ok, S::Error>
        where S: Serializer {
            s.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = NsmConfig::default();
        assert!(config.heal_enabled);
        assert_eq!(config.heal_timeout, Duration::from_secs(60));
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert_eq!(config.heal_dst_wait_tick, Duration::from_millis(500));
        assert_eq!(config.heal_retry_count, 10);
    }

    #[test]
    fn overrides_applied() {
        let mut config = NsmConfig::default();
        config
            .apply_overrides(lookup_from(&[
                (ENV_HEAL_ENABLED, "false"),
                (ENV_HEAL_DST_TIMEOUT, "7"),
                (ENV_HEAL_RETRY_COUNT, "3"),
                (ENV_REQUEST_TIMEOUT, "2"),
            ]))
            .unwrap();
        assert!(!config.heal_enabled);
        assert_eq!(config.heal_dst_wait_timeout, Duration::from_secs(7));
        assert_eq!(config.heal_retry_count, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn empty_override_keeps_default() {
        let mut config = NsmConfig::default();
        config.apply_overrides(lookup_from(&[(ENV_HEAL_ENABLED, " ")])).unwrap();
        assert!(config.heal_enabled);
    }

    #[test]
    fn invalid_override_rejected() {
        let mut config = NsmConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[(ENV_HEAL_DST_TIMEOUT, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_HEAL_DST_TIMEOUT));
    }

    #[test]
    fn deserialize_partial() {
        let config: NsmConfig = serde_json::from_str(r#"{"heal_enabled": false, "heal_dst_wait_tick": 20}"#).unwrap();
        assert!(!config.heal_enabled);
        assert_eq!(config.heal_dst_wait_tick, Duration::from_millis(20));
        assert_eq!(config.close_timeout, Duration::from_secs(5));
    }
}
