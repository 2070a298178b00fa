/*
 * Created on Sun Apr 21 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

use {
    crate::error::{ErrorContext, RuntimeResult},
    serde::Deserialize,
    std::fs,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// Tunables for one RPC endpoint. Loadable from YAML; every field has a
/// sensible default
pub struct RpcConfig {
    /// worker threads of a standalone runtime
    pub worker_threads: usize,
    /// maximum concurrently served connections per listener
    pub client_limit: usize,
    /// write buffer capacity per connection
    pub buf_write_cap: usize,
    /// read buffer capacity per connection
    pub buf_read_cap: usize,
    /// frames larger than this are a protocol violation
    pub max_packet_size: u32,
    /// disable Nagle's algorithm on accepted and outbound connections
    pub tcp_nodelay: bool,
    /// capability names attributed to accepted plain TCP connections; omit for
    /// the full set
    pub auth_capabilities: Option<Vec<String>>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            client_limit: 4096,
            buf_write_cap: 16384,
            buf_read_cap: 16384,
            max_packet_size: 1 << 24,
            tcp_nodelay: true,
            auth_capabilities: None,
        }
    }
}

impl RpcConfig {
    pub fn from_yaml(raw: &str) -> RuntimeResult<Self> {
        serde_yaml::from_str(raw).set_dmsg("failed to parse RPC configuration")
    }
    pub fn read_file(path: &str) -> RuntimeResult<Self> {
        let raw = fs::read_to_string(path).set_dmsg(format!("failed to read `{path}`"))?;
        Self::from_yaml(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::RpcConfig;

    #[test]
    fn defaults() {
        let cfg = RpcConfig::default();
        assert_eq!(cfg.worker_threads, 2);
        assert!(cfg.tcp_nodelay);
        assert!(cfg.auth_capabilities.is_none());
    }

    #[test]
    fn yaml_overrides() {
        let cfg = RpcConfig::from_yaml(
            r#"
worker_threads: 4
client_limit: 128
tcp_nodelay: false
auth_capabilities:
  - search
  - metrics.read
"#,
        )
        .unwrap();
        assert_eq!(cfg.worker_threads, 4);
        assert_eq!(cfg.client_limit, 128);
        assert!(!cfg.tcp_nodelay);
        assert_eq!(
            cfg.auth_capabilities.as_deref(),
            Some(&["search".to_owned(), "metrics.read".to_owned()][..])
        );
        // everything else keeps its default
        assert_eq!(cfg.max_packet_size, 1 << 24);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(RpcConfig::from_yaml("does_not_exist: 1").is_err());
    }
}
