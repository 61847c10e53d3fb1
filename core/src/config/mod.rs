//! Read-only proxy configuration and service settings

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::DEFAULT_RING_SIZE;

/// Selector that expands to every category
pub const ALL_CATEGORIES: &str = "all";

const LISTEN_PORTS: &str = "listenPorts";
const SERVERS: &str = "servers";

/// A port the proxy listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenPort {
    pub port: u16,
    /// e.g. "HTTP", "HTTPS_PROXY", "UDP_FORWARDER"
    #[serde(default)]
    pub protocol: String,
    /// Name of the upstream server traffic is forwarded to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Upstream target the proxy forwards to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamServer {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_ssl: bool,
}

fn default_true() -> bool {
    true
}

/// Snapshot of proxy configuration as exported by the proxy.
///
/// Categories other than `listenPorts` and `servers` are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub listen_ports: Vec<ListenPort>,
    #[serde(default)]
    pub servers: Vec<UpstreamServer>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConfigSnapshot {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("parsing configuration snapshot")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {:?}", path))?;
        Self::from_json(&raw)
    }
}

/// Category lookup over a [`ConfigSnapshot`]
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    categories: BTreeMap<String, Value>,
}

impl ConfigRegistry {
    pub fn new(snapshot: ConfigSnapshot) -> anyhow::Result<Self> {
        let mut categories = snapshot.extra;
        categories.insert(
            LISTEN_PORTS.to_string(),
            serde_json::to_value(&snapshot.listen_ports)?,
        );
        categories.insert(SERVERS.to_string(), serde_json::to_value(&snapshot.servers)?);
        Ok(Self { categories })
    }

    /// Names of every known category
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Entries for the selected categories.
    ///
    /// `None`, an empty list, or a list containing `"all"` selects
    /// everything. Unknown names are skipped.
    pub fn get(&self, selection: Option<&[String]>) -> BTreeMap<String, Value> {
        let wanted = match selection {
            Some(names)
                if !names.is_empty()
                    && !names.iter().any(|n| n.eq_ignore_ascii_case(ALL_CATEGORIES)) =>
            {
                names
            }
            _ => return self.categories.clone(),
        };

        wanted
            .iter()
            .filter_map(|name| {
                self.categories
                    .get(name)
                    .map(|entries| (name.clone(), entries.clone()))
            })
            .collect()
    }
}

/// Runtime settings for the packet service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding the packet database and access token
    pub storage_path: PathBuf,
    pub ring_size: usize,
    pub max_resend_count: u32,
    pub max_interval_ms: u64,
    pub dispatch_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl ServiceConfig {
    pub fn default_storage_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("packetproxy"))
            .unwrap_or_else(|| PathBuf::from("./packetproxy_data"))
    }

    pub fn ensure_storage_dir(&self) -> std::io::Result<()> {
        if !self.storage_path.exists() {
            fs::create_dir_all(&self.storage_path)?;
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_path: Self::default_storage_path(),
            ring_size: DEFAULT_RING_SIZE,
            max_resend_count: 1000,
            max_interval_ms: 60_000,
            dispatch_timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "listenPorts": [
            { "port": 8080, "protocol": "HTTP", "server": "api" },
            { "port": 8443, "protocol": "HTTPS_PROXY", "enabled": false }
        ],
        "servers": [
            { "name": "api", "host": "api.example.com", "port": 443, "useSsl": true }
        ],
        "sslPassThroughs": [ { "serverName": "pinned.example.com" } ]
    }"#;

    fn registry() -> ConfigRegistry {
        ConfigRegistry::new(ConfigSnapshot::from_json(SAMPLE).expect("valid json"))
            .expect("registry builds")
    }

    fn names(selection: &[&str]) -> Vec<String> {
        selection.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn snapshot_parses_typed_and_extra_categories() {
        let snapshot = ConfigSnapshot::from_json(SAMPLE).expect("valid json");
        assert_eq!(snapshot.listen_ports.len(), 2);
        assert!(snapshot.listen_ports[0].enabled);
        assert!(!snapshot.listen_ports[1].enabled);
        assert!(snapshot.servers[0].use_ssl);
        assert!(snapshot.extra.contains_key("sslPassThroughs"));
    }

    #[test]
    fn empty_or_all_selects_everything() {
        let registry = registry();
        let everything = registry.get(None);
        assert_eq!(everything.len(), 3);
        assert_eq!(registry.get(Some(Vec::new().as_slice())), everything);
        assert_eq!(registry.get(Some(names(&["servers", "ALL"]).as_slice())), everything);
    }

    #[test]
    fn unknown_categories_are_omitted() {
        let registry = registry();
        let picked = registry.get(Some(names(&["servers", "charSets"]).as_slice()));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked["servers"][0]["host"], "api.example.com");

        assert!(registry.get(Some(names(&["nope"]).as_slice())).is_empty());
    }

    #[test]
    fn empty_snapshot_still_lists_core_categories() {
        let registry = ConfigRegistry::new(ConfigSnapshot::default()).expect("registry builds");
        let names: Vec<_> = registry.category_names().collect();
        assert_eq!(names, vec!["listenPorts", "servers"]);
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        fs::write(&path, SAMPLE).expect("write config");
        let snapshot = ConfigSnapshot::load(&path).expect("loads");
        assert_eq!(snapshot.servers[0].name, "api");

        assert!(ConfigSnapshot::load(&dir.path().join("missing.json")).is_err());
    }
}
