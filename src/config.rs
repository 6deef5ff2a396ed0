//! Startup configuration for the dispatcher and the storage nodes.
//!
//! Both are plain JSON documents; any field left out takes its default, so an
//! empty `{}` file is a valid configuration. Command line flags in the
//! binaries override what the file says.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::routing::{NodeEntry, RoutingTable};

pub const DISPATCHER_PORT: u16 = 6009;
pub const PDF_NODE_PORT: u16 = 6011;
pub const TEXT_NODE_PORT: u16 = 6012;
pub const DEFAULT_SETTLE_MS: u64 = 100;
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 5_000;

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| StoreError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| StoreError::Config(format!("invalid {}: {}", path.display(), e)))
}

fn check_extension(extension: &str) -> Result<()> {
    if extension.len() < 2 || !extension.starts_with('.') || extension.contains(char::is_whitespace)
    {
        return Err(StoreError::Config(format!(
            "extension {:?} must look like \".ext\"",
            extension
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub listen: SocketAddr,
    pub root: PathBuf,
    pub local_extension: String,
    pub nodes: Vec<NodeEntry>,
    /// HTTP address of the `/status` endpoint; disabled when absent.
    pub status_listen: Option<SocketAddr>,
    pub settle_ms: u64,
    pub node_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DISPATCHER_PORT)),
            root: home_dir().join("smain"),
            local_extension: ".c".to_string(),
            nodes: vec![
                NodeEntry {
                    name: "spdf".to_string(),
                    extension: ".pdf".to_string(),
                    address: SocketAddr::from(([127, 0, 0, 1], PDF_NODE_PORT)),
                },
                NodeEntry {
                    name: "stext".to_string(),
                    extension: ".txt".to_string(),
                    address: SocketAddr::from(([127, 0, 0, 1], TEXT_NODE_PORT)),
                },
            ],
            status_listen: None,
            settle_ms: DEFAULT_SETTLE_MS,
            node_timeout_ms: DEFAULT_NODE_TIMEOUT_MS,
        }
    }
}

impl DispatcherConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Every extension must be well formed and owned by exactly one store.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let extensions = std::iter::once(self.local_extension.as_str())
            .chain(self.nodes.iter().map(|node| node.extension.as_str()));
        for extension in extensions {
            check_extension(extension)?;
            if !seen.insert(extension) {
                return Err(StoreError::Config(format!(
                    "extension {} is owned by more than one store",
                    extension
                )));
            }
        }
        Ok(())
    }

    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::new(self.local_extension.clone(), self.nodes.clone())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen: SocketAddr,
    pub root: PathBuf,
    pub extension: String,
    pub settle_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::for_extension(".pdf")
    }
}

impl NodeConfig {
    /// Reference placement: `.pdf` on 6011 under `~/spdf`, `.txt` on 6012
    /// under `~/stext`. Other extensions get an OS assigned port.
    pub fn for_extension(extension: &str) -> Self {
        let (port, dir) = match extension {
            ".pdf" => (PDF_NODE_PORT, "spdf".to_string()),
            ".txt" => (TEXT_NODE_PORT, "stext".to_string()),
            other => (0, format!("s{}", other.trim_start_matches('.'))),
        };
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], port)),
            root: home_dir().join(dir),
            extension: extension.to_string(),
            settle_ms: DEFAULT_SETTLE_MS,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_extension(&self.extension)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_takes_the_reference_layout() {
        let config: DispatcherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.listen.port(), DISPATCHER_PORT);
        assert_eq!(config.local_extension, ".c");
        assert!(config.root.ends_with("smain"));
        let names: Vec<_> = config.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["spdf", "stext"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_partial_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "root": "/srv/store",
                "settle_ms": 5,
                "nodes": [
                    {{ "name": "docs", "extension": ".md", "address": "10.0.0.2:7000" }}
                ]
            }}"#
        )
        .unwrap();

        let config = DispatcherConfig::load(file.path()).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/store"));
        assert_eq!(config.settle(), Duration::from_millis(5));
        assert_eq!(config.node_timeout_ms, DEFAULT_NODE_TIMEOUT_MS);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].address.port(), 7000);
    }

    #[test]
    fn overlapping_extensions_are_rejected() {
        let mut config = DispatcherConfig::default();
        config.nodes[1].extension = ".pdf".to_string();
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));

        let mut config = DispatcherConfig::default();
        config.local_extension = "c".to_string();
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn node_defaults_follow_the_extension() {
        let text = NodeConfig::for_extension(".txt");
        assert_eq!(text.listen.port(), TEXT_NODE_PORT);
        assert!(text.root.ends_with("stext"));

        let other = NodeConfig::for_extension(".md");
        assert_eq!(other.listen.port(), 0);
        assert!(other.root.ends_with("smd"));
    }

    #[test]
    fn unreadable_config_is_a_config_error() {
        let err = NodeConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
