//! Extension based placement.
//!
//! Every file name resolves to exactly one owner: the dispatcher's own store
//! or one of the storage nodes. The table is built once at startup and never
//! changes, so lookups are plain suffix comparisons.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Index of a node inside the routing table.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedTarget {
    Local,
    Remote(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub extension: String,
    pub address: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    local_extension: String,
    nodes: Vec<NodeEntry>,
}

impl RoutingTable {
    pub fn new(local_extension: impl Into<String>, nodes: Vec<NodeEntry>) -> Self {
        Self {
            local_extension: local_extension.into(),
            nodes,
        }
    }

    pub fn local_extension(&self) -> &str {
        &self.local_extension
    }

    /// Nodes in their fixed merge order.
    pub fn nodes(&self) -> &[NodeEntry] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(id)
    }

    /// Owner of `filename`, or `None` when no store accepts its extension.
    /// Case sensitive; the local extension wins over the nodes.
    pub fn route(&self, filename: &str) -> Option<RoutedTarget> {
        if filename.ends_with(&self.local_extension) {
            return Some(RoutedTarget::Local);
        }
        self.nodes
            .iter()
            .position(|node| filename.ends_with(&node.extension))
            .map(RoutedTarget::Remote)
    }

    /// Like [`RoutingTable::route`], failing with `UnsupportedType`.
    pub fn resolve(&self, filename: &str) -> Result<RoutedTarget> {
        self.route(filename)
            .ok_or_else(|| StoreError::UnsupportedType(filename.to_string()))
    }

    /// Owner of an extension token such as `.pdf`; exact match only.
    pub fn route_extension(&self, extension: &str) -> Option<RoutedTarget> {
        if extension == self.local_extension {
            return Some(RoutedTarget::Local);
        }
        self.nodes
            .iter()
            .position(|node| node.extension == extension)
            .map(RoutedTarget::Remote)
    }
}
