use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::result::NodeFetchErr;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAddressType {
    Hostname,
    InternalIP,
    ExternalIP,
    InternalDNS,
    ExternalDNS,
}

impl NodeAddressType {
    pub fn default_preference() -> Vec<NodeAddressType> {
        vec![
            NodeAddressType::Hostname,
            NodeAddressType::InternalDNS,
            NodeAddressType::InternalIP,
            NodeAddressType::ExternalDNS,
            NodeAddressType::ExternalIP,
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub ty: NodeAddressType,
    pub address: String,
}

/// A cluster node as handed out by a [`NodeSource`]. Read-only for the scraper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    #[serde(default = "default_ready")]
    pub ready: bool,
    /// Overrides the configured kubelet port for this node.
    #[serde(default)]
    pub kubelet_port: Option<u16>,
}

fn default_ready() -> bool {
    true
}

#[cfg(test)]
impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: vec![],
            ready: true,
            kubelet_port: None,
        }
    }

    pub fn with_address(mut self, ty: NodeAddressType, address: impl Into<String>) -> Self {
        self.addresses.push(NodeAddress {
            ty,
            address: address.into(),
        });
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }
}

/// Supplies the nodes to scrape. A failure aborts the whole scrape cycle.
pub trait NodeSource: Send + Sync + 'static {
    fn list(&self) -> anyhow::Result<Vec<Arc<Node>>>;
}

/// Nodes fixed at startup, listed in configuration order.
pub struct StaticNodeSource {
    nodes: Vec<Arc<Node>>,
}

impl StaticNodeSource {
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(Arc::new).collect(),
        }
    }
}

impl NodeSource for StaticNodeSource {
    fn list(&self) -> anyhow::Result<Vec<Arc<Node>>> {
        Ok(self.nodes.clone())
    }
}

/// Picks the address to reach a node's kubelet by type preference.
#[derive(Clone, Debug)]
pub struct NodeAddressResolver {
    preferred: Vec<NodeAddressType>,
}

impl NodeAddressResolver {
    pub fn new(preferred: Vec<NodeAddressType>) -> Self {
        // keep first occurrence of each type
        let mut seen = HashSet::new();
        let preferred = preferred.into_iter().filter(|t| seen.insert(*t)).collect();
        Self { preferred }
    }

    pub fn node_address<'a>(&self, node: &'a Node) -> Result<&'a str, NodeFetchErr> {
        for ty in &self.preferred {
            if let Some(addr) = node
                .addresses
                .iter()
                .find(|a| a.ty == *ty && !a.address.is_empty())
            {
                return Ok(&addr.address);
            }
        }
        Err(NodeFetchErr::NoUsableAddress {
            types: self.preferred.clone(),
        })
    }
}

impl Default for NodeAddressResolver {
    fn default() -> Self {
        Self::new(NodeAddressType::default_preference())
    }
}
