use chrono::{DateTime, Utc};
use serde::Serialize;

/// One resource value and the time the kubelet measured it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceSample {
    pub value: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetricsPoint {
    /// Usage in nano cores.
    pub cpu: ResourceSample,
    /// Working set in bytes.
    pub memory: ResourceSample,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeMetricsPoint {
    pub name: String,
    pub usage: MetricsPoint,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerMetricsPoint {
    pub name: String,
    pub usage: MetricsPoint,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PodMetricsPoint {
    pub namespace: String,
    pub name: String,
    pub containers: Vec<ContainerMetricsPoint>,
}

/// Result of one scrape cycle. Both collections are unordered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsBatch {
    pub nodes: Vec<NodeMetricsPoint>,
    pub pods: Vec<PodMetricsPoint>,
}

#[cfg(test)]
impl MetricsBatch {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.pods.is_empty()
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn pod_keys(&self) -> Vec<String> {
        self.pods.iter().map(|p| p.key()).collect()
    }
}

#[cfg(test)]
impl PodMetricsPoint {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
