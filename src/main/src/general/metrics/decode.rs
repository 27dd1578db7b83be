use super::types::{
    ContainerMetricsPoint, MetricsPoint, NodeMetricsPoint, PodMetricsPoint, ResourceSample,
};
use crate::{
    general::summary::{CpuStats, MemoryStats, PodStats, Summary},
    result::NodeFetchErr,
};

fn decode_usage(cpu: Option<&CpuStats>, memory: Option<&MemoryStats>) -> Result<MetricsPoint, String> {
    let cpu = cpu.ok_or("missing cpu stats")?;
    let memory = memory.ok_or("missing memory stats")?;
    let cpu_value = cpu.usage_nano_cores.ok_or("missing cpu usage metric")?;
    let memory_value = memory
        .working_set_bytes
        .ok_or("missing memory usage metric")?;
    Ok(MetricsPoint {
        cpu: ResourceSample {
            value: cpu_value,
            timestamp: cpu.time,
        },
        memory: ResourceSample {
            value: memory_value,
            timestamp: memory.time,
        },
    })
}

fn decode_pod(pod: &PodStats) -> Result<PodMetricsPoint, String> {
    if pod.pod_ref.name.is_empty() || pod.pod_ref.namespace.is_empty() {
        return Err("pod reference without name or namespace".to_owned());
    }
    let mut containers = Vec::with_capacity(pod.containers.len());
    for container in &pod.containers {
        if container.name.is_empty() {
            return Err("container without name".to_owned());
        }
        let usage = decode_usage(container.cpu.as_ref(), container.memory.as_ref())
            .map_err(|e| format!("container {}: {}", container.name, e))?;
        containers.push(ContainerMetricsPoint {
            name: container.name.clone(),
            usage,
        });
    }
    Ok(PodMetricsPoint {
        namespace: pod.pod_ref.namespace.clone(),
        name: pod.pod_ref.name.clone(),
        containers,
    })
}

/// Turns the summary fetched from `node_name` into batch points.
///
/// Unusable node-level stats fail the node as a whole, a zero-valued point
/// would be misleading. A broken pod is only dropped.
pub fn decode_summary(
    node_name: &str,
    summary: &Summary,
) -> Result<(NodeMetricsPoint, Vec<PodMetricsPoint>), NodeFetchErr> {
    if !summary.node.node_name.is_empty() && summary.node.node_name != node_name {
        return Err(NodeFetchErr::InvalidSummary(format!(
            "summary reports node {}",
            summary.node.node_name
        )));
    }
    let usage = decode_usage(summary.node.cpu.as_ref(), summary.node.memory.as_ref())
        .map_err(NodeFetchErr::InvalidSummary)?;
    let node = NodeMetricsPoint {
        name: node_name.to_owned(),
        usage,
    };

    let mut pods = Vec::with_capacity(summary.pods.len());
    for pod in &summary.pods {
        match decode_pod(pod) {
            Ok(point) => pods.push(point),
            Err(err) => {
                tracing::warn!(
                    "skip pod {}/{} on node {}: {}",
                    pod.pod_ref.namespace,
                    pod.pod_ref.name,
                    node_name,
                    err
                );
            }
        }
    }
    Ok((node, pods))
}
