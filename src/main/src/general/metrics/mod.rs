mod decode;
mod types;

pub use decode::decode_summary;
pub use types::{
    ContainerMetricsPoint, MetricsBatch, MetricsPoint, NodeMetricsPoint, PodMetricsPoint,
    ResourceSample,
};
