pub mod clock;
pub mod context;
pub mod kubelet_client;
pub mod metrics;
pub mod node;
pub mod summary;

#[cfg(test)]
pub mod test_utils;
