use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    clock::Clock,
    context::ScrapeContext,
    node::{Node, NodeAddressType, NodeSource},
    summary::{
        ContainerStats, CpuStats, MemoryStats, NodeStats, PodReference, PodStats, Summary,
        SummaryClient,
    },
};
use crate::result::NodeFetchErr;

/// `now()` is fixed, `since(t)` measures up to `later`.
pub struct FakeClock {
    pub now: SystemTime,
    pub later: SystemTime,
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        self.now
    }

    fn since(&self, t: SystemTime) -> Duration {
        self.later.duration_since(t).unwrap_or_default()
    }
}

#[derive(Default)]
pub struct FakeNodeSource {
    pub nodes: Vec<Arc<Node>>,
    pub list_err: Option<String>,
}

impl FakeNodeSource {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(Arc::new).collect(),
            list_err: None,
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            nodes: vec![],
            list_err: Some(msg.to_owned()),
        }
    }
}

impl NodeSource for FakeNodeSource {
    fn list(&self) -> anyhow::Result<Vec<Arc<Node>>> {
        if let Some(msg) = &self.list_err {
            return Err(anyhow::anyhow!("{}", msg));
        }
        Ok(self.nodes.clone())
    }
}

/// Serves canned summaries after a per-node delay.
#[derive(Default)]
pub struct FakeSummaryClient {
    summaries: HashMap<String, Summary>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    ignore_cancel: bool,
    blocking: HashMap<String, Duration>,
    panic_on: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeSummaryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, node: &str, summary: Summary) -> Self {
        let _ = self.summaries.insert(node.to_owned(), summary);
        self
    }

    pub fn with_delay(mut self, node: &str, delay: Duration) -> Self {
        let _ = self.delays.insert(node.to_owned(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Sleeps the full delay even after the context is done.
    pub fn ignoring_cancellation(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    /// Blocks the worker thread for `delay`, out of reach of any cancellation.
    pub fn blocking_on(mut self, node: &str, delay: Duration) -> Self {
        let _ = self.blocking.insert(node.to_owned(), delay);
        self
    }

    pub fn panicking_on(mut self, node: &str) -> Self {
        let _ = self.panic_on.insert(node.to_owned());
        self
    }

    pub fn remove_summary(&mut self, node: &str) {
        let _ = self.summaries.remove(node);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SummaryClient for FakeSummaryClient {
    async fn get_summary(&self, ctx: &ScrapeContext, node: &Node) -> Result<Summary, NodeFetchErr> {
        let _ = self.calls.fetch_add(1, Ordering::AcqRel);
        if self.panic_on.contains(&node.name) {
            panic!("fake client blew up on {}", node.name);
        }
        let Some(summary) = self.summaries.get(&node.name) else {
            return Err(NodeFetchErr::BadStatus {
                status: 404,
                url: format!("fake://{}/stats/summary", node.name),
            });
        };
        if let Some(delay) = self.blocking.get(&node.name) {
            std::thread::sleep(*delay);
            return Ok(summary.clone());
        }
        let delay = self
            .delays
            .get(&node.name)
            .copied()
            .unwrap_or(self.default_delay);
        if self.ignore_cancel {
            tokio::time::sleep(delay).await;
        } else {
            tokio::select! {
                reason = ctx.done() => return Err(reason.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(summary.clone())
    }
}

pub fn make_node(name: &str, host: &str, addr: &str, ready: bool) -> Node {
    let mut node = Node::new(name).with_ready(ready);
    if !host.is_empty() {
        node = node.with_address(NodeAddressType::Hostname, host);
    }
    if !addr.is_empty() {
        node = node.with_address(NodeAddressType::InternalIP, addr);
    }
    node
}

pub fn cpu_stats(value: u64, time: DateTime<Utc>) -> CpuStats {
    CpuStats {
        time,
        usage_nano_cores: Some(value),
        usage_core_nano_seconds: Some(value * 10_000),
    }
}

pub fn mem_stats(value: u64, time: DateTime<Utc>) -> MemoryStats {
    MemoryStats {
        time,
        working_set_bytes: Some(value),
        rss_bytes: Some(value),
    }
}

/// cpu 100 at +100ms, memory 200 at +200ms.
pub fn node_stats(name: &str, scrape_time: DateTime<Utc>) -> NodeStats {
    NodeStats {
        node_name: name.to_owned(),
        cpu: Some(cpu_stats(
            100,
            scrape_time + chrono::Duration::milliseconds(100),
        )),
        memory: Some(mem_stats(
            200,
            scrape_time + chrono::Duration::milliseconds(200),
        )),
    }
}

pub fn container_stats(name: &str, cpu: u64, memory: u64, time: DateTime<Utc>) -> ContainerStats {
    ContainerStats {
        name: name.to_owned(),
        cpu: Some(cpu_stats(cpu, time)),
        memory: Some(mem_stats(memory, time)),
    }
}

pub fn pod_stats(namespace: &str, name: &str, containers: Vec<ContainerStats>) -> PodStats {
    PodStats {
        pod_ref: PodReference {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            uid: format!("{}-{}", namespace, name),
        },
        containers,
    }
}

pub const NODE1: &str = "node1";
pub const NODE_NO_HOST: &str = "node-no-host";
pub const NODE3: &str = "node3";
pub const NODE4: &str = "node4";

/// Four nodes: node1 carries four pods, the rest only node-level stats.
/// node3 is not ready, node-no-host has only an internal IP.
pub fn four_nodes() -> Vec<Node> {
    vec![
        make_node(NODE1, "node1.somedomain", "10.0.1.2", true),
        make_node(NODE_NO_HOST, "", "10.0.1.3", true),
        make_node(NODE3, "node3.somedomain", "10.0.1.4", false),
        make_node(NODE4, "node4.somedomain", "10.0.1.5", true),
    ]
}

pub fn four_node_client(scrape_time: DateTime<Utc>) -> FakeSummaryClient {
    let ms = chrono::Duration::milliseconds;
    let rich = Summary {
        node: node_stats(NODE1, scrape_time),
        pods: vec![
            pod_stats(
                "ns1",
                "pod1",
                vec![
                    container_stats("container1", 300, 400, scrape_time + ms(10)),
                    container_stats("container2", 500, 600, scrape_time + ms(20)),
                ],
            ),
            pod_stats(
                "ns1",
                "pod2",
                vec![container_stats("container1", 700, 800, scrape_time + ms(30))],
            ),
            pod_stats(
                "ns2",
                "pod1",
                vec![container_stats("container1", 900, 1000, scrape_time + ms(40))],
            ),
            pod_stats(
                "ns3",
                "pod1",
                vec![container_stats("container1", 1100, 1200, scrape_time + ms(50))],
            ),
        ],
    };
    let mut client = FakeSummaryClient::new().with_summary(NODE1, rich);
    for name in [NODE_NO_HOST, NODE3, NODE4] {
        client = client.with_summary(
            name,
            Summary {
                node: node_stats(name, scrape_time),
                pods: vec![],
            },
        );
    }
    client
}

pub fn sorted<T: Ord>(mut v: Vec<T>) -> Vec<T> {
    v.sort();
    v
}
