use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;

use super::scrape_metrics::ScrapeMetrics;
use crate::{
    general::{
        clock::{Clock, RealClock},
        context::ScrapeContext,
        metrics::{decode_summary, MetricsBatch, NodeMetricsPoint, PodMetricsPoint},
        node::{Node, NodeSource},
        summary::SummaryClient,
    },
    result::{describe_panic, ErrorAggregator, NodeFetchErr, NodeScrapeErr, ScrapeError},
};

/// How long a node task may still settle after the deadline before it is aborted.
const SETTLE_GRACE: Duration = Duration::from_millis(20);

struct Pending {
    node: String,
    start: SystemTime,
}

struct CycleInner {
    batch: MetricsBatch,
    pending: Vec<Option<Pending>>,
    sealed: bool,
}

/// Batch under construction plus the nodes that have not reached a terminal state.
/// A node settles at most once and never after the cycle is sealed.
struct ScrapeCycle {
    inner: Mutex<CycleInner>,
}

impl ScrapeCycle {
    fn new() -> Self {
        Self {
            inner: Mutex::new(CycleInner {
                batch: MetricsBatch::default(),
                pending: vec![],
                sealed: false,
            }),
        }
    }

    fn track(&self, node: String, start: SystemTime) -> usize {
        let mut inner = self.inner.lock();
        inner.pending.push(Some(Pending { node, start }));
        inner.pending.len() - 1
    }

    fn settle(&self, idx: usize, f: impl FnOnce(&mut MetricsBatch, Pending)) -> bool {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return false;
        }
        let Some(pending) = inner.pending.get_mut(idx).and_then(Option::take) else {
            return false;
        };
        f(&mut inner.batch, pending);
        true
    }

    /// Closes the cycle, handing out the batch and every still pending node.
    fn seal(&self) -> (MetricsBatch, Vec<Pending>) {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        let unsettled = inner.pending.iter_mut().filter_map(Option::take).collect();
        (std::mem::take(&mut inner.batch), unsettled)
    }
}

/// Everything a node task needs, owned so it can be spawned.
struct NodeJob {
    idx: usize,
    node: Arc<Node>,
    ctx: ScrapeContext,
    client: Arc<dyn SummaryClient>,
    clock: Arc<dyn Clock>,
    metrics: ScrapeMetrics,
    cycle: Arc<ScrapeCycle>,
    errs: Arc<ErrorAggregator>,
}

type NodePoints = (NodeMetricsPoint, Vec<PodMetricsPoint>);

impl NodeJob {
    async fn run(self) {
        let started = self.clock.now();
        let fetch = AssertUnwindSafe(self.client.get_summary(&self.ctx, &self.node)).catch_unwind();
        let fetched = match self.ctx.run(fetch).await {
            Ok(Ok(res)) => res,
            Ok(Err(payload)) => Err(NodeFetchErr::Panicked(describe_panic(
                payload,
                self.clock.since(started),
            ))),
            Err(reason) => Err(reason.into()),
        };
        let outcome: Result<NodePoints, NodeFetchErr> =
            fetched.and_then(|summary| decode_summary(&self.node.name, &summary));

        let settled = self.cycle.settle(self.idx, |batch, pending| {
            self.metrics
                .observe_request(&pending.node, self.clock.since(pending.start));
            match outcome {
                Ok((node, pods)) => {
                    batch.nodes.push(node);
                    batch.pods.extend(pods);
                    self.metrics.mark_scraped(&pending.node, self.clock.now());
                }
                Err(cause) => {
                    tracing::debug!("node {} failed: {}", pending.node, cause);
                    self.errs.push(NodeScrapeErr::new(pending.node, cause));
                }
            }
        });
        if !settled {
            tracing::debug!("node {} finished after the cycle was sealed", self.node.name);
        }
    }
}

/// Fans one summary fetch out per node and gathers what arrives before the deadline.
pub struct Scraper {
    node_source: Arc<dyn NodeSource>,
    client: Arc<dyn SummaryClient>,
    clock: Arc<dyn Clock>,
    metrics: ScrapeMetrics,
    scrape_timeout: Duration,
}

impl Scraper {
    pub fn new(
        node_source: Arc<dyn NodeSource>,
        client: Arc<dyn SummaryClient>,
        metrics: ScrapeMetrics,
        scrape_timeout: Duration,
    ) -> Self {
        Self {
            node_source,
            client,
            clock: Arc::new(RealClock),
            metrics,
            scrape_timeout,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scrape_timeout(&self) -> Duration {
        self.scrape_timeout
    }

    /// Runs one scrape cycle.
    ///
    /// The batch holds data of every node that succeeded in time, the error
    /// names every node that did not. A failed listing is the only case where
    /// no node is attempted at all.
    pub async fn scrape(&self, parent: &ScrapeContext) -> (MetricsBatch, Option<ScrapeError>) {
        let nodes = match self.node_source.list() {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::error!("unable to list nodes: {:#}", err);
                self.metrics.record_scrape(false);
                return (MetricsBatch::default(), Some(ScrapeError::ListNodes(err)));
            }
        };

        // the scrape timeout can only tighten the parent's deadline
        let ctx = parent.with_timeout(self.scrape_timeout);
        let cycle = Arc::new(ScrapeCycle::new());
        let errs = Arc::new(ErrorAggregator::default());
        tracing::debug!("scraping {} nodes", nodes.len());

        let mut tasks = JoinSet::new();
        for (i, node) in nodes.into_iter().enumerate() {
            if node.name.is_empty() {
                errs.push(NodeScrapeErr::new(
                    format!("<unnamed #{}>", i),
                    NodeFetchErr::MissingIdentity,
                ));
                continue;
            }
            let idx = cycle.track(node.name.clone(), self.clock.now());
            let job = NodeJob {
                idx,
                node,
                ctx: ctx.clone(),
                client: self.client.clone(),
                clock: self.clock.clone(),
                metrics: self.metrics.clone(),
                cycle: cycle.clone(),
                errs: errs.clone(),
            };
            let _ = tasks.spawn(job.run());
        }

        let all_settled = {
            let drain = async {
                while let Some(res) = tasks.join_next().await {
                    if let Err(err) = res {
                        tracing::warn!("node scrape task failed: {}", err);
                    }
                }
            };
            let cutoff = async {
                let _ = ctx.done().await;
                tokio::time::sleep(SETTLE_GRACE).await;
            };
            tokio::select! {
                _ = drain => true,
                _ = cutoff => false,
            }
        };
        ctx.cancel();
        if !all_settled {
            tasks.abort_all();
        }

        let (batch, unsettled) = cycle.seal();
        let late_cause = || {
            if parent.is_canceled() {
                NodeFetchErr::Canceled
            } else {
                NodeFetchErr::DeadlineExceeded
            }
        };
        for pending in unsettled {
            self.metrics
                .observe_request(&pending.node, self.clock.since(pending.start));
            errs.push(NodeScrapeErr::new(pending.node, late_cause()));
        }

        self.metrics.record_scrape(errs.is_empty());
        match errs.take() {
            None => {
                tracing::info!(
                    "scraped {} nodes and {} pods",
                    batch.nodes.len(),
                    batch.pods.len()
                );
                (batch, None)
            }
            Some(agg) => {
                tracing::warn!(
                    "scraped {} nodes and {} pods, {} nodes failed ({} timed out): {}",
                    batch.nodes.len(),
                    batch.pods.len(),
                    agg.len(),
                    agg.timed_out_nodes().count(),
                    agg
                );
                (batch, Some(ScrapeError::Nodes(agg)))
            }
        }
    }
}
