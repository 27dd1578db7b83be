use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use scraper_derive::LogicalModule;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::scraper::Scraper;
use crate::{
    general::{context::ScrapeContext, metrics::MetricsBatch},
    result::{ScrapeError, ScrapeResult},
    sys::{LogicalModule, LogicalModuleNewArgs},
    util::JoinHandleWrapper,
};

#[derive(Default)]
struct StatusInner {
    last_tick: Option<Instant>,
    latest: Option<Arc<MetricsBatch>>,
    last_error: Option<String>,
}

/// What the scrape loop last did, read by the health endpoints.
#[derive(Default)]
pub struct ScrapeStatus {
    inner: RwLock<StatusInner>,
}

impl ScrapeStatus {
    pub fn record_tick(&self, at: Instant) {
        self.inner.write().last_tick = Some(at);
    }

    /// A failed listing carries no data, the previous batch is kept.
    pub fn store(&self, batch: MetricsBatch, err: Option<&ScrapeError>) {
        let mut inner = self.inner.write();
        inner.last_error = err.map(|e| e.to_string());
        if matches!(err, Some(ScrapeError::ListNodes(_))) {
            return;
        }
        inner.latest = Some(Arc::new(batch));
    }

    pub fn latest(&self) -> Option<Arc<MetricsBatch>> {
        self.inner.read().latest.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    /// The last tick started within 1.5 resolutions of `now`.
    pub fn is_timely(&self, now: Instant, resolution: Duration) -> bool {
        let max_wait = resolution + resolution / 2;
        match self.inner.read().last_tick {
            Some(tick) => now.saturating_duration_since(tick) <= max_wait,
            None => false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().latest.is_some()
    }
}

struct ScrapeLoop {
    scraper: Arc<Scraper>,
    status: Arc<ScrapeStatus>,
    resolution: Duration,
    shutdown: CancellationToken,
}

impl ScrapeLoop {
    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.resolution);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let tick_at = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                t = ticker.tick() => t,
            };
            self.tick(tick_at).await;
        }
        tracing::info!("scrape loop stopped");
    }

    async fn tick(&self, tick_at: Instant) {
        self.status.record_tick(tick_at);
        // a cycle never outlives its tick
        let ctx = ScrapeContext::from_token(self.shutdown.clone())
            .with_deadline(tick_at + self.resolution);
        let (batch, err) = self.scraper.scrape(&ctx).await;
        match &err {
            Some(ScrapeError::ListNodes(_)) => {
                tracing::error!("scrape cycle failed, keeping previous batch")
            }
            Some(err) => tracing::warn!(
                "scrape cycle partially failed on {} nodes: {}",
                err.node_errors().len(),
                err
            ),
            None => tracing::debug!("scrape cycle done in {:?}", tick_at.elapsed()),
        }
        self.status.store(batch, err.as_ref());
    }
}

/// Drives one scrape cycle per metric resolution tick.
#[derive(LogicalModule)]
pub struct ScrapeManager {
    inner: Arc<ScrapeLoop>,
}

#[async_trait]
impl LogicalModule for ScrapeManager {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized,
    {
        Self {
            inner: Arc::new(ScrapeLoop {
                scraper: args.shared.scraper.clone(),
                status: args.shared.status.clone(),
                resolution: args.config.metric_resolution(),
                shutdown: args.shutdown.clone(),
            }),
        }
    }

    async fn init(&self) -> ScrapeResult<()> {
        tracing::info!(
            "scraping every {:?}, scrape timeout {:?}",
            self.inner.resolution,
            self.inner.scraper.scrape_timeout()
        );
        Ok(())
    }

    async fn start(&self) -> ScrapeResult<Vec<JoinHandleWrapper>> {
        let inner = self.inner.clone();
        Ok(vec![JoinHandleWrapper::from(tokio::spawn(inner.run()))])
    }
}

impl ScrapeManager {
    pub fn status(&self) -> &ScrapeStatus {
        &self.inner.status
    }
}

#[cfg(test)]
mod test {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::{
        config::parse_config,
        general::test_utils::{four_node_client, four_nodes, FakeNodeSource, NODE1},
        master::scrape_metrics::ScrapeMetrics,
        sys::ScrapeShared,
    };

    fn scrape_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2021-03-04T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn new_args(source: FakeNodeSource, node1_delay: Duration, yaml: &str) -> LogicalModuleNewArgs {
        let config = parse_config(yaml, "scraper.yaml").unwrap();
        let client = four_node_client(scrape_time())
            .with_delay(NODE1, node1_delay)
            .with_default_delay(Duration::from_millis(100));
        let scraper = Scraper::new(
            Arc::new(source),
            Arc::new(client),
            ScrapeMetrics::default(),
            config.scrape_timeout(),
        );
        LogicalModuleNewArgs {
            config: Arc::new(config),
            shared: ScrapeShared {
                scraper: Arc::new(scraper),
                status: Arc::new(ScrapeStatus::default()),
                registry: Arc::new(Default::default()),
            },
            shutdown: CancellationToken::new(),
        }
    }

    #[test]
    fn test_status_timeliness() {
        let status = ScrapeStatus::default();
        let now = Instant::now();
        let resolution = Duration::from_secs(10);
        assert!(!status.is_timely(now, resolution));
        status.record_tick(now);
        assert!(status.is_timely(now + Duration::from_secs(15), resolution));
        assert!(!status.is_timely(now + Duration::from_secs(16), resolution));
    }

    #[test]
    fn test_list_failure_keeps_previous_batch() {
        let status = ScrapeStatus::default();
        assert!(!status.is_ready());
        status.store(MetricsBatch::default(), None);
        assert!(status.is_ready());

        let err = ScrapeError::ListNodes(anyhow::anyhow!("lister down"));
        status.store(MetricsBatch::default(), Some(&err));
        assert!(status.is_ready());
        assert!(status.last_error().unwrap().contains("lister down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_deadline_caps_scrape_timeout() {
        // node1 answers after 8s, the 5s tick ends the cycle first
        let args = new_args(
            FakeNodeSource::new(four_nodes()),
            Duration::from_secs(8),
            "metric_resolution_ms: 5000\nscrape_timeout_ms: 30000\n",
        );
        let manager = ScrapeManager::new(args);
        let start = Instant::now();
        manager.inner.tick(start).await;
        assert!(start.elapsed() <= Duration::from_millis(5050));

        let batch = manager.status().latest().unwrap();
        assert_eq!(batch.nodes.len(), 3);
        assert!(manager.status().last_error().unwrap().contains("node1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_until_shutdown() {
        let args = new_args(
            FakeNodeSource::new(four_nodes()),
            Duration::from_millis(100),
            "metric_resolution_ms: 1000\nscrape_timeout_ms: 500\n",
        );
        let shutdown = args.shutdown.clone();
        let manager = ScrapeManager::new(args);
        manager.init().await.unwrap();
        let mut tasks = manager.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let now = Instant::now();
        assert!(manager
            .status()
            .is_timely(now, manager.inner.resolution));
        let batch = manager.status().latest().unwrap();
        assert_eq!(batch.nodes.len(), 4);
        assert_eq!(batch.pods.len(), 4);
        assert!(manager.status().last_error().is_none());

        shutdown.cancel();
        for task in tasks.iter_mut() {
            task.join().await;
        }
    }
}
