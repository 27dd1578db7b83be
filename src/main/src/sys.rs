use std::sync::Arc;

use async_trait::async_trait;
use prometheus_client::registry::Registry;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ScraperConfig,
    general::{
        kubelet_client::KubeletClient,
        node::{NodeSource, StaticNodeSource},
        summary::SummaryClient,
    },
    master::{
        m_metrics_http::MetricsHttpHandler,
        m_scrape_manager::{ScrapeManager, ScrapeStatus},
        scrape_metrics::new_registry_and_metrics,
        scraper::Scraper,
    },
    result::ScrapeResult,
    util::JoinHandleWrapper,
};

pub struct Sys {
    logical_modules: LogicalModules,
    sub_tasks: Mutex<Vec<JoinHandleWrapper>>,
    shutdown: CancellationToken,
}

impl Drop for Sys {
    fn drop(&mut self) {
        tracing::info!("drop sys");
    }
}

impl Sys {
    pub fn new(config: ScraperConfig) -> ScrapeResult<Sys> {
        let client = Arc::new(KubeletClient::new(&config)?);
        let node_source = Arc::new(StaticNodeSource::new(config.nodes.clone()));
        Ok(Self::with_collaborators(config, node_source, client))
    }

    pub fn with_collaborators(
        config: ScraperConfig,
        node_source: Arc<dyn NodeSource>,
        client: Arc<dyn SummaryClient>,
    ) -> Sys {
        let (metrics, registry) = new_registry_and_metrics();
        let scraper = Scraper::new(node_source, client, metrics, config.scrape_timeout());
        let shutdown = CancellationToken::new();
        let args = LogicalModuleNewArgs {
            config: Arc::new(config),
            shared: ScrapeShared {
                scraper: Arc::new(scraper),
                status: Arc::new(ScrapeStatus::default()),
                registry: Arc::new(registry),
            },
            shutdown: shutdown.clone(),
        };
        Sys {
            logical_modules: LogicalModules::new(args),
            sub_tasks: Vec::new().into(),
            shutdown,
        }
    }

    pub fn modules(&self) -> &LogicalModules {
        &self.logical_modules
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn start(&self) -> ScrapeResult<()> {
        self.logical_modules.start(self).await
    }

    /// Starts every module and blocks until Ctrl-C stopped them all.
    pub async fn wait_for_end(&self) -> ScrapeResult<()> {
        self.start().await?;
        if let Some(addr) = self.modules().metrics_http.local_addr() {
            tracing::info!("modules all started, serving on {}", addr);
        }

        let shutdown = self.shutdown_token();
        let _ = tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("listen for ctrl-c failed: {}", err);
                return;
            }
            tracing::info!("ctrl-c received, shutting down");
            shutdown.cancel();
        });

        self.join_sub_tasks().await;
        Ok(())
    }

    pub async fn join_sub_tasks(&self) {
        for task in self.sub_tasks.lock().await.iter_mut() {
            task.join().await;
        }
    }
}

/// State owned by the process and handed to every module.
#[derive(Clone)]
pub struct ScrapeShared {
    pub scraper: Arc<Scraper>,
    pub status: Arc<ScrapeStatus>,
    pub registry: Arc<Registry>,
}

#[derive(Clone)]
pub struct LogicalModuleNewArgs {
    pub config: Arc<ScraperConfig>,
    pub shared: ScrapeShared,
    /// Canceled once on shutdown, every module stops with it.
    pub shutdown: CancellationToken,
}

#[async_trait]
pub trait LogicalModule: Send + Sync + 'static {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized;
    async fn start(&self) -> ScrapeResult<Vec<JoinHandleWrapper>>;

    async fn init(&self) -> ScrapeResult<()> {
        Ok(())
    }
}

macro_rules! start_modules {
    ($( $module:ident,$modulety:ty ),*) => {
        pub struct LogicalModules {
            $( pub $module : $modulety, )*
        }

        impl LogicalModules {
            pub fn new(args: LogicalModuleNewArgs) -> LogicalModules {
                LogicalModules {
                    $( $module : <$modulety>::new(args.clone()), )*
                }
            }

            pub async fn start(&self, sys: &Sys) -> ScrapeResult<()> {
                $(
                    self.$module.init().await?;
                )*
                $(
                    tracing::debug!("start module {}", <$modulety>::name());
                    sys.sub_tasks
                        .lock()
                        .await
                        .append(&mut self.$module.start().await?);
                )*
                Ok(())
            }
        }
    };
}

start_modules!(
    scrape_manager,
    ScrapeManager,
    metrics_http,
    MetricsHttpHandler
);
