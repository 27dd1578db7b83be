use std::{
    collections::HashSet,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    general::node::{Node, NodeAddressType},
    result::{ConfigErr, ScrapeResult},
};

fn default_metric_resolution_ms() -> u64 {
    60_000
}

fn default_scrape_timeout_ms() -> u64 {
    10_000
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4443))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Interval between two scrape cycles.
    #[serde(default = "default_metric_resolution_ms")]
    pub metric_resolution_ms: u64,
    /// Upper bound of a single cycle, further capped by the tick deadline.
    #[serde(default = "default_scrape_timeout_ms")]
    pub scrape_timeout_ms: u64,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub kubelet: KubeletConfig,
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Directory of the config file, relative paths inside it resolve here.
    #[serde(skip)]
    pub file_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeletConfig {
    pub port: u16,
    pub scheme: String,
    pub insecure_tls: bool,
    pub preferred_address_types: Vec<NodeAddressType>,
    pub bearer_token_file: Option<PathBuf>,
}

impl Default for KubeletConfig {
    fn default() -> Self {
        Self {
            port: 10250,
            scheme: "https".to_owned(),
            insecure_tls: false,
            preferred_address_types: NodeAddressType::default_preference(),
            bearer_token_file: None,
        }
    }
}

impl ScraperConfig {
    pub fn metric_resolution(&self) -> Duration {
        Duration::from_millis(self.metric_resolution_ms)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }

    pub fn bearer_token_path(&self) -> Option<PathBuf> {
        self.kubelet.bearer_token_file.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.file_dir.join(p)
            }
        })
    }

    pub fn validate(&self) -> Result<(), ConfigErr> {
        if self.metric_resolution_ms == 0 {
            return Err(ConfigErr::ZeroDuration {
                field: "metric_resolution_ms",
            });
        }
        if self.scrape_timeout_ms == 0 {
            return Err(ConfigErr::ZeroDuration {
                field: "scrape_timeout_ms",
            });
        }
        if self.scrape_timeout_ms > self.metric_resolution_ms {
            tracing::warn!(
                "scrape timeout {}ms exceeds metric resolution {}ms, cycles end at the next tick",
                self.scrape_timeout_ms,
                self.metric_resolution_ms
            );
        }
        let mut names = HashSet::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.name.is_empty() {
                return Err(ConfigErr::EmptyNodeName { index });
            }
            if !names.insert(node.name.as_str()) {
                return Err(ConfigErr::DuplicateNode {
                    name: node.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Parses `yaml` as if read from `path`.
pub fn parse_config(yaml: &str, path: impl AsRef<Path>) -> ScrapeResult<ScraperConfig> {
    let path = path.as_ref();
    let mut config: ScraperConfig = serde_yaml::from_str(yaml).map_err(|err| ConfigErr::Parse {
        path: path.to_owned(),
        err,
    })?;
    config.file_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    config.validate()?;
    Ok(config)
}

pub fn read_config(file_path: impl AsRef<Path>) -> ScrapeResult<ScraperConfig> {
    let path = file_path.as_ref();
    tracing::info!("reading config {:?}", path);
    let yaml = std::fs::read_to_string(path).map_err(|err| ConfigErr::Read {
        path: path.to_owned(),
        err,
    })?;
    parse_config(&yaml, path)
}
