use std::{
    fmt::{self, Display},
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::general::{context::DoneReason, node::NodeAddressType};

pub type ScrapeResult<T> = Result<T, ScrapeError>;

#[derive(Error, Debug)]
pub enum ConfigErr {
    #[error("read {path:?} failed: {err}")]
    Read { path: PathBuf, err: std::io::Error },

    #[error("parse {path:?} failed: {err}")]
    Parse { path: PathBuf, err: serde_yaml::Error },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("node #{index} has no name")]
    EmptyNodeName { index: usize },

    #[error("node {name} is listed twice")]
    DuplicateNode { name: String },

    #[error("read bearer token {path:?} failed: {err}")]
    BearerToken { path: PathBuf, err: std::io::Error },
}

/// Why fetching or decoding one node's summary failed.
#[derive(Error, Debug)]
pub enum NodeFetchErr {
    #[error("scrape deadline exceeded")]
    DeadlineExceeded,

    #[error("scrape canceled")]
    Canceled,

    #[error("node has no name")]
    MissingIdentity,

    #[error("node had no addresses that matched types {types:?}")]
    NoUsableAddress { types: Vec<NodeAddressType> },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    BadStatus { status: u16, url: String },

    #[error("decode summary failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid summary: {0}")]
    InvalidSummary(String),

    #[error("summary client panicked: {0}")]
    Panicked(String),
}

impl NodeFetchErr {
    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeFetchErr::DeadlineExceeded)
    }
}

impl From<DoneReason> for NodeFetchErr {
    fn from(reason: DoneReason) -> Self {
        match reason {
            DoneReason::Canceled => NodeFetchErr::Canceled,
            DoneReason::DeadlineExceeded => NodeFetchErr::DeadlineExceeded,
        }
    }
}

#[derive(Error, Debug)]
#[error("unable to fully scrape metrics from node {node}: {cause}")]
pub struct NodeScrapeErr {
    pub node: String,
    #[source]
    pub cause: NodeFetchErr,
}

impl NodeScrapeErr {
    pub fn new(node: impl Into<String>, cause: NodeFetchErr) -> Self {
        Self {
            node: node.into(),
            cause,
        }
    }
}

/// Every node-scoped failure of one scrape cycle. Never empty.
#[derive(Debug)]
pub struct AggregatedError {
    causes: Vec<NodeScrapeErr>,
}

impl AggregatedError {
    pub fn causes(&self) -> &[NodeScrapeErr] {
        &self.causes
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn timed_out_nodes(&self) -> impl Iterator<Item = &str> {
        self.causes
            .iter()
            .filter(|c| c.cause.is_timeout())
            .map(|c| c.node.as_str())
    }
}

impl Display for AggregatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.causes.len() == 1 {
            return write!(f, "{}", self.causes[0]);
        }
        write!(f, "[")?;
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", cause)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregatedError {}

/// Collects node failures from concurrent scrape tasks.
#[derive(Default)]
pub struct ErrorAggregator {
    causes: Mutex<Vec<NodeScrapeErr>>,
    len: AtomicUsize,
}

impl ErrorAggregator {
    pub fn push(&self, err: NodeScrapeErr) {
        let mut causes = self.causes.lock();
        causes.push(err);
        let _ = self.len.fetch_add(1, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    /// Drains what was pushed so far; `None` when nothing failed.
    pub fn take(&self) -> Option<AggregatedError> {
        let mut causes = self.causes.lock();
        self.len.store(0, Ordering::Release);
        if causes.is_empty() {
            return None;
        }
        Some(AggregatedError {
            causes: std::mem::take(&mut *causes),
        })
    }
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("unable to list nodes: {0:#}")]
    ListNodes(anyhow::Error),

    #[error("{0}")]
    Nodes(AggregatedError),

    #[error("Config error: {0}")]
    Config(ConfigErr),

    #[error("Http client error: {0}")]
    HttpClient(reqwest::Error),

    #[error("Http serve on {addr} failed: {msg}")]
    HttpServe { addr: std::net::SocketAddr, msg: String },

    #[error("Io error: {0:?}")]
    Io(std::io::Error),
}

impl ScrapeError {
    /// Node-scoped failures, empty for cycle-level errors.
    pub fn node_errors(&self) -> &[NodeScrapeErr] {
        match self {
            ScrapeError::Nodes(agg) => agg.causes(),
            _ => &[],
        }
    }
}

impl From<ConfigErr> for ScrapeError {
    fn from(e: ConfigErr) -> Self {
        ScrapeError::Config(e)
    }
}

impl From<AggregatedError> for ScrapeError {
    fn from(e: AggregatedError) -> Self {
        ScrapeError::Nodes(e)
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(e: std::io::Error) -> Self {
        ScrapeError::Io(e)
    }
}

pub(crate) fn describe_panic(payload: Box<dyn std::any::Any + Send>, after: Duration) -> String {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    };
    format!("{} (after {:?})", msg, after)
}
