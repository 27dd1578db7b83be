use std::net::Ipv6Addr;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{
    context::ScrapeContext,
    node::{Node, NodeAddressResolver},
    summary::{Summary, SummaryClient},
};
use crate::{
    config::ScraperConfig,
    result::{ConfigErr, NodeFetchErr, ScrapeError, ScrapeResult},
};

/// Fetches `/stats/summary` from each node's kubelet.
pub struct KubeletClient {
    client: reqwest::Client,
    resolver: NodeAddressResolver,
    scheme: String,
    port: u16,
    bearer_token: Option<String>,
}

impl KubeletClient {
    pub fn new(config: &ScraperConfig) -> ScrapeResult<Self> {
        let bearer_token = match config.bearer_token_path() {
            Some(path) => {
                let token = std::fs::read_to_string(&path)
                    .map_err(|err| ConfigErr::BearerToken { path, err })?;
                Some(token.trim().to_owned())
            }
            None => None,
        };
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.kubelet.insecure_tls)
            .build()
            .map_err(ScrapeError::HttpClient)?;
        Ok(Self {
            client,
            resolver: NodeAddressResolver::new(config.kubelet.preferred_address_types.clone()),
            scheme: config.kubelet.scheme.clone(),
            port: config.kubelet.port,
            bearer_token,
        })
    }

    pub fn summary_url(&self, host: &str, port: u16) -> String {
        let host = if host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]", host)
        } else {
            host.to_owned()
        };
        format!(
            "{}://{}:{}/stats/summary?only_cpu_and_memory=true",
            self.scheme, host, port
        )
    }

    async fn fetch(&self, req: reqwest::RequestBuilder, url: &str) -> Result<Summary, NodeFetchErr> {
        let resp = req.send().await.map_err(map_request_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NodeFetchErr::BadStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }
        let body = resp.bytes().await.map_err(map_request_err)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn map_request_err(err: reqwest::Error) -> NodeFetchErr {
    if err.is_timeout() {
        NodeFetchErr::DeadlineExceeded
    } else {
        NodeFetchErr::Request(err)
    }
}

#[async_trait]
impl SummaryClient for KubeletClient {
    async fn get_summary(&self, ctx: &ScrapeContext, node: &Node) -> Result<Summary, NodeFetchErr> {
        let host = self.resolver.node_address(node)?;
        let url = self.summary_url(host, node.kubelet_port.unwrap_or(self.port));

        let mut req = self.client.get(&url);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }
        if let Some(deadline) = ctx.deadline() {
            req = req.timeout(deadline.saturating_duration_since(Instant::now()));
        }
        tracing::debug!("fetching summary of node {} from {}", node.name, url);

        match ctx.run(self.fetch(req, &url)).await {
            Ok(res) => res,
            Err(reason) => Err(reason.into()),
        }
    }
}
