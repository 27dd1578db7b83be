use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::Mutex;
use prometheus_client::{encoding::text::encode, registry::Registry};
use scraper_derive::LogicalModule;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::m_scrape_manager::ScrapeStatus;
use crate::{
    result::{ScrapeError, ScrapeResult},
    sys::{LogicalModule, LogicalModuleNewArgs},
    util::JoinHandleWrapper,
};

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone)]
struct HttpState {
    registry: Arc<Registry>,
    status: Arc<ScrapeStatus>,
    resolution: Duration,
}

/// Serves scrape telemetry and health probes.
#[derive(LogicalModule)]
pub struct MetricsHttpHandler {
    listen: SocketAddr,
    state: HttpState,
    shutdown: CancellationToken,
    bound: Mutex<Option<SocketAddr>>,
}

#[async_trait]
impl LogicalModule for MetricsHttpHandler {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized,
    {
        Self {
            listen: args.config.listen,
            state: HttpState {
                registry: args.shared.registry.clone(),
                status: args.shared.status.clone(),
                resolution: args.config.metric_resolution(),
            },
            shutdown: args.shutdown.clone(),
            bound: Mutex::new(None),
        }
    }

    async fn start(&self) -> ScrapeResult<Vec<JoinHandleWrapper>> {
        let server = axum::Server::try_bind(&self.listen)
            .map_err(|err| ScrapeError::HttpServe {
                addr: self.listen,
                msg: err.to_string(),
            })?
            .serve(router(self.state.clone()).into_make_service());
        let addr = server.local_addr();
        *self.bound.lock() = Some(addr);
        tracing::info!("http start on {}", addr);

        let shutdown = self.shutdown.clone();
        Ok(vec![JoinHandleWrapper::from(tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            });
            if let Err(err) = graceful.await {
                tracing::error!("http server on {} failed: {}", addr, err);
            }
            tracing::info!("http end on {}", addr);
        }))])
    }
}

impl MetricsHttpHandler {
    /// Address actually bound, known once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/healthz", get(handle_healthz))
        .route("/readyz", get(handle_readyz))
        .with_state(state)
}

async fn handle_metrics(State(state): State<HttpState>) -> Response {
    render_metrics(&state.registry)
}

async fn handle_healthz(State(state): State<HttpState>) -> Response {
    if state.status.is_timely(Instant::now(), state.resolution) {
        (StatusCode::OK, "ok").into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metric collection didn't run recently",
        )
            .into_response()
    }
}

async fn handle_readyz(State(state): State<HttpState>) -> Response {
    if state.status.is_ready() {
        return (StatusCode::OK, "ok").into_response();
    }
    let body = match state.status.last_error() {
        Some(err) => format!("no metrics collected yet, last error: {}", err),
        None => "no metrics collected yet".to_owned(),
    };
    (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
}

pub fn render_metrics(registry: &Registry) -> Response {
    let mut body = String::new();
    tracing::debug!("render metrics");
    if let Err(err) = encode(&mut body, registry) {
        tracing::error!("encode metrics failed: {}", err);
        return (StatusCode::INTERNAL_SERVER_ERROR, "encode metrics failed").into_response();
    }
    let mut resp = (StatusCode::OK, body).into_response();
    let _ = resp.headers_mut().insert(
        "content-type",
        HeaderValue::from_static(OPENMETRICS_CONTENT_TYPE),
    );
    resp
}
