#[cfg(test)]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[cfg(test)]
pub fn test_tracing_start() {
    let my_filter = tracing_subscriber::filter::filter_fn(|v| {
        if let Some(mp) = v.module_path() {
            if mp.contains("hyper") || mp.contains("reqwest") {
                return false;
            }
        }
        v.level() != &tracing::Level::TRACE
    });
    let my_layer = tracing_subscriber::fmt::layer().with_test_writer();
    let _ = tracing_subscriber::registry()
        .with(my_layer.with_filter(my_filter))
        .try_init();
}

/// A module's background task, joined when the process winds down.
pub struct JoinHandleWrapper(Option<tokio::task::JoinHandle<()>>);

impl From<tokio::task::JoinHandle<()>> for JoinHandleWrapper {
    fn from(handle: tokio::task::JoinHandle<()>) -> Self {
        Self(Some(handle))
    }
}

impl JoinHandleWrapper {
    pub async fn join(&mut self) {
        let Some(handle) = self.0.take() else {
            return;
        };
        if let Err(err) = handle.await {
            tracing::warn!("sub task ended abnormally: {}", err);
        }
    }
}
