#![allow(clippy::all)]
#![deny(
    unused_variables,
    unused_mut,
    unused_attributes,
    clippy::unnecessary_mut_passed,
    unused_results,
    clippy::let_underscore_future,
    unused_must_use,
    unconditional_recursion,
    dead_code
)]

use clap::Parser;
use cmd_arg::CmdArgs;
use sys::Sys;
use tracing::Level;
use tracing_subscriber::{
    prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, Layer,
};

pub mod cmd_arg;
pub mod config;
pub mod general;
pub mod master;
pub mod result;
pub mod sys;
pub mod util;

#[tokio::main]
async fn main() {
    start_tracing();
    let args = CmdArgs::parse();
    let config = config::read_config(&args.config_file)
        .unwrap_or_else(|err| panic!("load config {} failed, err: {}", args.config_file, err));
    tracing::info!("config: {:?}", config);
    let sys = Sys::new(config).unwrap_or_else(|err| panic!("build sys failed, err: {}", err));
    if let Err(err) = sys.wait_for_end().await {
        tracing::error!("sys stopped with error: {}", err);
    }
}

pub fn start_tracing() {
    let my_filter = tracing_subscriber::filter::filter_fn(|v| {
        if let Some(mp) = v.module_path() {
            if mp.contains("hyper") {
                return false;
            }
            if *v.level() == Level::DEBUG && mp.contains("reqwest") {
                return false;
            }
        }
        v.level() != &tracing::Level::TRACE
    });
    let my_layer = tracing_subscriber::fmt::layer();
    let _ = tracing_subscriber::registry()
        .with(my_layer.with_filter(my_filter))
        .try_init();
}
