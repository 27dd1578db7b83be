use clap::Parser;

/// Periodically scrapes kubelet summaries and exposes scrape health.
#[derive(Parser, Debug)]
pub struct CmdArgs {
    /// Path of the yaml config file
    pub config_file: String,
}
