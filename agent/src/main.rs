//! Process bootstrap (SPEC_FULL.md component G/H/I/J): parse CLI/env config,
//! init structured logging, fetch the crawler blocklist, bind the listener
//! and run the accept loop until a shutdown signal arrives.

mod config;
mod error;
mod multipart;
mod pending;
mod registry;
mod relay;
mod request_head;
mod response;
mod router;
mod server;
mod useragent;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use crate::config::Config;
use crate::registry::Registry;
use crate::router::Server;
use crate::useragent::CrawlerBlocklist;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let config = Config::parse();

    let blocklist = if config.no_crawler_block {
        CrawlerBlocklist::disabled()
    } else {
        match CrawlerBlocklist::fetch(&config.crawler_list_url).await {
            Ok(blocklist) => blocklist,
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch crawler blocklist");
                return ExitCode::FAILURE;
            }
        }
    };

    let server = Arc::new(Server {
        config: Arc::new(config.clone()),
        registry: Arc::new(Registry::new()),
        blocklist: Arc::new(blocklist),
    });

    match crate::server::run(config.bind, server).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with an error");
            ExitCode::FAILURE
        }
    }
}
