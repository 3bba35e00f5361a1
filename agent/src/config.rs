use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

const DEFAULT_CRAWLER_LIST_URL: &str =
    "https://raw.githubusercontent.com/monperrus/crawler-user-agents/master/crawler-user-agents.json";

/// Command-line configuration for the relay.
///
/// Mirrors the env/CLI split the teacher workspace uses throughout
/// `mirrord-config` (`FromEnv` sources layered under explicit flags): every
/// flag here also reads from the matching `DROPWIRE_*` environment variable
/// via `clap`'s `env` feature.
#[derive(Parser, Debug, Clone)]
#[command(name = "dropwire", about = "Zero-copy peer-to-peer file relay")]
pub struct Config {
    /// Address to bind the HTTP listener on.
    #[arg(long, env = "DROPWIRE_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Path prefix under which `GET`/`POST <name>` resources are served.
    #[arg(long, env = "DROPWIRE_API_PREFIX", default_value = "/api/")]
    pub api_prefix: String,

    /// Landing page served for `GET /` and for unknown resource names.
    #[arg(long, env = "DROPWIRE_INDEX_HTML", default_value = "index.html")]
    pub index_html: PathBuf,

    /// Favicon served for `GET /favicon.ico`.
    #[arg(long, env = "DROPWIRE_FAVICON", default_value = "favicon.ico")]
    pub favicon: PathBuf,

    /// Source of the crawler user-agent blocklist JSON.
    #[arg(long, env = "DROPWIRE_CRAWLER_LIST_URL", default_value = DEFAULT_CRAWLER_LIST_URL)]
    pub crawler_list_url: String,

    /// Skip fetching the crawler blocklist and allow every user agent.
    #[arg(long, env = "DROPWIRE_NO_CRAWLER_BLOCK", default_value_t = false)]
    pub no_crawler_block: bool,

    /// Maximum bytes the multipart preamble (boundary line + part headers)
    /// may occupy before a request is rejected as Bad-Request. Guards memory
    /// against a client that never sends the header terminator.
    #[arg(long, env = "DROPWIRE_MAX_PREAMBLE_BYTES", default_value_t = 16 * 1024)]
    pub max_preamble_bytes: usize,
}

impl Config {
    pub fn api_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.api_prefix.as_str())
    }
}
