//! Crawler user-agent blocklist (spec §6 "External JSON fetch").
//!
//! Not part of the ~1,100-line core (spec.md §1 lists it among the external
//! collaborators the core only depends on abstractly), but still carried in
//! the teacher's own idiom: `reqwest` + `serde_json`, the same combination
//! `mirrord/config/src/incoming.rs` and the broader `t4lz-mirrord` workspace
//! reach for whenever they need a typed fetch.

use std::collections::HashSet;

use serde::Deserialize;

#[derive(Deserialize)]
struct CrawlerEntry {
    #[allow(dead_code)]
    pattern: String,
    instances: Vec<String>,
}

/// A loaded set of exact user-agent strings known to belong to crawlers.
#[derive(Debug, Default, Clone)]
pub struct CrawlerBlocklist {
    instances: HashSet<String>,
}

impl CrawlerBlocklist {
    /// An empty blocklist — used when the operator passes
    /// `--no-crawler-block`.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Fetches and parses the blocklist from `url`. Spec §6 treats a fetch
    /// failure as fatal to startup; this returns `Err` for the caller to
    /// propagate as a nonzero exit code.
    pub async fn fetch(url: &str) -> Result<Self, reqwest::Error> {
        let entries: Vec<CrawlerEntry> = reqwest::get(url).await?.json().await?;
        let instances = entries
            .into_iter()
            .flat_map(|entry| entry.instances)
            .collect();
        Ok(Self { instances })
    }

    pub fn is_blocked(&self, user_agent: &str) -> bool {
        self.instances.contains(user_agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_blocklist_blocks_nothing() {
        let blocklist = CrawlerBlocklist::disabled();
        assert!(!blocklist.is_blocked("Googlebot/2.1"));
    }

    #[test]
    fn populated_blocklist_blocks_known_instances() {
        let blocklist = CrawlerBlocklist {
            instances: HashSet::from(["Googlebot/2.1".to_string()]),
        };
        assert!(blocklist.is_blocked("Googlebot/2.1"));
        assert!(!blocklist.is_blocked("Mozilla/5.0"));
    }
}
