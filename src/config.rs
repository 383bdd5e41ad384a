//! Runtime settings shared by every subcommand.
//!
//! Each value can come from a command line flag or from the environment.

use crate::search::SearchClient;
use crate::{Dboe, OpenOptions, Result};
use clap::Args;
use std::path::PathBuf;

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_OPENSEARCH_INDEX: &str = "dboe-belege";
/// Index name of the external DBÖ search index.
pub const DBOE_QUERY_INDEX: &str = "dboe";

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Optional path to the database file
    #[arg(long, global = true, env = "DBOE_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Address the API server binds to
    #[arg(long, global = true, env = "DBOE_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// OpenSearch base URL; indexing is disabled when unset
    #[arg(long, global = true, env = "OPENSEARCH_URL")]
    pub opensearch_url: Option<String>,

    /// OpenSearch index receiving the Beleg documents
    #[arg(long, global = true, env = "OPENSEARCH_INDEX", default_value = DEFAULT_OPENSEARCH_INDEX)]
    pub opensearch_index: String,

    /// Search endpoint backing the dboe-query routes
    #[arg(long, global = true, env = "ES_DBOE")]
    pub es_dboe_url: Option<String>,

    /// Log row counts and timings of list queries
    #[arg(long, global = true, env = "DEBUG")]
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: None,
            bind: DEFAULT_BIND.to_string(),
            opensearch_url: None,
            opensearch_index: DEFAULT_OPENSEARCH_INDEX.to_string(),
            es_dboe_url: None,
            debug: false,
        }
    }
}

impl Settings {
    pub fn open_options(&self, force_reload: bool) -> OpenOptions {
        OpenOptions {
            db_path: self.db_path.clone(),
            force_reload,
        }
    }

    pub fn open_store(&self) -> Result<Dboe> {
        Dboe::open_with_options(self.open_options(false))
    }

    /// Client for the index the Belege are written to.
    pub fn index_client(&self) -> Option<SearchClient> {
        self.opensearch_url
            .as_deref()
            .map(|url| SearchClient::new(url, &self.opensearch_index))
    }

    /// Client for the external index queried by the dboe-query routes.
    pub fn query_client(&self) -> Option<SearchClient> {
        self.es_dboe_url
            .as_deref()
            .map(|url| SearchClient::new(url, DBOE_QUERY_INDEX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clients_follow_configured_urls() {
        let mut settings = Settings::default();
        assert!(settings.index_client().is_none());
        assert!(settings.query_client().is_none());

        settings.opensearch_url = Some("http://localhost:9200/".into());
        settings.es_dboe_url = Some("http://search.example".into());
        let index = settings.index_client().unwrap();
        assert_eq!(index.index(), DEFAULT_OPENSEARCH_INDEX);
        assert_eq!(settings.query_client().unwrap().index(), DBOE_QUERY_INDEX);
    }
}
