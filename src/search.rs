//! Client for the OpenSearch/Elasticsearch indices and the bulk indexing job.

use crate::Dboe;
use crate::error::{DboeError, Result};
use crate::progress::{ProgressCallback, ProgressUpdate, report};
use crate::representation::{BelegBundle, sanitize_representation};
use log::{debug, info, warn};
use serde_json::{Map, Value, json};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_BATCH_SIZE: usize = 1500;

/// A search index reachable over HTTP.
#[derive(Debug, Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
    index: String,
}

/// Outcome of a bulk request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub indexed: usize,
    pub failed: usize,
}

impl SearchClient {
    pub fn new(base_url: &str, index: &str) -> Self {
        SearchClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Stores one document under `id`, refreshing the index.
    pub async fn index_document(&self, id: &str, document: &Map<String, Value>) -> Result<()> {
        let url = self.url(&format!("{}/_doc/{}?refresh=true", self.index, id));
        debug!("Indexing {} into {}", id, self.index);
        self.http
            .put(url)
            .json(document)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Sends the documents through `_bulk`; each document's `id` key is its
    /// index id.
    pub async fn bulk_index(&self, documents: &[Map<String, Value>]) -> Result<BulkOutcome> {
        if documents.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let body = bulk_body(&self.index, documents)?;
        let response: Value = self
            .http
            .post(self.url("_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let failed = response["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item["index"]["error"].is_object())
                    .count()
            })
            .unwrap_or(0);
        Ok(BulkOutcome {
            indexed: documents.len() - failed.min(documents.len()),
            failed,
        })
    }

    async fn search(&self, query: Value) -> Result<Value> {
        let count: Value = self
            .http
            .post(self.url(&format!("{}/_count", self.index)))
            .json(&json!({ "query": query }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let size = count["count"].as_u64().unwrap_or(0);
        let results = self
            .http
            .post(self.url(&format!("{}/_search", self.index)))
            .json(&json!({ "query": query, "size": size }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(results)
    }

    /// Every hit of a match over all fields.
    pub async fn search_all(&self, q: &str) -> Result<Value> {
        self.search(json!({ "multi_match": { "query": q, "fields": ["*"] } }))
            .await
    }

    /// `_source` of the document stored under `id`.
    pub async fn by_id(&self, id: &str) -> Result<Value> {
        let mut results = self.search(json!({ "ids": { "values": [id] } })).await?;
        match results.pointer_mut("/hits/hits/0/_source") {
            Some(source) => Ok(source.take()),
            None => Err(DboeError::not_found("Document", id)),
        }
    }
}

/// NDJSON body of a `_bulk` request indexing `documents`.
pub fn bulk_body(index: &str, documents: &[Map<String, Value>]) -> Result<String> {
    let mut body = String::new();
    for document in documents {
        let id = document.get("id").cloned().unwrap_or(Value::Null);
        let action = json!({ "index": { "_index": index, "_id": id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
    }
    Ok(body)
}

/// Pushes the document of one Beleg to the index.
pub async fn index_bundle(client: &SearchClient, bundle: &BelegBundle) -> Result<()> {
    let document = sanitize_representation(bundle);
    client.index_document(&bundle.beleg.dboe_id, &document).await
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub processed: usize,
    pub indexed: usize,
    pub failed: usize,
    pub files: Vec<PathBuf>,
}

fn dump_batch(dir: &Path, processed: usize, documents: &[Map<String, Value>]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("belege_{:05}.json", processed));
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer(&mut writer, documents)?;
    writer.flush()?;
    info!("Wrote {} records to {:?}", documents.len(), path);
    Ok(path)
}

/// Indexes every Beleg in batches of `batch_size`, ordered by id.
///
/// Without a client the batches are only dumped; without both there is
/// nothing to do and `SearchNotConfigured` is returned.
pub async fn index_all(
    dboe: &Dboe,
    client: Option<&SearchClient>,
    batch_size: usize,
    dump_dir: Option<&Path>,
    mut progress: Option<ProgressCallback>,
) -> Result<IndexSummary> {
    if batch_size == 0 {
        return Err(DboeError::InvalidArgument(
            "batch-size must be a positive integer".into(),
        ));
    }
    if client.is_none() && dump_dir.is_none() {
        return Err(DboeError::SearchNotConfigured);
    }
    let total = dboe.count_belege()?;
    let stage = "Indexing Belege";
    report(&mut progress, ProgressUpdate::new_stage(stage, Some(total)));

    let mut summary = IndexSummary::default();
    let mut after: Option<String> = None;
    loop {
        let belege = dboe.belege_page(after.as_deref(), batch_size)?;
        let Some(last) = belege.last() else {
            break;
        };
        after = Some(last.dboe_id.clone());
        let documents: Vec<Map<String, Value>> = dboe
            .beleg_bundles(belege)?
            .iter()
            .map(sanitize_representation)
            .collect();
        summary.processed += documents.len();

        if let Some(client) = client {
            let outcome = client.bulk_index(&documents).await?;
            if outcome.failed > 0 {
                warn!("{} documents failed to index", outcome.failed);
            }
            summary.indexed += outcome.indexed;
            summary.failed += outcome.failed;
        }
        if let Some(dir) = dump_dir {
            summary.files.push(dump_batch(dir, summary.processed, &documents)?);
        }

        let keep_going = report(
            &mut progress,
            ProgressUpdate::item(stage, summary.processed as u64, Some(total), after.clone()),
        );
        if !keep_going {
            warn!("Indexing cancelled after {} records", summary.processed);
            break;
        }
    }
    info!(
        "Indexing finished: {} processed, {} indexed, {} failed",
        summary.processed, summary.indexed, summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncOptions;

    #[test]
    fn test_bulk_body_is_ndjson() {
        let mut doc = Map::new();
        doc.insert("id".into(), json!("b1"));
        doc.insert("hl".into(), json!("Haus"));
        let body = bulk_body("dboe-belege", &[doc]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "dboe-belege");
        assert_eq!(action["index"]["_id"], "b1");
        let source: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source["hl"], "Haus");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = SearchClient::new("http://localhost:9200/", "dboe");
        assert_eq!(client.url("_bulk"), "http://localhost:9200/_bulk");
        assert_eq!(client.index(), "dboe");
    }

    #[tokio::test]
    async fn test_index_all_dumps_batches() {
        let dboe = Dboe::open_in_memory().unwrap();
        for id in ["b1", "b2", "b3"] {
            dboe.save_beleg(id, None, SyncOptions::none()).unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let summary = index_all(&dboe, None, 2, Some(dir.path()), None)
            .await
            .unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.indexed, 0);
        let names: Vec<String> = summary
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["belege_00002.json", "belege_00003.json"]);

        let last: Vec<Value> =
            serde_json::from_reader(File::open(&summary.files[1]).unwrap()).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0]["id"], "b3");
    }

    #[tokio::test]
    async fn test_index_all_rejects_bad_input() {
        let dboe = Dboe::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            index_all(&dboe, None, 0, Some(dir.path()), None).await,
            Err(DboeError::InvalidArgument(_))
        ));
        assert!(matches!(
            index_all(&dboe, None, 10, None, None).await,
            Err(DboeError::SearchNotConfigured)
        ));
    }
}
