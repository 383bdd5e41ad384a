use crate::Dboe;
use crate::error::Result;
use crate::extract::SyncOptions;
use crate::progress::{ProgressCallback, ProgressUpdate, report};
use crate::tei::{self, Element};
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::task;

/// One `tei:entry` of a dump, ready to be saved as a Beleg.
#[derive(Debug, Clone, PartialEq)]
pub struct TeiEntry {
    pub dboe_id: String,
    pub orig_xml: String,
}

/// Reads a TEI file, transparently inflating `*.gz` dumps.
pub async fn read_tei_file(path: &Path) -> Result<String> {
    let is_gzip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    if !is_gzip {
        return Ok(tokio::fs::read_to_string(path).await?);
    }
    let path: PathBuf = path.to_path_buf();
    let content = task::spawn_blocking(move || -> Result<String> {
        let file = std::fs::File::open(&path)?;
        let mut decoder = GzDecoder::new(file);
        let mut content = String::new();
        decoder.read_to_string(&mut content)?;
        Ok(content)
    })
    .await??;
    Ok(content)
}

/// Parses TEI content and collects its entries using spawn_blocking.
pub async fn parse_entries(xml_content: String) -> Result<Vec<TeiEntry>> {
    debug!("Starting TEI parsing (using spawn_blocking)...");
    let entries = task::spawn_blocking(move || -> Result<Vec<TeiEntry>> {
        let root = tei::parse(&xml_content)?;
        Ok(entries_from_document(&root))
    })
    .await??;
    debug!("Found {} entries in TEI document.", entries.len());
    Ok(entries)
}

/// Every `entry` element carrying an `xml:id`. A root `entry` counts too.
pub fn entries_from_document(root: &Element) -> Vec<TeiEntry> {
    let mut candidates: Vec<&Element> = Vec::new();
    if root.local_name() == "entry" {
        candidates.push(root);
    } else {
        candidates.extend(
            root.descendants()
                .into_iter()
                .filter(|e| e.local_name() == "entry"),
        );
    }

    let mut entries = Vec::with_capacity(candidates.len());
    for element in candidates {
        match element.xml_id() {
            Some(id) => entries.push(TeiEntry {
                dboe_id: id.to_string(),
                orig_xml: element.to_xml(),
            }),
            None => warn!("Skipping entry without xml:id"),
        }
    }
    entries
}

/// Totals of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub saved: u64,
    pub failed: u64,
}

/// Saves every entry of the given TEI files as a Beleg. An entry that fails
/// to save is logged and skipped.
pub async fn import_files(
    dboe: &Dboe,
    paths: &[PathBuf],
    options: SyncOptions,
    mut progress: Option<ProgressCallback>,
) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    for path in paths {
        info!("Importing {:?}", path);
        let entries = parse_entries(read_tei_file(path).await?).await?;
        let stage = format!("Importing {}", path.display());
        let total = entries.len() as u64;
        report(&mut progress, ProgressUpdate::new_stage(stage.clone(), Some(total)));

        let dboe = dboe.clone();
        let (file_stats, callback) = task::spawn_blocking(move || {
            let mut stats = ImportStats::default();
            for (i, entry) in entries.into_iter().enumerate() {
                match dboe.save_beleg(&entry.dboe_id, Some(entry.orig_xml), options) {
                    Ok(_) => stats.saved += 1,
                    Err(e) => {
                        warn!("Failed to save Beleg {}: {}", entry.dboe_id, e);
                        stats.failed += 1;
                    }
                }
                let update = ProgressUpdate::item(
                    stage.as_str(),
                    i as u64 + 1,
                    Some(total),
                    Some(entry.dboe_id),
                );
                if !report(&mut progress, update) {
                    warn!("Import cancelled");
                    break;
                }
            }
            (stats, progress)
        })
        .await?;
        progress = callback;
        stats.saved += file_stats.saved;
        stats.failed += file_stats.failed;
    }
    info!("Import finished: {} saved, {} failed", stats.saved, stats.failed);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    const DUMP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <text><body>
    <entry xml:id="b1"><form type="hauptlemma"><orth>Haus</orth></form></entry>
    <entry><form type="hauptlemma"><orth>ohne id</orth></form></entry>
    <entry xml:id="b2"><form type="hauptlemma"><orth>Hof</orth></form></entry>
  </body></text>
</TEI>"#;

    #[tokio::test]
    async fn test_parse_entries_skips_entries_without_id() {
        let entries = parse_entries(DUMP.to_string()).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.dboe_id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2"]);
        // Subtrees stay namespaced so they can be re-parsed on their own
        let reparsed = tei::parse(&entries[1].orig_xml).unwrap();
        assert_eq!(
            reparsed
                .xpath_first_string("./tei:form[@type='hauptlemma']/tei:orth")
                .unwrap()
                .as_deref(),
            Some("Hof")
        );
    }

    #[tokio::test]
    async fn test_single_entry_document() {
        let xml = r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="solo"/>"#;
        let entries = parse_entries(xml.to_string()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dboe_id, "solo");
    }

    #[tokio::test]
    async fn test_read_gzipped_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.xml.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(DUMP.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let content = read_tei_file(&path).await.unwrap();
        assert_eq!(content, DUMP);
    }

    #[tokio::test]
    async fn test_import_files_saves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.xml");
        std::fs::write(&path, DUMP).unwrap();
        let dboe = Dboe::open_in_memory().unwrap();

        let stats = import_files(&dboe, &[path], SyncOptions::all(), None)
            .await
            .unwrap();
        assert_eq!(stats, ImportStats { saved: 2, failed: 0 });
        assert_eq!(dboe.beleg_ids().unwrap(), vec!["b1", "b2"]);
        assert_eq!(dboe.get_beleg("b2").unwrap().hauptlemma.as_deref(), Some("Hof"));
    }

    #[tokio::test]
    async fn test_malformed_xml_is_an_error() {
        assert!(parse_entries("<TEI><entry></TEI>".to_string()).await.is_err());
    }
}
