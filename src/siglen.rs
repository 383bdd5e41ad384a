//! Place authority records ("Siglen") and their links to Belege.

use crate::db::{
    ensure_key, enum_column, json_column, optional_json_column, require, select_where,
    to_json_text,
};
use crate::error::{DboeError, Result};
use crate::filters::{Filter, Params, QueryParams};
use crate::models::{BelegSigle, Sigle, SigleKind};
use crate::progress::{ProgressCallback, ProgressUpdate, report};
use crate::representation::PlaceRef;
use crate::tei::{self, Element};
use crate::Dboe;
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use std::collections::BTreeMap;

const SIGLE_COLUMNS: &str =
    "t.sigle, t.name, t.orig_names, t.kind, t.coordinates, t.geonames, t.bl, t.gr, t.kr";

fn row_to_sigle(row: &Row<'_>) -> rusqlite::Result<Sigle> {
    Ok(Sigle {
        sigle: row.get(0)?,
        name: row.get(1)?,
        orig_names: json_column(row, 2)?,
        kind: enum_column(row, 3)?,
        coordinates: optional_json_column(row, 4)?,
        geonames: row.get(5)?,
        bl: row.get(6)?,
        gr: row.get(7)?,
        kr: row.get(8)?,
    })
}

fn row_to_beleg_sigle(row: &Row<'_>) -> rusqlite::Result<BelegSigle> {
    Ok(BelegSigle {
        id: row.get(0)?,
        beleg: row.get(1)?,
        sigle: row.get(2)?,
        corresp: row.get(3)?,
        resp: row.get(4)?,
    })
}

fn fetch_sigle(conn: &Connection, sigle: &str) -> Result<Option<Sigle>> {
    let sql = format!("SELECT {} FROM siglen t WHERE t.sigle = ?1", SIGLE_COLUMNS);
    Ok(conn.query_row(&sql, params![sigle], row_to_sigle).optional()?)
}

fn upsert_sigle(conn: &Connection, sigle: &mut Sigle) -> Result<()> {
    sigle.dedup_orig_names();
    let coordinates = sigle.coordinates.as_ref().map(to_json_text).transpose()?;
    conn.execute(
        "INSERT INTO siglen (sigle, name, orig_names, kind, coordinates, geonames, bl, gr, kr)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(sigle) DO UPDATE SET
            name = excluded.name, orig_names = excluded.orig_names, kind = excluded.kind,
            coordinates = excluded.coordinates, geonames = excluded.geonames,
            bl = excluded.bl, gr = excluded.gr, kr = excluded.kr",
        params![
            sigle.sigle,
            sigle.name,
            to_json_text(&sigle.orig_names)?,
            sigle.kind.as_str(),
            coordinates,
            sigle.geonames,
            sigle.bl,
            sigle.gr,
            sigle.kr,
        ],
    )?;
    Ok(())
}

fn check_parents(conn: &Connection, sigle: &Sigle) -> Result<()> {
    for parent in [&sigle.bl, &sigle.gr, &sigle.kr].into_iter().flatten() {
        if fetch_sigle(conn, parent)?.is_none() {
            return Err(DboeError::InvalidArgument(format!(
                "Invalid pk \"{}\" - object does not exist.",
                parent
            )));
        }
    }
    Ok(())
}

/// Places linked to a Beleg, parents rendered as `"{sigle} {name}"`.
pub(crate) fn places_for_beleg(conn: &Connection, beleg_id: &str) -> Result<Vec<PlaceRef>> {
    let mut stmt = conn.prepare(
        "SELECT s.sigle, s.name, s.orig_names,
                bl.sigle || ' ' || bl.name, gr.sigle || ' ' || gr.name, kr.sigle || ' ' || kr.name
         FROM beleg_siglen bs
         JOIN siglen s ON s.sigle = bs.sigle_id
         LEFT JOIN siglen bl ON bl.sigle = s.bl
         LEFT JOIN siglen gr ON gr.sigle = s.gr
         LEFT JOIN siglen kr ON kr.sigle = s.kr
         WHERE bs.beleg_id = ?1
         ORDER BY s.sigle, bs.id",
    )?;
    let rows = stmt.query_map(params![beleg_id], |row| {
        Ok(PlaceRef {
            sigle: row.get(0)?,
            name: row.get(1)?,
            orig_names: json_column(row, 2)?,
            bl: row.get(3)?,
            gr: row.get(4)?,
            kr: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// One `tei:usg[@type='geo']` of a Beleg.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoUsage {
    pub sigle: String,
    pub name: String,
    pub orig_names: Vec<String>,
    pub corresp: Option<String>,
}

/// Geographic usages of an entry. The sigle is the `listPlace/@corresp`
/// after its last `sigle:` prefix, or the whole value without one; usages
/// without a `listPlace/@corresp` are skipped.
pub fn geo_usages(doc: &Element) -> Result<Vec<GeoUsage>> {
    let mut out = Vec::new();
    for node in doc.xpath(".//tei:usg[@type='geo']")? {
        let Some(usg) = node.as_element() else {
            continue;
        };
        let sigle = usg
            .xpath_first_string(".//tei:listPlace/@corresp")?
            .and_then(|c| c.rsplit("sigle:").next().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty());
        let Some(sigle) = sigle else {
            debug!("Skipping usg without sigle reference in {:?}", doc.xml_id());
            continue;
        };
        let name = usg
            .xpath(".//tei:placeName")?
            .last()
            .map(|n| n.string_value().trim().to_string())
            .unwrap_or_default();
        let orig_names = usg
            .xpath(".//tei:placeName[@type='orig']")?
            .iter()
            .map(|n| n.string_value().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        out.push(GeoUsage {
            sigle,
            name,
            orig_names,
            corresp: usg.attr("corresp").map(str::to_string),
        });
    }
    Ok(out)
}

fn link_usage(conn: &Connection, beleg_id: &str, usage: &GeoUsage) -> Result<()> {
    let mut sigle = match fetch_sigle(conn, &usage.sigle)? {
        Some(s) => s,
        None => {
            info!("Creating Sigle {} ({})", usage.sigle, usage.name);
            Sigle::new(usage.sigle.clone(), usage.name.clone(), SigleKind::Ort)
        }
    };
    sigle.orig_names.extend(usage.orig_names.iter().cloned());
    upsert_sigle(conn, &mut sigle)?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM beleg_siglen
             WHERE beleg_id = ?1 AND sigle_id = ?2 AND corresp IS ?3",
            params![beleg_id, sigle.sigle, usage.corresp],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        conn.execute(
            "INSERT INTO beleg_siglen (beleg_id, sigle_id, corresp) VALUES (?1, ?2, ?3)",
            params![beleg_id, sigle.sigle, usage.corresp],
        )?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PlaceLevel {
    #[serde(default)]
    idno: Option<String>,
    #[serde(default)]
    label: Option<String>,
}

impl PlaceLevel {
    fn idno(&self) -> Option<&str> {
        self.idno.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct PlaceRecord {
    #[serde(rename = "Bundesland")]
    bundesland: PlaceLevel,
    #[serde(rename = "Großregion")]
    grossregion: PlaceLevel,
    #[serde(rename = "Kleinregion")]
    kleinregion: PlaceLevel,
    #[serde(rename = "Ort")]
    ort: PlaceLevel,
}

impl PlaceRecord {
    fn levels(&self) -> [(&PlaceLevel, SigleKind); 4] {
        [
            (&self.bundesland, SigleKind::Bl),
            (&self.grossregion, SigleKind::Gr),
            (&self.kleinregion, SigleKind::Kr),
            (&self.ort, SigleKind::Ort),
        ]
    }
}

/// The sigle of `level` if that row exists.
fn existing(conn: &Connection, level: &PlaceLevel) -> Result<Option<String>> {
    match level.idno() {
        Some(idno) => Ok(fetch_sigle(conn, idno)?.map(|s| s.sigle)),
        None => Ok(None),
    }
}

fn set_parents(
    conn: &Connection,
    sigle: &str,
    bl: Option<String>,
    gr: Option<String>,
    kr: Option<Option<String>>,
) -> Result<()> {
    match kr {
        Some(kr) => conn.execute(
            "UPDATE siglen SET bl = ?1, gr = ?2, kr = ?3 WHERE sigle = ?4",
            params![bl, gr, kr, sigle],
        )?,
        None => conn.execute(
            "UPDATE siglen SET bl = ?1, gr = ?2 WHERE sigle = ?3",
            params![bl, gr, sigle],
        )?,
    };
    Ok(())
}

/// Counts reported by [`Dboe::import_places`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: u64,
    pub linked: u64,
}

impl Dboe {
    // --- Siglen ---

    pub fn list_siglen(&self, query: &QueryParams) -> Result<Vec<Sigle>> {
        let params = Params(query);
        let mut filter = Filter::default();
        if let Some(sigle) = params.get("sigle") {
            filter.exact("t.sigle", sigle.to_string());
        }
        if let Some(prefix) = params.get("sigle_startswith") {
            filter.startswith("t.sigle", prefix);
        }
        if let Some(name) = params.get("name") {
            filter.icontains("t.name", name);
        }
        let kinds = params.all("kind");
        if !kinds.is_empty() {
            for kind in &kinds {
                kind.parse::<SigleKind>().map_err(DboeError::InvalidArgument)?;
            }
            filter.in_list("t.kind", kinds.into_iter().map(str::to_string).collect());
        }
        let conn = self.lock()?;
        select_where(
            &conn,
            &format!("SELECT {} FROM siglen t", SIGLE_COLUMNS),
            &filter,
            "t.sigle",
            row_to_sigle,
        )
    }

    pub fn get_sigle(&self, sigle: &str) -> Result<Sigle> {
        let conn = self.lock()?;
        require(fetch_sigle(&conn, sigle)?, "Sigle", sigle)
    }

    pub fn create_sigle(&self, mut sigle: Sigle) -> Result<Sigle> {
        let conn = self.lock()?;
        if fetch_sigle(&conn, &sigle.sigle)?.is_some() {
            return Err(DboeError::Conflict(format!(
                "Sigle with this Sigle already exists: {}",
                sigle.sigle
            )));
        }
        check_parents(&conn, &sigle)?;
        upsert_sigle(&conn, &mut sigle)?;
        Ok(sigle)
    }

    /// Replaces the stored record; the key in the path wins over the body.
    pub fn update_sigle(&self, key: &str, mut sigle: Sigle) -> Result<Sigle> {
        let conn = self.lock()?;
        require(fetch_sigle(&conn, key)?, "Sigle", key)?;
        sigle.sigle = key.to_string();
        check_parents(&conn, &sigle)?;
        upsert_sigle(&conn, &mut sigle)?;
        Ok(sigle)
    }

    pub fn delete_sigle(&self, sigle: &str) -> Result<()> {
        let conn = self.lock()?;
        if conn.execute("DELETE FROM siglen WHERE sigle = ?1", params![sigle])? == 0 {
            return Err(DboeError::not_found("Sigle", sigle));
        }
        Ok(())
    }

    // --- Beleg <-> Sigle ---

    pub fn list_beleg_siglen(&self, query: &QueryParams) -> Result<Vec<BelegSigle>> {
        let params = Params(query);
        let mut filter = Filter::default();
        if let Some(beleg) = params.get("beleg__dboe_id") {
            filter.exact("t.beleg_id", beleg.to_string());
        }
        if let Some(sigle) = params.get("sigle__sigle") {
            filter.exact("t.sigle_id", sigle.to_string());
        }
        let conn = self.lock()?;
        select_where(
            &conn,
            "SELECT t.id, t.beleg_id, t.sigle_id, t.corresp, t.resp FROM beleg_siglen t",
            &filter,
            "t.sigle_id, t.id",
            row_to_beleg_sigle,
        )
    }

    pub fn get_beleg_sigle(&self, id: i64) -> Result<BelegSigle> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT id, beleg_id, sigle_id, corresp, resp FROM beleg_siglen WHERE id = ?1",
                params![id],
                row_to_beleg_sigle,
            )
            .optional()?;
        require(found, "BelegSigle", id)
    }

    pub fn save_beleg_sigle(&self, link: BelegSigle) -> Result<BelegSigle> {
        let id = {
            let conn = self.lock()?;
            ensure_key(&conn, "belege", "dboe_id", &link.beleg)?;
            ensure_key(&conn, "siglen", "sigle", &link.sigle)?;
            if link.id > 0 {
                let n = conn.execute(
                    "UPDATE beleg_siglen SET beleg_id = ?1, sigle_id = ?2, corresp = ?3, resp = ?4
                     WHERE id = ?5",
                    params![link.beleg, link.sigle, link.corresp, link.resp, link.id],
                )?;
                if n == 0 {
                    return Err(DboeError::not_found("BelegSigle", link.id));
                }
                link.id
            } else {
                conn.execute(
                    "INSERT INTO beleg_siglen (beleg_id, sigle_id, corresp, resp)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![link.beleg, link.sigle, link.corresp, link.resp],
                )?;
                conn.last_insert_rowid()
            }
        };
        self.get_beleg_sigle(id)
    }

    pub fn delete_beleg_sigle(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        if conn.execute("DELETE FROM beleg_siglen WHERE id = ?1", params![id])? == 0 {
            return Err(DboeError::not_found("BelegSigle", id));
        }
        Ok(())
    }

    pub fn places_for_beleg(&self, beleg_id: &str) -> Result<Vec<PlaceRef>> {
        let conn = self.lock()?;
        places_for_beleg(&conn, beleg_id)
    }

    // --- Bulk jobs ---

    /// Links every Beleg to the places named in its `tei:usg[@type='geo']`
    /// elements, creating unknown siglen as `ort`. Returns the number of
    /// Belege processed.
    pub fn link_places(&self, mut progress: Option<ProgressCallback>) -> Result<u64> {
        const STAGE: &str = "Linking places";
        let ids = self.beleg_ids()?;
        let total = ids.len() as u64;
        report(&mut progress, ProgressUpdate::new_stage(STAGE, Some(total)));

        let mut done = 0;
        for id in ids {
            let xml: Option<String> = {
                let conn = self.lock()?;
                conn.query_row(
                    "SELECT orig_xml FROM belege WHERE dboe_id = ?1",
                    params![id],
                    |row| row.get(0),
                )?
            };
            if let Some(xml) = xml {
                match tei::parse(&xml).and_then(|doc| geo_usages(&doc)) {
                    Ok(usages) => {
                        let mut conn = self.lock()?;
                        let tx = conn.transaction()?;
                        for usage in &usages {
                            if let Err(e) = link_usage(&tx, &id, usage) {
                                warn!("Error linking {} to Sigle {}: {}", id, usage.sigle, e);
                            }
                        }
                        tx.commit()?;
                    }
                    Err(e) => warn!("Cannot read places of {}: {}", id, e),
                }
            }
            done += 1;
            if !report(
                &mut progress,
                ProgressUpdate::item(STAGE, done, Some(total), Some(id)),
            ) {
                info!("Place linking cancelled after {} Belege", done);
                break;
            }
        }
        Ok(done)
    }

    /// Imports the place hierarchy from a JSON object of
    /// `{"Bundesland": {idno, label}, "Großregion": ..., "Kleinregion": ..., "Ort": ...}`
    /// records. Rows are get-or-created first, then linked to their parents.
    pub fn import_places(
        &self,
        json: &str,
        mut progress: Option<ProgressCallback>,
    ) -> Result<ImportSummary> {
        let data: BTreeMap<String, PlaceRecord> = serde_json::from_str(json)?;
        let total = data.len() as u64;
        let mut summary = ImportSummary::default();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        report(&mut progress, ProgressUpdate::new_stage("Creating siglen", Some(total)));
        for (i, record) in data.values().enumerate() {
            for (level, kind) in record.levels() {
                let Some(idno) = level.idno() else {
                    continue;
                };
                if fetch_sigle(&tx, idno)?.is_some() {
                    continue;
                }
                let mut sigle = Sigle::new(idno, level.label.clone().unwrap_or_default(), kind);
                match upsert_sigle(&tx, &mut sigle) {
                    Ok(()) => summary.created += 1,
                    Err(e) => warn!("Error creating Sigle {}: {}", idno, e),
                }
            }
            report(
                &mut progress,
                ProgressUpdate::item("Creating siglen", i as u64 + 1, Some(total), None),
            );
        }

        report(&mut progress, ProgressUpdate::new_stage("Linking hierarchy", Some(total)));
        for (i, record) in data.values().enumerate() {
            let bl = existing(&tx, &record.bundesland)?;
            let gr = existing(&tx, &record.grossregion)?;
            if let Some(ort) = record.ort.idno() {
                if fetch_sigle(&tx, ort)?.is_some() {
                    let kr = existing(&tx, &record.kleinregion)?;
                    set_parents(&tx, ort, bl.clone(), gr.clone(), Some(kr))?;
                    summary.linked += 1;
                } else {
                    warn!("Ort Sigle does not exist: {}", ort);
                }
            }
            if let Some(kr) = record.kleinregion.idno() {
                set_parents(&tx, kr, bl.clone(), gr.clone(), None)?;
                summary.linked += 1;
            }
            if let Some(gr_id) = record.grossregion.idno() {
                tx.execute(
                    "UPDATE siglen SET bl = ?1 WHERE sigle = ?2",
                    params![bl, gr_id],
                )?;
                summary.linked += 1;
            }
            report(
                &mut progress,
                ProgressUpdate::item("Linking hierarchy", i as u64 + 1, Some(total), None),
            );
        }
        tx.commit()?;
        info!(
            "Imported places: {} siglen created, {} links set",
            summary.created, summary.linked
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncOptions;

    const PLACES: &str = r#"{
        "1": {
            "Bundesland": {"idno": "1", "label": "Wien"},
            "Großregion": {"idno": "1A", "label": "Wien Stadt"},
            "Kleinregion": {"idno": "", "label": ""},
            "Ort": {"idno": "1A01", "label": "Wien"}
        },
        "2": {
            "Bundesland": {"idno": "1", "label": "Wien"},
            "Großregion": {"idno": "1A", "label": "Wien Stadt"},
            "Kleinregion": {"idno": "1A.a", "label": "Innere Stadt"},
            "Ort": {"idno": "1A.a01", "label": "Freyung"}
        }
    }"#;

    const ENTRY: &str = r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="b1">
  <form type="hauptlemma"><orth>Haus</orth></form>
  <usg type="geo" corresp="this:LT1">
    <listPlace corresp="sigle:1A01"><place><placeName type="orig">Wean</placeName><placeName>Wien</placeName></place></listPlace>
  </usg>
  <usg type="geo"><listPlace corresp="sigle:9Z99"><place><placeName>Neuhausen</placeName></place></listPlace></usg>
  <usg type="geo"><listPlace><place><placeName>ohne Sigle</placeName></place></listPlace></usg>
</entry>"#;

    fn store_with_places() -> Dboe {
        let dboe = Dboe::open_in_memory().unwrap();
        dboe.import_places(PLACES, None).unwrap();
        dboe
    }

    #[test]
    fn test_import_places_builds_hierarchy() {
        let dboe = store_with_places();
        let ort = dboe.get_sigle("1A.a01").unwrap();
        assert_eq!(ort.kind, SigleKind::Ort);
        assert_eq!(ort.kr.as_deref(), Some("1A.a"));
        assert_eq!(ort.gr.as_deref(), Some("1A"));
        assert_eq!(ort.bl.as_deref(), Some("1"));

        let wien = dboe.get_sigle("1A01").unwrap();
        assert_eq!(wien.kr, None);
        assert_eq!(dboe.get_sigle("1A").unwrap().bl.as_deref(), Some("1"));
        assert_eq!(dboe.get_sigle("1A.a").unwrap().gr.as_deref(), Some("1A"));

        let params = vec![("kind".to_string(), "bl".to_string())];
        assert_eq!(dboe.list_siglen(&params).unwrap().len(), 1);
    }

    #[test]
    fn test_import_places_is_idempotent() {
        let dboe = store_with_places();
        let summary = dboe.import_places(PLACES, None).unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(dboe.list_siglen(&[]).unwrap().len(), 5);
    }

    #[test]
    fn test_geo_usages() {
        let doc = tei::parse(ENTRY).unwrap();
        let usages = geo_usages(&doc).unwrap();
        assert_eq!(usages.len(), 2);
        assert_eq!(usages[0].sigle, "1A01");
        assert_eq!(usages[0].name, "Wien");
        assert_eq!(usages[0].orig_names, vec!["Wean".to_string()]);
        assert_eq!(usages[0].corresp.as_deref(), Some("this:LT1"));
        assert_eq!(usages[1].corresp, None);
    }

    #[test]
    fn test_geo_usages_take_last_sigle_segment() {
        let doc = tei::parse(
            r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="b2">
  <usg type="geo"><listPlace corresp=" 2B03 "><place><placeName>Graz</placeName></place></listPlace></usg>
  <usg type="geo"><listPlace corresp="sigle:x sigle:3C04"><place><placeName>Linz</placeName></place></listPlace></usg>
</entry>"#,
        )
        .unwrap();
        let siglen: Vec<String> = geo_usages(&doc).unwrap().into_iter().map(|u| u.sigle).collect();
        assert_eq!(siglen, vec!["2B03".to_string(), "3C04".to_string()]);
    }

    #[test]
    fn test_link_places_creates_links_once() {
        let dboe = store_with_places();
        dboe.save_beleg("b1", Some(ENTRY.to_string()), SyncOptions::none())
            .unwrap();
        assert_eq!(dboe.link_places(None).unwrap(), 1);
        dboe.link_places(None).unwrap();

        let links = dboe.list_beleg_siglen(&[]).unwrap();
        assert_eq!(links.len(), 2);
        let created = dboe.get_sigle("9Z99").unwrap();
        assert_eq!(created.kind, SigleKind::Ort);
        assert_eq!(created.name, "Neuhausen");
        assert_eq!(dboe.get_sigle("1A01").unwrap().orig_names, vec!["Wean".to_string()]);

        let places = dboe.places_for_beleg("b1").unwrap();
        assert_eq!(places[0].sigle, "1A01");
        assert_eq!(places[0].bl.as_deref(), Some("1 Wien"));
        assert_eq!(places[0].gr.as_deref(), Some("1A Wien Stadt"));
        assert_eq!(places[0].kr, None);
    }

    #[test]
    fn test_sigle_crud_and_filters() {
        let dboe = store_with_places();
        let mut sigle = Sigle::new("2B01", "Graz", SigleKind::Ort);
        sigle.bl = Some("missing".into());
        assert!(matches!(
            dboe.create_sigle(sigle.clone()),
            Err(DboeError::InvalidArgument(_))
        ));
        sigle.bl = Some("1".into());
        sigle.orig_names = vec!["Grouz".into(), "Grouz".into()];
        let created = dboe.create_sigle(sigle.clone()).unwrap();
        assert_eq!(created.orig_names, vec!["Grouz".to_string()]);
        assert!(matches!(dboe.create_sigle(sigle), Err(DboeError::Conflict(_))));

        let params = vec![("sigle_startswith".to_string(), "1A".to_string())];
        assert_eq!(dboe.list_siglen(&params).unwrap().len(), 4);
        let params = vec![("name".to_string(), "GRAZ".to_string())];
        assert_eq!(dboe.list_siglen(&params).unwrap()[0].sigle, "2B01");
        let params = vec![("kind".to_string(), "stadt".to_string())];
        assert!(dboe.list_siglen(&params).is_err());

        dboe.delete_sigle("2B01").unwrap();
        assert!(matches!(dboe.get_sigle("2B01"), Err(DboeError::NotFound { .. })));
    }

    #[test]
    fn test_beleg_sigle_crud() {
        let dboe = store_with_places();
        dboe.save_beleg("b1", None, SyncOptions::none()).unwrap();
        let link = dboe
            .save_beleg_sigle(BelegSigle {
                id: 0,
                beleg: "b1".into(),
                sigle: "1A01".into(),
                corresp: Some("this:LT1".into()),
                resp: None,
            })
            .unwrap();
        let params = vec![("sigle__sigle".to_string(), "1A01".to_string())];
        assert_eq!(dboe.list_beleg_siglen(&params).unwrap(), vec![link.clone()]);
        dboe.delete_beleg_sigle(link.id).unwrap();
        assert!(dboe.get_beleg_sigle(link.id).is_err());
    }
}
