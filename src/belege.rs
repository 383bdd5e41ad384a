//! Beleg records, their TEI-derived children and facsimiles.

use crate::db::{
    self, ensure_exists, ensure_key, json_column, require, select_where, to_json_text,
};
use crate::error::{DboeError, Result};
use crate::extract::{self, ChildNode, SyncOptions};
use crate::filters::{
    ANMERKUNG_LAUTUNG_MODEL, BELEG_FACS_MODEL, BELEG_MODEL, CITATION_MODEL, DynamicFilterSet,
    FACSIMILE_MODEL, Filter, LAUTUNG_MODEL, LEHNWORT_MODEL, ModelDef, QueryParams, SENSE_MODEL,
};
use crate::models::{
    AnmerkungLautung, Beleg, BelegFacs, Citation, Facsimile, FormVariant, KontextAnnotation, Sense,
    ZusatzLemma, nullable,
};
use crate::representation::BelegBundle;
use crate::tei::{self, Element};
use crate::{Dboe, siglen};
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Deserialize;
use serde_json::Value;

// --- Column lists and row mappers ---

const BELEG_COLUMNS: &str = "t.dboe_id, t.orig_xml, t.xeno_data, t.hauptlemma, t.nebenlemma, \
    t.archivzeile, t.quelle, t.quelle_page, t.quelle_bearbeitet, t.bibl, t.zitierweise, t.pos, \
    t.ref_type_dbo, t.ref_type_sni, t.xr_type_verweise_o, t.xr_type_verweise_b, \
    t.fragebogen_nummer, t.etym, t.note_notabene, t.note_diverse, t.import_issue";

fn row_to_beleg(row: &Row<'_>) -> rusqlite::Result<Beleg> {
    Ok(Beleg {
        dboe_id: row.get(0)?,
        orig_xml: row.get(1)?,
        xeno_data: row.get(2)?,
        hauptlemma: row.get(3)?,
        nebenlemma: row.get(4)?,
        archivzeile: row.get(5)?,
        quelle: row.get(6)?,
        quelle_page: row.get(7)?,
        quelle_bearbeitet: row.get(8)?,
        bibl: row.get(9)?,
        zitierweise: json_column(row, 10)?,
        pos: row.get(11)?,
        ref_type_dbo: row.get(12)?,
        ref_type_sni: row.get(13)?,
        xr_type_verweise_o: row.get(14)?,
        xr_type_verweise_b: row.get(15)?,
        fragebogen_nummer: row.get(16)?,
        etym: json_column(row, 17)?,
        note_notabene: json_column(row, 18)?,
        note_diverse: json_column(row, 19)?,
        import_issue: row.get(20)?,
    })
}

const CITATION_COLUMNS: &str = "t.dboe_id, t.beleg_id, t.number, t.orig_xml, t.quote_lang, \
    t.quote_text, t.quote_gram, t.p_ref, t.definition, t.definition_lang, t.corresp, \
    t.definition_corresp, t.interpration, t.note_anmerkung_o, t.note_anmerkung_b, \
    t.fragebogen_nummer, t.xr, t.note_diverse";

fn row_to_citation(row: &Row<'_>) -> rusqlite::Result<Citation> {
    Ok(Citation {
        dboe_id: row.get(0)?,
        beleg: row.get(1)?,
        number: row.get(2)?,
        orig_xml: row.get(3)?,
        quote_lang: row.get(4)?,
        quote_text: row.get(5)?,
        quote_gram: row.get(6)?,
        p_ref: row.get(7)?,
        definition: row.get(8)?,
        definition_lang: row.get(9)?,
        corresp: row.get(10)?,
        definition_corresp: row.get(11)?,
        interpration: row.get(12)?,
        note_anmerkung_o: row.get(13)?,
        note_anmerkung_b: row.get(14)?,
        fragebogen_nummer: row.get(15)?,
        xr: row.get(16)?,
        note_diverse: json_column(row, 17)?,
    })
}

const ZUSATZ_LEMMA_COLUMNS: &str =
    "t.dboe_id, t.citation_id, t.number, t.orig_xml, t.form_orth, t.pos, t.gram";

fn row_to_zusatz_lemma(row: &Row<'_>) -> rusqlite::Result<ZusatzLemma> {
    Ok(ZusatzLemma {
        dboe_id: row.get(0)?,
        citation: row.get(1)?,
        number: row.get(2)?,
        orig_xml: row.get(3)?,
        form_orth: row.get(4)?,
        pos: row.get(5)?,
        gram: row.get(6)?,
    })
}

const FORM_VARIANT_COLUMNS: &str =
    "t.dboe_id, t.beleg_id, t.number, t.orig_xml, t.pron, t.pron_lang, t.pron_gram";

fn row_to_form_variant(row: &Row<'_>) -> rusqlite::Result<FormVariant> {
    Ok(FormVariant {
        dboe_id: row.get(0)?,
        beleg: row.get(1)?,
        number: row.get(2)?,
        orig_xml: row.get(3)?,
        pron: row.get(4)?,
        pron_lang: row.get(5)?,
        pron_gram: row.get(6)?,
    })
}

const SENSE_COLUMNS: &str = "t.dboe_id, t.beleg_id, t.number, t.orig_xml, t.definition, \
    t.corresp_to, t.definition_lang, t.note_anmerkung_o, t.note_anmerkung_b";

fn row_to_sense(row: &Row<'_>) -> rusqlite::Result<Sense> {
    Ok(Sense {
        dboe_id: row.get(0)?,
        beleg: row.get(1)?,
        number: row.get(2)?,
        orig_xml: row.get(3)?,
        definition: row.get(4)?,
        corresp_to: row.get(5)?,
        definition_lang: row.get(6)?,
        note_anmerkung_o: row.get(7)?,
        note_anmerkung_b: row.get(8)?,
    })
}

const ANMERKUNG_COLUMNS: &str =
    "t.dboe_id, t.beleg_id, t.number, t.resp, t.corresp_to, t.content, t.p_ref";

fn row_to_anmerkung(row: &Row<'_>) -> rusqlite::Result<AnmerkungLautung> {
    Ok(AnmerkungLautung {
        dboe_id: row.get(0)?,
        beleg: row.get(1)?,
        number: row.get(2)?,
        resp: db::enum_column(row, 3)?,
        corresp_to: row.get(4)?,
        content: row.get(5)?,
        p_ref: json_column(row, 6)?,
    })
}

fn row_to_facsimile(row: &Row<'_>) -> rusqlite::Result<Facsimile> {
    Ok(Facsimile {
        id: row.get(0)?,
        file_name: row.get(1)?,
    })
}

const BELEG_FACS_COLUMNS: &str =
    "t.id, t.beleg_id, t.facsimile_id, t.resp, t.created_at, t.updated_at";

fn row_to_beleg_facs(row: &Row<'_>) -> rusqlite::Result<BelegFacs> {
    Ok(BelegFacs {
        id: row.get(0)?,
        beleg: row.get(1)?,
        facsimile: row.get(2)?,
        resp: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_kontext_annotation(row: &Row<'_>) -> rusqlite::Result<KontextAnnotation> {
    Ok(KontextAnnotation {
        id: row.get(0)?,
        kontext: row.get(1)?,
        payload: row.get(2)?,
        tool: row.get(3)?,
        source_field: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

// --- Single-row lookups and writes on a borrowed connection ---

pub(crate) fn fetch_beleg(conn: &Connection, dboe_id: &str) -> Result<Option<Beleg>> {
    let sql = format!("SELECT {} FROM belege t WHERE t.dboe_id = ?1", BELEG_COLUMNS);
    Ok(conn.query_row(&sql, params![dboe_id], row_to_beleg).optional()?)
}

fn upsert_beleg(conn: &Connection, beleg: &Beleg) -> Result<()> {
    conn.execute(
        "INSERT INTO belege (dboe_id, orig_xml, xeno_data, hauptlemma, nebenlemma, archivzeile,
            quelle, quelle_page, quelle_bearbeitet, bibl, zitierweise, pos, ref_type_dbo,
            ref_type_sni, xr_type_verweise_o, xr_type_verweise_b, fragebogen_nummer, etym,
            note_notabene, note_diverse, import_issue)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21)
         ON CONFLICT(dboe_id) DO UPDATE SET
            orig_xml = excluded.orig_xml, xeno_data = excluded.xeno_data,
            hauptlemma = excluded.hauptlemma, nebenlemma = excluded.nebenlemma,
            archivzeile = excluded.archivzeile, quelle = excluded.quelle,
            quelle_page = excluded.quelle_page, quelle_bearbeitet = excluded.quelle_bearbeitet,
            bibl = excluded.bibl, zitierweise = excluded.zitierweise, pos = excluded.pos,
            ref_type_dbo = excluded.ref_type_dbo, ref_type_sni = excluded.ref_type_sni,
            xr_type_verweise_o = excluded.xr_type_verweise_o,
            xr_type_verweise_b = excluded.xr_type_verweise_b,
            fragebogen_nummer = excluded.fragebogen_nummer, etym = excluded.etym,
            note_notabene = excluded.note_notabene, note_diverse = excluded.note_diverse,
            import_issue = excluded.import_issue",
        params![
            beleg.dboe_id,
            beleg.orig_xml,
            beleg.xeno_data,
            beleg.hauptlemma,
            beleg.nebenlemma,
            beleg.archivzeile,
            beleg.quelle,
            beleg.quelle_page,
            beleg.quelle_bearbeitet,
            beleg.bibl,
            to_json_text(&beleg.zitierweise)?,
            beleg.pos,
            beleg.ref_type_dbo,
            beleg.ref_type_sni,
            beleg.xr_type_verweise_o,
            beleg.xr_type_verweise_b,
            beleg.fragebogen_nummer,
            to_json_text(&beleg.etym)?,
            to_json_text(&beleg.note_notabene)?,
            to_json_text(&beleg.note_diverse)?,
            beleg.import_issue,
        ],
    )?;
    Ok(())
}

fn fetch_citation(conn: &Connection, dboe_id: &str) -> Result<Option<Citation>> {
    let sql = format!("SELECT {} FROM citations t WHERE t.dboe_id = ?1", CITATION_COLUMNS);
    Ok(conn.query_row(&sql, params![dboe_id], row_to_citation).optional()?)
}

fn upsert_citation(conn: &Connection, c: &Citation) -> Result<()> {
    conn.execute(
        "INSERT INTO citations (dboe_id, beleg_id, number, orig_xml, quote_lang, quote_text,
            quote_gram, p_ref, definition, definition_lang, corresp, definition_corresp,
            interpration, note_anmerkung_o, note_anmerkung_b, fragebogen_nummer, xr, note_diverse)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         ON CONFLICT(dboe_id) DO UPDATE SET
            number = excluded.number, orig_xml = excluded.orig_xml,
            quote_lang = excluded.quote_lang, quote_text = excluded.quote_text,
            quote_gram = excluded.quote_gram, p_ref = excluded.p_ref,
            definition = excluded.definition, definition_lang = excluded.definition_lang,
            corresp = excluded.corresp, definition_corresp = excluded.definition_corresp,
            interpration = excluded.interpration, note_anmerkung_o = excluded.note_anmerkung_o,
            note_anmerkung_b = excluded.note_anmerkung_b,
            fragebogen_nummer = excluded.fragebogen_nummer, xr = excluded.xr,
            note_diverse = excluded.note_diverse",
        params![
            c.dboe_id,
            c.beleg,
            c.number,
            c.orig_xml,
            c.quote_lang,
            c.quote_text,
            c.quote_gram,
            c.p_ref,
            c.definition,
            c.definition_lang,
            c.corresp,
            c.definition_corresp,
            c.interpration,
            c.note_anmerkung_o,
            c.note_anmerkung_b,
            c.fragebogen_nummer,
            c.xr,
            to_json_text(&c.note_diverse)?,
        ],
    )?;
    Ok(())
}

fn fetch_zusatz_lemma(conn: &Connection, dboe_id: &str) -> Result<Option<ZusatzLemma>> {
    let sql = format!(
        "SELECT {} FROM zusatz_lemmata t WHERE t.dboe_id = ?1",
        ZUSATZ_LEMMA_COLUMNS
    );
    Ok(conn.query_row(&sql, params![dboe_id], row_to_zusatz_lemma).optional()?)
}

fn upsert_zusatz_lemma(conn: &Connection, z: &ZusatzLemma) -> Result<()> {
    conn.execute(
        "INSERT INTO zusatz_lemmata (dboe_id, citation_id, number, orig_xml, form_orth, pos, gram)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(dboe_id) DO UPDATE SET
            number = excluded.number, orig_xml = excluded.orig_xml,
            form_orth = excluded.form_orth, pos = excluded.pos, gram = excluded.gram",
        params![z.dboe_id, z.citation, z.number, z.orig_xml, z.form_orth, z.pos, z.gram],
    )?;
    Ok(())
}

/// Lautungen and Lehnwörter share a row layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormTable {
    Lautungen,
    Lehnwoerter,
}

impl FormTable {
    fn table(self) -> &'static str {
        match self {
            FormTable::Lautungen => "lautungen",
            FormTable::Lehnwoerter => "lehnwoerter",
        }
    }

    fn model(self) -> &'static ModelDef {
        match self {
            FormTable::Lautungen => &LAUTUNG_MODEL,
            FormTable::Lehnwoerter => &LEHNWORT_MODEL,
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            FormTable::Lautungen => "Lautung",
            FormTable::Lehnwoerter => "LehnWort",
        }
    }
}

fn fetch_form_variant(
    conn: &Connection,
    table: FormTable,
    dboe_id: &str,
) -> Result<Option<FormVariant>> {
    let sql = format!(
        "SELECT {} FROM {} t WHERE t.dboe_id = ?1",
        FORM_VARIANT_COLUMNS,
        table.table()
    );
    Ok(conn.query_row(&sql, params![dboe_id], row_to_form_variant).optional()?)
}

fn upsert_form_variant(conn: &Connection, table: FormTable, v: &FormVariant) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (dboe_id, beleg_id, number, orig_xml, pron, pron_lang, pron_gram)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(dboe_id) DO UPDATE SET
            number = excluded.number, orig_xml = excluded.orig_xml, pron = excluded.pron,
            pron_lang = excluded.pron_lang, pron_gram = excluded.pron_gram",
        table.table()
    );
    conn.execute(
        &sql,
        params![v.dboe_id, v.beleg, v.number, v.orig_xml, v.pron, v.pron_lang, v.pron_gram],
    )?;
    Ok(())
}

fn fetch_sense(conn: &Connection, dboe_id: &str) -> Result<Option<Sense>> {
    let sql = format!("SELECT {} FROM senses t WHERE t.dboe_id = ?1", SENSE_COLUMNS);
    Ok(conn.query_row(&sql, params![dboe_id], row_to_sense).optional()?)
}

fn upsert_sense(conn: &Connection, s: &Sense) -> Result<()> {
    conn.execute(
        "INSERT INTO senses (dboe_id, beleg_id, number, orig_xml, definition, corresp_to,
            definition_lang, note_anmerkung_o, note_anmerkung_b)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(dboe_id) DO UPDATE SET
            number = excluded.number, orig_xml = excluded.orig_xml,
            definition = excluded.definition, corresp_to = excluded.corresp_to,
            definition_lang = excluded.definition_lang,
            note_anmerkung_o = excluded.note_anmerkung_o,
            note_anmerkung_b = excluded.note_anmerkung_b",
        params![
            s.dboe_id,
            s.beleg,
            s.number,
            s.orig_xml,
            s.definition,
            s.corresp_to,
            s.definition_lang,
            s.note_anmerkung_o,
            s.note_anmerkung_b,
        ],
    )?;
    Ok(())
}

fn upsert_anmerkung(conn: &Connection, a: &AnmerkungLautung) -> Result<()> {
    conn.execute(
        "INSERT INTO anmerkungen_lautung (dboe_id, beleg_id, number, resp, corresp_to, content, p_ref)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(dboe_id) DO UPDATE SET
            number = excluded.number, resp = excluded.resp, corresp_to = excluded.corresp_to,
            content = excluded.content, p_ref = excluded.p_ref",
        params![
            a.dboe_id,
            a.beleg,
            a.number,
            a.resp.to_string(),
            a.corresp_to,
            a.content,
            to_json_text(&a.p_ref)?,
        ],
    )?;
    Ok(())
}

// --- Child synchronisation ---

fn save_citation(
    conn: &Connection,
    beleg_id: &str,
    node: &ChildNode,
    with_zusatz_lemma: bool,
) -> Result<()> {
    let mut citation = fetch_citation(conn, &node.dboe_id)?.unwrap_or_else(|| Citation {
        dboe_id: node.dboe_id.clone(),
        beleg: beleg_id.to_string(),
        number: node.number,
        orig_xml: node.orig_xml.clone(),
        ..Default::default()
    });
    let doc = tei::parse(&citation.orig_xml)?;
    extract::populate(&mut citation, &doc)?;
    upsert_citation(conn, &citation)?;

    if with_zusatz_lemma {
        for zl_node in extract::zusatz_lemma_nodes(&doc)? {
            if let Err(e) = save_zusatz_lemma(conn, &citation.dboe_id, &zl_node) {
                warn!("Error saving ZusatzLemma {}: {}", zl_node.dboe_id, e);
            }
        }
    }
    Ok(())
}

fn save_zusatz_lemma(conn: &Connection, citation_id: &str, node: &ChildNode) -> Result<()> {
    let mut lemma = fetch_zusatz_lemma(conn, &node.dboe_id)?.unwrap_or_else(|| ZusatzLemma {
        dboe_id: node.dboe_id.clone(),
        citation: citation_id.to_string(),
        number: node.number,
        orig_xml: node.orig_xml.clone(),
        ..Default::default()
    });
    let orig_xml = lemma.orig_xml.clone();
    extract::populate_from_xml(&mut lemma, &orig_xml)?;
    upsert_zusatz_lemma(conn, &lemma)
}

fn save_form_variant(
    conn: &Connection,
    table: FormTable,
    beleg_id: &str,
    node: &ChildNode,
) -> Result<()> {
    let existing = fetch_form_variant(conn, table, &node.dboe_id)?;
    let mut variant = existing.unwrap_or_else(|| FormVariant {
        dboe_id: node.dboe_id.clone(),
        beleg: beleg_id.to_string(),
        number: node.number,
        orig_xml: node.orig_xml.clone(),
        ..Default::default()
    });
    let orig_xml = variant.orig_xml.clone();
    extract::populate_from_xml(&mut variant, &orig_xml)?;
    upsert_form_variant(conn, table, &variant)
}

fn save_sense(conn: &Connection, beleg_id: &str, node: &ChildNode) -> Result<()> {
    let mut sense = fetch_sense(conn, &node.dboe_id)?.unwrap_or_else(|| Sense {
        dboe_id: node.dboe_id.clone(),
        beleg: beleg_id.to_string(),
        number: node.number,
        orig_xml: node.orig_xml.clone(),
        ..Default::default()
    });
    let orig_xml = sense.orig_xml.clone();
    extract::populate_from_xml(&mut sense, &orig_xml)?;
    upsert_sense(conn, &sense)
}

fn sync_children(
    conn: &Connection,
    beleg_id: &str,
    doc: &Element,
    options: SyncOptions,
) -> Result<()> {
    if options.anmerkungen_lautung {
        for note in extract::anmerkungen_lautung(beleg_id, doc)? {
            if let Err(e) = upsert_anmerkung(conn, &note) {
                warn!("Error saving AnmerkungLautung {}: {}", note.dboe_id, e);
            }
        }
    }
    if options.citations {
        for node in extract::citation_nodes(doc)? {
            if let Err(e) = save_citation(conn, beleg_id, &node, options.zusatz_lemma) {
                warn!("Error saving citation {}: {}", node.dboe_id, e);
            }
        }
    }
    if options.lautungen {
        for node in extract::lautung_nodes(doc)? {
            if let Err(e) = save_form_variant(conn, FormTable::Lautungen, beleg_id, &node) {
                warn!("Error saving lautung {}: {}", node.dboe_id, e);
            }
        }
    }
    if options.lehnwoerter {
        for node in extract::lehnwort_nodes(doc)? {
            if let Err(e) = save_form_variant(conn, FormTable::Lehnwoerter, beleg_id, &node) {
                warn!("Error saving LehnWort {}: {}", node.dboe_id, e);
            }
        }
    }
    if options.senses {
        for node in extract::sense_nodes(doc)? {
            if let Err(e) = save_sense(conn, beleg_id, &node) {
                warn!("Error saving sense {}: {}", node.dboe_id, e);
            }
        }
    }
    Ok(())
}

/// Populates and stores a Beleg, then synchronises the selected children.
pub(crate) fn save_beleg_on(
    conn: &Connection,
    mut beleg: Beleg,
    options: SyncOptions,
) -> Result<Beleg> {
    let doc = match beleg.orig_xml.as_deref() {
        Some(xml) => {
            beleg.import_issue = false;
            let doc = tei::parse(xml)?;
            if extract::populate(&mut beleg, &doc)? {
                beleg.import_issue = true;
            }
            Some(doc)
        }
        None => None,
    };
    upsert_beleg(conn, &beleg)?;
    if let Some(doc) = doc {
        sync_children(conn, &beleg.dboe_id, &doc, options)?;
    }
    Ok(beleg)
}

/// Writable Beleg fields. Absent fields stay untouched, `null` clears one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BelegUpdate {
    #[serde(default, deserialize_with = "nullable")]
    pub hl: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub nl: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub qu: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub bibl: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub pos: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub archivzeile: Option<Option<String>>,
    /// Replaces the Beleg's tags.
    pub modify_tag: Option<Vec<i64>>,
}

/// Payload creating a Beleg from its TEI entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBeleg {
    pub id: String,
    pub orig_xml: Option<String>,
    pub xeno_data: Option<String>,
}

fn set_beleg_tags(conn: &Connection, beleg_id: &str, tags: &[i64]) -> Result<()> {
    for tag in tags {
        ensure_exists(conn, "tags", Some(*tag))?;
    }
    conn.execute("DELETE FROM beleg_tags WHERE beleg_id = ?1", params![beleg_id])?;
    let mut stmt =
        conn.prepare("INSERT OR IGNORE INTO beleg_tags (beleg_id, tag_id) VALUES (?1, ?2)")?;
    for tag in tags {
        stmt.execute(params![beleg_id, tag])?;
    }
    Ok(())
}

pub(crate) fn beleg_tag_ids(conn: &Connection, beleg_id: &str) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT tag_id FROM beleg_tags WHERE beleg_id = ?1 ORDER BY tag_id")?;
    let rows = stmt.query_map(params![beleg_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

fn children<T, F>(
    conn: &Connection,
    columns: &str,
    table: &str,
    parent_column: &str,
    parent: &str,
    map: F,
) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut filter = Filter::default();
    filter.exact(&format!("t.{}", parent_column), parent.to_string());
    select_where(
        conn,
        &format!("SELECT {} FROM {} t", columns, table),
        &filter,
        "t.number, t.dboe_id",
        map,
    )
}

/// Loads a Beleg with every record its search document is built from.
pub(crate) fn load_bundle(conn: &Connection, beleg: Beleg) -> Result<BelegBundle> {
    let id = beleg.dboe_id.clone();
    let mut facs_stmt = conn.prepare(
        "SELECT f.file_name FROM beleg_facs bf JOIN facsimiles f ON f.id = bf.facsimile_id
         WHERE bf.beleg_id = ?1 ORDER BY f.id",
    )?;
    let facs = facs_stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    let mut citations = Vec::new();
    let citation_rows =
        children(conn, CITATION_COLUMNS, "citations", "beleg_id", &id, row_to_citation)?;
    for citation in citation_rows {
        let lemmata = children(
            conn,
            ZUSATZ_LEMMA_COLUMNS,
            "zusatz_lemmata",
            "citation_id",
            &citation.dboe_id,
            row_to_zusatz_lemma,
        )?;
        citations.push((citation, lemmata));
    }

    Ok(BelegBundle {
        facs,
        citations,
        lautungen: children(
            conn,
            FORM_VARIANT_COLUMNS,
            "lautungen",
            "beleg_id",
            &id,
            row_to_form_variant,
        )?,
        lehnwoerter: children(
            conn,
            FORM_VARIANT_COLUMNS,
            "lehnwoerter",
            "beleg_id",
            &id,
            row_to_form_variant,
        )?,
        senses: children(conn, SENSE_COLUMNS, "senses", "beleg_id", &id, row_to_sense)?,
        anmerkungen: children(
            conn,
            ANMERKUNG_COLUMNS,
            "anmerkungen_lautung",
            "beleg_id",
            &id,
            row_to_anmerkung,
        )?,
        places: siglen::places_for_beleg(conn, &id)?,
        beleg,
    })
}

fn list_dynamic<T, F>(
    conn: &Connection,
    model: &'static ModelDef,
    columns: &str,
    order_by: &str,
    params: &QueryParams,
    map: F,
) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let filter = DynamicFilterSet::new(model).apply(params)?;
    select_where(
        conn,
        &format!("SELECT {} FROM {} t", columns, model.table),
        &filter,
        order_by,
        map,
    )
}

fn fetch_beleg_facs(conn: &Connection, id: i64) -> Result<BelegFacs> {
    let sql = format!("SELECT {} FROM beleg_facs t WHERE t.id = ?1", BELEG_FACS_COLUMNS);
    let found = conn.query_row(&sql, params![id], row_to_beleg_facs).optional()?;
    require(found, "BelegFacs", id)
}

/// File names are unique across facsimiles.
fn ensure_unique_file_name(conn: &Connection, file_name: &str, own_id: Option<i64>) -> Result<()> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT id FROM facsimiles WHERE file_name = ?1",
            params![file_name],
            |row| row.get(0),
        )
        .optional()?;
    match taken {
        Some(other) if Some(other) != own_id => Err(DboeError::Conflict(format!(
            "facsimile with this file name already exists: {}",
            file_name
        ))),
        _ => Ok(()),
    }
}

impl Dboe {
    // --- Belege ---

    /// Saves a Beleg from its TEI entry, filling empty fields and syncing
    /// the selected children in one transaction.
    pub fn save_beleg(
        &self,
        dboe_id: &str,
        orig_xml: Option<String>,
        options: SyncOptions,
    ) -> Result<Beleg> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut beleg = fetch_beleg(&tx, dboe_id)?.unwrap_or_else(|| Beleg::new(dboe_id, None));
        if orig_xml.is_some() {
            beleg.orig_xml = orig_xml;
        }
        let beleg = save_beleg_on(&tx, beleg, options)?;
        tx.commit()?;
        debug!("Saved Beleg {}", beleg);
        Ok(beleg)
    }

    pub fn create_beleg(&self, new: NewBeleg, options: SyncOptions) -> Result<Beleg> {
        if new.id.trim().is_empty() {
            return Err(DboeError::InvalidArgument("id must not be empty".into()));
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if fetch_beleg(&tx, &new.id)?.is_some() {
            return Err(DboeError::Conflict(format!("Beleg {} already exists", new.id)));
        }
        let mut beleg = Beleg::new(new.id, new.orig_xml);
        beleg.xeno_data = new.xeno_data;
        let beleg = save_beleg_on(&tx, beleg, options)?;
        tx.commit()?;
        info!("Created Beleg {}", beleg);
        Ok(beleg)
    }

    pub fn get_beleg(&self, dboe_id: &str) -> Result<Beleg> {
        let conn = self.lock()?;
        require(fetch_beleg(&conn, dboe_id)?, "Beleg", dboe_id)
    }

    pub fn list_belege(&self, params: &QueryParams) -> Result<Vec<Beleg>> {
        let conn = self.lock()?;
        list_dynamic(&conn, &BELEG_MODEL, BELEG_COLUMNS, "t.dboe_id", params, row_to_beleg)
    }

    pub fn count_belege(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM belege", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn beleg_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT dboe_id FROM belege ORDER BY dboe_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Applies the writable fields; stored values are not re-extracted.
    pub fn update_beleg(&self, dboe_id: &str, update: BelegUpdate) -> Result<Beleg> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut beleg = require(fetch_beleg(&tx, dboe_id)?, "Beleg", dboe_id)?;
        if let Some(v) = update.hl {
            beleg.hauptlemma = v;
        }
        if let Some(v) = update.nl {
            beleg.nebenlemma = v;
        }
        if let Some(v) = update.qu {
            beleg.quelle = v;
        }
        if let Some(v) = update.bibl {
            beleg.bibl = v;
        }
        if let Some(v) = update.pos {
            beleg.pos = v;
        }
        if let Some(v) = update.archivzeile {
            beleg.archivzeile = v;
        }
        upsert_beleg(&tx, &beleg)?;
        if let Some(tags) = update.modify_tag {
            set_beleg_tags(&tx, dboe_id, &tags)?;
        }
        tx.commit()?;
        Ok(beleg)
    }

    pub fn delete_beleg(&self, dboe_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM belege WHERE dboe_id = ?1", params![dboe_id])?;
        if n == 0 {
            return Err(DboeError::not_found("Beleg", dboe_id));
        }
        Ok(())
    }

    pub fn beleg_tags(&self, dboe_id: &str) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        beleg_tag_ids(&conn, dboe_id)
    }

    pub fn beleg_bundle(&self, dboe_id: &str) -> Result<BelegBundle> {
        let conn = self.lock()?;
        let beleg = require(fetch_beleg(&conn, dboe_id)?, "Beleg", dboe_id)?;
        load_bundle(&conn, beleg)
    }

    /// Bundles for the given Belege, in the order given.
    pub fn beleg_bundles(&self, belege: Vec<Beleg>) -> Result<Vec<BelegBundle>> {
        let conn = self.lock()?;
        belege.into_iter().map(|b| load_bundle(&conn, b)).collect()
    }

    /// Belege ordered by id, `limit` rows starting after `after`.
    pub fn belege_page(&self, after: Option<&str>, limit: usize) -> Result<Vec<Beleg>> {
        let conn = self.lock()?;
        let mut filter = Filter::default();
        if let Some(after) = after {
            filter.gt("t.dboe_id", after.to_string());
        }
        select_where(
            &conn,
            &format!("SELECT {} FROM belege t", BELEG_COLUMNS),
            &filter,
            &format!("t.dboe_id LIMIT {}", limit),
            row_to_beleg,
        )
    }

    // --- Children (read-only over the API) ---

    pub fn list_citations(&self, params: &QueryParams) -> Result<Vec<Citation>> {
        let conn = self.lock()?;
        list_dynamic(
            &conn,
            &CITATION_MODEL,
            CITATION_COLUMNS,
            "t.beleg_id, t.number",
            params,
            row_to_citation,
        )
    }

    pub fn get_citation(&self, dboe_id: &str) -> Result<Citation> {
        let conn = self.lock()?;
        require(fetch_citation(&conn, dboe_id)?, "Kontext", dboe_id)
    }

    pub fn zusatz_lemmata(&self, citation_id: &str) -> Result<Vec<ZusatzLemma>> {
        let conn = self.lock()?;
        children(
            &conn,
            ZUSATZ_LEMMA_COLUMNS,
            "zusatz_lemmata",
            "citation_id",
            citation_id,
            row_to_zusatz_lemma,
        )
    }

    pub fn list_form_variants(
        &self,
        table: FormTable,
        params: &QueryParams,
    ) -> Result<Vec<FormVariant>> {
        let conn = self.lock()?;
        list_dynamic(
            &conn,
            table.model(),
            FORM_VARIANT_COLUMNS,
            "t.beleg_id, t.number",
            params,
            row_to_form_variant,
        )
    }

    pub fn get_form_variant(&self, table: FormTable, dboe_id: &str) -> Result<FormVariant> {
        let conn = self.lock()?;
        require(fetch_form_variant(&conn, table, dboe_id)?, table.kind(), dboe_id)
    }

    pub fn list_senses(&self, params: &QueryParams) -> Result<Vec<Sense>> {
        let conn = self.lock()?;
        list_dynamic(
            &conn,
            &SENSE_MODEL,
            SENSE_COLUMNS,
            "t.beleg_id, t.number",
            params,
            row_to_sense,
        )
    }

    pub fn get_sense(&self, dboe_id: &str) -> Result<Sense> {
        let conn = self.lock()?;
        require(fetch_sense(&conn, dboe_id)?, "Bedeutung", dboe_id)
    }

    pub fn list_anmerkungen_lautung(&self, params: &QueryParams) -> Result<Vec<AnmerkungLautung>> {
        let conn = self.lock()?;
        list_dynamic(
            &conn,
            &ANMERKUNG_LAUTUNG_MODEL,
            ANMERKUNG_COLUMNS,
            "t.beleg_id, t.number",
            params,
            row_to_anmerkung,
        )
    }

    pub fn get_anmerkung_lautung(&self, dboe_id: &str) -> Result<AnmerkungLautung> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM anmerkungen_lautung t WHERE t.dboe_id = ?1",
            ANMERKUNG_COLUMNS
        );
        let found = conn.query_row(&sql, params![dboe_id], row_to_anmerkung).optional()?;
        require(found, "AnmerkungLautung", dboe_id)
    }

    // --- Kontext annotations ---

    pub fn add_kontext_annotation(
        &self,
        kontext_id: &str,
        payload: Option<Value>,
        tool: Option<String>,
        source_field: Option<String>,
    ) -> Result<KontextAnnotation> {
        let conn = self.lock()?;
        require(fetch_citation(&conn, kontext_id)?, "Kontext", kontext_id)?;
        let now = db::now();
        conn.execute(
            "INSERT INTO kontext_annotations (kontext_id, payload, tool, source_field, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                kontext_id,
                payload,
                tool,
                source_field.unwrap_or_else(|| "quote_text".to_string()),
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            "SELECT id, kontext_id, payload, tool, source_field, created_at, updated_at
             FROM kontext_annotations WHERE id = ?1",
            params![id],
            row_to_kontext_annotation,
        )?)
    }

    pub fn kontext_annotations(&self, kontext_id: &str) -> Result<Vec<KontextAnnotation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kontext_id, payload, tool, source_field, created_at, updated_at
             FROM kontext_annotations WHERE kontext_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![kontext_id], row_to_kontext_annotation)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // --- Facsimiles ---

    pub fn list_facsimiles(&self, params: &QueryParams) -> Result<Vec<Facsimile>> {
        let conn = self.lock()?;
        list_dynamic(&conn, &FACSIMILE_MODEL, "t.id, t.file_name", "t.id", params, row_to_facsimile)
    }

    pub fn get_facsimile(&self, id: i64) -> Result<Facsimile> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT id, file_name FROM facsimiles WHERE id = ?1",
                params![id],
                row_to_facsimile,
            )
            .optional()?;
        require(found, "Facsimile", id)
    }

    pub fn create_facsimile(&self, file_name: &str) -> Result<Facsimile> {
        let conn = self.lock()?;
        ensure_unique_file_name(&conn, file_name, None)?;
        conn.execute("INSERT INTO facsimiles (file_name) VALUES (?1)", params![file_name])?;
        Ok(Facsimile {
            id: conn.last_insert_rowid(),
            file_name: file_name.to_string(),
        })
    }

    pub fn update_facsimile(&self, id: i64, file_name: &str) -> Result<Facsimile> {
        let conn = self.lock()?;
        ensure_unique_file_name(&conn, file_name, Some(id))?;
        let n = conn.execute(
            "UPDATE facsimiles SET file_name = ?1 WHERE id = ?2",
            params![file_name, id],
        )?;
        if n == 0 {
            return Err(DboeError::not_found("Facsimile", id));
        }
        Ok(Facsimile {
            id,
            file_name: file_name.to_string(),
        })
    }

    pub fn delete_facsimile(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        if conn.execute("DELETE FROM facsimiles WHERE id = ?1", params![id])? == 0 {
            return Err(DboeError::not_found("Facsimile", id));
        }
        Ok(())
    }

    // --- Beleg <-> Facsimile links ---

    pub fn list_beleg_facs(&self, params: &QueryParams) -> Result<Vec<BelegFacs>> {
        let conn = self.lock()?;
        list_dynamic(
            &conn,
            &BELEG_FACS_MODEL,
            BELEG_FACS_COLUMNS,
            "t.beleg_id, t.facsimile_id",
            params,
            row_to_beleg_facs,
        )
    }

    pub fn get_beleg_facs(&self, id: i64) -> Result<BelegFacs> {
        let conn = self.lock()?;
        fetch_beleg_facs(&conn, id)
    }

    pub fn link_facsimile(
        &self,
        beleg_id: &str,
        facsimile_id: i64,
        resp: Option<String>,
    ) -> Result<BelegFacs> {
        let conn = self.lock()?;
        ensure_key(&conn, "belege", "dboe_id", &beleg_id)?;
        ensure_exists(&conn, "facsimiles", Some(facsimile_id))?;
        let now = db::now();
        conn.execute(
            "INSERT INTO beleg_facs (beleg_id, facsimile_id, resp, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                beleg_id,
                facsimile_id,
                resp.unwrap_or_else(|| "system".to_string()),
                now
            ],
        )?;
        fetch_beleg_facs(&conn, conn.last_insert_rowid())
    }

    pub fn update_beleg_facs(
        &self,
        id: i64,
        beleg_id: Option<String>,
        facsimile_id: Option<i64>,
        resp: Option<String>,
    ) -> Result<BelegFacs> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut current = fetch_beleg_facs(&tx, id)?;
        if let Some(b) = beleg_id {
            ensure_key(&tx, "belege", "dboe_id", &b)?;
            current.beleg = b;
        }
        if let Some(f) = facsimile_id {
            ensure_exists(&tx, "facsimiles", Some(f))?;
            current.facsimile = f;
        }
        if let Some(r) = resp {
            current.resp = r;
        }
        tx.execute(
            "UPDATE beleg_facs SET beleg_id = ?1, facsimile_id = ?2, resp = ?3, updated_at = ?4
             WHERE id = ?5",
            params![current.beleg, current.facsimile, current.resp, db::now(), id],
        )?;
        let updated = fetch_beleg_facs(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn delete_beleg_facs(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        if conn.execute("DELETE FROM beleg_facs WHERE id = ?1", params![id])? == 0 {
            return Err(DboeError::not_found("BelegFacs", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: &str = r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="tu-1">
  <form type="hauptlemma"><orth>Haus</orth></form>
  <form type="lautung" xml:id="tu-1.lt1" n="1"><pron>haos</pron></form>
  <form type="lehnwort" xml:id="tu-1.lw1"><pron>hausa</pron></form>
  <ref type="fragebogenNummer">12</ref>
  <note type="anmerkung" resp="B" corresp="this:LW1">Lehnwort</note>
  <cit xml:id="tu-1.c1" corresp="this:LT1">
    <quote>im Haus</quote><def>zuhause</def><ref type="fragebogenNummer">3</ref>
    <re xml:id="tu-1.c1.re1"><form><orth>Hausherr</orth></form></re>
  </cit>
  <sense xml:id="tu-1.s1" corresp="this:LT1"><def>Gebäude</def></sense>
</entry>"#;

    fn store() -> Dboe {
        Dboe::open_in_memory().unwrap()
    }

    #[test]
    fn test_save_beleg_syncs_selected_children() {
        let dboe = store();
        let beleg = dboe
            .save_beleg("tu-1", Some(ENTRY.to_string()), SyncOptions::all())
            .unwrap();
        assert_eq!(beleg.hauptlemma.as_deref(), Some("Haus"));
        assert!(!beleg.import_issue);

        let bundle = dboe.beleg_bundle("tu-1").unwrap();
        assert_eq!(bundle.citations.len(), 1);
        assert_eq!(bundle.citations[0].0.quote_text.as_deref(), Some("im Haus"));
        assert_eq!(bundle.citations[0].1.len(), 1);
        assert_eq!(bundle.lautungen[0].pron.as_deref(), Some("haos"));
        assert_eq!(bundle.lehnwoerter[0].number, 1);
        assert_eq!(bundle.senses[0].definition.as_deref(), Some("Gebäude"));
        assert_eq!(bundle.anmerkungen[0].dboe_id, "tu-1_01");
    }

    #[test]
    fn test_save_without_options_creates_no_children() {
        let dboe = store();
        dboe.save_beleg("tu-1", Some(ENTRY.to_string()), SyncOptions::none())
            .unwrap();
        let bundle = dboe.beleg_bundle("tu-1").unwrap();
        assert!(bundle.citations.is_empty());
        assert!(bundle.lautungen.is_empty());
        assert!(dboe.list_citations(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_resave_keeps_edited_fields_and_children() {
        let dboe = store();
        dboe.save_beleg("tu-1", Some(ENTRY.to_string()), SyncOptions::all())
            .unwrap();
        dboe.update_beleg(
            "tu-1",
            BelegUpdate {
                hl: Some(Some("Hütte".into())),
                ..Default::default()
            },
        )
        .unwrap();
        let beleg = dboe.save_beleg("tu-1", None, SyncOptions::all()).unwrap();
        assert_eq!(beleg.hauptlemma.as_deref(), Some("Hütte"));
        assert_eq!(dboe.list_citations(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_unparseable_xml_is_rejected() {
        let dboe = store();
        let err = dboe
            .save_beleg("bad", Some("<entry>".to_string()), SyncOptions::all())
            .unwrap_err();
        assert!(matches!(err, DboeError::Xml(_) | DboeError::XmlParse(_)));
        assert!(matches!(dboe.get_beleg("bad"), Err(DboeError::NotFound { .. })));
    }

    #[test]
    fn test_list_filters_and_lookup() {
        let dboe = store();
        dboe.save_beleg("tu-1", Some(ENTRY.to_string()), SyncOptions::all())
            .unwrap();
        dboe.save_beleg("tu-2", None, SyncOptions::none()).unwrap();
        let params = vec![("hauptlemma".to_string(), "haus".to_string())];
        let found = dboe.list_belege(&params).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dboe_id, "tu-1");

        let params = vec![("beleg".to_string(), "tu-1".to_string())];
        assert_eq!(dboe.list_citations(&params).unwrap().len(), 1);
        assert_eq!(
            dboe.get_form_variant(FormTable::Lehnwoerter, "tu-1.lw1")
                .unwrap()
                .pron
                .as_deref(),
            Some("hausa")
        );
        assert!(matches!(
            dboe.get_form_variant(FormTable::Lautungen, "tu-1.lw1"),
            Err(DboeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_beleg_cascades() {
        let dboe = store();
        dboe.save_beleg("tu-1", Some(ENTRY.to_string()), SyncOptions::all())
            .unwrap();
        dboe.delete_beleg("tu-1").unwrap();
        assert!(dboe.list_citations(&[]).unwrap().is_empty());
        assert!(dboe.list_anmerkungen_lautung(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_facsimile_links() {
        let dboe = store();
        dboe.save_beleg("tu-1", None, SyncOptions::none()).unwrap();
        let facs = dboe.create_facsimile("tu%2F0001.jpg").unwrap();
        let link = dboe.link_facsimile("tu-1", facs.id, None).unwrap();
        assert_eq!(link.resp, "system");
        let updated = dboe
            .update_beleg_facs(link.id, None, None, Some("editor".into()))
            .unwrap();
        assert_eq!(updated.resp, "editor");
        assert_eq!(dboe.beleg_bundle("tu-1").unwrap().facs, vec!["tu%2F0001.jpg"]);
        dboe.delete_facsimile(facs.id).unwrap();
        assert!(dboe.list_beleg_facs(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_kontext_annotations() {
        let dboe = store();
        dboe.save_beleg("tu-1", Some(ENTRY.to_string()), SyncOptions::all())
            .unwrap();
        let ann = dboe
            .add_kontext_annotation(
                "tu-1.c1",
                Some(serde_json::json!({"tokens": 2})),
                Some("spacy".into()),
                None,
            )
            .unwrap();
        assert_eq!(ann.source_field, "quote_text");
        assert_eq!(dboe.kontext_annotations("tu-1.c1").unwrap().len(), 1);
        assert!(dboe
            .add_kontext_annotation("missing", None, None, None)
            .is_err());
    }
}
