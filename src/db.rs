use crate::error::{DboeError, Result};
use crate::filters::Filter;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::functions::FunctionFlags;
use rusqlite::{
    Connection, OpenFlags, OptionalExtension, ToSql, Transaction, params, params_from_iter,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

// --- Schema Definition ---

const SCHEMA_VERSION: u32 = 1;

const CREATE_METADATA_TABLE: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);";

// --- annotations ---

const CREATE_USERS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    date_joined TEXT NOT NULL
);";

const CREATE_CATEGORIES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    note TEXT NOT NULL DEFAULT '',
    notation TEXT NOT NULL DEFAULT ''
);";

const CREATE_TAGS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    color TEXT NOT NULL DEFAULT '',
    meta TEXT -- JSON
);";

const CREATE_ES_DOCUMENTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS es_documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    es_id TEXT NOT NULL,
    idx TEXT,
    version INTEGER,
    scans TEXT, -- JSON array or NULL
    xml TEXT NOT NULL DEFAULT '',
    xml_modified_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    xml_error_message TEXT NOT NULL DEFAULT ''
);";

const CREATE_ES_DOCUMENT_TAGS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS es_document_tags (
    es_document_id INTEGER NOT NULL REFERENCES es_documents(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (es_document_id, tag_id)
);";

const CREATE_LEMMAS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS lemmas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    norm TEXT,
    org TEXT NOT NULL,
    lemmatisierung TEXT,
    filename TEXT NOT NULL DEFAULT '',
    count INTEGER NOT NULL DEFAULT 0,
    comment TEXT NOT NULL DEFAULT '',
    simplex INTEGER REFERENCES lemmas(id) ON DELETE SET NULL,
    suggestion TEXT,
    pos TEXT
);";

const CREATE_EDITS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS edits_of_article (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    begin_time TEXT NOT NULL,
    step TEXT NOT NULL,
    status TEXT NOT NULL,
    finished_date TEXT,
    description TEXT NOT NULL DEFAULT '',
    current INTEGER NOT NULL DEFAULT 0,
    deadline TEXT,
    last_edited TEXT NOT NULL,
    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    lemma_id INTEGER REFERENCES lemmas(id) ON DELETE SET NULL
);";

const CREATE_COLLECTIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    category_id INTEGER REFERENCES categories(id) ON DELETE RESTRICT,
    lemma_id INTEGER REFERENCES lemmas(id) ON DELETE SET NULL,
    comment TEXT NOT NULL DEFAULT '',
    public INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL,
    modified TEXT NOT NULL
);";

const CREATE_COLLECTION_DOCUMENTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS collection_documents (
    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    es_document_id INTEGER NOT NULL REFERENCES es_documents(id) ON DELETE CASCADE,
    PRIMARY KEY (collection_id, es_document_id)
);";

const CREATE_COLLECTION_CURATORS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS collection_curators (
    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (collection_id, user_id)
);";

const CREATE_ANNOTATIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS annotations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL DEFAULT '',
    collection_id INTEGER REFERENCES collections(id) ON DELETE SET NULL,
    description TEXT NOT NULL DEFAULT '',
    category_id INTEGER REFERENCES categories(id) ON DELETE RESTRICT,
    public INTEGER NOT NULL DEFAULT 0,
    created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created TEXT NOT NULL,
    modified TEXT NOT NULL
);";

const CREATE_AUTOR_ARTIKEL_TABLE: &str = "
CREATE TABLE IF NOT EXISTS autor_artikel (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lemma_id INTEGER REFERENCES lemmas(id) ON DELETE SET NULL,
    bearbeiter_id INTEGER REFERENCES users(id) ON DELETE SET NULL
);";

// --- belege ---

const CREATE_FACSIMILES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS facsimiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT NOT NULL UNIQUE
);";

const CREATE_BELEGE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS belege (
    dboe_id TEXT PRIMARY KEY,
    orig_xml TEXT,
    xeno_data TEXT,
    hauptlemma TEXT,
    nebenlemma TEXT,
    archivzeile TEXT,
    quelle TEXT,
    quelle_page TEXT,
    quelle_bearbeitet TEXT,
    bibl TEXT,
    zitierweise TEXT NOT NULL DEFAULT '[]',
    pos TEXT,
    ref_type_dbo TEXT,
    ref_type_sni TEXT,
    xr_type_verweise_o TEXT,
    xr_type_verweise_b TEXT,
    fragebogen_nummer TEXT,
    etym TEXT NOT NULL DEFAULT '[]',
    note_notabene TEXT NOT NULL DEFAULT '[]',
    note_diverse TEXT NOT NULL DEFAULT '[]',
    import_issue INTEGER NOT NULL DEFAULT 0
);";

const CREATE_BELEG_FACS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS beleg_facs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    facsimile_id INTEGER NOT NULL REFERENCES facsimiles(id) ON DELETE CASCADE,
    resp TEXT NOT NULL DEFAULT 'system',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

const CREATE_BELEG_TAGS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS beleg_tags (
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (beleg_id, tag_id)
);";

const CREATE_BELEG_COLLECTIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS beleg_collections (
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    PRIMARY KEY (beleg_id, collection_id)
);";

const CREATE_CITATIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS citations (
    dboe_id TEXT PRIMARY KEY,
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    number INTEGER NOT NULL DEFAULT 1,
    orig_xml TEXT NOT NULL,
    quote_lang TEXT,
    quote_text TEXT,
    quote_gram TEXT,
    p_ref TEXT,
    definition TEXT,
    definition_lang TEXT,
    corresp TEXT,
    definition_corresp TEXT,
    interpration TEXT,
    note_anmerkung_o TEXT,
    note_anmerkung_b TEXT,
    fragebogen_nummer TEXT,
    xr TEXT,
    note_diverse TEXT NOT NULL DEFAULT '[]'
);";

const CREATE_ZUSATZ_LEMMATA_TABLE: &str = "
CREATE TABLE IF NOT EXISTS zusatz_lemmata (
    dboe_id TEXT PRIMARY KEY,
    citation_id TEXT NOT NULL REFERENCES citations(dboe_id) ON DELETE CASCADE,
    number INTEGER NOT NULL DEFAULT 1,
    orig_xml TEXT NOT NULL,
    form_orth TEXT,
    pos TEXT,
    gram TEXT
);";

const CREATE_KONTEXT_ANNOTATIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS kontext_annotations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kontext_id TEXT NOT NULL REFERENCES citations(dboe_id) ON DELETE CASCADE,
    payload TEXT, -- JSON
    tool TEXT,
    source_field TEXT NOT NULL DEFAULT 'quote_text',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

const CREATE_LAUTUNGEN_TABLE: &str = "
CREATE TABLE IF NOT EXISTS lautungen (
    dboe_id TEXT PRIMARY KEY,
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    number INTEGER NOT NULL DEFAULT 1,
    orig_xml TEXT NOT NULL,
    pron TEXT,
    pron_lang TEXT,
    pron_gram TEXT
);";

const CREATE_LEHNWOERTER_TABLE: &str = "
CREATE TABLE IF NOT EXISTS lehnwoerter (
    dboe_id TEXT PRIMARY KEY,
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    number INTEGER NOT NULL DEFAULT 1,
    orig_xml TEXT NOT NULL,
    pron TEXT,
    pron_lang TEXT,
    pron_gram TEXT
);";

const CREATE_ANMERKUNGEN_LAUTUNG_TABLE: &str = "
CREATE TABLE IF NOT EXISTS anmerkungen_lautung (
    dboe_id TEXT PRIMARY KEY,
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    number INTEGER NOT NULL DEFAULT 1,
    resp TEXT NOT NULL DEFAULT 'O',
    corresp_to TEXT,
    content TEXT,
    p_ref TEXT NOT NULL DEFAULT '[]'
);";

const CREATE_SENSES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS senses (
    dboe_id TEXT PRIMARY KEY,
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    number INTEGER NOT NULL DEFAULT 1,
    orig_xml TEXT NOT NULL,
    definition TEXT,
    corresp_to TEXT,
    definition_lang TEXT,
    note_anmerkung_o TEXT,
    note_anmerkung_b TEXT
);";

// --- siglen ---

const CREATE_SIGLEN_TABLE: &str = "
CREATE TABLE IF NOT EXISTS siglen (
    sigle TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    orig_names TEXT NOT NULL DEFAULT '[]',
    kind TEXT NOT NULL,
    coordinates TEXT, -- JSON
    geonames TEXT,
    bl TEXT REFERENCES siglen(sigle) ON DELETE CASCADE,
    gr TEXT REFERENCES siglen(sigle) ON DELETE CASCADE,
    kr TEXT REFERENCES siglen(sigle) ON DELETE CASCADE
);";

const CREATE_BELEG_SIGLEN_TABLE: &str = "
CREATE TABLE IF NOT EXISTS beleg_siglen (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    beleg_id TEXT NOT NULL REFERENCES belege(dboe_id) ON DELETE CASCADE,
    sigle_id TEXT NOT NULL REFERENCES siglen(sigle) ON DELETE CASCADE,
    corresp TEXT,
    resp TEXT
);";

// --- Indices ---

const CREATE_INDICES: [&str; 14] = [
    "CREATE INDEX IF NOT EXISTS idx_citation_beleg ON citations (beleg_id, number);",
    "CREATE INDEX IF NOT EXISTS idx_citation_corresp ON citations (corresp);",
    "CREATE INDEX IF NOT EXISTS idx_zusatz_lemma_citation ON zusatz_lemmata (citation_id, number);",
    "CREATE INDEX IF NOT EXISTS idx_lautung_beleg ON lautungen (beleg_id, number);",
    "CREATE INDEX IF NOT EXISTS idx_lehnwort_beleg ON lehnwoerter (beleg_id, number);",
    "CREATE INDEX IF NOT EXISTS idx_anmerkung_lautung_beleg ON anmerkungen_lautung (beleg_id, number);",
    "CREATE INDEX IF NOT EXISTS idx_sense_beleg ON senses (beleg_id, number);",
    "CREATE INDEX IF NOT EXISTS idx_beleg_facs_beleg ON beleg_facs (beleg_id);",
    "CREATE INDEX IF NOT EXISTS idx_beleg_sigle_beleg ON beleg_siglen (beleg_id);",
    "CREATE INDEX IF NOT EXISTS idx_beleg_sigle_sigle ON beleg_siglen (sigle_id);",
    "CREATE INDEX IF NOT EXISTS idx_collection_title ON collections (title);",
    "CREATE INDEX IF NOT EXISTS idx_collection_deleted ON collections (deleted);",
    "CREATE INDEX IF NOT EXISTS idx_collection_modified ON collections (modified);",
    "CREATE INDEX IF NOT EXISTS idx_edit_lemma ON edits_of_article (lemma_id, current);",
];

/// Opens (or creates) a database file and applies the connection pragmas.
pub fn open_db_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    // WAL keeps API readers from blocking an import
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "cache_size", "-64000")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Pragmas and functions every connection needs, file-backed or in-memory.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // SQLite's lower() only folds ASCII; dialect data is full of umlauts.
    conn.create_scalar_function(
        "casefold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|v| v.to_lowercase()))
        },
    )?;
    Ok(())
}

// --- Initialization Function ---

/// Creates all necessary tables and indices in the database if they don't exist.
/// Also checks and sets the schema version.
pub fn initialize_database(conn: &mut Connection) -> Result<()> {
    info!(
        "Initializing database schema (version {})...",
        SCHEMA_VERSION
    );
    let tx = conn.transaction()?;

    for statement in [
        CREATE_METADATA_TABLE,
        CREATE_USERS_TABLE,
        CREATE_CATEGORIES_TABLE,
        CREATE_TAGS_TABLE,
        CREATE_ES_DOCUMENTS_TABLE,
        CREATE_ES_DOCUMENT_TAGS_TABLE,
        CREATE_LEMMAS_TABLE,
        CREATE_EDITS_TABLE,
        CREATE_COLLECTIONS_TABLE,
        CREATE_COLLECTION_DOCUMENTS_TABLE,
        CREATE_COLLECTION_CURATORS_TABLE,
        CREATE_ANNOTATIONS_TABLE,
        CREATE_AUTOR_ARTIKEL_TABLE,
        CREATE_FACSIMILES_TABLE,
        CREATE_BELEGE_TABLE,
        CREATE_BELEG_FACS_TABLE,
        CREATE_BELEG_TAGS_TABLE,
        CREATE_BELEG_COLLECTIONS_TABLE,
        CREATE_CITATIONS_TABLE,
        CREATE_ZUSATZ_LEMMATA_TABLE,
        CREATE_KONTEXT_ANNOTATIONS_TABLE,
        CREATE_LAUTUNGEN_TABLE,
        CREATE_LEHNWOERTER_TABLE,
        CREATE_ANMERKUNGEN_LAUTUNG_TABLE,
        CREATE_SENSES_TABLE,
        CREATE_SIGLEN_TABLE,
        CREATE_BELEG_SIGLEN_TABLE,
    ] {
        tx.execute(statement, [])?;
    }
    for statement in CREATE_INDICES {
        tx.execute(statement, [])?;
    }

    let existing_version_str: Option<String> = tx
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing_version_str {
        Some(v_str) => {
            let existing_version: u32 = v_str.parse().map_err(|e| {
                DboeError::ParseError(format!(
                    "Failed to parse existing schema version '{}': {}",
                    v_str, e
                ))
            })?;
            match existing_version.cmp(&SCHEMA_VERSION) {
                std::cmp::Ordering::Less => {
                    warn!(
                        "Database schema version ({}) is older than expected ({}). Migration needed.",
                        existing_version, SCHEMA_VERSION
                    );
                    tx.execute(
                        "UPDATE metadata SET value = ?1 WHERE key = 'schema_version'",
                        params![SCHEMA_VERSION.to_string()],
                    )?;
                }
                std::cmp::Ordering::Greater => {
                    warn!(
                        "Database schema version ({}) is newer than expected ({}). Using potentially incompatible schema.",
                        existing_version, SCHEMA_VERSION
                    );
                }
                std::cmp::Ordering::Equal => {
                    debug!(
                        "Database schema version ({}) matches expected version.",
                        existing_version
                    );
                }
            }
        }
        None => {
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            info!("Set initial schema version in metadata table.");
        }
    }

    tx.commit()?;
    info!("Database schema initialization complete.");
    Ok(())
}

/// Helper to clear all data from the tables, keeping the schema and metadata.
pub fn clear_database_data(tx: &Transaction) -> Result<()> {
    info!("Clearing existing data from database tables...");
    // Referencing tables first
    for table in [
        "beleg_siglen",
        "beleg_facs",
        "beleg_tags",
        "beleg_collections",
        "kontext_annotations",
        "zusatz_lemmata",
        "citations",
        "lautungen",
        "lehnwoerter",
        "anmerkungen_lautung",
        "senses",
        "belege",
        "facsimiles",
        "siglen",
        "annotations",
        "collection_documents",
        "collection_curators",
        "collections",
        "autor_artikel",
        "edits_of_article",
        "lemmas",
        "es_document_tags",
        "es_documents",
        "tags",
        "categories",
        "users",
    ] {
        tx.execute(&format!("DELETE FROM {}", table), [])?;
    }
    info!("Finished clearing data.");
    Ok(())
}

// --- Column conversion helpers ---

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn to_json_text<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Reads a JSON-encoded column inside a row mapper.
pub fn json_column<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub fn optional_json_column<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Parses a `FromStr` enum stored as TEXT inside a row mapper.
pub fn enum_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(DboeError::ParseError(e)),
        )
    })
}

/// Runs `select` with the filter's WHERE clause appended, mapping each row.
pub fn select_where<T, F>(
    conn: &Connection,
    select: &str,
    filter: &Filter,
    order_by: &str,
    map: F,
) -> Result<Vec<T>>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut sql = format!("{}{}", select, filter.where_clause());
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(filter.params()), map)?;
    Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
}

/// Number of rows in `table` matching `column = value`.
pub fn count_where(conn: &Connection, table: &str, column: &str, value: &dyn ToSql) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", table, column);
    Ok(conn.query_row(&sql, [value], |row| row.get(0))?)
}

/// Rejects a reference to a row that does not exist.
pub fn ensure_key<K: ToSql + std::fmt::Display>(
    conn: &Connection,
    table: &str,
    column: &str,
    key: &K,
) -> Result<()> {
    if count_where(conn, table, column, key)? == 0 {
        return Err(DboeError::InvalidArgument(format!(
            "Invalid pk \"{}\" - object does not exist.",
            key
        )));
    }
    Ok(())
}

/// `ensure_key` on the `id` column, skipping absent references.
pub fn ensure_exists(conn: &Connection, table: &str, id: Option<i64>) -> Result<()> {
    match id {
        Some(id) => ensure_key(conn, table, "id", &id),
        None => Ok(()),
    }
}

/// Maps "no rows" to `NotFound` for a single-row lookup.
pub fn require<T>(value: Option<T>, kind: &'static str, id: impl ToString) -> Result<T> {
    value.ok_or_else(|| DboeError::not_found(kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent_and_sets_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        initialize_database(&mut conn).unwrap();
        initialize_database(&mut conn).unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn test_casefold_handles_umlauts() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn).unwrap();
        let folded: String = conn
            .query_row("SELECT casefold('ÜBERHAUPT')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(folded, "überhaupt");
    }

    #[test]
    fn test_open_db_connection_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dboe.db");
        let mut conn = open_db_connection(&path).unwrap();
        initialize_database(&mut conn).unwrap();
        assert!(path.exists());
    }
}
