//! Editorial records: users, categories, tags, documents, lemmas, article
//! edits, collections, annotations and article authors.

use crate::db::{
    count_where, ensure_exists, enum_column, optional_json_column, require, select_where,
    to_json_text,
};
use crate::error::{DboeError, Result};
use crate::filters::{Filter, Params, QueryParams, csv, parse_i64};
use crate::models::{
    Annotation, AutorArtikel, COLLECTION_CATEGORIES, Category, Collection, EditOfArticle,
    EsDocument, Lemma, Status, Step, Tag, User, nullable,
};
use crate::{Dboe, tei};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use serde::{Deserialize, Serialize};

// --- Shared helpers ---

fn id_list(conn: &Connection, sql: &str, key: &dyn ToSql) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([key], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

fn string_list(conn: &Connection, sql: &str, key: &dyn ToSql) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([key], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

fn delete_by_id(conn: &Connection, table: &str, kind: &'static str, id: i64) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", table);
    if conn.execute(&sql, params![id])? == 0 {
        return Err(DboeError::not_found(kind, id));
    }
    Ok(())
}

fn replace_links(
    conn: &Connection,
    table: &str,
    own: &str,
    other: &str,
    id: i64,
    others: &[i64],
) -> Result<()> {
    conn.execute(&format!("DELETE FROM {} WHERE {} = ?1", table, own), params![id])?;
    let mut stmt = conn.prepare(&format!(
        "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
        table, own, other
    ))?;
    for other_id in others {
        stmt.execute(params![id, other_id])?;
    }
    Ok(())
}

fn choice(key: &str, value: Option<i64>, allowed: &[i64]) -> Result<Option<i64>> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(DboeError::InvalidArgument(format!(
            "Select a valid choice for '{}'. {} is not one of the available choices.",
            key, v
        ))),
        other => Ok(other),
    }
}

// --- Users ---

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        date_joined: row.get(2)?,
    })
}

/// A user with the records they created or curate.
#[derive(Debug, Clone, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub collections_created: Vec<i64>,
    pub collections_curated: Vec<i64>,
    pub annotations_created: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
}

// --- Tags ---

fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        meta: optional_json_column(row, 3)?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TagRow {
    #[serde(flatten)]
    pub tag: Tag,
    pub belege_count: i64,
    /// Only filled for single-tag lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub belege_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagInput {
    pub name: Option<String>,
    pub color: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub meta: Option<Option<serde_json::Value>>,
}

fn fetch_tag(conn: &Connection, id: i64) -> Result<TagRow> {
    let tag = conn
        .query_row(
            "SELECT id, name, color, meta FROM tags WHERE id = ?1",
            params![id],
            row_to_tag,
        )
        .optional()?;
    let tag = require(tag, "Tag", id)?;
    let belege_ids = string_list(
        conn,
        "SELECT beleg_id FROM beleg_tags WHERE tag_id = ?1 ORDER BY beleg_id",
        &id,
    )?;
    Ok(TagRow {
        tag,
        belege_count: belege_ids.len() as i64,
        belege_ids: Some(belege_ids),
    })
}

// --- Documents ---

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<EsDocument> {
    Ok(EsDocument {
        id: row.get(0)?,
        es_id: row.get(1)?,
        index: row.get(2)?,
        version: row.get(3)?,
        tag: Vec::new(),
        scans: optional_json_column(row, 4)?,
        xml: row.get(5)?,
        xml_modified_by: row.get(6)?,
        xml_error_message: row.get(7)?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "t.id, t.es_id, t.idx, t.version, t.scans, t.xml, t.xml_modified_by, t.xml_error_message";

/// Which field selection a document listing uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentView {
    Default,
    Scans,
    Cache,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRow {
    #[serde(flatten)]
    pub document: EsDocument,
    pub in_collections: Vec<i64>,
    pub xml_modified_by_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentInput {
    pub es_id: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub index: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub version: Option<Option<i64>>,
    pub tag: Option<Vec<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub scans: Option<Option<Vec<String>>>,
    pub xml: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub xml_modified_by: Option<Option<i64>>,
    pub xml_error_message: Option<String>,
}

fn check_xml(xml: &Option<String>) -> Result<()> {
    match xml.as_deref() {
        Some(xml) if !xml.is_empty() => tei::validate(xml)
            .map_err(|e| DboeError::InvalidArgument(format!("xml: {}", e))),
        _ => Ok(()),
    }
}

fn apply_document_input(doc: &mut EsDocument, input: DocumentInput) {
    if let Some(v) = input.es_id {
        doc.es_id = v;
    }
    if let Some(v) = input.index {
        doc.index = v;
    }
    if let Some(v) = input.version {
        doc.version = v;
    }
    if let Some(v) = input.tag {
        doc.tag = v;
    }
    if let Some(v) = input.scans {
        doc.scans = v;
    }
    if let Some(v) = input.xml {
        doc.xml = v;
    }
    if let Some(v) = input.xml_modified_by {
        doc.xml_modified_by = v;
    }
    if let Some(v) = input.xml_error_message {
        doc.xml_error_message = v;
    }
}

fn fetch_document(conn: &Connection, id: i64) -> Result<Option<EsDocument>> {
    let sql = format!("SELECT {} FROM es_documents t WHERE t.id = ?1", DOCUMENT_COLUMNS);
    let Some(mut doc) = conn.query_row(&sql, params![id], row_to_document).optional()? else {
        return Ok(None);
    };
    doc.tag = document_tags(conn, doc.id)?;
    Ok(Some(doc))
}

fn fetch_document_by_es_id(conn: &Connection, es_id: &str) -> Result<Option<EsDocument>> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM es_documents WHERE es_id = ?1 ORDER BY id LIMIT 1",
            params![es_id],
            |row| row.get(0),
        )
        .optional()?;
    match id {
        Some(id) => fetch_document(conn, id),
        None => Ok(None),
    }
}

fn document_tags(conn: &Connection, id: i64) -> Result<Vec<i64>> {
    id_list(
        conn,
        "SELECT tag_id FROM es_document_tags WHERE es_document_id = ?1 ORDER BY tag_id",
        &id,
    )
}

fn store_document(conn: &Connection, doc: &mut EsDocument) -> Result<()> {
    ensure_exists(conn, "users", doc.xml_modified_by)?;
    let scans = doc.scans.as_ref().map(to_json_text).transpose()?;
    if doc.id == 0 {
        conn.execute(
            "INSERT INTO es_documents (es_id, idx, version, scans, xml, xml_modified_by, xml_error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                doc.es_id,
                doc.index,
                doc.version,
                scans,
                doc.xml,
                doc.xml_modified_by,
                doc.xml_error_message
            ],
        )?;
        doc.id = conn.last_insert_rowid();
    } else {
        conn.execute(
            "UPDATE es_documents SET es_id = ?1, idx = ?2, version = ?3, scans = ?4, xml = ?5,
                xml_modified_by = ?6, xml_error_message = ?7
             WHERE id = ?8",
            params![
                doc.es_id,
                doc.index,
                doc.version,
                scans,
                doc.xml,
                doc.xml_modified_by,
                doc.xml_error_message,
                doc.id
            ],
        )?;
    }
    for tag in &doc.tag {
        ensure_exists(conn, "tags", Some(*tag))?;
    }
    replace_links(conn, "es_document_tags", "es_document_id", "tag_id", doc.id, &doc.tag)
}

fn document_row(conn: &Connection, document: EsDocument) -> Result<DocumentRow> {
    let in_collections = id_list(
        conn,
        "SELECT collection_id FROM collection_documents WHERE es_document_id = ?1 ORDER BY collection_id",
        &document.id,
    )?;
    let xml_modified_by_name = match document.xml_modified_by {
        Some(user) => conn
            .query_row("SELECT username FROM users WHERE id = ?1", params![user], |row| row.get(0))
            .optional()?,
        None => None,
    };
    Ok(DocumentRow {
        document,
        in_collections,
        xml_modified_by_name,
    })
}

// --- Lemmas ---

const LEMMA_COLUMNS: &str = "t.id, t.norm, t.org, t.lemmatisierung, t.filename, t.count, \
    t.comment, t.simplex, t.suggestion, t.pos";

fn row_to_lemma(row: &Row<'_>) -> rusqlite::Result<Lemma> {
    Ok(Lemma {
        id: row.get(0)?,
        norm: row.get(1)?,
        org: row.get(2)?,
        lemmatisierung: row.get(3)?,
        filename: row.get(4)?,
        count: row.get(5)?,
        comment: row.get(6)?,
        simplex: row.get(7)?,
        suggestion: row.get(8)?,
        pos: row.get(9)?,
    })
}

/// Current task on a lemma (or its simplex) with an assigned user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedTask {
    pub user: i64,
    pub user_name: String,
    pub task: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LemmaRow {
    #[serde(flatten)]
    pub lemma: Lemma,
    pub art_lemmatisierung: Option<String>,
    pub assigned_task: Option<AssignedTask>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LemmaInput {
    #[serde(default, deserialize_with = "nullable")]
    pub norm: Option<Option<String>>,
    pub org: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub lemmatisierung: Option<Option<String>>,
    pub filename: Option<String>,
    pub count: Option<i64>,
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub simplex: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub suggestion: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub pos: Option<Option<String>>,
}

const LEMMA_FIELDS: [&str; 10] = [
    "id",
    "norm",
    "org",
    "lemmatisierung",
    "filename",
    "count",
    "comment",
    "simplex",
    "suggestion",
    "pos",
];

const EDITED_LEMMAS: &str = "SELECT lemma_id FROM edits_of_article WHERE lemma_id IS NOT NULL";
const COLLECTION_LEMMAS: &str = "SELECT lemma_id FROM collections WHERE lemma_id IS NOT NULL";

fn lemma_filter(query: &QueryParams) -> Result<Filter> {
    let params = Params(query);
    let mut filter = Filter::default();
    for field in ["org", "norm", "lemmatisierung"] {
        if let Some(v) = params.get(field) {
            filter.icontains(&format!("t.{}", field), v);
        }
    }
    if let Some(v) = params.get("simplex__lemmatisierung") {
        filter.push(
            "EXISTS (SELECT 1 FROM lemmas s WHERE s.id = t.simplex \
             AND instr(casefold(s.lemmatisierung), casefold(?)) > 0)",
            [Value::Text(v.to_string())],
        );
    }
    if let Some(v) = params.i64("count__gt")? {
        filter.gt("t.count", v);
    }
    if let Some(v) = params.i64("count__lt")? {
        filter.lt("t.count", v);
    }
    match choice("has__norm", params.i64("has__norm")?, &[1, 2])? {
        Some(1) => filter.push("(t.norm IS NOT NULL AND t.norm <> '')", []),
        Some(_) => filter.push("(t.norm IS NULL OR t.norm = '')", []),
        None => {}
    }
    match choice("task", params.i64("task")?, &[0, 1, 2])? {
        Some(0) => filter.push(
            format!(
                "NOT (t.id IN ({0}) OR COALESCE(t.simplex IN ({0}), 0))",
                EDITED_LEMMAS
            ),
            [],
        ),
        Some(1) => filter.push(
            format!("(t.id IN ({0}) OR t.simplex IN ({0}))", EDITED_LEMMAS),
            [],
        ),
        Some(_) => filter.push(format!("t.id NOT IN ({})", EDITED_LEMMAS), []),
        None => {}
    }
    match choice("collection", params.i64("collection")?, &[0, 1])? {
        Some(1) => filter.push(format!("t.id NOT IN ({})", COLLECTION_LEMMAS), []),
        Some(_) => filter.push(format!("t.id IN ({})", COLLECTION_LEMMAS), []),
        None => {}
    }
    if let Some(user) = params.i64("users")? {
        let edited_by = "SELECT lemma_id FROM edits_of_article WHERE user_id = ? AND lemma_id IS NOT NULL";
        filter.push(
            format!("(t.id IN ({0}) OR t.simplex IN ({0}))", edited_by),
            [Value::Integer(user), Value::Integer(user)],
        );
    }
    if let Some(v) = params.bool("has__simplex")? {
        filter.isnull("t.simplex", v);
    }
    if let Some(v) = params.get("filename") {
        filter.exact("t.filename", v.to_string());
    }
    for field in ["count", "simplex", "id"] {
        if let Some(v) = params.i64(field)? {
            filter.exact(&format!("t.{}", field), v);
        }
    }
    let has_collection = params.has("has_collection");
    let has_editor = params.has("has_editor");
    if has_collection && !has_editor {
        filter.push(format!("t.id NOT IN ({})", COLLECTION_LEMMAS), []);
    } else if has_editor && !has_collection {
        filter.push(format!("t.id NOT IN ({})", EDITED_LEMMAS), []);
    }
    Ok(filter)
}

fn assigned_task(conn: &Connection, lemma: &Lemma) -> Result<Option<AssignedTask>> {
    let target = lemma.simplex.unwrap_or(lemma.id);
    let task = conn
        .query_row(
            "SELECT e.id, e.user_id, u.username FROM edits_of_article e
             LEFT JOIN users u ON u.id = e.user_id
             WHERE e.lemma_id = ?1 AND e.current = 1
             ORDER BY e.id LIMIT 1",
            params![target],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;
    Ok(match task {
        Some((task, Some(user), user_name)) => Some(AssignedTask {
            user,
            user_name: user_name.unwrap_or_default(),
            task,
        }),
        _ => None,
    })
}

fn lemma_row(conn: &Connection, lemma: Lemma) -> Result<LemmaRow> {
    let art_lemmatisierung = match lemma.simplex {
        Some(simplex) => conn
            .query_row(
                "SELECT lemmatisierung FROM lemmas WHERE id = ?1",
                params![simplex],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten(),
        None => None,
    };
    let assigned_task = assigned_task(conn, &lemma)?;
    Ok(LemmaRow {
        lemma,
        art_lemmatisierung,
        assigned_task,
    })
}

fn fetch_lemma(conn: &Connection, id: i64) -> Result<Option<Lemma>> {
    let sql = format!("SELECT {} FROM lemmas t WHERE t.id = ?1", LEMMA_COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_lemma).optional()?)
}

fn store_lemma(conn: &Connection, lemma: &mut Lemma, input: LemmaInput) -> Result<LemmaRow> {
    if let Some(v) = input.norm {
        lemma.norm = v;
    }
    if let Some(v) = input.org {
        lemma.org = v;
    }
    if let Some(v) = input.lemmatisierung {
        lemma.lemmatisierung = v;
    }
    if let Some(v) = input.filename {
        lemma.filename = v;
    }
    if let Some(v) = input.count {
        lemma.count = v;
    }
    if let Some(v) = input.comment {
        lemma.comment = v;
    }
    if let Some(v) = input.simplex {
        lemma.simplex = v;
    }
    if let Some(v) = input.suggestion {
        lemma.suggestion = v;
    }
    if let Some(v) = input.pos {
        lemma.pos = v;
    }
    ensure_exists(conn, "lemmas", lemma.simplex)?;
    if lemma.id == 0 {
        conn.execute(
            "INSERT INTO lemmas (norm, org, lemmatisierung, filename, count, comment, simplex, suggestion, pos)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                lemma.norm,
                lemma.org,
                lemma.lemmatisierung,
                lemma.filename,
                lemma.count,
                lemma.comment,
                lemma.simplex,
                lemma.suggestion,
                lemma.pos
            ],
        )?;
        lemma.id = conn.last_insert_rowid();
    } else {
        conn.execute(
            "UPDATE lemmas SET norm = ?1, org = ?2, lemmatisierung = ?3, filename = ?4, count = ?5,
                comment = ?6, simplex = ?7, suggestion = ?8, pos = ?9
             WHERE id = ?10",
            params![
                lemma.norm,
                lemma.org,
                lemma.lemmatisierung,
                lemma.filename,
                lemma.count,
                lemma.comment,
                lemma.simplex,
                lemma.suggestion,
                lemma.pos,
                lemma.id
            ],
        )?;
    }
    lemma_row(conn, lemma.clone())
}

// --- Edits of article ---

const EDIT_COLUMNS: &str = "t.id, t.begin_time, t.step, t.status, t.finished_date, \
    t.description, t.current, t.deadline, t.last_edited, t.user_id, t.lemma_id";

fn row_to_edit(row: &Row<'_>) -> rusqlite::Result<EditOfArticle> {
    Ok(EditOfArticle {
        id: row.get(0)?,
        begin_time: row.get(1)?,
        step: enum_column(row, 2)?,
        status: enum_column(row, 3)?,
        finished_date: row.get(4)?,
        description: row.get(5)?,
        current: row.get(6)?,
        deadline: row.get(7)?,
        last_edited: row.get(8)?,
        user: row.get(9)?,
        lemma: row.get(10)?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct EditRow {
    #[serde(flatten)]
    pub edit: EditOfArticle,
    pub user_name: Option<String>,
    pub lemma_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditInput {
    pub begin_time: Option<DateTime<Utc>>,
    pub step: Option<Step>,
    pub status: Option<Status>,
    #[serde(default, deserialize_with = "nullable")]
    pub finished_date: Option<Option<DateTime<Utc>>>,
    pub description: Option<String>,
    pub current: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub user: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub lemma: Option<Option<i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepStatusCount {
    pub step: Step,
    pub status: Status,
    pub steps: i64,
    pub stati: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LemmaUserCount {
    #[serde(rename = "lemma__lemmatisierung")]
    pub lemmatisierung: Option<String>,
    #[serde(rename = "user__username")]
    pub username: Option<String>,
    #[serde(rename = "document__count")]
    pub document_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserLemmaCount {
    #[serde(rename = "user__username")]
    pub username: Option<String>,
    pub lemma_count: i64,
}

/// Result of an edit listing, shaped by the `reporting` parameter.
#[derive(Debug, Clone)]
pub enum EditListing {
    Rows(Vec<EditRow>),
    ByStepStatus(Vec<StepStatusCount>),
    ByLemmaUser(Vec<LemmaUserCount>),
    ByUser(Vec<UserLemmaCount>),
}

const EDIT_FIELDS: [&str; 11] = [
    "id",
    "begin_time",
    "step",
    "status",
    "finished_date",
    "description",
    "current",
    "deadline",
    "last_edited",
    "user",
    "lemma",
];

fn edit_filter(query: &QueryParams) -> Result<Filter> {
    let params = Params(query);
    let mut filter = Filter::default();
    if let Some(v) = params.get("user") {
        filter.push(
            "EXISTS (SELECT 1 FROM users fu WHERE fu.id = t.user_id \
             AND instr(casefold(fu.username), casefold(?)) > 0)",
            [Value::Text(v.to_string())],
        );
    }
    if let Some(v) = params.get("lemma") {
        filter.push(
            "EXISTS (SELECT 1 FROM lemmas fl WHERE fl.id = t.lemma_id \
             AND instr(casefold(fl.lemmatisierung), casefold(?)) > 0)",
            [Value::Text(v.to_string())],
        );
    }
    if let Some(v) = params.get("lemma__id") {
        filter.iexact("CAST(t.lemma_id AS TEXT)", v);
    }
    for key in ["date", "deadline"] {
        if let Some(day) = params.date(key)? {
            filter.on_date("t.deadline", day);
        }
    }
    params.date_range(&mut filter, "finished_date", "t.finished_date")?;
    params.date_range(&mut filter, "begin_time", "t.begin_time")?;
    params.date_range(&mut filter, "last_edited", "t.last_edited")?;
    if let Some(v) = params.get("step") {
        let step: Step = v.parse().map_err(DboeError::InvalidArgument)?;
        filter.exact("t.step", step.as_str().to_string());
    }
    if let Some(v) = params.get("status") {
        let status: Status = v.parse().map_err(DboeError::InvalidArgument)?;
        filter.exact("t.status", status.as_str().to_string());
    }
    if let Some(v) = params.bool("current")? {
        filter.exact("t.current", v);
    }
    match choice("currentstatus", params.i64("currentstatus")?, &[0, 1, 2])? {
        Some(0) => filter.exact("t.step", Step::Zugewiesen.as_str().to_string()),
        Some(1) => filter.exact("t.step", Step::Irrelevant.as_str().to_string()),
        Some(_) => filter.push("t.step <> ?", [Value::Text(Step::Zugewiesen.as_str().into())]),
        None => {}
    }
    match choice("mytasks", params.i64("mytasks")?, &[0, 1])? {
        Some(0) => {
            filter.exact("t.current", true);
            filter.push(
                "(t.step = ? OR t.status = ?)",
                [
                    Value::Text(Step::Irrelevant.as_str().into()),
                    Value::Text(Status::FinalVersion.as_str().into()),
                ],
            );
        }
        Some(_) => filter.exact("t.current", true),
        None => {}
    }
    Ok(filter)
}

fn fetch_edit(conn: &Connection, id: i64) -> Result<Option<EditRow>> {
    let mut filter = Filter::default();
    filter.exact("t.id", id);
    Ok(select_edits(conn, &filter, "t.id")?.into_iter().next())
}

fn select_edits(conn: &Connection, filter: &Filter, order_by: &str) -> Result<Vec<EditRow>> {
    select_where(
        conn,
        &format!(
            "SELECT {}, u.username, l.lemmatisierung FROM edits_of_article t
             LEFT JOIN users u ON u.id = t.user_id
             LEFT JOIN lemmas l ON l.id = t.lemma_id",
            EDIT_COLUMNS
        ),
        filter,
        order_by,
        |row| {
            Ok(EditRow {
                edit: row_to_edit(row)?,
                user_name: row.get(11)?,
                lemma_name: row.get(12)?,
            })
        },
    )
}

fn store_edit(conn: &Connection, edit: &mut EditOfArticle, input: EditInput) -> Result<EditRow> {
    if let Some(v) = input.begin_time {
        edit.begin_time = v;
    }
    if let Some(v) = input.step {
        edit.step = v;
    }
    if let Some(v) = input.status {
        edit.status = v;
    }
    if let Some(v) = input.finished_date {
        edit.finished_date = v;
    }
    if let Some(v) = input.description {
        edit.description = v;
    }
    if let Some(v) = input.current {
        edit.current = v;
    }
    if let Some(v) = input.deadline {
        edit.deadline = v;
    }
    if let Some(v) = input.user {
        edit.user = v;
    }
    if let Some(v) = input.lemma {
        edit.lemma = v;
    }
    edit.last_edited = Utc::now();

    ensure_exists(conn, "users", edit.user)?;
    ensure_exists(conn, "lemmas", edit.lemma)?;
    if edit.id == 0 {
        conn.execute(
            "INSERT INTO edits_of_article (begin_time, step, status, finished_date, description,
                current, deadline, last_edited, user_id, lemma_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                edit.begin_time,
                edit.step.as_str(),
                edit.status.as_str(),
                edit.finished_date,
                edit.description,
                edit.current,
                edit.deadline,
                edit.last_edited,
                edit.user,
                edit.lemma
            ],
        )?;
        edit.id = conn.last_insert_rowid();
    } else {
        conn.execute(
            "UPDATE edits_of_article SET begin_time = ?1, step = ?2, status = ?3,
                finished_date = ?4, description = ?5, current = ?6, deadline = ?7,
                last_edited = ?8, user_id = ?9, lemma_id = ?10
             WHERE id = ?11",
            params![
                edit.begin_time,
                edit.step.as_str(),
                edit.status.as_str(),
                edit.finished_date,
                edit.description,
                edit.current,
                edit.deadline,
                edit.last_edited,
                edit.user,
                edit.lemma,
                edit.id
            ],
        )?;
    }
    require(fetch_edit(conn, edit.id)?, "Edit_of_article", edit.id)
}

// --- Collections ---

const COLLECTION_COLUMNS: &str = "t.id, t.title, t.description, t.created_by, t.category_id, \
    t.lemma_id, t.comment, t.public, t.deleted, t.created, t.modified";

fn row_to_collection(row: &Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        category: row.get(4)?,
        lemma_id: row.get(5)?,
        es_document: Vec::new(),
        comment: row.get(6)?,
        curator: Vec::new(),
        public: row.get(7)?,
        deleted: row.get(8)?,
        created: row.get(9)?,
        modified: row.get(10)?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionRow {
    #[serde(flatten)]
    pub collection: Collection,
    pub created_by_name: Option<String>,
    pub beleg_count: i64,
    pub doc_count: i64,
    pub tag_names: Vec<String>,
    pub annotations: Vec<i64>,
    /// es_ids of the documents; only filled for single lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionInput {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub created_by: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub category: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub lemma_id: Option<Option<i64>>,
    pub es_document: Option<Vec<i64>>,
    pub comment: Option<String>,
    pub curator: Option<Vec<i64>>,
    pub public: Option<bool>,
    pub deleted: Option<bool>,
}

const COLLECTION_FIELDS: [&str; 10] = [
    "id",
    "title",
    "description",
    "created_by",
    "lemma_id",
    "comment",
    "public",
    "deleted",
    "created",
    "modified",
];

fn collection_filter(query: &QueryParams) -> Result<Filter> {
    let params = Params(query);
    let mut filter = Filter::default();
    if let Some(v) = params.get("title") {
        filter.icontains("t.title", v);
    }
    if let Some(v) = params.i64("annotations__category")? {
        filter.push(
            "EXISTS (SELECT 1 FROM annotations a WHERE a.collection_id = t.id AND a.category_id = ?)",
            [Value::Integer(v)],
        );
    }
    let tags = params
        .all("tag")
        .into_iter()
        .map(|v| parse_i64("tag", v))
        .collect::<Result<Vec<i64>>>()?;
    if !tags.is_empty() {
        let placeholders = vec!["?"; tags.len()].join(", ");
        filter.push(
            format!(
                "EXISTS (SELECT 1 FROM collection_documents cd
                  JOIN es_document_tags dt ON dt.es_document_id = cd.es_document_id
                  WHERE cd.collection_id = t.id AND dt.tag_id IN ({}))",
                placeholders
            ),
            tags.into_iter().map(Value::Integer),
        );
    }
    if let Some(v) = params.get("category") {
        let names = csv(v);
        if let Some(bad) = names.iter().find(|n| !COLLECTION_CATEGORIES.contains(&n.as_str())) {
            return Err(DboeError::InvalidArgument(format!(
                "Select a valid choice. {} is not one of the available choices.",
                bad
            )));
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        filter.push(
            format!(
                "EXISTS (SELECT 1 FROM categories c WHERE c.id = t.category_id AND c.name IN ({}))",
                placeholders
            ),
            names.into_iter().map(Value::Text),
        );
    }
    if let Some(v) = params.i64("id")? {
        filter.exact("t.id", v);
    }
    if let Some(v) = params.get("id__contains") {
        filter.push("instr(CAST(t.id AS TEXT), ?) > 0", [Value::Text(v.to_string())]);
    }
    for field in ["created_by", "lemma_id"] {
        if let Some(v) = params.i64(field)? {
            filter.exact(&format!("t.{}", field), v);
        }
    }
    for field in ["public", "deleted"] {
        if let Some(v) = params.bool(field)? {
            filter.exact(&format!("t.{}", field), v);
        }
    }
    if let Some(v) = params.i64("annotations")? {
        filter.push(
            "EXISTS (SELECT 1 FROM annotations a WHERE a.collection_id = t.id AND a.id = ?)",
            [Value::Integer(v)],
        );
    }
    if let Some(v) = params.bool("lemma_id__isnull")? {
        filter.isnull("t.lemma_id", v);
    }
    Ok(filter)
}

fn fetch_collection(conn: &Connection, id: i64) -> Result<Option<Collection>> {
    let sql = format!("SELECT {} FROM collections t WHERE t.id = ?1", COLLECTION_COLUMNS);
    let found = conn.query_row(&sql, params![id], row_to_collection).optional()?;
    let Some(mut collection) = found else {
        return Ok(None);
    };
    load_collection_links(conn, &mut collection)?;
    Ok(Some(collection))
}

fn load_collection_links(conn: &Connection, c: &mut Collection) -> Result<()> {
    c.es_document = id_list(
        conn,
        "SELECT es_document_id FROM collection_documents WHERE collection_id = ?1 ORDER BY es_document_id",
        &c.id,
    )?;
    c.curator = id_list(
        conn,
        "SELECT user_id FROM collection_curators WHERE collection_id = ?1 ORDER BY user_id",
        &c.id,
    )?;
    Ok(())
}

fn collection_row(
    conn: &Connection,
    mut collection: Collection,
    with_docs: bool,
) -> Result<CollectionRow> {
    load_collection_links(conn, &mut collection)?;
    let id = collection.id;
    let created_by_name = match collection.created_by {
        Some(user) => conn
            .query_row("SELECT username FROM users WHERE id = ?1", params![user], |row| row.get(0))
            .optional()?,
        None => None,
    };
    let tag_names = string_list(
        conn,
        "SELECT DISTINCT tg.name FROM collection_documents cd
         JOIN es_document_tags dt ON dt.es_document_id = cd.es_document_id
         JOIN tags tg ON tg.id = dt.tag_id
         WHERE cd.collection_id = ?1 ORDER BY tg.name",
        &id,
    )?;
    let annotations = id_list(
        conn,
        "SELECT id FROM annotations WHERE collection_id = ?1 ORDER BY id",
        &id,
    )?;
    let docs = if with_docs {
        Some(string_list(
            conn,
            "SELECT d.es_id FROM collection_documents cd
             JOIN es_documents d ON d.id = cd.es_document_id
             WHERE cd.collection_id = ?1 ORDER BY d.id",
            &id,
        )?)
    } else {
        None
    };
    Ok(CollectionRow {
        beleg_count: count_where(conn, "beleg_collections", "collection_id", &id)?,
        doc_count: collection.es_document.len() as i64,
        collection,
        created_by_name,
        tag_names,
        annotations,
        docs,
    })
}

fn store_collection(
    conn: &Connection,
    c: &mut Collection,
    input: CollectionInput,
) -> Result<CollectionRow> {
    if let Some(v) = input.title {
        c.title = v;
    }
    if let Some(v) = input.description {
        c.description = v;
    }
    if let Some(v) = input.created_by {
        c.created_by = v;
    }
    if let Some(v) = input.category {
        c.category = v;
    }
    if let Some(v) = input.lemma_id {
        c.lemma_id = v;
    }
    if let Some(v) = input.es_document {
        c.es_document = v;
    }
    if let Some(v) = input.comment {
        c.comment = v;
    }
    if let Some(v) = input.curator {
        c.curator = v;
    }
    if let Some(v) = input.public {
        c.public = v;
    }
    if let Some(v) = input.deleted {
        c.deleted = v;
    }
    c.modified = Utc::now();

    check_collection_category(conn, c.category)?;
    ensure_exists(conn, "users", c.created_by)?;
    ensure_exists(conn, "lemmas", c.lemma_id)?;
    for doc in &c.es_document {
        ensure_exists(conn, "es_documents", Some(*doc))?;
    }
    for user in &c.curator {
        ensure_exists(conn, "users", Some(*user))?;
    }
    if c.id == 0 {
        conn.execute(
            "INSERT INTO collections (title, description, created_by, category_id, lemma_id,
                comment, public, deleted, created, modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                c.title,
                c.description,
                c.created_by,
                c.category,
                c.lemma_id,
                c.comment,
                c.public,
                c.deleted,
                c.created,
                c.modified
            ],
        )?;
        c.id = conn.last_insert_rowid();
    } else {
        conn.execute(
            "UPDATE collections SET title = ?1, description = ?2, created_by = ?3,
                category_id = ?4, lemma_id = ?5, comment = ?6, public = ?7, deleted = ?8,
                modified = ?9
             WHERE id = ?10",
            params![
                c.title,
                c.description,
                c.created_by,
                c.category,
                c.lemma_id,
                c.comment,
                c.public,
                c.deleted,
                c.modified,
                c.id
            ],
        )?;
    }
    replace_links(
        conn,
        "collection_documents",
        "collection_id",
        "es_document_id",
        c.id,
        &c.es_document,
    )?;
    replace_links(conn, "collection_curators", "collection_id", "user_id", c.id, &c.curator)?;
    collection_row(conn, c.clone(), true)
}

fn check_collection_category(conn: &Connection, category: Option<i64>) -> Result<()> {
    let Some(id) = category else {
        return Ok(());
    };
    let name: Option<String> = conn
        .query_row("SELECT name FROM categories WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    match name {
        Some(name) if COLLECTION_CATEGORIES.contains(&name.as_str()) => Ok(()),
        _ => Err(DboeError::InvalidArgument(format!(
            "Invalid pk \"{}\" - object does not exist.",
            id
        ))),
    }
}

// --- Annotations ---

const ANNOTATION_COLUMNS: &str = "t.id, t.title, t.collection_id, t.description, \
    t.category_id, t.public, t.created_by, t.created, t.modified";

fn row_to_annotation(row: &Row<'_>) -> rusqlite::Result<Annotation> {
    Ok(Annotation {
        id: row.get(0)?,
        title: row.get(1)?,
        collection: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        public: row.get(5)?,
        created_by: row.get(6)?,
        created: row.get(7)?,
        modified: row.get(8)?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationRow {
    #[serde(flatten)]
    pub annotation: Annotation,
    pub created_by_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnotationInput {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub collection: Option<Option<i64>>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub category: Option<Option<i64>>,
    pub public: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub created_by: Option<Option<i64>>,
}

fn select_annotations(conn: &Connection, filter: &Filter) -> Result<Vec<AnnotationRow>> {
    select_where(
        conn,
        &format!(
            "SELECT {}, u.username FROM annotations t LEFT JOIN users u ON u.id = t.created_by",
            ANNOTATION_COLUMNS
        ),
        filter,
        "t.id",
        |row| {
            Ok(AnnotationRow {
                annotation: row_to_annotation(row)?,
                created_by_name: row.get(9)?,
            })
        },
    )
}

fn store_annotation(
    conn: &Connection,
    a: &mut Annotation,
    input: AnnotationInput,
) -> Result<AnnotationRow> {
    if let Some(v) = input.title {
        a.title = v;
    }
    if let Some(v) = input.collection {
        a.collection = v;
    }
    if let Some(v) = input.description {
        a.description = v;
    }
    if let Some(v) = input.category {
        a.category = v;
    }
    if let Some(v) = input.public {
        a.public = v;
    }
    if let Some(v) = input.created_by {
        a.created_by = v;
    }
    a.modified = Utc::now();
    ensure_exists(conn, "collections", a.collection)?;
    ensure_exists(conn, "categories", a.category)?;
    ensure_exists(conn, "users", a.created_by)?;
    if a.id == 0 {
        conn.execute(
            "INSERT INTO annotations (title, collection_id, description, category_id, public,
                created_by, created, modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                a.title,
                a.collection,
                a.description,
                a.category,
                a.public,
                a.created_by,
                a.created,
                a.modified
            ],
        )?;
        a.id = conn.last_insert_rowid();
    } else {
        conn.execute(
            "UPDATE annotations SET title = ?1, collection_id = ?2, description = ?3,
                category_id = ?4, public = ?5, created_by = ?6, modified = ?7
             WHERE id = ?8",
            params![
                a.title,
                a.collection,
                a.description,
                a.category,
                a.public,
                a.created_by,
                a.modified,
                a.id
            ],
        )?;
    }
    fetch_annotation(conn, a.id)
}

fn fetch_annotation(conn: &Connection, id: i64) -> Result<AnnotationRow> {
    let mut filter = Filter::default();
    filter.exact("t.id", id);
    let found = select_annotations(conn, &filter)?.into_iter().next();
    require(found, "Annotation", id)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutorArtikelInput {
    #[serde(default, deserialize_with = "nullable")]
    pub lemma_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub bearbeiter_id: Option<Option<i64>>,
}

fn fetch_autor_artikel(conn: &Connection, id: i64) -> Result<AutorArtikel> {
    let found = conn
        .query_row(
            "SELECT id, lemma_id, bearbeiter_id FROM autor_artikel WHERE id = ?1",
            params![id],
            |row| {
                Ok(AutorArtikel {
                    id: row.get(0)?,
                    lemma_id: row.get(1)?,
                    bearbeiter_id: row.get(2)?,
                })
            },
        )
        .optional()?;
    require(found, "Autor_Artikel", id)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub note: Option<String>,
    pub notation: Option<String>,
}

fn fetch_category(conn: &Connection, id: i64) -> Result<Category> {
    let found = conn
        .query_row(
            "SELECT id, name, description, note, notation FROM categories WHERE id = ?1",
            params![id],
            row_to_category,
        )
        .optional()?;
    require(found, "Category", id)
}

fn row_to_category(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        note: row.get(3)?,
        notation: row.get(4)?,
    })
}

impl Dboe {
    // --- Users ---

    pub fn list_users(&self, query: &QueryParams) -> Result<Vec<User>> {
        let mut filter = Filter::default();
        if let Some(v) = Params(query).get("username") {
            filter.icontains("t.username", v);
        }
        let conn = self.lock()?;
        select_where(
            &conn,
            "SELECT t.id, t.username, t.date_joined FROM users t",
            &filter,
            "t.date_joined DESC, t.id DESC",
            row_to_user,
        )
    }

    pub fn get_user(&self, id: i64) -> Result<UserDetail> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, username, date_joined FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()?;
        let user = require(user, "User", id)?;
        Ok(UserDetail {
            collections_created: id_list(
                &conn,
                "SELECT id FROM collections WHERE created_by = ?1 ORDER BY id",
                &id,
            )?,
            collections_curated: id_list(
                &conn,
                "SELECT collection_id FROM collection_curators WHERE user_id = ?1 ORDER BY collection_id",
                &id,
            )?,
            annotations_created: id_list(
                &conn,
                "SELECT id FROM annotations WHERE created_by = ?1 ORDER BY id",
                &id,
            )?,
            user,
        })
    }

    pub fn create_user(&self, new: NewUser) -> Result<User> {
        let username = new.username.trim().to_string();
        if username.is_empty() {
            return Err(DboeError::InvalidArgument("username may not be blank".into()));
        }
        let conn = self.lock()?;
        if count_where(&conn, "users", "username", &username)? > 0 {
            return Err(DboeError::Conflict(
                "A user with that username already exists.".into(),
            ));
        }
        let date_joined = Utc::now();
        conn.execute(
            "INSERT INTO users (username, date_joined) VALUES (?1, ?2)",
            params![username, date_joined],
        )?;
        Ok(User {
            id: conn.last_insert_rowid(),
            username,
            date_joined,
        })
    }

    pub fn delete_user(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        delete_by_id(&conn, "users", "User", id)
    }

    // --- Categories ---

    pub fn list_categories(&self, query: &QueryParams) -> Result<Vec<Category>> {
        let mut filter = Filter::default();
        if let Some(v) = Params(query).get("name") {
            filter.icontains("t.name", v);
        }
        let conn = self.lock()?;
        select_where(
            &conn,
            "SELECT t.id, t.name, t.description, t.note, t.notation FROM categories t",
            &filter,
            "t.id",
            row_to_category,
        )
    }

    pub fn get_category(&self, id: i64) -> Result<Category> {
        let conn = self.lock()?;
        fetch_category(&conn, id)
    }

    /// Annotation ids filed under a category.
    pub fn category_annotations(&self, id: i64) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        id_list(
            &conn,
            "SELECT id FROM annotations WHERE category_id = ?1 ORDER BY id",
            &id,
        )
    }

    pub fn create_category(&self, category: &Category) -> Result<Category> {
        if category.name.trim().is_empty() {
            return Err(DboeError::InvalidArgument("name may not be blank".into()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO categories (name, description, note, notation) VALUES (?1, ?2, ?3, ?4)",
            params![category.name, category.description, category.note, category.notation],
        )?;
        Ok(Category {
            id: conn.last_insert_rowid(),
            ..category.clone()
        })
    }

    pub fn update_category(&self, id: i64, input: CategoryInput) -> Result<Category> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut category = fetch_category(&tx, id)?;
        if let Some(v) = input.name {
            category.name = v;
        }
        if let Some(v) = input.description {
            category.description = v;
        }
        if let Some(v) = input.note {
            category.note = v;
        }
        if let Some(v) = input.notation {
            category.notation = v;
        }
        tx.execute(
            "UPDATE categories SET name = ?1, description = ?2, note = ?3, notation = ?4 WHERE id = ?5",
            params![category.name, category.description, category.note, category.notation, id],
        )?;
        tx.commit()?;
        Ok(category)
    }

    /// Categories still used by a collection or annotation cannot be deleted.
    pub fn delete_category(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let used = count_where(&conn, "collections", "category_id", &id)?
            + count_where(&conn, "annotations", "category_id", &id)?;
        if used > 0 {
            return Err(DboeError::Conflict(format!(
                "Category {} is referenced by {} records",
                id, used
            )));
        }
        delete_by_id(&conn, "categories", "Category", id)
    }

    // --- Tags ---

    pub fn list_tags(&self, query: &QueryParams) -> Result<Vec<TagRow>> {
        let params = Params(query);
        let mut filter = Filter::default();
        for field in ["name", "color"] {
            if let Some(v) = params.get(field) {
                filter.icontains(&format!("t.{}", field), v);
            }
        }
        let conn = self.lock()?;
        select_where(
            &conn,
            "SELECT t.id, t.name, t.color, t.meta,
                (SELECT COUNT(*) FROM beleg_tags bt WHERE bt.tag_id = t.id)
             FROM tags t",
            &filter,
            "t.name, t.id",
            |row| {
                Ok(TagRow {
                    tag: row_to_tag(row)?,
                    belege_count: row.get(4)?,
                    belege_ids: None,
                })
            },
        )
    }

    pub fn get_tag(&self, id: i64) -> Result<TagRow> {
        let conn = self.lock()?;
        fetch_tag(&conn, id)
    }

    /// Returns the tag with this name, creating it when missing.
    pub fn create_tag(&self, input: TagInput) -> Result<TagRow> {
        let name = input
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| DboeError::InvalidArgument("name may not be blank".into()))?;
        let conn = self.lock()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM tags WHERE name = ?1 ORDER BY id LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                let meta = input.meta.flatten().as_ref().map(to_json_text).transpose()?;
                conn.execute(
                    "INSERT INTO tags (name, color, meta) VALUES (?1, ?2, ?3)",
                    params![name, input.color.unwrap_or_default(), meta],
                )?;
                conn.last_insert_rowid()
            }
        };
        fetch_tag(&conn, id)
    }

    pub fn update_tag(&self, id: i64, input: TagInput) -> Result<TagRow> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut tag = fetch_tag(&tx, id)?.tag;
        if let Some(v) = input.name {
            tag.name = v;
        }
        if let Some(v) = input.color {
            tag.color = v;
        }
        if let Some(v) = input.meta {
            tag.meta = v;
        }
        let meta = tag.meta.as_ref().map(to_json_text).transpose()?;
        tx.execute(
            "UPDATE tags SET name = ?1, color = ?2, meta = ?3 WHERE id = ?4",
            params![tag.name, tag.color, meta, id],
        )?;
        let row = fetch_tag(&tx, id)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn delete_tag(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        delete_by_id(&conn, "tags", "Tag", id)
    }

    // --- Documents ---

    /// Lists documents; `es_id__startswith` and `cache_only` switch the view.
    pub fn list_documents(&self, query: &QueryParams) -> Result<(DocumentView, Vec<DocumentRow>)> {
        let params = Params(query);
        let mut filter = Filter::default();
        let mut view = DocumentView::Default;

        let prefix = params
            .get("es_id__startswith")
            .map(str::to_lowercase)
            .filter(|p| p.chars().count() > 1 && p != "none");
        if let Some(prefix) = prefix {
            filter.istartswith("t.es_id", &prefix);
            view = DocumentView::Scans;
        } else if params.get("cache_only").is_some() {
            filter.push("t.xml <> ''", []);
            view = DocumentView::Cache;
        }
        if let Some(v) = params.get("es_id") {
            filter.exact("t.es_id", v.to_string());
        }
        if let Some(v) = params.get("index") {
            filter.exact("t.idx", v.to_string());
        }
        if let Some(v) = params.i64("version")? {
            filter.exact("t.version", v);
        }
        if let Some(v) = params.i64("in_collections")? {
            filter.push(
                "EXISTS (SELECT 1 FROM collection_documents cd WHERE cd.es_document_id = t.id AND cd.collection_id = ?)",
                [Value::Integer(v)],
            );
        }
        if let Some(v) = params.i64("tag")? {
            filter.push(
                "EXISTS (SELECT 1 FROM es_document_tags dt WHERE dt.es_document_id = t.id AND dt.tag_id = ?)",
                [Value::Integer(v)],
            );
        }

        let conn = self.lock()?;
        let docs = select_where(
            &conn,
            &format!("SELECT {} FROM es_documents t", DOCUMENT_COLUMNS),
            &filter,
            "t.id",
            row_to_document,
        )?;
        let rows = docs
            .into_iter()
            .map(|mut d| {
                d.tag = document_tags(&conn, d.id)?;
                document_row(&conn, d)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((view, rows))
    }

    pub fn get_document(&self, id: i64) -> Result<DocumentRow> {
        let conn = self.lock()?;
        let doc = require(fetch_document(&conn, id)?, "Es_document", id)?;
        document_row(&conn, doc)
    }

    /// Get-or-create by `es_id`; a new document takes the remaining fields.
    pub fn create_document(&self, input: DocumentInput) -> Result<DocumentRow> {
        check_xml(&input.xml)?;
        let es_id = input
            .es_id
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| DboeError::InvalidArgument("es_id is required".into()))?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let doc = match fetch_document_by_es_id(&tx, &es_id)? {
            Some(doc) => doc,
            None => {
                let mut doc = EsDocument::default();
                apply_document_input(&mut doc, input);
                store_document(&tx, &mut doc)?;
                doc
            }
        };
        let row = document_row(&tx, doc)?;
        tx.commit()?;
        Ok(row)
    }

    /// Get-or-create for every entry, all in one transaction.
    pub fn create_documents(&self, inputs: Vec<DocumentInput>) -> Result<Vec<DocumentRow>> {
        for input in &inputs {
            check_xml(&input.xml)?;
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut rows = Vec::with_capacity(inputs.len());
        for input in inputs {
            let es_id = input
                .es_id
                .clone()
                .filter(|e| !e.is_empty())
                .ok_or_else(|| DboeError::InvalidArgument("es_id is required".into()))?;
            let doc = match fetch_document_by_es_id(&tx, &es_id)? {
                Some(doc) => doc,
                None => {
                    let mut doc = EsDocument {
                        es_id,
                        index: input.index.flatten(),
                        version: input.version.flatten(),
                        scans: input.scans.flatten(),
                        ..Default::default()
                    };
                    store_document(&tx, &mut doc)?;
                    doc
                }
            };
            rows.push(document_row(&tx, doc)?);
        }
        tx.commit()?;
        Ok(rows)
    }

    pub fn update_document(&self, id: i64, input: DocumentInput) -> Result<DocumentRow> {
        check_xml(&input.xml)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut doc = require(fetch_document(&tx, id)?, "Es_document", id)?;
        apply_document_input(&mut doc, input);
        store_document(&tx, &mut doc)?;
        let row = document_row(&tx, doc)?;
        tx.commit()?;
        Ok(row)
    }

    /// PATCH on a document: only the cached xml and its error message.
    pub fn patch_document_xml(
        &self,
        id: i64,
        xml: Option<String>,
        xml_error_message: Option<String>,
    ) -> Result<DocumentRow> {
        check_xml(&xml).map_err(|e| DboeError::Conflict(e.to_string()))?;
        self.update_document(
            id,
            DocumentInput {
                xml,
                xml_error_message,
                ..Default::default()
            },
        )
    }

    /// Partial updates keyed by `es_id`. Stops with `NotFound` at the first
    /// unknown id; entries with invalid xml are skipped.
    pub fn update_documents_by_es_id(&self, inputs: Vec<DocumentInput>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for input in inputs {
            let es_id = input.es_id.clone().unwrap_or_default();
            let mut doc = require(fetch_document_by_es_id(&tx, &es_id)?, "Es_document", &es_id)?;
            if let Err(e) = check_xml(&input.xml) {
                warn!("Skipping update of document {}: {}", es_id, e);
                continue;
            }
            apply_document_input(&mut doc, input);
            store_document(&tx, &mut doc)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_document(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        delete_by_id(&conn, "es_documents", "Es_document", id)
    }

    // --- Lemmas ---

    pub fn list_lemmas(&self, query: &QueryParams) -> Result<Vec<LemmaRow>> {
        let filter = lemma_filter(query)?;
        let order_by = Params(query).ordering(&LEMMA_FIELDS, "t.id");
        let conn = self.lock()?;
        let lemmas = select_where(
            &conn,
            &format!("SELECT {} FROM lemmas t", LEMMA_COLUMNS),
            &filter,
            &order_by,
            row_to_lemma,
        )?;
        lemmas.into_iter().map(|l| lemma_row(&conn, l)).collect()
    }

    pub fn get_lemma(&self, id: i64) -> Result<LemmaRow> {
        let conn = self.lock()?;
        let lemma = require(fetch_lemma(&conn, id)?, "Lemma", id)?;
        lemma_row(&conn, lemma)
    }

    pub fn create_lemma(&self, input: LemmaInput) -> Result<LemmaRow> {
        let org = input
            .org
            .clone()
            .filter(|o| !o.trim().is_empty())
            .ok_or_else(|| DboeError::InvalidArgument("org may not be blank".into()))?;
        let mut lemma = Lemma {
            org,
            ..Default::default()
        };
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let row = store_lemma(&tx, &mut lemma, input)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn update_lemma(&self, id: i64, input: LemmaInput) -> Result<LemmaRow> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut lemma = require(fetch_lemma(&tx, id)?, "Lemma", id)?;
        let row = store_lemma(&tx, &mut lemma, input)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn delete_lemma(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        delete_by_id(&conn, "lemmas", "Lemma", id)
    }

    // --- Edits of article ---

    pub fn list_edits(&self, query: &QueryParams) -> Result<EditListing> {
        let params = Params(query);
        let filter = edit_filter(query)?;
        let reporting = choice("reporting", params.i64("reporting")?, &[0, 1, 2])?;
        let conn = self.lock()?;
        match reporting {
            None => {
                let order_by = params.ordering(&EDIT_FIELDS, "t.id");
                let order_by = order_by
                    .replace("t.user ", "t.user_id ")
                    .replace("t.lemma ", "t.lemma_id ");
                Ok(EditListing::Rows(select_edits(&conn, &filter, &order_by)?))
            }
            Some(0) => {
                let sql = format!(
                    "SELECT t.step, t.status, COUNT(t.step), COUNT(t.status) FROM edits_of_article t{}
                     GROUP BY t.step, t.status ORDER BY t.step, t.status",
                    filter.where_clause()
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(filter.params()), |row| {
                    Ok(StepStatusCount {
                        step: enum_column(row, 0)?,
                        status: enum_column(row, 1)?,
                        steps: row.get(2)?,
                        stati: row.get(3)?,
                    })
                })?;
                Ok(EditListing::ByStepStatus(
                    rows.collect::<rusqlite::Result<Vec<_>>>()?,
                ))
            }
            Some(1) => {
                let rows = select_where(
                    &conn,
                    "SELECT l.lemmatisierung, u.username,
                        (SELECT COUNT(cd.es_document_id) FROM collections c
                         JOIN categories cat ON cat.id = c.category_id
                         JOIN collection_documents cd ON cd.collection_id = c.id
                         WHERE c.lemma_id = t.lemma_id AND cat.name = 'lemma')
                     FROM edits_of_article t
                     LEFT JOIN users u ON u.id = t.user_id
                     LEFT JOIN lemmas l ON l.id = t.lemma_id",
                    &filter,
                    "t.id",
                    |row| {
                        Ok(LemmaUserCount {
                            lemmatisierung: row.get(0)?,
                            username: row.get(1)?,
                            document_count: row.get(2)?,
                        })
                    },
                )?;
                Ok(EditListing::ByLemmaUser(rows))
            }
            Some(_) => {
                let sql = format!(
                    "SELECT u.username, COUNT(DISTINCT t.lemma_id) FROM edits_of_article t
                     LEFT JOIN users u ON u.id = t.user_id{}
                     GROUP BY u.username ORDER BY u.username",
                    filter.where_clause()
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(filter.params()), |row| {
                    Ok(UserLemmaCount {
                        username: row.get(0)?,
                        lemma_count: row.get(1)?,
                    })
                })?;
                Ok(EditListing::ByUser(rows.collect::<rusqlite::Result<Vec<_>>>()?))
            }
        }
    }

    pub fn get_edit(&self, id: i64) -> Result<EditRow> {
        let conn = self.lock()?;
        require(fetch_edit(&conn, id)?, "Edit_of_article", id)
    }

    pub fn create_edit(&self, input: EditInput) -> Result<EditRow> {
        let (Some(step), Some(status)) = (input.step, input.status) else {
            return Err(DboeError::InvalidArgument("step and status are required".into()));
        };
        let now = Utc::now();
        let mut edit = EditOfArticle {
            id: 0,
            begin_time: now,
            step,
            status,
            finished_date: None,
            description: String::new(),
            current: false,
            deadline: None,
            last_edited: now,
            user: None,
            lemma: None,
        };
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let row = store_edit(&tx, &mut edit, input)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn update_edit(&self, id: i64, input: EditInput) -> Result<EditRow> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut edit = require(fetch_edit(&tx, id)?, "Edit_of_article", id)?.edit;
        let row = store_edit(&tx, &mut edit, input)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn delete_edit(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        delete_by_id(&conn, "edits_of_article", "Edit_of_article", id)
    }

    // --- Collections ---

    pub fn list_collections(&self, query: &QueryParams) -> Result<Vec<CollectionRow>> {
        let filter = collection_filter(query)?;
        let order_by = Params(query).ordering(&COLLECTION_FIELDS, "t.id");
        let started = std::time::Instant::now();
        let conn = self.lock()?;
        let collections = select_where(
            &conn,
            &format!("SELECT {} FROM collections t", COLLECTION_COLUMNS),
            &filter,
            &order_by,
            row_to_collection,
        )?;
        let rows = collections
            .into_iter()
            .map(|c| collection_row(&conn, c, false))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "Collected {} collections in {:?}",
            rows.len(),
            started.elapsed()
        );
        Ok(rows)
    }

    pub fn get_collection(&self, id: i64) -> Result<CollectionRow> {
        let conn = self.lock()?;
        let collection = require(fetch_collection(&conn, id)?, "Collection", id)?;
        collection_row(&conn, collection, true)
    }

    pub fn create_collection(&self, input: CollectionInput) -> Result<CollectionRow> {
        let now = Utc::now();
        let mut collection = Collection {
            id: 0,
            title: String::new(),
            description: String::new(),
            created_by: None,
            category: None,
            lemma_id: None,
            es_document: Vec::new(),
            comment: String::new(),
            curator: Vec::new(),
            public: false,
            deleted: false,
            created: now,
            modified: now,
        };
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let row = store_collection(&tx, &mut collection, input)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn update_collection(&self, id: i64, input: CollectionInput) -> Result<CollectionRow> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut collection = require(fetch_collection(&tx, id)?, "Collection", id)?;
        let row = store_collection(&tx, &mut collection, input)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn delete_collection(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        delete_by_id(&conn, "collections", "Collection", id)
    }

    // --- Beleg <-> Collection ---

    pub fn add_beleg_to_collection(&self, beleg_id: &str, collection_id: i64) -> Result<()> {
        let conn = self.lock()?;
        require(crate::belege::fetch_beleg(&conn, beleg_id)?, "Beleg", beleg_id)?;
        require(fetch_collection(&conn, collection_id)?, "Collection", collection_id)?;
        conn.execute(
            "INSERT OR IGNORE INTO beleg_collections (beleg_id, collection_id) VALUES (?1, ?2)",
            params![beleg_id, collection_id],
        )?;
        Ok(())
    }

    pub fn remove_beleg_from_collection(&self, beleg_id: &str, collection_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM beleg_collections WHERE beleg_id = ?1 AND collection_id = ?2",
            params![beleg_id, collection_id],
        )?;
        Ok(())
    }

    pub fn beleg_collections(&self, beleg_id: &str) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        id_list(
            &conn,
            "SELECT collection_id FROM beleg_collections WHERE beleg_id = ?1 ORDER BY collection_id",
            &beleg_id,
        )
    }

    // --- Annotations ---

    pub fn list_annotations(&self, query: &QueryParams) -> Result<Vec<AnnotationRow>> {
        let params = Params(query);
        let mut filter = Filter::default();
        for field in ["title", "description"] {
            if let Some(v) = params.get(field) {
                filter.icontains(&format!("t.{}", field), v);
            }
        }
        for (key, column) in [
            ("collection", "t.collection_id"),
            ("category", "t.category_id"),
            ("created_by", "t.created_by"),
        ] {
            if let Some(v) = params.i64(key)? {
                filter.exact(column, v);
            }
        }
        let conn = self.lock()?;
        select_annotations(&conn, &filter)
    }

    pub fn get_annotation(&self, id: i64) -> Result<AnnotationRow> {
        let conn = self.lock()?;
        fetch_annotation(&conn, id)
    }

    pub fn create_annotation(&self, input: AnnotationInput) -> Result<AnnotationRow> {
        let now = Utc::now();
        let mut annotation = Annotation {
            id: 0,
            title: String::new(),
            collection: None,
            description: String::new(),
            category: None,
            public: false,
            created_by: None,
            created: now,
            modified: now,
        };
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let row = store_annotation(&tx, &mut annotation, input)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn update_annotation(&self, id: i64, input: AnnotationInput) -> Result<AnnotationRow> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut annotation = fetch_annotation(&tx, id)?.annotation;
        let row = store_annotation(&tx, &mut annotation, input)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn delete_annotation(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        delete_by_id(&conn, "annotations", "Annotation", id)
    }

    // --- Autor_Artikel ---

    pub fn list_autor_artikel(&self) -> Result<Vec<AutorArtikel>> {
        let conn = self.lock()?;
        select_where(
            &conn,
            "SELECT t.id, t.lemma_id, t.bearbeiter_id FROM autor_artikel t",
            &Filter::default(),
            "t.id",
            |row| {
                Ok(AutorArtikel {
                    id: row.get(0)?,
                    lemma_id: row.get(1)?,
                    bearbeiter_id: row.get(2)?,
                })
            },
        )
    }

    pub fn get_autor_artikel(&self, id: i64) -> Result<AutorArtikel> {
        let conn = self.lock()?;
        fetch_autor_artikel(&conn, id)
    }

    pub fn save_autor_artikel(
        &self,
        id: Option<i64>,
        input: AutorArtikelInput,
    ) -> Result<AutorArtikel> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut record = match id {
            Some(id) => fetch_autor_artikel(&tx, id)?,
            None => AutorArtikel {
                id: 0,
                lemma_id: None,
                bearbeiter_id: None,
            },
        };
        if let Some(v) = input.lemma_id {
            record.lemma_id = v;
        }
        if let Some(v) = input.bearbeiter_id {
            record.bearbeiter_id = v;
        }
        ensure_exists(&tx, "lemmas", record.lemma_id)?;
        ensure_exists(&tx, "users", record.bearbeiter_id)?;
        if record.id == 0 {
            tx.execute(
                "INSERT INTO autor_artikel (lemma_id, bearbeiter_id) VALUES (?1, ?2)",
                params![record.lemma_id, record.bearbeiter_id],
            )?;
            record.id = tx.last_insert_rowid();
        } else {
            tx.execute(
                "UPDATE autor_artikel SET lemma_id = ?1, bearbeiter_id = ?2 WHERE id = ?3",
                params![record.lemma_id, record.bearbeiter_id, record.id],
            )?;
        }
        tx.commit()?;
        Ok(record)
    }

    pub fn delete_autor_artikel(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        delete_by_id(&conn, "autor_artikel", "Autor_Artikel", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncOptions;

    fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store() -> Dboe {
        Dboe::open_in_memory().unwrap()
    }

    fn category(dboe: &Dboe, name: &str) -> i64 {
        dboe.create_category(&Category {
            name: name.into(),
            ..Default::default()
        })
        .unwrap()
        .id
    }

    fn lemma(dboe: &Dboe, org: &str, simplex: Option<i64>) -> i64 {
        dboe.create_lemma(LemmaInput {
            org: Some(org.into()),
            lemmatisierung: Some(Some(org.to_lowercase())),
            simplex: Some(simplex),
            ..Default::default()
        })
        .unwrap()
        .lemma
        .id
    }

    #[test]
    fn test_users_and_detail_links() {
        let dboe = store();
        let anna = dboe.create_user(NewUser { username: "anna".into() }).unwrap();
        assert!(matches!(
            dboe.create_user(NewUser { username: "anna".into() }),
            Err(DboeError::Conflict(_))
        ));
        let coll = dboe
            .create_collection(CollectionInput {
                title: Some("Haus".into()),
                created_by: Some(Some(anna.id)),
                curator: Some(vec![anna.id]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(coll.created_by_name.as_deref(), Some("anna"));
        let detail = dboe.get_user(anna.id).unwrap();
        assert_eq!(detail.collections_created, vec![coll.collection.id]);
        assert_eq!(detail.collections_curated, vec![coll.collection.id]);
        assert_eq!(dboe.list_users(&q(&[("username", "ANN")])).unwrap().len(), 1);
    }

    #[test]
    fn test_tag_create_is_get_or_create() {
        let dboe = store();
        let first = dboe
            .create_tag(TagInput {
                name: Some("rot".into()),
                color: Some("#f00".into()),
                meta: None,
            })
            .unwrap();
        let again = dboe
            .create_tag(TagInput {
                name: Some("rot".into()),
                color: Some("#00f".into()),
                meta: None,
            })
            .unwrap();
        assert_eq!(first.tag.id, again.tag.id);
        assert_eq!(again.tag.color, "#f00");

        dboe.save_beleg("b1", None, SyncOptions::none()).unwrap();
        dboe.update_beleg(
            "b1",
            crate::belege::BelegUpdate {
                modify_tag: Some(vec![first.tag.id]),
                ..Default::default()
            },
        )
        .unwrap();
        let listed = dboe.list_tags(&q(&[("color", "F0")])).unwrap();
        assert_eq!(listed[0].belege_count, 1);
        assert!(listed[0].belege_ids.is_none());
        assert_eq!(
            dboe.get_tag(first.tag.id).unwrap().belege_ids,
            Some(vec!["b1".to_string()])
        );
    }

    #[test]
    fn test_documents_views_and_xml_validation() {
        let dboe = store();
        assert!(matches!(
            dboe.create_document(DocumentInput {
                es_id: Some("abc.1".into()),
                xml: Some("<entry>".into()),
                ..Default::default()
            }),
            Err(DboeError::InvalidArgument(_))
        ));
        let doc = dboe
            .create_document(DocumentInput {
                es_id: Some("abc.1".into()),
                xml: Some("<entry/>".into()),
                ..Default::default()
            })
            .unwrap();
        dboe.create_documents(vec![
            DocumentInput {
                es_id: Some("abc.1".into()),
                ..Default::default()
            },
            DocumentInput {
                es_id: Some("xyz.2".into()),
                scans: Some(Some(vec!["s1.jpg".into()])),
                ..Default::default()
            },
        ])
        .unwrap();
        assert_eq!(dboe.list_documents(&[]).unwrap().1.len(), 2);

        let (view, rows) = dboe.list_documents(&q(&[("es_id__startswith", "ABC")])).unwrap();
        assert_eq!(view, DocumentView::Scans);
        assert_eq!(rows.len(), 1);
        let (view, rows) = dboe.list_documents(&q(&[("cache_only", "true")])).unwrap();
        assert_eq!(view, DocumentView::Cache);
        assert_eq!(rows[0].document.id, doc.document.id);
        let (view, _) = dboe.list_documents(&q(&[("es_id__startswith", "a")])).unwrap();
        assert_eq!(view, DocumentView::Default);

        assert!(matches!(
            dboe.patch_document_xml(doc.document.id, Some("<a>".into()), None),
            Err(DboeError::Conflict(_))
        ));
        let patched = dboe
            .patch_document_xml(doc.document.id, None, Some("bad".into()))
            .unwrap();
        assert_eq!(patched.document.xml_error_message, "bad");

        assert!(matches!(
            dboe.update_documents_by_es_id(vec![DocumentInput {
                es_id: Some("missing".into()),
                ..Default::default()
            }]),
            Err(DboeError::NotFound { .. })
        ));
        dboe.update_documents_by_es_id(vec![DocumentInput {
            es_id: Some("xyz.2".into()),
            version: Some(Some(3)),
            ..Default::default()
        }])
        .unwrap();
        let rows = dboe.list_documents(&q(&[("version", "3")])).unwrap().1;
        assert_eq!(rows[0].document.es_id, "xyz.2");
    }

    #[test]
    fn test_lemma_task_and_collection_filters() {
        let dboe = store();
        let user = dboe.create_user(NewUser { username: "eva".into() }).unwrap();
        let haus = lemma(&dboe, "Haus", None);
        let hausherr = lemma(&dboe, "Hausherr", Some(haus));
        let hof = lemma(&dboe, "Hof", None);
        dboe.create_edit(EditInput {
            step: Some(Step::Zugewiesen),
            status: Some(Status::Draft),
            current: Some(true),
            user: Some(Some(user.id)),
            lemma: Some(Some(haus)),
            ..Default::default()
        })
        .unwrap();

        let ids = |params: &[(&str, &str)]| -> Vec<i64> {
            dboe.list_lemmas(&q(params))
                .unwrap()
                .into_iter()
                .map(|l| l.lemma.id)
                .collect()
        };
        assert_eq!(ids(&[("task", "0")]), vec![hof]);
        assert_eq!(ids(&[("task", "1")]), vec![haus, hausherr]);
        assert_eq!(ids(&[("task", "2")]), vec![hausherr, hof]);
        let user_id = user.id.to_string();
        assert_eq!(ids(&[("users", user_id.as_str())]), vec![haus, hausherr]);
        assert_eq!(ids(&[("has__simplex", "false")]), vec![hausherr]);
        assert_eq!(ids(&[("simplex__lemmatisierung", "HAUS")]), vec![hausherr]);
        assert!(dboe.list_lemmas(&q(&[("task", "7")])).is_err());

        let lemma_cat = category(&dboe, "lemma");
        dboe.create_collection(CollectionInput {
            category: Some(Some(lemma_cat)),
            lemma_id: Some(Some(hof)),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ids(&[("collection", "0")]), vec![hof]);
        assert_eq!(ids(&[("has_collection", "1")]), vec![haus, hausherr]);
        assert_eq!(ids(&[("has_editor", "1")]), vec![hausherr, hof]);

        let row = dboe.get_lemma(hausherr).unwrap();
        assert_eq!(row.art_lemmatisierung.as_deref(), Some("haus"));
        let task = row.assigned_task.unwrap();
        assert_eq!(task.user_name, "eva");
        assert!(dboe.get_lemma(hof).unwrap().assigned_task.is_none());
    }

    #[test]
    fn test_edit_filters_and_reporting() {
        let dboe = store();
        let user = dboe.create_user(NewUser { username: "eva".into() }).unwrap();
        let haus = lemma(&dboe, "Haus", None);
        let first = dboe
            .create_edit(EditInput {
                step: Some(Step::Zugewiesen),
                status: Some(Status::Draft),
                current: Some(true),
                user: Some(Some(user.id)),
                lemma: Some(Some(haus)),
                ..Default::default()
            })
            .unwrap();
        dboe.create_edit(EditInput {
            step: Some(Step::Irrelevant),
            status: Some(Status::FinalVersion),
            current: Some(true),
            lemma: Some(Some(haus)),
            ..Default::default()
        })
        .unwrap();
        let updated = dboe
            .update_edit(
                first.edit.id,
                EditInput {
                    description: Some("begonnen".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.edit.last_edited >= first.edit.last_edited);
        assert_eq!(updated.user_name.as_deref(), Some("eva"));
        assert_eq!(updated.lemma_name.as_deref(), Some("haus"));

        let rows = |params: &[(&str, &str)]| match dboe.list_edits(&q(params)).unwrap() {
            EditListing::Rows(rows) => rows.len(),
            other => panic!("unexpected listing {:?}", other),
        };
        assert_eq!(rows(&[("currentstatus", "0")]), 1);
        assert_eq!(rows(&[("currentstatus", "2")]), 1);
        assert_eq!(rows(&[("mytasks", "0")]), 1);
        assert_eq!(rows(&[("user", "EV")]), 1);
        assert_eq!(rows(&[("step", "IRRELEVANT")]), 1);
        assert!(dboe.list_edits(&q(&[("step", "UNKNOWN")])).is_err());

        match dboe.list_edits(&q(&[("reporting", "0")])).unwrap() {
            EditListing::ByStepStatus(groups) => assert_eq!(groups.len(), 2),
            other => panic!("unexpected listing {:?}", other),
        }
        match dboe.list_edits(&q(&[("reporting", "2")])).unwrap() {
            EditListing::ByUser(groups) => {
                assert_eq!(groups.len(), 2);
                assert!(groups.iter().all(|g| g.lemma_count == 1));
            }
            other => panic!("unexpected listing {:?}", other),
        }
        match dboe.list_edits(&q(&[("reporting", "1")])).unwrap() {
            EditListing::ByLemmaUser(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].document_count, 0);
            }
            other => panic!("unexpected listing {:?}", other),
        }
    }

    #[test]
    fn test_edit_update_clears_and_keeps_on_error() {
        let dboe = store();
        let user = dboe.create_user(NewUser { username: "ida".into() }).unwrap();
        let haus = lemma(&dboe, "Haus", None);
        let id = dboe
            .create_edit(EditInput {
                step: Some(Step::Zugewiesen),
                status: Some(Status::Draft),
                deadline: Some(Some(Utc::now())),
                user: Some(Some(user.id)),
                lemma: Some(Some(haus)),
                ..Default::default()
            })
            .unwrap()
            .edit
            .id;

        let rejected = dboe.update_edit(
            id,
            EditInput {
                description: Some("verworfen".into()),
                lemma: Some(Some(999)),
                ..Default::default()
            },
        );
        assert!(matches!(rejected, Err(DboeError::InvalidArgument(_))));
        let unchanged = dboe.get_edit(id).unwrap();
        assert_eq!(unchanged.edit.description, "");
        assert_eq!(unchanged.edit.lemma, Some(haus));

        let cleared = dboe
            .update_edit(
                id,
                EditInput {
                    deadline: Some(None),
                    user: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cleared.edit.deadline, None);
        assert_eq!(cleared.edit.user, None);
        assert_eq!(cleared.user_name, None);
        assert_eq!(cleared.edit.lemma, Some(haus));
    }

    #[test]
    fn test_collection_category_and_filters() {
        let dboe = store();
        let other = category(&dboe, "misc");
        let sense = category(&dboe, "sense");
        assert!(matches!(
            dboe.create_collection(CollectionInput {
                category: Some(Some(other)),
                ..Default::default()
            }),
            Err(DboeError::InvalidArgument(_))
        ));
        let tag = dboe
            .create_tag(TagInput {
                name: Some("blau".into()),
                ..Default::default()
            })
            .unwrap();
        let doc = dboe
            .create_document(DocumentInput {
                es_id: Some("d1".into()),
                tag: Some(vec![tag.tag.id]),
                ..Default::default()
            })
            .unwrap();
        let coll = dboe
            .create_collection(CollectionInput {
                title: Some("Bedeutungen".into()),
                category: Some(Some(sense)),
                es_document: Some(vec![doc.document.id]),
                public: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(coll.doc_count, 1);
        assert_eq!(coll.tag_names, vec!["blau".to_string()]);
        assert_eq!(coll.docs, Some(vec!["d1".to_string()]));

        dboe.save_beleg("b1", None, SyncOptions::none()).unwrap();
        dboe.add_beleg_to_collection("b1", coll.collection.id).unwrap();
        let listed = dboe.list_collections(&q(&[("category", "sense,lemma")])).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].beleg_count, 1);
        assert!(listed[0].docs.is_none());
        let tag_id = tag.tag.id.to_string();
        assert_eq!(dboe.list_collections(&q(&[("tag", tag_id.as_str())])).unwrap().len(), 1);
        assert!(dboe.list_collections(&q(&[("public", "false")])).unwrap().is_empty());
        assert!(dboe.list_collections(&q(&[("category", "misc")])).is_err());
        assert!(matches!(dboe.delete_category(sense), Err(DboeError::Conflict(_))));

        let before = coll.collection.modified;
        let updated = dboe
            .update_collection(
                coll.collection.id,
                CollectionInput {
                    deleted: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.collection.deleted);
        assert!(updated.collection.modified >= before);
        assert_eq!(updated.collection.created, coll.collection.created);
    }

    #[test]
    fn test_annotations_and_autor_artikel() {
        let dboe = store();
        let cat = category(&dboe, "etymology");
        let coll = dboe.create_collection(CollectionInput::default()).unwrap();
        let ann = dboe
            .create_annotation(AnnotationInput {
                title: Some("Herkunft".into()),
                collection: Some(Some(coll.collection.id)),
                category: Some(Some(cat)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            dboe.list_annotations(&q(&[("title", "herk")])).unwrap().len(),
            1
        );
        assert_eq!(dboe.category_annotations(cat).unwrap(), vec![ann.annotation.id]);
        assert_eq!(
            dboe.get_collection(coll.collection.id).unwrap().annotations,
            vec![ann.annotation.id]
        );
        // deleting the collection keeps the annotation
        dboe.delete_collection(coll.collection.id).unwrap();
        assert_eq!(dboe.get_annotation(ann.annotation.id).unwrap().annotation.collection, None);

        assert!(dboe
            .save_autor_artikel(None, AutorArtikelInput {
                lemma_id: Some(Some(99)),
                bearbeiter_id: None,
            })
            .is_err());
        let haus = lemma(&dboe, "Haus", None);
        let record = dboe
            .save_autor_artikel(None, AutorArtikelInput {
                lemma_id: Some(Some(haus)),
                bearbeiter_id: None,
            })
            .unwrap();
        assert_eq!(dboe.list_autor_artikel().unwrap(), vec![record.clone()]);
        dboe.delete_autor_artikel(record.id).unwrap();
        assert!(dboe.get_autor_artikel(record.id).is_err());
    }
}
