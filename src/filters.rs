//! Query-string filters compiled to parameterised SQL.
//!
//! Two flavours exist: the dynamic filter set derived from a table's field
//! metadata, and hand-declared filter sets built from the lookup helpers on
//! [`Filter`]. Values only ever travel as bound parameters.

use crate::error::{DboeError, Result};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::Value;

/// Query string pairs in request order. Repeated keys are kept.
pub type QueryParams = [(String, String)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Integer,
    ForeignKey,
    /// `table` links `own_column` (this row's key) to `other_column`.
    ManyToMany {
        table: &'static str,
        own_column: &'static str,
        other_column: &'static str,
    },
    /// JSON and array columns; not filterable.
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldDef {
    FieldDef { name, column: name, kind }
}

const fn fk(name: &'static str, column: &'static str) -> FieldDef {
    FieldDef { name, column, kind: FieldKind::ForeignKey }
}

const fn m2m(
    name: &'static str,
    table: &'static str,
    own_column: &'static str,
    other_column: &'static str,
) -> FieldDef {
    FieldDef {
        name,
        column: "",
        kind: FieldKind::ManyToMany { table, own_column, other_column },
    }
}

/// Field metadata of one table. Queries alias the table as `t`.
#[derive(Debug)]
pub struct ModelDef {
    pub table: &'static str,
    pub pk: &'static str,
    /// Whether the primary key is a `dboe_id`; enables the `ids` filter.
    pub has_dboe_id: bool,
    pub fields: &'static [FieldDef],
}

use FieldKind::{Bool, Integer, Json, Text};

pub static BELEG_MODEL: ModelDef = ModelDef {
    table: "belege",
    pk: "dboe_id",
    has_dboe_id: true,
    fields: &[
        field("dboe_id", Text),
        field("orig_xml", Text),
        field("xeno_data", Text),
        field("hauptlemma", Text),
        field("nebenlemma", Text),
        field("archivzeile", Text),
        field("quelle", Text),
        field("quelle_page", Text),
        field("quelle_bearbeitet", Text),
        field("bibl", Text),
        field("zitierweise", Json),
        field("pos", Text),
        field("ref_type_dbo", Text),
        field("ref_type_sni", Text),
        field("xr_type_verweise_o", Text),
        field("xr_type_verweise_b", Text),
        field("fragebogen_nummer", Text),
        field("etym", Json),
        field("note_notabene", Json),
        field("note_diverse", Json),
        field("import_issue", Bool),
        m2m("facs", "beleg_facs", "beleg_id", "facsimile_id"),
        m2m("tag", "beleg_tags", "beleg_id", "tag_id"),
        m2m("collection", "beleg_collections", "beleg_id", "collection_id"),
        m2m("sigle", "beleg_siglen", "beleg_id", "sigle_id"),
    ],
};

pub static CITATION_MODEL: ModelDef = ModelDef {
    table: "citations",
    pk: "dboe_id",
    has_dboe_id: true,
    fields: &[
        field("dboe_id", Text),
        fk("beleg", "beleg_id"),
        field("number", Integer),
        field("orig_xml", Text),
        field("quote_lang", Text),
        field("quote_text", Text),
        field("quote_gram", Text),
        field("p_ref", Text),
        field("definition", Text),
        field("definition_lang", Text),
        field("corresp", Text),
        field("definition_corresp", Text),
        field("interpration", Text),
        field("note_anmerkung_o", Text),
        field("note_anmerkung_b", Text),
        field("fragebogen_nummer", Text),
        field("xr", Text),
        field("note_diverse", Json),
    ],
};

const FORM_VARIANT_FIELDS: [FieldDef; 7] = [
    field("dboe_id", Text),
    fk("beleg", "beleg_id"),
    field("number", Integer),
    field("orig_xml", Text),
    field("pron", Text),
    field("pron_lang", Text),
    field("pron_gram", Text),
];

pub static LAUTUNG_MODEL: ModelDef = ModelDef {
    table: "lautungen",
    pk: "dboe_id",
    has_dboe_id: true,
    fields: &FORM_VARIANT_FIELDS,
};

pub static LEHNWORT_MODEL: ModelDef = ModelDef {
    table: "lehnwoerter",
    pk: "dboe_id",
    has_dboe_id: true,
    fields: &FORM_VARIANT_FIELDS,
};

pub static SENSE_MODEL: ModelDef = ModelDef {
    table: "senses",
    pk: "dboe_id",
    has_dboe_id: true,
    fields: &[
        field("dboe_id", Text),
        fk("beleg", "beleg_id"),
        field("number", Integer),
        field("orig_xml", Text),
        field("definition", Text),
        field("corresp_to", Text),
        field("definition_lang", Text),
        field("note_anmerkung_o", Text),
        field("note_anmerkung_b", Text),
    ],
};

pub static ANMERKUNG_LAUTUNG_MODEL: ModelDef = ModelDef {
    table: "anmerkungen_lautung",
    pk: "dboe_id",
    has_dboe_id: true,
    fields: &[
        field("dboe_id", Text),
        fk("beleg", "beleg_id"),
        field("number", Integer),
        field("resp", Text),
        field("corresp_to", Text),
        field("content", Text),
        field("p_ref", Json),
    ],
};

pub static FACSIMILE_MODEL: ModelDef = ModelDef {
    table: "facsimiles",
    pk: "id",
    has_dboe_id: false,
    fields: &[field("id", Integer), field("file_name", Text)],
};

pub static BELEG_FACS_MODEL: ModelDef = ModelDef {
    table: "beleg_facs",
    pk: "id",
    has_dboe_id: false,
    fields: &[
        field("id", Integer),
        fk("beleg", "beleg_id"),
        fk("facsimile", "facsimile_id"),
        field("resp", Text),
    ],
};

/// Filters generated from a table's field metadata.
///
/// Text and bool fields get a case-insensitive `contains`, foreign keys and
/// many-to-many relations an exact id match, integers an exact match.
/// Tables keyed by `dboe_id` additionally accept `ids=a,b,c`.
pub struct DynamicFilterSet {
    model: &'static ModelDef,
}

impl DynamicFilterSet {
    pub fn new(model: &'static ModelDef) -> Self {
        DynamicFilterSet { model }
    }

    /// Builds the WHERE clause for the recognised parameters; unknown
    /// parameters are ignored.
    pub fn apply(&self, params: &QueryParams) -> Result<Filter> {
        let mut filter = Filter::default();
        for (key, value) in params {
            if value.is_empty() {
                continue;
            }
            if key == "ids" && self.model.has_dboe_id {
                filter.in_list(&format!("t.{}", self.model.pk), csv(value));
                continue;
            }
            let Some(def) = self.model.fields.iter().find(|f| f.name == key) else {
                continue;
            };
            let column = format!("t.{}", def.column);
            match def.kind {
                Text => filter.icontains(&column, value),
                Bool => filter.push(
                    format!(
                        "instr(CASE WHEN {} THEN 'true' ELSE 'false' END, casefold(?)) > 0",
                        column
                    ),
                    [Value::Text(value.clone())],
                ),
                Integer => filter.exact(&column, parse_i64(key, value)?),
                FieldKind::ForeignKey => {
                    filter.exact(&column, foreign_key_value(key, value));
                }
                FieldKind::ManyToMany { table, own_column, other_column } => {
                    filter.push(
                        format!(
                            "EXISTS (SELECT 1 FROM {table} j WHERE j.{own_column} = t.{pk} AND j.{other_column} = ?)",
                            pk = self.model.pk
                        ),
                        [foreign_key_value(key, value)],
                    );
                }
                Json => {}
            }
        }
        Ok(filter)
    }
}

/// Integer ids stay integers, text keys (dboe_id, sigle) stay text.
fn foreign_key_value(_key: &str, value: &str) -> Value {
    match value.trim().parse::<i64>() {
        Ok(n) => Value::Integer(n),
        Err(_) => Value::Text(value.trim().to_string()),
    }
}

pub fn csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_i64(key: &str, value: &str) -> Result<i64> {
    value.trim().parse::<i64>().map_err(|_| {
        DboeError::InvalidArgument(format!("'{}' expects a number, got '{}'", key, value))
    })
}

pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "true" | "True" | "1" => Ok(true),
        "false" | "False" | "0" => Ok(false),
        other => Err(DboeError::InvalidArgument(format!(
            "'{}' expects a boolean, got '{}'",
            key, other
        ))),
    }
}

pub fn parse_date(key: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        DboeError::InvalidArgument(format!(
            "'{}' expects a date (YYYY-MM-DD), got '{}'",
            key, value
        ))
    })
}

/// Midnight of `date` in the text layout rusqlite stores `DateTime<Utc>` with.
fn timestamp_value(date: NaiveDate) -> Value {
    Value::Text(date.and_time(NaiveTime::MIN).format("%Y-%m-%d %H:%M:%S").to_string())
}

/// A conjunction of SQL conditions with their bound values.
#[derive(Debug, Default, Clone)]
pub struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    pub fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    pub fn icontains(&mut self, column: &str, value: &str) {
        self.push(
            format!("instr(casefold({}), casefold(?)) > 0", column),
            [Value::Text(value.to_string())],
        );
    }

    pub fn iexact(&mut self, column: &str, value: &str) {
        self.push(
            format!("casefold({}) = casefold(?)", column),
            [Value::Text(value.to_string())],
        );
    }

    pub fn istartswith(&mut self, column: &str, value: &str) {
        self.push(
            format!("substr(casefold({}), 1, length(casefold(?))) = casefold(?)", column),
            [Value::Text(value.to_string()), Value::Text(value.to_string())],
        );
    }

    pub fn startswith(&mut self, column: &str, value: &str) {
        self.push(
            format!("substr({}, 1, length(?)) = ?", column),
            [Value::Text(value.to_string()), Value::Text(value.to_string())],
        );
    }

    pub fn exact(&mut self, column: &str, value: impl Into<Value>) {
        self.push(format!("{} = ?", column), [value.into()]);
    }

    pub fn isnull(&mut self, column: &str, is_null: bool) {
        let clause = if is_null { "IS NULL" } else { "IS NOT NULL" };
        self.clauses.push(format!("{} {}", column, clause));
    }

    pub fn gt(&mut self, column: &str, value: impl Into<Value>) {
        self.push(format!("{} > ?", column), [value.into()]);
    }

    pub fn lt(&mut self, column: &str, value: impl Into<Value>) {
        self.push(format!("{} < ?", column), [value.into()]);
    }

    /// `column IN (...)`; an empty list matches nothing.
    pub fn in_list<V: Into<Value>>(&mut self, column: &str, values: Vec<V>) {
        if values.is_empty() {
            self.clauses.push("0".to_string());
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.push(
            format!("{} IN ({})", column, placeholders),
            values.into_iter().map(Into::into),
        );
    }

    /// Timestamp column on or after the start of `date` (UTC).
    pub fn date_after(&mut self, column: &str, date: NaiveDate) {
        self.push(format!("{} >= ?", column), [timestamp_value(date)]);
    }

    /// Timestamp column before the end of `date` (UTC).
    pub fn date_before(&mut self, column: &str, date: NaiveDate) {
        let end = date.succ_opt().unwrap_or(date);
        self.push(format!("{} < ?", column), [timestamp_value(end)]);
    }

    /// Timestamp column falling on `date` (UTC).
    pub fn on_date(&mut self, column: &str, date: NaiveDate) {
        self.date_after(column, date);
        self.date_before(column, date);
    }

    /// `" WHERE a AND b"`, or an empty string without conditions.
    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Lookup of single query parameters with the conventions used by every
/// declared filter set: empty values count as absent, the first value wins.
pub struct Params<'a>(pub &'a QueryParams);

impl<'a> Params<'a> {
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.0
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    pub fn all(&self, key: &str) -> Vec<&'a str> {
        self.0
            .iter()
            .filter(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn i64(&self, key: &str) -> Result<Option<i64>> {
        self.get(key).map(|v| parse_i64(key, v)).transpose()
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>> {
        self.get(key).map(|v| parse_bool(key, v)).transpose()
    }

    pub fn date(&self, key: &str) -> Result<Option<NaiveDate>> {
        self.get(key).map(|v| parse_date(key, v)).transpose()
    }

    /// `ordering=-a,b` as an ORDER BY list. Unknown fields are ignored and
    /// `default` is used when nothing valid remains.
    pub fn ordering(&self, allowed: &[&str], default: &str) -> String {
        let Some(raw) = self.get("ordering") else {
            return default.to_string();
        };
        let mut terms = Vec::new();
        for term in csv(raw) {
            let (name, direction) = match term.strip_prefix('-') {
                Some(name) => (name, "DESC"),
                None => (term.as_str(), "ASC"),
            };
            if allowed.contains(&name) {
                terms.push(format!("t.{} {}", name, direction));
            }
        }
        if terms.is_empty() {
            default.to_string()
        } else {
            terms.join(", ")
        }
    }

    /// Applies `<key>_after` / `<key>_before` date range bounds.
    pub fn date_range(&self, filter: &mut Filter, key: &str, column: &str) -> Result<()> {
        if let Some(after) = self.date(&format!("{}_after", key))? {
            filter.date_after(column, after);
        }
        if let Some(before) = self.date(&format!("{}_before", key))? {
            filter.date_before(column, before);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{Connection, params_from_iter};

    fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn matching_ids(conn: &Connection, filter: &Filter) -> Vec<String> {
        let sql = format!(
            "SELECT t.dboe_id FROM belege t{} ORDER BY t.dboe_id",
            filter.where_clause()
        );
        let mut stmt = conn.prepare(&sql).unwrap();
        stmt.query_map(params_from_iter(filter.params()), |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    fn fixture() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::db::configure_connection(&conn).unwrap();
        crate::db::initialize_database(&mut conn).unwrap();
        conn.execute_batch(
            "INSERT INTO belege (dboe_id, hauptlemma, import_issue) VALUES
                ('a1', 'Übergang', 0), ('a2', 'Haus', 1), ('a3', 'Häusl', 0);
             INSERT INTO tags (id, name) VALUES (7, 'x');
             INSERT INTO beleg_tags (beleg_id, tag_id) VALUES ('a3', 7);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_dynamic_icontains_is_unicode_aware() {
        let conn = fixture();
        let set = DynamicFilterSet::new(&BELEG_MODEL);
        let filter = set.apply(&q(&[("hauptlemma", "überg")])).unwrap();
        assert_eq!(matching_ids(&conn, &filter), vec!["a1"]);
        let filter = set.apply(&q(&[("hauptlemma", "HÄU")])).unwrap();
        assert_eq!(matching_ids(&conn, &filter), vec!["a3"]);
    }

    #[test]
    fn test_dynamic_ids_bool_and_m2m() {
        let conn = fixture();
        let set = DynamicFilterSet::new(&BELEG_MODEL);
        let filter = set.apply(&q(&[("ids", "a1, a3,")])).unwrap();
        assert_eq!(matching_ids(&conn, &filter), vec!["a1", "a3"]);
        let filter = set.apply(&q(&[("import_issue", "true")])).unwrap();
        assert_eq!(matching_ids(&conn, &filter), vec!["a2"]);
        let filter = set.apply(&q(&[("tag", "7")])).unwrap();
        assert_eq!(matching_ids(&conn, &filter), vec!["a3"]);
    }

    #[test]
    fn test_unknown_and_empty_params_are_ignored() {
        let conn = fixture();
        let set = DynamicFilterSet::new(&BELEG_MODEL);
        let filter = set
            .apply(&q(&[("page", "2"), ("hauptlemma", ""), ("etym", "x")]))
            .unwrap();
        assert!(filter.where_clause().is_empty());
        assert_eq!(matching_ids(&conn, &filter).len(), 3);
    }

    #[test]
    fn test_integer_filter_rejects_garbage() {
        let set = DynamicFilterSet::new(&CITATION_MODEL);
        assert!(matches!(
            set.apply(&q(&[("number", "one")])),
            Err(DboeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_declared_lookups() {
        let conn = fixture();
        let mut filter = Filter::default();
        filter.istartswith("t.hauptlemma", "hä");
        assert_eq!(matching_ids(&conn, &filter), vec!["a3"]);

        let mut filter = Filter::default();
        filter.in_list::<String>("t.dboe_id", Vec::new());
        assert!(matching_ids(&conn, &filter).is_empty());

        let mut filter = Filter::default();
        filter.isnull("t.nebenlemma", true);
        filter.iexact("t.hauptlemma", "HAUS");
        assert_eq!(matching_ids(&conn, &filter), vec!["a2"]);
    }

    #[test]
    fn test_params_helpers() {
        let pairs = q(&[("kind", "bl"), ("kind", "ort"), ("count__gt", ""), ("public", "True")]);
        let params = Params(&pairs);
        assert_eq!(params.all("kind"), vec!["bl", "ort"]);
        assert_eq!(params.i64("count__gt").unwrap(), None);
        assert_eq!(params.bool("public").unwrap(), Some(true));
        assert!(params.has("count__gt"));
    }

    #[test]
    fn test_ordering_skips_unknown_fields() {
        let pairs = q(&[("ordering", "-modified,secret,title")]);
        assert_eq!(
            Params(&pairs).ordering(&["title", "modified"], "t.id"),
            "t.modified DESC, t.title ASC"
        );
        let pairs = q(&[("ordering", "secret")]);
        assert_eq!(Params(&pairs).ordering(&["title"], "t.id"), "t.id");
    }
}
