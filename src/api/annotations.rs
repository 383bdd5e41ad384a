//! Routes of the editorial records: users, categories, tags, documents,
//! lemmas, edits, collections, annotations and author assignments.

use super::{ApiResult, AppState, Payload, blocking, listing, project, with_url};
use crate::annotations::{
    AnnotationInput, AutorArtikelInput, CategoryInput, CollectionInput, DocumentInput,
    DocumentRow, DocumentView, EditInput, EditListing, LemmaInput, NewUser, TagInput,
};
use crate::error::DboeError;
use crate::{Category, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Serialize;
use serde_json::{Map, Value, json};

type Params = Query<Vec<(String, String)>>;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/", get(list_users).post(create_user))
        .route("/users/:id/", get(get_user).delete(delete_user))
        .route("/categories/", get(list_categories).post(create_category))
        .route(
            "/categories/:id/",
            get(get_category)
                .put(update_category)
                .patch(update_category)
                .delete(delete_category),
        )
        .route("/tags/", get(list_tags).post(create_tag))
        .route(
            "/tags/:id/",
            get(get_tag).put(update_tag).patch(update_tag).delete(delete_tag),
        )
        .route(
            "/documents/",
            get(list_documents).post(create_documents).put(update_documents),
        )
        .route(
            "/documents/:id/",
            get(get_document)
                .put(update_document)
                .patch(patch_document)
                .delete(delete_document),
        )
        .route("/lemmas/", get(list_lemmas).post(create_lemma))
        .route(
            "/lemmas/:id/",
            get(get_lemma)
                .put(update_lemma)
                .patch(update_lemma)
                .delete(delete_lemma),
        )
        .route("/article_edits/", get(list_edits).post(create_edit))
        .route(
            "/article_edits/:id/",
            get(get_edit).put(update_edit).patch(update_edit).delete(delete_edit),
        )
        .route("/collections/", get(list_collections).post(create_collection))
        .route(
            "/collections/:id/",
            get(get_collection)
                .put(update_collection)
                .patch(update_collection)
                .delete(delete_collection),
        )
        .route("/annotations/", get(list_annotations).post(create_annotation))
        .route(
            "/annotations/:id/",
            get(get_annotation)
                .put(update_annotation)
                .patch(update_annotation)
                .delete(delete_annotation),
        )
        .route("/author_artikel/", get(list_autor_artikel).post(create_autor_artikel))
        .route(
            "/author_artikel/:id/",
            get(get_autor_artikel)
                .put(update_autor_artikel)
                .patch(update_autor_artikel)
                .delete(delete_autor_artikel),
        )
}

fn urls<T: Serialize>(rows: &[T], resource: &str, key: impl Fn(&T) -> i64) -> Result<Vec<Value>> {
    rows.iter().map(|row| with_url(row, resource, key(row), None)).collect()
}

fn created(value: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, Json(value))
}

// --- Users ---

async fn list_users(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "users", move |dboe| urls(&dboe.list_users(&q)?, "users", |u| u.id)).await
}

async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_user(id)?, "users", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_user(
    State(state): State<AppState>,
    Payload(new): Payload<NewUser>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let user = dboe.create_user(new)?;
        with_url(&user, "users", user.id, None)
    })
    .await?;
    Ok(created(value))
}

async fn delete_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_user(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Categories ---

async fn list_categories(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "categories", move |dboe| {
        urls(&dboe.list_categories(&q)?, "categories", |c| c.id)
    })
    .await
}

async fn get_category(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        let mut value = with_url(&dboe.get_category(id)?, "categories", id, None)?;
        value["annotations"] = json!(dboe.category_annotations(id)?);
        Ok(value)
    })
    .await?;
    Ok(Json(value))
}

async fn create_category(
    State(state): State<AppState>,
    Payload(category): Payload<Category>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let category = dboe.create_category(&category)?;
        with_url(&category, "categories", category.id, None)
    })
    .await?;
    Ok(created(value))
}

async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<CategoryInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.update_category(id, input)?, "categories", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_category(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Tags ---

async fn list_tags(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "tags", move |dboe| urls(&dboe.list_tags(&q)?, "tags", |t| t.tag.id)).await
}

async fn get_tag(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| with_url(&dboe.get_tag(id)?, "tags", id, None)).await?;
    Ok(Json(value))
}

async fn create_tag(
    State(state): State<AppState>,
    Payload(input): Payload<TagInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let tag = dboe.create_tag(input)?;
        with_url(&tag, "tags", tag.tag.id, None)
    })
    .await?;
    Ok(created(value))
}

async fn update_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<TagInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.update_tag(id, input)?, "tags", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_tag(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_tag(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Documents ---

const LIST_FIELDS: [&str; 5] = ["url", "es_id", "index", "version", "scans"];
const SCANS_FIELDS: [&str; 5] = ["id", "url", "es_id", "xml", "scans"];
const CACHE_FIELDS: [&str; 6] =
    ["id", "url", "es_id", "xml", "xml_modified_by", "xml_error_message"];

fn document_value(row: &DocumentRow) -> Result<Value> {
    with_url(row, "documents", row.document.id, None)
}

/// Projects a listed document onto the fields of `view`.
fn document_view(row: &DocumentRow, view: DocumentView) -> Result<Value> {
    let mut value = document_value(row)?;
    Ok(match view {
        DocumentView::Default => project(value, &LIST_FIELDS),
        DocumentView::Scans => project(value, &SCANS_FIELDS),
        DocumentView::Cache => {
            value["xml_modified_by"] = json!(row.xml_modified_by_name);
            project(value, &CACHE_FIELDS)
        }
    })
}

async fn list_documents(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "documents", move |dboe| {
        let (view, rows) = dboe.list_documents(&q)?;
        rows.iter().map(|row| document_view(row, view)).collect()
    })
    .await
}

async fn get_document(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| document_value(&dboe.get_document(id)?)).await?;
    Ok(Json(value))
}

/// Accepts one document or an array of them.
async fn create_documents(
    State(state): State<AppState>,
    Payload(body): Payload<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        if body.is_array() {
            let inputs: Vec<DocumentInput> = serde_json::from_value(body)?;
            let rows = dboe.create_documents(inputs)?;
            Ok(Value::Array(
                rows.iter().map(document_value).collect::<Result<Vec<_>>>()?,
            ))
        } else {
            let input: DocumentInput = serde_json::from_value(body)?;
            document_value(&dboe.create_document(input)?)
        }
    })
    .await?;
    Ok(created(value))
}

/// Partial updates of several documents, matched by `es_id`.
async fn update_documents(
    State(state): State<AppState>,
    Payload(inputs): Payload<Vec<DocumentInput>>,
) -> ApiResult {
    let count = inputs.len();
    blocking(&state, move |dboe| dboe.update_documents_by_es_id(inputs)).await?;
    Ok(Json(json!({ "count": count })))
}

async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<DocumentInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        document_value(&dboe.update_document(id, input)?)
    })
    .await?;
    Ok(Json(value))
}

fn optional_string(body: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(DboeError::InvalidArgument(format!("{} must be a string", key))),
    }
}

async fn patch_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(body): Payload<Map<String, Value>>,
) -> ApiResult {
    if let Some(key) = body
        .keys()
        .find(|k| !matches!(k.as_str(), "xml" | "xml_error_message"))
    {
        return Err(DboeError::Conflict(format!(
            "Only xml and xml_error_message can be patched, got {}",
            key
        ))
        .into());
    }
    let xml = optional_string(&body, "xml")?;
    let message = optional_string(&body, "xml_error_message")?;
    let value = blocking(&state, move |dboe| {
        document_value(&dboe.patch_document_xml(id, xml, message)?)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_document(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Lemmas ---

async fn list_lemmas(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "lemmas", move |dboe| {
        urls(&dboe.list_lemmas(&q)?, "lemmas", |l| l.lemma.id)
    })
    .await
}

async fn get_lemma(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_lemma(id)?, "lemmas", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_lemma(
    State(state): State<AppState>,
    Payload(input): Payload<LemmaInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let lemma = dboe.create_lemma(input)?;
        with_url(&lemma, "lemmas", lemma.lemma.id, None)
    })
    .await?;
    Ok(created(value))
}

async fn update_lemma(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<LemmaInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.update_lemma(id, input)?, "lemmas", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_lemma(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_lemma(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Edits of article ---

fn plain<T: Serialize>(rows: Vec<T>) -> Result<Vec<Value>> {
    rows.into_iter()
        .map(|row| -> Result<Value> { Ok(serde_json::to_value(row)?) })
        .collect()
}

async fn list_edits(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "article_edits", move |dboe| match dboe.list_edits(&q)? {
        EditListing::Rows(rows) => urls(&rows, "article_edits", |e| e.edit.id),
        EditListing::ByStepStatus(rows) => plain(rows),
        EditListing::ByLemmaUser(rows) => plain(rows),
        EditListing::ByUser(rows) => plain(rows),
    })
    .await
}

async fn get_edit(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_edit(id)?, "article_edits", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_edit(
    State(state): State<AppState>,
    Payload(input): Payload<EditInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let edit = dboe.create_edit(input)?;
        with_url(&edit, "article_edits", edit.edit.id, None)
    })
    .await?;
    Ok(created(value))
}

async fn update_edit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<EditInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.update_edit(id, input)?, "article_edits", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_edit(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_edit(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Collections ---

async fn list_collections(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "collections", move |dboe| {
        urls(&dboe.list_collections(&q)?, "collections", |c| c.collection.id)
    })
    .await
}

async fn get_collection(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_collection(id)?, "collections", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_collection(
    State(state): State<AppState>,
    Payload(input): Payload<CollectionInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let collection = dboe.create_collection(input)?;
        with_url(&collection, "collections", collection.collection.id, None)
    })
    .await?;
    Ok(created(value))
}

async fn update_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<CollectionInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.update_collection(id, input)?, "collections", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_collection(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Annotations ---

async fn list_annotations(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "annotations", move |dboe| {
        urls(&dboe.list_annotations(&q)?, "annotations", |a| a.annotation.id)
    })
    .await
}

async fn get_annotation(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_annotation(id)?, "annotations", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_annotation(
    State(state): State<AppState>,
    Payload(input): Payload<AnnotationInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let annotation = dboe.create_annotation(input)?;
        with_url(&annotation, "annotations", annotation.annotation.id, None)
    })
    .await?;
    Ok(created(value))
}

async fn update_annotation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<AnnotationInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.update_annotation(id, input)?, "annotations", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_annotation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_annotation(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Author assignments ---

async fn list_autor_artikel(State(state): State<AppState>) -> ApiResult {
    listing(&state, "author_artikel", move |dboe| {
        urls(&dboe.list_autor_artikel()?, "author_artikel", |a| a.id)
    })
    .await
}

async fn get_autor_artikel(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_autor_artikel(id)?, "author_artikel", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_autor_artikel(
    State(state): State<AppState>,
    Payload(input): Payload<AutorArtikelInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let row = dboe.save_autor_artikel(None, input)?;
        with_url(&row, "author_artikel", row.id, None)
    })
    .await?;
    Ok(created(value))
}

async fn update_autor_artikel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<AutorArtikelInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.save_autor_artikel(Some(id), input)?, "author_artikel", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_autor_artikel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_autor_artikel(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
