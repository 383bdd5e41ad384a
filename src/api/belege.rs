//! Beleg routes, the read-only child resources and facsimiles.

use super::{
    ApiResult, AppState, Payload, blocking, detail_url, listing, method_not_allowed, with_url,
};
use crate::belege::{BelegUpdate, FormTable, NewBeleg};
use crate::error::DboeError;
use crate::representation::{BelegBundle, base_fields, build_representation};
use crate::search::index_bundle;
use crate::{Dboe, Facsimile, Result, SyncOptions};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use log::warn;
use serde::Deserialize;
use serde_json::{Value, json};

type Params = Query<Vec<(String, String)>>;

const BELEGE: &str = "belege-elastic-search";

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/belege-elastic-search/", get(list_belege).post(create_beleg))
        .route(
            "/belege-elastic-search/:id/",
            get(get_beleg)
                .put(update_beleg)
                .patch(update_beleg)
                .delete(delete_beleg),
        )
        .route(
            "/belege-elastic-search/:id/collections/",
            get(beleg_collections).post(add_to_collection),
        )
        .route(
            "/belege-elastic-search/:id/collections/:collection/",
            axum::routing::delete(remove_from_collection),
        )
        .route("/kontexte/", get(list_kontexte).post(method_not_allowed))
        .route("/kontexte/:id/", get(get_kontext))
        .route(
            "/kontexte/:id/annotations/",
            get(kontext_annotations).post(add_kontext_annotation),
        )
        .route("/lautungen/", get(list_lautungen).post(method_not_allowed))
        .route("/lautungen/:id/", get(get_lautung))
        .route("/lehnworte/", get(list_lehnworte).post(method_not_allowed))
        .route("/lehnworte/:id/", get(get_lehnwort))
        .route("/bedeutungen/", get(list_bedeutungen).post(method_not_allowed))
        .route("/bedeutungen/:id/", get(get_bedeutung))
        .route(
            "/anmerkungen-lautung/",
            get(list_anmerkungen).post(method_not_allowed),
        )
        .route("/anmerkungen-lautung/:id/", get(get_anmerkung))
        .route("/facsimiles/", get(list_facsimiles).post(create_facsimile))
        .route(
            "/facsimiles/:id/",
            get(get_facsimile)
                .put(update_facsimile)
                .patch(update_facsimile)
                .delete(delete_facsimile),
        )
        .route("/facsimiles-belege/", get(list_beleg_facs).post(create_beleg_facs))
        .route(
            "/facsimiles-belege/:id/",
            get(get_beleg_facs)
                .put(update_beleg_facs)
                .patch(update_beleg_facs)
                .delete(delete_beleg_facs),
        )
}

// --- Belege ---

/// The search document layered over the serializer fields.
fn beleg_document(bundle: &BelegBundle, tags: Vec<i64>) -> Value {
    let mut base = base_fields(&bundle.beleg);
    base.insert("url".into(), json!(detail_url(BELEGE, &bundle.beleg.dboe_id)));
    base.insert("tag".into(), json!(tags));
    Value::Object(build_representation(bundle, Some(base)))
}

fn load_document(dboe: &Dboe, id: &str) -> Result<Value> {
    let bundle = dboe.beleg_bundle(id)?;
    let tags = dboe.beleg_tags(id)?;
    Ok(beleg_document(&bundle, tags))
}

async fn list_belege(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, BELEGE, move |dboe| {
        let belege = dboe.list_belege(&q)?;
        dboe.beleg_bundles(belege)?
            .iter()
            .map(|bundle| -> Result<Value> {
                let tags = dboe.beleg_tags(&bundle.beleg.dboe_id)?;
                Ok(beleg_document(bundle, tags))
            })
            .collect()
    })
    .await
}

async fn get_beleg(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    Ok(Json(blocking(&state, move |dboe| load_document(dboe, &id)).await?))
}

/// Pushes the stored Beleg to the index, if one is configured. Index
/// failures do not undo the save.
async fn reindex(state: &AppState, id: &str) {
    let Some(client) = &state.index else {
        return;
    };
    let id = id.to_string();
    let bundle = match blocking(state, move |dboe| dboe.beleg_bundle(&id)).await {
        Ok(bundle) => bundle,
        Err(e) => {
            warn!("Could not load Beleg for indexing: {}", e);
            return;
        }
    };
    if let Err(e) = index_bundle(client, &bundle).await {
        warn!("Indexing {} failed: {}", bundle.beleg.dboe_id, e);
    }
}

async fn create_beleg(
    State(state): State<AppState>,
    Payload(new): Payload<NewBeleg>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let beleg = blocking(&state, move |dboe| dboe.create_beleg(new, SyncOptions::all())).await?;
    reindex(&state, &beleg.dboe_id).await;
    let id = beleg.dboe_id;
    let document = blocking(&state, move |dboe| load_document(dboe, &id)).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn update_beleg(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Payload(update): Payload<BelegUpdate>,
) -> ApiResult {
    let key = id.clone();
    blocking(&state, move |dboe| dboe.update_beleg(&key, update)).await?;
    reindex(&state, &id).await;
    Ok(Json(blocking(&state, move |dboe| load_document(dboe, &id)).await?))
}

async fn delete_beleg(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_beleg(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CollectionLink {
    collection: i64,
}

async fn beleg_collections(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let ids = blocking(&state, move |dboe| {
        dboe.get_beleg(&id)?;
        dboe.beleg_collections(&id)
    })
    .await?;
    Ok(Json(json!({ "collections": ids })))
}

async fn add_to_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Payload(link): Payload<CollectionLink>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let ids = blocking(&state, move |dboe| {
        dboe.add_beleg_to_collection(&id, link.collection)?;
        dboe.beleg_collections(&id)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "collections": ids }))))
}

async fn remove_from_collection(
    State(state): State<AppState>,
    Path((id, collection)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.remove_beleg_from_collection(&id, collection)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Read-only children ---

async fn list_kontexte(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "kontexte", move |dboe| {
        dboe.list_citations(&q)?
            .iter()
            .map(|c| with_url(c, "kontexte", &c.dboe_id, Some(c.dboe_id.as_str())))
            .collect()
    })
    .await
}

async fn get_kontext(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        let citation = dboe.get_citation(&id)?;
        let mut value = with_url(&citation, "kontexte", &id, Some(id.as_str()))?;
        value["zusatz_lemmata"] = serde_json::to_value(dboe.zusatz_lemmata(&id)?)?;
        Ok(value)
    })
    .await?;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
struct KontextAnnotationInput {
    payload: Option<Value>,
    tool: Option<String>,
    source_field: Option<String>,
}

async fn kontext_annotations(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    listing(&state, "kontext annotations", move |dboe| {
        dboe.get_citation(&id)?;
        dboe.kontext_annotations(&id)
    })
    .await
}

async fn add_kontext_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Payload(input): Payload<KontextAnnotationInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let annotation = blocking(&state, move |dboe| {
        dboe.add_kontext_annotation(&id, input.payload, input.tool, input.source_field)
    })
    .await?;
    let value = serde_json::to_value(annotation).map_err(DboeError::from)?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn list_forms(
    state: AppState,
    table: FormTable,
    resource: &'static str,
    q: Vec<(String, String)>,
) -> ApiResult {
    listing(&state, resource, move |dboe| {
        dboe.list_form_variants(table, &q)?
            .iter()
            .map(|f| with_url(f, resource, &f.dboe_id, Some(f.dboe_id.as_str())))
            .collect()
    })
    .await
}

async fn get_form(
    state: AppState,
    table: FormTable,
    resource: &'static str,
    id: String,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        let form = dboe.get_form_variant(table, &id)?;
        with_url(&form, resource, &id, Some(id.as_str()))
    })
    .await?;
    Ok(Json(value))
}

async fn list_lautungen(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    list_forms(state, FormTable::Lautungen, "lautungen", q).await
}

async fn get_lautung(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    get_form(state, FormTable::Lautungen, "lautungen", id).await
}

async fn list_lehnworte(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    list_forms(state, FormTable::Lehnwoerter, "lehnworte", q).await
}

async fn get_lehnwort(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    get_form(state, FormTable::Lehnwoerter, "lehnworte", id).await
}

async fn list_bedeutungen(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "bedeutungen", move |dboe| {
        dboe.list_senses(&q)?
            .iter()
            .map(|s| with_url(s, "bedeutungen", &s.dboe_id, Some(s.dboe_id.as_str())))
            .collect()
    })
    .await
}

async fn get_bedeutung(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_sense(&id)?, "bedeutungen", &id, Some(id.as_str()))
    })
    .await?;
    Ok(Json(value))
}

async fn list_anmerkungen(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "anmerkungen-lautung", move |dboe| {
        dboe.list_anmerkungen_lautung(&q)?
            .iter()
            .map(|a| with_url(a, "anmerkungen-lautung", &a.dboe_id, Some(a.dboe_id.as_str())))
            .collect()
    })
    .await
}

async fn get_anmerkung(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_anmerkung_lautung(&id)?, "anmerkungen-lautung", &id, Some(id.as_str()))
    })
    .await?;
    Ok(Json(value))
}

// --- Facsimiles ---

fn facsimile_value(facs: &Facsimile) -> Result<Value> {
    let mut value = with_url(facs, "facsimiles", facs.id, None)?;
    value["facs_url"] = json!(facs.facs_url());
    value["preview_url"] = json!(facs.preview_url());
    Ok(value)
}

#[derive(Debug, Deserialize)]
struct FacsimileInput {
    file_name: String,
}

async fn list_facsimiles(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "facsimiles", move |dboe| {
        dboe.list_facsimiles(&q)?.iter().map(facsimile_value).collect()
    })
    .await
}

async fn get_facsimile(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| facsimile_value(&dboe.get_facsimile(id)?)).await?;
    Ok(Json(value))
}

async fn create_facsimile(
    State(state): State<AppState>,
    Payload(input): Payload<FacsimileInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        facsimile_value(&dboe.create_facsimile(&input.file_name)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn update_facsimile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<FacsimileInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        facsimile_value(&dboe.update_facsimile(id, &input.file_name)?)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_facsimile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_facsimile(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct BelegFacsInput {
    beleg: Option<String>,
    facsimile: Option<i64>,
    resp: Option<String>,
}

async fn list_beleg_facs(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "facsimiles-belege", move |dboe| {
        dboe.list_beleg_facs(&q)?
            .iter()
            .map(|link| with_url(link, "facsimiles-belege", link.id, None))
            .collect()
    })
    .await
}

async fn get_beleg_facs(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_beleg_facs(id)?, "facsimiles-belege", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_beleg_facs(
    State(state): State<AppState>,
    Payload(input): Payload<BelegFacsInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (Some(beleg), Some(facsimile)) = (input.beleg, input.facsimile) else {
        return Err(DboeError::InvalidArgument("beleg and facsimile are required".into()).into());
    };
    let value = blocking(&state, move |dboe| {
        let link = dboe.link_facsimile(&beleg, facsimile, input.resp)?;
        with_url(&link, "facsimiles-belege", link.id, None)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn update_beleg_facs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<BelegFacsInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        let link = dboe.update_beleg_facs(id, input.beleg, input.facsimile, input.resp)?;
        with_url(&link, "facsimiles-belege", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_beleg_facs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_beleg_facs(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
