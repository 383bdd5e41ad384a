use super::{ApiResult, AppState, Payload, blocking, listing, with_url};
use crate::{BelegSigle, Sigle};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use serde_json::Value;

type Params = Query<Vec<(String, String)>>;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/siglen/", get(list_siglen).post(create_sigle))
        .route(
            "/siglen/:sigle/",
            get(get_sigle)
                .put(update_sigle)
                .patch(update_sigle)
                .delete(delete_sigle),
        )
        .route("/belege-siglen/", get(list_beleg_siglen).post(create_beleg_sigle))
        .route(
            "/belege-siglen/:id/",
            get(get_beleg_sigle)
                .put(update_beleg_sigle)
                .patch(update_beleg_sigle)
                .delete(delete_beleg_sigle),
        )
}

// --- Siglen ---

async fn list_siglen(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "siglen", move |dboe| {
        dboe.list_siglen(&q)?
            .iter()
            .map(|s| with_url(s, "siglen", &s.sigle, None))
            .collect()
    })
    .await
}

async fn get_sigle(State(state): State<AppState>, Path(sigle): Path<String>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_sigle(&sigle)?, "siglen", &sigle, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_sigle(
    State(state): State<AppState>,
    Payload(sigle): Payload<Sigle>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let sigle = dboe.create_sigle(sigle)?;
        with_url(&sigle, "siglen", &sigle.sigle, None)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn update_sigle(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Payload(sigle): Payload<Sigle>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.update_sigle(&key, sigle)?, "siglen", &key, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_sigle(
    State(state): State<AppState>,
    Path(sigle): Path<String>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_sigle(&sigle)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Beleg <-> Sigle ---

#[derive(Debug, Deserialize)]
struct BelegSigleInput {
    beleg: String,
    sigle: String,
    #[serde(default)]
    corresp: Option<String>,
    #[serde(default)]
    resp: Option<String>,
}

impl BelegSigleInput {
    fn into_link(self, id: i64) -> BelegSigle {
        BelegSigle {
            id,
            beleg: self.beleg,
            sigle: self.sigle,
            corresp: self.corresp,
            resp: self.resp,
        }
    }
}

async fn list_beleg_siglen(State(state): State<AppState>, Query(q): Params) -> ApiResult {
    listing(&state, "belege-siglen", move |dboe| {
        dboe.list_beleg_siglen(&q)?
            .iter()
            .map(|link| with_url(link, "belege-siglen", link.id, None))
            .collect()
    })
    .await
}

async fn get_beleg_sigle(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        with_url(&dboe.get_beleg_sigle(id)?, "belege-siglen", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn create_beleg_sigle(
    State(state): State<AppState>,
    Payload(input): Payload<BelegSigleInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let value = blocking(&state, move |dboe| {
        let link = dboe.save_beleg_sigle(input.into_link(0))?;
        with_url(&link, "belege-siglen", link.id, None)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn update_beleg_sigle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Payload(input): Payload<BelegSigleInput>,
) -> ApiResult {
    let value = blocking(&state, move |dboe| {
        dboe.get_beleg_sigle(id)?;
        with_url(&dboe.save_beleg_sigle(input.into_link(id))?, "belege-siglen", id, None)
    })
    .await?;
    Ok(Json(value))
}

async fn delete_beleg_sigle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |dboe| dboe.delete_beleg_sigle(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
