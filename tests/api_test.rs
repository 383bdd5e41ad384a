use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use dboe_backend::api::{AppState, router};
use dboe_backend::{Dboe, Settings, SyncOptions};
use serde_json::{Value, json};
use tower::ServiceExt;

const ENTRY: &str = r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="b1">
    <form type="hauptlemma"><orth>Haus</orth></form>
    <cit xml:id="b1_k1"><quote>as Haus</quote></cit>
</entry>"#;

fn app() -> (Dboe, Router) {
    let dboe = Dboe::open_in_memory().unwrap();
    let state = AppState::new(dboe.clone(), Settings::default());
    (dboe, router(state))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_raw(app, method, uri, body.map(|json| json.to_string())).await
}

async fn send_raw(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<String>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(text) => {
            builder = builder.header("content-type", "application/json");
            Body::from(text)
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn index_lists_api_roots() {
    let (_, app) = app();
    let (status, body) = send(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["siglen"], "/api/siglen/");
    assert_eq!(body["belege-elastic-search"], "/api/belege-elastic-search/");

    let (_, info) = send(&app, Method::GET, "/project-info/", None).await;
    assert_eq!(info["base_tech"], "axum");
}

#[tokio::test]
async fn beleg_create_detail_and_update() {
    let (_, app) = app();
    let (status, created) = send(
        &app,
        Method::POST,
        "/api/belege-elastic-search/",
        Some(json!({ "id": "b1", "orig_xml": ENTRY })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "b1");
    assert_eq!(created["hl"], "Haus");
    assert_eq!(created["url"], "/api/belege-elastic-search/b1/");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/belege-elastic-search/",
        Some(json!({ "id": "b1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, updated) = send(
        &app,
        Method::PATCH,
        "/api/belege-elastic-search/b1/",
        Some(json!({ "nl": "Häusl" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["nl"], "Häusl");
    assert_eq!(updated["hl"], "Haus");

    let (status, list) = send(&app, Method::GET, "/api/belege-elastic-search/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);

    let (status, kontext) = send(&app, Method::GET, "/api/kontexte/b1_k1/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(kontext["id"], "b1_k1");
    assert_eq!(kontext["url"], "/api/kontexte/b1_k1/");
}

#[tokio::test]
async fn read_only_children_reject_post() {
    let (_, app) = app();
    for uri in ["/api/kontexte/", "/api/lautungen/", "/api/bedeutungen/"] {
        let (status, body) = send(&app, Method::POST, uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{}", uri);
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn missing_records_are_404() {
    let (_, app) = app();
    let (status, body) = send(&app, Method::GET, "/api/belege-elastic-search/nope/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("nope"));

    let (status, _) = send(&app, Method::GET, "/stats/belege-by-nothing/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tags_get_or_create_and_stats() {
    let (dboe, app) = app();
    dboe.save_beleg("b1", Some(ENTRY.to_string()), SyncOptions::all())
        .unwrap();

    let (status, tag) =
        send(&app, Method::POST, "/api/tags/", Some(json!({ "name": "rot" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, again) = send(&app, Method::POST, "/api/tags/", Some(json!({ "name": "rot" }))).await;
    assert_eq!(tag["id"], again["id"]);

    let (_, ranking) = send(&app, Method::GET, "/stats/belege-by-context/", None).await;
    assert_eq!(ranking["title"], "Belege nach Kontexten");
    assert_eq!(ranking["payload"][0]["id"], "b1");
    assert_eq!(ranking["payload"][0]["item_count"], 1);
}

#[tokio::test]
async fn documents_patch_only_accepts_xml_fields() {
    let (_, app) = app();
    let (status, created) = send(
        &app,
        Method::POST,
        "/api/documents/",
        Some(json!([{ "es_id": "abc" }, { "es_id": "abd" }])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created.as_array().unwrap().len(), 2);
    let id = created[0]["id"].as_i64().unwrap();
    let uri = format!("/api/documents/{}/", id);

    let (status, _) = send(&app, Method::PATCH, &uri, Some(json!({ "es_id": "x" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, patched) = send(&app, Method::PATCH, &uri, Some(json!({ "xml": "<a/>" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["xml"], "<a/>");

    let (_, scans) = send(&app, Method::GET, "/api/documents/?es_id__startswith=AB", None).await;
    assert_eq!(scans["count"], 2);
    assert!(scans["results"][0].get("index").is_none());
    assert!(scans["results"][0].get("xml").is_some());

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/documents/",
        Some(json!([{ "es_id": "missing", "version": 2 }])),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dboe_query_without_index() {
    let (_, app) = app();
    let (status, body) = send(&app, Method::GET, "/api/dboe-query/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], Value::Null);

    let (status, _) = send(&app, Method::GET, "/api/dboe-query/?q=Haus", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_tag_on_beleg_is_rejected() {
    let (dboe, app) = app();
    dboe.save_beleg("b1", Some(ENTRY.to_string()), SyncOptions::all())
        .unwrap();

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/api/belege-elastic-search/b1/",
        Some(json!({ "modify_tag": [999] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("Invalid pk"));
}

#[tokio::test]
async fn duplicate_facsimile_file_name_conflicts() {
    let (_, app) = app();
    let payload = json!({ "file_name": "a.jpg" });
    let (status, _) = send(&app, Method::POST, "/api/facsimiles/", Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, Method::POST, "/api/facsimiles/", Some(payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn facsimile_links_check_references() {
    let (dboe, app) = app();
    dboe.save_beleg("b1", Some(ENTRY.to_string()), SyncOptions::all())
        .unwrap();

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/facsimiles-belege/",
        Some(json!({ "beleg": "b1", "facsimile": 777 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, facsimile) = send(
        &app,
        Method::POST,
        "/api/facsimiles/",
        Some(json!({ "file_name": "b1.jpg" })),
    )
    .await;
    let (status, link) = send(
        &app,
        Method::POST,
        "/api/facsimiles-belege/",
        Some(json!({ "beleg": "b1", "facsimile": facsimile["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/facsimiles-belege/{}/", link["id"]);

    let (status, updated) =
        send(&app, Method::PATCH, &uri, Some(json!({ "resp": "mh" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["resp"], "mh");

    let (status, _) =
        send(&app, Method::PATCH, &uri, Some(json!({ "facsimile": 777 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, unchanged) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(unchanged["facsimile"], facsimile["id"]);
}

#[tokio::test]
async fn null_clears_collection_lemma() {
    let (_, app) = app();
    let (status, lemma) =
        send(&app, Method::POST, "/api/lemmas/", Some(json!({ "org": "Haus" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, collection) = send(
        &app,
        Method::POST,
        "/api/collections/",
        Some(json!({ "title": "Hausrat", "lemma_id": lemma["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(collection["lemma_id"], lemma["id"]);

    let uri = format!("/api/collections/{}/", collection["id"]);
    let (status, cleared) =
        send(&app, Method::PATCH, &uri, Some(json!({ "lemma_id": null }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["lemma_id"], Value::Null);
    assert_eq!(cleared["title"], "Hausrat");
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let (_, app) = app();
    let (status, body) =
        send_raw(&app, Method::POST, "/api/tags/", Some("{not json".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    let (status, body) =
        send(&app, Method::POST, "/api/facsimiles/", Some(json!({ "file_name": 5 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}
