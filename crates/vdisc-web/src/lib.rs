//! Axum + Askama storefront surface over the catalog service.

use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;
use vdisc_catalog::{CatalogConfig, CatalogPipeline, CatalogService};
use vdisc_core::{SearchCriteria, Section};
use vdisc_search::{
    to_query_string, validate_criteria, SearchError, GUEST_OPTIONS, OCCASION_OPTIONS,
};
use vdisc_storage::{spawn_store_poller, DirectoryStore, InvalidationBus, ListingStore};

pub const CRATE_NAME: &str = "vdisc-web";

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogService>,
}

impl AppState {
    pub fn new(catalog: Arc<CatalogService>) -> Self {
        Self { catalog }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    sections: Vec<Section>,
    occasions: Vec<&'static str>,
    guests: Vec<&'static str>,
    fingerprint: String,
    computed_at: String,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    run_id: String,
    fingerprint: String,
    card_count: usize,
}

#[derive(Debug, Serialize)]
struct SearchAccepted {
    query: String,
    criteria: SearchCriteria,
}

#[derive(Debug, Serialize)]
struct SearchRejected {
    error: String,
    missing: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalid: Option<&'static str>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/sections", get(sections_handler))
        .route("/api/listings/invalidate", post(invalidate_handler))
        .route("/api/search", get(search_handler))
        .with_state(Arc::new(state))
}

/// Directory store + invalidation listener + optional poller, then serve.
pub async fn serve(config: CatalogConfig) -> anyhow::Result<()> {
    let bus = InvalidationBus::new();
    let store: Arc<dyn ListingStore> =
        Arc::new(DirectoryStore::new(config.store_dir.clone()).with_bus(bus.clone()));
    let pipeline = CatalogPipeline::new(store.clone(), config.load_blueprints()?)
        .with_listing_prefix(config.listing_prefix.clone());
    let catalog = Arc::new(CatalogService::new(pipeline)?);
    let _listener_task = catalog.clone().spawn_invalidation_listener(&bus);
    let _poller_task = (config.poll_interval_secs > 0).then(|| {
        spawn_store_poller(
            store,
            config.listing_prefix.clone(),
            Duration::from_secs(config.poll_interval_secs),
            bus.clone(),
        )
    });

    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, store = %config.store_dir.display(), "serving storefront");
    axum::serve(listener, app(AppState::new(catalog))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(CatalogConfig::from_env()).await
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.catalog.current().await;
    render_html(IndexTemplate {
        sections: snapshot.sections.clone(),
        occasions: OCCASION_OPTIONS.to_vec(),
        guests: GUEST_OPTIONS.to_vec(),
        fingerprint: snapshot.fingerprint.clone(),
        computed_at: snapshot.computed_at.to_rfc3339(),
    })
}

async fn sections_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let snapshot = state.catalog.current().await;
    let etag = format!("\"{}\"", snapshot.fingerprint);
    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);
    if unchanged {
        return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response();
    }
    ([(header::ETAG, etag)], Json(snapshot.as_ref().clone())).into_response()
}

async fn invalidate_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.catalog.refresh().await {
        Ok(snapshot) => Json(RefreshResponse {
            run_id: snapshot.run_id.to_string(),
            fingerprint: snapshot.fingerprint.clone(),
            card_count: snapshot.card_count,
        })
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn search_handler(Query(criteria): Query<SearchCriteria>) -> Response {
    let criteria = match validate_criteria(&criteria) {
        Ok(criteria) => criteria,
        Err(err) => {
            let (missing, invalid): (Vec<&str>, Option<&str>) = match &err {
                SearchError::Incomplete { missing } => {
                    (missing.iter().map(|f| f.as_str()).collect(), None)
                }
                SearchError::UnknownOption { field, .. } => (Vec::new(), Some(field.as_str())),
                SearchError::PastDate(_) => (Vec::new(), None),
            };
            let body = SearchRejected {
                error: err.to_string(),
                missing,
                invalid,
            };
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
        }
    };
    match to_query_string(&criteria) {
        Ok(query) => Json(SearchAccepted { query, criteria }).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err)),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use vdisc_catalog::default_blueprints;
    use vdisc_storage::MemoryStore;

    fn state_with(store: Arc<MemoryStore>) -> AppState {
        let pipeline = CatalogPipeline::new(store, default_blueprints());
        AppState::new(Arc::new(CatalogService::new(pipeline).unwrap()))
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                "venue_listings_owner-1",
                r#"[{"id":"v1","name":"Sky Garden","location":{"city":"Cebu City"},"occasions":["Birthday"]}]"#,
            )
            .unwrap();
        store
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn index_renders_every_section() {
        let app = app(state_with(seeded_store()));
        let resp = app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Sky Garden"));
        assert!(text.contains("Popular Birthday venues in Cebu City"));
        assert!(text.contains("recently-added-placeholder-7"));
    }

    #[tokio::test]
    async fn sections_json_honours_etag() {
        let app = app(state_with(seeded_store()));
        let resp = app.clone().oneshot(get("/api/sections")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let etag = resp.headers()[header::ETAG].to_str().unwrap().to_string();
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["sections"].as_array().unwrap().len(), default_blueprints().len());

        let cached = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/sections")
                    .header(header::IF_NONE_MATCH, &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(cached.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn invalidate_recomputes_from_store() {
        let store = seeded_store();
        let app = app(state_with(store.clone()));
        store
            .put("venue_listings_owner-2", r#"[{"id":"v2","name":"Reef"}]"#)
            .unwrap();

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/listings/invalidate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["card_count"], 2);
    }

    #[tokio::test]
    async fn search_rejects_incomplete_criteria() {
        let app = app(state_with(seeded_store()));
        let resp = app
            .oneshot(get(
                "/api/search?where=Cebu&occasion=Wedding&when=March+5%2C+2025&guest=1-50",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["missing"], serde_json::json!(["budget"]));
    }

    #[tokio::test]
    async fn search_accepts_complete_criteria() {
        let app = app(state_with(seeded_store()));
        let resp = app
            .oneshot(get(
                "/api/search?where=Cebu&occasion=Funeral&when=December+1%2C+2025+-+December+5%2C+2025&guest=1-50&budget=%E2%82%B150%2C000+and+below",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["criteria"]["when"], "December 1, 2025 - December 5, 2025");
        assert!(json["query"].as_str().unwrap().starts_with("where=Cebu&occasion=Funeral"));
        assert_eq!(json["criteria"]["budget"], "₱50,000 and below");
    }

    #[tokio::test]
    async fn search_rejects_guest_outside_the_option_list() {
        let app = app(state_with(seeded_store()));
        let resp = app
            .oneshot(get(
                "/api/search?where=Cebu&occasion=Wedding&when=March+5%2C+2025&guest=lots&budget=%E2%82%B1500+and+below",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["invalid"], "guest");
        assert_eq!(json["missing"], serde_json::json!([]));
    }
}
