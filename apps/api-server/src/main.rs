//! api-server — HTTP API for the article service.
//!
//! Serves article CRUD under a configurable prefix (default `/api/articles`):
//! - Storage: Redis (default, `redis` feature) or in-memory for local dev.
//! - Images: multipart uploads written to `UPLOAD_DIR` on local disk.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string) for the frontend.
//!
//! Run:
//! ```bash
//! # in-memory store, pretty logs
//! STORAGE_PROVIDER=memory cargo run -p api-server
//!
//! # redis over TLS
//! REDIS_HOST=cache.example.com REDIS_PASSWORD=... cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.

mod config;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use domain::repository::ArticleRepository;
use domain::{ArticleId, ArticlePatch, Clock, CoreError, ImageUpload, NewArticle};
use fs_assets::LocalAssetStore;
use serde::Deserialize;
use store::AnyStore;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Articles = ArticleRepository<AnyStore, LocalAssetStore, StdClock>;

#[derive(Clone)]
struct AppState {
    articles: Arc<Articles>,
}

#[derive(Clone)]
struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> std::time::SystemTime {
        std::time::SystemTime::now()
    }
}

#[tokio::main]
async fn main() {
    let dotenv_path = dotenv::dotenv().ok();

    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    match dotenv_path {
        Some(path) => debug!(path = %path.display(), "loaded .env"),
        None => debug!("no .env file; using process environment"),
    }
    info!(about = %domain::about(), "starting");
    cfg.warn_if_insecure();

    let store = match store::build_store(&cfg).await {
        Ok(s) => s,
        Err(e) => {
            error!(err = %e, "store unavailable at startup");
            std::process::exit(1);
        }
    };
    info!(store = store.kind(), upload_dir = %cfg.upload_dir.display(), "storage ready");

    let state = AppState {
        articles: Arc::new(ArticleRepository::new(
            store,
            LocalAssetStore::new(cfg.upload_dir.clone()),
            StdClock,
        )),
    };
    let app = build_router(state, &cfg);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = ?e, "bind failed");
            std::process::exit(1);
        }
    };
    info!(%addr, prefix = %cfg.api_prefix, "api-server listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = ?e, "server error");
        std::process::exit(1);
    }
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

fn build_router(state: AppState, cfg: &config::Config) -> Router {
    let prefix = cfg.api_prefix.as_str();
    let collection = get(list_articles).post(create_article);
    let item = get(get_article).put(update_article).delete(delete_article);

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    Router::new()
        .route(prefix, collection.clone())
        .route(&format!("{}/", prefix), collection)
        .route(&format!("{}/:id", prefix), item)
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(cors_layer(&cfg.cors_allow_origin))
        .with_state(state)
}

// CORS - origin already validated in Config::from_env()
fn cors_layer(origin: &HeaderValue) -> CorsLayer {
    if origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([origin.clone()]))
            .allow_credentials(true)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::ORIGIN,
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ])
    }
}

// ============================================================================
// Error mapping
// ============================================================================

const NOT_FOUND: &str = "Article not found";

/// Client-facing texts for failures whose wording depends on the operation.
struct FailureText {
    /// The store itself failed.
    store: &'static str,
    /// Writing the uploaded image failed.
    image: &'static str,
}

const LIST_FAILED: FailureText = FailureText {
    store: "Failed to retrieve articles",
    image: "Failed to save image",
};
const GET_FAILED: FailureText = FailureText {
    store: "Failed to retrieve article",
    image: "Failed to save image",
};
const CREATE_FAILED: FailureText = FailureText {
    store: "Failed to save article",
    image: "Failed to save image",
};
const UPDATE_FAILED: FailureText = FailureText {
    store: "Failed to update article",
    image: "Failed to save new image",
};
const DELETE_FAILED: FailureText = FailureText {
    store: "Failed to delete article",
    image: "Failed to save image",
};

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(http_common::json_error(message))).into_response()
}

/// Map a domain error to a response.
fn error_response(e: CoreError, failure: &FailureText) -> Response {
    match e {
        CoreError::NotFound | CoreError::InvalidId(_) => {
            warn!(err = %e, "article not found");
            json_error(StatusCode::NOT_FOUND, NOT_FOUND)
        }
        CoreError::ValidationFailed(msg) => {
            warn!(reason = %msg, "request rejected");
            json_error(StatusCode::BAD_REQUEST, &msg)
        }
        CoreError::AssetIoFailed(_) => {
            error!(err = ?e, "{}", failure.image);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, failure.image)
        }
        CoreError::MalformedData(_) => {
            error!(err = ?e, "stored article is malformed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to parse article data",
            )
        }
        CoreError::StorageUnavailable(_) => {
            error!(err = ?e, "{}", failure.store);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, failure.store)
        }
    }
}

fn form_error(status: StatusCode, body_text: String) -> Response {
    warn!(%status, reason = %body_text, "bad form body");
    json_error(status, &body_text)
}

// ============================================================================
// Article form (multipart or urlencoded)
// ============================================================================

/// Raw form values as submitted. Empty text values are kept as `Some("")`.
#[derive(Default)]
struct ArticleForm {
    title: Option<String>,
    excerpt: Option<String>,
    content: Option<String>,
    image: Option<ImageUpload>,
}

/// Text-only body sent as `application/x-www-form-urlencoded`.
#[derive(Deserialize)]
struct TextFields {
    title: Option<String>,
    excerpt: Option<String>,
    content: Option<String>,
}

impl From<TextFields> for ArticleForm {
    fn from(fields: TextFields) -> Self {
        Self {
            title: fields.title,
            excerpt: fields.excerpt,
            content: fields.content,
            image: None,
        }
    }
}

#[axum::async_trait]
impl<S> FromRequest<S> for ArticleForm
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let urlencoded = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| {
                ct.trim_start()
                    .to_ascii_lowercase()
                    .starts_with("application/x-www-form-urlencoded")
            })
            .unwrap_or(false);

        if urlencoded {
            let Form(fields) = Form::<TextFields>::from_request(req, state)
                .await
                .map_err(|rej| form_error(rej.status(), rej.body_text()))?;
            return Ok(fields.into());
        }

        let multipart = Multipart::from_request(req, state)
            .await
            .map_err(|rej| form_error(rej.status(), rej.body_text()))?;
        Self::collect(multipart)
            .await
            .map_err(|e| form_error(e.status(), e.body_text()))
    }
}

impl ArticleForm {
    async fn collect(mut multipart: Multipart) -> Result<Self, MultipartError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "title" => form.title = Some(field.text().await?),
                "excerpt" => form.excerpt = Some(field.text().await?),
                "content" => form.content = Some(field.text().await?),
                "image" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await?;
                    // Browsers send an empty file input as a part with no filename.
                    if !file_name.is_empty() {
                        form.image = Some(ImageUpload {
                            file_name,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                _ => debug!(field = %name, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    fn into_new_article(self) -> NewArticle {
        NewArticle {
            title: self.title.unwrap_or_default(),
            excerpt: self.excerpt.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            image: self.image,
        }
    }

    /// On update an empty value means "leave unchanged".
    fn into_patch(self) -> ArticlePatch {
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        ArticlePatch {
            title: present(self.title),
            excerpt: present(self.excerpt),
            content: present(self.content),
            image: self.image,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_articles(State(state): State<AppState>) -> Response {
    match state.articles.list().await {
        Ok(articles) => {
            info!(count = articles.len(), "list ok");
            (
                StatusCode::OK,
                Json(http_common::json_payload("articles", &articles)),
            )
                .into_response()
        }
        Err(e) => error_response(e, &LIST_FAILED),
    }
}

async fn get_article(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match ArticleId::new(id) {
        Ok(id) => id,
        Err(e) => return error_response(e, &GET_FAILED),
    };
    match state.articles.get(&id).await {
        Ok(article) => {
            info!(id = %id, "get ok");
            (
                StatusCode::OK,
                Json(http_common::json_payload("article", &article)),
            )
                .into_response()
        }
        Err(e) => error_response(e, &GET_FAILED),
    }
}

async fn create_article(
    State(state): State<AppState>,
    form: Result<ArticleForm, Response>,
) -> Response {
    let form = match form {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match state.articles.create(form.into_new_article()).await {
        Ok(article) => {
            info!(id = %article.id, "create ok");
            (
                StatusCode::CREATED,
                Json(http_common::json_message_with(
                    "Article created successfully",
                    "article",
                    &article,
                )),
            )
                .into_response()
        }
        Err(e) => error_response(e, &CREATE_FAILED),
    }
}

async fn update_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
    form: Result<ArticleForm, Response>,
) -> Response {
    let id = match ArticleId::new(id) {
        Ok(id) => id,
        Err(e) => return error_response(e, &UPDATE_FAILED),
    };
    let form = match form {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match state.articles.update(&id, form.into_patch()).await {
        Ok(article) => {
            info!(id = %id, "update ok");
            (
                StatusCode::OK,
                Json(http_common::json_message_with(
                    "Article updated successfully",
                    "article",
                    &article,
                )),
            )
                .into_response()
        }
        Err(e) => error_response(e, &UPDATE_FAILED),
    }
}

async fn delete_article(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match ArticleId::new(id) {
        Ok(id) => id,
        Err(e) => return error_response(e, &DELETE_FAILED),
    };
    match state.articles.delete(&id).await {
        Ok(()) => {
            info!(id = %id, "delete ok");
            (
                StatusCode::OK,
                Json(http_common::json_message("Article deleted successfully")),
            )
                .into_response()
        }
        Err(e) => error_response(e, &DELETE_FAILED),
    }
}
