// HTTP front end: `GET /ping` and `POST /invocations`.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServeConfig;
use crate::nlp::locate::{build_jsonp, map_entities, MappedEntity};
use crate::service::ScoringService;

const UNSUPPORTED_MEDIA: &str = "This predictor only supports JSON data";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScoringService>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvocationParams {
    /// Report the JSON path of each match instead of payload offsets.
    #[serde(default)]
    pub jsonpath: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub entities: Vec<MappedEntity>,
}

pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/invocations", post(invocations))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}

pub async fn serve(config: ServeConfig) -> anyhow::Result<()> {
    let service = Arc::new(ScoringService::from_dir(config.model_dir()));

    if config.eager {
        let warm = Arc::clone(&service);
        let loaded = tokio::task::spawn_blocking(move || warm.get_model().is_some()).await?;
        if !loaded {
            info!("model unavailable at startup, /ping will report unhealthy");
        }
    }

    let app = create_router(AppState { service }, config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(model_dir = %config.model_dir().display(), "Starting server on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Healthy when the model is loaded or loadable.
async fn ping(State(state): State<AppState>) -> Response {
    let service = Arc::clone(&state.service);
    let healthy = tokio::task::spawn_blocking(move || service.get_model().is_some())
        .await
        .unwrap_or(false);

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, [(header::CONTENT_TYPE, "application/json")], "\n").into_response()
}

async fn invocations(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        return plain(StatusCode::UNSUPPORTED_MEDIA_TYPE, UNSUPPORTED_MEDIA.to_string());
    }
    // query is parsed after the media type check so non-JSON requests always get a 415
    let params = match Query::<InvocationParams>::try_from_uri(&uri) {
        Ok(Query(p)) => p,
        Err(e) => return plain(StatusCode::BAD_REQUEST, e.body_text()),
    };

    let payload = match String::from_utf8(body.to_vec()) {
        Ok(p) => p,
        Err(_) => return plain(StatusCode::BAD_REQUEST, "Request body is not valid UTF-8".to_string()),
    };
    let record: Value = match serde_json::from_str(&payload) {
        Ok(v) => v,
        Err(e) => return plain(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e)),
    };
    info!(bytes = payload.len(), jsonpath = params.jsonpath, "invoked");

    let service = Arc::clone(&state.service);
    let located = tokio::task::spawn_blocking(move || {
        let predictions = service.predict(&record).unwrap_or_default();
        if params.jsonpath {
            build_jsonp(&record, &predictions)
        } else {
            map_entities(&payload, &predictions)
        }
    })
    .await;

    match located {
        Ok(entities) => {
            info!(entities = entities.len(), "prediction complete");
            Json(InvocationResponse { entities }).into_response()
        }
        Err(e) => {
            error!("prediction task failed: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Prediction failed".to_string())
        }
    }
}

// Media type must be application/json; parameters such as charset are ignored.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn plain(status: StatusCode, message: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], message).into_response()
}
