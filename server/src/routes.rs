use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::ApiError;
use crate::payload::ScriptPayload;
use crate::AppState;

const DEFAULT_FILENAME: &str = "model.obj";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/validate", post(validate))
        .route("/convert", post(convert))
        .route("/convert/base64", post(convert_base64))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API information
async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "BPY to OBJ Converter API",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": state.backend.name(),
        "endpoints": [
            { "path": "/", "method": "GET", "description": "This information" },
            { "path": "/health", "method": "GET", "description": "Health check" },
            { "path": "/validate", "method": "POST", "description": "Run a script and list the objects it creates" },
            { "path": "/convert", "method": "POST", "description": "Convert a script to an OBJ attachment" },
            { "path": "/convert/base64", "method": "POST", "description": "Convert a script to base64-encoded OBJ" }
        ]
    }))
}

/// Health check
async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Run a script without exporting
async fn validate(State(state): State<AppState>, payload: ScriptPayload) -> Json<Value> {
    let result = state.backend.validate(payload.script).await;

    if !result.success {
        return Json(json!({ "valid": false, "error": result.error }));
    }

    Json(json!({
        "valid": true,
        "object_count": result.object_count,
        "objects": result.object_names,
    }))
}

/// Script → OBJ attachment
async fn convert(
    State(state): State<AppState>,
    payload: ScriptPayload,
) -> Result<Response, ApiError> {
    let filename = sanitize_filename(payload.filename.as_deref());
    let bytes = state.backend.convert(payload.script, state.options).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Script → base64 OBJ in JSON
async fn convert_base64(
    State(state): State<AppState>,
    payload: ScriptPayload,
) -> Result<Json<Value>, ApiError> {
    let bytes = state.backend.convert(payload.script, state.options).await?;

    Ok(Json(json!({
        "format": bpy2obj::FORMAT,
        "base64_data": STANDARD.encode(bytes),
    })))
}

/// Keep caller-supplied names safe for a Content-Disposition header
fn sanitize_filename(name: Option<&str>) -> String {
    let cleaned: String = name
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(128)
        .collect();

    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}
