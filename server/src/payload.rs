//! Request body extraction for script endpoints
//!
//! Accepts the `script` (and optional `filename`) field from a JSON body, a
//! multipart form, or an urlencoded form, chosen by `Content-Type`.

use crate::error::ApiError;
use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use serde_json::Value;
use std::collections::HashMap;

const MISSING_SCRIPT: &str = "No script provided in request";
const SCRIPT_NOT_STRING: &str = "Script must be a string";

#[derive(Debug, Clone)]
pub struct ScriptPayload {
    pub script: String,
    pub filename: Option<String>,
}

#[async_trait]
impl<S> FromRequest<S> for ScriptPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let Json(value) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            return from_json(value);
        }

        let fields = if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            read_multipart(multipart).await?
        } else {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            fields
        };

        from_fields(fields)
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<HashMap<String, String>, ApiError> {
    let mut fields = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let text = field
            .text()
            .await
            .map_err(|_| ApiError::BadRequest(SCRIPT_NOT_STRING.to_string()))?;
        fields.insert(name, text);
    }
    Ok(fields)
}

fn from_fields(mut fields: HashMap<String, String>) -> Result<ScriptPayload, ApiError> {
    let script = fields
        .remove("script")
        .ok_or_else(|| ApiError::BadRequest(MISSING_SCRIPT.to_string()))?;
    Ok(ScriptPayload {
        script,
        filename: fields.remove("filename"),
    })
}

fn from_json(value: Value) -> Result<ScriptPayload, ApiError> {
    let Value::Object(mut map) = value else {
        return Err(ApiError::BadRequest(
            "Request data must be a JSON object".to_string(),
        ));
    };

    let script = match map.remove("script") {
        Some(Value::String(script)) => script,
        Some(_) => return Err(ApiError::BadRequest(SCRIPT_NOT_STRING.to_string())),
        None => return Err(ApiError::BadRequest(MISSING_SCRIPT.to_string())),
    };
    let filename = match map.remove("filename") {
        Some(Value::String(name)) => Some(name),
        _ => None,
    };

    Ok(ScriptPayload { script, filename })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_payload() {
        let payload = from_json(json!({ "script": "scene.cube()", "filename": "box.obj" })).unwrap();
        assert_eq!(payload.script, "scene.cube()");
        assert_eq!(payload.filename.as_deref(), Some("box.obj"));
    }

    #[test]
    fn test_json_missing_script() {
        let err = from_json(json!({ "filename": "box.obj" })).unwrap_err();
        assert_eq!(err.to_string(), MISSING_SCRIPT);
    }

    #[test]
    fn test_json_wrong_type() {
        let err = from_json(json!({ "script": 42 })).unwrap_err();
        assert_eq!(err.to_string(), SCRIPT_NOT_STRING);
    }

    #[test]
    fn test_json_not_object() {
        assert!(from_json(json!(["scene.cube()"])).is_err());
    }

    #[test]
    fn test_form_fields() {
        let mut fields = HashMap::new();
        fields.insert("script".to_string(), "scene.plane()".to_string());
        let payload = from_fields(fields).unwrap();
        assert_eq!(payload.script, "scene.plane()");
        assert_eq!(payload.filename, None);
    }
}
