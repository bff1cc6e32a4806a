//! Axum helpers conforming to the gateway's JSON API.
//!
//! - [`LmJson`] to deserialize request bodies and serialize success
//!   responses (axum's own `Json` rejection is a bare string body, which
//!   does not match the API's error envelope).
//! - [`build_json_response`] to render any serializable body with a status.
//! - [`default_fallback`] for unmatched paths.

use axum::{extract::FromRequest, response::IntoResponse};
use http::{StatusCode, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ApiError, ErrorKind};

/// A version of [`axum::Json`] whose rejections and serialization failures
/// render the gateway's error envelope.
///
/// NOTE: only use this for *success* responses; its [`IntoResponse`] always
/// uses 200 OK. Errors go through [`ApiError`].
pub struct LmJson<T>(pub T);

impl<T: DeserializeOwned, S: Send + Sync> FromRequest<S> for LmJson<T> {
    type Rejection = ApiError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        axum::Json::from_request(req, state)
            .await
            .map(|axum::Json(t)| Self(t))
            .map_err(|rejection| {
                ApiError::with_msg(ErrorKind::BadRequest, rejection.body_text())
            })
    }
}

impl<T: Serialize> IntoResponse for LmJson<T> {
    fn into_response(self) -> axum::response::Response {
        build_json_response(StatusCode::OK, &self.0)
    }
}

/// Serialize `body` as the JSON response body with the given status.
pub fn build_json_response(
    status: StatusCode,
    body: &impl Serialize,
) -> axum::response::Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(CONTENT_TYPE, "application/json")],
            axum::body::Body::from(bytes),
        )
            .into_response(),
        Err(e) => {
            // Serializing our own response types should never fail.
            tracing::error!("Failed to serialize response body: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "application/json")],
                axum::body::Body::from(
                    r#"{"error":"internal_error"}"#.as_bytes(),
                ),
            )
                .into_response()
        }
    }
}

/// Fallback handler for requests matching no route: a 404 with the method
/// and path in the message.
pub async fn default_fallback(
    method: http::Method,
    uri: http::Uri,
) -> ApiError {
    let path = uri.path();
    ApiError::with_msg(ErrorKind::NotFound, format!("{method} {path}"))
}
