//! The gateway's API error type and its stable wire identifiers.
//!
//! Every error that crosses the HTTP boundary is an [`ApiError`]: a kind
//! from the fixed taxonomy below, an optional human message, optional
//! details, and optional structured data. The wire form is the JSON error
//! envelope `{error, message?, details?, ...data}`. Identifiers are stable;
//! renaming one is a breaking API change.

use std::fmt;

use axum::response::IntoResponse;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Associated constants can't be imported.
pub const CLIENT_400_BAD_REQUEST: StatusCode = StatusCode::BAD_REQUEST;
pub const CLIENT_401_UNAUTHORIZED: StatusCode = StatusCode::UNAUTHORIZED;
pub const CLIENT_403_FORBIDDEN: StatusCode = StatusCode::FORBIDDEN;
pub const CLIENT_404_NOT_FOUND: StatusCode = StatusCode::NOT_FOUND;
pub const CLIENT_413_PAYLOAD_TOO_LARGE: StatusCode =
    StatusCode::PAYLOAD_TOO_LARGE;
pub const SERVER_500_INTERNAL_SERVER_ERROR: StatusCode =
    StatusCode::INTERNAL_SERVER_ERROR;
pub const SERVER_502_BAD_GATEWAY: StatusCode = StatusCode::BAD_GATEWAY;
pub const SERVER_503_SERVICE_UNAVAILABLE: StatusCode =
    StatusCode::SERVICE_UNAVAILABLE;

/// A trait to get the HTTP status code for a given error.
pub trait ToHttpStatus {
    fn to_http_status(&self) -> StatusCode;
}

/// The full error taxonomy. The serialized identifier of each kind is fixed
/// by the API contract.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // -- validation -- //
    WalletRequired,
    WalletInvalid,
    CidRequired,
    CidInvalid,
    NameRequired,
    CidNotFound,
    BadRequest,
    NotFound,

    // -- PQ envelope -- //
    PqRequired,
    PqUnsupportedKem,
    PqKeyMismatch,
    PqBadBody,
    PqInvalidKemCt,
    PqInvalidIv,
    PqInvalidTag,
    PqInvalidCiphertext,
    PqDecapsulateFailed,
    PqDecryptFailed,
    PqEncryptFailed,
    PqBadEnvelope,

    // -- auth -- //
    AuthFailed,

    // -- chain / plan -- //
    ChainUnreachable,
    PlanValidationFailed,

    // -- ingest -- //
    UploadTokenRequired,
    UploadTokenInvalid,
    CarTooLarge,

    // -- CAS-daemon -- //
    IpfsPinFailed,
    IpfsUnpinFailed,
    IpfsGatewayError,
    IpfsUnavailable,
    NoUsableMultiaddrs,

    // -- catch-all -- //
    InternalError,
}

impl ErrorKind {
    /// The stable wire identifier, e.g. `ErrorKind::CarTooLarge` →
    /// `"car_too_large"`.
    pub fn as_str(self) -> &'static str {
        use ErrorKind::*;
        match self {
            WalletRequired => "wallet_required",
            WalletInvalid => "wallet_invalid",
            CidRequired => "cid_required",
            CidInvalid => "cid_invalid",
            NameRequired => "name_required",
            CidNotFound => "cid_not_found",
            BadRequest => "bad_request",
            NotFound => "not_found",

            PqRequired => "pq_required",
            PqUnsupportedKem => "pq_unsupported_kem",
            PqKeyMismatch => "pq_key_mismatch",
            PqBadBody => "pq_bad_body",
            PqInvalidKemCt => "pq_invalid_kem_ct",
            PqInvalidIv => "pq_invalid_iv",
            PqInvalidTag => "pq_invalid_tag",
            PqInvalidCiphertext => "pq_invalid_ciphertext",
            PqDecapsulateFailed => "pq_decapsulate_failed",
            PqDecryptFailed => "pq_decrypt_failed",
            PqEncryptFailed => "pq_encrypt_failed",
            PqBadEnvelope => "pq_bad_envelope",

            AuthFailed => "auth_failed",

            ChainUnreachable => "chain_unreachable",
            PlanValidationFailed => "plan_validation_failed",

            UploadTokenRequired => "upload_token_required",
            UploadTokenInvalid => "upload_token_invalid",
            CarTooLarge => "car_too_large",

            IpfsPinFailed => "ipfs_pin_failed",
            IpfsUnpinFailed => "ipfs_unpin_failed",
            IpfsGatewayError => "ipfs_gateway_error",
            IpfsUnavailable => "ipfs_unavailable",
            NoUsableMultiaddrs => "no_usable_multiaddrs",

            InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToHttpStatus for ErrorKind {
    fn to_http_status(&self) -> StatusCode {
        use ErrorKind::*;
        match self {
            WalletRequired | WalletInvalid | CidRequired | CidInvalid
            | NameRequired | BadRequest => CLIENT_400_BAD_REQUEST,
            CidNotFound | NotFound => CLIENT_404_NOT_FOUND,

            PqRequired | PqUnsupportedKem | PqKeyMismatch | PqBadBody
            | PqInvalidKemCt | PqInvalidIv | PqInvalidTag
            | PqInvalidCiphertext | PqDecapsulateFailed | PqDecryptFailed
            | PqBadEnvelope => CLIENT_400_BAD_REQUEST,
            PqEncryptFailed => SERVER_500_INTERNAL_SERVER_ERROR,

            AuthFailed => CLIENT_401_UNAUTHORIZED,

            ChainUnreachable => SERVER_503_SERVICE_UNAVAILABLE,
            PlanValidationFailed => CLIENT_403_FORBIDDEN,

            UploadTokenRequired => CLIENT_400_BAD_REQUEST,
            UploadTokenInvalid => CLIENT_401_UNAUTHORIZED,
            CarTooLarge => CLIENT_413_PAYLOAD_TOO_LARGE,

            IpfsPinFailed | IpfsUnpinFailed | IpfsGatewayError =>
                SERVER_502_BAD_GATEWAY,
            IpfsUnavailable | NoUsableMultiaddrs =>
                SERVER_503_SERVICE_UNAVAILABLE,

            InternalError => SERVER_500_INTERNAL_SERVER_ERROR,
        }
    }
}

/// The gateway's API error.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{kind}: {}", msg.as_deref().unwrap_or_default())]
pub struct ApiError {
    pub kind: ErrorKind,
    pub msg: Option<String>,
    pub details: Option<String>,
    /// Extra structured fields flattened into the error envelope
    /// (e.g. `max_bytes` on `car_too_large`).
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: None,
            details: None,
            data: serde_json::Map::new(),
        }
    }

    pub fn with_msg(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            msg: Some(msg.into()),
            ..Self::new(kind)
        }
    }

    pub fn with_details(
        kind: ErrorKind,
        msg: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            msg: Some(msg.into()),
            details: Some(details.into()),
            ..Self::new(kind)
        }
    }

    /// Attach a structured field to the error envelope.
    pub fn with_data(
        mut self,
        key: &str,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.data.insert(key.to_owned(), value.into());
        self
    }

    /// Shorthand for DB and other unexpected internal failures. Logs at
    /// error level; the wire message stays generic.
    pub fn internal(err: impl fmt::Display) -> Self {
        tracing::error!("Internal error: {err:#}");
        Self::new(ErrorKind::InternalError)
    }

    /// Log this error and get its HTTP status.
    fn log_and_status(&self) -> StatusCode {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::warn!("{self}");
        }
        status
    }
}

impl ToHttpStatus for ApiError {
    fn to_http_status(&self) -> StatusCode {
        self.kind.to_http_status()
    }
}

/// `ErrorResponse` is the JSON-serialized representation of [`ApiError`];
/// the only error struct actually sent across the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl From<ApiError> for ErrorResponse {
    fn from(err: ApiError) -> Self {
        Self {
            error: err.kind.as_str().to_owned(),
            message: err.msg,
            details: err.details,
            data: err.data,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        // Server-side errors are logged here, since the error has been
        // converted to a plain `http::Response` by the time any outer layer
        // can see it.
        let status = self.log_and_status();
        let body = ErrorResponse::from(self);
        crate::server::build_json_response(status, &body)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_identifiers_are_stable() {
        assert_eq!(ErrorKind::CarTooLarge.as_str(), "car_too_large");
        assert_eq!(ErrorKind::AuthFailed.as_str(), "auth_failed");
        assert_eq!(
            ErrorKind::PqDecapsulateFailed.as_str(),
            "pq_decapsulate_failed"
        );
        assert_eq!(ErrorKind::ChainUnreachable.as_str(), "chain_unreachable");
        // serde uses the same identifiers
        let json = serde_json::to_string(&ErrorKind::NoUsableMultiaddrs)
            .unwrap();
        assert_eq!(json, "\"no_usable_multiaddrs\"");
    }

    #[test]
    fn error_envelope_shape() {
        let err = ApiError::with_msg(ErrorKind::CarTooLarge, "upload too big")
            .with_data("max_bytes", 1024);
        let body = serde_json::to_value(ErrorResponse::from(err)).unwrap();
        assert_eq!(body["error"], "car_too_large");
        assert_eq!(body["message"], "upload too big");
        assert_eq!(body["max_bytes"], 1024);
        assert!(body.get("details").is_none());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ErrorKind::ChainUnreachable.to_http_status(),
            SERVER_503_SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorKind::AuthFailed.to_http_status(),
            CLIENT_401_UNAUTHORIZED
        );
        assert_eq!(
            ErrorKind::CarTooLarge.to_http_status(),
            CLIENT_413_PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ErrorKind::IpfsUnpinFailed.to_http_status(),
            SERVER_502_BAD_GATEWAY
        );
    }
}
