//! Error types for the gateway
//!
//! Every way a request can be refused is one variant of [`GatewayError`],
//! mapped to an HTTP status and rendered through a single HTML template.
//! Variant payloads are for logs only; the page body stays generic so a
//! caller probing the gateway cannot enumerate registered key ids.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Refusal reasons for a gated request, plus upstream transport failure.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Signature headers missing, malformed, or inconsistent
    #[error("invalid signature envelope: {0}")]
    InvalidEnvelope(String),

    /// keyId fails the charset/length rule
    #[error("invalid key id")]
    InvalidKeyId,

    /// Registry has no record for the key id
    #[error("no key record for {0}")]
    KeyNotFound(String),

    /// Key record exists but is not active
    #[error("key {0} is not active")]
    KeyInactive(String),

    /// `created` lies beyond the allowed clock skew
    #[error("signature created in the future")]
    TimestampFuture,

    /// `expires` lies in the past
    #[error("signature expired")]
    SignatureExpired,

    /// Envelope carries no nonce
    #[error("missing nonce")]
    MissingNonce,

    /// Nonce already recorded within the retention window
    #[error("nonce already used")]
    Replay,

    /// Cryptographic verification failed
    #[error("signature verification failed: {0}")]
    SignatureBad(String),

    /// Algorithm name outside the supported set
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Transport or parse failure talking to the key registry
    #[error("key registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Gated route reached without signature headers
    #[error("signature required")]
    SignatureRequired,

    /// Transport failure talking to an upstream
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

impl GatewayError {
    /// HTTP status this error renders as
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::UnsupportedAlgorithm(_) => StatusCode::BAD_REQUEST,
            GatewayError::RegistryUnavailable(_) | GatewayError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::FORBIDDEN,
        }
    }

    /// Stable uppercase token identifying the error kind in logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidEnvelope(_) => "INVALID_ENVELOPE",
            GatewayError::InvalidKeyId => "INVALID_KEY_ID",
            GatewayError::KeyNotFound(_) => "KEY_NOT_FOUND",
            GatewayError::KeyInactive(_) => "KEY_INACTIVE",
            GatewayError::TimestampFuture => "TIMESTAMP_FUTURE",
            GatewayError::SignatureExpired => "SIGNATURE_EXPIRED",
            GatewayError::MissingNonce => "MISSING_NONCE",
            GatewayError::Replay => "REPLAY",
            GatewayError::SignatureBad(_) => "SIGNATURE_BAD",
            GatewayError::UnsupportedAlgorithm(_) => "UNSUPPORTED_ALGORITHM",
            GatewayError::RegistryUnavailable(_) => "REGISTRY_UNAVAILABLE",
            GatewayError::SignatureRequired => "SIGNATURE_REQUIRED",
            GatewayError::Upstream(_) => "UPSTREAM_UNAVAILABLE",
        }
    }

    /// Page heading shown to the client
    pub fn title(&self) -> &'static str {
        match self {
            GatewayError::SignatureRequired => "Signature Required",
            GatewayError::UnsupportedAlgorithm(_) => "Bad Request",
            GatewayError::RegistryUnavailable(_) | GatewayError::Upstream(_) => "Gateway Error",
            _ => "Access Denied",
        }
    }

    /// Generic message shown to the client. Authentication failures all
    /// share one message so the response does not confirm whether a key
    /// exists or which check failed.
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::SignatureRequired => {
                "This resource requires a signed request from a registered agent."
            }
            GatewayError::UnsupportedAlgorithm(_) => {
                "The request declared a signature algorithm this gateway does not support."
            }
            GatewayError::RegistryUnavailable(_) | GatewayError::Upstream(_) => {
                "The gateway could not complete the request. Please try again later."
            }
            _ => "The request signature could not be verified.",
        }
    }

    /// Optional short, non-sensitive hint for the error page. Never key
    /// material, signature bytes, or raw header values.
    pub fn public_detail(&self) -> Option<String> {
        match self {
            GatewayError::UnsupportedAlgorithm(alg) => Some(format!("offered algorithm: {}", alg)),
            GatewayError::SignatureExpired => Some("the signature has expired".to_string()),
            GatewayError::TimestampFuture => {
                Some("the signature creation time is in the future".to_string())
            }
            GatewayError::Replay => Some("the request nonce was already used".to_string()),
            _ => None,
        }
    }

    /// Render this error as a self-contained HTML page.
    ///
    /// The single rendering point for every refusal. All interpolated
    /// fields are escaped; no stack traces, no header echoes.
    pub fn to_html(&self) -> String {
        let detail = match self.public_detail() {
            Some(d) => format!("\n    <p class=\"detail\">Details: {}</p>", html_escape(&d)),
            None => String::new(),
        };
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"utf-8\">\n  <title>{title}</title>\n  <style>body{{font-family:sans-serif;margin:4em auto;max-width:32em}}h1{{font-size:1.4em}}.detail{{color:#666}}</style>\n</head>\n<body>\n  <main>\n    <h1>{title}</h1>\n    <p>{message}</p>{detail}\n  </main>\n</body>\n</html>\n",
            title = html_escape(self.title()),
            message = html_escape(self.public_message()),
            detail = detail,
        )
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            self.to_html(),
        )
            .into_response()
    }
}

/// Escape a string for safe interpolation into HTML text content.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
