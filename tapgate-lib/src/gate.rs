//! Gate and proxy core
//!
//! This module implements:
//! - Route policy (which paths require a verified agent signature)
//! - The verification pipeline over the parser, registry, replay guard
//!   and verifier
//! - Transparent streaming forwarding to the configured upstreams
//! - Security response headers on every response
//!
//! Verification happens entirely on the request head; bodies stream
//! through untouched in both directions.

use crate::base::{build_signature_base, RequestContext};
use crate::config::GatewayConfig;
use crate::envelope::SignatureEnvelope;
use crate::error::{GatewayError, Result};
use crate::registry::KeyRegistry;
use crate::replay::ReplayGuard;
use crate::sanitize::sanitize;
use crate::verify;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Header naming the covered components and signature parameters.
pub const SIGNATURE_INPUT_HEADER: &str = "signature-input";
/// Companion header carrying the signature bytes.
pub const SIGNATURE_HEADER: &str = "signature";

/// Gateway state shared by every request task.
pub struct Gateway {
    config: GatewayConfig,
    registry: KeyRegistry,
    nonces: Arc<ReplayGuard>,
    http: reqwest::Client,
}

/// Outcome of a successful verification, for the admission log line.
#[derive(Debug)]
pub struct VerifiedAgent {
    pub key_id: String,
    pub algorithm: String,
    pub agent_name: Option<String>,
    pub tag: Option<String>,
}

impl Gateway {
    /// Build a gateway from configuration.
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let registry = KeyRegistry::new(config.registry_url.clone(), config.cache_ttl)?;
        let nonces = Arc::new(ReplayGuard::new(config.nonce_ttl));
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            config,
            registry,
            nonces,
            http,
        })
    }

    /// The replay guard, for wiring up the background sweeper.
    pub fn replay_guard(&self) -> Arc<ReplayGuard> {
        Arc::clone(&self.nonces)
    }

    /// The gateway's configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Build the router: one fallback handler covers every path and
    /// method, with the security headers applied to every response.
    pub fn router(self: Arc<Self>) -> Router {
        Router::<Arc<Self>>::new()
            .fallback(handle)
            .layer(middleware::map_response(apply_security_headers))
            .with_state(self)
    }

    async fn process(&self, req: Request) -> Result<Response> {
        let req = if is_gated(req.uri().path()) {
            let (parts, body) = req.into_parts();
            let verified = self.verify_gated(&parts).await?;
            info!(
                key_id = %sanitize(&verified.key_id),
                algorithm = %verified.algorithm,
                agent = %sanitize(verified.agent_name.as_deref().unwrap_or("-")),
                tag = %sanitize(verified.tag.as_deref().unwrap_or("-")),
                path = %sanitize(parts.uri.path()),
                "agent request verified"
            );
            Request::from_parts(parts, body)
        } else {
            req
        };
        self.forward(req).await
    }

    /// Run the full verification pipeline on a gated request head.
    ///
    /// Check order matters: malformed input is refused before the
    /// registry is consulted, an unsupported algorithm is refused
    /// before the nonce is consumed, and the nonce is consumed before
    /// the cryptographic check so an intercepted-and-replayed envelope
    /// stays burned even when its verification would fail.
    async fn verify_gated(&self, parts: &axum::http::request::Parts) -> Result<VerifiedAgent> {
        let headers = &parts.headers;
        let sig_input = text_header(headers, SIGNATURE_INPUT_HEADER)?;
        let sig = text_header(headers, SIGNATURE_HEADER)?;
        let (sig_input, sig) = match (sig_input, sig) {
            (None, None) => return Err(GatewayError::SignatureRequired),
            (Some(input), Some(sig)) => (input, sig),
            _ => {
                return Err(GatewayError::InvalidEnvelope(
                    "signature header pair is incomplete".to_string(),
                ))
            }
        };

        let envelope = SignatureEnvelope::parse(sig_input, sig)?;
        debug!(
            label = %sanitize(&envelope.label),
            key_id = %sanitize(&envelope.key_id),
            algorithm = %sanitize(&envelope.algorithm),
            "parsed signature envelope"
        );

        let record = self.registry.get(&envelope.key_id).await?;
        if !record.is_active() {
            return Err(GatewayError::KeyInactive(envelope.key_id));
        }

        if !verify::is_supported(&envelope.algorithm) {
            return Err(GatewayError::UnsupportedAlgorithm(envelope.algorithm));
        }
        if !record.algorithm.eq_ignore_ascii_case(&envelope.algorithm) {
            return Err(GatewayError::SignatureBad(format!(
                "envelope algorithm {} does not match the key record",
                envelope.algorithm
            )));
        }

        let now = unix_now();
        if let Some(created) = envelope.created {
            if created > now + self.config.clock_skew_secs {
                return Err(GatewayError::TimestampFuture);
            }
        }
        if let Some(expires) = envelope.expires {
            if expires < now {
                return Err(GatewayError::SignatureExpired);
            }
        }

        let nonce = envelope.nonce.as_deref().ok_or(GatewayError::MissingNonce)?;
        if !self.nonces.check_and_record(nonce) {
            warn!(
                key_id = %sanitize(&envelope.key_id),
                nonce = %sanitize(nonce),
                "replayed nonce refused"
            );
            return Err(GatewayError::Replay);
        }

        let ctx = RequestContext::from_parts(parts);
        let base = build_signature_base(&envelope, &ctx)?;
        verify::verify_signature(
            &envelope.algorithm,
            &record.public_key,
            base.as_bytes(),
            &envelope.signature_bytes,
        )?;

        Ok(VerifiedAgent {
            key_id: envelope.key_id,
            algorithm: envelope.algorithm,
            agent_name: record.agent_name,
            tag: envelope.tag,
        })
    }

    /// Forward an admitted request, streaming both bodies.
    async fn forward(&self, req: Request) -> Result<Response> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let upstream = self.upstream_for(parts.uri.path());
        let url = format!("{}{}", upstream.trim_end_matches('/'), path_and_query);

        let mut headers = HeaderMap::with_capacity(parts.headers.len());
        for (name, value) in parts.headers.iter() {
            if !skip_forward_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        debug!(
            method = %parts.method,
            url = %sanitize(&url),
            "forwarding to upstream"
        );
        let response = self
            .http
            .request(parts.method.clone(), url.as_str())
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let status = response.status();
        debug!(status = %status, "upstream responded");

        let upstream_headers = response.headers().clone();
        let mut out = Response::new(Body::from_stream(response.bytes_stream()));
        *out.status_mut() = status;
        for (name, value) in upstream_headers.iter() {
            if !skip_return_header(name) {
                out.headers_mut().append(name.clone(), value.clone());
            }
        }
        Ok(out)
    }

    fn upstream_for(&self, path: &str) -> &str {
        if path.starts_with("/api") {
            &self.config.api_upstream_url
        } else {
            &self.config.app_upstream_url
        }
    }
}

async fn handle(State(gateway): State<Arc<Gateway>>, req: Request) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match gateway.process(req).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                kind = err.kind(),
                status = %err.status(),
                method = %method,
                path = %sanitize(&path),
                detail = %sanitize(&err.to_string()),
                "request refused"
            );
            err.into_response()
        }
    }
}

/// Security headers applied to every response, errors included.
async fn apply_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; frame-ancestors 'none'"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// Whether a path requires a verified agent signature.
fn is_gated(path: &str) -> bool {
    path.to_ascii_lowercase().starts_with("/product/")
}

fn text_header<'h>(headers: &'h HeaderMap, name: &str) -> Result<Option<&'h str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| {
            GatewayError::InvalidEnvelope(format!("{} header is not valid text", name))
        }),
    }
}

/// Headers the proxy layer recomputes instead of copying upstream.
fn skip_forward_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "content-length"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers dropped from upstream responses; the return leg frames its
/// own body.
fn skip_return_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "content-length" | "connection" | "keep-alive" | "trailer" | "transfer-encoding" | "upgrade"
    )
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gated_paths() {
        assert!(is_gated("/product/42"));
        assert!(is_gated("/PRODUCT/42"));
        assert!(is_gated("/Product/widgets/7"));
        assert!(!is_gated("/products"));
        assert!(!is_gated("/about"));
        assert!(!is_gated("/api/orders"));
        assert!(!is_gated("/"));
    }

    #[test]
    fn test_upstream_selection() {
        let config = GatewayConfig::new()
            .with_api_upstream("http://api.internal")
            .with_app_upstream("http://app.internal");
        let gateway = Gateway::new(config).expect("build gateway");
        assert_eq!(gateway.upstream_for("/api/orders"), "http://api.internal");
        assert_eq!(gateway.upstream_for("/api"), "http://api.internal");
        assert_eq!(gateway.upstream_for("/product/42"), "http://app.internal");
        assert_eq!(gateway.upstream_for("/"), "http://app.internal");
    }

    #[test]
    fn test_forward_header_filtering() {
        assert!(skip_forward_header(&HeaderName::from_static("host")));
        assert!(skip_forward_header(&HeaderName::from_static("connection")));
        assert!(skip_forward_header(&HeaderName::from_static("transfer-encoding")));
        assert!(!skip_forward_header(&HeaderName::from_static("signature")));
        assert!(!skip_forward_header(&HeaderName::from_static("signature-input")));
        assert!(!skip_forward_header(&HeaderName::from_static("content-type")));
        assert!(!skip_forward_header(&HeaderName::from_static("authorization")));
    }

    #[test]
    fn test_return_header_filtering() {
        assert!(skip_return_header(&HeaderName::from_static("transfer-encoding")));
        assert!(!skip_return_header(&HeaderName::from_static("content-type")));
        assert!(!skip_return_header(&HeaderName::from_static("set-cookie")));
    }

    #[test]
    fn test_unix_now_is_current() {
        // Sanity bound: after 2023-01-01, before 2100
        let now = unix_now();
        assert!(now > 1_672_531_200);
        assert!(now < 4_102_444_800);
    }
}
