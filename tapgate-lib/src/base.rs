//! Signature base reconstruction
//!
//! Rebuilds the exact byte sequence the signer covered: one
//! `"<component>": <value>` line per covered component in envelope
//! order, then a final `"@signature-params"` line echoing the raw
//! parameter expression. Lines are joined with `\n` and there is no
//! trailing newline; repeat invocations over the same inputs are
//! byte-identical.

use crate::envelope::SignatureEnvelope;
use crate::error::{GatewayError, Result};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Method, Request};

/// The slice of an inbound request the base-string builder consumes.
#[derive(Debug)]
pub struct RequestContext<'a> {
    /// Request method
    pub method: &'a Method,
    /// Host the request was addressed to, port included when the
    /// client sent one
    pub authority: Option<String>,
    /// Path plus query string, as received
    pub path_and_query: String,
    /// Request headers
    pub headers: &'a HeaderMap,
}

impl<'a> RequestContext<'a> {
    /// Derive a context from a request head. The body is never touched.
    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        let authority = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .or_else(|| req.uri().authority().map(|a| a.to_string()));
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        Self {
            method: req.method(),
            authority,
            path_and_query,
            headers: req.headers(),
        }
    }

    /// Derive a context from a request head already split into parts.
    pub fn from_parts(parts: &'a Parts) -> Self {
        let authority = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        Self {
            method: &parts.method,
            authority,
            path_and_query,
            headers: &parts.headers,
        }
    }
}

/// Reconstruct the signature base for an envelope against a live request.
///
/// A covered component that cannot be resolved from the request fails
/// verification: the signer's base string contained a line for it, so
/// omitting it here could only produce a base the signature never
/// covered.
pub fn build_signature_base(envelope: &SignatureEnvelope, ctx: &RequestContext) -> Result<String> {
    let mut lines = Vec::with_capacity(envelope.covered_components.len() + 1);
    for component in &envelope.covered_components {
        let name = component.to_ascii_lowercase();
        let value = component_value(&name, ctx)
            .ok_or_else(|| missing_component(component))?;
        lines.push(format!("\"{}\": {}", name, value));
    }
    lines.push(format!("\"@signature-params\": {}", envelope.raw_params));
    Ok(lines.join("\n"))
}

fn component_value(name: &str, ctx: &RequestContext) -> Option<String> {
    match name {
        "@authority" | "host" => ctx.authority.clone(),
        "@path" => Some(ctx.path_and_query.clone()),
        "@method" => Some(ctx.method.as_str().to_string()),
        "content-type" => Some(
            header_value(ctx.headers, name).unwrap_or_else(|| "application/json".to_string()),
        ),
        _ => header_value(ctx.headers, name),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

fn missing_component(component: &str) -> GatewayError {
    GatewayError::SignatureBad(format!("covered component {} not present in request", component))
}
