//! Signature envelope parsing
//!
//! Decodes the `signature-input` / `signature` header pair into a
//! structured [`SignatureEnvelope`]. Accepted wire shape:
//!
//! ```text
//! signature-input: LABEL=("@authority" "@path"); created=INT; expires=INT; keyId="ID"; alg="NAME"; nonce="N"; tag="T"
//! signature:       LABEL=:BASE64:
//! ```
//!
//! Both headers must carry the same label. The label is opaque; any
//! single label is accepted, but multiple comma-separated signatures
//! are not supported.

use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Structured parse of the two signature headers for one request.
#[derive(Debug, Clone)]
pub struct SignatureEnvelope {
    /// Signature label shared by both headers
    pub label: String,
    /// Covered component identifiers, in signing order
    pub covered_components: Vec<String>,
    /// The signature-input value with the `LABEL=` prefix removed,
    /// verbatim. Echoed back as the base string's final line.
    pub raw_params: String,
    /// Key identifier, validated against the charset rule
    pub key_id: String,
    /// Algorithm name, lowercased; not checked against the supported
    /// set here (that decides between a 400 and a 403 at the gate)
    pub algorithm: String,
    /// Signing time in unix seconds, if declared
    pub created: Option<i64>,
    /// Expiry in unix seconds, if declared
    pub expires: Option<i64>,
    /// Single-use token; absence is rejected at the gate
    pub nonce: Option<String>,
    /// Operation class hint; logged, never interpreted
    pub tag: Option<String>,
    /// Decoded signature value from the companion header
    pub signature_bytes: Vec<u8>,
}

/// One tokenised `key=value` parameter.
enum ParamValue {
    Str(String),
    Int(i64),
}

impl SignatureEnvelope {
    /// Parse the signature header pair.
    ///
    /// # Errors
    ///
    /// `InvalidEnvelope` for any structural mismatch (including a label
    /// mismatch between the two headers or malformed base64), and
    /// `InvalidKeyId` when the key id fails the charset/length rule.
    pub fn parse(signature_input: &str, signature: &str) -> Result<Self> {
        let input = signature_input.trim();

        let (label, rest) = split_label(input)?;
        if !rest.starts_with('(') {
            return Err(invalid("signature-input missing component list"));
        }
        let raw_params = rest.to_string();

        let list_end = rest
            .find(");")
            .ok_or_else(|| invalid("signature-input missing parameter list"))?;
        let component_list = &rest[1..list_end];
        let param_list = &rest[list_end + 2..];

        let covered_components = parse_components(component_list)?;

        let mut key_id = None;
        let mut algorithm = None;
        let mut created = None;
        let mut expires = None;
        let mut nonce = None;
        let mut tag = None;

        for (key, value) in parse_parameters(param_list)? {
            match key.to_ascii_lowercase().as_str() {
                "keyid" => key_id = Some(expect_string(value, "keyId")?),
                "alg" => algorithm = Some(expect_string(value, "alg")?.to_ascii_lowercase()),
                "created" => created = Some(expect_integer(value, "created")?),
                "expires" => expires = Some(expect_integer(value, "expires")?),
                "nonce" => nonce = Some(expect_string(value, "nonce")?),
                "tag" => tag = Some(expect_string(value, "tag")?),
                // Unknown but well-formed parameters still appear in the
                // raw expression (and therefore the base string)
                _ => {}
            }
        }

        let key_id = key_id.ok_or_else(|| invalid("missing keyId parameter"))?;
        if !valid_key_id(&key_id) {
            return Err(GatewayError::InvalidKeyId);
        }
        let algorithm = algorithm.ok_or_else(|| invalid("missing alg parameter"))?;

        if let (Some(created), Some(expires)) = (created, expires) {
            if created > expires {
                return Err(invalid("created is later than expires"));
            }
        }

        let signature_bytes = parse_signature_value(signature, &label)?;

        Ok(Self {
            label,
            covered_components,
            raw_params,
            key_id,
            algorithm,
            created,
            expires,
            nonce: nonce.filter(|n| !n.is_empty()),
            tag,
            signature_bytes,
        })
    }
}

/// Check a key id against the charset rule: 1..=100 chars from
/// `[A-Za-z0-9._-]`.
pub fn valid_key_id(key_id: &str) -> bool {
    !key_id.is_empty()
        && key_id.len() <= 100
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn invalid(detail: impl Into<String>) -> GatewayError {
    GatewayError::InvalidEnvelope(detail.into())
}

/// Split `LABEL=rest`, validating the label charset.
fn split_label(value: &str) -> Result<(String, &str)> {
    let eq = value
        .find('=')
        .ok_or_else(|| invalid("header value has no label"))?;
    let label = &value[..eq];
    if label.is_empty()
        || !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '*'))
    {
        // A comma here means a multi-signature dictionary, which is
        // not supported
        return Err(invalid("malformed signature label"));
    }
    Ok((label.to_string(), &value[eq + 1..]))
}

/// Tokenise the quoted component identifiers.
fn parse_components(list: &str) -> Result<Vec<String>> {
    let mut components = Vec::new();
    for token in list.split_whitespace() {
        let inner = token
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .ok_or_else(|| invalid("component identifier is not quoted"))?;
        if inner.is_empty() || inner.contains('"') {
            return Err(invalid("malformed component identifier"));
        }
        components.push(inner.to_string());
    }
    Ok(components)
}

/// Tokenise `key=value` pairs separated by `;`, honouring quotes so a
/// quoted value may itself contain a semicolon.
fn parse_parameters(list: &str) -> Result<Vec<(String, ParamValue)>> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let push_pair = |piece: &str, pairs: &mut Vec<(String, ParamValue)>| -> Result<()> {
        let piece = piece.trim();
        if piece.is_empty() {
            return Ok(());
        }
        let eq = piece
            .find('=')
            .ok_or_else(|| invalid("parameter is not key=value"))?;
        let key = piece[..eq].trim();
        let value = piece[eq + 1..].trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("malformed parameter key"));
        }
        pairs.push((key.to_string(), parse_value(value)?));
        Ok(())
    };

    for c in list.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => {
                push_pair(&current, &mut pairs)?;
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err(invalid("unterminated quoted parameter value"));
    }
    push_pair(&current, &mut pairs)?;
    Ok(pairs)
}

/// A parameter value is either a quoted string or a bare unsigned integer.
fn parse_value(value: &str) -> Result<ParamValue> {
    if let Some(inner) = value.strip_prefix('"') {
        let inner = inner
            .strip_suffix('"')
            .ok_or_else(|| invalid("unterminated quoted parameter value"))?;
        if inner.contains('"') {
            return Err(invalid("stray quote in parameter value"));
        }
        return Ok(ParamValue::Str(inner.to_string()));
    }
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        let n = value
            .parse::<i64>()
            .map_err(|_| invalid("integer parameter out of range"))?;
        return Ok(ParamValue::Int(n));
    }
    Err(invalid("parameter value is neither quoted nor an integer"))
}

fn expect_string(value: ParamValue, key: &str) -> Result<String> {
    match value {
        ParamValue::Str(s) => Ok(s),
        ParamValue::Int(_) => Err(invalid(format!("{} must be a quoted string", key))),
    }
}

fn expect_integer(value: ParamValue, key: &str) -> Result<i64> {
    match value {
        ParamValue::Int(n) => Ok(n),
        ParamValue::Str(_) => Err(invalid(format!("{} must be an integer", key))),
    }
}

/// Parse the companion `signature` header (`LABEL=:BASE64:`) and decode
/// its payload, checking the label matches the signature-input header.
fn parse_signature_value(signature: &str, expected_label: &str) -> Result<Vec<u8>> {
    let value = signature.trim();
    let (label, rest) = split_label(value)?;
    if label != expected_label {
        return Err(invalid("signature and signature-input labels differ"));
    }
    let encoded = rest
        .strip_prefix(':')
        .and_then(|r| r.strip_suffix(':'))
        .ok_or_else(|| invalid("signature value is not colon-delimited"))?;
    if encoded.is_empty() {
        return Err(invalid("empty signature value"));
    }
    BASE64
        .decode(encoded)
        .map_err(|_| invalid("signature value is not valid base64"))
}
