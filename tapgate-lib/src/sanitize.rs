//! Log-field sanitisation
//!
//! Anything sourced from a request or an upstream passes through here
//! before it reaches a log line, so header-borne newlines and control
//! characters cannot forge log entries.

/// Upper bound on a sanitised log field, in bytes.
pub const MAX_FIELD_BYTES: usize = 200;

/// Strip control characters and truncate to [`MAX_FIELD_BYTES`] on a
/// character boundary.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_FIELD_BYTES));
    for c in input.chars() {
        if c.is_control() {
            continue;
        }
        if out.len() + c.len_utf8() > MAX_FIELD_BYTES {
            break;
        }
        out.push(c);
    }
    out
}
