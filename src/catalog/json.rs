//! Response decoding with readable diagnostics.

use anyhow::Result;

/// Decode a response body, reporting the serde path, the type mismatch and a
/// short excerpt around the failure point when the body does not match `T`.
pub fn decode_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let raw = inner.to_string();
        let location = format!(" at line {line} column {column}");
        let reason = describe_mismatch(raw.strip_suffix(&location).unwrap_or(&raw));
        let excerpt = excerpt_at(body, line, column, 24);

        let mut message = String::new();
        if !path.is_empty() && path != "." {
            message.push_str(&format!("at '{path}': "));
        }
        message.push_str(&format!("{reason} (line {line} col {column})\n{excerpt}"));
        anyhow::anyhow!(message)
    })
}

/// Turn serde's "invalid type: X, expected Y" into "expected Y, got X".
fn describe_mismatch(message: &str) -> String {
    if let Some(rest) = message.split_once("invalid type: ").map(|(_, r)| r)
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {}", expected.trim(), actual);
    }
    message.to_string()
}

/// A window of `width` bytes around the 1-based `column` on `line`, with a
/// caret under the failing position. Window edges snap to char boundaries.
fn excerpt_at(body: &str, line: usize, column: usize, width: usize) -> String {
    let text = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if text.is_empty() {
        return "(empty line)".to_string();
    }

    let mut at = column.saturating_sub(1).min(text.len());
    while !text.is_char_boundary(at) {
        at -= 1;
    }
    let mut start = at.saturating_sub(width / 2);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (at + width / 2).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }

    let caret = " ".repeat(text[start..at].chars().count()) + "^";
    format!("...{}...\n   {caret}", &text[start..end])
}
