use serde_json::Value;

/// Hard bound on the unwrap recursion. Termination must not depend on the
/// payload being well formed.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Extra whole-pipeline unwrap passes applied to the first result, for
/// payloads that arrive doubly or triply JSON-encoded.
const EXTRA_UNWRAP_PASSES: usize = 3;

/// Keys that mark a mapping's main content; the rest of the mapping is
/// ignored when one is present.
const PRIMARY_CONTENT_KEYS: [&str; 2] = ["text", "content"];

/// Reduces an arbitrary payload to plain text. Total: every input,
/// including adversarial self-referential JSON strings, produces a string
/// within the depth bound.
///
/// After the first bounded pass the JSON-unwrap step is re-applied up to
/// three more times, and a trailing/leading ```json fence pair is stripped
/// from the final string.
pub fn extract_text(payload: &Value) -> String {
    let mut text = extract_value(payload, DEFAULT_MAX_DEPTH);
    for _ in 0..EXTRA_UNWRAP_PASSES {
        let trimmed = text.trim();
        if !looks_like_json_object(trimmed) {
            break;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(parsed) => text = extract_value(&parsed, DEFAULT_MAX_DEPTH),
            Err(_) => break,
        }
    }
    strip_json_fence(text.trim()).to_string()
}

/// UTF-8 decoding for payloads that arrive as raw bytes; undecodable
/// bytes are dropped rather than failing the extraction.
pub fn extract_bytes(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\u{FFFD}', "")
}

fn extract_value(payload: &Value, depth: usize) -> String {
    if depth == 0 {
        return fallback_text(payload);
    }

    match payload {
        Value::Object(map) => {
            for key in PRIMARY_CONTENT_KEYS {
                if let Some(primary) = map.get(key) {
                    return extract_value(primary, depth - 1);
                }
            }
            let parts: Vec<String> = map
                .values()
                .map(|value| extract_value(value, depth - 1))
                .collect();
            parts.join("\n\n").trim().to_string()
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if looks_like_json_object(trimmed) {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(parsed) => extract_value(&parsed, depth - 1),
                    // Not valid JSON after all; it is literal text.
                    Err(_) => text.clone(),
                }
            } else {
                text.clone()
            }
        }
        other => fallback_text(other),
    }
}

fn fallback_text(payload: &Value) -> String {
    match payload {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

fn looks_like_json_object(text: &str) -> bool {
    text.starts_with('{') && text.ends_with('}')
}

/// Strips one ```json ... ``` wrapper when both fences are present.
pub fn strip_json_fence(text: &str) -> &str {
    if let Some(inner) = text.strip_prefix("```json") {
        if let Some(inner) = inner.strip_suffix("```") {
            return inner.trim();
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(extract_text(&json!("hello there")), "hello there");
    }

    #[test]
    fn primary_content_key_wins_over_siblings() {
        let payload = json!({ "text": "the answer", "metadata": { "id": 7 } });
        assert_eq!(extract_text(&payload), "the answer");
    }

    #[test]
    fn mapping_without_primary_key_joins_values() {
        let payload = json!({ "a": "first", "b": "second" });
        assert_eq!(extract_text(&payload), "first\n\nsecond");
    }

    #[test]
    fn json_encoded_string_is_unwrapped() {
        let payload = json!(r#"{"text": "inner"}"#);
        assert_eq!(extract_text(&payload), "inner");
    }

    #[test]
    fn double_encoded_string_is_flattened() {
        let inner = json!({ "text": "deep" }).to_string();
        let outer = json!({ "text": inner }).to_string();
        assert_eq!(extract_text(&Value::String(outer)), "deep");
    }

    #[test]
    fn invalid_json_lookalike_is_returned_verbatim() {
        let payload = json!("{not actually json}");
        assert_eq!(extract_text(&payload), "{not actually json}");
    }

    #[test]
    fn fence_wrapped_json_round_trips() {
        let payload = json!("```json\n{\"a\":1}\n```");
        let extracted = extract_text(&payload);
        assert_eq!(extracted, "{\"a\":1}");
        let parsed: Value = serde_json::from_str(&extracted).expect("parses");
        assert_eq!(parsed, json!({ "a": 1 }));
    }

    #[test]
    fn unmatched_fence_is_left_alone() {
        let payload = json!("```json\n{\"a\":1}");
        assert_eq!(extract_text(&payload), "```json\n{\"a\":1}");
    }

    #[test]
    fn undecodable_bytes_are_dropped() {
        assert_eq!(extract_bytes(b"caf\xc3\xa9 \xff!"), "caf\u{e9} !");
    }

    #[test]
    fn scalars_get_a_textual_form() {
        assert_eq!(extract_text(&json!(42)), "42");
        assert_eq!(extract_text(&json!(true)), "true");
        assert_eq!(extract_text(&Value::Null), "");
    }

    #[test]
    fn terminates_on_pathologically_nested_encoding() {
        let mut payload = String::from("core");
        for _ in 0..50 {
            payload = json!({ "text": payload }).to_string();
        }
        // Must return within the depth bound without overflowing the stack;
        // a partially-unwrapped remainder is acceptable.
        let extracted = extract_text(&Value::String(payload));
        assert!(!extracted.is_empty());
    }

    #[test]
    fn extraction_is_idempotent_at_its_fixed_point() {
        let payload = json!({
            "content": { "summary": "all good", "details": "nothing else" }
        });
        let once = extract_text(&payload);
        let twice = extract_text(&Value::String(once.clone()));
        assert_eq!(once, twice);
    }
}
