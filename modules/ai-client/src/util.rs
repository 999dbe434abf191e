/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip markdown code fences from a model response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Tolerant JSON parse: strip fences, then cut anything before the first
/// `{`/`[` and after the last `}`/`]`. Models occasionally wrap JSON in prose
/// despite instructions.
pub fn parse_json_loose(response: &str) -> Result<serde_json::Value, serde_json::Error> {
    let stripped = strip_code_blocks(response);
    if let Ok(value) = serde_json::from_str(stripped) {
        return Ok(value);
    }

    let start = stripped
        .find(['{', '['])
        .unwrap_or(0);
    let end = stripped
        .rfind(['}', ']'])
        .map(|i| i + 1)
        .unwrap_or(stripped.len());
    serde_json::from_str(&stripped[start..end.max(start)])
}
