use super::{CanonicalChunk, CanonicalMessage, CanonicalRequest, CanonicalResponse, Content, ContentPart, Role};
use crate::error::Result;
use serde_json::{json, Value};

fn role_to_gemini(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        _ => "user",
    }
}

fn parts_to_content(parts: &Value) -> Content {
    let items: Vec<ContentPart> = parts
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|p| {
                    if let Some(text) = p.get("text").and_then(Value::as_str) {
                        Some(ContentPart::Text(text.to_string()))
                    } else {
                        p.pointer("/inlineData/data")
                            .and_then(Value::as_str)
                            .map(|d| ContentPart::ImageUrl(d.to_string()))
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    Content::Parts(items)
}

fn content_to_parts(content: &Content) -> Value {
    match content {
        Content::Text(t) => json!([{"text": t}]),
        Content::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text(t) => json!({"text": t}),
                    ContentPart::ImageUrl(u) => json!({"inlineData": {"mimeType": "image/png", "data": u}}),
                })
                .collect(),
        ),
    }
}

pub fn request_to_canonical(body: &Value) -> Result<CanonicalRequest> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("gemini-1.5-pro")
        .trim_start_matches("models/")
        .to_string();

    let mut messages = Vec::new();
    if let Some(sys) = body.pointer("/systemInstruction/parts/0/text").and_then(Value::as_str) {
        messages.push(CanonicalMessage { role: Role::System, content: Content::Text(sys.to_string()), name: None });
    }
    if let Some(contents) = body.get("contents").and_then(Value::as_array) {
        for c in contents {
            let role = match c.get("role").and_then(Value::as_str) {
                Some("model") => Role::Assistant,
                _ => Role::User,
            };
            let content = parts_to_content(c.get("parts").unwrap_or(&Value::Null));
            messages.push(CanonicalMessage { role, content, name: None });
        }
    }

    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let gen_cfg = body.get("generationConfig");
    Ok(CanonicalRequest {
        model,
        messages,
        stream,
        temperature: gen_cfg.and_then(|g| g.get("temperature")).and_then(Value::as_f64),
        top_p: gen_cfg.and_then(|g| g.get("topP")).and_then(Value::as_f64),
        max_tokens: gen_cfg.and_then(|g| g.get("maxOutputTokens")).and_then(Value::as_u64).map(|v| v as u32),
    })
}

pub fn canonical_to_request(req: &CanonicalRequest) -> Value {
    let mut system_text: Vec<String> = Vec::new();
    let mut contents = Vec::new();
    for m in &req.messages {
        if m.role == Role::System {
            system_text.push(m.content.as_text());
            continue;
        }
        contents.push(json!({
            "role": role_to_gemini(m.role),
            "parts": content_to_parts(&m.content),
        }));
    }

    let mut body = json!({ "contents": contents });
    if !system_text.is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": system_text.join("\n")}]});
    }
    let mut gen_cfg = serde_json::Map::new();
    if let Some(t) = req.temperature {
        gen_cfg.insert("temperature".into(), json!(t));
    }
    if let Some(t) = req.top_p {
        gen_cfg.insert("topP".into(), json!(t));
    }
    if let Some(t) = req.max_tokens {
        gen_cfg.insert("maxOutputTokens".into(), json!(t));
    }
    if !gen_cfg.is_empty() {
        body["generationConfig"] = Value::Object(gen_cfg);
    }
    body
}

fn extract_text(body: &Value) -> String {
    body.pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

pub fn response_to_canonical(body: &Value) -> Result<CanonicalResponse> {
    let text = extract_text(body);
    let finish_reason = body.pointer("/candidates/0/finishReason").and_then(Value::as_str).map(String::from);
    let input_tokens = body.pointer("/usageMetadata/promptTokenCount").and_then(Value::as_i64);
    let output_tokens = body.pointer("/usageMetadata/candidatesTokenCount").and_then(Value::as_i64);
    Ok(CanonicalResponse { model: String::new(), text, finish_reason, input_tokens, output_tokens })
}

pub fn canonical_to_response(resp: &CanonicalResponse) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": resp.text}]},
            "finishReason": resp.finish_reason.clone().unwrap_or_else(|| "STOP".to_string()),
        }],
        "usageMetadata": {
            "promptTokenCount": resp.input_tokens.unwrap_or(0),
            "candidatesTokenCount": resp.output_tokens.unwrap_or(0),
            "totalTokenCount": resp.input_tokens.unwrap_or(0) + resp.output_tokens.unwrap_or(0),
        }
    })
}

pub fn chunk_to_canonical(raw: &Value) -> CanonicalChunk {
    let text = extract_text(raw);
    let finish_reason = raw.pointer("/candidates/0/finishReason").and_then(Value::as_str).map(String::from);
    CanonicalChunk { delta_text: text, done: finish_reason.is_some(), finish_reason }
}

pub fn chunk_to_sse_frame(chunk: &CanonicalChunk, _model: &str) -> String {
    let payload = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": chunk.delta_text}]},
            "finishReason": chunk.finish_reason,
        }]
    });
    format!("{}\n", payload)
}

/// Tolerant parser for Gemini's streaming bodies, which may arrive as an
/// unframed concatenation of JSON objects or as a single JSON array. Strips
/// leading whitespace/commas/`[`/`(` and repeatedly decodes one object at a
/// time, returning the parsed objects and the number of bytes consumed.
pub fn drain_buffer(buffer: &str) -> (Vec<Value>, usize) {
    let mut objects = Vec::new();
    let mut consumed = 0usize;
    let bytes = buffer.as_bytes();
    let mut i = 0usize;

    loop {
        while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\n' | b'\r' | b',' | b'[' | b'(') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if bytes[i] != b'{' {
            break;
        }
        match find_object_end(&buffer[i..]) {
            Some(end) => {
                let slice = &buffer[i..i + end];
                match serde_json::from_str::<Value>(slice) {
                    Ok(v) => {
                        objects.push(v);
                        i += end;
                        consumed = i;
                    }
                    Err(_) => break,
                }
            }
            None => break,
        }
    }
    (objects, consumed)
}

/// Brace-counting scan for the end of the first top-level `{...}` object in
/// `s`, tracking string literals and escapes so braces inside strings don't
/// confuse the count.
fn find_object_end(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_assistant_role_to_model() {
        assert_eq!(role_to_gemini(Role::Assistant), "model");
        assert_eq!(role_to_gemini(Role::User), "user");
    }

    #[test]
    fn collapses_system_messages_into_system_instruction() {
        let req = CanonicalRequest {
            model: "gemini-1.5-pro".into(),
            messages: vec![
                CanonicalMessage { role: Role::System, content: "be terse".to_string().into(), name: None },
                CanonicalMessage { role: Role::User, content: "hi".to_string().into(), name: None },
            ],
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
        };
        let body = canonical_to_request(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn drains_concatenated_json_objects_from_a_buffer() {
        let buf = r#"{"a":1},{"b":2}"#;
        let (objs, consumed) = drain_buffer(buf);
        assert_eq!(objs.len(), 2);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn tolerates_leading_array_bracket_and_partial_trailing_object() {
        let buf = r#"[{"a":1},{"b": "incomp"#;
        let (objs, consumed) = drain_buffer(buf);
        assert_eq!(objs.len(), 1);
        assert!(consumed < buf.len());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let buf = r#"{"text":"a { b } c"}"#;
        let (objs, consumed) = drain_buffer(buf);
        assert_eq!(objs.len(), 1);
        assert_eq!(consumed, buf.len());
    }
}
