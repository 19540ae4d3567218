use super::{CanonicalChunk, CanonicalMessage, CanonicalRequest, CanonicalResponse, Content, ContentPart, Role};
use crate::error::Result;
use serde_json::{json, Value};

fn role_to_claude(role: Role) -> &'static str {
    match role {
        Role::Assistant => "assistant",
        _ => "user",
    }
}

fn content_blocks_to_content(blocks: &Value) -> Content {
    match blocks {
        Value::String(s) => Content::Text(s.clone()),
        Value::Array(items) => Content::Parts(
            items
                .iter()
                .filter_map(|b| match b.get("type").and_then(Value::as_str) {
                    Some("text") => b.get("text").and_then(Value::as_str).map(|t| ContentPart::Text(t.to_string())),
                    Some("image") => {
                        b.pointer("/source/data").and_then(Value::as_str).map(|d| ContentPart::ImageUrl(d.to_string()))
                    }
                    _ => None,
                })
                .collect(),
        ),
        _ => Content::Text(String::new()),
    }
}

fn content_to_blocks(content: &Content) -> Value {
    match content {
        Content::Text(t) => json!([{"type": "text", "text": t}]),
        Content::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text(t) => json!({"type": "text", "text": t}),
                    ContentPart::ImageUrl(u) => {
                        json!({"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": u}})
                    }
                })
                .collect(),
        ),
    }
}

pub fn request_to_canonical(body: &Value) -> Result<CanonicalRequest> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or("claude-3-5-sonnet-20240620").to_string();
    let mut messages = Vec::new();
    if let Some(sys) = body.get("system").and_then(Value::as_str) {
        messages.push(CanonicalMessage { role: Role::System, content: Content::Text(sys.to_string()), name: None });
    }
    if let Some(msgs) = body.get("messages").and_then(Value::as_array) {
        for m in msgs {
            let role = match m.get("role").and_then(Value::as_str) {
                Some("assistant") => Role::Assistant,
                _ => Role::User,
            };
            let content = content_blocks_to_content(m.get("content").unwrap_or(&Value::Null));
            messages.push(CanonicalMessage { role, content, name: None });
        }
    }
    Ok(CanonicalRequest {
        model,
        messages,
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        temperature: body.get("temperature").and_then(Value::as_f64),
        top_p: body.get("top_p").and_then(Value::as_f64),
        max_tokens: body.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32),
    })
}

/// Concatenates consecutive system messages into the top-level `system`
/// string and joins consecutive same-role turns with newlines, since Claude
/// requires the remaining messages to strictly alternate user/assistant.
pub fn canonical_to_request(req: &CanonicalRequest) -> Value {
    let system: Vec<String> = req.messages.iter().filter(|m| m.role == Role::System).map(|m| m.content.as_text()).collect();

    let mut merged: Vec<CanonicalMessage> = Vec::new();
    for m in req.messages.iter().filter(|m| m.role != Role::System) {
        if let Some(last) = merged.last_mut() {
            if last.role == m.role {
                let joined = format!("{}\n{}", last.content.as_text(), m.content.as_text());
                last.content = Content::Text(joined);
                continue;
            }
        }
        merged.push(m.clone());
    }

    let messages: Vec<Value> = merged
        .iter()
        .map(|m| json!({"role": role_to_claude(m.role), "content": content_to_blocks(&m.content)}))
        .collect();

    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "stream": req.stream,
        "max_tokens": req.max_tokens.unwrap_or(4096),
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n"));
    }
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(t) = req.top_p {
        body["top_p"] = json!(t);
    }
    body
}

fn extract_text(body: &Value) -> String {
    body.get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

pub fn response_to_canonical(body: &Value) -> Result<CanonicalResponse> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let text = extract_text(body);
    let finish_reason = body.get("stop_reason").and_then(Value::as_str).map(String::from);
    let input_tokens = body.pointer("/usage/input_tokens").and_then(Value::as_i64);
    let output_tokens = body.pointer("/usage/output_tokens").and_then(Value::as_i64);
    Ok(CanonicalResponse { model, text, finish_reason, input_tokens, output_tokens })
}

pub fn canonical_to_response(resp: &CanonicalResponse) -> Value {
    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4()),
        "type": "message",
        "role": "assistant",
        "model": resp.model,
        "content": [{"type": "text", "text": resp.text}],
        "stop_reason": resp.finish_reason.clone().unwrap_or_else(|| "end_turn".to_string()),
        "usage": {
            "input_tokens": resp.input_tokens.unwrap_or(0),
            "output_tokens": resp.output_tokens.unwrap_or(0),
        }
    })
}

/// Claude frames streaming deltas as named SSE events rather than one
/// uniform shape; callers match on `raw["type"]` to route here.
pub fn chunk_to_canonical(raw: &Value) -> CanonicalChunk {
    match raw.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => {
            let text = raw.pointer("/delta/text").and_then(Value::as_str).unwrap_or_default().to_string();
            CanonicalChunk { delta_text: text, finish_reason: None, done: false }
        }
        Some("message_delta") => {
            let reason = raw.pointer("/delta/stop_reason").and_then(Value::as_str).map(String::from);
            CanonicalChunk { delta_text: String::new(), done: reason.is_some(), finish_reason: reason }
        }
        Some("message_stop") => CanonicalChunk { delta_text: String::new(), done: true, finish_reason: None },
        _ => CanonicalChunk::default(),
    }
}

pub fn chunk_to_sse_frame(chunk: &CanonicalChunk, _model: &str) -> String {
    if chunk.done {
        return "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_string();
    }
    let payload = json!({
        "type": "content_block_delta",
        "delta": {"type": "text_delta", "text": chunk.delta_text},
    });
    format!("event: content_block_delta\ndata: {}\n\n", payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_top_level_system_string() {
        let body = json!({"system": "be terse", "messages": [{"role": "user", "content": "hi"}]});
        let canonical = request_to_canonical(&body).unwrap();
        assert_eq!(canonical.messages[0].role, Role::System);
        assert_eq!(canonical.messages[0].content.as_text(), "be terse");
    }

    #[test]
    fn merges_consecutive_same_role_turns_with_newline() {
        let req = CanonicalRequest {
            model: "claude-3-5-sonnet-20240620".into(),
            messages: vec![
                CanonicalMessage { role: Role::User, content: "first".to_string().into(), name: None },
                CanonicalMessage { role: Role::User, content: "second".to_string().into(), name: None },
            ],
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
        };
        let body = canonical_to_request(&req);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"][0]["text"], "first\nsecond");
    }

    #[test]
    fn content_block_delta_carries_text() {
        let raw = json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "hi"}});
        let chunk = chunk_to_canonical(&raw);
        assert_eq!(chunk.delta_text, "hi");
        assert!(!chunk.done);
    }

    #[test]
    fn message_stop_marks_chunk_done() {
        let raw = json!({"type": "message_stop"});
        let chunk = chunk_to_canonical(&raw);
        assert!(chunk.done);
    }
}
