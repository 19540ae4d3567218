use super::{CanonicalChunk, CanonicalMessage, CanonicalRequest, CanonicalResponse, Content, ContentPart, Role};
use crate::error::Result;
use serde_json::{json, Value};

fn role_to_str(role: Role) -> &'static str {
    role.as_str()
}

fn str_to_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        _ => Role::User,
    }
}

fn content_to_value(content: &Content) -> Value {
    match content {
        Content::Text(t) => Value::String(t.clone()),
        Content::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text(t) => json!({"type": "text", "text": t}),
                    ContentPart::ImageUrl(u) => json!({"type": "image_url", "image_url": {"url": u}}),
                })
                .collect(),
        ),
    }
}

fn value_to_content(v: &Value) -> Content {
    match v {
        Value::String(s) => Content::Text(s.clone()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .filter_map(|item| match item.get("type").and_then(Value::as_str) {
                    Some("text") => item.get("text").and_then(Value::as_str).map(|t| ContentPart::Text(t.to_string())),
                    Some("image_url") => item
                        .pointer("/image_url/url")
                        .and_then(Value::as_str)
                        .map(|u| ContentPart::ImageUrl(u.to_string())),
                    _ => None,
                })
                .collect();
            Content::Parts(parts)
        }
        _ => Content::Text(String::new()),
    }
}

pub fn request_to_canonical(body: &Value) -> Result<CanonicalRequest> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or("gpt-3.5-turbo").to_string();
    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|m| CanonicalMessage {
                    role: str_to_role(m.get("role").and_then(Value::as_str).unwrap_or("user")),
                    content: value_to_content(m.get("content").unwrap_or(&Value::Null)),
                    name: m.get("name").and_then(Value::as_str).map(String::from),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(CanonicalRequest {
        model,
        messages,
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        temperature: body.get("temperature").and_then(Value::as_f64),
        top_p: body.get("top_p").and_then(Value::as_f64),
        max_tokens: body.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32),
    })
}

pub fn canonical_to_request(req: &CanonicalRequest) -> Value {
    let messages: Vec<Value> = req
        .messages
        .iter()
        .map(|m| {
            let mut obj = json!({
                "role": role_to_str(m.role),
                "content": content_to_value(&m.content),
            });
            if let Some(name) = &m.name {
                obj["name"] = Value::String(name.clone());
            }
            obj
        })
        .collect();
    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "stream": req.stream,
    });
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(t) = req.top_p {
        body["top_p"] = json!(t);
    }
    if let Some(t) = req.max_tokens {
        body["max_tokens"] = json!(t);
    }
    body
}

pub fn response_to_canonical(body: &Value) -> Result<CanonicalResponse> {
    let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
    let choice = body.pointer("/choices/0");
    let text = choice
        .and_then(|c| c.pointer("/message/content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let finish_reason = choice.and_then(|c| c.get("finish_reason")).and_then(Value::as_str).map(String::from);
    let input_tokens = body.pointer("/usage/prompt_tokens").and_then(Value::as_i64);
    let output_tokens = body.pointer("/usage/completion_tokens").and_then(Value::as_i64);
    Ok(CanonicalResponse { model, text, finish_reason, input_tokens, output_tokens })
}

pub fn canonical_to_response(resp: &CanonicalResponse) -> Value {
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "model": resp.model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": resp.text},
            "finish_reason": resp.finish_reason.clone().unwrap_or_else(|| "stop".to_string()),
        }],
        "usage": {
            "prompt_tokens": resp.input_tokens.unwrap_or(0),
            "completion_tokens": resp.output_tokens.unwrap_or(0),
            "total_tokens": resp.input_tokens.unwrap_or(0) + resp.output_tokens.unwrap_or(0),
        }
    })
}

pub fn chunk_to_canonical(raw: &Value) -> CanonicalChunk {
    let delta = raw.pointer("/choices/0/delta/content").and_then(Value::as_str).unwrap_or_default().to_string();
    let finish_reason = raw.pointer("/choices/0/finish_reason").and_then(Value::as_str).map(String::from);
    CanonicalChunk { delta_text: delta, done: finish_reason.is_some(), finish_reason }
}

pub fn chunk_to_sse_frame(chunk: &CanonicalChunk, model: &str) -> String {
    let payload = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{
            "index": 0,
            "delta": {"content": chunk.delta_text},
            "finish_reason": chunk.finish_reason,
        }]
    });
    format!("data: {}\n\n", payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_simple_text_message() {
        let body = json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]});
        let canonical = request_to_canonical(&body).unwrap();
        assert_eq!(canonical.messages.len(), 1);
        assert_eq!(canonical.messages[0].content.as_text(), "hi");
        let back = canonical_to_request(&canonical);
        assert_eq!(back["messages"][0]["content"], "hi");
    }

    #[test]
    fn chunk_delta_extracts_content() {
        let raw = json!({"choices": [{"delta": {"content": "wor"}, "finish_reason": null}]});
        let chunk = chunk_to_canonical(&raw);
        assert_eq!(chunk.delta_text, "wor");
        assert!(!chunk.done);
    }
}
