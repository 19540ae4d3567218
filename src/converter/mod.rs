//! Bidirectional translation between the three supported wire formats and a
//! single canonical intermediate shape, the OpenAI chat-completion body.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFormat {
    OpenAi,
    Gemini,
    Claude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    ImageUrl(String),
}

#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text(t) => Some(t.clone()),
                    ContentPart::ImageUrl(_) => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn map_text(&mut self, mut f: impl FnMut(&str) -> String) {
        match self {
            Content::Text(t) => *t = f(t),
            Content::Parts(parts) => {
                for p in parts.iter_mut() {
                    if let ContentPart::Text(t) = p {
                        *t = f(t);
                    }
                }
            }
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

#[derive(Debug, Clone)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: Content,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct CanonicalResponse {
    pub model: String,
    pub text: String,
    pub finish_reason: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct CanonicalChunk {
    pub delta_text: String,
    pub finish_reason: Option<String>,
    pub done: bool,
}

/// Detects the ingress wire format of an inbound request from its path and
/// headers, falling back to OpenAI when nothing else matches.
pub fn detect_client_format(path: &str, headers: &axum::http::HeaderMap) -> ClientFormat {
    if path.starts_with("/v1beta/") || path.starts_with("/gemini/") {
        return ClientFormat::Gemini;
    }
    if path.ends_with("/messages") || path.starts_with("/claude/") {
        return ClientFormat::Claude;
    }
    if path == "/v1/chat/completions" || path.starts_with("/openai/") {
        return ClientFormat::OpenAi;
    }
    if headers.contains_key("x-goog-api-key") {
        return ClientFormat::Gemini;
    }
    if headers.contains_key("x-api-key") || headers.contains_key("anthropic-version") {
        return ClientFormat::Claude;
    }
    if headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Bearer"))
        .unwrap_or(false)
    {
        return ClientFormat::OpenAi;
    }
    ClientFormat::OpenAi
}

/// Identifies which upstream provider a resolved credential belongs to.
pub fn identify_target_provider(upstream_key: &str) -> ClientFormat {
    if upstream_key.starts_with("sk-ant-") {
        ClientFormat::Claude
    } else if upstream_key.starts_with("AIza") {
        ClientFormat::Gemini
    } else if upstream_key.starts_with("sk-") {
        ClientFormat::OpenAi
    } else {
        ClientFormat::OpenAi
    }
}

/// Maps a requested model name onto the target provider's namespace,
/// following the fixed fallback table; unmapped names pass through.
pub fn map_model(requested: &str, target: ClientFormat) -> String {
    match target {
        ClientFormat::Gemini => {
            if requested.contains("gemini") {
                requested.to_string()
            } else if requested.starts_with("gpt-3.5") {
                "gemini-1.5-flash".to_string()
            } else if requested.starts_with("gpt-4") {
                "gemini-1.5-pro".to_string()
            } else {
                "gemini-1.5-pro".to_string()
            }
        }
        ClientFormat::Claude => {
            if requested.starts_with("claude-") {
                requested.to_string()
            } else {
                "claude-3-5-sonnet-20240620".to_string()
            }
        }
        ClientFormat::OpenAi => requested.to_string(),
    }
}

/// Parses an arbitrary inbound body (already known to be in `client_format`)
/// into the canonical request shape.
pub fn to_canonical(body: &Value, client_format: ClientFormat) -> crate::error::Result<CanonicalRequest> {
    match client_format {
        ClientFormat::OpenAi => openai::request_to_canonical(body),
        ClientFormat::Gemini => gemini::request_to_canonical(body),
        ClientFormat::Claude => anthropic::request_to_canonical(body),
    }
}

/// Emits a canonical request as the target provider's wire body.
pub fn from_canonical(req: &CanonicalRequest, target: ClientFormat) -> Value {
    match target {
        ClientFormat::OpenAi => openai::canonical_to_request(req),
        ClientFormat::Gemini => gemini::canonical_to_request(req),
        ClientFormat::Claude => anthropic::canonical_to_request(req),
    }
}

pub fn response_from_upstream(body: &Value, upstream: ClientFormat) -> crate::error::Result<CanonicalResponse> {
    match upstream {
        ClientFormat::OpenAi => openai::response_to_canonical(body),
        ClientFormat::Gemini => gemini::response_to_canonical(body),
        ClientFormat::Claude => anthropic::response_to_canonical(body),
    }
}

pub fn response_to_client(resp: &CanonicalResponse, client_format: ClientFormat) -> Value {
    match client_format {
        ClientFormat::OpenAi => openai::canonical_to_response(resp),
        ClientFormat::Gemini => gemini::canonical_to_response(resp),
        ClientFormat::Claude => anthropic::canonical_to_response(resp),
    }
}

pub fn chunk_from_upstream(raw: &Value, upstream: ClientFormat) -> CanonicalChunk {
    match upstream {
        ClientFormat::OpenAi => openai::chunk_to_canonical(raw),
        ClientFormat::Gemini => gemini::chunk_to_canonical(raw),
        ClientFormat::Claude => anthropic::chunk_to_canonical(raw),
    }
}

/// Renders one canonical streaming chunk as a ready-to-write SSE frame
/// (including the `data: `/`event: ` framing and trailing blank line).
pub fn chunk_to_client_frame(chunk: &CanonicalChunk, model: &str, client_format: ClientFormat) -> String {
    match client_format {
        ClientFormat::OpenAi => openai::chunk_to_sse_frame(chunk, model),
        ClientFormat::Gemini => gemini::chunk_to_sse_frame(chunk, model),
        ClientFormat::Claude => anthropic::chunk_to_sse_frame(chunk, model),
    }
}

pub fn stream_done_frame(client_format: ClientFormat) -> Option<String> {
    match client_format {
        ClientFormat::OpenAi => Some("data: [DONE]\n\n".to_string()),
        ClientFormat::Claude => Some("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_string()),
        ClientFormat::Gemini => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_gemini_by_path() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(detect_client_format("/v1beta/models/gemini-1.5-pro:generateContent", &headers), ClientFormat::Gemini);
    }

    #[test]
    fn detects_claude_by_messages_suffix() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(detect_client_format("/v1/messages", &headers), ClientFormat::Claude);
    }

    #[test]
    fn defaults_to_openai() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(detect_client_format("/something-else", &headers), ClientFormat::OpenAi);
    }

    #[test]
    fn identifies_provider_from_key_prefix() {
        assert_eq!(identify_target_provider("sk-ant-abc"), ClientFormat::Claude);
        assert_eq!(identify_target_provider("AIzaxyz"), ClientFormat::Gemini);
        assert_eq!(identify_target_provider("sk-abc"), ClientFormat::OpenAi);
        assert_eq!(identify_target_provider("weird-key"), ClientFormat::OpenAi);
    }

    #[test]
    fn maps_gpt_models_to_gemini_family() {
        assert_eq!(map_model("gpt-3.5-turbo", ClientFormat::Gemini), "gemini-1.5-flash");
        assert_eq!(map_model("gpt-4-turbo", ClientFormat::Gemini), "gemini-1.5-pro");
        assert_eq!(map_model("gemini-1.5-flash", ClientFormat::Gemini), "gemini-1.5-flash");
    }

    #[test]
    fn claude_defaults_when_model_not_claude_named() {
        assert_eq!(map_model("gpt-4", ClientFormat::Claude), "claude-3-5-sonnet-20240620");
        assert_eq!(map_model("claude-3-opus-20240229", ClientFormat::Claude), "claude-3-opus-20240229");
    }
}
