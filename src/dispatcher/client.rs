//! Outbound HTTP client and SSE framing utilities, ported from the upstream
//! forwarder's client module with its retry machinery removed: this
//! dispatcher makes exactly one upstream attempt per request.

use once_cell::sync::OnceCell;
use reqwest::Client;
use std::time::Duration;

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Builds (once) the shared client used for all upstream calls, honoring the
/// configured outbound proxy and connect/request timeouts.
pub fn shared_client() -> &'static Client {
    CLIENT.get_or_init(|| {
        let cfg = crate::config::load();
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(cfg.request_timeout_connect_secs))
            .timeout(Duration::from_secs(cfg.stream_timeout_secs));

        if let Some(proxy_cfg) = cfg.proxy.filter(|p| p.enabled) {
            if let Some(url) = proxy_cfg.url {
                if let Ok(proxy) = reqwest::Proxy::all(&url) {
                    builder = builder.proxy(proxy);
                }
            }
        }

        builder.build().expect("failed to build upstream http client")
    })
}

pub const HOP_BY_HOP_HEADERS: &[&str] =
    &["host", "content-length", "connection", "accept-encoding", "transfer-encoding", "authorization", "x-api-key", "x-goog-api-key"];

/// True once an SSE `data:` line signals the OpenAI-style terminal marker.
pub fn is_sse_done(data: &str) -> bool {
    data.trim() == "[DONE]"
}

/// Extracts the JSON payload from an SSE `data: ...` line, if any.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
}

pub fn normalize_stream_flag(body: &serde_json::Value) -> bool {
    body.get("stream").and_then(serde_json::Value::as_bool).unwrap_or(false)
}

/// Splits a growing byte buffer into complete `\n\n`-terminated SSE events,
/// returning the parsed events and leaving any trailing partial event in
/// `buffer` for the next read.
pub fn drain_sse_lines(buffer: &mut String) -> Vec<String> {
    let mut events = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let event = buffer[..pos].to_string();
        *buffer = buffer[pos + 2..].to_string();
        if !event.trim().is_empty() {
            events.push(event);
        }
    }
    events
}

pub fn parse_json_response(body: &[u8]) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_done_marker() {
        assert!(is_sse_done("[DONE]"));
        assert!(!is_sse_done("{\"id\":1}"));
    }

    #[test]
    fn extracts_payload_from_data_line() {
        assert_eq!(parse_sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data("not-data"), None);
    }

    #[test]
    fn drains_complete_events_and_keeps_partial_tail() {
        let mut buf = String::from("event: a\ndata: 1\n\nevent: b\ndata: 2\n\npartial");
        let events = drain_sse_lines(&mut buf);
        assert_eq!(events.len(), 2);
        assert_eq!(buf, "partial");
    }
}
