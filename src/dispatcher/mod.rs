//! The dispatch entry point: detects the caller's wire format, resolves a
//! credential, selects (or passes through) an upstream key, runs the
//! translate/forward/translate-back pipeline, and tees accounting data to
//! `Log` and `OfficialKey` throughout.
//!
//! Exactly one upstream attempt is made per request; nothing here retries
//! across keys, endpoints, or routes.

pub mod auth;
pub mod client;
pub mod error;

use crate::accounting::FinalizeGuard;
use crate::converter::{self, ClientFormat};
use crate::db;
use crate::error::{GatewayError, Result};
use crate::regex_engine::{self, Rule};
use crate::{preset_engine, variable_engine};
use auth::Credential;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use error::DispatchError;
use futures_util::StreamExt;
use serde_json::Value;

struct ResolvedKey {
    upstream_key: String,
    official_key_id: Option<i64>,
    channel_api_url: Option<String>,
    exclusive: Option<db::ExclusiveKeyRecord>,
}

async fn resolve_key(credential: Credential) -> std::result::Result<ResolvedKey, DispatchError> {
    match credential {
        Credential::Passthrough(key) => Ok(ResolvedKey { upstream_key: key, official_key_id: None, channel_api_url: None, exclusive: None }),
        Credential::Exclusive(key) => {
            let conn = db::open_conn();
            let record = db::find_exclusive_key(&conn, &key).ok_or(DispatchError::InvalidExclusiveKey)?;
            if !record.is_active {
                return Err(DispatchError::InvalidExclusiveKey);
            }
            let channel_id = record.channel_id.ok_or(DispatchError::ChannelNotFound)?;
            let channel = db::find_channel(&conn, channel_id).ok_or(DispatchError::ChannelNotFound)?;
            drop(conn);

            let official_key = crate::keypool::next_key(channel_id).await?;
            Ok(ResolvedKey {
                upstream_key: official_key.key,
                official_key_id: Some(official_key.id),
                channel_api_url: Some(channel.api_url),
                exclusive: Some(record),
            })
        }
    }
}

fn base_url_for(target: ClientFormat, override_url: Option<&str>) -> &str {
    if let Some(url) = override_url {
        return url;
    }
    match target {
        ClientFormat::OpenAi => "https://api.openai.com",
        ClientFormat::Gemini => "https://generativelanguage.googleapis.com",
        ClientFormat::Claude => "https://api.anthropic.com",
    }
}

fn upstream_path(target: ClientFormat, model: &str, stream: bool) -> String {
    match target {
        ClientFormat::OpenAi => "/v1/chat/completions".to_string(),
        ClientFormat::Claude => "/v1/messages".to_string(),
        ClientFormat::Gemini => {
            let action = if stream { "streamGenerateContent" } else { "generateContent" };
            format!("/v1beta/models/{model}:{action}")
        }
    }
}

fn inject_auth(builder: reqwest::RequestBuilder, target: ClientFormat, key: &str) -> reqwest::RequestBuilder {
    match target {
        ClientFormat::OpenAi => builder.bearer_auth(key),
        ClientFormat::Claude => builder.header("x-api-key", key).header("anthropic-version", "2023-06-01"),
        ClientFormat::Gemini => builder.header("x-goog-api-key", key),
    }
}

fn collected_rules(exclusive: Option<&db::ExclusiveKeyRecord>, rule_type: &str, pre: bool) -> Vec<Rule> {
    let Some(record) = exclusive else { return Vec::new() };
    let conn = db::open_conn();
    let user_rules: Vec<Rule> = if record.enable_regex {
        db::user_regex_rules(&conn, record.user_id, rule_type).iter().map(Rule::from).collect()
    } else {
        Vec::new()
    };
    let preset_rules: Vec<Rule> = match record.preset_id {
        Some(preset_id) => db::preset_regex_rules(&conn, preset_id, rule_type).iter().map(Rule::from).collect(),
        None => Vec::new(),
    };
    if pre {
        regex_engine::pre_rules(user_rules, preset_rules)
    } else {
        regex_engine::post_rules(user_rules, preset_rules)
    }
}

pub struct DispatchRequest {
    pub path: String,
    pub headers: HeaderMap,
    pub query: String,
    pub body: Value,
}

pub async fn dispatch(req: DispatchRequest) -> Result<Response> {
    let client_format = converter::detect_client_format(&req.path, &req.headers);
    let credential = auth::extract_credential(&req.headers, &req.query).ok_or(DispatchError::InvalidExclusiveKey)?;
    let resolved = resolve_key(credential).await?;
    let target = converter::identify_target_provider(&resolved.upstream_key);

    if client_format == target {
        return dispatch_passthrough(req, resolved, target).await;
    }

    dispatch_with_conversion(req, resolved, target, client_format).await
}

/// §4.6 step 4: when the caller is already speaking the target provider's own
/// wire format, the canonical round trip would silently drop whatever fields
/// the canonical shape doesn't model (Gemini `safetySettings`, multiple
/// candidates, `citationMetadata`, ...). Forward the body as received, fixing
/// up only the hop-by-hop headers and the upstream credential.
async fn dispatch_passthrough(req: DispatchRequest, resolved: ResolvedKey, target: ClientFormat) -> Result<Response> {
    let is_stream = client::normalize_stream_flag(&req.body);
    let model = req.body.get("model").and_then(Value::as_str).unwrap_or("unknown").to_string();
    let input_tokens = crate::accounting::count_raw_tokens(&req.body, &model);

    let log_id = crate::accounting::start_log(
        resolved.exclusive.as_ref().map(|e| e.id),
        resolved.exclusive.as_ref().map(|e| e.user_id),
        &model,
        is_stream,
        input_tokens,
    );
    let mut guard = FinalizeGuard::start(log_id, input_tokens);
    if let Some(key_id) = resolved.official_key_id {
        guard.bind_official_key(key_id);
    }

    let url = format!(
        "{}{}",
        base_url_for(target, resolved.channel_api_url.as_deref()),
        upstream_path(target, &model, is_stream)
    );

    let mut builder = client::shared_client().post(&url).json(&req.body);
    builder = inject_auth(builder, target, &resolved.upstream_key);
    for (name, value) in req.headers.iter() {
        if client::HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            builder = builder.header(name.as_str(), value_str);
        }
    }

    let upstream_response = match builder.send().await {
        Ok(resp) => resp,
        Err(e) => {
            guard.finish(599, 0);
            return Err(GatewayError::Dispatch(DispatchError::Network(e)));
        }
    };

    let status = upstream_response.status();
    guard.mark_first_chunk();

    if is_stream {
        return Ok(stream_passthrough(upstream_response, status, guard));
    }

    let body_bytes = upstream_response.bytes().await.map_err(DispatchError::Network)?;
    let output_tokens = client::parse_json_response(&body_bytes)
        .ok()
        .map(|v| crate::accounting::count_raw_tokens(&v, &model))
        .unwrap_or(0);
    guard.finish(status.as_u16(), output_tokens);

    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body_bytes))
        .unwrap())
}

/// Copies upstream bytes to the client unmodified; no per-chunk parsing, so
/// output tokens aren't counted on this path (the Log row still records 0).
fn stream_passthrough(upstream: reqwest::Response, status: StatusCode, guard: FinalizeGuard) -> Response {
    let body_stream = async_stream::stream! {
        let mut byte_stream = upstream.bytes_stream();
        let mut final_status = status.as_u16();
        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => yield Ok::<_, std::io::Error>(bytes),
                Err(_) => { final_status = 599; break; }
            }
        }
        guard.finish(final_status, 0);
    };

    Response::builder()
        .status(status)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap()
}

async fn dispatch_with_conversion(
    req: DispatchRequest,
    resolved: ResolvedKey,
    target: ClientFormat,
    client_format: ClientFormat,
) -> Result<Response> {
    let mut canonical = converter::to_canonical(&req.body, client_format)?;
    canonical.model = converter::map_model(&canonical.model, target);

    if let Some(preset_id) = resolved.exclusive.as_ref().and_then(|e| e.preset_id) {
        let conn = db::open_conn();
        let items = db::preset_items(&conn, preset_id);
        if let Some(rewritten) = preset_engine::apply(&items, &canonical.messages) {
            canonical.messages = rewritten;
        }
    }

    let pre_rules = collected_rules(resolved.exclusive.as_ref(), "pre", true);
    for msg in canonical.messages.iter_mut() {
        let rules = pre_rules.clone();
        msg.content.map_text(|t| regex_engine::apply(t, &rules));
    }

    let mut var_engine = variable_engine::VariableEngine::new();
    for msg in canonical.messages.iter_mut() {
        msg.content.map_text(|t| var_engine.expand(t));
    }

    let input_tokens = crate::accounting::count_request_tokens(&canonical.messages, &canonical.model);
    let log_id = crate::accounting::start_log(
        resolved.exclusive.as_ref().map(|e| e.id),
        resolved.exclusive.as_ref().map(|e| e.user_id),
        &canonical.model,
        canonical.stream,
        input_tokens,
    );
    let mut guard = FinalizeGuard::start(log_id, input_tokens);
    if let Some(key_id) = resolved.official_key_id {
        guard.bind_official_key(key_id);
    }

    let outgoing_body = converter::from_canonical(&canonical, target);
    let url = format!(
        "{}{}",
        base_url_for(target, resolved.channel_api_url.as_deref()),
        upstream_path(target, &canonical.model, canonical.stream)
    );

    let builder = client::shared_client().post(&url).json(&outgoing_body);
    let builder = inject_auth(builder, target, &resolved.upstream_key);

    let upstream_response = match builder.send().await {
        Ok(resp) => resp,
        Err(e) => {
            guard.finish(599, 0);
            return Err(GatewayError::Dispatch(DispatchError::Network(e)));
        }
    };

    let status = upstream_response.status();
    let post_rules = collected_rules(resolved.exclusive.as_ref(), "post", false);

    if !status.is_success() {
        let body_bytes = upstream_response.bytes().await.unwrap_or_default();
        let body_json: Value = serde_json::from_slice(&body_bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()));
        guard.finish(status.as_u16(), 0);
        let mapped = crate::error_mapper::convert_upstream_error(&body_json, status, client_format_name(client_format));
        return Ok((status, axum::Json(mapped)).into_response());
    }

    if canonical.stream {
        return Ok(stream_response(upstream_response, target, client_format, canonical.model, post_rules, guard));
    }

    let body_bytes = upstream_response.bytes().await.map_err(DispatchError::Network)?;
    let upstream_json: Value = serde_json::from_slice(&body_bytes).map_err(|e| GatewayError::Dispatch(DispatchError::Conversion(e.to_string())))?;
    let mut canonical_response = converter::response_from_upstream(&upstream_json, target)?;
    canonical_response.text = regex_engine::apply(&canonical_response.text, &post_rules);
    let output_tokens = canonical_response.output_tokens.unwrap_or_else(|| crate::tokenizer::count_tokens(&canonical_response.text, &canonical.model));
    guard.finish(status.as_u16(), output_tokens);

    let client_body = converter::response_to_client(&canonical_response, client_format);
    Ok((StatusCode::OK, axum::Json(client_body)).into_response())
}

fn client_format_name(f: ClientFormat) -> &'static str {
    match f {
        ClientFormat::OpenAi => "openai",
        ClientFormat::Gemini => "gemini",
        ClientFormat::Claude => "claude",
    }
}

/// Pumps an upstream streaming response chunk-by-chunk: each provider frame
/// becomes a canonical delta, post-regex runs on the delta text, and the
/// delta is re-encoded into the client's own SSE framing. The finalize guard
/// fires on end-of-stream, on a parse failure, or (via `Drop`) on client
/// disconnect.
fn stream_response(
    upstream: reqwest::Response,
    target: ClientFormat,
    client_format: ClientFormat,
    model: String,
    post_rules: Vec<Rule>,
    mut guard: FinalizeGuard,
) -> Response {
    let body_stream = async_stream::stream! {
        let mut byte_stream = upstream.bytes_stream();
        let mut buffer = String::new();
        let mut output_tokens_total = 0i64;
        let mut final_status = 200u16;

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(_) => { final_status = 599; break; }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            let raw_objects = match target {
                ClientFormat::Gemini => {
                    let (objs, consumed) = crate::converter::gemini::drain_buffer(&buffer);
                    buffer = buffer[consumed..].to_string();
                    objs
                }
                _ => {
                    let events = client::drain_sse_lines(&mut buffer);
                    events
                        .iter()
                        .filter_map(|event| {
                            event
                                .lines()
                                .find_map(client::parse_sse_data)
                                .and_then(|data| {
                                    if client::is_sse_done(data) { None } else { serde_json::from_str::<Value>(data).ok() }
                                })
                        })
                        .collect()
                }
            };

            for raw in raw_objects {
                guard.mark_first_chunk();
                let mut chunk = crate::converter::chunk_from_upstream(&raw, target);
                chunk.delta_text = regex_engine::apply(&chunk.delta_text, &post_rules);
                output_tokens_total += crate::tokenizer::count_tokens(&chunk.delta_text, &model);
                yield Ok::<_, std::io::Error>(axum::body::Bytes::from(converter::chunk_to_client_frame(&chunk, &model, client_format)));
            }
        }

        if let Some(done) = converter::stream_done_frame(client_format) {
            yield Ok(axum::body::Bytes::from(done));
        }
        guard.finish(final_status, output_tokens_total);
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap()
}
