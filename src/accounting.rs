//! Owns the Log row lifecycle and the exactly-once finalize guarantee.
//!
//! A `FinalizeGuard` is created alongside the Log row, before dispatch
//! begins, and is consumed on every exit path (success, upstream error,
//! client disconnect). Its `Drop` impl covers the paths that don't call
//! `finish` explicitly, so a dropped stream still finalizes with whatever
//! partial data it accumulated.

use crate::converter::CanonicalMessage;
use crate::db;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub struct FinalizeGuard {
    log_id: i64,
    input_tokens: i64,
    started_at: Instant,
    first_chunk_at: Option<Instant>,
    official_key_id: Option<i64>,
    finalized: AtomicBool,
}

impl FinalizeGuard {
    pub fn start(log_id: i64, input_tokens: i64) -> Self {
        Self {
            log_id,
            input_tokens,
            started_at: Instant::now(),
            first_chunk_at: None,
            official_key_id: None,
            finalized: AtomicBool::new(false),
        }
    }

    pub fn bind_official_key(&mut self, key_id: i64) {
        self.official_key_id = Some(key_id);
    }

    pub fn mark_first_chunk(&mut self) {
        if self.first_chunk_at.is_none() {
            self.first_chunk_at = Some(Instant::now());
        }
    }

    fn ttft_secs(&self) -> f64 {
        self.first_chunk_at.map(|t| (t - self.started_at).as_secs_f64()).unwrap_or(0.0)
    }

    /// Finalizes the log row. Safe to call at most meaningfully once; a
    /// second call (including the one from `Drop`) is a no-op.
    pub fn finish(&self, status_code: u16, output_tokens: i64) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let latency = self.started_at.elapsed().as_secs_f64();
        let conn = db::open_conn();
        db::finalize_log(&conn, self.log_id, self.official_key_id, status_code, latency, self.ttft_secs(), output_tokens);
        if let Some(key_id) = self.official_key_id {
            crate::keypool::record_outcome(key_id, status_code, self.input_tokens, output_tokens);
        }
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        // A drop with no explicit `finish` call means the request never
        // reached a normal terminal state (client disconnect, panic unwind).
        self.finish(0, 0);
    }
}

/// Inserts the `processing` Log row that must exist before the first
/// upstream byte is sent, per the invariant that every dispatched request is
/// accounted for even if it never completes. The caller computes
/// `input_tokens` up front and carries the same value into a `FinalizeGuard`,
/// so both the Log row and the eventual `KeyPool` outcome agree on it.
pub fn start_log(
    exclusive_key_id: Option<i64>,
    user_id: Option<i64>,
    model: &str,
    is_stream: bool,
    input_tokens: i64,
) -> i64 {
    let conn = db::open_conn();
    db::create_log(&conn, exclusive_key_id, user_id, model, is_stream, input_tokens)
}

pub fn count_request_tokens(messages: &[CanonicalMessage], model: &str) -> i64 {
    let texts: Vec<String> = messages.iter().map(|m| m.content.as_text()).collect();
    let framed: Vec<crate::tokenizer::MessageForCounting> = messages
        .iter()
        .zip(texts.iter())
        .map(|(m, text)| crate::tokenizer::MessageForCounting { role: m.role.as_str(), name: m.name.as_deref(), content: text })
        .collect();
    crate::tokenizer::count_tokens_for_messages(&framed, model)
}

/// Token count for a pass-through request, where the body is forwarded
/// without being parsed into canonical messages: counts raw serialized text
/// rather than applying the per-message framing formula.
pub fn count_raw_tokens(body: &serde_json::Value, model: &str) -> i64 {
    crate::tokenizer::count_tokens(&body.to_string(), model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn finalize_is_idempotent_via_swap() {
        let finalized = AtomicBool::new(false);
        assert!(!finalized.swap(true, Ordering::SeqCst));
        assert!(finalized.swap(true, Ordering::SeqCst));
    }
}
