//! Rotates official keys within a channel and records per-key outcomes.
//!
//! Rotation is global round-robin, with the cursor persisted in
//! `SystemConfig` so it survives process restarts. A channel is guarded by a
//! [`tokio::sync::Mutex`] so concurrent requests serialize on the
//! read-cursor/advance-cursor/write-cursor sequence instead of racing it.

use crate::db::{self, OfficialKey};
use crate::dispatcher::error::DispatchError;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

static CHANNEL_LOCKS: Lazy<Mutex<HashMap<i64, Arc<Mutex<()>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

async fn lock_for_channel(channel_id: i64) -> Arc<Mutex<()>> {
    let mut locks = CHANNEL_LOCKS.lock().await;
    locks.entry(channel_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
}

/// Selects the next active official key for `channel_id`, advancing and
/// persisting the rotation cursor. Fails 503 if the channel has no keys, or
/// if every key in the channel is currently disabled.
pub async fn next_key(channel_id: i64) -> Result<OfficialKey, DispatchError> {
    let channel_lock = lock_for_channel(channel_id).await;
    let _guard = channel_lock.lock().await;

    let conn = db::open_conn();
    let keys = db::official_keys_for_channel(&conn, channel_id);
    if keys.is_empty() {
        return Err(DispatchError::NoKeyAvailable);
    }

    let cursor = db::get_system_cursor(&conn);
    let start_idx = match cursor.and_then(|id| keys.iter().position(|k| k.id == id)) {
        Some(pos) => (pos + 1) % keys.len(),
        None => 0,
    };

    for offset in 0..keys.len() {
        let idx = (start_idx + offset) % keys.len();
        let candidate = &keys[idx];
        if candidate.is_active {
            db::set_system_cursor(&conn, candidate.id);
            return Ok(candidate.clone());
        }
    }

    Err(DispatchError::NoKeyAvailable)
}

pub fn record_outcome(key_id: i64, status: u16, input_tokens: i64, output_tokens: i64) {
    let conn = db::open_conn();
    db::record_key_outcome(&conn, key_id, status, input_tokens, output_tokens);
}

#[cfg(test)]
mod tests {
    // Exercising rotation end-to-end needs a populated database; the pure
    // selection arithmetic is covered indirectly through dispatcher tests
    // that seed channels via `db::init()` against a temp data directory.
}
