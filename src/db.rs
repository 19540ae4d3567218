//! Persistence layer: the §3 relational schema over a single SQLite file.
//!
//! Connections are opened per call, matching the upstream project's style;
//! WAL + a generous cache keep that cheap under concurrent request handlers.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

pub fn db_path() -> PathBuf {
    let cfg = crate::config::load();
    let mut p = crate::config::data_directory(&cfg);
    std::fs::create_dir_all(&p).ok();
    p.push("gateway.db");
    p
}

pub fn open_conn() -> Connection {
    let conn = Connection::open(db_path()).unwrap();
    optimize_connection(&conn);
    conn
}

fn optimize_connection(conn: &Connection) {
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "cache_size", "-64000").ok();
    conn.pragma_update(None, "temp_store", "MEMORY").ok();
    conn.pragma_update(None, "foreign_keys", "ON").ok();
}

/// Create the schema if it doesn't already exist. Idempotent; safe to call on
/// both an empty database and a populated one.
pub fn init() {
    let conn = open_conn();
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            api_url TEXT NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS official_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users(id),
            channel_id INTEGER REFERENCES channels(id),
            usage_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            last_status TEXT NOT NULL DEFAULT 'active',
            last_status_code INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            UNIQUE(key, user_id, channel_id)
        );
        CREATE INDEX IF NOT EXISTS idx_official_keys_channel ON official_keys(channel_id, id);

        CREATE TABLE IF NOT EXISTS exclusive_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            user_id INTEGER NOT NULL REFERENCES users(id),
            name TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            preset_id INTEGER REFERENCES presets(id),
            channel_id INTEGER REFERENCES channels(id),
            enable_regex INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_exclusive_keys_key ON exclusive_keys(key);

        CREATE TABLE IF NOT EXISTS presets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users(id),
            sort_order INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS preset_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            preset_id INTEGER NOT NULL REFERENCES presets(id),
            role TEXT NOT NULL,
            item_type TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            enabled INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_preset_items_preset ON preset_items(preset_id, sort_order);

        CREATE TABLE IF NOT EXISTS regex_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            name TEXT NOT NULL,
            pattern TEXT NOT NULL,
            replacement TEXT NOT NULL,
            rule_type TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_regex_rules_user ON regex_rules(user_id, rule_type, sort_order);

        CREATE TABLE IF NOT EXISTS preset_regex_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            preset_id INTEGER NOT NULL REFERENCES presets(id),
            name TEXT NOT NULL,
            pattern TEXT NOT NULL,
            replacement TEXT NOT NULL,
            rule_type TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_preset_regex_rules_preset ON preset_regex_rules(preset_id, rule_type, sort_order);

        CREATE TABLE IF NOT EXISTS logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exclusive_key_id INTEGER REFERENCES exclusive_keys(id),
            official_key_id INTEGER REFERENCES official_keys(id),
            user_id INTEGER REFERENCES users(id),
            model TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'processing',
            status_code INTEGER NOT NULL DEFAULT 0,
            latency REAL,
            ttft REAL,
            is_stream INTEGER NOT NULL DEFAULT 0,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp DESC);

        CREATE TABLE IF NOT EXISTS system_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_used_official_key_id INTEGER
        );
        INSERT OR IGNORE INTO system_config (id, last_used_official_key_id) VALUES (1, NULL);

        CREATE TABLE IF NOT EXISTS schema_migrations (
            revision TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );
        ",
    )
    .unwrap();
}

#[derive(Debug, Clone)]
pub struct OfficialKey {
    pub id: i64,
    pub key: String,
    pub user_id: i64,
    pub channel_id: Option<i64>,
    pub usage_count: i64,
    pub error_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub last_status: String,
    pub last_status_code: Option<i64>,
    pub is_active: bool,
}

fn row_to_official_key(row: &rusqlite::Row) -> rusqlite::Result<OfficialKey> {
    Ok(OfficialKey {
        id: row.get(0)?,
        key: row.get(1)?,
        user_id: row.get(2)?,
        channel_id: row.get(3)?,
        usage_count: row.get(4)?,
        error_count: row.get(5)?,
        input_tokens: row.get(6)?,
        output_tokens: row.get(7)?,
        last_status: row.get(8)?,
        last_status_code: row.get(9)?,
        is_active: row.get::<_, i64>(10)? != 0,
    })
}

const OFFICIAL_KEY_COLUMNS: &str = "id, key, user_id, channel_id, usage_count, error_count, \
     input_tokens, output_tokens, last_status, last_status_code, is_active";

pub fn official_keys_for_channel(conn: &Connection, channel_id: i64) -> Vec<OfficialKey> {
    let sql = format!(
        "SELECT {OFFICIAL_KEY_COLUMNS} FROM official_keys WHERE channel_id = ?1 ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql).unwrap();
    let rows = stmt
        .query_map(params![channel_id], row_to_official_key)
        .unwrap();
    rows.filter_map(|r| r.ok()).collect()
}

pub fn get_system_cursor(conn: &Connection) -> Option<i64> {
    conn.query_row(
        "SELECT last_used_official_key_id FROM system_config WHERE id = 1",
        [],
        |row| row.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

pub fn set_system_cursor(conn: &Connection, official_key_id: i64) {
    conn.execute(
        "UPDATE system_config SET last_used_official_key_id = ?1 WHERE id = 1",
        params![official_key_id],
    )
    .ok();
}

/// Atomically records a request outcome against one official key, per §4.2/§5:
/// on success, counters accumulate and the consecutive error streak clears; on
/// failure, the streak increments and trips the circuit breaker at 3.
pub fn record_key_outcome(
    conn: &Connection,
    key_id: i64,
    status: u16,
    input_tokens: i64,
    output_tokens: i64,
) {
    if (200..300).contains(&status) {
        conn.execute(
            "UPDATE official_keys SET
                usage_count = usage_count + 1,
                last_status_code = ?2,
                input_tokens = input_tokens + ?3,
                output_tokens = output_tokens + ?4,
                error_count = 0,
                last_status = ?5
             WHERE id = ?1",
            params![key_id, status as i64, input_tokens, output_tokens, status.to_string()],
        )
        .ok();
    } else {
        conn.execute(
            "UPDATE official_keys SET
                usage_count = usage_count + 1,
                last_status_code = ?2,
                error_count = error_count + 1,
                is_active = CASE WHEN error_count + 1 >= 3 THEN 0 ELSE is_active END,
                last_status = CASE WHEN error_count + 1 >= 3 THEN 'auto_disabled' ELSE ?3 END
             WHERE id = ?1",
            params![key_id, status as i64, status.to_string()],
        )
        .ok();
    }
}

#[derive(Debug, Clone)]
pub struct ExclusiveKeyRecord {
    pub id: i64,
    pub user_id: i64,
    pub is_active: bool,
    pub preset_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub enable_regex: bool,
}

pub fn find_exclusive_key(conn: &Connection, key: &str) -> Option<ExclusiveKeyRecord> {
    conn.query_row(
        "SELECT id, user_id, is_active, preset_id, channel_id, enable_regex
         FROM exclusive_keys WHERE key = ?1",
        params![key],
        |row| {
            Ok(ExclusiveKeyRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                is_active: row.get::<_, i64>(2)? != 0,
                preset_id: row.get(3)?,
                channel_id: row.get(4)?,
                enable_regex: row.get::<_, i64>(5)? != 0,
            })
        },
    )
    .optional()
    .ok()
    .flatten()
}

#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub id: i64,
    pub name: String,
    pub channel_type: String,
    pub api_url: String,
}

pub fn find_channel(conn: &Connection, channel_id: i64) -> Option<ChannelRecord> {
    conn.query_row(
        "SELECT id, name, type, api_url FROM channels WHERE id = ?1",
        params![channel_id],
        |row| {
            Ok(ChannelRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                channel_type: row.get(2)?,
                api_url: row.get(3)?,
            })
        },
    )
    .optional()
    .ok()
    .flatten()
}

#[derive(Debug, Clone)]
pub struct PresetItemRecord {
    pub role: String,
    pub item_type: String,
    pub content: String,
    pub enabled: bool,
    pub sort_order: i64,
}

pub fn preset_items(conn: &Connection, preset_id: i64) -> Vec<PresetItemRecord> {
    let mut stmt = conn
        .prepare(
            "SELECT role, item_type, content, enabled, sort_order FROM preset_items
             WHERE preset_id = ?1 ORDER BY sort_order ASC",
        )
        .unwrap();
    let rows = stmt
        .query_map(params![preset_id], |row| {
            Ok(PresetItemRecord {
                role: row.get(0)?,
                item_type: row.get(1)?,
                content: row.get(2)?,
                enabled: row.get::<_, i64>(3)? != 0,
                sort_order: row.get(4)?,
            })
        })
        .unwrap();
    rows.filter_map(|r| r.ok()).collect()
}

#[derive(Debug, Clone)]
pub struct RegexRuleRecord {
    pub pattern: String,
    pub replacement: String,
    pub sort_order: i64,
}

pub fn user_regex_rules(conn: &Connection, user_id: i64, rule_type: &str) -> Vec<RegexRuleRecord> {
    let mut stmt = conn
        .prepare(
            "SELECT pattern, replacement, sort_order FROM regex_rules
             WHERE user_id = ?1 AND rule_type = ?2 AND is_active = 1 ORDER BY sort_order ASC",
        )
        .unwrap();
    let rows = stmt
        .query_map(params![user_id, rule_type], |row| {
            Ok(RegexRuleRecord {
                pattern: row.get(0)?,
                replacement: row.get(1)?,
                sort_order: row.get(2)?,
            })
        })
        .unwrap();
    rows.filter_map(|r| r.ok()).collect()
}

pub fn preset_regex_rules(conn: &Connection, preset_id: i64, rule_type: &str) -> Vec<RegexRuleRecord> {
    let mut stmt = conn
        .prepare(
            "SELECT pattern, replacement, sort_order FROM preset_regex_rules
             WHERE preset_id = ?1 AND rule_type = ?2 AND is_active = 1 ORDER BY sort_order ASC",
        )
        .unwrap();
    let rows = stmt
        .query_map(params![preset_id, rule_type], |row| {
            Ok(RegexRuleRecord {
                pattern: row.get(0)?,
                replacement: row.get(1)?,
                sort_order: row.get(2)?,
            })
        })
        .unwrap();
    rows.filter_map(|r| r.ok()).collect()
}

/// Inserts a `processing` Log row before dispatch, returning its id.
pub fn create_log(
    conn: &Connection,
    exclusive_key_id: Option<i64>,
    user_id: Option<i64>,
    model: &str,
    is_stream: bool,
    input_tokens: i64,
) -> i64 {
    let ts = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO logs (exclusive_key_id, official_key_id, user_id, model, status, status_code,
            is_stream, input_tokens, output_tokens, timestamp)
         VALUES (?1, NULL, ?2, ?3, 'processing', 0, ?4, ?5, 0, ?6)",
        params![exclusive_key_id, user_id, model, is_stream as i64, input_tokens, ts],
    )
    .unwrap();
    conn.last_insert_rowid()
}

/// Finalizes a Log row exactly once; `status_code` of 0 is treated as a local
/// failure to even reach upstream and is recorded as `error`.
pub fn finalize_log(
    conn: &Connection,
    log_id: i64,
    official_key_id: Option<i64>,
    status_code: u16,
    latency: f64,
    ttft: f64,
    output_tokens: i64,
) {
    let status = if (200..300).contains(&status_code) {
        "ok"
    } else {
        "error"
    };
    conn.execute(
        "UPDATE logs SET official_key_id = ?2, status = ?3, status_code = ?4,
            latency = ?5, ttft = ?6, output_tokens = ?7
         WHERE id = ?1",
        params![
            log_id,
            official_key_id,
            status,
            status_code as i64,
            latency,
            ttft,
            output_tokens
        ],
    )
    .ok();
}
