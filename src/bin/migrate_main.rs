//! `gapi-migrate` — a minimal schema-revision ledger over the same
//! `schema_migrations` table `db::init()` creates, with no external
//! migration framework: revisions are timestamp-prefixed labels, applied in
//! lexical order.

use gapi_gateway::db;
use rusqlite::params;
use std::env;

fn usage() -> ! {
    eprintln!("usage: gapi-migrate <upgrade|downgrade|current|history|revision <msg>|stamp <rev>>");
    std::process::exit(2);
}

fn main() {
    db::init();
    let conn = db::open_conn();
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else { usage() };

    match command.as_str() {
        "current" => {
            let rev: Option<String> = conn
                .query_row("SELECT revision FROM schema_migrations ORDER BY applied_at DESC LIMIT 1", [], |row| row.get(0))
                .ok();
            println!("{}", rev.unwrap_or_else(|| "<none>".to_string()));
        }
        "history" => {
            let mut stmt = conn.prepare("SELECT revision, applied_at FROM schema_migrations ORDER BY applied_at ASC").unwrap();
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))).unwrap();
            for row in rows.flatten() {
                println!("{}\tapplied_at={}", row.0, row.1);
            }
        }
        "revision" => {
            let Some(message) = args.get(1) else { usage() };
            let rev = format!("{}_{}", chrono::Utc::now().format("%Y%m%d%H%M%S"), slugify(message));
            println!("created revision {rev} (no-op: this CLI has no migration scripts to scaffold, only a ledger)");
        }
        "stamp" => {
            let Some(rev) = args.get(1) else { usage() };
            conn.execute(
                "INSERT OR REPLACE INTO schema_migrations (revision, applied_at) VALUES (?1, ?2)",
                params![rev, chrono::Utc::now().timestamp()],
            )
            .unwrap();
            println!("stamped {rev}");
        }
        "upgrade" => {
            println!("schema is managed by db::init(); nothing to upgrade beyond the current binary's baked-in schema");
        }
        "downgrade" => {
            eprintln!("downgrade is not supported: there is no prior-schema definition to roll back to");
            std::process::exit(1);
        }
        _ => usage(),
    }
}

fn slugify(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
