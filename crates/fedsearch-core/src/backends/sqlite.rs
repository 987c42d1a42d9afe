//! SQLite FTS5 mail index

use super::traits::{TextRow, TextSearchBackend, TextSearchPage};
use crate::error::{FedSearchError, Result};
use crate::query::PredicateValue;
use crate::search::{SearchSource, TextQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, InterruptHandle, ToSql};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA_VERSION: i32 = 1;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- One row per synced message
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    connection_id TEXT,
    provider_id TEXT,
    subject TEXT NOT NULL DEFAULT '',
    snippet TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT '',
    sender TEXT NOT NULL DEFAULT '',
    recipients TEXT NOT NULL DEFAULT '',
    folder TEXT,
    received_at INTEGER,
    is_read INTEGER NOT NULL DEFAULT 0,
    is_starred INTEGER NOT NULL DEFAULT 0,
    has_attachment INTEGER NOT NULL DEFAULT 0,
    UNIQUE(user_id, provider_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_user_received
    ON messages(user_id, received_at DESC);

-- Full-text index, rowid = messages.id
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    subject,
    snippet,
    body,
    sender,
    tokenize='porter unicode61'
);
"#;

const CREATE_TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages
BEGIN
    INSERT INTO messages_fts(rowid, subject, snippet, body, sender)
    VALUES (new.id, new.subject, new.snippet, new.body, new.sender);
END;

CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages
BEGIN
    DELETE FROM messages_fts WHERE rowid = old.id;
END;

CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages
BEGIN
    DELETE FROM messages_fts WHERE rowid = old.id;
    INSERT INTO messages_fts(rowid, subject, snippet, body, sender)
    VALUES (new.id, new.subject, new.snippet, new.body, new.sender);
END;
"#;

/// A message to add to the index
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub user_id: String,
    pub connection_id: Option<String>,
    pub provider_id: Option<String>,
    pub subject: String,
    pub snippet: String,
    pub body: String,
    pub sender: String,
    pub recipients: String,
    pub folder: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachment: bool,
}

/// Local full-text index over synced mail
#[derive(Clone)]
pub struct SqliteMailIndex {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteMailIndex {
    /// Open database at path, creating if necessary
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create tables, the FTS index and its sync triggers
    pub fn initialize(&self) -> Result<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(CREATE_TABLES)?;
        conn.execute_batch(CREATE_TRIGGERS)?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Insert a message, or update it in place when the provider id is
    /// already indexed for this user. Returns the internal id.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<i64> {
        let conn = lock(&self.conn)?;
        let id = conn.query_row(
            "INSERT INTO messages
                (user_id, connection_id, provider_id, subject, snippet, body, sender,
                 recipients, folder, received_at, is_read, is_starred, has_attachment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(user_id, provider_id) DO UPDATE SET
                connection_id = excluded.connection_id,
                subject = excluded.subject,
                snippet = excluded.snippet,
                body = excluded.body,
                sender = excluded.sender,
                recipients = excluded.recipients,
                folder = excluded.folder,
                received_at = excluded.received_at,
                is_read = excluded.is_read,
                is_starred = excluded.is_starred,
                has_attachment = excluded.has_attachment
             RETURNING id",
            params![
                msg.user_id,
                msg.connection_id,
                msg.provider_id,
                msg.subject,
                msg.snippet,
                msg.body,
                msg.sender,
                msg.recipients,
                msg.folder,
                msg.received_at.map(|d| d.timestamp()),
                msg.is_read,
                msg.is_starred,
                msg.has_attachment,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Remove a message by provider id
    pub fn delete_message(&self, user_id: &str, provider_id: &str) -> Result<bool> {
        let conn = lock(&self.conn)?;
        let deleted = conn.execute(
            "DELETE FROM messages WHERE user_id = ?1 AND provider_id = ?2",
            params![user_id, provider_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn count_messages(&self, user_id: &str) -> Result<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| FedSearchError::backend(SearchSource::Text, "index connection lock poisoned"))
}

fn bind(value: PredicateValue) -> Box<dyn ToSql> {
    match value {
        PredicateValue::Text(s) => Box::new(s),
        PredicateValue::Bool(b) => Box::new(b),
        PredicateValue::Timestamp(t) => Box::new(t.timestamp()),
    }
}

const QUERY_PENDING: u8 = 0;
const QUERY_RUNNING: u8 = 1;
const QUERY_FINISHED: u8 = 2;
const QUERY_ABANDONED: u8 = 3;

/// Held by the awaiting search. Dropping it before the blocking query
/// finishes (deadline, cancellation) interrupts the statement so the
/// connection lock is released promptly.
struct QueryGuard {
    state: Arc<AtomicU8>,
    interrupt: Arc<InterruptHandle>,
}

/// Blocking-side half of a [`QueryGuard`]
struct QueryTicket {
    state: Arc<AtomicU8>,
}

impl QueryGuard {
    fn new(interrupt: Arc<InterruptHandle>) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(QUERY_PENDING)),
            interrupt,
        }
    }

    fn ticket(&self) -> QueryTicket {
        QueryTicket {
            state: self.state.clone(),
        }
    }
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        if self.state.swap(QUERY_ABANDONED, Ordering::SeqCst) == QUERY_RUNNING {
            self.interrupt.interrupt();
            tracing::debug!("Interrupted abandoned full-text query");
        }
    }
}

impl QueryTicket {
    /// Claim the connection; false once the search has been abandoned
    fn begin(&self) -> bool {
        self.state
            .compare_exchange(QUERY_PENDING, QUERY_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn finish(&self) {
        let _ = self.state.compare_exchange(
            QUERY_RUNNING,
            QUERY_FINISHED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Map raw bm25 (lower is better, usually negative) into 0..1, higher is better
fn normalize_bm25(raw: f64) -> f64 {
    let magnitude = raw.abs();
    magnitude / (1.0 + magnitude)
}

fn query_page(
    conn: &Connection,
    user_id: &str,
    query: &TextQuery,
    limit: usize,
    offset: usize,
) -> Result<TextSearchPage> {
    let has_text = !query.text.is_empty();

    let mut from = String::from("FROM messages m");
    let mut conditions = vec!["m.user_id = ?".to_string()];
    let mut params_vec: Vec<Box<dyn ToSql>> = vec![Box::new(user_id.to_string())];

    if has_text {
        from.push_str(" JOIN messages_fts ON messages_fts.rowid = m.id");
        conditions.push("messages_fts MATCH ?".to_string());
        params_vec.push(Box::new(query.text.clone()));
    }
    if let Some(ref connection_id) = query.connection_id {
        conditions.push("m.connection_id = ?".to_string());
        params_vec.push(Box::new(connection_id.clone()));
    }
    for predicate in &query.predicates {
        conditions.push(predicate.clause("m"));
        params_vec.push(bind(predicate.bind_value()));
    }
    let where_clause = conditions.join(" AND ");

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {} WHERE {}", from, where_clause),
        rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
        |row| row.get(0),
    )?;

    let (rank_expr, order) = if has_text {
        ("bm25(messages_fts, 10.0, 2.0, 1.0, 5.0)", "rank_raw ASC, m.received_at DESC")
    } else {
        ("NULL", "m.received_at DESC, m.id DESC")
    };
    let sql = format!(
        "SELECT m.id, m.provider_id, m.subject, m.snippet, m.sender, m.received_at,
                m.is_read, m.has_attachment, m.folder, {} AS rank_raw
         {} WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
        rank_expr, from, where_clause, order, limit, offset
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            |row| {
                let received_at: Option<i64> = row.get(5)?;
                let rank: Option<f64> = row.get(9)?;
                Ok(TextRow {
                    id: row.get(0)?,
                    provider_id: row.get(1)?,
                    subject: row.get(2)?,
                    snippet: row.get(3)?,
                    sender: row.get(4)?,
                    received_at: received_at.and_then(|secs| DateTime::from_timestamp(secs, 0)),
                    is_read: row.get(6)?,
                    has_attachment: row.get(7)?,
                    folder: row.get(8)?,
                    rank: rank.map(normalize_bm25),
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(TextSearchPage {
        rows,
        total: total.max(0) as usize,
    })
}

#[async_trait]
impl TextSearchBackend for SqliteMailIndex {
    async fn search(
        &self,
        user_id: &str,
        query: &TextQuery,
        limit: usize,
        offset: usize,
    ) -> Result<TextSearchPage> {
        let conn = self.conn.clone();
        let user_id = user_id.to_string();
        let query = query.clone();
        let guard = QueryGuard::new(self.interrupt.clone());
        let ticket = guard.ticket();

        let page = tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            if !ticket.begin() {
                return Err(FedSearchError::Cancelled);
            }
            let page = query_page(&conn, &user_id, &query, limit, offset);
            ticket.finish();
            page
        })
        .await
        .map_err(|e| FedSearchError::backend(SearchSource::Text, format!("search task failed: {}", e)))?;
        drop(guard);
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{analyze_query, build_predicates, to_fts_query};
    use chrono::TimeZone;

    fn message(provider_id: &str, subject: &str, sender: &str, day: u32) -> NewMessage {
        NewMessage {
            user_id: "u1".to_string(),
            provider_id: Some(provider_id.to_string()),
            subject: subject.to_string(),
            snippet: format!("{} snippet", subject),
            sender: sender.to_string(),
            folder: Some("inbox".to_string()),
            received_at: Some(Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    fn seeded() -> SqliteMailIndex {
        let index = SqliteMailIndex::open_in_memory().unwrap();
        index.initialize().unwrap();
        index.insert_message(&message("m1", "Budget review", "alice@co.com", 1)).unwrap();
        index.insert_message(&message("m2", "Budget budget budget", "bob@co.com", 2)).unwrap();
        index.insert_message(&message("m3", "Lunch plans", "alice@co.com", 3)).unwrap();
        index
            .insert_message(&NewMessage {
                user_id: "u2".to_string(),
                ..message("m4", "Budget for u2", "carol@co.com", 4)
            })
            .unwrap();
        index
    }

    fn text_query(raw: &str) -> TextQuery {
        let parsed = analyze_query(raw);
        TextQuery {
            text: to_fts_query(&parsed),
            predicates: build_predicates(&parsed, None),
            connection_id: None,
        }
    }

    #[tokio::test]
    async fn test_fts_search_scoped_to_user() {
        let index = seeded();
        let page = index.search("u1", &text_query("budget"), 10, 0).await.unwrap();
        assert_eq!(page.total, 2);
        let ids: Vec<_> = page.rows.iter().filter_map(|r| r.provider_id.as_deref()).collect();
        assert!(ids.contains(&"m1") && ids.contains(&"m2"));
        assert!(page
            .rows
            .iter()
            .all(|r| r.rank.is_some_and(|rank| (0.0..1.0).contains(&rank))));
    }

    #[tokio::test]
    async fn test_predicates_apply() {
        let index = seeded();
        let page = index
            .search("u1", &text_query("budget from:alice"), 10, 0)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].provider_id.as_deref(), Some("m1"));
        assert_eq!(page.rows[0].sender, "alice@co.com");
    }

    #[tokio::test]
    async fn test_filter_only_query_orders_by_date() {
        let index = seeded();
        let page = index
            .search("u1", &text_query("from:alice after:2024-03-02"), 10, 0)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0].provider_id.as_deref(), Some("m3"));
        assert!(page.rows[0].rank.is_none());

        let page = index.search("u1", &text_query("in:inbox"), 10, 0).await.unwrap();
        let ids: Vec<_> = page.rows.iter().filter_map(|r| r.provider_id.as_deref()).collect();
        assert_eq!(ids, vec!["m3", "m2", "m1"]);
    }

    #[tokio::test]
    async fn test_pagination() {
        let index = seeded();
        let page = index.search("u1", &text_query("in:inbox"), 2, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].provider_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_operator_words_are_literal() {
        let index = seeded();
        index
            .insert_message(&message("m5", "NEAR the OR office", "dan@co.com", 5))
            .unwrap();
        let page = index.search("u1", &text_query("office NEAR"), 10, 0).await.unwrap();
        assert_eq!(page.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_reinsert_updates_in_place() {
        let index = seeded();
        let first = index.insert_message(&message("m1", "Budget review", "alice@co.com", 1)).unwrap();
        let second = index
            .insert_message(&message("m1", "Offsite agenda", "alice@co.com", 1))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(index.count_messages("u1").unwrap(), 3);

        let page = index.search("u1", &text_query("offsite"), 10, 0).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        let page = index.search("u1", &text_query("review"), 10, 0).await.unwrap();
        assert!(page.rows.is_empty());
    }

    #[test]
    fn test_delete_and_count() {
        let index = seeded();
        assert_eq!(index.count_messages("u1").unwrap(), 3);
        assert!(index.delete_message("u1", "m1").unwrap());
        assert!(!index.delete_message("u1", "m1").unwrap());
        assert_eq!(index.count_messages("u1").unwrap(), 2);
    }

    #[test]
    fn test_abandoned_search_never_takes_the_connection() {
        let index = seeded();
        let guard = QueryGuard::new(index.interrupt.clone());
        let ticket = guard.ticket();
        drop(guard);
        assert!(!ticket.begin());
    }

    #[test]
    fn test_finished_query_is_not_interrupted() {
        let index = seeded();
        let guard = QueryGuard::new(index.interrupt.clone());
        let ticket = guard.ticket();
        assert!(ticket.begin());
        ticket.finish();
        drop(guard);
        assert_eq!(index.count_messages("u1").unwrap(), 3);
    }

    #[test]
    fn test_abandoned_running_query_is_interrupted() {
        let index = seeded();
        let guard = QueryGuard::new(index.interrupt.clone());
        let ticket = guard.ticket();
        let conn = index.conn.clone();
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let worker = std::thread::spawn(move || {
            let conn = conn.lock().unwrap();
            assert!(ticket.begin());
            started_tx.send(()).unwrap();
            let outcome: rusqlite::Result<i64> = conn.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                 SELECT count(*) FROM c",
                [],
                |row| row.get(0),
            );
            ticket.finish();
            outcome
        });

        started_rx.recv().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(guard);

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            rusqlite::Error::SqliteFailure(ref e, _) if e.code == rusqlite::ErrorCode::OperationInterrupted
        ));
        // the connection is free again
        assert_eq!(index.count_messages("u1").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_timed_out_search_releases_connection() {
        let index = seeded();
        let held = index.conn.clone();
        let blocker = std::thread::spawn(move || {
            let _conn = held.lock().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(300));
        });
        while index.conn.try_lock().is_ok() {
            std::thread::yield_now();
        }

        // gives up while the query is still queued behind the lock
        let query = text_query("budget");
        let search = index.search("u1", &query, 10, 0);
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), search)
            .await
            .is_err());

        blocker.join().unwrap();
        let page = index.search("u1", &text_query("budget"), 10, 0).await.unwrap();
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_normalize_bm25() {
        assert_eq!(normalize_bm25(0.0), 0.0);
        assert!(normalize_bm25(-4.0) > normalize_bm25(-1.0));
        assert!(normalize_bm25(-1000.0) < 1.0);
    }
}
