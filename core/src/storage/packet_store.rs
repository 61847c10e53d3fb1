use crate::error::{PacketError, PacketResult};
use crate::models::{
    HistoryFilter, HistoryPage, HttpMethod, OriginKind, PacketDraft, PacketId, PacketOrigin,
    PacketRecord, PacketSummary, PageRequest, SortOrder,
};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, Row};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;

const DB_FILE_NAME: &str = "packetproxy_packets.sqlite";

/// AUTOINCREMENT keeps ids strictly increasing and never reuses one, even
/// after rows are evicted by an external policy.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS packets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        captured_at INTEGER NOT NULL,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        status INTEGER,
        headers TEXT NOT NULL,
        body BLOB,
        body_length INTEGER NOT NULL,
        response_headers TEXT NOT NULL,
        response_body BLOB,
        origin_kind TEXT NOT NULL,
        origin TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_packets_status
        ON packets(status);
    CREATE INDEX IF NOT EXISTS idx_packets_origin_kind
        ON packets(origin_kind);
";

const SUMMARY_COLUMNS: &str = "id, captured_at, method, url, status, body_length, origin";

/// Append-only packet repository.
///
/// SQLite is the source of truth; the most recent records (bodies included)
/// are mirrored in a ring so detail lookups rarely touch the connection mutex.
pub struct PacketStore {
    ring: RwLock<VecDeque<PacketRecord>>,
    max_len: usize,
    db: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl PacketStore {
    /// Open (or create) the on-disk store under `base_path`.
    pub fn open(base_path: &Path, max_len: usize) -> anyhow::Result<Self> {
        if !base_path.exists() {
            fs::create_dir_all(base_path)
                .with_context(|| format!("creating storage directory {:?}", base_path))?;
        }
        let db_path = base_path.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening database at {:?}", db_path))?;
        Self::with_connection(conn, max_len, Some(db_path))
    }

    /// Store that lives only as long as the process.
    pub fn in_memory(max_len: usize) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        Self::with_connection(conn, max_len, None)
    }

    fn with_connection(
        conn: Connection,
        max_len: usize,
        db_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA).context("creating packet schema")?;
        Ok(Self {
            ring: RwLock::new(VecDeque::with_capacity(max_len.min(1024))),
            max_len,
            db: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    /// Store a packet and return its newly assigned id.
    pub async fn append(&self, mut draft: PacketDraft) -> PacketResult<PacketId> {
        // SQLite keeps millisecond timestamps; match that so ring and disk agree.
        draft.timestamp = truncate_to_millis(draft.timestamp);

        let db = Arc::clone(&self.db);
        let (id, draft) = tokio::task::spawn_blocking(
            move || -> anyhow::Result<(PacketId, PacketDraft)> {
                let headers = serde_json::to_string(&draft.headers)?;
                let response_headers = serde_json::to_string(&draft.response_headers)?;
                let origin = serde_json::to_string(&draft.origin)?;
                let origin_kind = origin_kind_str(&draft.origin);
                let body_length = draft.body.as_ref().map_or(0, |b| b.len() as i64);
                let status = draft.status.map(i64::from);

                let conn = lock(&db)?;
                conn.execute(
                    "INSERT INTO packets
                       (captured_at, method, url, status, headers, body, body_length,
                        response_headers, response_body, origin_kind, origin)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        draft.timestamp.timestamp_millis(),
                        draft.method.as_str(),
                        draft.url,
                        status,
                        headers,
                        draft.body,
                        body_length,
                        response_headers,
                        draft.response_body,
                        origin_kind,
                        origin,
                    ],
                )
                .context("inserting packet")?;
                Ok((conn.last_insert_rowid() as PacketId, draft))
            },
        )
        .await
        .context("append task failed")??;

        if self.max_len > 0 {
            let mut ring = self.ring.write().await;
            ring.push_back(draft.into_record(id));
            while ring.len() > self.max_len {
                ring.pop_front();
            }
        }

        tracing::debug!(packet_id = id, "Stored packet");
        Ok(id)
    }

    /// One page of body-less summaries matching `filter`.
    pub async fn list(
        &self,
        page: PageRequest,
        filter: &HistoryFilter,
        order: SortOrder,
    ) -> PacketResult<HistoryPage> {
        let (clause, params) = build_where_clause(filter);
        let direction = match order {
            SortOrder::IdAsc => "ASC",
            SortOrder::IdDesc => "DESC",
        };
        let db = Arc::clone(&self.db);

        let (packets, total_count) = tokio::task::spawn_blocking(move || {
            let conn = lock(&db)?;

            let count_sql = format!("SELECT COUNT(*) FROM packets {}", clause);
            let mut count_stmt = conn.prepare(&count_sql)?;
            let total: u64 = count_stmt
                .query_row(rusqlite::params_from_iter(params.iter()), |row| {
                    row.get::<_, i64>(0)
                })?
                .max(0) as u64;

            let mut query_params = params;
            query_params.push(Value::from(page.limit() as i64));
            query_params.push(Value::from(page.offset() as i64));

            let sql = format!(
                "SELECT {} FROM packets {} ORDER BY id {} LIMIT ? OFFSET ?",
                SUMMARY_COLUMNS, clause, direction
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(query_params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(summary_from_row(row)?);
            }
            Ok::<_, anyhow::Error>((out, total))
        })
        .await
        .context("list task failed")??;

        let has_more = (page.offset() as u64).saturating_add(packets.len() as u64) < total_count;
        Ok(HistoryPage {
            packets,
            total_count,
            has_more,
            limit: page.limit(),
            offset: page.offset(),
        })
    }

    /// Fetch one packet. Bodies are only read when `include_body` is set.
    pub async fn get(&self, id: PacketId, include_body: bool) -> PacketResult<PacketRecord> {
        {
            let ring = self.ring.read().await;
            if let Some(record) = ring.iter().rev().find(|r| r.id == id) {
                let record = record.clone();
                return Ok(if include_body {
                    record
                } else {
                    record.without_bodies()
                });
            }
        }

        let db = Arc::clone(&self.db);
        let body_columns = if include_body {
            "body, response_body"
        } else {
            "NULL, NULL"
        };
        let sql = format!(
            "SELECT id, captured_at, method, url, status, headers, response_headers, origin, {}
             FROM packets WHERE id = ?1",
            body_columns
        );
        let found = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<PacketRecord>> {
            let conn = lock(&db)?;
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![id as i64])?;
            match rows.next()? {
                Some(row) => Ok(Some(record_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
        .context("get task failed")??;

        found.ok_or(PacketError::NotFound(id))
    }

    /// Number of stored packets
    pub async fn count(&self) -> PacketResult<u64> {
        let db = Arc::clone(&self.db);
        let count = tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
            let conn = lock(&db)?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM packets", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
        .context("count task failed")??;
        Ok(count)
    }

    /// Database file backing this store; `None` for in-memory stores
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

fn lock(db: &Mutex<Connection>) -> anyhow::Result<MutexGuard<'_, Connection>> {
    db.lock().map_err(|e| anyhow!("db mutex poisoned: {}", e))
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

fn origin_kind_str(origin: &PacketOrigin) -> &'static str {
    match origin {
        PacketOrigin::Captured => "captured",
        PacketOrigin::Resend { .. } => "resend",
    }
}

fn timestamp_from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| anyhow!("invalid stored timestamp {}", ms))
}

fn method_from_str(method: &str) -> anyhow::Result<HttpMethod> {
    method.parse::<HttpMethod>().map_err(|e| anyhow!(e))
}

fn summary_from_row(row: &Row<'_>) -> anyhow::Result<PacketSummary> {
    let id: i64 = row.get(0)?;
    let captured_at: i64 = row.get(1)?;
    let method: String = row.get(2)?;
    let status: Option<i64> = row.get(4)?;
    let body_length: i64 = row.get(5)?;
    let origin: String = row.get(6)?;
    Ok(PacketSummary {
        id: id as PacketId,
        method: method_from_str(&method)?,
        url: row.get(3)?,
        status: status.map(|s| s as u16),
        body_length: body_length.max(0) as u64,
        timestamp: timestamp_from_millis(captured_at)?,
        origin: serde_json::from_str(&origin)?,
    })
}

fn record_from_row(row: &Row<'_>) -> anyhow::Result<PacketRecord> {
    let id: i64 = row.get(0)?;
    let captured_at: i64 = row.get(1)?;
    let method: String = row.get(2)?;
    let status: Option<i64> = row.get(4)?;
    let headers: String = row.get(5)?;
    let response_headers: String = row.get(6)?;
    let origin: String = row.get(7)?;
    Ok(PacketRecord {
        id: id as PacketId,
        method: method_from_str(&method)?,
        url: row.get(3)?,
        status: status.map(|s| s as u16),
        headers: serde_json::from_str(&headers)?,
        body: row.get(8)?,
        response_headers: serde_json::from_str(&response_headers)?,
        response_body: row.get(9)?,
        timestamp: timestamp_from_millis(captured_at)?,
        origin: serde_json::from_str(&origin)?,
    })
}

fn build_where_clause(filter: &HistoryFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    if let Some(method) = filter.method {
        clauses.push("method = ?".to_string());
        params.push(Value::from(method.as_str().to_string()));
    }
    if let Some(url) = &filter.url_contains {
        // instr, not LIKE: '%' and '_' in the needle are literal text
        clauses.push("instr(LOWER(url), ?) > 0".to_string());
        params.push(Value::from(url.to_ascii_lowercase()));
    }
    if let Some(min) = filter.status_min {
        clauses.push("status >= ?".to_string());
        params.push(Value::from(min as i64));
    }
    if let Some(max) = filter.status_max {
        clauses.push("status <= ?".to_string());
        params.push(Value::from(max as i64));
    }
    if let Some(kind) = filter.origin {
        clauses.push("origin_kind = ?".to_string());
        let kind = match kind {
            OriginKind::Captured => "captured",
            OriginKind::Resend => "resend",
        };
        params.push(Value::from(kind.to_string()));
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (clause, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HeaderList, HttpMethod};
    use tempfile::tempdir;

    fn sample_packet(path: &str) -> PacketDraft {
        PacketDraft::request(HttpMethod::Get, format!("https://example.com{path}"))
            .with_header("Accept", "application/json")
            .with_body("ping")
    }

    fn page(limit: i64, offset: i64) -> PageRequest {
        PageRequest::new(limit, offset).expect("valid page")
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let store = PacketStore::in_memory(10).expect("store initializes");

        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                store
                    .append(sample_packet(&format!("/item/{i}")))
                    .await
                    .expect("append ok"),
            );
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.count().await.expect("count ok"), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_share_an_id() {
        let store = Arc::new(PacketStore::in_memory(8).expect("store initializes"));

        let tasks = (0..40).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append(sample_packet(&format!("/c/{i}"))).await })
        });
        let mut ids: Vec<PacketId> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.expect("task ok").expect("append ok"))
            .collect();
        ids.sort_unstable();

        assert_eq!(ids, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn list_returns_requested_window_in_id_order() {
        let store = PacketStore::in_memory(10).expect("store initializes");
        for i in 0..6 {
            store
                .append(sample_packet(&format!("/p/{i}")))
                .await
                .expect("append ok");
        }

        let result = store
            .list(page(3, 2), &HistoryFilter::default(), SortOrder::IdAsc)
            .await
            .expect("list ok");
        let ids: Vec<_> = result.packets.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(result.total_count, 6);
        assert!(result.has_more);

        let tail = store
            .list(page(10, 4), &HistoryFilter::default(), SortOrder::IdAsc)
            .await
            .expect("list ok");
        assert_eq!(tail.packets.len(), 2);
        assert!(!tail.has_more);

        let beyond = store
            .list(page(10, 50), &HistoryFilter::default(), SortOrder::IdAsc)
            .await
            .expect("list ok");
        assert!(beyond.packets.is_empty());

        let zero = store
            .list(page(0, 0), &HistoryFilter::default(), SortOrder::IdAsc)
            .await
            .expect("list ok");
        assert!(zero.packets.is_empty());
    }

    #[tokio::test]
    async fn list_on_empty_store_is_empty_for_any_offset() {
        let store = PacketStore::in_memory(10).expect("store initializes");
        for offset in [0, 1, 100] {
            let result = store
                .list(page(10, offset), &HistoryFilter::default(), SortOrder::IdAsc)
                .await
                .expect("list ok");
            assert!(result.packets.is_empty());
            assert_eq!(result.total_count, 0);
        }
    }

    #[tokio::test]
    async fn list_descending_starts_with_newest() {
        let store = PacketStore::in_memory(10).expect("store initializes");
        for i in 0..3 {
            store
                .append(sample_packet(&format!("/d/{i}")))
                .await
                .expect("append ok");
        }
        let result = store
            .list(page(2, 0), &HistoryFilter::default(), SortOrder::IdDesc)
            .await
            .expect("list ok");
        let ids: Vec<_> = result.packets.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[tokio::test]
    async fn list_respects_filters() {
        let store = PacketStore::in_memory(10).expect("store initializes");
        store
            .append(
                PacketDraft::request(HttpMethod::Post, "https://api.example.com/login")
                    .with_response(401, HeaderList::new(), None),
            )
            .await
            .expect("append ok");
        store
            .append(
                PacketDraft::request(HttpMethod::Get, "https://cdn.example.com/app.js")
                    .with_response(200, HeaderList::new(), None),
            )
            .await
            .expect("append ok");

        let filter = HistoryFilter {
            url_contains: Some("LOGIN".into()),
            status_min: Some(400),
            ..Default::default()
        };
        let result = store
            .list(page(10, 0), &filter, SortOrder::IdAsc)
            .await
            .expect("list ok");
        assert_eq!(result.total_count, 1);
        assert_eq!(result.packets[0].method, HttpMethod::Post);
        assert_eq!(result.packets[0].status, Some(401));

        let resends = HistoryFilter {
            origin: Some(OriginKind::Resend),
            ..Default::default()
        };
        let none = store
            .list(page(10, 0), &resends, SortOrder::IdAsc)
            .await
            .expect("list ok");
        assert_eq!(none.total_count, 0);
    }

    async fn matching_urls(store: &PacketStore, needle: &str) -> u64 {
        let filter = HistoryFilter {
            url_contains: Some(needle.to_string()),
            ..Default::default()
        };
        store
            .list(page(10, 0), &filter, SortOrder::IdAsc)
            .await
            .expect("list ok")
            .total_count
    }

    #[tokio::test]
    async fn url_filter_treats_wildcards_literally() {
        let store = PacketStore::in_memory(10).expect("store initializes");
        for url in ["/abc", "/other", "/a_c?q=100%"] {
            store.append(sample_packet(url)).await.expect("append ok");
        }

        assert_eq!(matching_urls(&store, "a_c").await, 1);
        assert_eq!(matching_urls(&store, "_").await, 1);
        assert_eq!(matching_urls(&store, "%").await, 1);
        assert_eq!(matching_urls(&store, "b").await, 1);
        assert_eq!(matching_urls(&store, "/").await, 3);
    }

    #[tokio::test]
    async fn get_omits_bodies_unless_requested() {
        // Ring disabled so the lookup goes through SQLite.
        for ring_size in [0, 10] {
            let store = PacketStore::in_memory(ring_size).expect("store initializes");
            let id = store
                .append(sample_packet("/secret").with_response(
                    200,
                    [("Content-Type", "text/plain")].into_iter().collect(),
                    Some(b"pong".to_vec()),
                ))
                .await
                .expect("append ok");

            let bare = store.get(id, false).await.expect("get ok");
            assert!(bare.body.is_none());
            assert!(bare.response_body.is_none());
            assert_eq!(bare.headers.get("accept"), Some("application/json"));

            let full = store.get(id, true).await.expect("get ok");
            assert_eq!(full.body.as_deref(), Some(&b"ping"[..]));
            assert_eq!(full.response_body.as_deref(), Some(&b"pong"[..]));
            assert_eq!(full.response_headers.get("content-type"), Some("text/plain"));
        }
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = PacketStore::in_memory(10).expect("store initializes");
        let err = store.get(42, true).await.expect_err("missing packet");
        assert!(matches!(err, PacketError::NotFound(42)));
    }

    #[tokio::test]
    async fn reopened_store_keeps_records_and_id_sequence() {
        let dir = tempdir().expect("temp dir");
        {
            let store = PacketStore::open(dir.path(), 10).expect("store initializes");
            store.append(sample_packet("/a")).await.expect("append ok");
            store.append(sample_packet("/b")).await.expect("append ok");
            assert!(store.db_path().is_some());
        }

        let store = PacketStore::open(dir.path(), 10).expect("store reopens");
        let first = store.get(1, true).await.expect("get ok");
        assert_eq!(first.url, "https://example.com/a");
        assert_eq!(first.body.as_deref(), Some(&b"ping"[..]));

        let next = store.append(sample_packet("/c")).await.expect("append ok");
        assert_eq!(next, 3);
    }

    #[tokio::test]
    async fn ring_and_database_agree_on_timestamps() {
        let store = PacketStore::in_memory(1).expect("store initializes");
        let first = store.append(sample_packet("/x")).await.expect("append ok");
        let cached = store.get(first, true).await.expect("get ok");
        // Evict `first` from the ring.
        store.append(sample_packet("/y")).await.expect("append ok");
        let from_disk = store.get(first, true).await.expect("get ok");
        assert_eq!(cached, from_disk);
    }
}
