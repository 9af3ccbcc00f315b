use super::Mirror;
use crate::ledger::DurableRef;
use crate::{Entry, Result, VaultError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ENTRY_COLUMNS: &str =
    "key, site_id, path, value, content_type, size, expires_at, ledger_ref, written_at";

/// Mirror backed by a single sqlite database file.
#[derive(Clone)]
pub struct SqliteMirror {
    db_path: Arc<PathBuf>,
}

impl SqliteMirror {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mirror = Self {
            db_path: Arc::new(db_path),
        };
        mirror.init_schema()?;
        Ok(mirror)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(self.db_path.as_path())?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                site_id TEXT NOT NULL,
                path TEXT NOT NULL,
                value BLOB NOT NULL,
                content_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                expires_at TEXT NOT NULL,
                ledger_ref TEXT,
                written_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_expires_at ON entries(expires_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_site ON entries(site_id)",
            [],
        )?;

        Ok(())
    }

    pub fn write_blocking(&self, entry: &Entry) -> Result<()> {
        if entry.size != entry.value.len() as u64 {
            return Err(VaultError::Internal(format!(
                "entry {} size {} does not match value length {}",
                entry.key,
                entry.size,
                entry.value.len()
            )));
        }

        let conn = self.get_conn()?;
        let ledger_ref = entry
            .ledger_ref
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT OR REPLACE INTO entries (
                key, site_id, path, value, content_type, size, expires_at, ledger_ref, written_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.key,
                entry.site_id,
                entry.path,
                entry.value.as_ref(),
                entry.content_type,
                entry.size as i64,
                format_time(&entry.expires_at),
                ledger_ref,
                format_time(&entry.written_at),
            ],
        )?;

        Ok(())
    }

    pub fn read_blocking(&self, key: &str) -> Result<Option<Entry>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM entries WHERE key = ?1", ENTRY_COLUMNS);

        let entry = conn.query_row(&sql, [key], row_to_entry).optional()?;
        Ok(entry)
    }

    pub fn list_prefix_blocking(&self, prefix: &str) -> Result<Vec<Entry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM entries WHERE substr(key, 1, ?2) = ?1 ORDER BY key",
            ENTRY_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![prefix, prefix.chars().count() as i64], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }

    pub fn extend_expiry_blocking(
        &self,
        prefix: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.get_conn()?;

        let affected = conn.execute(
            "UPDATE entries SET expires_at = ?1
             WHERE substr(key, 1, ?3) = ?2 AND expires_at >= ?4",
            params![
                format_time(&expires_at),
                prefix,
                prefix.chars().count() as i64,
                format_time(&now),
            ],
        )?;

        Ok(affected)
    }

    pub fn delete_expired_blocking(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.get_conn()?;

        let affected = conn.execute(
            "DELETE FROM entries WHERE expires_at < ?1",
            [format_time(&now)],
        )?;

        Ok(affected)
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(SqliteMirror) -> Result<T> + Send + 'static,
    {
        let mirror = self.clone();
        tokio::task::spawn_blocking(move || op(mirror))
            .await
            .map_err(|e| VaultError::StorageUnavailable(format!("mirror task failed: {}", e)))?
    }
}

#[async_trait]
impl Mirror for SqliteMirror {
    async fn write(&self, entry: &Entry) -> Result<()> {
        let entry = entry.clone();
        self.run_blocking(move |mirror| mirror.write_blocking(&entry))
            .await
    }

    async fn read(&self, key: &str) -> Result<Option<Entry>> {
        let key = key.to_string();
        self.run_blocking(move |mirror| mirror.read_blocking(&key))
            .await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<Entry>> {
        let prefix = prefix.to_string();
        self.run_blocking(move |mirror| mirror.list_prefix_blocking(&prefix))
            .await
    }

    async fn extend_expiry(
        &self,
        prefix: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<usize> {
        let prefix = prefix.to_string();
        self.run_blocking(move |mirror| mirror.extend_expiry_blocking(&prefix, now, expires_at))
            .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.run_blocking(move |mirror| mirror.delete_expired_blocking(now))
            .await
    }
}

/// Fixed-width RFC 3339 so that text comparison in SQL orders by time.
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let key: String = row.get(0)?;
    let site_id: String = row.get(1)?;
    let path: String = row.get(2)?;
    let value: Vec<u8> = row.get(3)?;
    let content_type: String = row.get(4)?;
    let size: i64 = row.get(5)?;
    let expires_at: String = row.get(6)?;
    let ledger_ref: Option<String> = row.get(7)?;
    let written_at: String = row.get(8)?;

    let ledger_ref: Option<DurableRef> = ledger_ref
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    Ok(Entry {
        key,
        site_id,
        path,
        value: Bytes::from(value),
        content_type,
        size: size as u64,
        expires_at: parse_time(&expires_at)?,
        ledger_ref,
        written_at: parse_time(&written_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(site_id: &str, path: &str, body: &'static [u8], expires_at: DateTime<Utc>) -> Entry {
        Entry::new_file(site_id, path, Bytes::from_static(body), expires_at, None)
    }

    #[tokio::test]
    async fn write_then_read_preserves_bytes_and_meta() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mirror = SqliteMirror::open(temp_dir.path().join("mirror.db")).unwrap();

        let mut stored = entry("blog", "index.html", b"<h1>hello</h1>", Utc::now() + Duration::hours(1));
        stored.ledger_ref = Some(DurableRef::confirmed("0xfeed", Some(12)));
        mirror.write(&stored).await.unwrap();

        let read = mirror.read(&stored.key).await.unwrap().unwrap();
        assert_eq!(read.value, stored.value);
        assert_eq!(read.content_type, stored.content_type);
        assert_eq!(read.size, 14);
        assert_eq!(read.ledger_ref, stored.ledger_ref);

        assert!(mirror.read("site/blog/file/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_replaces_existing_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mirror = SqliteMirror::open(temp_dir.path().join("mirror.db")).unwrap();
        let expires_at = Utc::now() + Duration::hours(1);

        mirror.write(&entry("blog", "a.txt", b"first version", expires_at)).await.unwrap();
        mirror.write(&entry("blog", "a.txt", b"second", expires_at)).await.unwrap();

        let read = mirror.read("site/blog/file/a.txt").await.unwrap().unwrap();
        assert_eq!(read.value, Bytes::from_static(b"second"));
        assert_eq!(read.size, 6);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("mirror.db");
        let stored = entry("blog", "index.html", b"persist", Utc::now() + Duration::hours(1));

        {
            let mirror = SqliteMirror::open(&db_path).unwrap();
            mirror.write(&stored).await.unwrap();
        }

        let reopened = SqliteMirror::open(&db_path).unwrap();
        let read = reopened.read(&stored.key).await.unwrap().unwrap();
        assert_eq!(read.value, stored.value);
    }

    #[tokio::test]
    async fn list_prefix_does_not_leak_across_sites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mirror = SqliteMirror::open(temp_dir.path().join("mirror.db")).unwrap();
        let expires_at = Utc::now() + Duration::hours(1);

        mirror.write(&entry("blog", "b.txt", b"b", expires_at)).await.unwrap();
        mirror.write(&entry("blog", "a.txt", b"a", expires_at)).await.unwrap();
        mirror.write(&entry("blog2", "a.txt", b"x", expires_at)).await.unwrap();
        mirror.write(&entry("b%og", "a.txt", b"y", expires_at)).await.unwrap();

        let listed = mirror.list_prefix("site/blog/").await.unwrap();
        let paths: Vec<&str> = listed.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn delete_expired_only_removes_past_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mirror = SqliteMirror::open(temp_dir.path().join("mirror.db")).unwrap();
        let now = Utc::now();

        mirror.write(&entry("old", "index.html", b"old", now - Duration::hours(1))).await.unwrap();
        mirror.write(&entry("new", "index.html", b"new", now + Duration::hours(1))).await.unwrap();

        assert_eq!(mirror.delete_expired(now).await.unwrap(), 1);
        assert!(mirror.read("site/old/file/index.html").await.unwrap().is_none());
        assert!(mirror.read("site/new/file/index.html").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn extend_expiry_touches_live_prefix_entries_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mirror = SqliteMirror::open(temp_dir.path().join("mirror.db")).unwrap();
        let now = Utc::now();
        let soon = now + Duration::hours(1);
        let later = now + Duration::days(10);

        mirror.write(&entry("blog", "index.html", b"a", soon)).await.unwrap();
        mirror.write(&entry("blog", "stale.html", b"s", now - Duration::hours(1))).await.unwrap();
        mirror.write(&entry("other", "index.html", b"b", soon)).await.unwrap();

        assert_eq!(mirror.extend_expiry("site/blog/", now, later).await.unwrap(), 1);
        let read = mirror.read("site/blog/file/index.html").await.unwrap().unwrap();
        assert_eq!(format_time(&read.expires_at), format_time(&later));
        let stale = mirror.read("site/blog/file/stale.html").await.unwrap().unwrap();
        assert!(stale.is_expired_at(now));
        let untouched = mirror.read("site/other/file/index.html").await.unwrap().unwrap();
        assert_eq!(format_time(&untouched.expires_at), format_time(&soon));
    }

    #[test]
    fn rejects_inconsistent_size() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mirror = SqliteMirror::open(temp_dir.path().join("mirror.db")).unwrap();
        let mut bad = entry("blog", "a.txt", b"abc", Utc::now());
        bad.size = 99;
        assert!(matches!(mirror.write_blocking(&bad), Err(VaultError::Internal(_))));
    }
}
