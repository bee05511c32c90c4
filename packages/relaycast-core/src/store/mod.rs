//! Persistent store: queue, history, and usage-record tables.
//!
//! Backed by `sqlx` against SQLite. All write paths are additionally
//! serialized by a store-level [`tokio::sync::Mutex`] — the design calls for
//! a store-level mutex *plus* a database transaction, not a transaction
//! alone, so that `reorder`/`remove`'s read-then-renumber sequence can never
//! interleave with a concurrent `append`.
//!
//! Row types mirror the `SourceItem`/`QueueEntry`/`HistoryEntry`/`UsageRecord`
//! entities; this module is the sole writer of all three tables.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::error::{RelayError, RelayResult};
use crate::utils::now_millis;

/// One entry in the persistent playlist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    pub entry_id: i64,
    pub identifier: String,
    pub title: String,
    pub position: i64,
    pub skip_post_processing: bool,
    pub created_at: i64,
}

/// One row per distinct `SourceItem` ever played.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub identifier: String,
    pub title: String,
    pub channel: String,
    pub thumbnail: String,
    pub play_count: i64,
    pub first_played_at: i64,
    pub last_played_at: i64,
}

/// One append-only row per external-model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub feature: String,
    pub prompt_tokens: Option<i64>,
    pub response_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
    pub audio_duration_seconds: Option<f64>,
    pub identifier: Option<String>,
    pub timestamp: i64,
}

/// Durable store for the queue, history, and usage-record tables.
pub struct PersistentStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl PersistentStore {
    /// Opens (creating if absent) a SQLite database at `path` and runs the
    /// bundled schema migration.
    pub async fn open(path: &str) -> RelayResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store, used by tests and by callers with no durability
    /// requirement (e.g. a dry-run CLI invocation).
    pub async fn open_in_memory() -> RelayResult<Self> {
        Self::open(":memory:").await
    }

    async fn migrate(&self) -> RelayResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                identifier TEXT NOT NULL,
                title TEXT NOT NULL,
                position INTEGER NOT NULL,
                skip_post_processing INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS history (
                identifier TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                channel TEXT NOT NULL,
                thumbnail TEXT NOT NULL,
                play_count INTEGER NOT NULL,
                first_played_at INTEGER NOT NULL,
                last_played_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                feature TEXT NOT NULL,
                prompt_tokens INTEGER,
                response_tokens INTEGER,
                reasoning_tokens INTEGER,
                audio_duration_seconds REAL,
                identifier TEXT,
                timestamp INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Queue ──────────────────────────────────────────────────────────

    /// Appends a new entry at the end of the queue (position = max+1, or 0
    /// if empty).
    pub async fn append(
        &self,
        identifier: &str,
        title: &str,
        skip_post_processing: bool,
    ) -> RelayResult<QueueEntry> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let next_position: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(position) + 1, 0) FROM queue")
            .fetch_one(&mut *tx)
            .await?;
        let created_at = now_millis() as i64;

        let entry_id = sqlx::query(
            "INSERT INTO queue (identifier, title, position, skip_post_processing, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(identifier)
        .bind(title)
        .bind(next_position)
        .bind(skip_post_processing)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        Ok(QueueEntry {
            entry_id,
            identifier: identifier.to_string(),
            title: title.to_string(),
            position: next_position,
            skip_post_processing,
            created_at,
        })
    }

    /// Deletes the row for `entry_id`, then renumbers remaining rows so
    /// positions stay a contiguous `0..N-1` sequence.
    pub async fn remove(&self, entry_id: i64) -> RelayResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM queue WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RelayError::EntryNotFound(entry_id.to_string()));
        }

        renumber(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Atomically rewrites positions according to `ordered_entry_ids`.
    /// Rejects (without modifying anything) if the given set does not equal
    /// the current queue's set of entry ids.
    pub async fn reorder(&self, ordered_entry_ids: &[i64]) -> RelayResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let current: Vec<i64> =
            sqlx::query_scalar("SELECT entry_id FROM queue ORDER BY position ASC")
                .fetch_all(&mut *tx)
                .await?;

        let current_set: HashSet<i64> = current.iter().copied().collect();
        let requested_set: HashSet<i64> = ordered_entry_ids.iter().copied().collect();
        if current_set != requested_set || current.len() != ordered_entry_ids.len() {
            tx.rollback().await?;
            return Err(RelayError::ReorderSetMismatch);
        }

        for (position, entry_id) in ordered_entry_ids.iter().enumerate() {
            sqlx::query("UPDATE queue SET position = ? WHERE entry_id = ?")
                .bind(position as i64)
                .bind(entry_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Removes and returns the entry at position 0, renumbering the rest.
    /// Returns `None` if the queue is empty.
    pub async fn pop_current(&self) -> RelayResult<Option<QueueEntry>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let current = fetch_entry_at_position(&mut tx, 0).await?;
        let Some(entry) = current else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM queue WHERE entry_id = ?")
            .bind(entry.entry_id)
            .execute(&mut *tx)
            .await?;
        renumber(&mut tx).await?;

        tx.commit().await?;
        Ok(Some(entry))
    }

    /// Returns the entry at position 1 (the entry that would become current
    /// after the next `pop_current`), if any.
    pub async fn peek_next(&self) -> RelayResult<Option<QueueEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entry_at_position(&mut conn, 1).await
    }

    /// Returns every entry, ordered by position ascending.
    pub async fn list_queue(&self) -> RelayResult<Vec<QueueEntry>> {
        let rows = sqlx::query(
            "SELECT entry_id, identifier, title, position, skip_post_processing, created_at
             FROM queue ORDER BY position ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_queue_entry).collect())
    }

    /// Deletes every row in the queue.
    pub async fn clear_queue(&self) -> RelayResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM queue").execute(&self.pool).await?;
        Ok(())
    }

    // ── History ────────────────────────────────────────────────────────

    /// Upserts a history row: increments `play_count` and bumps
    /// `last_played_at` if the identifier is already known; otherwise
    /// inserts a fresh row with `play_count = 1` and
    /// `first_played_at == last_played_at`.
    pub async fn record_play(
        &self,
        identifier: &str,
        title: &str,
        channel: &str,
        thumbnail: &str,
    ) -> RelayResult<HistoryEntry> {
        let _guard = self.write_lock.lock().await;
        let now = now_millis() as i64;

        sqlx::query(
            "INSERT INTO history (identifier, title, channel, thumbnail, play_count, first_played_at, last_played_at)
             VALUES (?, ?, ?, ?, 1, ?, ?)
             ON CONFLICT(identifier) DO UPDATE SET
                title = excluded.title,
                channel = excluded.channel,
                thumbnail = excluded.thumbnail,
                play_count = play_count + 1,
                last_played_at = excluded.last_played_at",
        )
        .bind(identifier)
        .bind(title)
        .bind(channel)
        .bind(thumbnail)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT identifier, title, channel, thumbnail, play_count, first_played_at, last_played_at
             FROM history WHERE identifier = ?",
        )
        .bind(identifier)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_history_entry(&row))
    }

    /// Returns the `limit` most recently played entries, newest first.
    pub async fn recent(&self, limit: i64) -> RelayResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT identifier, title, channel, thumbnail, play_count, first_played_at, last_played_at
             FROM history ORDER BY last_played_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_history_entry).collect())
    }

    /// Deletes every row in the history table.
    pub async fn clear_history(&self) -> RelayResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM history").execute(&self.pool).await?;
        Ok(())
    }

    // ── Usage records ──────────────────────────────────────────────────

    /// Appends a usage-record row. Never updates or deletes existing rows.
    pub async fn record_usage(&self, record: &UsageRecord) -> RelayResult<()> {
        sqlx::query(
            "INSERT INTO usage_records
                (provider, model, feature, prompt_tokens, response_tokens, reasoning_tokens,
                 audio_duration_seconds, identifier, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.provider)
        .bind(&record.model)
        .bind(&record.feature)
        .bind(record.prompt_tokens)
        .bind(record.response_tokens)
        .bind(record.reasoning_tokens)
        .bind(record.audio_duration_seconds)
        .bind(&record.identifier)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn renumber(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> RelayResult<()> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT entry_id FROM queue ORDER BY position ASC")
        .fetch_all(&mut **tx)
        .await?;
    for (position, entry_id) in ids.iter().enumerate() {
        sqlx::query("UPDATE queue SET position = ? WHERE entry_id = ?")
            .bind(position as i64)
            .bind(entry_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn fetch_entry_at_position<'c, E>(executor: E, position: i64) -> RelayResult<Option<QueueEntry>>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let row = sqlx::query(
        "SELECT entry_id, identifier, title, position, skip_post_processing, created_at
         FROM queue WHERE position = ?",
    )
    .bind(position)
    .fetch_optional(executor)
    .await?;
    Ok(row.as_ref().map(row_to_queue_entry))
}

fn row_to_queue_entry(row: &sqlx::sqlite::SqliteRow) -> QueueEntry {
    QueueEntry {
        entry_id: row.get("entry_id"),
        identifier: row.get("identifier"),
        title: row.get("title"),
        position: row.get("position"),
        skip_post_processing: row.get("skip_post_processing"),
        created_at: row.get("created_at"),
    }
}

fn row_to_history_entry(row: &sqlx::sqlite::SqliteRow) -> HistoryEntry {
    HistoryEntry {
        identifier: row.get("identifier"),
        title: row.get("title"),
        channel: row.get("channel"),
        thumbnail: row.get("thumbnail"),
        play_count: row.get("play_count"),
        first_played_at: row.get("first_played_at"),
        last_played_at: row.get("last_played_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> PersistentStore {
        PersistentStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn append_assigns_dense_positions() {
        let store = store().await;
        let a = store.append("aaaaaaaaaaa", "A", false).await.unwrap();
        let b = store.append("bbbbbbbbbbb", "B", false).await.unwrap();
        let c = store.append("ccccccccccc", "C", false).await.unwrap();
        assert_eq!((a.position, b.position, c.position), (0, 1, 2));
    }

    #[tokio::test]
    async fn remove_renumbers_remaining_rows() {
        let store = store().await;
        let a = store.append("aaaaaaaaaaa", "A", false).await.unwrap();
        let _b = store.append("bbbbbbbbbbb", "B", false).await.unwrap();
        let c = store.append("ccccccccccc", "C", false).await.unwrap();

        store.remove(a.entry_id).await.unwrap();

        let positions: Vec<i64> = store
            .list_queue()
            .await
            .unwrap()
            .iter()
            .map(|e| e.position)
            .collect();
        assert_eq!(positions, vec![0, 1]);

        let entries = store.list_queue().await.unwrap();
        assert_eq!(entries[1].entry_id, c.entry_id);
    }

    #[tokio::test]
    async fn reorder_rewrites_positions_per_given_order() {
        let store = store().await;
        let a = store.append("aaaaaaaaaaa", "A", false).await.unwrap();
        let b = store.append("bbbbbbbbbbb", "B", false).await.unwrap();
        let c = store.append("ccccccccccc", "C", false).await.unwrap();

        store
            .reorder(&[c.entry_id, a.entry_id, b.entry_id])
            .await
            .unwrap();

        let entries = store.list_queue().await.unwrap();
        let ids: Vec<i64> = entries.iter().map(|e| e.entry_id).collect();
        assert_eq!(ids, vec![c.entry_id, a.entry_id, b.entry_id]);
        assert_eq!(entries[0].position, 0);
        assert_eq!(entries[1].position, 1);
        assert_eq!(entries[2].position, 2);
    }

    #[tokio::test]
    async fn reorder_rejects_set_mismatch() {
        let store = store().await;
        let a = store.append("aaaaaaaaaaa", "A", false).await.unwrap();
        let _b = store.append("bbbbbbbbbbb", "B", false).await.unwrap();

        let result = store.reorder(&[a.entry_id, 999]).await;
        assert!(matches!(result, Err(RelayError::ReorderSetMismatch)));

        // Queue must be unchanged.
        assert_eq!(store.list_queue().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pop_current_returns_position_zero_and_renumbers() {
        let store = store().await;
        let a = store.append("aaaaaaaaaaa", "A", false).await.unwrap();
        let b = store.append("bbbbbbbbbbb", "B", false).await.unwrap();

        let popped = store.pop_current().await.unwrap().unwrap();
        assert_eq!(popped.entry_id, a.entry_id);

        let remaining = store.list_queue().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].entry_id, b.entry_id);
        assert_eq!(remaining[0].position, 0);
    }

    #[tokio::test]
    async fn pop_current_on_empty_queue_returns_none() {
        let store = store().await;
        assert_eq!(store.pop_current().await.unwrap(), None);
    }

    #[tokio::test]
    async fn peek_next_returns_second_entry() {
        let store = store().await;
        let _a = store.append("aaaaaaaaaaa", "A", false).await.unwrap();
        let b = store.append("bbbbbbbbbbb", "B", false).await.unwrap();

        let peeked = store.peek_next().await.unwrap().unwrap();
        assert_eq!(peeked.entry_id, b.entry_id);
    }

    #[tokio::test]
    async fn record_play_twice_yields_one_row_with_count_two() {
        let store = store().await;
        store
            .record_play("aaaaaaaaaaa", "A", "chan", "thumb")
            .await
            .unwrap();
        let second = store
            .record_play("aaaaaaaaaaa", "A", "chan", "thumb")
            .await
            .unwrap();

        assert_eq!(second.play_count, 2);
        assert_eq!(store.recent(10).await.unwrap().len(), 1);
        assert!(second.last_played_at >= second.first_played_at);
    }

    #[tokio::test]
    async fn recent_orders_by_last_played_descending() {
        let store = store().await;
        store
            .record_play("aaaaaaaaaaa", "A", "c", "t")
            .await
            .unwrap();
        store
            .record_play("bbbbbbbbbbb", "B", "c", "t")
            .await
            .unwrap();

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent[0].identifier, "bbbbbbbbbbb");
    }

    #[tokio::test]
    async fn clear_queue_and_history_remove_all_rows() {
        let store = store().await;
        store.append("aaaaaaaaaaa", "A", false).await.unwrap();
        store
            .record_play("aaaaaaaaaaa", "A", "c", "t")
            .await
            .unwrap();

        store.clear_queue().await.unwrap();
        store.clear_history().await.unwrap();

        assert!(store.list_queue().await.unwrap().is_empty());
        assert!(store.recent(10).await.unwrap().is_empty());
    }
}
