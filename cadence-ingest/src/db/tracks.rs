//! Track table operations
//!
//! Functions take a plain connection so callers decide the transaction
//! boundary (usually [`cadence_common::db::Store::write`]).

use cadence_common::models::{AnalysisStatus, FileStamp, Track, TrackMetadata};
use cadence_common::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::{HashMap, HashSet};

use super::features;

/// Keeps each IN (...) list below SQLite's bound-parameter limit
const LOOKUP_CHUNK: usize = 500;

const TRACK_COLUMNS: &str = "id, path, title, artist, album, duration, artist_image, \
     size_bytes, modified_ms, date_added, liked, analysis_status, last_error";

/// Fixed-width UTC timestamp, so text order matches time order
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

fn track_from_row(row: &SqliteRow) -> Result<Track> {
    let status: String = row.try_get("analysis_status")?;
    let date_added: String = row.try_get("date_added")?;

    Ok(Track {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        album: row.try_get("album")?,
        duration: row.try_get("duration")?,
        artist_image: row.try_get("artist_image")?,
        size_bytes: row.try_get("size_bytes")?,
        modified_ms: row.try_get("modified_ms")?,
        date_added: parse_timestamp(&date_added)?,
        liked: row.try_get("liked")?,
        analysis_status: status.parse()?,
        last_error: row.try_get("last_error")?,
    })
}

/// Result of [`insert_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackWrite {
    pub id: i64,
    /// False when an existing row for the path was refreshed
    pub inserted: bool,
}

pub async fn get_or_none(conn: &mut SqliteConnection, path: &str) -> Result<Option<Track>> {
    let sql = format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE path = ?");
    let row = sqlx::query(&sql).bind(path).fetch_optional(&mut *conn).await?;
    row.as_ref().map(track_from_row).transpose()
}

pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Track>> {
    let sql = format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(track_from_row).transpose()
}

/// Stored file stamps for whichever of `paths` already have a track row.
///
/// One query per chunk of paths, never one per file.
pub async fn batch_lookup(
    conn: &mut SqliteConnection,
    paths: &[String],
) -> Result<HashMap<String, FileStamp>> {
    let mut found = HashMap::with_capacity(paths.len());

    for chunk in paths.chunks(LOOKUP_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT path, size_bytes, modified_ms FROM tracks WHERE path IN (");
        let mut separated = builder.separated(", ");
        for path in chunk {
            separated.push_bind(path.as_str());
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&mut *conn).await?;
        for row in rows {
            let path: String = row.try_get("path")?;
            let stamp = FileStamp {
                size_bytes: row.try_get("size_bytes")?,
                modified_ms: row.try_get("modified_ms")?,
            };
            found.insert(path, stamp);
        }
    }

    Ok(found)
}

/// Subset of `paths` that already have a track row
pub async fn batch_exists(conn: &mut SqliteConnection, paths: &[String]) -> Result<HashSet<String>> {
    Ok(batch_lookup(conn, paths).await?.into_keys().collect())
}

/// Insert a newly discovered track, or refresh the row for a changed file.
///
/// Either way the track ends up `pending` with a placeholder feature row,
/// so call this inside a transaction.
pub async fn insert_or_update(
    conn: &mut SqliteConnection,
    metadata: &TrackMetadata,
) -> Result<TrackWrite> {
    let now = timestamp_now();
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM tracks WHERE path = ?")
        .bind(&metadata.path)
        .fetch_optional(&mut *conn)
        .await?;

    let write = match existing {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE tracks
                SET title = ?, artist = ?, album = ?, duration = ?, artist_image = ?,
                    size_bytes = ?, modified_ms = ?,
                    analysis_status = 'pending', last_error = NULL, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&metadata.title)
            .bind(&metadata.artist)
            .bind(&metadata.album)
            .bind(metadata.duration)
            .bind(&metadata.artist_image)
            .bind(metadata.stamp.size_bytes)
            .bind(metadata.stamp.modified_ms)
            .bind(&now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            TrackWrite { id, inserted: false }
        }
        None => {
            let result = sqlx::query(
                r#"
                INSERT INTO tracks (
                    path, title, artist, album, duration, artist_image,
                    size_bytes, modified_ms, date_added, liked, analysis_status, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 'pending', ?)
                "#,
            )
            .bind(&metadata.path)
            .bind(&metadata.title)
            .bind(&metadata.artist)
            .bind(&metadata.album)
            .bind(metadata.duration)
            .bind(&metadata.artist_image)
            .bind(metadata.stamp.size_bytes)
            .bind(metadata.stamp.modified_ms)
            .bind(&now)
            .bind(&now)
            .execute(&mut *conn)
            .await?;
            TrackWrite {
                id: result.last_insert_rowid(),
                inserted: true,
            }
        }
    };

    features::upsert_placeholder(conn, write.id).await?;
    Ok(write)
}

/// Pending tracks, most recently added first
pub async fn pending(conn: &mut SqliteConnection, limit: Option<usize>) -> Result<Vec<Track>> {
    // SQLite treats a negative LIMIT as "no limit"
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let sql = format!(
        "SELECT {TRACK_COLUMNS} FROM tracks WHERE analysis_status = 'pending' \
         ORDER BY date_added DESC, id DESC LIMIT ?"
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(&mut *conn).await?;
    rows.iter().map(track_from_row).collect()
}

/// Most recently added tracks regardless of status
pub async fn recent(conn: &mut SqliteConnection, limit: usize) -> Result<Vec<Track>> {
    let sql = format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY date_added DESC, id DESC LIMIT ?");
    let rows = sqlx::query(&sql)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(track_from_row).collect()
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: AnalysisStatus,
    last_error: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE tracks SET analysis_status = ?, last_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(last_error)
    .bind(timestamp_now())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Track {}", id)));
    }
    Ok(())
}

/// Reset every track to `pending` with placeholder features.
/// Returns the number of tracks reset.
pub async fn reset_all_pending(conn: &mut SqliteConnection) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tracks SET analysis_status = 'pending', last_error = NULL, updated_at = ?",
    )
    .bind(timestamp_now())
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM audio_features")
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO audio_features (track_id) SELECT id FROM tracks")
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

pub async fn set_liked(conn: &mut SqliteConnection, id: i64, liked: bool) -> Result<()> {
    let result = sqlx::query("UPDATE tracks SET liked = ?, updated_at = ? WHERE id = ?")
        .bind(liked)
        .bind(timestamp_now())
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Track {}", id)));
    }
    Ok(())
}

/// Delete a track; its feature row and playlist memberships cascade.
/// Returns false if no such track existed.
pub async fn delete_track(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tracks WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Track counts per analysis status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub analyzed: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.analyzed + self.failed
    }
}

pub async fn count_by_status(conn: &mut SqliteConnection) -> Result<StatusCounts> {
    let rows = sqlx::query("SELECT analysis_status, COUNT(*) AS n FROM tracks GROUP BY analysis_status")
        .fetch_all(&mut *conn)
        .await?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.try_get("analysis_status")?;
        let n: i64 = row.try_get("n")?;
        match status.parse::<AnalysisStatus>()? {
            AnalysisStatus::Pending => counts.pending = n,
            AnalysisStatus::Analyzed => counts.analyzed = n,
            AnalysisStatus::Failed => counts.failed = n,
        }
    }
    Ok(counts)
}
