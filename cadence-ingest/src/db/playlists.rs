//! Playlist persistence

use cadence_common::models::{Playlist, PlaylistItem};
use cadence_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use super::tracks::timestamp_now;

/// Create a playlist whose items follow `track_ids` order (positions from 0).
/// Call inside a transaction.
pub async fn create(conn: &mut SqliteConnection, name: &str, track_ids: &[i64]) -> Result<i64> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("Playlist name is empty".to_string()));
    }

    let playlist_id = sqlx::query("INSERT INTO playlists (name, created_at) VALUES (?, ?)")
        .bind(name)
        .bind(timestamp_now())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    for (position, track_id) in track_ids.iter().enumerate() {
        sqlx::query("INSERT INTO playlist_items (playlist_id, track_id, position) VALUES (?, ?, ?)")
            .bind(playlist_id)
            .bind(track_id)
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
    }

    tracing::debug!(playlist_id, name, items = track_ids.len(), "Playlist created");
    Ok(playlist_id)
}

pub async fn load(conn: &mut SqliteConnection, playlist_id: i64) -> Result<Option<Playlist>> {
    let header = sqlx::query("SELECT id, name, created_at FROM playlists WHERE id = ?")
        .bind(playlist_id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(header) = header else {
        return Ok(None);
    };

    let created_at: String = header.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Invalid playlist timestamp: {}", e)))?
        .with_timezone(&Utc);

    let items = sqlx::query(
        "SELECT track_id, position FROM playlist_items WHERE playlist_id = ? ORDER BY position",
    )
    .bind(playlist_id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| -> Result<PlaylistItem> {
        Ok(PlaylistItem {
            track_id: row.try_get("track_id")?,
            position: row.try_get("position")?,
        })
    })
    .collect::<Result<Vec<_>>>()?;

    Ok(Some(Playlist {
        id: header.try_get("id")?,
        name: header.try_get("name")?,
        created_at,
        items,
    }))
}

/// Returns false if no such playlist existed
pub async fn delete(conn: &mut SqliteConnection, playlist_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM playlists WHERE id = ?")
        .bind(playlist_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_common::db::init::create_schema;
    use sqlx::Connection;

    #[tokio::test]
    async fn test_create_and_load_preserves_order() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::query("PRAGMA foreign_keys = ON").execute(&mut conn).await.unwrap();
        create_schema(&mut conn).await.unwrap();
        for path in ["/a.wav", "/b.wav", "/c.wav"] {
            sqlx::query("INSERT INTO tracks (path, title, date_added, updated_at) VALUES (?, 't', 'x', 'x')")
                .bind(path)
                .execute(&mut conn)
                .await
                .unwrap();
        }

        let id = create(&mut conn, "Morning", &[3, 1, 2]).await.unwrap();
        let playlist = load(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(playlist.name, "Morning");
        let order: Vec<i64> = playlist.items.iter().map(|i| i.track_id).collect();
        assert_eq!(order, vec![3, 1, 2]);

        // Deleting a track drops its membership
        sqlx::query("DELETE FROM tracks WHERE id = 1").execute(&mut conn).await.unwrap();
        let playlist = load(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(playlist.items.len(), 2);

        assert!(delete(&mut conn, id).await.unwrap());
        assert!(load(&mut conn, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        create_schema(&mut conn).await.unwrap();
        assert!(matches!(
            create(&mut conn, "  ", &[]).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
