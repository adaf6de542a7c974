//! Schema creation
//!
//! One canonical schema: `tracks` (unique path), `audio_features` keyed 1:1
//! to a track, `playlists` and `playlist_items`. Child rows cascade on track
//! deletion.

use sqlx::SqliteConnection;

use crate::Result;

/// Bumped whenever a table definition changes
pub const SCHEMA_VERSION: i64 = 1;

/// Tables in foreign-key dependency order (parents first)
pub const TABLES: [&str; 4] = ["tracks", "audio_features", "playlists", "playlist_items"];

pub async fn create_tracks_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            artist TEXT,
            album TEXT,
            duration REAL,
            artist_image TEXT,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            modified_ms INTEGER NOT NULL DEFAULT 0,
            date_added TEXT NOT NULL,
            liked INTEGER NOT NULL DEFAULT 0,
            analysis_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (analysis_status IN ('pending', 'analyzed', 'failed')),
            last_error TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tracks_status_added ON tracks (analysis_status, date_added)",
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// `extracted_at` is NULL while the row holds placeholder values
pub async fn create_audio_features_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audio_features (
            track_id INTEGER PRIMARY KEY
                REFERENCES tracks(id) ON DELETE CASCADE,
            tempo REAL NOT NULL DEFAULT 0,
            musical_key INTEGER NOT NULL DEFAULT 0
                CHECK (musical_key BETWEEN 0 AND 11),
            mode INTEGER NOT NULL DEFAULT 0 CHECK (mode IN (0, 1)),
            time_signature INTEGER NOT NULL DEFAULT 4,
            energy REAL NOT NULL DEFAULT 0,
            danceability REAL NOT NULL DEFAULT 0,
            brightness REAL NOT NULL DEFAULT 0,
            loudness REAL NOT NULL DEFAULT 0,
            noisiness REAL NOT NULL DEFAULT 0,
            spectral_rolloff REAL NOT NULL DEFAULT 0,
            zero_crossing_rate REAL NOT NULL DEFAULT 0,
            timbre TEXT NOT NULL DEFAULT '[]',
            extracted_at TEXT
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn create_playlist_tables(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playlists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS playlist_items (
            playlist_id INTEGER NOT NULL
                REFERENCES playlists(id) ON DELETE CASCADE,
            track_id INTEGER NOT NULL
                REFERENCES tracks(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (playlist_id, position)
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Create every table and stamp the schema version
pub async fn create_schema(conn: &mut SqliteConnection) -> Result<()> {
    create_tracks_table(conn).await?;
    create_audio_features_table(conn).await?;
    create_playlist_tables(conn).await?;

    // PRAGMA does not accept bound parameters
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *conn)
        .await?;

    tracing::debug!(version = SCHEMA_VERSION, "Database schema ready");
    Ok(())
}

/// Schema version stamped on the attached database `schema`
pub async fn read_schema_version(conn: &mut SqliteConnection, schema: &str) -> Result<i64> {
    let version: i64 = sqlx::query_scalar(&format!("PRAGMA {}.user_version", schema))
        .fetch_one(&mut *conn)
        .await?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    #[tokio::test]
    async fn test_create_schema_is_idempotent() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        create_schema(&mut conn).await.unwrap();
        create_schema(&mut conn).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&mut conn)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec!["audio_features", "playlist_items", "playlists", "tracks"]
        );
        assert_eq!(read_schema_version(&mut conn, "main").await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_path_is_unique() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        create_schema(&mut conn).await.unwrap();

        let insert = "INSERT INTO tracks (path, title, date_added, updated_at) VALUES (?, 't', '2024-01-01', '2024-01-01')";
        sqlx::query(insert).bind("/music/a.mp3").execute(&mut conn).await.unwrap();
        let duplicate = sqlx::query(insert).bind("/music/a.mp3").execute(&mut conn).await;
        assert!(duplicate.is_err());
    }
}
