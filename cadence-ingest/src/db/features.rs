//! Feature row operations
//!
//! `extracted_at IS NULL` marks a placeholder row written at discovery time.

use cadence_common::models::FeatureVector;
use cadence_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::tracks::timestamp_now;

const FEATURE_COLUMNS: &str = "tempo, musical_key, mode, time_signature, energy, danceability, \
     brightness, loudness, noisiness, spectral_rolloff, zero_crossing_rate, timbre, extracted_at";

/// A feature row as stored
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFeatures {
    pub vector: FeatureVector,
    /// False while the row still holds placeholder values
    pub extracted: bool,
}

fn vector_from_row(row: &SqliteRow) -> Result<FeatureVector> {
    let timbre_json: String = row.try_get("timbre")?;
    let timbre: Vec<f64> = serde_json::from_str(&timbre_json)
        .map_err(|e| Error::Internal(format!("Corrupt timbre column: {}", e)))?;
    let key: i64 = row.try_get("musical_key")?;
    let mode: i64 = row.try_get("mode")?;
    let time_signature: i64 = row.try_get("time_signature")?;

    Ok(FeatureVector {
        tempo: row.try_get("tempo")?,
        key: key as u8,
        mode: mode as u8,
        time_signature: time_signature as u8,
        energy: row.try_get("energy")?,
        danceability: row.try_get("danceability")?,
        brightness: row.try_get("brightness")?,
        loudness: row.try_get("loudness")?,
        noisiness: row.try_get("noisiness")?,
        spectral_rolloff: row.try_get("spectral_rolloff")?,
        zero_crossing_rate: row.try_get("zero_crossing_rate")?,
        timbre,
    })
}

async fn write_row(
    conn: &mut SqliteConnection,
    track_id: i64,
    vector: &FeatureVector,
    extracted_at: Option<String>,
) -> Result<()> {
    let timbre = serde_json::to_string(&vector.timbre)
        .map_err(|e| Error::Internal(format!("Timbre serialization failed: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO audio_features (
            track_id, tempo, musical_key, mode, time_signature, energy, danceability,
            brightness, loudness, noisiness, spectral_rolloff, zero_crossing_rate,
            timbre, extracted_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(track_id) DO UPDATE SET
            tempo = excluded.tempo,
            musical_key = excluded.musical_key,
            mode = excluded.mode,
            time_signature = excluded.time_signature,
            energy = excluded.energy,
            danceability = excluded.danceability,
            brightness = excluded.brightness,
            loudness = excluded.loudness,
            noisiness = excluded.noisiness,
            spectral_rolloff = excluded.spectral_rolloff,
            zero_crossing_rate = excluded.zero_crossing_rate,
            timbre = excluded.timbre,
            extracted_at = excluded.extracted_at
        "#,
    )
    .bind(track_id)
    .bind(vector.tempo)
    .bind(vector.key as i64)
    .bind(vector.mode as i64)
    .bind(vector.time_signature as i64)
    .bind(vector.energy)
    .bind(vector.danceability)
    .bind(vector.brightness)
    .bind(vector.loudness)
    .bind(vector.noisiness)
    .bind(vector.spectral_rolloff)
    .bind(vector.zero_crossing_rate)
    .bind(timbre)
    .bind(extracted_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Store extracted features for a track
pub async fn upsert(conn: &mut SqliteConnection, track_id: i64, vector: &FeatureVector) -> Result<()> {
    write_row(conn, track_id, vector, Some(timestamp_now())).await
}

/// Write (or reset to) the placeholder row
pub async fn upsert_placeholder(conn: &mut SqliteConnection, track_id: i64) -> Result<()> {
    write_row(conn, track_id, &FeatureVector::placeholder(), None).await
}

pub async fn load(conn: &mut SqliteConnection, track_id: i64) -> Result<Option<StoredFeatures>> {
    let sql = format!("SELECT {FEATURE_COLUMNS} FROM audio_features WHERE track_id = ?");
    let row = sqlx::query(&sql)
        .bind(track_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let extracted_at: Option<String> = row.try_get("extracted_at")?;
            Ok(Some(StoredFeatures {
                vector: vector_from_row(&row)?,
                extracted: extracted_at.is_some(),
            }))
        }
        None => Ok(None),
    }
}

/// Extracted features of every analyzed track, in track id order
pub async fn analyzed_candidates(conn: &mut SqliteConnection) -> Result<Vec<(i64, FeatureVector)>> {
    let sql = format!(
        "SELECT f.track_id, {} FROM audio_features f \
         JOIN tracks t ON t.id = f.track_id \
         WHERE t.analysis_status = 'analyzed' AND f.extracted_at IS NOT NULL \
         ORDER BY f.track_id",
        FEATURE_COLUMNS
            .split(", ")
            .map(|column| format!("f.{column}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| -> Result<(i64, FeatureVector)> {
            Ok((row.try_get("track_id")?, vector_from_row(row)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_common::db::init::create_schema;
    use sqlx::Connection;

    async fn conn_with_track() -> (SqliteConnection, i64) {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        create_schema(&mut conn).await.unwrap();
        let id = sqlx::query(
            "INSERT INTO tracks (path, title, date_added, updated_at, analysis_status) \
             VALUES ('/a.wav', 'a', 'x', 'x', 'analyzed')",
        )
        .execute(&mut conn)
        .await
        .unwrap()
        .last_insert_rowid();
        (conn, id)
    }

    #[tokio::test]
    async fn test_upsert_overwrites_placeholder() {
        let (mut conn, id) = conn_with_track().await;
        upsert_placeholder(&mut conn, id).await.unwrap();
        let placeholder = load(&mut conn, id).await.unwrap().unwrap();
        assert!(!placeholder.extracted);

        let vector = FeatureVector {
            tempo: 121.5,
            key: 9,
            mode: 0,
            time_signature: 3,
            energy: 0.4,
            danceability: 0.7,
            brightness: 0.2,
            loudness: 0.6,
            noisiness: 0.1,
            spectral_rolloff: 0.3,
            zero_crossing_rate: 0.1,
            timbre: vec![1.0, -2.5, 0.25],
        };
        upsert(&mut conn, id, &vector).await.unwrap();

        let stored = load(&mut conn, id).await.unwrap().unwrap();
        assert!(stored.extracted);
        assert_eq!(stored.vector, vector);

        let candidates = analyzed_candidates(&mut conn).await.unwrap();
        assert_eq!(candidates, vec![(id, vector)]);
    }

    #[tokio::test]
    async fn test_placeholder_rows_are_not_candidates() {
        let (mut conn, id) = conn_with_track().await;
        upsert_placeholder(&mut conn, id).await.unwrap();
        assert!(analyzed_candidates(&mut conn).await.unwrap().is_empty());
    }
}
