//! Consistency pass
//!
//! Reconciles `analysis_status` with the feature rows actually stored, for
//! databases left behind by an interrupted run or edited out of band:
//! - `analyzed` without extracted features → reset to `pending`
//! - `pending` with extracted features → promoted to `analyzed`
//! - any track without a feature row → placeholder row inserted
//!
//! All corrections of one pass commit together. Each is logged at WARN.

use cadence_common::db::Store;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::fmt;
use thiserror::Error;

use crate::db::{features, tracks};
use crate::error::IngestResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Inconsistency {
    AnalyzedWithoutFeatures,
    PendingWithFeatures,
    MissingFeatureRow,
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::AnalyzedWithoutFeatures => {
                f.write_str("marked analyzed without extracted features")
            }
            Inconsistency::PendingWithFeatures => {
                f.write_str("marked pending with extracted features")
            }
            Inconsistency::MissingFeatureRow => f.write_str("no feature row"),
        }
    }
}

/// One detected (and corrected) inconsistency
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Track {track_id} ({path}) {kind}")]
pub struct InconsistentStateError {
    pub track_id: i64,
    pub path: String,
    pub kind: Inconsistency,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub reset_to_pending: usize,
    pub promoted_to_analyzed: usize,
    pub placeholders_inserted: usize,
    pub corrections: Vec<InconsistentStateError>,
}

impl ReconcileReport {
    fn from_corrections(corrections: Vec<InconsistentStateError>) -> Self {
        let count = |kind: Inconsistency| corrections.iter().filter(|c| c.kind == kind).count();
        Self {
            reset_to_pending: count(Inconsistency::AnalyzedWithoutFeatures),
            promoted_to_analyzed: count(Inconsistency::PendingWithFeatures),
            placeholders_inserted: count(Inconsistency::MissingFeatureRow),
            corrections,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.corrections.is_empty()
    }
}

async fn find(
    conn: &mut SqliteConnection,
    sql: &str,
    kind: Inconsistency,
) -> cadence_common::Result<Vec<InconsistentStateError>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(sql).fetch_all(&mut *conn).await?;
    Ok(rows
        .into_iter()
        .map(|(track_id, path)| InconsistentStateError { track_id, path, kind })
        .collect())
}

async fn correct(conn: &mut SqliteConnection) -> cadence_common::Result<Vec<InconsistentStateError>> {
    let mut corrections = Vec::new();

    let analyzed_without = find(
        conn,
        "SELECT t.id, t.path FROM tracks t \
         LEFT JOIN audio_features f ON f.track_id = t.id \
         WHERE t.analysis_status = 'analyzed' \
           AND (f.track_id IS NULL OR f.extracted_at IS NULL) \
         ORDER BY t.id",
        Inconsistency::AnalyzedWithoutFeatures,
    )
    .await?;
    for issue in &analyzed_without {
        sqlx::query(
            "UPDATE tracks SET analysis_status = 'pending', last_error = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(tracks::timestamp_now())
        .bind(issue.track_id)
        .execute(&mut *conn)
        .await?;
        features::upsert_placeholder(conn, issue.track_id).await?;
    }
    corrections.extend(analyzed_without);

    let pending_with = find(
        conn,
        "SELECT t.id, t.path FROM tracks t \
         JOIN audio_features f ON f.track_id = t.id \
         WHERE t.analysis_status = 'pending' AND f.extracted_at IS NOT NULL \
         ORDER BY t.id",
        Inconsistency::PendingWithFeatures,
    )
    .await?;
    for issue in &pending_with {
        sqlx::query(
            "UPDATE tracks SET analysis_status = 'analyzed', last_error = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(tracks::timestamp_now())
        .bind(issue.track_id)
        .execute(&mut *conn)
        .await?;
    }
    corrections.extend(pending_with);

    let missing_rows = find(
        conn,
        "SELECT t.id, t.path FROM tracks t \
         LEFT JOIN audio_features f ON f.track_id = t.id \
         WHERE f.track_id IS NULL \
         ORDER BY t.id",
        Inconsistency::MissingFeatureRow,
    )
    .await?;
    for issue in &missing_rows {
        features::upsert_placeholder(conn, issue.track_id).await?;
    }
    corrections.extend(missing_rows);

    Ok(corrections)
}

/// Run one consistency pass in a single write transaction
pub async fn reconcile(store: &Store) -> IngestResult<ReconcileReport> {
    let corrections = store
        .write("consistency::reconcile", |conn| Box::pin(correct(conn)))
        .await?;

    for issue in &corrections {
        tracing::warn!(
            track_id = issue.track_id,
            path = %issue.path,
            kind = ?issue.kind,
            "Corrected inconsistent track state: {}",
            issue
        );
    }

    let report = ReconcileReport::from_corrections(corrections);
    if report.is_clean() {
        tracing::debug!("Consistency pass found nothing to correct");
    } else {
        tracing::info!(
            reset_to_pending = report.reset_to_pending,
            promoted_to_analyzed = report.promoted_to_analyzed,
            placeholders_inserted = report.placeholders_inserted,
            "Consistency pass complete"
        );
    }
    Ok(report)
}
