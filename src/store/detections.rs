//! Append-only detection audit log.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::error::Result;
use crate::model::DetectionRecord;

use super::{parse_datetime, Store};

const DETECTION_COLUMNS: &str =
    "id, article_id, detection_type, platform, score, threshold, is_passed, detected_at, diagnostic";

/// A detection result ready to append.
#[derive(Debug, Clone)]
pub struct NewDetection {
    pub article_id: i64,
    pub detection_type: String,
    pub platform: String,
    pub score: f64,
    pub threshold: f64,
    pub is_passed: bool,
    pub diagnostic: Value,
}

impl Store {
    /// Append one detection result. Rows are never mutated afterwards.
    pub fn append_detection(&self, detection: &NewDetection) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO detection_results (
                    article_id, detection_type, platform, score, threshold,
                    is_passed, detected_at, diagnostic
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    detection.article_id,
                    detection.detection_type,
                    detection.platform,
                    detection.score,
                    detection.threshold,
                    detection.is_passed,
                    Utc::now().to_rfc3339(),
                    serde_json::to_string(&detection.diagnostic)?,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent detection for an article, if any.
    pub fn last_detection(&self, article_id: i64) -> Result<Option<DetectionRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {DETECTION_COLUMNS} FROM detection_results
                         WHERE article_id = ?1 ORDER BY id DESC LIMIT 1"
                    ),
                    params![article_id],
                    row_to_detection,
                )
                .optional()?)
        })
    }

    /// Full detection history for an article, oldest first.
    pub fn detections_for(&self, article_id: i64) -> Result<Vec<DetectionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DETECTION_COLUMNS} FROM detection_results
                 WHERE article_id = ?1 ORDER BY id ASC"
            ))?;
            let records = stmt
                .query_map(params![article_id], row_to_detection)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }
}

fn row_to_detection(row: &Row<'_>) -> rusqlite::Result<DetectionRecord> {
    let diagnostic: Option<String> = row.get(8)?;
    Ok(DetectionRecord {
        id: row.get(0)?,
        article_id: row.get(1)?,
        detection_type: row.get(2)?,
        platform: row.get(3)?,
        score: row.get(4)?,
        threshold: row.get(5)?,
        is_passed: row.get(6)?,
        detected_at: parse_datetime(row.get(7)?),
        diagnostic: diagnostic
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArticleDraft;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store_with_article() -> (Store, i64) {
        let store = Store::in_memory().unwrap();
        let id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();
        (store, id)
    }

    fn detection(article_id: i64, score: f64) -> NewDetection {
        NewDetection {
            article_id,
            detection_type: "ai_probability".into(),
            platform: "zhuque".into(),
            score,
            threshold: 25.0,
            is_passed: score < 25.0,
            diagnostic: json!({"profile_id": 1000, "attempt": 1}),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let (store, article_id) = store_with_article();
        store.append_detection(&detection(article_id, 70.0)).unwrap();
        store.append_detection(&detection(article_id, 22.0)).unwrap();

        let all = store.detections_for(article_id).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].score, 70.0);
        assert!(!all[0].is_passed);
        assert_eq!(all[0].diagnostic["profile_id"], json!(1000));

        let last = store.last_detection(article_id).unwrap().unwrap();
        assert_eq!(last.score, 22.0);
        assert!(last.is_passed);
    }

    #[test]
    fn test_no_detections_yet() {
        let (store, article_id) = store_with_article();
        assert!(store.last_detection(article_id).unwrap().is_none());
        assert!(store.detections_for(article_id).unwrap().is_empty());
    }
}
