use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// One deduplicated piece of visual content.
///
/// `id` is the content hash; `original_filename`, `added_at` and
/// `storage_path` are fixed at first ingestion and never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub original_filename: String,
    pub added_at: DateTime<Utc>,
    pub storage_path: String,
    pub processed_count: i64,
}

impl ImageRecord {
    pub fn from_row(row: &Row) -> Result<ImageRecord, rusqlite::Error> {
        Ok(ImageRecord {
            id: row.get(0)?,
            original_filename: row.get(1)?,
            added_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(2)?)
                .map_err(|_| {
                    rusqlite::Error::InvalidColumnType(
                        2,
                        "added_at".to_string(),
                        rusqlite::types::Type::Text,
                    )
                })?
                .with_timezone(&Utc),
            storage_path: row.get(3)?,
            processed_count: row.get(4)?,
        })
    }
}

/// One tag of an image together with its derived confidence.
///
/// `confidence` is computed at query time from the image's pass count; it is
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfidence {
    pub tag: String,
    pub occurrence_count: i64,
    pub confidence: f64,
}
