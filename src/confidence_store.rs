use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::db_pool::DbPool;
use crate::db_types::{ImageRecord, TagConfidence};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown image: {0}")]
    UnknownImage(String),
    #[error("no completed passes for image: {0}")]
    NoData(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Create the image row if absent; return the existing row untouched if the
/// content was seen before. First write wins on filename, timestamp and path.
pub fn upsert_image(
    pool: &DbPool,
    id: &str,
    original_filename: &str,
    storage_path: &str,
    now: DateTime<Utc>,
) -> StoreResult<ImageRecord> {
    let conn = pool.get()?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO images (id, original_filename, added_at, storage_path, processed_count)
         VALUES (?1, ?2, ?3, ?4, 0)",
        params![id, original_filename, now.to_rfc3339(), storage_path],
    )?;

    if inserted > 0 {
        debug!("registered new image {} ({})", id, original_filename);
    } else {
        debug!("image {} already known, keeping first-seen metadata", id);
    }

    let record = conn.query_row(
        "SELECT id, original_filename, added_at, storage_path, processed_count
         FROM images WHERE id = ?1",
        params![id],
        ImageRecord::from_row,
    )?;

    Ok(record)
}

/// Commit one completed analysis pass for an image.
///
/// Runs as a single IMMEDIATE transaction: the pass counter and every tag
/// counter move together or not at all, and concurrent writers for the same
/// image are serialized by SQLite's write lock.
pub fn record_pass(pool: &DbPool, image_id: &str, tags: &BTreeSet<String>) -> StoreResult<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let updated = tx.execute(
        "UPDATE images SET processed_count = processed_count + 1 WHERE id = ?1",
        params![image_id],
    )?;
    if updated == 0 {
        // Rolls back on drop.
        return Err(StoreError::UnknownImage(image_id.to_string()));
    }

    for tag in tags {
        tx.execute(
            "INSERT INTO image_tags (image_id, tag, occurrence_count) VALUES (?1, ?2, 1)
             ON CONFLICT(image_id, tag) DO UPDATE SET occurrence_count = occurrence_count + 1",
            params![image_id, tag],
        )?;
    }

    tx.commit()?;
    debug!("recorded pass for {} with {} tags", image_id, tags.len());
    Ok(())
}

/// Confidence of one tag for one image: occurrence_count / processed_count.
pub fn confidence(pool: &DbPool, image_id: &str, tag: &str) -> StoreResult<f64> {
    let conn = pool.get()?;

    let processed: Option<i64> = conn
        .query_row(
            "SELECT processed_count FROM images WHERE id = ?1",
            params![image_id],
            |row| row.get(0),
        )
        .optional()?;

    let processed = match processed {
        None | Some(0) => return Err(StoreError::NoData(image_id.to_string())),
        Some(n) => n,
    };

    let occurrences: i64 = conn
        .query_row(
            "SELECT occurrence_count FROM image_tags WHERE image_id = ?1 AND tag = ?2",
            params![image_id, tag],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(occurrences as f64 / processed as f64)
}

/// Every tag of the image whose confidence is at or above `threshold`,
/// ordered by confidence descending, then tag name for a stable tie-break.
pub fn tags_above(pool: &DbPool, image_id: &str, threshold: f64) -> StoreResult<Vec<TagConfidence>> {
    let conn = pool.get()?;

    let processed: Option<i64> = conn
        .query_row(
            "SELECT processed_count FROM images WHERE id = ?1",
            params![image_id],
            |row| row.get(0),
        )
        .optional()?;

    let processed = match processed {
        None | Some(0) => return Err(StoreError::NoData(image_id.to_string())),
        Some(n) => n,
    };

    let mut stmt = conn.prepare(
        "SELECT tag, occurrence_count FROM image_tags
         WHERE image_id = ?1
         ORDER BY occurrence_count DESC, tag ASC",
    )?;

    let rows = stmt.query_map(params![image_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut result = Vec::new();
    for row in rows {
        let (tag, occurrence_count) = row?;
        let confidence = occurrence_count as f64 / processed as f64;
        if confidence >= threshold {
            result.push(TagConfidence {
                tag,
                occurrence_count,
                confidence,
            });
        }
    }

    Ok(result)
}

pub fn find_image(pool: &DbPool, image_id: &str) -> StoreResult<Option<ImageRecord>> {
    let conn = pool.get()?;
    let record = conn
        .query_row(
            "SELECT id, original_filename, added_at, storage_path, processed_count
             FROM images WHERE id = ?1",
            params![image_id],
            ImageRecord::from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn list_images(pool: &DbPool) -> StoreResult<Vec<ImageRecord>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, original_filename, added_at, storage_path, processed_count
         FROM images ORDER BY added_at ASC, id ASC",
    )?;

    let rows = stmt.query_map([], ImageRecord::from_row)?;

    let mut images = Vec::new();
    for row in rows {
        images.push(row?);
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_pool::create_in_memory_pool;

    fn tag_set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    fn seed_image(pool: &DbPool, id: &str) -> ImageRecord {
        upsert_image(pool, id, "test.jpg", "/data/images/test.png", Utc::now()).unwrap()
    }

    #[test]
    fn upsert_is_idempotent_and_first_write_wins() {
        let pool = create_in_memory_pool().unwrap();
        let first = upsert_image(&pool, "h1", "a.jpg", "/s/h1.png", Utc::now()).unwrap();
        let second = upsert_image(&pool, "h1", "b.jpg", "/other/h1.png", Utc::now()).unwrap();

        assert_eq!(second.original_filename, "a.jpg");
        assert_eq!(second.storage_path, "/s/h1.png");
        assert_eq!(second.added_at, first.added_at);
        assert_eq!(list_images(&pool).unwrap().len(), 1);
    }

    #[test]
    fn record_pass_increments_counters_together() {
        let pool = create_in_memory_pool().unwrap();
        seed_image(&pool, "h1");

        record_pass(&pool, "h1", &tag_set(&["Cat", "Hat"])).unwrap();
        record_pass(&pool, "h1", &tag_set(&["Cat"])).unwrap();

        let image = find_image(&pool, "h1").unwrap().unwrap();
        assert_eq!(image.processed_count, 2);
        assert_eq!(confidence(&pool, "h1", "Cat").unwrap(), 1.0);
        assert_eq!(confidence(&pool, "h1", "Hat").unwrap(), 0.5);
    }

    #[test]
    fn record_pass_for_unknown_image_changes_nothing() {
        let pool = create_in_memory_pool().unwrap();
        let err = record_pass(&pool, "missing", &tag_set(&["Cat"])).unwrap_err();
        assert!(matches!(err, StoreError::UnknownImage(_)));

        let conn = pool.get().unwrap();
        let tag_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM image_tags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tag_rows, 0);
    }

    #[test]
    fn confidence_requires_completed_passes() {
        let pool = create_in_memory_pool().unwrap();
        seed_image(&pool, "h1");

        assert!(matches!(
            confidence(&pool, "h1", "Cat").unwrap_err(),
            StoreError::NoData(_)
        ));
        assert!(matches!(
            confidence(&pool, "nope", "Cat").unwrap_err(),
            StoreError::NoData(_)
        ));
    }

    #[test]
    fn confidence_of_unseen_tag_is_zero() {
        let pool = create_in_memory_pool().unwrap();
        seed_image(&pool, "h1");
        record_pass(&pool, "h1", &tag_set(&["Cat"])).unwrap();

        assert_eq!(confidence(&pool, "h1", "Unicorn").unwrap(), 0.0);
    }

    #[test]
    fn tags_above_threshold_is_inclusive_and_sorted() {
        let pool = create_in_memory_pool().unwrap();
        seed_image(&pool, "h1");

        // Cat: 3/4, Hat: 2/4, Rat: 1/4
        record_pass(&pool, "h1", &tag_set(&["Cat", "Hat", "Rat"])).unwrap();
        record_pass(&pool, "h1", &tag_set(&["Cat", "Hat"])).unwrap();
        record_pass(&pool, "h1", &tag_set(&["Cat"])).unwrap();
        record_pass(&pool, "h1", &tag_set(&[])).unwrap();

        let result = tags_above(&pool, "h1", 0.5).unwrap();
        let names: Vec<&str> = result.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["Cat", "Hat"]);
        assert_eq!(result[0].confidence, 0.75);
        assert_eq!(result[1].confidence, 0.5);

        let all = tags_above(&pool, "h1", 0.0).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn occurrence_never_exceeds_processed() {
        let pool = create_in_memory_pool().unwrap();
        seed_image(&pool, "h1");

        for _ in 0..5 {
            record_pass(&pool, "h1", &tag_set(&["Cat"])).unwrap();
        }

        let image = find_image(&pool, "h1").unwrap().unwrap();
        let tags = tags_above(&pool, "h1", 0.0).unwrap();
        for tag in tags {
            assert!(tag.occurrence_count <= image.processed_count);
        }
    }

    #[test]
    fn pass_order_does_not_change_final_counters() {
        let p1 = tag_set(&["Cat", "Hat"]);
        let p2 = tag_set(&["Cat"]);
        let p3 = tag_set(&["Dog"]);

        let forward = create_in_memory_pool().unwrap();
        seed_image(&forward, "h1");
        for pass in [&p1, &p2, &p3] {
            record_pass(&forward, "h1", pass).unwrap();
        }

        let reverse = create_in_memory_pool().unwrap();
        seed_image(&reverse, "h1");
        for pass in [&p3, &p2, &p1] {
            record_pass(&reverse, "h1", pass).unwrap();
        }

        assert_eq!(
            tags_above(&forward, "h1", 0.0).unwrap(),
            tags_above(&reverse, "h1", 0.0).unwrap()
        );
    }
}
