use rusqlite::Connection;

pub const CREATE_IMAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    original_filename TEXT NOT NULL,
    added_at TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    processed_count INTEGER NOT NULL DEFAULT 0
);
"#;

// Tags are value-typed strings, so there is no separate tags table; an
// (image_id, tag) row carries the whole association.
pub const CREATE_IMAGE_TAGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS image_tags (
    image_id TEXT NOT NULL REFERENCES images(id),
    tag TEXT NOT NULL,
    occurrence_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (image_id, tag)
);
"#;

pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_image_tags_image_id ON image_tags(image_id);
CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag);
"#;

pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(CREATE_IMAGES_TABLE, [])?;
    conn.execute(CREATE_IMAGE_TAGS_TABLE, [])?;
    conn.execute_batch(CREATE_INDEXES)?;
    Ok(())
}
