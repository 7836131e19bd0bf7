use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::confidence_store::{self, StoreError};
use crate::content_hash::{self, HashError};
use crate::db_pool::DbPool;
use crate::db_types::ImageRecord;

/// Extension every normalized copy is stored under. The copy is a lossless
/// re-encode of the RGB8 pixel buffer, so re-ingesting it hashes to the same
/// id as the source file.
pub const STORAGE_EXTENSION: &str = "png";

const SUPPORTED_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not persist normalized copy: {0}")]
    Persist(#[from] image::ImageError),
}

pub fn is_supported_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Collect supported image files under `dir`, recursively.
pub fn scan_source_dir(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        warn!("source directory does not exist: {}", dir.display());
        return Vec::new();
    }

    info!("Scanning directory: {}", dir.display());

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported_file(path))
        .collect();

    files.sort();
    info!("Found {} image files", files.len());
    files
}

/// Ingest a single file: hash its pixel content, persist the normalized copy
/// under the content id (skipped when the copy already exists, which is the
/// deduplication mechanism), and register the image row. The source file is
/// never modified or moved.
pub fn ingest_file(pool: &DbPool, storage_dir: &Path, path: &Path) -> Result<ImageRecord, IngestError> {
    let bytes = fs::read(path)?;
    let (id, pixels) = content_hash::hash_image_content(&bytes)?;

    let storage_path = storage_dir.join(format!("{}.{}", id, STORAGE_EXTENSION));
    if storage_path.exists() {
        debug!("normalized copy already present for {}", id);
    } else {
        pixels.save(&storage_path)?;
        debug!("wrote normalized copy to {}", storage_path.display());
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let record = confidence_store::upsert_image(
        pool,
        &id,
        &filename,
        &storage_path.to_string_lossy(),
        Utc::now(),
    )?;

    Ok(record)
}

/// Ingest every supported file under `source_dir`. Per-file failures are
/// logged and skipped; they never abort the scan.
pub fn ingest_directory(
    pool: &DbPool,
    storage_dir: &Path,
    source_dir: &Path,
) -> Result<Vec<ImageRecord>, IngestError> {
    fs::create_dir_all(storage_dir)?;

    let mut ingested = Vec::new();
    for path in scan_source_dir(source_dir) {
        match ingest_file(pool, storage_dir, &path) {
            Ok(record) => ingested.push(record),
            Err(e) => warn!("skipping {}: {}", path.display(), e),
        }
    }

    info!("Ingested {} images", ingested.len());
    Ok(ingested)
}
