pub mod analyzer;
pub mod config;
pub mod confidence_store;
pub mod content_hash;
pub mod db_pool;
pub mod db_schema;
pub mod db_types;
pub mod ingest;
pub mod orchestrator;
pub mod tag_normalizer;
