use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value} (valid range: {valid})")]
    OutOfRange {
        name: &'static str,
        value: String,
        valid: &'static str,
    },
}

#[derive(Debug, Parser)]
#[command(name = "tagpix", about = "Content-addressed image tagging with confidence accumulation")]
pub struct Cli {
    /// SQLite database file
    #[arg(long, env = "TAGPIX_DB_PATH", default_value = "./data/tagpix.db")]
    pub db_path: String,

    /// Directory holding the normalized, content-addressed image copies
    #[arg(long, env = "TAGPIX_STORAGE_DIR", default_value = "./data/images")]
    pub storage_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest source images and run tagging passes over the whole set
    Run(RunArgs),
    /// Show accumulated tags at or above a confidence threshold
    Tags(TagsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Directory with source images; files are read, never modified
    #[arg(long, env = "TAGPIX_SOURCE_DIR", default_value = "./images")]
    pub source_dir: PathBuf,

    /// Tagging rounds over the image set (1..=1000)
    #[arg(long, env = "TAGPIX_REPEAT", default_value_t = 1)]
    pub repeat: u32,

    /// Prompt sent to the model; defaults to the built-in tagging prompt
    #[arg(long, env = "TAGPIX_PROMPT")]
    pub prompt: Option<String>,

    /// Per-call analysis timeout in seconds (1..=600)
    #[arg(long, env = "TAGPIX_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Concurrent analysis workers (1..=64)
    #[arg(long, env = "TAGPIX_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Ollama base URL
    #[arg(long, env = "TAGPIX_OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub ollama_host: String,

    /// Vision model name
    #[arg(long, env = "TAGPIX_MODEL", default_value = "llava")]
    pub model: String,
}

#[derive(Debug, Args)]
pub struct TagsArgs {
    /// Content id of one image; omitted lists every image
    #[arg(long)]
    pub image_id: Option<String>,

    /// Minimum confidence, inclusive (0.0..=1.0)
    #[arg(long, env = "TAGPIX_THRESHOLD", default_value_t = 0.5)]
    pub threshold: f64,
}

impl RunArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&self.repeat) {
            return Err(ConfigError::OutOfRange {
                name: "--repeat",
                value: self.repeat.to_string(),
                valid: "1..=1000",
            });
        }
        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::OutOfRange {
                name: "--timeout-secs",
                value: self.timeout_secs.to_string(),
                valid: "1..=600",
            });
        }
        if !(1..=64).contains(&self.workers) {
            return Err(ConfigError::OutOfRange {
                name: "--workers",
                value: self.workers.to_string(),
                valid: "1..=64",
            });
        }
        Ok(())
    }
}

impl TagsArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) || self.threshold.is_nan() {
            return Err(ConfigError::OutOfRange {
                name: "--threshold",
                value: self.threshold.to_string(),
                valid: "0.0..=1.0",
            });
        }
        Ok(())
    }
}
