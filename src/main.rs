use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use std::path::Path;

use tagpix::analyzer::{OllamaAnalyzer, DEFAULT_PROMPT};
use tagpix::config::{Cli, Command, RunArgs, TagsArgs};
use tagpix::confidence_store::{self, StoreError};
use tagpix::db_pool::{self, DbPool};
use tagpix::ingest;
use tagpix::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let pool = db_pool::create_db_pool(&cli.db_path)?;
    info!("Database initialized at {}", cli.db_path);

    match cli.command {
        Command::Run(args) => run_tagging(&cli.storage_dir, &pool, args).await,
        Command::Tags(args) => show_tags(&pool, args),
    }
}

async fn run_tagging(
    storage_dir: &Path,
    pool: &DbPool,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    args.validate()?;

    let analyzer = OllamaAnalyzer::new(
        &args.ollama_host,
        &args.model,
        Duration::from_secs(args.timeout_secs),
    );

    // Configuration problems are fatal before any pass starts; everything
    // after this point is handled per image.
    if !analyzer.is_model_available() {
        error!(
            "model '{}' is not available at {}; pull it with: ollama pull {}",
            args.model, args.ollama_host, args.model
        );
        return Err(format!("model '{}' not available", args.model).into());
    }

    let ingested = ingest::ingest_directory(pool, storage_dir, &args.source_dir)?;
    info!(
        "{} images ready in {}",
        ingested.len(),
        storage_dir.display()
    );

    let prompt = args.prompt.as_deref().unwrap_or(DEFAULT_PROMPT).to_string();
    let orchestrator = Orchestrator::new(pool.clone(), Arc::new(analyzer), prompt, args.workers);
    let stats = orchestrator.run(args.repeat).await?;

    println!(
        "passes: {} attempted, {} committed, {} timed out, {} failed",
        stats.attempted, stats.committed, stats.timed_out, stats.failed
    );
    Ok(())
}

fn show_tags(pool: &DbPool, args: TagsArgs) -> Result<(), Box<dyn std::error::Error>> {
    args.validate()?;

    let images = match &args.image_id {
        Some(id) => match confidence_store::find_image(pool, id)? {
            Some(image) => vec![image],
            None => return Err(StoreError::UnknownImage(id.clone()).into()),
        },
        None => confidence_store::list_images(pool)?,
    };

    for image in images {
        println!(
            "{}  {} ({} passes)",
            image.id, image.original_filename, image.processed_count
        );

        match confidence_store::tags_above(pool, &image.id, args.threshold) {
            Ok(tags) => {
                for tag in tags {
                    println!("  {:.2}  {}", tag.confidence, tag.tag);
                }
            }
            Err(StoreError::NoData(_)) => println!("  (no completed passes yet)"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
