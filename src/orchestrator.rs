use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::analyzer::{AnalyzerError, TagSource};
use crate::confidence_store::{self, StoreError};
use crate::db_pool::DbPool;
use crate::db_types::ImageRecord;
use crate::tag_normalizer;

/// Terminal state of one pass attempt over one image.
///
/// Only `Committed` touches the store; a timed-out or failed pass leaves
/// every counter exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Committed { tag_count: usize },
    TimedOut,
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub attempted: u64,
    pub committed: u64,
    pub timed_out: u64,
    pub failed: u64,
}

pub struct Orchestrator {
    pool: DbPool,
    analyzer: Arc<dyn TagSource>,
    prompt: String,
    workers: usize,
}

impl Orchestrator {
    pub fn new(pool: DbPool, analyzer: Arc<dyn TagSource>, prompt: String, workers: usize) -> Self {
        Self {
            pool,
            analyzer,
            prompt,
            workers,
        }
    }

    /// Run `repeat` rounds over every registered image.
    ///
    /// Rounds run sequentially and each image appears exactly once per round,
    /// so two passes over the same image never overlap. Within a round, up to
    /// `workers` passes run concurrently.
    pub async fn run(&self, repeat: u32) -> Result<RunStats, StoreError> {
        let images = confidence_store::list_images(&self.pool)?;
        if images.is_empty() {
            warn!("no images registered, nothing to do");
            return Ok(RunStats::default());
        }

        info!(
            "Starting tagging run: {} images, {} rounds, {} workers",
            images.len(),
            repeat,
            self.workers
        );

        let mut stats = RunStats::default();
        for round in 1..=repeat {
            info!("Processing round {} of {}", round, repeat);
            self.run_round(&images, round, &mut stats).await;
        }

        info!(
            "Run finished: {} attempted, {} committed, {} timed out, {} failed",
            stats.attempted, stats.committed, stats.timed_out, stats.failed
        );
        Ok(stats)
    }

    async fn run_round(&self, images: &[ImageRecord], round: u32, stats: &mut RunStats) {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for image in images.iter().cloned() {
            let semaphore = semaphore.clone();
            let pool = self.pool.clone();
            let analyzer = self.analyzer.clone();
            let prompt = self.prompt.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return PassOutcome::Failed,
                };
                run_pass(&pool, analyzer.as_ref(), &image, &prompt, round).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            stats.attempted += 1;
            match joined {
                Ok(PassOutcome::Committed { .. }) => stats.committed += 1,
                Ok(PassOutcome::TimedOut) => stats.timed_out += 1,
                Ok(PassOutcome::Failed) => stats.failed += 1,
                Err(e) => {
                    error!("pass task panicked: {}", e);
                    stats.failed += 1;
                }
            }
        }
    }
}

/// Drive one image through a pass: read the stored copy, ask the analyzer,
/// normalize, commit. Every error is terminal for this pass only and is
/// logged with the image id and round number.
pub async fn run_pass(
    pool: &DbPool,
    analyzer: &dyn TagSource,
    image: &ImageRecord,
    prompt: &str,
    round: u32,
) -> PassOutcome {
    let bytes = match tokio::fs::read(&image.storage_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(
                "image {} round {}: cannot read stored copy {}: {}",
                image.id, round, image.storage_path, e
            );
            return PassOutcome::Failed;
        }
    };

    let raw_tags = match analyzer.analyze(&bytes, prompt).await {
        Ok(raw) => raw,
        Err(AnalyzerError::Timeout) => {
            warn!("image {} round {}: analysis timed out, skipping", image.id, round);
            return PassOutcome::TimedOut;
        }
        Err(e) => {
            error!("image {} round {}: analysis failed: {}", image.id, round, e);
            return PassOutcome::Failed;
        }
    };

    let tags = tag_normalizer::normalize_all(&raw_tags);

    match confidence_store::record_pass(pool, &image.id, &tags) {
        Ok(()) => {
            info!(
                "image {} round {}: committed pass with {} tags",
                image.id,
                round,
                tags.len()
            );
            PassOutcome::Committed {
                tag_count: tags.len(),
            }
        }
        Err(e) => {
            error!("image {} round {}: commit failed: {}", image.id, round, e);
            PassOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::db_pool::create_in_memory_pool;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Returns a scripted response per call, cycling through the list.
    struct ScriptedSource {
        responses: Vec<Result<Vec<String>, AnalyzerError>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<String>, AnalyzerError>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TagSource for ScriptedSource {
        async fn analyze(&self, _image: &[u8], _prompt: &str) -> Result<Vec<String>, AnalyzerError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) % self.responses.len();
            match &self.responses[i] {
                Ok(tags) => Ok(tags.clone()),
                Err(AnalyzerError::Timeout) => Err(AnalyzerError::Timeout),
                Err(e) => Err(AnalyzerError::Transport(e.to_string())),
            }
        }
    }

    fn seed_image(pool: &DbPool, dir: &TempDir, id: &str) -> ImageRecord {
        let storage_path = dir.path().join(format!("{}.png", id));
        fs::write(&storage_path, b"pixel bytes stand-in").unwrap();
        confidence_store::upsert_image(
            pool,
            id,
            "seed.jpg",
            &storage_path.to_string_lossy(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn committed_pass_updates_counters() {
        let tmp = TempDir::new().unwrap();
        let pool = create_in_memory_pool().unwrap();
        let image = seed_image(&pool, &tmp, "h1");

        let source = ScriptedSource::new(vec![Ok(vec!["cat_hat".to_string(), "123".to_string()])]);
        let outcome = run_pass(&pool, &source, &image, "prompt", 1).await;

        assert_eq!(outcome, PassOutcome::Committed { tag_count: 1 });
        assert_eq!(confidence_store::confidence(&pool, "h1", "Cat Hat").unwrap(), 1.0);
    }

    #[tokio::test]
    async fn timed_out_pass_leaves_counters_untouched() {
        let tmp = TempDir::new().unwrap();
        let pool = create_in_memory_pool().unwrap();
        let image = seed_image(&pool, &tmp, "h1");

        let source = ScriptedSource::new(vec![Err(AnalyzerError::Timeout)]);
        let outcome = run_pass(&pool, &source, &image, "prompt", 1).await;

        assert_eq!(outcome, PassOutcome::TimedOut);
        let record = confidence_store::find_image(&pool, "h1").unwrap().unwrap();
        assert_eq!(record.processed_count, 0);
    }

    #[tokio::test]
    async fn transport_error_fails_only_that_pass() {
        let tmp = TempDir::new().unwrap();
        let pool = create_in_memory_pool().unwrap();
        let image = seed_image(&pool, &tmp, "h1");

        let source = ScriptedSource::new(vec![
            Err(AnalyzerError::Transport("connection refused".to_string())),
            Ok(vec!["cat".to_string()]),
        ]);

        assert_eq!(run_pass(&pool, &source, &image, "p", 1).await, PassOutcome::Failed);
        assert_eq!(
            run_pass(&pool, &source, &image, "p", 2).await,
            PassOutcome::Committed { tag_count: 1 }
        );

        let record = confidence_store::find_image(&pool, "h1").unwrap().unwrap();
        assert_eq!(record.processed_count, 1);
    }

    #[tokio::test]
    async fn run_covers_all_images_for_all_rounds() {
        let tmp = TempDir::new().unwrap();
        let pool = create_in_memory_pool().unwrap();
        seed_image(&pool, &tmp, "h1");
        seed_image(&pool, &tmp, "h2");
        seed_image(&pool, &tmp, "h3");

        let source = Arc::new(ScriptedSource::new(vec![Ok(vec!["tree".to_string()])]));
        let orchestrator = Orchestrator::new(pool.clone(), source, "p".to_string(), 2);

        let stats = orchestrator.run(4).await.unwrap();
        assert_eq!(stats.attempted, 12);
        assert_eq!(stats.committed, 12);

        for id in ["h1", "h2", "h3"] {
            let record = confidence_store::find_image(&pool, id).unwrap().unwrap();
            assert_eq!(record.processed_count, 4);
            assert_eq!(confidence_store::confidence(&pool, id, "Tree").unwrap(), 1.0);
        }
    }

    #[tokio::test]
    async fn timeouts_skip_images_without_stalling_the_round() {
        let tmp = TempDir::new().unwrap();
        let pool = create_in_memory_pool().unwrap();
        seed_image(&pool, &tmp, "h1");
        seed_image(&pool, &tmp, "h2");

        // Half of all calls time out.
        let source = Arc::new(ScriptedSource::new(vec![
            Err(AnalyzerError::Timeout),
            Ok(vec!["dog".to_string()]),
        ]));
        let orchestrator = Orchestrator::new(pool.clone(), source, "p".to_string(), 1);

        let stats = orchestrator.run(2).await.unwrap();
        assert_eq!(stats.attempted, 4);
        assert_eq!(stats.committed + stats.timed_out, 4);
        assert_eq!(stats.timed_out, 2);

        let total: i64 = ["h1", "h2"]
            .iter()
            .map(|id| {
                confidence_store::find_image(&pool, id)
                    .unwrap()
                    .unwrap()
                    .processed_count
            })
            .sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn run_with_no_images_is_a_noop() {
        let pool = create_in_memory_pool().unwrap();
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![])]));
        let orchestrator = Orchestrator::new(pool, source, "p".to_string(), 4);

        let stats = orchestrator.run(3).await.unwrap();
        assert_eq!(stats, RunStats::default());
    }
}
