//! Startup pre-cache scanner (C8, spec §4.8).
//!
//! Walks the image root recursively and warms the transform cache at the
//! default `TransformParams` for every source file found, skipping entries
//! already cached. Runs as a background task alongside server startup so it
//! never blocks the first request.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use walkdir::WalkDir;

use crate::fingerprint::Fingerprint;
use crate::metrics::METRICS;
use crate::params::TransformParams;
use crate::pool::WorkerPool;
use crate::AppState;

#[derive(Debug, Default, Clone)]
pub struct PrecacheStats {
    pub total_candidates: usize,
    pub processed_ok: usize,
    pub skipped_cached: usize,
    pub errors: usize,
}

const SOURCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Recursively enumerate source image files under `images_dir`: regular
/// files with a recognized extension, excluding dotfiles and the
/// system-default file itself (it is warmed implicitly by every unresolved
/// request and doesn't need a dedicated pre-cache job).
fn enumerate_sources(images_dir: &Path, system_default: &Path) -> Vec<PathBuf> {
    WalkDir::new(images_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .filter(|path| path != system_default)
        .collect()
}

/// Run the pre-cache scan to completion, logging progress at a fixed
/// cadence. Intended to be spawned as a background task at startup
/// (spec §4.8, §6). Transform work is dispatched to `precache_pool`, a
/// worker pool dedicated to the scan (sized by `precache_workers`) so it
/// never contends with the main request pool's concurrency/queue budget.
pub async fn run_precache(
    state: Arc<AppState>,
    precache_pool: WorkerPool,
    worker_count: usize,
) -> PrecacheStats {
    let started = Instant::now();
    let system_default = state.config.images_dir.join("system-default.webp");
    let sources = enumerate_sources(&state.config.images_dir, &system_default);
    let total = sources.len();
    tracing::info!(total, "starting pre-cache scan");

    let semaphore = Arc::new(Semaphore::new(worker_count.max(1)));
    let mut handles = Vec::with_capacity(total);

    for source in sources {
        let state = state.clone();
        let precache_pool = precache_pool.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            warm_one(&state, &precache_pool, &source).await
        }));
    }

    let mut stats = PrecacheStats {
        total_candidates: total,
        ..Default::default()
    };

    let log_every = (total / 20).max(1);
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Outcome::Processed) => {
                stats.processed_ok += 1;
                METRICS.record_precache_processed();
            }
            Ok(Outcome::Skipped) => {
                stats.skipped_cached += 1;
                METRICS.record_precache_skipped();
            }
            Ok(Outcome::Failed) => {
                stats.errors += 1;
                METRICS.record_precache_error();
            }
            Err(_) => {
                stats.errors += 1;
                METRICS.record_precache_error();
            }
        }
        if (i + 1) % log_every == 0 || i + 1 == total {
            tracing::info!(
                processed = stats.processed_ok,
                skipped = stats.skipped_cached,
                errors = stats.errors,
                total,
                "pre-cache progress"
            );
        }
    }

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        processed = stats.processed_ok,
        skipped = stats.skipped_cached,
        errors = stats.errors,
        "pre-cache scan complete"
    );

    stats
}

enum Outcome {
    Processed,
    Skipped,
    Failed,
}

async fn warm_one(state: &AppState, precache_pool: &WorkerPool, source: &Path) -> Outcome {
    let canonical = match tokio::fs::canonicalize(source).await {
        Ok(p) => p,
        Err(_) => return Outcome::Failed,
    };

    let params = TransformParams::default();
    let fp = Fingerprint::compute(&canonical, &params);

    if state.cache.lookup(&fp, params.format).await.present {
        return Outcome::Skipped;
    }

    let source_bytes = match tokio::fs::read(&canonical).await {
        Ok(b) => b,
        Err(_) => return Outcome::Failed,
    };

    let width = params.width;
    let height = params.height;
    let format = params.format;
    let quality = params.quality;
    let encoded = match precache_pool
        .run(move || crate::transform::run_transform(&source_bytes, width, height, format, quality))
        .await
    {
        Ok(b) => b,
        Err(_) => return Outcome::Failed,
    };

    match state.cache.write(&fp, format, &encoded, &canonical).await {
        Ok(()) => Outcome::Processed,
        Err(_) => Outcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn enumerate_sources_finds_nested_files_and_skips_dotfiles_and_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        fs::create_dir_all(dir.path().join("group")).unwrap();
        fs::write(dir.path().join("group/default.jpg"), b"b").unwrap();
        fs::write(dir.path().join(".hidden.jpg"), b"c").unwrap();
        fs::write(dir.path().join("readme.txt"), b"d").unwrap();
        let system_default = dir.path().join("system-default.jpg");
        fs::write(&system_default, b"e").unwrap();

        let found = enumerate_sources(dir.path(), &system_default);
        assert_eq!(found.len(), 2);
    }
}
