//! Cache Store (C4, spec §4.4).
//!
//! A content-addressed, sharded on-disk store. Writers create parent shard
//! directories lazily, write to a temp file in the same shard directory,
//! then atomically rename into place; if the destination already exists
//! the write is discarded (first writer wins). No fsync is required --- the
//! cache is fully rebuildable from source images.

use std::path::{Path, PathBuf};

use dashmap::{DashMap, DashSet};
use tokio::fs;

use crate::config::ImageFormat;
use crate::fingerprint::Fingerprint;

pub struct CacheLookup {
    pub present: bool,
    pub size: u64,
}

/// On-disk, sharded cache plus a best-effort in-memory source -> fingerprint
/// index used by `clear_source`. The index is lost on restart; a clear for a
/// source with no index entry degrades to "nothing known to clear" rather
/// than a full shard scan, since a fingerprint cannot be reversed back into
/// the source path that produced it.
pub struct CacheStore {
    root: PathBuf,
    source_index: DashMap<PathBuf, DashSet<Fingerprint>>,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            source_index: DashMap::new(),
        }
    }

    fn path_for(&self, fp: &Fingerprint, format: ImageFormat) -> PathBuf {
        let (a, b, rest) = fp.shard_components();
        self.root
            .join(a)
            .join(b)
            .join(format!("{rest}.{}", format.extension()))
    }

    pub async fn lookup(&self, fp: &Fingerprint, format: ImageFormat) -> CacheLookup {
        let path = self.path_for(fp, format);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => CacheLookup {
                present: true,
                size: meta.len(),
            },
            _ => CacheLookup {
                present: false,
                size: 0,
            },
        }
    }

    pub async fn read(&self, fp: &Fingerprint, format: ImageFormat) -> std::io::Result<Vec<u8>> {
        let path = self.path_for(fp, format);
        fs::read(&path).await
    }

    /// Write `bytes` for `fp`, recording `source` in the per-source index.
    /// If an entry already exists at the destination, the write is a no-op
    /// (first writer wins) --- this is not an error.
    pub async fn write(
        &self,
        fp: &Fingerprint,
        format: ImageFormat,
        bytes: &[u8],
        source: &Path,
    ) -> std::io::Result<()> {
        let dest = self.path_for(fp, format);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        if fs::metadata(&dest).await.is_ok() {
            self.record_source(fp, source);
            return Ok(());
        }

        let tmp_name = format!(
            ".tmp-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        );
        let tmp_path = dest
            .parent()
            .map(|p| p.join(&tmp_name))
            .unwrap_or_else(|| PathBuf::from(&tmp_name));

        if let Err(e) = fs::write(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        match fs::rename(&tmp_path, &dest).await {
            Ok(()) => {
                self.record_source(fp, source);
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(e)
            }
        }
    }

    fn record_source(&self, fp: &Fingerprint, source: &Path) {
        self.source_index
            .entry(source.to_path_buf())
            .or_insert_with(DashSet::new)
            .insert(fp.clone());
    }

    /// Delete every fingerprint known (via the in-memory index) to have
    /// been derived from `source`. Fingerprints produced before the last
    /// restart, or for a source the index never saw a write for, are not
    /// reachable from this index and are left in place --- the contract is
    /// best-effort, not exhaustive (spec §4.4).
    pub async fn clear_source(&self, source: &Path) -> std::io::Result<usize> {
        let Some((_, fingerprints)) = self.source_index.remove(source) else {
            return Ok(0);
        };
        let mut cleared = 0usize;
        for fp in fingerprints.iter() {
            for format in [ImageFormat::webp, ImageFormat::jpeg, ImageFormat::png] {
                let path = self.path_for(&fp, format);
                if fs::remove_file(&path).await.is_ok() {
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    /// Atomically swap the cache root out for an empty directory, then
    /// remove the old tree in the background. Concurrent readers either see
    /// the old file (via a handle opened before the swap) or observe
    /// absent; none observe a partially-deleted tree.
    pub async fn clear_all(&self) -> std::io::Result<usize> {
        self.source_index.clear();

        if fs::metadata(&self.root).await.is_err() {
            fs::create_dir_all(&self.root).await?;
            return Ok(0);
        }

        let cleared = count_files(&self.root).await;

        let stash = self
            .root
            .with_extension(format!("stale-{}", uuid::Uuid::new_v4().simple()));
        fs::rename(&self.root, &stash).await?;
        fs::create_dir_all(&self.root).await?;

        tokio::spawn(async move {
            let _ = fs::remove_dir_all(&stash).await;
        });

        Ok(cleared)
    }
}

async fn count_files(root: &Path) -> usize {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .count()
    })
    .await
    .unwrap_or(0)
}
