//! Path Resolver (C1, spec §4.1).
//!
//! Maps an ambiguous, user-supplied request path to a concrete source image
//! under the image root, with deterministic fallbacks. Total and
//! side-effect-free apart from filesystem existence probes; results are
//! memoized keyed by the raw request path string.

use std::path::{Path, PathBuf};

use dashmap::DashMap;

/// Extensions probed, in priority order, when a path has none or names a
/// directory. `.jpg` wins over `.jpeg`/`.png`/`.webp` for a shared stem.
const PROBE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    None,
    GroupDefault,
    SystemDefault,
    TraversalRejected,
}

impl FallbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackKind::None => "none",
            FallbackKind::GroupDefault => "group_default",
            FallbackKind::SystemDefault => "system_default",
            FallbackKind::TraversalRejected => "traversal_rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub canonical_path: PathBuf,
    pub fallback_kind: FallbackKind,
    pub is_grouped: bool,
}

impl ResolvedSource {
    fn system_default(system_default: &Path, kind: FallbackKind) -> Self {
        Self {
            canonical_path: system_default.to_path_buf(),
            fallback_kind: kind,
            is_grouped: false,
        }
    }
}

/// Lexically clean a slash-separated request path: drop empty/`.` segments,
/// and bail out (returning `None`) the moment a `..` segment would escape
/// the root. Never looks at the filesystem.
fn clean_relative(raw: &str) -> Option<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for seg in raw.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if seg == ".." {
            if out.pop().is_none() {
                // Would escape the root entirely.
                return None;
            }
        } else {
            out.push(seg.to_string());
        }
    }
    Some(out)
}

/// Resolves request paths against an image root, with an in-memory memo.
pub struct Resolver {
    images_dir: PathBuf,
    system_default: PathBuf,
    memo: DashMap<String, ResolvedSource>,
}

impl Resolver {
    pub fn new(images_dir: PathBuf, system_default: PathBuf) -> Self {
        Self {
            images_dir,
            system_default,
            memo: DashMap::new(),
        }
    }

    /// Drop all memoized resolutions. Called by the admin `clear` operation.
    pub fn invalidate_memo(&self) {
        self.memo.clear();
    }

    pub fn resolve(&self, raw_request_path: &str) -> ResolvedSource {
        if let Some(hit) = self.memo.get(raw_request_path) {
            return hit.clone();
        }
        let resolved = self.resolve_uncached(raw_request_path);
        self.memo
            .insert(raw_request_path.to_string(), resolved.clone());
        resolved
    }

    fn resolve_uncached(&self, raw_request_path: &str) -> ResolvedSource {
        let Some(segments) = clean_relative(raw_request_path) else {
            return ResolvedSource::system_default(
                &self.system_default,
                FallbackKind::TraversalRejected,
            );
        };

        let cleaned: PathBuf = segments.iter().collect();
        let candidate = self.images_dir.join(&cleaned);

        // Step 2: exact file.
        if candidate.is_file() {
            if let Some(confirmed) = self.confirm_contained(&candidate, FallbackKind::None, false)
            {
                return confirmed;
            }
            return ResolvedSource::system_default(
                &self.system_default,
                FallbackKind::TraversalRejected,
            );
        }

        // Step 3: no extension -> probe priority list.
        if candidate.extension().is_none() {
            if let Some(found) = self.probe_extensions(&candidate) {
                if let Some(confirmed) = self.confirm_contained(&found, FallbackKind::None, false)
                {
                    return confirmed;
                }
                return ResolvedSource::system_default(
                    &self.system_default,
                    FallbackKind::TraversalRejected,
                );
            }
        }

        // Step 4: candidate is itself a group directory.
        if candidate.is_dir() {
            if let Some(found) = self.probe_group_default(&candidate) {
                if let Some(confirmed) =
                    self.confirm_contained(&found, FallbackKind::GroupDefault, true)
                {
                    return confirmed;
                }
                return ResolvedSource::system_default(
                    &self.system_default,
                    FallbackKind::TraversalRejected,
                );
            }
        }

        // Step 5: parent directory is a group and the child doesn't exist.
        if let Some(parent) = candidate.parent() {
            if parent != self.images_dir && parent.is_dir() {
                if let Some(found) = self.probe_group_default(parent) {
                    if let Some(confirmed) =
                        self.confirm_contained(&found, FallbackKind::GroupDefault, true)
                    {
                        return confirmed;
                    }
                    return ResolvedSource::system_default(
                        &self.system_default,
                        FallbackKind::TraversalRejected,
                    );
                }
            }
        }

        // Step 6: universal fallback.
        ResolvedSource::system_default(&self.system_default, FallbackKind::SystemDefault)
    }

    fn probe_extensions(&self, stem_path: &Path) -> Option<PathBuf> {
        for ext in PROBE_EXTENSIONS {
            let candidate = stem_path.with_extension(ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn probe_group_default(&self, dir: &Path) -> Option<PathBuf> {
        for ext in PROBE_EXTENSIONS {
            let candidate = dir.join(format!("default.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Canonicalize and re-check containment in the image root, demoting to
    /// `traversal_rejected` if a symlink resolved outside the root.
    fn confirm_contained(
        &self,
        path: &Path,
        kind: FallbackKind,
        is_grouped: bool,
    ) -> Option<ResolvedSource> {
        let canonical_root = std::fs::canonicalize(&self.images_dir).ok()?;
        let canonical = std::fs::canonicalize(path).ok()?;
        if !canonical.starts_with(&canonical_root) {
            return None;
        }
        Some(ResolvedSource {
            canonical_path: canonical,
            fallback_kind: kind,
            is_grouped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, Resolver) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("cat.jpg"), b"jpg-bytes").unwrap();
        fs::write(root.join("cat.png"), b"png-bytes").unwrap();
        fs::create_dir_all(root.join("cats")).unwrap();
        fs::write(root.join("cats/default.jpg"), b"group-jpg").unwrap();
        let system_default = root.join("system-default.jpg");
        fs::write(&system_default, b"default-bytes").unwrap();
        let resolver = Resolver::new(root, system_default);
        (dir, resolver)
    }

    #[test]
    fn exact_file_wins() {
        let (_dir, resolver) = setup();
        let resolved = resolver.resolve("cat.jpg");
        assert_eq!(resolved.fallback_kind, FallbackKind::None);
        assert!(resolved.canonical_path.ends_with("cat.jpg"));
    }

    #[test]
    fn extension_priority_prefers_jpg() {
        let (_dir, resolver) = setup();
        let resolved = resolver.resolve("cat");
        assert_eq!(resolved.fallback_kind, FallbackKind::None);
        assert!(resolved.canonical_path.extension().unwrap() == "jpg");
    }

    #[test]
    fn group_default_used_for_missing_child() {
        let (_dir, resolver) = setup();
        let resolved = resolver.resolve("cats/fluffy");
        assert_eq!(resolved.fallback_kind, FallbackKind::GroupDefault);
        assert!(resolved.is_grouped);
        assert!(resolved.canonical_path.ends_with("cats/default.jpg"));
    }

    #[test]
    fn unknown_path_falls_back_to_system_default() {
        let (_dir, resolver) = setup();
        let resolved = resolver.resolve("ghost");
        assert_eq!(resolved.fallback_kind, FallbackKind::SystemDefault);
        assert!(resolved.canonical_path.ends_with("system-default.jpg"));
    }

    #[test]
    fn traversal_is_rejected() {
        let (_dir, resolver) = setup();
        let resolved = resolver.resolve("../../../etc/passwd");
        assert_eq!(resolved.fallback_kind, FallbackKind::TraversalRejected);
        assert!(resolved.canonical_path.ends_with("system-default.jpg"));
    }

    #[test]
    fn memo_returns_same_result() {
        let (_dir, resolver) = setup();
        let first = resolver.resolve("cat.jpg");
        let second = resolver.resolve("cat.jpg");
        assert_eq!(first, second);
    }
}
