//! Diagnostic cache
//!
//! Persists debugging artifacts (unminifiable content, the shrinker token
//! dump) under a dot-directory so a failed pipeline stage leaves something
//! inspectable behind. Writes are atomic: content lands in a temp file that
//! is renamed into place.

use std::path::{Path, PathBuf};

use crate::error::HopperResult;

/// Writer for a namespaced cache directory, `<dir>/<namespace>/<path>`.
#[derive(Debug, Clone)]
pub struct DotCache {
    dir: PathBuf,
}

impl DotCache {
    /// Create a cache rooted at the given directory (usually
    /// `<root>/.cache`). Nothing is created until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write content to `<dir>/<namespace>/<path>`, creating directories as
    /// needed, and return the path written.
    pub fn write(
        &self,
        namespace: &str,
        path: &str,
        content: &[u8],
    ) -> HopperResult<PathBuf> {
        let relative = path.trim_start_matches(['.', '/', '\\']);
        let target = self.dir.join(namespace).join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        atomic_write(&target, content)?;
        Ok(target)
    }
}

/// Write via a sibling temp file and rename, so readers never observe a
/// half-written artifact.
pub fn atomic_write(path: &Path, content: &[u8]) -> HopperResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut temp, content)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_creates_namespaced_path() {
        let dir = tempdir().unwrap();
        let cache = DotCache::new(dir.path().join(".cache"));

        let written = cache
            .write("hopper", "views/page.ltl", b"broken content")
            .unwrap();

        assert_eq!(
            written,
            dir.path().join(".cache").join("hopper").join("views/page.ltl")
        );
        assert_eq!(std::fs::read(&written).unwrap(), b"broken content");
    }

    #[test]
    fn write_strips_leading_dots_and_slashes() {
        let dir = tempdir().unwrap();
        let cache = DotCache::new(dir.path().join(".cache"));

        let written = cache.write("hopper", "./rel/file.js", b"x").unwrap();
        assert!(written.ends_with(Path::new(".cache/hopper/rel/file.js")));
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.txt");

        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }
}
