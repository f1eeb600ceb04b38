//! Filter port - alternate asset producers
//!
//! A filter turns a whole file tree into a single output artifact by
//! driving an external tool (a bundler, a packer). Locations prefixed with
//! `name:` route through the filter registered under that name instead of
//! the default file reader. The produced output may carry a different
//! extension than the input root, in which case the asset's type and path
//! pick up the new extension.

use std::path::{Path, PathBuf};

use crate::error::HopperResult;

/// Output of one filter run.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    /// Output artifact name; its extension may retype the asset.
    pub name: String,
    /// Produced bytes.
    pub content: Vec<u8>,
}

/// An external tool that produces one artifact from a tree of entry files.
pub trait Filter: Send + Sync {
    /// Produce the artifact for the given root and its dived entry files.
    fn produce(&self, root: &Path, entries: &[PathBuf]) -> HopperResult<FilterOutput>;
}

/// Collect every file under a path, recursively, without following
/// symbolic links. The result is sorted for deterministic output.
pub fn dive(path: &Path) -> Vec<PathBuf> {
    let mut list = Vec::new();
    collect(path, &mut list);
    list.sort();
    list
}

fn collect(path: &Path, list: &mut Vec<PathBuf>) {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return;
    };
    if meta.is_file() {
        list.push(path.to_path_buf());
    } else if meta.is_dir() {
        let Ok(entries) = std::fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            collect(&entry.path(), list);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn dive_lists_files_recursively_and_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.js"), "b").unwrap();
        fs::write(dir.path().join("a.js"), "a").unwrap();
        fs::write(dir.path().join("sub/c.js"), "c").unwrap();

        let files = dive(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.js", "b.js", "sub/c.js"]);
    }

    #[test]
    fn dive_on_missing_path_is_empty() {
        assert!(dive(Path::new("/definitely/not/here")).is_empty());
    }

    #[test]
    fn dive_on_single_file_returns_it() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("one.js");
        fs::write(&file, "x").unwrap();
        assert_eq!(dive(&file), vec![file]);
    }
}
