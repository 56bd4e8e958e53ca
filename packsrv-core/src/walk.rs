use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::IngestError;

/// Deepest directory nesting accepted below the walk root.
pub const MAX_DEPTH: usize = 256;

/// One regular file found under the walk root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkEntry {
    pub abs_path: PathBuf,
    /// Relative to the walk root, always `/`-separated.
    pub rel_path: String,
    pub size: u64,
}

/// Glob patterns (matched against `rel_path`) of files to leave out.
#[derive(Clone, Debug)]
pub struct ExcludeSet {
    set: GlobSet,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, IngestError> {
        let mut b = GlobSetBuilder::new();
        for p in patterns {
            let g = Glob::new(p.as_ref())
                .map_err(|e| IngestError::validation(p.as_ref(), e.to_string()))?;
            b.add(g);
        }
        let set = b.build().map_err(|e| IngestError::validation("exclude", e.to_string()))?;
        Ok(Self { set })
    }

    pub fn empty() -> Self {
        Self { set: GlobSet::empty() }
    }

    pub fn is_excluded(&self, rel_path: &str) -> bool {
        self.set.is_match(rel_path)
    }
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::empty()
    }
}

pub fn walk(root: &Path) -> Result<Vec<WalkEntry>, IngestError> {
    walk_filtered(root, &ExcludeSet::empty())
}

/// Enumerate regular files below `root`, sorted by relative path.
/// Symlinks and special files are skipped, never followed.
pub fn walk_filtered(root: &Path, exclude: &ExcludeSet) -> Result<Vec<WalkEntry>, IngestError> {
    let mut out = Vec::new();
    for ent in WalkDir::new(root).follow_links(false).max_depth(MAX_DEPTH + 1) {
        let ent = ent.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            IngestError::io(path, source)
        })?;
        if ent.depth() > MAX_DEPTH {
            return Err(IngestError::validation(
                ent.path().to_string_lossy(),
                format!("directory tree deeper than {MAX_DEPTH} levels"),
            ));
        }
        let ft = ent.file_type();
        if ft.is_dir() {
            continue;
        }
        if !ft.is_file() {
            warn!(path = %ent.path().display(), "skipping non-regular file");
            continue;
        }
        let p = ent.path();
        let rel_path = relative_slash_path(p, root);
        if exclude.is_excluded(&rel_path) {
            continue;
        }
        let meta = ent.metadata().map_err(|e| {
            let source =
                e.into_io_error().unwrap_or_else(|| std::io::Error::other("metadata failed"));
            IngestError::io(p, source)
        })?;
        out.push(WalkEntry { abs_path: p.to_path_buf(), rel_path, size: meta.len() });
    }
    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}

fn relative_slash_path(path: &Path, root: &Path) -> String {
    let rel = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
