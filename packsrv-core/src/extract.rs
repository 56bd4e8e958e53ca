//! Zip extraction into a fresh directory tree.
//!
//! Every entry name is validated before anything is written. The archive is
//! unpacked into a sibling scratch directory which then replaces the
//! destination, so a failed extraction never leaves a half-written tree at
//! `dest`.
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::error::IngestError;
use crate::path_safety::sanitize_entry_name;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: usize,
    pub dirs: usize,
    pub skipped: usize,
}

enum Planned {
    Dir(PathBuf),
    File(usize, PathBuf),
}

/// Unpack `archive` into `dest`, replacing whatever `dest` held before.
pub fn extract(archive: &Path, dest: &Path) -> Result<ExtractStats, IngestError> {
    let f = File::open(archive).map_err(|e| IngestError::io(archive, e))?;
    let mut zip =
        zip::ZipArchive::new(BufReader::new(f)).map_err(|e| IngestError::format(archive, e))?;

    // 1) Validate every entry name up front
    let mut plan = Vec::with_capacity(zip.len());
    let mut stats = ExtractStats::default();
    for i in 0..zip.len() {
        let entry = zip.by_index_raw(i).map_err(|e| IngestError::format(archive, e))?;
        let rel = sanitize_entry_name(entry.name())?;
        if entry.unix_mode().is_some_and(|m| m & S_IFMT == S_IFLNK) {
            warn!(entry = entry.name(), "skipping symlink entry");
            stats.skipped += 1;
            continue;
        }
        if entry.is_dir() {
            plan.push(Planned::Dir(rel));
        } else {
            plan.push(Planned::File(i, rel));
        }
    }

    // 2) Unpack into scratch space next to the destination
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| IngestError::io(&parent, e))?;
    let scratch = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(&parent)
        .map_err(|e| IngestError::io(&parent, e))?;

    for item in plan {
        match item {
            Planned::Dir(rel) => {
                let p = scratch.path().join(rel);
                fs::create_dir_all(&p).map_err(|e| IngestError::io(&p, e))?;
                stats.dirs += 1;
            }
            Planned::File(i, rel) => {
                let p = scratch.path().join(&rel);
                if let Some(dir) = p.parent() {
                    fs::create_dir_all(dir).map_err(|e| IngestError::io(dir, e))?;
                }
                let mut entry = zip.by_index(i).map_err(|e| IngestError::format(archive, e))?;
                let mut out = File::create(&p).map_err(|e| IngestError::io(&p, e))?;
                copy_entry(&mut entry, &mut out, archive, &p)?;
                stats.files += 1;
            }
        }
    }

    // 3) Swap into place
    replace_dir(scratch.path(), dest)?;
    debug!(archive = %archive.display(), dest = %dest.display(), files = stats.files, "extracted");
    Ok(stats)
}

/// Read errors come from the archive (corrupt data, bad CRC); write errors
/// come from the destination filesystem.
fn copy_entry<R: Read, W: Write>(
    src: &mut R,
    dst: &mut W,
    archive: &Path,
    target: &Path,
) -> Result<u64, IngestError> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IngestError::format(archive, e)),
        };
        dst.write_all(&buf[..n]).map_err(|e| IngestError::io(target, e))?;
        total += n as u64;
    }
    dst.flush().map_err(|e| IngestError::io(target, e))?;
    Ok(total)
}

/// Move the directory `src` to `dest`, discarding any previous `dest`.
pub fn replace_dir(src: &Path, dest: &Path) -> Result<(), IngestError> {
    swap_dir(src, dest)?.finish();
    Ok(())
}

/// A tree moved into place whose predecessor is still kept aside.
/// [`finish`](Self::finish) discards the predecessor,
/// [`rollback`](Self::rollback) puts it back.
#[must_use = "the previous tree stays on disk until finish or rollback"]
#[derive(Debug)]
pub struct DirSwap {
    src: PathBuf,
    dest: PathBuf,
    backup: Option<PathBuf>,
}

/// Rename `src` to `dest`. The old `dest` is renamed aside first so `dest`
/// is only missing for the instant between two renames.
pub fn swap_dir(src: &Path, dest: &Path) -> Result<DirSwap, IngestError> {
    let backup = match fs::symlink_metadata(dest) {
        Ok(_) => {
            let name = dest
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let backup = dest.with_file_name(format!(".{name}.old-{}", std::process::id()));
            if backup.exists() {
                fs::remove_dir_all(&backup).map_err(|e| IngestError::io(&backup, e))?;
            }
            fs::rename(dest, &backup).map_err(|e| IngestError::io(dest, e))?;
            Some(backup)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(IngestError::io(dest, e)),
    };
    if let Err(e) = fs::rename(src, dest) {
        if let Some(b) = &backup {
            if let Err(re) = fs::rename(b, dest) {
                error!(
                    backup = %b.display(),
                    dest = %dest.display(),
                    error = %re,
                    "could not restore previous tree"
                );
            }
        }
        return Err(IngestError::io(dest, e));
    }
    Ok(DirSwap { src: src.to_path_buf(), dest: dest.to_path_buf(), backup })
}

impl DirSwap {
    pub fn finish(self) {
        if let Some(b) = self.backup {
            if let Err(e) = fs::remove_dir_all(&b) {
                warn!(path = %b.display(), error = %e, "could not remove previous tree");
            }
        }
    }

    /// Move the new tree back to where it came from and restore the old one.
    pub fn rollback(self) -> Result<(), IngestError> {
        fs::rename(&self.dest, &self.src).map_err(|e| IngestError::io(&self.dest, e))?;
        if let Some(b) = &self.backup {
            fs::rename(b, &self.dest).map_err(|e| IngestError::io(b, e))?;
        }
        Ok(())
    }
}
