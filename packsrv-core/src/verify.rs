use rayon::prelude::*;
use std::path::Path;

use crate::error::IngestError;
use crate::hasher;
use crate::manifest::ManifestStore;
use crate::path_safety::validate_path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub files_ok: u64,
    /// Paths whose size or hash differ from the manifest.
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

enum Outcome {
    Ok,
    Mismatch(String),
    Missing(String),
}

/// Re-hash the published tree of `instance` under `root` against its manifest.
pub fn verify(
    store: &ManifestStore,
    instance: &str,
    root: &Path,
) -> Result<VerifyReport, IngestError> {
    let mf = store.load(instance)?;
    let outcomes = mf
        .files
        .par_iter()
        .map(|fd| -> Result<Outcome, IngestError> {
            let p = validate_path(root, Path::new(&fd.path))?;
            match hasher::hash_file(&p) {
                Ok(d) if d.hex == fd.hash && d.len == fd.size => Ok(Outcome::Ok),
                Ok(_) => Ok(Outcome::Mismatch(fd.path.clone())),
                Err(IngestError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    Ok(Outcome::Missing(fd.path.clone()))
                }
                Err(e) => Err(e),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rep = VerifyReport::default();
    for o in outcomes {
        match o {
            Outcome::Ok => rep.files_ok += 1,
            Outcome::Mismatch(p) => rep.mismatched.push(p),
            Outcome::Missing(p) => rep.missing.push(p),
        }
    }
    Ok(rep)
}
