use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::IngestError;
use crate::hasher;
use crate::path_safety::validate_instance_name;
use crate::progress::Progress;
use crate::walk::{self, ExcludeSet, WalkEntry};

/// One downloadable file of an instance. Field order is the wire order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    pub url: String,
    pub size: u64,
    pub hash: String,
    pub path: String,
}

/// Serialized as a bare JSON array of [`FileDescriptor`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Manifest {
    pub files: Vec<FileDescriptor>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn get(&self, path: &str) -> Option<&FileDescriptor> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// `{base}/download/{instance}/{path}` with every segment percent-encoded.
pub fn download_url(base: &Url, instance: &str, rel_path: &str) -> Result<Url, IngestError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut segs = url
            .path_segments_mut()
            .map_err(|_| IngestError::validation(base.as_str(), "base url cannot be a base"))?;
        segs.pop_if_empty().push("download").push(instance);
        segs.extend(rel_path.split('/'));
    }
    Ok(url)
}

#[derive(Clone)]
pub struct ManifestBuilder {
    base_url: Url,
    exclude: ExcludeSet,
    progress: Option<Progress>,
}

impl ManifestBuilder {
    pub fn new(base_url: Url) -> Self {
        Self { base_url, exclude: ExcludeSet::empty(), progress: None }
    }

    pub fn exclude(mut self, exclude: ExcludeSet) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Walk and hash `root` in one go.
    pub fn build(&self, instance: &str, root: &Path) -> Result<Manifest, IngestError> {
        let entries = self.enumerate(root)?;
        self.hash_entries(instance, &entries)
    }

    pub fn enumerate(&self, root: &Path) -> Result<Vec<WalkEntry>, IngestError> {
        walk::walk_filtered(root, &self.exclude)
    }

    /// Hash files in parallel; the result keeps the order of `entries`.
    pub fn hash_entries(
        &self,
        instance: &str,
        entries: &[WalkEntry],
    ) -> Result<Manifest, IngestError> {
        validate_instance_name(instance)?;
        if let Some(p) = &self.progress {
            p.reset_files(entries.len(), entries.iter().map(|e| e.size).sum());
        }
        let files = entries
            .par_iter()
            .map(|ent| -> Result<FileDescriptor, IngestError> {
                let digest = hasher::hash_file(&ent.abs_path)?;
                if let Some(p) = &self.progress {
                    p.inc_file(digest.len);
                }
                let url = download_url(&self.base_url, instance, &ent.rel_path)?;
                Ok(FileDescriptor {
                    url: url.into(),
                    size: digest.len,
                    hash: digest.hex,
                    path: ent.rel_path.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Manifest { files })
    }
}

/// Manifest documents stored as `<dir>/<instance>.json`.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, instance: &str) -> PathBuf {
        self.dir.join(format!("{instance}.json"))
    }

    /// Write through a temp file in the same directory and rename it over
    /// the target, so readers see the old document or the new one.
    pub fn persist(&self, manifest: &Manifest, instance: &str) -> Result<PathBuf, IngestError> {
        self.stage(manifest, instance)?.commit()
    }

    /// First half of [`persist`](Self::persist): the document is fully
    /// written and synced but not yet visible.
    pub fn stage(
        &self,
        manifest: &Manifest,
        instance: &str,
    ) -> Result<StagedManifest, IngestError> {
        validate_instance_name(instance)?;
        fs::create_dir_all(&self.dir).map_err(|e| IngestError::io(&self.dir, e))?;
        let target = self.path_for(instance);
        let body = serde_json::to_vec_pretty(manifest)
            .map_err(|e| IngestError::Json { path: target.clone(), source: e })?;
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{instance}."))
            .suffix(".json.tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| IngestError::io(&self.dir, e))?;
        tmp.write_all(&body).map_err(|e| IngestError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| IngestError::io(tmp.path(), e))?;
        Ok(StagedManifest { tmp, target })
    }

    pub fn load(&self, instance: &str) -> Result<Manifest, IngestError> {
        if validate_instance_name(instance).is_err() {
            return Err(IngestError::NotFound { what: "instance", name: instance.to_string() });
        }
        let path = self.path_for(instance);
        let f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestError::NotFound { what: "instance", name: instance.to_string() })
            }
            Err(e) => return Err(IngestError::io(&path, e)),
        };
        serde_json::from_reader(BufReader::new(f))
            .map_err(|e| IngestError::Json { path, source: e })
    }

    pub fn exists(&self, instance: &str) -> bool {
        validate_instance_name(instance).is_ok() && self.path_for(instance).is_file()
    }
}

/// A manifest written to a temp file next to its final location.
/// Dropping it without [`commit`](Self::commit) discards the document.
pub struct StagedManifest {
    tmp: tempfile::NamedTempFile,
    target: PathBuf,
}

impl StagedManifest {
    pub fn commit(self) -> Result<PathBuf, IngestError> {
        let target = self.target;
        self.tmp.persist(&target).map_err(|e| IngestError::io(&target, e.error))?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_segment_encoded() {
        let base = Url::parse("http://localhost:3000").unwrap();
        let u = download_url(&base, "pack", "mods/a b.jar").unwrap();
        assert_eq!(u.as_str(), "http://localhost:3000/download/pack/mods/a%20b.jar");

        let base = Url::parse("https://cdn.example.com/files/").unwrap();
        let u = download_url(&base, "pack", "config/x.toml").unwrap();
        assert_eq!(u.as_str(), "https://cdn.example.com/files/download/pack/config/x.toml");
    }

    #[test]
    fn wire_format_is_a_bare_array() {
        let m = Manifest {
            files: vec![FileDescriptor {
                url: "http://h/download/p/a.txt".into(),
                size: 3,
                hash: "a9993e364706816aba3e25717850c26c9cd0d89d".into(),
                path: "a.txt".into(),
            }],
        };
        let v: serde_json::Value = serde_json::to_value(&m).unwrap();
        let arr = v.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        let keys: Vec<_> = arr[0].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 4);
        for k in ["url", "size", "hash", "path"] {
            assert!(keys.iter().any(|x| x == k));
        }
    }
}
