use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::error::IngestError;
use crate::path_safety::validate_instance_name;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
pub const DEFAULT_STORAGE: &str = "data";

/// A remote archive and the instance name it is published under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceSource {
    pub name: String,
    pub url: Url,
}

impl InstanceSource {
    pub fn new(name: impl Into<String>, url: Url) -> Result<Self, IngestError> {
        let name = name.into();
        validate_instance_name(&name)?;
        Ok(Self { name, url })
    }

    /// Name taken from the file stem of the URL's last path segment, e.g.
    /// `https://host/x/pack.zip?dl=1` becomes `pack`.
    pub fn from_url(url: Url) -> Result<Self, IngestError> {
        let last = url
            .path_segments()
            .and_then(|mut s| s.next_back().map(str::to_string))
            .unwrap_or_default();
        let stem = Path::new(&last)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(stem, url)
    }
}

/// Accepts `name=url` or a bare `url`.
impl FromStr for InstanceSource {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |u: &str| {
            Url::parse(u).map_err(|e| IngestError::validation(u, format!("bad url: {e}")))
        };
        match s.split_once('=') {
            Some((name, url)) if !name.contains(':') && !name.contains('/') => {
                Self::new(name.trim(), parse(url.trim())?)
            }
            _ => Self::from_url(parse(s.trim())?),
        }
    }
}

/// Everything the pipeline and the HTTP layer need, passed explicitly.
#[derive(Clone, Debug)]
pub struct Config {
    pub base_url: Url,
    pub listen: SocketAddr,
    pub storage_root: PathBuf,
    pub sources: Vec<InstanceSource>,
    pub exclude: Vec<String>,
    pub progress: bool,
}

impl Config {
    pub fn new(storage_root: impl Into<PathBuf>, base_url: Url) -> Result<Self, IngestError> {
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(IngestError::validation(base_url.as_str(), "base url must be http(s)"));
        }
        let listen = DEFAULT_LISTEN
            .parse()
            .map_err(|_| IngestError::validation(DEFAULT_LISTEN, "bad listen address"))?;
        Ok(Self {
            base_url,
            listen,
            storage_root: storage_root.into(),
            sources: Vec::new(),
            exclude: Vec::new(),
            progress: false,
        })
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.storage_root.join("archives")
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.storage_root.join("extracted")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.storage_root.join("staging")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.storage_root.join("locks")
    }

    pub fn instance_dir(&self, instance: &str) -> PathBuf {
        self.extracted_dir().join(instance)
    }

    pub fn archive_path(&self, instance: &str) -> PathBuf {
        self.archives_dir().join(format!("{instance}.zip"))
    }

    /// Create the storage layout if it is missing.
    pub fn ensure_dirs(&self) -> Result<(), IngestError> {
        for d in [self.archives_dir(), self.extracted_dir(), self.staging_dir(), self.locks_dir()] {
            std::fs::create_dir_all(&d).map_err(|e| IngestError::io(&d, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parsing() {
        let s: InstanceSource = "pack=https://example.com/a.zip".parse().unwrap();
        assert_eq!(s.name, "pack");
        assert_eq!(s.url.as_str(), "https://example.com/a.zip");

        let s: InstanceSource =
            "https://www.dropbox.com/scl/fi/x/carpinCraftPiola.zip?rlkey=abc&dl=1".parse().unwrap();
        assert_eq!(s.name, "carpinCraftPiola");

        assert!("bad name=https://example.com/a.zip".parse::<InstanceSource>().is_err());
        assert!("https://example.com/".parse::<InstanceSource>().is_err());
    }

    #[test]
    fn base_url_must_be_http() {
        let root = PathBuf::from("data");
        assert!(Config::new(&root, Url::parse("http://localhost:3000").unwrap()).is_ok());
        assert!(Config::new(&root, Url::parse("mailto:x@y.z").unwrap()).is_err());
        assert!(Config::new(&root, Url::parse("file:///tmp").unwrap()).is_err());
    }
}
