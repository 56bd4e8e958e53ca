pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod hasher;
pub mod lock;
pub mod manifest;
pub mod path_safety;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod verify;
pub mod walk;

pub use config::{Config, InstanceSource};
pub use error::{IngestError, IngestFailure};
pub use manifest::{FileDescriptor, Manifest, ManifestStore};
pub use pipeline::{IngestReport, IngestionPipeline};
