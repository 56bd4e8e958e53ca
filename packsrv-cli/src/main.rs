use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use packsrv_core::config::{
    Config, InstanceSource, DEFAULT_BASE_URL, DEFAULT_LISTEN, DEFAULT_STORAGE,
};
use packsrv_core::manifest::ManifestBuilder;
use packsrv_core::walk::ExcludeSet;
use packsrv_core::{hasher, server, verify, IngestionPipeline};

#[derive(Parser)]
#[command(
    name = "packsrv",
    version,
    about = "Publish zip archives as hashed, downloadable file sets"
)]
struct Cli {
    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args, Clone)]
struct StorageArgs {
    /// Root for archives, extracted trees and manifests
    #[arg(long, env = "PACKSRV_STORAGE", default_value = DEFAULT_STORAGE)]
    storage: PathBuf,
    /// Address that file URLs in manifests start with
    #[arg(long, env = "PACKSRV_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: Url,
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// `name=url` or a bare url (name taken from the file name)
    #[arg(long = "source", env = "PACKSRV_SOURCES", value_delimiter = ',')]
    sources: Vec<String>,
    /// Glob of relative paths to leave out of manifests
    #[arg(long, env = "PACKSRV_EXCLUDE", value_delimiter = ',')]
    exclude: Vec<String>,
    /// Log stage and hashing progress every few seconds
    #[arg(long, default_value_t = false)]
    progress: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Ingest configured sources in the background and serve HTTP
    Serve {
        #[command(flatten)]
        storage: StorageArgs,
        #[command(flatten)]
        sources: SourceArgs,
        #[arg(long, env = "PACKSRV_LISTEN", default_value = DEFAULT_LISTEN)]
        listen: SocketAddr,
    },
    /// Ingest configured sources once and exit
    Ingest {
        #[command(flatten)]
        storage: StorageArgs,
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Re-hash a published instance against its manifest
    Verify {
        #[command(flatten)]
        storage: StorageArgs,
        instance: String,
    },
    /// Print the content hash of a file
    Hash { file: PathBuf },
    /// Build a manifest for a local directory and print it
    Manifest {
        dir: PathBuf,
        #[arg(long)]
        instance: String,
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: Url,
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.log_level);
    match cli.cmd {
        Cmd::Serve { storage, sources, listen } => {
            let mut cfg = build_config(&storage, &sources)?;
            cfg.listen = listen;
            runtime()?.block_on(serve(cfg))?;
        }
        Cmd::Ingest { storage, sources } => {
            let cfg = build_config(&storage, &sources)?;
            if cfg.sources.is_empty() {
                bail!("no sources given (use --source or PACKSRV_SOURCES)");
            }
            runtime()?.block_on(ingest(cfg))?;
        }
        Cmd::Verify { storage, instance } => verify_instance(&storage, &instance)?,
        Cmd::Hash { file } => {
            let d = hasher::hash_file(&file)?;
            println!("{}  {}  {}", d.hex, d.len, file.display());
        }
        Cmd::Manifest { dir, instance, base_url, exclude } => {
            let builder = ManifestBuilder::new(base_url).exclude(ExcludeSet::new(&exclude)?);
            let m = builder
                .build(&instance, &dir)
                .with_context(|| format!("manifest for {}", dir.display()))?;
            println!("{}", serde_json::to_string_pretty(&m)?);
        }
    }
    Ok(())
}

/// `RUST_LOG` wins over `--log-level`. Logs go to stderr so stdout stays
/// machine-readable.
fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start tokio runtime")
}

fn build_config(storage: &StorageArgs, sources: &SourceArgs) -> Result<Config> {
    let mut cfg = Config::new(&storage.storage, storage.base_url.clone())?;
    for s in &sources.sources {
        let src: InstanceSource = s.parse().with_context(|| format!("parse source {s:?}"))?;
        if cfg.sources.iter().any(|o| o.name == src.name) {
            warn!(instance = %src.name, "instance listed twice; runs will be serialized");
        }
        cfg.sources.push(src);
    }
    cfg.exclude = sources.exclude.clone();
    cfg.progress = sources.progress;
    cfg.ensure_dirs()?;
    Ok(cfg)
}

async fn serve(cfg: Config) -> Result<()> {
    let cfg = Arc::new(cfg);
    let listener = tokio::net::TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("bind {}", cfg.listen))?;
    let pipeline = IngestionPipeline::new(cfg.clone())?;
    tokio::spawn(async move {
        for res in pipeline.ingest_all().await {
            // failures are already logged by the pipeline
            if let Ok(rep) = res {
                info!(instance = %rep.instance, files = rep.files, "instance ready");
            }
        }
    });
    server::serve(listener, cfg).await.context("http server")?;
    Ok(())
}

async fn ingest(cfg: Config) -> Result<()> {
    let pipeline = IngestionPipeline::new(Arc::new(cfg))?;
    let mut failed = 0usize;
    for res in pipeline.ingest_all().await {
        match res {
            Ok(rep) => println!(
                "{}: {} files, {} bytes -> {}",
                rep.instance,
                rep.files,
                rep.total_bytes,
                rep.manifest_path.display()
            ),
            Err(e) => {
                eprintln!("{:#}", anyhow::Error::new(e));
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} instance(s) failed");
    }
    Ok(())
}

fn verify_instance(storage: &StorageArgs, instance: &str) -> Result<()> {
    let cfg = Config::new(&storage.storage, storage.base_url.clone())?;
    let store = packsrv_core::ManifestStore::new(cfg.extracted_dir());
    let rep = verify::verify(&store, instance, &cfg.instance_dir(instance))?;
    for p in &rep.missing {
        println!("MISSING {p}");
    }
    for p in &rep.mismatched {
        println!("MISMATCH {p}");
    }
    if rep.is_ok() {
        println!("OK: {} files", rep.files_ok);
        Ok(())
    } else {
        bail!("{} missing, {} mismatched", rep.missing.len(), rep.mismatched.len())
    }
}
