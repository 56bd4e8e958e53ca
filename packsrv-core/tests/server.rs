use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use packsrv_core::hasher::hash_reader;
use packsrv_core::server::router;
use packsrv_core::{Config, IngestionPipeline, InstanceSource, Manifest};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;
use url::Url;
use zip::write::SimpleFileOptions;

async fn published(td: &Path) -> (Arc<Config>, Router) {
    let archive = td.join("src.zip");
    {
        let mut zw = zip::ZipWriter::new(File::create(&archive).unwrap());
        for (name, data) in [
            ("options.txt", &b"fov:90\n"[..]),
            ("mods/big.jar", &vec![0xABu8; 300_000][..]),
            ("config/with space.toml", &b"x = 1"[..]),
        ] {
            zw.start_file(name, SimpleFileOptions::default()).unwrap();
            zw.write_all(data).unwrap();
        }
        zw.finish().unwrap();
    }
    let cfg = Arc::new(
        Config::new(td.join("data"), Url::parse("http://localhost:3000").unwrap()).unwrap(),
    );
    let pipeline = IngestionPipeline::new(cfg.clone()).unwrap();
    let src = InstanceSource::new("pack", Url::from_file_path(&archive).unwrap()).unwrap();
    pipeline.ingest(&src).await.unwrap();
    (cfg.clone(), router(cfg))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let res = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec();
    (status, headers, body)
}

#[tokio::test]
async fn instance_route_returns_manifest() {
    let td = tempfile::tempdir().unwrap();
    let (cfg, app) = published(td.path()).await;
    let (status, headers, body) = get(&app, "/instances/pack").await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("application/json"));
    let served: Manifest = serde_json::from_slice(&body).unwrap();
    let stored = packsrv_core::ManifestStore::new(cfg.extracted_dir()).load("pack").unwrap();
    assert_eq!(served, stored);
    assert_eq!(served.len(), 3);
}

#[tokio::test]
async fn unknown_instance_is_404_with_error_body() {
    let td = tempfile::tempdir().unwrap();
    let (_cfg, app) = published(td.path()).await;
    let (status, _, body) = get(&app, "/instances/doesnotexist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v, serde_json::json!({ "error": "Instancia no encontrada" }));
}

#[tokio::test]
async fn every_manifest_url_round_trips() {
    let td = tempfile::tempdir().unwrap();
    let (_cfg, app) = published(td.path()).await;
    let (_, _, body) = get(&app, "/instances/pack").await;
    let m: Manifest = serde_json::from_slice(&body).unwrap();
    for fd in &m.files {
        let url = Url::parse(&fd.url).unwrap();
        let (status, headers, bytes) = get(&app, url.path()).await;
        assert_eq!(status, StatusCode::OK, "{}", fd.url);
        assert_eq!(headers[header::CONTENT_LENGTH].to_str().unwrap(), fd.size.to_string());
        assert!(headers[header::CONTENT_DISPOSITION].to_str().unwrap().starts_with("attachment"));
        let d = hash_reader(&bytes[..]).unwrap();
        assert_eq!(d.hex, fd.hash);
        assert_eq!(d.len, fd.size);
    }
}

#[tokio::test]
async fn missing_or_escaping_files_are_404() {
    let td = tempfile::tempdir().unwrap();
    let (cfg, app) = published(td.path()).await;
    std::fs::write(cfg.storage_root.join("secret.txt"), b"secret").unwrap();

    for uri in [
        "/download/pack/nope.txt",
        "/download/pack/mods",
        "/download/pack/..%2F..%2Fsecret.txt",
        "/download/nothere/options.txt",
        "/download/.staging/x",
    ] {
        let (status, _, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"], "Archivo no encontrado", "{uri}");
    }
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let td = tempfile::tempdir().unwrap();
    let (_cfg, app) = published(td.path()).await;
    let (status, _, body) = get(&app, "/news").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(v["error"].is_string());
}

#[tokio::test]
async fn corrupt_manifest_is_500() {
    let td = tempfile::tempdir().unwrap();
    let (cfg, app) = published(td.path()).await;
    std::fs::write(cfg.extracted_dir().join("broken.json"), b"{ not json").unwrap();
    let (status, _, body) = get(&app, "/instances/broken").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["error"], "Error interno del servidor");
}
