use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::error::IngestError;
use crate::progress::Progress;

/// Fetch `url` into `dest`. Bytes land in `dest.part` and are renamed into
/// place only once the transfer completed, so `dest` is always whole.
/// `file://` URLs are copied from the local filesystem.
pub async fn download(
    client: &reqwest::Client,
    url: &Url,
    dest: &Path,
    progress: Option<&Progress>,
) -> Result<u64, IngestError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| IngestError::io(parent, e))?;
    }
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    let part = std::path::PathBuf::from(part);
    let res = if url.scheme() == "file" {
        copy_local(url, &part).await
    } else {
        fetch_remote(client, url, &part, progress).await
    };
    let written = match res {
        Ok(n) => n,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
    };
    tokio::fs::rename(&part, dest).await.map_err(|e| IngestError::io(dest, e))?;
    debug!(%url, dest = %dest.display(), bytes = written, "archive stored");
    Ok(written)
}

async fn fetch_remote(
    client: &reqwest::Client,
    url: &Url,
    part: &Path,
    progress: Option<&Progress>,
) -> Result<u64, IngestError> {
    let response =
        client.get(url.clone()).send().await.map_err(|e| IngestError::network(url, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::network(url, format!("http status {status}")));
    }
    let expected = response.content_length();
    if let Some(p) = progress {
        p.reset_files(1, expected.unwrap_or(0));
    }

    let mut file = tokio::fs::File::create(part).await.map_err(|e| IngestError::io(part, e))?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| IngestError::network(url, e))?;
        file.write_all(&chunk).await.map_err(|e| IngestError::io(part, e))?;
        written += chunk.len() as u64;
        if let Some(p) = progress {
            p.add_bytes(chunk.len() as u64);
        }
    }
    file.flush().await.map_err(|e| IngestError::io(part, e))?;
    file.sync_all().await.map_err(|e| IngestError::io(part, e))?;

    if let Some(n) = expected {
        if n != written {
            return Err(IngestError::network(
                url,
                format!("truncated transfer: got {written} of {n} bytes"),
            ));
        }
    }
    Ok(written)
}

async fn copy_local(url: &Url, part: &Path) -> Result<u64, IngestError> {
    let src = url
        .to_file_path()
        .map_err(|_| IngestError::validation(url.as_str(), "invalid file url"))?;
    match tokio::fs::copy(&src, part).await {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(IngestError::network(url, "source file does not exist"))
        }
        Err(e) => Err(IngestError::io(&src, e)),
    }
}
