use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, info, instrument};

use super::urls::scr_archive_url;
use crate::error::{PipelineError, Result};

/// Body bytes are pushed to disk in blocks of this size.
const WRITE_CHUNK_BYTES: usize = 1024 * 1024;

/// Longest slice of an error body kept in a `Fetch` error.
const ERROR_BODY_CHARS: usize = 512;

/// Where a yearly archive lives and whether this call downloaded it.
#[derive(Debug, Clone)]
pub struct ArchiveFetch {
    pub year: i32,
    pub url: String,
    pub path: PathBuf,
    pub downloaded: bool,
    pub bytes: u64,
}

/// Make sure the archive for `year` exists at `dest`.
///
/// Without `force`, an existing file is trusted and no request is made.
/// The year is validated before touching disk or network.
#[instrument(level = "info", skip(client, template, dest), fields(dest = %dest.display()))]
pub async fn ensure_archive(
    client: &Client,
    template: &str,
    year: i32,
    dest: &Path,
    force: bool,
) -> Result<ArchiveFetch> {
    let url = scr_archive_url(template, year)?;

    if !force && fs::try_exists(dest).await? {
        let bytes = fs::metadata(dest).await?.len();
        info!(year, bytes, "archive already on disk, skipping download");
        return Ok(ArchiveFetch {
            year,
            url,
            path: dest.to_path_buf(),
            downloaded: false,
            bytes,
        });
    }

    info!(year, url = %url, "downloading");
    let bytes = download_zip(client, &url, dest).await?;
    info!(year, bytes, "archive saved");

    Ok(ArchiveFetch {
        year,
        url,
        path: dest.to_path_buf(),
        downloaded: true,
        bytes,
    })
}

/// Stream `url` into `dest`, going through `<dest>.part` so an interrupted
/// transfer never leaves something that looks like a finished archive.
/// Returns the number of bytes written.
pub async fn download_zip(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(url, e))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let detail: String = body.chars().take(ERROR_BODY_CHARS).collect();
        return Err(PipelineError::fetch(url, Some(status.as_u16()), detail));
    }

    let part = part_path(dest);
    match write_part(resp, url, &part, dest).await {
        Ok(total) => Ok(total),
        Err(e) => {
            let _ = fs::remove_file(&part).await;
            Err(e)
        }
    }
}

/// Body into `part`, then `part` renamed onto `dest`. The caller removes
/// `part` on any error.
async fn write_part(resp: reqwest::Response, url: &str, part: &Path, dest: &Path) -> Result<u64> {
    let file = fs::File::create(part).await?;
    let mut writer = BufWriter::with_capacity(WRITE_CHUNK_BYTES, file);
    let mut stream = resp.bytes_stream();
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(url, e))?;
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;

        if total % (64 * WRITE_CHUNK_BYTES as u64) < chunk.len() as u64 {
            debug!(mb = total / (1024 * 1024), "download progress");
        }
    }

    writer.flush().await?;
    drop(writer);
    fs::rename(part, dest).await?;

    Ok(total)
}

fn transport_error(url: &str, e: reqwest::Error) -> PipelineError {
    PipelineError::fetch(url, e.status().map(|s| s.as_u16()), e.to_string())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FAKE_ZIP: &[u8] = b"PK\x03\x04 not really a zip";

    fn template_for(server: &mockito::Server) -> String {
        format!("{}/pda/desig/scrdata_{{year}}.zip", server.url())
    }

    #[tokio::test]
    async fn test_second_fetch_is_noop() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pda/desig/scrdata_2020.zip")
            .with_status(200)
            .with_body(FAKE_ZIP)
            .expect(1)
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("2020/raw/scrdata_2020.zip");
        let client = Client::new();
        let template = template_for(&server);

        let first = ensure_archive(&client, &template, 2020, &dest, false)
            .await
            .unwrap();
        assert!(first.downloaded);
        assert_eq!(first.bytes, FAKE_ZIP.len() as u64);

        let second = ensure_archive(&client, &template, 2020, &dest, false)
            .await
            .unwrap();
        assert!(!second.downloaded);
        assert_eq!(first.path, second.path);
        assert_eq!(second.bytes, FAKE_ZIP.len() as u64);

        mock.assert_async().await;
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_force_downloads_again() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/pda/desig/scrdata_2021.zip")
            .with_status(200)
            .with_body("new")
            .expect(1)
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("scrdata_2021.zip");
        std::fs::write(&dest, "old").unwrap();

        let client = Client::new();
        let out = ensure_archive(&client, &template_for(&server), 2021, &dest, true)
            .await
            .unwrap();
        assert!(out.downloaded);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_carries_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/pda/desig/scrdata_2011.zip")
            .with_status(404)
            .with_body("not here")
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("scrdata_2011.zip");
        let err = ensure_archive(&Client::new(), &template_for(&server), 2011, &dest, false)
            .await
            .unwrap_err();

        match err {
            PipelineError::Fetch { status, detail, .. } => {
                assert_eq!(status, Some(404));
                assert_eq!(detail, "not here");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_part_file() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/pda/desig/scrdata_2022.zip")
            .with_status(200)
            .with_body(FAKE_ZIP)
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        // a directory where the archive should go makes the final rename fail
        let dest = tmp.path().join("scrdata_2022.zip");
        std::fs::create_dir_all(dest.join("occupied")).unwrap();

        let err = ensure_archive(&Client::new(), &template_for(&server), 2022, &dest, true)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Io(_)));
        assert!(!part_path(&dest).exists());
        assert!(dest.join("occupied").is_dir());
    }

    #[tokio::test]
    async fn test_invalid_year_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("sub/scrdata_1800.zip");
        let err = ensure_archive(&Client::new(), &template_for(&server), 1800, &dest, true)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidArgument(_)));
        assert!(!tmp.path().join("sub").exists());
        mock.assert_async().await;
    }
}
