use std::io::ErrorKind;
use std::path::Path;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::filename::partial_path;
use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::notify::{Notification, SharedNotifier};

/// What to fetch and how to label it in notifications
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    pub guid: &'a str,
    pub title: &'a str,
    pub url: &'a str,
}

/// Download `request.url` to `output_path`.
///
/// The body is streamed into a `.partial` sibling which is renamed into place
/// only once everything is written and flushed. On any failure the partial
/// file is removed and `output_path` is left untouched. Returns the number of
/// bytes written.
pub async fn download_to<C: HttpClient>(
    client: &C,
    request: TransferRequest<'_>,
    output_path: &Path,
    notifier: &SharedNotifier,
) -> Result<u64, DownloadError> {
    let partial = partial_path(output_path);

    let bytes = match write_partial(client, request, &partial, notifier).await {
        Ok(bytes) => bytes,
        Err(e) => {
            remove_if_present(&partial).await;
            return Err(e);
        }
    };

    if let Err(source) = tokio::fs::rename(&partial, output_path).await {
        remove_if_present(&partial).await;
        return Err(DownloadError::FinalizeFailed {
            from: partial,
            source,
        });
    }

    Ok(bytes)
}

async fn write_partial<C: HttpClient>(
    client: &C,
    request: TransferRequest<'_>,
    partial: &Path,
    notifier: &SharedNotifier,
) -> Result<u64, DownloadError> {
    let url = request.url;

    let response = client
        .get_stream(url)
        .await
        .map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !(200..300).contains(&response.status) {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    notifier.notify(Notification::DownloadStarted {
        guid: request.guid.to_string(),
        title: request.title.to_string(),
        content_length: response.content_length,
    });

    let mut file = File::create(partial)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: partial.to_path_buf(),
            source: e,
        })?;

    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: partial.to_path_buf(),
                source: e,
            })?;

        bytes_downloaded += chunk.len() as u64;

        notifier.notify(Notification::DownloadProgress {
            guid: request.guid.to_string(),
            bytes_downloaded,
            total_bytes: response.content_length,
        });
    }

    // Data must be on disk before the rename makes it visible.
    file.sync_all()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: partial.to_path_buf(),
            source: e,
        })?;

    Ok(bytes_downloaded)
}

/// Remove a file, treating "already gone" as success.
///
/// Returns `false` only when the file exists and could not be removed.
pub(crate) async fn remove_if_present(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use crate::test_support::MockHttpClient;
    use tempfile::tempdir;

    const URL: &str = "https://cdn.example.com/episode.mp3";

    fn request() -> TransferRequest<'static> {
        TransferRequest {
            guid: "g1",
            title: "Test Episode",
            url: URL,
        }
    }

    #[tokio::test]
    async fn download_writes_file() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_body(URL, b"test audio content".to_vec());

        let bytes = download_to(&client, request(), &output_path, &NoopNotifier::shared())
            .await
            .unwrap();

        assert_eq!(bytes, 18);
        assert_eq!(std::fs::read(&output_path).unwrap(), b"test audio content");
        assert!(!partial_path(&output_path).exists());
    }

    #[tokio::test]
    async fn http_error_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_status(URL, 404, b"Not Found".to_vec());

        let result = download_to(&client, request(), &output_path, &NoopNotifier::shared()).await;

        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got {other:?}"),
        }
        assert!(!output_path.exists());
        assert!(!partial_path(&output_path).exists());
    }

    #[tokio::test]
    async fn broken_stream_removes_partial_file() {
        let dir = tempdir().unwrap();
        let output_path = dir.path().join("episode.mp3");
        let client = MockHttpClient::new().with_broken_stream(URL, vec![7u8; 64]);

        let result = download_to(&client, request(), &output_path, &NoopNotifier::shared()).await;

        assert!(matches!(result, Err(DownloadError::StreamFailed { .. })));
        assert!(!output_path.exists());
        assert!(!partial_path(&output_path).exists());
    }

    #[tokio::test]
    async fn remove_if_present_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        assert!(remove_if_present(&dir.path().join("nothing.mp3")).await);
    }
}
