//! Media byte resolution for adapters that upload raw bytes
//!
//! URLs under the configured public base URL are read straight from the
//! local storage root; anything else is downloaded with a timeout.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::config::MediaConfig;
use crate::error::PlatformError;

/// Bytes of one media item, ready for upload
#[derive(Debug, Clone)]
pub struct MediaBytes {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
    local_root: Option<PathBuf>,
    public_base_url: Option<String>,
    download_timeout: Duration,
}

impl MediaFetcher {
    pub fn new(client: reqwest::Client, config: &MediaConfig) -> Self {
        Self {
            client,
            local_root: config
                .local_root
                .as_ref()
                .map(|root| PathBuf::from(shellexpand::tilde(root).to_string())),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|base| base.trim_end_matches('/').to_string()),
            download_timeout: config.download_timeout,
        }
    }

    /// Local file backing `url`, if the URL points into our own storage
    pub fn local_path(&self, url: &str) -> Option<PathBuf> {
        let root = self.local_root.as_ref()?;
        let base = self.public_base_url.as_ref()?;
        let relative = url.strip_prefix(base.as_str())?.strip_prefix('/')?;
        let relative = relative.split(['?', '#']).next().unwrap_or(relative);
        let relative = Path::new(relative);

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(root.join(relative))
    }

    pub async fn fetch(&self, url: &str) -> Result<MediaBytes, PlatformError> {
        let file_name = file_name_from_url(url);

        if let Some(path) = self.local_path(url) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    tracing::debug!(path = %path.display(), "Read media from local storage");
                    return Ok(MediaBytes {
                        content_type: guess_content_type(&file_name),
                        bytes,
                        file_name,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        error = %e,
                        "Local media missing, downloading instead"
                    );
                }
            }
        }

        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Network(format!(
                "media download returned HTTP {}",
                status.as_u16()
            )));
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();
        let content_type =
            header_type.unwrap_or_else(|| guess_content_type(&file_name));

        Ok(MediaBytes {
            bytes,
            file_name,
            content_type,
        })
    }
}

fn file_name_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("media")
        .to_string()
}

fn guess_content_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fetcher(root: Option<&Path>, base: Option<&str>) -> MediaFetcher {
        MediaFetcher::new(
            reqwest::Client::new(),
            &MediaConfig {
                local_root: root.map(|p| p.to_string_lossy().to_string()),
                public_base_url: base.map(str::to_string),
                download_timeout: Duration::from_secs(5),
            },
        )
    }

    #[test]
    fn test_local_path_mapping() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = fetcher(Some(temp_dir.path()), Some("https://cdn.example.com/media/"));

        assert_eq!(
            fetcher.local_path("https://cdn.example.com/media/org/a.jpg?v=2"),
            Some(temp_dir.path().join("org").join("a.jpg"))
        );
        assert_eq!(fetcher.local_path("https://elsewhere.com/a.jpg"), None);
        assert_eq!(
            fetcher.local_path("https://cdn.example.com/media/../etc/passwd"),
            None
        );
        assert_eq!(fetcher.local_path("https://cdn.example.com/mediafoo/a.jpg"), None);
    }

    #[test]
    fn test_no_local_mapping_without_config() {
        let fetcher = fetcher(None, None);
        assert_eq!(fetcher.local_path("https://cdn.example.com/a.jpg"), None);
    }

    #[test]
    fn test_file_name_and_content_type() {
        assert_eq!(file_name_from_url("https://x.com/a/b/photo.PNG?s=1"), "photo.PNG");
        assert_eq!(guess_content_type("photo.PNG"), "image/png");
        assert_eq!(guess_content_type("clip.mp4"), "video/mp4");
        assert_eq!(guess_content_type("clip.webm"), "video/webm");
        assert_eq!(guess_content_type("photo.bmp"), "image/bmp");
        assert_eq!(guess_content_type("noext"), "application/octet-stream");
        assert_eq!(file_name_from_url("https://x.com/"), "media");
    }

    #[tokio::test]
    async fn test_fetch_reads_local_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.jpg"), b"jpeg-bytes").unwrap();
        let fetcher = fetcher(Some(temp_dir.path()), Some("https://cdn.invalid"));

        let media = fetcher.fetch("https://cdn.invalid/a.jpg").await.unwrap();
        assert_eq!(media.bytes, b"jpeg-bytes");
        assert_eq!(media.content_type, "image/jpeg");
        assert_eq!(media.file_name, "a.jpg");
    }

    #[tokio::test]
    async fn test_fetch_downloads_remote_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/img/b.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body("png-bytes")
            .create_async()
            .await;

        let fetcher = fetcher(None, None);
        let media = fetcher
            .fetch(&format!("{}/img/b.png", server.url()))
            .await
            .unwrap();
        assert_eq!(media.bytes, b"png-bytes");
        assert_eq!(media.content_type, "image/png");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_reports_http_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.jpg")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = fetcher(None, None);
        let err = fetcher
            .fetch(&format!("{}/missing.jpg", server.url()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }
}
