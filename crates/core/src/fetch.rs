use std::path::{Path, PathBuf};
use std::time::Duration;
use futures::StreamExt;
use log::debug;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid transfer url: {0}")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("resource exceeds the {limit} byte input limit")]
    TooLarge { limit: u64 },
    #[error("file missing after transfer: {}", .0.display())]
    Missing(PathBuf),
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Streams a remote resource into a local file, enforcing the input size limit
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl Fetcher {
    pub fn new(max_bytes: u64, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, max_bytes })
    }

    pub fn with_client(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Fetch `url` into `dest`, returning the number of bytes written.
    ///
    /// `file://` urls are copied locally; anything else goes over HTTP(S).
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let written = match parsed.scheme() {
            "file" => {
                let source = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
                self.copy_local(&source, dest).await?
            }
            "http" | "https" => self.download(parsed, dest).await?,
            other => return Err(FetchError::InvalidUrl(format!("unsupported scheme {}", other))),
        };

        if !fs::try_exists(dest).await.unwrap_or(false) {
            return Err(FetchError::Missing(dest.to_path_buf()));
        }
        debug!("Fetched {} bytes into {}", written, dest.display());
        Ok(written)
    }

    async fn download(&self, url: Url, dest: &Path) -> Result<u64, FetchError> {
        // Urls may carry credentials; keep them out of error text
        let response = self.client.get(url).send().await.map_err(|e| e.without_url())?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
        }

        let mut file = fs::File::create(dest)
            .await
            .map_err(|source| FetchError::Io { path: dest.to_path_buf(), source })?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|e| e.without_url())?;
            written += data.len() as u64;
            if written > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
            file.write_all(&data)
                .await
                .map_err(|source| FetchError::Io { path: dest.to_path_buf(), source })?;
        }
        file.flush()
            .await
            .map_err(|source| FetchError::Io { path: dest.to_path_buf(), source })?;

        Ok(written)
    }

    async fn copy_local(&self, source: &Path, dest: &Path) -> Result<u64, FetchError> {
        let meta = match fs::metadata(source).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::Missing(source.to_path_buf()));
            }
            Err(source_err) => {
                return Err(FetchError::Io { path: source.to_path_buf(), source: source_err });
            }
        };
        if meta.len() > self.max_bytes {
            return Err(FetchError::TooLarge { limit: self.max_bytes });
        }
        fs::copy(source, dest)
            .await
            .map_err(|source| FetchError::Io { path: dest.to_path_buf(), source })
    }
}
