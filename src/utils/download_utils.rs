use crate::config::HTTP_CLIENT;
use crate::error::{AppError, Result};
use futures::stream::StreamExt;
use log::{debug, error, info, warn};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Configuration for streaming file downloads.
pub struct DownloadConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Progress callback, invoked per received chunk with
    /// (bytes downloaded so far, total from content-length if known).
    pub progress_callback: Option<Box<dyn Fn(u64, Option<u64>) + Send + Sync>>,
}

impl std::fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("max_retries", &self.max_retries)
            .field("progress_callback", &"<callback function>")
            .finish()
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            progress_callback: None,
        }
    }
}

impl DownloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, Option<u64>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }
}

/// Central download utility for robust streaming downloads.
pub struct DownloadUtils;

impl DownloadUtils {
    /// Downloads a file from URL to target path, streaming to disk.
    pub async fn download_file<P: AsRef<Path>>(
        url: &str,
        target_path: P,
        config: DownloadConfig,
    ) -> Result<()> {
        let target_path = target_path.as_ref();
        debug!("Starting download: {} -> {:?}", url, target_path);

        let mut attempt = 0;
        let mut last_error = None;

        while attempt <= config.max_retries {
            if attempt > 0 {
                warn!("Retry attempt {}/{} for: {}", attempt, config.max_retries, url);
            }

            match Self::download_attempt(url, target_path, &config).await {
                Ok(()) => {
                    info!("Successfully downloaded: {} -> {:?}", url, target_path);
                    return Ok(());
                }
                Err(e) => {
                    error!("Download attempt {} failed for {}: {}", attempt + 1, url, e);
                    last_error = Some(e);
                    attempt += 1;

                    // Clean up partially downloaded file before the next attempt
                    if target_path.exists() {
                        debug!("Cleaning up partial file: {:?}", target_path);
                        if let Err(cleanup_err) = fs::remove_file(target_path).await {
                            warn!(
                                "Failed to clean up partial file {:?}: {}",
                                target_path, cleanup_err
                            );
                        }
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AppError::Download("Unknown download error".to_string())))
    }

    /// Simplified download with default configuration.
    pub async fn download_simple<P: AsRef<Path>>(url: &str, target_path: P) -> Result<()> {
        Self::download_file(url, target_path, DownloadConfig::default()).await
    }

    async fn download_attempt(
        url: &str,
        target_path: &Path,
        config: &DownloadConfig,
    ) -> Result<()> {
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let response = HTTP_CLIENT.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Download(format!(
                "Server returned status {} for {}",
                response.status(),
                url
            )));
        }

        let total_size = response.content_length();
        let mut downloaded: u64 = 0;

        let mut file = fs::File::create(target_path).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::Download(format!("Stream error: {}", e)))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(callback) = &config.progress_callback {
                callback(downloaded, total_size);
            }
        }

        file.flush().await?;
        Ok(())
    }
}
