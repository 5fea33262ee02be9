use crate::config::HTTP_CLIENT;
use crate::error::{AppError, Result};
use crate::state::event_state::{DownloadProgress, EventState, LogLevel};
use crate::utils::download_utils::{DownloadConfig, DownloadUtils};
use flate2::read::GzDecoder;
use log::{debug, error, info};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::Archive;
use tokio::fs;

pub const RELEASE_INDEX_BASE: &str = "https://api.adoptium.net/v3/assets/feature_releases";

#[cfg(target_os = "windows")]
const JAVA_BINARY_NAME: &str = "javaw.exe";
#[cfg(not(target_os = "windows"))]
const JAVA_BINARY_NAME: &str = "java";

#[cfg(target_os = "windows")]
const ARCHIVE_EXTENSION: &str = "zip";
#[cfg(not(target_os = "windows"))]
const ARCHIVE_EXTENSION: &str = "tar.gz";

#[derive(Debug, Deserialize)]
pub struct ReleaseAsset {
    pub binaries: Vec<ReleaseBinary>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseBinary {
    pub package: ReleasePackage,
}

#[derive(Debug, Deserialize)]
pub struct ReleasePackage {
    pub link: String,
}

/// Maps a game release string to the Java major version it needs.
///
/// The release is parsed tolerantly: qualifiers after a space or hyphen are
/// dropped ("1.20.1-fabric" -> "1.20.1"), and anything that does not parse as
/// a dotted numeric version falls back to the legacy tier.
pub fn required_java_major(release: &str) -> u32 {
    let clean = release
        .split(' ')
        .next()
        .unwrap_or("")
        .split('-')
        .next()
        .unwrap_or("");

    let mut parts = clean.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);

    debug!(
        "Resolving Java tier for release '{}' (parsed as {}.{}.{})",
        release, major, minor, patch
    );

    // 1.20.5+ needs Java 21
    if major == 1 && (minor > 20 || (minor == 20 && patch >= 5)) {
        return 21;
    }
    // 1.17 - 1.20.4 needs Java 17
    if major == 1 && minor >= 17 {
        return 17;
    }
    // <= 1.16.5 and anything unparseable runs on Java 8
    8
}

/// Resolves and caches managed Java runtimes under `<common>/runtimes`.
/// Each major version gets its own directory and is never updated in place.
pub struct RuntimeService {
    runtime_root: PathBuf,
    index_base: String,
    events: Arc<EventState>,
}

impl RuntimeService {
    pub fn new(common_root: &Path, events: Arc<EventState>) -> Self {
        Self {
            runtime_root: common_root.join("runtimes"),
            index_base: RELEASE_INDEX_BASE.to_string(),
            events,
        }
    }

    /// Returns the path of a Java binary compatible with `release`, downloading
    /// and extracting a runtime on cache miss.
    pub async fn ensure_runtime(&self, release: &str) -> Result<PathBuf> {
        let major = required_java_major(release);
        let runtime_dir = self.runtime_root.join(format!("java-{}", major));

        // Vendor archives nest the JDK inside an extra folder, so search
        // recursively instead of probing fixed paths.
        if let Some(binary) = find_java_binary(&runtime_dir).await {
            info!("Java {} found at {:?}", major, binary);
            self.events.emit_log(
                LogLevel::Info,
                format!("Java {} detected on the system.", major),
            );
            return Ok(binary);
        }

        self.events.emit_log(
            LogLevel::Info,
            format!("Java {} not found. Starting automatic download...", major),
        );
        info!("Java {} not found. Starting download...", major);

        let download_url = self.fetch_download_url(major).await?;
        let temp_archive = self
            .runtime_root
            .join(format!("java-{}.{}", major, ARCHIVE_EXTENSION));

        let events = self.events.clone();
        let config = DownloadConfig::new().with_progress_callback(move |downloaded, total| {
            // Percentage events only make sense when the server told us the size.
            if let Some(total) = total.filter(|t| *t > 0) {
                let percentage = (downloaded * 100 / total).min(100) as u8;
                events.emit_download(DownloadProgress {
                    percentage,
                    kind: "java".to_string(),
                    downloaded_mb: Some(downloaded as f64 / (1024.0 * 1024.0)),
                    total_mb: Some(total as f64 / (1024.0 * 1024.0)),
                });
            }
        });

        DownloadUtils::download_file(&download_url, &temp_archive, config)
            .await
            .map_err(|e| {
                AppError::RuntimeAcquisition(format!("Failed to download Java {}: {}", major, e))
            })?;

        self.events
            .emit_status(format!("Extracting Java {}...", major));
        self.events.emit_log(
            LogLevel::Success,
            format!("Java {} download complete. Extracting...", major),
        );

        // Decompression is CPU-bound, run it off the async executor.
        let archive_for_task = temp_archive.clone();
        let target_for_task = runtime_dir.clone();
        tokio::task::spawn_blocking(move || extract_runtime_archive(&archive_for_task, &target_for_task))
            .await?
            .map_err(|e| {
                AppError::RuntimeAcquisition(format!("Failed to extract Java {}: {}", major, e))
            })?;

        fs::remove_file(&temp_archive).await?;

        match find_java_binary(&runtime_dir).await {
            Some(binary) => {
                self.events.emit_log(
                    LogLevel::Success,
                    format!("Java {} installed successfully.", major),
                );
                Ok(binary)
            }
            None => {
                error!(
                    "No Java binary found in {:?} after extraction",
                    runtime_dir
                );
                Err(AppError::RuntimeAcquisition(format!(
                    "No Java binary found for version {} after extraction",
                    major
                )))
            }
        }
    }

    async fn fetch_download_url(&self, major: u32) -> Result<String> {
        let url = format!(
            "{}/{}/ga?architecture=x64&image_type=jre&os={}&vendor=eclipse",
            self.index_base,
            major,
            os_query_name()
        );
        debug!("Querying release index: {}", url);

        let response = HTTP_CLIENT.get(&url).send().await.map_err(|e| {
            AppError::RuntimeAcquisition(format!("Release index request failed: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(AppError::RuntimeAcquisition(format!(
                "Release index returned status {} for Java {}",
                response.status(),
                major
            )));
        }

        let assets: Vec<ReleaseAsset> = response.json().await.map_err(|e| {
            AppError::RuntimeAcquisition(format!("Malformed release index response: {}", e))
        })?;

        assets
            .first()
            .and_then(|asset| asset.binaries.first())
            .map(|binary| binary.package.link.clone())
            .ok_or_else(|| {
                AppError::RuntimeAcquisition(format!(
                    "Release index has no binary package for Java {}",
                    major
                ))
            })
    }
}

fn os_query_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "mac"
    } else {
        "linux"
    }
}

/// Recursively searches `dir` for the platform Java binary inside a `bin`
/// directory, tolerating the vendor-added nesting of extracted archives.
pub async fn find_java_binary(dir: &Path) -> Option<PathBuf> {
    if !dir.exists() {
        return None;
    }

    let mut dirs_to_search = vec![dir.to_path_buf()];
    while let Some(current_dir) = dirs_to_search.pop() {
        let Ok(mut entries) = fs::read_dir(&current_dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                dirs_to_search.push(path);
            } else if path.file_name().and_then(|n| n.to_str()) == Some(JAVA_BINARY_NAME)
                && path
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    == Some("bin")
            {
                #[cfg(unix)]
                ensure_executable(&path).await;
                debug!("Found Java binary at: {:?}", path);
                return Some(path);
            }
        }
    }
    None
}

#[cfg(unix)]
async fn ensure_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = fs::metadata(path).await {
        if metadata.permissions().mode() & 0o111 == 0 {
            let mut permissions = metadata.permissions();
            permissions.set_mode(metadata.permissions().mode() | 0o111);
            let _ = fs::set_permissions(path, permissions).await;
        }
    }
}

fn extract_runtime_archive(archive_path: &Path, target_dir: &Path) -> Result<()> {
    info!("Extracting runtime archive {:?} to {:?}", archive_path, target_dir);
    std::fs::create_dir_all(target_dir)?;

    match archive_path.extension().and_then(|e| e.to_str()) {
        Some("zip") => {
            let file = File::open(archive_path)?;
            let mut archive = zip::ZipArchive::new(file)?;
            archive.extract(target_dir)?;
        }
        _ => {
            let file = File::open(archive_path)?;
            let gz = GzDecoder::new(file);
            let mut archive = Archive::new(gz);
            archive.unpack(target_dir)?;
        }
    }

    info!("Finished runtime archive extraction.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries() {
        assert_eq!(required_java_major("1.16.5"), 8);
        assert_eq!(required_java_major("1.17.0"), 17);
        assert_eq!(required_java_major("1.20.4"), 17);
        assert_eq!(required_java_major("1.20.5"), 21);
        assert_eq!(required_java_major("1.21.1"), 21);
    }

    #[test]
    fn qualifiers_are_stripped() {
        assert_eq!(required_java_major("1.20.1-fabric"), 17);
        assert_eq!(required_java_major("1.20.6 OptiFine"), 21);
    }

    #[test]
    fn malformed_release_degrades_to_legacy() {
        assert_eq!(required_java_major(""), 8);
        assert_eq!(required_java_major("snapshot-24w14a"), 8);
        assert_eq!(required_java_major("not.a.version"), 8);
    }

    #[test]
    fn requirement_is_monotonic_over_releases() {
        let releases = [
            "1.8.9", "1.12.2", "1.16.5", "1.17.0", "1.18.2", "1.20.4", "1.20.5", "1.21.0",
        ];
        let majors: Vec<u32> = releases.iter().map(|r| required_java_major(r)).collect();
        assert!(majors.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn binary_search_requires_bin_parent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("jdk-17.0.2+8-jre").join("bin");
        std::fs::create_dir_all(&nested).unwrap();
        // Decoy outside a bin directory must be ignored.
        std::fs::write(dir.path().join(JAVA_BINARY_NAME), b"decoy").unwrap();
        std::fs::write(nested.join(JAVA_BINARY_NAME), b"binary").unwrap();

        let found = find_java_binary(dir.path()).await.unwrap();
        assert_eq!(found, nested.join(JAVA_BINARY_NAME));
    }

    #[tokio::test]
    async fn missing_directory_yields_none() {
        assert!(find_java_binary(Path::new("/nonexistent/java-99")).await.is_none());
    }
}
