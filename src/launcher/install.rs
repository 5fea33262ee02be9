use crate::error::{AppError, InstallStage, Result};
use crate::state::event_state::{DownloadProgress, EventState, LogLevel};
use crate::utils::download_utils::{DownloadConfig, DownloadUtils};
use crate::utils::path_utils::sanitize_instance_name;
use dashmap::DashMap;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::fs;

/// Folder names that are wiped before every install so an update never
/// merges with leftovers from the previous archive.
const MUTABLE_SUBFOLDERS: [&str; 2] = ["mods", "config"];

/// Folders relocated from a freshly extracted archive into the common root,
/// shared across all instances.
const SHARED_ASSET_FOLDERS: [&str; 2] = ["versions", "libraries"];

/// Reserved metadata filename ignored when deciding whether an extracted
/// archive needs flattening.
const INSTANCE_METADATA_FILE: &str = "instance.json";

/// Installs modpack archives into isolated instance directories.
pub struct InstallService {
    instances_root: PathBuf,
    common_root: PathBuf,
    events: Arc<EventState>,
    /// In-flight installs keyed by sanitized instance name. A second install
    /// of the same instance fails fast instead of racing on the directory.
    active_installs: DashMap<String, ()>,
}

struct InstallGuard<'a> {
    installs: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        self.installs.remove(&self.key);
    }
}

impl InstallService {
    pub fn new(common_root: &Path, instances_root: &Path, events: Arc<EventState>) -> Self {
        Self {
            instances_root: instances_root.to_path_buf(),
            common_root: common_root.to_path_buf(),
            events,
            active_installs: DashMap::new(),
        }
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.instances_root.join(sanitize_instance_name(name))
    }

    /// Downloads and installs a modpack archive. Returns the instance path.
    pub async fn install(&self, id: i64, name: &str, archive_url: &str) -> Result<PathBuf> {
        if archive_url.is_empty() {
            return Err(AppError::install(
                InstallStage::Download,
                "Modpack does not have a valid download URL",
            ));
        }

        let safe_name = sanitize_instance_name(name);
        let _guard = self.try_lock_instance(&safe_name)?;

        info!("Installing modpack: {} ({}) from {}", name, id, archive_url);
        let instance_dir = self.instances_root.join(&safe_name);
        let temp_archive = self.common_root.join(format!("temp_{}.zip", id));

        let result = self
            .run_install(id, &instance_dir, archive_url, &temp_archive)
            .await;

        match result {
            Ok(()) => {
                info!("Modpack installed at: {:?}", instance_dir);
                self.events.emit_log(
                    LogLevel::Success,
                    format!("Modpack installed successfully at {}", instance_dir.display()),
                );
                Ok(instance_dir)
            }
            Err(e) => {
                error!("Installation error: {}", e);
                self.events
                    .emit_log(LogLevel::Error, format!("Installation error: {}", e));
                // Always clean the temp archive; partially overlaid instance
                // state stays in place for diagnosis and retry.
                if temp_archive.exists() {
                    if let Err(cleanup_err) = fs::remove_file(&temp_archive).await {
                        warn!("Failed to remove temp archive: {}", cleanup_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Installs an already-downloaded archive file (local import path).
    pub async fn install_from_archive(
        &self,
        name: &str,
        archive_path: &Path,
    ) -> Result<PathBuf> {
        let safe_name = sanitize_instance_name(name);
        let _guard = self.try_lock_instance(&safe_name)?;

        let instance_dir = self.instances_root.join(&safe_name);
        self.prepare_instance_dir(&instance_dir).await?;
        self.overlay_archive(&instance_dir, archive_path).await?;
        Ok(instance_dir)
    }

    fn try_lock_instance(&self, safe_name: &str) -> Result<InstallGuard<'_>> {
        if self
            .active_installs
            .insert(safe_name.to_string(), ())
            .is_some()
        {
            return Err(AppError::InstallInProgress(safe_name.to_string()));
        }
        Ok(InstallGuard {
            installs: &self.active_installs,
            key: safe_name.to_string(),
        })
    }

    async fn run_install(
        &self,
        id: i64,
        instance_dir: &Path,
        archive_url: &str,
        temp_archive: &Path,
    ) -> Result<()> {
        self.prepare_instance_dir(instance_dir).await?;

        self.events.emit_status("Starting ZIP download...");
        self.download_archive(id, archive_url, temp_archive).await?;
        self.events.emit_log(
            LogLevel::Success,
            "Download complete. Extracting files...",
        );

        self.overlay_archive(instance_dir, temp_archive).await?;

        fs::remove_file(temp_archive).await?;
        Ok(())
    }

    async fn prepare_instance_dir(&self, instance_dir: &Path) -> Result<()> {
        fs::create_dir_all(instance_dir).await?;

        // Clean overlay policy: prior manual additions to mods/config are
        // removed on every reinstall or update.
        for folder in MUTABLE_SUBFOLDERS {
            let path = instance_dir.join(folder);
            if path.exists() {
                info!("Cleaning existing {} folder...", folder);
                fs::remove_dir_all(&path).await?;
            }
        }
        Ok(())
    }

    async fn download_archive(
        &self,
        id: i64,
        archive_url: &str,
        temp_archive: &Path,
    ) -> Result<()> {
        self.events
            .emit_log(LogLevel::Info, "Starting modpack download...");

        let events = self.events.clone();
        let last_logged_percentage = AtomicI64::new(-1);
        // A failed archive download surfaces immediately; retrying is the
        // caller's decision, a fresh install call starts clean.
        let config = DownloadConfig::new()
            .with_retries(0)
            .with_progress_callback(move |downloaded, total| {
                let Some(total) = total.filter(|t| *t > 0) else {
                    return;
                };
                let percentage = (downloaded * 100 / total).min(100) as u8;
                let downloaded_mb = downloaded as f64 / (1024.0 * 1024.0);
                let total_mb = total as f64 / (1024.0 * 1024.0);

                // Progress bar updates on every chunk; rendering throttles are
                // the consumer's concern.
                events.emit_download(DownloadProgress {
                    percentage,
                    kind: "modpack".to_string(),
                    downloaded_mb: Some(downloaded_mb),
                    total_mb: Some(total_mb),
                });

                // Log lines only at 10% boundaries, deduplicated.
                if percentage % 10 == 0
                    && last_logged_percentage.swap(percentage as i64, Ordering::Relaxed)
                        != percentage as i64
                {
                    let filled = (percentage as usize * 20) / 100;
                    let bar = format!("{}{}", "=".repeat(filled), " ".repeat(20 - filled));
                    events.emit_log(
                        LogLevel::Info,
                        format!(
                            "Downloading: [{}] {}% ({:.2}/{:.2} MB)",
                            bar, percentage, downloaded_mb, total_mb
                        ),
                    );
                }
            });

        DownloadUtils::download_file(archive_url, temp_archive, config)
            .await
            .map_err(|e| {
                AppError::install(
                    InstallStage::Download,
                    format!("Failed to download modpack {}: {}", id, e),
                )
            })
    }

    /// Extracts the archive into the instance directory, then normalizes the
    /// layout: flatten a superfluous wrapper folder and relocate shared
    /// assets into the common root.
    async fn overlay_archive(&self, instance_dir: &Path, archive_path: &Path) -> Result<()> {
        self.events.emit_status("Extracting modpack files...");

        let archive = archive_path.to_path_buf();
        let target = instance_dir.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::File::open(&archive)?;
            let mut zip = zip::ZipArchive::new(file)?;
            zip.extract(&target)?;
            Ok(())
        })
        .await?
        .map_err(|e| AppError::install(InstallStage::Extract, e.to_string()))?;

        if let Err(e) = flatten_instance_dir(instance_dir).await {
            // Non-fatal: an unflattened wrapper only costs a nested folder.
            error!("Error flattening instance folder: {}", e);
        }

        self.relocate_shared_assets(instance_dir).await?;
        Ok(())
    }

    /// Copies `versions/` and `libraries/` from the instance into the common
    /// root. Existing destination files are never overwritten and the source
    /// copy stays inside the instance.
    async fn relocate_shared_assets(&self, instance_dir: &Path) -> Result<()> {
        for folder in SHARED_ASSET_FOLDERS {
            let src = instance_dir.join(folder);
            if !src.exists() {
                continue;
            }

            info!("Found shared asset folder: {}. Copying to common root...", folder);
            let dest = self.common_root.join(folder);
            fs::create_dir_all(&dest).await?;

            let src_for_task = src.clone();
            let dest_for_task = dest.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let mut options = fs_extra::dir::CopyOptions::new();
                options.skip_exist = true;
                options.content_only = true;
                fs_extra::dir::copy(&src_for_task, &dest_for_task, &options)?;
                Ok(())
            })
            .await?
            .map_err(|e| AppError::install(InstallStage::Relocate, e.to_string()))?;

            self.events.emit_log(
                LogLevel::Info,
                format!("Synchronized shared assets ({}).", folder),
            );
        }
        Ok(())
    }

    /// Deletes the instance directory.
    pub async fn uninstall(&self, id: i64, name: &str) -> Result<()> {
        let instance_dir = self.instance_dir(name);
        info!("Uninstalling modpack: {} ({}) at {:?}", name, id, instance_dir);

        if instance_dir.exists() {
            fs::remove_dir_all(&instance_dir).await?;
            info!("Instance folder deleted: {:?}", instance_dir);
        }
        Ok(())
    }

    /// Sorted `.jar` filenames in the instance's mods folder. An absent
    /// folder is an empty list, not an error.
    pub async fn list_mods(&self, name: &str) -> Result<Vec<String>> {
        let mods_dir = self.instance_dir(name).join("mods");
        if !mods_dir.exists() {
            return Ok(Vec::new());
        }

        let mut mods = Vec::new();
        let mut entries = fs::read_dir(&mods_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.to_lowercase().ends_with(".jar") {
                mods.push(file_name);
            }
        }
        mods.sort();
        Ok(mods)
    }
}

/// Promotes the children of a single wrapper directory one level up, once.
/// Temp downloads and the instance metadata file are ignored when counting
/// entries; collisions are overwritten by the promoted children.
pub async fn flatten_instance_dir(instance_dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(instance_dir).await?;
    let mut relevant = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("temp_") || name == INSTANCE_METADATA_FILE {
            continue;
        }
        relevant.push(entry.path());
    }

    let [wrapper] = relevant.as_slice() else {
        return Ok(());
    };
    if !wrapper.is_dir() {
        return Ok(());
    }

    info!("Flattening nested folder: {:?}", wrapper.file_name());
    let mut nested = fs::read_dir(&wrapper).await?;
    while let Some(entry) = nested.next_entry().await? {
        let src = entry.path();
        let dest = instance_dir.join(entry.file_name());
        if dest.exists() {
            if dest.is_dir() {
                fs::remove_dir_all(&dest).await?;
            } else {
                fs::remove_file(&dest).await?;
            }
        }
        fs::rename(&src, &dest).await?;
    }
    fs::remove_dir(wrapper).await?;
    Ok(())
}
