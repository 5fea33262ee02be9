use crate::config::HTTP_CLIENT;
use crate::error::{AppError, Result};
use crate::state::event_state::{EventState, LogLevel};
use crate::utils::download_utils::DownloadUtils;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

pub const FABRIC_META_BASE: &str = "https://meta.fabricmc.net/v2/versions/loader";
pub const FORGE_MAVEN_BASE: &str = "https://maven.minecraftforge.net/net/minecraftforge/forge";

/// Mod loader attached to an install or launch request.
///
/// Fabric is manifest-based: a JSON profile fetched from the meta endpoint is
/// all that is needed. Forge is installer-based: a runnable installer jar is
/// downloaded at launch time and handed to the process driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "version", rename_all = "lowercase")]
pub enum ModLoader {
    #[default]
    Vanilla,
    Fabric(String),
    Forge(String),
}

impl ModLoader {
    /// Loader version, if one is configured. An empty version string counts
    /// as "no loader configured".
    pub fn version(&self) -> Option<&str> {
        match self {
            ModLoader::Vanilla => None,
            ModLoader::Fabric(v) | ModLoader::Forge(v) => {
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ModLoader::Vanilla => "vanilla",
            ModLoader::Fabric(_) => "fabric",
            ModLoader::Forge(_) => "forge",
        }
    }
}

/// Provisions loader profiles in the shared `<common>/versions` root.
pub struct LoaderService {
    versions_dir: PathBuf,
    meta_base: String,
    maven_base: String,
    events: Arc<EventState>,
}

impl LoaderService {
    pub fn new(common_root: &Path, events: Arc<EventState>) -> Self {
        Self {
            versions_dir: common_root.join("versions"),
            meta_base: FABRIC_META_BASE.to_string(),
            maven_base: FORGE_MAVEN_BASE.to_string(),
            events,
        }
    }

    fn profile_path(&self, loader_version: &str) -> PathBuf {
        self.versions_dir
            .join(loader_version)
            .join(format!("{}.json", loader_version))
    }

    /// Ensures the loader profile for `loader` is present in the shared
    /// versions root. No-op for vanilla or an empty loader version, and
    /// idempotent: an existing profile file short-circuits before any
    /// network call.
    pub async fn ensure_loader(&self, release: &str, loader: &ModLoader) -> Result<()> {
        let Some(loader_version) = loader.version() else {
            return Ok(());
        };

        let expected_profile = self.profile_path(loader_version);
        if expected_profile.exists() {
            info!(
                "{} {} already installed.",
                loader.kind_name(),
                loader_version
            );
            return Ok(());
        }

        info!("Preparing {} {}...", loader.kind_name(), loader_version);
        self.events
            .emit_status(format!("Installing {}...", loader.kind_name()));

        let version_dir = self.versions_dir.join(loader_version);
        fs::create_dir_all(&version_dir).await?;

        match loader {
            ModLoader::Vanilla => Ok(()),
            ModLoader::Fabric(_) => {
                self.install_fabric_profile(release, loader_version, &expected_profile)
                    .await
            }
            ModLoader::Forge(_) => {
                // Forge has no fetchable profile document; the best we can do
                // here is repair a profile left behind under another name.
                self.heal_forge_profile(&version_dir, &expected_profile)
                    .await?;
                Ok(())
            }
        }
    }

    async fn install_fabric_profile(
        &self,
        release: &str,
        loader_version: &str,
        target_profile: &Path,
    ) -> Result<()> {
        let url = format!(
            "{}/{}/{}/profile/json",
            self.meta_base, release, loader_version
        );
        debug!("Fetching fabric profile: {}", url);

        let response = HTTP_CLIENT.get(&url).send().await.map_err(|e| {
            AppError::LoaderFetch(format!("Fabric profile request failed: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(AppError::LoaderFetch(format!(
                "Fabric meta returned status {} for {}/{}",
                response.status(),
                release,
                loader_version
            )));
        }

        // Parse before writing so a malformed payload never lands on disk as
        // a valid-looking profile.
        let profile: serde_json::Value = response.json().await.map_err(|e| {
            AppError::LoaderFetch(format!("Malformed fabric profile payload: {}", e))
        })?;

        fs::write(target_profile, serde_json::to_vec_pretty(&profile)?).await?;
        info!("Fabric {} profile created.", loader_version);
        Ok(())
    }

    /// Looks for any other `*.json` in the version directory and copies it
    /// into the expected profile name. Recovers installs whose descriptor was
    /// written under a mismatched name.
    async fn heal_forge_profile(&self, version_dir: &Path, target_profile: &Path) -> Result<bool> {
        let expected_name = target_profile
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let mut entries = fs::read_dir(version_dir).await?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") && name != expected_name {
                fs::copy(entry.path(), target_profile).await?;
                info!("Forge profile corrected from {}", name);
                self.events.emit_log(
                    LogLevel::Info,
                    format!("Forge configuration file corrected ({}).", name),
                );
                return Ok(true);
            }
        }

        warn!(
            "No forge profile available in {:?}; installer will provide one at launch.",
            version_dir
        );
        Ok(false)
    }

    /// Downloads the forge installer jar for `release`/`forge_version` into
    /// the instance directory, keyed by the composite `<release>-<version>`
    /// identifier. Idempotent by file existence.
    pub async fn ensure_forge_installer(
        &self,
        release: &str,
        forge_version: &str,
        instance_dir: &Path,
    ) -> Result<PathBuf> {
        let full_version = format!("{}-{}", release, forge_version);
        let installer_name = format!("forge-{}-installer.jar", full_version);
        let installer_path = instance_dir.join(&installer_name);

        if installer_path.exists() {
            info!("Using existing forge installer at {:?}", installer_path);
            return Ok(installer_path);
        }

        let installer_url = format!("{}/{}/{}", self.maven_base, full_version, installer_name);
        info!("Downloading forge installer from: {}", installer_url);
        self.events.emit_log(
            LogLevel::Info,
            format!("Downloading Forge installer {}...", forge_version),
        );

        fs::create_dir_all(instance_dir).await?;
        DownloadUtils::download_simple(&installer_url, &installer_path)
            .await
            .map_err(|e| {
                AppError::LoaderInstaller(format!(
                    "Could not download Forge installer {}: {}",
                    full_version, e
                ))
            })?;

        Ok(installer_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(dir: &Path) -> LoaderService {
        LoaderService::new(dir, Arc::new(EventState::new()))
    }

    #[tokio::test]
    async fn vanilla_and_empty_versions_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let loader = service(dir.path());

        loader
            .ensure_loader("1.20.1", &ModLoader::Vanilla)
            .await
            .unwrap();
        loader
            .ensure_loader("1.20.1", &ModLoader::Fabric(String::new()))
            .await
            .unwrap();
        assert!(!dir.path().join("versions").exists());
    }

    #[tokio::test]
    async fn existing_profile_short_circuits_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("versions").join("0.15.11");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("0.15.11.json"), b"{}").unwrap();

        let loader = service(dir.path());
        // The meta endpoint is unreachable, so success proves no fetch happened.
        let result = loader
            .ensure_loader("1.20.1", &ModLoader::Fabric("0.15.11".to_string()))
            .await;
        assert!(result.is_ok());

        let again = loader
            .ensure_loader("1.20.1", &ModLoader::Fabric("0.15.11".to_string()))
            .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn forge_profile_heals_from_mismatched_name() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("versions").join("47.2.0");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("1.20.1-forge-47.2.0.json"), b"{\"id\":1}").unwrap();

        let loader = service(dir.path());
        loader
            .ensure_loader("1.20.1", &ModLoader::Forge("47.2.0".to_string()))
            .await
            .unwrap();

        let healed = version_dir.join("47.2.0.json");
        assert!(healed.exists());
        assert_eq!(std::fs::read(healed).unwrap(), b"{\"id\":1}");
    }

    #[tokio::test]
    async fn existing_forge_installer_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let instance_dir = dir.path().join("instance");
        std::fs::create_dir_all(&instance_dir).unwrap();
        let installer = instance_dir.join("forge-1.20.1-47.2.0-installer.jar");
        std::fs::write(&installer, b"jar").unwrap();

        let loader = service(dir.path());
        let path = loader
            .ensure_forge_installer("1.20.1", "47.2.0", &instance_dir)
            .await
            .unwrap();
        assert_eq!(path, installer);
    }

    #[test]
    fn loader_serializes_as_tagged_variant() {
        let json = serde_json::to_value(ModLoader::Fabric("0.15.11".to_string())).unwrap();
        assert_eq!(json["kind"], "fabric");
        assert_eq!(json["version"], "0.15.11");
    }
}
