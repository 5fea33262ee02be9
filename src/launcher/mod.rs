pub mod install;
pub mod launch;
pub mod loader;
pub mod runtime;

use crate::error::{AppError, Result};
use crate::state::event_state::{EventSink, EventState, LogLevel};
use crate::utils::path_utils::sanitize_instance_name;
use install::InstallService;
use launch::{
    forward_driver_events, AuthBlock, JavaProcessDriver, LaunchConfig, LaunchOptions,
    ProcessDriver, AIKAR_FLAGS,
};
use loader::{LoaderService, ModLoader};
use log::{error, info};
use runtime::RuntimeService;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

/// Uniform result of an install call.
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Uniform result of operations without a payload.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModListOutcome {
    pub success: bool,
    pub mods: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Launcher pipeline facade. Owns the directory roots, the event bridge and
/// the provisioning services; every public operation returns a uniform
/// result instead of raising, so the embedding layer only inspects outcomes.
pub struct Launcher {
    common_root: PathBuf,
    instances_root: PathBuf,
    events: Arc<EventState>,
    runtime: RuntimeService,
    loader: LoaderService,
    installer: InstallService,
    driver: Arc<dyn ProcessDriver>,
}

impl Launcher {
    /// Creates a launcher rooted at the given directories, creating them if
    /// needed.
    pub fn new(common_root: PathBuf, instances_root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&common_root)?;
        std::fs::create_dir_all(&instances_root)?;

        let events = Arc::new(EventState::new());
        Ok(Self {
            runtime: RuntimeService::new(&common_root, events.clone()),
            loader: LoaderService::new(&common_root, events.clone()),
            installer: InstallService::new(&common_root, &instances_root, events.clone()),
            driver: Arc::new(JavaProcessDriver),
            common_root,
            instances_root,
            events,
        })
    }

    /// Launcher rooted at the standard application data directories.
    pub fn with_default_dirs() -> Result<Self> {
        Self::new(crate::config::common_root(), crate::config::instances_root())
    }

    /// Replaces the process driver (test capture, alternative drivers).
    pub fn with_driver(mut self, driver: Arc<dyn ProcessDriver>) -> Self {
        self.driver = driver;
        self
    }

    /// Attaches an event sink to the progress bridge.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.events.add_sink(sink);
    }

    pub fn events(&self) -> Arc<EventState> {
        self.events.clone()
    }

    pub fn common_root(&self) -> &PathBuf {
        &self.common_root
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.instances_root.join(sanitize_instance_name(name))
    }

    /// Ensures a runtime compatible with `release` exists and returns its
    /// binary path.
    pub async fn ensure_runtime(&self, release: &str) -> Result<PathBuf> {
        self.runtime.ensure_runtime(release).await
    }

    /// Ensures the loader profile for `loader` is provisioned.
    pub async fn ensure_loader(&self, release: &str, loader: &ModLoader) -> Result<()> {
        self.loader.ensure_loader(release, loader).await
    }

    /// Downloads and installs a modpack archive into an isolated instance.
    pub async fn install_instance(
        &self,
        id: i64,
        name: &str,
        archive_url: &str,
    ) -> InstallOutcome {
        match self.installer.install(id, name, archive_url).await {
            Ok(path) => InstallOutcome {
                success: true,
                path: Some(path),
                error: None,
            },
            Err(e) => InstallOutcome {
                success: false,
                path: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Installs a modpack from an archive already on disk.
    pub async fn install_instance_from_archive(
        &self,
        name: &str,
        archive_path: &std::path::Path,
    ) -> InstallOutcome {
        match self.installer.install_from_archive(name, archive_path).await {
            Ok(path) => InstallOutcome {
                success: true,
                path: Some(path),
                error: None,
            },
            Err(e) => InstallOutcome {
                success: false,
                path: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Removes an instance directory entirely.
    pub async fn uninstall_instance(&self, id: i64, name: &str) -> OperationOutcome {
        match self.installer.uninstall(id, name).await {
            Ok(()) => OperationOutcome {
                success: true,
                error: None,
            },
            Err(e) => {
                error!("Uninstallation error: {}", e);
                OperationOutcome {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Lists the `.jar` files in an instance's mods folder.
    pub async fn list_mods(&self, _id: i64, name: &str) -> ModListOutcome {
        match self.installer.list_mods(name).await {
            Ok(mods) => ModListOutcome {
                success: true,
                mods,
                error: None,
            },
            Err(e) => {
                error!("Error reading mod list: {}", e);
                ModListOutcome {
                    success: false,
                    mods: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Assembles the launch configuration and dispatches the game process.
    /// Returns as soon as the start has been scheduled; start-time failures
    /// are reported asynchronously through the event bridge.
    pub async fn launch(&self, options: LaunchOptions) -> OperationOutcome {
        match self.prepare_and_dispatch(options).await {
            Ok(()) => OperationOutcome {
                success: true,
                error: None,
            },
            Err(e) => {
                error!("Launch error: {}", e);
                self.events
                    .emit_log(LogLevel::Error, format!("Error launching the game: {}", e));
                OperationOutcome {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn prepare_and_dispatch(&self, options: LaunchOptions) -> Result<()> {
        if options.release.trim().is_empty() {
            return Err(AppError::LauncherConfig(
                "No game version specified".to_string(),
            ));
        }

        let game_directory = self.instance_dir(&options.instance_name);
        info!(
            "Launching {} for {} at {:?}",
            options.release, options.name, game_directory
        );

        // Lenient policy: a failed runtime resolution falls back to whatever
        // java the system PATH provides instead of aborting the launch.
        let java_path = match self.runtime.ensure_runtime(&options.release).await {
            Ok(path) => {
                info!("Java path resolved: {:?}", path);
                Some(path)
            }
            Err(e) => {
                error!("Error managing Java: {}", e);
                self.events
                    .emit_log(LogLevel::Error, format!("Error managing Java: {}", e));
                None
            }
        };

        let mut forge_installer = None;
        match &options.loader {
            ModLoader::Forge(version) if options.loader.version().is_some() => {
                self.events
                    .emit_status(format!("Preparing forge {}...", version));
                // This loader kind cannot proceed without its installer.
                forge_installer = Some(
                    self.loader
                        .ensure_forge_installer(&options.release, version, &game_directory)
                        .await?,
                );
            }
            ModLoader::Fabric(version) if options.loader.version().is_some() => {
                self.events
                    .emit_status(format!("Preparing fabric {}...", version));
                if let Err(e) = self
                    .loader
                    .ensure_loader(&options.release, &options.loader)
                    .await
                {
                    error!("Error managing modloader: {}", e);
                    self.events.emit_log(
                        LogLevel::Error,
                        format!("Error managing Modloader: {}", e),
                    );
                }
            }
            _ => {
                info!("No modloader configured, launching vanilla");
            }
        }

        let custom_args = if options.aikar_flags {
            info!("Applying Aikar's Flags optimization...");
            AIKAR_FLAGS.iter().map(|flag| flag.to_string()).collect()
        } else {
            Vec::new()
        };

        // Loader wiring is mutually exclusive: installer > custom version >
        // vanilla.
        let custom_version = if forge_installer.is_some() {
            None
        } else {
            options.loader.version().map(|v| v.to_string())
        };

        match (&forge_installer, &custom_version) {
            (Some(installer), _) => {
                info!("Launching with forge installer: {:?}", installer);
                self.events.emit_log(
                    LogLevel::Info,
                    format!("Using Forge {}", options.loader.version().unwrap_or("?")),
                );
            }
            (None, Some(version)) => {
                info!("Using modloader version: {}", version);
                self.events.emit_log(
                    LogLevel::Info,
                    format!("Using modloader: {} ({})", options.loader.kind_name(), version),
                );
            }
            (None, None) => {
                info!("Launching vanilla version {}", options.release);
                self.events.emit_log(
                    LogLevel::Info,
                    format!("Launching Vanilla Minecraft {}", options.release),
                );
            }
        }

        let config = LaunchConfig {
            auth: AuthBlock {
                name: options.name,
                uuid: options.uuid,
                access_token: options.access_token,
                client_token: String::new(),
            },
            root: self.common_root.clone(),
            game_directory,
            java_path,
            release: options.release,
            memory: options.memory,
            detached: true,
            custom_args,
            forge_installer,
            custom_version,
        };

        self.events.emit_status("Starting game...");

        // Defer the actual start so this call can return and the caller can
        // render first. Start-time errors are logged, never propagated here.
        let driver = self.driver.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match driver.start(config).await {
                Ok(rx) => {
                    info!("Game process start dispatched");
                    forward_driver_events(rx, events).await;
                }
                Err(e) => {
                    error!("Error starting game process: {}", e);
                    events.emit_log(LogLevel::Error, format!("Error starting game: {}", e));
                }
            }
        });

        self.events.emit_log(LogLevel::Success, "Starting game...");
        Ok(())
    }

    /// Number of instance directories currently on disk.
    pub async fn installed_instances(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.instances_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
