use crate::error::{AppError, Result};
use crate::launcher::loader::ModLoader;
use crate::state::event_state::{
    DownloadProgress, EmitThrottle, EventState, LogLevel,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Aikar's GC tuning profile, passed through verbatim to the JVM.
pub const AIKAR_FLAGS: [&str; 18] = [
    "-XX:+UseG1GC",
    "-XX:+ParallelRefProcEnabled",
    "-XX:MaxGCPauseMillis=200",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+DisableExplicitGC",
    "-XX:+AlwaysPreTouch",
    "-XX:G1NewSizePercent=30",
    "-XX:G1MaxNewSizePercent=40",
    "-XX:G1HeapRegionSize=8M",
    "-XX:G1ReservePercent=20",
    "-XX:G1HeapWastePercent=5",
    "-XX:G1MixedGCCountTarget=4",
    "-XX:InitiatingHeapOccupancyPercent=15",
    "-XX:G1MixedGCLiveThresholdPercent=90",
    "-XX:G1RSetUpdatingPauseTimePercent=5",
    "-XX:SurvivorRatio=32",
    "-XX:+PerfDisableSharedMem",
    "-XX:MaxTenuringThreshold=1",
];

const PROGRESS_THROTTLE: Duration = Duration::from_millis(250);
const STATUS_THROTTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub min: String,
    pub max: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            min: "2G".to_string(),
            max: "4G".to_string(),
        }
    }
}

/// Caller-supplied launch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub name: String,
    pub uuid: String,
    pub access_token: String,
    /// Target game release, e.g. "1.20.1". Required.
    pub release: String,
    #[serde(default)]
    pub loader: ModLoader,
    pub instance_id: i64,
    pub instance_name: String,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub aikar_flags: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthBlock {
    pub name: String,
    pub uuid: String,
    pub access_token: String,
    pub client_token: String,
}

/// Fully assembled process-invocation configuration handed to the driver.
/// `forge_installer` and `custom_version` are mutually exclusive; the
/// installer wins when both could apply.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchConfig {
    pub auth: AuthBlock,
    /// Common root with shared assets, libraries and version descriptors.
    pub root: PathBuf,
    /// Isolated instance directory for mods, config and saves.
    pub game_directory: PathBuf,
    pub java_path: Option<PathBuf>,
    pub release: String,
    pub memory: MemorySettings,
    /// Always true: a blocking child would hang the orchestrator.
    pub detached: bool,
    pub custom_args: Vec<String>,
    pub forge_installer: Option<PathBuf>,
    pub custom_version: Option<String>,
}

/// Events produced by the process driver while starting and running the game.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Debug(String),
    Data(String),
    Progress { task: u64, total: u64, kind: String },
    Status(String),
    Error(String),
    Close(Option<i32>),
}

/// Metadata of a spawned game process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessMetadata {
    pub id: Uuid,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub release: String,
}

/// Starts the game process from an assembled [`LaunchConfig`] and streams
/// driver events until the process exits. The process must be started
/// detached from the orchestrator's lifetime.
#[async_trait]
pub trait ProcessDriver: Send + Sync {
    async fn start(&self, config: LaunchConfig) -> Result<mpsc::UnboundedReceiver<DriverEvent>>;
}

/// Default driver: spawns the resolved Java binary directly with memory
/// bounds, tuning flags and classic game arguments, detached, and forwards
/// the child's output streams as driver events.
pub struct JavaProcessDriver;

impl JavaProcessDriver {
    fn build_command(config: &LaunchConfig) -> std::process::Command {
        let java = config
            .java_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("java"));
        let mut command = std::process::Command::new(java);

        command.arg(format!("-Xms{}", config.memory.min));
        command.arg(format!("-Xmx{}", config.memory.max));
        command.args(&config.custom_args);

        if let Some(installer) = &config.forge_installer {
            // Installer-based loaders self-install into the common root
            // before the launcher profile can be used.
            command.arg("-jar").arg(installer);
            command.arg("--installClient").arg(&config.root);
        } else {
            let version = config
                .custom_version
                .as_deref()
                .unwrap_or(&config.release);
            let version_jar = config
                .root
                .join("versions")
                .join(version)
                .join(format!("{}.jar", version));
            command.arg("-jar").arg(version_jar);
            command.arg("--username").arg(&config.auth.name);
            command.arg("--uuid").arg(&config.auth.uuid);
            command.arg("--accessToken").arg(&config.auth.access_token);
            command.arg("--version").arg(version);
            command.arg("--gameDir").arg(&config.game_directory);
        }

        command.current_dir(&config.game_directory);
        command
    }
}

#[async_trait]
impl ProcessDriver for JavaProcessDriver {
    async fn start(&self, config: LaunchConfig) -> Result<mpsc::UnboundedReceiver<DriverEvent>> {
        let mut command = Self::build_command(&config);
        debug!("Final launch command: {:?}", command);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x00000008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            debug!("Applying DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP for Windows detachment.");
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut tokio_command = tokio::process::Command::from(command);
        let mut child = tokio_command.spawn().map_err(|e| {
            error!("Failed to spawn game process: {}", e);
            AppError::ProcessSpawnFailed(e.to_string())
        })?;

        let pid = child
            .id()
            .ok_or_else(|| AppError::ProcessSpawnFailed("Could not get PID".to_string()))?;
        let metadata = ProcessMetadata {
            id: Uuid::new_v4(),
            pid,
            start_time: Utc::now(),
            release: config.release.clone(),
        };
        info!(
            "Game process spawned. ID: {}, PID: {}",
            metadata.id, metadata.pid
        );

        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send(DriverEvent::Data(line));
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send(DriverEvent::Error(line));
                }
            });
        }

        // Monitor task: the child lives independently of the caller, only the
        // exit code is reported back.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let _ = tx.send(DriverEvent::Close(status.code()));
                }
                Err(e) => {
                    let _ = tx.send(DriverEvent::Error(format!(
                        "Failed to wait for game process: {}",
                        e
                    )));
                    let _ = tx.send(DriverEvent::Close(None));
                }
            }
        });

        Ok(rx)
    }
}

/// Forwards driver events into the bridge, applying the documented rate
/// limits. Debug and raw data events are dropped; everything else is
/// best-effort.
pub async fn forward_driver_events(
    mut rx: mpsc::UnboundedReceiver<DriverEvent>,
    events: Arc<EventState>,
) {
    let progress_throttle = EmitThrottle::new(PROGRESS_THROTTLE);
    let status_throttle = EmitThrottle::new(STATUS_THROTTLE);

    while let Some(event) = rx.recv().await {
        match event {
            DriverEvent::Debug(_) | DriverEvent::Data(_) => {}
            DriverEvent::Progress { task, total, kind } => {
                if total > 0 && progress_throttle.allow() {
                    let percentage = (task * 100 / total).min(100) as u8;
                    events.emit_download(DownloadProgress {
                        percentage,
                        kind,
                        downloaded_mb: None,
                        total_mb: None,
                    });
                }
            }
            DriverEvent::Status(status) => {
                if status_throttle.allow() {
                    events.emit_status(status);
                }
            }
            DriverEvent::Error(message) => {
                error!("[driver] {}", message);
                events.emit_log(LogLevel::Error, message);
            }
            DriverEvent::Close(code) => {
                info!("Game closed with code: {:?}", code);
                events.emit_log(
                    LogLevel::Info,
                    format!(
                        "Game closed with code: {}",
                        code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::event_state::{EventSink, LauncherEvent};
    use std::sync::Mutex;

    struct CaptureSink(Mutex<Vec<LauncherEvent>>);

    impl EventSink for CaptureSink {
        fn publish(&self, event: &LauncherEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn config_template() -> LaunchConfig {
        LaunchConfig {
            auth: AuthBlock {
                name: "Steve".to_string(),
                uuid: "uuid".to_string(),
                access_token: "token".to_string(),
                client_token: String::new(),
            },
            root: PathBuf::from("/common"),
            game_directory: PathBuf::from("/instances/test"),
            java_path: None,
            release: "1.20.1".to_string(),
            memory: MemorySettings::default(),
            detached: true,
            custom_args: Vec::new(),
            forge_installer: None,
            custom_version: None,
        }
    }

    fn args_of(command: &std::process::Command) -> Vec<String> {
        command
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn vanilla_command_uses_release_version_jar() {
        let command = JavaProcessDriver::build_command(&config_template());
        let args = args_of(&command);
        assert!(args.contains(&"-Xms2G".to_string()));
        assert!(args.contains(&"-Xmx4G".to_string()));
        assert!(args.iter().any(|a| a.ends_with("1.20.1.jar")));
        assert!(args.contains(&"--username".to_string()));
    }

    #[test]
    fn forge_installer_takes_priority_over_custom_version() {
        let mut config = config_template();
        config.forge_installer = Some(PathBuf::from("/instances/test/forge-installer.jar"));
        config.custom_version = Some("1.20.1-forge-47.2.0".to_string());

        let args = args_of(&JavaProcessDriver::build_command(&config));
        assert!(args.contains(&"--installClient".to_string()));
        assert!(!args.iter().any(|a| a.contains("--username")));
    }

    #[test]
    fn custom_version_overrides_release() {
        let mut config = config_template();
        config.custom_version = Some("fabric-loader-0.15.11".to_string());

        let args = args_of(&JavaProcessDriver::build_command(&config));
        assert!(args.iter().any(|a| a.ends_with("fabric-loader-0.15.11.jar")));
    }

    #[test]
    fn aikar_flags_are_passed_verbatim() {
        let mut config = config_template();
        config.custom_args = AIKAR_FLAGS.iter().map(|f| f.to_string()).collect();

        let args = args_of(&JavaProcessDriver::build_command(&config));
        assert!(args.contains(&"-XX:+UseG1GC".to_string()));
        assert!(args.contains(&"-XX:MaxTenuringThreshold=1".to_string()));
    }

    #[tokio::test]
    async fn debug_and_data_events_are_dropped() {
        let events = Arc::new(EventState::new());
        let sink = Arc::new(CaptureSink(Mutex::new(Vec::new())));
        events.add_sink(sink.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(DriverEvent::Debug("noise".to_string())).unwrap();
        tx.send(DriverEvent::Data("raw".to_string())).unwrap();
        tx.send(DriverEvent::Close(Some(0))).unwrap();
        drop(tx);

        forward_driver_events(rx, events).await;

        let captured = sink.0.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert!(matches!(&captured[0], LauncherEvent::Log(line) if line.message.contains("0")));
    }

    #[tokio::test]
    async fn progress_events_are_rate_limited() {
        let events = Arc::new(EventState::new());
        let sink = Arc::new(CaptureSink(Mutex::new(Vec::new())));
        events.add_sink(sink.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        for task in 0..10 {
            tx.send(DriverEvent::Progress {
                task,
                total: 10,
                kind: "assets".to_string(),
            })
            .unwrap();
        }
        drop(tx);

        forward_driver_events(rx, events).await;

        // All ten arrive within one throttle window, only the first passes.
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
