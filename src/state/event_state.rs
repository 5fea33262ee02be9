use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Severity attached to a forwarded log line, mirrored 1:1 into the UI console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub message: String,
    #[serde(rename = "type")]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    pub percentage: u8,
    /// What is being downloaded ("java", "modpack", or a driver task kind).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_mb: Option<f64>,
}

/// Outbound progress stream, serialized as `{type: status|download|log, data}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LauncherEvent {
    Status(String),
    Download(DownloadProgress),
    Log(LogLine),
}

/// Write-only sink the pipeline publishes into. Implementations must never
/// block and must swallow delivery failures; a torn-down UI surface simply
/// stops receiving.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &LauncherEvent);
}

/// Fan-out bridge between the pipeline and whatever sinks the host attached.
/// Emission is best-effort and infallible end to end.
#[derive(Default)]
pub struct EventState {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.push(sink);
        }
    }

    pub fn emit(&self, event: LauncherEvent) {
        let Ok(sinks) = self.sinks.read() else {
            return;
        };
        for sink in sinks.iter() {
            sink.publish(&event);
        }
    }

    pub fn emit_status(&self, message: impl Into<String>) {
        self.emit(LauncherEvent::Status(message.into()));
    }

    pub fn emit_log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(LauncherEvent::Log(LogLine {
            message: message.into(),
            level,
        }));
    }

    pub fn emit_download(&self, progress: DownloadProgress) {
        self.emit(LauncherEvent::Download(progress));
    }
}

/// Mirrors launcher events into the `log` facade. Composable with a UI sink.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &LauncherEvent) {
        match event {
            LauncherEvent::Status(message) => log::info!("[STATUS] {}", message),
            LauncherEvent::Download(progress) => {
                log::debug!("[DOWNLOAD] {} {}%", progress.kind, progress.percentage)
            }
            LauncherEvent::Log(line) => match line.level {
                LogLevel::Error => log::error!("{}", line.message),
                _ => log::info!("{}", line.message),
            },
        }
    }
}

/// Minimum-interval gate for chatty event streams. `allow` returns true at
/// most once per configured interval.
pub struct EmitThrottle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl EmitThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn allow(&self) -> bool {
        let Ok(mut last) = self.last.lock() else {
            return true;
        };
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
