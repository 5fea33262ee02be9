pub mod config;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod state;
pub mod utils;

pub use error::{AppError, CommandError, Result};
pub use launcher::launch::{LaunchOptions, MemorySettings};
pub use launcher::loader::ModLoader;
pub use launcher::Launcher;
pub use state::event_state::{EventSink, LauncherEvent};
pub use state::session_state::{AuthProvider, SessionManager};
