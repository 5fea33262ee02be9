use directories::ProjectDirs;
use once_cell::sync::Lazy;
use reqwest::Client;
use std::path::PathBuf;

pub static LAUNCHER_DIRECTORY: Lazy<ProjectDirs> =
    Lazy::new(
        || match ProjectDirs::from("com", "soulx", "SoulLauncher") {
            Some(proj_dirs) => proj_dirs,
            None => panic!("Failed to get application directory"),
        },
    );

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// HTTP Client with launcher agent
pub static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    let client = reqwest::ClientBuilder::new()
        .user_agent(APP_USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new());
    client
});

/// Shared root for assets, libraries, versions and runtimes. Large immutable
/// files live here once and are reused by every instance.
pub fn common_root() -> PathBuf {
    LAUNCHER_DIRECTORY.data_dir().join("minecraft")
}

/// Root for isolated per-modpack instances (mods, config, saves).
pub fn instances_root() -> PathBuf {
    LAUNCHER_DIRECTORY.data_dir().join("instances")
}

/// Fixed location of the persisted auth session.
pub fn session_file() -> PathBuf {
    LAUNCHER_DIRECTORY.data_dir().join("session.json")
}
