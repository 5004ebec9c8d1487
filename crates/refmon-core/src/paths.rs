use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "refmon";
pub const APP_NAME: &str = "monitor";

pub const SOCKET_ENV: &str = "REFMON_SOCKET";
pub const PASSWORD_ENV: &str = "REFMON_PASSWORD";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn log_dir() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

pub fn audit_log_path() -> anyhow::Result<PathBuf> {
    Ok(log_dir()?.join("audit.log"))
}

/// Management socket. `REFMON_SOCKET` overrides the default location.
pub fn ipc_socket_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(SOCKET_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    Ok(data_dir()?.join("refmon.sock"))
}
