/// Canonical file locations for JoyFocus.
///
/// Everything lives under the platform config directory
/// (`%APPDATA%\JoyFocus\` on Windows, `~/.config/JoyFocus/` elsewhere):
///   - settings.toml      Persisted settings, hot-reloaded by the daemon.
///   - logs/joyfocus.log  Rolling file target for the tracing subscriber.
use anyhow::Context;
use std::path::{Path, PathBuf};

pub const APP_DIR_NAME: &str = "JoyFocus";
pub const CONFIG_FILE_NAME: &str = "settings.toml";
pub const LOG_DIR_NAME: &str = "logs";
pub const LOG_FILE_NAME: &str = "joyfocus.log";

/// Returns the JoyFocus data directory inside the user's config directory.
pub fn app_data_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::config_dir().context("no per-user config directory on this platform")?;
    Ok(base.join(APP_DIR_NAME))
}

pub fn config_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(CONFIG_FILE_NAME)
}

pub fn log_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(LOG_DIR_NAME).join(LOG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_path_has_correct_name() {
        let path = config_file_path(Path::new("base"));
        assert_eq!(path.file_name().unwrap(), CONFIG_FILE_NAME);
        assert_eq!(path.parent().unwrap(), Path::new("base"));
    }

    #[test]
    fn log_file_lives_in_logs_subdir() {
        let path = log_file_path(Path::new("base"));
        assert_eq!(path, Path::new("base").join("logs").join("joyfocus.log"));
    }

    #[test]
    fn config_and_logs_share_app_dir() {
        let base = Path::new("base");
        let log_dir = log_file_path(base);
        assert_eq!(config_file_path(base).parent(), log_dir.parent().unwrap().parent());
    }

    #[cfg(windows)]
    #[test]
    fn app_data_dir_is_inside_appdata() {
        let appdata = std::env::var("APPDATA").unwrap();
        let dir = app_data_dir().unwrap();
        assert!(dir.starts_with(&appdata));
        assert_eq!(dir.file_name().unwrap(), APP_DIR_NAME);
    }
}
