//! XDG Base Directory support.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "localchat";

/// XDG directory paths for localchat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XdgDirs {
    /// Config directory (~/.config/localchat or XDG_CONFIG_HOME/localchat)
    pub config: PathBuf,
    /// State directory (~/.local/state/localchat or XDG_STATE_HOME/localchat)
    pub state: PathBuf,
}

impl XdgDirs {
    /// Get XDG directories, respecting environment variables.
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::resolve(
            std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
            std::env::var_os("XDG_STATE_HOME").map(PathBuf::from),
            &home,
        )
    }

    fn resolve(config_home: Option<PathBuf>, state_home: Option<PathBuf>, home: &Path) -> Self {
        // Relative XDG values are invalid and fall back to the home default.
        let pick = |value: Option<PathBuf>, fallback: &str| {
            value
                .filter(|p| p.is_absolute())
                .unwrap_or_else(|| home.join(fallback))
                .join(APP_DIR)
        };
        Self {
            config: pick(config_home, ".config"),
            state: pick(state_home, ".local/state"),
        }
    }

    /// Default config file location.
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }

    /// REPL history file location.
    pub fn history_file(&self) -> PathBuf {
        self.state.join("history.txt")
    }

    /// Ensure all directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.config, &self.state] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for XdgDirs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // =========================================================================
    // Path Resolution Tests
    // =========================================================================

    #[test]
    fn test_defaults_under_home() {
        let dirs = XdgDirs::resolve(None, None, Path::new("/home/me"));

        assert_eq!(dirs.config, PathBuf::from("/home/me/.config/localchat"));
        assert_eq!(dirs.state, PathBuf::from("/home/me/.local/state/localchat"));
    }

    #[test]
    fn test_env_overrides() {
        let dirs = XdgDirs::resolve(
            Some(PathBuf::from("/xdg/config")),
            Some(PathBuf::from("/xdg/state")),
            Path::new("/home/me"),
        );

        assert_eq!(dirs.config, PathBuf::from("/xdg/config/localchat"));
        assert_eq!(dirs.state, PathBuf::from("/xdg/state/localchat"));
    }

    #[test]
    fn test_relative_override_ignored() {
        let dirs = XdgDirs::resolve(Some(PathBuf::from("relative")), None, Path::new("/h"));
        assert_eq!(dirs.config, PathBuf::from("/h/.config/localchat"));
    }

    #[test]
    fn test_file_locations() {
        let dirs = XdgDirs::resolve(None, None, Path::new("/h"));

        assert_eq!(
            dirs.config_file(),
            PathBuf::from("/h/.config/localchat/config.json")
        );
        assert_eq!(
            dirs.history_file(),
            PathBuf::from("/h/.local/state/localchat/history.txt")
        );
    }

    #[test]
    fn test_new_ends_with_app_dir() {
        let dirs = XdgDirs::new();
        assert!(dirs.config.ends_with(APP_DIR));
        assert!(dirs.state.ends_with(APP_DIR));
    }

    // =========================================================================
    // Directory Creation Tests
    // =========================================================================

    #[test]
    fn test_ensure_dirs_creates_all() {
        let tmp = TempDir::new().unwrap();
        let dirs = XdgDirs::resolve(
            Some(tmp.path().join("config")),
            Some(tmp.path().join("state")),
            tmp.path(),
        );

        dirs.ensure_dirs().unwrap();

        assert!(dirs.config.is_dir());
        assert!(dirs.state.is_dir());
        // Idempotent
        dirs.ensure_dirs().unwrap();
    }
}
