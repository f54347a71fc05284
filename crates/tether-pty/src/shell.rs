//! Unix shell detection and path utilities.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Whether this shell should be started in login mode.
    #[must_use]
    pub const fn login(&self) -> bool {
        matches!(self, Self::Zsh(_) | Self::Bash(_))
    }

    /// Get the current shell from `$SHELL`, falling back to `/bin/sh`.
    #[must_use]
    pub fn current_shell() -> Self {
        if let Ok(shell) = std::env::var("SHELL") {
            if let Some(shell) = Self::from_path(Path::new(&shell)) {
                return shell;
            }
        }
        Self::Sh(PathBuf::from("/bin/sh"))
    }

    /// Classify an absolute shell path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.is_absolute() && path.is_file() {
            let path_buf = path.to_path_buf();
            if path.file_name() == Some(OsStr::new("zsh")) {
                Some(Self::Zsh(path_buf))
            } else if path.file_name() == Some(OsStr::new("bash")) {
                Some(Self::Bash(path_buf))
            } else if path.file_name() == Some(OsStr::new("sh")) {
                Some(Self::Sh(path_buf))
            } else {
                Some(Self::Other(path_buf))
            }
        } else {
            None
        }
    }
}

/// Resolve an executable by name or path.
///
/// Absolute paths are accepted as-is; bare names are searched on PATH
/// via `which` on a blocking thread.
pub async fn resolve_executable(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() && path.is_file() {
        return Some(path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Expand a leading `~` in a workspace path to the user's home directory.
#[must_use]
pub fn expand_workspace(workspace: &Path) -> PathBuf {
    if let Ok(rest) = workspace.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    workspace.to_path_buf()
}
