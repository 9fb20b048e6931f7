use std::path::{Path, PathBuf};

/// Schema tag for on-disk layouts (store and data directories).
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Project manifest filename.
pub const MANIFEST_NAME: &str = "agents.toml";

/// Lockfile filename.
pub const LOCKFILE_NAME: &str = "agents-lock.toml";

/// Per-project module tree directory.
pub const AGENT_MODULES_DIR: &str = "agent_modules";

/// Environment variable that overrides the persisted registry token for the
/// process lifetime. This is the only environment variable the kernel's
/// callers are expected to read.
pub const TOKEN_ENV: &str = "TZ_TOKEN";

/// Find the project root by walking up from `cwd` looking for `agents.toml`.
///
/// Returns the first directory containing the manifest, or `None`.
#[must_use]
pub fn project_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        if current.join(MANIFEST_NAME).exists() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Get the data directory for tz.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_DATA_HOME/tz/v{N}` or `~/.local/share/tz/v{N}`
/// - macOS: `~/Library/Application Support/tz/v{N}`
/// - Windows: `%LOCALAPPDATA%\tz\data\v{N}`
#[must_use]
pub fn data_dir() -> PathBuf {
    let base = dirs_next::data_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".tz-data"),
                |p| p.join(".local").join("share").join("tz"),
            )
        },
        |p| p.join("tz"),
    );

    base.join(format!("v{STORE_SCHEMA_VERSION}"))
}

/// Root of the content-addressable store.
#[must_use]
pub fn store_dir() -> PathBuf {
    data_dir().join("store")
}

/// Path of the `agent_modules` tree for a project.
#[must_use]
pub fn agent_modules_dir(project_root: &Path) -> PathBuf {
    project_root.join(AGENT_MODULES_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_project_root_with_manifest() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(MANIFEST_NAME), "[package]").unwrap();

        let root = project_root(&nested);
        assert_eq!(root, Some(dir.path().to_path_buf()));
    }

    #[test]
    fn test_project_root_not_found() {
        let dir = tempdir().unwrap();
        // May still find a root above the tempdir on some systems
        let _ = project_root(dir.path());
    }

    #[test]
    fn test_data_dir_contains_version() {
        let dir = data_dir();
        assert!(dir
            .to_string_lossy()
            .contains(&format!("v{STORE_SCHEMA_VERSION}")));
    }

    #[test]
    fn test_store_dir_under_data_dir() {
        assert!(store_dir().starts_with(data_dir()));
    }
}
