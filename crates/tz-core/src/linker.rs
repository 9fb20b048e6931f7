//! Symlink/junction creation for `agent_modules`.
//!
//! `agent_modules/<scope>/<name>` is owned exclusively by the install
//! orchestrator: it is replaced wholesale on each install. A symlink is
//! preferred; on Windows sessions without symlink privilege a directory
//! junction is used; failing both, the tree is copied and the summary
//! marks the entry as copied.

use crate::error::{Error, Result};
use crate::spec::PackageName;
use std::fs;
use std::path::{Path, PathBuf};

/// How a module entry was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// An existing link already pointed at the store path.
    Unchanged,
    Symlink,
    Junction,
    Copied,
}

/// Link a store path into a module tree rooted at `modules_root`.
///
/// `project_root` bounds removal: an existing entry is only removed when
/// its parent resolves inside the project root.
///
/// # Errors
/// `SECURITY_VIOLATION` when removal would reach outside the project root,
/// `STORAGE_ERROR` on filesystem failures.
pub fn link_package(
    project_root: &Path,
    modules_root: &Path,
    name: &PackageName,
    store_path: &Path,
) -> Result<(PathBuf, LinkOutcome)> {
    let (scope, pkg) = name.store_components();
    let scope_dir = modules_root.join(scope);
    create_dir_0755(&scope_dir)
        .map_err(|e| Error::storage(format!("failed to create {}: {e}", scope_dir.display())))?;

    let link_path = scope_dir.join(pkg);

    // Fast path: an existing link that already points at the store entry.
    if let Ok(metadata) = fs::symlink_metadata(&link_path) {
        if metadata.file_type().is_symlink() {
            if let Ok(target) = fs::read_link(&link_path) {
                if target == store_path {
                    return Ok((link_path, LinkOutcome::Unchanged));
                }
            }
        }

        guard_removal(project_root, &link_path)?;
        remove_link_or_dir(&link_path)?;
    }

    let outcome = create_dir_link(store_path, &link_path)?;
    Ok((link_path, outcome))
}

/// Remove a module entry if present. Returns `true` when something was
/// removed.
///
/// # Errors
/// `SECURITY_VIOLATION` when removal would reach outside the project root,
/// `STORAGE_ERROR` on filesystem failures.
pub fn unlink_package(
    project_root: &Path,
    modules_root: &Path,
    name: &PackageName,
) -> Result<bool> {
    let (scope, pkg) = name.store_components();
    let link_path = modules_root.join(scope).join(pkg);

    if fs::symlink_metadata(&link_path).is_err() {
        return Ok(false);
    }

    guard_removal(project_root, &link_path)?;
    remove_link_or_dir(&link_path)?;
    Ok(true)
}

/// Refuse to remove anything whose parent does not resolve inside the
/// project root.
fn guard_removal(project_root: &Path, link_path: &Path) -> Result<()> {
    let parent = link_path
        .parent()
        .ok_or_else(|| Error::security("module path has no parent"))?;

    let resolved_parent = parent
        .canonicalize()
        .map_err(|e| Error::storage(format!("failed to resolve {}: {e}", parent.display())))?;
    let resolved_root = project_root
        .canonicalize()
        .map_err(|e| Error::storage(format!("failed to resolve {}: {e}", project_root.display())))?;

    if !resolved_parent.starts_with(&resolved_root) {
        return Err(Error::security(format!(
            "refusing to replace {} outside the project root",
            link_path.display()
        )));
    }

    Ok(())
}

/// Remove a symlink, junction, or directory without traversing links.
fn remove_link_or_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        if let Ok(metadata) = fs::symlink_metadata(path) {
            if metadata.file_type().is_symlink() {
                fs::remove_file(path).map_err(|e| {
                    Error::storage(format!("failed to remove existing link: {e}"))
                })?;
                return Ok(());
            }
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;

        if let Ok(metadata) = fs::symlink_metadata(path) {
            // FILE_ATTRIBUTE_REPARSE_POINT = 0x400: junction or symlink.
            if metadata.file_attributes() & 0x400 != 0 {
                fs::remove_dir(path).map_err(|e| {
                    Error::storage(format!("failed to remove existing junction: {e}"))
                })?;
                return Ok(());
            }
        }
    }

    if path.is_dir() {
        fs::remove_dir_all(path)
            .map_err(|e| Error::storage(format!("failed to remove existing directory: {e}")))?;
    } else if path.exists() {
        fs::remove_file(path)
            .map_err(|e| Error::storage(format!("failed to remove existing file: {e}")))?;
    }

    Ok(())
}

/// Create a directory link: symlink, then junction (Windows), then copy.
fn create_dir_link(src: &Path, dst: &Path) -> Result<LinkOutcome> {
    #[cfg(unix)]
    {
        match std::os::unix::fs::symlink(src, dst) {
            Ok(()) => Ok(LinkOutcome::Symlink),
            Err(_) => copy_fallback(src, dst),
        }
    }

    #[cfg(windows)]
    {
        match std::os::windows::fs::symlink_dir(src, dst) {
            Ok(()) => Ok(LinkOutcome::Symlink),
            Err(_) => match junction::create(src, dst) {
                Ok(()) => Ok(LinkOutcome::Junction),
                Err(_) => copy_fallback(src, dst),
            },
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        copy_fallback(src, dst)
    }
}

fn copy_fallback(src: &Path, dst: &Path) -> Result<LinkOutcome> {
    tz_util::fs::copy_dir_all(src, dst).map_err(|e| {
        Error::storage(format!(
            "failed to copy {} to {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(LinkOutcome::Copied)
}

fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
