//! Local-path dependencies.
//!
//! A dependency spec of the form `./path`, `/abs/path`, or `~/path`
//! bypasses the registry entirely: the target directory is validated to be
//! a bundle (it has a manifest), `agent_modules/<name>` is linked straight
//! at it, and nothing is recorded in the lockfile. Repeated runs always
//! re-link.

use crate::error::{Error, Result};
use crate::linker::{link_package, LinkOutcome};
use crate::manifest::Manifest;
use crate::paths::MANIFEST_NAME;
use crate::spec::PackageName;
use std::path::{Path, PathBuf};

/// A materialized local dependency.
#[derive(Debug, Clone)]
pub struct LocalInstall {
    /// The declared package name.
    pub name: PackageName,
    /// Deterministic store key version: the local manifest's version
    /// suffixed with a hash of the resolved path.
    pub store_version: String,
    /// Where the link was created.
    pub link_path: PathBuf,
    /// How the entry was materialized.
    pub outcome: LinkOutcome,
}

/// Resolve a raw local spec against the project root, expanding `~/`.
///
/// # Errors
/// `STORAGE_ERROR` when the path cannot be resolved.
pub fn resolve_local_path(project_root: &Path, raw: &str) -> Result<PathBuf> {
    let expanded = if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs_next::home_dir()
            .ok_or_else(|| Error::storage("cannot expand '~': no home directory"))?;
        home.join(rest)
    } else {
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            project_root.join(path)
        }
    };

    expanded
        .canonicalize()
        .map_err(|e| Error::storage(format!("local dependency '{raw}' not found: {e}")))
}

/// Link a local bundle into the module tree.
///
/// # Errors
/// `CONFIG_INVALID` when the target is not a bundle or its manifest names
/// a different package; link-layer errors otherwise.
pub fn install_local(
    project_root: &Path,
    modules_root: &Path,
    declared_name: &str,
    raw_path: &str,
) -> Result<LocalInstall> {
    let name = PackageName::parse(declared_name)?;
    let target = resolve_local_path(project_root, raw_path)?;

    if !target.join(MANIFEST_NAME).is_file() {
        return Err(Error::config_invalid(format!(
            "local dependency '{raw_path}' has no {MANIFEST_NAME}"
        )));
    }

    let manifest = Manifest::load(&target)?;
    if manifest.package().name != declared_name {
        return Err(Error::config_invalid(format!(
            "local dependency '{raw_path}' is {}, declared as {declared_name}",
            manifest.package().name
        )));
    }

    let path_hash = tz_util::hash::sha256_hex(target.to_string_lossy().as_bytes());
    let store_version = format!("{}+local.{}", manifest.package().version, &path_hash[..8]);

    let (link_path, outcome) = link_package(project_root, modules_root, &name, &target)?;

    Ok(LocalInstall {
        name,
        store_version,
        link_path,
        outcome,
    })
}
