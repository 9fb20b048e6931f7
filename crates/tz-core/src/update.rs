//! Update orchestration.
//!
//! Update resolves with prefer-latest and no lockfile preference, then
//! either prints a plan (`--dry-run`) or installs into a staging tree
//! (`agent_modules.new`) that replaces the live tree with a rename swap on
//! full success. The lockfile is written only after the swap, so any
//! failure leaves both the previous tree and the previous lockfile intact.

use crate::error::{Error, Result};
use crate::install::{InstallOptions, InstallSource, InstalledPackage, Installer};
use crate::linker::{link_package, LinkOutcome};
use crate::local::install_local;
use crate::lockfile::Lockfile;
use crate::manifest::Manifest;
use crate::paths::{self, AGENT_MODULES_DIR};
use crate::resolver::{self, Resolution, ResolveFlags};
use crate::spec::PackageName;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Mode flags for an update run.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Print the plan and change nothing on disk.
    pub dry_run: bool,
}

/// One planned version change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedUpdate {
    pub name: String,
    /// Previously locked version, if any.
    pub old: Option<String>,
    pub new: String,
}

/// Update result: the plan, whether it was applied, and the install
/// summary when it was.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub plan: Vec<PlannedUpdate>,
    pub applied: bool,
    pub packages: Vec<InstalledPackage>,
    pub warnings: Vec<String>,
}

impl Installer {
    /// Run an update.
    ///
    /// # Errors
    /// Any kernel error; on failure neither `agent_modules` nor the
    /// lockfile changes.
    pub async fn update(&self, options: &UpdateOptions) -> Result<UpdateReport> {
        let manifest = Manifest::load(self.project_root())?;
        let mut warnings = manifest.validate()?;

        let roots: Vec<(String, String)> = manifest
            .registry_dependencies()
            .map(|(name, range)| (name.to_string(), range.to_string()))
            .collect();
        let locals: Vec<(String, String)> = manifest
            .local_dependencies()
            .map(|(name, path)| (name.to_string(), path.to_string()))
            .collect();
        let previous_lock = Lockfile::read(self.project_root())?;

        // Resolve fresh: prefer latest, skip yanked, no lockfile preference.
        let resolution = if roots.is_empty() {
            Resolution::default()
        } else {
            let metadata = self.collect_metadata(&roots).await?;
            resolver::resolve(&roots, &metadata, None, ResolveFlags::default())?
        };
        warnings.extend(resolution.warnings.iter().cloned());

        let plan: Vec<PlannedUpdate> = resolution
            .packages
            .iter()
            .filter_map(|(name, pkg)| {
                let old = previous_lock
                    .as_ref()
                    .and_then(|lock| lock.packages.get(name))
                    .map(|locked| locked.version.clone());
                if old.as_deref() == Some(pkg.version.as_str()) {
                    None
                } else {
                    Some(PlannedUpdate {
                        name: name.clone(),
                        old,
                        new: pkg.version.clone(),
                    })
                }
            })
            .collect();

        if options.dry_run {
            debug!(changes = plan.len(), "dry run; leaving disk untouched");
            return Ok(UpdateReport {
                plan,
                applied: false,
                packages: Vec::new(),
                warnings,
            });
        }

        // FETCH into the store (no staging needed for store writes; they
        // are keyed by version and immutable).
        let outcome = self
            .fetch_resolution(&resolution, previous_lock.as_ref(), &InstallOptions::default())
            .await?;
        warnings.extend(outcome.warnings.iter().cloned());

        // Stage the replacement module tree.
        let modules_root = paths::agent_modules_dir(self.project_root());
        let staging = self
            .project_root()
            .join(format!("{AGENT_MODULES_DIR}.new"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let staged = self.stage_links(&staging, &resolution, &locals);
        let (copied, local_packages) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        // Swap, then lock.
        if let Err(e) = swap_trees(self.project_root(), &modules_root, &staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let previous = previous_lock.unwrap_or_default();
        let merged = Lockfile::merge(&previous, outcome.locked);
        let lock = merged.prune(&resolution.packages.keys().cloned().collect());
        lock.write_atomic(self.project_root())?;

        let mut packages: Vec<InstalledPackage> = resolution
            .packages
            .iter()
            .map(|(name, pkg)| InstalledPackage {
                name: name.clone(),
                version: pkg.version.clone(),
                source: outcome.sources[name],
                copied: copied.get(name).copied().unwrap_or(false),
            })
            .collect();
        packages.extend(local_packages);
        packages.sort_by(|a, b| a.name.cmp(&b.name));

        info!(changes = plan.len(), "update complete");
        Ok(UpdateReport {
            plan,
            applied: true,
            packages,
            warnings,
        })
    }

    /// Link every resolved package (and local dependency) into a staging
    /// tree.
    fn stage_links(
        &self,
        staging: &Path,
        resolution: &Resolution,
        locals: &[(String, String)],
    ) -> Result<(BTreeMap<String, bool>, Vec<InstalledPackage>)> {
        fs::create_dir_all(staging)?;

        let mut copied = BTreeMap::new();
        for (name_str, pkg) in &resolution.packages {
            let name = PackageName::parse(name_str)?;
            let store_path = self.store().path_for(&name, &pkg.version);
            let (_, link_outcome) =
                link_package(self.project_root(), staging, &name, &store_path)?;
            copied.insert(name_str.clone(), link_outcome == LinkOutcome::Copied);
        }

        let mut local_packages = Vec::new();
        for (name, raw_path) in locals {
            let installed = install_local(self.project_root(), staging, name, raw_path)?;
            local_packages.push(InstalledPackage {
                name: name.clone(),
                version: installed.store_version,
                source: InstallSource::Local,
                copied: installed.outcome == LinkOutcome::Copied,
            });
        }

        Ok((copied, local_packages))
    }
}

/// Replace `modules_root` with `staging` via rename, rolling back the old
/// tree if the second rename fails.
fn swap_trees(project_root: &Path, modules_root: &Path, staging: &Path) -> Result<()> {
    let backup = project_root.join(format!("{AGENT_MODULES_DIR}.old-{}", std::process::id()));

    let had_previous = modules_root.exists();
    if had_previous {
        fs::rename(modules_root, &backup).map_err(|e| {
            Error::storage(format!(
                "failed to stage out {}: {e}",
                modules_root.display()
            ))
        })?;
    }

    match fs::rename(staging, modules_root) {
        Ok(()) => {
            if had_previous {
                let _ = fs::remove_dir_all(&backup);
            }
            Ok(())
        }
        Err(e) => {
            if had_previous {
                let _ = fs::rename(&backup, modules_root);
            }
            Err(Error::storage(format!(
                "failed to swap in the new module tree: {e}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_swap_replaces_previous_tree() {
        let project = tempdir().unwrap();
        let modules = project.path().join(AGENT_MODULES_DIR);
        let staging = project.path().join("agent_modules.new");

        fs::create_dir_all(&modules).unwrap();
        fs::write(modules.join("old.txt"), "old").unwrap();
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("new.txt"), "new").unwrap();

        swap_trees(project.path(), &modules, &staging).unwrap();

        assert!(modules.join("new.txt").exists());
        assert!(!modules.join("old.txt").exists());
        assert!(!staging.exists());
        // No leftover backup.
        let leftovers: Vec<_> = fs::read_dir(project.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("agent_modules.old-")
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_swap_without_previous_tree() {
        let project = tempdir().unwrap();
        let modules = project.path().join(AGENT_MODULES_DIR);
        let staging = project.path().join("agent_modules.new");

        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("new.txt"), "new").unwrap();

        swap_trees(project.path(), &modules, &staging).unwrap();
        assert!(modules.join("new.txt").exists());
    }
}
