//! Install orchestration.
//!
//! State machine per install:
//!
//! ```text
//! PLAN -> RESOLVE -> FETCH -> VERIFY -> EXTRACT -> LINK -> LOCK -> DONE
//! ```
//!
//! Tarballs are fetched with at most [`MAX_PARALLEL_DOWNLOADS`] in flight;
//! extraction may run concurrently across packages; linking is sequential.
//! The lockfile is written only after every link succeeded, so a failure
//! anywhere leaves the previous lockfile valid.

use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::integrity;
use crate::linker::{link_package, LinkOutcome};
use crate::local::install_local;
use crate::lockfile::{LockedPackage, Lockfile};
use crate::manifest::Manifest;
use crate::paths::{self, MANIFEST_NAME};
use crate::registry::RegistryClient;
use crate::resolver::{self, MetadataMap, Resolution, ResolveFlags};
use crate::spec::PackageName;
use crate::store::ContentStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Concurrent tarball download cap per install.
pub const MAX_PARALLEL_DOWNLOADS: usize = 5;

/// Mode flags for an install run.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Never touch the network; reconstruct everything from the lockfile
    /// and the store.
    pub offline: bool,
    /// Fail instead of changing the locked `(name, version)` set.
    pub frozen_lockfile: bool,
    /// Refetch archives even when the extracted tree exists.
    pub force: bool,
}

/// Where an installed package came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallSource {
    Remote,
    Cache,
    Offline,
    Local,
}

impl InstallSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Cache => "cache",
            Self::Offline => "offline",
            Self::Local => "local",
        }
    }
}

/// One line of the install summary.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub source: InstallSource,
    /// True when the link layer had to fall back to a recursive copy.
    pub copied: bool,
}

/// Install result: summary entries sorted by name, plus warnings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub packages: Vec<InstalledPackage>,
    pub warnings: Vec<String>,
}

pub(crate) struct FetchOutcome {
    pub locked: BTreeMap<String, LockedPackage>,
    pub sources: BTreeMap<String, InstallSource>,
    pub warnings: Vec<String>,
}

/// The install/update orchestrator.
///
/// Holds the explicit configuration value plus the registry client and
/// store derived from it. One install or update runs at a time per
/// instance; the caller provides that serialization.
pub struct Installer {
    config: Config,
    registry: RegistryClient,
    store: ContentStore,
    project_root: PathBuf,
}

impl Installer {
    /// Create an orchestrator for the project containing `config.cwd`.
    ///
    /// # Errors
    /// `CONFIG_NOT_FOUND` when no manifest is found walking up from the
    /// working directory.
    pub fn new(config: Config) -> Result<Self> {
        let project_root = paths::project_root(&config.cwd)
            .ok_or_else(|| Error::config_not_found(&config.cwd.join(MANIFEST_NAME)))?;
        let registry = RegistryClient::new(&config.registry_url, config.token.clone())?;
        let store = ContentStore::new(config.store_root.clone());

        Ok(Self {
            config,
            registry,
            store,
            project_root,
        })
    }

    /// The resolved project root.
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// The content store in use.
    #[must_use]
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// The configuration this orchestrator was constructed with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a full install.
    ///
    /// # Errors
    /// Any kernel error; the previous `agent_modules` links and lockfile
    /// stay valid when an error occurs before the lock write.
    pub async fn install(&self, options: &InstallOptions) -> Result<InstallReport> {
        let manifest = Manifest::load(&self.project_root)?;
        let mut warnings = manifest.validate()?;

        // PLAN
        let roots: Vec<(String, String)> = manifest
            .registry_dependencies()
            .map(|(name, range)| (name.to_string(), range.to_string()))
            .collect();
        let locals: Vec<(String, String)> = manifest
            .local_dependencies()
            .map(|(name, path)| (name.to_string(), path.to_string()))
            .collect();
        let previous_lock = Lockfile::read(&self.project_root)?;

        if roots.is_empty() && locals.is_empty() {
            debug!("no dependencies declared; writing empty lockfile");
            Lockfile::default().write_atomic(&self.project_root)?;
            return Ok(InstallReport {
                packages: Vec::new(),
                warnings,
            });
        }

        // RESOLVE
        let resolution = if roots.is_empty() {
            crate::resolver::Resolution::default()
        } else if options.offline {
            let lock = previous_lock.as_ref().ok_or_else(|| {
                Error::config_invalid("offline install requires an existing lockfile")
            })?;
            self.resolve_offline(&roots, lock)?
        } else {
            let metadata = self.collect_metadata(&roots).await?;
            resolver::resolve(&roots, &metadata, previous_lock.as_ref(), ResolveFlags::default())?
        };
        warnings.extend(resolution.warnings.iter().cloned());

        // FROZEN check
        if options.frozen_lockfile {
            check_frozen(&resolution, previous_lock.as_ref())?;
        }

        // Offline installs must be able to fail before any file mutation.
        if options.offline {
            self.check_offline_viability(&resolution, previous_lock.as_ref())?;
        }

        // FETCH / VERIFY / EXTRACT
        let outcome = self
            .fetch_resolution(&resolution, previous_lock.as_ref(), options)
            .await?;
        warnings.extend(outcome.warnings.iter().cloned());

        // LINK (sequential, name order)
        let modules_root = paths::agent_modules_dir(&self.project_root);
        let mut copied: BTreeMap<String, bool> = BTreeMap::new();
        for (name_str, pkg) in &resolution.packages {
            let name = PackageName::parse(name_str)?;
            let store_path = self.store.path_for(&name, &pkg.version);
            let (_, link_outcome) =
                link_package(&self.project_root, &modules_root, &name, &store_path)?;
            copied.insert(name_str.clone(), link_outcome == LinkOutcome::Copied);
        }

        let mut local_packages = Vec::new();
        for (name, raw_path) in &locals {
            let installed = install_local(&self.project_root, &modules_root, name, raw_path)?;
            local_packages.push(InstalledPackage {
                name: name.clone(),
                version: installed.store_version,
                source: InstallSource::Local,
                copied: installed.outcome == LinkOutcome::Copied,
            });
        }

        // LOCK: merge, prune to the resolved closure, write atomically.
        // Local packages are never recorded.
        let previous = previous_lock.unwrap_or_default();
        let merged = Lockfile::merge(&previous, outcome.locked);
        let lock = merged.prune(&resolution.packages.keys().cloned().collect());
        lock.write_atomic(&self.project_root)?;

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

        info!(count = packages.len(), "install complete");
        Ok(InstallReport { packages, warnings })
    }

    /// Fetch the versions maps for the whole reachable name set, walking
    /// dependency names breadth-first with bounded parallelism.
    pub(crate) async fn collect_metadata(
        &self,
        roots: &[(String, String)],
    ) -> Result<MetadataMap> {
        let root_names: BTreeSet<String> =
            roots.iter().map(|(name, _)| name.clone()).collect();
        let mut metadata = MetadataMap::new();
        let mut pending: BTreeSet<String> = root_names.clone();

        while !pending.is_empty() {
            let batch: Vec<String> = pending
                .iter()
                .filter(|name| !metadata.contains_key(*name))
                .cloned()
                .collect();
            pending.clear();
            if batch.is_empty() {
                break;
            }

            let fetches = batch.into_iter().map(|name_str| {
                let registry = self.registry.clone();
                let is_root = root_names.contains(&name_str);
                async move {
                    let name = PackageName::parse(&name_str)?;
                    match registry.get_versions(&name).await {
                        Ok(versions) => Ok((name_str, versions)),
                        // A package referenced only by unselected candidate
                        // versions may legitimately not exist; the encoding
                        // rules those candidates out.
                        Err(e)
                            if !is_root && e.kind() == ErrorKind::PackageNotFound =>
                        {
                            Ok((name_str, BTreeMap::new()))
                        }
                        Err(e) => Err(e),
                    }
                }
            });

            let results: Vec<Result<(String, resolver::VersionsMap)>> = stream::iter(fetches)
                .buffer_unordered(MAX_PARALLEL_DOWNLOADS)
                .collect()
                .await;

            for result in results {
                let (name, versions) = result?;
                for meta in versions.values() {
                    for dep_name in meta.dependencies.keys() {
                        if !metadata.contains_key(dep_name) && dep_name != &name {
                            pending.insert(dep_name.clone());
                        }
                    }
                }
                metadata.insert(name, versions);
            }
        }

        Ok(metadata)
    }

    /// Reconstruct a resolution from the lockfile without touching the
    /// network: walk the locked closure, checking every declared range
    /// against the pinned version.
    pub(crate) fn resolve_offline(
        &self,
        roots: &[(String, String)],
        lock: &Lockfile,
    ) -> Result<Resolution> {
        let mut packages = BTreeMap::new();
        let mut queue: Vec<(String, String)> = roots.to_vec();

        while let Some((name, range)) = queue.pop() {
            let locked = lock.packages.get(&name).ok_or_else(|| {
                Error::config_invalid(format!(
                    "lockfile has no entry for {name}; run install online first"
                ))
            })?;

            let version = semver::Version::parse(&locked.version).map_err(|e| {
                Error::config_invalid(format!(
                    "lockfile pins {name} to unparseable version '{}': {e}",
                    locked.version
                ))
            })?;

            if !resolver::range_matches(&range, &version)? {
                return Err(Error::version_conflict(format!(
                    "lockfile pins {name}@{version}, which does not satisfy {range}"
                ))
                .with_context("package", &name)
                .with_context("range", &range));
            }

            if packages.contains_key(&name) {
                continue;
            }

            for (dep_name, dep_range) in &locked.dependencies {
                queue.push((dep_name.clone(), dep_range.clone()));
            }

            packages.insert(
                name,
                resolver::ResolvedPackage {
                    version: locked.version.clone(),
                    dependencies: locked.dependencies.clone(),
                    yanked: locked.yanked,
                },
            );
        }

        Ok(Resolution {
            packages,
            warnings: Vec::new(),
        })
    }

    fn check_offline_viability(
        &self,
        resolution: &Resolution,
        lock: Option<&Lockfile>,
    ) -> Result<()> {
        for (name_str, pkg) in &resolution.packages {
            let name = PackageName::parse(name_str)?;
            let locked = lock
                .and_then(|lock| lock.packages.get(name_str))
                .ok_or_else(|| {
                    Error::config_invalid(format!("lockfile has no entry for {name_str}"))
                })?;

            if !locked.is_reusable() {
                return Err(Error::config_invalid(format!(
                    "lockfile entry for {name_str} is missing resolved/integrity fields; \
                     cannot install offline"
                )));
            }
            if !self.store.has_extracted(&name, &pkg.version) {
                return Err(Error::storage(format!(
                    "{name_str}@{} is not in the local store; cannot install offline",
                    pkg.version
                )));
            }
        }
        Ok(())
    }

    /// Fetch, verify, and extract every package of a resolution.
    pub(crate) async fn fetch_resolution(
        &self,
        resolution: &Resolution,
        previous_lock: Option<&Lockfile>,
        options: &InstallOptions,
    ) -> Result<FetchOutcome> {
        let tasks = resolution.packages.iter().map(|(name_str, pkg)| {
            let registry = self.registry.clone();
            let store = self.store.clone();
            let name_str = name_str.clone();
            let version = pkg.version.clone();
            let dependencies = pkg.dependencies.clone();
            let yanked = pkg.yanked;
            let previous = previous_lock
                .and_then(|lock| lock.packages.get(&name_str))
                .cloned();
            let offline = options.offline;
            let force = options.force;

            async move {
                fetch_one(
                    registry,
                    store,
                    name_str,
                    version,
                    dependencies,
                    yanked,
                    previous,
                    offline,
                    force,
                )
                .await
            }
        });

        let results: Vec<Result<FetchedPackage>> = stream::iter(tasks)
            .buffer_unordered(MAX_PARALLEL_DOWNLOADS)
            .collect()
            .await;

        let mut locked = BTreeMap::new();
        let mut sources = BTreeMap::new();
        let mut warnings = Vec::new();
        for result in results {
            let fetched = result?;
            sources.insert(fetched.name.clone(), fetched.source);
            locked.insert(fetched.name, fetched.locked);
            warnings.extend(fetched.warnings);
        }

        Ok(FetchOutcome {
            locked,
            sources,
            warnings,
        })
    }
}

struct FetchedPackage {
    name: String,
    locked: LockedPackage,
    source: InstallSource,
    warnings: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
async fn fetch_one(
    registry: RegistryClient,
    store: ContentStore,
    name_str: String,
    version: String,
    dependencies: BTreeMap<String, String>,
    yanked: bool,
    previous: Option<LockedPackage>,
    offline: bool,
    force: bool,
) -> Result<FetchedPackage> {
    let name = PackageName::parse(&name_str)?;
    let cached = store.has_extracted(&name, &version);
    let reusable_pin = previous
        .as_ref()
        .is_some_and(|prev| prev.version == version && prev.is_reusable());

    if offline {
        // Viability was checked before any mutation; reuse the lock entry.
        let prev = previous.ok_or_else(|| {
            Error::config_invalid(format!("lockfile has no entry for {name_str}"))
        })?;
        return Ok(FetchedPackage {
            name: name_str,
            locked: LockedPackage {
                version,
                resolved: prev.resolved,
                integrity: prev.integrity,
                dependencies,
                yanked,
            },
            source: InstallSource::Offline,
            warnings: Vec::new(),
        });
    }

    if cached && !force && reusable_pin {
        let prev = previous.expect("reusable pin");
        debug!(package = %name_str, %version, "store hit");
        return Ok(FetchedPackage {
            name: name_str,
            locked: LockedPackage {
                version,
                resolved: prev.resolved,
                integrity: prev.integrity,
                dependencies,
                yanked,
            },
            source: InstallSource::Cache,
            warnings: Vec::new(),
        });
    }

    let mut warnings = Vec::new();
    if cached && !force && !reusable_pin {
        warnings.push(format!(
            "refetching {name_str}@{version}: lockfile entry is missing or incomplete"
        ));
    }

    // Fetch through the registry's tarball indirection.
    let info = registry.get_tarball_info(&name, &version).await?;
    debug!(package = %name_str, %version, url = %info.url, "downloading");
    let downloaded = registry.download_tarball(&info.url).await?;

    // Verify against the registry-supplied integrity when present;
    // otherwise adopt the computed one.
    let integrity_value = match &info.integrity {
        Some(expected) => {
            if !integrity::matches(&downloaded.integrity, expected) {
                warn!(package = %name_str, %version, "integrity mismatch");
                store.discard_archive(&name, &version);
                return Err(Error::integrity_mismatch(
                    &name_str,
                    expected,
                    &downloaded.integrity,
                ));
            }
            expected.clone()
        }
        None => downloaded.integrity.clone(),
    };

    store.store_archive(&name, &version, &downloaded.bytes)?;

    let extract_store = store.clone();
    let extract_name = name.clone();
    let extract_version = version.clone();
    tokio::task::spawn_blocking(move || {
        extract_store.extract(&extract_name, &extract_version)
    })
    .await
    .map_err(|e| Error::internal(format!("extraction task failed: {e}")))??;

    Ok(FetchedPackage {
        name: name_str,
        locked: LockedPackage {
            version,
            resolved: info.url,
            integrity: integrity_value,
            dependencies,
            yanked,
        },
        source: InstallSource::Remote,
        warnings,
    })
}

fn check_frozen(resolution: &Resolution, lock: Option<&Lockfile>) -> Result<()> {
    let locked_set: BTreeSet<(String, String)> = lock
        .map(|lock| {
            lock.packages
                .iter()
                .map(|(name, pkg)| (name.clone(), pkg.version.clone()))
                .collect()
        })
        .unwrap_or_default();
    let new_set: BTreeSet<(String, String)> = resolution
        .packages
        .iter()
        .map(|(name, pkg)| (name.clone(), pkg.version.clone()))
        .collect();

    if locked_set != new_set {
        let mut err = Error::config_invalid(
            "lockfile is out of date and --frozen-lockfile is set",
        );
        for (name, version) in new_set.difference(&locked_set) {
            err = err.with_context(format!("would add {name}"), version.clone());
        }
        for (name, version) in locked_set.difference(&new_set) {
            err = err.with_context(format!("would remove {name}"), version.clone());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedPackage;

    fn resolution(entries: &[(&str, &str)]) -> Resolution {
        Resolution {
            packages: entries
                .iter()
                .map(|(name, version)| {
                    (
                        (*name).to_string(),
                        ResolvedPackage {
                            version: (*version).to_string(),
                            dependencies: BTreeMap::new(),
                            yanked: false,
                        },
                    )
                })
                .collect(),
            warnings: Vec::new(),
        }
    }

    fn lock(entries: &[(&str, &str)]) -> Lockfile {
        Lockfile::new(
            entries
                .iter()
                .map(|(name, version)| {
                    (
                        (*name).to_string(),
                        LockedPackage {
                            version: (*version).to_string(),
                            resolved: "https://cdn.example/x.tgz".to_string(),
                            integrity: "sha256-abc".to_string(),
                            dependencies: BTreeMap::new(),
                            yanked: false,
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_frozen_passes_on_matching_sets() {
        let resolution = resolution(&[("@t/starter", "1.0.0")]);
        let lock = lock(&[("@t/starter", "1.0.0")]);
        assert!(check_frozen(&resolution, Some(&lock)).is_ok());
    }

    #[test]
    fn test_frozen_rejects_version_drift() {
        let resolution = resolution(&[("@t/starter", "1.1.0")]);
        let lock = lock(&[("@t/starter", "1.0.0")]);
        let err = check_frozen(&resolution, Some(&lock)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_frozen_rejects_missing_lock() {
        let resolution = resolution(&[("@t/starter", "1.0.0")]);
        let err = check_frozen(&resolution, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_frozen_accepts_empty_on_empty() {
        assert!(check_frozen(&Resolution::default(), None).is_ok());
    }
}
