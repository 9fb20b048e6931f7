//! Lockfile (`agents-lock.toml`) types and engine.
//!
//! The lockfile records the exact resolved version, source URL, and
//! integrity hash for every package in the dependency closure, enabling
//! reproducible installs across machines.
//!
//! Serialization is byte-deterministic for a fixed `generated_at`: outer
//! tables in fixed order (`version`, `packages`, `metadata`), package
//! entries sorted by name, entry fields in fixed order, nested dependency
//! maps sorted by name.

use crate::error::{Error, Result};
use crate::paths::LOCKFILE_NAME;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use toml_edit::{DocumentMut, Item, Table};

/// Schema version for the lockfile format.
pub const LOCKFILE_SCHEMA_VERSION: u32 = 1;

/// A locked package entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    /// Exact resolved version.
    pub version: String,
    /// Tarball URL the package was fetched from.
    #[serde(default)]
    pub resolved: String,
    /// Canonical integrity string of the archive bytes.
    #[serde(default)]
    pub integrity: String,
    /// Declared dependencies of this version (name -> range).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Whether the version was yanked at resolution time.
    #[serde(default, skip_serializing_if = "is_false")]
    pub yanked: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !b
}

impl LockedPackage {
    /// Whether this entry is complete enough to reuse without refetching.
    ///
    /// Entries with an empty `resolved` or `integrity` field force a
    /// refetch even when the extracted tree exists.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        !self.resolved.trim().is_empty() && !self.integrity.trim().is_empty()
    }
}

/// Metadata about the lockfile itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LockMeta {
    /// RFC 3339 UTC timestamp of the last write.
    #[serde(default)]
    pub generated_at: String,
    /// CLI version that produced the file.
    #[serde(default)]
    pub cli_version: String,
}

impl LockMeta {
    /// Fresh metadata stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            cli_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The lockfile: schema version, locked packages, metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    /// Schema tag.
    pub version: u32,
    /// Locked packages keyed by `@owner/name`.
    #[serde(default)]
    pub packages: BTreeMap<String, LockedPackage>,
    /// Write metadata.
    #[serde(default)]
    pub metadata: LockMeta,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl Lockfile {
    /// Create a lockfile from a set of packages with fresh metadata.
    #[must_use]
    pub fn new(packages: BTreeMap<String, LockedPackage>) -> Self {
        Self {
            version: LOCKFILE_SCHEMA_VERSION,
            packages,
            metadata: LockMeta::now(),
        }
    }

    /// Read the lockfile from a project root.
    ///
    /// Returns `None` when the file does not exist.
    ///
    /// # Errors
    /// `CONFIG_INVALID` on parse errors or an unsupported schema version.
    pub fn read(project_root: &Path) -> Result<Option<Self>> {
        let path = project_root.join(LOCKFILE_NAME);
        if !path.exists() {
            return Ok(None);
        }

        let text = tz_util::fs::read_lossy(&path)
            .map_err(|e| Error::storage(format!("failed to read {}: {e}", path.display())))?;
        let lock: Self = toml::from_str(&text)?;

        if lock.version != LOCKFILE_SCHEMA_VERSION {
            return Err(Error::config_invalid(format!(
                "unsupported lockfile schema version {} (expected {LOCKFILE_SCHEMA_VERSION})",
                lock.version
            )));
        }

        Ok(Some(lock))
    }

    /// Merge `updates` over `previous`: updated entries replace previous
    /// ones, untouched entries are preserved, metadata is refreshed.
    #[must_use]
    pub fn merge(previous: &Self, updates: BTreeMap<String, LockedPackage>) -> Self {
        let mut packages = previous.packages.clone();
        packages.extend(updates);
        Self::new(packages)
    }

    /// Keep only the named packages; used after install computes the
    /// transitive closure.
    #[must_use]
    pub fn prune(mut self, keep_names: &BTreeSet<String>) -> Self {
        self.packages.retain(|name, _| keep_names.contains(name));
        self
    }

    /// Serialize deterministically (fixed table and field order).
    #[must_use]
    pub fn to_toml_string(&self) -> String {
        let mut doc = DocumentMut::new();

        doc.insert("version", toml_edit::value(i64::from(self.version)));

        let mut packages = Table::new();
        packages.set_implicit(true);
        for (name, pkg) in &self.packages {
            let mut entry = Table::new();
            entry.insert("version", toml_edit::value(pkg.version.as_str()));
            entry.insert("resolved", toml_edit::value(pkg.resolved.as_str()));
            entry.insert("integrity", toml_edit::value(pkg.integrity.as_str()));
            if pkg.yanked {
                entry.insert("yanked", toml_edit::value(true));
            }
            if !pkg.dependencies.is_empty() {
                let mut deps = Table::new();
                for (dep, range) in &pkg.dependencies {
                    deps.insert(dep, toml_edit::value(range.as_str()));
                }
                entry.insert("dependencies", Item::Table(deps));
            }
            packages.insert(name, Item::Table(entry));
        }
        doc.insert("packages", Item::Table(packages));

        let mut metadata = Table::new();
        metadata.insert(
            "generated_at",
            toml_edit::value(self.metadata.generated_at.as_str()),
        );
        metadata.insert(
            "cli_version",
            toml_edit::value(self.metadata.cli_version.as_str()),
        );
        doc.insert("metadata", Item::Table(metadata));

        format!(
            "# This file is automatically generated by tz.\n\
             # It is not intended for manual editing.\n\n\
             {doc}"
        )
    }

    /// Serialize and atomically replace the lockfile at a project root
    /// (temp file in the same directory, fsync, rename).
    ///
    /// # Errors
    /// `STORAGE_ERROR` on write failure.
    pub fn write_atomic(&self, project_root: &Path) -> Result<()> {
        let path = project_root.join(LOCKFILE_NAME);
        tz_util::fs::write_atomic(&path, self.to_toml_string().as_bytes())
            .map_err(|e| Error::storage(format!("failed to write {}: {e}", path.display())))
    }

    /// Names of all locked packages.
    #[must_use]
    pub fn package_names(&self) -> BTreeSet<String> {
        self.packages.keys().cloned().collect()
    }
}
