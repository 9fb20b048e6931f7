//! Content-addressable store for verified archives and extracted trees.
//!
//! Layout under the store root:
//!
//! ```text
//! store/@owner/name/1.0.0/        # extracted tree (canonical object)
//! store/@owner/name/1.0.0.tgz    # verified archive (integrity witness)
//! ```
//!
//! Entries are created on first fetch and never mutated afterwards.
//! Extraction is defensive: adversarial archives must not be able to write
//! outside the target directory, plant links, or exhaust disk.

use crate::error::{Error, Result};
use crate::integrity::create_integrity_hash;
use crate::spec::PackageName;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

/// Size caps enforced during extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    /// Maximum size of a single extracted file.
    pub max_entry_bytes: u64,
    /// Maximum total extracted size per archive.
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entry_bytes: 50 * 1024 * 1024,
            max_total_bytes: 500 * 1024 * 1024,
        }
    }
}

/// A store entry for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub version: String,
    pub size_bytes: u64,
}

/// The content store.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    limits: ExtractLimits,
    /// Top-level directory names whose `0755` files keep the executable
    /// bit. Empty by default: bundles carry no executable content.
    exec_allowlist: Vec<String>,
}

impl ContentStore {
    /// Create a store rooted at the given directory.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            limits: ExtractLimits::default(),
            exec_allowlist: Vec::new(),
        }
    }

    /// Override extraction limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ExtractLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of the extracted tree for `(name, version)`.
    #[must_use]
    pub fn path_for(&self, name: &PackageName, version: &str) -> PathBuf {
        let (scope, pkg) = name.store_components();
        self.root.join(scope).join(pkg).join(version)
    }

    /// Location of the verified archive for `(name, version)`.
    #[must_use]
    pub fn archive_path(&self, name: &PackageName, version: &str) -> PathBuf {
        let (scope, pkg) = name.store_components();
        self.root.join(scope).join(pkg).join(format!("{version}.tgz"))
    }

    /// Whether the extracted tree exists.
    #[must_use]
    pub fn has_extracted(&self, name: &PackageName, version: &str) -> bool {
        self.path_for(name, version).is_dir()
    }

    /// Write the archive bytes, keyed by `(name, version)`, and return the
    /// computed integrity string. The write is atomic; a concurrent reader
    /// observes either the old or the new bytes.
    ///
    /// # Errors
    /// `STORAGE_ERROR` on I/O failure.
    pub fn store_archive(&self, name: &PackageName, version: &str, bytes: &[u8]) -> Result<String> {
        let path = self.archive_path(name, version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tz_util::fs::write_atomic(&path, bytes)
            .map_err(|e| Error::storage(format!("failed to store archive {}: {e}", path.display())))?;
        Ok(create_integrity_hash(bytes))
    }

    /// Remove the stored archive, used when verification fails after a
    /// partial write.
    pub fn discard_archive(&self, name: &PackageName, version: &str) {
        let _ = fs::remove_file(self.archive_path(name, version));
    }

    /// Safely extract the stored archive into the store.
    ///
    /// Extraction happens into a hidden temp directory next to the final
    /// path, which is renamed into place on success; any failure removes
    /// the partial output. Within one archive extraction is sequential.
    ///
    /// # Errors
    /// `SECURITY_VIOLATION` for entries that escape the target, are
    /// absolute, or are symlinks; `STORAGE_ERROR` for I/O failures and
    /// exceeded size caps.
    pub fn extract(&self, name: &PackageName, version: &str) -> Result<()> {
        let archive_path = self.archive_path(name, version);
        if !archive_path.is_file() {
            return Err(Error::storage(format!(
                "no stored archive for {name}@{version}"
            )));
        }

        let dest = self.path_for(name, version);
        if dest.is_dir() {
            // Concurrent extraction already finished; entries are immutable.
            return Ok(());
        }

        let parent = dest
            .parent()
            .ok_or_else(|| Error::internal("store path has no parent"))?;
        fs::create_dir_all(parent)?;

        let temp_dir = parent.join(format!(".tmp-extract-{version}-{}", std::process::id()));
        if temp_dir.exists() {
            let _ = fs::remove_dir_all(&temp_dir);
        }
        fs::create_dir_all(&temp_dir)?;

        let result = self.extract_into(&archive_path, &temp_dir);

        if let Err(e) = result {
            let _ = fs::remove_dir_all(&temp_dir);
            return Err(e);
        }

        match fs::rename(&temp_dir, &dest) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_dir_all(&temp_dir);
                if dest.is_dir() {
                    // Lost a race with another extractor; same content.
                    Ok(())
                } else {
                    Err(Error::storage(format!(
                        "failed to finalize extraction for {name}@{version}: {e}"
                    )))
                }
            }
        }
    }

    fn extract_into(&self, archive_path: &Path, dest: &Path) -> Result<()> {
        let file = File::open(archive_path)?;
        let gz = GzDecoder::new(file);
        let mut archive = Archive::new(gz);

        let mut total_bytes = 0u64;

        for entry in archive
            .entries()
            .map_err(|e| Error::storage(format!("failed to read archive entries: {e}")))?
        {
            let mut entry =
                entry.map_err(|e| Error::storage(format!("failed to read archive entry: {e}")))?;

            let raw_path = entry
                .path()
                .map_err(|e| Error::storage(format!("failed to read entry path: {e}")))?
                .into_owned();

            let rel_path = sanitize_entry_path(&raw_path)?;
            let dest_path = dest.join(&rel_path);
            if !dest_path.starts_with(dest) {
                return Err(Error::security(format!(
                    "archive entry escapes extraction root: {}",
                    raw_path.display()
                )));
            }

            let entry_type = entry.header().entry_type();
            match entry_type {
                EntryType::Directory => {
                    create_dir_0755(&dest_path)?;
                }
                EntryType::Regular | EntryType::Continuous => {
                    let size = entry.header().size().unwrap_or(0);
                    if size > self.limits.max_entry_bytes {
                        return Err(Error::storage(format!(
                            "archive entry too large: {} bytes (max {})",
                            size, self.limits.max_entry_bytes
                        )));
                    }
                    total_bytes = total_bytes.saturating_add(size);
                    if total_bytes > self.limits.max_total_bytes {
                        return Err(Error::storage(format!(
                            "archive exceeds total size cap of {} bytes",
                            self.limits.max_total_bytes
                        )));
                    }

                    if let Some(parent) = dest_path.parent() {
                        create_dir_0755(parent)?;
                    }

                    // Write to a temp name, then rename into place.
                    let temp_path = dest_path.with_extension("tmp-part");
                    let mut out = File::create(&temp_path)?;
                    let copied = io::copy(&mut entry.by_ref().take(self.limits.max_entry_bytes + 1), &mut out)?;
                    if copied > self.limits.max_entry_bytes {
                        let _ = fs::remove_file(&temp_path);
                        return Err(Error::storage(format!(
                            "archive entry too large: {} (max {})",
                            raw_path.display(),
                            self.limits.max_entry_bytes
                        )));
                    }
                    drop(out);
                    fs::rename(&temp_path, &dest_path)?;

                    self.apply_file_mode(&dest_path, &rel_path, entry.header().mode().ok())?;
                }
                EntryType::Symlink => {
                    return Err(Error::security(format!(
                        "archive contains a symlink entry: {}",
                        raw_path.display()
                    )));
                }
                EntryType::Link => {
                    // Hard link: target must resolve inside the archive root.
                    let link_name = entry
                        .link_name()
                        .map_err(|e| Error::storage(format!("failed to read link target: {e}")))?
                        .ok_or_else(|| Error::security("hard link entry without a target"))?;
                    let link_rel = sanitize_entry_path(&link_name)?;
                    let link_target = dest.join(&link_rel);
                    if !link_target.starts_with(dest) || !link_target.is_file() {
                        return Err(Error::security(format!(
                            "hard link target outside the archive: {}",
                            link_name.display()
                        )));
                    }
                    fs::hard_link(&link_target, &dest_path)?;
                }
                other => {
                    return Err(Error::security(format!(
                        "unsupported archive entry type {other:?}: {}",
                        raw_path.display()
                    )));
                }
            }
        }

        Ok(())
    }

    /// `0644` for files; `0755` only when the archive says so and the
    /// entry's top-level directory is in the executable allowlist.
    fn apply_file_mode(&self, path: &Path, rel_path: &Path, archive_mode: Option<u32>) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let top = rel_path
                .components()
                .next()
                .and_then(|c| c.as_os_str().to_str())
                .unwrap_or_default();
            let executable = archive_mode.is_some_and(|m| m & 0o111 != 0)
                && self.exec_allowlist.iter().any(|allowed| allowed == top);
            let mode = if executable { 0o755 } else { 0o644 };
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        {
            let _ = (path, rel_path, archive_mode);
        }
        Ok(())
    }

    /// List extracted entries as `(name, version, size)`.
    ///
    /// # Errors
    /// `STORAGE_ERROR` if the store cannot be read.
    pub fn list(&self) -> Result<Vec<StoreEntry>> {
        let mut entries = Vec::new();

        if !self.root.exists() {
            return Ok(entries);
        }

        for scope_entry in fs::read_dir(&self.root)?.flatten() {
            let scope_path = scope_entry.path();
            let scope_name = scope_entry.file_name();
            let scope = scope_name.to_string_lossy();
            if !scope_path.is_dir() || !scope.starts_with('@') {
                continue;
            }

            for pkg_entry in fs::read_dir(&scope_path)?.flatten() {
                let pkg_path = pkg_entry.path();
                if !pkg_path.is_dir() {
                    continue;
                }
                let pkg = pkg_entry.file_name().to_string_lossy().into_owned();

                for version_entry in fs::read_dir(&pkg_path)?.flatten() {
                    let version_path = version_entry.path();
                    let version = version_entry.file_name().to_string_lossy().into_owned();
                    if !version_path.is_dir() || version.starts_with('.') {
                        continue;
                    }

                    let size_bytes = tz_util::fs::dir_size(&version_path)?;
                    entries.push(StoreEntry {
                        name: format!("{scope}/{pkg}"),
                        version,
                        size_bytes,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        Ok(entries)
    }
}

/// Normalize and validate an archive entry path.
///
/// Rejects absolute paths, `..` components, and components that still
/// contain a separator after normalization.
fn sanitize_entry_path(raw: &Path) -> Result<PathBuf> {
    if raw.is_absolute() {
        return Err(Error::security(format!(
            "archive contains an absolute path: {}",
            raw.display()
        )));
    }

    let mut normalized = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => {
                let part_str = part.to_string_lossy();
                if part_str.contains('/') || part_str.contains('\\') {
                    return Err(Error::security(format!(
                        "archive entry component contains a separator: {part_str}"
                    )));
                }
                normalized.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::security(format!(
                    "archive contains path traversal: {}",
                    raw.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::security(format!(
                    "archive contains an absolute path: {}",
                    raw.display()
                )));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::security("archive contains an empty entry path"));
    }

    Ok(normalized)
}

fn create_dir_0755(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
