use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Read a file as UTF-8, mapping invalid sequences to U+FFFD.
///
/// Manifest and lockfile reads go through this so a stray invalid byte
/// surfaces later as a parse error naming the file, not as a bare I/O
/// error.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_lossy(path: &Path) -> io::Result<String> {
    fs::read(path).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Replace the contents of `path` atomically.
///
/// The bytes are staged in a uniquely named temp file in the destination
/// directory (same filesystem, so the final rename cannot cross a mount),
/// fsynced, then renamed over the target. A reader observes either the
/// previous contents or the new ones, never a torn write; the temp file
/// is cleaned up on every failure path.
///
/// # Errors
/// Returns an error if staging, syncing, or the rename fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Recursively copy a directory tree.
///
/// Symlinks inside the source tree are skipped rather than followed.
///
/// # Errors
/// Returns an error if any file or directory cannot be copied.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if ty.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else if ty.is_file() {
            fs::copy(&src_path, &dst_path)?;
        }
        // Skip symlinks
    }

    Ok(())
}

/// Total size in bytes of all regular files under a directory.
///
/// # Errors
/// Returns an error if the directory cannot be walked.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            total = total.saturating_add(entry.metadata().map_err(io::Error::other)?.len());
        }
    }
    Ok(total)
}
