//! Error taxonomy for the package-management kernel.
//!
//! Every failure is one of a closed set of [`ErrorKind`]s with a
//! human-readable message, optional structured context, and a stable
//! process exit code. Errors are never silently promoted to
//! [`ErrorKind::Internal`] unless the cause is genuinely unknown.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias used throughout the kernel.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigNotFound,
    ConfigInvalid,
    NetworkError,
    AuthRequired,
    PackageNotFound,
    VersionNotFound,
    VersionConflict,
    IntegrityMismatch,
    YankedVersion,
    StorageError,
    SecurityViolation,
    InvalidArgument,
    UnsupportedOperation,
    Internal,
}

impl ErrorKind {
    /// Stable SCREAMING_SNAKE_CASE code for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigNotFound => "CONFIG_NOT_FOUND",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::NetworkError => "NETWORK_ERROR",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::PackageNotFound => "PACKAGE_NOT_FOUND",
            Self::VersionNotFound => "VERSION_NOT_FOUND",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::IntegrityMismatch => "INTEGRITY_MISMATCH",
            Self::YankedVersion => "YANKED_VERSION",
            Self::StorageError => "STORAGE_ERROR",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::Internal => "INTERNAL",
        }
    }

    /// Stable process exit code for this kind.
    ///
    /// 0 is reserved for success; these values are part of the CLI contract.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::InvalidArgument => 2,
            Self::UnsupportedOperation => 3,
            Self::ConfigNotFound => 10,
            Self::ConfigInvalid => 11,
            Self::NetworkError => 20,
            Self::AuthRequired => 21,
            Self::PackageNotFound => 30,
            Self::VersionNotFound => 31,
            Self::VersionConflict => 32,
            Self::YankedVersion => 33,
            Self::IntegrityMismatch => 40,
            Self::StorageError => 50,
            Self::SecurityViolation => 51,
            Self::Internal => 70,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel error: a kind, a compact message, and optional key/value context.
///
/// `Display` renders the compact message only; verbose rendering is the
/// CLI's job (it prepends the kind and appends the context keys).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: BTreeMap<String, String>,
}

impl Error {
    /// Create an error with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach a structured context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// The error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The compact message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured context, sorted by key.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Stable exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub fn config_not_found(path: &std::path::Path) -> Self {
        Self::new(
            ErrorKind::ConfigNotFound,
            format!("manifest not found: {}", path.display()),
        )
    }

    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, msg)
    }

    pub fn auth_required(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthRequired, msg)
    }

    #[must_use]
    pub fn package_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::PackageNotFound,
            format!("package not found: {name}"),
        )
    }

    #[must_use]
    pub fn version_not_found(name: &str, version: &str) -> Self {
        Self::new(
            ErrorKind::VersionNotFound,
            format!("{name} has no version {version}"),
        )
        .with_context("package", name)
        .with_context("version", version)
    }

    pub fn version_conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::VersionConflict, msg)
    }

    #[must_use]
    pub fn integrity_mismatch(name: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorKind::IntegrityMismatch,
            format!("integrity mismatch for {name}"),
        )
        .with_context("expected", expected)
        .with_context("actual", actual)
    }

    #[must_use]
    pub fn yanked_version(name: &str, version: &str) -> Self {
        Self::new(
            ErrorKind::YankedVersion,
            format!("{name}@{version} is yanked and not pinned by the lockfile"),
        )
        .with_context("package", name)
        .with_context("version", version)
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageError, msg)
    }

    pub fn security(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityViolation, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedOperation, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::storage(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("request timed out: {e}"))
        } else if e.is_connect() {
            Self::network(format!("connection failed: {e}"))
        } else {
            Self::network(e.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::config_invalid(e.to_string())
    }
}

impl From<toml_edit::TomlError> for Error {
    fn from(e: toml_edit::TomlError) -> Self {
        Self::config_invalid(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_screaming_snake_case() {
        let kinds = [
            ErrorKind::ConfigNotFound,
            ErrorKind::ConfigInvalid,
            ErrorKind::NetworkError,
            ErrorKind::AuthRequired,
            ErrorKind::PackageNotFound,
            ErrorKind::VersionNotFound,
            ErrorKind::VersionConflict,
            ErrorKind::IntegrityMismatch,
            ErrorKind::YankedVersion,
            ErrorKind::StorageError,
            ErrorKind::SecurityViolation,
            ErrorKind::InvalidArgument,
            ErrorKind::UnsupportedOperation,
            ErrorKind::Internal,
        ];

        for kind in kinds {
            assert!(
                kind.as_str().chars().all(|c| c.is_uppercase() || c == '_'),
                "code '{kind}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::ConfigNotFound,
            ErrorKind::ConfigInvalid,
            ErrorKind::NetworkError,
            ErrorKind::AuthRequired,
            ErrorKind::PackageNotFound,
            ErrorKind::VersionNotFound,
            ErrorKind::VersionConflict,
            ErrorKind::IntegrityMismatch,
            ErrorKind::YankedVersion,
            ErrorKind::StorageError,
            ErrorKind::SecurityViolation,
            ErrorKind::InvalidArgument,
            ErrorKind::UnsupportedOperation,
            ErrorKind::Internal,
        ];

        let mut seen = std::collections::HashSet::new();
        for kind in kinds {
            let code = kind.exit_code();
            assert_ne!(code, 0, "exit code for {kind} must not be 0");
            assert!(seen.insert(code), "duplicate exit code {code} for {kind}");
        }
    }

    #[test]
    fn test_display_is_compact() {
        let err = Error::integrity_mismatch("@t/starter", "sha256-aaa", "sha256-bbb");
        assert_eq!(err.to_string(), "integrity mismatch for @t/starter");
        assert_eq!(err.context().get("expected").unwrap(), "sha256-aaa");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind(), ErrorKind::StorageError);
    }

    #[test]
    fn test_context_is_sorted() {
        let err = Error::network("boom")
            .with_context("z", "1")
            .with_context("a", "2");
        let keys: Vec<&String> = err.context().keys().collect();
        assert_eq!(keys, ["a", "z"]);
    }
}
