use crate::paths::{store_dir, TOKEN_ENV};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default registry base URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.tzhub.io";

/// Runtime configuration for the kernel.
///
/// Constructed by the caller (the CLI) and passed to the orchestrator; the
/// kernel itself never reads the environment or any global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Registry base URL.
    pub registry_url: String,

    /// Bearer token for the registry, if any.
    pub token: Option<String>,

    /// Root of the content-addressable store.
    pub store_root: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            registry_url: DEFAULT_REGISTRY.to_string(),
            token: None,
            store_root: store_dir(),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set the registry base URL.
    #[must_use]
    pub fn with_registry(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Override the store root (used by tests and sandboxed runs).
    #[must_use]
    pub fn with_store_root(mut self, root: PathBuf) -> Self {
        self.store_root = root;
        self
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Read the token override from the environment (`TZ_TOKEN`).
///
/// This is the single environment read the CLI performs on the kernel's
/// behalf; an empty value counts as unset.
#[must_use]
pub fn token_from_env() -> Option<String> {
    match std::env::var(TOKEN_ENV) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}
