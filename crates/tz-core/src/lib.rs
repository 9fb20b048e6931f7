#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod install;
pub mod integrity;
pub mod linker;
pub mod local;
pub mod lockfile;
pub mod manifest;
pub mod paths;
pub mod registry;
pub mod resolver;
pub mod spec;
pub mod store;
pub mod update;

pub use config::{token_from_env, Config, DEFAULT_REGISTRY};
pub use error::{Error, ErrorKind, Result};
pub use install::{
    InstallOptions, InstallReport, InstallSource, InstalledPackage, Installer,
    MAX_PARALLEL_DOWNLOADS,
};
pub use integrity::create_integrity_hash;
pub use linker::{link_package, unlink_package, LinkOutcome};
pub use lockfile::{LockedPackage, Lockfile, LOCKFILE_SCHEMA_VERSION};
pub use manifest::{Manifest, ToolSpec};
pub use paths::{AGENT_MODULES_DIR, LOCKFILE_NAME, MANIFEST_NAME, TOKEN_ENV};
pub use registry::{PackageMeta, RegistryClient, TarballInfo, VersionMeta};
pub use resolver::{Resolution, ResolveFlags};
pub use spec::{PackageName, PackageSpec};
pub use store::{ContentStore, ExtractLimits, StoreEntry};
pub use update::{PlannedUpdate, UpdateOptions, UpdateReport};
