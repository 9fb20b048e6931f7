//! End-to-end install/update scenarios against a loopback registry.
//!
//! The fixture serves the registry HTTP contract from an in-memory package
//! table; tarballs are built in-test. Projects and stores live in temp
//! directories, so every test is hermetic.

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};
use tz_core::{
    create_integrity_hash, Config, ErrorKind, InstallOptions, InstallSource, Installer,
    Lockfile, UpdateOptions, LOCKFILE_NAME, MANIFEST_NAME,
};

#[derive(Clone)]
struct VersionDef {
    deps: BTreeMap<String, String>,
    yanked: bool,
    tarball: Vec<u8>,
    /// Integrity advertised by the registry; defaults to the real hash.
    advertised_integrity: Option<String>,
}

#[derive(Clone, Default)]
struct PackageDef {
    latest: String,
    versions: BTreeMap<String, VersionDef>,
}

#[derive(Default)]
struct RegistryData {
    /// Keyed by full name, e.g. `@t/starter`.
    packages: BTreeMap<String, PackageDef>,
    /// When set, every endpoint answers 401.
    unauthorized: bool,
    /// The server's own base URL, for absolute tarball URLs.
    base_url: String,
}

type SharedState = Arc<Mutex<RegistryData>>;

struct Fixture {
    base_url: String,
    state: SharedState,
}

impl Fixture {
    async fn start() -> Self {
        let state: SharedState = Arc::new(Mutex::new(RegistryData::default()));

        let app = Router::new()
            .route("/packages/v1/:owner/:pkg", get(package_handler))
            .route("/packages/v1/:owner/:pkg/versions", get(versions_handler))
            .route(
                "/packages/v1/:owner/:pkg/tarball/:version",
                get(tarball_info_handler),
            )
            .route("/dl/:owner/:pkg/:version", get(download_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}");
        state.lock().unwrap().base_url = base_url.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    fn publish(&self, name: &str, version: &str, deps: &[(&str, &str)], yanked: bool) {
        let tarball = bundle_tgz(name, version);
        let mut data = self.state.lock().unwrap();
        let pkg = data.packages.entry(name.to_string()).or_default();
        pkg.versions.insert(
            version.to_string(),
            VersionDef {
                deps: deps
                    .iter()
                    .map(|(n, r)| ((*n).to_string(), (*r).to_string()))
                    .collect(),
                yanked,
                tarball,
                advertised_integrity: None,
            },
        );
        // Highest published version wins the latest tag; good enough here.
        if pkg.latest.is_empty() || pkg.latest.as_str() < version {
            pkg.latest = version.to_string();
        }
    }

    fn tamper_advertised_integrity(&self, name: &str, version: &str) {
        let mut data = self.state.lock().unwrap();
        let def = data
            .packages
            .get_mut(name)
            .and_then(|pkg| pkg.versions.get_mut(version))
            .unwrap();
        def.advertised_integrity = Some(create_integrity_hash(b"not the real bytes"));
    }

    fn corrupt_tarball(&self, name: &str, version: &str) {
        let mut data = self.state.lock().unwrap();
        let def = data
            .packages
            .get_mut(name)
            .and_then(|pkg| pkg.versions.get_mut(version))
            .unwrap();
        // Advertise the pristine hash but serve flipped bytes.
        def.advertised_integrity = Some(create_integrity_hash(&def.tarball));
        def.tarball[0] ^= 0xff;
    }

    fn set_unauthorized(&self, value: bool) {
        self.state.lock().unwrap().unauthorized = value;
    }
}

/// Find a package by `(owner, slug)` path parameters.
fn lookup(data: &RegistryData, owner: &str, slug: &str) -> Option<(String, PackageDef)> {
    data.packages.iter().find_map(|(name, def)| {
        let rest = name.strip_prefix('@')?;
        let (pkg_owner, pkg_name) = rest.split_once('/')?;
        (pkg_owner == owner && format!("{pkg_owner}-{pkg_name}") == slug)
            .then(|| (name.clone(), def.clone()))
    })
}

fn versions_json(def: &PackageDef) -> serde_json::Value {
    let versions: serde_json::Map<String, serde_json::Value> = def
        .versions
        .iter()
        .map(|(version, vdef)| {
            (
                version.clone(),
                serde_json::json!({
                    "dependencies": vdef.deps,
                    "yanked": vdef.yanked,
                    "published_at": "2026-01-01T00:00:00Z",
                }),
            )
        })
        .collect();
    serde_json::Value::Object(versions)
}

async fn package_handler(
    State(state): State<SharedState>,
    UrlPath((owner, slug)): UrlPath<(String, String)>,
) -> Response {
    let data = state.lock().unwrap();
    if data.unauthorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match lookup(&data, &owner, &slug) {
        Some((name, def)) => Json(serde_json::json!({
            "name": name,
            "owner": owner,
            "latest": def.latest,
            "versions": versions_json(&def),
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn versions_handler(
    State(state): State<SharedState>,
    UrlPath((owner, slug)): UrlPath<(String, String)>,
) -> Response {
    let data = state.lock().unwrap();
    if data.unauthorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match lookup(&data, &owner, &slug) {
        Some((_, def)) => {
            Json(serde_json::json!({ "versions": versions_json(&def) })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn tarball_info_handler(
    State(state): State<SharedState>,
    UrlPath((owner, slug, version)): UrlPath<(String, String, String)>,
) -> Response {
    let data = state.lock().unwrap();
    if data.unauthorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some((_, def)) = lookup(&data, &owner, &slug) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(vdef) = def.versions.get(&version) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let integrity = vdef
        .advertised_integrity
        .clone()
        .unwrap_or_else(|| create_integrity_hash(&vdef.tarball));
    Json(serde_json::json!({
        "url": format!("{}/dl/{owner}/{slug}/{version}", data.base_url),
        "integrity": integrity,
    }))
    .into_response()
}

async fn download_handler(
    State(state): State<SharedState>,
    UrlPath((owner, slug, version)): UrlPath<(String, String, String)>,
) -> Response {
    let data = state.lock().unwrap();
    if data.unauthorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some((_, def)) = lookup(&data, &owner, &slug) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match def.versions.get(&version) {
        Some(vdef) => (
            [(header::CONTENT_TYPE, "application/gzip")],
            vdef.tarball.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Build a plausible bundle tarball for a package version.
fn bundle_tgz(name: &str, version: &str) -> Vec<u8> {
    let manifest = format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\n");
    let entries: Vec<(String, Vec<u8>)> = vec![
        ("agents.toml".to_string(), manifest.into_bytes()),
        (
            "prompts/system.md".to_string(),
            format!("# {name} {version}\n").into_bytes(),
        ),
    ];

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, data) in &entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, data.as_slice()).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// A tarball with an entry that escapes the extraction root.
fn hostile_tgz() -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        let data = b"boom";
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            let bytes = b"../escape.txt";
            gnu.name[..bytes.len()].copy_from_slice(bytes);
        }
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &data[..]).unwrap();
        builder.finish().unwrap();
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

struct Project {
    dir: TempDir,
    store: TempDir,
}

impl Project {
    fn new(deps: &[(&str, &str)]) -> Self {
        let dir = tempdir().unwrap();
        let store = tempdir().unwrap();

        let mut manifest = String::from("[package]\nname = \"@test/project\"\nversion = \"0.1.0\"\n\n[dependencies]\n");
        for (name, range) in deps {
            manifest.push_str(&format!("\"{name}\" = \"{range}\"\n"));
        }
        fs::write(dir.path().join(MANIFEST_NAME), manifest).unwrap();

        Self { dir, store }
    }

    fn installer(&self, fixture: &Fixture) -> Installer {
        let config = Config::new(self.dir.path().to_path_buf())
            .with_registry(&fixture.base_url)
            .with_store_root(self.store.path().join("store"));
        Installer::new(config).unwrap()
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn lock(&self) -> Option<Lockfile> {
        Lockfile::read(self.root()).unwrap()
    }

    fn module_target(&self, scope: &str, pkg: &str) -> PathBuf {
        fs::read_link(
            self.root()
                .join("agent_modules")
                .join(scope)
                .join(pkg),
        )
        .unwrap()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn basic_install_resolves_fetches_links_and_locks() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[("@t/base", "^2.0.0")], false);
    fixture.publish("@t/starter", "1.1.0", &[], true); // yanked
    fixture.publish("@t/base", "2.0.0", &[], false);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);

    let report = installer.install(&InstallOptions::default()).await.unwrap();

    // Summary: both packages, sorted by name, source remote.
    let names: Vec<&str> = report.packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["@t/base", "@t/starter"]);
    assert!(report
        .packages
        .iter()
        .all(|p| p.source == InstallSource::Remote));

    // Lockfile: the yanked 1.1.0 was skipped.
    let lock = project.lock().unwrap();
    assert_eq!(lock.packages["@t/starter"].version, "1.0.0");
    assert_eq!(lock.packages["@t/base"].version, "2.0.0");
    assert!(lock.packages["@t/starter"]
        .integrity
        .starts_with("sha256-"));

    // agent_modules resolves into the store.
    let target = project.module_target("@t", "starter");
    assert!(target.ends_with(PathBuf::from("@t/starter/1.0.0")));
    assert!(target.join("agents.toml").is_file());
    assert!(target.join("prompts").join("system.md").is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_install_hits_the_store() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[("@t/base", "^2.0.0")], false);
    fixture.publish("@t/base", "2.0.0", &[], false);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);

    installer.install(&InstallOptions::default()).await.unwrap();
    let lock_before = fs::read_to_string(project.root().join(LOCKFILE_NAME)).unwrap();

    let report = installer.install(&InstallOptions::default()).await.unwrap();
    assert!(report
        .packages
        .iter()
        .all(|p| p.source == InstallSource::Cache));

    // Same resolution, same pins.
    let lock_after = fs::read_to_string(project.root().join(LOCKFILE_NAME)).unwrap();
    let parse = |s: &str| toml::from_str::<toml::Value>(s).unwrap();
    assert_eq!(
        parse(&lock_before).get("packages"),
        parse(&lock_after).get("packages")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn yanked_only_version_is_rejected() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.1.0", &[], true);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);

    let err = installer
        .install(&InstallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::YankedVersion);
    assert!(project.lock().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn conflicting_ranges_name_the_witness() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/auth", "1.0.0", &[("@t/tslib", "^2.0.0")], false);
    fixture.publish("@t/ui", "1.0.0", &[("@t/tslib", "^1.0.0")], false);
    fixture.publish("@t/tslib", "1.0.0", &[], false);
    fixture.publish("@t/tslib", "2.0.0", &[], false);

    let project = Project::new(&[("@t/auth", "^1.0.0"), ("@t/ui", "^1.0.0")]);
    let installer = project.installer(&fixture);

    let err = installer
        .install(&InstallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);
    assert!(err.message().contains("@t/tslib"));
    assert!(err.message().contains("^1.0.0"));
    assert!(err.message().contains("^2.0.0"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn solver_backs_off_to_older_root_version() {
    // The calibration case: picking the newest auth would orphan ui.
    let fixture = Fixture::start().await;
    fixture.publish("@t/auth", "1.1.0", &[("@t/tslib", "^2.0.0")], false);
    fixture.publish("@t/auth", "1.0.0", &[("@t/tslib", "^1.0.0")], false);
    fixture.publish("@t/ui", "1.0.0", &[("@t/tslib", "^1.0.0")], false);
    fixture.publish("@t/tslib", "1.0.0", &[], false);
    fixture.publish("@t/tslib", "2.0.0", &[], false);

    let project = Project::new(&[("@t/auth", "^1.0.0"), ("@t/ui", "^1.0.0")]);
    let installer = project.installer(&fixture);

    installer.install(&InstallOptions::default()).await.unwrap();
    let lock = project.lock().unwrap();
    assert_eq!(lock.packages["@t/auth"].version, "1.0.0");
    assert_eq!(lock.packages["@t/ui"].version, "1.0.0");
    assert_eq!(lock.packages["@t/tslib"].version, "1.0.0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_dry_run_prints_plan_and_touches_nothing() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[], false);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);
    installer.install(&InstallOptions::default()).await.unwrap();

    let lock_before = fs::read_to_string(project.root().join(LOCKFILE_NAME)).unwrap();
    let link_before = project.module_target("@t", "starter");

    fixture.publish("@t/starter", "1.2.0", &[], false);

    let report = installer
        .update(&UpdateOptions { dry_run: true })
        .await
        .unwrap();

    assert!(!report.applied);
    assert_eq!(report.plan.len(), 1);
    assert_eq!(report.plan[0].name, "@t/starter");
    assert_eq!(report.plan[0].old.as_deref(), Some("1.0.0"));
    assert_eq!(report.plan[0].new, "1.2.0");

    // Nothing on disk moved.
    let lock_after = fs::read_to_string(project.root().join(LOCKFILE_NAME)).unwrap();
    assert_eq!(lock_before, lock_after);
    assert_eq!(project.module_target("@t", "starter"), link_before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_swaps_tree_and_lock_atomically() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[], false);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);
    installer.install(&InstallOptions::default()).await.unwrap();

    fixture.publish("@t/starter", "1.2.0", &[], false);

    let report = installer
        .update(&UpdateOptions::default())
        .await
        .unwrap();
    assert!(report.applied);

    let lock = project.lock().unwrap();
    assert_eq!(lock.packages["@t/starter"].version, "1.2.0");
    let target = project.module_target("@t", "starter");
    assert!(target.ends_with(PathBuf::from("@t/starter/1.2.0")));
    assert!(!project.root().join("agent_modules.new").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_update_leaves_everything_untouched() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[], false);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);
    installer.install(&InstallOptions::default()).await.unwrap();

    let lock_before = fs::read_to_string(project.root().join(LOCKFILE_NAME)).unwrap();

    // 1.2.0's tarball tries to escape the extraction root.
    {
        let mut data = fixture.state.lock().unwrap();
        let pkg = data.packages.get_mut("@t/starter").unwrap();
        pkg.versions.insert(
            "1.2.0".to_string(),
            VersionDef {
                deps: BTreeMap::new(),
                yanked: false,
                tarball: hostile_tgz(),
                advertised_integrity: None,
            },
        );
        pkg.latest = "1.2.0".to_string();
    }

    let err = installer
        .update(&UpdateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityViolation);

    // Previous tree and lockfile intact; no staging leftovers.
    let lock_after = fs::read_to_string(project.root().join(LOCKFILE_NAME)).unwrap();
    assert_eq!(lock_before, lock_after);
    let target = project.module_target("@t", "starter");
    assert!(target.ends_with(PathBuf::from("@t/starter/1.0.0")));
    assert!(!project.root().join("agent_modules.new").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tampered_tarball_is_rejected_and_discarded() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[], false);
    fixture.corrupt_tarball("@t/starter", "1.0.0");

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);

    let err = installer
        .install(&InstallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);

    // No partial store state and no lockfile.
    assert!(!installer
        .store()
        .archive_path(&tz_core::PackageName::parse("@t/starter").unwrap(), "1.0.0")
        .exists());
    assert!(project.lock().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn advertised_integrity_mismatch_is_rejected() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[], false);
    fixture.tamper_advertised_integrity("@t/starter", "1.0.0");

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);

    let err = installer
        .install(&InstallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_401_surfaces_auth_required() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[], false);
    fixture.set_unauthorized(true);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);

    let err = installer
        .install(&InstallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_dependencies_installs_cleanly() {
    let fixture = Fixture::start().await;
    let project = Project::new(&[]);
    let installer = project.installer(&fixture);

    let report = installer.install(&InstallOptions::default()).await.unwrap();
    assert!(report.packages.is_empty());

    let lock = project.lock().unwrap();
    assert!(lock.packages.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_install_reuses_lock_and_store() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[("@t/base", "^2.0.0")], false);
    fixture.publish("@t/base", "2.0.0", &[], false);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);
    installer.install(&InstallOptions::default()).await.unwrap();

    // Take the registry away entirely.
    fixture.set_unauthorized(true);

    let report = installer
        .install(&InstallOptions {
            offline: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(report.packages.len(), 2);
    assert!(report
        .packages
        .iter()
        .all(|p| p.source == InstallSource::Offline));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_install_without_lock_fails_before_mutation() {
    let fixture = Fixture::start().await;
    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);

    let err = installer
        .install(&InstallOptions {
            offline: true,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    assert!(!project.root().join("agent_modules").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frozen_lockfile_rejects_resolution_drift() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[], false);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);
    installer.install(&InstallOptions::default()).await.unwrap();

    // Frozen against an unchanged world: fine.
    installer
        .install(&InstallOptions {
            frozen_lockfile: true,
            ..Default::default()
        })
        .await
        .unwrap();

    // A newer version appears; frozen must refuse to move to it.
    fixture.publish("@t/starter", "2.0.0", &[], false);
    let mut manifest =
        fs::read_to_string(project.root().join(MANIFEST_NAME)).unwrap();
    manifest = manifest.replace("^1.0.0", "^2.0.0");
    fs::write(project.root().join(MANIFEST_NAME), manifest).unwrap();

    let err = installer
        .install(&InstallOptions {
            frozen_lockfile: true,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lock_pin_survives_newer_release() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[], false);

    let project = Project::new(&[("@t/starter", "^1.0.0")]);
    let installer = project.installer(&fixture);
    installer.install(&InstallOptions::default()).await.unwrap();

    // A newer satisfying version appears; plain install keeps the pin.
    fixture.publish("@t/starter", "1.5.0", &[], false);
    installer.install(&InstallOptions::default()).await.unwrap();

    let lock = project.lock().unwrap();
    assert_eq!(lock.packages["@t/starter"].version, "1.0.0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_package_returns_latest_and_versions() {
    let fixture = Fixture::start().await;
    fixture.publish("@t/starter", "1.0.0", &[("@t/base", "^2.0.0")], false);
    fixture.publish("@t/starter", "1.1.0", &[], true);

    let client = tz_core::RegistryClient::new(&fixture.base_url, None).unwrap();
    let name = tz_core::PackageName::parse("@t/starter").unwrap();

    let meta = client.get_package(&name).await.unwrap();
    assert_eq!(meta.name, "@t/starter");
    assert_eq!(meta.latest, "1.1.0");
    assert_eq!(meta.versions.len(), 2);
    assert!(meta.versions["1.1.0"].yanked);
    assert_eq!(meta.versions["1.0.0"].dependencies["@t/base"], "^2.0.0");

    let missing = tz_core::PackageName::parse("@t/ghost").unwrap();
    let err = client.get_package(&missing).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PackageNotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_dependency_links_without_lock_entry() {
    let fixture = Fixture::start().await;

    let project = Project::new(&[]);
    let bundle = project.root().join("packages").join("helper");
    fs::create_dir_all(&bundle).unwrap();
    fs::write(
        bundle.join(MANIFEST_NAME),
        "[package]\nname = \"@local/helper\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();

    let mut manifest = fs::read_to_string(project.root().join(MANIFEST_NAME)).unwrap();
    manifest.push_str("\"@local/helper\" = \"./packages/helper\"\n");
    fs::write(project.root().join(MANIFEST_NAME), manifest).unwrap();

    let installer = project.installer(&fixture);
    let report = installer.install(&InstallOptions::default()).await.unwrap();

    assert_eq!(report.packages.len(), 1);
    assert_eq!(report.packages[0].source, InstallSource::Local);
    assert!(report.packages[0].version.starts_with("0.1.0+local."));

    // Linked straight at the source directory, and absent from the lock.
    let target = project.module_target("@local", "helper");
    assert_eq!(target, bundle.canonicalize().unwrap());
    let lock = project.lock().unwrap();
    assert!(lock.packages.is_empty());
}
