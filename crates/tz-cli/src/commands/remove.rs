//! `tz remove` command implementation.
//!
//! Drops entries from `[dependencies]`, removes their module links, then
//! reruns the install pipeline so the lockfile is pruned to the remaining
//! closure.

use super::{fail, print_warnings};
use miette::Result;
use serde::Serialize;
use tz_core::{
    paths, unlink_package, Config, Error, InstallOptions, InstallReport, Installer, Manifest,
    PackageName,
};

#[derive(Serialize)]
struct RemoveJsonResult {
    ok: bool,
    removed: Vec<String>,
    install: InstallReport,
}

pub async fn run(config: Config, names: &[String], json: bool, verbose: u8) -> Result<()> {
    let installer = match Installer::new(config) {
        Ok(installer) => installer,
        Err(e) => fail(&e, json, verbose),
    };

    let mut manifest = match Manifest::load(installer.project_root()) {
        Ok(manifest) => manifest,
        Err(e) => fail(&e, json, verbose),
    };

    let modules_root = paths::agent_modules_dir(installer.project_root());
    let mut removed = Vec::new();
    for raw in names {
        let name = match PackageName::parse(raw) {
            Ok(name) => name,
            Err(e) => fail(&e, json, verbose),
        };

        match manifest.remove_dependency(raw) {
            Ok(true) => {}
            Ok(false) => {
                let e =
                    Error::invalid_argument(format!("'{raw}' is not in [dependencies]"));
                fail(&e, json, verbose);
            }
            Err(e) => fail(&e, json, verbose),
        }

        if let Err(e) = unlink_package(installer.project_root(), &modules_root, &name) {
            fail(&e, json, verbose);
        }
        removed.push(raw.clone());
    }

    if let Err(e) = manifest.save(installer.project_root()) {
        fail(&e, json, verbose);
    }

    match installer.install(&InstallOptions::default()).await {
        Ok(report) => {
            if json {
                let result = RemoveJsonResult {
                    ok: true,
                    removed,
                    install: report,
                };
                println!("{}", serde_json::to_string_pretty(&result).unwrap());
            } else {
                print_warnings(&report.warnings, json);
                for name in &removed {
                    println!("Removed {name}");
                }
            }
            Ok(())
        }
        Err(e) => fail(&e, json, verbose),
    }
}
