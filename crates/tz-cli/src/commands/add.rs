//! `tz add` command implementation.
//!
//! Adds specs to `[dependencies]` (preserving manifest order and unknown
//! tables), then runs the install pipeline.

use super::{fail, print_warnings};
use miette::Result;
use serde::Serialize;
use tz_core::{Config, InstallOptions, InstallReport, Installer, Manifest, PackageSpec};

#[derive(Serialize)]
struct AddJsonResult {
    ok: bool,
    added: Vec<String>,
    install: InstallReport,
}

pub async fn run(config: Config, specs: &[String], json: bool, verbose: u8) -> Result<()> {
    let installer = match Installer::new(config) {
        Ok(installer) => installer,
        Err(e) => fail(&e, json, verbose),
    };

    let parsed: Vec<PackageSpec> = match specs.iter().map(|s| PackageSpec::parse(s)).collect() {
        Ok(parsed) => parsed,
        Err(e) => fail(&e, json, verbose),
    };

    let mut manifest = match Manifest::load(installer.project_root()) {
        Ok(manifest) => manifest,
        Err(e) => fail(&e, json, verbose),
    };

    let mut added = Vec::new();
    for spec in &parsed {
        let name = spec.name.to_string();
        if let Err(e) = manifest.set_dependency(&name, spec.effective_range()) {
            fail(&e, json, verbose);
        }
        added.push(name);
    }

    if let Err(e) = manifest.save(installer.project_root()) {
        fail(&e, json, verbose);
    }

    match installer.install(&InstallOptions::default()).await {
        Ok(report) => {
            if json {
                let result = AddJsonResult {
                    ok: true,
                    added,
                    install: report,
                };
                println!("{}", serde_json::to_string_pretty(&result).unwrap());
            } else {
                print_warnings(&report.warnings, json);
                for name in &added {
                    println!("Added {name}");
                }
                println!("Installed {} package(s)", report.packages.len());
            }
            Ok(())
        }
        Err(e) => fail(&e, json, verbose),
    }
}
