//! `tz install` command implementation.

use super::{fail, print_warnings};
use miette::Result;
use serde::Serialize;
use tz_core::{Config, InstallOptions, InstallReport, Installer};

/// Install result for JSON output (locked format: `{ ok, install }`).
#[derive(Serialize)]
struct InstallJsonResult {
    ok: bool,
    install: InstallReport,
}

pub async fn run(
    config: Config,
    options: &InstallOptions,
    json: bool,
    verbose: u8,
) -> Result<()> {
    let installer = match Installer::new(config) {
        Ok(installer) => installer,
        Err(e) => fail(&e, json, verbose),
    };

    match installer.install(options).await {
        Ok(report) => {
            render(&report, json);
            Ok(())
        }
        Err(e) => fail(&e, json, verbose),
    }
}

fn render(report: &InstallReport, json: bool) {
    if json {
        let result = InstallJsonResult {
            ok: true,
            install: report.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
        return;
    }

    print_warnings(&report.warnings, json);
    for pkg in &report.packages {
        let copied = if pkg.copied { ", copied" } else { "" };
        println!("+ {}@{} ({}{copied})", pkg.name, pkg.version, pkg.source.as_str());
    }
    println!("Installed {} package(s)", report.packages.len());
}
