//! `tz update` command implementation.

use super::{fail, print_warnings};
use miette::Result;
use serde::Serialize;
use tz_core::{Config, Installer, UpdateOptions, UpdateReport};

/// Update result for JSON output (locked format: `{ ok, update }`).
#[derive(Serialize)]
struct UpdateJsonResult {
    ok: bool,
    update: UpdateReport,
}

pub async fn run(
    config: Config,
    options: &UpdateOptions,
    json: bool,
    verbose: u8,
) -> Result<()> {
    let installer = match Installer::new(config) {
        Ok(installer) => installer,
        Err(e) => fail(&e, json, verbose),
    };

    match installer.update(options).await {
        Ok(report) => {
            render(&report, json);
            Ok(())
        }
        Err(e) => fail(&e, json, verbose),
    }
}

fn render(report: &UpdateReport, json: bool) {
    if json {
        let result = UpdateJsonResult {
            ok: true,
            update: report.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
        return;
    }

    print_warnings(&report.warnings, json);

    if report.plan.is_empty() {
        println!("Everything is up to date");
        return;
    }

    for change in &report.plan {
        match &change.old {
            Some(old) => println!("{}: {old} -> {}", change.name, change.new),
            None => println!("{}: (new) -> {}", change.name, change.new),
        }
    }

    if report.applied {
        println!("Updated {} package(s)", report.plan.len());
    } else {
        println!("Dry run; nothing changed");
    }
}
