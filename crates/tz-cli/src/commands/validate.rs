//! `tz validate` command implementation.

use super::fail;
use miette::Result;
use serde::Serialize;
use tz_core::{paths, Config, Error, Manifest};

#[derive(Serialize)]
struct ValidateJsonResult {
    ok: bool,
    warnings: Vec<String>,
}

pub fn run(config: &Config, json: bool, verbose: u8) -> Result<()> {
    let project_root = match paths::project_root(&config.cwd) {
        Some(root) => root,
        None => {
            let e = Error::config_not_found(&config.cwd.join(paths::MANIFEST_NAME));
            fail(&e, json, verbose);
        }
    };

    let manifest = match Manifest::load(&project_root) {
        Ok(manifest) => manifest,
        Err(e) => fail(&e, json, verbose),
    };

    match manifest.validate() {
        Ok(warnings) => {
            if json {
                let result = ValidateJsonResult { ok: true, warnings };
                println!("{}", serde_json::to_string_pretty(&result).unwrap());
            } else {
                for warning in &warnings {
                    eprintln!("warning: {warning}");
                }
                println!("{} is valid", paths::MANIFEST_NAME);
            }
            Ok(())
        }
        Err(e) => fail(&e, json, verbose),
    }
}
