//! `tz version` command implementation.

use miette::Result;
use serde::Serialize;

#[derive(Serialize)]
struct VersionJsonResult {
    ok: bool,
    version: &'static str,
}

pub fn run(json: bool) -> Result<()> {
    if json {
        let result = VersionJsonResult {
            ok: true,
            version: env!("CARGO_PKG_VERSION"),
        };
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
    } else {
        println!("tz {}", env!("CARGO_PKG_VERSION"));
    }
    Ok(())
}
