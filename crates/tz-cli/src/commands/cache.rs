//! `tz cache` command implementation.

use super::fail;
use miette::Result;
use serde::Serialize;
use tz_core::{Config, ContentStore};

#[derive(Serialize)]
struct CacheEntryJson {
    name: String,
    version: String,
    size_bytes: u64,
}

#[derive(Serialize)]
struct CacheListJsonResult {
    ok: bool,
    packages: Vec<CacheEntryJson>,
    total_size_bytes: u64,
}

pub fn run_list(config: &Config, json: bool, verbose: u8) -> Result<()> {
    let store = ContentStore::new(config.store_root.clone());

    let entries = match store.list() {
        Ok(entries) => entries,
        Err(e) => fail(&e, json, verbose),
    };

    let total: u64 = entries.iter().map(|entry| entry.size_bytes).sum();

    if json {
        let result = CacheListJsonResult {
            ok: true,
            packages: entries
                .into_iter()
                .map(|entry| CacheEntryJson {
                    name: entry.name,
                    version: entry.version,
                    size_bytes: entry.size_bytes,
                })
                .collect(),
            total_size_bytes: total,
        };
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
        return Ok(());
    }

    if entries.is_empty() {
        println!("Store is empty");
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}@{} ({} KiB)",
            entry.name,
            entry.version,
            entry.size_bytes / 1024
        );
    }
    println!("{} entr(ies), {} KiB total", entries.len(), total / 1024);
    Ok(())
}
