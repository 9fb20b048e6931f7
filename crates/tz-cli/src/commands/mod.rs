pub mod add;
pub mod cache;
pub mod install;
pub mod remove;
pub mod update;
pub mod validate;
pub mod version;

use serde::Serialize;
use tz_core::Error;

/// Error payload for `--json` output.
#[derive(Serialize)]
pub(crate) struct ErrorInfo {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub context: std::collections::BTreeMap<String, String>,
}

impl ErrorInfo {
    pub(crate) fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind().as_str(),
            message: err.message().to_string(),
            context: err.context().clone(),
        }
    }
}

/// Render a kernel error and exit with its stable code.
///
/// Compact by default; verbose mode prepends the kind header and appends
/// the structured context keys.
pub(crate) fn fail(err: &Error, json: bool, verbose: u8) -> ! {
    if json {
        let payload = serde_json::json!({
            "ok": false,
            "error": ErrorInfo::from_error(err),
        });
        println!("{}", serde_json::to_string_pretty(&payload).unwrap());
    } else if verbose > 0 {
        eprintln!("error[{}]: {}", err.kind().as_str(), err.message());
        for (key, value) in err.context() {
            eprintln!("  {key}: {value}");
        }
    } else {
        eprintln!("error: {}", err.message());
    }

    std::process::exit(err.exit_code());
}

/// Print resolver/manifest warnings to stderr (human mode only).
pub(crate) fn print_warnings(warnings: &[String], json: bool) {
    if json {
        return;
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
}
