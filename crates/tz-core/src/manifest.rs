//! Project manifest (`agents.toml`) model.
//!
//! The manifest is parsed through `toml_edit` so writes round-trip: unknown
//! top-level tables are preserved verbatim, and `[dependencies]` /
//! `[profiles]` keep their insertion order. Typed views are rebuilt from
//! the document after every mutation.

use crate::error::{Error, Result};
use crate::paths::MANIFEST_NAME;
use crate::spec::PackageName;
use semver::Version;
use std::path::{Component, Path, PathBuf};
use toml_edit::{DocumentMut, Item, Value};

/// Tool identifiers the `[compatibility]` table recognizes.
pub const KNOWN_TOOLS: &[&str] = &["claude", "codex", "cursor", "copilot"];

/// `[package]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSection {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub license: Option<String>,
    pub authors: Vec<String>,
}

/// Where a declared dependency comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// A semver range (or the `latest` tag) resolved through the registry.
    Registry(String),
    /// A filesystem path (`./`, `../`, absolute, or `~/`) linked directly.
    Local(String),
}

impl DependencySource {
    /// Classify a raw dependency value.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("./")
            || raw.starts_with("../")
            || raw.starts_with('/')
            || raw.starts_with("~/")
        {
            Self::Local(raw.to_string())
        } else {
            Self::Registry(raw.to_string())
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The raw string value as written in the manifest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Registry(s) | Self::Local(s) => s,
        }
    }
}

/// Per-tool export entry, a tagged view over `[exports.<tool>]`.
///
/// These are consumed by external collaborators (the template renderer);
/// the kernel only validates the paths they reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSpec {
    Claude { memory: String },
    Codex { config: String },
    Cursor { rules: String },
    Copilot { instructions: String },
}

impl ToolSpec {
    /// The path this export references, relative to the package root.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Claude { memory } => memory,
            Self::Codex { config } => config,
            Self::Cursor { rules } => rules,
            Self::Copilot { instructions } => instructions,
        }
    }
}

/// Parsed project manifest with its backing document.
#[derive(Debug, Clone)]
pub struct Manifest {
    doc: DocumentMut,
    package: PackageSection,
    dependencies: Vec<(String, DependencySource)>,
    compatibility: Vec<(String, String)>,
    profiles: Vec<(String, Vec<String>)>,
}

impl Manifest {
    /// Load the manifest from a project root.
    ///
    /// # Errors
    /// `CONFIG_NOT_FOUND` if `agents.toml` is absent, `CONFIG_INVALID` on
    /// parse or shape errors.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(MANIFEST_NAME);
        if !path.exists() {
            return Err(Error::config_not_found(&path));
        }

        let text = tz_util::fs::read_lossy(&path)
            .map_err(|e| Error::storage(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Parse a manifest from TOML text.
    ///
    /// # Errors
    /// `CONFIG_INVALID` on TOML errors, type mismatches, or missing
    /// required fields.
    pub fn parse(text: &str) -> Result<Self> {
        let doc: DocumentMut = text.parse()?;
        Self::from_doc(doc)
    }

    fn from_doc(doc: DocumentMut) -> Result<Self> {
        let package = read_package(&doc)?;
        let dependencies = read_string_table(&doc, "dependencies")?
            .into_iter()
            .map(|(name, raw)| (name, DependencySource::parse(&raw)))
            .collect();
        let compatibility = read_string_table(&doc, "compatibility")?;
        let profiles = read_profiles(&doc)?;

        Ok(Self {
            doc,
            package,
            dependencies,
            compatibility,
            profiles,
        })
    }

    /// `[package]` section.
    #[must_use]
    pub fn package(&self) -> &PackageSection {
        &self.package
    }

    /// Declared dependencies in insertion order.
    #[must_use]
    pub fn dependencies(&self) -> &[(String, DependencySource)] {
        &self.dependencies
    }

    /// Registry dependencies only, in insertion order.
    pub fn registry_dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies.iter().filter_map(|(name, source)| match source {
            DependencySource::Registry(range) => Some((name.as_str(), range.as_str())),
            DependencySource::Local(_) => None,
        })
    }

    /// Local-path dependencies only, in insertion order.
    pub fn local_dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies.iter().filter_map(|(name, source)| match source {
            DependencySource::Local(path) => Some((name.as_str(), path.as_str())),
            DependencySource::Registry(_) => None,
        })
    }

    /// `[compatibility]` entries (advisory; the resolver ignores them).
    #[must_use]
    pub fn compatibility(&self) -> &[(String, String)] {
        &self.compatibility
    }

    /// `[profiles]` entries in insertion order.
    #[must_use]
    pub fn profiles(&self) -> &[(String, Vec<String>)] {
        &self.profiles
    }

    /// Typed views over `[exports.<tool>]` tables for the known tools.
    ///
    /// Unknown tools and unknown shapes are skipped, not errors.
    #[must_use]
    pub fn tool_exports(&self) -> Vec<ToolSpec> {
        let Some(exports) = self.doc.get("exports").and_then(Item::as_table) else {
            return Vec::new();
        };

        let mut specs = Vec::new();
        for (tool, item) in exports {
            let Some(table) = item.as_table_like() else {
                continue;
            };
            let field = |key: &str| -> Option<String> {
                table.get(key).and_then(Item::as_str).map(String::from)
            };
            let spec = match tool {
                "claude" => field("memory").map(|memory| ToolSpec::Claude { memory }),
                "codex" => field("config").map(|config| ToolSpec::Codex { config }),
                "cursor" => field("rules").map(|rules| ToolSpec::Cursor { rules }),
                "copilot" => {
                    field("instructions").map(|instructions| ToolSpec::Copilot { instructions })
                }
                _ => None,
            };
            if let Some(spec) = spec {
                specs.push(spec);
            }
        }
        specs
    }

    /// Validate manifest invariants.
    ///
    /// Returns advisory warnings (unrecognized compatibility tool-ids).
    ///
    /// # Errors
    /// `CONFIG_INVALID` when an invariant is violated.
    pub fn validate(&self) -> Result<Vec<String>> {
        PackageName::parse(&self.package.name)
            .map_err(|e| Error::config_invalid(format!("package.name: {}", e.message())))?;

        Version::parse(&self.package.version).map_err(|e| {
            Error::config_invalid(format!(
                "package.version '{}' is not semver: {e}",
                self.package.version
            ))
        })?;

        for (name, _) in &self.dependencies {
            PackageName::parse(name)
                .map_err(|e| Error::config_invalid(format!("dependency '{name}': {}", e.message())))?;
        }

        for (profile, members) in &self.profiles {
            let mut seen = std::collections::BTreeSet::new();
            for member in members {
                if !seen.insert(member) {
                    return Err(Error::config_invalid(format!(
                        "profile '{profile}' lists '{member}' more than once"
                    )));
                }
                if !self.dependencies.iter().any(|(name, _)| name == member) {
                    return Err(Error::config_invalid(format!(
                        "profile '{profile}' references '{member}', which is not in [dependencies]"
                    )));
                }
            }
        }

        for section in ["exports", "tasks"] {
            self.validate_section_paths(section)?;
        }

        let mut warnings = Vec::new();
        for (tool, _) in &self.compatibility {
            if !KNOWN_TOOLS.contains(&tool.as_str()) {
                warnings.push(format!("unrecognized tool '{tool}' in [compatibility]"));
            }
        }

        Ok(warnings)
    }

    /// Every string value under a section must be a relative path that stays
    /// inside the package root.
    fn validate_section_paths(&self, section: &str) -> Result<()> {
        let Some(table) = self.doc.get(section).and_then(Item::as_table) else {
            return Ok(());
        };

        for (key, item) in table {
            visit_string_values(item, &mut |value| {
                let path = PathBuf::from(value);
                if path.is_absolute() {
                    return Err(Error::config_invalid(format!(
                        "[{section}].{key}: path '{value}' must be relative"
                    )));
                }
                for component in path.components() {
                    if matches!(component, Component::ParentDir) {
                        return Err(Error::config_invalid(format!(
                            "[{section}].{key}: path '{value}' escapes the package root"
                        )));
                    }
                }
                Ok(())
            })?;
        }

        Ok(())
    }

    /// Insert or update a `[dependencies]` entry, preserving order of
    /// existing keys.
    ///
    /// # Errors
    /// `CONFIG_INVALID` if the rebuilt document is malformed.
    pub fn set_dependency(&mut self, name: &str, value: &str) -> Result<()> {
        let deps = self.doc["dependencies"].or_insert(toml_edit::table());
        if let Some(table) = deps.as_table_mut() {
            table.insert(name, toml_edit::value(value));
            table.set_implicit(false);
        }
        *self = Self::from_doc(std::mem::take(&mut self.doc))?;
        Ok(())
    }

    /// Remove a `[dependencies]` entry. Returns `true` if it existed.
    ///
    /// # Errors
    /// `CONFIG_INVALID` if the rebuilt document is malformed.
    pub fn remove_dependency(&mut self, name: &str) -> Result<bool> {
        let removed = self
            .doc
            .get_mut("dependencies")
            .and_then(Item::as_table_mut)
            .and_then(|table| table.remove(name))
            .is_some();
        *self = Self::from_doc(std::mem::take(&mut self.doc))?;
        Ok(removed)
    }

    /// Serialize back to TOML, preserving unknown tables and key order.
    #[must_use]
    pub fn to_toml_string(&self) -> String {
        self.doc.to_string()
    }

    /// Atomically write the manifest back to a project root.
    ///
    /// # Errors
    /// `STORAGE_ERROR` on write failure.
    pub fn save(&self, project_root: &Path) -> Result<()> {
        let path = project_root.join(MANIFEST_NAME);
        tz_util::fs::write_atomic(&path, self.to_toml_string().as_bytes())
            .map_err(|e| Error::storage(format!("failed to write {}: {e}", path.display())))
    }
}

fn read_package(doc: &DocumentMut) -> Result<PackageSection> {
    let Some(table) = doc.get("package").and_then(Item::as_table) else {
        return Err(Error::config_invalid("missing [package] section"));
    };

    let required = |key: &str| -> Result<String> {
        match table.get(key) {
            Some(item) => item
                .as_str()
                .map(String::from)
                .ok_or_else(|| Error::config_invalid(format!("package.{key} must be a string"))),
            None => Err(Error::config_invalid(format!("missing package.{key}"))),
        }
    };
    let optional = |key: &str| -> Result<Option<String>> {
        match table.get(key) {
            Some(item) => item
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| Error::config_invalid(format!("package.{key} must be a string"))),
            None => Ok(None),
        }
    };

    let authors = match table.get("authors") {
        None => Vec::new(),
        Some(item) => {
            let arr = item
                .as_array()
                .ok_or_else(|| Error::config_invalid("package.authors must be an array"))?;
            let mut authors = Vec::new();
            for value in arr {
                match value.as_str() {
                    Some(s) => authors.push(s.to_string()),
                    None => {
                        return Err(Error::config_invalid(
                            "package.authors entries must be strings",
                        ))
                    }
                }
            }
            authors
        }
    };

    Ok(PackageSection {
        name: required("name")?,
        version: required("version")?,
        description: optional("description")?,
        license: optional("license")?,
        authors,
    })
}

/// Read a top-level table of string values, preserving insertion order.
fn read_string_table(doc: &DocumentMut, section: &str) -> Result<Vec<(String, String)>> {
    let Some(item) = doc.get(section) else {
        return Ok(Vec::new());
    };
    let Some(table) = item.as_table() else {
        return Err(Error::config_invalid(format!("[{section}] must be a table")));
    };

    let mut entries = Vec::new();
    for (key, item) in table {
        let Some(value) = item.as_str() else {
            return Err(Error::config_invalid(format!(
                "[{section}].{key} must be a string"
            )));
        };
        entries.push((key.to_string(), value.to_string()));
    }
    Ok(entries)
}

fn read_profiles(doc: &DocumentMut) -> Result<Vec<(String, Vec<String>)>> {
    let Some(item) = doc.get("profiles") else {
        return Ok(Vec::new());
    };
    let Some(table) = item.as_table() else {
        return Err(Error::config_invalid("[profiles] must be a table"));
    };

    let mut profiles = Vec::new();
    for (name, item) in table {
        let Some(arr) = item.as_array() else {
            return Err(Error::config_invalid(format!(
                "[profiles].{name} must be an array of package names"
            )));
        };
        let mut members = Vec::new();
        for value in arr {
            match value.as_str() {
                Some(s) => members.push(s.to_string()),
                None => {
                    return Err(Error::config_invalid(format!(
                        "[profiles].{name} entries must be strings"
                    )))
                }
            }
        }
        profiles.push((name.to_string(), members));
    }
    Ok(profiles)
}

fn visit_string_values(
    item: &Item,
    f: &mut impl FnMut(&str) -> Result<()>,
) -> Result<()> {
    match item {
        Item::Value(Value::String(s)) => f(s.value()),
        Item::Value(Value::Array(arr)) => {
            for value in arr {
                if let Value::String(s) = value {
                    f(s.value())?;
                }
            }
            Ok(())
        }
        Item::Table(table) => {
            for (_, nested) in table {
                visit_string_values(nested, f)?;
            }
            Ok(())
        }
        Item::Value(Value::InlineTable(table)) => {
            for (_, value) in table {
                if let Value::String(s) = value {
                    f(s.value())?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
