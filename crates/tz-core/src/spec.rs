//! Package name and spec parsing.
//!
//! Parses package specifications like:
//! - `@t/starter`
//! - `@t/starter@1.2.0`
//! - `@t/starter@^1.0.0`
//! - `@t/starter@latest`

use crate::error::{Error, Result};
use std::fmt;

/// Range token meaning "highest non-prerelease, non-yanked version".
pub const LATEST: &str = "latest";

/// A validated `@owner/name` package name.
///
/// Owner and name are lowercase `[a-z0-9_-]+`. Two names are equal iff
/// byte-equal after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName {
    owner: String,
    name: String,
}

impl PackageName {
    /// Parse and validate a `@owner/name` string.
    ///
    /// # Errors
    /// Returns `INVALID_ARGUMENT` if the name is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let Some(rest) = input.strip_prefix('@') else {
            return Err(Error::invalid_argument(format!(
                "package name must start with '@': '{input}'"
            )));
        };

        let Some((owner, name)) = rest.split_once('/') else {
            return Err(Error::invalid_argument(format!(
                "package name must be '@owner/name': '{input}'"
            )));
        };

        validate_segment(owner, input)?;
        validate_segment(name, input)?;

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// The owner (scope without the `@`).
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The unscoped name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The URL-safe slug used in registry paths, `owner-name`.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}-{}", self.owner, self.name)
    }

    /// Relative store path components: `<owner>/<name>`.
    #[must_use]
    pub fn store_components(&self) -> (String, String) {
        (format!("@{}", self.owner), self.name.clone())
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}/{}", self.owner, self.name)
    }
}

fn validate_segment(segment: &str, whole: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::invalid_argument(format!(
            "empty segment in package name '{whole}'"
        )));
    }

    for c in segment.chars() {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
            return Err(Error::invalid_argument(format!(
                "invalid character '{c}' in package name '{whole}'"
            )));
        }
    }

    Ok(())
}

/// A parsed package specification: name plus optional range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Validated package name.
    pub name: PackageName,
    /// Version range or tag (`None` means `latest`).
    pub range: Option<String>,
}

impl PackageSpec {
    /// Parse a `@owner/name[@range]` specification string.
    ///
    /// # Errors
    /// Returns `INVALID_ARGUMENT` if the spec is invalid.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if input.is_empty() {
            return Err(Error::invalid_argument("empty package spec"));
        }

        let Some(rest) = input.strip_prefix('@') else {
            return Err(Error::invalid_argument(format!(
                "package spec must start with '@owner/': '{input}'"
            )));
        };

        // The version delimiter is an '@' after the name part.
        if let Some(at_pos) = rest.find('@') {
            let name = PackageName::parse(&input[..at_pos + 1])?;
            let range = &rest[at_pos + 1..];

            if range.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "empty version range in '{input}'"
                )));
            }

            Ok(Self {
                name,
                range: Some(range.to_string()),
            })
        } else {
            Ok(Self {
                name: PackageName::parse(input)?,
                range: None,
            })
        }
    }

    /// The effective range: the parsed one, or `latest`.
    #[must_use]
    pub fn effective_range(&self) -> &str {
        self.range.as_deref().unwrap_or(LATEST)
    }
}
