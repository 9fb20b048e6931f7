//! SAT-based dependency resolution.
//!
//! Version selection is encoded as Boolean satisfiability over
//! `x(name, version)` variables:
//!
//! - *at-most-one per name*: pairwise exclusions between a name's candidates
//! - *at-least-one per root*: a disjunction over candidates satisfying the
//!   declared range
//! - *dependency implications*: `x(N,V)` implies a disjunction over the dep
//!   name's candidates satisfying the declared range (an empty disjunction
//!   forbids `x(N,V)`)
//!
//! The solver branches through candidates in descending semver order, with
//! the lockfile pin (when it satisfies the operative range) tried first:
//! prefer-latest by default, lockfile stability when a pin exists. The
//! resolver is pure: the same metadata snapshot, lockfile, and roots always
//! produce the same resolution.

mod sat;

use crate::error::{Error, Result};
use crate::lockfile::Lockfile;
use crate::registry::VersionMeta;
use crate::spec::LATEST;
use sat::{Cnf, Literal};
use semver::{Version, VersionReq};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Versions map for one package: version string -> metadata.
pub type VersionsMap = BTreeMap<String, VersionMeta>;

/// Metadata snapshot the resolver works over: name -> versions.
pub type MetadataMap = BTreeMap<String, VersionsMap>;

/// Yanked-version and ordering policy.
#[derive(Debug, Clone, Copy)]
pub struct ResolveFlags {
    /// Exclude yanked versions from candidates (default true).
    pub skip_yanked: bool,
    /// Allow a yanked version when the lockfile pins exactly it (default true).
    pub allow_yanked_from_lock: bool,
    /// Branch on higher versions first (default true).
    pub prefer_latest: bool,
}

impl Default for ResolveFlags {
    fn default() -> Self {
        Self {
            skip_yanked: true,
            allow_yanked_from_lock: true,
            prefer_latest: true,
        }
    }
}

/// One selected package in a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    /// Exact selected version.
    pub version: String,
    /// The version's declared dependencies (name -> range).
    pub dependencies: BTreeMap<String, String>,
    /// Whether the selected version is yanked (lock-pinned only).
    pub yanked: bool,
}

/// A complete resolution: an exact version for every name in the closure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Selected packages, roots plus transitive closure.
    pub packages: BTreeMap<String, ResolvedPackage>,
    /// Advisory warnings (e.g. lock-pinned yanked versions).
    pub warnings: Vec<String>,
}

/// Does `version` satisfy `range`?
///
/// The distinguished token `latest` matches any non-prerelease version
/// (the ordering preference then picks the highest).
///
/// # Errors
/// `CONFIG_INVALID` when the range cannot be parsed.
pub fn range_matches(range: &str, version: &Version) -> Result<bool> {
    let range = range.trim();
    if range == LATEST {
        return Ok(version.pre.is_empty());
    }
    let req = VersionReq::parse(range)
        .map_err(|e| Error::config_invalid(format!("invalid version range '{range}': {e}")))?;
    Ok(req.matches(version))
}

#[derive(Debug, Clone)]
struct Candidate {
    version: Version,
    meta: VersionMeta,
}

/// Resolve `roots` against a metadata snapshot.
///
/// # Errors
/// `VERSION_CONFLICT` with a minimal witness when no assignment exists;
/// `YANKED_VERSION` when only yanked, non-pinned versions could satisfy a
/// requirement; `CONFIG_INVALID` for malformed ranges.
pub fn resolve(
    roots: &[(String, String)],
    metadata: &MetadataMap,
    lock: Option<&Lockfile>,
    flags: ResolveFlags,
) -> Result<Resolution> {
    if roots.is_empty() {
        return Ok(Resolution::default());
    }

    // Requirement ranges per name, with the requirer recorded for conflict
    // witnesses. Grows monotonically to a fixpoint: a range admitted by any
    // dependent widens the candidate set, whose metadata contributes new
    // requirements.
    let mut requirements: BTreeMap<String, BTreeSet<(String, String)>> = BTreeMap::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    for (name, range) in roots {
        if requirements
            .entry(name.clone())
            .or_default()
            .insert(("root".to_string(), range.clone()))
        {
            queue.push_back(name.clone());
        }
    }

    while let Some(name) = queue.pop_front() {
        let Some(versions) = metadata.get(&name) else {
            continue;
        };
        let ranges: Vec<String> = requirements[&name]
            .iter()
            .map(|(_, range)| range.clone())
            .collect();

        for (version_str, meta) in versions {
            let Ok(version) = Version::parse(version_str) else {
                continue;
            };
            let mut admitted = false;
            for range in &ranges {
                if range_matches(range, &version)? {
                    admitted = true;
                    break;
                }
            }
            if !admitted {
                continue;
            }

            let requirer = format!("{name}@{version_str}");
            for (dep_name, dep_range) in &meta.dependencies {
                let entry = requirements.entry(dep_name.clone()).or_default();
                if entry.insert((requirer.clone(), dep_range.clone())) {
                    queue.push_back(dep_name.clone());
                    // Existing requirers of this name may admit new
                    // candidates now; re-walk them too.
                    queue.push_back(name.clone());
                }
            }
        }
    }

    // Final candidate sets under the yanked policy.
    let mut candidates: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for (name, reqs) in &requirements {
        let Some(versions) = metadata.get(name) else {
            candidates.insert(name.clone(), Vec::new());
            continue;
        };

        let mut list = Vec::new();
        for (version_str, meta) in versions {
            let Ok(version) = Version::parse(version_str) else {
                continue;
            };
            let mut admitted = false;
            for (_, range) in reqs {
                if range_matches(range, &version)? {
                    admitted = true;
                    break;
                }
            }
            if !admitted {
                continue;
            }

            if meta.yanked && flags.skip_yanked {
                let pinned = flags.allow_yanked_from_lock
                    && lock.is_some_and(|lock| {
                        lock.packages
                            .get(name)
                            .is_some_and(|locked| locked.version == *version_str)
                    });
                if !pinned {
                    continue;
                }
            }

            list.push(Candidate {
                version,
                meta: meta.clone(),
            });
        }

        list.sort_by(|a, b| {
            if flags.prefer_latest {
                b.version.cmp(&a.version)
            } else {
                a.version.cmp(&b.version)
            }
        });
        candidates.insert(name.clone(), list);
    }

    // Variable numbering: names in sorted order, candidates in preference
    // order. Literals are 1-based.
    let mut var_of: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut info_of: Vec<(String, String)> = Vec::new();
    for (name, list) in &candidates {
        for candidate in list {
            let key = (name.clone(), candidate.version.to_string());
            var_of.insert(key.clone(), info_of.len() + 1);
            info_of.push(key);
        }
    }

    let mut cnf = Cnf::new(info_of.len());

    // At-most-one per name.
    for (name, list) in &candidates {
        for i in 0..list.len() {
            for j in (i + 1)..list.len() {
                let vi = var_of[&(name.clone(), list[i].version.to_string())] as Literal;
                let vj = var_of[&(name.clone(), list[j].version.to_string())] as Literal;
                cnf.add_clause(vec![-vi, -vj]);
            }
        }
    }

    // At-least-one per root.
    for (name, range) in roots {
        let list = candidates.get(name).map_or(&[][..], Vec::as_slice);
        let mut clause = Vec::new();
        for candidate in list {
            if range_matches(range, &candidate.version)? {
                clause.push(var_of[&(name.clone(), candidate.version.to_string())] as Literal);
            }
        }
        if clause.is_empty() {
            return Err(root_unsatisfiable(name, range, metadata, flags));
        }
        cnf.add_clause(clause);
    }

    // Dependency implications.
    for (name, list) in &candidates {
        for candidate in list {
            let var = var_of[&(name.clone(), candidate.version.to_string())] as Literal;
            for (dep_name, dep_range) in &candidate.meta.dependencies {
                let dep_list = candidates.get(dep_name).map_or(&[][..], Vec::as_slice);
                let mut clause = vec![-var];
                for dep_candidate in dep_list {
                    if range_matches(dep_range, &dep_candidate.version)? {
                        clause.push(
                            var_of[&(dep_name.clone(), dep_candidate.version.to_string())]
                                as Literal,
                        );
                    }
                }
                // A one-literal clause here is exactly the negation: no
                // candidate of the dep satisfies the range.
                cnf.add_clause(clause);
            }
        }
    }

    // Decision order: per name, preference order with the lockfile pin
    // hoisted when it satisfies the operative requirements.
    let mut decision_order: Vec<Literal> = Vec::new();
    for (name, list) in &candidates {
        let pinned = lock.and_then(|lock| lock.packages.get(name)).map(|p| &p.version);
        let mut ordered: Vec<&Candidate> = list.iter().collect();
        if let Some(pinned) = pinned {
            if let Some(pos) = ordered
                .iter()
                .position(|c| c.version.to_string() == *pinned)
            {
                let pin = ordered.remove(pos);
                ordered.insert(0, pin);
            }
        }
        for candidate in ordered {
            decision_order.push(var_of[&(name.clone(), candidate.version.to_string())] as Literal);
        }
    }

    let Some(model) = sat::solve(&cnf, &decision_order) else {
        return Err(conflict_witness(&requirements, &candidates, metadata));
    };

    // Decode: walk the selected assignment from the roots so only the
    // required closure lands in the resolution.
    let mut selected: BTreeMap<&str, &Candidate> = BTreeMap::new();
    for (idx, (name, version)) in info_of.iter().enumerate() {
        if model[idx] {
            let candidate = candidates[name]
                .iter()
                .find(|c| c.version.to_string() == *version)
                .expect("selected candidate exists");
            selected.insert(name.as_str(), candidate);
        }
    }

    let mut packages: BTreeMap<String, ResolvedPackage> = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut walk: VecDeque<&str> = roots.iter().map(|(name, _)| name.as_str()).collect();

    while let Some(name) = walk.pop_front() {
        if packages.contains_key(name) {
            continue;
        }
        let candidate = selected
            .get(name)
            .ok_or_else(|| Error::internal(format!("solver left '{name}' unselected")))?;

        if candidate.meta.yanked {
            warnings.push(format!(
                "{name}@{} is yanked; kept because the lockfile pins it",
                candidate.version
            ));
        }

        packages.insert(
            name.to_string(),
            ResolvedPackage {
                version: candidate.version.to_string(),
                dependencies: candidate.meta.dependencies.clone(),
                yanked: candidate.meta.yanked,
            },
        );

        for dep_name in candidate.meta.dependencies.keys() {
            walk.push_back(dep_name.as_str());
        }
    }

    Ok(Resolution { packages, warnings })
}

/// A root with an empty candidate disjunction: distinguish "only yanked
/// versions would match" from a plain conflict.
fn root_unsatisfiable(
    name: &str,
    range: &str,
    metadata: &MetadataMap,
    flags: ResolveFlags,
) -> Error {
    if flags.skip_yanked {
        if let Some(versions) = metadata.get(name) {
            for (version_str, meta) in versions {
                if let Ok(version) = Version::parse(version_str) {
                    if meta.yanked && range_matches(range, &version).unwrap_or(false) {
                        return Error::yanked_version(name, version_str);
                    }
                }
            }
        }
    }

    Error::version_conflict(format!("no version of {name} satisfies {range}"))
        .with_context("package", name)
        .with_context("range", range)
}

/// Build a minimal conflict witness: a name whose collected requirement
/// ranges admit no common version.
fn conflict_witness(
    requirements: &BTreeMap<String, BTreeSet<(String, String)>>,
    candidates: &BTreeMap<String, Vec<Candidate>>,
    metadata: &MetadataMap,
) -> Error {
    for (name, reqs) in requirements {
        let distinct_ranges: BTreeSet<&str> =
            reqs.iter().map(|(_, range)| range.as_str()).collect();
        if distinct_ranges.len() < 2 {
            continue;
        }

        let Some(versions) = metadata.get(name) else {
            continue;
        };
        let intersects = versions.keys().any(|version_str| {
            Version::parse(version_str).is_ok_and(|version| {
                reqs.iter()
                    .all(|(_, range)| range_matches(range, &version).unwrap_or(false))
            })
        });

        if !intersects {
            let mut err = Error::version_conflict(format!(
                "conflicting requirements for {name}: {}",
                reqs.iter()
                    .map(|(requirer, range)| format!("{requirer} requires {range}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
            .with_context("package", name);
            for (requirer, range) in reqs {
                err = err.with_context(format!("required by {requirer}"), range.clone());
            }
            return err;
        }
    }

    let names: Vec<&str> = candidates.keys().map(String::as_str).collect();
    Error::version_conflict(format!(
        "no consistent version assignment exists for: {}",
        names.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::lockfile::LockedPackage;

    fn meta(deps: &[(&str, &str)], yanked: bool) -> VersionMeta {
        VersionMeta {
            dependencies: deps
                .iter()
                .map(|(n, r)| ((*n).to_string(), (*r).to_string()))
                .collect(),
            yanked,
            published_at: None,
            integrity: None,
        }
    }

    fn metadata(entries: &[(&str, &[(&str, VersionMeta)])]) -> MetadataMap {
        entries
            .iter()
            .map(|(name, versions)| {
                (
                    (*name).to_string(),
                    versions
                        .iter()
                        .map(|(v, m)| ((*v).to_string(), m.clone()))
                        .collect(),
                )
            })
            .collect()
    }

    fn roots(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(n, r)| ((*n).to_string(), (*r).to_string()))
            .collect()
    }

    fn lock_with(entries: &[(&str, &str)]) -> Lockfile {
        let packages = entries
            .iter()
            .map(|(name, version)| {
                (
                    (*name).to_string(),
                    LockedPackage {
                        version: (*version).to_string(),
                        resolved: format!("https://cdn.example/{version}.tgz"),
                        integrity: "sha256-abc".to_string(),
                        dependencies: BTreeMap::new(),
                        yanked: false,
                    },
                )
            })
            .collect();
        Lockfile::new(packages)
    }

    #[test]
    fn test_prefers_latest() {
        let metadata = metadata(&[(
            "@t/starter",
            &[
                ("1.0.0", meta(&[], false)),
                ("1.2.0", meta(&[], false)),
                ("1.1.0", meta(&[], false)),
            ],
        )]);

        let resolution = resolve(
            &roots(&[("@t/starter", "^1.0.0")]),
            &metadata,
            None,
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages["@t/starter"].version, "1.2.0");
    }

    #[test]
    fn test_transitive_closure() {
        let metadata = metadata(&[
            (
                "@t/starter",
                &[("1.0.0", meta(&[("@t/base", "^2.0.0")], false))],
            ),
            ("@t/base", &[("2.0.0", meta(&[], false))]),
        ]);

        let resolution = resolve(
            &roots(&[("@t/starter", "^1.0.0")]),
            &metadata,
            None,
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages.len(), 2);
        assert_eq!(resolution.packages["@t/base"].version, "2.0.0");
    }

    #[test]
    fn test_calibration_backtracks_to_older_root() {
        // auth@1.1.0 needs tslib ^2, auth@1.0.0 and ui@1.0.0 need tslib ^1:
        // the solution must back off to auth 1.0.0, not drop ui.
        let metadata = metadata(&[
            (
                "@t/auth",
                &[
                    ("1.1.0", meta(&[("@t/tslib", "^2.0.0")], false)),
                    ("1.0.0", meta(&[("@t/tslib", "^1.0.0")], false)),
                ],
            ),
            ("@t/ui", &[("1.0.0", meta(&[("@t/tslib", "^1.0.0")], false))]),
            (
                "@t/tslib",
                &[("1.0.0", meta(&[], false)), ("2.0.0", meta(&[], false))],
            ),
        ]);

        let resolution = resolve(
            &roots(&[("@t/auth", "^1.0.0"), ("@t/ui", "^1.0.0")]),
            &metadata,
            None,
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages["@t/auth"].version, "1.0.0");
        assert_eq!(resolution.packages["@t/ui"].version, "1.0.0");
        assert_eq!(resolution.packages["@t/tslib"].version, "1.0.0");
    }

    #[test]
    fn test_lockfile_pin_preferred_over_latest() {
        let metadata = metadata(&[(
            "@t/starter",
            &[("1.0.0", meta(&[], false)), ("1.2.0", meta(&[], false))],
        )]);
        let lock = lock_with(&[("@t/starter", "1.0.0")]);

        let resolution = resolve(
            &roots(&[("@t/starter", "^1.0.0")]),
            &metadata,
            Some(&lock),
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages["@t/starter"].version, "1.0.0");
    }

    #[test]
    fn test_stale_lock_pin_ignored() {
        // The pin no longer satisfies the declared range; latest wins.
        let metadata = metadata(&[(
            "@t/starter",
            &[("1.0.0", meta(&[], false)), ("2.1.0", meta(&[], false))],
        )]);
        let lock = lock_with(&[("@t/starter", "1.0.0")]);

        let resolution = resolve(
            &roots(&[("@t/starter", "^2.0.0")]),
            &metadata,
            Some(&lock),
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages["@t/starter"].version, "2.1.0");
    }

    #[test]
    fn test_yanked_excluded_without_pin() {
        let metadata = metadata(&[(
            "@t/starter",
            &[("1.0.0", meta(&[], false)), ("1.1.0", meta(&[], true))],
        )]);

        let resolution = resolve(
            &roots(&[("@t/starter", "^1.0.0")]),
            &metadata,
            None,
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages["@t/starter"].version, "1.0.0");
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_only_yanked_fails_with_yanked_kind() {
        let metadata = metadata(&[("@t/starter", &[("1.1.0", meta(&[], true))])]);

        let err = resolve(
            &roots(&[("@t/starter", "^1.0.0")]),
            &metadata,
            None,
            ResolveFlags::default(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::YankedVersion);
    }

    #[test]
    fn test_yanked_pin_resolves_with_warning() {
        let metadata = metadata(&[(
            "@t/starter",
            &[("1.0.0", meta(&[], false)), ("1.1.0", meta(&[], true))],
        )]);
        let lock = lock_with(&[("@t/starter", "1.1.0")]);

        let resolution = resolve(
            &roots(&[("@t/starter", "^1.0.0")]),
            &metadata,
            Some(&lock),
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages["@t/starter"].version, "1.1.0");
        assert!(resolution.packages["@t/starter"].yanked);
        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].contains("yanked"));
    }

    #[test]
    fn test_conflict_produces_witness() {
        // Two roots force incompatible tslib majors with no escape hatch.
        let metadata = metadata(&[
            (
                "@t/auth",
                &[("1.0.0", meta(&[("@t/tslib", "^2.0.0")], false))],
            ),
            ("@t/ui", &[("1.0.0", meta(&[("@t/tslib", "^1.0.0")], false))]),
            (
                "@t/tslib",
                &[("1.0.0", meta(&[], false)), ("2.0.0", meta(&[], false))],
            ),
        ]);

        let err = resolve(
            &roots(&[("@t/auth", "^1.0.0"), ("@t/ui", "^1.0.0")]),
            &metadata,
            None,
            ResolveFlags::default(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::VersionConflict);
        assert!(err.message().contains("@t/tslib"));
        assert!(err.message().contains("^1.0.0"));
        assert!(err.message().contains("^2.0.0"));
    }

    #[test]
    fn test_unknown_root_conflicts() {
        let err = resolve(
            &roots(&[("@t/ghost", "^1.0.0")]),
            &MetadataMap::new(),
            None,
            ResolveFlags::default(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::VersionConflict);
    }

    #[test]
    fn test_empty_roots_is_empty_resolution() {
        let resolution =
            resolve(&[], &MetadataMap::new(), None, ResolveFlags::default()).unwrap();
        assert!(resolution.packages.is_empty());
    }

    #[test]
    fn test_latest_token_skips_prereleases() {
        let metadata = metadata(&[(
            "@t/starter",
            &[
                ("1.0.0", meta(&[], false)),
                ("2.0.0-rc.1", meta(&[], false)),
            ],
        )]);

        let resolution = resolve(
            &roots(&[("@t/starter", "latest")]),
            &metadata,
            None,
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages["@t/starter"].version, "1.0.0");
    }

    #[test]
    fn test_cycle_resolves() {
        // a 1.0.0 <-> b 1.0.0 depend on each other; implications handle it.
        let metadata = metadata(&[
            ("@t/a", &[("1.0.0", meta(&[("@t/b", "^1.0.0")], false))]),
            ("@t/b", &[("1.0.0", meta(&[("@t/a", "^1.0.0")], false))]),
        ]);

        let resolution = resolve(
            &roots(&[("@t/a", "^1.0.0")]),
            &metadata,
            None,
            ResolveFlags::default(),
        )
        .unwrap();

        assert_eq!(resolution.packages.len(), 2);
    }

    #[test]
    fn test_resolution_is_pure() {
        let metadata = metadata(&[
            (
                "@t/auth",
                &[
                    ("1.1.0", meta(&[("@t/tslib", "^2.0.0")], false)),
                    ("1.0.0", meta(&[("@t/tslib", "^1.0.0")], false)),
                ],
            ),
            ("@t/ui", &[("1.0.0", meta(&[("@t/tslib", "^1.0.0")], false))]),
            (
                "@t/tslib",
                &[("1.0.0", meta(&[], false)), ("2.0.0", meta(&[], false))],
            ),
        ]);
        let these_roots = roots(&[("@t/auth", "^1.0.0"), ("@t/ui", "^1.0.0")]);

        let a = resolve(&these_roots, &metadata, None, ResolveFlags::default()).unwrap();
        let b = resolve(&these_roots, &metadata, None, ResolveFlags::default()).unwrap();
        assert_eq!(a, b);
    }
}
