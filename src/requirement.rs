//! Service requirement gating
//!
//! Catalog rules may declare that a step needs an external service, optionally
//! at a given version (`">=1.0"`, `"<2"`, `"=2.0.1"`). The caller supplies the
//! versions that are actually available.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::diagnostic::{Diagnostic, DiagnosticKind, Severity};

lazy_static! {
    static ref CONSTRAINT_RE: Regex =
        Regex::new(r"^\s*(>=|<=|>|<|=)?\s*([0-9]+(?:\.[0-9]+){0,2})\s*$").unwrap();
}

/// A service a catalog rule depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequirement {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    AtLeast,
    GreaterThan,
    LessThan,
    AtMost,
    Exactly,
}

impl Comparison {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            Comparison::AtLeast => ord != Ordering::Less,
            Comparison::GreaterThan => ord == Ordering::Greater,
            Comparison::LessThan => ord == Ordering::Less,
            Comparison::AtMost => ord != Ordering::Greater,
            Comparison::Exactly => ord == Ordering::Equal,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::AtLeast => ">=",
            Comparison::GreaterThan => ">",
            Comparison::LessThan => "<",
            Comparison::AtMost => "<=",
            Comparison::Exactly => "=",
        };
        f.write_str(op)
    }
}

/// Three-part numeric version; missing parts are 0
pub type Version = [u64; 3];

/// A parsed version constraint such as `>=1.2`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionConstraint {
    pub comparison: Comparison,
    pub version: Version,
}

impl VersionConstraint {
    /// Returns `None` for anything outside the constraint grammar.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = CONSTRAINT_RE.captures(text)?;
        let comparison = match caps.get(1).map(|m| m.as_str()) {
            None | Some(">=") => Comparison::AtLeast,
            Some(">") => Comparison::GreaterThan,
            Some("<") => Comparison::LessThan,
            Some("<=") => Comparison::AtMost,
            Some("=") => Comparison::Exactly,
            Some(_) => return None,
        };
        Some(VersionConstraint {
            comparison,
            version: parse_version(&caps[2]),
        })
    }

    pub fn matches(&self, actual: &str) -> bool {
        self.comparison
            .holds(parse_version(actual).cmp(&self.version))
    }
}

/// Read up to three dotted components. Each component contributes its
/// leading digits, or 0 when it has none.
pub fn parse_version(text: &str) -> Version {
    let mut version = [0u64; 3];
    for (slot, part) in version.iter_mut().zip(text.trim().split('.')) {
        let digits: String = part.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
        *slot = digits.parse().unwrap_or(0);
    }
    version
}

/// Malformed constraints are never satisfied.
pub fn satisfies(actual: &str, constraint: &str) -> bool {
    VersionConstraint::parse(constraint)
        .map(|c| c.matches(actual))
        .unwrap_or(false)
}

/// Check every requirement of a matched rule against the available services.
///
/// Returns one diagnostic per unmet requirement, at `line`. Severity is `error`
/// in strict mode and `warning` otherwise.
pub fn check_requirements(
    requirements: &[ServiceRequirement],
    services: &BTreeMap<String, String>,
    strict: bool,
    line: usize,
    step_text: &str,
) -> Vec<Diagnostic> {
    let severity = if strict {
        Severity::Error
    } else {
        Severity::Warning
    };

    requirements
        .iter()
        .filter_map(|req| {
            let kind = match (services.get(&req.service), &req.version) {
                (None, _) => DiagnosticKind::MissingService {
                    service: req.service.clone(),
                    step: step_text.to_string(),
                },
                (Some(actual), Some(constraint)) if !satisfies(actual, constraint) => {
                    DiagnosticKind::UnsatisfiedVersion {
                        service: req.service.clone(),
                        actual: actual.clone(),
                        constraint: constraint.clone(),
                    }
                }
                _ => return None,
            };
            Some(Diagnostic {
                severity,
                line,
                column: 1,
                kind,
            })
        })
        .collect()
}
