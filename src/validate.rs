//! Structural validation of serialized test cases
//!
//! [`validate_structure`] runs a well-formedness pass and then a handful of
//! shallow substring checks. Full schema validation is delegated to an external
//! [`SchemaService`], whose findings are appended to ours.

use lazy_static::lazy_static;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::diagnostic::{count_errors, Diagnostic, DiagnosticKind, Severity};
use crate::document::TDL_NAMESPACE;
use crate::error::{Result, TdlError};

lazy_static! {
    static ref ROOT_TAG_RE: Regex = Regex::new(r"<(?:gitb:)?testcase[^>]*>").unwrap();
}

const REQUIRED_SECTIONS: [&str; 3] = ["metadata", "actors", "steps"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralReport {
    /// No error-severity issues
    pub valid: bool,
    pub issues: Vec<Diagnostic>,
}

impl StructuralReport {
    fn from_issues(issues: Vec<Diagnostic>) -> Self {
        StructuralReport {
            valid: count_errors(&issues) == 0,
            issues,
        }
    }
}

/// 1-based (line, column) of a byte offset
fn locate(text: &str, offset: usize) -> (usize, usize) {
    let bytes = &text.as_bytes()[..offset.min(text.len())];
    let line = bytes.iter().filter(|&&b| b == b'\n').count() + 1;
    let column = match bytes.iter().rposition(|&b| b == b'\n') {
        Some(nl) => offset - nl,
        None => offset + 1,
    };
    (line, column)
}

fn malformed(xml: &str, offset: usize, message: String) -> Diagnostic {
    let (line, column) = locate(xml, offset);
    Diagnostic::error(line, DiagnosticKind::MalformedDocument { message }).with_column(column)
}

/// Returns the first well-formedness violation, if any.
pub fn check_well_formed(xml: &str) -> Option<Diagnostic> {
    let mut reader = Reader::from_str(xml);
    let mut open: Vec<(String, usize)> = Vec::new();
    let mut roots = 0usize;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if open.is_empty() {
                    roots += 1;
                }
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if roots > 1 && open.is_empty() {
                    return Some(malformed(
                        xml,
                        before,
                        format!("multiple root elements (found <{}>)", name),
                    ));
                }
                open.push((name, before));
            }
            Ok(Event::Empty(e)) => {
                if open.is_empty() {
                    roots += 1;
                    if roots > 1 {
                        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        return Some(malformed(
                            xml,
                            before,
                            format!("multiple root elements (found <{}>)", name),
                        ));
                    }
                }
            }
            Ok(Event::End(_)) => {
                open.pop();
            }
            Ok(Event::Eof) => {
                return open.pop().map(|(name, at)| {
                    malformed(xml, at, format!("element <{}> is never closed", name))
                });
            }
            Ok(_) => {}
            Err(e) => {
                let at = reader.buffer_position() as usize;
                return Some(malformed(xml, at, e.to_string()));
            }
        }
    }
}

/// Well-formedness first, then shallow shape checks. Never fails.
pub fn validate_structure(xml: &str) -> StructuralReport {
    if let Some(diagnostic) = check_well_formed(xml) {
        debug!(message = %diagnostic, "document is not well-formed");
        return StructuralReport::from_issues(vec![diagnostic]);
    }

    let mut issues = Vec::new();
    let root = ROOT_TAG_RE.find(xml);
    let root_line = root.map(|m| locate(xml, m.start()).0).unwrap_or(1);

    if !xml.contains("<gitb:testcase") && !xml.contains("<testcase") {
        issues.push(Diagnostic::error(1, DiagnosticKind::MissingRoot));
    }

    for section in REQUIRED_SECTIONS {
        let prefixed = format!("<gitb:{}", section);
        let plain = format!("<{}", section);
        if !xml.contains(&prefixed) && !xml.contains(&plain) {
            issues.push(Diagnostic::error(
                1,
                DiagnosticKind::MissingSection {
                    section: section.to_string(),
                },
            ));
        }
    }

    if !xml.contains(TDL_NAMESPACE) {
        issues.push(Diagnostic::warning(
            root_line,
            DiagnosticKind::MissingNamespace {
                namespace: TDL_NAMESPACE.to_string(),
            },
        ));
    }

    if let Some(tag) = root {
        if !tag.as_str().contains("id=") {
            issues.push(Diagnostic::error(root_line, DiagnosticKind::MissingRootId));
        }
    }

    StructuralReport::from_issues(issues)
}

// ---------------------------------------------------------------------------
// External schema validation
// ---------------------------------------------------------------------------

/// An external validator that accepts a serialized document
pub trait SchemaService {
    fn try_validate(&self, xml: &str) -> Result<Vec<Diagnostic>>;

    /// Like `try_validate`, but an unreachable service becomes a single
    /// error diagnostic.
    fn validate(&self, xml: &str) -> Vec<Diagnostic> {
        match self.try_validate(xml) {
            Ok(diagnostics) => diagnostics,
            Err(e) => {
                warn!(error = %e, "schema validation unavailable");
                vec![Diagnostic::error(
                    1,
                    DiagnosticKind::External {
                        message: "Could not connect to validation service".to_string(),
                    },
                )]
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceReport {
    #[serde(default)]
    #[allow(dead_code)]
    valid: bool,
    #[serde(default)]
    errors: Vec<ServiceIssue>,
}

#[derive(Debug, Deserialize)]
struct ServiceIssue {
    message: String,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    column: Option<usize>,
    #[serde(rename = "type", default)]
    severity: Option<String>,
}

/// Decode a `{valid, errors: [{message, line?, column?, type}]}` response.
pub fn parse_service_report(body: &str) -> Result<Vec<Diagnostic>> {
    let report: ServiceReport = serde_json::from_str(body)
        .map_err(|e| TdlError::ValidationService(format!("invalid response: {}", e)))?;

    Ok(report
        .errors
        .into_iter()
        .map(|issue| {
            let severity = match issue.severity.as_deref() {
                Some("warning") => Severity::Warning,
                _ => Severity::Error,
            };
            Diagnostic {
                severity,
                line: issue.line.unwrap_or(1).max(1),
                column: issue.column.unwrap_or(1).max(1),
                kind: DiagnosticKind::External {
                    message: issue.message,
                },
            }
        })
        .collect())
}

/// POSTs the document as `application/xml`
#[derive(Debug, Clone)]
pub struct HttpSchemaService {
    endpoint: String,
    timeout: Duration,
}

impl HttpSchemaService {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HttpSchemaService {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SchemaService for HttpSchemaService {
    fn try_validate(&self, xml: &str) -> Result<Vec<Diagnostic>> {
        debug!(endpoint = %self.endpoint, "posting document for schema validation");
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TdlError::ValidationService(e.to_string()))?;

        let response = client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(xml.to_string())
            .send()
            .map_err(|e| TdlError::ValidationService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TdlError::ValidationService(format!(
                "service returned {}",
                status
            )));
        }

        let body = response
            .text()
            .map_err(|e| TdlError::ValidationService(e.to_string()))?;
        parse_service_report(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testcase id="t" xmlns="http://www.gitb.com/tdl/v1/">
  <metadata><name>t</name></metadata>
  <actors/>
  <steps/>
</testcase>"#;

    fn kinds(report: &StructuralReport) -> Vec<&DiagnosticKind> {
        report.issues.iter().map(|d| &d.kind).collect()
    }

    #[test]
    fn test_minimal_document_is_valid() {
        let report = validate_structure(MINIMAL);
        assert!(report.valid, "{:?}", report.issues);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_missing_root_id_is_an_error() {
        let xml = MINIMAL.replace(r#" id="t""#, "");
        let report = validate_structure(&xml);
        assert!(!report.valid);
        assert_eq!(kinds(&report), vec![&DiagnosticKind::MissingRootId]);
        assert_eq!(report.issues[0].line, 2);
    }

    #[test]
    fn test_missing_namespace_is_a_warning() {
        let xml = MINIMAL.replace(r#" xmlns="http://www.gitb.com/tdl/v1/""#, "");
        let report = validate_structure(&xml);
        assert!(report.valid);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_missing_sections_and_root() {
        let report = validate_structure("<document><actors/></document>");
        assert!(!report.valid);
        let k = kinds(&report);
        assert!(k.contains(&&DiagnosticKind::MissingRoot));
        assert!(k.contains(&&DiagnosticKind::MissingSection {
            section: "metadata".to_string()
        }));
        assert!(k.contains(&&DiagnosticKind::MissingSection {
            section: "steps".to_string()
        }));
        assert!(!k.contains(&&DiagnosticKind::MissingSection {
            section: "actors".to_string()
        }));
    }

    #[test]
    fn test_mismatched_tags_are_malformed() {
        let xml = "<testcase id=\"x\">\n  <metadata>\n  </actors>\n</testcase>";
        let report = validate_structure(xml);
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 1);
        assert!(matches!(
            report.issues[0].kind,
            DiagnosticKind::MalformedDocument { .. }
        ));
        assert_eq!(report.issues[0].line, 3);
    }

    #[test]
    fn test_unclosed_element_is_malformed() {
        let xml = "<testcase id=\"x\">\n<metadata>";
        let diagnostic = check_well_formed(xml).unwrap();
        assert!(diagnostic.is_error());
        assert!(diagnostic.message().contains("metadata"));
        assert_eq!(diagnostic.line, 2);
    }

    #[test]
    fn test_multiple_roots_are_malformed() {
        assert!(check_well_formed("<a/><b/>").is_some());
        assert!(check_well_formed("<a></a>\n<b></b>").is_some());
        assert!(check_well_formed("<a><b/></a>").is_none());
    }

    #[test]
    fn test_locate() {
        assert_eq!(locate("abc\ndef", 0), (1, 1));
        assert_eq!(locate("abc\ndef", 5), (2, 2));
    }

    #[test]
    fn test_parse_service_report() {
        let body = r#"{"valid": false, "errors": [
            {"message": "cvc-complex-type.2.4", "line": 12, "column": 5, "type": "error"},
            {"message": "deprecated element", "type": "warning"}
        ]}"#;
        let diagnostics = parse_service_report(body).unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].line, 12);
        assert_eq!(diagnostics[0].column, 5);
        assert!(diagnostics[0].is_error());
        assert_eq!(diagnostics[1].severity, Severity::Warning);
        assert_eq!(diagnostics[1].line, 1);

        assert!(parse_service_report("not json").is_err());
    }

    #[test]
    fn test_unreachable_service() {
        let service = HttpSchemaService::new("http://127.0.0.1:9/api/validate-gitb")
            .with_timeout(Duration::from_secs(2));
        let diagnostics = service.validate(MINIMAL);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].message(),
            "Could not connect to validation service"
        );
        assert!(diagnostics[0].is_error());
    }
}
