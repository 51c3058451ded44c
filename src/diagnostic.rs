//! Diagnostics produced while parsing, expanding and validating.
//!
//! A diagnostic is a severity, a location and a closed [`DiagnosticKind`].
//! The human-readable message is derived from the kind so every consumer can
//! match on the kind exhaustively instead of parsing strings.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Coarse classification of diagnostic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueClass {
    /// Missing/duplicate scenario markers, unrecognized lines
    StructuralParse,
    /// No matching rule, missing or insufficient table
    StepMapping,
    /// Unmet service/version constraint
    Requirement,
    /// Shape problems in the serialized document
    StructuralDocument,
    /// Reported by an external schema-validation service
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    MissingScenario,
    ExtraScenario,
    UnrecognizedLine { text: String },
    NoMapping { step: String },
    TableRequired,
    MissingColumns { columns: Vec<String> },
    MissingService { service: String, step: String },
    UnsatisfiedVersion {
        service: String,
        actual: String,
        constraint: String,
    },
    MalformedDocument { message: String },
    MissingRoot,
    MissingSection { section: String },
    MissingNamespace { namespace: String },
    MissingRootId,
    External { message: String },
}

impl DiagnosticKind {
    pub fn class(&self) -> IssueClass {
        match self {
            DiagnosticKind::MissingScenario
            | DiagnosticKind::ExtraScenario
            | DiagnosticKind::UnrecognizedLine { .. } => IssueClass::StructuralParse,
            DiagnosticKind::NoMapping { .. }
            | DiagnosticKind::TableRequired
            | DiagnosticKind::MissingColumns { .. } => IssueClass::StepMapping,
            DiagnosticKind::MissingService { .. } | DiagnosticKind::UnsatisfiedVersion { .. } => {
                IssueClass::Requirement
            }
            DiagnosticKind::MalformedDocument { .. }
            | DiagnosticKind::MissingRoot
            | DiagnosticKind::MissingSection { .. }
            | DiagnosticKind::MissingNamespace { .. }
            | DiagnosticKind::MissingRootId => IssueClass::StructuralDocument,
            DiagnosticKind::External { .. } => IssueClass::External,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::MissingScenario => write!(f, "Missing \"Scenario:\" line"),
            DiagnosticKind::ExtraScenario => write!(
                f,
                "Only one Scenario is supported; later scenarios will be ignored."
            ),
            DiagnosticKind::UnrecognizedLine { text } => {
                write!(f, "Unrecognized line: \"{}\"", text)
            }
            DiagnosticKind::NoMapping { step } => write!(f, "No mapping for step: \"{}\"", step),
            DiagnosticKind::TableRequired => write!(f, "Step requires a table"),
            DiagnosticKind::MissingColumns { columns } => {
                write!(f, "Missing columns: {}", columns.join(", "))
            }
            DiagnosticKind::MissingService { service, step } => write!(
                f,
                "Missing required service \"{}\" for step \"{}\"",
                service, step
            ),
            DiagnosticKind::UnsatisfiedVersion {
                service,
                actual,
                constraint,
            } => write!(
                f,
                "Service \"{}\" version {} does not satisfy requirement {}",
                service, actual, constraint
            ),
            DiagnosticKind::MalformedDocument { message } => {
                write!(f, "Malformed document: {}", message)
            }
            DiagnosticKind::MissingRoot => write!(f, "Missing root element <testcase>"),
            DiagnosticKind::MissingSection { section } => {
                write!(f, "Missing required element <{}>", section)
            }
            DiagnosticKind::MissingNamespace { namespace } => {
                write!(f, "Missing GITB namespace declaration ({})", namespace)
            }
            DiagnosticKind::MissingRootId => {
                write!(f, "Missing required attribute \"id\" on testcase element")
            }
            DiagnosticKind::External { message } => write!(f, "{}", message),
        }
    }
}

/// A severity-tagged, line-addressed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn error(line: usize, kind: DiagnosticKind) -> Self {
        Diagnostic {
            severity: Severity::Error,
            line,
            column: 1,
            kind,
        }
    }

    pub fn warning(line: usize, kind: DiagnosticKind) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            line,
            column: 1,
            kind,
        }
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = column.max(1);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    pub fn class(&self) -> IssueClass {
        self.kind.class()
    }

    /// Flat JSON shape consumed by editors: line, column, severity, message.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "line": self.line,
            "column": self.column,
            "severity": self.severity,
            "class": self.class(),
            "message": self.message(),
            "detail": self.kind,
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.line, self.column, self.severity, self.kind
        )
    }
}

pub fn count_errors(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

/// Append diagnostics from an external validator without touching our own.
pub fn merge_external(diagnostics: &mut Vec<Diagnostic>, external: Vec<Diagnostic>) {
    diagnostics.extend(external);
}
