//! Scenario Parser
//!
//! Parses Gherkin-style scenario text into a single [`Scenario`] made of ordered
//! [`Step`]s. The parser never fails: every structural problem becomes a
//! [`Diagnostic`].
//!
//! # Example scenario:
//! ```text
//! Feature: Observation Resource Creation
//!   As a client I want my observation validated
//!
//! Scenario: Create a vital signs observation
//!     Given the user submits an Observation resource
//!     Then validate against http://hl7.org/fhir/StructureDefinition/Observation
//!     And inform the user "Observation created successfully"
//! ```
//!
//! Only the first `Scenario:` block is kept. Narrative after `Feature:` and the
//! whole `Background:` block are dropped.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::diagnostic::{Diagnostic, DiagnosticKind};

lazy_static! {
    static ref FEATURE_RE: Regex = Regex::new(r"(?i)^Feature:\s*(.*)$").unwrap();
    static ref SCENARIO_RE: Regex = Regex::new(r"(?i)^Scenario:\s*(.*)$").unwrap();
    static ref BACKGROUND_RE: Regex = Regex::new(r"(?i)^Background:").unwrap();
    static ref STEP_RE: Regex = Regex::new(r"(?i)^(Given|When|Then|And|But)\s+(.*)$").unwrap();
    static ref TABLE_ROW_RE: Regex = Regex::new(r"^\s*\|.*\|\s*$").unwrap();
}

const DEFAULT_FEATURE: &str = "Feature";
const DEFAULT_SCENARIO: &str = "Scenario";

/// Step keyword vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepKeyword {
    Given,
    When,
    Then,
    And,
    But,
}

impl StepKeyword {
    /// Parse a keyword, ignoring case
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "given" => Some(StepKeyword::Given),
            "when" => Some(StepKeyword::When),
            "then" => Some(StepKeyword::Then),
            "and" => Some(StepKeyword::And),
            "but" => Some(StepKeyword::But),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKeyword::Given => "Given",
            StepKeyword::When => "When",
            StepKeyword::Then => "Then",
            StepKeyword::And => "And",
            StepKeyword::But => "But",
        }
    }
}

impl fmt::Display for StepKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data table attached to a step.
///
/// The header row names the columns. Repeated header names are kept once, at
/// their first position, and every record is normalized to the resulting width
/// (missing cells become `""`, surplus cells are dropped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new(header: Vec<String>, records: Vec<Vec<String>>) -> Self {
        let mut columns: Vec<String> = Vec::with_capacity(header.len());
        for name in header {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
        let width = columns.len();
        let rows = records
            .into_iter()
            .map(|mut cells| {
                cells.resize(width, String::new());
                cells
            })
            .collect();
        DataTable { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = TableRow<'_>> {
        self.rows.iter().map(move |values| TableRow {
            columns: &self.columns,
            values,
        })
    }

    /// Rows as column→value records
    pub fn records(&self) -> Vec<BTreeMap<String, String>> {
        self.rows().map(|row| row.to_record()).collect()
    }
}

/// A borrowed view of one table record
#[derive(Debug, Clone, Copy)]
pub struct TableRow<'a> {
    columns: &'a [String],
    values: &'a [String],
}

impl<'a> TableRow<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|ix| self.values[ix].as_str())
    }

    pub fn to_record(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// A single step line plus its optional data table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub keyword: StepKeyword,
    pub text: String,
    /// 1-based source line
    pub line: usize,
    pub table: Option<DataTable>,
}

/// The retained scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub feature: String,
    pub name: String,
    pub steps: Vec<Step>,
}

/// Parser output: the scenario plus structural diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScenario {
    pub scenario: Scenario,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    InFeaturePreamble,
    InBackground,
    InScenario,
    /// After a second `Scenario:` marker
    Discarding,
}

/// Parse scenario text.
pub fn parse(text: &str) -> ParsedScenario {
    let lines: Vec<&str> = text.lines().collect();
    let mut diagnostics = Vec::new();
    let mut state = State::Preamble;
    let mut feature: Option<String> = None;
    let mut name: Option<String> = None;
    let mut steps = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line_no = i + 1;
        let line = strip_inline_comment(lines[i]).trim();
        i += 1;

        if line.is_empty() {
            continue;
        }

        if let Some(caps) = FEATURE_RE.captures(line) {
            feature = Some(caps[1].trim().to_string());
            state = State::InFeaturePreamble;
            continue;
        }

        if let Some(caps) = SCENARIO_RE.captures(line) {
            if name.is_some() {
                diagnostics.push(Diagnostic::warning(line_no, DiagnosticKind::ExtraScenario));
                state = State::Discarding;
            } else {
                name = Some(caps[1].trim().to_string());
                state = State::InScenario;
            }
            continue;
        }

        if BACKGROUND_RE.is_match(line) {
            state = State::InBackground;
            continue;
        }

        if state != State::InScenario {
            continue;
        }

        if let Some(caps) = STEP_RE.captures(line) {
            let (table, consumed) = read_table(&lines[i..]);
            i += consumed;
            if let Some(keyword) = StepKeyword::parse(&caps[1]) {
                steps.push(Step {
                    keyword,
                    text: caps[2].trim().to_string(),
                    line: line_no,
                    table,
                });
            }
            continue;
        }

        diagnostics.push(Diagnostic::warning(
            line_no,
            DiagnosticKind::UnrecognizedLine {
                text: line.to_string(),
            },
        ));
    }

    if name.is_none() {
        diagnostics.push(Diagnostic::error(1, DiagnosticKind::MissingScenario));
    }

    let scenario = Scenario {
        feature: non_empty_or(feature, DEFAULT_FEATURE),
        name: non_empty_or(name, DEFAULT_SCENARIO),
        steps,
    };

    ParsedScenario {
        scenario,
        diagnostics,
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

/// Truncate at the first `#`. Quotes are not taken into account.
pub fn strip_inline_comment(raw: &str) -> &str {
    match raw.find('#') {
        Some(ix) => &raw[..ix],
        None => raw,
    }
}

/// Consume table rows directly following a step line.
/// Returns the table (if it has at least one record) and the number of lines used.
fn read_table(rest: &[&str]) -> (Option<DataTable>, usize) {
    let rows: Vec<Vec<String>> = rest
        .iter()
        .take_while(|raw| TABLE_ROW_RE.is_match(raw))
        .map(|raw| split_row(strip_inline_comment(raw)))
        .collect();
    let consumed = rows.len();

    let mut rows = rows.into_iter();
    let table = match rows.next() {
        Some(header) => {
            let records: Vec<Vec<String>> = rows.collect();
            if records.is_empty() {
                None
            } else {
                Some(DataTable::new(header, records))
            }
        }
        None => None,
    };

    (table, consumed)
}

/// `| a | b | c |` -> ["a", "b", "c"]
fn split_row(line: &str) -> Vec<String> {
    let line = line.trim();
    let inner = line.strip_prefix('|').unwrap_or(line);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}
