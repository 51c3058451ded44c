//! Step expansion
//!
//! Matches each step against the rules of one data model, in catalog order, and
//! materializes the first matching rule's action templates into IR.
//!
//! For a matched rule the checks run in this order:
//! 1. required table columns (failure drops the step's actions)
//! 2. service requirements (reported, never blocking)
//! 3. template materialization

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::template::materialize;
use crate::catalog::{CatalogEntry, DataModel};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::document::ScriptletKind;
use crate::ir::IrAction;
use crate::requirement::check_requirements;
use crate::scenario::Step;

/// Caller-supplied context for requirement gating
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandOptions {
    /// service name → available version
    pub services: BTreeMap<String, String>,
    /// Unmet requirements are errors instead of warnings
    pub strict_requirements: bool,
}

/// Result of expanding one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepExpansion {
    pub actions: Vec<IrAction>,
    /// Label of the matched rule
    pub label: Option<String>,
    pub category: Option<ScriptletKind>,
    /// Extension that declared the matched rule
    pub extension: Option<String>,
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

impl StepExpansion {
    fn unmatched(diagnostic: Diagnostic) -> Self {
        StepExpansion {
            actions: Vec::new(),
            label: None,
            category: None,
            extension: None,
            diagnostics: vec![diagnostic],
        }
    }

    pub fn matched(&self) -> bool {
        self.label.is_some()
    }

    /// Scriptlet category for this step; `custom` unless the rule says otherwise
    pub fn scriptlet_kind(&self) -> ScriptletKind {
        self.category.unwrap_or(ScriptletKind::Custom)
    }
}

pub struct Expander<'a> {
    model: &'a DataModel,
    options: &'a ExpandOptions,
}

impl<'a> Expander<'a> {
    pub fn new(model: &'a DataModel, options: &'a ExpandOptions) -> Self {
        Expander { model, options }
    }

    /// First rule matching `text`, with its captured groups
    fn find(&self, text: &str) -> Option<(&'a CatalogEntry, Vec<String>)> {
        let model: &'a DataModel = self.model;
        model
            .entries()
            .find_map(|entry| entry.captures(text).map(|groups| (entry, groups)))
    }

    /// Label of the rule that would handle `text`, without expanding it
    pub fn step_mapping(&self, text: &str) -> Option<&'a str> {
        let text = text.trim();
        let model: &'a DataModel = self.model;
        model
            .entries()
            .find(|entry| entry.is_match(text))
            .map(CatalogEntry::label)
    }

    pub fn expand_step(&self, step: &Step) -> StepExpansion {
        let text = step.text.trim();

        let (entry, groups) = match self.find(text) {
            Some(found) => found,
            None => {
                debug!(line = step.line, text, "no rule matched");
                return StepExpansion::unmatched(Diagnostic::error(
                    step.line,
                    DiagnosticKind::NoMapping {
                        step: text.to_string(),
                    },
                ));
            }
        };

        debug!(
            line = step.line,
            rule = entry.label(),
            extension = %entry.extension,
            "step matched"
        );

        let mut expansion = StepExpansion {
            actions: Vec::new(),
            label: Some(entry.label().to_string()),
            category: entry.category,
            extension: Some(entry.extension.clone()),
            diagnostics: Vec::new(),
        };

        if !entry.required_columns.is_empty() {
            let table = match &step.table {
                Some(table) if !table.is_empty() => table,
                _ => {
                    expansion
                        .diagnostics
                        .push(Diagnostic::error(step.line, DiagnosticKind::TableRequired));
                    return expansion;
                }
            };
            let missing: Vec<String> = entry
                .required_columns
                .iter()
                .filter(|column| !table.has_column(column))
                .cloned()
                .collect();
            if !missing.is_empty() {
                expansion.diagnostics.push(Diagnostic::error(
                    step.line,
                    DiagnosticKind::MissingColumns { columns: missing },
                ));
                return expansion;
            }
        }

        expansion.diagnostics.extend(check_requirements(
            &entry.requirements,
            &self.options.services,
            self.options.strict_requirements,
            step.line,
            text,
        ));

        expansion.actions = materialize(&entry.actions, &groups, step.table.as_ref());
        expansion
    }

    /// Expand every step; a failing step never affects its siblings.
    pub fn expand_all(&self, steps: &[Step]) -> Vec<StepExpansion> {
        steps.iter().map(|step| self.expand_step(step)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::diagnostic::Severity;
    use crate::scenario::{DataTable, StepKeyword};

    const CATALOG: &str = r#"
models:
  - id: m
    name: Model
    extensions:
      - id: A
        name: First
        steps:
          - match: "^create (.*) resources? with$"
            category: waitForUpload
            table: { required: [resourceType, id] }
            actions:
              - foreach:
                  do:
                    - listAppend: { list: created, item: { type: "$row.resourceType", id: "$row.id", batch: "$1" } }
          - match: "validate against (.*)"
            category: validate
            requires:
              - { service: FHIR-validator, version: ">=2.0" }
            actions:
              - verify: { handler: FhirValidator, inputs: { profile: "$1" } }
      - id: B
        name: Second
        steps:
          - match: "validate"
            category: custom
          - match: "say (hello|bye)?!"
            actions:
              - assign: { to: greeting, value: "[$1]" }
"#;

    fn model() -> DataModel {
        Catalog::from_yaml_str(CATALOG, "en")
            .unwrap()
            .model("m")
            .unwrap()
            .clone()
    }

    fn step(text: &str, table: Option<DataTable>) -> Step {
        Step {
            keyword: StepKeyword::Given,
            text: text.to_string(),
            line: 7,
            table,
        }
    }

    fn table(columns: &[&str], rows: &[&[&str]]) -> DataTable {
        DataTable::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_no_mapping() {
        let model = model();
        let options = ExpandOptions::default();
        let expansion = Expander::new(&model, &options).expand_step(&step("  fly away ", None));

        assert!(!expansion.matched());
        assert!(expansion.actions.is_empty());
        assert_eq!(expansion.scriptlet_kind(), ScriptletKind::Custom);
        assert_eq!(
            expansion.diagnostics[0].message(),
            "No mapping for step: \"fly away\""
        );
        assert_eq!(expansion.diagnostics[0].line, 7);
    }

    #[test]
    fn test_table_required() {
        let model = model();
        let options = ExpandOptions::default();
        let expansion =
            Expander::new(&model, &options).expand_step(&step("create Patient resources with", None));

        assert!(expansion.matched());
        assert!(expansion.actions.is_empty());
        assert_eq!(expansion.diagnostics.len(), 1);
        assert_eq!(expansion.diagnostics[0].kind, DiagnosticKind::TableRequired);
        assert_eq!(expansion.scriptlet_kind(), ScriptletKind::WaitForUpload);
    }

    #[test]
    fn test_missing_columns_are_listed_in_rule_order() {
        let model = model();
        let options = ExpandOptions::default();
        let t = table(&["name"], &[&["x"]]);
        let expansion =
            Expander::new(&model, &options).expand_step(&step("create Patient resources with", Some(t)));

        assert!(expansion.actions.is_empty());
        assert_eq!(
            expansion.diagnostics[0].message(),
            "Missing columns: resourceType, id"
        );
    }

    #[test]
    fn test_foreach_over_table() {
        let model = model();
        let options = ExpandOptions::default();
        let t = table(
            &["resourceType", "id"],
            &[&["Patient", "p1"], &["Observation", "o1"]],
        );
        let expansion =
            Expander::new(&model, &options).expand_step(&step("create batch resources with", Some(t)));

        assert!(expansion.diagnostics.is_empty());
        assert_eq!(expansion.label.as_deref(), Some("create (.*) resources? with"));
        let flat = crate::ir::flatten(&expansion.actions);
        assert_eq!(flat.len(), 2);
        match &flat[1] {
            IrAction::ListAppend { list, item } => {
                assert_eq!(list, "created");
                assert_eq!(item["type"], "Observation");
                assert_eq!(item["id"], "o1");
                assert_eq!(item["batch"], "batch");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_requirements_warn_but_still_expand() {
        let model = model();
        let options = ExpandOptions::default();
        let expansion = Expander::new(&model, &options)
            .expand_step(&step("validate against http://x/Patient", None));

        assert_eq!(expansion.actions.len(), 1);
        assert_eq!(expansion.diagnostics.len(), 1);
        assert_eq!(expansion.diagnostics[0].severity, Severity::Warning);

        let mut services = BTreeMap::new();
        services.insert("FHIR-validator".to_string(), "1.4.2".to_string());
        let strict = ExpandOptions {
            services,
            strict_requirements: true,
        };
        let expansion = Expander::new(&model, &strict)
            .expand_step(&step("validate against http://x/Patient", None));
        assert_eq!(expansion.actions.len(), 1);
        assert!(expansion.diagnostics[0].is_error());
        assert_eq!(
            expansion.diagnostics[0].message(),
            "Service \"FHIR-validator\" version 1.4.2 does not satisfy requirement >=2.0"
        );
    }

    #[test]
    fn test_requirements_satisfied() {
        let model = model();
        let mut services = BTreeMap::new();
        services.insert("FHIR-validator".to_string(), "2.1".to_string());
        let options = ExpandOptions {
            services,
            strict_requirements: true,
        };
        let expansion = Expander::new(&model, &options)
            .expand_step(&step("validate against http://x/Patient", None));
        assert!(expansion.diagnostics.is_empty());
    }

    #[test]
    fn test_first_match_wins_across_extensions() {
        let model = model();
        let options = ExpandOptions::default();
        let expander = Expander::new(&model, &options);

        assert_eq!(
            expander.step_mapping("please VALIDATE AGAINST it"),
            Some("validate against (.*)")
        );
        assert_eq!(expander.step_mapping("validate it"), Some("validate"));
        assert_eq!(expander.step_mapping("nothing"), None);
    }

    #[test]
    fn test_optional_group_renders_empty() {
        let model = model();
        let options = ExpandOptions::default();
        let expansion = Expander::new(&model, &options).expand_step(&step("say !", None));
        assert_eq!(
            expansion.actions,
            vec![IrAction::Assign {
                to: "greeting".to_string(),
                value: "[]".to_string()
            }]
        );
        assert_eq!(expansion.category, None);
    }

    #[test]
    fn test_sibling_steps_are_independent() {
        let model = model();
        let options = ExpandOptions::default();
        let steps = vec![
            step("unknown", None),
            step("say hello!", None),
            step("create x resource with", None),
        ];
        let expansions = Expander::new(&model, &options).expand_all(&steps);
        assert_eq!(expansions.len(), 3);
        assert!(!expansions[0].matched());
        assert_eq!(expansions[1].actions.len(), 1);
        assert!(expansions[1].diagnostics.is_empty());
        assert!(expansions[2].actions.is_empty());
    }
}
