//! Conversion pipeline: text → scenario → IR → document → structural checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::catalog::{Catalog, DataModel};
use crate::diagnostic::{count_errors, Diagnostic};
use crate::document::{build_scriptlets, Document, DocumentWriter, Scriptlet};
use crate::error::{Result, TdlError};
use crate::expand::{ExpandOptions, Expander, StepExpansion};
use crate::ir::IrAction;
use crate::scenario::{self, Scenario, StepKeyword};
use crate::validate::validate_structure;

/// One step and what it expanded into
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub line: usize,
    pub keyword: StepKeyword,
    pub text: String,
    #[serde(flatten)]
    pub expansion: StepExpansion,
}

/// Parse + expand, without a document
#[derive(Debug, Clone)]
pub struct Expansion {
    pub scenario: Scenario,
    pub outcomes: Vec<StepOutcome>,
    /// Parse diagnostics, then expansion diagnostics in step order
    pub diagnostics: Vec<Diagnostic>,
}

impl Expansion {
    pub fn has_errors(&self) -> bool {
        count_errors(&self.diagnostics) > 0
    }
}

#[derive(Debug, Clone)]
pub struct Conversion {
    pub scenario: Scenario,
    pub outcomes: Vec<StepOutcome>,
    pub document: Document,
    /// Parse, expansion, then document diagnostics
    pub diagnostics: Vec<Diagnostic>,
}

impl Conversion {
    pub fn scriptlets(&self) -> &[Scriptlet] {
        &self.document.scriptlets
    }

    pub fn has_errors(&self) -> bool {
        count_errors(&self.diagnostics) > 0
    }

    pub fn error_count(&self) -> usize {
        count_errors(&self.diagnostics)
    }

    /// All IR actions, concatenated in step order
    pub fn ir(&self) -> Vec<IrAction> {
        self.outcomes
            .iter()
            .flat_map(|o| o.expansion.actions.iter().cloned())
            .collect()
    }
}

/// Converts scenarios for one data model of a loaded catalog
#[derive(Debug, Clone)]
pub struct Converter {
    catalog: Arc<Catalog>,
    model_index: usize,
    options: ExpandOptions,
    generated_at: Option<DateTime<Utc>>,
}

impl Converter {
    pub fn new(catalog: Arc<Catalog>, model_id: &str, options: ExpandOptions) -> Result<Self> {
        let models = &catalog.models;
        let model_index = models
            .iter()
            .position(|m| m.id == model_id)
            .or_else(|| models.iter().position(|m| m.id.eq_ignore_ascii_case(model_id)))
            .ok_or_else(|| TdlError::UnknownModel(model_id.to_string()))?;
        Ok(Converter {
            catalog,
            model_index,
            options,
            generated_at: None,
        })
    }

    /// Pin the document timestamp
    pub fn with_timestamp(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = Some(generated_at);
        self
    }

    pub fn model(&self) -> &DataModel {
        &self.catalog.models[self.model_index]
    }

    pub fn options(&self) -> &ExpandOptions {
        &self.options
    }

    fn expander(&self) -> Expander<'_> {
        Expander::new(self.model(), &self.options)
    }

    /// Label of the rule that handles `text`
    pub fn step_mapping(&self, text: &str) -> Option<&str> {
        self.expander().step_mapping(text)
    }

    pub fn expand(&self, text: &str) -> Expansion {
        let parsed = scenario::parse(text);
        let mut diagnostics = parsed.diagnostics;
        let expander = self.expander();

        let outcomes: Vec<StepOutcome> = parsed
            .scenario
            .steps
            .iter()
            .map(|step| {
                let expansion = expander.expand_step(step);
                diagnostics.extend(expansion.diagnostics.iter().cloned());
                StepOutcome {
                    line: step.line,
                    keyword: step.keyword,
                    text: step.text.clone(),
                    expansion,
                }
            })
            .collect();

        Expansion {
            scenario: parsed.scenario,
            outcomes,
            diagnostics,
        }
    }

    pub fn convert(&self, text: &str) -> Conversion {
        let Expansion {
            scenario,
            outcomes,
            mut diagnostics,
        } = self.expand(text);

        let model = self.model();
        let mut writer = DocumentWriter::new(model.id.as_str(), model.name.as_str());
        if let Some(ts) = self.generated_at {
            writer = writer.with_timestamp(ts);
        }

        let scriptlets = build_scriptlets(
            outcomes
                .iter()
                .map(|o| (o.text.as_str(), o.expansion.scriptlet_kind())),
        );
        let document = writer.write(&scenario.name, scriptlets);

        diagnostics.extend(validate_structure(&document.xml).issues);

        info!(
            model = %model.id,
            steps = outcomes.len(),
            errors = count_errors(&diagnostics),
            diagnostics = diagnostics.len(),
            "conversion finished"
        );

        Conversion {
            scenario,
            outcomes,
            document,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogCache;
    use crate::diagnostic::DiagnosticKind;
    use crate::document::ScriptletKind;

    fn converter(model: &str) -> Converter {
        let catalog = CatalogCache::builtin().load("en").unwrap();
        Converter::new(catalog, model, ExpandOptions::default()).unwrap()
    }

    #[test]
    fn test_unknown_model() {
        let catalog = CatalogCache::builtin().load("en").unwrap();
        let err = Converter::new(catalog, "kmehr", ExpandOptions::default()).unwrap_err();
        assert!(matches!(err, TdlError::UnknownModel(ref id) if id == "kmehr"));
    }

    #[test]
    fn test_model_lookup_ignores_case() {
        assert_eq!(converter("eira").model().id, "EIRA");
    }

    #[test]
    fn test_unmapped_steps_become_custom_scriptlets() {
        let conversion = converter("fhir").convert("Scenario: s\n  Given something odd\n");
        assert_eq!(conversion.scriptlets().len(), 1);
        assert_eq!(conversion.scriptlets()[0].kind, ScriptletKind::Custom);
        assert_eq!(
            conversion.scriptlets()[0].parameters["action"],
            "something odd"
        );
        assert!(conversion.has_errors());
        assert_eq!(conversion.error_count(), 1);
    }

    #[test]
    fn test_missing_scenario_still_produces_document() {
        let conversion = converter("fhir").convert("Given the user submits a Patient resource\n");
        assert!(conversion.scenario.steps.is_empty());
        assert!(conversion.scriptlets().is_empty());
        assert!(conversion.document.xml.contains("<testcase"));
        assert_eq!(conversion.diagnostics.len(), 1);
        assert_eq!(conversion.diagnostics[0].kind, DiagnosticKind::MissingScenario);
    }

    #[test]
    fn test_diagnostic_order_follows_phases() {
        let text = "Scenario: s\n  Given nothing maps here\n  junk line\n  Then validate against http://x\n";
        let conversion = converter("fhir").convert(text);
        let lines: Vec<usize> = conversion.diagnostics.iter().map(|d| d.line).collect();
        // parse warning (line 3), then expansion in step order (2, 4)
        assert_eq!(lines, vec![3, 2, 4]);
    }

    #[test]
    fn test_step_mapping() {
        let c = converter("fhir");
        assert_eq!(
            c.step_mapping("inform the user \"hi\""),
            Some("inform the user (.*)")
        );
        assert_eq!(c.step_mapping("fly"), None);
    }

    #[test]
    fn test_ir_concatenates_steps() {
        let text = "Scenario: s\n  Given the user submits a Patient resource\n  And inform the user \"done\"\n";
        let conversion = converter("fhir").convert(text);
        let ir = conversion.ir();
        assert_eq!(ir.len(), 2);
        assert_eq!(ir[0].kind(), "call");
        assert_eq!(ir[1].kind(), "assign");
    }
}
