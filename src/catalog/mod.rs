//! Step catalog
//!
//! A catalog is a locale-specific document listing data models. Each data model
//! owns an ordered set of extensions, and each extension an ordered list of
//! pattern→action rules. Rule order across the whole model is the evaluation
//! order: the first rule whose pattern matches a step wins.
//!
//! ```yaml
//! version: 1
//! locale: en
//! models:
//!   - id: fhir
//!     name: FHIR R4
//!     extensions:
//!       - id: GF1
//!         name: Resource Validation
//!         steps:
//!           - match: "validate against (.*)"
//!             category: validate
//!             actions:
//!               - verify: { handler: FhirValidator, inputs: { profile: "$1" } }
//! ```

pub mod loader;
pub mod template;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::document::ScriptletKind;
use crate::error::{Result, TdlError};
use crate::requirement::ServiceRequirement;

pub use loader::{BuiltinSource, CatalogCache, CatalogSource, FileSource, HttpSource, Readiness};
pub use template::{ActionTemplate, CatalogAction};

/// Serialization format of a catalog document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// `.json` files are JSON, everything else YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }

    /// Guess from content: a leading `{` means JSON
    pub fn sniff(text: &str) -> Self {
        if text.trim_start().starts_with('{') {
            Format::Json
        } else {
            Format::Yaml
        }
    }
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    locale: Option<String>,
    #[serde(default)]
    models: Vec<ModelDocument>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelDocument {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    extensions: Vec<ExtensionDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtensionDocument {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    steps: Vec<RuleDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDocument {
    #[serde(rename = "match")]
    pattern: String,
    #[serde(default)]
    category: Option<ScriptletKind>,
    #[serde(default)]
    table: Option<TableDocument>,
    #[serde(default)]
    requires: Option<OneOrMany<ServiceRequirement>>,
    #[serde(default)]
    actions: Vec<CatalogAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableDocument {
    #[serde(default)]
    required: Vec<String>,
}

/// `requires:` accepts one requirement or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

// ---------------------------------------------------------------------------
// Loaded catalog
// ---------------------------------------------------------------------------

/// One compiled pattern→action rule
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Pattern as written in the catalog
    pub pattern: String,
    matcher: Regex,
    pub category: Option<ScriptletKind>,
    pub required_columns: Vec<String>,
    pub requirements: Vec<ServiceRequirement>,
    pub actions: Vec<ActionTemplate>,
    /// Id of the extension that declares this rule
    pub extension: String,
}

impl CatalogEntry {
    /// Compile a rule. Patterns match case-insensitively, anywhere in the text.
    pub fn new(pattern: &str, actions: &[CatalogAction]) -> std::result::Result<Self, regex::Error> {
        let matcher = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(CatalogEntry {
            pattern: pattern.to_string(),
            matcher,
            category: None,
            required_columns: Vec::new(),
            requirements: Vec::new(),
            actions: actions.iter().map(ActionTemplate::compile).collect(),
            extension: String::new(),
        })
    }

    /// Human-readable label: the pattern without a leading `^` or trailing `$`
    pub fn label(&self) -> &str {
        let label = self.pattern.strip_prefix('^').unwrap_or(&self.pattern);
        label.strip_suffix('$').unwrap_or(label)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }

    /// Captured groups of the first match, 1-based order. Groups that did not
    /// participate are returned as `""`.
    pub fn captures(&self, text: &str) -> Option<Vec<String>> {
        let caps = self.matcher.captures(text)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Extension {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone)]
pub struct DataModel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub base_url: Option<String>,
    pub extensions: Vec<Extension>,
}

impl DataModel {
    /// All rules in evaluation order
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.extensions.iter().flat_map(|ext| ext.entries.iter())
    }

    pub fn entry_count(&self) -> usize {
        self.extensions.iter().map(|ext| ext.entries.len()).sum()
    }

    pub fn extension(&self, id: &str) -> Option<&Extension> {
        self.extensions.iter().find(|ext| ext.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub version: u32,
    pub locale: String,
    pub models: Vec<DataModel>,
}

impl Catalog {
    /// Parse and compile a catalog document. `locale` names the catalog in
    /// errors and is used when the document does not declare one.
    pub fn parse(text: &str, format: Format, locale: &str) -> Result<Self> {
        let document: CatalogDocument = match format {
            Format::Yaml => template::from_yaml_str(text)
                .map_err(|e| TdlError::catalog(locale, format!("invalid YAML: {}", e)))?,
            Format::Json => serde_json::from_str(text)
                .map_err(|e| TdlError::catalog(locale, format!("invalid JSON: {}", e)))?,
        };
        Self::compile(document, locale)
    }

    pub fn from_yaml_str(text: &str, locale: &str) -> Result<Self> {
        Self::parse(text, Format::Yaml, locale)
    }

    pub fn from_json_str(text: &str, locale: &str) -> Result<Self> {
        Self::parse(text, Format::Json, locale)
    }

    fn compile(document: CatalogDocument, locale: &str) -> Result<Self> {
        let mut model_ids = HashSet::new();
        let mut models = Vec::with_capacity(document.models.len());

        for model in document.models {
            if !model_ids.insert(model.id.clone()) {
                return Err(TdlError::catalog(
                    locale,
                    format!("duplicate data model id '{}'", model.id),
                ));
            }

            let mut extension_ids = HashSet::new();
            let mut extensions = Vec::with_capacity(model.extensions.len());
            for ext in model.extensions {
                if !extension_ids.insert(ext.id.clone()) {
                    return Err(TdlError::catalog(
                        locale,
                        format!("duplicate extension id '{}' in model '{}'", ext.id, model.id),
                    ));
                }

                let mut entries = Vec::with_capacity(ext.steps.len());
                for rule in ext.steps {
                    let mut entry = CatalogEntry::new(&rule.pattern, &rule.actions).map_err(|e| {
                        TdlError::catalog(
                            locale,
                            format!("invalid pattern '{}' in {}/{}: {}", rule.pattern, model.id, ext.id, e),
                        )
                    })?;
                    entry.category = rule.category;
                    entry.required_columns = rule.table.map(|t| t.required).unwrap_or_default();
                    entry.requirements = rule.requires.map(OneOrMany::into_vec).unwrap_or_default();
                    entry.extension = ext.id.clone();
                    entries.push(entry);
                }

                extensions.push(Extension {
                    id: ext.id,
                    name: ext.name,
                    description: ext.description,
                    entries,
                });
            }

            models.push(DataModel {
                id: model.id,
                name: model.name,
                description: model.description,
                base_url: model.base_url,
                extensions,
            });
        }

        Ok(Catalog {
            version: document.version,
            locale: document.locale.unwrap_or_else(|| locale.to_string()),
            models,
        })
    }

    /// Look up a model by id. Exact matches win over case-insensitive ones.
    pub fn model(&self, id: &str) -> Option<&DataModel> {
        self.models
            .iter()
            .find(|m| m.id == id)
            .or_else(|| self.models.iter().find(|m| m.id.eq_ignore_ascii_case(id)))
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"
version: 2
locale: en
models:
  - id: fhir
    name: FHIR R4
    description: Fast Healthcare Interoperability Resources
    base_url: http://hl7.org/fhir
    extensions:
      - id: GF1
        name: Resource Validation
        steps:
          - match: "^validate against (.*)$"
            category: validate
            requires: { service: FHIR-validator, version: ">=1.0" }
            actions:
              - verify: { handler: FhirValidator, inputs: { profile: "$1" } }
      - id: GF2
        name: Resource Creation
        steps:
          - match: "I create an? (.*) resource with"
            table: { required: [resourceType, id] }
            requires:
              - { service: store }
              - { service: FHIR-validator, version: "2" }
            actions:
              - foreach:
                  from: table
                  do:
                    - listAppend: { list: resources, item: { type: "$row.resourceType" } }
  - id: openehr
    name: openEHR
"#;

    #[test]
    fn test_parse_yaml() {
        let catalog = Catalog::from_yaml_str(SMALL, "en").unwrap();
        assert_eq!(catalog.version, 2);
        assert_eq!(catalog.model_ids(), vec!["fhir", "openehr"]);

        let fhir = catalog.model("fhir").unwrap();
        assert_eq!(fhir.base_url.as_deref(), Some("http://hl7.org/fhir"));
        assert_eq!(fhir.entry_count(), 2);

        let entries: Vec<_> = fhir.entries().collect();
        assert_eq!(entries[0].label(), "validate against (.*)");
        assert_eq!(entries[0].category, Some(ScriptletKind::Validate));
        assert_eq!(entries[0].requirements.len(), 1);
        assert_eq!(entries[0].extension, "GF1");
        assert_eq!(entries[1].required_columns, vec!["resourceType", "id"]);
        assert_eq!(entries[1].requirements.len(), 2);
        assert_eq!(entries[1].category, None);

        assert!(catalog.model("openehr").unwrap().extensions.is_empty());
        assert!(catalog.model("FHIR").is_some());
        assert!(catalog.model("nope").is_none());
    }

    #[test]
    fn test_single_key_map_actions() {
        let catalog = Catalog::from_yaml_str(SMALL, "en").unwrap();
        let entries: Vec<_> = catalog.model("fhir").unwrap().entries().collect();
        assert_eq!(entries[0].actions.len(), 1);
        assert!(matches!(entries[0].actions[0], ActionTemplate::Verify { .. }));
        assert!(matches!(entries[1].actions[0], ActionTemplate::Foreach { .. }));
    }

    #[test]
    fn test_parse_json() {
        let text = r#"{"version":1,"models":[{"id":"m","name":"M","extensions":[
            {"id":"E1","name":"E","steps":[{"match":"say (.*)","category":"informUser",
            "actions":[{"assign":{"to":"msg","value":"$1"}}]}]}]}]}"#;
        assert_eq!(Format::sniff(text), Format::Json);

        let catalog = Catalog::parse(text, Format::sniff(text), "fr").unwrap();
        assert_eq!(catalog.locale, "fr");
        let entry = catalog.model("m").unwrap().entries().next().unwrap();
        assert_eq!(entry.category, Some(ScriptletKind::InformUser));
        assert_eq!(entry.actions.len(), 1);
    }

    #[test]
    fn test_captures_are_case_insensitive_and_unanchored() {
        let catalog = Catalog::from_yaml_str(SMALL, "en").unwrap();
        let entry = catalog.model("fhir").unwrap().entries().nth(1).unwrap();

        assert!(entry.is_match("and then I CREATE A Patient resource with"));
        let groups = entry.captures("I create an Observation resource with").unwrap();
        assert_eq!(groups, vec!["Observation"]);
    }

    #[test]
    fn test_non_participating_group_is_empty() {
        let entry = CatalogEntry::new("send (a)?(b)", &[]).unwrap();
        assert_eq!(entry.captures("send b").unwrap(), vec!["", "b"]);
    }

    #[test]
    fn test_invalid_regex_is_a_load_error() {
        let text = "models:\n  - id: m\n    name: M\n    extensions:\n      - id: E\n        name: E\n        steps:\n          - match: \"broken (\"\n";
        let err = Catalog::from_yaml_str(text, "en").unwrap_err();
        assert!(err.is_catalog_failure());
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_duplicate_ids_are_load_errors() {
        let models = "models:\n  - { id: m, name: A }\n  - { id: m, name: B }\n";
        let err = Catalog::from_yaml_str(models, "en").unwrap_err();
        assert!(err.to_string().contains("duplicate data model id 'm'"));

        let exts = "models:\n  - id: m\n    name: M\n    extensions:\n      - { id: E, name: A }\n      - { id: E, name: B }\n";
        let err = Catalog::from_yaml_str(exts, "en").unwrap_err();
        assert!(err.to_string().contains("duplicate extension id 'E'"));
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let text = "models:\n  - id: m\n    name: M\n    extensions:\n      - id: E\n        name: E\n        steps:\n          - { match: x, category: teleport }\n";
        assert!(Catalog::from_yaml_str(text, "en").is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("lang/en.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("lang/en.yml")), Format::Yaml);
        assert_eq!(Format::from_path(Path::new("lang/en")), Format::Yaml);
    }
}
