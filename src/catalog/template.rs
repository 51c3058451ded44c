//! Action templates
//!
//! Catalog actions are compiled once, at load time, into [`ActionTemplate`]s whose
//! string fields are lists of [`Segment`]s. Rendering binds the captured groups of
//! the matching pattern (`$1`, `$2`, ...) and, inside a `foreach`, the current table
//! row (`$row.column`). Rendering produces fresh [`IrAction`]s and never touches the
//! compiled template.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::ir::IrAction;
use crate::scenario::{DataTable, TableRow};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\$(?:([0-9]+)|row\.([A-Za-z0-9_]+))").unwrap();
}

// ---------------------------------------------------------------------------
// Catalog document shape
// ---------------------------------------------------------------------------

/// One action as written in a catalog document, e.g.
/// `- verify: { handler: FhirValidator, inputs: { profile: "$1" } }`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CatalogAction {
    Call(CallSpec),
    Verify(VerifySpec),
    Process(ProcessSpec),
    Assign(AssignSpec),
    ListAppend(ListAppendSpec),
    Foreach(ForeachSpec),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallSpec {
    pub path: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifySpec {
    pub handler: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    pub handler: String,
    pub operation: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignSpec {
    pub to: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListAppendSpec {
    pub list: String,
    #[serde(default)]
    pub item: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeachSpec {
    #[serde(default = "default_foreach_source")]
    pub from: String,
    #[serde(rename = "do", default)]
    pub body: Vec<CatalogAction>,
}

fn default_foreach_source() -> String {
    "table".to_string()
}

/// Deserialize YAML where enum variants are written as single-key maps
/// (`- verify: {...}`) rather than `!verify` tags.
pub(crate) fn from_yaml_str<T: DeserializeOwned>(text: &str) -> serde_yaml::Result<T> {
    serde_yaml::with::singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(text))
}

// ---------------------------------------------------------------------------
// Compiled templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// 1-based capture group
    Group(usize),
    /// Column of the current table row
    Row(String),
}

/// A string with `$N` / `$row.col` placeholders split out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateString {
    segments: Vec<Segment>,
}

impl TemplateString {
    pub fn compile(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(source) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            if let Some(index) = caps.get(1) {
                // Out-of-range indices simply never bind.
                let index = index.as_str().parse().unwrap_or(usize::MAX);
                segments.push(Segment::Group(index));
            } else if let Some(column) = caps.get(2) {
                segments.push(Segment::Row(column.as_str().to_string()));
            }
            last = whole.end();
        }

        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }

        TemplateString { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_placeholders(&self) -> bool {
        self.segments
            .iter()
            .any(|s| !matches!(s, Segment::Literal(_)))
    }

    /// Substitution is single-pass: bound values are never re-scanned.
    pub fn render(&self, bindings: &Bindings<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Group(index) => out.push_str(bindings.group(*index)),
                Segment::Row(column) => out.push_str(bindings.column(column)),
            }
        }
        out
    }
}

/// Values available while rendering a template
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    groups: &'a [String],
    row: Option<TableRow<'a>>,
}

impl<'a> Bindings<'a> {
    pub fn new(groups: &'a [String]) -> Self {
        Bindings { groups, row: None }
    }

    fn with_row(self, row: TableRow<'a>) -> Self {
        Bindings {
            groups: self.groups,
            row: Some(row),
        }
    }

    fn group(&self, index: usize) -> &'a str {
        match index.checked_sub(1) {
            Some(ix) => self.groups.get(ix).map(String::as_str).unwrap_or(""),
            None => "",
        }
    }

    fn column(&self, name: &str) -> &'a str {
        self.row.and_then(|row| row.get(name)).unwrap_or("")
    }
}

type TemplateMap = BTreeMap<String, TemplateString>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTemplate {
    Call {
        path: TemplateString,
        output: Option<TemplateString>,
        inputs: TemplateMap,
    },
    Verify {
        handler: TemplateString,
        desc: Option<TemplateString>,
        inputs: TemplateMap,
    },
    Process {
        handler: TemplateString,
        operation: TemplateString,
        output: Option<TemplateString>,
        inputs: TemplateMap,
        hidden: Option<bool>,
    },
    Assign {
        to: TemplateString,
        value: TemplateString,
    },
    ListAppend {
        list: TemplateString,
        item: TemplateMap,
    },
    Foreach {
        from: String,
        body: Vec<ActionTemplate>,
    },
}

fn compile_map(map: &BTreeMap<String, String>) -> TemplateMap {
    map.iter()
        .map(|(k, v)| (k.clone(), TemplateString::compile(v)))
        .collect()
}

fn render_map(map: &TemplateMap, bindings: &Bindings<'_>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), v.render(bindings)))
        .collect()
}

fn compile_opt(value: &Option<String>) -> Option<TemplateString> {
    value.as_deref().map(TemplateString::compile)
}

fn render_opt(value: &Option<TemplateString>, bindings: &Bindings<'_>) -> Option<String> {
    value.as_ref().map(|t| t.render(bindings))
}

impl ActionTemplate {
    pub fn compile(action: &CatalogAction) -> Self {
        match action {
            CatalogAction::Call(spec) => ActionTemplate::Call {
                path: TemplateString::compile(&spec.path),
                output: compile_opt(&spec.output),
                inputs: compile_map(&spec.inputs),
            },
            CatalogAction::Verify(spec) => ActionTemplate::Verify {
                handler: TemplateString::compile(&spec.handler),
                desc: compile_opt(&spec.desc),
                inputs: compile_map(&spec.inputs),
            },
            CatalogAction::Process(spec) => ActionTemplate::Process {
                handler: TemplateString::compile(&spec.handler),
                operation: TemplateString::compile(&spec.operation),
                output: compile_opt(&spec.output),
                inputs: compile_map(&spec.inputs),
                hidden: spec.hidden,
            },
            CatalogAction::Assign(spec) => ActionTemplate::Assign {
                to: TemplateString::compile(&spec.to),
                value: TemplateString::compile(&spec.value),
            },
            CatalogAction::ListAppend(spec) => ActionTemplate::ListAppend {
                list: TemplateString::compile(&spec.list),
                item: compile_map(&spec.item),
            },
            CatalogAction::Foreach(spec) => ActionTemplate::Foreach {
                from: spec.from.clone(),
                body: spec.body.iter().map(ActionTemplate::compile).collect(),
            },
        }
    }

    fn render(&self, bindings: Bindings<'_>, table: Option<&DataTable>) -> IrAction {
        let b = &bindings;
        match self {
            ActionTemplate::Call {
                path,
                output,
                inputs,
            } => IrAction::Call {
                path: path.render(b),
                output: render_opt(output, b),
                inputs: render_map(inputs, b),
            },
            ActionTemplate::Verify {
                handler,
                desc,
                inputs,
            } => IrAction::Verify {
                handler: handler.render(b),
                desc: render_opt(desc, b),
                inputs: render_map(inputs, b),
            },
            ActionTemplate::Process {
                handler,
                operation,
                output,
                inputs,
                hidden,
            } => IrAction::Process {
                handler: handler.render(b),
                operation: operation.render(b),
                output: render_opt(output, b),
                inputs: render_map(inputs, b),
                hidden: *hidden,
            },
            ActionTemplate::Assign { to, value } => IrAction::Assign {
                to: to.render(b),
                value: value.render(b),
            },
            ActionTemplate::ListAppend { list, item } => IrAction::ListAppend {
                list: list.render(b),
                item: render_map(item, b),
            },
            ActionTemplate::Foreach { from, body } => {
                let mut replay = Vec::new();
                if let Some(table) = table {
                    for row in table.rows() {
                        let row_bindings = bindings.with_row(row);
                        replay.extend(body.iter().map(|t| t.render(row_bindings, Some(table))));
                    }
                }
                IrAction::Foreach {
                    from: from.clone(),
                    body: replay,
                }
            }
        }
    }
}

/// Expand templates into IR, given the captured groups and the step's table.
pub fn materialize(
    templates: &[ActionTemplate],
    groups: &[String],
    table: Option<&DataTable>,
) -> Vec<IrAction> {
    let bindings = Bindings::new(groups);
    templates
        .iter()
        .map(|t| t.render(bindings, table))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> DataTable {
        DataTable::new(
            vec!["resourceType".to_string(), "id".to_string()],
            vec![
                vec!["Patient".to_string(), "p1".to_string()],
                vec!["Observation".to_string()],
            ],
        )
    }

    fn compile_yaml(text: &str) -> Vec<ActionTemplate> {
        let actions: Vec<CatalogAction> = from_yaml_str(text).unwrap();
        actions.iter().map(ActionTemplate::compile).collect()
    }

    #[test]
    fn test_compile_segments() {
        let t = TemplateString::compile("a $1 b $row.name $ c $x");
        assert_eq!(
            t.segments(),
            &[
                Segment::Literal("a ".to_string()),
                Segment::Group(1),
                Segment::Literal(" b ".to_string()),
                Segment::Row("name".to_string()),
                Segment::Literal(" $ c $x".to_string()),
            ]
        );
        assert!(t.has_placeholders());
        assert!(!TemplateString::compile("plain").has_placeholders());
    }

    #[test]
    fn test_render_groups() {
        let g = groups(&["Patient", "extra"]);
        let b = Bindings::new(&g);
        assert_eq!(TemplateString::compile("$1/$2").render(&b), "Patient/extra");
        assert_eq!(TemplateString::compile("[$3][$0]").render(&b), "[][]");
        assert_eq!(TemplateString::compile("$row.id").render(&b), "");
    }

    #[test]
    fn test_no_rescan_of_bound_values() {
        let g = groups(&["$2", "boom"]);
        let b = Bindings::new(&g);
        assert_eq!(TemplateString::compile("$1").render(&b), "$2");
    }

    #[test]
    fn test_deserialize_and_materialize_leaves() {
        let templates = compile_yaml(
            r#"
- call: { path: upload, output: uploaded, inputs: { resourceType: "$1" } }
- verify: { handler: FhirValidator, desc: "Validate $1", inputs: { profile: "$2" } }
- process: { handler: Store, operation: put, hidden: true }
- assign: { to: status, value: "$1 received" }
"#,
        );
        let g = groups(&["Patient", "http://x"]);
        let ir = materialize(&templates, &g, None);

        assert_eq!(ir.len(), 4);
        match &ir[0] {
            IrAction::Call {
                path,
                output,
                inputs,
            } => {
                assert_eq!(path, "upload");
                assert_eq!(output.as_deref(), Some("uploaded"));
                assert_eq!(inputs["resourceType"], "Patient");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &ir[1] {
            IrAction::Verify { desc, inputs, .. } => {
                assert_eq!(desc.as_deref(), Some("Validate Patient"));
                assert_eq!(inputs["profile"], "http://x");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &ir[2] {
            IrAction::Process { hidden, inputs, .. } => {
                assert_eq!(*hidden, Some(true));
                assert!(inputs.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            ir[3],
            IrAction::Assign {
                to: "status".to_string(),
                value: "Patient received".to_string()
            }
        );
    }

    #[test]
    fn test_foreach_replays_per_row() {
        let templates = compile_yaml(
            r#"
- foreach:
    from: table
    do:
      - listAppend: { list: resources, item: { type: "$row.resourceType", id: "$row.id", step: "$1" } }
- assign: { to: last, value: "$row.id" }
"#,
        );
        let g = groups(&["bundle"]);
        let t = table();
        let ir = materialize(&templates, &g, Some(&t));

        assert_eq!(ir.len(), 2);
        match &ir[0] {
            IrAction::Foreach { from, body } => {
                assert_eq!(from, "table");
                assert_eq!(body.len(), 2);
                match &body[1] {
                    IrAction::ListAppend { item, .. } => {
                        assert_eq!(item["type"], "Observation");
                        assert_eq!(item["id"], "");
                        assert_eq!(item["step"], "bundle");
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
        // Row context does not leak out of the foreach
        assert_eq!(
            ir[1],
            IrAction::Assign {
                to: "last".to_string(),
                value: String::new()
            }
        );
    }

    #[test]
    fn test_foreach_without_table_is_empty() {
        let templates = compile_yaml("- foreach: { do: [ { assign: { to: a, value: b } } ] }");
        let ir = materialize(&templates, &[], None);
        assert_eq!(
            ir,
            vec![IrAction::Foreach {
                from: "table".to_string(),
                body: vec![]
            }]
        );
    }

    #[test]
    fn test_unknown_action_field_is_rejected() {
        let result: serde_yaml::Result<Vec<CatalogAction>> =
            from_yaml_str("- assign: { to: a, value: b, extra: c }");
        assert!(result.is_err());

        let ok: serde_yaml::Result<Vec<CatalogAction>> =
            from_yaml_str("- assign: { to: a, value: b }");
        assert!(ok.is_ok());
    }
}
