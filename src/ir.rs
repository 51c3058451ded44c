//! Intermediate representation
//!
//! The IR is the phrasing-independent action sequence a step expands into.
//! It serializes to JSON with a `type` tag:
//!
//! ```json
//! {"type": "verify", "handler": "FhirValidator", "inputs": {"profile": "..."}}
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IrAction {
    Call {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        inputs: BTreeMap<String, String>,
    },
    Verify {
        handler: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        desc: Option<String>,
        inputs: BTreeMap<String, String>,
    },
    Process {
        handler: String,
        operation: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        inputs: BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        hidden: Option<bool>,
    },
    Assign {
        to: String,
        value: String,
    },
    ListAppend {
        list: String,
        item: BTreeMap<String, String>,
    },
    /// Body holds one replay of the template body per table row, concatenated
    Foreach {
        from: String,
        #[serde(rename = "do")]
        body: Vec<IrAction>,
    },
}

impl IrAction {
    /// Tag name as it appears in JSON
    pub fn kind(&self) -> &'static str {
        match self {
            IrAction::Call { .. } => "call",
            IrAction::Verify { .. } => "verify",
            IrAction::Process { .. } => "process",
            IrAction::Assign { .. } => "assign",
            IrAction::ListAppend { .. } => "listAppend",
            IrAction::Foreach { .. } => "foreach",
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, IrAction::Foreach { .. })
    }
}

/// Inline every `foreach` body, keeping order.
pub fn flatten(actions: &[IrAction]) -> Vec<IrAction> {
    let mut out = Vec::new();
    for action in actions {
        match action {
            IrAction::Foreach { body, .. } => out.extend(flatten(body)),
            leaf => out.push(leaf.clone()),
        }
    }
    out
}
