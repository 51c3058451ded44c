//! Document serializer
//!
//! Turns the per-step results of a conversion into scriptlets and assembles the
//! GITB TDL `testcase` document:
//!
//! ```text
//! <?xml ...?>
//! <testcase id=".." xmlns="http://www.gitb.com/tdl/v1/">
//!   <metadata/> <actors/> <variables/> <scriptlets/> <steps/>
//! </testcase>
//! ```
//!
//! Every step yields exactly one scriptlet, in step order.

use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const TDL_NAMESPACE: &str = "http://www.gitb.com/tdl/v1/";
pub const DOCUMENT_VERSION: &str = "1.0";

const ACCEPTED_FORMATS: &str = "application/fhir+json,application/fhir+xml";
const POLL_TIMEOUT_MS: u32 = 30000;
const POLL_INTERVAL_MS: u32 = 1000;

lazy_static! {
    static ref URL_RE: Regex = Regex::new(r"https?://\S+").unwrap();
    static ref RESOURCE_RE: Regex = Regex::new(
        r"(?i)\b(Patient|Observation|Practitioner|Organization|Encounter|AllergyIntolerance|Immunization|Composition)\b"
    )
    .unwrap();
    static ref QUOTED_RE: Regex = Regex::new(r#""([^"]*)""#).unwrap();
}

/// Scriptlet category, selects the fragment template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptletKind {
    Validate,
    InformUser,
    Poll,
    WaitForUpload,
    Custom,
}

impl ScriptletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptletKind::Validate => "validate",
            ScriptletKind::InformUser => "informUser",
            ScriptletKind::Poll => "poll",
            ScriptletKind::WaitForUpload => "waitForUpload",
            ScriptletKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ScriptletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scriptlet {
    /// `scriptlet_<n>`, 1-based step position
    pub id: String,
    /// The step text
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScriptletKind,
    pub parameters: BTreeMap<String, String>,
}

impl Scriptlet {
    /// `position` is 1-based.
    pub fn new(position: usize, step_text: &str, kind: ScriptletKind) -> Self {
        let mut parameters = extract_parameters(step_text);
        if kind == ScriptletKind::Custom {
            parameters.insert("action".to_string(), step_text.to_string());
        }
        Scriptlet {
            id: format!("scriptlet_{}", position),
            name: step_text.to_string(),
            kind,
            parameters,
        }
    }

    fn param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.parameters
            .get(key)
            .map(String::as_str)
            .unwrap_or(default)
    }

    /// Render this scriptlet's fragment
    pub fn to_xml(&self) -> String {
        let id = escape_markup(&self.id);
        match self.kind {
            ScriptletKind::Validate => {
                let resource_type = escape_markup(self.param_or("resourceType", "Resource"));
                let url = escape_markup(self.param_or("url", ""));
                format!(
                    r#"    <scriptlet id="{id}">
      <name>Validate {resource_type}</name>
      <description>{description}</description>
      <steps>
        <validate>
          <input name="resource">$input</input>
          <input name="profile">{url}</input>
          <output name="report">$validationReport</output>
        </validate>
      </steps>
    </scriptlet>"#,
                    id = id,
                    resource_type = resource_type,
                    description = escape_markup(&self.name),
                    url = url,
                )
            }
            ScriptletKind::InformUser => format!(
                r#"    <scriptlet id="{id}">
      <name>Inform User</name>
      <description>Display information to user</description>
      <steps>
        <informUser>
          <input name="message">{message}</input>
        </informUser>
      </steps>
    </scriptlet>"#,
                id = id,
                message = escape_markup(self.param_or("message", "Operation completed")),
            ),
            ScriptletKind::Poll => format!(
                r#"    <scriptlet id="{id}">
      <name>Poll for Status</name>
      <description>Poll for response or status update</description>
      <steps>
        <poll>
          <input name="endpoint">$statusEndpoint</input>
          <input name="timeout">{timeout}</input>
          <input name="interval">{interval}</input>
          <output name="response">$pollResponse</output>
        </poll>
      </steps>
    </scriptlet>"#,
                id = id,
                timeout = POLL_TIMEOUT_MS,
                interval = POLL_INTERVAL_MS,
            ),
            ScriptletKind::WaitForUpload => {
                let resource_type = escape_markup(self.param_or("resourceType", "Resource"));
                format!(
                    r#"    <scriptlet id="{id}">
      <name>Wait for {resource_type} Upload</name>
      <description>Wait for user to upload {resource_type} resource</description>
      <steps>
        <waitForUpload>
          <input name="resourceType">{resource_type}</input>
          <input name="acceptedFormats">{formats}</input>
          <output name="resource">$uploadedResource</output>
        </waitForUpload>
      </steps>
    </scriptlet>"#,
                    id = id,
                    resource_type = resource_type,
                    formats = ACCEPTED_FORMATS,
                )
            }
            ScriptletKind::Custom => {
                let action = escape_markup(self.param_or("action", &self.name));
                format!(
                    r#"    <scriptlet id="{id}">
      <name>Custom Action</name>
      <description>{action}</description>
      <steps>
        <custom>
          <input name="action">{action}</input>
        </custom>
      </steps>
    </scriptlet>"#,
                    id = id,
                    action = action,
                )
            }
        }
    }
}

/// Pull `url`, `resourceType` and `message` out of step text.
pub fn extract_parameters(text: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    if let Some(m) = URL_RE.find(text) {
        params.insert("url".to_string(), m.as_str().to_string());
    }
    if let Some(caps) = RESOURCE_RE.captures(text) {
        params.insert("resourceType".to_string(), caps[1].to_string());
    }
    if let Some(caps) = QUOTED_RE.captures(text) {
        params.insert("message".to_string(), caps[1].to_string());
    }
    params
}

/// Escape `& < > " '` for element content and attribute values.
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Lowercase ASCII slug usable as an `id` attribute: `tc-client-001-submission`
pub fn slug(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    match trimmed.chars().next() {
        None => "testcase".to_string(),
        Some(c) if c.is_ascii_digit() => format!("tc-{}", trimmed),
        Some(_) => trimmed.to_string(),
    }
}

/// Scriptlets for a sequence of (step text, category) pairs
pub fn build_scriptlets<'a, I>(steps: I) -> Vec<Scriptlet>
where
    I: IntoIterator<Item = (&'a str, ScriptletKind)>,
{
    steps
        .into_iter()
        .enumerate()
        .map(|(ix, (text, kind))| Scriptlet::new(ix + 1, text, kind))
        .collect()
}

/// A serialized test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub xml: String,
    pub testcase_name: String,
    pub scriptlets: Vec<Scriptlet>,
}

/// Assembles the final document for one data model
#[derive(Debug, Clone)]
pub struct DocumentWriter {
    model_id: String,
    model_name: String,
    generated_at: DateTime<Utc>,
}

impl DocumentWriter {
    pub fn new(model_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        DocumentWriter {
            model_id: model_id.into(),
            model_name: model_name.into(),
            generated_at: Utc::now(),
        }
    }

    /// Fix the generation timestamp (reproducible output)
    pub fn with_timestamp(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = generated_at;
        self
    }

    pub fn write(&self, testcase_name: &str, scriptlets: Vec<Scriptlet>) -> Document {
        let name = if testcase_name.trim().is_empty() {
            "Untitled Test Case"
        } else {
            testcase_name
        };

        let fragments: Vec<String> = scriptlets.iter().map(Scriptlet::to_xml).collect();
        let calls: Vec<String> = scriptlets
            .iter()
            .enumerate()
            .map(|(ix, s)| format!(r#"      <call id="step_{}" path="{}"/>"#, ix + 1, escape_markup(&s.id)))
            .collect();

        let model_name = escape_markup(&self.model_name);
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<testcase id="{id}" xmlns="{ns}" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <metadata>
    <name>{name}</name>
    <description>Generated from Gherkin scenario for {model_name}</description>
    <version>{version}</version>
    <generated>{generated}</generated>
    <dataModel>{model_id}</dataModel>
  </metadata>

  <actors>
    <actor id="User" name="Test User" role="SUT"/>
    <actor id="System" name="Validation System" role="SIMULATED"/>
  </actors>

  <variables>
    <var name="input" type="object"/>
    <var name="validationReport" type="object"/>
    <var name="statusEndpoint" type="string"/>
    <var name="pollResponse" type="object"/>
    <var name="uploadedResource" type="object"/>
  </variables>

  <scriptlets>
{fragments}
  </scriptlets>

  <steps>
    <sequence>
{calls}
    </sequence>
  </steps>
</testcase>
"#,
            id = escape_markup(&slug(name)),
            ns = TDL_NAMESPACE,
            name = escape_markup(name),
            model_name = model_name,
            version = DOCUMENT_VERSION,
            generated = self.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            model_id = escape_markup(&self.model_id),
            fragments = fragments.join("\n\n"),
            calls = calls.join("\n"),
        );

        Document {
            xml,
            testcase_name: name.to_string(),
            scriptlets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn writer() -> DocumentWriter {
        DocumentWriter::new("fhir", "FHIR R4")
            .with_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_extract_parameters() {
        let params = extract_parameters(
            "validate the patient against http://hl7.org/fhir/StructureDefinition/Patient and say \"ok\"",
        );
        assert_eq!(
            params["url"],
            "http://hl7.org/fhir/StructureDefinition/Patient"
        );
        assert_eq!(params["resourceType"], "patient");
        assert_eq!(params["message"], "ok");

        assert!(extract_parameters("nothing here").is_empty());
        assert_eq!(
            extract_parameters("I create an AllergyIntolerance")["resourceType"],
            "AllergyIntolerance"
        );
    }

    #[test]
    fn test_escape_markup() {
        assert_eq!(
            escape_markup(r#"a < b & "c" > 'd'"#),
            "a &lt; b &amp; &quot;c&quot; &gt; &#39;d&#39;"
        );
        assert_eq!(escape_markup("plain text"), "plain text");

        let escaped = escape_markup("<&>\"'");
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
        assert!(!escaped.contains('"'));
        assert!(!escaped.contains('\''));
    }

    #[test]
    fn test_slug() {
        assert_eq!(
            slug("tc-client-001 Client submission"),
            "tc-client-001-client-submission"
        );
        assert_eq!(slug("001 first"), "tc-001-first");
        assert_eq!(slug("  !!  "), "testcase");
        assert_eq!(slug("Create a vital-signs Observation!"), "create-a-vital-signs-observation");
    }

    #[test]
    fn test_custom_scriptlet_carries_action() {
        let s = Scriptlet::new(3, "do the <thing>", ScriptletKind::Custom);
        assert_eq!(s.id, "scriptlet_3");
        assert_eq!(s.parameters["action"], "do the <thing>");
        let xml = s.to_xml();
        assert!(xml.contains(r#"<input name="action">do the &lt;thing&gt;</input>"#));
    }

    #[test]
    fn test_fragment_defaults() {
        let v = Scriptlet::new(1, "the resource should be valid", ScriptletKind::Validate);
        assert!(v.to_xml().contains("<name>Validate Resource</name>"));

        let i = Scriptlet::new(2, "tell the user", ScriptletKind::InformUser);
        assert!(i
            .to_xml()
            .contains(r#"<input name="message">Operation completed</input>"#));

        let p = Scriptlet::new(3, "poll for it", ScriptletKind::Poll);
        let xml = p.to_xml();
        assert!(xml.contains(r#"<input name="timeout">30000</input>"#));
        assert!(xml.contains(r#"<input name="interval">1000</input>"#));

        let w = Scriptlet::new(4, "the user submits a Patient resource", ScriptletKind::WaitForUpload);
        let xml = w.to_xml();
        assert!(xml.contains("<name>Wait for Patient Upload</name>"));
        assert!(xml.contains(ACCEPTED_FORMATS));
    }

    #[test]
    fn test_document_layout() {
        let scriptlets = build_scriptlets(vec![
            ("the user submits a Patient resource", ScriptletKind::WaitForUpload),
            ("inform the user \"done & dusted\"", ScriptletKind::InformUser),
        ]);
        let doc = writer().write("Validate a Patient", scriptlets);

        assert_eq!(doc.testcase_name, "Validate a Patient");
        assert_eq!(doc.scriptlets.len(), 2);
        assert!(doc.xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(doc
            .xml
            .contains(r#"<testcase id="validate-a-patient" xmlns="http://www.gitb.com/tdl/v1/""#));
        assert!(doc.xml.contains("<generated>2024-05-01T12:00:00.000Z</generated>"));
        assert!(doc.xml.contains("<dataModel>fhir</dataModel>"));
        assert!(doc
            .xml
            .contains("Generated from Gherkin scenario for FHIR R4"));
        assert!(doc.xml.contains("done &amp; dusted"));

        let order = [
            "<metadata>",
            "<actors>",
            "<variables>",
            "<scriptlets>",
            r#"<scriptlet id="scriptlet_1">"#,
            r#"<scriptlet id="scriptlet_2">"#,
            "<steps>\n    <sequence>",
            r#"<call id="step_1" path="scriptlet_1"/>"#,
            r#"<call id="step_2" path="scriptlet_2"/>"#,
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| doc.xml.find(needle).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_document_is_still_produced() {
        let doc = writer().write("", Vec::new());
        assert_eq!(doc.testcase_name, "Untitled Test Case");
        assert!(doc.xml.contains("<sequence>\n\n    </sequence>"));
    }

    #[test]
    fn test_kind_serde_names() {
        let kind: ScriptletKind = serde_json::from_str("\"waitForUpload\"").unwrap();
        assert_eq!(kind, ScriptletKind::WaitForUpload);
        assert_eq!(serde_json::to_string(&ScriptletKind::InformUser).unwrap(), "\"informUser\"");
    }
}
