//! gherkin-tdl
//!
//! Converts Gherkin-style test scenarios into GITB TDL `testcase` documents.
//! Step text is interpreted through a per-data-model catalog of pattern→action
//! rules; the matched actions form an intermediate representation that is then
//! serialized into scriptlets and an invocation sequence.
//!
//! ```no_run
//! use gherkin_tdl::{CatalogCache, Converter, ExpandOptions};
//!
//! let catalog = CatalogCache::builtin().load("en")?;
//! let converter = Converter::new(catalog, "fhir", ExpandOptions::default())?;
//! let conversion = converter.convert("Scenario: s\n  Given the user submits a Patient resource\n");
//! println!("{}", conversion.document.xml);
//! # Ok::<(), gherkin_tdl::TdlError>(())
//! ```

pub mod catalog;
pub mod config;
pub mod diagnostic;
pub mod document;
pub mod error;
pub mod expand;
pub mod ir;
pub mod pipeline;
pub mod requirement;
pub mod samples;
pub mod scenario;
pub mod validate;

pub use catalog::{Catalog, CatalogCache, DataModel, Readiness};
pub use diagnostic::{Diagnostic, DiagnosticKind, IssueClass, Severity};
pub use document::{Document, Scriptlet, ScriptletKind};
pub use error::{Result, TdlError};
pub use expand::ExpandOptions;
pub use ir::IrAction;
pub use pipeline::{Conversion, Converter, StepOutcome};
