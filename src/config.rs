//! Project configuration (`gherkin-tdl.toml`).
//!
//! ```toml
//! locale = "en"
//! model = "fhir"
//! strict_requirements = false
//!
//! [catalog]
//! dir = "lang"
//!
//! [services]
//! "FHIR-validator" = "1.2.0"
//!
//! [validation]
//! endpoint = "http://localhost:8080/api/validate-gitb"
//! ```
//!
//! Every key is optional. Unknown keys are rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::{CatalogCache, FileSource, HttpSource};
use crate::error::{Result, TdlError};
use crate::expand::ExpandOptions;

pub const CONFIG_FILE: &str = "gherkin-tdl.toml";
pub const CONFIG_ENV: &str = "GHERKIN_TDL_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub locale: String,
    pub model: String,
    pub strict_requirements: bool,
    pub catalog: CatalogSettings,
    pub services: BTreeMap<String, String>,
    pub validation: ValidationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            locale: "en".to_string(),
            model: "fhir".to_string(),
            strict_requirements: false,
            catalog: CatalogSettings::default(),
            services: BTreeMap::new(),
            validation: ValidationSettings::default(),
        }
    }
}

/// Where to load catalogs from; the built-in catalog when both are unset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogSettings {
    pub dir: Option<PathBuf>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSettings {
    /// Schema validation endpoint
    pub endpoint: Option<String>,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| TdlError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            TdlError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            TdlError::Config(message) => {
                TdlError::Config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// Load the discovered file, or defaults when there is none.
    pub fn load_or_default(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        match discover(explicit, cwd)? {
            Some(path) => Self::load(&path),
            None => Ok(Settings::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.locale.trim().is_empty() {
            return Err(TdlError::Config("locale must be non-empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(TdlError::Config("model must be non-empty".to_string()));
        }
        if self.catalog.dir.is_some() && self.catalog.url.is_some() {
            return Err(TdlError::Config(
                "catalog.dir and catalog.url are mutually exclusive".to_string(),
            ));
        }
        for (service, version) in &self.services {
            if service.trim().is_empty() || version.trim().is_empty() {
                return Err(TdlError::Config(format!(
                    "invalid service entry {:?} = {:?}",
                    service, version
                )));
            }
        }
        Ok(())
    }

    /// A catalog cache over the configured source
    pub fn catalog_cache(&self) -> CatalogCache {
        if let Some(dir) = &self.catalog.dir {
            CatalogCache::new(FileSource::new(dir))
        } else if let Some(url) = &self.catalog.url {
            CatalogCache::new(HttpSource::new(url.as_str()))
        } else {
            CatalogCache::builtin()
        }
    }

    pub fn expand_options(&self) -> ExpandOptions {
        ExpandOptions {
            services: self.services.clone(),
            strict_requirements: self.strict_requirements,
        }
    }
}

/// Config file location: the explicit path (must exist), else
/// `<cwd>/gherkin-tdl.toml` when present.
pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(TdlError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }
    let local = cwd.join(CONFIG_FILE);
    Ok(if local.is_file() { Some(local) } else { None })
}

/// Parse a `NAME=VERSION` service flag.
pub fn parse_service(spec: &str) -> Result<(String, String)> {
    match spec.split_once('=') {
        Some((name, version)) if !name.trim().is_empty() && !version.trim().is_empty() => {
            Ok((name.trim().to_string(), version.trim().to_string()))
        }
        _ => Err(TdlError::Config(format!(
            "expected NAME=VERSION, got '{}'",
            spec
        ))),
    }
}
