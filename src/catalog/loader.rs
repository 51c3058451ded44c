//! Catalog sources and the per-locale cache.
//!
//! A [`CatalogCache`] fetches each locale at most once per successful load and
//! hands out the same `Arc<Catalog>` afterwards. While a locale is loading,
//! [`CatalogCache::load`] blocks until the in-flight load finishes and
//! [`CatalogCache::poll`] reports [`Readiness::Pending`].

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Catalog, Format};
use crate::error::{Result, TdlError};

const BUILTIN_EN: &str = include_str!("../../lang/en.yml");

lazy_static! {
    static ref LOCALE_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

fn check_locale(locale: &str) -> Result<()> {
    if LOCALE_RE.is_match(locale) {
        Ok(())
    } else {
        Err(TdlError::catalog(locale, "invalid locale name"))
    }
}

/// Where catalog documents come from
pub trait CatalogSource: Send + Sync {
    /// Short description for logs and error messages
    fn describe(&self) -> String;

    /// Fetch the raw catalog text for a locale
    fn fetch(&self, locale: &str) -> Result<(String, Format)>;
}

/// Catalogs compiled into the binary
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinSource;

impl CatalogSource for BuiltinSource {
    fn describe(&self) -> String {
        "built-in".to_string()
    }

    fn fetch(&self, locale: &str) -> Result<(String, Format)> {
        match locale {
            "en" => Ok((BUILTIN_EN.to_string(), Format::Yaml)),
            _ => Err(TdlError::catalog(locale, "no built-in catalog for this locale")),
        }
    }
}

/// `<dir>/<locale>.yml`, `.yaml` or `.json`
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSource { dir: dir.into() }
    }
}

impl CatalogSource for FileSource {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn fetch(&self, locale: &str) -> Result<(String, Format)> {
        check_locale(locale)?;
        for ext in ["yml", "yaml", "json"] {
            let path = self.dir.join(format!("{}.{}", locale, ext));
            if !path.is_file() {
                continue;
            }
            debug!(path = %path.display(), "reading catalog file");
            let text = fs::read_to_string(&path).map_err(|e| {
                TdlError::catalog(locale, format!("cannot read {}: {}", path.display(), e))
            })?;
            return Ok((text, Format::from_path(&path)));
        }
        Err(TdlError::catalog(
            locale,
            format!("no catalog file in {}", self.dir.display()),
        ))
    }
}

/// `<base_url>/<locale>.yml` over HTTP
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpSource {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url_for(&self, locale: &str) -> String {
        format!("{}/{}.yml", self.base_url.trim_end_matches('/'), locale)
    }
}

impl CatalogSource for HttpSource {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn fetch(&self, locale: &str) -> Result<(String, Format)> {
        check_locale(locale)?;
        let url = self.url_for(locale);
        debug!(%url, "fetching catalog");

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TdlError::catalog(locale, e.to_string()))?;
        let response = client
            .get(&url)
            .send()
            .map_err(|e| TdlError::catalog(locale, format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TdlError::catalog(
                locale,
                format!("GET {} returned {}", url, status),
            ));
        }

        let text = response
            .text()
            .map_err(|e| TdlError::catalog(locale, e.to_string()))?;
        let format = Format::sniff(&text);
        Ok((text, format))
    }
}

/// Result of a non-blocking cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    Ready(T),
    /// Not loaded yet; try again later
    Pending,
}

impl<T> Readiness<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }
}

enum Slot {
    Loading,
    Ready(Arc<Catalog>),
    Failed(String),
}

/// Per-locale catalog cache over a [`CatalogSource`]
pub struct CatalogCache {
    source: Box<dyn CatalogSource>,
    slots: Mutex<HashMap<String, Slot>>,
    settled: Condvar,
    fetches: AtomicUsize,
}

impl CatalogCache {
    pub fn new(source: impl CatalogSource + 'static) -> Self {
        CatalogCache {
            source: Box::new(source),
            slots: Mutex::new(HashMap::new()),
            settled: Condvar::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BuiltinSource)
    }

    pub fn source(&self) -> &dyn CatalogSource {
        self.source.as_ref()
    }

    /// Number of times the source was asked for a document
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a locale, or return the cached catalog.
    ///
    /// Blocks while another thread loads the same locale. A previous failure is
    /// retried.
    pub fn load(&self, locale: &str) -> Result<Arc<Catalog>> {
        let mut slots = self.lock();
        loop {
            let in_flight = match slots.get(locale) {
                Some(Slot::Ready(catalog)) => return Ok(Arc::clone(catalog)),
                Some(Slot::Loading) => true,
                Some(Slot::Failed(_)) | None => false,
            };
            if !in_flight {
                break;
            }
            slots = self
                .settled
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slots.insert(locale.to_string(), Slot::Loading);
        drop(slots);

        let result = self.fetch_and_compile(locale);

        let mut slots = self.lock();
        match &result {
            Ok(catalog) => {
                slots.insert(locale.to_string(), Slot::Ready(Arc::clone(catalog)));
            }
            Err(e) => {
                warn!(locale, error = %e, "catalog load failed");
                slots.insert(locale.to_string(), Slot::Failed(e.to_string()));
            }
        }
        drop(slots);
        self.settled.notify_all();

        result
    }

    /// Non-blocking lookup. `Pending` while the locale is loading or has not
    /// been requested yet; the last failure is reported as an error.
    pub fn poll(&self, locale: &str) -> Result<Readiness<Arc<Catalog>>> {
        match self.lock().get(locale) {
            Some(Slot::Ready(catalog)) => Ok(Readiness::Ready(Arc::clone(catalog))),
            Some(Slot::Failed(message)) => Err(TdlError::catalog(locale, message.clone())),
            Some(Slot::Loading) | None => Ok(Readiness::Pending),
        }
    }

    fn fetch_and_compile(&self, locale: &str) -> Result<Arc<Catalog>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        info!(locale, source = %self.source.describe(), "loading catalog");

        let (text, format) = self.source.fetch(locale)?;
        let catalog = Catalog::parse(&text, format, locale)?;

        info!(
            locale,
            models = catalog.models.len(),
            "catalog loaded"
        );
        Ok(Arc::new(catalog))
    }
}

impl std::fmt::Debug for CatalogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogCache")
            .field("source", &self.source.describe())
            .field("fetches", &self.fetch_count())
            .finish()
    }
}
