//! Template collaborators consumed by the composition engine.
//!
//! A [`TemplateRepository`] resolves a template name (and optional locale) to a
//! loaded [`Template`]; a [`TemplateRenderer`] turns the template source plus a
//! payload into the message body.

pub mod metadata;
pub mod render;
pub mod repository;

pub use metadata::TemplateMetadata;
pub use render::{renderer_for, TeraRenderer, VerbatimRenderer};
pub use repository::{FileTemplateRepository, MemoryTemplateRepository};

use crate::email::EmailResult;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded email template
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    locale: Option<String>,
    path: Option<PathBuf>,
    source: String,
    metadata: TemplateMetadata,
}

/// Shared handle to a loaded template
pub type TemplateRef = Arc<Template>;

impl Template {
    /// Load a template from source, reading header metadata from its `<head>`
    pub fn new<N: Into<String>, S: Into<String>>(name: N, source: S) -> EmailResult<Self> {
        let source = source.into();
        let metadata = TemplateMetadata::parse(&source)?;

        Ok(Self {
            name: name.into(),
            locale: None,
            path: None,
            source,
            metadata,
        })
    }

    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Source file, absent for in-memory templates
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &TemplateMetadata {
        &self.metadata
    }

    /// Whether the template produces markup that needs HTML escaping
    pub fn is_html(&self) -> bool {
        match self.path.as_ref().and_then(|p| p.extension()) {
            Some(ext) => matches!(
                ext.to_string_lossy().to_ascii_lowercase().as_str(),
                "html" | "htm" | "xhtml"
            ),
            None => self.source.trim_start().starts_with('<'),
        }
    }
}

/// Lookup of templates by name and locale
pub trait TemplateRepository: Send + Sync {
    /// Find a template, falling back from the requested locale to the default
    fn lookup(&self, name: &str, locale: Option<&str>) -> EmailResult<TemplateRef>;
}

/// Renders a template with a payload into a body string
pub trait TemplateRenderer: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self, template: &Template, payload: &Value) -> EmailResult<String>;
}

/// Candidate locales for a lookup: exact tag, language, then default
pub(crate) fn locale_candidates(locale: Option<&str>) -> Vec<Option<String>> {
    let mut candidates = Vec::new();

    if let Some(locale) = locale.map(normalize_locale) {
        if let Some((language, _region)) = locale.split_once('-') {
            candidates.push(Some(locale.clone()));
            candidates.push(Some(language.to_string()));
        } else {
            candidates.push(Some(locale));
        }
    }
    candidates.push(None);

    candidates
}

/// `en_us` and `en-US` both become `en-US`
pub(crate) fn normalize_locale(locale: &str) -> String {
    match locale.replace('_', "-").split_once('-') {
        Some((language, region)) => format!(
            "{}-{}",
            language.to_ascii_lowercase(),
            region.to_ascii_uppercase()
        ),
        None => locale.to_ascii_lowercase(),
    }
}
