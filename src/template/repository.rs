use super::{locale_candidates, normalize_locale, Template, TemplateRef, TemplateRepository};
use crate::email::{EmailError, EmailResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Default pattern for template file names
pub const DEFAULT_FILES_PATTERN: &str = "*.html";

type TemplateKey = (String, Option<String>);

/// Templates repository backed by a directory tree
///
/// Files directly under the root belong to the default locale; files inside a
/// first level directory named after a locale (`en`, `ro`, `en-US`) belong to
/// that locale. The template name is the file stem. Sources are read on every
/// lookup so edited templates are picked up without a restart.
#[derive(Debug, Clone)]
pub struct FileTemplateRepository {
    root: PathBuf,
    templates: HashMap<TemplateKey, PathBuf>,
}

impl FileTemplateRepository {
    /// Scan a repository directory for templates matching a file name pattern
    pub fn scan<P: AsRef<Path>>(root: P, files_pattern: Option<&str>) -> EmailResult<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(EmailError::Config(format!(
                "templates repository |{}| is not a directory",
                root.display()
            )));
        }

        let pattern_text = files_pattern.unwrap_or(DEFAULT_FILES_PATTERN);
        let pattern = glob::Pattern::new(pattern_text).map_err(|e| {
            EmailError::Config(format!("invalid files pattern |{}|: {}", pattern_text, e))
        })?;

        let mut templates = HashMap::new();
        for entry in WalkDir::new(root).min_depth(1).max_depth(2).sort_by_file_name() {
            let entry = entry.map_err(|e| EmailError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if !pattern.matches(&file_name) {
                continue;
            }

            let locale = match entry.depth() {
                1 => None,
                _ => {
                    let dir = entry
                        .path()
                        .parent()
                        .and_then(|p| p.file_name())
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    if !is_locale_tag(&dir) {
                        tracing::debug!(
                            "Skip template outside locale directory |{}|",
                            entry.path().display()
                        );
                        continue;
                    }
                    Some(normalize_locale(&dir))
                }
            };

            let Some(name) = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
            else {
                continue;
            };

            let path = entry.path().to_path_buf();
            if templates.insert((name.clone(), locale.clone()), path.clone()).is_some() {
                tracing::warn!("Override email template |{}:{}|", name, path.display());
            } else {
                tracing::debug!("Register email template |{}:{}|", name, path.display());
            }
        }

        tracing::info!(
            "Scanned templates repository |{}|: {} template(s)",
            root.display(),
            templates.len()
        );

        Ok(Self {
            root: root.to_path_buf(),
            templates,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateRepository for FileTemplateRepository {
    fn lookup(&self, name: &str, locale: Option<&str>) -> EmailResult<TemplateRef> {
        for candidate in locale_candidates(locale) {
            let key = (name.to_string(), candidate);
            if let Some(path) = self.templates.get(&key) {
                let source = fs::read_to_string(path)?;
                let template = Template::new(name, source)?
                    .with_locale(key.1)
                    .with_path(path);
                return Ok(Arc::new(template));
            }
        }

        Err(EmailError::TemplateNotFound(name.to_string()))
    }
}

/// Templates held in memory, e.g. embedded with `include_str!`
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateRepository {
    templates: HashMap<TemplateKey, TemplateRef>,
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a default locale template
    pub fn with_template(self, name: &str, source: &str) -> EmailResult<Self> {
        self.insert(name, None, source)
    }

    /// Register a template for a specific locale
    pub fn with_localized(self, locale: &str, name: &str, source: &str) -> EmailResult<Self> {
        self.insert(name, Some(normalize_locale(locale)), source)
    }

    fn insert(mut self, name: &str, locale: Option<String>, source: &str) -> EmailResult<Self> {
        let template = Template::new(name, source)?.with_locale(locale.clone());
        self.templates
            .insert((name.to_string(), locale), Arc::new(template));
        Ok(self)
    }
}

impl TemplateRepository for MemoryTemplateRepository {
    fn lookup(&self, name: &str, locale: Option<&str>) -> EmailResult<TemplateRef> {
        locale_candidates(locale)
            .into_iter()
            .find_map(|candidate| self.templates.get(&(name.to_string(), candidate)))
            .cloned()
            .ok_or_else(|| EmailError::TemplateNotFound(name.to_string()))
    }
}

/// ISO 639-1 language codes
const LANGUAGES: &[&str] = &[
    "aa", "ab", "ae", "af", "ak", "am", "an", "ar", "as", "av", "ay", "az", "ba", "be", "bg", "bh",
    "bi", "bm", "bn", "bo", "br", "bs", "ca", "ce", "ch", "co", "cr", "cs", "cu", "cv", "cy", "da",
    "de", "dv", "dz", "ee", "el", "en", "eo", "es", "et", "eu", "fa", "ff", "fi", "fj", "fo", "fr",
    "fy", "ga", "gd", "gl", "gn", "gu", "gv", "ha", "he", "hi", "ho", "hr", "ht", "hu", "hy", "hz",
    "ia", "id", "ie", "ig", "ii", "ik", "io", "is", "it", "iu", "ja", "jv", "ka", "kg", "ki", "kj",
    "kk", "kl", "km", "kn", "ko", "kr", "ks", "ku", "kv", "kw", "ky", "la", "lb", "lg", "li", "ln",
    "lo", "lt", "lu", "lv", "mg", "mh", "mi", "mk", "ml", "mn", "mr", "ms", "mt", "my", "na", "nb",
    "nd", "ne", "ng", "nl", "nn", "no", "nr", "nv", "ny", "oc", "oj", "om", "or", "os", "pa", "pi",
    "pl", "ps", "pt", "qu", "rm", "rn", "ro", "ru", "rw", "sa", "sc", "sd", "se", "sg", "si", "sk",
    "sl", "sm", "sn", "so", "sq", "sr", "ss", "st", "su", "sv", "sw", "ta", "te", "tg", "th", "ti",
    "tk", "tl", "tn", "to", "tr", "ts", "tt", "tw", "ty", "ug", "uk", "ur", "uz", "ve", "vi", "vo",
    "wa", "wo", "xh", "yi", "yo", "za", "zh", "zu",
];

/// `en`, `en-US`, `pt_BR`, `es-419`
///
/// The language must be a known ISO 639-1 code, so asset directories such as
/// `css` or `img` are never taken for locales.
fn is_locale_tag(value: &str) -> bool {
    let normalized = value.replace('_', "-");
    let (language, region) = match normalized.split_once('-') {
        Some((language, region)) => (language, Some(region)),
        None => (normalized.as_str(), None),
    };

    let language_ok = LANGUAGES.contains(&language.to_ascii_lowercase().as_str());
    let region_ok = region.map_or(true, |r| {
        (r.len() == 2 && r.chars().all(|c| c.is_ascii_alphabetic()))
            || (r.len() == 3 && r.chars().all(|c| c.is_ascii_digit()))
    });

    language_ok && region_ok
}
