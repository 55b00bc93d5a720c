use super::{Template, TemplateRenderer};
use crate::email::{EmailError, EmailResult};
use serde_json::Value;
use std::error::Error as _;
use std::sync::Arc;
use tera::{Context, Tera};

/// Renders templates with the Tera engine
///
/// Object payloads become the template context directly; any other value is
/// exposed under the `model` key.
#[derive(Debug, Clone, Default)]
pub struct TeraRenderer;

impl TeraRenderer {
    pub fn new() -> Self {
        Self
    }

    fn context(payload: &Value) -> EmailResult<Context> {
        let value = match payload {
            Value::Object(_) => payload.clone(),
            other => serde_json::json!({ "model": other }),
        };
        Context::from_value(value).map_err(|e| EmailError::Validation(e.to_string()))
    }
}

impl TemplateRenderer for TeraRenderer {
    fn name(&self) -> &str {
        "tera"
    }

    fn render(&self, template: &Template, payload: &Value) -> EmailResult<String> {
        let context = Self::context(payload)?;

        Tera::one_off(template.source(), &context, template.is_html()).map_err(|e| {
            // Tera keeps the useful part of the message in the source chain
            let mut reason = e.to_string();
            let mut source = e.source();
            while let Some(cause) = source {
                reason.push_str(": ");
                reason.push_str(&cause.to_string());
                source = cause.source();
            }

            EmailError::TemplateRender {
                template: template.name().to_string(),
                reason,
            }
        })
    }
}

/// Returns the template source unchanged, for static emails
#[derive(Debug, Clone, Default)]
pub struct VerbatimRenderer;

impl TemplateRenderer for VerbatimRenderer {
    fn name(&self) -> &str {
        "verbatim"
    }

    fn render(&self, template: &Template, _payload: &Value) -> EmailResult<String> {
        Ok(template.source().to_string())
    }
}

/// Select a renderer by its configured engine name
pub fn renderer_for(engine: Option<&str>) -> EmailResult<Arc<dyn TemplateRenderer>> {
    match engine.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("tera") => Ok(Arc::new(TeraRenderer::new())),
        Some("verbatim") => Ok(Arc::new(VerbatimRenderer)),
        Some(other) => Err(EmailError::Config(format!(
            "unknown template engine |{}|",
            other
        ))),
    }
}
