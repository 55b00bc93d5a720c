use crate::email::{address, EmailError, EmailResult};
use lettre::message::Mailbox;
use scraper::{Html, Selector};

/// Header values declared by a template in its `<head>` meta elements
///
/// ```html
/// <meta name="from" content="Support <support@example.com>" />
/// <meta name="to" content="ops@example.com" />
/// <meta name="subject" content="Weekly report" />
/// <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
/// ```
///
/// Repeated `to`, `cc`, `bcc` and `reply-to` elements accumulate; for the
/// single valued fields the first element wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateMetadata {
    pub from: Option<Mailbox>,
    pub to: Option<Vec<Mailbox>>,
    pub cc: Option<Vec<Mailbox>>,
    pub bcc: Option<Vec<Mailbox>>,
    pub reply_to: Option<Vec<Mailbox>>,
    pub subject: Option<String>,
    pub content_type: Option<String>,
}

impl TemplateMetadata {
    /// Read metadata from template source; sources without a head yield none
    pub fn parse(source: &str) -> EmailResult<Self> {
        let document = Html::parse_document(source);
        let selector = Selector::parse("head meta")
            .map_err(|e| EmailError::Config(format!("invalid meta selector: {:?}", e)))?;

        let mut metadata = Self::default();
        for element in document.select(&selector) {
            let element = element.value();

            if let Some(http_equiv) = element.attr("http-equiv") {
                if http_equiv.eq_ignore_ascii_case("content-type")
                    && metadata.content_type.is_none()
                {
                    metadata.content_type = Some(content(http_equiv, element.attr("content"))?);
                }
                continue;
            }

            let Some(name) = element.attr("name") else {
                continue;
            };
            match name.to_ascii_lowercase().as_str() {
                "from" => {
                    if metadata.from.is_none() {
                        let value = content(name, element.attr("content"))?;
                        metadata.from = Some(address::parse_one(&value)?);
                    }
                }
                "to" => accumulate(&mut metadata.to, name, element.attr("content"))?,
                "cc" => accumulate(&mut metadata.cc, name, element.attr("content"))?,
                "bcc" => accumulate(&mut metadata.bcc, name, element.attr("content"))?,
                "reply-to" => accumulate(&mut metadata.reply_to, name, element.attr("content"))?,
                "subject" => {
                    if metadata.subject.is_none() {
                        metadata.subject = Some(content(name, element.attr("content"))?);
                    }
                }
                _ => {}
            }
        }

        Ok(metadata)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn content(meta: &str, content: Option<&str>) -> EmailResult<String> {
    match content.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(EmailError::Validation(format!(
            "meta element |{}| has no content attribute",
            meta
        ))),
    }
}

fn accumulate(
    target: &mut Option<Vec<Mailbox>>,
    meta: &str,
    value: Option<&str>,
) -> EmailResult<()> {
    let value = content(meta, value)?;
    let parsed = address::parse_list(&value)?;
    target.get_or_insert_with(Vec::new).extend(parsed);
    Ok(())
}
