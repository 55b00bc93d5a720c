use crate::email::EmailResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Optional header values carried by a payload object
///
/// Address-bearing accessors return comma-joined address lists. The nested
/// [`MailModel::model`] value, when present, is what gets rendered into the
/// template instead of the whole object.
pub trait MailModel {
    fn subject(&self) -> Option<String> {
        None
    }

    fn to(&self) -> Option<String> {
        None
    }

    fn cc(&self) -> Option<String> {
        None
    }

    fn bcc(&self) -> Option<String> {
        None
    }

    fn from(&self) -> Option<String> {
        None
    }

    fn envelope_from(&self) -> Option<String> {
        None
    }

    fn reply_to(&self) -> Option<String> {
        None
    }

    fn content_type(&self) -> Option<String> {
        None
    }

    /// Nested value to render; `None` renders the model itself
    fn model(&self) -> Option<Value> {
        None
    }
}

/// Snapshot of optional header values, applied to a draft in bulk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailFields {
    pub subject: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub from: Option<String>,
    pub envelope_from: Option<String>,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
}

impl MailFields {
    /// Capture the header values a mail model exposes
    pub fn from_model<M: MailModel + ?Sized>(model: &M) -> Self {
        Self {
            subject: model.subject(),
            to: model.to(),
            cc: model.cc(),
            bcc: model.bcc(),
            from: model.from(),
            envelope_from: model.envelope_from(),
            reply_to: model.reply_to(),
            content_type: model.content_type(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The single positional argument of [`crate::email::EmailDraft::send`]
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    fields: Option<MailFields>,
    data: Value,
}

impl Payload {
    /// Plain data rendered into the template
    pub fn data<T: Serialize + ?Sized>(value: &T) -> EmailResult<Self> {
        Ok(Self {
            fields: None,
            data: serde_json::to_value(value)?,
        })
    }

    /// A mail model: header values plus the data to render
    pub fn model<M: MailModel + Serialize>(model: &M) -> EmailResult<Self> {
        let data = match model.model() {
            Some(nested) => nested,
            None => serde_json::to_value(model)?,
        };

        Ok(Self {
            fields: Some(MailFields::from_model(model)),
            data,
        })
    }

    /// Empty object, used when send receives no payload
    pub fn empty() -> Self {
        Self {
            fields: None,
            data: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn fields(&self) -> Option<&MailFields> {
        self.fields.as_ref()
    }

    pub fn value(&self) -> &Value {
        &self.data
    }

    pub(crate) fn into_parts(self) -> (Option<MailFields>, Value) {
        (self.fields, self.data)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}
