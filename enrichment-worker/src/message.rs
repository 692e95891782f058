use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A record delivered on the main or error topic.
///
/// Any JSON object decodes into a `Message`. Fields are only interpreted by
/// `validate`, so a record with missing or wrongly typed fields still reaches
/// the pipeline and is forwarded to the error topic exactly as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    fields: Map<String, Value>,
}

/// The fields of a message that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupKey<'a> {
    pub id: i64,
    pub first_name: &'a str,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("id is required")]
    MissingId,
    #[error("id must be a positive integer, got {0}")]
    InvalidId(Value),
    #[error("first_name is required")]
    MissingFirstName,
    #[error("first_name must be a string, got {0}")]
    InvalidFirstName(Value),
}

impl Message {
    pub fn new(id: i64, first_name: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".to_owned(), Value::from(id));
        fields.insert("first_name".to_owned(), Value::from(first_name));
        Self { fields }
    }

    /// The id, when present and an integer.
    pub fn id(&self) -> Option<i64> {
        self.fields.get("id").and_then(Value::as_i64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn validate(&self) -> Result<LookupKey<'_>, ValidationError> {
        let id = match self.field("id") {
            None => return Err(ValidationError::MissingId),
            Some(value) => match value.as_i64() {
                Some(id) if id > 0 => id,
                _ => return Err(ValidationError::InvalidId(value.clone())),
            },
        };

        let first_name = match self.field("first_name") {
            None => return Err(ValidationError::MissingFirstName),
            Some(Value::String(first_name)) => first_name.trim(),
            Some(other) => return Err(ValidationError::InvalidFirstName(other.clone())),
        };
        if first_name.is_empty() {
            return Err(ValidationError::MissingFirstName);
        }

        Ok(LookupKey { id, first_name })
    }

    /// Partition key used when the message is produced again.
    pub fn key(&self) -> Option<String> {
        self.id().map(|id| id.to_string())
    }

    // null counts as missing
    fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|value| !value.is_null())
    }
}
