//! Prompt Templates
//!
//! `{name}` placeholder substitution, with optional per-field schema
//! validation and formatting.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::{ChainError, Result};
use crate::generation::Message;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^}]+)\}").expect("valid placeholder pattern"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));
static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://.*").expect("valid url pattern"));

/// Text inserted for a value: strings verbatim, everything else as JSON.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn substitute(text: &str, variables: &[String], values: &Map<String, Value>) -> Result<String> {
    let mut result = text.to_string();
    for key in variables {
        let value = values.get(key).ok_or_else(|| {
            ChainError::validation(format!("Missing value for variable: {}", key))
        })?;
        result = result.replacen(&format!("{{{}}}", key), &display(value), 1);
    }
    Ok(result)
}

// == Template ==
/// Template with a fixed list of required variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    text: String,
    variables: Vec<String>,
}

impl Template {
    pub fn new(text: impl Into<String>, variables: &[&str]) -> Self {
        Self {
            text: text.into(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Substitutes the first occurrence of every listed variable; each must
    /// be supplied.
    pub fn render(&self, values: &Map<String, Value>) -> Result<String> {
        substitute(&self.text, &self.variables, values)
    }
}

// == Message Template ==
/// Chat messages whose contents share one variable list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    messages: Vec<Message>,
    variables: Vec<String>,
}

impl MessageTemplate {
    pub fn new(messages: Vec<Message>, variables: &[&str]) -> Self {
        Self {
            messages,
            variables: variables.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn render(&self, values: &Map<String, Value>) -> Result<Vec<Message>> {
        self.messages
            .iter()
            .map(|m| {
                Ok(Message::new(
                    m.role.clone(),
                    substitute(&m.content, &self.variables, values)?,
                ))
            })
            .collect()
    }
}

// == Field Kind ==
/// Built-in type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Array,
    Email,
    Url,
}

impl FieldKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Email => value.as_str().is_some_and(|s| EMAIL.is_match(s)),
            FieldKind::Url => value.as_str().is_some_and(|s| URL.is_match(s)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Email => "email",
            FieldKind::Url => "url",
        }
    }
}

// == Formatter ==
type FormatFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Transformation applied to a field after validation.
#[derive(Clone)]
pub enum Formatter {
    Lowercase,
    Uppercase,
    Trim,
    /// Parse a string into a number
    Number,
    /// Serialize to a JSON string
    Json,
    /// Normalise to an RFC 3339 UTC timestamp with milliseconds
    Date,
    Custom(FormatFn),
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formatter::Lowercase => f.write_str("Lowercase"),
            Formatter::Uppercase => f.write_str("Uppercase"),
            Formatter::Trim => f.write_str("Trim"),
            Formatter::Number => f.write_str("Number"),
            Formatter::Json => f.write_str("Json"),
            Formatter::Date => f.write_str("Date"),
            Formatter::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl Formatter {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Formatter::Custom(Arc::new(f))
    }

    fn apply(&self, key: &str, value: Value) -> Result<Value> {
        let text = |value: &Value| {
            value.as_str().map(str::to_string).ok_or_else(|| {
                ChainError::validation(format!("Cannot format non-string value for {}", key))
            })
        };
        match self {
            Formatter::Lowercase => Ok(Value::String(text(&value)?.to_lowercase())),
            Formatter::Uppercase => Ok(Value::String(text(&value)?.to_uppercase())),
            Formatter::Trim => Ok(Value::String(text(&value)?.trim().to_string())),
            Formatter::Number => match &value {
                Value::Number(_) => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        ChainError::validation(format!("Invalid number for {}: {}", key, s))
                    }),
                _ => Err(ChainError::validation(format!("Invalid number for {}", key))),
            },
            Formatter::Json => Ok(Value::String(value.to_string())),
            Formatter::Date => parse_date(&value)
                .map(|d| Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)))
                .ok_or_else(|| ChainError::validation(format!("Invalid date for {}", key))),
            Formatter::Custom(f) => f(value),
        }
    }
}

/// Unix milliseconds, RFC 3339, or a plain `YYYY-MM-DD` date.
fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc())
            }),
        _ => None,
    }
}

// == Field Schema ==
type ValidateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Rules for one template field.
#[derive(Clone)]
pub struct FieldSchema {
    pub kind: Option<FieldKind>,
    /// Fields are required unless marked otherwise
    pub required: bool,
    pub default: Option<Value>,
    pub validate: Option<ValidateFn>,
    pub format: Option<Formatter>,
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            kind: None,
            required: true,
            default: None,
            validate: None,
            format: None,
        }
    }
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("validate", &self.validate.is_some())
            .field("format", &self.format)
            .finish()
    }
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn validate<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(check));
        self
    }

    pub fn format(mut self, formatter: Formatter) -> Self {
        self.format = Some(formatter);
        self
    }

    fn process(&self, key: &str, supplied: Option<&Value>) -> Result<Option<Value>> {
        let value = match supplied.or(self.default.as_ref()) {
            Some(value) => value.clone(),
            None if self.required => {
                return Err(ChainError::validation(format!(
                    "Missing required value for {}",
                    key
                )))
            }
            None => return Ok(None),
        };

        if let Some(kind) = self.kind {
            if !kind.accepts(&value) {
                return Err(ChainError::validation(format!(
                    "Invalid type for {}: expected {}",
                    key,
                    kind.name()
                )));
            }
        }
        if let Some(check) = &self.validate {
            if !check(&value) {
                return Err(ChainError::validation(format!("Validation failed for {}", key)));
            }
        }

        match &self.format {
            Some(formatter) => formatter.apply(key, value).map(Some),
            None => Ok(Some(value)),
        }
    }
}

// == Schema Template ==
/// Template whose fields are validated and formatted before substitution.
///
/// Placeholders without a processed value are left as written.
#[derive(Debug, Clone)]
pub struct SchemaTemplate {
    text: String,
    schema: Vec<(String, FieldSchema)>,
}

impl SchemaTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            schema: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.schema.push((name.into(), schema));
        self
    }

    pub fn render(&self, values: &Map<String, Value>) -> Result<String> {
        let mut processed = Map::new();
        for (key, schema) in &self.schema {
            if let Some(value) = schema.process(key, values.get(key))? {
                processed.insert(key.clone(), value);
            }
        }

        let rendered = PLACEHOLDER.replace_all(&self.text, |caps: &Captures| {
            match processed.get(&caps[1]) {
                Some(value) => display(value),
                None => caps[0].to_string(),
            }
        });
        Ok(rendered.into_owned())
    }
}
