//! Elicitation wire types.
//!
//! A server asks the host application to collect structured input through an
//! [`ElicitationRequest`]; the host answers with exactly one
//! [`ElicitationResponse`].
//!
//! Field definitions arrive as `{name, type, label, required, validation?,
//! dependencies?}` and are parsed into the closed [`FieldKind`] union, so a
//! rule that does not apply to a field type (for example `minLength` on a
//! `number`) is dropped at the boundary rather than carried around.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Values collected for an accepted elicitation, keyed by field name
pub type ElicitationValues = Map<String, Value>;

/// Server-initiated request for structured user input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitationRequest {
    /// Unique per in-flight request
    pub id: String,
    /// Title shown to the user
    pub title: String,
    /// Longer explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered fields to collect
    pub fields: Vec<ElicitationField>,
    /// Whether the user may cancel; `true` unless the server says otherwise
    #[serde(default = "allow_cancel_default")]
    pub allow_cancel: bool,
}

fn allow_cancel_default() -> bool {
    true
}

impl ElicitationRequest {
    /// Create a request with no fields
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            fields: Vec::new(),
            allow_cancel: true,
        }
    }

    /// Append a field
    #[must_use]
    pub fn with_field(mut self, field: ElicitationField) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A single field of an elicitation form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawField", into = "RawField")]
pub struct ElicitationField {
    /// Unique within the request
    pub name: String,
    /// Label shown to the user
    pub label: String,
    /// Whether an empty value is an error
    pub required: bool,
    /// Field type and its validation rules
    pub kind: FieldKind,
    /// Conditions under which the field is active
    pub dependencies: Vec<FieldDependency>,
}

impl ElicitationField {
    /// Create an optional field with no dependencies
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            required: false,
            kind,
            dependencies: Vec::new(),
        }
    }

    /// Mark the field as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Only activate the field when `field` currently equals `value`
    #[must_use]
    pub fn depends_on(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.dependencies.push(FieldDependency {
            field: field.into(),
            value: value.into(),
        });
        self
    }
}

/// Field type together with the rules that apply to it
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Free text
    Text {
        /// Minimum length in characters
        min_length: Option<usize>,
        /// Maximum length in characters
        max_length: Option<usize>,
        /// Pattern the whole value must match
        pattern: Option<TextPattern>,
    },
    /// Email address
    Email,
    /// Absolute URL
    Url,
    /// JSON number
    Number {
        /// Inclusive lower bound
        min: Option<f64>,
        /// Inclusive upper bound
        max: Option<f64>,
    },
    /// JSON boolean
    Boolean,
    /// Exactly one of the options
    Select {
        /// Allowed options
        options: Vec<SelectOption>,
    },
    /// Any subset of the options
    Multiselect {
        /// Allowed options
        options: Vec<SelectOption>,
    },
}

impl FieldKind {
    /// Unconstrained text field
    pub fn text() -> Self {
        Self::Text {
            min_length: None,
            max_length: None,
            pattern: None,
        }
    }

    /// Unconstrained number field
    pub fn number() -> Self {
        Self::Number {
            min: None,
            max: None,
        }
    }

    fn field_type(&self) -> FieldType {
        match self {
            Self::Text { .. } => FieldType::Text,
            Self::Email => FieldType::Email,
            Self::Url => FieldType::Url,
            Self::Number { .. } => FieldType::Number,
            Self::Boolean => FieldType::Boolean,
            Self::Select { .. } => FieldType::Select,
            Self::Multiselect { .. } => FieldType::Multiselect,
        }
    }
}

/// Compiled `validation.pattern` of a text field
///
/// The pattern is anchored on both ends when matched, so `[a-z]+` must match
/// the whole value.
#[derive(Debug, Clone)]
pub struct TextPattern {
    source: String,
    regex: Regex,
}

impl TextPattern {
    /// Compile a pattern
    ///
    /// # Errors
    ///
    /// Returns the regex error if `source` is not a valid pattern.
    pub fn new(source: impl Into<String>) -> Result<Self, regex::Error> {
        let source = source.into();
        let regex = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self { source, regex })
    }

    /// Pattern as written in the field definition
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `value` matches in full
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for TextPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// An option of a select or multiselect field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Value submitted when chosen
    pub value: Value,
    /// Label shown to the user
    #[serde(default)]
    pub label: String,
}

impl SelectOption {
    /// Create an option
    pub fn new(value: impl Into<Value>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// A `{field, value}` activation condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDependency {
    /// Field whose value is checked
    pub field: String,
    /// Value it must currently equal
    pub value: Value,
}

/// Rejected field definition
#[derive(Debug, thiserror::Error)]
pub enum FieldDefinitionError {
    /// `validation.pattern` does not compile
    #[error("field '{field}' has an invalid pattern: {source}")]
    InvalidPattern {
        /// Field name
        field: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FieldType {
    Text,
    Email,
    Url,
    Number,
    Boolean,
    Select,
    Multiselect,
}

impl FieldType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Email => "email",
            Self::Url => "url",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Select => "select",
            Self::Multiselect => "multiselect",
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<Vec<SelectOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
}

impl ValidationRules {
    fn is_empty(&self) -> bool {
        self.min_length.is_none()
            && self.max_length.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.options.is_none()
            && self.pattern.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    label: String,
    #[serde(default)]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validation: Option<ValidationRules>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<FieldDependency>,
}

impl TryFrom<RawField> for ElicitationField {
    type Error = FieldDefinitionError;

    fn try_from(raw: RawField) -> Result<Self, Self::Error> {
        let rules = raw.validation.unwrap_or_default();
        let kind = match raw.field_type {
            FieldType::Text => {
                let pattern = rules
                    .pattern
                    .map(TextPattern::new)
                    .transpose()
                    .map_err(|source| FieldDefinitionError::InvalidPattern {
                        field: raw.name.clone(),
                        source,
                    })?;
                FieldKind::Text {
                    min_length: rules.min_length,
                    max_length: rules.max_length,
                    pattern,
                }
            }
            FieldType::Email => FieldKind::Email,
            FieldType::Url => FieldKind::Url,
            FieldType::Number => FieldKind::Number {
                min: rules.min,
                max: rules.max,
            },
            FieldType::Boolean => FieldKind::Boolean,
            FieldType::Select => FieldKind::Select {
                options: rules.options.unwrap_or_default(),
            },
            FieldType::Multiselect => FieldKind::Multiselect {
                options: rules.options.unwrap_or_default(),
            },
        };

        Ok(Self {
            name: raw.name,
            label: raw.label,
            required: raw.required,
            kind,
            dependencies: raw.dependencies,
        })
    }
}

impl From<ElicitationField> for RawField {
    fn from(field: ElicitationField) -> Self {
        let field_type = field.kind.field_type();
        let mut rules = ValidationRules::default();
        match field.kind {
            FieldKind::Text {
                min_length,
                max_length,
                pattern,
            } => {
                rules.min_length = min_length;
                rules.max_length = max_length;
                rules.pattern = pattern.map(|p| p.source);
            }
            FieldKind::Number { min, max } => {
                rules.min = min;
                rules.max = max;
            }
            FieldKind::Select { options } | FieldKind::Multiselect { options } => {
                rules.options = Some(options);
            }
            FieldKind::Email | FieldKind::Url | FieldKind::Boolean => {}
        }

        Self {
            name: field.name,
            field_type,
            label: field.label,
            required: field.required,
            validation: (!rules.is_empty()).then_some(rules),
            dependencies: field.dependencies,
        }
    }
}

/// Outcome chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitationAction {
    /// User submitted values
    Accept,
    /// User explicitly declined
    Decline,
    /// User dismissed the request
    Cancel,
}

impl fmt::Display for ElicitationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Cancel => "cancel",
        })
    }
}

/// Answer to an [`ElicitationRequest`]
///
/// `values` is only carried by `accept`, `reason` only by `decline` and
/// `cancel`. Responses built through the constructors keep that shape;
/// [`ElicitationResponse::normalized`] restores it for responses parsed off
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitationResponse {
    id: String,
    action: ElicitationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    values: Option<ElicitationValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl ElicitationResponse {
    /// Accept with the collected values
    pub fn accept(id: impl Into<String>, values: ElicitationValues) -> Self {
        Self {
            id: id.into(),
            action: ElicitationAction::Accept,
            values: Some(values),
            reason: None,
        }
    }

    /// Decline, optionally saying why
    pub fn decline(id: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            id: id.into(),
            action: ElicitationAction::Decline,
            values: None,
            reason,
        }
    }

    /// Cancel, optionally saying why
    pub fn cancel(id: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            id: id.into(),
            action: ElicitationAction::Cancel,
            values: None,
            reason,
        }
    }

    /// Request id this answers
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Chosen action
    pub fn action(&self) -> ElicitationAction {
        self.action
    }

    /// Submitted values, only for `accept`
    pub fn values(&self) -> Option<&ElicitationValues> {
        self.values.as_ref()
    }

    /// Reason, only for `decline` and `cancel`
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Rebind to `id` and drop fields that do not belong to the action
    #[must_use]
    pub fn normalized(mut self, id: &str) -> Self {
        if self.id != id {
            self.id = id.to_string();
        }
        match self.action {
            ElicitationAction::Accept => {
                self.reason = None;
                if self.values.is_none() {
                    self.values = Some(ElicitationValues::new());
                }
            }
            ElicitationAction::Decline | ElicitationAction::Cancel => self.values = None,
        }
        self
    }
}

/// Machine-readable validation failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    /// Required field is empty
    Required,
    /// Text shorter than `minLength`
    MinLength,
    /// Text longer than `maxLength`
    MaxLength,
    /// Number below `min`
    MinValue,
    /// Number above `max`
    MaxValue,
    /// Not an email address
    InvalidEmail,
    /// Not an absolute URL
    InvalidUrl,
    /// Wrong JSON type for the field
    InvalidType,
    /// Select value is not an option
    InvalidOption,
    /// Multiselect contains a value that is not an option
    InvalidOptions,
    /// Value given for an inactive field
    DependencyNotMet,
    /// Text does not match `pattern`
    PatternMismatch,
}

impl ValidationCode {
    /// Wire name of the code
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::MinLength => "MIN_LENGTH",
            Self::MaxLength => "MAX_LENGTH",
            Self::MinValue => "MIN_VALUE",
            Self::MaxValue => "MAX_VALUE",
            Self::InvalidEmail => "INVALID_EMAIL",
            Self::InvalidUrl => "INVALID_URL",
            Self::InvalidType => "INVALID_TYPE",
            Self::InvalidOption => "INVALID_OPTION",
            Self::InvalidOptions => "INVALID_OPTIONS",
            Self::DependencyNotMet => "DEPENDENCY_NOT_MET",
            Self::PatternMismatch => "PATTERN_MISMATCH",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem with one submitted field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElicitationValidationError {
    /// Offending field
    pub field: String,
    /// Human-readable message
    pub message: String,
    /// Machine-readable code
    pub code: ValidationCode,
}

impl ElicitationValidationError {
    /// Create a validation error
    pub fn new(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for ElicitationValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.code)
    }
}
