//! Validation of submitted elicitation values

use relaymcp_protocol::elicitation::{
    ElicitationField, ElicitationValidationError, ElicitationValues, FieldKind, SelectOption,
    ValidationCode,
};
use serde_json::Value;

/// Check `values` against every field of a request
///
/// Fields whose dependencies are not all met are skipped, but a value
/// submitted for such a field is an error. Returns every problem found, in
/// field order; an empty list means the values are acceptable.
pub fn validate_values(
    fields: &[ElicitationField],
    values: &ElicitationValues,
) -> Vec<ElicitationValidationError> {
    let mut errors = Vec::new();

    for field in fields {
        let value = values.get(&field.name).filter(|v| !is_empty(v));

        let active = field
            .dependencies
            .iter()
            .all(|dep| values.get(&dep.field) == Some(&dep.value));
        if !active {
            if value.is_some() {
                errors.push(ElicitationValidationError::new(
                    &field.name,
                    ValidationCode::DependencyNotMet,
                    format!("{} does not apply to the current answers", field.label),
                ));
            }
            continue;
        }

        match value {
            Some(value) => validate_field(field, value, &mut errors),
            None if field.required => errors.push(ElicitationValidationError::new(
                &field.name,
                ValidationCode::Required,
                format!("{} is required", field.label),
            )),
            None => {}
        }
    }

    errors
}

/// Absent, `null`, `""` and `[]` all count as "no answer"
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn validate_field(
    field: &ElicitationField,
    value: &Value,
    errors: &mut Vec<ElicitationValidationError>,
) {
    let mut fail = |code: ValidationCode, message: String| {
        errors.push(ElicitationValidationError::new(&field.name, code, message));
    };
    let label = &field.label;

    match &field.kind {
        FieldKind::Text {
            min_length,
            max_length,
            pattern,
        } => {
            let Some(text) = value.as_str() else {
                return fail(ValidationCode::InvalidType, format!("{label} must be text"));
            };
            let length = text.chars().count();
            if let Some(min) = min_length.filter(|min| length < *min) {
                fail(
                    ValidationCode::MinLength,
                    format!("{label} must be at least {min} characters"),
                );
            }
            if let Some(max) = max_length.filter(|max| length > *max) {
                fail(
                    ValidationCode::MaxLength,
                    format!("{label} must be at most {max} characters"),
                );
            }
            if let Some(pattern) = pattern {
                if !pattern.is_match(text) {
                    fail(
                        ValidationCode::PatternMismatch,
                        format!("{label} must match {}", pattern.as_str()),
                    );
                }
            }
        }

        FieldKind::Email => {
            if !value.as_str().is_some_and(is_email) {
                fail(
                    ValidationCode::InvalidEmail,
                    format!("{label} must be an email address"),
                );
            }
        }

        FieldKind::Url => {
            if !value.as_str().is_some_and(|s| url::Url::parse(s).is_ok()) {
                fail(
                    ValidationCode::InvalidUrl,
                    format!("{label} must be an absolute URL"),
                );
            }
        }

        FieldKind::Number { min, max } => {
            let Some(number) = value.as_f64() else {
                return fail(ValidationCode::InvalidType, format!("{label} must be a number"));
            };
            if let Some(min) = min.filter(|min| number < *min) {
                fail(
                    ValidationCode::MinValue,
                    format!("{label} must be at least {min}"),
                );
            }
            if let Some(max) = max.filter(|max| number > *max) {
                fail(
                    ValidationCode::MaxValue,
                    format!("{label} must be at most {max}"),
                );
            }
        }

        FieldKind::Boolean => {
            if !value.is_boolean() {
                fail(
                    ValidationCode::InvalidType,
                    format!("{label} must be true or false"),
                );
            }
        }

        FieldKind::Select { options } => {
            if !is_option(options, value) {
                fail(
                    ValidationCode::InvalidOption,
                    format!("{label} must be one of the offered options"),
                );
            }
        }

        FieldKind::Multiselect { options } => {
            let Some(chosen) = value.as_array() else {
                return fail(ValidationCode::InvalidType, format!("{label} must be a list"));
            };
            if !chosen.iter().all(|item| is_option(options, item)) {
                fail(
                    ValidationCode::InvalidOptions,
                    format!("{label} may only contain the offered options"),
                );
            }
        }
    }
}

fn is_option(options: &[SelectOption], value: &Value) -> bool {
    options.iter().any(|option| option.value == *value)
}

/// `local@domain.tld`: one `@`, no whitespace, a dot inside the domain
fn is_email(candidate: &str) -> bool {
    if candidate.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    // Some dot with at least one character on each side
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}
