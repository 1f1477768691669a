//! Declarative parameter constraints and the default validator.
//!
//! Constraints follow the shape callers already know from JSON validators:
//!
//! ```json
//! { "userName": { "presence": true, "type": "string", "length": { "maximum": 64 } } }
//! ```
//!
//! Only `presence` applies to missing or `null` values; every other check
//! skips them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use shared::{domain::ValidatorFormat, protocol::Params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub attribute: String,
    /// Full message, attribute name included: `User name can't be blank`.
    pub message: String,
}

impl Violation {
    fn new(attribute: &str, text: impl AsRef<str>) -> Self {
        Self {
            attribute: attribute.to_string(),
            message: format!("{} {}", prettify(attribute), text.as_ref()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ValueKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Presence {
    Required(bool),
    Detailed {
        #[serde(rename = "allowEmpty", default = "allow_empty_default")]
        allow_empty: bool,
    },
}

fn allow_empty_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Length {
    pub is: Option<usize>,
    pub minimum: Option<usize>,
    pub maximum: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Numericality {
    #[serde(default)]
    pub only_integer: bool,
    pub greater_than_or_equal_to: Option<f64>,
    pub less_than_or_equal_to: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FieldConstraint {
    pub presence: Option<Presence>,
    #[serde(rename = "type")]
    pub kind: Option<ValueKind>,
    pub length: Option<Length>,
    pub numericality: Option<Numericality>,
    pub inclusion: Option<Vec<Value>>,
}

impl FieldConstraint {
    pub fn required() -> Self {
        Self {
            presence: Some(Presence::Required(true)),
            ..Self::default()
        }
    }

    /// Required, and empty strings, arrays and objects count as missing.
    pub fn non_empty() -> Self {
        Self {
            presence: Some(Presence::Detailed { allow_empty: false }),
            ..Self::default()
        }
    }

    pub fn of_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn length_between(mut self, minimum: Option<usize>, maximum: Option<usize>) -> Self {
        self.length = Some(Length {
            is: None,
            minimum,
            maximum,
        });
        self
    }

    pub fn numericality(mut self, numericality: Numericality) -> Self {
        self.numericality = Some(numericality);
        self
    }

    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.inclusion = Some(values.into_iter().collect());
        self
    }

    fn check(&self, attribute: &str, value: Option<&Value>, out: &mut Vec<Violation>) {
        let value = value.filter(|v| !v.is_null());

        match self.presence {
            Some(Presence::Required(true)) if value.is_none() => {
                out.push(Violation::new(attribute, "can't be blank"));
            }
            Some(Presence::Detailed { allow_empty }) => {
                if value.is_none() || (!allow_empty && value.is_some_and(is_empty)) {
                    out.push(Violation::new(attribute, "can't be blank"));
                }
            }
            _ => {}
        }

        let Some(value) = value else {
            return;
        };

        if let Some(kind) = self.kind {
            if !kind.matches(value) {
                out.push(Violation::new(
                    attribute,
                    format!("must be of type {}", kind.as_str()),
                ));
            }
        }

        if let Some(length) = self.length {
            check_length(attribute, value, length, out);
        }

        if let Some(numericality) = self.numericality {
            check_numericality(attribute, value, numericality, out);
        }

        if let Some(allowed) = &self.inclusion {
            if !allowed.contains(value) {
                out.push(Violation::new(
                    attribute,
                    format!("{} is not included in the list", display_value(value)),
                ));
            }
        }
    }
}

/// Per-field constraints, checked in field-name order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Constraints(BTreeMap<String, FieldConstraint>);

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, constraint: FieldConstraint) -> Self {
        self.0.insert(name.into(), constraint);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldConstraint)> {
        self.0.iter().map(|(name, c)| (name.as_str(), c))
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, params: &Params, constraints: &Constraints)
        -> Result<(), Vec<Violation>>;
}

/// Checks [`Constraints`] in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintValidator;

impl ConstraintValidator {
    pub fn check(params: &Params, constraints: &Constraints) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (attribute, constraint) in constraints.iter() {
            constraint.check(attribute, params.get(attribute), &mut violations);
        }
        violations
    }
}

#[async_trait]
impl Validator for ConstraintValidator {
    async fn validate(
        &self,
        params: &Params,
        constraints: &Constraints,
    ) -> Result<(), Vec<Violation>> {
        let violations = Self::check(params, constraints);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Shapes violations into the `details` of an `INVALID_PARAMS` error.
pub fn format_violations(violations: &[Violation], format: ValidatorFormat) -> Value {
    match format {
        ValidatorFormat::ErrorFormatter => {
            let mut details = Map::new();
            for violation in violations {
                details
                    .entry(violation.attribute.clone())
                    .or_insert_with(|| Value::String(violation.message.clone()));
            }
            Value::Object(details)
        }
        ValidatorFormat::Grouped => {
            let mut details = Map::new();
            for violation in violations {
                let entry = details
                    .entry(violation.attribute.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(messages) = entry {
                    messages.push(Value::String(violation.message.clone()));
                }
            }
            Value::Object(details)
        }
        ValidatorFormat::Flat => Value::Array(
            violations
                .iter()
                .map(|v| Value::String(v.message.clone()))
                .collect(),
        ),
    }
}

fn check_length(attribute: &str, value: &Value, length: Length, out: &mut Vec<Violation>) {
    let actual = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        _ => {
            out.push(Violation::new(attribute, "has an incorrect length"));
            return;
        }
    };
    if let Some(is) = length.is {
        if actual != is {
            out.push(Violation::new(
                attribute,
                format!("is the wrong length (should be {is} characters)"),
            ));
        }
    }
    if let Some(minimum) = length.minimum {
        if actual < minimum {
            out.push(Violation::new(
                attribute,
                format!("is too short (minimum is {minimum} characters)"),
            ));
        }
    }
    if let Some(maximum) = length.maximum {
        if actual > maximum {
            out.push(Violation::new(
                attribute,
                format!("is too long (maximum is {maximum} characters)"),
            ));
        }
    }
}

fn check_numericality(
    attribute: &str,
    value: &Value,
    rules: Numericality,
    out: &mut Vec<Violation>,
) {
    let Some(number) = value.as_f64() else {
        out.push(Violation::new(attribute, "is not a number"));
        return;
    };
    if rules.only_integer && number.fract() != 0.0 {
        out.push(Violation::new(attribute, "must be an integer"));
    }
    if let Some(min) = rules.greater_than_or_equal_to {
        if number < min {
            out.push(Violation::new(
                attribute,
                format!("must be greater than or equal to {min}"),
            ));
        }
    }
    if let Some(max) = rules.less_than_or_equal_to {
        if number > max {
            out.push(Violation::new(
                attribute,
                format!("must be less than or equal to {max}"),
            ));
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `userName` -> `User name`, `first_name` -> `First name`.
fn prettify(attribute: &str) -> String {
    let mut words = String::with_capacity(attribute.len() + 4);
    let mut prev_lower = false;
    for ch in attribute.chars() {
        if ch == '_' || ch == '.' {
            words.push(' ');
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower {
                words.push(' ');
            }
            words.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            words.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => words,
    }
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
