//! Declared output schemas for analysis tasks
//!
//! A task declares the fields it expects from its collaborator. The dispatcher
//! validates raw collaborator output against that declaration and either
//! yields the checked object or a list of violations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// Allowed shape of one output field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    StringList,
    Number,
    /// One of a fixed set of strings, compared case-insensitively
    Enum(Vec<String>),
}

/// One declared output field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,
}

impl FieldSpec {
    pub fn required(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// One way an output object failed its schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub field: String,
    pub problem: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

/// Ratings a synthesis or section may assign
pub const RATINGS: [&str; 4] = ["Strong", "Moderate", "Weak", "Critical"];

/// Declared structure of a task's output object
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputSchema {
    pub fields: Vec<FieldSpec>,
}

impl OutputSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Standard analysis section: summary, detail, findings and a rating
    pub fn analysis() -> Self {
        Self::new(vec![
            FieldSpec::required(
                "executiveSummary",
                FieldKind::String,
                "Two or three sentences on the overall position",
            ),
            FieldSpec::required(
                "detailedAnalysis",
                FieldKind::String,
                "Full analysis citing line items by label",
            ),
            FieldSpec::required(
                "topFindings",
                FieldKind::StringList,
                "Most important findings, most significant first",
            ),
            FieldSpec::required(
                "rating",
                FieldKind::Enum(RATINGS.iter().map(ToString::to_string).collect()),
                "Overall assessment",
            ),
        ])
    }

    /// Add a field
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Check an output value.
    ///
    /// Unknown fields are kept. Enum values are rewritten to their declared
    /// spelling.
    pub fn validate(&self, output: &Value) -> Result<Map<String, Value>, Vec<SchemaViolation>> {
        let Value::Object(object) = output else {
            return Err(vec![SchemaViolation {
                field: "$".to_string(),
                problem: "output is not an object".to_string(),
            }]);
        };

        let mut checked = object.clone();
        let mut violations = Vec::new();

        for field in &self.fields {
            let violation = |problem: &str| SchemaViolation {
                field: field.name.clone(),
                problem: problem.to_string(),
            };

            let value = match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(violation("missing"));
                    }
                    continue;
                }
                Some(value) => value,
            };

            match (&field.kind, value) {
                (FieldKind::String, Value::String(s)) => {
                    if field.required && s.trim().is_empty() {
                        violations.push(violation("empty string"));
                    }
                }
                (FieldKind::StringList, Value::Array(items)) => {
                    if !items.iter().all(Value::is_string) {
                        violations.push(violation("list must contain only strings"));
                    }
                }
                (FieldKind::Number, Value::Number(_)) => {}
                (FieldKind::Enum(allowed), Value::String(s)) => {
                    match allowed.iter().find(|a| a.eq_ignore_ascii_case(s.trim())) {
                        Some(canonical) => {
                            checked.insert(field.name.clone(), Value::String(canonical.clone()));
                        }
                        None => violations.push(violation(&format!(
                            "'{s}' is not one of {}",
                            allowed.join(", ")
                        ))),
                    }
                }
                (kind, _) => violations.push(violation(&format!("expected {}", kind_name(kind)))),
            }
        }

        if violations.is_empty() {
            Ok(checked)
        } else {
            Err(violations)
        }
    }

    /// JSON description handed to collaborators
    pub fn describe(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut property = match &field.kind {
                FieldKind::String => json!({"type": "string"}),
                FieldKind::StringList => json!({"type": "array", "items": {"type": "string"}}),
                FieldKind::Number => json!({"type": "number"}),
                FieldKind::Enum(values) => json!({"type": "string", "enum": values}),
            };
            property["description"] = Value::String(field.description.clone());
            properties.insert(field.name.clone(), property);
            if field.required {
                required.push(field.name.clone());
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn kind_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "a string",
        FieldKind::StringList => "a list of strings",
        FieldKind::Number => "a number",
        FieldKind::Enum(_) => "one of the allowed strings",
    }
}

/// Typed view of an output checked against [`OutputSchema::analysis`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    pub executive_summary: String,
    pub detailed_analysis: String,
    pub top_findings: Vec<String>,
    pub rating: String,
}

impl AnalysisOutput {
    /// Read from a validated output object
    pub fn from_checked(output: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(output.clone())).ok()
    }
}
