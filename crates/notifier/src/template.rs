//! Message templates.
//!
//! Templates use Go-style field actions: `{{.SiteName}}`, `{{.project.name}}`.
//! A template is compiled once when its worker is constructed and rendered
//! against any `Serialize` payload. Fields are looked up in the payload's
//! JSON form, so their names follow the payload's serde names.
//!
//! Rendering never panics: a missing or null field, or a payload that fails
//! to serialize, is a [`TemplateError`] and the caller drops that message.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use chatwatch_common::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template {template}: unclosed action starting at byte {offset}")]
    Unclosed { template: String, offset: usize },

    #[error("template {template}: unsupported action {action:?}")]
    UnsupportedAction { template: String, action: String },

    #[error("template {template}: payload has no value at .{path}")]
    MissingField { template: String, path: String },

    #[error("template {template}: payload could not be serialized: {reason}")]
    Payload { template: String, reason: String },
}

impl From<TemplateError> for AppError {
    fn from(err: TemplateError) -> Self {
        AppError::Template(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Vec<String>),
}

/// A compiled message template. Immutable once built.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    name: String,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    pub fn compile(name: &str, source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open.find("}}").ok_or_else(|| TemplateError::Unclosed {
                template: name.to_string(),
                offset: offset + start,
            })?;
            let action = after_open[..end].trim();
            segments.push(Segment::Field(parse_field(name, action)?));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            segments,
        })
    }

    /// Compile `configured`, or `default` when nothing is configured.
    pub fn compile_or_default(
        name: &str,
        configured: &str,
        default: &str,
    ) -> Result<Self, TemplateError> {
        if configured.trim().is_empty() {
            Self::compile(name, default)
        } else {
            Self::compile(name, configured)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field paths the template reads, dotted, in order of appearance.
    pub fn field_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(path) => Some(path.join(".")),
            Segment::Literal(_) => None,
        })
    }

    pub fn render<T: Serialize>(&self, payload: &T) -> Result<String, TemplateError> {
        let value = serde_json::to_value(payload).map_err(|e| TemplateError::Payload {
            template: self.name.clone(),
            reason: e.to_string(),
        })?;

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(path) => {
                    let field = lookup(&value, path).ok_or_else(|| TemplateError::MissingField {
                        template: self.name.clone(),
                        path: path.join("."),
                    })?;
                    match field {
                        Value::String(s) => out.push_str(s),
                        Value::Number(n) => out.push_str(&n.to_string()),
                        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                        other => out.push_str(&other.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}

fn parse_field(template: &str, action: &str) -> Result<Vec<String>, TemplateError> {
    let unsupported = || TemplateError::UnsupportedAction {
        template: template.to_string(),
        action: action.to_string(),
    };

    let path = action.strip_prefix('.').ok_or_else(unsupported)?;
    let parts: Vec<String> = path.split('.').map(str::to_string).collect();
    let valid = parts.iter().all(|part| {
        !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
    if !valid {
        return Err(unsupported());
    }
    Ok(parts)
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.as_object()?.get(key)?;
    }
    (!current.is_null()).then_some(current)
}
