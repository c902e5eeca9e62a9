//! Step input templates
//!
//! Strings inside a step's `input` may reference the workflow input or the
//! result of an earlier step:
//!
//! - `{{input}}` / `{{input.applicant.name}}`
//! - `{{steps.business_license.result.license_id}}`
//!
//! A string that is exactly one placeholder is replaced by the referenced
//! JSON value (objects stay objects). Placeholders embedded in longer text
//! are substituted as text.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unresolved template reference: {0}")]
    Unresolved(String),

    #[error("malformed template reference: {0}")]
    Malformed(String),
}

/// A parsed `{{...}}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Input(Vec<String>),
    StepResult { step: String, path: Vec<String> },
}

impl Reference {
    pub fn parse(expr: &str) -> Result<Self, TemplateError> {
        let parts: Vec<String> = expr.trim().split('.').map(str::to_string).collect();
        match parts.first().map(String::as_str) {
            Some("input") => Ok(Reference::Input(parts[1..].to_vec())),
            Some("steps") if parts.len() >= 3 && parts[2] == "result" => Ok(Reference::StepResult {
                step: parts[1].clone(),
                path: parts[3..].to_vec(),
            }),
            _ => Err(TemplateError::Malformed(expr.trim().to_string())),
        }
    }
}

/// Values a template can draw from.
pub struct TemplateContext<'a> {
    input: &'a Value,
    step_results: HashMap<&'a str, &'a Value>,
}

impl<'a> TemplateContext<'a> {
    pub fn new(input: &'a Value) -> Self {
        Self {
            input,
            step_results: HashMap::new(),
        }
    }

    pub fn with_result(mut self, step: &'a str, result: &'a Value) -> Self {
        self.step_results.insert(step, result);
        self
    }

    pub fn insert_result(&mut self, step: &'a str, result: &'a Value) {
        self.step_results.insert(step, result);
    }

    fn resolve(&self, expr: &str) -> Result<&'a Value, TemplateError> {
        let unresolved = || TemplateError::Unresolved(expr.trim().to_string());
        let (root, path) = match Reference::parse(expr)? {
            Reference::Input(path) => (self.input, path),
            Reference::StepResult { step, path } => (
                *self.step_results.get(step.as_str()).ok_or_else(unresolved)?,
                path,
            ),
        };
        walk(root, &path).ok_or_else(unresolved)
    }
}

fn walk<'v>(mut value: &'v Value, path: &[String]) -> Option<&'v Value> {
    for segment in path {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Split a string into literal text and `{{...}}` expressions.
enum Piece<'s> {
    Text(&'s str),
    Expr(&'s str),
}

fn pieces(s: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        if start > 0 {
            out.push(Piece::Text(&rest[..start]));
        }
        out.push(Piece::Expr(&rest[start + 2..start + 2 + len]));
        rest = &rest[start + 2 + len + 2..];
    }
    if !rest.is_empty() {
        out.push(Piece::Text(rest));
    }
    out
}

fn render_string(s: &str, ctx: &TemplateContext<'_>) -> Result<Value, TemplateError> {
    let parts = pieces(s);
    if let [Piece::Expr(expr)] = parts.as_slice() {
        return ctx.resolve(expr).cloned();
    }
    let mut rendered = String::with_capacity(s.len());
    for piece in parts {
        match piece {
            Piece::Text(text) => rendered.push_str(text),
            Piece::Expr(expr) => match ctx.resolve(expr)? {
                Value::String(text) => rendered.push_str(text),
                Value::Null => {}
                other => rendered.push_str(&other.to_string()),
            },
        }
    }
    Ok(Value::String(rendered))
}

pub fn render(template: &Value, ctx: &TemplateContext<'_>) -> Result<Value, TemplateError> {
    match template {
        Value::String(s) => render_string(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| render(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), render(value, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Render a text template (used for `classify` step targets).
pub fn render_text(template: &str, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
    match render_string(template, ctx)? {
        Value::String(text) => Ok(text),
        other => Ok(other.to_string()),
    }
}

/// Every reference in a template, for start-time validation.
pub fn references(template: &Value) -> Result<Vec<Reference>, TemplateError> {
    let mut out = Vec::new();
    collect_references(template, &mut out)?;
    Ok(out)
}

pub fn text_references(template: &str) -> Result<Vec<Reference>, TemplateError> {
    references(&Value::String(template.to_string()))
}

fn collect_references(template: &Value, out: &mut Vec<Reference>) -> Result<(), TemplateError> {
    match template {
        Value::String(s) => {
            for piece in pieces(s) {
                if let Piece::Expr(expr) = piece {
                    out.push(Reference::parse(expr)?);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out)?;
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                collect_references(value, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_placeholder_keeps_json_type() {
        let input = json!({"applicant": {"name": "Ana", "age": 41}});
        let ctx = TemplateContext::new(&input);
        let rendered = render(&json!({"who": "{{input.applicant}}"}), &ctx).unwrap();
        assert_eq!(rendered, json!({"who": {"name": "Ana", "age": 41}}));
    }

    #[test]
    fn test_embedded_placeholders_render_as_text() {
        let input = json!({"name": "Ana's Tacos"});
        let license = json!({"license_id": "BL-77"});
        let ctx = TemplateContext::new(&input).with_result("license", &license);
        let rendered = render(
            &json!("Zoning for {{input.name}} under {{ steps.license.result.license_id }}"),
            &ctx,
        )
        .unwrap();
        assert_eq!(rendered, json!("Zoning for Ana's Tacos under BL-77"));
    }

    #[test]
    fn test_array_index_path() {
        let input = json!({"addresses": ["12 Main St", "4 Elm St"]});
        let ctx = TemplateContext::new(&input);
        assert_eq!(
            render(&json!("{{input.addresses.1}}"), &ctx).unwrap(),
            json!("4 Elm St")
        );
    }

    #[test]
    fn test_missing_reference_is_error() {
        let input = json!({});
        let ctx = TemplateContext::new(&input);
        assert_eq!(
            render(&json!("{{steps.zoning.result.id}}"), &ctx),
            Err(TemplateError::Unresolved("steps.zoning.result.id".to_string()))
        );
    }

    #[test]
    fn test_malformed_reference() {
        assert!(matches!(
            references(&json!("{{env.HOME}}")),
            Err(TemplateError::Malformed(_))
        ));
    }

    #[test]
    fn test_unclosed_braces_are_literal() {
        let input = json!({});
        let ctx = TemplateContext::new(&input);
        assert_eq!(render(&json!("a {{ b"), &ctx).unwrap(), json!("a {{ b"));
    }

    #[test]
    fn test_collects_step_references() {
        let refs = references(&json!({
            "a": "{{steps.license.result.id}}",
            "b": ["{{input.name}}"]
        }))
        .unwrap();
        assert!(refs.contains(&Reference::StepResult {
            step: "license".to_string(),
            path: vec!["id".to_string()]
        }));
        assert!(refs.contains(&Reference::Input(vec!["name".to_string()])));
    }
}
