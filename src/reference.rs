//! Resolution of `${call.path}` references in call parameters
//!
//! The grammar is deliberately small: an initial call id, then any number
//! of `.field` segments into objects and `[n]` segments into arrays.
//! `${a}` splices call `a`'s entire output. A reference that is the whole
//! string keeps the referenced value's JSON type; a reference embedded in a
//! larger string interpolates the value's string form.

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Field(String),
    Index(usize),
}

/// Resolves every reference inside `parameters` against the outputs of
/// completed calls. `call_id` names the referencing call for error
/// reporting. Fails on the first reference that cannot be resolved.
pub fn resolve_parameters(
    call_id: &str,
    parameters: &Value,
    completed: &HashMap<String, Value>,
) -> Result<Value> {
    resolve_value(call_id, parameters, completed)
}

fn resolve_value(
    call_id: &str,
    value: &Value,
    completed: &HashMap<String, Value>,
) -> Result<Value> {
    match value {
        Value::String(s) => resolve_string(call_id, s, completed),
        Value::Array(items) => {
            let resolved: Result<Vec<Value>> = items
                .iter()
                .map(|item| resolve_value(call_id, item, completed))
                .collect();
            Ok(Value::Array(resolved?))
        }
        Value::Object(map) => {
            let mut resolved = serde_json::Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(call_id, item, completed)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    call_id: &str,
    s: &str,
    completed: &HashMap<String, Value>,
) -> Result<Value> {
    if !s.contains("${") {
        return Ok(Value::String(s.to_string()));
    }

    // A reference spanning the whole string splices the value as-is,
    // preserving its JSON type.
    if let Some(inner) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        if !inner.contains("${") && !inner.contains('}') {
            return lookup(call_id, inner, completed).cloned();
        }
    }

    // Otherwise interpolate each reference into the surrounding text.
    let mut result = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = match after.find('}') {
            Some(end) => end,
            None => {
                return Err(OrchestratorError::unresolved_reference(
                    call_id,
                    &rest[start..],
                    "unterminated reference",
                ));
            }
        };
        let value = lookup(call_id, &after[..end], completed)?;
        result.push_str(&value_to_string(value));
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(Value::String(result))
}

fn lookup<'a>(
    call_id: &str,
    expression: &str,
    completed: &'a HashMap<String, Value>,
) -> Result<&'a Value> {
    let reference = format!("${{{}}}", expression);

    let (target, segments) = parse_expression(expression)
        .map_err(|reason| OrchestratorError::unresolved_reference(call_id, &reference, reason))?;

    let root = completed.get(&target).ok_or_else(|| {
        OrchestratorError::unresolved_reference(
            call_id,
            &reference,
            format!("call '{}' has no recorded output", target),
        )
    })?;

    navigate(root, &segments).ok_or_else(|| {
        OrchestratorError::unresolved_reference(
            call_id,
            &reference,
            "path not found in output".to_string(),
        )
    })
}

fn parse_expression(
    expression: &str,
) -> std::result::Result<(String, Vec<PathSegment>), String> {
    let id_end = expression
        .find(|c| c == '.' || c == '[')
        .unwrap_or(expression.len());
    let call_id = &expression[..id_end];
    if call_id.is_empty() {
        return Err("missing call id".to_string());
    }

    let mut segments = Vec::new();
    let mut rest = &expression[id_end..];
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            let end = stripped
                .find(|c| c == '.' || c == '[')
                .unwrap_or(stripped.len());
            let field = &stripped[..end];
            if field.is_empty() {
                return Err("empty field segment".to_string());
            }
            segments.push(PathSegment::Field(field.to_string()));
            rest = &stripped[end..];
        } else if let Some(stripped) = rest.strip_prefix('[') {
            let end = match stripped.find(']') {
                Some(end) => end,
                None => return Err("unterminated index segment".to_string()),
            };
            let index: usize = stripped[..end]
                .parse()
                .map_err(|_| format!("invalid index '{}'", &stripped[..end]))?;
            segments.push(PathSegment::Index(index));
            rest = &stripped[end + 1..];
        } else {
            return Err(format!("unexpected character at '{}'", rest));
        }
    }

    Ok((call_id.to_string(), segments))
}

fn navigate<'a>(root: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match segment {
            PathSegment::Field(name) => current.get(name.as_str())?,
            PathSegment::Index(index) => current.get(*index)?,
        };
    }
    Some(current)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed() -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert(
            "a".to_string(),
            json!({"value": 42, "items": [{"name": "first"}, {"name": "second"}], "tag": "ready"}),
        );
        map.insert("b".to_string(), json!("plain output"));
        map
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let params = json!({"count": "${a.value}"});
        let resolved = resolve_parameters("d", &params, &completed()).unwrap();
        assert_eq!(resolved, json!({"count": 42}));
    }

    #[test]
    fn test_bare_reference_splices_entire_output() {
        let params = json!({"upstream": "${b}"});
        let resolved = resolve_parameters("d", &params, &completed()).unwrap();
        assert_eq!(resolved, json!({"upstream": "plain output"}));
    }

    #[test]
    fn test_embedded_reference_interpolates() {
        let params = json!({"message": "got ${a.value} items (${a.tag})"});
        let resolved = resolve_parameters("d", &params, &completed()).unwrap();
        assert_eq!(resolved, json!({"message": "got 42 items (ready)"}));
    }

    #[test]
    fn test_index_segments() {
        let params = json!({"second": "${a.items[1].name}"});
        let resolved = resolve_parameters("d", &params, &completed()).unwrap();
        assert_eq!(resolved, json!({"second": "second"}));
    }

    #[test]
    fn test_recursion_through_arrays_and_objects() {
        let params = json!({
            "nested": {"deep": ["${a.value}", {"inner": "${a.tag}"}]},
            "untouched": 7
        });
        let resolved = resolve_parameters("d", &params, &completed()).unwrap();
        assert_eq!(
            resolved,
            json!({
                "nested": {"deep": [42, {"inner": "ready"}]},
                "untouched": 7
            })
        );
    }

    #[test]
    fn test_unknown_call_fails() {
        let params = json!({"x": "${ghost.value}"});
        let err = resolve_parameters("d", &params, &completed()).unwrap_err();
        match err {
            OrchestratorError::UnresolvedReference {
                call_id,
                reference,
                reason,
            } => {
                assert_eq!(call_id, "d");
                assert_eq!(reference, "${ghost.value}");
                assert!(reason.contains("no recorded output"));
            }
            other => panic!("expected unresolved reference, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_path_fails() {
        let params = json!({"x": "${a.nope.deeper}"});
        let err = resolve_parameters("d", &params, &completed()).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::UnresolvedReference { .. }
        ));
    }

    #[test]
    fn test_out_of_bounds_index_fails() {
        let params = json!({"x": "${a.items[9].name}"});
        assert!(resolve_parameters("d", &params, &completed()).is_err());
    }

    #[test]
    fn test_malformed_references_fail() {
        for bad in [
            "${a.items[x]}",
            "${a..value}",
            "${.value}",
            "${a.items[1}",
            "prefix ${a.value",
        ] {
            let params = json!({ "x": bad });
            assert!(
                resolve_parameters("d", &params, &completed()).is_err(),
                "expected failure for {}",
                bad
            );
        }
    }

    #[test]
    fn test_plain_values_pass_through() {
        let params = json!({"x": "no references here", "y": 3, "z": null});
        let resolved = resolve_parameters("d", &params, &completed()).unwrap();
        assert_eq!(resolved, params);
    }

    #[test]
    fn test_multiple_references_in_one_string() {
        let params = json!("${a.value}-${a.items[0].name}");
        let resolved = resolve_parameters("d", &params, &completed()).unwrap();
        assert_eq!(resolved, json!("42-first"));
    }
}
