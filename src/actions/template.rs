//! `{{dotted.path}}` interpolation against a closed context object
//!
//! Lookups only, no expression evaluation. Unknown paths render as the
//! empty string.

use serde_json::Value;
use tracing::debug;

/// Resolve a dot-separated path inside the context.
pub fn get_nested_value<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Replace every `{{path}}` placeholder in the template string.
pub fn interpolate(template: &str, context: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let path = after[..end].trim();
                match get_nested_value(context, path) {
                    Some(value) => out.push_str(&value_to_string(value)),
                    None => {
                        debug!(path, "template path not found in context");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder, emit literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Interpolate every string leaf of a JSON template.
pub fn interpolate_value(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => Value::String(interpolate(s, context)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, context))
                .collect(),
        ),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "incident": {
                "id": "inc-1",
                "title": "High CPU",
                "severity": "CRITICAL",
                "alert_count": 3
            },
            "team": {"id": "team-1"}
        })
    }

    #[test]
    fn interpolates_nested_paths() {
        let out = interpolate("[{{incident.severity}}] {{incident.title}}", &context());
        assert_eq!(out, "[CRITICAL] High CPU");
    }

    #[test]
    fn missing_paths_become_empty() {
        let out = interpolate("x={{incident.nope}};y={{unknown.path}}", &context());
        assert_eq!(out, "x=;y=");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let out = interpolate("count={{incident.alert_count}}", &context());
        assert_eq!(out, "count=3");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let out = interpolate("broken {{incident.title", &context());
        assert_eq!(out, "broken {{incident.title");
    }

    #[test]
    fn interpolates_json_templates_recursively() {
        let template = json!({
            "text": "{{incident.title}}",
            "nested": {"severity": "{{incident.severity}}"},
            "list": ["{{team.id}}"],
            "number": 7
        });
        let out = interpolate_value(&template, &context());
        assert_eq!(
            out,
            json!({
                "text": "High CPU",
                "nested": {"severity": "CRITICAL"},
                "list": ["team-1"],
                "number": 7
            })
        );
    }
}
