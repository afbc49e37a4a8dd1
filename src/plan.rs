//! Plan parsing and validation.
//!
//! The planner model is asked for a JSON list of tool calls, but the reply is
//! free text with no schema guarantee: it may carry markdown fences, prose
//! around the JSON, trailing commas, or a bare single object. Parsing is
//! strict first, then falls back to a structural repair pass before giving up.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AgentError;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("fence regex");
    static ref TRAILING_COMMA: Regex = Regex::new(r",\s*([\]\}])").expect("comma regex");
}

/// One planned unit of work. `tool` stays a plain string on purpose: an
/// unknown tool is a per-step failure at dispatch time, not a parse error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSpec {
    pub tool: String,
    pub description: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl StepSpec {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// String form of a parameter, accepting either a JSON string or an
    /// array of strings (the planner emits both for shell commands).
    pub fn param_text(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            other => Some(other.to_string()),
        }
    }
}

/// Parse and validate the planner's reply into an ordered step list.
pub fn parse_plan(raw: &str) -> Result<Vec<StepSpec>, AgentError> {
    let clean = strip_code_fences(raw);
    if clean.is_empty() {
        return Err(AgentError::plan_invalid("empty plan text", raw));
    }

    let parsed: Value = match serde_json::from_str(&clean) {
        Ok(v) => v,
        Err(_) => {
            let repaired = repair_json_text(&clean);
            serde_json::from_str(&repaired).map_err(|e| {
                AgentError::plan_invalid(format!("unparseable plan JSON: {}", e), raw)
            })?
        }
    };

    let items = match parsed {
        Value::Array(items) => items,
        Value::Object(map) if map.contains_key("tool") => vec![Value::Object(map)],
        other => {
            return Err(AgentError::plan_invalid(
                format!("plan is not a list of steps (got {})", value_kind(&other)),
                raw,
            ))
        }
    };

    let mut steps = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let step = step_from_value(item, index)
            .map_err(|reason| AgentError::plan_invalid(reason, raw))?;
        steps.push(step);
    }
    Ok(steps)
}

/// Validate one step object. Shared with the correction path, which applies
/// the same rules to the model's single-object reply.
pub fn step_from_value(value: Value, index: usize) -> Result<StepSpec, String> {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "step {} is not an object (got {})",
                index,
                value_kind(&other)
            ))
        }
    };

    let tool = match map.remove("tool") {
        Some(Value::String(t)) if !t.trim().is_empty() => t,
        Some(other) => return Err(format!("step {} has a non-string 'tool': {}", index, other)),
        None => return Err(format!("step {} is missing 'tool'", index)),
    };

    let description = match map.remove("description") {
        Some(Value::String(d)) if !d.trim().is_empty() => d,
        _ => synthesize_description(&tool, &map, index),
    };

    Ok(StepSpec {
        tool,
        description,
        params: map,
    })
}

/// Strip a surrounding markdown fence, if any. Inner text is left untouched.
pub fn strip_code_fences(raw: &str) -> String {
    match FENCED_BLOCK.captures(raw) {
        Some(caps) => caps[1].trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Best-effort structural repair: slice to the outermost bracket pair and
/// drop trailing commas. Handles prose-wrapped JSON and the most common
/// model formatting slips without trying to be a full JSON fixer.
pub(crate) fn repair_json_text(text: &str) -> String {
    let sliced = match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => text,
        },
    };
    TRAILING_COMMA.replace_all(sliced, "$1").into_owned()
}

fn synthesize_description(tool: &str, params: &Map<String, Value>, index: usize) -> String {
    let preview = params
        .get("command")
        .or_else(|| params.get("code"))
        .or_else(|| params.get("input"))
        .map(preview_text)
        .filter(|p| !p.is_empty());
    match preview {
        Some(p) => format!("Run {} ({}...)", tool, p),
        None => format!("Run {} step {}", tool, index + 1),
    }
}

fn preview_text(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(50).collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
