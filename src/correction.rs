//! Self-correction negotiation for failed steps.
//!
//! When a step fails with attempts remaining, the planner model is shown the
//! failing call, the failure reason and the raw tool output, and asked for
//! exactly one corrected call. Everything about this path fails soft: an
//! empty reply, a transport error or an invalid object all mean "no
//! correction", which the executor treats the same as exhausted retries.

use serde_json::Value;

use crate::llm_gateway::Completion;
use crate::notify::ProgressSink;
use crate::plan::{step_from_value, strip_code_fences, StepSpec};
use crate::prompts;
use crate::tool_output::{assess, parse_tool_output};

pub async fn negotiate(
    llm: &dyn Completion,
    planner_model: &str,
    spec: &StepSpec,
    result_text: &str,
    attempt: u32,
    max_retries: u32,
    keywords: &[String],
    sink: &dyn ProgressSink,
) -> Option<StepSpec> {
    let parsed = parse_tool_output(result_text);
    let verdict = assess(&parsed, keywords);
    if !verdict.failed {
        return None;
    }
    if attempt >= max_retries {
        sink.notify(&format!(
            "Agent: Step failed, max retries ({}) reached.",
            max_retries
        ))
        .await;
        return None;
    }

    let reason = verdict.reason_text();
    let spec_json =
        serde_json::to_string_pretty(spec).unwrap_or_else(|_| "<unserializable step>".to_string());
    let prompt = prompts::build_correction_prompt(
        &spec.description,
        &spec_json,
        &reason,
        &parsed.raw,
        attempt,
        max_retries,
    );

    sink.notify(&format!(
        "Agent: Reviewing failure ({}. Try {})...",
        reason,
        attempt + 1
    ))
    .await;

    let reply = match llm
        .complete(planner_model, &prompt, Some(prompts::SYSTEM_PROMPT))
        .await
    {
        Ok(Some(text)) => text,
        Ok(None) => {
            sink.notify("Warn: LLM gave no correction.").await;
            return None;
        }
        Err(e) => {
            sink.notify(&format!("Warn: Correction request failed: {}", e))
                .await;
            return None;
        }
    };

    match validate_correction(&reply, spec) {
        Ok(fixed) => {
            sink.notify("Agent: Received potential correction.").await;
            Some(fixed)
        }
        Err(reason) => {
            sink.notify(&format!(
                "Error parsing correction: {}\nRaw: {}",
                reason, reply
            ))
            .await;
            None
        }
    }
}

/// Same structural rules as the plan parser's single-object path; a missing
/// description is inherited from the step being corrected.
fn validate_correction(reply: &str, original: &StepSpec) -> Result<StepSpec, String> {
    let clean = strip_code_fences(reply);
    if clean.is_empty() {
        return Err("empty correction".to_string());
    }
    let value: Value = serde_json::from_str(&clean)
        .or_else(|_| serde_json::from_str(&crate::plan::repair_json_text(&clean)))
        .map_err(|e| format!("correction is not valid JSON: {}", e))?;

    let mut map = match value {
        Value::Object(map) => map,
        other => return Err(format!("correction is not an object: {}", other)),
    };
    if !map.contains_key("tool") {
        return Err("correction is missing 'tool'".to_string());
    }
    let has_description = map
        .get("description")
        .and_then(Value::as_str)
        .map(|d| !d.trim().is_empty())
        .unwrap_or(false);
    if !has_description {
        map.insert(
            "description".to_string(),
            Value::String(original.description.clone()),
        );
    }
    step_from_value(Value::Object(map), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedCompletion {
        replies: Mutex<Vec<Option<String>>>,
        pub calls: Mutex<u32>,
    }

    impl ScriptedCompletion {
        fn new(replies: Vec<Option<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Completion for ScriptedCompletion {
        async fn complete(
            &self,
            _model: &str,
            _prompt: &str,
            _system: Option<&str>,
        ) -> Result<Option<String>> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(None)
            } else {
                Ok(replies.remove(0))
            }
        }
    }

    fn failing_step() -> StepSpec {
        crate::plan::parse_plan(r#"[{"tool": "shell_terminal", "description": "list files", "command": ["ls", "/nope"]}]"#)
            .unwrap()
            .remove(0)
    }

    fn keywords() -> Vec<String> {
        crate::config::AgentConfig::default().failure_keywords
    }

    #[tokio::test]
    async fn returns_corrected_step() {
        let llm = ScriptedCompletion::new(vec![Some(
            "```json\n{\"tool\": \"shell_terminal\", \"description\": \"list current dir\", \"command\": [\"ls\", \".\"]}\n```".to_string(),
        )]);
        let fixed = negotiate(
            &llm,
            "llama3:latest",
            &failing_step(),
            "Exit Code: 2\nErrors:\nls: /nope: No such file or directory",
            0,
            2,
            &keywords(),
            &NullSink,
        )
        .await
        .expect("correction expected");
        assert_eq!(fixed.description, "list current dir");
        assert_eq!(fixed.param_text("command").unwrap(), "ls .");
    }

    #[tokio::test]
    async fn inherits_description_when_missing() {
        let llm = ScriptedCompletion::new(vec![Some(
            r#"{"tool": "shell_terminal", "command": ["ls"]}"#.to_string(),
        )]);
        let fixed = negotiate(
            &llm,
            "llama3:latest",
            &failing_step(),
            "Exit Code: 1",
            0,
            2,
            &keywords(),
            &NullSink,
        )
        .await
        .expect("correction expected");
        assert_eq!(fixed.description, "list files");
    }

    #[tokio::test]
    async fn no_reply_means_no_correction() {
        let llm = ScriptedCompletion::new(vec![None]);
        let result = negotiate(
            &llm,
            "llama3:latest",
            &failing_step(),
            "Exit Code: 1",
            0,
            2,
            &keywords(),
            &NullSink,
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn invalid_reply_means_no_correction() {
        let llm = ScriptedCompletion::new(vec![Some("sorry, cannot help".to_string())]);
        let result = negotiate(
            &llm,
            "llama3:latest",
            &failing_step(),
            "Exit Code: 1",
            0,
            2,
            &keywords(),
            &NullSink,
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn exhausted_attempts_skip_the_model() {
        let llm = ScriptedCompletion::new(vec![Some(
            r#"{"tool": "shell_terminal", "command": ["ls"]}"#.to_string(),
        )]);
        let result = negotiate(
            &llm,
            "llama3:latest",
            &failing_step(),
            "Exit Code: 1",
            2,
            2,
            &keywords(),
            &NullSink,
        )
        .await;
        assert!(result.is_none());
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn successful_result_needs_no_correction() {
        let llm = ScriptedCompletion::new(vec![]);
        let result = negotiate(
            &llm,
            "llama3:latest",
            &failing_step(),
            "Exit Code: 0\nOutput:\nfine",
            0,
            2,
            &keywords(),
            &NullSink,
        )
        .await;
        assert!(result.is_none());
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }
}
