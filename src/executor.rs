//! Single-step execution: dispatch, classification, self-correction.
//!
//! Each step runs through a small state machine (pending → attempting →
//! succeeded | failed). A failed attempt with retries remaining goes back to
//! the planner model for a corrected call; the corrected spec replaces the
//! active one and the loop continues. Tool-side errors never propagate past
//! here; they become failure-classified result text.

use serde_json::Value;
use std::sync::Arc;

use crate::config::{AgentConfig, RunModels};
use crate::correction;
use crate::llm_gateway::Completion;
use crate::notify::ProgressSink;
use crate::plan::StepSpec;
use crate::tool_output::{assess, parse_tool_output};
use crate::tools::{ToolCall, ToolDispatcher, ToolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Succeeded,
    Failed,
}

#[derive(Debug)]
pub struct StepOutcome {
    /// The spec that actually ran last (post-correction).
    pub final_spec: StepSpec,
    /// Raw result text of the last attempt.
    pub result: String,
    pub state: StepState,
}

enum Prepared {
    Call(ToolCall),
    /// Local failure eligible for the normal correction path.
    LocalFailure(String),
    /// Unknown tool: terminal for the step, no dispatch, no correction.
    UnknownTool(String),
}

pub struct StepExecutor {
    llm: Arc<dyn Completion>,
    tools: Arc<dyn ToolDispatcher>,
    config: Arc<AgentConfig>,
    models: RunModels,
}

impl StepExecutor {
    pub fn new(
        llm: Arc<dyn Completion>,
        tools: Arc<dyn ToolDispatcher>,
        config: Arc<AgentConfig>,
        models: RunModels,
    ) -> Self {
        Self {
            llm,
            tools,
            config,
            models,
        }
    }

    pub async fn execute(
        &self,
        spec: &StepSpec,
        thread_input: &str,
        sink: &dyn ProgressSink,
    ) -> StepOutcome {
        let mut current = spec.clone();
        let mut attempt: u32 = 0;

        loop {
            let params_json =
                serde_json::to_string_pretty(&Value::Object(current.params.clone()))
                    .unwrap_or_else(|_| "{}".to_string());
            sink.notify(&format!("Tool Input ({}): {}", current.tool, params_json))
                .await;
            println!(
                "▶️ Executing try {} of '{}' via {}",
                attempt + 1,
                current.description,
                current.tool
            );

            let result_text = match self.prepare(&current, thread_input) {
                Prepared::UnknownTool(msg) => {
                    sink.notify(&format!("Agent Error: {}", msg)).await;
                    return StepOutcome {
                        final_spec: current,
                        result: msg,
                        state: StepState::Failed,
                    };
                }
                Prepared::LocalFailure(msg) => msg,
                Prepared::Call(call) => match self.tools.dispatch(call, sink).await {
                    Ok(text) => text,
                    Err(e) => format!("Error: Tool exception: {}", e),
                },
            };

            sink.notify(&format!(
                "Tool Output (Try {}):\n```\n{}\n```",
                attempt + 1,
                result_text
            ))
            .await;

            let parsed = parse_tool_output(&result_text);
            let verdict = assess(&parsed, &self.config.failure_keywords);
            println!(
                "   Try {}: exit={:?} failed={}",
                attempt + 1,
                parsed.exit_code,
                verdict.failed
            );

            if !verdict.failed {
                return StepOutcome {
                    final_spec: current,
                    result: result_text,
                    state: StepState::Succeeded,
                };
            }

            sink.notify(&format!("Agent: Step error (Try {}).", attempt + 1))
                .await;

            let fixed = correction::negotiate(
                self.llm.as_ref(),
                &self.models.planner,
                &current,
                &result_text,
                attempt,
                self.config.max_retries,
                &self.config.failure_keywords,
                sink,
            )
            .await;

            match fixed {
                Some(corrected) => {
                    sink.notify(&format!(
                        "Agent: Applying correction (Try {})...",
                        attempt + 2
                    ))
                    .await;
                    current = corrected;
                    attempt += 1;
                }
                None => {
                    return StepOutcome {
                        final_spec: current,
                        result: result_text,
                        state: StepState::Failed,
                    };
                }
            }
        }
    }

    /// Build the concrete tool invocation for the active spec. This is where
    /// the previous step's output gets threaded into the next call.
    fn prepare(&self, spec: &StepSpec, thread_input: &str) -> Prepared {
        let kind = match ToolKind::from_name(&spec.tool) {
            Some(kind) => kind,
            None => {
                return Prepared::UnknownTool(format!("Error: Unknown tool '{}'.", spec.tool))
            }
        };
        if let Err(reason) = self.tools.availability(kind) {
            return Prepared::LocalFailure(format!(
                "Error: Tool '{}' unavailable: {}",
                kind.name(),
                reason
            ));
        }

        match kind {
            ToolKind::Shell => {
                let raw = match spec.param_text("command") {
                    Some(raw) if !raw.trim().is_empty() => raw,
                    _ => return Prepared::LocalFailure("Error: Missing 'command'".to_string()),
                };
                match shlex::split(&raw) {
                    Some(tokens) if !tokens.is_empty() => {
                        let command_line = shlex::try_join(tokens.iter().map(String::as_str))
                            .unwrap_or(raw);
                        Prepared::Call(ToolCall::Shell { command_line })
                    }
                    _ => Prepared::LocalFailure(format!("Error parsing command: {}", raw)),
                }
            }
            ToolKind::Code => {
                let code = match spec.param("code").and_then(Value::as_str) {
                    Some(code) if !code.trim().is_empty() => code,
                    _ => return Prepared::LocalFailure("Error: Missing 'code'".to_string()),
                };
                let safe_prev = thread_input.replace("\"\"\"", "\\\"\\\"\\\"");
                let source = format!(
                    "previous_step_result = \"\"\"{}\"\"\"\n\n{}",
                    safe_prev, code
                );
                println!("   [Inject] Previous result len {}.", thread_input.len());
                Prepared::Call(ToolCall::Code {
                    source,
                    model: self.models.code.clone(),
                })
            }
            ToolKind::Browser => {
                let instruction = spec
                    .param("input")
                    .or_else(|| spec.param("browser_input"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if instruction.trim().is_empty() {
                    return Prepared::LocalFailure("Error: Missing 'input'".to_string());
                }
                Prepared::Call(ToolCall::Browser {
                    instruction: instruction.to_string(),
                    context_hint: thread_input.to_string(),
                    step_limit: self.config.browser_step_limit,
                    model: self.models.browser.clone(),
                })
            }
        }
    }
}
