//! Bridge to the autonomous browser sub-agent.
//!
//! The sub-agent runs as an isolated Python process (its own event loop and
//! browser lifecycle) and speaks JSON over stdout: `{"result": ...}` on
//! success, `{"error": ...}` on failure.

use anyhow::Result;
use serde_json::{json, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::notify::ProgressSink;
use crate::tools::NO_PREVIOUS_OUTPUT;

const CONTEXT_HINT_MAX_CHARS: usize = 1000;

pub struct BrowserTool {
    interpreter: String,
    runner_script: PathBuf,
    timeout: Duration,
}

impl BrowserTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            interpreter: env::var("PYTHON_EXECUTABLE").unwrap_or_else(|_| "python3".to_string()),
            runner_script: env::var("BROWSER_RUNNER_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("run_browser_task.py")),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn runner_script(&self) -> &Path {
        &self.runner_script
    }

    /// Capability probe: the runner script must exist on disk.
    pub fn probe(&self) -> Result<(), String> {
        if self.runner_script.is_file() {
            Ok(())
        } else {
            Err(format!(
                "runner script not found: {}",
                self.runner_script.display()
            ))
        }
    }

    pub async fn run(
        &self,
        instruction: &str,
        context_hint: &str,
        step_limit: u32,
        model: &str,
        sink: &dyn ProgressSink,
    ) -> Result<String> {
        if !self.runner_script.is_file() {
            let msg = format!(
                "Error: Browser helper script not found: {}",
                self.runner_script.display()
            );
            sink.notify(&format!("Agent Error: {}", msg)).await;
            return Ok(msg);
        }
        if model.trim().is_empty() {
            let msg = "Error: No browser model specified.".to_string();
            sink.notify(&format!("Agent Error: {}", msg)).await;
            return Ok(msg);
        }

        let instructions = build_prompt(instruction, context_hint, step_limit);
        let payload = json!({
            "instructions": instructions,
            "model": model,
        })
        .to_string();

        sink.notify("Browser Tool: Launching isolated browser process...")
            .await;
        println!(
            "🌍 [Browser] Model: {}, Instruction: {}...",
            model,
            truncate(instruction, 100)
        );

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.runner_script).arg(&payload).kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(anyhow::anyhow!("Error launching browser process: {}", e));
            }
            Err(_) => {
                let msg = format!(
                    "Error: Browser subprocess exceeded hard timeout ({}s).",
                    self.timeout.as_secs()
                );
                sink.notify(&format!("Agent Error: {}", msg)).await;
                return Ok(msg);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            println!("--- [Browser STDERR] ---\n{}\n---", stderr);
        }

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            let mut msg = format!("Error: Browser subprocess failed (Exit: {}).", exit_code);
            if let Ok(error_data) = serde_json::from_str::<Value>(&stdout) {
                if let Some(detail) = error_data.get("error").and_then(Value::as_str) {
                    msg.push_str(&format!(" Subprocess Error: {}", detail));
                }
            } else if !stdout.is_empty() {
                msg.push_str(&format!(" Raw stdout: {}...", truncate(&stdout, 200)));
            }
            sink.notify(&format!("Agent Error: {}", msg)).await;
            return Ok(msg);
        }

        if stdout.is_empty() {
            sink.notify(
                "Agent Warning: Browser process finished successfully but produced no output.",
            )
            .await;
            return Ok("Browser action completed with no specific output.".to_string());
        }

        let result_data: Value = match serde_json::from_str(&stdout) {
            Ok(v) => v,
            Err(_) => {
                let msg = format!(
                    "Error: Browser process returned non-JSON output. Raw: {}...",
                    truncate(&stdout, 200)
                );
                sink.notify(&format!("Agent Error: {}", msg)).await;
                return Ok(msg);
            }
        };

        if let Some(err) = result_data.get("error").and_then(Value::as_str) {
            let msg = format!("Error from browser task: {}", err);
            sink.notify(&format!("Agent Error: {}...", truncate(&msg, 200)))
                .await;
            return Ok(msg);
        }

        let final_result = result_data
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("Browser task finished (no 'result' key).")
            .to_string();
        sink.notify("Browser Tool: Action completed successfully.")
            .await;
        Ok(final_result)
    }
}

/// Add the autonomy header and (when present) the threaded workflow context
/// to the user's instruction for the sub-agent.
pub fn build_prompt(instruction: &str, context_hint: &str, step_limit: u32) -> String {
    let mut header = format!(
        "You are an autonomous browser agent. Complete the user's task using browser actions. \
         Aim for ~{} actions max. If complex, gather core info & return summary.\n\
         Respond with the final answer/summary ONLY.\n",
        step_limit
    );
    if !context_hint.is_empty() && context_hint != NO_PREVIOUS_OUTPUT {
        header.push_str(&format!(
            "\n**Context from previous workflow steps (use if relevant):**\n{}\n",
            truncate(context_hint, CONTEXT_HINT_MAX_CHARS)
        ));
    }
    format!("{}\n--- USER TASK ---\n{}", header, instruction.trim())
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_step_budget_and_task() {
        let prompt = build_prompt("find the AAPL price", "previous data", 15);
        assert!(prompt.contains("~15 actions"));
        assert!(prompt.contains("--- USER TASK ---"));
        assert!(prompt.contains("find the AAPL price"));
        assert!(prompt.contains("previous data"));
    }

    #[test]
    fn placeholder_context_is_suppressed() {
        let prompt = build_prompt("task", NO_PREVIOUS_OUTPUT, 15);
        assert!(!prompt.contains("Context from previous workflow steps"));
    }

    #[test]
    fn long_context_is_truncated() {
        let long = "x".repeat(5000);
        let prompt = build_prompt("task", &long, 15);
        assert!(prompt.len() < 2000);
    }
}
