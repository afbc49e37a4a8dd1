//! Prompt templates for planning, self-correction and final summarization.

/// Guides the planner model for both planning and self-correction.
pub const SYSTEM_PROMPT: &str = r#"
<role>
You are 'Agent', a highly autonomous AI assistant. You achieve the user's
request by planning a sequence of tool calls, executing them, rigorously
checking each result, and correcting failed calls. The final result is
validated and synthesized in a separate step after your plan completes.
</role>

<capabilities>
You have access to the following tools:
1. `shell_terminal`: Executes whitelisted shell commands. Use for file ops and system info.
   - Parameters: {"command": ["list", "of", "strings"]}
   - Output Format: String containing "Exit Code: X", "Output:\n...", "Errors:\n...".
2. `code_interpreter`: Executes Python code snippets. Handles ModuleNotFoundError automatically.
   - Parameters: {"code": "python code as single JSON string"}
   - Input Context: The previous successful step's result is available in a predefined
     Python string variable named `previous_step_result`. Your generated code MUST use
     that variable name when it needs earlier results.
   - Output Format: String containing "Exit Code: X", "Output:\n...", "Error:\n...".
   - CRITICAL: the `code` value must be a valid JSON string with internal characters
     properly escaped ("\n", "\\", "\"").
3. `browser`: Interacts with web pages via an autonomous browser sub-agent. Takes a
   natural language instruction. If the URL is unknown, instruct it to search first.
   - Parameters: {"input": "clear instruction for the browser task"}
   - Output Format: String containing the summary or result, or a message starting with "Error:".
</capabilities>

<workflow>
1. Understand the user's objective.
2. Plan: output a JSON list of steps. Each step MUST include `tool`, `description`,
   and the tool-specific parameters.
3. After each execution the output is checked: a non-zero Exit Code means failure,
   and error keywords (Error:, failed, exception, timeout) are treated as failure
   when no exit code is present.
4. When asked to correct a failed step, output exactly ONE corrected JSON tool call.
5. The workflow stops if a step keeps failing after its retries.
</workflow>

<output_format_planning>
Output ONLY a valid JSON list of steps. No markdown fences, no commentary.
</output_format_planning>

<output_format_correction>
Output ONLY the single, valid JSON object for the corrected tool call
(`tool`, `description`, params...). No explanations.
</output_format_correction>
"#;

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are summarizing and validating the final output of an AI agent workflow.";

pub fn build_planning_prompt(user_query: &str, max_steps: usize) -> String {
    format!(
        "Req: '{query}'\n\
         Plan as JSON list [{{\"tool\": t, \"description\": d, params...}}]. \
         Tools: shell_terminal, code_interpreter, browser.\n\
         CRITICAL: Escape Python code for JSON ('\\n', '\\\\', '\\\"').\n\
         Code context: Previous step result in string var `previous_step_result`.\n\
         Aim for ~{max_steps} steps. Final step must present the result. Output ONLY the JSON list.",
        query = user_query,
        max_steps = max_steps
    )
}

pub fn build_correction_prompt(
    description: &str,
    spec_json: &str,
    reason: &str,
    raw_output: &str,
    attempt: u32,
    max_retries: u32,
) -> String {
    format!(
        "Failed step {try_no}/{max_retries}:\n\
         Task: {description}\n\
         Call:\n```json\n{spec_json}\n```\n\
         Reason: {reason}\n\
         Output:\n```\n{raw_output}\n```\n\n\
         Provide ONLY the corrected JSON tool call.",
        try_no = attempt + 1,
        max_retries = max_retries,
        description = description,
        spec_json = spec_json,
        reason = reason,
        raw_output = raw_output,
    )
}

pub fn build_final_check_prompt(user_query: &str, last_output: &str) -> String {
    format!(
        "Original user query: '{query}'\n\n\
         The final result obtained by the agent's tools is:\n```\n{result}\n```\n\n\
         Based on the original query and the final result obtained, please provide the \
         definitive final answer for the user. Format it clearly. If the result seems \
         incomplete or doesn't fully answer the query, state that clearly instead of \
         hallucinating. Directly output the final answer or assessment.",
        query = user_query,
        result = last_output
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_prompt_names_the_tools() {
        let prompt = build_planning_prompt("list my files", 10);
        assert!(prompt.contains("shell_terminal"));
        assert!(prompt.contains("code_interpreter"));
        assert!(prompt.contains("browser"));
        assert!(prompt.contains("list my files"));
    }

    #[test]
    fn correction_prompt_carries_failure_context() {
        let prompt = build_correction_prompt(
            "list files",
            r#"{"tool":"shell_terminal"}"#,
            "Non-zero exit (2)",
            "Exit Code: 2",
            0,
            2,
        );
        assert!(prompt.contains("Failed step 1/2"));
        assert!(prompt.contains("Non-zero exit (2)"));
        assert!(prompt.contains("Exit Code: 2"));
    }
}
