//! Runtime configuration for the agent workflow loop.
//!
//! Everything here is resolved once at startup from the environment; the
//! retry ceiling and failure keyword set are knobs rather than hard-coded
//! behavior because different deployments tune them differently.

use std::env;

/// Workflow-level limits and classification knobs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Extra correction attempts beyond the first try of a step.
    pub max_retries: u32,
    /// Global ceiling on executed steps per workflow run.
    pub max_workflow_steps: usize,
    /// Step budget suggested to the autonomous browser sub-agent.
    pub browser_step_limit: u32,
    /// Substrings that mark a tool result as failed when no exit code is present.
    pub failure_keywords: Vec<String>,
    pub shell_timeout_secs: u64,
    pub code_timeout_secs: u64,
    pub browser_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_workflow_steps: 10,
            browser_step_limit: 15,
            failure_keywords: [
                "error:", "fail", "except", "trace", "timeout", "denied", "not found",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            shell_timeout_secs: 15,
            code_timeout_secs: 60,
            browser_timeout_secs: 240,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_u32("AGENT_MAX_RETRIES", defaults.max_retries),
            max_workflow_steps: env_u32(
                "AGENT_MAX_WORKFLOW_STEPS",
                defaults.max_workflow_steps as u32,
            ) as usize,
            browser_step_limit: env_u32("BROWSER_STEP_LIMIT", defaults.browser_step_limit),
            failure_keywords: env::var("AGENT_FAILURE_KEYWORDS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|k| k.trim().to_lowercase())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.failure_keywords),
            shell_timeout_secs: env_u64("SHELL_TIMEOUT_SECS", defaults.shell_timeout_secs),
            code_timeout_secs: env_u64("CODE_TIMEOUT_SECS", defaults.code_timeout_secs),
            browser_timeout_secs: env_u64("BROWSER_TIMEOUT_SECS", defaults.browser_timeout_secs),
        }
    }
}

/// Per-run model selection. Explicit construction state, not process globals:
/// each connection carries its own choices and can swap them between queries.
#[derive(Debug, Clone)]
pub struct RunModels {
    pub planner: String,
    pub browser: String,
    pub code: String,
}

impl RunModels {
    pub fn from_env() -> Self {
        Self {
            planner: env::var("PLANNING_TOOLING_MODEL")
                .unwrap_or_else(|_| "llama3:latest".to_string()),
            browser: env::var("BROWSER_AGENT_INTERNAL_MODEL")
                .unwrap_or_else(|_| "qwen2.5:7b".to_string()),
            code: env::var("DEEPCODER_MODEL").unwrap_or_else(|_| "deepcoder:latest".to_string()),
        }
    }
}

pub fn env_u32(key: &str, default_val: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

pub fn env_u64(key: &str, default_val: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

pub fn env_bool(key: &str, default_val: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => default_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_workflow_contract() {
        let config = AgentConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_workflow_steps, 10);
        assert!(config.failure_keywords.contains(&"error:".to_string()));
        assert!(config.failure_keywords.contains(&"not found".to_string()));
    }

    #[test]
    fn env_bool_accepts_common_truthy_values() {
        assert!(!env_bool("AGENT_CONFIG_TEST_UNSET", false));
        assert!(env_bool("AGENT_CONFIG_TEST_UNSET", true));
    }
}
