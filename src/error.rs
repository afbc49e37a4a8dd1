use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Plan invalid: {reason}")]
    PlanInvalid { reason: String, raw: String },

    #[error("LLM Gateway error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn plan_invalid(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        AgentError::PlanInvalid {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}
