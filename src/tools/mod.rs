//! Tool collaborators: shell, code interpreter, browser.
//!
//! Each tool accepts a structured invocation and returns free text in the
//! shared `Exit Code:` / `Output:` / `Errors:` convention (or an `Error: ...`
//! line), so the classifier can parse every tool's result uniformly.
//! Availability is probed once at registry construction; a step targeting a
//! missing capability gets a structured "tool unavailable" failure instead of
//! a silent stub.

pub mod browser;
pub mod code;
pub mod shell;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::AgentConfig;
use crate::notify::ProgressSink;
pub use browser::BrowserTool;
pub use code::CodeTool;
pub use shell::ShellTool;

/// Placeholder threaded into the first step, before any output exists.
pub const NO_PREVIOUS_OUTPUT: &str = "No output from previous steps.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Shell,
    Code,
    Browser,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "shell_terminal" => Some(ToolKind::Shell),
            "code_interpreter" => Some(ToolKind::Code),
            "browser" => Some(ToolKind::Browser),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Shell => "shell_terminal",
            ToolKind::Code => "code_interpreter",
            ToolKind::Browser => "browser",
        }
    }
}

/// A fully prepared invocation. The executor does the per-tool prep work
/// (command normalization, context injection, prompt assembly inputs) before
/// handing off here.
#[derive(Debug, Clone)]
pub enum ToolCall {
    Shell {
        command_line: String,
    },
    Code {
        source: String,
        model: String,
    },
    Browser {
        instruction: String,
        context_hint: String,
        step_limit: u32,
        model: String,
    },
}

impl ToolCall {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::Shell { .. } => ToolKind::Shell,
            ToolCall::Code { .. } => ToolKind::Code,
            ToolCall::Browser { .. } => ToolKind::Browser,
        }
    }
}

/// Dispatch seam between the step executor and the concrete tools.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Err carries the human-readable reason the capability is missing.
    fn availability(&self, kind: ToolKind) -> Result<(), String>;

    /// May fail on infrastructure problems; the executor converts such
    /// errors into failure-classified result text.
    async fn dispatch(&self, call: ToolCall, sink: &dyn ProgressSink) -> Result<String>;
}

pub struct ToolRegistry {
    shell: ShellTool,
    code: CodeTool,
    browser: BrowserTool,
    code_unavailable: Option<String>,
    browser_unavailable: Option<String>,
}

impl ToolRegistry {
    /// Build the registry and probe each capability once.
    pub async fn probe(config: &AgentConfig) -> Self {
        let shell = ShellTool::new(config.shell_timeout_secs);
        let code = CodeTool::new(config.code_timeout_secs);
        let browser = BrowserTool::new(config.browser_timeout_secs);

        let code_unavailable = code.probe().await.err();
        match &code_unavailable {
            None => println!("✅ code_interpreter ready ({})", code.interpreter()),
            Some(reason) => println!("⚠️ code_interpreter unavailable: {}", reason),
        }
        let browser_unavailable = browser.probe().err();
        match &browser_unavailable {
            None => println!("✅ browser runner ready ({})", browser.runner_script().display()),
            Some(reason) => println!("⚠️ browser unavailable: {}", reason),
        }

        Self {
            shell,
            code,
            browser,
            code_unavailable,
            browser_unavailable,
        }
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn availability(&self, kind: ToolKind) -> Result<(), String> {
        let missing = match kind {
            ToolKind::Shell => None,
            ToolKind::Code => self.code_unavailable.as_ref(),
            ToolKind::Browser => self.browser_unavailable.as_ref(),
        };
        match missing {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    async fn dispatch(&self, call: ToolCall, sink: &dyn ProgressSink) -> Result<String> {
        match call {
            ToolCall::Shell { command_line } => self.shell.run(&command_line, sink).await,
            ToolCall::Code { source, model } => self.code.run(&source, &model, sink).await,
            ToolCall::Browser {
                instruction,
                context_hint,
                step_limit,
                model,
            } => {
                self.browser
                    .run(&instruction, &context_hint, step_limit, &model, sink)
                    .await
            }
        }
    }
}
