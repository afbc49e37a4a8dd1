//! Whitelisted shell command execution.

use anyhow::Result;
use std::io;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::notify::ProgressSink;

/// Commands the planner is allowed to run. Everything else is refused
/// before a process is spawned.
const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "pwd", "echo", "cat", "grep", "mkdir", "rmdir", "touch", "head", "tail", "date",
];

const UNSAFE_CHARS: &[char] = &[
    ';', '|', '&', '`', '$', '(', ')', '<', '>', '*', '?', '[', ']', '{', '}', '!', '\\',
];

pub struct ShellTool {
    timeout: Duration,
}

impl ShellTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn run(&self, command_line: &str, sink: &dyn ProgressSink) -> Result<String> {
        sink.notify(&format!(
            "Agent: Preparing shell: {}...",
            truncate(command_line, 50)
        ))
        .await;

        let tokens = match shlex::split(command_line) {
            Some(tokens) if !tokens.is_empty() => tokens,
            Some(_) => {
                sink.notify("Agent Error: Empty command.").await;
                return Ok("Error: Empty command.".to_string());
            }
            None => {
                let msg = format!("Error parsing command: {}", command_line);
                sink.notify(&format!("Agent Error: {}", msg)).await;
                return Ok(msg);
            }
        };

        let command = tokens[0].as_str();
        let args = &tokens[1..];
        if !ALLOWED_COMMANDS.contains(&command) {
            let msg = format!("Error: Command '{}' not allowed.", command);
            sink.notify(&format!("Agent Error: {}", msg)).await;
            return Ok(msg);
        }
        for arg in args {
            if arg.contains("..") || arg.chars().any(|c| UNSAFE_CHARS.contains(&c)) {
                let msg = format!("Error: Unsafe arg '{}'", arg);
                sink.notify(&format!("Agent Error: {}", msg)).await;
                return Ok(msg);
            }
        }

        sink.notify(&format!("Agent: Running: {}", tokens.join(" ")))
            .await;
        println!("🖥️ Shell exec: {:?}", tokens);

        let mut cmd = Command::new(command);
        cmd.args(args).kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                let msg = format!("Error: Cmd '{}' not found.", command);
                sink.notify(&format!("Agent Error: {}", msg)).await;
                return Ok(msg);
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                let msg = format!("Error: Permission denied for '{}': {}", command, e);
                sink.notify(&format!("Agent Error: {}", msg)).await;
                return Ok(msg);
            }
            Ok(Err(e)) => {
                return Err(anyhow::anyhow!(
                    "Failed to run shell command '{}': {}",
                    command_line,
                    e
                ))
            }
            Err(_) => {
                sink.notify("Agent Error: Timeout").await;
                println!("⏱️ Shell timeout: {}", command_line);
                return Ok("Error: Timeout.".to_string());
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut result = format!("Exit Code: {}\n", exit_code);
        if !stdout.is_empty() {
            result.push_str(&format!("Output:\n{}\n", stdout));
        }
        if !stderr.is_empty() {
            result.push_str(&format!("Errors:\n{}\n", stderr));
        }

        sink.notify(&format!("Agent: Shell finished (Exit: {}).", exit_code))
            .await;
        Ok(result.trim().to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;

    #[tokio::test]
    async fn runs_allowed_command() {
        let tool = ShellTool::new(15);
        let result = tool.run("echo hi", &NullSink).await.unwrap();
        assert!(result.starts_with("Exit Code: 0"));
        assert!(result.contains("Output:\nhi"));
    }

    #[tokio::test]
    async fn refuses_command_outside_allowlist() {
        let tool = ShellTool::new(15);
        let result = tool.run("curl http://example.com", &NullSink).await.unwrap();
        assert_eq!(result, "Error: Command 'curl' not allowed.");
    }

    #[tokio::test]
    async fn refuses_unsafe_arguments() {
        let tool = ShellTool::new(15);
        let result = tool.run("echo $(whoami)", &NullSink).await.unwrap();
        assert!(result.starts_with("Error: Unsafe arg"));
    }

    #[tokio::test]
    async fn refuses_empty_command() {
        let tool = ShellTool::new(15);
        let result = tool.run("   ", &NullSink).await.unwrap();
        assert_eq!(result, "Error: Empty command.");
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let tool = ShellTool::new(15);
        let result = tool.run("cat /definitely/not/a/file", &NullSink).await.unwrap();
        assert!(result.starts_with("Exit Code: 1"));
        assert!(result.contains("Errors:"));
    }
}
