//! Python snippet execution with automatic dependency recovery.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::env;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

use crate::notify::ProgressSink;

lazy_static! {
    static ref MISSING_MODULE: Regex =
        Regex::new(r#"No module named ['"](.+?)['"]"#).expect("module regex");
    static ref PACKAGE_NAME_JUNK: Regex =
        Regex::new(r"[^a-zA-Z0-9_\-.]").expect("package name regex");
}

const PIP_INSTALL_TIMEOUT: Duration = Duration::from_secs(120);

pub struct CodeTool {
    interpreter: String,
    timeout: Duration,
}

impl CodeTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            interpreter: env::var("PYTHON_EXECUTABLE").unwrap_or_else(|_| "python3".to_string()),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Capability probe: the configured interpreter must answer `--version`.
    pub async fn probe(&self) -> Result<(), String> {
        match Command::new(&self.interpreter).arg("--version").output().await {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(format!(
                "{} --version failed: {}",
                self.interpreter,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) => Err(format!("{} not runnable: {}", self.interpreter, e)),
        }
    }

    pub async fn run(&self, source: &str, model: &str, sink: &dyn ProgressSink) -> Result<String> {
        if source.trim().is_empty() {
            sink.notify("Agent Warning: Received empty code snippet for execution.")
                .await;
            return Ok("Error: No Python code provided to execute.".to_string());
        }

        sink.notify("Code Interpreter: Preparing to run Python code...")
            .await;

        let script_path = env::temp_dir().join(format!("agent_snippet_{}.py", Uuid::new_v4()));
        tokio::fs::write(&script_path, source)
            .await
            .with_context(|| format!("failed to write snippet to {}", script_path.display()))?;
        println!("📝 [Code] Snippet written to {}", script_path.display());

        let result = self.run_with_auto_install(&script_path, model, sink).await;

        if let Err(e) = tokio::fs::remove_file(&script_path).await {
            println!("⚠️ [Code] Could not remove {}: {}", script_path.display(), e);
        }
        result
    }

    async fn run_with_auto_install(
        &self,
        script_path: &Path,
        model: &str,
        sink: &dyn ProgressSink,
    ) -> Result<String> {
        let (mut exit_code, mut stdout, mut stderr) =
            self.run_attempt(script_path, model, 1, sink).await;

        // One pip-install retry when the snippet trips over a missing module.
        if exit_code != 0 && stderr.contains("ModuleNotFoundError: No module named") {
            if let Some(package) = parse_missing_package(&stderr) {
                sink.notify(&format!(
                    "Code Interpreter: Detected missing module '{}'. Attempting 'pip install {}'...",
                    package, package
                ))
                .await;
                match self.pip_install(&package).await {
                    Ok(()) => {
                        sink.notify(&format!(
                            "Code Interpreter: Successfully installed '{}'. Retrying script...",
                            package
                        ))
                        .await;
                        let retried = self.run_attempt(script_path, model, 2, sink).await;
                        exit_code = retried.0;
                        stdout = retried.1;
                        stderr = retried.2;
                    }
                    Err(install_err) => {
                        let msg = format!("Error: Failed to install package '{}'.", package);
                        sink.notify(&format!("Agent Error: {}", msg)).await;
                        stderr.push_str(&format!(
                            "\n\n--- Auto-install failed ---\n{}\n{}\n---",
                            msg, install_err
                        ));
                    }
                }
            } else {
                sink.notify(
                    "Code Interpreter: ModuleNotFoundError detected, but could not parse package name for auto-install.",
                )
                .await;
            }
        }

        let mut parts = vec![format!("Exit Code: {}", exit_code)];
        if !stdout.is_empty() {
            parts.push(format!("Output:\n{}", stdout));
        }
        if !stderr.is_empty() {
            let prefix = if exit_code != 0 { "Error:\n" } else { "Stderr Log:\n" };
            parts.push(format!("{}{}", prefix, stderr));
        }

        if exit_code == 0 {
            sink.notify("Code Interpreter: Script executed successfully.")
                .await;
        } else {
            sink.notify(&format!(
                "Code Interpreter: Script finished with errors (Exit Code: {}).",
                exit_code
            ))
            .await;
        }

        Ok(parts.join("\n"))
    }

    async fn run_attempt(
        &self,
        script_path: &Path,
        model: &str,
        attempt: u32,
        sink: &dyn ProgressSink,
    ) -> (i32, String, String) {
        sink.notify(&format!(
            "Code Interpreter: Executing script (Attempt {})...",
            attempt
        ))
        .await;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script_path).kill_on_drop(true);
        // Snippets that call back into a local model read the choice from env.
        if !model.is_empty() {
            cmd.env("DEEPCODER_MODEL", model);
        }

        match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                println!("🐍 [Code] Attempt {} finished. Exit Code: {}", attempt, exit_code);
                (exit_code, stdout, stderr)
            }
            Ok(Err(e)) => (
                -1,
                String::new(),
                format!("Error: Unexpected error during script execution: {}", e),
            ),
            Err(_) => {
                println!("⏱️ [Code] Attempt {} timed out after {:?}.", attempt, self.timeout);
                (
                    -1,
                    String::new(),
                    format!(
                        "Error: Python execution timed out after {}s.",
                        self.timeout.as_secs()
                    ),
                )
            }
        }
    }

    async fn pip_install(&self, package: &str) -> Result<(), String> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(["-m", "pip", "install", package]).kill_on_drop(true);
        println!("📦 [Code] pip install {}", package);

        match timeout(PIP_INSTALL_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(format!(
                "pip exited {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Ok(Err(e)) => Err(format!("failed to launch pip: {}", e)),
            Err(_) => Err("pip install timed out".to_string()),
        }
    }
}

fn parse_missing_package(stderr: &str) -> Option<String> {
    let captured = MISSING_MODULE.captures(stderr)?;
    let sanitized = PACKAGE_NAME_JUNK.replace_all(&captured[1], "").to_string();
    if sanitized.is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;

    #[test]
    fn parses_missing_package_name() {
        let stderr = "Traceback ...\nModuleNotFoundError: No module named 'requests'";
        assert_eq!(parse_missing_package(stderr).unwrap(), "requests");
    }

    #[test]
    fn sanitizes_package_name() {
        let stderr = "ModuleNotFoundError: No module named 'evil; rm -rf'";
        assert_eq!(parse_missing_package(stderr).unwrap(), "evilrm-rf");
    }

    #[tokio::test]
    async fn empty_snippet_is_refused() {
        let tool = CodeTool::new(60);
        let result = tool.run("  \n ", "", &NullSink).await.unwrap();
        assert_eq!(result, "Error: No Python code provided to execute.");
    }
}
