//! Gateway to the local Ollama server.
//!
//! All model traffic goes through here: planning, corrections, final
//! summarization and the one-shot chat endpoint. The client is cheap to
//! clone and safe for concurrent use across connections.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::AgentError;

/// Completion collaborator as seen by the workflow. `Ok(None)` is a
/// first-class outcome (model replied with nothing usable); `Err` means the
/// transport itself gave up after retries.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct LLMClient {
    client: Client,
    endpoint: String,
}

impl LLMClient {
    pub fn new() -> Result<Self, AgentError> {
        let endpoint = env::var("OLLAMA_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Llm(format!("failed to build HTTP client: {}", e)))?;
        println!("🔌 Ollama endpoint: {}", endpoint);
        Ok(Self { client, endpoint })
    }

    /// Internal helper for robust API calls (retry logic).
    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<reqwest::Response> {
        let max_retries = 3;
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);

        loop {
            attempt += 1;
            match self.client.post(url).json(body).send().await {
                Ok(resp) => {
                    if resp.status().is_server_error()
                        || resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                    {
                        if attempt > max_retries {
                            return Ok(resp);
                        }
                    } else {
                        return Ok(resp);
                    }
                }
                Err(e) => {
                    if attempt > max_retries {
                        return Err(anyhow::anyhow!("Max retries exceeded: {}", e));
                    }
                    tracing::warn!(
                        "LLM network error (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt,
                        max_retries,
                        e,
                        backoff
                    );
                }
            }

            sleep(backoff).await;
            backoff *= 2;
        }
    }

    /// List locally available models: `/api/tags` first, `ollama list` CLI
    /// as the fallback. Errors only when every method fails.
    pub async fn list_local_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(body) = resp.json::<Value>().await {
                    let models = parse_tags_response(&body);
                    if !models.is_empty() {
                        return Ok(models);
                    }
                }
            }
            Ok(resp) => {
                tracing::warn!("/api/tags returned {}. Falling back to CLI.", resp.status());
            }
            Err(e) => {
                tracing::warn!("/api/tags unreachable: {}. Falling back to CLI.", e);
            }
        }

        let output = tokio::process::Command::new("ollama")
            .arg("list")
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("ollama CLI not available: {}", e))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "`ollama list` failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let models = parse_cli_list(&String::from_utf8_lossy(&output.stdout));
        if models.is_empty() {
            return Err(anyhow::anyhow!("no local models found via API or CLI"));
        }
        Ok(models)
    }
}

#[async_trait]
impl Completion for LLMClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<Option<String>> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });

        println!("🧠 Sending prompt to '{}' ({} chars)...", model, prompt.len());
        let url = format!("{}/api/chat", self.endpoint);
        let resp = self.post_with_retry(&url, &body).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama chat failed ({}): {}", status, detail));
        }

        let value: Value = resp.json().await?;
        let content = extract_chat_content(&value);
        println!(
            "🧠 Response from '{}': {} chars",
            model,
            content.as_deref().map(str::len).unwrap_or(0)
        );
        Ok(content)
    }
}

fn extract_chat_content(value: &Value) -> Option<String> {
    let content = value.get("message")?.get("content")?.as_str()?;
    if content.trim().is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

fn parse_tags_response(body: &Value) -> Vec<String> {
    let mut models: Vec<String> = body
        .get("models")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|m| {
                    m.get("model")
                        .or_else(|| m.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();
    models.sort();
    models.dedup();
    models
}

/// Parse plain `ollama list` output. Example line:
/// `llama3:latest  8b  7.4 GB  1 minute ago`
fn parse_cli_list(stdout: &str) -> Vec<String> {
    let mut models: Vec<String> = stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| name.contains(':'))
        .map(str::to_string)
        .collect();
    models.sort();
    models.dedup();
    models
}
