//! End-to-end workflow runs against the real tool registry, with the
//! language model scripted.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use local_task_agent::config::{AgentConfig, RunModels};
use local_task_agent::llm_gateway::Completion;
use local_task_agent::notify::{ProgressSink, TaskView};
use local_task_agent::orchestrator::{Orchestrator, RunOutcome, TaskStatus};
use local_task_agent::tools::ToolRegistry;

struct ScriptedCompletion {
    replies: Mutex<Vec<Option<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    fn new(replies: Vec<Option<String>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn complete(
        &self,
        _model: &str,
        prompt: &str,
        _system: Option<&str>,
    ) -> Result<Option<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Ok(None)
        } else {
            Ok(replies.remove(0))
        }
    }
}

struct CollectingSink {
    lines: Mutex<Vec<String>>,
    updates: Mutex<Vec<Vec<TaskView>>>,
}

impl CollectingSink {
    fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn notify(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    async fn notify_task_list(&self, tasks: &[TaskView]) {
        self.updates.lock().unwrap().push(tasks.to_vec());
    }
}

fn models() -> RunModels {
    RunModels {
        planner: "llama3:latest".to_string(),
        browser: "qwen2.5:7b".to_string(),
        code: "deepcoder:latest".to_string(),
    }
}

async fn orchestrator(llm: Arc<ScriptedCompletion>) -> Orchestrator {
    let config = Arc::new(AgentConfig::default());
    let tools = Arc::new(ToolRegistry::probe(&config).await);
    Orchestrator::new(llm, tools, config, models())
}

#[tokio::test]
async fn echo_workflow_completes_and_summarizes() {
    let llm = Arc::new(ScriptedCompletion::new(vec![
        Some(
            r#"```json
[{"tool": "shell_terminal", "description": "Print a greeting", "command": ["echo", "hi"]}]
```"#
                .to_string(),
        ),
        Some("The greeting printed was: hi".to_string()),
    ]));
    let sink = CollectingSink::new();

    let report = orchestrator(llm.clone()).await.run("print hi", &sink).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Completed {
            final_answer: Some("The greeting printed was: hi".to_string())
        }
    );
    assert_eq!(report.tasks.len(), 1);
    assert_eq!(report.tasks[0].status, TaskStatus::Done);
    let result = report.tasks[0].result.as_deref().unwrap();
    assert!(result.starts_with("Exit Code: 0"));
    assert!(result.contains("hi"));

    // The summarization prompt received the echoed output.
    let prompts = llm.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("hi"));

    // Task list progressed pending -> running -> done.
    let updates = sink.updates.lock().unwrap();
    let statuses: Vec<String> = updates.iter().map(|u| u[0].status.clone()).collect();
    assert_eq!(statuses, vec!["pending", "running", "done"]);

    let lines = sink.lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("Final Answer")));
    assert!(lines.iter().any(|l| l.contains("Workflow completed and summarized")));
}

#[tokio::test]
async fn disallowed_command_fails_the_run() {
    let llm = Arc::new(ScriptedCompletion::new(vec![
        Some(
            r#"[{"tool": "shell_terminal", "description": "Fetch a page", "command": ["curl", "http://example.com"]}]"#
                .to_string(),
        ),
        None, // no correction offered
    ]));
    let sink = CollectingSink::new();

    let report = orchestrator(llm.clone())
        .await
        .run("fetch a page", &sink)
        .await;

    assert_eq!(report.outcome, RunOutcome::StepFailed { step: 1 });
    assert_eq!(report.tasks[0].status, TaskStatus::Error);
    assert!(report.tasks[0]
        .result
        .as_deref()
        .unwrap()
        .contains("not allowed"));

    let lines = sink.lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("Failed step 1")));
    // The run still published a terminal status line.
    assert!(lines.last().unwrap().contains("Workflow finished"));
}

#[tokio::test]
async fn correction_recovers_a_failing_step() {
    let llm = Arc::new(ScriptedCompletion::new(vec![
        Some(
            r#"[{"tool": "shell_terminal", "description": "Read a file", "command": ["cat", "/definitely/not/here"]}]"#
                .to_string(),
        ),
        Some(
            r#"{"tool": "shell_terminal", "description": "Print a fallback", "command": ["echo", "recovered"]}"#
                .to_string(),
        ),
        Some("Recovered successfully.".to_string()),
    ]));
    let sink = CollectingSink::new();

    let report = orchestrator(llm.clone())
        .await
        .run("read the file", &sink)
        .await;

    assert_eq!(
        report.outcome,
        RunOutcome::Completed {
            final_answer: Some("Recovered successfully.".to_string())
        }
    );
    assert_eq!(report.tasks[0].status, TaskStatus::Done);
    // The recorded description follows the corrected step.
    assert_eq!(report.tasks[0].description, "Print a fallback");
    let final_spec = report.tasks[0].final_spec.as_ref().unwrap();
    assert_eq!(final_spec.param_text("command").unwrap(), "echo recovered");

    // The summarization prompt threads the corrected step's output.
    let prompts = llm.prompts.lock().unwrap();
    assert!(prompts.last().unwrap().contains("recovered"));

    let lines = sink.lines.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("Applying correction")));
}
