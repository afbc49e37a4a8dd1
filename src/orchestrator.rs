//! End-to-end workflow: plan, execute step by step, summarize.
//!
//! The orchestrator owns the task list and the run-level bookkeeping: the
//! global step budget, the output threaded from one step into the next, and
//! the terminal status line that every exit path publishes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AgentConfig, RunModels};
use crate::executor::StepExecutor;
use crate::llm_gateway::Completion;
use crate::notify::{ProgressSink, TaskView};
use crate::plan::{parse_plan, StepSpec};
use crate::prompts;
use crate::tool_output::{assess, parse_tool_output};
use crate::tools::{ToolDispatcher, NO_PREVIOUS_OUTPUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

/// Runtime record of one planned step. Created when the plan is parsed and
/// kept for the whole run so the task list can always be re-published.
#[derive(Debug, Clone)]
pub struct Task {
    pub description: String,
    pub status: TaskStatus,
    pub original_spec: StepSpec,
    /// The spec that actually ran, after any corrections.
    pub final_spec: Option<StepSpec>,
    /// Raw result text of the last attempt.
    pub result: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    fn new(spec: StepSpec) -> Self {
        Self {
            description: spec.description.clone(),
            status: TaskStatus::Pending,
            original_spec: spec,
            final_spec: None,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Status only moves forward; a terminal status never changes again.
    fn advance(&mut self, to: TaskStatus) {
        if self.status.is_terminal() {
            return;
        }
        if self.status == TaskStatus::Running && to == TaskStatus::Pending {
            return;
        }
        if to == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = to;
    }

    fn view(&self) -> TaskView {
        TaskView {
            description: self.description.clone(),
            status: self.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum RunOutcome {
    /// All steps ran; the final answer is None when summarization failed.
    Completed { final_answer: Option<String> },
    NoSteps,
    PlanningFailed(String),
    StepFailed { step: usize },
    Stopped,
}

#[derive(Debug)]
pub struct WorkflowReport {
    pub outcome: RunOutcome,
    pub tasks: Vec<Task>,
}

pub struct Orchestrator {
    llm: Arc<dyn Completion>,
    tools: Arc<dyn ToolDispatcher>,
    config: Arc<AgentConfig>,
    models: RunModels,
}

impl Orchestrator {
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

    pub async fn run(&self, user_query: &str, sink: &dyn ProgressSink) -> WorkflowReport {
        // 1) Plan
        sink.notify("Agent: Planning steps...").await;
        println!("🧭 Planner: {}", self.models.planner);
        let prompt = prompts::build_planning_prompt(user_query, self.config.max_workflow_steps);
        let plan_text = match self
            .llm
            .complete(&self.models.planner, &prompt, Some(prompts::SYSTEM_PROMPT))
            .await
        {
            Ok(Some(text)) => text,
            Ok(None) => {
                return self.planning_failure("LLM plan empty.".to_string(), sink).await;
            }
            Err(e) => {
                return self
                    .planning_failure(format!("planning request failed: {}", e), sink)
                    .await;
            }
        };
        let specs = match parse_plan(&plan_text) {
            Ok(specs) => specs,
            Err(e) => return self.planning_failure(e.to_string(), sink).await,
        };

        // 2) Materialize and publish the initial task list
        let mut tasks: Vec<Task> = specs.into_iter().map(Task::new).collect();
        publish(sink, &tasks).await;
        if tasks.is_empty() {
            sink.notify("Agent: No steps planned.").await;
            sink.notify("Agent: Workflow finished: no steps planned.").await;
            return WorkflowReport {
                outcome: RunOutcome::NoSteps,
                tasks,
            };
        }
        sink.notify(&format!("Agent: Plan: {} steps.", tasks.len()))
            .await;

        // 3) Execute steps in order
        let executor = StepExecutor::new(
            self.llm.clone(),
            self.tools.clone(),
            self.config.clone(),
            self.models.clone(),
        );
        let total = tasks.len();
        let mut last_successful_output = NO_PREVIOUS_OUTPUT.to_string();
        let mut executed = 0usize;
        let mut stopped = false;
        let mut failed_step: Option<usize> = None;

        for idx in 0..total {
            if executed >= self.config.max_workflow_steps {
                sink.notify(&format!(
                    "**Warn: Max steps ({}) reached.**",
                    self.config.max_workflow_steps
                ))
                .await;
                stopped = true;
                break;
            }

            tasks[idx].advance(TaskStatus::Running);
            publish(sink, &tasks).await;
            sink.notify(&format!(
                "**Agent: Step {}/{}: {}**",
                idx + 1,
                total,
                tasks[idx].description
            ))
            .await;

            let spec = tasks[idx].original_spec.clone();
            let outcome = executor.execute(&spec, &last_successful_output, sink).await;
            executed += 1;

            // Re-check the final result here: even when the executor already
            // gave up, the recorded status must reflect the last attempt
            // precisely.
            let parsed = parse_tool_output(&outcome.result);
            let verdict = assess(&parsed, &self.config.failure_keywords);
            let status = if verdict.failed {
                TaskStatus::Error
            } else {
                TaskStatus::Done
            };

            if outcome.final_spec.description != tasks[idx].description {
                tasks[idx].description = outcome.final_spec.description.clone();
            }
            tasks[idx].final_spec = Some(outcome.final_spec);
            tasks[idx].result = Some(outcome.result);
            tasks[idx].advance(status);
            publish(sink, &tasks).await;
            sink.notify(&format!(
                "**Agent: Step {} finished: {}**",
                idx + 1,
                status.as_str().to_uppercase()
            ))
            .await;

            if status == TaskStatus::Error {
                sink.notify(&format!("**Agent Error: Failed step {}.**", idx + 1))
                    .await;
                failed_step = Some(idx + 1);
                break;
            }

            // 4) Thread the useful output forward
            last_successful_output = if !parsed.output.is_empty() {
                parsed.output
            } else {
                parsed.raw
            };
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        // 5) Terminal paths
        if let Some(step) = failed_step {
            sink.notify(&format!("Agent: Workflow finished: failed at step {}.", step))
                .await;
            return WorkflowReport {
                outcome: RunOutcome::StepFailed { step },
                tasks,
            };
        }
        if stopped {
            sink.notify("Agent: Workflow finished: step budget reached.")
                .await;
            return WorkflowReport {
                outcome: RunOutcome::Stopped,
                tasks,
            };
        }

        // 6) Final validation / summarization
        sink.notify("Agent: Performing final check and summarization...")
            .await;
        let final_prompt = prompts::build_final_check_prompt(user_query, &last_successful_output);
        let final_answer = match self
            .llm
            .complete(
                &self.models.planner,
                &final_prompt,
                Some(prompts::SUMMARY_SYSTEM_PROMPT),
            )
            .await
        {
            Ok(Some(answer)) => Some(answer),
            Ok(None) => None,
            Err(e) => {
                println!("⚠️ Summarization request failed: {}", e);
                None
            }
        };

        match &final_answer {
            Some(answer) => {
                sink.notify(&format!("**Agent: Final Answer:**\n{}", answer.trim()))
                    .await;
                sink.notify("Agent: Workflow completed and summarized.").await;
            }
            None => {
                sink.notify("Agent Warning: Final summarization step failed.")
                    .await;
                sink.notify("Agent: Workflow completed, but final summary failed.")
                    .await;
            }
        }

        WorkflowReport {
            outcome: RunOutcome::Completed { final_answer },
            tasks,
        }
    }

    async fn planning_failure(&self, reason: String, sink: &dyn ProgressSink) -> WorkflowReport {
        let msg = format!("Agent Error: Planning/Parsing Fail: {}", reason);
        println!("❌ {}", msg);
        sink.notify(&msg).await;
        sink.notify_task_list(&[]).await;
        sink.notify("Agent: Workflow finished: planning failed.").await;
        WorkflowReport {
            outcome: RunOutcome::PlanningFailed(reason),
            tasks: Vec::new(),
        }
    }
}

async fn publish(sink: &dyn ProgressSink, tasks: &[Task]) {
    let views: Vec<TaskView> = tasks.iter().map(Task::view).collect();
    sink.notify_task_list(&views).await;
}
