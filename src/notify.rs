//! Progress notification sink.
//!
//! The workflow streams human-readable lines and task-list snapshots to
//! whoever is watching (normally the WebSocket client). Delivery is
//! best-effort: a sink that fails to deliver must not abort the run.

use async_trait::async_trait;
use serde::Serialize;

/// One row of the published task-list snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub description: String,
    pub status: String,
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Push one human-readable progress line.
    async fn notify(&self, line: &str);

    /// Push a read-only snapshot of the current task list.
    async fn notify_task_list(&self, tasks: &[TaskView]);
}

/// Sink that drops everything. Used when nobody is listening.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn notify(&self, _line: &str) {}
    async fn notify_task_list(&self, _tasks: &[TaskView]) {}
}

/// Sink that forwards lines into an unbounded channel. The WebSocket handler
/// drains the channel from a writer task; a closed receiver is ignored.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn notify(&self, line: &str) {
        let _ = self.tx.send(line.to_string());
    }

    async fn notify_task_list(&self, tasks: &[TaskView]) {
        match serde_json::to_string(tasks) {
            Ok(payload) => {
                let _ = self.tx.send(format!("TASK_LIST_UPDATE:{}", payload));
            }
            Err(e) => println!("⚠️ Failed to serialize task update: {}", e),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every notification for assertions.
    pub struct RecordingSink {
        pub lines: Mutex<Vec<String>>,
        pub task_updates: Mutex<Vec<Vec<TaskView>>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                lines: Mutex::new(Vec::new()),
                task_updates: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn notify(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        async fn notify_task_list(&self, tasks: &[TaskView]) {
            self.task_updates.lock().unwrap().push(tasks.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_frames_task_updates() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.notify("Agent: hello").await;
        sink.notify_task_list(&[TaskView {
            description: "list files".to_string(),
            status: "pending".to_string(),
        }])
        .await;

        assert_eq!(rx.recv().await.unwrap(), "Agent: hello");
        let framed = rx.recv().await.unwrap();
        assert!(framed.starts_with("TASK_LIST_UPDATE:"));
        assert!(framed.contains("\"status\":\"pending\""));
    }

    #[tokio::test]
    async fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        sink.notify("nobody is listening").await;
    }
}
