use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};

use crate::a2a::types::{AgentCard, Artifact, Message, Part, StreamEvent, TaskRecord, TaskState};

/// A turn handed to the agent worker. The worker answers (or fails) through
/// the oneshot channel.
#[derive(Debug)]
pub struct AgentJob {
    pub task_id: String,
    pub text: String,
    pub reply: oneshot::Sender<Result<String, String>>,
}

/// Shared state for the A2A HTTP layer.
#[derive(Clone)]
pub struct A2aState {
    inner: Arc<Inner>,
}

struct Inner {
    /// Conversations indexed by A2A task id.
    tasks: RwLock<HashMap<String, TaskRecord>>,
    /// Card served at /.well-known/agent-card.json; fixed at startup.
    card: AgentCard,
    /// Channel to the agent worker.
    jobs: mpsc::Sender<AgentJob>,
    /// SSE broadcast channels, one per task.
    channels: RwLock<HashMap<String, broadcast::Sender<StreamEvent>>>,
}

impl A2aState {
    pub fn new(card: AgentCard, jobs: mpsc::Sender<AgentJob>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: RwLock::new(HashMap::new()),
                card,
                jobs,
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn card(&self) -> &AgentCard {
        &self.inner.card
    }

    pub async fn get_task(&self, id: &str) -> Option<TaskRecord> {
        self.inner.tasks.read().await.get(id).cloned()
    }

    pub async fn list_tasks(&self) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> =
            self.inner.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Create a new task seeded with the opening user message.
    pub async fn create_task(&self, message: Message) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let record = TaskRecord {
            id: id.clone(),
            status: TaskState::Working,
            artifacts: Vec::new(),
            history: vec![message],
            created_at: now,
            updated_at: now,
        };
        self.inner.tasks.write().await.insert(id.clone(), record);
        id
    }

    pub async fn append_history(&self, id: &str, message: Message) {
        if let Some(record) = self.inner.tasks.write().await.get_mut(id) {
            record.history.push(message);
            record.status = TaskState::Working;
            record.updated_at = chrono::Utc::now();
        }
    }

    pub async fn set_status(&self, id: &str, status: TaskState) {
        if let Some(record) = self.inner.tasks.write().await.get_mut(id) {
            record.status = status;
            record.updated_at = chrono::Utc::now();
        }
    }

    /// Submit a turn to the agent worker.
    pub async fn submit(&self, job: AgentJob) -> Result<(), String> {
        self.inner
            .jobs
            .send(job)
            .await
            .map_err(|e| format!("failed to submit turn: {e}"))
    }

    /// Subscribe to SSE events for a task.
    pub async fn subscribe(&self, id: &str) -> broadcast::Receiver<StreamEvent> {
        let mut channels = self.inner.channels.write().await;
        channels
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    pub async fn publish(&self, id: &str, event: StreamEvent) {
        let channels = self.inner.channels.read().await;
        if let Some(sender) = channels.get(id) {
            let _ = sender.send(event);
        }
    }

    /// Drop the broadcast channel once a turn has finished. Subscribers
    /// drain what was already sent and then see the stream close; a later
    /// subscribe recreates the channel.
    async fn release_channel(&self, id: &str) {
        self.inner.channels.write().await.remove(id);
    }

    /// Record the worker's answer for one turn and notify subscribers.
    /// A task canceled while the turn was in flight keeps its canceled state
    /// and the late answer is dropped.
    pub async fn apply_outcome(&self, id: &str, outcome: Result<String, String>) {
        {
            let mut tasks = self.inner.tasks.write().await;
            let Some(record) = tasks.get_mut(id) else {
                return;
            };
            if record.status == TaskState::Canceled {
                return;
            }
            match &outcome {
                Ok(answer) => {
                    record.status = TaskState::Completed;
                    record.history.push(Message::agent(answer.clone()));
                    record.artifacts.push(Artifact {
                        name: "answer".to_string(),
                        parts: vec![Part::Text {
                            text: answer.clone(),
                        }],
                        last_chunk: Some(true),
                    });
                }
                Err(error) => {
                    tracing::error!(task = %id, %error, "agent turn failed");
                    record.status = TaskState::Failed;
                }
            }
            record.updated_at = chrono::Utc::now();
        }

        match outcome {
            Ok(answer) => {
                self.publish(
                    id,
                    StreamEvent::Message {
                        task_id: id.to_string(),
                        message: Message::agent(answer),
                    },
                )
                .await;
                self.publish(
                    id,
                    StreamEvent::StatusUpdate {
                        task_id: id.to_string(),
                        status: TaskState::Completed,
                    },
                )
                .await;
            }
            Err(_) => {
                self.publish(
                    id,
                    StreamEvent::StatusUpdate {
                        task_id: id.to_string(),
                        status: TaskState::Failed,
                    },
                )
                .await;
            }
        }
        self.publish(
            id,
            StreamEvent::Done {
                task_id: id.to_string(),
            },
        )
        .await;
        self.release_channel(id).await;
    }

    /// Cancel a task: terminal state plus a Done event for any subscriber.
    pub async fn cancel(&self, id: &str) {
        self.set_status(id, TaskState::Canceled).await;
        self.publish(
            id,
            StreamEvent::StatusUpdate {
                task_id: id.to_string(),
                status: TaskState::Canceled,
            },
        )
        .await;
        self.publish(
            id,
            StreamEvent::Done {
                task_id: id.to_string(),
            },
        )
        .await;
        self.release_channel(id).await;
    }
}

/// Wait for the worker's reply off the request path (message:stream and
/// non-blocking message:send).
pub fn spawn_outcome_waiter(
    state: A2aState,
    task_id: String,
    rx: oneshot::Receiver<Result<String, String>>,
) {
    tokio::spawn(async move {
        let outcome = rx
            .await
            .unwrap_or_else(|_| Err("agent worker dropped the turn".to_string()));
        state.apply_outcome(&task_id, outcome).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> A2aState {
        let (tx, _rx) = mpsc::channel(4);
        A2aState::new(
            AgentCard {
                name: "currency_agent".to_string(),
                description: "test".to_string(),
                url: "http://localhost:10000".to_string(),
                provider: None,
                version: "0.0.0".to_string(),
                skills: vec![],
                default_input_modes: None,
                default_output_modes: None,
            },
            tx,
        )
    }

    #[tokio::test]
    async fn completed_outcome_stores_answer_and_artifact() {
        let state = state();
        let id = state.create_task(Message::user("10 USD in EUR?")).await;

        state
            .apply_outcome(&id, Ok("About 9.20 euros.".to_string()))
            .await;

        let record = state.get_task(&id).await.unwrap();
        assert_eq!(record.status, TaskState::Completed);
        assert_eq!(record.artifacts.len(), 1);
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[1].role, "agent");
        assert_eq!(record.history[1].text(), "About 9.20 euros.");
    }

    #[tokio::test]
    async fn failed_outcome_marks_task_failed() {
        let state = state();
        let id = state.create_task(Message::user("10 USD in EUR?")).await;

        state.apply_outcome(&id, Err("backend down".to_string())).await;

        let record = state.get_task(&id).await.unwrap();
        assert_eq!(record.status, TaskState::Failed);
        assert!(record.artifacts.is_empty());
    }

    #[tokio::test]
    async fn late_answer_does_not_resurrect_a_canceled_task() {
        let state = state();
        let id = state.create_task(Message::user("10 USD in EUR?")).await;

        state.cancel(&id).await;
        state.apply_outcome(&id, Ok("too late".to_string())).await;

        let record = state.get_task(&id).await.unwrap();
        assert_eq!(record.status, TaskState::Canceled);
        assert!(record.artifacts.is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_message_status_and_done() {
        let state = state();
        let id = state.create_task(Message::user("10 USD in EUR?")).await;
        let mut rx = state.subscribe(&id).await;

        state.apply_outcome(&id, Ok("About 9.20 euros.".to_string())).await;

        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::Message { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            StreamEvent::StatusUpdate {
                status: TaskState::Completed,
                ..
            }
        ));
        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::Done { .. }));
        // channel is released after the final event
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn cancel_notifies_subscribers_with_done() {
        let state = state();
        let id = state.create_task(Message::user("10 USD in EUR?")).await;
        let mut rx = state.subscribe(&id).await;

        state.cancel(&id).await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            StreamEvent::StatusUpdate {
                status: TaskState::Canceled,
                ..
            }
        ));
        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::Done { .. }));
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn list_tasks_is_ordered_by_creation() {
        let state = state();
        let first = state.create_task(Message::user("a")).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = state.create_task(Message::user("b")).await;
        let listed: Vec<String> = state.list_tasks().await.into_iter().map(|t| t.id).collect();
        let (first_pos, second_pos) = (
            listed.iter().position(|id| *id == first).unwrap(),
            listed.iter().position(|id| *id == second).unwrap(),
        );
        assert!(first_pos < second_pos);
    }
}
