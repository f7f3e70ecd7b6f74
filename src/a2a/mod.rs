pub mod handlers;
pub mod router;
pub mod state;
pub mod types;

pub use router::a2a_router;
pub use state::{A2aState, AgentJob};
pub use types::{
    AgentCard, AgentProvider, AgentSkill, Artifact, CancelRequest, ErrorBody, Message, Part,
    SendRequest, SendResponse, StreamEvent, TaskState, TaskView, TasksView, TurnConfiguration,
};
