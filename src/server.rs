use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::a2a::{A2aState, AgentCard, AgentJob, AgentSkill, TaskState, a2a_router};
use crate::agent::{Agent, SYSTEM_INSTRUCTION};
use crate::config::Config;
use crate::llm::ChatBackend;
use crate::observer::TracingObserver;
use crate::tools::Tool;

/// Agent card advertised at /.well-known/agent-card.json. Skills mirror the
/// tools discovered on the MCP server.
pub fn agent_card(cfg: &Config, tools: &[Arc<dyn Tool>]) -> AgentCard {
    AgentCard {
        name: "currency_agent".to_string(),
        description: "An AI assistant for currency conversion with tool integration".to_string(),
        url: format!("http://{}:{}", cfg.server.host, cfg.server.port),
        provider: None,
        version: env!("CARGO_PKG_VERSION").to_string(),
        skills: tools
            .iter()
            .map(|t| AgentSkill {
                id: t.name().to_string(),
                name: t.name().to_string(),
                description: Some(t.description().to_string()),
                tags: vec!["currency".to_string()],
            })
            .collect(),
        default_input_modes: Some(vec!["text/plain".to_string()]),
        default_output_modes: Some(vec!["text/plain".to_string()]),
    }
}

/// System instruction, or the override file named in config.
pub fn resolve_system_prompt(cfg: &Config) -> anyhow::Result<String> {
    match &cfg.agent.system_prompt_path {
        Some(path) => {
            let resolved = Config::find_config_file(path)
                .unwrap_or_else(|| std::path::PathBuf::from(path));
            Ok(std::fs::read_to_string(&resolved)?)
        }
        None => Ok(SYSTEM_INSTRUCTION.to_string()),
    }
}

/// Bind the A2A surface and run the agent worker until ctrl-c.
pub async fn serve(
    cfg: &Config,
    backend: Arc<dyn ChatBackend>,
    tools: Vec<Arc<dyn Tool>>,
) -> anyhow::Result<()> {
    let card = agent_card(cfg, &tools);
    let system_prompt = resolve_system_prompt(cfg)?;

    let (jobs_tx, jobs_rx) = mpsc::channel::<AgentJob>(32);
    let state = A2aState::new(card, jobs_tx);
    let worker = tokio::spawn(agent_worker(
        jobs_rx,
        state.clone(),
        backend,
        tools,
        system_prompt,
        cfg.agent.clone(),
    ));

    let app = a2a_router(state);
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "currency agent listening (A2A)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.abort();
    crate::tools::mcp::shutdown_toolset().await;
    tracing::info!("currency agent stopped");
    Ok(())
}

/// One conversation per A2A task; turns are processed in submission order.
async fn agent_worker(
    mut jobs: mpsc::Receiver<AgentJob>,
    state: A2aState,
    backend: Arc<dyn ChatBackend>,
    tools: Vec<Arc<dyn Tool>>,
    system_prompt: String,
    agent_cfg: crate::config::AgentConfig,
) {
    let mut sessions: HashMap<String, Agent> = HashMap::new();
    while let Some(job) = jobs.recv().await {
        retire_stale_sessions(&mut sessions, &state).await;
        let agent = sessions.entry(job.task_id.clone()).or_insert_with(|| {
            let label = format!("task_{}", &job.task_id[..job.task_id.len().min(8)]);
            Agent::builder(backend.clone(), system_prompt.clone())
                .with_tools(tools.clone())
                .with_max_steps(agent_cfg.max_steps)
                .with_token_limit(agent_cfg.token_limit)
                .with_completion_reserve(agent_cfg.completion_reserve)
                .with_transcript_label(label)
                .with_observer(Arc::new(TracingObserver))
                .build()
        });
        let result = agent.run_turn(job.text).await.map_err(|e| e.to_string());
        if job.reply.send(result).is_err() {
            tracing::warn!(task = %job.task_id, "turn finished but nobody was waiting");
        }
    }
}

/// Drop sessions whose task can no longer accept messages (failed or
/// canceled, or no longer tracked). Completed conversations stay resident
/// to serve follow-up turns.
async fn retire_stale_sessions(sessions: &mut HashMap<String, Agent>, state: &A2aState) {
    let mut stale = Vec::new();
    for id in sessions.keys() {
        let keep = matches!(
            state.get_task(id).await.map(|t| t.status),
            Some(TaskState::Working) | Some(TaskState::Completed)
        );
        if !keep {
            stale.push(id.clone());
        }
    }
    for id in stale {
        tracing::debug!(task = %id, "retiring agent session");
        sessions.remove(&id);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install ctrl-c handler: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::Message;
    use crate::llm::ChatTurn;
    use async_trait::async_trait;
    use siumai::types::ChatMessage;

    struct SilentBackend;

    #[async_trait]
    impl ChatBackend for SilentBackend {
        async fn chat_turn(
            &self,
            _messages: Vec<ChatMessage>,
            _tools: Vec<siumai::types::Tool>,
        ) -> anyhow::Result<ChatTurn> {
            anyhow::bail!("not used")
        }

        async fn chat_text(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<String> {
            anyhow::bail!("not used")
        }
    }

    fn session(backend: Arc<dyn ChatBackend>) -> Agent {
        Agent::builder(backend, SYSTEM_INSTRUCTION)
            .without_transcript()
            .build()
    }

    fn card() -> AgentCard {
        AgentCard {
            name: "currency_agent".to_string(),
            description: "test".to_string(),
            url: "http://localhost:10000".to_string(),
            provider: None,
            version: "0.0.0".to_string(),
            skills: vec![],
            default_input_modes: None,
            default_output_modes: None,
        }
    }

    #[tokio::test]
    async fn canceled_sessions_are_retired_but_live_ones_stay() {
        let (tx, _rx) = mpsc::channel(4);
        let state = A2aState::new(card(), tx);
        let live = state.create_task(Message::user("10 USD in EUR?")).await;
        let done = state.create_task(Message::user("GBP in JPY?")).await;
        let dead = state.create_task(Message::user("CHF in SEK?")).await;
        state.apply_outcome(&done, Ok("answered".to_string())).await;
        state.cancel(&dead).await;

        let backend: Arc<dyn ChatBackend> = Arc::new(SilentBackend);
        let mut sessions = HashMap::new();
        sessions.insert(live.clone(), session(backend.clone()));
        sessions.insert(done.clone(), session(backend.clone()));
        sessions.insert(dead.clone(), session(backend));

        retire_stale_sessions(&mut sessions, &state).await;

        assert!(sessions.contains_key(&live));
        assert!(sessions.contains_key(&done), "completed tasks take follow-ups");
        assert!(!sessions.contains_key(&dead));
    }
}
