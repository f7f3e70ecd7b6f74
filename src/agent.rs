use crate::llm::ChatBackend;
use crate::logger::AgentLogger;
use crate::observer::{AgentObserver, ConsoleObserver};
use crate::token;
use crate::tools::{Tool, ToolResult};
use serde_json::json;
use siumai::types::{ChatMessage, MessageRole};
use std::collections::HashMap;
use std::sync::Arc;

/// Fixed instruction for the currency assistant. Can be overridden with
/// `agent.system_prompt_path` in config.yaml.
pub const SYSTEM_INSTRUCTION: &str = "You are a friendly currency assistant. \
Use the 'get_exchange_rate' tool to fetch accurate exchange rates. \
Always provide answers in full sentences. \
If the user asks anything outside currency conversion, politely reply that \
you can only help with currency-related questions.";

/// One conversation with the currency assistant. The A2A server keeps one
/// `Agent` per task; the CLI keeps one for the whole session.
pub struct Agent {
    backend: Arc<dyn ChatBackend>,
    tools: HashMap<String, Arc<dyn Tool>>,
    pub messages: Vec<ChatMessage>,
    pub max_steps: usize,
    pub token_limit: usize,
    pub completion_reserve: usize,
    logger: Option<AgentLogger>,
    observer: Arc<dyn AgentObserver>,
}

impl Agent {
    pub fn builder(backend: Arc<dyn ChatBackend>, system_prompt: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(backend, system_prompt.into())
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run one conversational turn: append the user message, then drive
    /// model and tool calls until the model answers in text or the step cap
    /// is reached.
    pub async fn run_turn(&mut self, user_text: impl Into<String>) -> anyhow::Result<String> {
        self.messages.push(ChatMessage::user(user_text.into()).build());
        if let Some(logger) = self.logger.as_mut() {
            logger.start_new_turn();
            if let Some(p) = logger.log_path() {
                self.observer.on_log_file(p);
            }
        }

        let mut step = 0usize;
        loop {
            let threshold = self.token_limit.saturating_sub(self.completion_reserve);
            if token::estimate_messages(&self.messages) > threshold {
                self.compact_history().await?;
            }
            if step >= self.max_steps {
                let capped = format!(
                    "I could not finish answering within {} steps.",
                    self.max_steps
                );
                self.observer.on_assistant_text(&capped);
                return Ok(capped);
            }

            let req_json = json!({
                "messages": self.messages.iter().map(|m| {
                    json!({
                        "role": format!("{:?}", m.role),
                        "content": m.content_text().unwrap_or(""),
                    })
                }).collect::<Vec<_>>(),
                "tools": self.tool_names(),
            });
            if let Some(logger) = self.logger.as_mut() {
                logger.log_request(&req_json);
            }

            let tools = self
                .tools
                .values()
                .map(|t| t.to_siumai_tool())
                .collect::<Vec<_>>();
            let turn = self.backend.chat_turn(self.messages.clone(), tools).await?;

            if let Some(logger) = self.logger.as_mut() {
                logger.log_response(&json!({
                    "content": turn.text,
                    "tool_calls": turn.tool_calls.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                }));
            }

            for r in &turn.reasoning {
                self.observer.on_thinking(r);
            }
            if let Some(text) = &turn.text {
                if !text.is_empty() {
                    self.observer.on_assistant_text(text);
                }
            }
            self.messages.push(turn.message.clone());

            if turn.tool_calls.is_empty() {
                return Ok(turn.text.unwrap_or_default());
            }

            for inv in &turn.tool_calls {
                let display_args = preview(
                    &serde_json::to_string_pretty(&inv.arguments).unwrap_or_default(),
                    400,
                );
                self.observer.on_tool_call(&inv.name, &display_args);

                let result: ToolResult = match self.tools.get(&inv.name) {
                    Some(t) => t.execute(inv.arguments.clone()).await,
                    None => ToolResult::err(format!("unknown tool: {}", inv.name)),
                };

                if let Some(logger) = self.logger.as_mut() {
                    logger.log_tool_result(&json!({
                        "tool_name": inv.name,
                        "arguments": inv.arguments,
                        "success": result.success,
                        "result": if result.success { Some(result.content.clone()) } else { None::<String> },
                        "error": result.error,
                    }));
                }

                if result.success {
                    self.observer
                        .on_tool_result(&inv.name, true, &preview(&result.content, 300));
                    self.messages.push(
                        ChatMessage::tool_result_text(
                            inv.id.clone(),
                            inv.name.clone(),
                            result.content,
                        )
                        .build(),
                    );
                } else {
                    let err = result
                        .error
                        .unwrap_or_else(|| "tool execution failed".to_string());
                    self.observer.on_tool_result(&inv.name, false, &err);
                    self.messages
                        .push(ChatMessage::tool_error(inv.id.clone(), inv.name.clone(), err).build());
                }
            }

            step += 1;
        }
    }

    /// Collapse everything between the system prompt and the current user
    /// message into one model-produced summary block.
    async fn compact_history(&mut self) -> anyhow::Result<()> {
        let before = token::estimate_messages(&self.messages);
        let threshold = self.token_limit.saturating_sub(self.completion_reserve);
        let Some(last_user) = self
            .messages
            .iter()
            .rposition(|m| matches!(m.role, MessageRole::User))
        else {
            return Ok(());
        };
        if last_user <= 1 {
            return Ok(());
        }
        self.observer.on_compact_start(before, threshold);

        let middle = self.messages[1..last_user].to_vec();
        let summary = self.summarize(&middle).await.unwrap_or_default();

        let mut compacted = Vec::with_capacity(self.messages.len() - middle.len() + 1);
        compacted.push(self.messages[0].clone());
        if !summary.is_empty() {
            compacted.push(
                ChatMessage::user(format!("[Earlier conversation summary]\n\n{}", summary)).build(),
            );
        }
        compacted.extend_from_slice(&self.messages[last_user..]);
        self.messages = compacted;

        self.observer
            .on_compact_done(token::estimate_messages(&self.messages));
        Ok(())
    }

    async fn summarize(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let mut buf = String::new();
        for m in messages {
            let text = m.content_text().unwrap_or("");
            if !text.is_empty() {
                buf.push_str(&format!("{:?}: {}\n", m.role, text));
            }
        }
        let prompt = format!(
            concat!(
                "Summarize this currency-assistant conversation so far in a few sentences. ",
                "Keep every exchange rate that was quoted and the currency pairs involved.\n\n",
                "{}"
            ),
            buf
        );
        let req = vec![
            ChatMessage::system("You summarize conversations accurately and briefly.").build(),
            ChatMessage::user(prompt).build(),
        ];
        self.backend.chat_text(req).await
    }
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}

pub struct AgentBuilder {
    backend: Arc<dyn ChatBackend>,
    system_prompt: String,
    tools: Vec<Arc<dyn Tool>>,
    max_steps: usize,
    token_limit: usize,
    completion_reserve: usize,
    transcript_label: Option<String>,
    observer: Arc<dyn AgentObserver>,
}

impl AgentBuilder {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: String) -> Self {
        Self {
            backend,
            system_prompt,
            tools: Vec::new(),
            max_steps: 8,
            token_limit: 24_000,
            completion_reserve: 1_024,
            transcript_label: Some("agent".to_string()),
            observer: Arc::new(ConsoleObserver::new()),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }
    pub fn add_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }
    pub fn with_max_steps(mut self, v: usize) -> Self {
        self.max_steps = v;
        self
    }
    pub fn with_token_limit(mut self, v: usize) -> Self {
        self.token_limit = v;
        self
    }
    pub fn with_completion_reserve(mut self, v: usize) -> Self {
        self.completion_reserve = v;
        self
    }
    /// Label for transcript files under ~/.cambio/log.
    pub fn with_transcript_label(mut self, label: impl Into<String>) -> Self {
        self.transcript_label = Some(label.into());
        self
    }
    pub fn without_transcript(mut self) -> Self {
        self.transcript_label = None;
        self
    }
    pub fn with_observer(mut self, o: Arc<dyn AgentObserver>) -> Self {
        self.observer = o;
        self
    }

    pub fn build(self) -> Agent {
        let mut tools = HashMap::new();
        for t in self.tools {
            tools.insert(t.name().to_string(), t);
        }
        Agent {
            backend: self.backend,
            tools,
            messages: vec![ChatMessage::system(self.system_prompt).build()],
            max_steps: self.max_steps,
            token_limit: self.token_limit,
            completion_reserve: self.completion_reserve,
            logger: self.transcript_label.map(AgentLogger::new),
            observer: self.observer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatTurn, ToolInvocation};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        turns: Mutex<VecDeque<ChatTurn>>,
    }

    impl ScriptedBackend {
        fn new(turns: Vec<ChatTurn>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
            })
        }
    }

    fn text_turn(text: &str) -> ChatTurn {
        ChatTurn {
            text: Some(text.to_string()),
            reasoning: vec![],
            tool_calls: vec![],
            message: ChatMessage::assistant(text.to_string()).build(),
        }
    }

    fn tool_turn(name: &str, arguments: Value) -> ChatTurn {
        ChatTurn {
            text: None,
            reasoning: vec![],
            tool_calls: vec![ToolInvocation {
                id: "call-1".to_string(),
                name: name.to_string(),
                arguments,
            }],
            message: ChatMessage::assistant(String::new()).build(),
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat_turn(
            &self,
            _messages: Vec<ChatMessage>,
            _tools: Vec<siumai::types::Tool>,
        ) -> anyhow::Result<ChatTurn> {
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }

        async fn chat_text(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<String> {
            Ok("USD/EUR was quoted at 0.92.".to_string())
        }
    }

    /// Stand-in for the remote rate tool; records every requested pair.
    struct RateProbe {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl RateProbe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Tool for RateProbe {
        fn name(&self) -> &str {
            "get_exchange_rate"
        }
        fn description(&self) -> &str {
            "Look up the exchange rate for a currency pair"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "currency_from": {"type": "string"},
                    "currency_to": {"type": "string"}
                },
                "required": ["currency_from", "currency_to"]
            })
        }
        async fn execute(&self, args: Value) -> ToolResult {
            let from = args["currency_from"].as_str().unwrap_or_default().to_string();
            let to = args["currency_to"].as_str().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push((from, to));
            ToolResult::ok(r#"{"rate": 0.92}"#)
        }
    }

    fn test_agent(backend: Arc<dyn ChatBackend>, probe: Arc<RateProbe>) -> Agent {
        Agent::builder(backend, SYSTEM_INSTRUCTION)
            .add_tool(probe)
            .without_transcript()
            .build()
    }

    #[tokio::test]
    async fn currency_question_calls_rate_tool_before_answering() {
        let backend = ScriptedBackend::new(vec![
            tool_turn(
                "get_exchange_rate",
                json!({"currency_from": "USD", "currency_to": "EUR"}),
            ),
            text_turn("10 US dollars is about 9.20 euros at the current rate."),
        ]);
        let probe = RateProbe::new();
        let mut agent = test_agent(backend, probe.clone());

        let answer = agent.run_turn("What is 10 USD in EUR?").await.unwrap();

        assert!(answer.contains("euros"));
        let calls = probe.calls.lock().unwrap();
        assert_eq!(*calls, vec![("USD".to_string(), "EUR".to_string())]);
    }

    #[tokio::test]
    async fn off_topic_question_refuses_without_tool() {
        let backend = ScriptedBackend::new(vec![text_turn(
            "I'm sorry, I can only help with currency-related questions.",
        )]);
        let probe = RateProbe::new();
        let mut agent = test_agent(backend, probe.clone());

        let answer = agent.run_turn("What's the weather today?").await.unwrap();

        assert!(answer.contains("currency"));
        assert!(probe.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_back_to_the_model() {
        let backend = ScriptedBackend::new(vec![
            tool_turn("get_weather", json!({"city": "Lisbon"})),
            text_turn("I can only help with currency-related questions."),
        ]);
        let probe = RateProbe::new();
        let mut agent = test_agent(backend, probe.clone());

        let answer = agent.run_turn("weather?").await.unwrap();

        assert!(answer.contains("currency"));
        assert!(probe.calls.lock().unwrap().is_empty());
        assert!(
            agent
                .messages
                .iter()
                .any(|m| matches!(m.role, MessageRole::Tool)),
            "expected a tool error message in history"
        );
    }

    /// Records everything surfaced as assistant text, the way the console
    /// observer would print it.
    struct RecordingObserver {
        texts: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                texts: Mutex::new(Vec::new()),
            })
        }
    }

    impl AgentObserver for RecordingObserver {
        fn on_assistant_text(&self, text: &str) {
            self.texts.lock().unwrap().push(text.to_string());
        }
    }

    #[tokio::test]
    async fn step_cap_stops_the_loop() {
        let backend = ScriptedBackend::new(vec![
            tool_turn(
                "get_exchange_rate",
                json!({"currency_from": "USD", "currency_to": "EUR"}),
            ),
            tool_turn(
                "get_exchange_rate",
                json!({"currency_from": "USD", "currency_to": "JPY"}),
            ),
        ]);
        let probe = RateProbe::new();
        let observer = RecordingObserver::new();
        let mut agent = Agent::builder(backend, SYSTEM_INSTRUCTION)
            .add_tool(probe)
            .with_max_steps(1)
            .with_observer(observer.clone())
            .without_transcript()
            .build();

        let answer = agent.run_turn("USD in EUR and JPY?").await.unwrap();
        assert!(answer.contains("steps"));
        // the cap message is surfaced like any other assistant text
        let texts = observer.texts.lock().unwrap();
        assert!(texts.iter().any(|t| t.contains("steps")));
    }

    #[tokio::test]
    async fn long_history_is_compacted_into_a_summary() {
        let backend = ScriptedBackend::new(vec![
            text_turn("One US dollar is 0.92 euros."),
            text_turn("One euro is 1.09 US dollars."),
        ]);
        let probe = RateProbe::new();
        let mut agent = Agent::builder(backend, SYSTEM_INSTRUCTION)
            .add_tool(probe)
            .with_token_limit(1)
            .with_completion_reserve(0)
            .without_transcript()
            .build();

        agent.run_turn("USD in EUR?").await.unwrap();
        agent.run_turn("And the other way?").await.unwrap();

        assert!(
            agent.messages.iter().any(|m| {
                m.content_text()
                    .unwrap_or("")
                    .contains("[Earlier conversation summary]")
            }),
            "expected earlier turns to be replaced by a summary block"
        );
    }
}
