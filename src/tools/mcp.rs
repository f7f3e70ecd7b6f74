use crate::tools::{Tool, ToolResult};
use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use rmcp::service::ServiceExt;
use rmcp::transport::StreamableHttpClientTransport;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

type McpService = rmcp::service::RunningService<rmcp::service::RoleClient, ()>;

/// A tool hosted on the remote MCP server, exposed to the agent loop.
/// The exchange-rate server publishes `get_exchange_rate`; any other tools
/// it lists are forwarded as-is.
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    service: Arc<McpService>,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn parameters(&self) -> Value {
        self.parameters.clone()
    }
    async fn execute(&self, args: Value) -> ToolResult {
        // rmcp call_tool API expects Option<Map<String, Value>>
        let map = args.as_object().cloned();
        let param = rmcp::model::CallToolRequestParam {
            name: self.name.clone().into(),
            arguments: map,
        };
        let peer = self.service.peer();
        match peer.call_tool(param).await {
            Ok(result) => {
                // Flatten textual contents
                let mut parts = Vec::new();
                for c in result.content {
                    if let Some(t) = c.as_text() {
                        parts.push(t.text.clone());
                    } else {
                        parts.push(format!("{:?}", c.raw));
                    }
                }
                let text = parts.join("\n");
                if result.is_error.unwrap_or(false) {
                    ToolResult {
                        success: false,
                        content: text,
                        error: Some("tool returned error".into()),
                    }
                } else {
                    ToolResult::ok(text)
                }
            }
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}

/// Connect to the MCP server over streamable HTTP and wrap every tool it
/// lists. The connection is registered for cancellation at shutdown.
pub async fn connect_toolset(url: &str) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
    let transport = StreamableHttpClientTransport::from_uri(url.to_string());
    let running = ()
        .serve(transport)
        .await
        .with_context(|| format!("connecting to MCP server at {url}"))?;
    let running = Arc::new(running);
    REGISTRY
        .get_or_init(|| Mutex::new(Vec::new()))
        .lock()
        .await
        .push(running.clone());
    let info = running.peer_info();
    tracing::info!(server = %url, ?info, "connected MCP server");

    let list = running.peer().list_tools(Default::default()).await?;
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for t in list.tools {
        let params = t.schema_as_json_value();
        tracing::debug!(tool = %t.name, "discovered remote tool");
        tools.push(Arc::new(RemoteTool {
            name: t.name.to_string(),
            description: t.description.unwrap_or_default().to_string(),
            parameters: params,
            service: running.clone(),
        }));
    }
    if tools.is_empty() {
        tracing::warn!(server = %url, "MCP server listed no tools");
    }
    Ok(tools)
}

// Open MCP connections, cancelled on shutdown.
static REGISTRY: OnceCell<Mutex<Vec<Arc<McpService>>>> = OnceCell::new();

pub async fn shutdown_toolset() {
    if let Some(reg) = REGISTRY.get() {
        let conns = reg.lock().await;
        for rs in conns.iter() {
            rs.cancellation_token().cancel();
        }
    }
}
