use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Default address of the exchange-rate MCP server.
pub const DEFAULT_MCP_URL: &str = "http://localhost:8080/mcp";
/// Default port for the A2A HTTP surface.
pub const DEFAULT_PORT: u16 = 10000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "no API key configured; set GROQ_API_KEY (or llm.api_key in config.yaml) and restart"
    )]
    MissingApiKey,
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay: f32,
    pub max_delay: f32,
    pub exponential_base: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay: 1.0,
            max_delay: 60.0,
            exponential_base: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "openai-compatible".to_string()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_base_url() -> Option<String> {
    Some("https://api.groq.com/openai/v1".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_mcp_url")]
    pub server_url: String,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            server_url: default_mcp_url(),
        }
    }
}

fn default_mcp_url() -> String {
    DEFAULT_MCP_URL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    #[serde(default = "default_completion_reserve")]
    pub completion_reserve: usize,
    /// Optional path to a file overriding the built-in system instruction.
    #[serde(default)]
    pub system_prompt_path: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            token_limit: default_token_limit(),
            completion_reserve: default_completion_reserve(),
            system_prompt_path: None,
        }
    }
}

fn default_max_steps() -> usize {
    8
}
fn default_token_limit() -> usize {
    24_000
}
fn default_completion_reserve() -> usize {
    1_024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl Config {
    /// Load from the first config.yaml found on the search path (if any),
    /// apply environment overrides, and validate. The API key must resolve
    /// from somewhere or this fails before any service starts.
    pub fn load() -> anyhow::Result<Self> {
        let raw = match Self::find_config_file("config.yaml") {
            Some(path) => Some(std::fs::read_to_string(&path)?),
            None => None,
        };
        let cfg = Self::from_sources(raw.as_deref(), |key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn load_from_yaml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg = Self::from_sources(Some(&raw), |key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Build a Config from an optional YAML document and an environment
    /// lookup. Split out from `load` so tests can inject both sources.
    pub fn from_sources(
        raw: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut cfg: Config = match raw {
            Some(text) => serde_yaml::from_str(text)?,
            None => Config::default(),
        };
        cfg.apply_env_overrides(&env)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Config file search priority:
    /// 1) ./cambio/config/{filename}
    /// 2) ~/.cambio/config/{filename}
    /// 3) ./config/{filename}
    pub fn find_config_file(filename: &str) -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        let dev = cwd.join("cambio").join("config").join(filename);
        if dev.exists() {
            return Some(dev);
        }
        let user = Self::user_config_dir().join(filename);
        if user.exists() {
            return Some(user);
        }
        let pkg = cwd.join("config").join(filename);
        if pkg.exists() {
            return Some(pkg);
        }
        None
    }

    pub fn user_config_dir() -> PathBuf {
        let mut p = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        p.push(".cambio");
        p.push("config");
        p
    }

    fn apply_env_overrides(&mut self, env: &impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(key) = env("GROQ_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = key;
            }
        }
        if let Some(url) = env("MCP_SERVER_URL") {
            if !url.is_empty() {
                self.mcp.server_url = url;
            }
        }
        if let Some(p) = env("CAMBIO_PROVIDER") {
            self.llm.provider = p;
        }
        if let Some(m) = env("CAMBIO_MODEL") {
            self.llm.model = m;
        }
        if let Some(u) = env("CAMBIO_BASE_URL") {
            self.llm.base_url = Some(u);
        }
        if let Some(port) = env("CAMBIO_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                name: "CAMBIO_PORT",
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.is_empty() || self.llm.api_key == "YOUR_API_KEY_HERE" {
            return Err(ConfigError::MissingApiKey);
        }
        if self.mcp.server_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "mcp.server_url",
                value: self.mcp.server_url.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn lookup(map: &HashMap<String, String>) -> impl Fn(&str) -> Option<String> + '_ {
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_fails_fast() {
        let env = env_of(&[]);
        let err = Config::from_sources(None, lookup(&env)).unwrap_err();
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn defaults_point_at_local_mcp_and_port_10000() {
        let env = env_of(&[("GROQ_API_KEY", "gsk-test")]);
        let cfg = Config::from_sources(None, lookup(&env)).unwrap();
        assert_eq!(cfg.mcp.server_url, "http://localhost:8080/mcp");
        assert_eq!(cfg.server.port, 10000);
        assert_eq!(cfg.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(cfg.llm.api_key, "gsk-test");
        assert_eq!(
            cfg.llm.base_url.as_deref(),
            Some("https://api.groq.com/openai/v1")
        );
    }

    #[test]
    fn env_overrides_mcp_url_and_port() {
        let env = env_of(&[
            ("GROQ_API_KEY", "gsk-test"),
            ("MCP_SERVER_URL", "http://rates.internal:9000/mcp"),
            ("CAMBIO_PORT", "8088"),
        ]);
        let cfg = Config::from_sources(None, lookup(&env)).unwrap();
        assert_eq!(cfg.mcp.server_url, "http://rates.internal:9000/mcp");
        assert_eq!(cfg.server.port, 8088);
    }

    #[test]
    fn bad_port_is_rejected() {
        let env = env_of(&[("GROQ_API_KEY", "gsk-test"), ("CAMBIO_PORT", "seventy")]);
        let err = Config::from_sources(None, lookup(&env)).unwrap_err();
        assert!(err.to_string().contains("CAMBIO_PORT"));
    }

    #[test]
    fn yaml_sections_are_honored() {
        let yaml = r#"
llm:
  api_key: file-key
  model: llama-3.1-8b-instant
server:
  port: 7777
agent:
  max_steps: 3
"#;
        let env = env_of(&[]);
        let cfg = Config::from_sources(Some(yaml), lookup(&env)).unwrap();
        assert_eq!(cfg.llm.api_key, "file-key");
        assert_eq!(cfg.llm.model, "llama-3.1-8b-instant");
        assert_eq!(cfg.server.port, 7777);
        assert_eq!(cfg.agent.max_steps, 3);
        // untouched sections fall back to defaults
        assert_eq!(cfg.mcp.server_url, DEFAULT_MCP_URL);
    }

    #[test]
    fn env_key_beats_file_key() {
        let yaml = "llm:\n  api_key: file-key\n";
        let env = env_of(&[("GROQ_API_KEY", "env-key")]);
        let cfg = Config::from_sources(Some(yaml), lookup(&env)).unwrap();
        assert_eq!(cfg.llm.api_key, "env-key");
    }
}
