use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::generation::DEFAULT_MAX_TURNS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAi,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(Provider::Ollama),
            "openai" => Some(Provider::OpenAi),
            _ => None,
        }
    }

    fn default_url(&self) -> &'static str {
        match self {
            Provider::Ollama => "http://localhost:11434",
            Provider::OpenAi => "https://api.openai.com",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Provider::Ollama => "qwen3:8b",
            Provider::OpenAi => "gpt-4o-mini",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: Provider,
    pub model_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub db_path: PathBuf,
    pub bind: SocketAddr,
    pub max_turns: usize,
}

impl Config {
    /// Loads `.env` (if present) and then reads `COLLOQUY_*` variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = match get("COLLOQUY_PROVIDER") {
            Some(raw) => Provider::parse(&raw).with_context(|| format!("Unknown provider '{}'", raw))?,
            None => Provider::Ollama,
        };

        let bind = get("COLLOQUY_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind = bind
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid COLLOQUY_BIND '{}'", bind))?;

        let max_turns = match get("COLLOQUY_MAX_TURNS") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("Invalid COLLOQUY_MAX_TURNS '{}'", raw))?,
            None => DEFAULT_MAX_TURNS,
        };

        Ok(Self {
            model_url: get("COLLOQUY_MODEL_URL").unwrap_or_else(|| provider.default_url().to_string()),
            model: get("COLLOQUY_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            api_key: get("COLLOQUY_API_KEY"),
            db_path: get("COLLOQUY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("colloquy.db")),
            provider,
            bind,
            max_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.provider, Provider::Ollama);
        assert_eq!(config.model_url, "http://localhost:11434");
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(config.bind.port(), 8080);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("COLLOQUY_PROVIDER", "OpenAI"),
            ("COLLOQUY_MODEL", "local-model"),
            ("COLLOQUY_API_KEY", "sk-test"),
            ("COLLOQUY_MAX_TURNS", "4"),
            ("COLLOQUY_BIND", "127.0.0.1:9000"),
            ("COLLOQUY_DB_PATH", "/tmp/c.db"),
        ])
        .unwrap();
        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.model_url, "https://api.openai.com");
        assert_eq!(config.model, "local-model");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.max_turns, 4);
        assert_eq!(config.bind.to_string(), "127.0.0.1:9000");
        assert_eq!(config.db_path, PathBuf::from("/tmp/c.db"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("COLLOQUY_PROVIDER", "carrier-pigeon")]).is_err());
        assert!(config(&[("COLLOQUY_MAX_TURNS", "many")]).is_err());
        assert!(config(&[("COLLOQUY_BIND", "nowhere")]).is_err());
    }
}
