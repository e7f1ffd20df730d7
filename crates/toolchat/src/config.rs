//! Process configuration, read from the command line and the environment.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use toolchat_core::{DEFAULT_MAX_ROUNDS, OrchestratorBuilder};
use toolchat_openai_model::{
    DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAIConfigBuilder, OpenAIProvider,
};

use crate::travel_assistant;

/// Command line options of the `toolchat` binary.
#[derive(Clone, Parser)]
#[command(name = "toolchat", version, about = "A travel assistant that can call tools")]
pub struct AppConfig {
    /// API key of the OpenAI-compatible backend.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Base URL of the OpenAI-compatible backend.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Model to use.
    #[arg(short, long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Sampling temperature.
    #[arg(long, env = "OPENAI_TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,

    /// SerpAPI key. Web search is only offered to the model when it is set.
    #[arg(long, env = "SERP_API_KEY", hide_env_values = true)]
    pub serp_api_key: Option<String>,

    /// Maximum rounds of tool calls in one turn.
    #[arg(long, env = "TOOLCHAT_MAX_ROUNDS", default_value_t = DEFAULT_MAX_ROUNDS)]
    pub max_rounds: u32,

    /// Maximum seconds spent on one turn.
    #[arg(long, env = "TOOLCHAT_TURN_TIMEOUT")]
    pub turn_timeout: Option<u64>,

    /// What to do. Chats in the terminal when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What the binary should do.
#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Chat in the terminal (default).
    Chat,
    /// Serve the JSON API over HTTP.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "TOOLCHAT_LISTEN", default_value = "127.0.0.1:3000")]
        listen: SocketAddr,
    },
}

impl AppConfig {
    /// Returns the subcommand, defaulting to [`Command::Chat`].
    #[inline]
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Chat)
    }

    /// Creates the model provider.
    pub fn model_provider(&self) -> OpenAIProvider {
        let config = OpenAIConfigBuilder::with_api_key(&self.api_key)
            .with_base_url(&self.base_url)
            .with_model(&self.model)
            .with_temperature(self.temperature)
            .build();
        debug!("using model provider: {config:?}");
        OpenAIProvider::new(config)
    }

    /// Creates an orchestrator builder with the tools and limits
    /// configured.
    pub fn orchestrator_builder(&self) -> OrchestratorBuilder {
        let mut builder =
            travel_assistant(self.model_provider(), self.serp_api_key.clone())
                .with_max_rounds(self.max_rounds);
        if let Some(secs) = self.turn_timeout {
            builder = builder.with_max_duration(Duration::from_secs(secs));
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let config = AppConfig::try_parse_from([
            "toolchat",
            "--api-key",
            "sk-test",
            "--model",
            "gpt-4o-mini",
            "--max-rounds",
            "3",
            "serve",
            "--listen",
            "0.0.0.0:8080",
        ])
        .unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_rounds, 3);
        assert_eq!(
            config.command(),
            Command::Serve {
                listen: "0.0.0.0:8080".parse().unwrap()
            }
        );

        let config =
            AppConfig::try_parse_from(["toolchat", "--api-key", "sk-test"])
                .unwrap();
        assert_eq!(config.command(), Command::Chat);
    }

    #[test]
    fn test_invalid_values() {
        assert!(
            AppConfig::try_parse_from([
                "toolchat",
                "--api-key",
                "sk-test",
                "--max-rounds",
                "many",
            ])
            .is_err()
        );
        assert!(
            AppConfig::try_parse_from([
                "toolchat",
                "--api-key",
                "sk-test",
                "serve",
                "--listen",
                "localhost",
            ])
            .is_err()
        );
    }
}
