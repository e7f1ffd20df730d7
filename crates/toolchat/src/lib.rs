//! A travel assistant that answers questions with the help of tools.
//!
//! The crate includes a CLI tool for chatting in the terminal and an HTTP
//! server exposing the same assistant as a JSON API. You can also use it as
//! a library to bring the assistant into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod server;
mod session;
pub mod tools;

use toolchat_core::OrchestratorBuilder;
use toolchat_model::ModelProvider;

pub use session::Session;

/// Re-exports of [`toolchat_core`] crate.
pub mod core {
    pub use toolchat_core::*;
}

/// The system prompt of the travel assistant.
pub const SYSTEM_PROMPT: &str = include_str!("system_prompt.md");

/// Creates an orchestrator builder for the travel assistant.
///
/// The weather tool is always available. Web search is only registered
/// when a non-empty SerpAPI key is given.
pub fn travel_assistant<P>(
    model_provider: P,
    search_api_key: Option<String>,
) -> OrchestratorBuilder
where
    P: ModelProvider + 'static,
{
    let mut builder = OrchestratorBuilder::with_model_provider(model_provider)
        .with_system_prompt(SYSTEM_PROMPT)
        .with_tool(tools::WeatherTool::new());
    match search_api_key.filter(|key| !key.trim().is_empty()) {
        Some(key) => builder = builder.with_tool(tools::WebSearchTool::new(key)),
        None => info!("SerpAPI key not set, web search is disabled"),
    }
    builder
}

#[cfg(test)]
mod tests {
    use toolchat_test_model::{PresetResponse, TestModelProvider};

    use super::*;

    #[test]
    fn test_tools_registered() {
        let provider = TestModelProvider::default();
        let orchestrator = travel_assistant(provider.clone(), None).build();
        assert!(orchestrator.registry().lookup("get_weather").is_some());
        assert!(orchestrator.registry().lookup("search_web").is_none());

        let orchestrator =
            travel_assistant(provider.clone(), Some("  ".to_owned())).build();
        assert!(orchestrator.registry().lookup("search_web").is_none());

        let orchestrator =
            travel_assistant(provider, Some("serp-key".to_owned())).build();
        assert!(orchestrator.registry().lookup("search_web").is_some());
    }

    #[tokio::test]
    async fn test_system_prompt_sent() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::text("Hello traveler!"));
        let orchestrator = travel_assistant(provider.clone(), None).build();

        let mut session = Session::new(orchestrator.into());
        session
            .send_message("Hi", &toolchat_core::CancellationToken::new())
            .await
            .unwrap();

        let request = provider.requests().pop().unwrap();
        assert!(request.messages[0].content().starts_with(SYSTEM_PROMPT.trim()));
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].name, "get_weather");
    }
}
