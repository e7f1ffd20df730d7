use std::sync::Arc;

use toolchat_core::conversation::Conversation;
use toolchat_core::{CancellationToken, Error, Orchestrator, TurnOutcome};
use toolchat_model::ModelMessage;

/// A chat session, like a window that displays messages and has an input box.
///
/// The session owns one conversation and shares the orchestrator with any
/// other session, so several sessions can run side by side.
pub struct Session {
    orchestrator: Arc<Orchestrator>,
    conversation: Conversation,
}

impl Session {
    /// Creates a session with an empty conversation.
    #[inline]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            conversation: Conversation::new(),
        }
    }

    /// Creates a session that resumes from prior history.
    pub fn with_history<I>(orchestrator: Arc<Orchestrator>, history: I) -> Self
    where
        I: IntoIterator<Item = ModelMessage>,
    {
        Self {
            orchestrator,
            conversation: Conversation::with_history(history),
        }
    }

    /// Sends a message and waits for the assistant to answer it.
    ///
    /// The message stays in the history even if the turn fails, so it is
    /// answered together with the next one.
    pub async fn send_message(
        &mut self,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, Error> {
        self.conversation.push_user_input(message);
        self.orchestrator
            .run_turn(&mut self.conversation, cancel)
            .await
    }

    /// Returns all messages exchanged so far.
    #[inline]
    pub fn history(&self) -> &[ModelMessage] {
        self.conversation.messages()
    }
}

#[cfg(test)]
mod tests {
    use toolchat_core::{OrchestratorBuilder, Termination};
    use toolchat_model::Role;
    use toolchat_test_model::{PresetResponse, TestModelProvider};

    use super::*;
    use crate::tools::WeatherTool;

    #[tokio::test]
    async fn test_multi_turn() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::text("Hi! Where are you going?"));
        provider.add_response(PresetResponse::tool_calls([(
            "call_1",
            "get_weather",
            r#"{"city":"London"}"#,
        )]));
        provider.add_response(PresetResponse::text("Bring an umbrella."));

        let orchestrator = OrchestratorBuilder::with_model_provider(provider.clone())
            .with_tool(WeatherTool::new())
            .build();
        let mut session = Session::new(Arc::new(orchestrator));
        let cancel = CancellationToken::new();

        let outcome = session.send_message("Hello", &cancel).await.unwrap();
        assert_eq!(outcome.text, "Hi! Where are you going?");

        let outcome = session.send_message("London", &cancel).await.unwrap();
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.text, "Bring an umbrella.");

        let roles: Vec<_> = session.history().iter().map(|m| m.role()).collect();
        assert_eq!(
            roles,
            [
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
            ]
        );
        assert_eq!(
            session.history()[4].content(),
            "The weather in London is Rainy with a temperature of 15°C"
        );

        // The earlier user message is sent without metadata.
        let last_request = provider.requests().pop().unwrap();
        assert_eq!(last_request.messages[1].content(), "Hello");
        assert!(last_request.messages[3].content().starts_with("<METADATA>"));
    }
}
