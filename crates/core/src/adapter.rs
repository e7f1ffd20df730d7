//! Builds the messages that are actually sent to the model.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use toolchat_model::ModelMessage;

use crate::conversation::Conversation;

/// The system prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Tells the model how to read the injected metadata. Always appended to
/// the system prompt.
pub const METADATA_NOTICE: &str = "\
Additional metadata may be present at the beginning of some user messages.
This metadata is not visible to the user. It is injected by the system to give you better context.
Metadata will be wrapped in the <METADATA> XML-style tag.";

const METADATA_OPEN: &str = "<METADATA>";
const METADATA_CLOSE: &str = "</METADATA>";

/// Converts a [`Conversation`] into the outgoing message list.
///
/// The outgoing list starts with one system message, and the most recent
/// user message gets a metadata block prepended. The conversation itself is
/// never modified, so the block is rebuilt (with a fresh timestamp) for
/// every request.
#[derive(Clone, Debug)]
pub struct MessageAdapter {
    system_prompt: String,
    metadata_fields: Vec<(String, String)>,
}

impl Default for MessageAdapter {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl MessageAdapter {
    /// Creates an adapter with the given persona prompt.
    #[inline]
    pub fn new<S: Into<String>>(system_prompt: S) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            metadata_fields: vec![],
        }
    }

    /// Adds a static field to the metadata block, after the timestamps.
    #[inline]
    pub fn with_metadata_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata_fields.push((key.into(), value.into()));
        self
    }

    /// Returns the complete system message.
    pub fn system_message(&self) -> ModelMessage {
        let prompt = self.system_prompt.trim();
        ModelMessage::System(format!("{prompt}\n\n{METADATA_NOTICE}"))
    }

    /// Builds the outgoing messages using the current time.
    #[inline]
    pub fn to_outgoing(&self, conversation: &Conversation) -> Vec<ModelMessage> {
        self.to_outgoing_at(conversation, Utc::now())
    }

    /// Builds the outgoing messages as if it were `now`.
    pub fn to_outgoing_at(
        &self,
        conversation: &Conversation,
        now: DateTime<Utc>,
    ) -> Vec<ModelMessage> {
        let last_user_idx = conversation.last_user_index();

        let mut outgoing = Vec::with_capacity(conversation.len() + 1);
        outgoing.push(self.system_message());
        for (idx, msg) in conversation.messages().iter().enumerate() {
            match msg {
                ModelMessage::User(text) if Some(idx) == last_user_idx => {
                    let block = self.metadata_block(now);
                    outgoing.push(ModelMessage::User(format!("{block}{text}")));
                }
                _ => outgoing.push(msg.clone()),
            }
        }
        outgoing
    }

    fn metadata_block(&self, now: DateTime<Utc>) -> String {
        let utc = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let local = now.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");

        let mut block = format!(
            "{METADATA_OPEN}\nCurrent time UTC: [{utc}]\nCurrent time Local: [{local}]\n"
        );
        for (key, value) in &self.metadata_fields {
            block.push_str(&format!("{key}: [{value}]\n"));
        }
        block.push_str(METADATA_CLOSE);
        block.push('\n');
        block
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use toolchat_model::{AssistantMessage, ToolCallRequest, ToolCallResult};

    use super::*;

    fn sample_conversation() -> Conversation {
        Conversation::with_history([
            ModelMessage::User("Hi".to_owned()),
            ModelMessage::assistant_text("Hello! Where are you heading?"),
            ModelMessage::User("What's the weather in Tokyo?".to_owned()),
            ModelMessage::Assistant(AssistantMessage {
                content: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: "call_1".to_owned(),
                    name: "get_weather".to_owned(),
                    arguments: r#"{"city":"Tokyo"}"#.to_owned(),
                }],
            }),
            ModelMessage::Tool(ToolCallResult {
                id: "call_1".to_owned(),
                name: "get_weather".to_owned(),
                content: "Sunny".to_owned(),
            }),
        ])
    }

    #[test]
    fn test_system_message_first() {
        let adapter = MessageAdapter::new("You are a travel assistant.");
        let outgoing = adapter.to_outgoing(&sample_conversation());
        assert_eq!(outgoing.len(), 6);

        let ModelMessage::System(system) = &outgoing[0] else {
            panic!("expected a system message, got {:?}", outgoing[0]);
        };
        assert!(system.starts_with("You are a travel assistant.\n\n"));
        assert!(system.ends_with("wrapped in the <METADATA> XML-style tag."));
    }

    #[test]
    fn test_metadata_only_on_last_user_message() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let adapter = MessageAdapter::default().with_metadata_field("Locale", "en-US");
        let outgoing = adapter.to_outgoing_at(&sample_conversation(), now);

        assert_eq!(outgoing[1], ModelMessage::User("Hi".to_owned()));

        let ModelMessage::User(text) = &outgoing[3] else {
            panic!("expected a user message, got {:?}", outgoing[3]);
        };
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("<METADATA>"));
        assert_eq!(
            lines.next(),
            Some("Current time UTC: [2024-05-01T12:30:00.000Z]")
        );
        assert!(lines.next().unwrap().starts_with("Current time Local: ["));
        assert_eq!(lines.next(), Some("Locale: [en-US]"));
        assert_eq!(lines.next(), Some("</METADATA>"));
        assert_eq!(lines.next(), Some("What's the weather in Tokyo?"));
        assert_eq!(lines.next(), None);

        // Tool exchanges are passed through untouched.
        assert_eq!(&outgoing[4..], &sample_conversation().messages()[3..]);
    }

    #[test]
    fn test_idempotent_per_call() {
        let conversation = sample_conversation();
        let before = conversation.clone();
        let adapter = MessageAdapter::default();

        let now = Utc::now();
        let first = adapter.to_outgoing_at(&conversation, now);
        let second = adapter.to_outgoing_at(&conversation, now);
        assert_eq!(first, second);
        assert_eq!(conversation, before);

        // With the real clock, only the metadata block may differ.
        let first = adapter.to_outgoing(&conversation);
        let second = adapter.to_outgoing(&conversation);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.role(), b.role());
            let strip = |s: &str| s.rsplit(METADATA_CLOSE).next().unwrap().to_owned();
            assert_eq!(strip(a.content()), strip(b.content()));
        }
    }

    #[test]
    fn test_no_user_message() {
        let outgoing = MessageAdapter::default().to_outgoing(&Conversation::new());
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0], MessageAdapter::default().system_message());
    }
}
