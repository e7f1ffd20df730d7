//! Conversation-related types.

use toolchat_model::{ModelMessage, Role};

/// The history of one conversation.
///
/// A conversation only grows: callers add user inputs (or seed prior
/// history when resuming one), and the orchestrator appends the assistant
/// and tool messages it produces while answering. Each conversation is an
/// independent value, sharing one between concurrent turns is prevented by
/// requiring `&mut` access.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

impl Conversation {
    /// Creates an empty conversation.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation from prior history.
    #[inline]
    pub fn with_history<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = ModelMessage>,
    {
        Self {
            messages: messages.into_iter().collect(),
        }
    }

    /// Appends a user input.
    #[inline]
    pub fn push_user_input<S: Into<String>>(&mut self, input: S) {
        self.messages.push(ModelMessage::User(input.into()));
    }

    #[inline]
    pub(crate) fn push(&mut self, msg: ModelMessage) {
        trace!("appending a {} message", msg.role());
        self.messages.push(msg);
    }

    /// Returns all messages in order.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the most recent message.
    #[inline]
    pub fn last(&self) -> Option<&ModelMessage> {
        self.messages.last()
    }

    /// Returns the index of the most recent user message.
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|msg| msg.role() == Role::User)
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there are no messages yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
