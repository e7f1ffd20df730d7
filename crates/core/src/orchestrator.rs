mod builder;

use std::time::Duration;

use tokio::select;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use toolchat_model::{
    AssistantMessage, ModelMessage, ModelRequest, ToolCallRequest,
};
use tracing::Instrument;

use crate::adapter::MessageAdapter;
use crate::conversation::Conversation;
use crate::error::Error;
use crate::model_client::{DeltaCallback, ModelClient, ModelClientResponse};
use crate::tool::{ExecutionOutcome, Executor as ToolExecutor, Registry};
pub use builder::OrchestratorBuilder;

/// The default number of tool rounds allowed in one turn.
pub const DEFAULT_MAX_ROUNDS: u32 = 8;

pub(crate) type StageCallback = Box<dyn Fn(Stage) + Send + Sync>;

/// The stages a turn goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Assembling the outgoing messages and tool schemas.
    BuildingRequest,
    /// Waiting for the model to respond.
    AwaitingModel,
    /// Running the tools the model asked for.
    ExecutingTools,
    /// Recording the final answer.
    Finalizing,
}

/// How a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Termination {
    /// The model produced a final answer.
    Completed,
    /// The model kept asking for tools beyond the round limit.
    RoundLimitReached,
    /// The turn ran out of time.
    DeadlineExceeded,
}

/// The answer of a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// The text appended to the conversation as the assistant's answer.
    pub text: String,
    /// Number of tool rounds executed.
    pub rounds: u32,
    /// Why the turn ended.
    pub termination: Termination,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Limits {
    pub max_rounds: u32,
    pub max_duration: Option<Duration>,
}

/// Drives the exchange between a conversation, the model and the tools.
///
/// The orchestrator holds no per-conversation state, so one instance can
/// serve any number of conversations concurrently. The conversation is
/// passed to every turn explicitly.
pub struct Orchestrator {
    model_client: ModelClient,
    registry: Registry,
    adapter: MessageAdapter,
    limits: Limits,
    on_delta: Option<DeltaCallback>,
    on_stage: Option<StageCallback>,
}

impl Orchestrator {
    /// Returns the registered tools.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the message adapter.
    #[inline]
    pub fn adapter(&self) -> &MessageAdapter {
        &self.adapter
    }

    /// Answers the latest user input of `conversation`.
    ///
    /// The model is queried repeatedly until it answers without requesting
    /// tools. Every message produced along the way is appended to the
    /// conversation. A backend failure aborts the turn and leaves the
    /// conversation as it was before the failed request.
    ///
    /// # Cancellation
    ///
    /// When `cancel` fires while waiting for the model, the conversation is
    /// left untouched. When it fires while tools are running, the
    /// unfinished calls are answered with a cancellation notice so that
    /// every tool call in the history keeps its result. In both cases
    /// [`Error::Cancelled`] is returned.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, Error> {
        let span = debug_span!("turn", history = conversation.len());
        self.run_turn_inner(conversation, cancel)
            .instrument(span)
            .await
    }

    async fn run_turn_inner(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, Error> {
        let deadline = self.limits.max_duration.map(|d| Instant::now() + d);
        let mut rounds = 0;
        let mut last_text = String::new();

        loop {
            self.enter(Stage::BuildingRequest);
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(self.stop_early(
                    conversation,
                    Termination::DeadlineExceeded,
                    rounds,
                    &last_text,
                ));
            }
            let request = ModelRequest {
                messages: self.adapter.to_outgoing(conversation),
                tools: self.registry.schemas(),
            };

            self.enter(Stage::AwaitingModel);
            let Some(resp) = self.await_model(request, deadline, cancel).await?
            else {
                return Ok(self.stop_early(
                    conversation,
                    Termination::DeadlineExceeded,
                    rounds,
                    &last_text,
                ));
            };
            let ModelClientResponse {
                text, tool_calls, ..
            } = resp;

            if tool_calls.is_empty() {
                self.enter(Stage::Finalizing);
                conversation.push(ModelMessage::assistant_text(text.clone()));
                return Ok(TurnOutcome {
                    text,
                    rounds,
                    termination: Termination::Completed,
                });
            }

            if rounds >= self.limits.max_rounds {
                warn!(
                    "model requested {} more tools after {rounds} rounds",
                    tool_calls.len()
                );
                if !text.is_empty() {
                    last_text = text;
                }
                return Ok(self.stop_early(
                    conversation,
                    Termination::RoundLimitReached,
                    rounds,
                    &last_text,
                ));
            }

            self.enter(Stage::ExecutingTools);
            conversation.push(ModelMessage::Assistant(AssistantMessage {
                content: text.clone(),
                tool_calls: tool_calls.clone(),
            }));
            let outcome = self.await_tools(tool_calls, deadline, cancel).await;
            for result in outcome.results {
                conversation.push(ModelMessage::Tool(result));
            }

            rounds += 1;
            if !text.is_empty() {
                last_text = text;
            }

            if outcome.cancelled {
                if cancel.is_cancelled() {
                    debug!("cancelled while running tools");
                    return Err(Error::Cancelled);
                }
                warn!("tools did not finish before the deadline");
                return Ok(self.stop_early(
                    conversation,
                    Termination::DeadlineExceeded,
                    rounds,
                    &last_text,
                ));
            }
        }
    }

    /// Runs the requested tools until they finish, `cancel` fires or the
    /// deadline expires. Unfinished calls are answered with a cancellation
    /// notice in the latter two cases.
    async fn await_tools(
        &self,
        tool_calls: Vec<ToolCallRequest>,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let Some(deadline) = deadline else {
            return ToolExecutor::execute_all(&self.registry, tool_calls, cancel)
                .await;
        };

        let tools_cancel = cancel.child_token();
        let run =
            ToolExecutor::execute_all(&self.registry, tool_calls, &tools_cancel);
        tokio::pin!(run);
        select! {
            biased;

            outcome = &mut run => outcome,
            _ = sleep_until(deadline) => {
                tools_cancel.cancel();
                run.await
            }
        }
    }

    /// Sends a request, racing it against cancellation and the deadline.
    ///
    /// Returns `Ok(None)` when the deadline expires first.
    async fn await_model(
        &self,
        request: ModelRequest,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<Option<ModelClientResponse>, Error> {
        let send = self.model_client.send_request(request, self.on_delta.clone());
        let bounded = async move {
            match deadline {
                Some(deadline) => timeout_at(deadline, send).await.ok(),
                None => Some(send.await),
            }
        };

        select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("cancelled while waiting for the model");
                Err(Error::Cancelled)
            }
            resp = bounded => match resp {
                Some(Ok(resp)) => Ok(Some(resp)),
                Some(Err(err)) => Err(Error::from(err)),
                None => {
                    warn!("model did not respond before the deadline");
                    Ok(None)
                }
            },
        }
    }

    /// Ends the turn without a final answer from the model, recording a
    /// partial answer instead.
    fn stop_early(
        &self,
        conversation: &mut Conversation,
        termination: Termination,
        rounds: u32,
        last_text: &str,
    ) -> TurnOutcome {
        self.enter(Stage::Finalizing);
        let note = match termination {
            Termination::RoundLimitReached => format!(
                "I stopped after {rounds} rounds of tool calls without reaching a final answer."
            ),
            _ => "I ran out of time before reaching a final answer.".to_owned(),
        };
        let text = if last_text.is_empty() {
            note
        } else {
            format!("{last_text}\n\n{note}")
        };
        conversation.push(ModelMessage::assistant_text(text.clone()));
        TurnOutcome {
            text,
            rounds,
            termination,
        }
    }

    #[inline]
    fn enter(&self, stage: Stage) {
        trace!("entering {stage:?}");
        if let Some(on_stage) = &self.on_stage {
            on_stage(stage);
        }
    }
}
