use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use toolchat_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::{ChatCompletionChunk, ToolCallDelta};

#[derive(Debug, Default)]
struct PartialToolCall {
    index: u32,
    id: String,
    name: String,
    arguments: String,
}

struct PartialState {
    sse: Sse,
    // Fragments are accumulated until the model finishes.
    tool_calls: Vec<PartialToolCall>,
    pending_events: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl PartialState {
    fn patch_tool_call(&mut self, delta: ToolCallDelta) {
        let partial = match delta.index {
            Some(index) => {
                match self.tool_calls.iter().position(|t| t.index == index) {
                    Some(pos) => &mut self.tool_calls[pos],
                    None => self.push_tool_call(index),
                }
            }
            // Some servers omit the index, a new id starts a new call then.
            None if delta.id.is_some() || self.tool_calls.is_empty() => {
                let index = self.tool_calls.len() as u32;
                self.push_tool_call(index)
            }
            None => {
                let last = self.tool_calls.len() - 1;
                &mut self.tool_calls[last]
            }
        };

        if let Some(id) = delta.id {
            partial.id.push_str(&id);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                partial.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                partial.arguments.push_str(&arguments);
            }
        }
    }

    #[inline]
    fn push_tool_call(&mut self, index: u32) -> &mut PartialToolCall {
        self.tool_calls.push(PartialToolCall {
            index,
            ..Default::default()
        });
        let last = self.tool_calls.len() - 1;
        &mut self.tool_calls[last]
    }

    /// Flushes the accumulated tool calls, followed by the finish reason.
    fn finish(&mut self, finish_reason: Option<ModelFinishReason>) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.tool_calls.sort_by_key(|t| t.index);
        for tool_call in self.tool_calls.drain(..) {
            if tool_call.name.is_empty() {
                warn!("dropping a tool call without name: {tool_call:?}");
                continue;
            }
            self.pending_events
                .push_back(ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: tool_call.id,
                    name: tool_call.name,
                    arguments: tool_call.arguments,
                }));
        }
        if let Some(finish_reason) = finish_reason {
            self.pending_events
                .push_back(ModelResponseEvent::Completed(finish_reason));
        }
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            tool_calls: Default::default(),
            pending_events: Default::default(),
            finished: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let data = match partial_state.sse.next_event().await {
            Ok(Some(data)) if data != "[DONE]" => data,
            Ok(_) => {
                // The stream ended without telling why.
                partial_state.finish(None);
                continue;
            }
            Err(SseError::ChunksError(err)) => {
                return Err(Error::new(
                    format!("connection lost while streaming: {}", err.0),
                    ErrorKind::Unreachable,
                ));
            }
            Err(SseError::InvalidPayload) => {
                return Err(Error::new(
                    "the response stream is not valid UTF-8",
                    ErrorKind::MalformedResponse,
                ));
            }
        };
        trace!("got sse event: {data}");

        let chunk =
            serde_json::from_str::<ChatCompletionChunk>(&data).map_err(|err| {
                Error::new(
                    format!("unexpected chunk: {err}"),
                    ErrorKind::MalformedResponse,
                )
            })?;

        // Usage-only chunks carry no choices.
        for choice in chunk.choices {
            if let Some(content) =
                choice.delta.content.filter(|c| !c.is_empty())
            {
                partial_state
                    .pending_events
                    .push_back(ModelResponseEvent::MessageDelta(content));
            }
            for tool_call in choice.delta.tool_calls.into_iter().flatten() {
                partial_state.patch_tool_call(tool_call);
            }
            if let Some(finish_reason) = choice.finish_reason {
                let finish_reason = match finish_reason.as_str() {
                    "tool_calls" | "function_call" => ModelFinishReason::ToolCalls,
                    "length" => ModelFinishReason::Length,
                    "content_filter" => {
                        return Err(Error::new(
                            "the response was blocked by the content filter",
                            ErrorKind::Moderated,
                        ));
                    }
                    _ => ModelFinishReason::Stop,
                };
                partial_state.finish(Some(finish_reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use toolchat_model::ModelProviderError;

    use super::*;
    use crate::io::Chunks;

    async fn collect_events(
        chunks: Vec<Bytes>,
    ) -> Result<Vec<ModelResponseEvent>, Error> {
        let sse = Sse::new(Chunks::from_vec_deque(chunks.into()));
        let mut resp = pin!(OpenAIResponse::from_sse(sse));
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn test_tool_call_stream() {
        let events = collect_events(vec![Bytes::from_static(include_bytes!(
            "../fixtures/tool_calls.txt"
        ))])
        .await
        .unwrap();

        assert_eq!(
            events,
            [
                ModelResponseEvent::MessageDelta("Let me check ".to_owned()),
                ModelResponseEvent::MessageDelta("both cities.".to_owned()),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_tokyo".to_owned(),
                    name: "get_weather".to_owned(),
                    arguments: r#"{"city": "Tokyo"}"#.to_owned(),
                }),
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_london".to_owned(),
                    name: "get_weather".to_owned(),
                    arguments: r#"{"city": "London"}"#.to_owned(),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_stream_in_small_chunks() {
        let fixture: &'static [u8] = include_bytes!("../fixtures/text.txt");
        let chunks = fixture.chunks(7).map(Bytes::from_static).collect();
        let events = collect_events(chunks).await.unwrap();

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                ModelResponseEvent::MessageDelta(delta) => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "The weather in Tokyo is Sunny with 25°C.");
        assert_eq!(
            events.last(),
            Some(&ModelResponseEvent::Completed(ModelFinishReason::Stop))
        );
    }

    #[tokio::test]
    async fn test_stream_without_finish_reason() {
        let events = collect_events(vec![Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"id\":\"call_1\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"\"}}]}}]}\n\n",
        )])
        .await
        .unwrap();
        assert_eq!(
            events,
            [ModelResponseEvent::ToolCall(ToolCallRequest {
                id: "call_1".to_owned(),
                name: "get_weather".to_owned(),
                arguments: String::new(),
            })]
        );
    }

    #[tokio::test]
    async fn test_malformed_chunk() {
        let err = collect_events(vec![Bytes::from_static(b"data: {oops\n\n")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);

        let err = collect_events(vec![Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"content_filter\"}]}\n\n",
        )])
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Moderated);
    }
}
