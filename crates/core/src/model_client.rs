use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use toolchat_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, ToolCallRequest,
};
use tracing::Instrument;

pub(crate) type DeltaCallback = Arc<dyn Fn(&str) + Send + Sync>;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Option<DeltaCallback>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that collects a streamed response
/// into one value and provides a type-erased interface for the other
/// modules.
#[derive(Clone)]
pub(crate) struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // Erase `P` so that the orchestrator doesn't need a generic
        // parameter.
        let handler_fn: HandlerFn = Arc::new(move |req, on_delta| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!(
                        "sending {} messages with {} tools",
                        req.messages.len(),
                        req.tools.len()
                    );
                    let resp_or_err = fut.await;
                    collect_response::<P>(resp_or_err, on_delta).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and waits for the complete response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_delta: Option<DeltaCallback>,
    ) -> SendRequestResult {
        (self.handler_fn)(req, on_delta).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default)]
pub(crate) struct ModelClientResponse {
    /// Concatenated text deltas.
    pub text: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn collect_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_delta: Option<DeltaCallback>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("request failed: {err}");
            return Err(Box::new(err));
        }
    };

    let mut collected = ModelClientResponse::default();
    let mut pinned_resp = pin!(resp);
    loop {
        let event =
            match poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await
            {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    error!("response stream failed: {err}");
                    return Err(Box::new(err));
                }
            };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                if let Some(on_delta) = &on_delta {
                    on_delta(&delta);
                }
                collected.text.push_str(&delta);
            }
            ModelResponseEvent::ToolCall(req) => {
                collected.tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                collected.finish_reason = Some(reason);
            }
        }
    }

    match collected.finish_reason {
        None => warn!("response ended without a finish reason"),
        Some(ModelFinishReason::ToolCalls) if collected.tool_calls.is_empty() => {
            warn!("model reported tool calls but sent none");
        }
        Some(ModelFinishReason::Length) => {
            warn!("response was truncated by the token limit");
        }
        _ => {}
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use toolchat_model::{ErrorKind, ModelMessage};
    use toolchat_test_model::{
        Error as TestModelError, PresetEvent, PresetResponse,
        TestModelProvider,
    };

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let provider = TestModelProvider::default();
        for _ in 0..3 {
            provider.add_response(PresetResponse::with_events([
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are ".to_owned()),
                PresetEvent::MessageDelta("you?".to_owned()),
            ]));
        }
        let model_client = ModelClient::new(provider.clone());

        for _ in 0..3 {
            let deltas = Arc::new(Mutex::new(Vec::<String>::new()));
            let on_delta: DeltaCallback = {
                let deltas = Arc::clone(&deltas);
                Arc::new(move |delta: &str| {
                    deltas.lock().unwrap().push(delta.to_owned());
                })
            };
            let resp = model_client
                .send_request(request(), Some(on_delta))
                .await
                .unwrap();
            assert_eq!(resp.text, "How are you?");
            assert!(resp.tool_calls.is_empty());
            assert_eq!(resp.finish_reason, Some(ModelFinishReason::Stop));
            assert_eq!(deltas.lock().unwrap().len(), 3);
        }
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn test_collect_tool_calls() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::tool_calls([
            ("call_1", "get_weather", r#"{"city":"Tokyo"}"#),
            ("call_2", "get_weather", r#"{"city":"London"}"#),
        ]));
        let model_client = ModelClient::new(provider);

        let resp = model_client.send_request(request(), None).await.unwrap();
        assert!(resp.text.is_empty());
        assert_eq!(resp.finish_reason, Some(ModelFinishReason::ToolCalls));
        let ids: Vec<_> = resp.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["call_1", "call_2"]);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let provider = TestModelProvider::default();
        provider.add_failure(TestModelError::new(
            "service unavailable",
            ErrorKind::Unreachable,
            Some(503),
        ));
        let model_client = ModelClient::new(provider);

        let err = model_client.send_request(request(), None).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.to_string(), "service unavailable");
    }
}
