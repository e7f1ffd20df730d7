//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use toolchat_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Clone, Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    status: Option<u16>,
}

impl Error {
    #[inline]
    pub fn new<S: Into<String>>(
        message: S,
        kind: ErrorKind,
        status: Option<u16>,
    ) -> Self {
        Self {
            message: message.into(),
            kind,
            status,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    fn status_code(&self) -> Option<u16> {
        self.status
    }
}

#[derive(Clone)]
enum ScriptStep {
    Respond(PresetResponse),
    Fail(Error),
    Stall,
}

#[derive(Default)]
struct Script {
    steps: VecDeque<ScriptStep>,
    requests: Vec<ModelRequest>,
    delay: Option<Duration>,
}

/// A local fake model for testing purpose.
///
/// Every request pops the next step of the script, so the steps must be
/// added in the order the calls are expected. Requests are recorded and
/// can be inspected afterwards. If the script runs out of steps, the
/// request fails with [`ErrorKind::Other`].
///
/// Clones share the same script.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
}

impl TestModelProvider {
    /// Appends a successful response.
    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.lock().steps.push_back(ScriptStep::Respond(preset));
    }

    /// Appends a failed call.
    #[inline]
    pub fn add_failure(&self, error: Error) {
        self.lock().steps.push_back(ScriptStep::Fail(error));
    }

    /// Appends a call whose response never produces any event.
    #[inline]
    pub fn add_stall(&self) {
        self.lock().steps.push_back(ScriptStep::Stall);
    }

    /// Sets the delay between streamed events.
    #[inline]
    pub fn set_delay(&self, duration: Duration) {
        self.lock().delay = Some(duration);
    }

    /// Returns all requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Script> {
        // A panicking test must not poison the others sharing the script.
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let mut script = self.lock();
        script.requests.push(req.clone());
        let delay = script.delay.unwrap_or(Duration::from_millis(1));

        let result = match script.steps.pop_front() {
            Some(ScriptStep::Respond(preset)) => {
                Ok(TestModelResponse::new(preset, delay))
            }
            Some(ScriptStep::Stall) => Ok(TestModelResponse::new(
                PresetResponse::default(),
                Duration::from_secs(3600),
            )),
            Some(ScriptStep::Fail(err)) => Err(err),
            None => {
                Err(Error::new("no enough steps", ErrorKind::Other, None))
            }
        };
        ready(result)
    }
}

pub struct TestModelResponse {
    preset: PresetResponse,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TestModelResponse {
    fn new(preset: PresetResponse, delay: Duration) -> Self {
        Self {
            preset,
            event_idx: 0,
            delay,
            sleep: None,
        }
    }
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        let events = &this.preset.events;
        if this.event_idx > events.len() {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let event = match events.get(this.event_idx) {
            Some(PresetEvent::MessageDelta(msg)) => {
                ModelResponseEvent::MessageDelta(msg.clone())
            }
            Some(PresetEvent::ToolCall(req)) => {
                ModelResponseEvent::ToolCall(req.clone())
            }
            None => ModelResponseEvent::Completed(
                if this.preset.has_tool_call() {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                },
            ),
        };
        this.event_idx += 1;
        Poll::Ready(Ok(Some(event)))
    }
}
