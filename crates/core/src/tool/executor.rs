use std::collections::HashMap;

use tokio::select;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use toolchat_model::{ToolCallRequest, ToolCallResult};
use tracing::Instrument;

use super::{Error, Registry, ToolResult};

/// Results of one batch of tool calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// One result per request, in request order.
    pub results: Vec<ToolCallResult>,
    /// Whether the batch was cut short by cancellation. Calls that didn't
    /// finish in time still have a result describing the cancellation.
    pub cancelled: bool,
}

/// Resolves the model's tool call requests against a [`Registry`].
pub struct Executor;

impl Executor {
    /// Executes all requests concurrently and waits for every one of them.
    ///
    /// The batch itself never fails: unknown tools, malformed arguments,
    /// tool errors and panics are all turned into result contents that the
    /// model can read.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future aborts the tools still running.
    pub async fn execute_all(
        registry: &Registry,
        requests: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let span = debug_span!("tool executor", count = requests.len());
        Self::execute_all_inner(registry, requests, cancel)
            .instrument(span)
            .await
    }

    async fn execute_all_inner(
        registry: &Registry,
        requests: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let mut contents: Vec<Option<String>> = vec![None; requests.len()];
        let mut running = JoinSet::new();
        let mut task_indices = HashMap::new();

        for (idx, req) in requests.iter().enumerate() {
            let Some(tool) = registry.lookup(&req.name) else {
                warn!("tool not found: {}", req.name);
                contents[idx] = Some(Error::not_found().to_tool_message(&req.name));
                continue;
            };
            let arguments = match req.parse_arguments() {
                Ok(arguments) => arguments,
                Err(err) => {
                    warn!("malformed arguments for {} ({}): {err}", req.name, req.id);
                    let err = Error::invalid_input().with_reason(err.to_string());
                    contents[idx] = Some(err.to_tool_message(&req.name));
                    continue;
                }
            };

            trace!("spawning a tool ({}) with args: {arguments}", req.id);
            let handle = running.spawn(
                tool.execute(arguments)
                    .instrument(debug_span!("tool execute", name = %req.name)),
            );
            task_indices.insert(handle.id(), idx);
        }

        let mut cancelled = false;
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                finished = running.join_next_with_id() => {
                    let Some(finished) = finished else {
                        break;
                    };
                    let (id, result) = match finished {
                        Ok((id, result)) => (id, result),
                        Err(err) => (err.id(), Err(join_error(err))),
                    };
                    let Some(&idx) = task_indices.get(&id) else {
                        continue;
                    };
                    if let Err(err) = &result {
                        debug!("tool {} failed: {err}", requests[idx].name);
                    }
                    contents[idx] = Some(match result {
                        Ok(output) => output,
                        Err(err) => err.to_tool_message(&requests[idx].name),
                    });
                }
            }
        }

        if cancelled && !running.is_empty() {
            debug!("aborting {} unfinished tools", running.len());
            running.abort_all();
        }

        let results = requests
            .into_iter()
            .zip(contents)
            .map(|(req, content)| ToolCallResult {
                id: req.id,
                content: content.unwrap_or_else(|| {
                    Error::cancelled().to_tool_message(&req.name)
                }),
                name: req.name,
            })
            .collect();
        ExecutionOutcome { results, cancelled }
    }
}

fn join_error(err: JoinError) -> Error {
    if err.is_panic() {
        error!("tool task panicked");
        Error::execution_error().with_reason("the tool crashed")
    } else {
        Error::cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;
    use crate::tool::Tool;

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct SleepInput {
        millis: u64,
        #[serde(default)]
        fail: bool,
        #[serde(default)]
        panic: bool,
    }

    struct SleepTool;

    impl Tool for SleepTool {
        type Input = SleepInput;

        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "Sleeps and reports"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        #[allow(clippy::manual_async_fn)]
        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            async move {
                tokio::time::sleep(Duration::from_millis(input.millis)).await;
                if input.panic {
                    panic!("boom");
                }
                if input.fail {
                    return Err(Error::execution_error().with_reason("no luck"));
                }
                Ok(format!("slept {}ms", input.millis))
            }
        }
    }

    struct CountingTool {
        finished: Arc<AtomicUsize>,
    }

    impl Tool for CountingTool {
        type Input = Value;

        fn name(&self) -> &str {
            "count"
        }

        fn description(&self) -> &str {
            "Counts after a minute"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        #[allow(clippy::manual_async_fn)]
        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            let finished = Arc::clone(&self.finished);
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok("counted".to_owned())
            }
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::default();
        registry.register(SleepTool);
        registry
    }

    fn request(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        // The first call finishes last.
        let requests = vec![
            request("call_1", "sleep", json!({ "millis": 30 })),
            request("call_2", "sleep", json!({ "millis": 1 })),
            request("call_3", "sleep", json!({ "millis": 10 })),
        ];
        let outcome = Executor::execute_all(
            &registry(),
            requests,
            &CancellationToken::new(),
        )
        .await;

        assert!(!outcome.cancelled);
        let ids: Vec<_> = outcome.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["call_1", "call_2", "call_3"]);
        assert_eq!(outcome.results[0].content, "slept 30ms");
        assert_eq!(outcome.results[1].content, "slept 1ms");
        assert_eq!(outcome.results[2].name, "sleep");
    }

    #[tokio::test]
    async fn test_failures_are_absorbed() {
        let requests = vec![
            request("call_1", "teleport", json!({})),
            ToolCallRequest {
                id: "call_2".to_owned(),
                name: "sleep".to_owned(),
                arguments: r#"{"millis": "#.to_owned(),
            },
            request("call_3", "sleep", json!({ "seconds": 1 })),
            request("call_4", "sleep", json!({ "millis": 1, "fail": true })),
            request("call_5", "sleep", json!({ "millis": 1, "panic": true })),
            request("call_6", "sleep", json!({ "millis": 1 })),
        ];
        let outcome = Executor::execute_all(
            &registry(),
            requests,
            &CancellationToken::new(),
        )
        .await;

        let contents: Vec<_> =
            outcome.results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents.len(), 6);
        assert_eq!(contents[0], "Unsupported tool call: teleport");
        assert!(contents[1].starts_with("Invalid arguments for sleep: "));
        assert!(contents[2].contains("missing field `millis`"));
        assert_eq!(contents[3], "Error executing sleep: no luck");
        assert_eq!(contents[4], "Error executing sleep: the tool crashed");
        assert_eq!(contents[5], "slept 1ms");
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let requests = vec![
            request("call_1", "sleep", json!({ "millis": 1 })),
            request("call_2", "sleep", json!({ "millis": 60_000 })),
        ];

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            }
        };
        let registry = registry();
        let (outcome, _) = tokio::join!(
            Executor::execute_all(&registry, requests, &cancel),
            canceller
        );

        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].content, "slept 1ms");
        assert_eq!(
            outcome.results[1].content,
            "Tool call sleep was cancelled."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_aborts_tools() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::default();
        registry.register(CountingTool {
            finished: Arc::clone(&finished),
        });
        let requests = vec![
            request("call_1", "count", json!({})),
            request("call_2", "count", json!({})),
        ];

        let res = tokio::time::timeout(
            Duration::from_secs(1),
            Executor::execute_all(&registry, requests, &CancellationToken::new()),
        )
        .await;
        assert!(res.is_err());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcome = Executor::execute_all(
            &registry(),
            vec![],
            &CancellationToken::new(),
        )
        .await;
        assert!(outcome.results.is_empty());
        assert!(!outcome.cancelled);
    }
}
