//! Method dispatch
//!
//! Orchestrator calls are matched against the closed [`Method`] set and
//! routed to the corresponding [`CrashHandlers`] operation. Every outcome,
//! including a panicking handler, is reported as a [`DispatchResult`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use cb_protocol::{extract_text, DispatchResult, HandlerOutput, Method, Params};

/// Domain operations behind the dispatchable methods
#[async_trait]
pub trait CrashHandlers: Send + Sync {
    /// Run one command inside the active crash session
    async fn crash_command(&self, params: &Params) -> anyhow::Result<HandlerOutput>;

    /// Describe the session and environment
    async fn get_crash_info(&self, params: &Params) -> anyhow::Result<HandlerOutput>;

    /// Enumerate available dumps
    async fn list_crash_dumps(&self, params: &Params) -> anyhow::Result<HandlerOutput>;

    /// Open a session on a dump
    async fn start_crash_session(&self, params: &Params) -> anyhow::Result<HandlerOutput>;

    /// Close the active session
    async fn close_crash_session(&self, params: &Params) -> anyhow::Result<HandlerOutput>;
}

/// Routes method names to handlers
#[derive(Clone)]
pub struct MethodDispatcher {
    handlers: Arc<dyn CrashHandlers>,
}

impl MethodDispatcher {
    pub fn new(handlers: Arc<dyn CrashHandlers>) -> Self {
        Self { handlers }
    }

    /// Invoke the handler for `name`
    ///
    /// Names outside the fixed set fail without touching any handler.
    pub async fn dispatch(&self, name: &str, params: Params) -> DispatchResult {
        let Some(method) = Method::from_name(name) else {
            tracing::warn!("Rejected call to unknown method {:?}", name);
            return DispatchResult::failure(format!("Unknown method: {}", name));
        };

        tracing::info!("Handling orchestrator call: {}", method);

        match AssertUnwindSafe(self.invoke(method, &params))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => DispatchResult::success(extract_text(&output)),
            Ok(Err(e)) => {
                tracing::error!("{} failed: {:#}", method, e);
                DispatchResult::failure(format!("{:#}", e))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("{} handler panicked: {}", method, message);
                DispatchResult::failure(format!("Handler for {} panicked: {}", method, message))
            }
        }
    }

    async fn invoke(&self, method: Method, params: &Params) -> anyhow::Result<HandlerOutput> {
        let handlers = self.handlers.as_ref();
        match method {
            Method::CrashCommand => handlers.crash_command(params).await,
            Method::GetCrashInfo => handlers.get_crash_info(params).await,
            Method::ListCrashDumps => handlers.list_crash_dumps(params).await,
            Method::StartCrashSession => handlers.start_crash_session(params).await,
            Method::CloseCrashSession => handlers.close_crash_session(params).await,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cb_protocol::ContentBlock;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers every call with "<method> called" and records the order
    #[derive(Default)]
    pub(crate) struct RecordingHandlers {
        pub calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingHandlers {
        fn record(&self, method: Method) -> anyhow::Result<HandlerOutput> {
            self.calls.lock().unwrap().push(method.name());
            Ok(HandlerOutput::text(format!("{} called", method.name())))
        }
    }

    #[async_trait]
    impl CrashHandlers for RecordingHandlers {
        async fn crash_command(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            self.record(Method::CrashCommand)
        }
        async fn get_crash_info(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            self.record(Method::GetCrashInfo)
        }
        async fn list_crash_dumps(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            self.record(Method::ListCrashDumps)
        }
        async fn start_crash_session(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            self.record(Method::StartCrashSession)
        }
        async fn close_crash_session(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            self.record(Method::CloseCrashSession)
        }
    }

    /// Each operation misbehaves in a different way
    struct FaultyHandlers;

    #[async_trait]
    impl CrashHandlers for FaultyHandlers {
        async fn crash_command(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            anyhow::bail!("Test error")
        }
        async fn get_crash_info(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            panic!("session table corrupted")
        }
        async fn list_crash_dumps(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            Ok(HandlerOutput::Blocks(Vec::new()))
        }
        async fn start_crash_session(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            Ok(HandlerOutput::Blocks(vec![
                ContentBlock::Json(json!({"dumps": []})),
                ContentBlock::text("ignored"),
            ]))
        }
        async fn close_crash_session(&self, _: &Params) -> anyhow::Result<HandlerOutput> {
            Ok(HandlerOutput::Empty)
        }
    }

    #[tokio::test]
    async fn test_every_method_routes_to_its_handler() {
        let handlers = Arc::new(RecordingHandlers::default());
        let dispatcher = MethodDispatcher::new(handlers.clone());

        for method in Method::ALL {
            let result = dispatcher.dispatch(method.name(), Params::new()).await;
            assert_eq!(
                result,
                DispatchResult::success(format!("{} called", method.name()))
            );
        }

        let calls = handlers.calls.lock().unwrap().clone();
        let expected: Vec<_> = Method::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(calls, expected);
    }

    #[tokio::test]
    async fn test_unknown_method_never_reaches_handlers() {
        let handlers = Arc::new(RecordingHandlers::default());
        let dispatcher = MethodDispatcher::new(handlers.clone());

        let result = dispatcher.dispatch("unknown_method", Params::new()).await;
        assert_eq!(
            result,
            DispatchResult::failure("Unknown method: unknown_method")
        );

        let result = dispatcher.dispatch("Crash_Command", Params::new()).await;
        assert!(!result.is_success());
        assert!(handlers.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_message_preserved() {
        let dispatcher = MethodDispatcher::new(Arc::new(FaultyHandlers));
        let result = dispatcher.dispatch("crash_command", Params::new()).await;
        assert_eq!(result, DispatchResult::failure("Test error"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failure() {
        let dispatcher = MethodDispatcher::new(Arc::new(FaultyHandlers));
        let result = dispatcher.dispatch("get_crash_info", Params::new()).await;
        match result {
            DispatchResult::Failure { error } => {
                assert!(error.contains("panicked"));
                assert!(error.contains("session table corrupted"));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        // The dispatcher stays usable afterwards
        let result = dispatcher.dispatch("close_crash_session", Params::new()).await;
        assert_eq!(result, DispatchResult::success(""));
    }

    #[tokio::test]
    async fn test_empty_output_is_empty_success() {
        let dispatcher = MethodDispatcher::new(Arc::new(FaultyHandlers));
        let result = dispatcher.dispatch("list_crash_dumps", Params::new()).await;
        assert_eq!(result, DispatchResult::success(""));
    }

    #[tokio::test]
    async fn test_first_block_is_reported() {
        let dispatcher = MethodDispatcher::new(Arc::new(FaultyHandlers));
        let result = dispatcher
            .dispatch("start_crash_session", Params::new())
            .await;
        assert_eq!(result, DispatchResult::success(r#"{"dumps":[]}"#));
    }
}
