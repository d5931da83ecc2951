//! Tool system for agentic capabilities.
//!
//! Tools are capabilities keyed by exact name. The interrupt protocol in
//! [`protocol`] parses a tool-call block out of generated text and runs the
//! matching handler through [`ToolRegistry::execute_tool`], which enforces a
//! per-tool timeout and cancellation.

pub mod clock;
pub mod echo;
pub mod protocol;
pub mod sleep;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::core::events::ToolOutput;

/// Tool definition advertised to hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Context for one tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Hard limit for the call; enforced by the registry.
    pub timeout: Duration,

    /// Cancelled when the call times out or the caller gives up.
    /// Long-running tools should select on it.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Child context sharing cancellation with `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            timeout: self.timeout,
            cancel: self.cancel.child_token(),
        }
    }
}

/// Async tool handler function.
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutput> + Send>>;
pub type ToolHandler = Arc<dyn Fn(&Value, &ToolContext) -> ToolFuture + Send + Sync>;

/// Tool registry (definitions + executors), keyed by exact name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("definitions", &self.definitions)
            .field("handlers_len", &self.handlers.len())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin host tools (`clock`, `echo`, `sleep`).
    pub fn builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtin_tools();
        registry
    }

    #[must_use]
    pub fn with_tool(mut self, definition: ToolDefinition, handler: ToolHandler) -> Self {
        self.register(definition, handler);
        self
    }

    /// Registers a handler under `definition.name`.
    ///
    /// The first registration of a name wins; later duplicates are ignored
    /// and `false` is returned.
    pub fn register(&mut self, definition: ToolDefinition, handler: ToolHandler) -> bool {
        if self.handlers.contains_key(&definition.name) {
            tracing::warn!(tool = %definition.name, "duplicate tool registration ignored");
            return false;
        }
        self.handlers.insert(definition.name.clone(), handler);
        self.definitions.push(definition);
        true
    }

    /// Registers an async closure as a tool.
    pub fn register_fn<F, Fut>(&mut self, definition: ToolDefinition, f: F) -> bool
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutput> + Send + 'static,
    {
        let f = Arc::new(f);
        self.register(
            definition,
            Arc::new(move |input: &Value, ctx: &ToolContext| -> ToolFuture {
                Box::pin(f(input.clone(), ctx.clone()))
            }),
        )
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Executes `name` with `input`.
    ///
    /// Returns `None` when no tool is registered under `name`. Otherwise the
    /// handler runs on its own task under `ctx.timeout`; on timeout the
    /// context's token is cancelled and the task aborted.
    pub async fn execute_tool(
        &self,
        name: &str,
        input: &Value,
        ctx: &ToolContext,
    ) -> Option<ToolOutput> {
        let handler = self.handlers.get(name)?;
        Some(run_with_timeout(name, handler(input, ctx), ctx).await)
    }

    fn register_builtin_tools(&mut self) {
        self.register(
            echo::definition(),
            Arc::new(|input: &Value, _ctx: &ToolContext| -> ToolFuture {
                let input = input.clone();
                Box::pin(async move { echo::execute(&input) })
            }),
        );

        self.register(
            clock::definition(),
            Arc::new(|input: &Value, _ctx: &ToolContext| -> ToolFuture {
                let input = input.clone();
                Box::pin(async move { clock::execute(&input) })
            }),
        );

        self.register(
            sleep::definition(),
            Arc::new(|input: &Value, ctx: &ToolContext| -> ToolFuture {
                let input = input.clone();
                let ctx = ctx.clone();
                Box::pin(async move { sleep::execute(&input, &ctx).await })
            }),
        );
    }
}

/// Runs a tool future on its own task with a hard timeout.
///
/// The task is aborted if this future is dropped before it finishes.
async fn run_with_timeout(name: &str, fut: ToolFuture, ctx: &ToolContext) -> ToolOutput {
    let mut handle = AbortOnDropHandle::new(tokio::spawn(fut));

    tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => {
            handle.abort();
            ToolOutput::canceled(format!("Tool '{name}' was cancelled"))
        }
        joined = tokio::time::timeout(ctx.timeout, &mut handle) => match joined {
            Ok(Ok(output)) => output,
            Ok(Err(_)) => ToolOutput::failure(
                "panic",
                "Tool execution panicked",
                Some("The tool task panicked or was aborted".to_string()),
            ),
            Err(_) => {
                ctx.cancel.cancel();
                handle.abort();
                tracing::warn!(tool = %name, timeout_ms = ctx.timeout.as_millis() as u64, "tool timed out");
                ToolOutput::failure(
                    "timeout",
                    format!(
                        "Tool execution timed out after {} ms",
                        ctx.timeout.as_millis()
                    ),
                    Some("The call was cancelled; retry with a smaller request".to_string()),
                )
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_none() {
        let registry = ToolRegistry::builtins();
        assert!(registry.execute_tool("missing", &json!({}), &ctx()).await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_is_exact_name() {
        let registry = ToolRegistry::builtins();
        assert!(registry.execute_tool("ECHO", &json!({}), &ctx()).await.is_none());
        let output = registry
            .execute_tool("echo", &json!({"x": 1}), &ctx())
            .await
            .unwrap();
        assert_eq!(output.data(), Some(&json!({"echo": {"x": 1}})));
    }

    #[tokio::test]
    async fn test_first_registration_wins() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register_fn(ToolDefinition::new("search", "first"), |_, _| async {
            ToolOutput::success(json!("first"))
        }));
        assert!(!registry.register_fn(ToolDefinition::new("search", "second"), |_, _| async {
            ToolOutput::success(json!("second"))
        }));

        assert_eq!(registry.definitions().len(), 1);
        assert_eq!(registry.definitions()[0].description, "first");
        let output = registry.execute_tool("search", &json!({}), &ctx()).await.unwrap();
        assert_eq!(output.data(), Some(&json!("first")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_tool_times_out_and_cancels() {
        let mut registry = ToolRegistry::new();
        registry.register_fn(ToolDefinition::new("hang", "never returns"), |_, _| async {
            std::future::pending::<ToolOutput>().await
        });
        let ctx = ToolContext::new(Duration::from_millis(200));

        let output = registry.execute_tool("hang", &json!({}), &ctx).await.unwrap();

        assert_eq!(output.error_code(), Some("timeout"));
        assert!(ctx.cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_aborts_tool_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        let flag = Arc::clone(&finished);
        registry.register_fn(ToolDefinition::new("slow", "finishes late"), move |_, _| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                flag.store(true, Ordering::SeqCst);
                ToolOutput::success(json!(null))
            }
        });

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            registry.execute_tool("slow", &json!({}), &ctx()),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_tool_is_reported() {
        let mut registry = ToolRegistry::new();
        registry.register_fn(ToolDefinition::new("boom", "panics"), |_, _| async {
            if true {
                panic!("boom");
            }
            ToolOutput::success(json!(null))
        });

        let output = registry.execute_tool("boom", &json!({}), &ctx()).await.unwrap();
        assert_eq!(output.error_code(), Some("panic"));
    }

    #[tokio::test]
    async fn test_pre_cancelled_context_short_circuits() {
        let registry = ToolRegistry::builtins();
        let ctx = ctx();
        ctx.cancel.cancel();

        let output = registry
            .execute_tool("sleep", &json!({"ms": 10_000}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.error_code(), Some("canceled"));
    }

    #[test]
    fn test_builtin_definitions_listed_in_registration_order() {
        let names: Vec<_> = ToolRegistry::builtins()
            .definitions()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["echo", "clock", "sleep"]);
    }
}
