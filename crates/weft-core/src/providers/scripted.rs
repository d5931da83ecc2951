//! Provider that replays canned responses.
//!
//! Used by the `weft run` host command and by tests. A script is plain text
//! with responses separated by lines containing only `---`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{GenerateFuture, GenerationProvider, ProviderError, ProviderErrorKind, ProviderResult};

/// Separator line between responses in a script.
pub const SCRIPT_SEPARATOR: &str = "---";

/// One recorded `generate` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateCall {
    pub system_prompt: String,
    pub context: String,
    pub query: String,
}

#[derive(Debug, Default)]
struct ScriptState {
    replies: VecDeque<ProviderResult<String>>,
    calls: Vec<GenerateCall>,
}

/// Replays queued replies in order.
///
/// When the queue runs dry the provider either repeats a fixed fallback
/// reply or fails with [`ProviderErrorKind::Exhausted`].
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    state: Mutex<ScriptState>,
    fallback: Option<String>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(ScriptState {
                replies: replies.into_iter().map(|r| Ok(r.into())).collect(),
                calls: Vec::new(),
            }),
            fallback: None,
        }
    }

    /// Provider that answers every call with `reply`.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    /// Parses a `---`-separated script.
    pub fn from_script(script: &str) -> Self {
        let mut replies = Vec::new();
        let mut current = Vec::new();
        for line in script.lines() {
            if line.trim() == SCRIPT_SEPARATOR {
                replies.push(current.join("\n"));
                current.clear();
            } else {
                current.push(line);
            }
        }
        if !current.is_empty() {
            replies.push(current.join("\n"));
        }
        Self::new(
            replies
                .into_iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
        )
    }

    /// Queues a failure for the next call.
    #[must_use]
    pub fn then_fail(self, error: ProviderError) -> Self {
        self.lock().replies.push_back(Err(error));
        self
    }

    /// Queues another successful reply.
    #[must_use]
    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        self.lock().replies.push_back(Ok(reply.into()));
        self
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<GenerateCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, call: GenerateCall) -> ProviderResult<String> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.replies.pop_front() {
            Some(reply) => reply,
            None => self.fallback.clone().ok_or_else(|| {
                ProviderError::new(ProviderErrorKind::Exhausted, "Script exhausted")
                    .with_details(format!("{} calls served", state.calls.len() - 1))
            }),
        }
    }
}

impl GenerationProvider for ScriptedProvider {
    fn generate<'a>(
        &'a self,
        system_prompt: &'a str,
        context: &'a str,
        query: &'a str,
    ) -> GenerateFuture<'a> {
        let reply = self.next_reply(GenerateCall {
            system_prompt: system_prompt.to_string(),
            context: context.to_string(),
            query: query.to_string(),
        });
        Box::pin(async move { reply })
    }
}
