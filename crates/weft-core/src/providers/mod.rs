//! Generation provider contract.
//!
//! The kernel never talks to a model directly; hosts inject a
//! [`GenerationProvider`] that turns a system framing, context and query
//! into output text.

pub mod scripted;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

pub use scripted::ScriptedProvider;

/// Categories of provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Transport failure (connection reset, DNS, ...)
    Network,
    /// Rate limit or quota exhausted
    Quota,
    /// Provider response could not be interpreted
    Parse,
    /// Request did not finish in time
    Timeout,
    /// Provider ran out of scripted or cached output
    Exhausted,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Network => write!(f, "network"),
            ProviderErrorKind::Quota => write!(f, "quota"),
            ProviderErrorKind::Parse => write!(f, "parse"),
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Structured provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Error category
    pub kind: ProviderErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl ProviderError {
    /// Creates a new provider error.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Quota, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Boxed future returned by [`GenerationProvider::generate`].
pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = ProviderResult<String>> + Send + 'a>>;

/// External generation step.
///
/// Implementations may block on network I/O; the kernel does not hold any
/// lock while awaiting the returned future.
pub trait GenerationProvider: Send + Sync {
    fn generate<'a>(
        &'a self,
        system_prompt: &'a str,
        context: &'a str,
        query: &'a str,
    ) -> GenerateFuture<'a>;
}
