//! Memory subsystem contract.
//!
//! The orchestrator recalls prior context before a task and archives one
//! [`MemoryPage`] after it. Ranking, search and durable storage belong to
//! the implementation; [`InMemoryStore`] is a bounded reference store keyed
//! by session.

mod store;

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use store::InMemoryStore;

/// Highest importance score.
pub const MAX_IMPORTANCE: u8 = 100;

/// Importance added when the response mentions the domain keyword.
const KEYWORD_BONUS: u32 = 30;

/// Response bytes per importance point (length share capped at 70).
const BYTES_PER_POINT: usize = 20;
const LENGTH_SCORE_CAP: u32 = 70;

/// Unit of archived context. Owned by the memory subsystem after hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPage {
    pub id: Uuid,
    /// Recall key (the session id).
    pub key: String,
    pub content: String,
    /// 0..=100
    pub importance: u8,
    pub last_accessed: DateTime<Utc>,
    pub tags: BTreeSet<String>,
}

impl MemoryPage {
    pub fn new(
        key: impl Into<String>,
        content: impl Into<String>,
        importance: u8,
        tags: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            content: content.into(),
            importance: importance.min(MAX_IMPORTANCE),
            last_accessed: Utc::now(),
            tags: tags.into_iter().collect(),
        }
    }
}

/// Scores a response for archival.
///
/// One point per 20 bytes of content (at most 70), plus 30 when `keyword`
/// occurs case-insensitively. Clamped to 100.
pub fn score_importance(content: &str, keyword: &str) -> u8 {
    let length_score = ((content.len() / BYTES_PER_POINT) as u32).min(LENGTH_SCORE_CAP);
    let keyword = keyword.trim();
    let bonus = if !keyword.is_empty()
        && content
            .to_lowercase()
            .contains(&keyword.to_lowercase())
    {
        KEYWORD_BONUS
    } else {
        0
    };
    (length_score + bonus).min(u32::from(MAX_IMPORTANCE)) as u8
}

/// Failure reported by a memory subsystem. Never surfaced to task callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryError {
    pub message: String,
}

impl MemoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory subsystem error: {}", self.message)
    }
}

impl std::error::Error for MemoryError {}

/// Point-in-time counters exposed by a memory subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTelemetry {
    pub pages: usize,
    pub capacity: usize,
    pub recalls: u64,
    pub hits: u64,
    pub archived: u64,
    pub evicted: u64,
}

pub type MemoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MemoryError>> + Send + 'a>>;

/// Contract between the orchestrator and long-term memory.
pub trait MemorySubsystem: Send + Sync {
    /// Most relevant page for `key`, or `None` on a miss.
    fn recall<'a>(&'a self, key: &'a str) -> MemoryFuture<'a, Option<MemoryPage>>;

    /// Takes ownership of `page` for archival.
    fn manage_memory(&self, page: MemoryPage) -> MemoryFuture<'_, ()>;

    fn telemetry(&self) -> MemoryTelemetry;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_grows_with_length_and_caps() {
        assert_eq!(score_importance("", "critical"), 0);
        assert_eq!(score_importance(&"a".repeat(200), "critical"), 10);
        assert_eq!(score_importance(&"a".repeat(10_000), "critical"), 70);
    }

    #[test]
    fn test_keyword_bonus_is_case_insensitive() {
        assert_eq!(score_importance("A CRITICAL fix", "critical"), 30);
        assert_eq!(
            score_importance(&format!("critical {}", "a".repeat(10_000)), "critical"),
            100
        );
    }

    #[test]
    fn test_blank_keyword_never_matches() {
        assert_eq!(score_importance("anything", "  "), 0);
    }

    #[test]
    fn test_page_importance_is_clamped() {
        let page = MemoryPage::new("s", "c", 250, Vec::new());
        assert_eq!(page.importance, MAX_IMPORTANCE);
    }
}
