//! Scripted model double for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::LanguageModel;

/// A language model that replays a script of canned replies.
///
/// Replies are consumed in order across both completion entry points; once
/// the script is exhausted the last reply repeats. `MockModel::failing`
/// builds a model whose every call errors, for exercising fallback paths.
pub struct MockModel {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    fail: bool,
    calls: AtomicU64,
}

impl MockModel {
    /// A model that always answers with `reply`.
    pub fn completing(reply: impl Into<String>) -> Self {
        Self::scripted(vec![reply.into()])
    }

    /// A model that replays `replies` in order, repeating the last.
    pub fn scripted(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            fail: false,
            calls: AtomicU64::new(0),
        }
    }

    /// A model whose every call fails.
    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            fail: true,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn next_reply(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            anyhow::bail!("mock model configured to fail");
        }
        let mut replies = self.replies.lock().await;
        let mut last = self.last.lock().await;
        match replies.pop_front() {
            Some(reply) => {
                *last = Some(reply.clone());
                Ok(reply)
            }
            None => last
                .clone()
                .ok_or_else(|| anyhow::anyhow!("mock model script is empty")),
        }
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.next_reply().await
    }

    async fn complete_with_system(&self, _system: &str, _user: &str) -> Result<String> {
        self.next_reply().await
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_replays_in_order_then_repeats() {
        let model = MockModel::scripted(vec!["one".to_string(), "two".to_string()]);
        assert_eq!(model.complete("p").await.unwrap(), "one");
        assert_eq!(model.complete_with_system("s", "p").await.unwrap(), "two");
        assert_eq!(model.complete("p").await.unwrap(), "two");
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn failing_model_errors_every_call() {
        let model = MockModel::failing();
        assert!(model.complete("p").await.is_err());
        assert!(model.complete_with_system("s", "p").await.is_err());
    }
}
