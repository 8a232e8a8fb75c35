#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-kernel-core** – Coordination fact-store interface for Ouroboros.
//!
//! The kernel is the small relational engine the core coordinates through:
//! the core asserts facts describing events it has already committed locally
//! and queries derived signals back out. This crate defines the fact model
//! and the `Kernel` trait, plus an in-memory implementation used by tests and
//! by embedders that do not bring their own engine.
//!
//! The kernel is a collaborator, never the source of truth. Callers hold an
//! `Option<Arc<dyn Kernel>>`; an absent handle makes every assertion a no-op
//! and every query empty.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

//─────────────────────────────
//  Fact model
//─────────────────────────────

/// One argument of a fact: a string, an integer, or a boolean.
///
/// Constant arguments are by convention `/`-prefixed strings, e.g.
/// `/tool_generator` or `/pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactArg {
    /// String or `/`-prefixed constant.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
}

impl FactArg {
    /// The string payload, if this argument is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactArg::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this argument is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FactArg::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl std::fmt::Display for FactArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactArg::Str(s) => write!(f, "{:?}", s),
            FactArg::Int(i) => write!(f, "{}", i),
            FactArg::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for FactArg {
    fn from(s: &str) -> Self {
        FactArg::Str(s.to_string())
    }
}

impl From<String> for FactArg {
    fn from(s: String) -> Self {
        FactArg::Str(s)
    }
}

impl From<i64> for FactArg {
    fn from(i: i64) -> Self {
        FactArg::Int(i)
    }
}

impl From<bool> for FactArg {
    fn from(b: bool) -> Self {
        FactArg::Bool(b)
    }
}

/// A predicate name plus its argument tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Predicate name.
    pub predicate: String,
    /// Argument tuple.
    pub args: Vec<FactArg>,
}

impl Fact {
    /// Build a fact from a predicate name and arguments.
    pub fn new(predicate: impl Into<String>, args: Vec<FactArg>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
        }
    }
}

impl std::fmt::Display for Fact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// Shorthand for building a [`Fact`] from mixed argument types.
///
/// ```
/// use ouro_kernel_core::fact;
/// let f = fact!("tool_registered", "json_pretty", 1722470400i64);
/// assert_eq!(f.predicate, "tool_registered");
/// ```
#[macro_export]
macro_rules! fact {
    ($pred:expr $(, $arg:expr)* $(,)?) => {
        $crate::Fact::new($pred, vec![$($crate::FactArg::from($arg)),*])
    };
}

//─────────────────────────────
//  Kernel trait
//─────────────────────────────

/// Errors a kernel implementation may surface.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The fact store rejected an assertion.
    #[error("assertion rejected: {0}")]
    AssertionRejected(String),
    /// A query string could not be evaluated.
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// The narrow surface the core uses to talk to the fact store.
///
/// Implementations must be thread-safe; every operation is cancellable by
/// dropping its future.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Assert one fact.
    async fn assert_fact(&self, fact: Fact) -> Result<()>;

    /// Assert a batch of facts; partial failure aborts the batch.
    async fn assert_fact_batch(&self, facts: Vec<Fact>) -> Result<()> {
        for fact in facts {
            self.assert_fact(fact).await?;
        }
        Ok(())
    }

    /// Retract every stored fact with the same predicate and arguments.
    async fn retract_fact(&self, fact: Fact) -> Result<()>;

    /// All facts currently stored under `predicate`.
    async fn query_predicate(&self, predicate: &str) -> Result<Vec<Fact>>;

    /// Evaluate a boolean query string against the store.
    async fn query_bool(&self, query: &str) -> Result<bool>;
}

//─────────────────────────────
//  In-memory kernel
//─────────────────────────────

/// Simple in-memory fact store keyed by predicate.
///
/// Good enough for tests and single-process embedding; no derivation rules,
/// `query_bool` only supports ground queries of the form `pred(arg, ...)`
/// matched against stored facts.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKernel {
    facts: Arc<RwLock<HashMap<String, Vec<Fact>>>>,
}

impl InMemoryKernel {
    /// Create an empty kernel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored facts, across all predicates.
    pub async fn len(&self) -> usize {
        self.facts.read().await.values().map(Vec::len).sum()
    }

    /// Whether the store holds no facts.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Kernel for InMemoryKernel {
    async fn assert_fact(&self, fact: Fact) -> Result<()> {
        let mut facts = self.facts.write().await;
        let bucket = facts.entry(fact.predicate.clone()).or_default();
        // Idempotent: an identical fact is stored once.
        if !bucket.contains(&fact) {
            bucket.push(fact);
        }
        Ok(())
    }

    async fn retract_fact(&self, fact: Fact) -> Result<()> {
        let mut facts = self.facts.write().await;
        if let Some(bucket) = facts.get_mut(&fact.predicate) {
            bucket.retain(|f| f != &fact);
        }
        Ok(())
    }

    async fn query_predicate(&self, predicate: &str) -> Result<Vec<Fact>> {
        let facts = self.facts.read().await;
        Ok(facts.get(predicate).cloned().unwrap_or_default())
    }

    async fn query_bool(&self, query: &str) -> Result<bool> {
        let (predicate, rest) = match query.split_once('(') {
            Some(parts) => parts,
            None => return Ok(false),
        };
        let args_str = rest.trim_end_matches(')').trim();
        let facts = self.facts.read().await;
        let bucket = match facts.get(predicate.trim()) {
            Some(b) => b,
            None => return Ok(false),
        };
        if args_str.is_empty() {
            return Ok(!bucket.is_empty());
        }
        let wanted: Vec<&str> = args_str
            .split(',')
            .map(|a| a.trim().trim_matches('"'))
            .collect();
        Ok(bucket.iter().any(|f| {
            f.args.len() == wanted.len()
                && f.args.iter().zip(&wanted).all(|(arg, want)| match arg {
                    FactArg::Str(s) => s == want,
                    FactArg::Int(i) => i.to_string() == *want,
                    FactArg::Bool(b) => b.to_string() == *want,
                })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assert_and_query_round_trip() {
        let kernel = InMemoryKernel::new();
        kernel
            .assert_fact(fact!("tool_registered", "json_pretty", 42i64))
            .await
            .unwrap();

        let facts = kernel.query_predicate("tool_registered").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].args[0].as_str(), Some("json_pretty"));
        assert_eq!(facts[0].args[1].as_int(), Some(42));
    }

    #[tokio::test]
    async fn assertions_are_idempotent() {
        let kernel = InMemoryKernel::new();
        let f = fact!("has_capability", "summarize");
        kernel.assert_fact(f.clone()).await.unwrap();
        kernel.assert_fact(f).await.unwrap();
        assert_eq!(kernel.len().await, 1);
    }

    #[tokio::test]
    async fn retract_removes_matching_facts_only() {
        let kernel = InMemoryKernel::new();
        kernel
            .assert_fact(fact!("tool_learning", "a", 3i64))
            .await
            .unwrap();
        kernel
            .assert_fact(fact!("tool_learning", "b", 5i64))
            .await
            .unwrap();

        kernel
            .retract_fact(fact!("tool_learning", "a", 3i64))
            .await
            .unwrap();

        let facts = kernel.query_predicate("tool_learning").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].args[0].as_str(), Some("b"));
    }

    #[tokio::test]
    async fn query_bool_matches_ground_facts() {
        let kernel = InMemoryKernel::new();
        kernel
            .assert_fact(fact!("tool_needs_refinement", "fetcher"))
            .await
            .unwrap();

        assert!(kernel
            .query_bool(r#"tool_needs_refinement("fetcher")"#)
            .await
            .unwrap());
        assert!(!kernel
            .query_bool(r#"tool_needs_refinement("other")"#)
            .await
            .unwrap());
        assert!(kernel.query_bool("tool_needs_refinement()").await.unwrap());
        assert!(!kernel.query_bool("unknown_predicate()").await.unwrap());
    }

    #[tokio::test]
    async fn batch_assertion_stores_everything() {
        let kernel = InMemoryKernel::new();
        kernel
            .assert_fact_batch(vec![
                fact!("tool_registered", "a", 1i64),
                fact!("tool_hash", "a", "deadbeef"),
                fact!("has_capability", "a"),
            ])
            .await
            .unwrap();
        assert_eq!(kernel.len().await, 3);
    }

    #[test]
    fn fact_display_is_readable() {
        let f = fact!("delegate_task", "/tool_generator", "summarize", "/pending");
        assert_eq!(
            f.to_string(),
            r#"delegate_task("/tool_generator", "summarize", "/pending")"#
        );
    }
}
