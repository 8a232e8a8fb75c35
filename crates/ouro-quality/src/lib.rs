#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-quality** – Quality evaluation for tool executions.
//!
//! The evaluator scores executions without a language-model call: a battery
//! of heuristic rules over the output, duration buckets for efficiency, and
//! name-keyed completeness hints. When a per-tool quality profile exists,
//! profile-driven evaluation supersedes the heuristics with the tool's own
//! expectations. Profiles are persisted as a single JSON blob by the
//! [`ProfileStore`].

pub mod evaluator;
pub mod profiles;

pub use evaluator::QualityEvaluator;
pub use profiles::{default_profile, ProfileOverride, ProfileStore};
