#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ouro-thunderdome** – Adversarial harness for freshly compiled tools.
//!
//! Before a tool is registered, it is made to fight: the [`PanicMaker`]
//! produces a bounded set of adversarial inputs (model-proposed on top of a
//! fixed heuristic battery) and the [`Thunderdome`] runs each one against the
//! compiled binary in its own subprocess under a memory cap sampled every
//! 100 ms and a wall-clock deadline. Outcomes classify as survived, panic,
//! oom, timeout, or deadlock; any fatal outcome defeats the tool for this
//! round and the formatted report flows back into regeneration.

pub mod attacks;
pub mod runner;

pub use attacks::{heuristic_battery, AttackCategory, AttackInput, PanicMaker};
pub use runner::{AttackOutcome, AttackResult, Thunderdome, ThunderdomeReport};
