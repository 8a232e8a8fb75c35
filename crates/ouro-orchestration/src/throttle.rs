//! Admission gate for tool generation.
//!
//! Applied before a need enters the loop. A rejected need is dropped with a
//! debug trace; rejection is never an error.

use std::time::Instant;

use ouro_types::{CoreConfig, ToolNeed};

/// Session-level throttling counters; monotone within a session.
#[derive(Debug, Clone, Default)]
pub struct ThrottleState {
    /// Tools generated this session.
    pub tools_generated: u32,
    /// When the last generation finished.
    pub last_tool_gen: Option<Instant>,
}

impl ThrottleState {
    /// Record one successful generation.
    pub fn record_generation(&mut self) {
        self.tools_generated += 1;
        self.last_tool_gen = Some(Instant::now());
    }
}

/// Why a need was rejected at the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Below the baseline confidence gate.
    LowConfidence,
    /// Below the elevated gate with no strong evidence.
    WeakEvidence,
    /// A tool with that name already exists.
    AlreadyExists,
    /// The session cap is exhausted.
    SessionCapReached,
    /// Inside the cooldown window with no strong evidence.
    CoolingDown,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rejection::LowConfidence => "confidence below baseline gate",
            Rejection::WeakEvidence => "confidence below tool gate without strong evidence",
            Rejection::AlreadyExists => "tool already exists",
            Rejection::SessionCapReached => "session cap reached",
            Rejection::CoolingDown => "inside generation cooldown",
        };
        f.write_str(s)
    }
}

/// Apply gates in order; `tool_exists` is checked by the caller against
/// both the registry and the on-disk sources.
pub fn admit(
    need: &ToolNeed,
    config: &CoreConfig,
    state: &ThrottleState,
    tool_exists: bool,
) -> Result<(), Rejection> {
    if need.confidence < config.min_confidence {
        return Err(Rejection::LowConfidence);
    }
    let strong = need.has_strong_evidence();
    if need.confidence < config.min_tool_confidence && !strong {
        return Err(Rejection::WeakEvidence);
    }
    if tool_exists {
        return Err(Rejection::AlreadyExists);
    }
    if config.max_tools_per_session > 0 && state.tools_generated >= config.max_tools_per_session {
        return Err(Rejection::SessionCapReached);
    }
    if !strong && !config.tool_generation_cooldown.is_zero() {
        if let Some(last) = state.last_tool_gen {
            if last + config.tool_generation_cooldown > Instant::now() {
                return Err(Rejection::CoolingDown);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_types::ToolCategory;
    use std::time::Duration;

    fn need(confidence: f64, triggers: Vec<&str>) -> ToolNeed {
        ToolNeed {
            name: "gadget".to_string(),
            purpose: "p".to_string(),
            input_type: "string".to_string(),
            output_type: "string".to_string(),
            triggers: triggers.into_iter().map(String::from).collect(),
            priority: 0.5,
            confidence,
            reasoning: String::new(),
            category: ToolCategory::Utility,
        }
    }

    #[test]
    fn baseline_gate_rejects_low_confidence() {
        let config = CoreConfig::default();
        let state = ThrottleState::default();
        assert_eq!(
            admit(&need(0.5, vec![]), &config, &state, false),
            Err(Rejection::LowConfidence)
        );
    }

    #[test]
    fn elevated_gate_requires_strong_evidence() {
        let config = CoreConfig::default();
        let state = ThrottleState::default();
        // 0.7 is above the baseline but below the 0.75 tool gate.
        assert_eq!(
            admit(&need(0.7, vec!["single trigger"]), &config, &state, false),
            Err(Rejection::WeakEvidence)
        );
        assert!(admit(
            &need(0.7, vec!["previous attempt failed"]),
            &config,
            &state,
            false
        )
        .is_ok());
        assert!(admit(
            &need(0.7, vec!["signal one", "signal two"]),
            &config,
            &state,
            false
        )
        .is_ok());
    }

    #[test]
    fn existing_tool_is_rejected() {
        let config = CoreConfig::default();
        let state = ThrottleState::default();
        assert_eq!(
            admit(&need(0.9, vec![]), &config, &state, true),
            Err(Rejection::AlreadyExists)
        );
    }

    #[test]
    fn session_cap_counts_generations_and_zero_disables() {
        let mut config = CoreConfig::default();
        config.max_tools_per_session = 1;
        let mut state = ThrottleState::default();
        assert!(admit(&need(0.9, vec![]), &config, &state, false).is_ok());
        state.record_generation();
        assert_eq!(
            admit(&need(0.9, vec![]), &config, &state, false),
            Err(Rejection::SessionCapReached)
        );

        config.max_tools_per_session = 0;
        assert!(admit(&need(0.9, vec![]), &config, &state, false).is_ok());
    }

    #[test]
    fn cooldown_defers_to_strong_evidence() {
        let mut config = CoreConfig::default();
        config.tool_generation_cooldown = Duration::from_secs(3600);
        let mut state = ThrottleState::default();
        state.record_generation();

        assert_eq!(
            admit(&need(0.9, vec![]), &config, &state, false),
            Err(Rejection::CoolingDown)
        );
        assert!(admit(
            &need(0.9, vec!["previous attempt failed"]),
            &config,
            &state,
            false
        )
        .is_ok());
    }
}
