//! Propagation Configuration
//!
//! Tunables of the propagation engine, loadable from JSON:
//!
//! ```json
//! { "max_effects_per_node": 4, "cycle_check": "affected" }
//! ```
//!
//! Missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::error::{ChronoError, ChronoResult};

/// Which part of the dependency graph is checked for cycles before a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleCheck {
    /// Every calculation in the propagated graph, affected or not.
    #[default]
    Scope,

    /// Only the calculations the pass will visit.
    Affected,
}

/// Configuration of a `ChronoGraph`'s propagation passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// How many effects a single calculation may request in one pass before
    /// the pass is rejected.
    pub max_effects_per_node: usize,

    /// Which calculations are checked for cycles before a pass runs.
    /// Defaults to every calculation in the propagated graph.
    pub cycle_check: CycleCheck,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_effects_per_node: 16,
            cycle_check: CycleCheck::Scope,
        }
    }
}

impl PropagationConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> ChronoResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ChronoError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> ChronoResult<()> {
        if self.max_effects_per_node == 0 {
            return Err(ChronoError::InvalidConfig(
                "max_effects_per_node must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = PropagationConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PropagationConfig::default());
    }

    #[test]
    fn fields_are_parsed() {
        let config = PropagationConfig::from_json_str(
            r#"{ "max_effects_per_node": 4, "cycle_check": "affected" }"#,
        )
        .unwrap();
        assert_eq!(config.max_effects_per_node, 4);
        assert_eq!(config.cycle_check, CycleCheck::Affected);
    }

    #[test]
    fn cycle_check_defaults_to_the_whole_scope() {
        assert_eq!(PropagationConfig::default().cycle_check, CycleCheck::Scope);
        let config =
            PropagationConfig::from_json_str(r#"{ "max_effects_per_node": 2 }"#).unwrap();
        assert_eq!(config.cycle_check, CycleCheck::Scope);
        let config = PropagationConfig::from_json_str(r#"{ "cycle_check": "scope" }"#).unwrap();
        assert_eq!(config.cycle_check, CycleCheck::Scope);
    }

    #[test]
    fn zero_effect_budget_is_rejected() {
        let err = PropagationConfig::from_json_str(r#"{ "max_effects_per_node": 0 }"#).unwrap_err();
        assert!(matches!(err, ChronoError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(PropagationConfig::from_json_str("{ nope").is_err());
    }
}
