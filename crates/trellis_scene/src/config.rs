//! Scene Configuration
//!
//! [`SceneConfig`] controls which node types a scene accepts, when structural
//! edits become visible to the traversal actor, and the construction limits of
//! the instance builder.
//!
//! ```rust,ignore
//! use trellis::{Scene, SceneConfig, GatePolicy};
//!
//! let config = SceneConfig {
//!     gate_policy: GatePolicy::EndOfFrame,
//!     ..Default::default()
//! };
//! let mut scene = Scene::new(config);
//! ```

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Capability level of a scene. A node type is available when its minimum
/// profile is at or below the scene's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Profile {
    /// Grouping and metadata only.
    Core,
    /// Adds shapes, geometry and appearance.
    #[default]
    Interchange,
    /// Everything registered.
    Immersive,
}

// ---------------------------------------------------------------------------
// GatePolicy
// ---------------------------------------------------------------------------

/// When structural edits are published to the renderer-visible structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GatePolicy {
    /// Each edit publishes a new snapshot immediately with one atomic swap.
    #[default]
    Immediate,
    /// Edits mark containers dirty; snapshots are published in
    /// [`Scene::end_frame`](crate::Scene::end_frame), while no traversal is
    /// in progress.
    EndOfFrame,
}

// ---------------------------------------------------------------------------
// SceneConfig
// ---------------------------------------------------------------------------

/// Scene construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub profile: Profile,
    pub gate_policy: GatePolicy,
    /// Detachable flag given to built nodes whose template does not say.
    pub detachable_by_default: bool,
    /// Maximum nesting of template instances inside one build.
    pub max_template_depth: usize,
    /// Number of diagnostics retained before the oldest are dropped.
    pub diagnostics_capacity: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            gate_policy: GatePolicy::default(),
            detachable_by_default: true,
            max_template_depth: 64,
            diagnostics_capacity: 256,
        }
    }
}

impl SceneConfig {
    /// Parses a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SceneConfig::from_json(r#"{ "gate_policy": "EndOfFrame", "profile": "Core" }"#)
            .unwrap();
        assert_eq!(config.gate_policy, GatePolicy::EndOfFrame);
        assert_eq!(config.profile, Profile::Core);
        assert!(config.detachable_by_default);
        assert_eq!(config.max_template_depth, 64);
    }

    #[test]
    fn test_json_round_trip() {
        let config = SceneConfig {
            detachable_by_default: false,
            diagnostics_capacity: 8,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(SceneConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_profile_order() {
        assert!(Profile::Core < Profile::Interchange);
        assert!(Profile::Interchange < Profile::Immersive);
    }
}
