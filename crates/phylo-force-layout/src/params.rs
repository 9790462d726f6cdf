//! Tunable parameters for the particle system, the physics job and the
//! controller. All records deserialize from partial JSON.

use std::time::Duration;

use phylo_force_core::{RadialParams, ViewMargins};
use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};

/// Physical constants of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsParams {
    /// Strength of the short-range repulsion between particles.
    pub electrical_repulsion: f32,
    /// Integration step.
    pub step: f32,
    /// Fraction of the previous displacement kept each step (0-1).
    pub damping: f32,
    /// Spring constant for tree edges.
    pub edge_k: f32,
    /// Repulsion cut-off distance; also the spatial grid cell size.
    pub repulsion_distance: f32,
    /// Scales the convergence velocity threshold with the node count.
    pub velocity_threshold_k: f32,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            electrical_repulsion: 100.0,
            step: 0.015,
            damping: 0.89,
            edge_k: 250.0,
            repulsion_distance: 350.0,
            velocity_threshold_k: 0.002,
        }
    }
}

impl PhysicsParams {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("step", self.step),
            ("repulsion_distance", self.repulsion_distance),
            ("velocity_threshold_k", self.velocity_threshold_k),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(LayoutError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(LayoutError::InvalidConfig(format!(
                "damping must be within 0..=1, got {}",
                self.damping
            )));
        }
        if !(self.electrical_repulsion.is_finite() && self.edge_k.is_finite()) {
            return Err(LayoutError::InvalidConfig("force constants must be finite".into()));
        }
        Ok(())
    }
}

/// How often the worker publishes positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishCadence {
    /// Wall-clock time spent in `update()` per batch.
    pub batch_budget_ms: u64,
    /// Updates that must accumulate before a publication.
    pub min_updates_between_publish: u32,
    /// Hard ceiling on batches per job.
    pub max_batches: u32,
}

impl Default for PublishCadence {
    fn default() -> Self {
        Self {
            batch_budget_ms: 200,
            min_updates_between_publish: 5,
            max_batches: 20_000,
        }
    }
}

impl PublishCadence {
    pub fn batch_budget(&self) -> Duration {
        Duration::from_millis(self.batch_budget_ms)
    }
}

/// Bounds of the synchronous single-thread layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackParams {
    pub max_batches: u32,
    pub steps_per_batch: u32,
    /// Replaces `velocity_threshold_k` so the synchronous loop stops sooner.
    pub velocity_threshold_k: Option<f32>,
}

impl Default for FallbackParams {
    fn default() -> Self {
        Self {
            max_batches: 200,
            steps_per_batch: 10,
            velocity_threshold_k: Some(0.2),
        }
    }
}

/// Everything the [`ForceLayoutController`](crate::ForceLayoutController) needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub physics: PhysicsParams,
    pub cadence: PublishCadence,
    pub fallback: FallbackParams,
    pub radial: RadialParams,
    pub margins: ViewMargins,
    /// Padding around subtree boundary hulls.
    pub boundary_padding: f32,
    /// Margin around trees too small to simulate.
    pub degenerate_margin: f32,
    /// Interval of the UI poll timer.
    pub poll_interval_ms: u64,
    /// Attempts to wait for a cancelled job before deleting it anyway.
    pub stop_wait_attempts: u32,
    pub stop_wait_interval_ms: u64,
    pub pool_name: String,
    pub job_priority: i32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            physics: PhysicsParams::default(),
            cadence: PublishCadence::default(),
            fallback: FallbackParams::default(),
            radial: RadialParams::default(),
            margins: ViewMargins::default(),
            boundary_padding: 5.0,
            degenerate_margin: 1.0,
            poll_interval_ms: 200,
            stop_wait_attempts: 20,
            stop_wait_interval_ms: 100,
            pool_name: crate::dispatcher::DEFAULT_POOL.to_string(),
            job_priority: 1,
        }
    }
}

impl ControllerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_wait_interval(&self) -> Duration {
        Duration::from_millis(self.stop_wait_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.physics.validate()?;
        if self.cadence.max_batches == 0 {
            return Err(LayoutError::InvalidConfig("cadence.max_batches must be > 0".into()));
        }
        if self.fallback.steps_per_batch == 0 {
            return Err(LayoutError::InvalidConfig(
                "fallback.steps_per_batch must be > 0".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(LayoutError::InvalidConfig("poll_interval_ms must be > 0".into()));
        }
        if self.pool_name.is_empty() {
            return Err(LayoutError::InvalidConfig("pool_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{ "physics": { "damping": 0.5 }, "poll_interval_ms": 50 }"#)
                .unwrap();
        assert_eq!(config.physics.damping, 0.5);
        assert_eq!(config.physics.edge_k, 250.0);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.cadence, PublishCadence::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_damping_is_rejected() {
        let mut config = ControllerConfig::default();
        config.physics.damping = 1.5;
        assert!(matches!(config.validate(), Err(LayoutError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_step_is_rejected() {
        let params = PhysicsParams {
            step: 0.0,
            ..PhysicsParams::default()
        };
        assert!(params.validate().is_err());
    }
}
