//! Simulation-wide fluid parameters and construction-time validation.
//!
//! A [`FluidParameters`] value is immutable for the lifetime of a solver; to
//! change any of these a fresh solver must be constructed. The struct derives
//! `serde` so hosts can read run configuration from a file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest usable grid resolution: two boundary-margin cells on each side
/// plus room for the three-cell transfer stencil in between.
pub const MIN_GRID_RESOLUTION: u32 = 8;

/// Configuration rejected when a solver is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The particle count was zero.
    #[error("particle count must be positive")]
    NoParticles,
    /// The grid is too coarse for the transfer stencil and boundary margin.
    #[error("grid resolution {0} is below the minimum of {min}", min = MIN_GRID_RESOLUTION)]
    ResolutionTooSmall(u32),
    /// Domain size must be positive and finite.
    #[error("domain size must be positive and finite")]
    InvalidDomainSize,
    /// Timestep must be positive and finite.
    #[error("timestep must be positive and finite")]
    InvalidTimestep,
    /// Per-particle mass and rest volume must be positive and finite.
    #[error("particle mass and initial volume must be positive and finite")]
    InvalidParticleConstants,
    /// A caller-provided particle layout disagrees with `particle_count`.
    #[error("initial layout has {actual} particles, configuration says {expected}")]
    ParticleCountMismatch {
        /// Count from the configuration.
        expected: usize,
        /// Count of the provided layout.
        actual: usize,
    },
}

/// All simulation-wide constants for one run.
///
/// The domain is the axis-aligned cube `[0, domain_size]^3`, discretized into
/// `grid_resolution^3` nodes with spacing `dx = domain_size / grid_resolution`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidParameters {
    /// Number of simulated particles.
    pub particle_count: usize,
    /// Grid nodes per axis.
    pub grid_resolution: u32,
    /// Side length of the cubic simulation domain (meters).
    pub domain_size: f32,
    /// First Lame parameter (shear stiffness).
    pub mu: f32,
    /// Second Lame parameter (volumetric stiffness).
    pub lambda: f32,
    /// Fixed simulation timestep (seconds).
    pub dt: f32,
    /// Downward gravitational acceleration magnitude (m/s^2).
    pub gravity: f32,
    /// Uniform per-particle mass (kg).
    pub particle_mass: f32,
    /// Uniform per-particle rest volume, pre-scaled for the stress term.
    pub initial_volume: f32,
    /// Seed for the jittered initial particle layout.
    pub seed: u64,
}

impl Default for FluidParameters {
    fn default() -> Self {
        Self {
            particle_count: 8192,
            grid_resolution: 64,
            domain_size: 1.0,
            mu: 20.0,
            lambda: 40.0,
            dt: 0.002,
            gravity: 9.8,
            particle_mass: 0.5,
            initial_volume: 3.0,
            seed: 0,
        }
    }
}

impl FluidParameters {
    /// Validate the configuration, failing fast on values the solver cannot
    /// run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.particle_count == 0 {
            return Err(ConfigError::NoParticles);
        }
        if self.grid_resolution < MIN_GRID_RESOLUTION {
            return Err(ConfigError::ResolutionTooSmall(self.grid_resolution));
        }
        if !(self.domain_size.is_finite() && self.domain_size > 0.0) {
            return Err(ConfigError::InvalidDomainSize);
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ConfigError::InvalidTimestep);
        }
        if !(self.particle_mass.is_finite() && self.particle_mass > 0.0)
            || !(self.initial_volume.is_finite() && self.initial_volume > 0.0)
        {
            return Err(ConfigError::InvalidParticleConstants);
        }
        Ok(())
    }

    /// Grid cell spacing.
    #[inline]
    pub fn dx(&self) -> f32 {
        self.domain_size / self.grid_resolution as f32
    }

    /// Reciprocal cell spacing.
    #[inline]
    pub fn inv_dx(&self) -> f32 {
        1.0 / self.dx()
    }

    /// Total grid node count (`resolution^3`).
    #[inline]
    pub fn node_count(&self) -> usize {
        let r = self.grid_resolution as usize;
        r * r * r
    }
}
