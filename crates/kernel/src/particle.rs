//! Particle storage split into the render-visible state and the solver-private
//! physics attributes.
//!
//! Both blocks use parallel arrays: index `i` across every array refers to the
//! same particle. [`ParticleState`] is the sole hand-off point between the
//! solver and a presentation layer (the solver writes it once per step, a
//! renderer reads it between steps). [`ParticlePhysics`] never leaves the
//! solver.

use glam::{Mat3, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::params::FluidParameters;

/// Kinematic particle state shared with the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    /// Particle positions inside the simulation domain.
    pub positions: Vec<Vec3>,
    /// Particle velocities, recomputed from scratch by every G2P pass.
    pub velocities: Vec<Vec3>,
}

impl ParticleState {
    /// Create a state holding `positions` with zero velocities.
    pub fn from_positions(positions: Vec<Vec3>) -> Self {
        let velocities = vec![Vec3::ZERO; positions.len()];
        Self {
            positions,
            velocities,
        }
    }

    /// Seed the deterministic initial layout: a `cbrt(n)`-per-axis lattice
    /// filling the `[0.1, 0.9] * domain_size` sub-cube, with uniform jitter of
    /// up to half the lattice spacing on each axis.
    pub fn seeded(params: &FluidParameters) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let count = params.particle_count;
        let side = (count as f32).cbrt().ceil().max(1.0) as usize;
        let spacing = 0.8 * params.domain_size / side as f32;
        let origin = Vec3::splat(0.1 * params.domain_size);

        let mut positions = Vec::with_capacity(count);
        for i in 0..count {
            let lattice = Vec3::new(
                (i % side) as f32,
                ((i / side) % side) as f32,
                (i / (side * side)) as f32,
            );
            let jitter = Vec3::new(
                rng.gen_range(-0.5..0.5f32),
                rng.gen_range(-0.5..0.5f32),
                rng.gen_range(-0.5..0.5f32),
            );
            positions.push(origin + (lattice + jitter) * spacing);
        }
        Self::from_positions(positions)
    }

    /// Number of particles.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` if there are no particles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Solver-private per-particle physics attributes.
///
/// The deformation gradient starts at identity and is updated
/// multiplicatively each step; it must keep a positive determinant for the
/// simulation to remain meaningful. The affine velocity field (APIC C matrix)
/// is recomputed from the grid every step.
#[derive(Debug, Clone)]
pub struct ParticlePhysics {
    /// APIC affine velocity field per particle.
    pub affine: Vec<Mat3>,
    /// Deformation gradient per particle.
    pub deformation: Vec<Mat3>,
    /// Mass per particle, constant for the run.
    pub mass: Vec<f32>,
    /// Rest volume per particle, constant for the run.
    pub initial_volume: Vec<f32>,
}

impl ParticlePhysics {
    /// Default physics state for the configured particle count: identity
    /// deformation, zero affine field, uniform mass and volume.
    pub fn uniform(params: &FluidParameters) -> Self {
        let count = params.particle_count;
        Self {
            affine: vec![Mat3::ZERO; count],
            deformation: vec![Mat3::IDENTITY; count],
            mass: vec![params.particle_mass; count],
            initial_volume: vec![params.initial_volume; count],
        }
    }

    /// Number of particles.
    #[inline]
    pub fn len(&self) -> usize {
        self.mass.len()
    }

    /// `true` if there are no particles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mass.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> FluidParameters {
        FluidParameters {
            particle_count: 64,
            ..Default::default()
        }
    }

    #[test]
    fn seeded_layout_is_deterministic() {
        let params = small_params();
        let a = ParticleState::seeded(&params);
        let b = ParticleState::seeded(&params);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let params = small_params();
        let other = FluidParameters { seed: 7, ..small_params() };
        assert_ne!(ParticleState::seeded(&params), ParticleState::seeded(&other));
    }

    #[test]
    fn seeded_layout_stays_in_sub_cube() {
        let params = small_params();
        let state = ParticleState::seeded(&params);
        assert_eq!(state.len(), 64);
        // Lattice spans [0.1, 0.9) of the domain; jitter adds at most half a
        // spacing on each side.
        let side = (64f32).cbrt().ceil();
        let slack = 0.5 * 0.8 * params.domain_size / side;
        for p in &state.positions {
            for c in p.to_array() {
                assert!(c >= 0.1 * params.domain_size - slack - 1.0e-6);
                assert!(c <= 0.9 * params.domain_size + slack + 1.0e-6);
            }
        }
        assert!(state.velocities.iter().all(|v| *v == Vec3::ZERO));
    }

    #[test]
    fn uniform_physics_defaults() {
        let params = small_params();
        let physics = ParticlePhysics::uniform(&params);
        assert_eq!(physics.len(), 64);
        assert!(!physics.is_empty());
        assert!(physics.deformation.iter().all(|f| *f == Mat3::IDENTITY));
        assert!(physics.affine.iter().all(|c| *c == Mat3::ZERO));
        assert!(physics.mass.iter().all(|m| *m == params.particle_mass));
    }
}
