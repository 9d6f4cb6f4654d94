//! Particle/grid transfer kernels: quadratic B-spline weights, the P2G
//! scatter, and the G2P gather.
//!
//! Both passes share the same base-cell computation and the same three-point
//! quadratic B-spline stencil per axis:
//!
//! ```text
//! w0 = 0.5 * (1.5 - f)^2
//! w1 = 0.75 - (f - 1)^2
//! w2 = 0.5 * (f - 0.5)^2
//! ```
//!
//! with `f = position * inv_dx - base` in `[0.5, 1.5)`. The three weights sum
//! to one for any `f`, which is what makes the P2G scatter mass-conserving.

use glam::{IVec3, Mat3, Vec3};

use crate::grid::Grid;
use crate::params::FluidParameters;
use crate::particle::{ParticlePhysics, ParticleState};
use crate::stress::neo_hookean_term;
use crate::StepError;

/// Base grid cell of a particle and its fractional offset from it.
#[inline]
pub fn base_cell(position: Vec3, inv_dx: f32) -> (IVec3, Vec3) {
    let cell = (position * inv_dx - 0.5).floor();
    (cell.as_ivec3(), position * inv_dx - cell)
}

/// Per-axis quadratic B-spline weights for the three-cell stencil.
#[inline]
pub fn quadratic_weights(frac: Vec3) -> [Vec3; 3] {
    let a = Vec3::splat(1.5) - frac;
    let b = frac - Vec3::ONE;
    let c = frac - Vec3::splat(0.5);
    [0.5 * a * a, Vec3::splat(0.75) - b * b, 0.5 * c * c]
}

/// Outer product `a * b^T`.
#[inline]
fn outer(a: Vec3, b: Vec3) -> Mat3 {
    Mat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Particle-to-grid scatter.
///
/// For each particle, rasterize mass and affine momentum onto the 3x3x3
/// neighborhood of its base cell. Accumulation is purely additive so the
/// order in which particles are visited does not matter. Stencil nodes that
/// fall off the lattice are skipped; a clamped particle can only reach those
/// inside the boundary margin, whose velocity the grid update zeroes anyway.
///
/// Fails on the first particle whose deformation gradient has a non-positive
/// Jacobian.
pub fn particle_to_grid(
    state: &ParticleState,
    physics: &ParticlePhysics,
    grid: &mut Grid,
    params: &FluidParameters,
    dt: f32,
) -> Result<(), StepError> {
    let dx = params.dx();
    let inv_dx = params.inv_dx();

    for p in 0..state.len() {
        let mass = physics.mass[p];
        let stress = neo_hookean_term(
            physics.deformation[p],
            physics.initial_volume[p],
            params.mu,
            params.lambda,
            inv_dx,
            p,
        )?;
        let affine = stress * dt + physics.affine[p] * mass;

        let (base, frac) = base_cell(state.positions[p], inv_dx);
        let weights = quadratic_weights(frac);
        let momentum = state.velocities[p] * mass;

        for x in 0..3 {
            for y in 0..3 {
                for z in 0..3 {
                    let node = base + IVec3::new(x, y, z);
                    if !grid.contains(node) {
                        continue;
                    }
                    let weight = weights[x as usize].x * weights[y as usize].y * weights[z as usize].z;
                    let offset = (Vec3::new(x as f32, y as f32, z as f32) - frac) * dx;
                    let contribution = momentum + affine * offset;
                    *grid.velocity_mass_mut(node) += contribution.extend(mass) * weight;
                }
            }
        }
    }
    Ok(())
}

/// Grid-to-particle gather plus particle advection.
///
/// Rebuilds each particle's velocity and affine field from the normalized
/// grid, advances its position, clamps it into `[dx, domain - dx]` so it can
/// never leave the valid lattice region, and applies the multiplicative
/// deformation-gradient update `F <- (I + C * dt) * F`.
pub fn grid_to_particle(
    state: &mut ParticleState,
    physics: &mut ParticlePhysics,
    grid: &Grid,
    params: &FluidParameters,
    dt: f32,
) {
    let dx = params.dx();
    let inv_dx = params.inv_dx();
    let lo = Vec3::splat(dx);
    let hi = Vec3::splat(params.domain_size - dx);

    for p in 0..state.len() {
        let (base, frac) = base_cell(state.positions[p], inv_dx);
        let weights = quadratic_weights(frac);

        let mut velocity = Vec3::ZERO;
        let mut b = Mat3::ZERO;
        for x in 0..3 {
            for y in 0..3 {
                for z in 0..3 {
                    let node = base + IVec3::new(x, y, z);
                    if !grid.contains(node) {
                        continue;
                    }
                    let weight = weights[x as usize].x * weights[y as usize].y * weights[z as usize].z;
                    let offset = (Vec3::new(x as f32, y as f32, z as f32) - frac) * dx;
                    let weighted = grid.velocity_mass(node).truncate() * weight;
                    b += outer(weighted, offset) * inv_dx;
                    velocity += weighted;
                }
            }
        }

        let affine = b * 4.0;
        physics.affine[p] = affine;
        state.velocities[p] = velocity;
        state.positions[p] = (state.positions[p] + velocity * dt).clamp(lo, hi);
        physics.deformation[p] = (Mat3::IDENTITY + affine * dt) * physics.deformation[p];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_cell_and_fraction() {
        // position * inv_dx = 32.0 -> base 31, fraction 1.0.
        let (base, frac) = base_cell(Vec3::splat(0.5), 64.0);
        assert_eq!(base, IVec3::splat(31));
        assert!(frac.abs_diff_eq(Vec3::ONE, 1.0e-5));

        // position * inv_dx = 1.0 -> base 0, fraction 1.0.
        let (base, frac) = base_cell(Vec3::splat(1.0 / 64.0), 64.0);
        assert_eq!(base, IVec3::ZERO);
        assert!(frac.abs_diff_eq(Vec3::ONE, 1.0e-5));
    }

    #[test]
    fn weights_form_a_partition_of_unity() {
        let mut f = 0.5f32;
        while f < 1.5 {
            let w = quadratic_weights(Vec3::splat(f));
            let sum = w[0].x + w[1].x + w[2].x;
            assert!(
                (sum - 1.0).abs() < 1.0e-6,
                "weights at fraction {f} sum to {sum}"
            );
            assert!(w.iter().all(|v| v.x >= -1.0e-7));
            f += 1.0e-3;
        }
    }

    #[test]
    fn single_particle_scatter_conserves_mass_and_momentum() {
        let params = FluidParameters {
            particle_count: 1,
            grid_resolution: 16,
            ..Default::default()
        };
        let mut state = ParticleState::from_positions(vec![Vec3::splat(0.5)]);
        state.velocities[0] = Vec3::new(1.0, -2.0, 0.5);
        let physics = ParticlePhysics::uniform(&params);
        let mut grid = Grid::new(params.grid_resolution);

        particle_to_grid(&state, &physics, &mut grid, &params, params.dt).unwrap();

        assert!((grid.total_mass() - params.particle_mass).abs() < 1.0e-6);

        // With F = I and C = 0 the affine term vanishes, so total grid
        // momentum equals the particle momentum.
        let mut momentum = Vec3::ZERO;
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    momentum += grid.velocity_mass(IVec3::new(x, y, z)).truncate();
                }
            }
        }
        let expected = state.velocities[0] * params.particle_mass;
        assert!(
            momentum.abs_diff_eq(expected, 1.0e-5),
            "expected momentum {expected:?}, got {momentum:?}"
        );
    }

    #[test]
    fn uniform_grid_velocity_round_trips_through_g2p() {
        let params = FluidParameters {
            particle_count: 1,
            grid_resolution: 16,
            ..Default::default()
        };
        let mut state = ParticleState::from_positions(vec![Vec3::splat(0.5)]);
        let mut physics = ParticlePhysics::uniform(&params);
        let mut grid = Grid::new(params.grid_resolution);

        // Fill the particle's whole neighborhood with one constant velocity.
        let v = Vec3::new(0.3, -0.1, 0.2);
        let (base, _) = base_cell(state.positions[0], params.inv_dx());
        for x in 0..3 {
            for y in 0..3 {
                for z in 0..3 {
                    *grid.velocity_mass_mut(base + IVec3::new(x, y, z)) = v.extend(1.0);
                }
            }
        }

        grid_to_particle(&mut state, &mut physics, &grid, &params, params.dt);

        assert!(state.velocities[0].abs_diff_eq(v, 1.0e-5));
        // A constant velocity field has no gradient: C must be (near) zero.
        assert!(physics.affine[0].abs_diff_eq(Mat3::ZERO, 1.0e-4));
    }

    #[test]
    fn degenerate_deformation_fails_the_scatter() {
        let params = FluidParameters {
            particle_count: 1,
            grid_resolution: 16,
            ..Default::default()
        };
        let state = ParticleState::from_positions(vec![Vec3::splat(0.5)]);
        let mut physics = ParticlePhysics::uniform(&params);
        physics.deformation[0] = Mat3::ZERO;
        let mut grid = Grid::new(params.grid_resolution);

        let err = particle_to_grid(&state, &physics, &mut grid, &params, params.dt);
        assert!(matches!(
            err,
            Err(StepError::NonPositiveJacobian { particle: 0, .. })
        ));
    }
}
