//! Free-fall scenario: particles at rest with zero stress should pick up
//! exactly one gravity impulse per step, except where the boundary conditions
//! zero the vertical grid velocity around them.

use glam::Vec3;
use mpm_kernel::{CpuSolver, FluidParameters, FluidSolver, ParticleState};

#[test]
fn resting_particles_pick_up_one_gravity_impulse() {
    let params = FluidParameters {
        particle_count: 4,
        grid_resolution: 64,
        domain_size: 1.0,
        particle_mass: 1.0,
        gravity: 9.8,
        ..Default::default()
    };
    let dx = params.dx();
    let dt = 0.002f32;

    // Two interior particles, one parked on the bottom margin, one on the
    // top face. Spread far enough apart that their stencils never overlap.
    let positions = vec![
        Vec3::new(0.5, 0.5, 0.5),
        Vec3::new(0.25, 0.75, 0.4),
        Vec3::new(0.5, dx, 0.5),
        Vec3::new(0.75, 1.0 - dx, 0.75),
    ];
    let state = ParticleState::from_positions(positions);
    let mut solver = CpuSolver::with_particles(params, state).expect("valid configuration");

    solver.step(dt).expect("stable step");

    let impulse = 9.8 * dt;
    let particles = solver.particles();

    // Interior particles: every stencil cell received the gravity impulse,
    // and the weights sum to one, so velocity.y is exactly -g * dt.
    for p in [0, 1] {
        let v = particles.velocities[p];
        assert!(
            (v.y + impulse).abs() < 1.0e-6,
            "particle {p}: velocity.y = {}, expected {}",
            v.y,
            -impulse
        );
        assert!(v.x.abs() < 1.0e-6 && v.z.abs() < 1.0e-6);
    }

    // Bottom-margin particle: lattice rows 0 and 1 are clamped, only the
    // row-2 slice (weight 0.125) still carries the impulse.
    let v = particles.velocities[2];
    assert!(
        (v.y + 0.125 * impulse).abs() < 1.0e-6,
        "bottom-margin particle: velocity.y = {}, expected {}",
        v.y,
        -0.125 * impulse
    );

    // Top-face particle: its entire reachable stencil is inside the clamped
    // margin, so it must not move at all.
    let v = particles.velocities[3];
    assert!(
        v.length() < 1.0e-6,
        "top-face particle picked up velocity {v:?}"
    );
    assert!(particles.positions[3].abs_diff_eq(Vec3::new(0.75, 1.0 - dx, 0.75), 1.0e-6));
}
