//! After every P2G scatter, the total mass accumulated on the grid must equal
//! the total particle mass: each particle's 27 stencil weights sum to one, so
//! no mass is created or lost in the transfer.

use mpm_kernel::{CpuSolver, FluidParameters, FluidSolver};

#[test]
fn grid_mass_matches_particle_mass_across_steps() {
    let params = FluidParameters {
        particle_count: 512,
        grid_resolution: 32,
        seed: 1,
        ..Default::default()
    };
    let expected = params.particle_count as f32 * params.particle_mass;
    let dt = params.dt;
    let mut solver = CpuSolver::new(params).expect("valid configuration");

    for step in 0..5 {
        solver.step(dt).expect("stable step");
        // The grid retains this step's accumulated mass: the grid update
        // normalizes momentum but leaves the mass channel untouched.
        let total = solver.grid().total_mass();
        let relative = (total - expected).abs() / expected;
        assert!(
            relative < 1.0e-4,
            "step {step}: grid mass {total} vs particle mass {expected} (rel {relative:.2e})"
        );
    }
}
