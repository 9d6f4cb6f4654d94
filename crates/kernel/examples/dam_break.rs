//! Headless dam-break run: seed the default particle block, let it fall and
//! settle under gravity, and print a few aggregate diagnostics along the way.
//!
//! Run with: cargo run -p mpm-kernel --example dam_break

use mpm_kernel::{CpuSolver, FluidParameters, FluidSolver};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let params = FluidParameters {
        particle_count: 4096,
        ..Default::default()
    };
    let dt = params.dt;
    let mut solver = CpuSolver::new(params)?;

    for step in 1..=500usize {
        solver.step(dt)?;

        if step % 100 == 0 {
            let particles = solver.particles();
            let n = particles.len() as f32;
            let mean_height: f32 =
                particles.positions.iter().map(|p| p.y).sum::<f32>() / n;
            let max_speed = particles
                .velocities
                .iter()
                .map(|v| v.length())
                .fold(0.0f32, f32::max);
            tracing::info!(step, mean_height, max_speed, "settling");
        }
    }

    Ok(())
}
