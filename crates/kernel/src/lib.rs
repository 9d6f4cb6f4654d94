//! Material Point Method (MPM) fluid simulation kernel.
//!
//! This crate implements a hybrid particle/grid fluid solver: particles carry
//! mass, velocity, and deformation state; a fixed background grid is used to
//! solve the momentum equation each step. It is designed to be separable and
//! compute-focused.
//!
//! # Modules
//! - [`particle`] -- parallel-array particle storage and the seeded layout.
//! - [`grid`] -- the background momentum/mass grid and the grid-update stage.
//! - [`transfer`] -- quadratic B-spline weights, P2G scatter, G2P gather.
//! - [`stress`] -- Neo-Hookean constitutive model.
//! - [`params`] -- run configuration and validation.
//! - [`gpu`] -- wgpu compute back-end running the same four stages.
//!
//! # Step pipeline
//!
//! Every step executes the same four phases, in the same order, on either
//! back-end:
//!
//! 1. **Clear grid**: zero-fill the momentum/mass accumulators.
//! 2. **Particle-to-grid (P2G)**: scatter mass and affine momentum onto each
//!    particle's 3x3x3 neighborhood.
//! 3. **Grid update**: normalize momentum to velocity, apply gravity, clamp
//!    boundary cells.
//! 4. **Grid-to-particle (G2P)**: gather velocities and the affine field back,
//!    advect particles, update deformation gradients.
//!
//! The back-end is chosen at construction and cannot change afterwards;
//! construct a fresh solver to switch.

#![warn(missing_docs)]

pub mod grid;
pub mod params;
pub mod particle;
pub mod stress;
pub mod transfer;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

pub use grid::Grid;
pub use params::{ConfigError, FluidParameters};
pub use particle::{ParticlePhysics, ParticleState};

#[cfg(feature = "gpu")]
pub use gpu::{gpu_available, GpuContext, GpuInitError, GpuSolver, PipelineCache};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors and the FluidSolver trait
// ---------------------------------------------------------------------------

/// Per-step failure conditions.
///
/// A step either completes or reports one of these; the solver never retries.
/// On divergence the frame's output is invalid and the host should reset the
/// solver or halt the simulation.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// A deformation gradient lost invertibility (`det(F) <= 0` or
    /// non-finite), which makes the constitutive model undefined.
    #[error("non-positive deformation Jacobian (J = {jacobian}) on particle {particle}")]
    NonPositiveJacobian {
        /// Index of the offending particle.
        particle: usize,
        /// The degenerate Jacobian value.
        jacobian: f32,
    },
    /// The GPU back-end's divergence flag was raised during the scatter.
    /// Per-particle context stays on the device.
    #[error("numerical divergence detected on the device")]
    DeviceDivergence,
    /// A device-side operation (submission, readback) failed.
    #[error("gpu device error: {0}")]
    Device(String),
}

/// Trait implemented by every simulation back-end.
///
/// A solver owns the grid and per-particle physics data exclusively; the
/// [`ParticleState`] it exposes is the single shared resource between
/// simulation and presentation. Exactly one step may be in flight at a time.
pub trait FluidSolver {
    /// Advance the simulation by `dt` seconds.
    fn step(&mut self, dt: f32) -> Result<(), StepError>;

    /// Restore the deterministic initial layout: seeded positions, zero
    /// velocities, identity deformation gradients. GPU-resident mirrors are
    /// re-uploaded.
    fn reset(&mut self);

    /// Read back the current particle state.
    fn particles(&self) -> &ParticleState;

    /// Number of particles in the simulation.
    fn particle_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// CpuSolver -- reference implementation of FluidSolver
// ---------------------------------------------------------------------------

/// Reference CPU implementation of the MPM solver.
///
/// Fully synchronous and single-threaded: each step runs the four pipeline
/// phases as in-process loops over owned containers. This is the ground truth
/// the GPU back-end is compared against.
pub struct CpuSolver {
    params: FluidParameters,
    state: ParticleState,
    physics: ParticlePhysics,
    grid: Grid,
    /// Snapshot of the seeded layout, restored by `reset`.
    initial: ParticleState,
}

impl CpuSolver {
    /// Create a solver with the seeded initial layout.
    pub fn new(params: FluidParameters) -> Result<Self, ConfigError> {
        params.validate()?;
        let state = ParticleState::seeded(&params);
        Self::with_particles(params, state)
    }

    /// Create a solver from a caller-provided initial layout.
    ///
    /// The layout length must match `params.particle_count`.
    pub fn with_particles(
        params: FluidParameters,
        state: ParticleState,
    ) -> Result<Self, ConfigError> {
        params.validate()?;
        if state.len() != params.particle_count {
            return Err(ConfigError::ParticleCountMismatch {
                expected: params.particle_count,
                actual: state.len(),
            });
        }

        let physics = ParticlePhysics::uniform(&params);
        let grid = Grid::new(params.grid_resolution);
        tracing::info!(
            particles = state.len(),
            resolution = params.grid_resolution,
            "created CPU MPM solver"
        );
        Ok(Self {
            initial: state.clone(),
            params,
            state,
            physics,
            grid,
        })
    }

    /// The run configuration.
    pub fn params(&self) -> &FluidParameters {
        &self.params
    }

    /// Read access to the background grid (diagnostics).
    pub fn grid(&self) -> &Grid {
        &self.grid
    }
}

impl FluidSolver for CpuSolver {
    fn step(&mut self, dt: f32) -> Result<(), StepError> {
        self.grid.clear();

        if let Err(err) = transfer::particle_to_grid(
            &self.state,
            &self.physics,
            &mut self.grid,
            &self.params,
            dt,
        ) {
            tracing::error!(%err, "simulation diverged during P2G");
            return Err(err);
        }

        self.grid.update(self.params.gravity, dt);
        transfer::grid_to_particle(&mut self.state, &mut self.physics, &self.grid, &self.params, dt);
        Ok(())
    }

    fn reset(&mut self) {
        self.state = self.initial.clone();
        self.physics = ParticlePhysics::uniform(&self.params);
        self.grid.clear();
        tracing::info!("reset CPU MPM solver to initial layout");
    }

    fn particles(&self) -> &ParticleState {
        &self.state
    }

    fn particle_count(&self) -> usize {
        self.state.len()
    }
}

// ---------------------------------------------------------------------------
// Back-end selection
// ---------------------------------------------------------------------------

/// Tag selecting the execution back-end at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverBackend {
    /// Synchronous single-threaded reference path.
    Cpu,
    /// wgpu compute path.
    Gpu,
}

/// A solver with its back-end fixed at construction.
///
/// Dispatch is a plain `match`, so hosts that step through this wrapper pay
/// no per-particle indirection in the hot loops.
pub enum Solver {
    /// CPU reference back-end.
    Cpu(CpuSolver),
    /// GPU compute back-end.
    #[cfg(feature = "gpu")]
    Gpu(GpuSolver),
}

impl Solver {
    /// Construct the CPU back-end.
    pub fn cpu(params: FluidParameters) -> Result<Self, ConfigError> {
        CpuSolver::new(params).map(Self::Cpu)
    }

    /// Construct the GPU back-end on an existing device, resolving its
    /// compute kernels through the host-owned `cache`.
    #[cfg(feature = "gpu")]
    pub fn gpu(
        params: FluidParameters,
        context: GpuContext,
        cache: &mut PipelineCache,
    ) -> Result<Self, GpuInitError> {
        GpuSolver::new(params, context, cache).map(Self::Gpu)
    }

    /// Which back-end this solver runs on.
    pub fn backend(&self) -> SolverBackend {
        match self {
            Self::Cpu(_) => SolverBackend::Cpu,
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => SolverBackend::Gpu,
        }
    }
}

impl FluidSolver for Solver {
    fn step(&mut self, dt: f32) -> Result<(), StepError> {
        match self {
            Self::Cpu(solver) => solver.step(dt),
            #[cfg(feature = "gpu")]
            Self::Gpu(solver) => solver.step(dt),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Cpu(solver) => solver.reset(),
            #[cfg(feature = "gpu")]
            Self::Gpu(solver) => solver.reset(),
        }
    }

    fn particles(&self) -> &ParticleState {
        match self {
            Self::Cpu(solver) => solver.particles(),
            #[cfg(feature = "gpu")]
            Self::Gpu(solver) => solver.particles(),
        }
    }

    fn particle_count(&self) -> usize {
        match self {
            Self::Cpu(solver) => solver.particle_count(),
            #[cfg(feature = "gpu")]
            Self::Gpu(solver) => solver.particle_count(),
        }
    }
}
