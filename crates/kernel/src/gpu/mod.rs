//! GPU (wgpu) implementation of the MPM solver.
//!
//! `GpuSolver` implements [`FluidSolver`] by running the same four pipeline
//! stages as the CPU path -- clear grid, P2G, grid update, G2P -- as compute
//! dispatches. Each stage gets its own compute pass, so grid writes from one
//! stage are visible before the next stage reads them; the whole step is a
//! single command submission that the caller blocks on.
//!
//! The P2G scatter resolves concurrent writes to shared grid cells with
//! fixed-point `atomicAdd` accumulators (see `shaders/mpm.wgsl`). Particle
//! data lives on the GPU between steps; readback to the CPU-side
//! [`ParticleState`] happens lazily when `particles()` is called.

pub mod buffers;
pub mod pipeline;

use std::cell::{Cell, UnsafeCell};

use thiserror::Error;

use crate::params::{ConfigError, FluidParameters};
use crate::particle::{ParticlePhysics, ParticleState};
use crate::{FluidSolver, StepError};
use self::buffers::{GpuBuffers, GpuSimParams};
pub use self::pipeline::{KernelKey, PipelineCache, MPM_MODULE};

/// Workgroup size shared by all four kernels.
const WORKGROUP_SIZE: u32 = 64;

/// Errors raised while bringing up the GPU back-end.
///
/// None of these are recoverable by the solver itself; the host may fall back
/// to [`crate::CpuSolver`].
#[derive(Debug, Error)]
pub enum GpuInitError {
    /// No usable GPU adapter was found on this machine.
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    /// The adapter refused the device request.
    #[error("failed to create device: {0}")]
    DeviceRequest(String),
    /// A pipeline was requested from a module with no registered source.
    #[error("no WGSL source registered for kernel module `{0}`")]
    UnknownKernelModule(&'static str),
    /// The run configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Check whether a GPU adapter is available without creating a device.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

/// Device and queue handles the solver dispatches against.
///
/// Created once by the host and handed to the solver at construction; a host
/// that also renders will typically share its existing device instead of
/// calling [`GpuContext::new`].
pub struct GpuContext {
    /// The wgpu device.
    pub device: wgpu::Device,
    /// The submission queue.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Bring up a compute-capable device on the best available adapter.
    pub fn new() -> Result<Self, GpuInitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuInitError::NoAdapter)?;

        tracing::info!("GPU adapter: {:?}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("mpm_gpu_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| GpuInitError::DeviceRequest(e.to_string()))?;

        Ok(Self { device, queue })
    }
}

/// GPU-accelerated MPM solver.
pub struct GpuSolver {
    ctx: GpuContext,
    params: FluidParameters,
    bufs: GpuBuffers,

    pipeline_layout: wgpu::PipelineLayout,
    bind_group: wgpu::BindGroup,

    pipeline_clear_grid: wgpu::ComputePipeline,
    pipeline_p2g: wgpu::ComputePipeline,
    pipeline_grid_update: wgpu::ComputePipeline,
    pipeline_g2p: wgpu::ComputePipeline,

    /// Snapshot of the seeded layout, re-uploaded by `reset`.
    initial: ParticleState,

    // Cached CPU-side particle data, refreshed lazily via interior mutability.
    // `UnsafeCell` keeps this type !Sync, which the lazy readback relies on.
    cached: UnsafeCell<ParticleState>,
    cache_dirty: Cell<bool>,
}

impl GpuSolver {
    /// Create a solver with the seeded initial layout, resolving its compute
    /// kernels through the host-owned `cache`.
    pub fn new(
        params: FluidParameters,
        ctx: GpuContext,
        cache: &mut PipelineCache,
    ) -> Result<Self, GpuInitError> {
        params.validate()?;
        let state = ParticleState::seeded(&params);
        Self::with_particles(params, state, ctx, cache)
    }

    /// Create a solver from a caller-provided initial layout.
    pub fn with_particles(
        params: FluidParameters,
        state: ParticleState,
        ctx: GpuContext,
        cache: &mut PipelineCache,
    ) -> Result<Self, GpuInitError> {
        params.validate()?;
        if state.len() != params.particle_count {
            return Err(GpuInitError::Config(ConfigError::ParticleCountMismatch {
                expected: params.particle_count,
                actual: state.len(),
            }));
        }

        let physics = ParticlePhysics::uniform(&params);
        let sim = GpuSimParams::new(&params, params.dt);
        let bufs = GpuBuffers::new(&ctx.device, &state, &physics, &params, &sim);

        // One bind group covers all four stages: params + particles +
        // dynamics + grid + divergence flag.
        let bind_group_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("mpm_bgl"),
                    entries: &[
                        bgl_uniform(0),
                        bgl_storage_rw(1),
                        bgl_storage_rw(2),
                        bgl_storage_rw(3),
                        bgl_storage_rw(4),
                    ],
                });
        let pipeline_layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("mpm_pl"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline_clear_grid =
            cache.compute_pipeline(&ctx.device, &pipeline_layout, MPM_MODULE, "clear_grid")?;
        let pipeline_p2g =
            cache.compute_pipeline(&ctx.device, &pipeline_layout, MPM_MODULE, "particle_to_grid")?;
        let pipeline_grid_update =
            cache.compute_pipeline(&ctx.device, &pipeline_layout, MPM_MODULE, "grid_update")?;
        let pipeline_g2p =
            cache.compute_pipeline(&ctx.device, &pipeline_layout, MPM_MODULE, "grid_to_particle")?;

        let bind_group = create_bind_group(&ctx.device, &bind_group_layout, &bufs);

        tracing::info!(
            particles = state.len(),
            resolution = params.grid_resolution,
            "created GPU MPM solver"
        );

        Ok(Self {
            ctx,
            params,
            bufs,
            pipeline_layout,
            bind_group,
            pipeline_clear_grid,
            pipeline_p2g,
            pipeline_grid_update,
            pipeline_g2p,
            cached: UnsafeCell::new(state.clone()),
            initial: state,
            cache_dirty: Cell::new(false),
        })
    }

    /// Re-fetch the four pipelines from the cache. Call after the host has
    /// replaced kernel sources and invalidated the cache.
    pub fn rebuild_pipelines(&mut self, cache: &mut PipelineCache) -> Result<(), GpuInitError> {
        self.pipeline_clear_grid = cache.compute_pipeline(
            &self.ctx.device,
            &self.pipeline_layout,
            MPM_MODULE,
            "clear_grid",
        )?;
        self.pipeline_p2g = cache.compute_pipeline(
            &self.ctx.device,
            &self.pipeline_layout,
            MPM_MODULE,
            "particle_to_grid",
        )?;
        self.pipeline_grid_update = cache.compute_pipeline(
            &self.ctx.device,
            &self.pipeline_layout,
            MPM_MODULE,
            "grid_update",
        )?;
        self.pipeline_g2p = cache.compute_pipeline(
            &self.ctx.device,
            &self.pipeline_layout,
            MPM_MODULE,
            "grid_to_particle",
        )?;
        Ok(())
    }

    /// The device-resident position/velocity buffer. A renderer may bind this
    /// as a vertex/instance or storage buffer once a step has completed; the
    /// solver is the only writer.
    pub fn particle_buffer(&self) -> &wgpu::Buffer {
        &self.bufs.particles
    }

    /// The device and queue this solver runs on.
    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// The run configuration.
    pub fn params(&self) -> &FluidParameters {
        &self.params
    }

    /// Refresh the CPU-side particle cache from the GPU if a step has run
    /// since the last readback.
    ///
    /// # Safety
    /// Sound because `GpuSolver` is `!Sync` (it holds an `UnsafeCell`), so no
    /// concurrent access is possible, and the cell is only mutated here while
    /// no shared reference from `particles()` is live (that borrow ties to
    /// `&self` and `step` takes `&mut self`).
    fn ensure_cache(&self) {
        if self.cache_dirty.get() {
            match self.bufs.readback_particles(&self.ctx.device, &self.ctx.queue) {
                Ok(state) => {
                    unsafe {
                        *self.cached.get() = state;
                    }
                    self.cache_dirty.set(false);
                }
                Err(err) => {
                    tracing::error!(%err, "particle readback failed; serving stale state");
                }
            }
        }
    }
}

impl FluidSolver for GpuSolver {
    fn step(&mut self, dt: f32) -> Result<(), StepError> {
        let sim = GpuSimParams::new(&self.params, dt);
        self.bufs.update_params(&self.ctx.queue, &sim);

        let particle_groups = dispatch_size(self.bufs.n_particles, WORKGROUP_SIZE);
        let node_groups = dispatch_size(self.bufs.node_count, WORKGROUP_SIZE);

        // Four stages, four passes. The pass boundaries order the stages:
        // grid writes from one stage are visible to the next, and particle
        // writes from G2P are visible to whoever reads the buffer afterwards.
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mpm_step"),
            });

        let stages: [(&wgpu::ComputePipeline, u32, &str); 4] = [
            (&self.pipeline_clear_grid, node_groups, "clear_grid"),
            (&self.pipeline_p2g, particle_groups, "particle_to_grid"),
            (&self.pipeline_grid_update, node_groups, "grid_update"),
            (&self.pipeline_g2p, particle_groups, "grid_to_particle"),
        ];
        for (pipeline, groups, label) in stages {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.ctx.device.poll(wgpu::Maintain::Wait);

        self.cache_dirty.set(true);

        let flags = self
            .bufs
            .readback_flags(&self.ctx.device, &self.ctx.queue)
            .map_err(StepError::Device)?;
        if flags != 0 {
            self.bufs.clear_flags(&self.ctx.queue);
            tracing::error!("simulation diverged during P2G dispatch");
            return Err(StepError::DeviceDivergence);
        }
        Ok(())
    }

    fn reset(&mut self) {
        let physics = ParticlePhysics::uniform(&self.params);
        self.bufs.upload(&self.ctx.queue, &self.initial, &physics);
        // The cache is exactly the initial layout again.
        *self.cached.get_mut() = self.initial.clone();
        self.cache_dirty.set(false);
        tracing::info!("reset GPU MPM solver to initial layout");
    }

    fn particles(&self) -> &ParticleState {
        self.ensure_cache();
        // SAFETY: see `ensure_cache`. The returned reference borrows `self`,
        // so `step`/`reset` (which take `&mut self`) cannot run while it
        // lives.
        unsafe { &*self.cached.get() }
    }

    fn particle_count(&self) -> usize {
        self.bufs.n_particles as usize
    }
}

/// Workgroup count for `total` items: `ceil(total / workgroup_size)`.
fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    bufs: &GpuBuffers,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("mpm_bg"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: bufs.params.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: bufs.particles.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: bufs.dynamics.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: bufs.grid.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: bufs.flags.as_entire_binding(),
            },
        ],
    })
}

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(1, 64), 1);
        assert_eq!(dispatch_size(64, 64), 1);
        assert_eq!(dispatch_size(65, 64), 2);
        assert_eq!(dispatch_size(262144, 64), 4096);
    }
}
