//! GPU buffer management for the MPM solver.
//!
//! Creates and owns the device-resident buffers (particles, solver-private
//! dynamics, grid, uniform parameters, divergence flag), handles CPU->GPU
//! upload for construction and reset, and GPU->CPU readback of the shared
//! particle buffer through a staging buffer.

use bytemuck::Zeroable;
use glam::{Mat3, Vec4};
use wgpu::util::DeviceExt;

use crate::params::FluidParameters;
use crate::particle::{ParticlePhysics, ParticleState};

/// Fixed-point scale (2^18) for the atomic grid accumulators. Must match the
/// constant in `shaders/mpm.wgsl`: range +/-8191 per channel, ~4e-6
/// resolution.
pub const FIXED_POINT_SCALE: f32 = 262144.0;

/// Uniform parameter block. Must match `SimParams` in the WGSL exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSimParams {
    pub grid_resolution: u32,
    pub particle_count: u32,
    pub dx: f32,
    pub inv_dx: f32,
    pub mu: f32,
    pub lambda: f32,
    pub dt: f32,
    pub gravity: f32,
    pub domain_size: f32,
    pub _pad: [f32; 3],
}

impl GpuSimParams {
    /// Build the uniform block for one step.
    pub fn new(params: &FluidParameters, dt: f32) -> Self {
        Self {
            grid_resolution: params.grid_resolution,
            particle_count: params.particle_count as u32,
            dx: params.dx(),
            inv_dx: params.inv_dx(),
            mu: params.mu,
            lambda: params.lambda,
            dt,
            gravity: params.gravity,
            domain_size: params.domain_size,
            _pad: [0.0; 3],
        }
    }
}

/// Render-shared particle record: position and velocity, vec4-padded. Matches
/// `Particle` in the WGSL.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParticle {
    pub position: [f32; 4],
    pub velocity: [f32; 4],
}

/// Solver-private particle record: affine field and deformation gradient as
/// padded column triples, plus mass and rest volume. Matches
/// `ParticleDynamics` in the WGSL.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParticleDynamics {
    pub affine: [[f32; 4]; 3],
    pub deformation: [[f32; 4]; 3],
    pub mass: f32,
    pub initial_volume: f32,
    pub _pad: [f32; 2],
}

/// One grid node: float velocity/mass plus the four fixed-point accumulators.
/// Matches `GridCell` in the WGSL.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuGridCell {
    pub velocity_mass: [f32; 4],
    pub momentum: [i32; 4],
}

fn mat3_columns(m: Mat3) -> [[f32; 4]; 3] {
    [
        m.x_axis.extend(0.0).to_array(),
        m.y_axis.extend(0.0).to_array(),
        m.z_axis.extend(0.0).to_array(),
    ]
}

fn pack_particles(state: &ParticleState) -> Vec<GpuParticle> {
    (0..state.len())
        .map(|i| GpuParticle {
            position: state.positions[i].extend(1.0).to_array(),
            velocity: state.velocities[i].extend(0.0).to_array(),
        })
        .collect()
}

fn pack_dynamics(physics: &ParticlePhysics) -> Vec<GpuParticleDynamics> {
    (0..physics.len())
        .map(|i| GpuParticleDynamics {
            affine: mat3_columns(physics.affine[i]),
            deformation: mat3_columns(physics.deformation[i]),
            mass: physics.mass[i],
            initial_volume: physics.initial_volume[i],
            _pad: [0.0; 2],
        })
        .collect()
}

/// All device-resident buffers for one GPU solver instance.
pub struct GpuBuffers {
    /// Uniform parameter block.
    pub params: wgpu::Buffer,
    /// Shared position/velocity buffer; usable as a vertex/instance buffer by
    /// a renderer once a step has completed.
    pub particles: wgpu::Buffer,
    /// Solver-private per-particle physics data.
    pub dynamics: wgpu::Buffer,
    /// Background grid nodes.
    pub grid: wgpu::Buffer,
    /// Single-word divergence flag written by the P2G kernel.
    pub flags: wgpu::Buffer,

    staging_particles: wgpu::Buffer,
    staging_flags: wgpu::Buffer,

    /// Number of particles.
    pub n_particles: u32,
    /// Total grid node count.
    pub node_count: u32,
}

impl GpuBuffers {
    /// Create and upload every buffer from the initial CPU-side state.
    pub fn new(
        device: &wgpu::Device,
        state: &ParticleState,
        physics: &ParticlePhysics,
        params: &FluidParameters,
        sim: &GpuSimParams,
    ) -> Self {
        let node_count = params.node_count();

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mpm_params"),
            contents: bytemuck::bytes_of(sim),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let particles = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mpm_particles"),
            contents: bytemuck::cast_slice(&pack_particles(state)),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });

        let dynamics = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mpm_dynamics"),
            contents: bytemuck::cast_slice(&pack_dynamics(physics)),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });

        let grid = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mpm_grid"),
            contents: bytemuck::cast_slice(&vec![GpuGridCell::zeroed(); node_count]),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });

        let flags = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mpm_flags"),
            contents: bytemuck::bytes_of(&0u32),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });

        let particle_bytes = (state.len() * std::mem::size_of::<GpuParticle>()) as u64;
        let staging_particles = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mpm_staging_particles"),
            size: particle_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let staging_flags = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mpm_staging_flags"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            params: params_buffer,
            particles,
            dynamics,
            grid,
            flags,
            staging_particles,
            staging_flags,
            n_particles: state.len() as u32,
            node_count: node_count as u32,
        }
    }

    /// Update the uniform parameter block.
    pub fn update_params(&self, queue: &wgpu::Queue, sim: &GpuSimParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(sim));
    }

    /// Re-upload particle state and physics data and zero the grid and the
    /// divergence flag. Used by `reset`.
    pub fn upload(
        &self,
        queue: &wgpu::Queue,
        state: &ParticleState,
        physics: &ParticlePhysics,
    ) {
        queue.write_buffer(&self.particles, 0, bytemuck::cast_slice(&pack_particles(state)));
        queue.write_buffer(&self.dynamics, 0, bytemuck::cast_slice(&pack_dynamics(physics)));
        let zero_grid = vec![GpuGridCell::zeroed(); self.node_count as usize];
        queue.write_buffer(&self.grid, 0, bytemuck::cast_slice(&zero_grid));
        queue.write_buffer(&self.flags, 0, bytemuck::bytes_of(&0u32));
        // Flush the staged writes so the upload is not deferred to the next
        // step's submit.
        queue.submit(std::iter::empty());
    }

    /// Clear the divergence flag after reporting it.
    pub fn clear_flags(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.flags, 0, bytemuck::bytes_of(&0u32));
        queue.submit(std::iter::empty());
    }

    /// Read back the shared particle buffer into CPU-side state.
    pub fn readback_particles(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<ParticleState, String> {
        let n = self.n_particles as usize;
        let byte_len = (n * std::mem::size_of::<GpuParticle>()) as u64;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mpm_readback"),
        });
        encoder.copy_buffer_to_buffer(&self.particles, 0, &self.staging_particles, 0, byte_len);
        queue.submit(std::iter::once(encoder.finish()));

        let raw: Vec<GpuParticle> = read_buffer(device, &self.staging_particles, n)?;
        let mut positions = Vec::with_capacity(n);
        let mut velocities = Vec::with_capacity(n);
        for particle in raw {
            positions.push(Vec4::from_array(particle.position).truncate());
            velocities.push(Vec4::from_array(particle.velocity).truncate());
        }
        Ok(ParticleState {
            positions,
            velocities,
        })
    }

    /// Read back the divergence flag raised by the last P2G dispatch.
    pub fn readback_flags(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<u32, String> {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mpm_readback_flags"),
        });
        encoder.copy_buffer_to_buffer(
            &self.flags,
            0,
            &self.staging_flags,
            0,
            std::mem::size_of::<u32>() as u64,
        );
        queue.submit(std::iter::once(encoder.finish()));

        let value: Vec<u32> = read_buffer(device, &self.staging_flags, 1)?;
        Ok(value[0])
    }
}

/// Block on mapping a staging buffer and copy out `count` Pod records.
fn read_buffer<T: bytemuck::Pod>(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, String> {
    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

    let data = slice.get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data)[..count].to_vec();
    drop(data);
    buffer.unmap();
    Ok(result)
}
