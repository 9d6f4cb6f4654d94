//! Host-owned compute pipeline cache.
//!
//! Pipelines are resolved by `(module, entry point)` key. WGSL sources are
//! registered per module name -- the solver's built-in module is registered by
//! default -- and can be replaced by the host, which is both the out-of-band
//! recompilation hook and the injection point for tests that want to supply
//! their own kernels. The cache is passed into solver construction explicitly
//! so no global mutable shader state exists.

use std::collections::HashMap;

use super::GpuInitError;

/// Module name of the built-in MPM kernels.
pub const MPM_MODULE: &str = "mpm";

/// Key identifying one compute kernel: WGSL module name + entry point.
pub type KernelKey = (&'static str, &'static str);

/// Cache of compiled shader modules and compute pipelines, keyed by
/// [`KernelKey`].
pub struct PipelineCache {
    sources: HashMap<&'static str, String>,
    modules: HashMap<&'static str, wgpu::ShaderModule>,
    pipelines: HashMap<KernelKey, wgpu::ComputePipeline>,
}

impl PipelineCache {
    /// Create a cache with the built-in MPM kernel source registered.
    pub fn new() -> Self {
        let mut sources = HashMap::new();
        sources.insert(
            MPM_MODULE,
            include_str!("shaders/mpm.wgsl").to_string(),
        );
        Self {
            sources,
            modules: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    /// Register or replace the WGSL source for `module`, dropping anything
    /// already compiled from it. Solvers pick the new code up on their next
    /// pipeline rebuild.
    pub fn set_source(&mut self, module: &'static str, source: String) {
        self.sources.insert(module, source);
        self.modules.remove(module);
        self.pipelines.retain(|(m, _), _| *m != module);
    }

    /// Drop every compiled module and pipeline, keeping registered sources.
    pub fn invalidate(&mut self) {
        self.modules.clear();
        self.pipelines.clear();
    }

    /// Resolve (compiling on first use) the compute pipeline for
    /// `(module, entry)` against the given device and layout.
    pub fn compute_pipeline(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        module: &'static str,
        entry: &'static str,
    ) -> Result<wgpu::ComputePipeline, GpuInitError> {
        if let Some(pipeline) = self.pipelines.get(&(module, entry)) {
            return Ok(pipeline.clone());
        }

        if !self.modules.contains_key(module) {
            let source = self
                .sources
                .get(module)
                .ok_or(GpuInitError::UnknownKernelModule(module))?;
            let compiled = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(module),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            });
            self.modules.insert(module, compiled);
        }
        let shader = &self.modules[module];

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry),
            layout: Some(layout),
            module: shader,
            entry_point: Some(entry),
            compilation_options: Default::default(),
            cache: None,
        });
        self.pipelines.insert((module, entry), pipeline.clone());
        Ok(pipeline)
    }

    /// Number of pipelines currently compiled.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// `true` when nothing is compiled yet.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new()
    }
}
