//! Graphics pipeline construction and caching
//!
//! [`GraphicsPipelineFactory`] turns a [`PipelineDescriptor`] into one
//! pipeline object and one pipeline layout. Shader modules only live for the
//! duration of the build.
//!
//! [`PipelineCache`] holds the pipelines of one pass keyed by variant (light
//! type, material kind, stencil stage, ...), never by material instance, so
//! adding materials of an existing kind never creates pipelines.

use std::collections::BTreeMap;
use std::fmt::Debug;

use ash::vk;

use crate::render::gpu::{GpuDevice, GraphicsPipelineCreate, PipelineLayoutDesc};
use crate::render::RenderResult;
use super::descriptor::PipelineDescriptor;
use super::shader_library::ShaderLibrary;

/// Pipeline with its layout
#[derive(Debug, Clone)]
pub struct GraphicsPipeline {
    /// Pipeline handle
    pub pipeline: vk::Pipeline,
    /// Layout handle
    pub layout: vk::PipelineLayout,
    /// Debug label
    pub label: &'static str,
}

impl GraphicsPipeline {
    /// Destroy the pipeline and its layout
    pub fn destroy(&self, device: &mut dyn GpuDevice) {
        device.destroy_pipeline(self.pipeline);
        device.destroy_pipeline_layout(self.layout);
        log::debug!("Destroyed pipeline '{}'", self.label);
    }
}

/// Builds pipelines from descriptors
#[derive(Debug, Default)]
pub struct GraphicsPipelineFactory {
    built: usize,
}

impl GraphicsPipelineFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pipelines built so far
    pub fn built_count(&self) -> usize {
        self.built
    }

    /// Build one pipeline for use inside `render_pass`
    pub fn build(
        &mut self,
        device: &mut dyn GpuDevice,
        shaders: &mut ShaderLibrary,
        descriptor: &PipelineDescriptor,
        render_pass: vk::RenderPass,
    ) -> RenderResult<GraphicsPipeline> {
        let vertex_code = shaders.load(descriptor.program.vertex)?.to_vec();
        let fragment_code = shaders.load(descriptor.program.fragment)?;

        let fragment_module = device.create_shader_module(fragment_code)?;
        let vertex_module = match device.create_shader_module(&vertex_code) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(fragment_module);
                return Err(e.into());
            }
        };

        let result = Self::build_with_modules(device, descriptor, render_pass, vertex_module, fragment_module);

        device.destroy_shader_module(vertex_module);
        device.destroy_shader_module(fragment_module);

        let pipeline = result?;
        self.built += 1;
        log::debug!("Built pipeline '{}' ({} total)", descriptor.label, self.built);
        Ok(pipeline)
    }

    fn build_with_modules(
        device: &mut dyn GpuDevice,
        descriptor: &PipelineDescriptor,
        render_pass: vk::RenderPass,
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
    ) -> RenderResult<GraphicsPipeline> {
        let layout = device.create_pipeline_layout(&PipelineLayoutDesc {
            set_layouts: descriptor.set_layouts.clone(),
            push_constant_ranges: descriptor.push_constants.clone(),
        })?;

        let create = GraphicsPipelineCreate {
            descriptor,
            vertex_module,
            fragment_module,
            layout,
            render_pass,
        };

        match device.create_graphics_pipeline(&create) {
            Ok(pipeline) => Ok(GraphicsPipeline { pipeline, layout, label: descriptor.label }),
            Err(e) => {
                log::error!("Failed to create pipeline '{}': {e}", descriptor.label);
                device.destroy_pipeline_layout(layout);
                Err(e.into())
            }
        }
    }
}

/// Pipelines of one pass, keyed by variant
#[derive(Debug)]
pub struct PipelineCache<K: Ord + Copy + Debug> {
    pipelines: BTreeMap<K, GraphicsPipeline>,
}

impl<K: Ord + Copy + Debug> Default for PipelineCache<K> {
    fn default() -> Self {
        Self { pipelines: BTreeMap::new() }
    }
}

impl<K: Ord + Copy + Debug> PipelineCache<K> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline for `key`, building it from `describe()` on first use
    pub fn get_or_build(
        &mut self,
        key: K,
        device: &mut dyn GpuDevice,
        factory: &mut GraphicsPipelineFactory,
        shaders: &mut ShaderLibrary,
        render_pass: vk::RenderPass,
        describe: impl FnOnce() -> PipelineDescriptor,
    ) -> RenderResult<&GraphicsPipeline> {
        if !self.pipelines.contains_key(&key) {
            let pipeline = factory.build(device, shaders, &describe(), render_pass)?;
            log::trace!("Cached pipeline variant {key:?}");
            self.pipelines.insert(key, pipeline);
        }

        self.pipelines
            .get(&key)
            .ok_or_else(|| crate::render::RenderError::MissingResource(format!("pipeline variant {key:?}")))
    }

    /// Cached pipeline for `key`
    pub fn get(&self, key: K) -> Option<&GraphicsPipeline> {
        self.pipelines.get(&key)
    }

    /// Number of cached pipelines
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Destroy every cached pipeline
    pub fn destroy_all(&mut self, device: &mut dyn GpuDevice) {
        for pipeline in self.pipelines.values() {
            pipeline.destroy(device);
        }
        self.pipelines.clear();
    }
}
