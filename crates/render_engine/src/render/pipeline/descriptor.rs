//! Pipeline descriptors
//!
//! A [`PipelineDescriptor`] is the complete, immutable description of one
//! graphics pipeline: shader program, vertex layouts, descriptor-set-layout
//! chain, push constants and the fixed-function state blocks. Any state change
//! means a new descriptor and a new pipeline.
//!
//! The blend and stencil/depth state blocks can also be evaluated on the CPU,
//! which is how the compositing contracts of the passes (additive light
//! accumulation, stencil outline rings) are tested without a GPU.

use ash::vk;

use super::vertex_layout::VertexLayout;

/// Vertex + fragment shader pair, named by compiled SPIR-V file stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderProgram {
    /// Vertex shader name
    pub vertex: &'static str,
    /// Fragment shader name
    pub fragment: &'static str,
}

impl ShaderProgram {
    /// Create a program from shader names
    pub const fn new(vertex: &'static str, fragment: &'static str) -> Self {
        Self { vertex, fragment }
    }
}

/// Depth bias used while rasterizing shadow depth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    /// Constant factor
    pub constant: f32,
    /// Slope factor
    pub slope: f32,
}

/// Rasterization state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    /// Polygon mode
    pub polygon_mode: vk::PolygonMode,
    /// Cull mode
    pub cull_mode: vk::CullModeFlags,
    /// Front face winding
    pub front_face: vk::FrontFace,
    /// Optional depth bias
    pub depth_bias: Option<DepthBias>,
    /// Line width for line topologies
    pub line_width: f32,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: None,
            line_width: 1.0,
        }
    }
}

/// Evaluate a Vulkan compare op as `lhs op rhs`
pub fn compare<T: PartialOrd>(op: vk::CompareOp, lhs: T, rhs: T) -> bool {
    match op {
        vk::CompareOp::NEVER => false,
        vk::CompareOp::LESS => lhs < rhs,
        vk::CompareOp::EQUAL => lhs == rhs,
        vk::CompareOp::LESS_OR_EQUAL => lhs <= rhs,
        vk::CompareOp::GREATER => lhs > rhs,
        vk::CompareOp::NOT_EQUAL => lhs != rhs,
        vk::CompareOp::GREATER_OR_EQUAL => lhs >= rhs,
        _ => true,
    }
}

/// Stencil test and update for one face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilState {
    /// Compare op, evaluated as `(reference & mask) op (stored & mask)`
    pub compare_op: vk::CompareOp,
    /// Op when the stencil test fails
    pub fail_op: vk::StencilOp,
    /// Op when stencil and depth pass
    pub pass_op: vk::StencilOp,
    /// Op when stencil passes but depth fails
    pub depth_fail_op: vk::StencilOp,
    /// Compare mask
    pub compare_mask: u32,
    /// Write mask
    pub write_mask: u32,
    /// Reference value
    pub reference: u32,
}

impl StencilState {
    /// Always pass and write `reference` where fragments land
    pub fn write(reference: u32) -> Self {
        Self {
            compare_op: vk::CompareOp::ALWAYS,
            fail_op: vk::StencilOp::REPLACE,
            pass_op: vk::StencilOp::REPLACE,
            depth_fail_op: vk::StencilOp::REPLACE,
            compare_mask: 0xff,
            write_mask: 0xff,
            reference,
        }
    }

    /// Pass only where the stored value differs from `reference`, never write
    pub fn not_equal(reference: u32) -> Self {
        Self {
            compare_op: vk::CompareOp::NOT_EQUAL,
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_mask: 0xff,
            write_mask: 0x00,
            reference,
        }
    }

    /// Whether a fragment passes against the stored stencil value
    pub fn test(&self, stored: u32) -> bool {
        compare(
            self.compare_op,
            self.reference & self.compare_mask,
            stored & self.compare_mask,
        )
    }

    /// Run the test and return `(passed, new stored value)` for an 8-bit buffer
    pub fn apply(&self, stored: u32, depth_passed: bool) -> (bool, u32) {
        let passed = self.test(stored);
        let op = match (passed, depth_passed) {
            (false, _) => self.fail_op,
            (true, false) => self.depth_fail_op,
            (true, true) => self.pass_op,
        };

        let updated = match op {
            vk::StencilOp::ZERO => 0,
            vk::StencilOp::REPLACE => self.reference,
            vk::StencilOp::INCREMENT_AND_CLAMP => (stored + 1).min(0xff),
            vk::StencilOp::DECREMENT_AND_CLAMP => stored.saturating_sub(1),
            vk::StencilOp::INVERT => !stored & 0xff,
            vk::StencilOp::INCREMENT_AND_WRAP => (stored + 1) & 0xff,
            vk::StencilOp::DECREMENT_AND_WRAP => stored.wrapping_sub(1) & 0xff,
            _ => stored,
        };

        let written = (stored & !self.write_mask) | (updated & self.write_mask);
        (passed && depth_passed, written & 0xff)
    }
}

/// Depth and stencil state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    /// Depth test enable
    pub depth_test: bool,
    /// Depth write enable
    pub depth_write: bool,
    /// Depth compare op, evaluated as `incoming op stored`
    pub depth_compare: vk::CompareOp,
    /// Stencil state applied to both faces
    pub stencil: Option<StencilState>,
}

impl DepthStencilState {
    /// Depth test and write disabled
    pub const DISABLED: Self = Self {
        depth_test: false,
        depth_write: false,
        depth_compare: vk::CompareOp::ALWAYS,
        stencil: None,
    };

    /// Standard opaque depth: test LESS, write
    pub const OPAQUE: Self = Self {
        depth_test: true,
        depth_write: true,
        depth_compare: vk::CompareOp::LESS,
        stencil: None,
    };

    /// Test against existing depth without writing
    pub const READ_ONLY: Self = Self {
        depth_test: true,
        depth_write: false,
        depth_compare: vk::CompareOp::LESS_OR_EQUAL,
        stencil: None,
    };

    /// Whether an incoming depth value passes
    pub fn depth_passes(&self, incoming: f32, stored: f32) -> bool {
        !self.depth_test || compare(self.depth_compare, incoming, stored)
    }
}

/// Blend equation for colour and alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendEquation {
    /// Source colour factor
    pub src_color: vk::BlendFactor,
    /// Destination colour factor
    pub dst_color: vk::BlendFactor,
    /// Colour op
    pub color_op: vk::BlendOp,
    /// Source alpha factor
    pub src_alpha: vk::BlendFactor,
    /// Destination alpha factor
    pub dst_alpha: vk::BlendFactor,
    /// Alpha op
    pub alpha_op: vk::BlendOp,
}

impl BlendEquation {
    /// `src + dst` on all channels
    pub const ADDITIVE: Self = Self {
        src_color: vk::BlendFactor::ONE,
        dst_color: vk::BlendFactor::ONE,
        color_op: vk::BlendOp::ADD,
        src_alpha: vk::BlendFactor::ONE,
        dst_alpha: vk::BlendFactor::ONE,
        alpha_op: vk::BlendOp::ADD,
    };

    /// Classic non-premultiplied alpha blending
    pub const ALPHA: Self = Self {
        src_color: vk::BlendFactor::SRC_ALPHA,
        dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_op: vk::BlendOp::ADD,
        src_alpha: vk::BlendFactor::ONE,
        dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        alpha_op: vk::BlendOp::ADD,
    };

    fn factor(factor: vk::BlendFactor, channel: usize, src: [f32; 4], dst: [f32; 4]) -> f32 {
        match factor {
            vk::BlendFactor::ZERO => 0.0,
            vk::BlendFactor::SRC_COLOR => src[channel],
            vk::BlendFactor::ONE_MINUS_SRC_COLOR => 1.0 - src[channel],
            vk::BlendFactor::DST_COLOR => dst[channel],
            vk::BlendFactor::ONE_MINUS_DST_COLOR => 1.0 - dst[channel],
            vk::BlendFactor::SRC_ALPHA => src[3],
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA => 1.0 - src[3],
            vk::BlendFactor::DST_ALPHA => dst[3],
            vk::BlendFactor::ONE_MINUS_DST_ALPHA => 1.0 - dst[3],
            _ => 1.0,
        }
    }

    fn combine(op: vk::BlendOp, src: f32, src_factor: f32, dst: f32, dst_factor: f32) -> f32 {
        match op {
            vk::BlendOp::SUBTRACT => src * src_factor - dst * dst_factor,
            vk::BlendOp::REVERSE_SUBTRACT => dst * dst_factor - src * src_factor,
            vk::BlendOp::MIN => src.min(dst),
            vk::BlendOp::MAX => src.max(dst),
            _ => src * src_factor + dst * dst_factor,
        }
    }

    /// Blend `src` onto `dst`
    pub fn apply(&self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
        std::array::from_fn(|channel| {
            let (src_factor, dst_factor, op) = if channel < 3 {
                (self.src_color, self.dst_color, self.color_op)
            } else {
                (self.src_alpha, self.dst_alpha, self.alpha_op)
            };
            Self::combine(
                op,
                src[channel],
                Self::factor(src_factor, channel, src, dst),
                dst[channel],
                Self::factor(dst_factor, channel, src, dst),
            )
        })
    }
}

/// Blend state of one colour attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBlendAttachment {
    /// Blend equation, `None` to overwrite
    pub blend: Option<BlendEquation>,
    /// Channels written
    pub write_mask: vk::ColorComponentFlags,
}

/// All four colour channels
pub const RGBA: vk::ColorComponentFlags = vk::ColorComponentFlags::from_raw(0b1111);

impl ColorBlendAttachment {
    /// Overwrite all channels
    pub const OPAQUE: Self = Self { blend: None, write_mask: RGBA };
    /// Additive accumulation
    pub const ADDITIVE: Self = Self { blend: Some(BlendEquation::ADDITIVE), write_mask: RGBA };
    /// Alpha blending
    pub const ALPHA: Self = Self { blend: Some(BlendEquation::ALPHA), write_mask: RGBA };
    /// Write nothing (stencil-only draws)
    pub const DISABLED: Self = Self { blend: None, write_mask: vk::ColorComponentFlags::empty() };

    /// Resulting attachment value after a fragment writes `src` over `dst`
    pub fn apply(&self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
        let blended = self.blend.map_or(src, |equation| equation.apply(src, dst));
        let masks = [
            vk::ColorComponentFlags::R,
            vk::ColorComponentFlags::G,
            vk::ColorComponentFlags::B,
            vk::ColorComponentFlags::A,
        ];
        std::array::from_fn(|channel| {
            if self.write_mask.contains(masks[channel]) { blended[channel] } else { dst[channel] }
        })
    }
}

/// How the viewport and scissor are provided
#[derive(Debug, Clone, Copy)]
pub enum ViewportMode {
    /// Set per command buffer; the pipeline survives target resizes
    Dynamic,
    /// Baked into the pipeline; any resize requires a rebuild
    Static(vk::Extent2D),
}

/// Complete description of one graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    /// Debug label
    pub label: &'static str,
    /// Shader program
    pub program: ShaderProgram,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Vertex buffer layouts (empty for generated vertices)
    pub vertex_layouts: Vec<VertexLayout>,
    /// Descriptor set layouts, by set index
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Push constant ranges
    pub push_constants: Vec<vk::PushConstantRange>,
    /// Rasterization state
    pub rasterization: RasterizationState,
    /// Depth/stencil state
    pub depth_stencil: DepthStencilState,
    /// Blend state, one entry per colour attachment
    pub color_blend: Vec<ColorBlendAttachment>,
    /// Extra dynamic state beyond viewport and scissor
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Viewport mode
    pub viewport: ViewportMode,
}

impl PipelineDescriptor {
    /// Triangle list, back-face culling, no depth, one opaque colour attachment
    pub fn new(label: &'static str, program: ShaderProgram) -> Self {
        Self {
            label,
            program,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            vertex_layouts: Vec::new(),
            set_layouts: Vec::new(),
            push_constants: Vec::new(),
            rasterization: RasterizationState::default(),
            depth_stencil: DepthStencilState::DISABLED,
            color_blend: vec![ColorBlendAttachment::OPAQUE],
            dynamic_states: Vec::new(),
            viewport: ViewportMode::Dynamic,
        }
    }

    /// Set the topology
    pub fn with_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Add a vertex buffer layout
    pub fn with_vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layouts.push(layout);
        self
    }

    /// Set the descriptor-set-layout chain
    pub fn with_set_layouts(mut self, layouts: &[vk::DescriptorSetLayout]) -> Self {
        self.set_layouts = layouts.to_vec();
        self
    }

    /// Add a push constant range
    pub fn with_push_constants(mut self, stages: vk::ShaderStageFlags, size: u32) -> Self {
        let offset = self.push_constants.iter().map(|range| range.offset + range.size).max().unwrap_or(0);
        self.push_constants.push(vk::PushConstantRange { stage_flags: stages, offset, size });
        self
    }

    /// Set the cull mode
    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.rasterization.cull_mode = cull_mode;
        self
    }

    /// Enable depth bias
    pub fn with_depth_bias(mut self, constant: f32, slope: f32) -> Self {
        self.rasterization.depth_bias = Some(DepthBias { constant, slope });
        self
    }

    /// Set the depth/stencil state
    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    /// Set the blend state of every colour attachment
    pub fn with_color_blend(mut self, attachments: &[ColorBlendAttachment]) -> Self {
        self.color_blend = attachments.to_vec();
        self
    }

    /// Add a dynamic state
    pub fn with_dynamic_state(mut self, state: vk::DynamicState) -> Self {
        self.dynamic_states.push(state);
        self
    }

    /// Bake a fixed viewport into the pipeline
    pub fn with_static_viewport(mut self, extent: vk::Extent2D) -> Self {
        self.viewport = ViewportMode::Static(extent);
        self
    }

    /// Number of colour attachments the pipeline writes
    pub fn color_attachment_count(&self) -> usize {
        self.color_blend.len()
    }

    /// All dynamic states including viewport and scissor when dynamic
    pub fn all_dynamic_states(&self) -> Vec<vk::DynamicState> {
        let mut states = Vec::with_capacity(self.dynamic_states.len() + 2);
        if matches!(self.viewport, ViewportMode::Dynamic) {
            states.push(vk::DynamicState::VIEWPORT);
            states.push(vk::DynamicState::SCISSOR);
        }
        states.extend(self.dynamic_states.iter().copied());
        states
    }
}
