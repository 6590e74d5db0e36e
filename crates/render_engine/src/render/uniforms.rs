//! # Shader Interface Blocks
//!
//! `#[repr(C)]` mirrors of the std140 uniform blocks and push-constant
//! ranges declared in `resources/shaders`. Every `vec3` is widened to a
//! `vec4`; the spare component carries a scalar where one is needed.
//! Matrices are column-major, as GLSL expects.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{utils, Mat4, Vec3};
use crate::scene::{Camera, PbrProperties, UnlitProperties};

/// Column-major 4x4 matrix as uploaded
pub type GpuMat4 = [[f32; 4]; 4];

const IDENTITY: GpuMat4 = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]];

fn vec4(v: &Vec3, w: f32) -> [f32; 4] {
    [v.x, v.y, v.z, w]
}

/// Camera block, set 0 of every scene pass
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    /// World to view
    pub view: GpuMat4,
    /// View to clip
    pub projection: GpuMat4,
    /// World to clip
    pub view_projection: GpuMat4,
    /// Clip to world with the translation removed, for sky rays
    pub inverse_rotation_projection: GpuMat4,
    /// Camera position (w = 1)
    pub position: [f32; 4],
    /// Width, height, near, far
    pub viewport: [f32; 4],
}

impl CameraUniform {
    /// Snapshot `camera` for a target of `width` x `height`
    pub fn new(camera: &Camera, width: u32, height: u32) -> Self {
        let view = camera.view_matrix();
        let projection = camera.projection_matrix();
        let mut rotation = view;
        rotation[(0, 3)] = 0.0;
        rotation[(1, 3)] = 0.0;
        rotation[(2, 3)] = 0.0;
        let inverse_rotation_projection = (projection * rotation).try_inverse().unwrap_or_else(Mat4::identity);

        Self {
            view: utils::mat4_to_cols(&view),
            projection: utils::mat4_to_cols(&projection),
            view_projection: utils::mat4_to_cols(&(projection * view)),
            inverse_rotation_projection: utils::mat4_to_cols(&inverse_rotation_projection),
            position: vec4(&camera.position, 1.0),
            viewport: [width as f32, height as f32, camera.near, camera.far],
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self {
            view: IDENTITY,
            projection: IDENTITY,
            view_projection: IDENTITY,
            inverse_rotation_projection: IDENTITY,
            position: [0.0, 0.0, 0.0, 1.0],
            viewport: [1.0, 1.0, 0.1, 1000.0],
        }
    }
}

/// Per-geometry model block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ModelUniform {
    /// Object to world
    pub model: GpuMat4,
    /// Inverse-transpose of `model` for normals
    pub normal: GpuMat4,
}

impl ModelUniform {
    /// Model block of a world matrix
    pub fn new(world_matrix: &Mat4) -> Self {
        Self { model: utils::mat4_to_cols(world_matrix), normal: utils::mat4_to_cols(&utils::normal_matrix(world_matrix)) }
    }
}

/// Principled BSDF material block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PbrMaterialUniform {
    /// Base colour
    pub albedo: [f32; 4],
    /// Metallic, roughness, ambient occlusion, unused
    pub params: [f32; 4],
}

impl From<&PbrProperties> for PbrMaterialUniform {
    fn from(properties: &PbrProperties) -> Self {
        Self {
            albedo: properties.albedo,
            params: [properties.metallic, properties.roughness, properties.ambient_occlusion, 0.0],
        }
    }
}

/// Unlit material block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UnlitMaterialUniform {
    /// Flat colour
    pub color: [f32; 4],
}

impl From<&UnlitProperties> for UnlitMaterialUniform {
    fn from(properties: &UnlitProperties) -> Self {
        Self { color: properties.color }
    }
}

/// Directional light block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DirectionalLightUniform {
    /// Direction the light travels (w unused)
    pub direction: [f32; 4],
    /// Colour times intensity; w is 1 when the shadow map is live
    pub color: [f32; 4],
    /// World to shadow clip, per cascade
    pub light_space: [GpuMat4; 4],
    /// Negated view-space far bound of each cascade
    pub split_depths: [f32; 4],
}

/// Point light block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PointLightUniform {
    /// Light volume transform (unit sphere to world)
    pub volume: GpuMat4,
    /// Position, radius
    pub position: [f32; 4],
    /// Colour times intensity; w is 1 when the shadow map is live
    pub color: [f32; 4],
    /// Constant, linear, quadratic attenuation and unused
    pub attenuation: [f32; 4],
}

/// Spot light block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SpotLightUniform {
    /// Light volume transform (unit sphere to world)
    pub volume: GpuMat4,
    /// World to shadow texture space (bias applied)
    pub light_space: GpuMat4,
    /// Position, radius
    pub position: [f32; 4],
    /// Direction, unused
    pub direction: [f32; 4],
    /// Colour times intensity; w is 1 when the shadow map is live
    pub color: [f32; 4],
    /// cos(inner), cos(outer), constant, linear attenuation
    pub cone: [f32; 4],
    /// Quadratic attenuation and unused
    pub attenuation: [f32; 4],
}

/// Procedural sky block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SkyUniform {
    /// Colour straight up
    pub zenith: [f32; 4],
    /// Colour at the horizon and below
    pub horizon: [f32; 4],
}

/// Shadow depth push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowDepthPush {
    /// Object to light clip
    pub mvp: GpuMat4,
}

/// Shadow distance push constants (fills the 128-byte guaranteed range)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowDistancePush {
    /// Object to face clip
    pub mvp: GpuMat4,
    /// First three rows of the object to world matrix
    pub model_rows: [[f32; 4]; 3],
    /// Light position, radius
    pub light: [f32; 4],
}

impl ShadowDistancePush {
    /// Push block for one face
    pub fn new(face_matrix: &Mat4, world_matrix: &Mat4, light_position: &Vec3, radius: f32) -> Self {
        let row = |r: usize| [world_matrix[(r, 0)], world_matrix[(r, 1)], world_matrix[(r, 2)], world_matrix[(r, 3)]];
        Self {
            mvp: utils::mat4_to_cols(&(face_matrix * world_matrix)),
            model_rows: [row(0), row(1), row(2)],
            light: vec4(light_position, radius),
        }
    }
}

/// Outline push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct OutlinePush {
    /// Object to clip
    pub mvp: GpuMat4,
    /// Ring colour
    pub color: [f32; 4],
    /// Object-space scale, unused
    pub params: [f32; 4],
}

/// Unlit push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct UnlitPush {
    /// x: 1 pushes fragments to the far plane (environment layer)
    pub flags: [f32; 4],
}

impl UnlitPush {
    /// Regular depth
    pub const SCENE: Self = Self { flags: [0.0; 4] };
    /// Depth forced to the far plane
    pub const ENVIRONMENT: Self = Self { flags: [1.0, 0.0, 0.0, 0.0] };
}

/// Blit block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BlitUniform {
    /// Exposure, 1/gamma, unused, unused
    pub params: [f32; 4],
}

impl BlitUniform {
    /// Tone mapping for a target that does (`srgb`) or does not encode on write
    pub fn new(exposure: f32, srgb: bool) -> Self {
        let inverse_gamma = if srgb { 1.0 } else { 1.0 / 2.2 };
        Self { params: [exposure, inverse_gamma, 0.0, 0.0] }
    }
}

/// Overlay push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct OverlayPush {
    /// Pixel to NDC scale
    pub scale: [f32; 2],
    /// Pixel to NDC translation
    pub translate: [f32; 2],
}

impl OverlayPush {
    /// Map `display_size` pixels starting at `display_pos` onto NDC
    pub fn new(display_pos: [f32; 2], display_size: [f32; 2]) -> Self {
        let scale = [2.0 / display_size[0], 2.0 / display_size[1]];
        Self { scale, translate: [-1.0 - display_pos[0] * scale[0], -1.0 - display_pos[1] * scale[1]] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::mem::size_of;

    #[test]
    fn test_block_sizes_match_std140() {
        assert_eq!(size_of::<CameraUniform>(), 4 * 64 + 32);
        assert_eq!(size_of::<ModelUniform>(), 128);
        assert_eq!(size_of::<PbrMaterialUniform>(), 32);
        assert_eq!(size_of::<DirectionalLightUniform>(), 32 + 256 + 16);
        assert_eq!(size_of::<PointLightUniform>(), 64 + 48);
        assert_eq!(size_of::<SpotLightUniform>(), 128 + 80);
        assert_eq!(size_of::<ShadowDistancePush>(), 128);
        assert!(size_of::<OutlinePush>() <= 128);
    }

    #[test]
    fn test_distance_push_rows_transform_points() {
        let world = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let push = ShadowDistancePush::new(&Mat4::identity(), &world, &Vec3::zeros(), 10.0);
        let point = [0.0f32, 0.0, 0.0, 1.0];
        let world_x: f32 = push.model_rows[0].iter().zip(point).map(|(a, b)| a * b).sum();
        let world_z: f32 = push.model_rows[2].iter().zip(point).map(|(a, b)| a * b).sum();
        assert_relative_eq!(world_x, 1.0);
        assert_relative_eq!(world_z, 3.0);
        assert_relative_eq!(push.light[3], 10.0);
    }

    #[test]
    fn test_overlay_push_maps_corners() {
        let push = OverlayPush::new([0.0, 0.0], [800.0, 600.0]);
        let map = |p: [f32; 2]| [p[0] * push.scale[0] + push.translate[0], p[1] * push.scale[1] + push.translate[1]];
        let [left, top] = map([0.0, 0.0]);
        let [right, bottom] = map([800.0, 600.0]);
        assert_relative_eq!(left, -1.0);
        assert_relative_eq!(top, -1.0);
        assert_relative_eq!(right, 1.0, epsilon = 1e-6);
        assert_relative_eq!(bottom, 1.0, epsilon = 1e-6);
    }
}
