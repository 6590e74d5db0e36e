//! Math utilities and types
//!
//! Provides the fundamental math types used by the renderer together with the
//! projection helpers that produce matrices in Vulkan conventions
//! (Y-down clip space, depth in `[0, 1]`).
//!
//! All view matrices are right-handed (camera looks down -Z). Projections are
//! applied after [`Mat4Ext::vulkan_coordinate_transform`], which flips Y and Z
//! so that the projection sees +Z as forward:
//!
//! ```text
//! clip = P * X * V * world
//! ```

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
    Quaternion,
    Unit,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform with position and uniform scale
    pub fn from_position_scale(position: Vec3, scale: f32) -> Self {
        Self {
            position,
            scale: Vec3::new(scale, scale, scale),
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Pi / 2
    pub const HALF_PI: f32 = PI * 0.5;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Math utility functions
pub mod utils {
    use super::{constants, Mat4, Vec3};

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }

    /// Column-major array form of a matrix, the layout GLSL `mat4` expects
    pub fn mat4_to_cols(matrix: &Mat4) -> [[f32; 4]; 4] {
        (*matrix).into()
    }

    /// Pick an up vector that is not parallel to `direction`
    pub fn stable_up(direction: &Vec3) -> Vec3 {
        if direction.normalize().dot(&Vec3::y()).abs() > 0.99 {
            Vec3::z()
        } else {
            Vec3::y()
        }
    }

    /// Inverse-transpose of the upper 3x3 block, padded back to a 4x4
    pub fn normal_matrix(model: &Mat4) -> Mat4 {
        let upper = model.fixed_view::<3, 3>(0, 0).into_owned();
        let normal = upper.try_inverse().map_or(upper, |inverse| inverse.transpose());
        normal.to_homogeneous()
    }
}

/// Extension trait for Mat4 with Vulkan-convention constructors
pub trait Mat4Ext {
    /// Create a perspective projection matrix (depth mapped to `[0, 1]`)
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Create an orthographic projection matrix (depth mapped to `[0, 1]`)
    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4;

    /// Create a right-handed look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Intermediate coordinate system transformation for Vulkan
    ///
    /// Flips Y (Vulkan clip space is Y-down) and Z (projection sees +Z forward).
    fn vulkan_coordinate_transform() -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        // P = [a⁻¹/tan(φ/2)    0              0                    0           ]
        //     [0               1/tan(φ/2)     0                    0           ]
        //     [0               0              f/(f-n)              -nf/(f-n)   ]
        //     [0               0              1                    0           ]
        let tan_half_fovy = (fov_y * 0.5).tan();

        let mut result = Mat4::zeros();
        result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        result[(1, 1)] = 1.0 / tan_half_fovy;
        result[(2, 2)] = far / (far - near);
        result[(2, 3)] = -(near * far) / (far - near);
        result[(3, 2)] = 1.0;
        result
    }

    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
        let mut result = Mat4::identity();
        result[(0, 0)] = 2.0 / (right - left);
        result[(1, 1)] = 2.0 / (top - bottom);
        result[(2, 2)] = 1.0 / (far - near);
        result[(0, 3)] = -(right + left) / (right - left);
        result[(1, 3)] = -(top + bottom) / (top - bottom);
        result[(2, 3)] = -near / (far - near);
        result
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let translation = Mat4::new(
            1.0, 0.0, 0.0, -eye.x,
            0.0, 1.0, 0.0, -eye.y,
            0.0, 0.0, 1.0, -eye.z,
            0.0, 0.0, 0.0, 1.0,
        );

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }

    fn vulkan_coordinate_transform() -> Mat4 {
        Mat4::new(
            1.0,  0.0,  0.0, 0.0,
            0.0, -1.0,  0.0, 0.0,
            0.0,  0.0, -1.0, 0.0,
            0.0,  0.0,  0.0, 1.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(matrix: &Mat4, point: Vec3) -> Vec3 {
        let clip = matrix * point.push(1.0);
        clip.xyz() / clip.w
    }

    #[test]
    fn test_perspective_maps_near_and_far_to_unit_depth() {
        let view = Mat4::look_at(Vec3::zeros(), Vec3::new(0.0, 0.0, -1.0), Vec3::y());
        let projection = Mat4::perspective(utils::deg_to_rad(60.0), 1.0, 0.5, 50.0);
        let view_projection = projection * Mat4::vulkan_coordinate_transform() * view;

        assert_relative_eq!(project(&view_projection, Vec3::new(0.0, 0.0, -0.5)).z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(project(&view_projection, Vec3::new(0.0, 0.0, -50.0)).z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_world_up_maps_to_top_of_screen() {
        let view = Mat4::look_at(Vec3::zeros(), Vec3::new(0.0, 0.0, -1.0), Vec3::y());
        let projection = Mat4::perspective(utils::deg_to_rad(90.0), 1.0, 0.1, 10.0);
        let ndc = project(&(projection * Mat4::vulkan_coordinate_transform() * view), Vec3::new(0.0, 1.0, -2.0));
        assert!(ndc.y < 0.0, "Vulkan NDC is Y-down, world up must land in the upper half");
    }

    #[test]
    fn test_orthographic_bounds() {
        let ortho = Mat4::orthographic(-2.0, 2.0, -1.0, 1.0, 0.0, 10.0);
        let corner = project(&ortho, Vec3::new(2.0, -1.0, 10.0));
        assert_relative_eq!(corner, Vec3::new(1.0, -1.0, 1.0), epsilon = 1e-6);
    }
}
