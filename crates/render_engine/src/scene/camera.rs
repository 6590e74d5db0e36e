//! # 3D Camera
//!
//! Perspective camera producing view and projection matrices in the
//! renderer's Vulkan conventions. The projection returned by
//! [`Camera::projection_matrix`] already includes the Vulkan coordinate
//! transform, so `projection * view` is the full clip transform every pass
//! uploads.

use crate::foundation::math::{Vec3, Mat4, Mat4Ext, utils};

/// Perspective camera
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,

    /// Point the camera is looking at in world space
    pub target: Vec3,

    /// Up vector for camera orientation (typically [0, 1, 0])
    pub up: Vec3,

    /// Field of view angle in radians
    pub fov: f32,

    /// Aspect ratio (width / height)
    pub aspect: f32,

    /// Distance to near clipping plane
    pub near: f32,

    /// Distance to far clipping plane
    pub far: f32,
}

impl Camera {
    /// Create a new perspective camera looking at the origin
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::new(0.0, 1.0, 0.0),
            fov: utils::deg_to_rad(fov_degrees),
            aspect,
            near,
            far,
        }
    }

    /// Point the camera at `target`
    pub fn look_at(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }

    /// Update aspect ratio, typically after a resize
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Aspect ratio (width / height)
    pub fn aspect_ratio(&self) -> f32 {
        self.aspect
    }

    /// World-to-view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, self.up)
    }

    /// View-to-clip matrix including the Vulkan coordinate transform
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective(self.fov, self.aspect, self.near, self.far) * Mat4::vulkan_coordinate_transform()
    }

    /// Combined world-to-clip matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Normalized viewing direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(Vec3::new(0.0, 2.0, 5.0), 60.0, 16.0 / 9.0, 0.1, 1000.0)
    }
}
