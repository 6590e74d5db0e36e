//! Directional light cascades
//!
//! The camera's depth range is partitioned with the practical split scheme,
//! blending logarithmic and uniform distributions. Each slice of the view
//! frustum is bounded by a sphere and covered by an orthographic projection
//! looking along the light direction. Radii are snapped to 1/16 units so the
//! projection size does not shimmer while the camera rotates.

use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3, Vec4};
use crate::scene::Camera;

use super::CASCADE_COUNT;

/// Light-space transform and far bound of one cascade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cascade {
    /// World to light clip
    pub light_space: Mat4,
    /// View-space z of the cascade's far bound (negative in front of the camera)
    pub split_depth: f32,
}

/// Far bound of every cascade as a fraction of `[near, far]`
///
/// `d_i = λ·log_i + (1-λ)·uniform_i`, normalized to the clip range. The last
/// split is always 1.
pub fn split_fractions(near: f32, far: f32, lambda: f32) -> [f32; CASCADE_COUNT] {
    let range = far - near;
    let ratio = far / near;
    let mut splits = [0.0; CASCADE_COUNT];

    for (i, split) in splits.iter_mut().enumerate() {
        let p = (i + 1) as f32 / CASCADE_COUNT as f32;
        let log = near * ratio.powf(p);
        let uniform = near + range * p;
        let d = lambda * log + (1.0 - lambda) * uniform;
        *split = (d - near) / range;
    }

    splits
}

/// World-space corners of the view frustum: near plane first, then far plane
pub fn frustum_corners(view_projection: &Mat4) -> [Vec3; 8] {
    let inverse = view_projection.try_inverse().unwrap_or_else(Mat4::identity);
    let mut corners = [Vec3::zeros(); 8];

    let mut index = 0;
    for z in [0.0, 1.0] {
        for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let world = inverse * Vec4::new(x, y, z, 1.0);
            corners[index] = world.xyz() / world.w;
            index += 1;
        }
    }

    corners
}

/// Bounding sphere of a set of points, radius snapped up to 1/16
pub fn bounding_sphere(points: &[Vec3]) -> (Vec3, f32) {
    let center = points.iter().fold(Vec3::zeros(), |sum, p| sum + p) / points.len().max(1) as f32;
    let radius = points.iter().map(|p| (p - center).norm()).fold(0.0f32, f32::max);
    (center, (radius * 16.0).ceil() / 16.0)
}

/// Orthographic light-space transform covering a sphere
pub fn light_space_matrix(center: &Vec3, radius: f32, direction: &Vec3) -> Mat4 {
    let direction = direction.normalize();
    let eye = center - direction * radius;
    let view = Mat4::look_at(eye, *center, utils::stable_up(&direction));
    let projection = Mat4::orthographic(-radius, radius, -radius, radius, 0.0, 2.0 * radius);
    projection * Mat4::vulkan_coordinate_transform() * view
}

/// Cascades of a directional light travelling along `direction`
pub fn compute_cascades(camera: &Camera, direction: &Vec3, lambda: f32) -> [Cascade; CASCADE_COUNT] {
    let splits = split_fractions(camera.near, camera.far, lambda);
    let corners = frustum_corners(&camera.view_projection_matrix());
    let range = camera.far - camera.near;

    let mut cascades = [Cascade { light_space: Mat4::identity(), split_depth: 0.0 }; CASCADE_COUNT];
    let mut last_split = 0.0;

    for (cascade, &split) in cascades.iter_mut().zip(&splits) {
        let mut slice = [Vec3::zeros(); 8];
        for i in 0..4 {
            let edge = corners[i + 4] - corners[i];
            slice[i] = corners[i] + edge * last_split;
            slice[i + 4] = corners[i] + edge * split;
        }

        let (center, radius) = bounding_sphere(&slice);
        *cascade = Cascade {
            light_space: light_space_matrix(&center, radius, direction),
            split_depth: -(camera.near + split * range),
        };
        last_split = split;
    }

    cascades
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_splits_strictly_increasing_in_unit_range() {
        let splits = split_fractions(0.1, 1000.0, 0.95);

        for pair in splits.windows(2) {
            assert!(pair[0] < pair[1], "{splits:?}");
        }
        for split in splits {
            assert!((0.0..=1.0).contains(&split), "{splits:?}");
        }
        assert_relative_eq!(splits[CASCADE_COUNT - 1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_uniform_lambda_gives_even_splits() {
        let splits = split_fractions(1.0, 101.0, 0.0);
        assert_relative_eq!(splits[0], 0.25, epsilon = 1e-5);
        assert_relative_eq!(splits[1], 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_frustum_corners_lie_on_clip_planes() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 60.0, 1.0, 0.5, 50.0);
        let corners = frustum_corners(&camera.view_projection_matrix());
        let view = camera.view_matrix();

        for (i, corner) in corners.iter().enumerate() {
            let z = (view * corner.push(1.0)).z;
            let expected = if i < 4 { -0.5 } else { -50.0 };
            assert_relative_eq!(z, expected, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_cascade_covers_its_slice() {
        let camera = Camera::perspective(Vec3::new(0.0, 2.0, 5.0), 60.0, 16.0 / 9.0, 0.1, 100.0);
        let direction = Vec3::new(-0.3, -1.0, -0.2);
        let cascades = compute_cascades(&camera, &direction, 0.95);
        let corners = frustum_corners(&camera.view_projection_matrix());

        // The near corners belong to the first slice.
        for corner in &corners[..4] {
            let clip = cascades[0].light_space * corner.push(1.0);
            assert!(clip.x.abs() <= 1.0 + 1e-4 && clip.y.abs() <= 1.0 + 1e-4);
            assert!((-1e-4..=1.0 + 1e-4).contains(&clip.z));
        }
        // The far corners belong to the last slice.
        for corner in &corners[4..] {
            let clip = cascades[CASCADE_COUNT - 1].light_space * corner.push(1.0);
            assert!(clip.x.abs() <= 1.0 + 1e-4 && clip.y.abs() <= 1.0 + 1e-4);
        }
    }

    #[test]
    fn test_split_depths_are_negated_view_depths() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 60.0, 1.0, 0.1, 1000.0);
        let cascades = compute_cascades(&camera, &Vec3::new(0.0, -1.0, 0.0), 0.95);

        for pair in cascades.windows(2) {
            assert!(pair[0].split_depth > pair[1].split_depth);
        }
        assert_relative_eq!(cascades[CASCADE_COUNT - 1].split_depth, -1000.0, epsilon = 1e-2);
    }

    #[test]
    fn test_radius_snapped_to_sixteenths() {
        let (_, radius) = bounding_sphere(&[Vec3::new(-1.01, 0.0, 0.0), Vec3::new(1.01, 0.0, 0.0)]);
        assert_relative_eq!(radius, 1.0625);
    }
}
