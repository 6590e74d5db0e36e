//! Point and spot light shadow projections
//!
//! Point lights render six 90° faces in cube order (+X, -X, +Y, -Y, +Z, -Z).
//! The up vectors and the final Y mirror make face texel (s, t) agree with
//! the cube sampling rules, so the lighting shader can sample the map with
//! the raw light-to-fragment vector.

use crate::foundation::math::{constants, utils, Mat4, Mat4Ext, Vec3};

/// Number of faces of a point light shadow cube
pub const CUBE_FACE_COUNT: usize = 6;

/// Widest cone a spot shadow projection supports
const MAX_SPOT_FOV: f32 = 170.0 * constants::DEG_TO_RAD;

fn face_axes(face: usize) -> (Vec3, Vec3) {
    match face {
        0 => (Vec3::x(), -Vec3::y()),
        1 => (-Vec3::x(), -Vec3::y()),
        2 => (Vec3::y(), Vec3::z()),
        3 => (-Vec3::y(), -Vec3::z()),
        4 => (Vec3::z(), -Vec3::y()),
        _ => (-Vec3::z(), -Vec3::y()),
    }
}

/// World-space axis face `face` looks down
pub fn face_direction(face: usize) -> Vec3 {
    face_axes(face % CUBE_FACE_COUNT).0
}

/// View matrix of one cube face
pub fn face_view(position: &Vec3, face: usize) -> Mat4 {
    let (direction, up) = face_axes(face % CUBE_FACE_COUNT);
    Mat4::look_at(*position, position + direction, up)
}

/// World to clip transforms of all six faces
pub fn face_matrices(position: &Vec3, near: f32, radius: f32) -> [Mat4; CUBE_FACE_COUNT] {
    let projection = Mat4::perspective(constants::HALF_PI, 1.0, near, radius) * Mat4::vulkan_coordinate_transform();
    let mirror = Mat4::new_nonuniform_scaling(&Vec3::new(1.0, -1.0, 1.0));

    let mut faces = [Mat4::identity(); CUBE_FACE_COUNT];
    for (face, matrix) in faces.iter_mut().enumerate() {
        *matrix = mirror * projection * face_view(position, face);
    }
    faces
}

/// World to clip transform of a spot light's shadow map
pub fn spot_matrix(position: &Vec3, direction: &Vec3, outer_cutoff: f32, near: f32, radius: f32) -> Mat4 {
    let direction = direction.normalize();
    let fov = (2.0 * outer_cutoff).clamp(constants::DEG_TO_RAD, MAX_SPOT_FOV);
    let view = Mat4::look_at(*position, position + direction, utils::stable_up(&direction));
    Mat4::perspective(fov, 1.0, near, radius.max(near * 2.0)) * Mat4::vulkan_coordinate_transform() * view
}

/// Maps clip-space xy from `[-1, 1]` to texture `[0, 1]`
pub fn shadow_bias_matrix() -> Mat4 {
    Mat4::new(
        0.5, 0.0, 0.0, 0.5,
        0.0, 0.5, 0.0, 0.5,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    /// Face and (s, t) a cube sampler picks for direction `r`
    fn cube_lookup(r: &Vec3) -> (usize, f32, f32) {
        let (ax, ay, az) = (r.x.abs(), r.y.abs(), r.z.abs());
        let (face, sc, tc, ma) = if ax >= ay && ax >= az {
            if r.x > 0.0 { (0, -r.z, -r.y, ax) } else { (1, r.z, -r.y, ax) }
        } else if ay >= az {
            if r.y > 0.0 { (2, r.x, r.z, ay) } else { (3, r.x, -r.z, ay) }
        } else if r.z > 0.0 {
            (4, r.x, -r.y, az)
        } else {
            (5, -r.x, -r.y, az)
        };
        (face, (sc / ma + 1.0) * 0.5, (tc / ma + 1.0) * 0.5)
    }

    #[test]
    fn test_positive_x_face_looks_down_unit_x() {
        let light = Vec3::new(3.0, -2.0, 7.0);
        let view = face_view(&light, 0);
        let forward = -Vec3::new(view[(2, 0)], view[(2, 1)], view[(2, 2)]);

        assert_relative_eq!(forward, (light + Vec3::x() - light).normalize(), epsilon = 1e-6);
        assert_relative_eq!(forward, Vec3::x(), epsilon = 1e-6);
    }

    #[test]
    fn test_faces_agree_with_cube_sampling() {
        let light = Vec3::new(1.0, 2.0, 3.0);
        let faces = face_matrices(&light, 0.01, 25.0);
        let offsets = [
            Vec3::new(4.0, 1.0, -2.0),
            Vec3::new(-4.0, -1.5, 1.0),
            Vec3::new(0.5, 4.0, -1.0),
            Vec3::new(-1.0, -4.0, 2.0),
            Vec3::new(1.5, 0.5, 4.0),
            Vec3::new(-2.0, 1.0, -4.0),
        ];

        for (face, offset) in offsets.iter().enumerate() {
            let (expected_face, s, t) = cube_lookup(offset);
            assert_eq!(expected_face, face);

            let clip = faces[face] * Vec4::new(light.x + offset.x, light.y + offset.y, light.z + offset.z, 1.0);
            assert!(clip.w > 0.0, "face {face} behind camera");
            let u = (clip.x / clip.w + 1.0) * 0.5;
            let v = (clip.y / clip.w + 1.0) * 0.5;
            assert_relative_eq!(u, s, epsilon = 1e-4);
            assert_relative_eq!(v, t, epsilon = 1e-4);
            let depth = clip.z / clip.w;
            assert!((0.0..=1.0).contains(&depth), "face {face} depth {depth}");
        }
    }

    #[test]
    fn test_spot_axis_projects_to_center() {
        let position = Vec3::new(0.0, 5.0, 0.0);
        let direction = Vec3::new(0.0, -1.0, 0.0);
        let matrix = shadow_bias_matrix() * spot_matrix(&position, &direction, 0.5, 0.05, 20.0);

        let clip = matrix * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(clip.x / clip.w, 0.5, epsilon = 1e-5);
        assert_relative_eq!(clip.y / clip.w, 0.5, epsilon = 1e-5);
    }
}
