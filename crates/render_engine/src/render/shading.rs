//! Lighting math shared with the lighting shaders
//!
//! The lighting pass fills its uniforms from [`attenuation_coefficients`].
//! Under test, `reference` evaluates the per-fragment expressions of
//! `light_*.frag` on the CPU so the shader math is checked without a GPU.

/// Constant, linear and quadratic attenuation for a light of `radius`
pub fn attenuation_coefficients(radius: f32) -> [f32; 3] {
    let radius = radius.max(f32::EPSILON);
    [1.0, 2.0 / radius, 1.0 / (radius * radius)]
}
