//! # Shadows
//!
//! Light-space transforms, persistent shadow maps and the pass that fills
//! them.
//!
//! | Light       | Layers | Projection                     | Stored value        |
//! |-------------|--------|--------------------------------|---------------------|
//! | Directional | 4      | orthographic per cascade       | depth               |
//! | Point       | 6      | 90° perspective per cube face  | distance / radius   |
//! | Spot        | 1      | perspective over the cone      | depth               |

pub mod cascades;
pub mod projections;
pub mod map;
pub mod generator;

pub use cascades::{compute_cascades, split_fractions, Cascade};
pub use projections::{face_direction, face_matrices, face_view, shadow_bias_matrix, spot_matrix, CUBE_FACE_COUNT};
pub use map::{ShadowBinding, ShadowMap, ShadowMapRegistry, SHADOW_DEPTH_FORMAT, SHADOW_DISTANCE_FORMAT};
pub use generator::{LightTransforms, ShadowMapGenerator};

/// Number of directional light cascades
pub const CASCADE_COUNT: usize = 4;
