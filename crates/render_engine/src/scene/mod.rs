//! # Scene Interface
//!
//! The scene side of the renderer's contract. Scene objects live in
//! generational arenas and are referenced everywhere else by their keys, so
//! GPU-side caches never hold pointers into the scene and a key that
//! outlived its object can never alias a newer one.
//!
//! The renderer consumes a [`SceneRenderState`] snapshot rebuilt every frame,
//! a [`Camera`], and read access to the [`Scene`] arenas for object data.

pub mod handles;
pub mod camera;
pub mod light;
pub mod material;
pub mod primitive;
pub mod texture;
pub mod world;
pub mod render_state;

pub use handles::{MaterialKey, PrimitiveKey, TextureKey, LightKey, GeometryKey, SceneObject};
pub use camera::Camera;
pub use light::{Light, LightType};
pub use material::{Material, MaterialKind, PbrProperties, UnlitProperties, MaterialTextures};
pub use primitive::{Primitive, Vertex};
pub use texture::Texture;
pub use world::{Scene, Geometry, RenderLayer, DebugLine};
pub use render_state::{SceneRenderState, Renderable, RenderableMap, PrimitiveMap};
