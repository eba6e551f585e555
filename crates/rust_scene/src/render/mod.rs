//! Renderer-facing types
//!
//! The scene graph does not draw anything itself. It hands a
//! [`RenderContext`] to every component's `render` hook and offers
//! [`TransformUniforms`] so components can build per-draw shader data.

pub mod context;
pub mod uniforms;

pub use context::RenderContext;
pub use uniforms::TransformUniforms;
