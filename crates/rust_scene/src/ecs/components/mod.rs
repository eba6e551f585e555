//! Built-in components

pub mod camera;
pub mod transform;

pub use camera::{Camera, CameraDirtyFlags, CameraSettings, Projection};
pub use transform::{DirtyFlags, Transform, TransformCallback, TransformRef, TransformSpace};
