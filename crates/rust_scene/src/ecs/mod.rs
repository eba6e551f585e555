//! Scene graph and component system
//!
//! A [`Scene`] owns every component, keyed by node and component type.
//! [`Node`] handles address slots in it, and the [`Transform`] component
//! links nodes into a spatial hierarchy.

pub mod component;
pub mod components;
pub mod node;
pub mod scene;
pub mod type_registry;

pub use component::{Component, ComponentBase, Creatable, SharedComponent, DEFAULT_TAG};
pub use components::{Camera, CameraSettings, DirtyFlags, Transform, TransformCallback, TransformRef, TransformSpace};
pub use node::{Node, NodeId};
pub use scene::{ComponentKey, Scene, SceneError, Visit};
pub use type_registry::{ComponentTypeId, TypeRegistry};

#[cfg(test)]
mod tests;
