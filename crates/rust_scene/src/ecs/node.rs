//! Node handles
//!
//! A node is only an address: the scene it lives in plus an id. It owns no
//! data, is cheap to clone and holds the scene weakly.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use super::component::{Component, Creatable};
use super::components::{Transform, TransformRef};
use super::scene::{Scene, SceneError};
use super::type_registry::ComponentTypeId;

/// Node identifier, unique within one scene and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(super) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a node slot in a [`Scene`]
#[derive(Clone)]
pub struct Node {
    scene: Weak<Scene>,
    id: NodeId,
}

impl Node {
    pub(super) fn new(scene: Weak<Scene>, id: NodeId) -> Self {
        Self { scene, id }
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Owning scene, if it is still alive
    pub fn scene(&self) -> Option<Rc<Scene>> {
        self.scene.upgrade()
    }

    /// Construct a `T` through its [`Creatable`] path and attach it
    ///
    /// Fails if the node already has a `T`.
    pub fn add_component<T: Creatable>(&self, args: T::Args) -> Result<Rc<RefCell<T>>, SceneError> {
        let scene = self.scene().ok_or(SceneError::SceneDropped)?;
        scene.create_component::<T>(self, args)
    }

    /// The node's `T`, or `None`
    pub fn find_component<T: Component>(&self) -> Option<Rc<RefCell<T>>> {
        self.scene()?.find::<T>(self.id)
    }

    /// The node's `T`, treating absence as an error
    pub fn require_component<T: Component>(&self) -> Result<Rc<RefCell<T>>, SceneError> {
        self.find_component::<T>().ok_or_else(|| {
            let err = SceneError::ComponentNotFound {
                node: self.id,
                type_name: std::any::type_name::<T>(),
            };
            log::error!("{err}");
            err
        })
    }

    /// The node's `T`, adding a default-constructed one when absent
    pub fn find_or_add_component<T: Creatable<Args = ()>>(&self) -> Result<Rc<RefCell<T>>, SceneError> {
        match self.find_component::<T>() {
            Some(component) => Ok(component),
            None => self.add_component::<T>(()),
        }
    }

    /// Whether the node has a `T`
    pub fn has_component<T: Component>(&self) -> bool {
        self.scene()
            .is_some_and(|scene| scene.find_component(self.id, ComponentTypeId::of::<T>()).is_some())
    }

    /// Terminate and remove the node's `T`
    ///
    /// Returns `Ok(false)` when there was nothing to remove.
    pub fn remove_component<T: Component>(&self) -> Result<bool, SceneError> {
        match self.scene() {
            Some(scene) => scene.remove_component(self.id, ComponentTypeId::of::<T>()),
            None => Ok(false),
        }
    }

    /// Shortcut for the node's transform
    pub fn transform(&self) -> Option<TransformRef> {
        self.find_component::<Transform>()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.scene, &other.scene)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scene.as_ptr().hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("scene_alive", &(self.scene.strong_count() > 0))
            .finish()
    }
}
