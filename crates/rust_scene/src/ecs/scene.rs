//! Scene: owner of every component instance
//!
//! Components live in a slot-map arena; a per-node index maps each component
//! type id to its slot. At most one component of a given type exists per
//! node. The scene uses interior mutability and is meant for one thread:
//! no `RefCell` borrow of the storage is held while a component hook runs, so
//! hooks may freely add, find and remove components.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

use super::component::{Component, Creatable, SharedComponent};
use super::node::{Node, NodeId};
use super::type_registry::ComponentTypeId;
use crate::config::SceneConfig;

new_key_type! {
    /// Generation-checked key of a component slot
    pub struct ComponentKey;
}

/// Scene misuse reported to callers
///
/// These are programmer errors: the offending operation is abandoned without
/// changing the scene and the error is logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// A node may hold one component per type
    #[error("node {node} already has a {type_name} component")]
    DuplicateComponent {
        /// Target node
        node: NodeId,
        /// Component type
        type_name: &'static str,
    },

    /// Parenting would make a transform its own ancestor
    #[error("parenting node {node} under node {parent} would create a cycle")]
    HierarchyCycle {
        /// Node being re-parented
        node: NodeId,
        /// Requested parent
        parent: NodeId,
    },

    /// A required component is missing
    #[error("node {node} has no {type_name} component")]
    ComponentNotFound {
        /// Queried node
        node: NodeId,
        /// Component type
        type_name: &'static str,
    },

    /// A component is borrowed elsewhere while a lifecycle hook needs it
    #[error("{type_name} component on node {node} is borrowed and cannot run its lifecycle hook")]
    ComponentBusy {
        /// Owning node
        node: NodeId,
        /// Component type
        type_name: &'static str,
    },

    /// The scene behind a node handle no longer exists
    #[error("scene has been dropped")]
    SceneDropped,
}

impl SceneError {
    fn reported(self) -> Self {
        log::error!("{self}");
        self
    }
}

struct ComponentSlot {
    node: NodeId,
    type_id: ComponentTypeId,
    type_name: &'static str,
    dynamic: SharedComponent,
    typed: Rc<dyn Any>,
}

/// Scene holding all nodes and components
pub struct Scene {
    self_ref: Weak<Scene>,
    config: SceneConfig,
    device: Option<Weak<dyn Any>>,
    next_node_id: Cell<u32>,
    slots: RefCell<SlotMap<ComponentKey, ComponentSlot>>,
    index: RefCell<HashMap<NodeId, HashMap<ComponentTypeId, ComponentKey>>>,
}

impl Scene {
    /// Create an empty scene
    pub fn new(config: SceneConfig) -> Rc<Self> {
        Self::build(config, None)
    }

    /// Create an empty scene that keeps a weak reference to `device`
    ///
    /// The scene never calls into the device; components fetch it through
    /// [`Scene::device`].
    pub fn with_device<D: Any>(config: SceneConfig, device: &Rc<D>) -> Rc<Self> {
        let device: Rc<dyn Any> = device.clone();
        Self::build(config, Some(Rc::downgrade(&device)))
    }

    fn build(config: SceneConfig, device: Option<Weak<dyn Any>>) -> Rc<Self> {
        let capacity = config.initial_capacity;
        Rc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            device,
            next_node_id: Cell::new(0),
            slots: RefCell::new(SlotMap::with_capacity_and_key(capacity)),
            index: RefCell::new(HashMap::new()),
        })
    }

    /// Scene settings
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// The device this scene was created with, if it is a `D` and alive
    pub fn device<D: Any>(&self) -> Option<Rc<D>> {
        self.device.as_ref()?.upgrade()?.downcast::<D>().ok()
    }

    /// Allocate a fresh node
    ///
    /// Empty nodes cost nothing: storage is created with the first component.
    pub fn create_node(&self) -> Node {
        let id = self.next_node_id.get();
        self.next_node_id.set(id + 1);
        log::debug!("Created node {id}");
        Node::new(self.self_ref.clone(), NodeId::new(id))
    }

    /// Handle for a node id previously returned by [`Scene::create_node`]
    pub fn node(&self, id: NodeId) -> Option<Node> {
        (id.value() < self.next_node_id.get()).then(|| Node::new(self.self_ref.clone(), id))
    }

    /// Number of nodes that currently hold at least one component
    pub fn node_count(&self) -> usize {
        self.index.borrow().len()
    }

    /// Whether `id` currently holds at least one component
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.index.borrow().contains_key(&id)
    }

    /// Number of live components
    pub fn component_count(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Store `component` under `node` without running any hook
    ///
    /// [`Node::add_component`] is the usual entry point; it builds the
    /// component, calls this and then runs `attach` and `init`.
    pub fn add_component<T: Component>(&self, node: NodeId, component: Rc<RefCell<T>>) -> Result<ComponentKey, SceneError> {
        let type_id = ComponentTypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        let mut index = self.index.borrow_mut();
        let entry = index.entry(node).or_default();
        if entry.contains_key(&type_id) {
            return Err(SceneError::DuplicateComponent { node, type_name }.reported());
        }

        let typed: Rc<dyn Any> = component.clone();
        let dynamic: SharedComponent = component;
        let key = self.slots.borrow_mut().insert(ComponentSlot {
            node,
            type_id,
            type_name,
            dynamic,
            typed,
        });
        entry.insert(type_id, key);

        log::trace!("Stored {type_name} on node {node}");
        Ok(key)
    }

    /// Dynamically typed lookup
    pub fn find_component(&self, node: NodeId, type_id: ComponentTypeId) -> Option<SharedComponent> {
        let key = self.key_of(node, type_id)?;
        self.slots.borrow().get(key).map(|slot| Rc::clone(&slot.dynamic))
    }

    /// Typed lookup
    pub fn find<T: Component>(&self, node: NodeId) -> Option<Rc<RefCell<T>>> {
        let key = self.key_of(node, ComponentTypeId::of::<T>())?;
        let typed = Rc::clone(&self.slots.borrow().get(key)?.typed);
        typed.downcast::<RefCell<T>>().ok()
    }

    /// Lookup by slot key; stale keys resolve to `None`
    pub fn get(&self, key: ComponentKey) -> Option<SharedComponent> {
        self.slots.borrow().get(key).map(|slot| Rc::clone(&slot.dynamic))
    }

    /// All components attached to `node`
    pub fn components_of(&self, node: NodeId) -> Vec<SharedComponent> {
        let keys: Vec<ComponentKey> = match self.index.borrow().get(&node) {
            Some(types) => types.values().copied().collect(),
            None => return Vec::new(),
        };
        keys.into_iter().filter_map(|key| self.get(key)).collect()
    }

    /// Terminate and erase the component of `type_id` on `node`
    ///
    /// Returns `Ok(false)` when there is no such component. Fails without
    /// removing anything if the component is currently borrowed, or if its
    /// `can_terminate` check refuses.
    pub fn remove_component(&self, node: NodeId, type_id: ComponentTypeId) -> Result<bool, SceneError> {
        let Some(key) = self.key_of(node, type_id) else {
            return Ok(false);
        };
        let Some((component, type_name)) = self
            .slots
            .borrow()
            .get(key)
            .map(|slot| (Rc::clone(&slot.dynamic), slot.type_name))
        else {
            return Ok(false);
        };

        match component.try_borrow_mut() {
            Ok(mut component) => {
                component.can_terminate().map_err(SceneError::reported)?;
                component.terminate();
            }
            Err(_) => return Err(SceneError::ComponentBusy { node, type_name }.reported()),
        }

        // terminate may have removed it already
        if self.erase(key).is_none() {
            return Ok(true);
        }
        log::trace!("Removed {type_name} from node {node}");

        self.notify_siblings(node, type_id, |sibling, type_id| sibling.on_component_removed(type_id));
        Ok(true)
    }

    /// Remove every component of `node`, returning how many were removed
    pub fn remove_node(&self, node: NodeId) -> Result<usize, SceneError> {
        let mut type_ids: Vec<ComponentTypeId> = match self.index.borrow().get(&node) {
            Some(types) => types.keys().copied().collect(),
            None => return Ok(0),
        };
        type_ids.sort_unstable();

        let mut removed = 0;
        for type_id in type_ids {
            if self.remove_component(node, type_id)? {
                removed += 1;
            }
        }
        log::debug!("Removed node {node} ({removed} components)");
        Ok(removed)
    }

    /// Traverse every live component
    ///
    /// Each call starts a fresh traversal over the components present at
    /// call time. Components removed while the traversal is in progress are
    /// skipped.
    pub fn visit(&self) -> Visit<'_> {
        Visit::new(self, None)
    }

    /// Traverse components whose tag intersects `tag_mask`
    pub fn visit_by_tags(&self, tag_mask: u32) -> Visit<'_> {
        Visit::new(self, Some(tag_mask))
    }

    pub(super) fn create_component<T: Creatable>(&self, node: &Node, args: T::Args) -> Result<Rc<RefCell<T>>, SceneError> {
        let type_id = ComponentTypeId::of::<T>();
        if self.key_of(node.id(), type_id).is_some() {
            return Err(SceneError::DuplicateComponent {
                node: node.id(),
                type_name: std::any::type_name::<T>(),
            }
            .reported());
        }

        let component = Rc::new(RefCell::new(T::create(node.clone(), args)?));
        let key = self.add_component(node.id(), Rc::clone(&component))?;

        if let Err(err) = T::attach(&component) {
            self.erase(key);
            return Err(err);
        }

        component.borrow_mut().init();
        self.notify_siblings(node.id(), type_id, |sibling, type_id| sibling.on_component_added(type_id));
        Ok(component)
    }

    fn key_of(&self, node: NodeId, type_id: ComponentTypeId) -> Option<ComponentKey> {
        self.index.borrow().get(&node)?.get(&type_id).copied()
    }

    fn erase(&self, key: ComponentKey) -> Option<SharedComponent> {
        let slot = self.slots.borrow_mut().remove(key)?;
        let mut index = self.index.borrow_mut();
        if let Some(types) = index.get_mut(&slot.node) {
            types.remove(&slot.type_id);
            if types.is_empty() {
                index.remove(&slot.node);
            }
        }
        Some(slot.dynamic)
    }

    fn notify_siblings(
        &self,
        node: NodeId,
        changed: ComponentTypeId,
        mut notify: impl FnMut(&mut dyn Component, ComponentTypeId),
    ) {
        for sibling in self.components_of(node) {
            let Ok(mut sibling) = sibling.try_borrow_mut() else {
                log::warn!("Skipping busy sibling on node {node} while notifying about {changed}");
                continue;
            };
            if sibling.component_type_id() != changed {
                notify(&mut *sibling, changed);
            }
        }
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("nodes_allocated", &self.next_node_id.get())
            .field("components", &self.component_count())
            .finish_non_exhaustive()
    }
}

/// Lazy traversal returned by [`Scene::visit`] and [`Scene::visit_by_tags`]
pub struct Visit<'a> {
    scene: &'a Scene,
    keys: std::vec::IntoIter<ComponentKey>,
    tag_mask: Option<u32>,
}

impl<'a> Visit<'a> {
    fn new(scene: &'a Scene, tag_mask: Option<u32>) -> Self {
        let keys: Vec<ComponentKey> = scene.slots.borrow().keys().collect();
        Self {
            scene,
            keys: keys.into_iter(),
            tag_mask,
        }
    }
}

impl Iterator for Visit<'_> {
    type Item = SharedComponent;

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            let Some(component) = self.scene.get(key) else {
                continue;
            };
            let Some(mask) = self.tag_mask else {
                return Some(component);
            };
            let matches = match component.try_borrow() {
                Ok(component) => component.tag() & mask != 0,
                Err(_) => {
                    log::trace!("Skipping mutably borrowed component during tag visit");
                    false
                }
            };
            if matches {
                return Some(component);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}
