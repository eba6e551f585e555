//! Component trait and construction hooks
//!
//! Components are shared, single-threaded objects: the scene owns them as
//! `Rc<RefCell<T>>` and hands out clones so a caller can keep using a
//! component for the rest of a frame even if it is removed meanwhile. New
//! lookups after removal never find it.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use super::node::Node;
use super::scene::SceneError;
use super::type_registry::ComponentTypeId;
use crate::render::RenderContext;

/// Tag given to components when no scene config says otherwise
pub const DEFAULT_TAG: u32 = 1;

/// Dynamically typed component handle
pub type SharedComponent = Rc<RefCell<dyn Component>>;

/// Data every component carries: its owning node and a tag bitmask
#[derive(Debug, Clone)]
pub struct ComponentBase {
    node: Node,
    tag: u32,
}

impl ComponentBase {
    /// Create the base for a component attached to `node`
    ///
    /// The tag starts at the scene's configured default.
    pub fn new(node: Node) -> Self {
        let tag = node
            .scene()
            .map_or(DEFAULT_TAG, |scene| scene.config().default_tag);
        Self { node, tag }
    }

    /// Owning node
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Tag bitmask
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Replace the tag bitmask
    pub fn set_tag(&mut self, tag: u32) {
        self.tag = tag;
    }
}

/// Behaviour or data attached to a node
///
/// All hooks default to doing nothing. `init` runs exactly once right after
/// the component is registered (so it can already find itself through its
/// node), `terminate` exactly once right before removal. `update` and
/// `render` are driven by the frame loop, never by the scene itself.
///
/// Hooks run while the component is mutably borrowed: they must not borrow
/// their own `Rc<RefCell<_>>` again.
pub trait Component: Any {
    /// Shared component data
    fn base(&self) -> &ComponentBase;

    /// Shared component data, mutably
    fn base_mut(&mut self) -> &mut ComponentBase;

    /// Node this component is attached to
    fn node(&self) -> &Node {
        self.base().node()
    }

    /// Tag bitmask used by tag-filtered visits
    fn tag(&self) -> u32 {
        self.base().tag()
    }

    /// Replace the tag bitmask
    fn set_tag(&mut self, tag: u32) {
        self.base_mut().set_tag(tag);
    }

    /// Process-wide id of the concrete component type
    fn component_type_id(&self) -> ComponentTypeId {
        ComponentTypeId::of::<Self>()
    }

    /// Name of the concrete component type, for diagnostics
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called once after registration
    fn init(&mut self) {}

    /// Checked right before `terminate`
    ///
    /// An error aborts the removal and leaves the component in place.
    fn can_terminate(&self) -> Result<(), SceneError> {
        Ok(())
    }

    /// Called once before removal
    fn terminate(&mut self) {}

    /// Per-frame logic
    fn update(&mut self, _delta_time: f32) {}

    /// Per-frame draw submission
    fn render(&mut self, _context: &RenderContext) {}

    /// A sibling component of type `type_id` was added to this node
    fn on_component_added(&mut self, _type_id: ComponentTypeId) {}

    /// A sibling component of type `type_id` was removed from this node
    fn on_component_removed(&mut self, _type_id: ComponentTypeId) {}
}

/// Construction path used by [`Node::add_component`]
///
/// `create` builds the value; `attach` runs after the component is stored in
/// the scene but before `init`, which is where types that need extra
/// registration (observers, external worlds, self references) do it. Most
/// types only implement `create`.
pub trait Creatable: Component + Sized {
    /// Construction arguments
    type Args;

    /// Build the component for `node`
    fn create(node: Node, args: Self::Args) -> Result<Self, SceneError>;

    /// Post-registration setup with access to the shared handle
    fn attach(_component: &Rc<RefCell<Self>>) -> Result<(), SceneError> {
        Ok(())
    }
}
