//! Transform component: spatial hierarchy and lazy matrix cache
//!
//! Local position, rotation and scale are the only source of truth. The
//! local matrix, world matrix and inverse-transposed world matrix are caches
//! guarded by [`DirtyFlags`]: a clear bit means the cached value equals what a
//! fresh computation would give, a set bit means it must be recomputed before
//! it is read.
//!
//! Mutating a transform marks its own local bits plus `WORLD` and
//! `INV_TRANSPOSED_WORLD`, then marks only the world bits on every
//! descendant. Nothing is recomputed until a reader asks. Observers
//! registered through [`Transform::add_callback`] are told about every
//! invalidation synchronously, once per mutating call.
//!
//! Relations are weak: the scene owns every transform, the tree only links
//! them. Caches and links sit in `Cell`/`RefCell` so reads and link updates
//! only need a shared borrow of the neighbouring transforms.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::config::OrphanPolicy;
use crate::ecs::component::{Component, ComponentBase, Creatable};
use crate::ecs::node::{Node, NodeId};
use crate::ecs::scene::SceneError;
use crate::foundation::math::{
    compose_trs, decompose_trs, inverse_transpose, Mat3, Mat4, Mat4Ext, Point3, Quat, Rotation3, Unit, Vec3,
};

use super::camera::Camera;

/// Shared handle to a transform
pub type TransformRef = Rc<RefCell<Transform>>;

bitflags! {
    /// Stale cached values of a transform
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u8 {
        /// Local position changed
        const POSITION = 1 << 0;
        /// Local rotation changed
        const ROTATION = 1 << 1;
        /// Local scale changed
        const SCALE = 1 << 2;
        /// World matrix is stale
        const WORLD = 1 << 3;
        /// Inverse-transposed world matrix is stale
        const INV_TRANSPOSED_WORLD = 1 << 4;

        /// Any local field changed, so the local matrix is stale
        const LOCAL = Self::POSITION.bits() | Self::ROTATION.bits() | Self::SCALE.bits();
        /// Everything derived from the world matrix is stale
        const WORLD_DERIVED = Self::WORLD.bits() | Self::INV_TRANSPOSED_WORLD.bits();
    }
}

/// Observer of transform invalidations
///
/// Called synchronously while the transform is being mutated, so the
/// implementation must not borrow that transform; recording the flags and
/// recomputing later is the intended use.
pub trait TransformCallback {
    /// `flags` are the bits just set on the transform of `node`
    fn on_transform_changed(&self, node: NodeId, flags: DirtyFlags);
}

/// Reference frame for rotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformSpace {
    /// Around the transform's own axes
    #[default]
    Local,
    /// Around the parent's axes
    Parent,
    /// Around world axes
    World,
}

/// Hierarchical transform component
pub struct Transform {
    base: ComponentBase,
    self_ref: Weak<RefCell<Transform>>,
    parent: RefCell<Option<Weak<RefCell<Transform>>>>,
    children: RefCell<Vec<Weak<RefCell<Transform>>>>,
    callbacks: RefCell<Vec<Weak<dyn TransformCallback>>>,

    local_position: Vec3,
    local_rotation: Quat,
    local_scale: Vec3,

    dirty: Cell<DirtyFlags>,
    matrix: Cell<Mat4>,
    world_matrix: Cell<Mat4>,
    inv_transposed_world_matrix: Cell<Mat4>,
    recompute_count: Cell<u64>,
}

impl Creatable for Transform {
    type Args = ();

    fn create(node: Node, _args: ()) -> Result<Self, SceneError> {
        Ok(Self::new(node))
    }

    fn attach(component: &Rc<RefCell<Self>>) -> Result<(), SceneError> {
        component.borrow_mut().self_ref = Rc::downgrade(component);
        Ok(())
    }
}

impl Component for Transform {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn can_terminate(&self) -> Result<(), SceneError> {
        // terminate reads every ancestor and rewrites every child
        let mut ancestors_free = true;
        let mut cursor = self.parent();
        while let Some(ancestor) = cursor {
            match ancestor.try_borrow() {
                Ok(ancestor) => cursor = ancestor.parent(),
                Err(_) => {
                    ancestors_free = false;
                    break;
                }
            };
        }

        if ancestors_free && self.children().iter().all(|child| subtree_is_free(child, true)) {
            Ok(())
        } else {
            Err(SceneError::ComponentBusy {
                node: self.node().id(),
                type_name: std::any::type_name::<Self>(),
            })
        }
    }

    fn terminate(&mut self) {
        let parent = self.parent();
        if let Some(parent) = &parent {
            parent.borrow().unlink_child(&self.self_ref);
        }

        let policy = self
            .node()
            .scene()
            .map(|scene| scene.config().orphan_policy)
            .unwrap_or_default();
        let children: Vec<TransformRef> = self
            .children
            .borrow_mut()
            .drain(..)
            .filter_map(|child| child.upgrade())
            .collect();

        for child in children {
            child.borrow().parent.replace(None);
            let changed = match policy {
                OrphanPolicy::ReparentPreservingWorld => {
                    // this transform is mutably borrowed, so compose through it
                    // directly instead of letting the child read its parent
                    let world = self.world_matrix() * child.borrow().matrix();
                    let local = match &parent {
                        Some(parent) => match parent.borrow().world_matrix().try_inverse() {
                            Some(inverse) => inverse * world,
                            None => world,
                        },
                        None => world,
                    };
                    child.borrow_mut().assign_local_matrix(&local);
                    DirtyFlags::LOCAL
                }
                OrphanPolicy::DetachToRoot => DirtyFlags::empty(),
            };
            child.borrow().link_parent(parent.as_ref(), changed);
        }

        self.parent.replace(None);
        log::trace!("Transform on node {} terminated ({:?})", self.node().id(), policy);
    }
}

impl Transform {
    fn new(node: Node) -> Self {
        Self {
            base: ComponentBase::new(node),
            self_ref: Weak::new(),
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            callbacks: RefCell::new(Vec::new()),
            local_position: Vec3::zeros(),
            local_rotation: Quat::identity(),
            local_scale: Vec3::new(1.0, 1.0, 1.0),
            dirty: Cell::new(DirtyFlags::all()),
            matrix: Cell::new(Mat4::identity()),
            world_matrix: Cell::new(Mat4::identity()),
            inv_transposed_world_matrix: Cell::new(Mat4::identity()),
            recompute_count: Cell::new(0),
        }
    }

    // ------------------------------------------------------------------
    // Hierarchy
    // ------------------------------------------------------------------

    /// Parent transform, if any
    pub fn parent(&self) -> Option<TransformRef> {
        self.parent.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Child at `index`
    pub fn child(&self, index: usize) -> Option<TransformRef> {
        self.children.borrow().get(index).and_then(Weak::upgrade)
    }

    /// Number of children
    pub fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    /// All live children, in insertion order
    pub fn children(&self) -> Vec<TransformRef> {
        self.children.borrow().iter().filter_map(Weak::upgrade).collect()
    }

    /// Re-parent this transform, or make it a root with `None`
    ///
    /// Local fields are kept, so the world matrix changes with the new
    /// ancestor chain. Parenting under itself or one of its descendants is
    /// rejected.
    pub fn set_parent(&mut self, parent: Option<&TransformRef>) -> Result<(), SceneError> {
        if let Some(new_parent) = parent {
            let mut cursor = Some(Rc::clone(new_parent));
            while let Some(ancestor) = cursor {
                if std::ptr::eq(Rc::as_ptr(&ancestor), self.self_ref.as_ptr()) {
                    // new_parent may be this transform, which is already borrowed
                    let parent_id = new_parent
                        .try_borrow()
                        .map_or(self.node().id(), |parent| parent.node().id());
                    let err = SceneError::HierarchyCycle {
                        node: self.node().id(),
                        parent: parent_id,
                    };
                    log::error!("{err}");
                    return Err(err);
                }
                cursor = ancestor.borrow().parent();
            }
        }

        let unchanged = match (self.parent(), parent) {
            (Some(current), Some(new_parent)) => Rc::ptr_eq(&current, new_parent),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }

        self.link_parent(parent, DirtyFlags::empty());
        log::debug!(
            "Node {} parented to {:?}",
            self.node().id(),
            parent.map(|p| p.borrow().node().id())
        );
        Ok(())
    }

    /// Detach every child, turning each into a root with unchanged local fields
    pub fn clear_children(&mut self) {
        let children: Vec<TransformRef> = self
            .children
            .borrow_mut()
            .drain(..)
            .filter_map(|child| child.upgrade())
            .collect();
        for child in children {
            let child = child.borrow();
            child.parent.replace(None);
            child.mark_dirty_recursive(DirtyFlags::WORLD_DERIVED);
        }
    }

    /// Move under `parent` and notify once with `changed` plus the world bits
    fn link_parent(&self, parent: Option<&TransformRef>, changed: DirtyFlags) {
        if let Some(old) = self.parent() {
            old.borrow().unlink_child(&self.self_ref);
        }
        if self.self_ref.strong_count() == 0 {
            log::warn!("Transform on node {} is not owned by a scene; children lists will not see it", self.node().id());
        }
        if let Some(new_parent) = parent {
            new_parent.borrow().children.borrow_mut().push(self.self_ref.clone());
        }
        self.parent.replace(parent.map(Rc::downgrade));
        self.mark_dirty_recursive(changed | DirtyFlags::WORLD_DERIVED);
    }

    fn unlink_child(&self, child: &Weak<RefCell<Transform>>) {
        self.children
            .borrow_mut()
            .retain(|existing| !existing.ptr_eq(child) && existing.strong_count() > 0);
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register an observer; it is dropped automatically once it expires
    pub fn add_callback(&self, callback: Weak<dyn TransformCallback>) {
        let mut callbacks = self.callbacks.borrow_mut();
        callbacks.retain(|existing| existing.strong_count() > 0);
        callbacks.push(callback);
    }

    /// Unregister an observer
    pub fn remove_callback(&self, callback: &Weak<dyn TransformCallback>) {
        self.callbacks
            .borrow_mut()
            .retain(|existing| !Weak::ptr_eq(existing, callback) && existing.strong_count() > 0);
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// Bits currently set
    pub fn dirty_flags(&self) -> DirtyFlags {
        self.dirty.get()
    }

    /// How many cached values have been recomputed on this transform
    pub fn recompute_count(&self) -> u64 {
        self.recompute_count.get()
    }

    fn set_dirty(&self, flags: DirtyFlags) {
        self.dirty.set(self.dirty.get() | flags);

        let live: Vec<Rc<dyn TransformCallback>> =
            self.callbacks.borrow().iter().filter_map(Weak::upgrade).collect();
        let node = self.node().id();
        for callback in live {
            callback.on_transform_changed(node, flags);
        }
    }

    fn mark_dirty_recursive(&self, flags: DirtyFlags) {
        self.set_dirty(flags);
        for child in self.children() {
            child.borrow().mark_dirty_recursive(DirtyFlags::WORLD_DERIVED);
        }
    }

    // ------------------------------------------------------------------
    // Local state
    // ------------------------------------------------------------------

    /// Local position
    pub fn local_position(&self) -> Vec3 {
        self.local_position
    }

    /// Local rotation
    pub fn local_rotation(&self) -> Quat {
        self.local_rotation
    }

    /// Local scale
    pub fn local_scale(&self) -> Vec3 {
        self.local_scale
    }

    /// Replace the local position
    pub fn set_local_position(&mut self, position: Vec3) {
        self.local_position = position;
        self.mark_dirty_recursive(DirtyFlags::POSITION | DirtyFlags::WORLD_DERIVED);
    }

    /// Offset the local position
    pub fn translate_local(&mut self, translation: Vec3) {
        self.local_position += translation;
        self.mark_dirty_recursive(DirtyFlags::POSITION | DirtyFlags::WORLD_DERIVED);
    }

    /// Replace the local scale
    pub fn set_local_scale(&mut self, scale: Vec3) {
        self.local_scale = scale;
        self.mark_dirty_recursive(DirtyFlags::SCALE | DirtyFlags::WORLD_DERIVED);
    }

    /// Multiply the local scale component-wise
    pub fn scale_local(&mut self, factor: Vec3) {
        self.local_scale.component_mul_assign(&factor);
        self.mark_dirty_recursive(DirtyFlags::SCALE | DirtyFlags::WORLD_DERIVED);
    }

    /// Replace the local rotation
    pub fn set_local_rotation(&mut self, rotation: Quat) {
        self.local_rotation = rotation;
        self.mark_dirty_recursive(DirtyFlags::ROTATION | DirtyFlags::WORLD_DERIVED);
    }

    /// Replace the local rotation with `angle` radians around `axis`
    pub fn set_local_axis_angle_rotation(&mut self, axis: Vec3, angle: f32) {
        self.set_local_rotation(Quat::from_axis_angle(&Unit::new_normalize(axis), angle));
    }

    /// Apply `rotation` in the given space
    pub fn rotate(&mut self, rotation: Quat, space: TransformSpace) {
        self.local_rotation = match space {
            TransformSpace::Local => self.local_rotation * rotation,
            TransformSpace::Parent => rotation * self.local_rotation,
            TransformSpace::World => {
                let parent_rotation = self
                    .parent()
                    .map_or_else(Quat::identity, |parent| parent.borrow().world_rotation());
                parent_rotation.inverse() * rotation * parent_rotation * self.local_rotation
            }
        };
        self.mark_dirty_recursive(DirtyFlags::ROTATION | DirtyFlags::WORLD_DERIVED);
    }

    /// Rotate `angle` radians around `axis` in the given space
    pub fn rotate_by_axis_angle(&mut self, axis: Vec3, angle: f32, space: TransformSpace) {
        self.rotate(Quat::from_axis_angle(&Unit::new_normalize(axis), angle), space);
    }

    /// Turn so the local forward axis (-Z) points at `target`
    ///
    /// `target` and `up` are in the parent's space. Degenerate inputs (target
    /// at the current position, or `up` parallel to the view direction) leave
    /// the rotation untouched.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let to_target = target - self.local_position;
        if to_target.norm_squared() <= f32::EPSILON {
            log::warn!("look_at target coincides with position on node {}", self.node().id());
            return;
        }
        let forward = to_target.normalize();
        let right = forward.cross(&up);
        if right.norm_squared() <= f32::EPSILON {
            log::warn!("look_at up vector is parallel to view direction on node {}", self.node().id());
            return;
        }
        let right = right.normalize();
        let camera_up = right.cross(&forward);

        let basis = Mat3::from_columns(&[right, camera_up, -forward]);
        self.set_local_rotation(Quat::from_rotation_matrix(&Rotation3::from_matrix_unchecked(basis)));
    }

    /// Replace position, rotation and scale from an affine local matrix
    pub fn set_local_matrix(&mut self, matrix: &Mat4) {
        self.assign_local_matrix(matrix);
        self.mark_dirty_recursive(DirtyFlags::LOCAL | DirtyFlags::WORLD_DERIVED);
    }

    fn assign_local_matrix(&mut self, matrix: &Mat4) {
        let (position, rotation, scale) = decompose_trs(matrix);
        self.local_position = position;
        self.local_rotation = rotation;
        self.local_scale = scale;
    }

    // ------------------------------------------------------------------
    // Derived state
    // ------------------------------------------------------------------

    /// Local matrix (T * R * S)
    pub fn matrix(&self) -> Mat4 {
        let dirty = self.dirty.get();
        if dirty.intersects(DirtyFlags::LOCAL) {
            self.matrix.set(compose_trs(&self.local_position, &self.local_rotation, &self.local_scale));
            self.dirty.set(dirty - DirtyFlags::LOCAL);
            self.count_recompute("local matrix");
        }
        self.matrix.get()
    }

    /// Local-to-world matrix
    pub fn world_matrix(&self) -> Mat4 {
        if self.dirty.get().contains(DirtyFlags::WORLD) {
            let local = self.matrix();
            let world = match self.parent() {
                Some(parent) => parent.borrow().world_matrix() * local,
                None => local,
            };
            self.world_matrix.set(world);
            self.dirty.set(self.dirty.get() - DirtyFlags::WORLD);
            self.count_recompute("world matrix");
        }
        self.world_matrix.get()
    }

    /// Inverse-transposed world matrix, for normals
    pub fn inv_transposed_world_matrix(&self) -> Mat4 {
        if self.dirty.get().contains(DirtyFlags::INV_TRANSPOSED_WORLD) {
            let world = self.world_matrix();
            self.inv_transposed_world_matrix.set(inverse_transpose(&world));
            self.dirty.set(self.dirty.get() - DirtyFlags::INV_TRANSPOSED_WORLD);
            self.count_recompute("inverse-transposed world matrix");
        }
        self.inv_transposed_world_matrix.get()
    }

    /// `view * world` for `camera`
    pub fn world_view_matrix(&self, camera: &Camera) -> Mat4 {
        camera.view_matrix() * self.world_matrix()
    }

    /// `projection * view * world` for `camera`
    pub fn world_view_proj_matrix(&self, camera: &Camera) -> Mat4 {
        camera.view_projection_matrix() * self.world_matrix()
    }

    /// Inverse-transposed `view * world`, for view-space normals
    pub fn inv_transposed_world_view_matrix(&self, camera: &Camera) -> Mat4 {
        inverse_transpose(&self.world_view_matrix(camera))
    }

    /// World-space position
    pub fn world_position(&self) -> Vec3 {
        self.world_matrix().translation()
    }

    /// World-space rotation
    pub fn world_rotation(&self) -> Quat {
        decompose_trs(&self.world_matrix()).1
    }

    /// World-space scale (lossy under non-uniform parent scale with rotation)
    pub fn world_scale(&self) -> Vec3 {
        decompose_trs(&self.world_matrix()).2
    }

    /// Map a local-space point to world space
    pub fn transform_point(&self, point: &Point3) -> Point3 {
        self.world_matrix().transform_point(point)
    }

    /// Map a local-space direction to world space
    pub fn transform_direction(&self, direction: &Vec3) -> Vec3 {
        self.world_matrix().transform_vector(direction)
    }

    /// Local +Y
    pub fn local_up(&self) -> Vec3 {
        self.local_rotation * Vec3::y()
    }

    /// Local -Y
    pub fn local_down(&self) -> Vec3 {
        -self.local_up()
    }

    /// Local +X
    pub fn local_right(&self) -> Vec3 {
        self.local_rotation * Vec3::x()
    }

    /// Local -X
    pub fn local_left(&self) -> Vec3 {
        -self.local_right()
    }

    /// Local -Z
    pub fn local_forward(&self) -> Vec3 {
        self.local_rotation * -Vec3::z()
    }

    /// Local +Z
    pub fn local_back(&self) -> Vec3 {
        -self.local_forward()
    }

    /// World +Y, normalized
    pub fn world_up(&self) -> Vec3 {
        self.world_direction(Vec3::y())
    }

    /// World -Y, normalized
    pub fn world_down(&self) -> Vec3 {
        -self.world_up()
    }

    /// World +X, normalized
    pub fn world_right(&self) -> Vec3 {
        self.world_direction(Vec3::x())
    }

    /// World -X, normalized
    pub fn world_left(&self) -> Vec3 {
        -self.world_right()
    }

    /// World -Z, normalized
    pub fn world_forward(&self) -> Vec3 {
        self.world_direction(-Vec3::z())
    }

    /// World +Z, normalized
    pub fn world_back(&self) -> Vec3 {
        -self.world_forward()
    }

    fn world_direction(&self, axis: Vec3) -> Vec3 {
        self.world_matrix()
            .transform_vector(&axis)
            .try_normalize(f32::EPSILON)
            .unwrap_or(axis)
    }

    fn count_recompute(&self, what: &str) {
        self.recompute_count.set(self.recompute_count.get() + 1);
        log::trace!("Recomputed {what} for node {}", self.node().id());
    }
}

/// `transform` and its descendants can be borrowed as orphan handling needs
fn subtree_is_free(transform: &TransformRef, needs_mut: bool) -> bool {
    let children = if needs_mut {
        match transform.try_borrow_mut() {
            Ok(transform) => transform.children(),
            Err(_) => return false,
        }
    } else {
        match transform.try_borrow() {
            Ok(transform) => transform.children(),
            Err(_) => return false,
        }
    };
    children.iter().all(|child| subtree_is_free(child, false))
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform")
            .field("node", &self.node().id())
            .field("local_position", &self.local_position)
            .field("local_rotation", &self.local_rotation)
            .field("local_scale", &self.local_scale)
            .field("dirty", &self.dirty.get())
            .field("children", &self.child_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::ecs::Scene;
    use crate::foundation::math::constants::HALF_PI;
    use approx::assert_relative_eq;

    fn spawn(scene: &Scene) -> TransformRef {
        scene.create_node().add_component::<Transform>(()).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(NodeId, DirtyFlags)>>,
    }

    impl TransformCallback for Recorder {
        fn on_transform_changed(&self, node: NodeId, flags: DirtyFlags) {
            self.calls.borrow_mut().push((node, flags));
        }
    }

    #[test]
    fn test_new_transform_is_identity() {
        let scene = Scene::new(SceneConfig::default());
        let t = spawn(&scene);
        assert_eq!(t.borrow().world_matrix(), Mat4::identity());
        assert_eq!(t.borrow().inv_transposed_world_matrix(), Mat4::identity());
        assert!(t.borrow().dirty_flags().is_empty());
    }

    #[test]
    fn test_mutation_sets_expected_bits() {
        let scene = Scene::new(SceneConfig::default());
        let t = spawn(&scene);
        t.borrow().world_matrix();
        t.borrow().inv_transposed_world_matrix();

        t.borrow_mut().set_local_scale(Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(
            t.borrow().dirty_flags(),
            DirtyFlags::SCALE | DirtyFlags::WORLD | DirtyFlags::INV_TRANSPOSED_WORLD
        );

        t.borrow().matrix();
        assert_eq!(t.borrow().dirty_flags(), DirtyFlags::WORLD_DERIVED);
    }

    #[test]
    fn test_descendants_only_get_world_bits() {
        let scene = Scene::new(SceneConfig::default());
        let root = spawn(&scene);
        let child = spawn(&scene);
        let grandchild = spawn(&scene);
        child.borrow_mut().set_parent(Some(&root)).unwrap();
        grandchild.borrow_mut().set_parent(Some(&child)).unwrap();
        grandchild.borrow().inv_transposed_world_matrix();
        child.borrow().inv_transposed_world_matrix();

        root.borrow_mut().set_local_rotation(Quat::from_axis_angle(&Vec3::z_axis(), 0.3));

        assert_eq!(child.borrow().dirty_flags(), DirtyFlags::WORLD_DERIVED);
        assert_eq!(grandchild.borrow().dirty_flags(), DirtyFlags::WORLD_DERIVED);
    }

    #[test]
    fn test_rotated_parent_moves_child() {
        let scene = Scene::new(SceneConfig::default());
        let parent = spawn(&scene);
        let child = spawn(&scene);
        child.borrow_mut().set_parent(Some(&parent)).unwrap();
        child.borrow_mut().set_local_position(Vec3::new(0.0, 0.0, 1.0));

        parent.borrow_mut().set_local_position(Vec3::new(1.0, 0.0, 0.0));
        parent.borrow_mut().set_local_rotation(Quat::from_axis_angle(&Vec3::y_axis(), HALF_PI));

        assert_relative_eq!(child.borrow().world_position(), Vec3::new(2.0, 0.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_repeated_reads_do_not_recompute() {
        let scene = Scene::new(SceneConfig::default());
        let t = spawn(&scene);
        t.borrow_mut().set_local_position(Vec3::new(1.0, 2.0, 3.0));

        let first = t.borrow().world_matrix();
        let count = t.borrow().recompute_count();
        let second = t.borrow().world_matrix();

        assert_eq!(first, second);
        assert_eq!(t.borrow().recompute_count(), count);
    }

    #[test]
    fn test_callback_receives_exact_bits_once_per_call() {
        let scene = Scene::new(SceneConfig::default());
        let t = spawn(&scene);
        let recorder = Rc::new(Recorder::default());
        let weak: Weak<dyn TransformCallback> = Rc::downgrade(&recorder) as Weak<dyn TransformCallback>;
        t.borrow().add_callback(weak);

        t.borrow_mut().set_local_position(Vec3::new(3.0, 0.0, 0.0));
        t.borrow().world_matrix();
        t.borrow().world_matrix();

        let calls = recorder.calls.borrow();
        assert_eq!(calls.len(), 1);
        let flags = calls[0].1;
        assert_eq!(flags, DirtyFlags::POSITION | DirtyFlags::WORLD | DirtyFlags::INV_TRANSPOSED_WORLD);
        assert!(!flags.intersects(DirtyFlags::ROTATION | DirtyFlags::SCALE));
    }

    #[test]
    fn test_descendant_callbacks_see_world_bits() {
        let scene = Scene::new(SceneConfig::default());
        let parent = spawn(&scene);
        let child = spawn(&scene);
        child.borrow_mut().set_parent(Some(&parent)).unwrap();

        let recorder = Rc::new(Recorder::default());
        let weak: Weak<dyn TransformCallback> = Rc::downgrade(&recorder) as Weak<dyn TransformCallback>;
        child.borrow().add_callback(weak);

        parent.borrow_mut().translate_local(Vec3::new(0.0, 1.0, 0.0));

        let calls = recorder.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (child.borrow().node().id(), DirtyFlags::WORLD_DERIVED));
    }

    #[test]
    fn test_orphaned_child_is_notified_once() {
        let scene = Scene::new(SceneConfig::default());
        let parent = spawn(&scene);
        let child = spawn(&scene);
        child.borrow_mut().set_parent(Some(&parent)).unwrap();
        parent.borrow_mut().set_local_position(Vec3::new(0.0, 2.0, 0.0));

        let recorder = Rc::new(Recorder::default());
        let weak: Weak<dyn TransformCallback> = Rc::downgrade(&recorder) as Weak<dyn TransformCallback>;
        child.borrow().add_callback(weak);

        let parent_node = parent.borrow().node().clone();
        assert!(parent_node.remove_component::<Transform>().unwrap());

        let calls = recorder.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, DirtyFlags::LOCAL | DirtyFlags::WORLD_DERIVED);
        assert_relative_eq!(child.borrow().world_position(), Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn test_expired_callbacks_are_ignored() {
        let scene = Scene::new(SceneConfig::default());
        let t = spawn(&scene);
        let recorder = Rc::new(Recorder::default());
        let weak: Weak<dyn TransformCallback> = Rc::downgrade(&recorder) as Weak<dyn TransformCallback>;
        t.borrow().add_callback(weak.clone());
        t.borrow().remove_callback(&weak);
        t.borrow_mut().set_local_position(Vec3::x());
        assert!(recorder.calls.borrow().is_empty());

        t.borrow().add_callback(weak);
        drop(recorder);
        t.borrow_mut().set_local_position(Vec3::y());
    }

    #[test]
    fn test_cycles_are_rejected() {
        let scene = Scene::new(SceneConfig::default());
        let a = spawn(&scene);
        let b = spawn(&scene);
        let c = spawn(&scene);
        b.borrow_mut().set_parent(Some(&a)).unwrap();
        c.borrow_mut().set_parent(Some(&b)).unwrap();

        let err = a.borrow_mut().set_parent(Some(&c)).unwrap_err();
        assert!(matches!(err, SceneError::HierarchyCycle { .. }));
        assert!(a.borrow().parent().is_none());

        let self_parent = Rc::clone(&a);
        assert!(a.borrow_mut().set_parent(Some(&self_parent)).is_err());
    }

    #[test]
    fn test_reparenting_moves_between_children_lists() {
        let scene = Scene::new(SceneConfig::default());
        let first = spawn(&scene);
        let second = spawn(&scene);
        let child = spawn(&scene);
        second.borrow_mut().set_local_position(Vec3::new(0.0, 7.0, 0.0));

        child.borrow_mut().set_parent(Some(&first)).unwrap();
        child.borrow_mut().set_parent(Some(&first)).unwrap();
        assert_eq!(first.borrow().child_count(), 1);
        assert_relative_eq!(child.borrow().world_position(), Vec3::zeros());

        child.borrow_mut().set_parent(Some(&second)).unwrap();
        assert_eq!(first.borrow().child_count(), 0);
        assert_eq!(second.borrow().child_count(), 1);
        assert!(Rc::ptr_eq(&second.borrow().child(0).unwrap(), &child));
        assert_relative_eq!(child.borrow().world_position(), Vec3::new(0.0, 7.0, 0.0));

        child.borrow_mut().set_parent(None).unwrap();
        assert_eq!(second.borrow().child_count(), 0);
        assert_relative_eq!(child.borrow().world_position(), Vec3::zeros());
    }

    #[test]
    fn test_clear_children_makes_roots() {
        let scene = Scene::new(SceneConfig::default());
        let parent = spawn(&scene);
        let child = spawn(&scene);
        parent.borrow_mut().set_local_position(Vec3::new(5.0, 0.0, 0.0));
        child.borrow_mut().set_parent(Some(&parent)).unwrap();
        assert_relative_eq!(child.borrow().world_position(), Vec3::new(5.0, 0.0, 0.0));

        parent.borrow_mut().clear_children();
        assert!(child.borrow().parent().is_none());
        assert_eq!(parent.borrow().child_count(), 0);
        assert_relative_eq!(child.borrow().world_position(), Vec3::zeros());
    }

    #[test]
    fn test_rotate_in_each_space() {
        let scene = Scene::new(SceneConfig::default());
        let parent = spawn(&scene);
        let child = spawn(&scene);
        child.borrow_mut().set_parent(Some(&parent)).unwrap();
        parent.borrow_mut().set_local_rotation(Quat::from_axis_angle(&Vec3::y_axis(), HALF_PI));

        // the parent yaw points the child's forward at -X
        assert_relative_eq!(child.borrow().world_forward(), -Vec3::x(), epsilon = 1e-5);

        child.borrow_mut().rotate_by_axis_angle(Vec3::z(), HALF_PI, TransformSpace::Parent);
        // about the parent's Z, which is world X, so -X stays put
        assert_relative_eq!(child.borrow().world_forward(), -Vec3::x(), epsilon = 1e-5);

        child.borrow_mut().set_local_rotation(Quat::identity());
        child.borrow_mut().rotate_by_axis_angle(Vec3::z(), HALF_PI, TransformSpace::World);
        // about world Z, -X turns to -Y
        assert_relative_eq!(child.borrow().world_forward(), -Vec3::y(), epsilon = 1e-5);

        let single = spawn(&scene);
        single.borrow_mut().rotate_by_axis_angle(Vec3::y(), HALF_PI, TransformSpace::Local);
        single.borrow_mut().rotate_by_axis_angle(Vec3::x(), HALF_PI, TransformSpace::Local);
        // local X after the yaw is world -Z; pitching about it sends forward to +Y
        assert_relative_eq!(single.borrow().world_forward(), Vec3::y(), epsilon = 1e-5);
    }

    #[test]
    fn test_look_at_points_forward_at_target() {
        let scene = Scene::new(SceneConfig::default());
        let t = spawn(&scene);
        t.borrow_mut().set_local_position(Vec3::new(0.0, 0.0, 5.0));
        t.borrow_mut().look_at(Vec3::new(5.0, 0.0, 5.0), Vec3::y());
        assert_relative_eq!(t.borrow().world_forward(), Vec3::x(), epsilon = 1e-5);
        assert_relative_eq!(t.borrow().world_up(), Vec3::y(), epsilon = 1e-5);

        let before = t.borrow().local_rotation();
        t.borrow_mut().look_at(Vec3::new(0.0, 10.0, 5.0), Vec3::y());
        assert_eq!(t.borrow().local_rotation(), before);
    }

    #[test]
    fn test_inverse_transposed_matches_definition() {
        let scene = Scene::new(SceneConfig::default());
        let t = spawn(&scene);
        t.borrow_mut().set_local_scale(Vec3::new(2.0, 1.0, 0.5));
        t.borrow_mut().set_local_axis_angle_rotation(Vec3::new(1.0, 1.0, 0.0), 0.4);

        let world = t.borrow().world_matrix();
        let expected = world.try_inverse().unwrap().transpose();
        assert_relative_eq!(t.borrow().inv_transposed_world_matrix(), expected, epsilon = 1e-5);
    }
}
