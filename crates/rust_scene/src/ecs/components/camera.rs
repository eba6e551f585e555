//! Camera component
//!
//! A camera takes its placement from the node's [`Transform`] and keeps its
//! own lazy caches on top of it: view, inverse view, projection and the
//! combined matrices. The view-side caches are invalidated through a
//! [`TransformCallback`], so a camera is only as fresh as the transform
//! notifications it receives.
//!
//! # Coordinate System
//! Right-handed, Y-up, looking down -Z in view space. Projections use
//! OpenGL clip conventions; backend-specific corrections belong to the
//! renderer.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::transform::{DirtyFlags, Transform, TransformCallback, TransformRef};
use crate::ecs::component::{Component, ComponentBase, Creatable};
use crate::ecs::node::{Node, NodeId};
use crate::ecs::scene::SceneError;
use crate::ecs::type_registry::ComponentTypeId;
use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3};

bitflags! {
    /// Stale cached matrices of a camera
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CameraDirtyFlags: u8 {
        /// World-to-view matrix
        const VIEW = 1 << 0;
        /// View-to-world matrix
        const INV_VIEW = 1 << 1;
        /// Projection matrix
        const PROJECTION = 1 << 2;
        /// `projection * view`
        const VIEW_PROJECTION = 1 << 3;
        /// Inverse of `projection * view`
        const INV_VIEW_PROJECTION = 1 << 4;

        /// Everything that depends on the camera's placement
        const VIEW_DEPENDENT = Self::VIEW.bits()
            | Self::INV_VIEW.bits()
            | Self::VIEW_PROJECTION.bits()
            | Self::INV_VIEW_PROJECTION.bits();
        /// Everything that depends on the projection parameters
        const PROJECTION_DEPENDENT = Self::PROJECTION.bits()
            | Self::VIEW_PROJECTION.bits()
            | Self::INV_VIEW_PROJECTION.bits();
    }
}

/// Projection model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Projection {
    /// Field-of-view frustum
    #[default]
    Perspective,
    /// Box volume of `ortho_size` height
    Orthographic,
}

/// Construction arguments for [`Camera`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Projection model
    pub projection: Projection,
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Width / height
    pub aspect: f32,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance
    pub far: f32,
    /// Vertical extent of the orthographic view volume
    pub ortho_size: f32,
    /// Components whose tag intersects this mask are rendered by the camera
    pub render_tags: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            projection: Projection::Perspective,
            fov_degrees: 60.0,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
            ortho_size: 10.0,
            render_tags: u32::MAX,
        }
    }
}

/// Shared dirty state the transform callback writes into
///
/// Lives outside the camera's `RefCell` so a notification never has to
/// borrow the camera.
#[derive(Debug)]
struct ViewInvalidator {
    dirty: Cell<CameraDirtyFlags>,
}

impl ViewInvalidator {
    fn invalidate(&self, flags: CameraDirtyFlags) {
        self.dirty.set(self.dirty.get() | flags);
    }
}

impl TransformCallback for ViewInvalidator {
    fn on_transform_changed(&self, node: NodeId, flags: DirtyFlags) {
        if flags.contains(DirtyFlags::WORLD) {
            log::trace!("Camera view invalidated by node {node}");
            self.invalidate(CameraDirtyFlags::VIEW_DEPENDENT);
        }
    }
}

/// Camera component
pub struct Camera {
    base: ComponentBase,
    settings: CameraSettings,
    transform: Weak<RefCell<Transform>>,
    invalidator: Rc<ViewInvalidator>,

    view: Cell<Mat4>,
    inv_view: Cell<Mat4>,
    projection: Cell<Mat4>,
    view_projection: Cell<Mat4>,
    inv_view_projection: Cell<Mat4>,
}

impl Creatable for Camera {
    type Args = CameraSettings;

    fn create(node: Node, settings: CameraSettings) -> Result<Self, SceneError> {
        Ok(Self {
            base: ComponentBase::new(node),
            settings,
            transform: Weak::new(),
            invalidator: Rc::new(ViewInvalidator {
                dirty: Cell::new(CameraDirtyFlags::all()),
            }),
            view: Cell::new(Mat4::identity()),
            inv_view: Cell::new(Mat4::identity()),
            projection: Cell::new(Mat4::identity()),
            view_projection: Cell::new(Mat4::identity()),
            inv_view_projection: Cell::new(Mat4::identity()),
        })
    }

    fn attach(component: &Rc<RefCell<Self>>) -> Result<(), SceneError> {
        let node = component.borrow().node().clone();
        let transform = node.find_or_add_component::<Transform>()?;
        component.borrow_mut().connect(&transform);
        Ok(())
    }
}

impl Component for Camera {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn terminate(&mut self) {
        if let Some(transform) = self.transform.upgrade() {
            if let Ok(transform) = transform.try_borrow() {
                transform.remove_callback(&self.callback_handle());
            }
        }
        self.transform = Weak::new();
    }

    fn on_component_added(&mut self, type_id: ComponentTypeId) {
        if type_id == ComponentTypeId::of::<Transform>() {
            if let Some(transform) = self.node().transform() {
                self.connect(&transform);
            }
        }
    }

    fn on_component_removed(&mut self, type_id: ComponentTypeId) {
        if type_id == ComponentTypeId::of::<Transform>() {
            log::debug!("Camera on node {} lost its transform", self.node().id());
            self.transform = Weak::new();
            self.invalidator.invalidate(CameraDirtyFlags::VIEW_DEPENDENT);
        }
    }
}

impl Camera {
    fn callback_handle(&self) -> Weak<dyn TransformCallback> {
        let invalidator: Rc<dyn TransformCallback> = self.invalidator.clone();
        Rc::downgrade(&invalidator)
    }

    fn connect(&mut self, transform: &TransformRef) {
        if self.transform.ptr_eq(&Rc::downgrade(transform)) {
            return;
        }
        transform.borrow().add_callback(self.callback_handle());
        self.transform = Rc::downgrade(transform);
        self.invalidator.invalidate(CameraDirtyFlags::VIEW_DEPENDENT);
    }

    /// Transform the camera follows, if it still exists
    pub fn transform(&self) -> Option<TransformRef> {
        self.transform.upgrade()
    }

    /// Current settings
    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Bits currently set
    pub fn dirty_flags(&self) -> CameraDirtyFlags {
        self.invalidator.dirty.get()
    }

    /// Components whose tag intersects this mask are rendered
    pub fn render_tags(&self) -> u32 {
        self.settings.render_tags
    }

    /// Replace the render mask
    pub fn set_render_tags(&mut self, tags: u32) {
        self.settings.render_tags = tags;
    }

    /// Switch between perspective and orthographic
    pub fn set_projection(&mut self, projection: Projection) {
        self.settings.projection = projection;
        self.invalidate_projection();
    }

    /// Vertical field of view in degrees
    pub fn set_fov_degrees(&mut self, fov_degrees: f32) {
        self.settings.fov_degrees = fov_degrees;
        self.invalidate_projection();
    }

    /// Width / height
    pub fn set_aspect(&mut self, aspect: f32) {
        self.settings.aspect = aspect;
        self.invalidate_projection();
    }

    /// Near and far clip distances
    pub fn set_clip_planes(&mut self, near: f32, far: f32) {
        self.settings.near = near;
        self.settings.far = far;
        self.invalidate_projection();
    }

    /// Vertical extent of the orthographic volume
    pub fn set_ortho_size(&mut self, ortho_size: f32) {
        self.settings.ortho_size = ortho_size;
        self.invalidate_projection();
    }

    fn invalidate_projection(&self) {
        self.invalidator.invalidate(CameraDirtyFlags::PROJECTION_DEPENDENT);
    }

    fn take_dirty(&self, flag: CameraDirtyFlags) -> bool {
        let dirty = self.invalidator.dirty.get();
        if dirty.contains(flag) {
            self.invalidator.dirty.set(dirty - flag);
            true
        } else {
            false
        }
    }

    /// World-to-view matrix, identity without a transform
    pub fn view_matrix(&self) -> Mat4 {
        if self.dirty_flags().contains(CameraDirtyFlags::VIEW) {
            let world = match self.transform.upgrade() {
                Some(transform) => match transform.try_borrow() {
                    Ok(transform) => Some(transform.world_matrix()),
                    Err(_) => {
                        log::warn!("Camera transform is busy, reusing previous view matrix");
                        return self.view.get();
                    }
                },
                None => None,
            };
            let view = world
                .and_then(|world| world.try_inverse())
                .unwrap_or_else(Mat4::identity);
            self.view.set(view);
            self.take_dirty(CameraDirtyFlags::VIEW);
        }
        self.view.get()
    }

    /// View-to-world matrix
    pub fn inv_view_matrix(&self) -> Mat4 {
        if self.dirty_flags().contains(CameraDirtyFlags::INV_VIEW) {
            let view = self.view_matrix();
            self.inv_view.set(view.try_inverse().unwrap_or_else(Mat4::identity));
            self.take_dirty(CameraDirtyFlags::INV_VIEW);
        }
        self.inv_view.get()
    }

    /// Projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        if self.take_dirty(CameraDirtyFlags::PROJECTION) {
            let s = &self.settings;
            let projection = match s.projection {
                Projection::Perspective => {
                    Mat4::perspective(utils::deg_to_rad(s.fov_degrees), s.aspect, s.near, s.far)
                }
                Projection::Orthographic => {
                    Mat4::orthographic(s.ortho_size * s.aspect, s.ortho_size, s.near, s.far)
                }
            };
            self.projection.set(projection);
        }
        self.projection.get()
    }

    /// `projection * view`
    pub fn view_projection_matrix(&self) -> Mat4 {
        if self.dirty_flags().contains(CameraDirtyFlags::VIEW_PROJECTION) {
            let view_projection = self.projection_matrix() * self.view_matrix();
            self.view_projection.set(view_projection);
            self.take_dirty(CameraDirtyFlags::VIEW_PROJECTION);
        }
        self.view_projection.get()
    }

    /// Inverse of `projection * view`
    pub fn inv_view_projection_matrix(&self) -> Mat4 {
        if self.dirty_flags().contains(CameraDirtyFlags::INV_VIEW_PROJECTION) {
            let inverse = self
                .view_projection_matrix()
                .try_inverse()
                .unwrap_or_else(Mat4::identity);
            self.inv_view_projection.set(inverse);
            self.take_dirty(CameraDirtyFlags::INV_VIEW_PROJECTION);
        }
        self.inv_view_projection.get()
    }

    /// World-space eye position
    pub fn position(&self) -> Vec3 {
        self.inv_view_matrix().translation()
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("node", &self.node().id())
            .field("settings", &self.settings)
            .field("dirty", &self.dirty_flags())
            .finish_non_exhaustive()
    }
}
