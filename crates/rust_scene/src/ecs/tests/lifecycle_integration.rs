//! Component lifecycle across the scene, node and built-in components

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::config::SceneConfig;
use crate::ecs::{
    Camera, CameraSettings, Component, ComponentBase, ComponentTypeId, Creatable, DirtyFlags, Node, NodeId, Scene,
    SceneError, Transform, TransformCallback,
};
use crate::foundation::math::Vec3;

/// Counts transform notifications for the node it is attached to
#[derive(Debug)]
struct MotionSensor {
    base: ComponentBase,
    hits: Rc<Cell<u32>>,
}

impl TransformCallback for Cell<u32> {
    fn on_transform_changed(&self, _node: NodeId, flags: DirtyFlags) {
        if flags.intersects(DirtyFlags::LOCAL) {
            self.set(self.get() + 1);
        }
    }
}

impl Component for MotionSensor {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }
}

impl Creatable for MotionSensor {
    type Args = ();

    fn create(node: Node, _args: ()) -> Result<Self, SceneError> {
        Ok(Self {
            base: ComponentBase::new(node),
            hits: Rc::new(Cell::new(0)),
        })
    }

    fn attach(component: &Rc<RefCell<Self>>) -> Result<(), SceneError> {
        let sensor = component.borrow();
        let transform = sensor.node().require_component::<Transform>()?;
        let hits: Rc<dyn TransformCallback> = sensor.hits.clone();
        transform.borrow().add_callback(Rc::downgrade(&hits));
        Ok(())
    }
}

#[test]
fn test_failed_attach_leaves_no_component() {
    let scene = Scene::new(SceneConfig::default());
    let node = scene.create_node();

    let err = node.add_component::<MotionSensor>(()).unwrap_err();
    assert!(matches!(err, SceneError::ComponentNotFound { .. }));
    assert!(!node.has_component::<MotionSensor>());
    assert_eq!(scene.component_count(), 0);
}

#[test]
fn test_sensor_counts_local_mutations_only() {
    let scene = Scene::new(SceneConfig::default());
    let parent = scene.create_node().add_component::<Transform>(()).unwrap();
    let node = scene.create_node();
    let transform = node.add_component::<Transform>(()).unwrap();
    transform.borrow_mut().set_parent(Some(&parent)).unwrap();
    let sensor = node.add_component::<MotionSensor>(()).unwrap();
    let hits = Rc::clone(&sensor.borrow().hits);

    transform.borrow_mut().set_local_position(Vec3::x());
    transform.borrow_mut().rotate_by_axis_angle(Vec3::y(), 0.5, Default::default());
    parent.borrow_mut().set_local_position(Vec3::y());
    assert_eq!(hits.get(), 2);
}

#[test]
fn test_camera_on_node_is_found_by_type_id() {
    let scene = Scene::new(SceneConfig::default());
    let node = scene.create_node();
    node.add_component::<Camera>(CameraSettings::default()).unwrap();

    let camera = scene
        .find_component(node.id(), ComponentTypeId::of::<Camera>())
        .unwrap();
    assert_eq!(camera.borrow().type_name(), std::any::type_name::<Camera>());
    assert_eq!(scene.components_of(node.id()).len(), 2);
}

#[test]
fn test_visit_by_camera_render_tags() {
    let scene = Scene::new(SceneConfig::default());
    let settings = CameraSettings {
        render_tags: 0b10,
        ..CameraSettings::default()
    };
    let camera = scene.create_node().add_component::<Camera>(settings).unwrap();
    let shown = scene.create_node().add_component::<Transform>(()).unwrap();
    shown.borrow_mut().set_tag(0b11);

    let mask = camera.borrow().render_tags();
    let visited: Vec<_> = scene.visit_by_tags(mask).collect();
    assert_eq!(visited.len(), 1);
    assert_eq!(visited[0].borrow().node().id(), shown.borrow().node().id());
}

#[test]
fn test_removed_component_stays_usable_through_held_handle() {
    let scene = Scene::new(SceneConfig::default());
    let node = scene.create_node();
    let transform = node.add_component::<Transform>(()).unwrap();
    let weak: Weak<RefCell<Transform>> = Rc::downgrade(&transform);

    assert!(node.remove_component::<Transform>().unwrap());
    assert!(node.transform().is_none());

    transform.borrow_mut().set_local_position(Vec3::z());
    assert_eq!(transform.borrow().world_position(), Vec3::z());
    drop(transform);
    assert!(weak.upgrade().is_none());
}
