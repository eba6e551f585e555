//! Per-pass render context

use std::cell::RefCell;
use std::rc::Rc;

use crate::ecs::components::Camera;

/// State shared with every component rendered in one pass
#[derive(Debug, Clone)]
pub struct RenderContext {
    camera: Rc<RefCell<Camera>>,
}

impl RenderContext {
    /// Context rendering from `camera`
    pub fn new(camera: Rc<RefCell<Camera>>) -> Self {
        Self { camera }
    }

    /// Active camera
    pub fn camera(&self) -> &Rc<RefCell<Camera>> {
        &self.camera
    }
}
