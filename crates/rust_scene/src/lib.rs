//! # Rust Scene
//!
//! Scene graph and component system for a 3D engine.
//!
//! ## Features
//!
//! - **Components**: typed components attached to lightweight node handles
//! - **Transform Hierarchy**: parent/child transforms with a lazy, dirty-flag
//!   cached world matrix
//! - **Observers**: transform callbacks for components that cache derived data
//! - **Frame Driver**: a headless engine loop dispatching update and render
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_scene::prelude::*;
//!
//! struct MyApp;
//!
//! impl Application for MyApp {
//!     fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
//!         let root = engine.scene().create_node().add_component::<Transform>(())?;
//!         let camera = engine.scene().create_node().add_component::<Camera>(CameraSettings::default())?;
//!         camera.borrow().transform().unwrap().borrow_mut().set_parent(Some(&root))?;
//!         engine.set_active_camera(Some(&camera));
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, engine: &mut Engine, delta_time: f32) -> Result<(), AppError> {
//!         Ok(())
//!     }
//!
//!     fn cleanup(&mut self, engine: &mut Engine) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let mut app = MyApp;
//!     Engine::run(config, &mut app)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::must_use_candidate)]

pub mod assets;
pub mod config;
pub mod ecs;
pub mod foundation;
pub mod render;

mod application;
mod engine;

pub use application::{AppError, Application};
pub use engine::{Engine, EngineError};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{HandoffQueue, HandoffSender, MainThreadTask},
        config::{Config, EngineConfig, OrphanPolicy, SceneConfig},
        ecs::{
            Camera, CameraSettings, Component, ComponentBase, ComponentTypeId, Creatable, DirtyFlags, Node,
            NodeId, Scene, SceneError, Transform, TransformCallback, TransformRef, TransformSpace,
        },
        foundation::{
            math::{Mat4, Quat, Vec3},
            time::Timer,
        },
        render::{RenderContext, TransformUniforms},
        AppError, Application, Engine, EngineError,
    };
}
