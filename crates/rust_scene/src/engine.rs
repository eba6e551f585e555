//! Core engine implementation
//!
//! The engine owns one scene and drives it frame by frame: drain work handed
//! over from background threads, let the application update, update every
//! component, then render the components the active camera selects.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use thiserror::Error;

use crate::application::Application;
use crate::assets::{HandoffQueue, HandoffSender, MainThreadTask};
use crate::config::{ConfigError, EngineConfig};
use crate::ecs::{Camera, Scene, SceneError};
use crate::foundation::{logging, time::Timer};
use crate::render::RenderContext;

/// Main engine struct
///
/// The engine coordinates the scene and manages the main loop.
pub struct Engine {
    scene: Rc<Scene>,
    timer: Timer,
    config: EngineConfig,
    running: bool,
    active_camera: Option<Weak<RefCell<Camera>>>,
    tasks: HandoffQueue<MainThreadTask>,
}

impl Engine {
    /// Create a new engine instance
    ///
    /// Also installs the logger with the configured filter, unless one is
    /// already installed.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        logging::init_with_filter(&config.log_filter);
        log::info!("Initializing engine...");

        if config.fixed_delta_time.is_some_and(|dt| !(dt.is_finite() && dt >= 0.0)) {
            return Err(EngineError::InitializationFailed(format!(
                "fixed_delta_time must be a non-negative number, got {:?}",
                config.fixed_delta_time
            )));
        }

        let timer = match config.fixed_delta_time {
            Some(delta) => Timer::fixed(delta),
            None => Timer::new(),
        };

        Ok(Self {
            scene: Scene::new(config.scene.clone()),
            timer,
            config,
            running: true,
            active_camera: None,
            tasks: HandoffQueue::new(),
        })
    }

    /// Run the engine main loop with the given application
    ///
    /// Loops until the application calls [`Engine::request_exit`] or
    /// `max_frames` is reached.
    pub fn run<T: Application>(config: EngineConfig, app: &mut T) -> Result<(), EngineError> {
        let mut engine = Self::new(config)?;

        app.initialize(&mut engine)
            .map_err(|e| EngineError::Application(format!("App initialization: {e}")))?;

        log::info!("Starting main loop...");

        while engine.running {
            let delta_time = engine.timer.tick();

            app.update(&mut engine, delta_time)
                .map_err(|e| EngineError::Application(format!("App update: {e}")))?;

            engine.update(delta_time);

            app.render(&mut engine)
                .map_err(|e| EngineError::Application(format!("App render: {e}")))?;

            if engine
                .config
                .max_frames
                .is_some_and(|max| engine.timer.frame_count() >= max)
            {
                log::info!("Reached frame limit of {}", engine.timer.frame_count());
                engine.running = false;
            }
        }

        app.cleanup(&mut engine);

        log::info!("Engine shutdown complete");
        Ok(())
    }

    /// Update the scene: drain handed-off tasks, then update every component
    ///
    /// Components that are borrowed elsewhere are skipped for this frame.
    pub fn update(&mut self, delta_time: f32) {
        let scene = &self.scene;
        self.tasks.update(|task| task(scene));

        for component in self.scene.visit() {
            match component.try_borrow_mut() {
                Ok(mut component) => component.update(delta_time),
                Err(_) => log::warn!("Skipping update of a component that is already borrowed"),
            }
        }
    }

    /// Render the components the active camera selects
    ///
    /// Returns how many components were rendered; zero without a camera.
    pub fn render(&mut self) -> Result<usize, EngineError> {
        let Some(camera) = self.active_camera() else {
            log::trace!("No active camera, skipping render pass");
            return Ok(0);
        };
        let tags = camera
            .try_borrow()
            .map_err(|_| EngineError::Render("active camera is mutably borrowed".to_string()))?
            .render_tags();

        let context = RenderContext::new(camera);
        let mut rendered = 0;
        for component in self.scene.visit_by_tags(tags) {
            match component.try_borrow_mut() {
                Ok(mut component) => {
                    component.render(&context);
                    rendered += 1;
                }
                Err(_) => log::warn!("Skipping render of a component that is already borrowed"),
            }
        }
        Ok(rendered)
    }

    /// Request engine shutdown at the end of the current frame
    pub fn request_exit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
    }

    /// Whether the loop keeps going
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The scene
    pub fn scene(&self) -> &Rc<Scene> {
        &self.scene
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Render through `camera`, or disable rendering with `None`
    pub fn set_active_camera(&mut self, camera: Option<&Rc<RefCell<Camera>>>) {
        self.active_camera = camera.map(Rc::downgrade);
    }

    /// The active camera, if it is still alive
    pub fn active_camera(&self) -> Option<Rc<RefCell<Camera>>> {
        self.active_camera.as_ref().and_then(Weak::upgrade)
    }

    /// Producer handle for work that must run on the main thread
    pub fn task_sender(&self) -> HandoffSender<MainThreadTask> {
        self.tasks.sender()
    }

    /// Get the current frame delta time
    pub fn delta_time(&self) -> f32 {
        self.timer.delta_time()
    }

    /// Frames completed so far
    pub fn frame_count(&self) -> u64 {
        self.timer.frame_count()
    }
}

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Initialization error
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),

    /// Rendering error
    #[error("Rendering error: {0}")]
    Render(String),

    /// Application error
    #[error("Application error: {0}")]
    Application(String),

    /// Scene graph misuse
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
