//! Orbit demo application
//!
//! Headless run of a small solar system: a sun, a planet orbiting it and a
//! moon orbiting the planet, watched by a camera parented to the planet.
//! Every frame the orbits spin their transforms and the probes report the
//! world positions the renderer would receive.
//!
//! Pass a `.toml` or `.ron` engine config as the first argument to override
//! the defaults.

use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;
use rust_scene::prelude::*;
use rust_scene::foundation::math::constants::PI;
use thiserror::Error;

const FRAMES: u64 = 240;
const PROBE_TAG: u32 = 0b10;

#[derive(Error, Debug)]
enum DemoError {
    #[error("max_frames must be at least 1 for a headless run")]
    NoFrames,
}

/// Spins its node's transform around the local Y axis
struct Orbit {
    base: ComponentBase,
    radians_per_second: f32,
}

impl Component for Orbit {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn update(&mut self, delta_time: f32) {
        if let Some(transform) = self.node().transform() {
            transform
                .borrow_mut()
                .rotate_by_axis_angle(Vec3::y(), self.radians_per_second * delta_time, TransformSpace::Local);
        }
    }
}

impl Creatable for Orbit {
    type Args = f32;

    fn create(node: Node, radians_per_second: f32) -> Result<Self, SceneError> {
        Ok(Self {
            base: ComponentBase::new(node),
            radians_per_second,
        })
    }
}

/// Logs where a body ends up in world and view space
struct Probe {
    base: ComponentBase,
    label: &'static str,
    every: u64,
    frame: u64,
}

impl Component for Probe {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase {
        &mut self.base
    }

    fn init(&mut self) {
        self.set_tag(PROBE_TAG);
    }

    fn render(&mut self, context: &RenderContext) {
        self.frame += 1;
        if self.frame % self.every != 0 {
            return;
        }
        let Some(transform) = self.node().transform() else {
            return;
        };
        let transform = transform.borrow();
        let uniforms = TransformUniforms::new(&transform, &context.camera().borrow());
        let [x, y, z, _] = uniforms.world_view[3];
        log::info!(
            "{:>6} frame {:>4}: world {:?}, view ({x:.2}, {y:.2}, {z:.2})",
            self.label,
            self.frame,
            transform.world_position().as_slice(),
        );
    }
}

impl Creatable for Probe {
    type Args = (&'static str, u64);

    fn create(node: Node, (label, every): Self::Args) -> Result<Self, SceneError> {
        Ok(Self {
            base: ComponentBase::new(node),
            label,
            every: every.max(1),
            frame: 0,
        })
    }
}

struct OrbitApp {
    probe_interval: u64,
    camera: Option<Rc<RefCell<Camera>>>,
}

impl OrbitApp {
    fn body(
        &self,
        scene: &Scene,
        label: &'static str,
        parent: Option<&TransformRef>,
        offset: Vec3,
        spin: f32,
    ) -> Result<TransformRef, AppError> {
        let node = scene.create_node();
        let transform = node.add_component::<Transform>(())?;
        {
            let mut transform = transform.borrow_mut();
            transform.set_parent(parent)?;
            transform.set_local_position(offset);
        }
        node.add_component::<Orbit>(spin)?;
        node.add_component::<Probe>((label, self.probe_interval))?;
        Ok(transform)
    }
}

impl Application for OrbitApp {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        let mut rng = rand::thread_rng();
        let scene = Rc::clone(engine.scene());

        let sun = self.body(&scene, "sun", None, Vec3::zeros(), rng.gen_range(0.1..0.3))?;
        let planet = self.body(&scene, "planet", Some(&sun), Vec3::new(10.0, 0.0, 0.0), rng.gen_range(0.5..1.5))?;
        self.body(&scene, "moon", Some(&planet), Vec3::new(2.0, 0.0, 0.0), rng.gen_range(2.0..4.0))?;

        let camera = scene.create_node().add_component::<Camera>(CameraSettings {
            render_tags: PROBE_TAG,
            ..CameraSettings::default()
        })?;
        if let Some(rig) = camera.borrow().transform() {
            let mut rig = rig.borrow_mut();
            rig.set_parent(Some(&planet))?;
            rig.set_local_position(Vec3::new(0.0, 6.0, 8.0));
            rig.look_at(Vec3::zeros(), Vec3::y());
        }
        engine.set_active_camera(Some(&camera));
        self.camera = Some(camera);

        log::info!("Scene ready: {:?}", engine.scene());
        Ok(())
    }

    fn update(&mut self, engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
        // tilt the camera once half a turn of frames has passed
        if engine.frame_count() == FRAMES / 2 {
            if let Some(rig) = self.camera.as_ref().and_then(|camera| camera.borrow().transform()) {
                rig.borrow_mut()
                    .rotate_by_axis_angle(Vec3::x(), -PI / 12.0, TransformSpace::Local);
            }
        }
        Ok(())
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        log::info!("Ran {} frames", engine.frame_count());
        self.camera = None;
    }
}

/// Loaded or default config with the demo's headless frame settings
fn demo_config(path: Option<&str>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    config.fixed_delta_time.get_or_insert(1.0 / 60.0);
    if *config.max_frames.get_or_insert(FRAMES) == 0 {
        return Err(DemoError::NoFrames.into());
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = demo_config(std::env::args().nth(1).as_deref())?;
    // RUST_LOG still wins over the configured filter
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_filter.as_str())).init();

    let mut app = OrbitApp {
        probe_interval: 60,
        camera: None,
    };
    Engine::run(config, &mut app)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("orbit_demo_{name}_{}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_loaded_log_filter_is_kept() {
        let path = write_config("filter", "log_filter = \"scene_app=debug\"\n");
        let config = demo_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.log_filter, "scene_app=debug");
        assert_eq!(config.max_frames, Some(FRAMES));
        assert!(config.fixed_delta_time.is_some());
    }

    #[test]
    fn test_zero_frames_is_rejected() {
        let path = write_config("zero", "max_frames = 0\n");
        let result = demo_config(Some(&path));
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }
}
