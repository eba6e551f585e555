//! Per-draw transform uniforms
//!
//! Plain-old-data block matching a std140 layout of five `mat4`s, ready to
//! be copied into a uniform buffer with `bytemuck::bytes_of`.

use bytemuck::{Pod, Zeroable};

use crate::ecs::components::{Camera, Transform};
use crate::foundation::math::{inverse_transpose, Mat4};

/// Transform matrices for one draw, column-major
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TransformUniforms {
    /// Local to world
    pub world: [[f32; 4]; 4],
    /// Local to view
    pub world_view: [[f32; 4]; 4],
    /// Local to clip
    pub world_view_proj: [[f32; 4]; 4],
    /// Normal matrix in world space
    pub inv_transposed_world: [[f32; 4]; 4],
    /// Normal matrix in view space
    pub inv_transposed_world_view: [[f32; 4]; 4],
}

impl TransformUniforms {
    /// Gather the matrices of `transform` as seen by `camera`
    pub fn new(transform: &Transform, camera: &Camera) -> Self {
        let world_view = transform.world_view_matrix(camera);
        Self {
            world: transform.world_matrix().into(),
            world_view: world_view.into(),
            world_view_proj: transform.world_view_proj_matrix(camera).into(),
            inv_transposed_world: transform.inv_transposed_world_matrix().into(),
            inv_transposed_world_view: inverse_transpose(&world_view).into(),
        }
    }

    /// Uniforms for a transform drawn without a camera
    pub fn world_only(transform: &Transform) -> Self {
        let identity: [[f32; 4]; 4] = Mat4::identity().into();
        let world = transform.world_matrix().into();
        Self {
            world,
            world_view: world,
            world_view_proj: world,
            inv_transposed_world: transform.inv_transposed_world_matrix().into(),
            inv_transposed_world_view: identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::ecs::components::CameraSettings;
    use crate::ecs::Scene;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;

    #[test]
    fn test_layout_is_five_mat4() {
        assert_eq!(std::mem::size_of::<TransformUniforms>(), 5 * 64);
        let zeroed = TransformUniforms::zeroed();
        assert_eq!(bytemuck::bytes_of(&zeroed).len(), 320);
    }

    #[test]
    fn test_uniforms_follow_transform_and_camera() {
        let scene = Scene::new(SceneConfig::default());
        let camera = scene
            .create_node()
            .add_component::<Camera>(CameraSettings::default())
            .unwrap();
        camera
            .borrow()
            .transform()
            .unwrap()
            .borrow_mut()
            .set_local_position(Vec3::new(0.0, 0.0, 10.0));

        let object = scene.create_node().add_component::<Transform>(()).unwrap();
        object.borrow_mut().set_local_position(Vec3::new(2.0, 0.0, 0.0));

        let uniforms = TransformUniforms::new(&object.borrow(), &camera.borrow());
        // column 3 holds the translation
        assert_eq!(uniforms.world[3][..3], [2.0, 0.0, 0.0]);
        let [x, y, z, _] = uniforms.world_view[3];
        assert_relative_eq!(Vec3::new(x, y, z), Vec3::new(2.0, 0.0, -10.0), epsilon = 1e-5);
        assert_eq!(uniforms.inv_transposed_world[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
