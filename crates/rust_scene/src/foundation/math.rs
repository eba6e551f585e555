//! Math utilities and types
//!
//! Provides the fundamental math types used by the transform hierarchy and
//! camera caches. Matrices are column-vector convention (`M * v`), so a
//! child's world matrix is `parent_world * child_local`.

pub use nalgebra::{
    Vector3, Vector4,
    Matrix3, Matrix4,
    Quaternion,
    Rotation3,
    Unit,
};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Compose a local matrix in translation * rotation * scale order
pub fn compose_trs(position: &Vec3, rotation: &Quat, scale: &Vec3) -> Mat4 {
    Mat4::new_translation(position)
        * rotation.to_homogeneous()
        * Mat4::new_nonuniform_scaling(scale)
}

/// Split an affine matrix back into position, rotation and scale
///
/// Shear is lost. A zero scale axis yields an identity rotation for that
/// matrix since no orientation can be recovered from it. A mirrored basis
/// (negative determinant) is reported as a negative X scale so the
/// remaining rotation is proper.
pub fn decompose_trs(matrix: &Mat4) -> (Vec3, Quat, Vec3) {
    let position = Vec3::new(matrix.m14, matrix.m24, matrix.m34);

    let mut scale_x = Vec3::new(matrix.m11, matrix.m21, matrix.m31).magnitude();
    let scale_y = Vec3::new(matrix.m12, matrix.m22, matrix.m32).magnitude();
    let scale_z = Vec3::new(matrix.m13, matrix.m23, matrix.m33).magnitude();

    if scale_x <= f32::EPSILON || scale_y <= f32::EPSILON || scale_z <= f32::EPSILON {
        return (position, Quat::identity(), Vec3::new(scale_x, scale_y, scale_z));
    }

    if matrix.fixed_view::<3, 3>(0, 0).determinant() < 0.0 {
        scale_x = -scale_x;
    }
    let scale = Vec3::new(scale_x, scale_y, scale_z);

    let rotation_matrix = Mat3::new(
        matrix.m11 / scale_x, matrix.m12 / scale_y, matrix.m13 / scale_z,
        matrix.m21 / scale_x, matrix.m22 / scale_y, matrix.m23 / scale_z,
        matrix.m31 / scale_x, matrix.m32 / scale_y, matrix.m33 / scale_z,
    );
    let rotation = Quat::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));

    (position, rotation, scale)
}

/// Inverse-transpose of a matrix, used to transform normals
///
/// A singular matrix (e.g. zero scale) has no inverse; identity is returned
/// so downstream shading stays finite.
pub fn inverse_transpose(matrix: &Mat4) -> Mat4 {
    match matrix.try_inverse() {
        Some(inverse) => inverse.transpose(),
        None => {
            log::warn!("Singular matrix has no inverse-transpose, using identity");
            Mat4::identity()
        }
    }
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Pi / 2
    pub const HALF_PI: f32 = PI * 0.5;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;

    /// Radians to degrees conversion factor
    pub const RAD_TO_DEG: f32 = 180.0 / PI;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }

    /// Convert radians to degrees
    pub fn rad_to_deg(radians: f32) -> f32 {
        radians * constants::RAD_TO_DEG
    }
}

/// Extension trait for Mat4 with additional convenience methods
pub trait Mat4Ext {
    /// Create a right-handed perspective projection (OpenGL clip conventions)
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Create a right-handed orthographic projection centred on the view axis
    fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Mat4;

    /// Create a right-handed look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Translation column of an affine matrix
    fn translation(&self) -> Vec3;
}

impl Mat4Ext for Mat4 {
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::new_perspective(aspect, fov_y, near, far)
    }

    fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Mat4 {
        let half_w = width * 0.5;
        let half_h = height * 0.5;
        Mat4::new_orthographic(-half_w, half_w, -half_h, half_h, near, far)
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let translation = Mat4::new(
            1.0, 0.0, 0.0, -eye.x,
            0.0, 1.0, 0.0, -eye.y,
            0.0, 0.0, 1.0, -eye.z,
            0.0, 0.0, 0.0, 1.0,
        );

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }

    fn translation(&self) -> Vec3 {
        Vec3::new(self.m14, self.m24, self.m34)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_compose_then_decompose_recovers_fields() {
        let position = Vec3::new(1.0, -2.0, 3.5);
        let rotation = Quat::from_axis_angle(&Vec3::y_axis(), 0.7);
        let scale = Vec3::new(2.0, 0.5, 1.5);

        let matrix = compose_trs(&position, &rotation, &scale);
        let (p, r, s) = decompose_trs(&matrix);

        assert_relative_eq!(p, position, epsilon = 1e-5);
        assert_relative_eq!(s, scale, epsilon = 1e-5);
        assert!(r.angle_to(&rotation) < 1e-4);
    }

    #[test]
    fn test_decompose_mirrored_matrix_keeps_proper_rotation() {
        let position = Vec3::new(0.0, 1.0, -2.0);
        let rotation = Quat::from_axis_angle(&Vec3::y_axis(), 0.3);
        let scale = Vec3::new(-1.0, 2.0, 1.0);
        let matrix = compose_trs(&position, &rotation, &scale);

        let (p, r, s) = decompose_trs(&matrix);

        assert_relative_eq!(r.to_rotation_matrix().matrix().determinant(), 1.0, epsilon = 1e-5);
        assert!(s.x < 0.0);
        assert_relative_eq!(compose_trs(&p, &r, &s), matrix, epsilon = 1e-5);
    }

    #[test]
    fn test_trs_order_scales_before_translating() {
        let matrix = compose_trs(
            &Vec3::new(10.0, 0.0, 0.0),
            &Quat::identity(),
            &Vec3::new(2.0, 2.0, 2.0),
        );
        let point = matrix.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(point, Point3::new(12.0, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_transpose_of_singular_matrix_is_identity() {
        let singular = Mat4::new_nonuniform_scaling(&Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(inverse_transpose(&singular), Mat4::identity());
    }

    #[test]
    fn test_look_at_moves_eye_to_origin() {
        let eye = Vec3::new(0.0, 0.0, 5.0);
        let view = Mat4::look_at(eye, Vec3::zeros(), Vec3::y());
        let origin = view.transform_point(&Point3::from(eye));
        assert_relative_eq!(origin, Point3::origin(), epsilon = 1e-6);

        let target = view.transform_point(&Point3::origin());
        assert_relative_eq!(target, Point3::new(0.0, 0.0, -5.0), epsilon = 1e-6);
    }
}
