//! Camera model for the rasterizer.
//!
//! The camera is given the way a training loop usually holds it: a
//! world-to-camera view matrix, a full world-to-clip projection matrix, and
//! the tangents of the half field of view. Camera space looks down +z with
//! +y pointing down the image.

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::math::transform_point_affine;
use crate::render::TileGrid;

/// Default near clip distance used by [`Camera::new`].
pub const DEFAULT_ZNEAR: f32 = 0.01;

/// Default far clip distance used by [`Camera::new`].
pub const DEFAULT_ZFAR: f32 = 100.0;

/// A pinhole camera plus the per-pass rendering constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// World → camera transform
    pub view_matrix: Matrix4<f32>,

    /// World → clip transform (projection · view)
    pub proj_matrix: Matrix4<f32>,

    /// tan(fov_x / 2)
    pub tan_fovx: f32,

    /// tan(fov_y / 2)
    pub tan_fovy: f32,

    /// Image width (pixels)
    pub width: u32,

    /// Image height (pixels)
    pub height: u32,

    /// Camera center in world space
    pub campos: Vector3<f32>,

    /// Color behind all splats
    pub background: Vector3<f32>,

    /// Uniform multiplier applied to every splat scale
    pub scale_modifier: f32,
}

impl Camera {
    /// Build a camera from a rigid view matrix and field of view.
    ///
    /// The projection uses [`DEFAULT_ZNEAR`]/[`DEFAULT_ZFAR`]; the camera
    /// center is recovered from the view matrix. Background is black and the
    /// scale modifier is 1.
    pub fn new(
        view_matrix: Matrix4<f32>,
        tan_fovx: f32,
        tan_fovy: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let projection = perspective_matrix(tan_fovx, tan_fovy, DEFAULT_ZNEAR, DEFAULT_ZFAR);
        let rotation: Matrix3<f32> = view_matrix.fixed_view::<3, 3>(0, 0).into_owned();
        let translation: Vector3<f32> = view_matrix.fixed_view::<3, 1>(0, 3).into_owned();

        Self {
            view_matrix,
            proj_matrix: projection * view_matrix,
            tan_fovx,
            tan_fovy,
            width,
            height,
            // Camera center in world: C = -R^T * t
            campos: -rotation.transpose() * translation,
            background: Vector3::zeros(),
            scale_modifier: 1.0,
        }
    }

    /// Camera at `eye` looking at `target`.
    ///
    /// `up` is the world direction that should appear at the top of the image.
    pub fn look_at(
        eye: &Vector3<f32>,
        target: &Vector3<f32>,
        up: &Vector3<f32>,
        tan_fovx: f32,
        tan_fovy: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let forward = (target - eye).normalize();
        let right = forward.cross(up).normalize();
        let down = forward.cross(&right);

        let rotation = Matrix3::from_rows(&[right.transpose(), down.transpose(), forward.transpose()]);
        let translation = -rotation * eye;

        let mut view = Matrix4::identity();
        view.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        view.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        Self::new(view, tan_fovx, tan_fovy, width, height)
    }

    /// Set the background color.
    pub fn with_background(mut self, background: Vector3<f32>) -> Self {
        self.background = background;
        self
    }

    /// Set the uniform scale modifier.
    pub fn with_scale_modifier(mut self, scale_modifier: f32) -> Self {
        self.scale_modifier = scale_modifier;
        self
    }

    /// Focal length in X (pixels).
    pub fn focal_x(&self) -> f32 {
        self.width as f32 / (2.0 * self.tan_fovx)
    }

    /// Focal length in Y (pixels).
    pub fn focal_y(&self) -> f32 {
        self.height as f32 / (2.0 * self.tan_fovy)
    }

    /// Upper-left 3×3 block of the view matrix (world → camera rotation).
    pub fn view_rotation(&self) -> Matrix3<f32> {
        self.view_matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Transform a point from world coordinates to camera coordinates.
    pub fn world_to_camera(&self, point_world: &Vector3<f32>) -> Vector3<f32> {
        transform_point_affine(&self.view_matrix, point_world)
    }

    /// Tile grid covering the image.
    pub fn tile_grid(&self) -> TileGrid {
        TileGrid::for_image(self.width, self.height)
    }

    /// Number of pixels in the image.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Perspective projection for a +z-forward camera.
///
/// Maps camera-space x/z to NDC by `1/tan_fovx` and writes z into w.
pub fn perspective_matrix(tan_fovx: f32, tan_fovy: f32, znear: f32, zfar: f32) -> Matrix4<f32> {
    let depth = zfar - znear;
    Matrix4::new(
        1.0 / tan_fovx,
        0.0,
        0.0,
        0.0,
        0.0,
        1.0 / tan_fovy,
        0.0,
        0.0,
        0.0,
        0.0,
        zfar / depth,
        -(zfar * znear) / depth,
        0.0,
        0.0,
        1.0,
        0.0,
    )
}
