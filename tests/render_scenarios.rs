//! Closed-form render scenarios and backward-call contracts

use approx::assert_relative_eq;
use drk_splatting::{Camera, ImageGrads, RasterError, RasterSettings, Rasterizer, Splat};
use nalgebra::{Matrix4, Vector3};

const SIZE: u32 = 16;

/// focal = 16 px; the principal point sits between pixels 7 and 8.
fn camera(background: Vector3<f32>) -> Camera {
    Camera::new(Matrix4::identity(), 0.5, 0.5, SIZE, SIZE).with_background(background)
}

/// A splat whose projected mean lands exactly on pixel (8, 8).
fn centered(z: f32, scale: f32, opacity: f32, rgb: Vector3<f32>) -> Splat {
    let shift = 0.5 * z / 16.0;
    Splat::gaussian(Vector3::new(shift, shift, z), scale, opacity, rgb)
}

#[test]
fn test_single_splat_center_pixel() {
    let bg = Vector3::new(0.1, 0.2, 0.3);
    let cam = camera(bg);
    let rgb = Vector3::new(0.9, 0.4, 0.2);
    let splats = vec![centered(3.0, 0.3, 0.7, rgb)];

    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&splats, &cam).unwrap();
    assert_eq!(out.num_visible, 1);

    let i = out.image.index(8, 8);
    assert_relative_eq!(out.image.alpha[i], 0.7, epsilon = 1e-5);
    let expected = rgb * 0.7 + bg * 0.3;
    assert_relative_eq!(out.image.color[i], expected, epsilon = 1e-5);
    assert_relative_eq!(out.image.depth[i], 0.7 * 3.0, epsilon = 1e-4);
    // Unrotated local z faces away from the camera, so the normal flips.
    assert_relative_eq!(out.image.normal[i], Vector3::new(0.0, 0.0, -0.7), epsilon = 1e-5);

    // Symmetric falloff around the center.
    let left = out.image.alpha[out.image.index(6, 8)];
    let right = out.image.alpha[out.image.index(10, 8)];
    assert!(left < 0.7 && left > 0.0);
    assert_relative_eq!(left, right, epsilon = 1e-4);
}

#[test]
fn test_two_splats_composite_front_to_back() {
    let bg = Vector3::new(0.0, 0.5, 0.0);
    let cam = camera(bg);
    let front_rgb = Vector3::new(1.0, 0.0, 0.0);
    let back_rgb = Vector3::new(0.0, 0.0, 1.0);

    // Submission order is back first; sorting must put the near one in front.
    let splats = vec![
        centered(4.0, 0.4, 0.6, back_rgb),
        centered(2.0, 0.2, 0.5, front_rgb),
    ];
    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&splats, &cam).unwrap();

    let trace = out.trace_pixel(8, 8);
    assert_eq!(trace.iter().map(|c| c.primitive).collect::<Vec<_>>(), vec![1, 0]);

    let (a1, a2) = (0.5f32, 0.6f32);
    let i = out.image.index(8, 8);
    let color = front_rgb * a1 + back_rgb * ((1.0 - a1) * a2) + bg * ((1.0 - a1) * (1.0 - a2));
    assert_relative_eq!(out.image.color[i], color, epsilon = 1e-5);
    assert_relative_eq!(out.image.alpha[i], 1.0 - (1.0 - a1) * (1.0 - a2), epsilon = 1e-5);
    assert_relative_eq!(out.image.depth[i], a1 * 2.0 + (1.0 - a1) * a2 * 4.0, epsilon = 1e-4);
    assert_relative_eq!(
        out.buffers.image.final_transmittance[i],
        (1.0 - a1) * (1.0 - a2),
        epsilon = 1e-5
    );
}

#[test]
fn test_opaque_stack_terminates_early() {
    let cam = camera(Vector3::zeros());
    let splats: Vec<Splat> = (0..6)
        .map(|k| centered(2.0 + k as f32, 0.4, 0.995, Vector3::new(1.0, 1.0, 1.0)))
        .collect();
    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&splats, &cam).unwrap();

    // Alpha clamps to 0.99, and a second layer would push T just under 1e-4.
    let trace = out.trace_pixel(8, 8);
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].primitive, 0);
    let i = out.image.index(8, 8);
    assert!(out.buffers.image.final_transmittance[i] >= 1e-4);
}

#[test]
fn test_empty_scene_renders_background() {
    let bg = Vector3::new(0.3, 0.6, 0.9);
    let cam = camera(bg);
    let mut rasterizer = Rasterizer::new(RasterSettings {
        debug: true,
        ..Default::default()
    });
    let out = rasterizer.forward(&[], &cam).unwrap();

    assert_eq!(out.num_rendered, 0);
    assert_eq!(out.num_visible, 0);
    assert!(out.image.color.iter().all(|c| *c == bg));
    assert!(out.image.alpha.iter().all(|a| *a == 0.0));
    assert!(out.image.depth.iter().all(|d| *d == 0.0));
    assert!(out.buffers.image.final_transmittance.iter().all(|t| *t == 1.0));

    let mut d_image = ImageGrads::zeros(SIZE, SIZE);
    d_image.color.fill(Vector3::new(1.0, 1.0, 1.0));
    let grads = rasterizer
        .backward(&[], &cam, 0, &out.buffers, &out.image, &d_image)
        .unwrap();
    assert!(grads.is_empty());
    assert_eq!(grads.scale_modifier, 0.0);
}

#[test]
fn test_opacity_gradient_on_isolated_splat() {
    // dC/dα at the center pixel is (c - bg) when α = opacity · 1.
    let bg = Vector3::new(0.2, 0.2, 0.2);
    let cam = camera(bg);
    let rgb = Vector3::new(0.8, 0.5, 0.3);
    let splats = vec![centered(3.0, 0.3, 0.4, rgb)];

    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&splats, &cam).unwrap();

    let mut d_image = ImageGrads::zeros(SIZE, SIZE);
    d_image.color[out.image.index(8, 8)] = Vector3::new(1.0, 0.0, 0.0);
    let grads = rasterizer
        .backward(&splats, &cam, out.num_rendered, &out.buffers, &out.image, &d_image)
        .unwrap();
    assert_relative_eq!(grads.opacity[0], rgb.x - bg.x, epsilon = 1e-4);
    // The center sits on the mean, where the footprint is flat.
    assert!(grads.mean2d[0].norm() < 1e-3);
}

#[test]
fn test_isolated_splat_leaves_background_and_other_splats_untouched() {
    // 48×16: three tiles in a row, focal 16 px, principal point (23.5, 7.5).
    let bg = Vector3::new(0.25, 0.5, 0.75);
    let cam = Camera::new(Matrix4::identity(), 1.5, 0.5, 48, SIZE).with_background(bg);
    let at_pixel = |px: f32, rgb: Vector3<f32>| {
        let z = 3.0;
        let position = Vector3::new((px - 23.5) * z / 16.0, 0.5 * z / 16.0, z);
        Splat::gaussian(position, 0.3, 0.7, rgb)
    };
    let splats = vec![
        at_pixel(8.0, Vector3::new(0.9, 0.1, 0.1)),
        at_pixel(40.0, Vector3::new(0.1, 0.9, 0.1)),
    ];

    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&splats, &cam).unwrap();
    let records = &out.buffers.geometry.records;
    assert_eq!((records[0].rect.min_x, records[0].rect.max_x), (0, 1));
    assert_eq!((records[1].rect.min_x, records[1].rect.max_x), (2, 3));

    // Middle tile has no entries; the corner of the first tile is out of reach.
    for (x, y) in [(24, 8), (0, 15)] {
        let i = out.image.index(x, y);
        assert_eq!(out.image.color[i], bg, "pixel ({x}, {y})");
        assert_eq!(out.image.alpha[i], 0.0);
        assert_eq!(out.image.depth[i], 0.0);
    }
    assert_relative_eq!(out.image.alpha[out.image.index(8, 8)], 0.7, epsilon = 1e-5);

    let mut d_image = ImageGrads::zeros(48, SIZE);
    d_image.color[out.image.index(8, 8)] = Vector3::new(1.0, 1.0, 1.0);
    let grads = rasterizer
        .backward(&splats, &cam, out.num_rendered, &out.buffers, &out.image, &d_image)
        .unwrap();
    assert!(grads.max_abs(0) > 0.0);
    assert_eq!(grads.max_abs(1), 0.0);
}

#[test]
fn test_backward_rejects_mismatched_buffers() {
    let cam = camera(Vector3::zeros());
    let splats = vec![
        centered(3.0, 0.3, 0.7, Vector3::new(1.0, 0.0, 0.0)),
        centered(5.0, 0.5, 0.4, Vector3::new(0.0, 1.0, 0.0)),
    ];
    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let first = rasterizer.forward(&splats, &cam).unwrap();
    let second = rasterizer.forward(&splats, &cam).unwrap();
    let d_image = ImageGrads::zeros(SIZE, SIZE);

    // Buffers stitched from two passes.
    let mut mixed = first.buffers.clone();
    mixed.image = second.buffers.image.clone();
    let err = rasterizer
        .backward(&splats, &cam, first.num_rendered, &mixed, &first.image, &d_image)
        .unwrap_err();
    assert!(matches!(err, RasterError::InvalidBufferState(_)), "{err}");

    // Wrong entry count.
    let err = rasterizer
        .backward(&splats, &cam, first.num_rendered + 1, &first.buffers, &first.image, &d_image)
        .unwrap_err();
    assert!(matches!(err, RasterError::InvalidBufferState(_)), "{err}");

    // Wrong splat count.
    let err = rasterizer
        .backward(&splats[..1], &cam, first.num_rendered, &first.buffers, &first.image, &d_image)
        .unwrap_err();
    assert!(matches!(err, RasterError::InvalidBufferState(_)), "{err}");

    // Gradients for a different image size.
    let small = ImageGrads::zeros(8, 8);
    let err = rasterizer
        .backward(&splats, &cam, first.num_rendered, &first.buffers, &first.image, &small)
        .unwrap_err();
    assert!(matches!(err, RasterError::InvalidBufferState(_)), "{err}");

    // A different camera resolution.
    let wide = Camera::new(Matrix4::identity(), 0.5, 0.5, 32, SIZE);
    let err = rasterizer
        .backward(&splats, &wide, first.num_rendered, &first.buffers, &first.image, &d_image)
        .unwrap_err();
    assert!(matches!(err, RasterError::InvalidBufferState(_)), "{err}");

    // The matching set still works.
    assert!(rasterizer
        .backward(&splats, &cam, first.num_rendered, &first.buffers, &first.image, &d_image)
        .is_ok());
}

#[test]
fn test_backward_rejects_different_sh_degree() {
    let cam = camera(Vector3::zeros());
    let splats = vec![centered(3.0, 0.3, 0.7, Vector3::new(1.0, 0.0, 0.0))];
    let mut forward = Rasterizer::new(RasterSettings::default());
    let out = forward.forward(&splats, &cam).unwrap();
    assert_eq!(out.buffers.geometry.sh_degree, 3);
    let d_image = ImageGrads::zeros(SIZE, SIZE);

    let degree_one = Rasterizer::new(RasterSettings {
        sh_degree: 1,
        ..Default::default()
    });
    let err = degree_one
        .backward(&splats, &cam, out.num_rendered, &out.buffers, &out.image, &d_image)
        .unwrap_err();
    assert!(matches!(err, RasterError::InvalidBufferState(_)), "{err}");
}

#[test]
fn test_precomputed_color_is_composited_as_given() {
    let cam = camera(Vector3::zeros());
    let mut splat = centered(3.0, 0.3, 0.7, Vector3::new(1.0, 0.0, 0.0));
    splat.color = Some(Vector3::new(0.1, 0.6, 0.3));
    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&[splat], &cam).unwrap();

    let i = out.image.index(8, 8);
    assert_relative_eq!(out.image.alpha[i], 0.7, epsilon = 1e-5);
    assert_relative_eq!(out.image.color[i], Vector3::new(0.1, 0.6, 0.3) * 0.7, epsilon = 1e-5);
}

#[test]
fn test_settings_from_json_file() {
    let dir = std::env::temp_dir().join(format!("drk-settings-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("raster.json");
    std::fs::write(&path, r#"{ "sh_degree": 1, "tile_culling": true }"#).unwrap();

    let settings = RasterSettings::from_json_file(&path).unwrap();
    assert_eq!(settings.sh_degree, 1);
    assert!(settings.tile_culling);
    assert!(!settings.cache_sort);

    std::fs::write(&path, r#"{ "sh_degree": 9 }"#).unwrap();
    assert!(matches!(
        RasterSettings::from_json_file(&path),
        Err(RasterError::InvalidInput(_))
    ));
    std::fs::remove_dir_all(&dir).ok();
}
