//! Pipeline invariants on randomized scenes
//!
//! These hold for any input: every visible splat lands in exactly the tiles of
//! its rect, sorted entries are tile-major and depth-minor, tile ranges
//! partition the entry array, transmittance never grows along a pixel, and
//! culled splats neither affect the image nor receive gradients.

use drk_splatting::render::{CullReason, TileEntry, Visibility};
use drk_splatting::{Camera, ImageGrads, RasterError, RasterSettings, Rasterizer, Splat};
use nalgebra::{Matrix4, Vector3, Vector4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn camera() -> Camera {
    Camera::new(Matrix4::identity(), 0.6, 0.45, 80, 60).with_background(Vector3::new(0.1, 0.1, 0.2))
}

fn random_splat(rng: &mut StdRng) -> Splat {
    let z = rng.gen_range(1.0..8.0);
    let position = Vector3::new(
        rng.gen_range(-0.7..0.7) * z,
        rng.gen_range(-0.5..0.5) * z,
        z,
    );
    let rgb = Vector3::new(rng.gen(), rng.gen(), rng.gen());
    let mut s = Splat::gaussian(position, 0.1, rng.gen_range(0.1..0.95), rgb);
    s.scale = Vector3::new(
        rng.gen_range(0.02..0.4),
        rng.gen_range(0.02..0.4),
        rng.gen_range(0.01..0.1),
    );
    s.theta = rng.gen_range(-3.0..3.0);
    s.rotation = Vector4::new(
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
        rng.gen_range(-1.0..1.0),
    );
    s.l1l2_rate = rng.gen_range(0.0..1.0);
    s.acutance = rng.gen_range(0.0..3.0);
    s
}

fn random_scene(seed: u64, n: usize) -> Vec<Splat> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| random_splat(&mut rng)).collect()
}

fn debug_settings() -> RasterSettings {
    RasterSettings {
        debug: true,
        ..Default::default()
    }
}

#[test]
fn test_debug_checks_pass_on_random_scenes() {
    for seed in 0..4 {
        let splats = random_scene(seed, 300);
        let mut rasterizer = Rasterizer::new(debug_settings());
        let out = rasterizer.forward(&splats, &camera());
        assert!(out.is_ok(), "seed {seed}: {:?}", out.err());
    }
}

#[test]
fn test_every_visible_splat_covers_its_rect() {
    let splats = random_scene(11, 250);
    let cam = camera();
    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&splats, &cam).unwrap();

    let records = &out.buffers.geometry.records;
    let grid = &out.buffers.geometry.grid;
    let entries = &out.buffers.binning.entries;

    let expected: u64 = records.iter().map(|r| r.tiles_touched as u64).sum();
    assert_eq!(out.num_rendered as u64, expected);

    for (i, rec) in records.iter().enumerate() {
        let mut tiles: Vec<u64> = entries
            .iter()
            .filter(|e| e.primitive as usize == i)
            .map(TileEntry::tile)
            .collect();
        tiles.sort_unstable();
        let mut want: Vec<u64> = rec.rect.tiles().map(|(tx, ty)| grid.tile_id(tx, ty)).collect();
        want.sort_unstable();
        if rec.is_visible() {
            assert_eq!(tiles, want, "splat {i}");
        } else {
            assert!(tiles.is_empty(), "culled splat {i} has entries");
        }
    }
}

#[test]
fn test_entries_sorted_and_ranges_partition() {
    let splats = random_scene(5, 400);
    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&splats, &camera()).unwrap();

    let binning = &out.buffers.binning;
    assert!(binning.entries.windows(2).all(|w| w[0].key <= w[1].key));

    let mut covered = 0;
    let mut prev_end = 0;
    for (tile, range) in binning.ranges.iter().enumerate() {
        if range.is_empty() {
            continue;
        }
        assert_eq!(range.start as usize, prev_end, "tile {tile} leaves a gap");
        for e in &binning.entries[range.as_range()] {
            assert_eq!(e.tile(), tile as u64);
        }
        let depths: Vec<f32> = binning.entries[range.as_range()].iter().map(TileEntry::depth).collect();
        assert!(depths.windows(2).all(|w| w[0] <= w[1]), "tile {tile} not depth ordered");
        covered += range.len();
        prev_end = range.end as usize;
    }
    assert_eq!(covered, out.num_rendered);
}

#[test]
fn test_sort_cache_does_not_change_output() {
    let splats = random_scene(21, 300);
    let cam = camera();

    let mut plain = Rasterizer::new(RasterSettings::default());
    let reference = plain.forward(&splats, &cam).unwrap();
    assert!(plain.sort_cache().is_none());

    let mut cached = Rasterizer::new(RasterSettings {
        cache_sort: true,
        ..Default::default()
    });
    let first = cached.forward(&splats, &cam).unwrap();
    let second = cached.forward(&splats, &cam).unwrap();

    assert_eq!(first.image, reference.image);
    assert_eq!(second.image, reference.image);
    assert_eq!(second.buffers.binning.entries, reference.buffers.binning.entries);

    let stats = cached.sort_cache().unwrap();
    assert_eq!(stats.misses(), 1);
    assert_eq!(stats.hits(), 1);

    // A changed scene invalidates the cached layout.
    let moved = random_scene(22, 300);
    let third = cached.forward(&moved, &cam).unwrap();
    let fresh = plain.forward(&moved, &cam).unwrap();
    assert_eq!(third.image, fresh.image);
    assert_eq!(cached.sort_cache().unwrap().misses(), 2);
}

#[test]
fn test_transmittance_is_monotone_and_alpha_bounded() {
    let splats = random_scene(8, 300);
    let cam = camera();
    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let out = rasterizer.forward(&splats, &cam).unwrap();

    for &a in &out.image.alpha {
        assert!((0.0..=1.0).contains(&a), "alpha {a}");
    }
    for y in (0..cam.height).step_by(7) {
        for x in (0..cam.width).step_by(5) {
            let trace = out.trace_pixel(x, y);
            let mut t = 1.0f32;
            for c in &trace {
                assert!(c.transmittance <= t + 1e-7);
                assert!(c.alpha > 0.0 && c.alpha <= 0.99);
                t = c.transmittance * (1.0 - c.alpha);
            }
            let i = out.image.index(x, y);
            assert!((out.buffers.image.final_transmittance[i] - t).abs() < 1e-6);
            assert!((out.image.alpha[i] - (1.0 - t)).abs() < 1e-5);
        }
    }
}

#[test]
fn test_tile_culling_is_invisible_in_the_image() {
    let splats = random_scene(13, 400);
    let cam = camera();
    let reference = Rasterizer::new(RasterSettings::default())
        .forward(&splats, &cam)
        .unwrap();
    let culled = Rasterizer::new(RasterSettings {
        tile_culling: true,
        ..Default::default()
    })
    .forward(&splats, &cam)
    .unwrap();

    assert_eq!(culled.image, reference.image);
    let live = culled.buffers.binning.live.as_ref().unwrap();
    assert_eq!(live.len(), culled.num_rendered);
    assert!(reference.buffers.binning.live.is_none());
}

#[test]
fn test_tile_culling_keeps_threshold_opacity_splat() {
    // 33×33 puts the principal point on pixel (16, 16).
    let cam = Camera::new(Matrix4::identity(), 0.5, 0.5, 33, 33);
    let splats = vec![Splat::gaussian(
        Vector3::new(0.0, 0.0, 3.0),
        0.2,
        1.0 / 255.0,
        Vector3::new(1.0, 1.0, 1.0),
    )];

    let plain = Rasterizer::new(RasterSettings::default())
        .forward(&splats, &cam)
        .unwrap();
    let culled = Rasterizer::new(RasterSettings {
        tile_culling: true,
        ..Default::default()
    })
    .forward(&splats, &cam)
    .unwrap();

    let center = plain.image.index(16, 16);
    assert!(plain.image.alpha[center] > 0.0);
    assert_eq!(culled.image, plain.image);
}

#[test]
fn test_culled_splats_do_not_affect_image_or_receive_gradients() {
    let cam = camera();
    let base = random_scene(3, 120);

    let mut off_screen = Splat::gaussian(Vector3::new(500.0, 0.0, 4.0), 0.1, 0.9, Vector3::new(1.0, 0.0, 0.0));
    off_screen.scale = Vector3::new(0.1, 0.1, 0.1);
    let behind = Splat::gaussian(Vector3::new(0.0, 0.0, -2.0), 0.3, 0.9, Vector3::new(0.0, 1.0, 0.0));
    let flat = Splat::gaussian(Vector3::new(0.0, 0.0, 3.0), 0.0, 0.9, Vector3::new(0.0, 0.0, 1.0));

    let mut extended = base.clone();
    extended.extend([off_screen, behind, flat]);

    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let reference = rasterizer.forward(&base, &cam).unwrap();
    let out = rasterizer.forward(&extended, &cam).unwrap();
    assert_eq!(out.image, reference.image);

    let n = base.len();
    let records = &out.buffers.geometry.records;
    assert_eq!(records[n].visibility, Visibility::Culled(CullReason::OutOfFrustum));
    assert_eq!(records[n + 1].visibility, Visibility::Culled(CullReason::NearPlane));
    assert_eq!(records[n + 2].visibility, Visibility::Culled(CullReason::DegenerateCovariance));
    for i in n..n + 3 {
        assert_eq!(out.radii[i], 0);
        assert!(!out.visible[i]);
        assert_eq!(records[i].tiles_touched, 0);
    }

    let mut d_image = ImageGrads::zeros(cam.width, cam.height);
    d_image.color.fill(Vector3::new(1.0, -0.5, 0.25));
    d_image.alpha.fill(0.3);
    d_image.depth.fill(0.01);
    let grads = rasterizer
        .backward(&extended, &cam, out.num_rendered, &out.buffers, &out.image, &d_image)
        .unwrap();
    for i in n..n + 3 {
        assert_eq!(grads.max_abs(i), 0.0, "culled splat {i} received a gradient");
    }
    assert!((0..n).any(|i| grads.max_abs(i) > 0.0));
}

#[test]
fn test_prefiltered_input_behind_camera() {
    let cam = camera();
    let mut splats = random_scene(1, 20);
    splats.push(Splat::gaussian(Vector3::new(0.0, 0.0, 0.05), 0.1, 0.5, Vector3::zeros()));

    let strict = RasterSettings {
        prefiltered: true,
        debug: true,
        ..Default::default()
    };
    let err = Rasterizer::new(strict).forward(&splats, &cam).unwrap_err();
    assert!(matches!(err, RasterError::Consistency(_)), "{err}");

    let lenient = RasterSettings {
        prefiltered: true,
        ..Default::default()
    };
    let out = Rasterizer::new(lenient).forward(&splats, &cam).unwrap();
    assert!(!out.visible[splats.len() - 1]);
}

#[test]
fn test_invalid_settings_and_camera_are_rejected() {
    let splats = random_scene(2, 10);
    let err = Rasterizer::new(RasterSettings {
        sh_degree: 7,
        ..Default::default()
    })
    .forward(&splats, &camera())
    .unwrap_err();
    assert!(matches!(err, RasterError::InvalidInput(_)));

    let bad_fov = Camera::new(Matrix4::identity(), 0.0, 0.5, 32, 32);
    let err = Rasterizer::new(RasterSettings::default())
        .forward(&splats, &bad_fov)
        .unwrap_err();
    assert!(matches!(err, RasterError::InvalidInput(_)));
}

#[test]
fn test_pass_ids_are_unique() {
    let splats = random_scene(4, 30);
    let cam = camera();
    let mut rasterizer = Rasterizer::new(RasterSettings::default());
    let a = rasterizer.forward(&splats, &cam).unwrap();
    let b = rasterizer.forward(&splats, &cam).unwrap();
    assert_ne!(a.buffers.pass_id(), b.buffers.pass_id());
    assert_eq!(a.image, b.image);
}
