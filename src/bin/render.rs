//! drk-render: render a procedural splat scene and write PNG previews
//!
//! Usage:
//!   drk-render --out-dir renders --width 256 --height 192
//!   drk-render --settings raster.json --backward
//!
//! Set `RUST_LOG=drk_splatting=debug` for per-stage timings.

use anyhow::{bail, Context, Result};
use drk_splatting::{Camera, ImageGrads, RasterSettings, Rasterizer, Splat, SplatCloud};
use nalgebra::{Vector3, Vector4};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

struct Args {
    out_dir: PathBuf,
    width: u32,
    height: u32,
    count: usize,
    background: Vector3<f32>,
    settings: RasterSettings,
    backward: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("drk-render v{}", drk_splatting::VERSION);
    let args = parse_args()?;

    let cloud = demo_scene(args.count);
    let camera = Camera::look_at(
        &Vector3::new(0.0, -1.0, -4.0),
        &Vector3::zeros(),
        &Vector3::new(0.0, -1.0, 0.0),
        0.5 * args.width as f32 / args.height as f32,
        0.5,
        args.width,
        args.height,
    )
    .with_background(args.background);

    let mut rasterizer = Rasterizer::new(args.settings);
    let out = rasterizer
        .forward(cloud.as_slice(), &camera)
        .context("forward pass failed")?;
    println!(
        "Rendered {} splats ({} visible, {} tile entries) at {}×{}",
        cloud.len(),
        out.num_visible,
        out.num_rendered,
        args.width,
        args.height
    );

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("cannot create {}", args.out_dir.display()))?;
    let previews = [
        ("color.png", out.image.color_image()),
        ("alpha.png", out.image.alpha_image()),
        ("depth.png", out.image.depth_image()),
        ("normal.png", out.image.normal_image()),
    ];
    for (name, img) in previews {
        let path = args.out_dir.join(name);
        img.save(&path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        println!("Wrote {}", path.display());
    }

    if args.backward {
        // L = mean color: every pixel pulls equally on every channel.
        let n = camera.pixel_count() as f32;
        let mut d_image = ImageGrads::zeros(camera.width, camera.height);
        d_image.color.fill(Vector3::repeat(1.0 / (3.0 * n)));

        let grads = rasterizer
            .backward(
                cloud.as_slice(),
                &camera,
                out.num_rendered,
                &out.buffers,
                &out.image,
                &d_image,
            )
            .context("backward pass failed")?;

        let norm = |v: &[Vector3<f32>]| v.iter().map(|g| g.norm_squared()).sum::<f32>().sqrt();
        println!("Gradient norms (L = mean color):");
        println!("  position       {:.6e}", norm(&grads.position));
        println!("  scale          {:.6e}", norm(&grads.scale));
        println!(
            "  opacity        {:.6e}",
            grads.opacity.iter().map(|g| g * g).sum::<f32>().sqrt()
        );
        println!("  scale_modifier {:.6e}", grads.scale_modifier);
    }

    Ok(())
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        out_dir: PathBuf::from("renders"),
        width: 256,
        height: 192,
        count: 64,
        background: Vector3::zeros(),
        settings: RasterSettings::default(),
        backward: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out-dir" => parsed.out_dir = PathBuf::from(value(&mut args, "--out-dir")?),
            "--width" => parsed.width = value(&mut args, "--width")?.parse().context("invalid width")?,
            "--height" => parsed.height = value(&mut args, "--height")?.parse().context("invalid height")?,
            "--count" => parsed.count = value(&mut args, "--count")?.parse().context("invalid count")?,
            "--settings" => {
                let path = PathBuf::from(value(&mut args, "--settings")?);
                parsed.settings = RasterSettings::from_json_file(&path)?;
            }
            "--sh-degree" => {
                parsed.settings.sh_degree = value(&mut args, "--sh-degree")?.parse().context("invalid SH degree")?
            }
            "--tile-culling" => parsed.settings.tile_culling = true,
            "--cache-sort" => parsed.settings.cache_sort = true,
            "--debug" => parsed.settings.debug = true,
            "--backward" => parsed.backward = true,
            "--background" => {
                let text = value(&mut args, "--background")?;
                let parts = text
                    .split(',')
                    .map(|s| s.trim().parse::<f32>())
                    .collect::<Result<Vec<_>, _>>()
                    .context("invalid background color")?;
                if parts.len() != 3 {
                    bail!("--background must be three comma-separated floats (e.g. '0.5,0.5,0.5')");
                }
                parsed.background = Vector3::new(parts[0], parts[1], parts[2]);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                print_help();
                bail!("unknown argument: {other}");
            }
        }
    }

    if parsed.width == 0 || parsed.height == 0 {
        bail!("image size must be positive");
    }
    Ok(parsed)
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next().with_context(|| format!("missing value for {flag}"))
}

fn print_help() {
    println!(
        "drk-render - render a procedural splat scene

Options:
  --out-dir <DIR>        Output directory for PNG previews (default: renders)
  --width <N>            Image width (default: 256)
  --height <N>           Image height (default: 192)
  --count <N>            Number of splats in the demo scene (default: 64)
  --settings <FILE>      Load RasterSettings from JSON
  --sh-degree <0-3>      Highest SH band to evaluate
  --tile-culling         Skip entries that cannot reach their tile
  --cache-sort           Reuse the sort permutation between passes
  --debug                Run consistency checks after every stage
  --background <R,G,B>   Background color (default: 0,0,0)
  --backward             Run one backward pass and print gradient norms
  -h, --help             Show this help"
    );
}

/// Splats on a golden-angle spiral over a sphere, with varied shape controls.
fn demo_scene(count: usize) -> SplatCloud {
    let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    let mut cloud = SplatCloud::new();

    for i in 0..count {
        let f = (i as f32 + 0.5) / count.max(1) as f32;
        let y = 1.0 - 2.0 * f;
        let r = (1.0 - y * y).max(0.0).sqrt();
        let phi = golden * i as f32;
        let position = Vector3::new(r * phi.cos(), y, r * phi.sin());

        let hue = f * std::f32::consts::TAU;
        let rgb = Vector3::new(
            0.5 + 0.5 * hue.cos(),
            0.5 + 0.5 * (hue + 2.1).cos(),
            0.5 + 0.5 * (hue + 4.2).cos(),
        );
        let mut splat = Splat::gaussian(position, 0.18, 0.85, rgb);
        splat.scale = Vector3::new(0.22, 0.12, 0.02);
        splat.theta = phi;
        // Tilt the local z axis toward the sphere normal.
        let axis = Vector3::z().cross(&position);
        let angle = position.z.clamp(-1.0, 1.0).acos();
        if axis.norm() > 1e-6 {
            let a = axis.normalize() * (0.5 * angle).sin();
            splat.rotation = Vector4::new((0.5 * angle).cos(), a.x, a.y, a.z);
        }
        splat.l1l2_rate = (i % 4) as f32 / 4.0;
        splat.acutance = (i % 3) as f32;
        cloud.push(splat);
    }
    cloud
}
