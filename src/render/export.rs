//! 8-bit previews of rendered buffers.

use image::{Rgb, RgbImage};

use crate::core::color::{linear_f32_to_srgb_u8, signed_unit_to_u8, unit_f32_to_u8};
use crate::render::RenderedImage;

impl RenderedImage {
    fn to_rgb(&self, f: impl Fn(usize) -> [u8; 3]) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| Rgb(f(self.index(x, y))))
    }

    /// Color buffer, treated as linear and encoded to sRGB.
    pub fn color_image(&self) -> RgbImage {
        self.to_rgb(|i| {
            let c = self.color[i];
            [
                linear_f32_to_srgb_u8(c.x),
                linear_f32_to_srgb_u8(c.y),
                linear_f32_to_srgb_u8(c.z),
            ]
        })
    }

    /// Coverage as grayscale.
    pub fn alpha_image(&self) -> RgbImage {
        self.to_rgb(|i| [unit_f32_to_u8(self.alpha[i]); 3])
    }

    /// Alpha-normalized depth, near = white, far = black, uncovered = black.
    pub fn depth_image(&self) -> RgbImage {
        let resolved: Vec<Option<f32>> = (0..self.pixel_count())
            .map(|i| (self.alpha[i] > 1e-3).then(|| self.depth[i] / self.alpha[i]))
            .collect();
        let (near, far) = resolved
            .iter()
            .flatten()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));
        let span = (far - near).max(1e-6);

        self.to_rgb(|i| match resolved[i] {
            Some(d) => [unit_f32_to_u8(1.0 - (d - near) / span); 3],
            None => [0; 3],
        })
    }

    /// Alpha-normalized normals mapped from [-1, 1] to [0, 255].
    pub fn normal_image(&self) -> RgbImage {
        self.to_rgb(|i| {
            let n = self.normal[i];
            let len = n.norm();
            if len < 1e-6 {
                return [128, 128, 128];
            }
            let n = n / len;
            [signed_unit_to_u8(n.x), signed_unit_to_u8(n.y), signed_unit_to_u8(n.z)]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_previews_have_image_size() {
        let mut img = RenderedImage::background(3, 2, Vector3::new(1.0, 0.0, 0.0));
        img.alpha[1] = 0.5;
        img.depth[1] = 1.0;
        img.alpha[4] = 1.0;
        img.depth[4] = 4.0;

        let color = img.color_image();
        assert_eq!(color.dimensions(), (3, 2));
        assert_eq!(color.get_pixel(0, 0).0, [255, 0, 0]);

        let depth = img.depth_image();
        // Resolved depths: 2 at (1, 0), 4 at (1, 1).
        assert_eq!(depth.get_pixel(1, 0).0, [255; 3]);
        assert_eq!(depth.get_pixel(1, 1).0, [0; 3]);
        assert_eq!(img.alpha_image().get_pixel(1, 1).0, [255; 3]);
        assert_eq!(img.normal_image().get_pixel(0, 0).0, [128; 3]);
    }
}
