//! Gradients for alpha blending (front-to-back compositing).
//!
//! Forward, per pixel, over the N contributing splats:
//!   T_0 = 1
//!   C   = Σ_i c_i · α_i · T_i + T_N · bg
//!   A   = 1 − T_N
//!   T_{i+1} = T_i · (1 − α_i)
//!
//! Depth and normal are blended like color but without a background term.
//!
//! The backward walk runs back-to-front starting from the saved T_N, so no
//! per-pixel list of transmittances has to be stored:
//!   T_k      = T_{k+1} / (1 − α_k)
//!   acc_k    = α_{k+1} · c_{k+1} + (1 − α_{k+1}) · acc_{k+1}
//!   dL/dα_k  = T_k · (c_k − acc_k) · dL/dC
//!            − T_N / (1 − α_k) · (bg · dL/dC − dL/dA)

use nalgebra::Vector3;

/// Upstream gradients for one pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PixelUpstream {
    pub color: Vector3<f32>,
    pub alpha: f32,
    pub depth: f32,
    pub normal: Vector3<f32>,
}

impl PixelUpstream {
    pub fn is_zero(&self) -> bool {
        self.color == Vector3::zeros()
            && self.alpha == 0.0
            && self.depth == 0.0
            && self.normal == Vector3::zeros()
    }
}

/// Local gradients of one contribution.
#[derive(Clone, Copy, Debug)]
pub struct BlendStep {
    pub d_alpha: f32,
    pub d_color: Vector3<f32>,
    pub d_depth: f32,
    pub d_normal: Vector3<f32>,
}

/// Back-to-front walker over one pixel's contributions.
#[derive(Clone, Debug)]
pub struct ReverseCompositor {
    t: f32,
    t_final: f32,
    background: Vector3<f32>,

    acc_color: Vector3<f32>,
    acc_depth: f32,
    acc_normal: Vector3<f32>,

    last_alpha: f32,
    last_color: Vector3<f32>,
    last_depth: f32,
    last_normal: Vector3<f32>,
}

impl ReverseCompositor {
    pub fn new(final_transmittance: f32, background: Vector3<f32>) -> Self {
        Self {
            t: final_transmittance,
            t_final: final_transmittance,
            background,
            acc_color: Vector3::zeros(),
            acc_depth: 0.0,
            acc_normal: Vector3::zeros(),
            last_alpha: 0.0,
            last_color: Vector3::zeros(),
            last_depth: 0.0,
            last_normal: Vector3::zeros(),
        }
    }

    /// Transmittance in front of the last visited contribution.
    ///
    /// Returns to 1 after the whole pixel has been walked.
    pub fn transmittance(&self) -> f32 {
        self.t
    }

    /// Visit the next contribution (walking back-to-front).
    pub fn step(
        &mut self,
        alpha: f32,
        color: &Vector3<f32>,
        depth: f32,
        normal: &Vector3<f32>,
        upstream: &PixelUpstream,
    ) -> BlendStep {
        let one_minus = 1.0 - alpha;
        self.t /= one_minus;
        let weight = alpha * self.t;

        // Blend of everything behind this splat, at unit transmittance.
        let la = self.last_alpha;
        self.acc_color = self.last_color * la + self.acc_color * (1.0 - la);
        self.acc_depth = self.last_depth * la + self.acc_depth * (1.0 - la);
        self.acc_normal = self.last_normal * la + self.acc_normal * (1.0 - la);
        self.last_alpha = alpha;
        self.last_color = *color;
        self.last_depth = depth;
        self.last_normal = *normal;

        let mut d_alpha = (color - self.acc_color).dot(&upstream.color)
            + (depth - self.acc_depth) * upstream.depth
            + (normal - self.acc_normal).dot(&upstream.normal);
        d_alpha *= self.t;

        // Background fill and output alpha both scale with T_N.
        let d_t_final = self.background.dot(&upstream.color) - upstream.alpha;
        d_alpha -= self.t_final / one_minus * d_t_final;

        BlendStep {
            d_alpha,
            d_color: upstream.color * weight,
            d_depth: upstream.depth * weight,
            d_normal: upstream.normal * weight,
        }
    }
}
