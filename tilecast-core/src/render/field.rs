//! Procedural density fields sampled by the volume renderer.
//!
//! Fields live in volume-local space, the unit cube `[-0.5, 0.5]³`.

use glam::Vec3;

pub trait DensityField: Send {
    /// Density at `p`, roughly in `[0, 1]` inside features.
    fn density(&self, p: Vec3) -> f32;

    /// Emission color at `p`, components in `[0, 1]`.
    fn color(&self, p: Vec3) -> Vec3;

    /// Density gradient by central differences.
    fn gradient(&self, p: Vec3) -> Vec3 {
        const H: f32 = 1e-3;
        Vec3::new(
            self.density(p + Vec3::X * H) - self.density(p - Vec3::X * H),
            self.density(p + Vec3::Y * H) - self.density(p - Vec3::Y * H),
            self.density(p + Vec3::Z * H) - self.density(p - Vec3::Z * H),
        ) / (2.0 * H)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    pub center: Vec3,
    pub radius: f32,
    pub weight: f32,
    pub color: Vec3,
}

/// Sum of isotropic gaussians: a ball-and-stick molecule without the sticks.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianBlobs {
    pub blobs: Vec<Blob>,
}

impl GaussianBlobs {
    pub fn new(blobs: Vec<Blob>) -> Self {
        Self { blobs }
    }

    fn falloff(blob: &Blob, p: Vec3) -> f32 {
        let d2 = (p - blob.center).length_squared();
        blob.weight * (-d2 / (2.0 * blob.radius * blob.radius)).exp()
    }
}

impl Default for GaussianBlobs {
    /// A water-like cluster: one large oxygen-colored core and a ring of
    /// smaller hydrogen-colored satellites.
    fn default() -> Self {
        let oxygen = Vec3::new(0.9, 0.2, 0.15);
        let hydrogen = Vec3::new(0.9, 0.9, 0.95);
        let carbon = Vec3::new(0.3, 0.3, 0.35);
        Self::new(vec![
            Blob {
                center: Vec3::ZERO,
                radius: 0.12,
                weight: 1.0,
                color: oxygen,
            },
            Blob {
                center: Vec3::new(0.22, 0.12, 0.0),
                radius: 0.07,
                weight: 0.9,
                color: hydrogen,
            },
            Blob {
                center: Vec3::new(-0.22, 0.12, 0.0),
                radius: 0.07,
                weight: 0.9,
                color: hydrogen,
            },
            Blob {
                center: Vec3::new(0.0, -0.2, 0.15),
                radius: 0.09,
                weight: 0.8,
                color: carbon,
            },
            Blob {
                center: Vec3::new(0.0, -0.2, -0.2),
                radius: 0.06,
                weight: 0.7,
                color: hydrogen,
            },
        ])
    }
}

impl DensityField for GaussianBlobs {
    fn density(&self, p: Vec3) -> f32 {
        self.blobs.iter().map(|b| Self::falloff(b, p)).sum()
    }

    fn color(&self, p: Vec3) -> Vec3 {
        let mut total = 0.0;
        let mut color = Vec3::ZERO;
        for blob in &self.blobs {
            let w = Self::falloff(blob, p);
            total += w;
            color += blob.color * w;
        }
        if total > 1e-6 { color / total } else { Vec3::ZERO }
    }
}
