//! Rays through a tile's sub-frustum.

use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Not necessarily normalized; `t` is measured in units of `dir`.
    pub dir: Vec3,
}

impl Ray {
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }

    /// Ray through NDC `(x, y)`, from the near plane to the far plane.
    ///
    /// `inverse_view_projection` is `inverse(P · V)`; the ray comes out in
    /// world space with `dir` spanning near to far.
    pub fn through_ndc(inverse_view_projection: &Mat4, x: f32, y: f32) -> Self {
        let near = inverse_view_projection.project_point3(Vec3::new(x, y, -1.0));
        let far = inverse_view_projection.project_point3(Vec3::new(x, y, 1.0));
        Self {
            origin: near,
            dir: far - near,
        }
    }

    /// Same ray in the space `world_to_local` maps into. `t` values are
    /// preserved.
    pub fn transformed(&self, world_to_local: &Mat4) -> Self {
        Self {
            origin: world_to_local.transform_point3(self.origin),
            dir: world_to_local.transform_vector3(self.dir),
        }
    }

    /// Slab-method ray/AABB test. Returns the entry and exit `t`, entry
    /// clamped to zero when the origin is inside the box.
    pub fn intersect_aabb(&self, min: Vec3, max: Vec3) -> Option<(f32, f32)> {
        let inv = Vec3::new(
            if self.dir.x != 0.0 { 1.0 / self.dir.x } else { f32::INFINITY },
            if self.dir.y != 0.0 { 1.0 / self.dir.y } else { f32::INFINITY },
            if self.dir.z != 0.0 { 1.0 / self.dir.z } else { f32::INFINITY },
        );

        let t1 = (min - self.origin) * inv;
        let t2 = (max - self.origin) * inv;
        let near = t1.min(t2);
        let far = t1.max(t2);

        let t_enter = near.max_element();
        let t_exit = far.min_element();
        if t_enter.is_nan() || t_exit.is_nan() || t_exit < t_enter || t_exit < 0.0 {
            return None;
        }
        Some((t_enter.max(0.0), t_exit))
    }
}
