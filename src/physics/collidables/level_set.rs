use glam::{UVec3, Vec3};

use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::math_helper::safe_normal;

/// Signed distance field sampled on a uniform grid.
///
/// Values are stored at grid nodes and trilinearly interpolated. Queries outside the grid
/// clamp to the grid boundary and add the distance to it, so phi stays conservative far away.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSet {
    bounds: BoundingBox,
    counts: UVec3,
    cell_size: Vec3,
    phi: Vec<f32>,
}

impl LevelSet {
    /// Builds a level set from node values laid out x-fastest.
    pub fn new(bounds: BoundingBox, counts: UVec3, phi: Vec<f32>) -> Self {
        assert!(
            counts.x >= 2 && counts.y >= 2 && counts.z >= 2,
            "A level set needs at least two nodes per axis."
        );
        assert_eq!(
            phi.len(),
            (counts.x * counts.y * counts.z) as usize,
            "Node count does not match grid dimensions."
        );
        let cell_size = bounds.extents() / (counts - UVec3::ONE).as_vec3();
        Self {
            bounds,
            counts,
            cell_size,
            phi,
        }
    }

    /// Samples `signed_distance` on a grid covering `bounds` padded by `padding`.
    pub fn from_fn(
        bounds: BoundingBox,
        padding: f32,
        resolution: u32,
        signed_distance: impl Fn(Vec3) -> f32,
    ) -> Self {
        let mut padded = bounds;
        padded.thicken(padding);
        let counts = UVec3::splat(resolution.max(2));
        let cell_size = padded.extents() / (counts - UVec3::ONE).as_vec3();
        let mut phi = Vec::with_capacity((counts.x * counts.y * counts.z) as usize);
        for k in 0..counts.z {
            for j in 0..counts.y {
                for i in 0..counts.x {
                    let node = padded.min + UVec3::new(i, j, k).as_vec3() * cell_size;
                    phi.push(signed_distance(node));
                }
            }
        }
        Self::new(padded, counts, phi)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounds
    }

    pub fn counts(&self) -> UVec3 {
        self.counts
    }

    #[inline]
    fn node(&self, i: u32, j: u32, k: u32) -> f32 {
        self.phi[(i + self.counts.x * (j + self.counts.y * k)) as usize]
    }

    /// Interpolated signed distance at `point`.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        let clamped = point.clamp(self.bounds.min, self.bounds.max);
        let outside = (point - clamped).length();
        let grid = (clamped - self.bounds.min) / self.cell_size;
        let max_cell = (self.counts - UVec3::splat(2)).as_vec3();
        let base = grid.floor().clamp(Vec3::ZERO, max_cell);
        let t = (grid - base).clamp(Vec3::ZERO, Vec3::ONE);
        let (i, j, k) = (base.x as u32, base.y as u32, base.z as u32);

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let c00 = lerp(self.node(i, j, k), self.node(i + 1, j, k), t.x);
        let c10 = lerp(self.node(i, j + 1, k), self.node(i + 1, j + 1, k), t.x);
        let c01 = lerp(self.node(i, j, k + 1), self.node(i + 1, j, k + 1), t.x);
        let c11 = lerp(self.node(i, j + 1, k + 1), self.node(i + 1, j + 1, k + 1), t.x);
        let c0 = lerp(c00, c10, t.y);
        let c1 = lerp(c01, c11, t.y);
        lerp(c0, c1, t.z) + outside
    }

    /// Signed distance with the normalized gradient as the normal.
    pub fn phi_with_normal(&self, point: Vec3) -> (f32, Vec3) {
        let phi = self.signed_distance(point);
        let h = self.cell_size * 0.5;
        let gradient = Vec3::new(
            self.signed_distance(point + Vec3::X * h.x) - self.signed_distance(point - Vec3::X * h.x),
            self.signed_distance(point + Vec3::Y * h.y) - self.signed_distance(point - Vec3::Y * h.y),
            self.signed_distance(point + Vec3::Z * h.z) - self.signed_distance(point - Vec3::Z * h.z),
        ) / (h * 2.0);
        let normal = safe_normal(gradient);
        (phi, if normal == Vec3::ZERO { Vec3::Z } else { normal })
    }
}
