//! Affine mapping between two pixel coordinate systems.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::consts::DEGENERATE_DETERMINANT;
use crate::error::{ReductionError, Result};

/// A pixel position: `x` is the column, `y` the row, both sub-pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// `x' = a·x + b·y + c`, `y' = d·x + e·y + f`.
///
/// Always invertible: constructors reject near-singular matrices.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    m: [[f64; 3]; 2],
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            m: [[1.0, 0.0, dx], [0.0, 1.0, dy]],
        }
    }

    /// Rotation by `angle` radians and uniform `scale` about the origin,
    /// followed by a shift.
    pub fn similarity(scale: f64, angle: f64, dx: f64, dy: f64) -> Result<Self> {
        let (s, c) = angle.sin_cos();
        Self::from_rows([scale * c, -scale * s, dx], [scale * s, scale * c, dy])
    }

    /// Build from the two rows `[a, b, c]` and `[d, e, f]`.
    pub fn from_rows(x_row: [f64; 3], y_row: [f64; 3]) -> Result<Self> {
        let t = Self { m: [x_row, y_row] };
        let det = t.determinant();
        if !det.is_finite() || det.abs() < DEGENERATE_DETERMINANT {
            return Err(ReductionError::DegenerateTransform { determinant: det });
        }
        Ok(t)
    }

    pub fn rows(&self) -> [[f64; 3]; 2] {
        self.m
    }

    pub fn determinant(&self) -> f64 {
        self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
    }

    pub fn apply(&self, p: Point) -> Point {
        Point {
            x: self.m[0][0] * p.x + self.m[0][1] * p.y + self.m[0][2],
            y: self.m[1][0] * p.x + self.m[1][1] * p.y + self.m[1][2],
        }
    }

    pub fn inverse(&self) -> Result<Self> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < DEGENERATE_DETERMINANT {
            return Err(ReductionError::DegenerateTransform { determinant: det });
        }
        let [[a, b, c], [d, e, f]] = self.m;
        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;
        Self::from_rows(
            [ia, ib, -(ia * c + ib * f)],
            [id, ie, -(id * c + ie * f)],
        )
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Transform) -> Result<Self> {
        let [[a1, b1, c1], [d1, e1, f1]] = self.m;
        let [[a2, b2, c2], [d2, e2, f2]] = other.m;
        Self::from_rows(
            [a1 * a2 + b1 * d2, a1 * b2 + b1 * e2, a1 * c2 + b1 * f2 + c1],
            [d1 * a2 + e1 * d2, d1 * b2 + e1 * e2, d1 * c2 + e1 * f2 + f1],
        )
    }

    /// Largest displacement this transform applies to any of `points`,
    /// relative to the identity. Handy for near-identity checks.
    pub fn max_displacement(&self, points: &[Point]) -> f64 {
        points
            .iter()
            .map(|&p| self.apply(p).distance(&p))
            .fold(0.0, f64::max)
    }

    /// Least-squares shift mapping `src` onto `dst`.
    pub fn fit_translation(pairs: &[(Point, Point)]) -> Option<Self> {
        if pairs.is_empty() {
            return None;
        }
        let n = pairs.len() as f64;
        let (sx, sy) = pairs.iter().fold((0.0, 0.0), |(sx, sy), (s, d)| {
            (sx + d.x - s.x, sy + d.y - s.y)
        });
        Some(Self::translation(sx / n, sy / n))
    }

    /// Least-squares affine mapping `src` onto `dst` via the 3x3 normal
    /// equations, one LU solve per output coordinate.
    ///
    /// Returns `None` for fewer than three pairs, collinear inputs, or a
    /// degenerate result.
    pub fn fit_affine(pairs: &[(Point, Point)]) -> Option<Self> {
        if pairs.len() < 3 {
            return None;
        }
        // Center on the source centroid for numerical conditioning.
        let n = pairs.len() as f64;
        let (mx, my) = pairs
            .iter()
            .fold((0.0, 0.0), |(mx, my), (s, _)| (mx + s.x / n, my + s.y / n));

        let mut ata = Matrix3::<f64>::zeros();
        let mut atx = Vector3::<f64>::zeros();
        let mut aty = Vector3::<f64>::zeros();
        for (s, d) in pairs {
            let row = Vector3::new(s.x - mx, s.y - my, 1.0);
            ata += row * row.transpose();
            atx += row * d.x;
            aty += row * d.y;
        }
        if !well_conditioned(&ata) {
            return None;
        }

        let lu = ata.lu();
        let px = lu.solve(&atx)?;
        let py = lu.solve(&aty)?;
        let (a, b, c0) = (px[0], px[1], px[2]);
        let (d, e, f0) = (py[0], py[1], py[2]);
        // Undo the centering: x' = a(x - mx) + b(y - my) + c0.
        Self::from_rows([a, b, c0 - a * mx - b * my], [d, e, f0 - d * mx - e * my]).ok()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Reject normal matrices whose smallest singular value vanishes next to the
/// largest. LU alone only catches exact zeros.
pub(crate) fn well_conditioned(normal: &Matrix3<f64>) -> bool {
    let sv = normal.singular_values();
    let max = sv.max();
    max > 0.0 && max.is_finite() && sv.min() > max * 1e-12
}
