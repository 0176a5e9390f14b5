//! Multi-threshold deblending of blended segments.
//!
//! A segment is re-thresholded at a ladder of levels between its faintest
//! and brightest smoothed pixel. The first level at which it breaks into two
//! or more significant components splits it, and each component is searched
//! again at the higher levels. The leaf components seed a priority flood
//! that hands every pixel of the parent segment to one child.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::config::Connectivity;
use super::segments::{label_segments, Segment};

/// How deblending levels are spread between a segment's floor and peak.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelSpacing {
    /// Geometric spacing, dense near the floor.
    #[default]
    Exponential,
    Linear,
    /// `sinh`-shaped spacing, dense near the floor with a linear tail.
    Sinh,
}

/// Settings for splitting blended segments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeblendConfig {
    #[serde(default = "default_nlevels")]
    pub nlevels: usize,
    /// Minimum fraction of the parent segment's flux a component needs to
    /// count as a separate source.
    #[serde(default = "default_contrast")]
    pub contrast: f64,
    #[serde(default)]
    pub spacing: LevelSpacing,
}

fn default_nlevels() -> usize {
    32
}
fn default_contrast() -> f64 {
    0.001
}

impl Default for DeblendConfig {
    fn default() -> Self {
        Self {
            nlevels: default_nlevels(),
            contrast: default_contrast(),
            spacing: LevelSpacing::default(),
        }
    }
}

impl DeblendConfig {
    /// Thresholds strictly between `floor` and `peak`, ascending.
    pub fn levels(&self, floor: f32, peak: f32) -> Vec<f32> {
        let n = self.nlevels;
        let (lo, hi) = (floor as f64, peak as f64);
        (1..=n)
            .map(|i| {
                let t = i as f64 / (n + 1) as f64;
                let level = match self.spacing {
                    LevelSpacing::Linear => lo + (hi - lo) * t,
                    LevelSpacing::Exponential if lo > 0.0 => lo * (hi / lo).powf(t),
                    LevelSpacing::Exponential => lo + (hi - lo) * t,
                    LevelSpacing::Sinh => lo + (hi - lo) * (3.0 * t).sinh() / 3f64.sinh(),
                };
                level as f32
            })
            .collect()
    }
}

/// Split `segment` into one child per resolved peak of `image`.
///
/// Segments too small to hold two `min_pixels` components, or that never
/// split, come back unchanged.
pub fn deblend_segment(
    segment: &Segment,
    image: &Array2<f32>,
    min_pixels: usize,
    connectivity: Connectivity,
    config: &DeblendConfig,
) -> Vec<Segment> {
    if segment.area() < 2 * min_pixels.max(1) {
        return vec![segment.clone()];
    }
    let (floor, peak) = segment
        .pixels
        .iter()
        .map(|&(r, c)| image[[r, c]])
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if peak <= floor {
        return vec![segment.clone()];
    }

    let total: f64 = segment.pixels.iter().map(|&(r, c)| image[[r, c]].max(0.0) as f64).sum();
    let search = SplitSearch {
        image,
        origin: (segment.bbox.0, segment.bbox.2),
        dim: (segment.bbox.1 - segment.bbox.0 + 1, segment.bbox.3 - segment.bbox.2 + 1),
        min_pixels: min_pixels.max(1),
        min_flux: config.contrast * total,
        connectivity,
    };
    let levels = config.levels(floor, peak);
    let seeds = search.seeds(&segment.pixels, &levels);
    if seeds.len() < 2 {
        return vec![segment.clone()];
    }
    search.flood(segment, &seeds)
}

struct SplitSearch<'a> {
    image: &'a Array2<f32>,
    /// Top-left corner of the parent's bounding box.
    origin: (usize, usize),
    dim: (usize, usize),
    min_pixels: usize,
    min_flux: f64,
    connectivity: Connectivity,
}

impl SplitSearch<'_> {
    fn seeds(&self, pixels: &[(usize, usize)], levels: &[f32]) -> Vec<Vec<(usize, usize)>> {
        for (i, &level) in levels.iter().enumerate() {
            let above: Vec<(usize, usize)> = pixels
                .iter()
                .copied()
                .filter(|&(r, c)| self.image[[r, c]] > level)
                .collect();
            let significant: Vec<Vec<(usize, usize)>> = self
                .components(&above)
                .into_iter()
                .filter(|comp| comp.len() >= self.min_pixels && self.flux(comp) >= self.min_flux)
                .collect();
            match significant.len() {
                0 => break,
                1 => continue,
                _ => {
                    return significant
                        .iter()
                        .flat_map(|comp| self.seeds(comp, &levels[i + 1..]))
                        .collect()
                }
            }
        }
        vec![pixels.to_vec()]
    }

    fn flux(&self, pixels: &[(usize, usize)]) -> f64 {
        pixels.iter().map(|&(r, c)| self.image[[r, c]].max(0.0) as f64).sum()
    }

    fn components(&self, pixels: &[(usize, usize)]) -> Vec<Vec<(usize, usize)>> {
        let (r0, c0) = self.origin;
        let mut local = Array2::from_elem(self.dim, false);
        for &(r, c) in pixels {
            local[[r - r0, c - c0]] = true;
        }
        label_segments(&local, self.connectivity)
            .into_iter()
            .map(|seg| seg.pixels.into_iter().map(|(r, c)| (r + r0, c + c0)).collect())
            .collect()
    }

    /// Grow every seed through the parent, brightest pixels first.
    fn flood(&self, parent: &Segment, seeds: &[Vec<(usize, usize)>]) -> Vec<Segment> {
        let (r0, c0) = self.origin;
        let (h, w) = self.dim;
        let mut member = Array2::from_elem(self.dim, false);
        for &(r, c) in &parent.pixels {
            member[[r - r0, c - c0]] = true;
        }
        // 0 = unassigned, otherwise seed index + 1.
        let mut owner = Array2::<usize>::zeros(self.dim);
        let mut queue = BinaryHeap::new();
        for (k, seed) in seeds.iter().enumerate() {
            for &(r, c) in seed {
                owner[[r - r0, c - c0]] = k + 1;
            }
        }
        for (k, seed) in seeds.iter().enumerate() {
            for &(r, c) in seed {
                self.push_neighbours(&mut queue, &member, &owner, (r - r0, c - c0), k + 1);
            }
        }

        while let Some(item) = queue.pop() {
            let (lr, lc) = item.at;
            if owner[[lr, lc]] != 0 {
                continue;
            }
            owner[[lr, lc]] = item.owner;
            self.push_neighbours(&mut queue, &member, &owner, (lr, lc), item.owner);
        }

        let mut children: Vec<Segment> = (0..seeds.len())
            .map(|_| Segment {
                label: parent.label,
                pixels: Vec::new(),
                bbox: (usize::MAX, 0, usize::MAX, 0),
            })
            .collect();
        for lr in 0..h {
            for lc in 0..w {
                let k = owner[[lr, lc]];
                if k == 0 || !member[[lr, lc]] {
                    continue;
                }
                let (row, col) = (lr + r0, lc + c0);
                let child = &mut children[k - 1];
                child.pixels.push((row, col));
                child.bbox.0 = child.bbox.0.min(row);
                child.bbox.1 = child.bbox.1.max(row);
                child.bbox.2 = child.bbox.2.min(col);
                child.bbox.3 = child.bbox.3.max(col);
            }
        }
        children.retain(|c| !c.pixels.is_empty());
        children
    }

    fn push_neighbours(
        &self,
        queue: &mut BinaryHeap<FloodItem>,
        member: &Array2<bool>,
        owner: &Array2<usize>,
        (lr, lc): (usize, usize),
        k: usize,
    ) {
        let (h, w) = self.dim;
        let (r0, c0) = self.origin;
        let offsets: &[(isize, isize)] = match self.connectivity {
            Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Connectivity::Eight => &[(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, -1), (1, 0), (1, 1)],
        };
        for &(dr, dc) in offsets {
            let (nr, nc) = (lr as isize + dr, lc as isize + dc);
            if nr < 0 || nc < 0 || nr >= h as isize || nc >= w as isize {
                continue;
            }
            let (nr, nc) = (nr as usize, nc as usize);
            if !member[[nr, nc]] || owner[[nr, nc]] != 0 {
                continue;
            }
            queue.push(FloodItem {
                value: self.image[[nr + r0, nc + c0]],
                at: (nr, nc),
                owner: k,
            });
        }
    }
}

/// Max-heap entry: brightest first, then raster order, then lowest seed.
struct FloodItem {
    value: f32,
    at: (usize, usize),
    owner: usize,
}

impl Ord for FloodItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then_with(|| other.at.cmp(&self.at))
            .then_with(|| other.owner.cmp(&self.owner))
    }
}

impl PartialOrd for FloodItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FloodItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloodItem {}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_peaks(separation: f64) -> (Array2<f32>, Segment) {
        let img = Array2::from_shape_fn((21, 31), |(r, c)| {
            let g = |x0: f64| {
                let dx = c as f64 - x0;
                let dy = r as f64 - 10.0;
                (-(dx * dx + dy * dy) / (2.0 * 2.0 * 2.0)).exp()
            };
            (100.0 * (g(15.0 - separation / 2.0) + g(15.0 + separation / 2.0))) as f32
        });
        let above = img.mapv(|v| v > 5.0);
        let seg = label_segments(&above, Connectivity::Eight).remove(0);
        (img, seg)
    }

    #[test]
    fn test_levels_are_ascending_and_inside_range() {
        for spacing in [LevelSpacing::Exponential, LevelSpacing::Linear, LevelSpacing::Sinh] {
            let config = DeblendConfig {
                nlevels: 8,
                spacing,
                ..DeblendConfig::default()
            };
            let levels = config.levels(2.0, 50.0);
            assert_eq!(levels.len(), 8);
            assert!(levels.windows(2).all(|w| w[0] < w[1]), "{spacing:?}: {levels:?}");
            assert!(levels[0] > 2.0 && levels[7] < 50.0);
        }
    }

    #[test]
    fn test_splits_two_peaks_and_keeps_every_pixel() {
        let (img, seg) = two_peaks(9.0);
        let children = deblend_segment(&seg, &img, 5, Connectivity::Eight, &DeblendConfig::default());
        assert_eq!(children.len(), 2);
        assert_eq!(children.iter().map(Segment::area).sum::<usize>(), seg.area());
        // Each child sits on one side of the saddle.
        let mean_col = |s: &Segment| s.pixels.iter().map(|p| p.1 as f64).sum::<f64>() / s.area() as f64;
        let mut cols: Vec<f64> = children.iter().map(mean_col).collect();
        cols.sort_by(f64::total_cmp);
        assert!(cols[0] < 15.0 && cols[1] > 15.0, "child centres {cols:?}");
    }

    #[test]
    fn test_high_contrast_keeps_segment_whole() {
        let (img, seg) = two_peaks(9.0);
        let config = DeblendConfig {
            contrast: 0.6,
            ..DeblendConfig::default()
        };
        let children = deblend_segment(&seg, &img, 5, Connectivity::Eight, &config);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].area(), seg.area());
    }
}
