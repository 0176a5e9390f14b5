use std::collections::BTreeMap;

use ndarray::Array2;

use super::config::Connectivity;

/// One connected group of above-threshold pixels.
#[derive(Clone, Debug)]
pub struct Segment {
    pub label: u32,
    /// Member pixels as `(row, col)`.
    pub pixels: Vec<(usize, usize)>,
    /// Bounding box: (min_row, max_row, min_col, max_col).
    pub bbox: (usize, usize, usize, usize),
}

impl Segment {
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// True when the bounding box lies within `width` pixels of any image edge.
    pub fn near_border(&self, width: usize, height: usize, image_width: usize) -> bool {
        let (min_row, max_row, min_col, max_col) = self.bbox;
        min_row < width
            || max_row + width >= height
            || min_col < width
            || max_col + width >= image_width
    }
}

/// Label connected regions of `mask` with a two-pass union-find.
///
/// Segments come back ordered by label, which follows raster order of
/// each segment's first pixel.
pub fn label_segments(mask: &Array2<bool>, connectivity: Connectivity) -> Vec<Segment> {
    let (h, w) = mask.dim();
    if h == 0 || w == 0 {
        return Vec::new();
    }

    let mut labels = Array2::<u32>::zeros((h, w));
    // Index 0 is background.
    let mut parent: Vec<u32> = vec![0];

    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }
            let mut neighbours = [0u32; 4];
            if row > 0 {
                neighbours[0] = labels[[row - 1, col]];
                if connectivity == Connectivity::Eight {
                    if col > 0 {
                        neighbours[1] = labels[[row - 1, col - 1]];
                    }
                    if col + 1 < w {
                        neighbours[2] = labels[[row - 1, col + 1]];
                    }
                }
            }
            if col > 0 {
                neighbours[3] = labels[[row, col - 1]];
            }

            let smallest = neighbours.iter().copied().filter(|&l| l > 0).min();
            let label = match smallest {
                Some(l) => {
                    for &other in neighbours.iter().filter(|&&o| o > 0 && o != l) {
                        union(&mut parent, l, other);
                    }
                    l
                }
                None => {
                    let next = parent.len() as u32;
                    parent.push(next);
                    next
                }
            };
            labels[[row, col]] = label;
        }
    }

    let mut segments = BTreeMap::<u32, Segment>::new();
    for ((row, col), &lbl) in labels.indexed_iter() {
        if lbl == 0 {
            continue;
        }
        let root = find(&parent, lbl);
        let seg = segments.entry(root).or_insert_with(|| Segment {
            label: root,
            pixels: Vec::new(),
            bbox: (row, row, col, col),
        });
        seg.pixels.push((row, col));
        seg.bbox.0 = seg.bbox.0.min(row);
        seg.bbox.1 = seg.bbox.1.max(row);
        seg.bbox.2 = seg.bbox.2.min(col);
        seg.bbox.3 = seg.bbox.3.max(col);
    }
    segments.into_values().collect()
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}
