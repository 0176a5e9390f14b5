use std::collections::HashSet;

use crate::detection::Detection;

use super::transform::Point;

/// Parameters for nearest-neighbour source matching.
#[derive(Clone, Copy, Debug)]
pub struct MatchParams {
    pub radius: f64,
    pub tie_tolerance: f64,
    pub max_flux_ratio: Option<f64>,
}

/// A matched pair: index into the target list and into the reference list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourcePair {
    pub target: usize,
    pub reference: usize,
    /// Distance after applying the predicted offset (pixels).
    pub distance: f64,
}

/// Greedy 1-to-1 matching of `target` detections onto `reference` detections.
///
/// Each target position is first moved by `-shift` (the target's estimated
/// displacement relative to the reference). Its nearest reference within
/// `radius` is chosen; candidates whose distance is within `tie_tolerance`
/// of the nearest are ranked by how close their flux ratio is to 1. Pairs
/// are then accepted closest-first so each source is used at most once.
pub fn match_sources(
    reference: &[Detection],
    target: &[Detection],
    shift: Point,
    params: &MatchParams,
) -> Vec<SourcePair> {
    let radius_sq = params.radius * params.radius;
    let mut proposals: Vec<SourcePair> = Vec::with_capacity(target.len());

    for (ti, t) in target.iter().enumerate() {
        let predicted = Point::new(t.pos.x - shift.x, t.pos.y - shift.y);

        let mut candidates: Vec<(f64, usize)> = reference
            .iter()
            .enumerate()
            .filter(|(_, r)| flux_ratio_ok(t.flux, r.flux, params.max_flux_ratio))
            .filter_map(|(ri, r)| {
                let dx = r.pos.x - predicted.x;
                let dy = r.pos.y - predicted.y;
                let d2 = dx * dx + dy * dy;
                (d2 <= radius_sq).then(|| (d2.sqrt(), ri))
            })
            .collect();
        if candidates.is_empty() {
            continue;
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let nearest = candidates[0].0;
        let (distance, ri) = candidates
            .iter()
            .take_while(|(d, _)| *d <= nearest + params.tie_tolerance)
            .min_by(|a, b| {
                log_flux_ratio(t.flux, reference[a.1].flux)
                    .total_cmp(&log_flux_ratio(t.flux, reference[b.1].flux))
            })
            .copied()
            .unwrap_or(candidates[0]);

        proposals.push(SourcePair {
            target: ti,
            reference: ri,
            distance,
        });
    }

    proposals.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let mut used_ref = HashSet::new();
    let mut used_tgt = HashSet::new();
    proposals
        .into_iter()
        .filter(|p| {
            if used_ref.contains(&p.reference) || used_tgt.contains(&p.target) {
                return false;
            }
            used_ref.insert(p.reference);
            used_tgt.insert(p.target);
            true
        })
        .collect()
}

fn log_flux_ratio(a: f64, b: f64) -> f64 {
    if a > 0.0 && b > 0.0 {
        (a / b).ln().abs()
    } else {
        f64::INFINITY
    }
}

fn flux_ratio_ok(a: f64, b: f64, max_ratio: Option<f64>) -> bool {
    match max_ratio {
        None => true,
        Some(limit) => log_flux_ratio(a, b) <= limit.ln(),
    }
}
