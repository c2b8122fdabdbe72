use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::data::grid::Grid;

/// Peaks below this fraction of the spectrum maximum are ignored.
pub const DEFAULT_RELATIVE_THRESHOLD: f64 = 0.05;

/// A detected band: refined position on the x axis and its height.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub position: f64,
    pub intensity: f64,
}

/// Marks local maxima of a dense intensity vector that reach `relative_threshold` of its maximum.
///
/// On a plateau only the first point is marked.
pub fn find_local_maxima_mask(values: &[f64], relative_threshold: f64) -> Vec<bool> {
    let max = values.iter().cloned().fold(0.0, f64::max);
    if max <= 0.0 {
        return vec![false; values.len()];
    }
    let floor = max * relative_threshold;
    let n = values.len();

    (0..n)
        .map(|i| {
            let current = values[i];
            let left = if i == 0 { f64::NEG_INFINITY } else { values[i - 1] };
            let right = if i + 1 == n { f64::NEG_INFINITY } else { values[i + 1] };
            current > 0.0 && current >= floor && current > left && current >= right
        })
        .collect()
}

pub fn filter_with_mask<T: Copy>(values: &[T], mask: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(mask.iter())
        .filter(|(_, keep)| **keep)
        .map(|(v, _)| *v)
        .collect()
}

/// Detects peaks of a spectrum sampled on `grid`.
///
/// Positions and heights are refined by fitting a parabola through each maximum and its
/// two neighbours.
///
/// # Example
///
/// ```rust
/// # use speccore::algorithm::peaks::find_peaks;
/// # use speccore::data::grid::Grid;
/// let grid = Grid::new(0.0, 6.0, 7).unwrap();
/// let peaks = find_peaks(&[0.0, 1.0, 3.0, 1.0, 0.0, 2.0, 0.0], &grid, 0.05);
/// assert_eq!(peaks.len(), 2);
/// assert_eq!(peaks[0].position, 2.0);
/// assert_eq!(peaks[1].position, 5.0);
/// ```
pub fn find_peaks(values: &[f64], grid: &Grid, relative_threshold: f64) -> Vec<Peak> {
    let mask = find_local_maxima_mask(values, relative_threshold);
    let indices: Vec<usize> = filter_with_mask(&(0..values.len()).collect::<Vec<_>>(), &mask);
    let step = grid.step();

    indices
        .into_iter()
        .map(|i| {
            let current = values[i];
            if i == 0 || i + 1 == values.len() {
                return Peak { position: grid.x(i), intensity: current };
            }
            let (left, right) = (values[i - 1], values[i + 1]);
            let curvature = left - 2.0 * current + right;
            if curvature >= 0.0 {
                return Peak { position: grid.x(i), intensity: current };
            }
            let offset = (0.5 * (left - right) / curvature).clamp(-0.5, 0.5);
            Peak {
                position: grid.x(i) + offset * step,
                intensity: current - 0.25 * (left - right) * offset,
            }
        })
        .collect()
}

/// Pairs peaks of two lists one-to-one, closest pairs first, within `tolerance`.
///
/// Equally close pairs are taken in order of their lower, then higher position, so
/// swapping `a` and `b` yields the mirrored pairing.
///
/// # Returns
///
/// Index pairs `(i, j)` into `a` and `b`.
pub fn match_peaks(a: &[Peak], b: &[Peak], tolerance: f64) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(f64, f64, f64, usize, usize)> = Vec::new();
    for (i, pa) in a.iter().enumerate() {
        for (j, pb) in b.iter().enumerate() {
            let distance = (pa.position - pb.position).abs();
            if distance <= tolerance {
                let lower = pa.position.min(pb.position);
                let upper = pa.position.max(pb.position);
                pairs.push((distance, lower, upper, i, j));
            }
        }
    }
    pairs.sort_by_key(|(d, lower, upper, _, _)| (OrderedFloat(*d), OrderedFloat(*lower), OrderedFloat(*upper)));

    let mut used_a = vec![false; a.len()];
    let mut used_b = vec![false; b.len()];
    let mut matched = Vec::new();

    for (_, _, _, i, j) in pairs {
        if used_a[i] || used_b[j] {
            continue;
        }
        used_a[i] = true;
        used_b[j] = true;
        matched.push((i, j));
    }
    matched
}
