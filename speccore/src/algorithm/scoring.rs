use crate::algorithm::peaks::{find_peaks, match_peaks, Peak, DEFAULT_RELATIVE_THRESHOLD};
use crate::algorithm::preprocess::l2_norm;
use crate::data::grid::Grid;
use crate::data::matches::MatchFlags;
use crate::database::Record;

/// A preprocessed query together with the features the scorers compare against.
#[derive(Clone, Debug)]
pub struct PreparedQuery {
    pub intensities: Vec<f64>,
    pub peaks: Vec<Peak>,
}

impl PreparedQuery {
    /// Wraps a vector produced by `preprocess_query` for `grid`.
    pub fn new(intensities: Vec<f64>, grid: &Grid) -> Self {
        let peaks = find_peaks(&intensities, grid, DEFAULT_RELATIVE_THRESHOLD);
        PreparedQuery { intensities, peaks }
    }

    pub fn is_zero(&self) -> bool {
        self.intensities.iter().all(|v| *v == 0.0)
    }
}

/// Similarity between a prepared query and one record.
///
/// Implementations must be deterministic, symmetric and invariant under a positive
/// rescaling of either intensity vector, and return a value in `[0, 1]`.
pub trait SpectrumScorer: Send + Sync {
    /// Flag attached to matches produced by this scorer.
    fn flag(&self) -> MatchFlags;
    fn score(&self, query: &PreparedQuery, record: &Record) -> f64;
}

/// Normalized dot product, clamped to `[0, 1]`. Zero vectors score 0.
///
/// # Example
///
/// ```rust
/// # use speccore::algorithm::scoring::cosine_similarity;
/// let a = vec![1.0, 0.0, 1.0];
/// let b = vec![3.0, 0.0, 3.0];
/// assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-12);
/// assert_eq!(cosine_similarity(&a, &[0.0, 5.0, 0.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Full-spectrum comparison.
#[derive(Clone, Copy, Debug, Default)]
pub struct CosineScorer;

impl SpectrumScorer for CosineScorer {
    fn flag(&self) -> MatchFlags {
        MatchFlags::SPECTRAL
    }

    fn score(&self, query: &PreparedQuery, record: &Record) -> f64 {
        cosine_similarity(&query.intensities, record.intensities())
    }
}

/// Compares detected peak lists instead of full vectors.
#[derive(Clone, Copy, Debug)]
pub struct PeakScorer {
    /// Largest position difference, in x units, for two peaks to be paired.
    pub tolerance: f64,
}

impl PeakScorer {
    pub fn new(tolerance: f64) -> Self {
        PeakScorer { tolerance }
    }
}

impl SpectrumScorer for PeakScorer {
    fn flag(&self) -> MatchFlags {
        MatchFlags::PEAK
    }

    fn score(&self, query: &PreparedQuery, record: &Record) -> f64 {
        peak_similarity(&query.peaks, record.peaks(), self.tolerance)
    }
}

/// Cosine of the paired peak heights over the norms of all peak heights of each list.
pub fn peak_similarity(a: &[Peak], b: &[Peak], tolerance: f64) -> f64 {
    let norm_a = a.iter().map(|p| p.intensity * p.intensity).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|p| p.intensity * p.intensity).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = match_peaks(a, b, tolerance)
        .into_iter()
        .map(|(i, j)| a[i].intensity * b[j].intensity)
        .sum();
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(position: f64, intensity: f64) -> Peak {
        Peak { position, intensity }
    }

    #[test]
    fn test_cosine_symmetric_and_scale_invariant() {
        let a = vec![0.1, 0.5, 0.9, 0.2];
        let b = vec![0.3, 0.1, 0.8, 0.6];
        let scaled: Vec<f64> = b.iter().map(|v| v * 250.0).collect();
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-15);
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&a, &scaled)).abs() < 1e-12);
    }

    #[test]
    fn test_peak_similarity() {
        let a = vec![peak(100.0, 1.0), peak(200.0, 0.5)];
        let b = vec![peak(101.0, 2.0), peak(200.5, 1.0)];
        assert!((peak_similarity(&a, &b, 2.0) - 1.0).abs() < 1e-12);
        assert!((peak_similarity(&a, &b, 2.0) - peak_similarity(&b, &a, 2.0)).abs() < 1e-15);
        // nothing within tolerance
        assert_eq!(peak_similarity(&a, &b, 0.1), 0.0);
        assert_eq!(peak_similarity(&a, &[], 2.0), 0.0);
    }
}
