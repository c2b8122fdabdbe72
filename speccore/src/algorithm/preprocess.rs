use std::ops::Range;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::grid::Grid;
use crate::data::spectrum::QuerySpectrum;
use crate::data::technique::{Technique, XUnit, YUnit};
use crate::error::SpectrumError;

/// Transmittance values are treated as percent when their maximum exceeds this value.
const PERCENT_TRANSMITTANCE_THRESHOLD: f64 = 1.5;

/// Lower clamp for transmittance before taking the logarithm.
const MIN_TRANSMITTANCE: f64 = 1e-6;

/// Configuration for query preprocessing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Subtract the spectrum minimum before normalization, for techniques that have a baseline (default: true)
    pub baseline_correction: bool,
    /// Laser wavelength used to convert Raman spectra given in nanometers (default: none)
    pub raman_excitation_nm: Option<f64>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        PreprocessConfig {
            baseline_correction: true,
            raman_excitation_nm: None,
        }
    }
}

/// Brings a query onto the reference grid of a technique.
///
/// The pipeline converts units into the technique's native convention, sorts the points
/// by x (dropping later duplicates), resamples linearly onto `grid` and normalizes to unit
/// L2 norm. Baseline correction only looks at grid points inside the query's x range;
/// all other grid points stay 0.
///
/// # Arguments
///
/// * `query` - validated query spectrum
/// * `technique` - technique whose conventions apply
/// * `grid` - reference grid of the technique
/// * `config` - preprocessing options
///
/// # Returns
///
/// One intensity per grid point.
pub fn preprocess_query(
    query: &QuerySpectrum,
    technique: Technique,
    grid: &Grid,
    config: &PreprocessConfig,
) -> Result<Vec<f64>, SpectrumError> {
    let x = convert_abscissa(&query.x_values(), query.x_unit, technique, config)?;
    let y = convert_ordinate(&query.intensity, query.y_unit, technique)?;

    let (x, y, dropped) = sort_and_deduplicate(&x, &y);
    if dropped > 0 {
        debug!("dropped {} query points with duplicate x values", dropped);
    }

    let mut resampled = resample_linear(&x, &y, grid);
    let covered = covered_indices(&x, grid);
    normalize_intensities(
        &mut resampled[covered],
        config.baseline_correction && technique.uses_baseline_correction(),
    );
    Ok(resampled)
}

/// Converts x values into the technique's native abscissa unit.
pub fn convert_abscissa(
    x: &[f64],
    unit: XUnit,
    technique: Technique,
    config: &PreprocessConfig,
) -> Result<Vec<f64>, SpectrumError> {
    let mismatch = || SpectrumError::UnitMismatch { unit: unit.to_string(), technique };

    match (technique, unit) {
        (Technique::Ms, XUnit::MassToCharge) => Ok(x.to_vec()),
        (Technique::Ms, _) | (_, XUnit::MassToCharge) => Err(mismatch()),
        (_, XUnit::Wavenumbers) => Ok(x.to_vec()),
        (Technique::Raman, XUnit::Nanometers) => {
            let excitation = config.raman_excitation_nm.filter(|l| *l > 0.0).ok_or_else(mismatch)?;
            x.iter()
                .map(|&l| if l > 0.0 { Ok(1e7 / excitation - 1e7 / l) } else { Err(mismatch()) })
                .collect()
        }
        (_, XUnit::Nanometers) => x
            .iter()
            .map(|&l| if l > 0.0 { Ok(1e7 / l) } else { Err(mismatch()) })
            .collect(),
    }
}

/// Converts y values into the technique's native ordinate convention.
///
/// Infrared transmittance becomes absorbance, `A = -log10(T)`; percent transmittance is
/// detected from the data range. Absorbance and arbitrary intensity are both proportional
/// to amount and are accepted as-is for every technique.
pub fn convert_ordinate(y: &[f64], unit: YUnit, technique: Technique) -> Result<Vec<f64>, SpectrumError> {
    match unit {
        YUnit::ArbitraryIntensity | YUnit::Absorbance => Ok(y.to_vec()),
        YUnit::Transmittance if technique.is_infrared() => {
            let max = y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let scale = if max > PERCENT_TRANSMITTANCE_THRESHOLD { 0.01 } else { 1.0 };
            Ok(y.iter().map(|&t| -(t * scale).max(MIN_TRANSMITTANCE).log10()).collect())
        }
        YUnit::Transmittance => Err(SpectrumError::UnitMismatch { unit: unit.to_string(), technique }),
    }
}

/// Sorts points by ascending x. When several points share an x value the first one in
/// input order is kept.
///
/// # Returns
///
/// Sorted x, matching y and the number of dropped points.
pub fn sort_and_deduplicate(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>, usize) {
    let sorted: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .map(|(&x, &y)| (x, y))
        .sorted_by(|a, b| a.0.total_cmp(&b.0))
        .dedup_by(|a, b| a.0 == b.0)
        .collect();

    let dropped = x.len() - sorted.len();
    let (x, y): (Vec<f64>, Vec<f64>) = sorted.into_iter().unzip();
    (x, y, dropped)
}

/// Linearly interpolates ascending, duplicate-free points onto `grid`.
///
/// Grid points outside the x range of the input are 0. A single input point lands on the
/// nearest grid point if it lies within half a step of the grid.
pub fn resample_linear(x: &[f64], y: &[f64], grid: &Grid) -> Vec<f64> {
    let mut resampled = vec![0.0; grid.count()];

    match x.len() {
        0 => {}
        1 => {
            if let Some(index) = grid.nearest_index(x[0]) {
                resampled[index] = y[0];
            }
        }
        n => {
            let (lo, hi) = (x[0], x[n - 1]);
            for (i, value) in resampled.iter_mut().enumerate() {
                let g = grid.x(i);
                if g < lo || g > hi {
                    continue;
                }
                let upper = x.partition_point(|&xv| xv <= g);
                *value = if upper >= n {
                    y[n - 1]
                } else {
                    let lower = upper - 1;
                    let t = (g - x[lower]) / (x[upper] - x[lower]);
                    y[lower] + (y[upper] - y[lower]) * t
                };
            }
        }
    }
    resampled
}

/// Grid indices that [`resample_linear`] fills from ascending points `x`.
pub fn covered_indices(x: &[f64], grid: &Grid) -> Range<usize> {
    match x.len() {
        0 => 0..0,
        1 => match grid.nearest_index(x[0]) {
            Some(index) => index..index + 1,
            None => 0..0,
        },
        n => {
            let (lo, hi) = (x[0], x[n - 1]);
            let start = (0..grid.count()).position(|i| grid.x(i) >= lo).unwrap_or(grid.count());
            let end = (start..grid.count()).find(|&i| grid.x(i) > hi).unwrap_or(grid.count());
            start..end
        }
    }
}

/// Optionally subtracts the minimum, then scales to unit L2 norm. A zero vector is left as is.
pub fn normalize_intensities(values: &mut [f64], baseline_correction: bool) {
    if baseline_correction {
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            values.iter_mut().for_each(|v| *v -= min);
        }
    }
    let norm = l2_norm(values);
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

pub fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
