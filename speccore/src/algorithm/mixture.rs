use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algorithm::scoring::cosine_similarity;
use crate::error::SpectrumError;

/// Residual energy, relative to the query, below which the query counts as fully explained.
const EXPLAINED_ENERGY_FRACTION: f64 = 1e-9;

/// Singular values below this are treated as zero when the Gram matrix is not positive definite.
const SVD_EPSILON: f64 = 1e-12;

/// Configuration for mixture decomposition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixtureConfig {
    /// Maximum number of components in a solution (default: 4)
    pub max_components: usize,
    /// Minimum relative reduction of residual energy for a component to be kept (default: 1e-3)
    pub min_improvement: f64,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        MixtureConfig {
            max_components: 4,
            min_improvement: 1e-3,
        }
    }
}

/// A reference spectrum the decomposer may select, on the same grid as the query.
#[derive(Clone, Copy, Debug)]
pub struct MixtureCandidate<'a> {
    /// Scan position of the record; ties between equally good candidates go to the lowest.
    pub ordinal: usize,
    pub spectrum: &'a [f64],
}

#[derive(Clone, Debug, PartialEq)]
pub struct MixtureComponent {
    pub ordinal: usize,
    /// Non-negative least-squares coefficient.
    pub coefficient: f64,
    /// Share of the summed coefficients, from 0 to 1.
    pub weight: f64,
}

/// Result of a decomposition.
#[derive(Clone, Debug)]
pub struct MixtureSolution {
    pub components: Vec<MixtureComponent>,
    pub reconstruction: Vec<f64>,
    pub residual: Vec<f64>,
    /// Residual energy over query energy.
    pub residual_fraction: f64,
    /// Cosine similarity between query and reconstruction.
    pub composite_score: f64,
    /// True if the decomposition stopped on a cancellation request.
    pub cancelled: bool,
}

impl MixtureSolution {
    fn unexplained(query: &[f64], cancelled: bool) -> Self {
        MixtureSolution {
            components: Vec::new(),
            reconstruction: vec![0.0; query.len()],
            residual: query.to_vec(),
            residual_fraction: 1.0,
            composite_score: 0.0,
            cancelled,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Greedy residual fitting with a joint non-negative refit after every addition.
#[derive(Clone, Debug, Default)]
pub struct MixtureDecomposer {
    config: MixtureConfig,
}

impl MixtureDecomposer {
    pub fn new(config: MixtureConfig) -> Self {
        MixtureDecomposer { config }
    }

    /// Explains `query` as a non-negative combination of `candidates`.
    ///
    /// # Arguments
    ///
    /// * `query` - preprocessed query intensities
    /// * `candidates` - spectra on the same grid as the query
    /// * `is_cancelled` - polled before every iteration
    /// * `on_iteration` - called with the number of completed iterations and the iteration limit
    ///
    pub fn decompose<C, P>(
        &self,
        query: &[f64],
        candidates: &[MixtureCandidate<'_>],
        is_cancelled: C,
        mut on_iteration: P,
    ) -> Result<MixtureSolution, SpectrumError>
    where
        C: Fn() -> bool,
        P: FnMut(usize, usize),
    {
        let query_energy = dot(query, query);
        if query_energy <= 0.0 || candidates.is_empty() || self.config.max_components == 0 {
            return Ok(MixtureSolution::unexplained(query, false));
        }

        let energies: Vec<f64> = candidates.iter().map(|c| dot(c.spectrum, c.spectrum)).collect();
        let max_iterations = self.config.max_components;

        let mut selected: Vec<usize> = Vec::new();
        let mut coefficients: Vec<f64> = Vec::new();
        let mut residual = query.to_vec();
        let mut energy = query_energy;
        let mut cancelled = false;

        for iteration in 0..max_iterations {
            if is_cancelled() {
                cancelled = true;
                break;
            }

            let Some((best, gain)) = self.best_addition(&residual, candidates, &energies, &selected) else {
                break;
            };
            if gain / query_energy < self.config.min_improvement {
                break;
            }

            let mut trial = selected.clone();
            trial.push(best);
            let trial_coefficients = nnls_refit(query, candidates, &trial)?;
            let (trial, trial_coefficients): (Vec<usize>, Vec<f64>) = trial
                .into_iter()
                .zip(trial_coefficients)
                .filter(|(_, c)| *c > 0.0)
                .unzip();

            let trial_residual = residual_of(query, candidates, &trial, &trial_coefficients);
            let trial_energy = dot(&trial_residual, &trial_residual);

            if (energy - trial_energy) / query_energy < self.config.min_improvement {
                break;
            }

            debug!(
                "mixture iteration {}: added candidate {}, residual fraction {:.6}",
                iteration + 1,
                candidates[best].ordinal,
                trial_energy / query_energy
            );

            selected = trial;
            coefficients = trial_coefficients;
            residual = trial_residual;
            energy = trial_energy;
            on_iteration(iteration + 1, max_iterations);

            if energy / query_energy < EXPLAINED_ENERGY_FRACTION {
                break;
            }
        }

        if selected.is_empty() {
            return Ok(MixtureSolution::unexplained(query, cancelled));
        }

        let total: f64 = coefficients.iter().sum();
        let components = selected
            .iter()
            .zip(coefficients.iter())
            .map(|(&index, &coefficient)| MixtureComponent {
                ordinal: candidates[index].ordinal,
                coefficient,
                weight: coefficient / total,
            })
            .collect();

        let reconstruction: Vec<f64> = query.iter().zip(residual.iter()).map(|(q, r)| q - r).collect();
        let composite_score = cosine_similarity(query, &reconstruction);

        Ok(MixtureSolution {
            components,
            reconstruction,
            residual,
            residual_fraction: (energy / query_energy).clamp(0.0, 1.0),
            composite_score,
            cancelled,
        })
    }

    /// Candidate whose non-negative single addition removes the most residual energy.
    fn best_addition(
        &self,
        residual: &[f64],
        candidates: &[MixtureCandidate<'_>],
        energies: &[f64],
        selected: &[usize],
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            if selected.contains(&index) || energies[index] <= 0.0 {
                continue;
            }
            let projection = dot(residual, candidate.spectrum);
            if projection <= 0.0 {
                continue;
            }
            let gain = projection * projection / energies[index];
            let better = match best {
                None => true,
                Some((current, current_gain)) => {
                    gain > current_gain
                        || (gain == current_gain && candidate.ordinal < candidates[current].ordinal)
                }
            };
            if better {
                best = Some((index, gain));
            }
        }
        best
    }
}

/// Non-negative least squares on the selected candidates via the normal equations.
///
/// Solves the unconstrained problem, drops the most negative coefficient and solves again
/// until all remaining coefficients are non-negative. Dropped candidates get 0.
fn nnls_refit(
    query: &[f64],
    candidates: &[MixtureCandidate<'_>],
    selected: &[usize],
) -> Result<Vec<f64>, SpectrumError> {
    let n = selected.len();
    let gram = DMatrix::from_fn(n, n, |i, j| dot(candidates[selected[i]].spectrum, candidates[selected[j]].spectrum));
    let rhs = DVector::from_fn(n, |i, _| dot(candidates[selected[i]].spectrum, query));

    let mut active: Vec<usize> = (0..n).collect();
    let mut coefficients = vec![0.0; n];

    while !active.is_empty() {
        let sub_gram = DMatrix::from_fn(active.len(), active.len(), |i, j| gram[(active[i], active[j])]);
        let sub_rhs = DVector::from_fn(active.len(), |i, _| rhs[active[i]]);

        let solution = match sub_gram.clone().cholesky() {
            Some(cholesky) => cholesky.solve(&sub_rhs),
            None => sub_gram
                .svd(true, true)
                .solve(&sub_rhs, SVD_EPSILON)
                .map_err(|e| SpectrumError::Numerical(e.to_string()))?,
        };

        let most_negative = solution
            .iter()
            .enumerate()
            .filter(|(_, v)| **v < 0.0)
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);

        match most_negative {
            Some(position) => {
                active.remove(position);
            }
            None => {
                for (position, &index) in active.iter().enumerate() {
                    coefficients[index] = solution[position];
                }
                return Ok(coefficients);
            }
        }
    }
    Ok(coefficients)
}

fn residual_of(
    query: &[f64],
    candidates: &[MixtureCandidate<'_>],
    selected: &[usize],
    coefficients: &[f64],
) -> Vec<f64> {
    let mut residual = query.to_vec();
    for (&index, &coefficient) in selected.iter().zip(coefficients.iter()) {
        for (r, a) in residual.iter_mut().zip(candidates[index].spectrum.iter()) {
            *r -= coefficient * a;
        }
    }
    residual
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(center: usize, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let d = i as f64 - center as f64;
                (-d * d / 8.0).exp()
            })
            .collect()
    }

    fn unit(v: Vec<f64>) -> Vec<f64> {
        let norm = dot(&v, &v).sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    #[test]
    fn test_recovers_two_component_mixture() {
        let a = unit(band(20, 100));
        let b = unit(band(60, 100));
        let c = unit(band(85, 100));
        let query: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| 0.6 * x + 0.4 * y).collect();
        let candidates = vec![
            MixtureCandidate { ordinal: 0, spectrum: &a },
            MixtureCandidate { ordinal: 1, spectrum: &b },
            MixtureCandidate { ordinal: 2, spectrum: &c },
        ];

        let mut iterations = 0;
        let solution = MixtureDecomposer::default()
            .decompose(&query, &candidates, || false, |done, _| iterations = done)
            .unwrap();

        assert_eq!(solution.components.len(), 2);
        assert_eq!(iterations, 2);
        let a_weight = solution.components.iter().find(|c| c.ordinal == 0).unwrap().weight;
        let b_weight = solution.components.iter().find(|c| c.ordinal == 1).unwrap().weight;
        assert!((a_weight - 0.6).abs() < 1e-6);
        assert!((b_weight - 0.4).abs() < 1e-6);
        assert!(solution.residual_fraction < 1e-9);
        assert!((solution.composite_score - 1.0).abs() < 1e-9);
        assert!(!solution.cancelled);
    }

    #[test]
    fn test_ties_go_to_lowest_ordinal() {
        let a = unit(band(30, 80));
        let candidates = vec![
            MixtureCandidate { ordinal: 5, spectrum: &a },
            MixtureCandidate { ordinal: 2, spectrum: &a },
        ];
        let solution = MixtureDecomposer::default()
            .decompose(&a, &candidates, || false, |_, _| {})
            .unwrap();
        assert_eq!(solution.components.len(), 1);
        assert_eq!(solution.components[0].ordinal, 2);
        assert!((solution.components[0].weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cancelled_before_first_iteration() {
        let a = unit(band(30, 80));
        let candidates = vec![MixtureCandidate { ordinal: 0, spectrum: &a }];
        let solution = MixtureDecomposer::default()
            .decompose(&a, &candidates, || true, |_, _| {})
            .unwrap();
        assert!(solution.cancelled);
        assert!(solution.is_empty());
        assert_eq!(solution.residual_fraction, 1.0);
    }

    #[test]
    fn test_zero_query_is_unexplained() {
        let a = unit(band(30, 80));
        let zero = vec![0.0; 80];
        let candidates = vec![MixtureCandidate { ordinal: 0, spectrum: &a }];
        let solution = MixtureDecomposer::default()
            .decompose(&zero, &candidates, || false, |_, _| {})
            .unwrap();
        assert!(solution.is_empty());
        assert!(!solution.cancelled);
    }
}
