use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use speccore::algorithm::mixture::{MixtureCandidate, MixtureDecomposer, MixtureSolution};
use speccore::algorithm::preprocess::preprocess_query;
use speccore::algorithm::scoring::{CosineScorer, PeakScorer, PreparedQuery, SpectrumScorer};
use speccore::data::grid::Grid;
use speccore::data::matches::{Match, MatchFlags, MatchTier, RankedMatch, ResultSet};
use speccore::data::spectrum::QuerySpectrum;
use speccore::data::technique::Technique;
use speccore::database::{Candidate, SearchMode, SpectralLibrary};

use crate::error::SearchError;
use crate::search::config::SearchConfig;

/// Share of the progress range taken by the record scan when a mixture step follows.
const MIXTURE_SCAN_SHARE: f64 = 80.0;

pub const RESIDUAL_NAME: &str = "Residual";

/// Cancellation and progress channel between a running search and its observers.
pub trait RunControl: Sync {
    fn is_cancelled(&self) -> bool;
    /// Reports the completed percentage of the run; lower values than reported before are ignored.
    fn report_progress(&self, percent: f64);
}

/// A run nobody observes or cancels.
pub struct Unattended;

impl RunControl for Unattended {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn report_progress(&self, _percent: f64) {}
}

/// A query resampled onto the reference grid of its technique, ready to be scored.
#[derive(Clone, Debug)]
pub struct PreparedSearch {
    pub technique: Technique,
    pub grid: Grid,
    pub mode: SearchMode,
    pub query: PreparedQuery,
}

#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub results: ResultSet,
    pub cancelled: bool,
}

#[derive(Clone, Copy, Debug)]
struct Hit {
    ordinal: usize,
    score: f64,
}

/// Scores queries against a shared spectral library on a dedicated thread pool.
pub struct SearchEngine {
    library: Arc<SpectralLibrary>,
    config: SearchConfig,
    pool: ThreadPool,
    scorer_override: Option<Arc<dyn SpectrumScorer>>,
}

impl SearchEngine {
    pub fn new(library: Arc<SpectralLibrary>, config: SearchConfig) -> Result<Self, SearchError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("specsearch-{}", i))
            .build()
            .map_err(|e| SearchError::InternalFailure(format!("thread pool: {}", e)))?;
        Ok(SearchEngine { library, config, pool, scorer_override: None })
    }

    /// Uses `scorer` for every technique instead of the mode's scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn SpectrumScorer>) -> Self {
        self.scorer_override = Some(scorer);
        self
    }

    pub fn library(&self) -> &SpectralLibrary {
        &self.library
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Validates units against the technique and resamples the query onto its grid.
    ///
    /// Fails with `InvalidInput` for unit mismatches and with `InternalFailure` when no
    /// database of the technique is loaded.
    pub fn prepare(&self, technique: Technique, query: &QuerySpectrum) -> Result<PreparedSearch, SearchError> {
        let grid = *self
            .library
            .grid(technique)
            .ok_or_else(|| SearchError::InternalFailure(format!("no database loaded for {}", technique)))?;
        let intensities = preprocess_query(query, technique, &grid, &self.config.preprocess)?;
        Ok(PreparedSearch {
            technique,
            grid,
            mode: self.library.mode(technique),
            query: PreparedQuery::new(intensities, &grid),
        })
    }

    /// Prepares and executes a search in one call.
    pub fn search(
        &self,
        technique: Technique,
        query: &QuerySpectrum,
        capacity: usize,
        control: &dyn RunControl,
    ) -> Result<SearchOutcome, SearchError> {
        let prepared = self.prepare(technique, query)?;
        self.execute(&prepared, capacity, control)
    }

    /// Scores every record of the technique and ranks the hits.
    ///
    /// # Arguments
    ///
    /// * `prepared` - query from [`SearchEngine::prepare`]
    /// * `capacity` - maximum number of matches returned
    /// * `control` - polled for cancellation once per record and per mixture iteration
    ///
    /// # Returns
    ///
    /// The ranked results and whether the run stopped early. A cancelled run keeps the
    /// matches ranked so far.
    pub fn execute(
        &self,
        prepared: &PreparedSearch,
        capacity: usize,
        control: &dyn RunControl,
    ) -> Result<SearchOutcome, SearchError> {
        let start = Instant::now();
        let candidates = self.library.candidates(prepared.technique);
        let scorer = self.scorer_for(prepared);
        let scan_share = if prepared.mode == SearchMode::Mixture { MIXTURE_SCAN_SHARE } else { 100.0 };

        info!(
            "search started: technique {}, mode {}, {} records, capacity {}",
            prepared.technique,
            prepared.mode,
            candidates.len(),
            capacity
        );

        let (hits, mut cancelled) = self.scan(&prepared.query, &candidates, scorer.as_ref(), control, scan_share);
        let record_flag = scorer.flag();

        let mut ranked = Vec::with_capacity(hits.len() + 2);
        let mut explained: HashSet<usize> = HashSet::new();

        if prepared.mode == SearchMode::Mixture && !cancelled && !hits.is_empty() {
            let solution = self.decompose(&prepared.query, &candidates, &hits, control, scan_share)?;
            cancelled |= solution.cancelled;
            explained = mixture_matches(&solution, &candidates, &hits, &mut ranked);
        }

        for hit in hits.iter().filter(|hit| !explained.contains(&hit.ordinal)) {
            let record = candidates[hit.ordinal].record;
            let mut flags = record_flag;
            if record.is_locked() {
                flags |= MatchFlags::LOCKED;
            }
            ranked.push(RankedMatch::new(MatchTier::Record, hit.ordinal, Match::new(record.name(), hit.score, flags)));
        }

        let results = ResultSet::from_ranked(ranked, capacity);
        if cancelled {
            warn!("search cancelled after {:?}, returning {} partial results", start.elapsed(), results.len());
        } else {
            control.report_progress(100.0);
            info!("search finished in {:?}: {} hits, {} results", start.elapsed(), hits.len(), results.len());
        }
        Ok(SearchOutcome { results, cancelled })
    }

    fn scorer_for(&self, prepared: &PreparedSearch) -> Arc<dyn SpectrumScorer> {
        if let Some(scorer) = &self.scorer_override {
            return scorer.clone();
        }
        match prepared.mode {
            SearchMode::Peak => {
                let tolerance = self.config.peak_tolerance.unwrap_or(2.0 * prepared.grid.step());
                Arc::new(PeakScorer::new(tolerance))
            }
            SearchMode::Spectral | SearchMode::Mixture => Arc::new(CosineScorer),
        }
    }

    /// Parallel scan over all candidates. Returns the hits above the score threshold in
    /// ordinal order, and whether the scan was cancelled.
    fn scan(
        &self,
        query: &PreparedQuery,
        candidates: &[Candidate<'_>],
        scorer: &dyn SpectrumScorer,
        control: &dyn RunControl,
        share: f64,
    ) -> (Vec<Hit>, bool) {
        let total = candidates.len().max(1) as f64;
        let done = AtomicUsize::new(0);

        let scored: Vec<Option<Hit>> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| {
                    if control.is_cancelled() {
                        return None;
                    }
                    let score = scorer.score(query, candidate.record);
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    control.report_progress(share * finished as f64 / total);
                    Some(Hit { ordinal: candidate.ordinal, score })
                })
                .collect()
        });

        let cancelled = scored.iter().any(|s| s.is_none());
        let threshold = self.config.min_match_score;
        let hits: Vec<Hit> = scored.into_iter().flatten().filter(|hit| hit.score > threshold).collect();
        debug!("scored {} of {} records, {} above {}", done.load(Ordering::Relaxed), candidates.len(), hits.len(), threshold);
        (hits, cancelled)
    }

    fn decompose(
        &self,
        query: &PreparedQuery,
        candidates: &[Candidate<'_>],
        hits: &[Hit],
        control: &dyn RunControl,
        scan_share: f64,
    ) -> Result<MixtureSolution, SearchError> {
        let mut pool: Vec<Hit> = hits.to_vec();
        pool.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.ordinal.cmp(&b.ordinal)));
        pool.truncate(self.config.mixture_candidate_pool);

        let mixture_candidates: Vec<MixtureCandidate<'_>> = pool
            .iter()
            .map(|hit| MixtureCandidate { ordinal: hit.ordinal, spectrum: candidates[hit.ordinal].record.intensities() })
            .collect();

        let decomposer = MixtureDecomposer::new(self.config.mixture.clone());
        let solution = decomposer.decompose(
            &query.intensities,
            &mixture_candidates,
            || control.is_cancelled(),
            |iteration, max_iterations| {
                let fraction = iteration as f64 / max_iterations.max(1) as f64;
                control.report_progress(scan_share + (100.0 - scan_share) * fraction);
            },
        )?;

        debug!(
            "mixture: {} components, residual fraction {:.4}, composite score {:.4}",
            solution.components.len(),
            solution.residual_fraction,
            solution.composite_score
        );
        Ok(solution)
    }
}

/// Turns a decomposition into composite, component and residual matches.
///
/// Single-component solutions are left to the plain record ranking. Returns the ordinals
/// reported as components.
fn mixture_matches(
    solution: &MixtureSolution,
    candidates: &[Candidate<'_>],
    hits: &[Hit],
    ranked: &mut Vec<RankedMatch>,
) -> HashSet<usize> {
    if solution.components.len() < 2 {
        return HashSet::new();
    }

    let mut composite_flags = MatchFlags::COMPOSITE;
    let mut names = Vec::with_capacity(solution.components.len());
    let mut explained = HashSet::with_capacity(solution.components.len());

    for component in &solution.components {
        let record = candidates[component.ordinal].record;
        let score = hits
            .iter()
            .find(|hit| hit.ordinal == component.ordinal)
            .map(|hit| hit.score)
            .unwrap_or(0.0);
        let mut flags = MatchFlags::COMPONENT;
        if record.is_locked() {
            flags |= MatchFlags::LOCKED;
            composite_flags |= MatchFlags::LOCKED;
        }
        names.push(record.name());
        explained.insert(component.ordinal);
        ranked.push(RankedMatch::new(
            MatchTier::Component,
            component.ordinal,
            Match::new(record.name(), score, flags).with_weight(component.weight),
        ));
    }

    let first_ordinal = solution.components.iter().map(|c| c.ordinal).min().unwrap_or(0);
    ranked.push(RankedMatch::new(
        MatchTier::Composite,
        first_ordinal,
        Match::new(names.join(" + "), solution.composite_score, composite_flags).with_weight(1.0),
    ));
    ranked.push(RankedMatch::new(
        MatchTier::Residual,
        first_ordinal,
        Match::new(RESIDUAL_NAME, solution.residual_fraction, MatchFlags::RESIDUAL)
            .with_weight(solution.residual_fraction),
    ));
    explained
}

#[cfg(test)]
mod tests {
    use super::*;
    use speccore::data::technique::{XUnit, YUnit};
    use speccore::database::{Database, LicenseTier};
    use speccore::synthetic::{band_spectrum, Band};

    fn library(mode: SearchMode) -> Arc<SpectralLibrary> {
        let grid = Grid::new(0.0, 99.0, 100).unwrap();
        let mut licensed = Database::new("licensed", Technique::Raman, grid, LicenseTier::Licensed);
        for (name, center) in [("alpha", 20.0), ("beta", 50.0), ("gamma", 80.0)] {
            let values = band_spectrum(&grid, &[Band { center, width: 2.0, height: 1.0 }]).unwrap();
            licensed.push_spectrum(name, &values).unwrap();
        }
        let mut unlicensed = Database::new("unlicensed", Technique::Raman, grid, LicenseTier::Unlicensed);
        let values = band_spectrum(&grid, &[Band { center: 52.0, width: 2.0, height: 1.0 }]).unwrap();
        unlicensed.push_spectrum("delta", &values).unwrap();

        let mut library = SpectralLibrary::new().with_mode(Technique::Raman, mode);
        library.add_database(licensed).unwrap();
        library.add_database(unlicensed).unwrap();
        Arc::new(library)
    }

    fn query(bands: &[Band]) -> QuerySpectrum {
        let grid = Grid::new(0.0, 99.0, 100).unwrap();
        let values = band_spectrum(&grid, bands).unwrap();
        QuerySpectrum::evenly_spaced(&values, 0.0, 99.0, XUnit::Wavenumbers, YUnit::ArbitraryIntensity).unwrap()
    }

    struct CancelAfterScan;

    impl RunControl for CancelAfterScan {
        fn is_cancelled(&self) -> bool {
            true
        }

        fn report_progress(&self, _percent: f64) {}
    }

    #[test]
    fn test_spectral_search_ranks_and_flags() {
        let engine = SearchEngine::new(library(SearchMode::Spectral), SearchConfig::default()).unwrap();
        let outcome = engine
            .search(Technique::Raman, &query(&[Band { center: 50.0, width: 2.0, height: 3.0 }]), 10, &Unattended)
            .unwrap();
        assert!(!outcome.cancelled);
        let results = outcome.results;
        assert_eq!(results.get(0).unwrap().name, "beta");
        assert!((results.get(0).unwrap().score - 1.0).abs() < 1e-9);
        assert!(results.get(0).unwrap().flags.contains(MatchFlags::SPECTRAL));

        let delta = results.iter().find(|m| m.name == "delta").unwrap();
        assert!(delta.flags.contains(MatchFlags::LOCKED));
        assert!(results.iter().all(|m| m.name != "alpha" && m.name != "gamma"));
    }

    #[test]
    fn test_capacity_limits_results() {
        let engine = SearchEngine::new(library(SearchMode::Spectral), SearchConfig::default()).unwrap();
        let outcome = engine
            .search(Technique::Raman, &query(&[Band { center: 51.0, width: 2.0, height: 1.0 }]), 1, &Unattended)
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
    }

    #[test]
    fn test_peak_mode_sets_peak_flag() {
        let engine = SearchEngine::new(library(SearchMode::Peak), SearchConfig::default()).unwrap();
        let outcome = engine
            .search(Technique::Raman, &query(&[Band { center: 80.0, width: 2.0, height: 1.0 }]), 5, &Unattended)
            .unwrap();
        let best = outcome.results.get(0).unwrap();
        assert_eq!(best.name, "gamma");
        assert!(best.flags.contains(MatchFlags::PEAK));
    }

    #[test]
    fn test_mixture_mode_reports_components() {
        let engine = SearchEngine::new(library(SearchMode::Mixture), SearchConfig::default()).unwrap();
        let bands = [Band { center: 20.0, width: 2.0, height: 1.0 }, Band { center: 80.0, width: 2.0, height: 1.0 }];
        let outcome = engine.search(Technique::Raman, &query(&bands), 10, &Unattended).unwrap();
        let results = outcome.results;

        let composite = results.iter().find(|m| m.flags.contains(MatchFlags::COMPOSITE)).unwrap();
        assert!(composite.name.contains("alpha") && composite.name.contains("gamma"));
        assert!(composite.score > 0.99);
        assert_eq!(results.get(0).unwrap().name, composite.name);

        let weights: f64 = results
            .iter()
            .filter(|m| m.flags.contains(MatchFlags::COMPONENT))
            .map(|m| m.mixture_weight)
            .sum();
        assert!((weights - 1.0).abs() < 1e-9);
        let residual = results.iter().find(|m| m.flags.contains(MatchFlags::RESIDUAL)).unwrap();
        assert!(residual.mixture_weight < 0.01);
    }

    #[test]
    fn test_cancelled_scan_reports_partial() {
        let engine = SearchEngine::new(library(SearchMode::Spectral), SearchConfig::default()).unwrap();
        let outcome = engine
            .search(Technique::Raman, &query(&[Band { center: 50.0, width: 2.0, height: 1.0 }]), 10, &CancelAfterScan)
            .unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn test_missing_technique_is_internal_failure() {
        let engine = SearchEngine::new(library(SearchMode::Spectral), SearchConfig::default()).unwrap();
        let ms = QuerySpectrum::evenly_spaced(&[1.0, 2.0], 10.0, 11.0, XUnit::MassToCharge, YUnit::ArbitraryIntensity)
            .unwrap();
        assert!(matches!(engine.search(Technique::Ms, &ms, 5, &Unattended), Err(SearchError::InternalFailure(_))));
    }

    #[test]
    fn test_unit_mismatch_is_invalid_input() {
        let engine = SearchEngine::new(library(SearchMode::Spectral), SearchConfig::default()).unwrap();
        let mz = QuerySpectrum::evenly_spaced(&[1.0, 2.0], 10.0, 11.0, XUnit::MassToCharge, YUnit::ArbitraryIntensity)
            .unwrap();
        assert!(matches!(engine.prepare(Technique::Raman, &mz), Err(SearchError::InvalidInput(_))));
    }
}
