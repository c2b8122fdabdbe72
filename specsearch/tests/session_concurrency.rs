use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use speccore::algorithm::scoring::{PreparedQuery, SpectrumScorer};
use speccore::data::grid::Grid;
use speccore::data::matches::{MatchFlags, ResultSet};
use speccore::data::technique::{Technique, XUnit, YUnit};
use speccore::database::{Database, LicenseTier, Record, SpectralLibrary};
use specsearch::error::{ErrorKind, SearchError};
use specsearch::search::config::SearchConfig;
use specsearch::search::engine::SearchEngine;
use specsearch::search::sdk::SearchSdk;
use specsearch::search::session::SessionHandle;

const POINTS: usize = 20;

/// Scores every record 0.9 after a short sleep, so a scan takes long enough to be observed.
struct SlowScorer;

impl SpectrumScorer for SlowScorer {
    fn flag(&self) -> MatchFlags {
        MatchFlags::SPECTRAL
    }

    fn score(&self, _query: &PreparedQuery, _record: &Record) -> f64 {
        thread::sleep(Duration::from_millis(2));
        0.9
    }
}

fn grid() -> Grid {
    Grid::new(0.0, (POINTS - 1) as f64, POINTS).unwrap()
}

fn library(records: usize) -> Arc<SpectralLibrary> {
    let mut database = Database::new("spikes", Technique::Ms, grid(), LicenseTier::Licensed);
    for i in 0..records {
        let mut values = vec![0.0; POINTS];
        values[i % POINTS] = 1.0;
        database.push_spectrum(format!("spike {}", i), &values).unwrap();
    }
    let mut library = SpectralLibrary::new();
    library.add_database(database).unwrap();
    Arc::new(library)
}

fn slow_sdk(records: usize) -> Arc<SearchSdk> {
    let config = SearchConfig { num_threads: 2, ..SearchConfig::default() };
    let engine = SearchEngine::new(library(records), config).unwrap().with_scorer(Arc::new(SlowScorer));
    Arc::new(SearchSdk::from_engine(engine))
}

fn query() -> Vec<f64> {
    let mut y = vec![0.0; POINTS];
    y[3] = 1.0;
    y[4] = 0.5;
    y
}

fn run(sdk: &SearchSdk, handle: SessionHandle) -> Result<Arc<ResultSet>, SearchError> {
    let g = grid();
    sdk.run_evenly_spaced(handle, Technique::Ms, &query(), g.first(), g.last(), XUnit::MassToCharge, YUnit::ArbitraryIntensity, 50)
}

fn wait_for_progress(sdk: &SearchSdk, handle: SessionHandle) -> f64 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let progress = sdk.progress_percentage(handle).unwrap();
        if progress > 0.0 || Instant::now() > deadline {
            return progress;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn cancel_from_another_thread_returns_partial_results() {
    let sdk = slow_sdk(4000);
    let handle = sdk.open();

    let runner = {
        let sdk = sdk.clone();
        thread::spawn(move || run(&sdk, handle))
    };

    let observed = wait_for_progress(&sdk, handle);
    assert!(observed > 0.0 && observed < 100.0);

    // a second run on the busy session is refused
    let busy = run(&sdk, handle).unwrap_err();
    assert!(matches!(busy, SearchError::SessionBusy(_)));
    assert_eq!(busy.kind(), ErrorKind::InvalidHandle);

    sdk.cancel(handle).unwrap();
    let outcome = runner.join().unwrap();

    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    let partial = err.partial_results().unwrap();
    assert!(!partial.is_empty());
    assert!(partial.len() <= 50);

    let progress = sdk.progress_percentage(handle).unwrap();
    assert!(progress >= observed && progress < 100.0);
    assert_eq!(*sdk.results(handle).unwrap(), **partial);
}

#[test]
fn session_is_reusable_after_cancellation() {
    let sdk = slow_sdk(400);
    let handle = sdk.open();

    let runner = {
        let sdk = sdk.clone();
        thread::spawn(move || run(&sdk, handle))
    };
    wait_for_progress(&sdk, handle);
    sdk.cancel(handle).unwrap();
    assert_eq!(runner.join().unwrap().unwrap_err().kind(), ErrorKind::Cancelled);

    // the next run starts with a cleared cancellation flag
    let results = run(&sdk, handle).unwrap();
    assert_eq!(results.len(), 50);
    assert_eq!(sdk.progress_percentage(handle).unwrap(), 100.0);
    assert!(results.iter().all(|m| m.flags.contains(MatchFlags::SPECTRAL)));
}

#[test]
fn closing_a_running_session_stops_it() {
    let sdk = slow_sdk(4000);
    let handle = sdk.open();

    let runner = {
        let sdk = sdk.clone();
        thread::spawn(move || run(&sdk, handle))
    };
    wait_for_progress(&sdk, handle);
    sdk.close(handle).unwrap();

    assert_eq!(runner.join().unwrap().unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(sdk.progress_percentage(handle).unwrap_err().kind(), ErrorKind::InvalidHandle);
    assert_eq!(sdk.session_count(), 0);
}

#[test]
fn sessions_run_concurrently_with_identical_results() {
    let sdk = Arc::new(SearchSdk::new(library(500), SearchConfig::default()).unwrap());

    let runners: Vec<_> = (0..4)
        .map(|_| {
            let sdk = sdk.clone();
            thread::spawn(move || {
                let handle = sdk.open();
                let results = run(&sdk, handle).unwrap();
                sdk.close(handle).unwrap();
                results
            })
        })
        .collect();

    let results: Vec<_> = runners.into_iter().map(|r| r.join().unwrap()).collect();
    for other in &results[1..] {
        assert_eq!(**other, *results[0]);
    }
    // 25 records carry the spike at index 3, 25 at index 4
    assert_eq!(results[0].len(), 50);
    assert!(results[0].get(0).unwrap().score > results[0].get(49).unwrap().score);
}
