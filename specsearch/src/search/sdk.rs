use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use tracing::{debug, info};

use speccore::data::matches::ResultSet;
use speccore::data::spectrum::QuerySpectrum;
use speccore::data::technique::{Technique, XUnit, YUnit};
use speccore::database::SpectralLibrary;

use crate::data::transfer::{TransferLedger, TransferTicket};
use crate::error::SearchError;
use crate::search::config::SearchConfig;
use crate::search::engine::SearchEngine;
use crate::search::session::{SearchSession, SessionHandle};

/// Open sessions by handle. Handles are never reused within a process.
pub struct SessionRegistry {
    next_handle: AtomicU64,
    sessions: RwLock<HashMap<SessionHandle, Arc<SearchSession>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry { next_handle: AtomicU64::new(1), sessions: RwLock::new(HashMap::new()) }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    pub fn open(&self) -> SessionHandle {
        let handle = SessionHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.sessions.write().insert(handle, Arc::new(SearchSession::new(handle)));
        handle
    }

    pub fn get(&self, handle: SessionHandle) -> Result<Arc<SearchSession>, SearchError> {
        self.sessions.read().get(&handle).cloned().ok_or(SearchError::InvalidHandle(handle))
    }

    pub fn remove(&self, handle: SessionHandle) -> Result<Arc<SearchSession>, SearchError> {
        self.sessions.write().remove(&handle).ok_or(SearchError::InvalidHandle(handle))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Session-oriented search API over one shared library.
///
/// Every method may be called from any thread. Different sessions run concurrently;
/// a single session runs one search at a time.
///
/// # Example
///
/// ```rust
/// # use std::sync::Arc;
/// # use speccore::data::technique::{Technique, XUnit, YUnit};
/// # use speccore::database::{LicenseTier, SpectralLibrary};
/// # use speccore::synthetic::synthetic_database;
/// # use specsearch::search::config::SearchConfig;
/// # use specsearch::search::sdk::SearchSdk;
/// let mut library = SpectralLibrary::new();
/// let database = synthetic_database("demo", Technique::Ftir, LicenseTier::Licensed, 10, 42).unwrap();
/// let query: Vec<f64> = database.records()[3].intensities().to_vec();
/// let grid = *database.grid();
/// library.add_database(database).unwrap();
///
/// let sdk = SearchSdk::new(Arc::new(library), SearchConfig::default()).unwrap();
/// let handle = sdk.open();
/// let results = sdk
///     .run_evenly_spaced(handle, Technique::Ftir, &query, grid.first(), grid.last(), XUnit::Wavenumbers, YUnit::Absorbance, 5)
///     .unwrap();
/// assert_eq!(results.get(0).unwrap().name, "demo 00003");
/// sdk.close(handle).unwrap();
/// ```
pub struct SearchSdk {
    engine: SearchEngine,
    registry: SessionRegistry,
    ledger: TransferLedger,
}

impl SearchSdk {
    pub fn new(library: Arc<SpectralLibrary>, config: SearchConfig) -> Result<Self, SearchError> {
        Ok(SearchSdk::from_engine(SearchEngine::new(library, config)?))
    }

    pub fn from_engine(engine: SearchEngine) -> Self {
        let grace = Duration::from_secs(engine.config().transfer_grace_secs);
        info!(
            "search sdk ready: {} databases, {} worker threads requested",
            engine.library().databases().len(),
            engine.config().num_threads
        );
        SearchSdk { engine, registry: SessionRegistry::new(), ledger: TransferLedger::new(grace) }
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn open(&self) -> SessionHandle {
        let handle = self.registry.open();
        debug!("opened session {}", handle);
        handle
    }

    /// Invalidates the handle. A search still running on it is asked to stop.
    pub fn close(&self, handle: SessionHandle) -> Result<(), SearchError> {
        let session = self.registry.remove(handle)?;
        if session.request_cancel() {
            debug!("closed session {} while running, cancellation requested", handle);
        } else {
            debug!("closed session {}", handle);
        }
        Ok(())
    }

    /// Searches a query whose x values are implied by the first and last value.
    ///
    /// # Arguments
    ///
    /// * `handle` - open session
    /// * `technique` - technique whose databases are searched
    /// * `y` - intensities
    /// * `first_x` - x of the first intensity
    /// * `last_x` - x of the last intensity
    /// * `x_unit` - unit of the x values
    /// * `y_unit` - convention of the intensities
    /// * `capacity` - maximum number of matches returned
    ///
    #[allow(clippy::too_many_arguments)]
    pub fn run_evenly_spaced(
        &self,
        handle: SessionHandle,
        technique: Technique,
        y: &[f64],
        first_x: f64,
        last_x: f64,
        x_unit: XUnit,
        y_unit: YUnit,
        capacity: usize,
    ) -> Result<Arc<ResultSet>, SearchError> {
        let session = self.registry.get(handle)?;
        let query = QuerySpectrum::evenly_spaced(y, first_x, last_x, x_unit, y_unit)?;
        self.run(&session, technique, &query, capacity)
    }

    /// Searches a query with explicit, possibly unordered, x values.
    #[allow(clippy::too_many_arguments)]
    pub fn run_unevenly_spaced(
        &self,
        handle: SessionHandle,
        technique: Technique,
        x: &[f64],
        y: &[f64],
        x_unit: XUnit,
        y_unit: YUnit,
        capacity: usize,
    ) -> Result<Arc<ResultSet>, SearchError> {
        let session = self.registry.get(handle)?;
        let query = QuerySpectrum::unevenly_spaced(x, y, x_unit, y_unit)?;
        self.run(&session, technique, &query, capacity)
    }

    /// Runs a validated query on an open session.
    pub fn run_query(
        &self,
        handle: SessionHandle,
        technique: Technique,
        query: &QuerySpectrum,
        capacity: usize,
    ) -> Result<Arc<ResultSet>, SearchError> {
        let session = self.registry.get(handle)?;
        self.run(&session, technique, query, capacity)
    }

    fn run(
        &self,
        session: &SearchSession,
        technique: Technique,
        query: &QuerySpectrum,
        capacity: usize,
    ) -> Result<Arc<ResultSet>, SearchError> {
        let prepared = self.engine.prepare(technique, query)?;
        let guard = session.begin_run()?;

        match self.engine.execute(&prepared, capacity, &guard) {
            Ok(outcome) => {
                let results = Arc::new(outcome.results);
                guard.publish(results.clone());
                if outcome.cancelled {
                    Err(SearchError::Cancelled { partial: results })
                } else {
                    Ok(results)
                }
            }
            Err(e) => {
                guard.publish(Arc::new(ResultSet::empty()));
                Err(e)
            }
        }
    }

    /// Requests cancellation of the running search. A no-op when the session is idle.
    pub fn cancel(&self, handle: SessionHandle) -> Result<(), SearchError> {
        let session = self.registry.get(handle)?;
        if session.request_cancel() {
            debug!("cancellation requested for session {}", handle);
        }
        Ok(())
    }

    pub fn progress_percentage(&self, handle: SessionHandle) -> Result<f64, SearchError> {
        Ok(self.registry.get(handle)?.progress())
    }

    /// Results of the session's most recent run.
    pub fn results(&self, handle: SessionHandle) -> Result<Arc<ResultSet>, SearchError> {
        Ok(self.registry.get(handle)?.results())
    }

    /// Encodes the session's latest results into a transfer block kept until acknowledged.
    /// Blocks older than the grace period are released first.
    pub fn publish_results(&self, handle: SessionHandle) -> Result<TransferTicket, SearchError> {
        let results = self.results(handle)?;
        self.ledger.release_expired(Instant::now());
        self.ledger.publish(&results)
    }

    pub fn transfers(&self) -> &TransferLedger {
        &self.ledger
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speccore::data::grid::Grid;
    use speccore::database::{Database, LicenseTier};
    use crate::data::transfer::decode_results;
    use crate::error::ErrorKind;

    fn sdk() -> (SearchSdk, Grid) {
        let grid = Grid::new(0.0, 49.0, 50).unwrap();
        let mut database = Database::new("mini", Technique::Ms, grid, LicenseTier::Licensed);
        let mut a = vec![0.0; 50];
        a[10] = 1.0;
        a[30] = 0.5;
        let mut b = vec![0.0; 50];
        b[20] = 1.0;
        database.push_spectrum("a", &a).unwrap();
        database.push_spectrum("b", &b).unwrap();
        let mut library = SpectralLibrary::new();
        library.add_database(database).unwrap();
        (SearchSdk::new(Arc::new(library), SearchConfig::default()).unwrap(), grid)
    }

    #[test]
    fn test_handles_are_unique_and_closable() {
        let (sdk, _) = sdk();
        let first = sdk.open();
        let second = sdk.open();
        assert_ne!(first, second);
        assert_eq!(sdk.session_count(), 2);

        sdk.close(first).unwrap();
        assert_eq!(sdk.close(first).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(sdk.progress_percentage(first).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(sdk.cancel(first).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert!(sdk.results(second).unwrap().is_empty());
    }

    #[test]
    fn test_run_replaces_results_and_completes_progress() {
        let (sdk, grid) = sdk();
        let handle = sdk.open();
        let mut y = vec![0.0; 50];
        y[10] = 2.0;
        y[30] = 1.0;
        let results = sdk
            .run_evenly_spaced(handle, Technique::Ms, &y, grid.first(), grid.last(), XUnit::MassToCharge, YUnit::ArbitraryIntensity, 5)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.get(0).unwrap().name, "a");
        assert_eq!(sdk.progress_percentage(handle).unwrap(), 100.0);
        assert_eq!(*sdk.results(handle).unwrap(), *results);

        y = vec![0.0; 50];
        y[20] = 1.0;
        sdk.run_evenly_spaced(handle, Technique::Ms, &y, grid.first(), grid.last(), XUnit::MassToCharge, YUnit::ArbitraryIntensity, 5)
            .unwrap();
        assert_eq!(sdk.results(handle).unwrap().get(0).unwrap().name, "b");
    }

    #[test]
    fn test_invalid_input_leaves_session_untouched() {
        let (sdk, _) = sdk();
        let handle = sdk.open();
        let err = sdk
            .run_unevenly_spaced(handle, Technique::Ms, &[1.0, 2.0], &[1.0], XUnit::MassToCharge, YUnit::Absorbance, 5)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = sdk
            .run_evenly_spaced(handle, Technique::Ms, &[], 1.0, 2.0, XUnit::MassToCharge, YUnit::Absorbance, 5)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(sdk.progress_percentage(handle).unwrap(), 0.0);
        assert!(!sdk.registry.get(handle).unwrap().is_running());
    }

    #[test]
    fn test_cancel_idle_session_is_noop() {
        let (sdk, _) = sdk();
        let handle = sdk.open();
        assert!(sdk.cancel(handle).is_ok());
        assert_eq!(sdk.progress_percentage(handle).unwrap(), 0.0);
    }

    #[test]
    fn test_published_results_decode() {
        let (sdk, grid) = sdk();
        let handle = sdk.open();
        let mut y = vec![0.0; 50];
        y[20] = 1.0;
        let results = sdk
            .run_evenly_spaced(handle, Technique::Ms, &y, grid.first(), grid.last(), XUnit::MassToCharge, YUnit::ArbitraryIntensity, 5)
            .unwrap();
        let ticket = sdk.publish_results(handle).unwrap();
        let bytes = sdk.transfers().block(ticket.id).unwrap();
        assert_eq!(bytes.len(), ticket.byte_len);
        assert_eq!(decode_results(&bytes).unwrap(), *results);
        assert!(sdk.transfers().acknowledge(ticket.id));
    }
}
