use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use speccore::data::matches::ResultSet;

use crate::error::SearchError;
use crate::search::engine::RunControl;

/// Opaque identifier of an open search session. Zero is never issued.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn from_raw(raw: u64) -> Self {
        SessionHandle(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SessionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLING: u8 = 2;

/// Per-session state shared between the thread running a search and threads that
/// cancel it, poll its progress or read its results.
///
/// The run state moves IDLE -> RUNNING -> CANCELLING -> IDLE through single atomic
/// transitions, so a cancellation accepted for a run is seen by that run and no other.
/// Progress is stored as the bit pattern of a non-negative `f64`; for such values the
/// unsigned bit order equals the numeric order, so `fetch_max` keeps progress monotone.
#[derive(Debug)]
pub struct SearchSession {
    handle: SessionHandle,
    state: AtomicU8,
    progress_bits: AtomicU64,
    results: Mutex<Arc<ResultSet>>,
}

impl SearchSession {
    pub fn new(handle: SessionHandle) -> Self {
        SearchSession {
            handle,
            state: AtomicU8::new(IDLE),
            progress_bits: AtomicU64::new(0.0f64.to_bits()),
            results: Mutex::new(Arc::new(ResultSet::empty())),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    /// Percentage of the current or last run, in [0, 100].
    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Acquire))
    }

    /// Asks a running search to stop. Returns false when nothing is running.
    pub fn request_cancel(&self) -> bool {
        match self.state.compare_exchange(RUNNING, CANCELLING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => true,
            Err(current) => current == CANCELLING,
        }
    }

    /// Results of the most recent run, empty before the first run.
    pub fn results(&self) -> Arc<ResultSet> {
        self.results.lock().clone()
    }

    /// Marks the session as running and resets progress.
    ///
    /// The run ends when the returned guard is dropped.
    pub fn begin_run(&self) -> Result<RunGuard<'_>, SearchError> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SearchError::SessionBusy(self.handle))?;
        self.progress_bits.store(0.0f64.to_bits(), Ordering::Release);
        Ok(RunGuard { session: self })
    }

    fn store_results(&self, results: Arc<ResultSet>) {
        *self.results.lock() = results;
    }
}

/// Exclusive right to run a search on a session.
pub struct RunGuard<'a> {
    session: &'a SearchSession,
}

impl RunGuard<'_> {
    pub fn publish(&self, results: Arc<ResultSet>) {
        self.session.store_results(results);
    }
}

impl RunControl for RunGuard<'_> {
    fn is_cancelled(&self) -> bool {
        self.session.state.load(Ordering::Acquire) == CANCELLING
    }

    fn report_progress(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        self.session.progress_bits.fetch_max(percent.to_bits(), Ordering::AcqRel);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.session.state.store(IDLE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_run_at_a_time() {
        let session = SearchSession::new(SessionHandle::from_raw(1));
        let guard = session.begin_run().unwrap();
        assert!(session.is_running());
        assert!(matches!(session.begin_run(), Err(SearchError::SessionBusy(_))));
        drop(guard);
        assert!(!session.is_running());
        assert!(session.begin_run().is_ok());
    }

    #[test]
    fn test_progress_is_monotone_and_reset() {
        let session = SearchSession::new(SessionHandle::from_raw(1));
        {
            let guard = session.begin_run().unwrap();
            guard.report_progress(40.0);
            guard.report_progress(25.0);
            assert_eq!(session.progress(), 40.0);
            guard.report_progress(250.0);
            assert_eq!(session.progress(), 100.0);
        }
        assert_eq!(session.progress(), 100.0);
        let _guard = session.begin_run().unwrap();
        assert_eq!(session.progress(), 0.0);
    }

    #[test]
    fn test_cancel_only_reaches_running_search() {
        let session = SearchSession::new(SessionHandle::from_raw(1));
        assert!(!session.request_cancel());
        let guard = session.begin_run().unwrap();
        assert!(!guard.is_cancelled());
        assert!(session.request_cancel());
        assert!(guard.is_cancelled());
        drop(guard);

        let guard = session.begin_run().unwrap();
        assert!(!guard.is_cancelled());
    }

    #[test]
    fn test_cancel_racing_run_start_is_never_lost() {
        for _ in 0..200 {
            let session = Arc::new(SearchSession::new(SessionHandle::from_raw(1)));
            let canceller = {
                let session = session.clone();
                std::thread::spawn(move || loop {
                    if session.request_cancel() {
                        return;
                    }
                    std::hint::spin_loop();
                })
            };
            let guard = session.begin_run().unwrap();
            canceller.join().unwrap();
            // accepted while this run was active, so this run must observe it
            assert!(guard.is_cancelled());
            assert!(session.request_cancel());
            drop(guard);

            assert!(!session.request_cancel());
            let next = session.begin_run().unwrap();
            assert!(!next.is_cancelled());
        }
    }
}
