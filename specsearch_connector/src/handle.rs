use std::ffi::CStr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::Arc;
use libc::c_char;
use parking_lot::RwLock;
use tracing::{error, info};

use speccore::data::matches::ResultSet;
use speccore::data::technique::{Technique, XUnit, YUnit};
use specsearch::data::store::load_library;
use specsearch::data::transfer::encode_results;
use specsearch::error::SearchError;
use specsearch::search::config::SearchConfig;
use specsearch::search::sdk::SearchSdk;
use specsearch::search::session::SessionHandle;

use crate::matches::{into_raw_buffer, NameArena, SearchSdkMatch};
use crate::{status_of, SEARCHSDK_INTERNAL_FAILURE, SEARCHSDK_OK};

struct Connector {
    sdk: SearchSdk,
    names: NameArena,
}

static CONNECTOR: RwLock<Option<Arc<Connector>>> = RwLock::new(None);

fn connector() -> Result<Arc<Connector>, SearchError> {
    CONNECTOR
        .read()
        .clone()
        .ok_or_else(|| SearchError::InternalFailure("search sdk is not initialized".to_string()))
}

/// Runs `f`, mapping errors and panics to status codes.
fn guarded<F>(f: F) -> i32
where
    F: FnOnce() -> Result<(), SearchError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => SEARCHSDK_OK,
        Ok(Err(e)) => status_of(&e),
        Err(_) => {
            error!("panic caught at the C boundary");
            SEARCHSDK_INTERNAL_FAILURE
        }
    }
}

fn c_path(path: *const c_char, what: &str) -> Result<Option<String>, SearchError> {
    if path.is_null() {
        return Ok(None);
    }
    let path = unsafe { CStr::from_ptr(path) }
        .to_str()
        .map_err(|_| SearchError::InvalidInput(format!("{} is not valid UTF-8", what)))?;
    Ok(Some(path.to_string()))
}

fn c_slice<'a>(data: *const f64, len: usize, what: &str) -> Result<&'a [f64], SearchError> {
    if len == 0 {
        return Ok(&[][..]);
    }
    if data.is_null() {
        return Err(SearchError::InvalidInput(format!("{} is null", what)));
    }
    Ok(unsafe { slice::from_raw_parts(data, len) })
}

fn c_rows<'a>(out: *mut SearchSdkMatch, count: *mut i32) -> Result<(&'a mut [SearchSdkMatch], &'a mut i32), SearchError> {
    if count.is_null() {
        return Err(SearchError::InvalidInput("match count is null".to_string()));
    }
    let count = unsafe { &mut *count };
    let capacity = usize::try_from(*count)
        .map_err(|_| SearchError::InvalidInput(format!("negative match capacity {}", *count)))?;
    if capacity == 0 {
        return Ok((<&mut [SearchSdkMatch]>::default(), count));
    }
    if out.is_null() {
        return Err(SearchError::InvalidInput("match buffer is null".to_string()));
    }
    Ok((unsafe { slice::from_raw_parts_mut(out, capacity) }, count))
}

/// Hands the outcome of a run to the caller. Cancelled runs still fill their partial rows.
fn deliver(
    connector: &Connector,
    handle: u64,
    outcome: Result<Arc<ResultSet>, SearchError>,
    rows: &mut [SearchSdkMatch],
    count: &mut i32,
) -> Result<(), SearchError> {
    let (results, error) = match outcome {
        Ok(results) => (results, None),
        Err(SearchError::Cancelled { partial }) => (partial.clone(), Some(SearchError::Cancelled { partial })),
        Err(e) => {
            *count = 0;
            return Err(e);
        }
    };
    let written = connector.names.fill(handle, &results, rows);
    *count = written as i32;
    if connector.sdk.results(SessionHandle::from_raw(handle)).is_err() {
        // closed while the run was in flight
        connector.names.release(handle);
        rows.iter_mut().for_each(|row| *row = SearchSdkMatch::default());
        *count = 0;
    }
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Loads the library file and starts the search sdk.
///
/// `config_path` may be null for the default configuration. Calling `init` again replaces
/// the running instance; sessions of the previous instance become invalid.
#[no_mangle]
pub extern "C" fn searchsdk_init(library_path: *const c_char, config_path: *const c_char) -> i32 {
    guarded(|| {
        let library_path = c_path(library_path, "library path")?
            .ok_or_else(|| SearchError::InvalidInput("library path is null".to_string()))?;
        let config = match c_path(config_path, "config path")? {
            Some(path) => SearchConfig::from_json_file(path)?,
            None => SearchConfig::default(),
        };
        let library = load_library(&library_path)?;
        let sdk = SearchSdk::new(Arc::new(library), config)?;
        *CONNECTOR.write() = Some(Arc::new(Connector { sdk, names: NameArena::default() }));
        info!("search sdk initialized from {}", library_path);
        Ok(())
    })
}

/// Shuts the sdk down. Running searches finish on their own threads.
#[no_mangle]
pub extern "C" fn searchsdk_exit() -> i32 {
    guarded(|| {
        if let Some(connector) = CONNECTOR.write().take() {
            connector.names.clear();
            info!("search sdk stopped");
        }
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn searchsdk_open_search(handle_out: *mut u64) -> i32 {
    guarded(|| {
        if handle_out.is_null() {
            return Err(SearchError::InvalidInput("handle output is null".to_string()));
        }
        let handle = connector()?.sdk.open();
        unsafe { *handle_out = handle.as_u64() };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn searchsdk_close_search(handle: u64) -> i32 {
    guarded(|| {
        let connector = connector()?;
        connector.sdk.close(SessionHandle::from_raw(handle))?;
        connector.names.release(handle);
        Ok(())
    })
}

/// Searches an evenly spaced spectrum.
///
/// `count` holds the capacity of `out` on entry and the number of rows written on return.
#[no_mangle]
pub extern "C" fn searchsdk_run_search_evenly_spaced(
    handle: u64,
    technique: u32,
    y: *const f64,
    len: usize,
    first_x: f64,
    last_x: f64,
    x_unit: u16,
    y_unit: u16,
    out: *mut SearchSdkMatch,
    count: *mut i32,
) -> i32 {
    guarded(|| {
        let connector = connector()?;
        let (rows, count) = c_rows(out, count)?;
        let technique = Technique::from_code(technique)?;
        let x_unit = XUnit::from_code(x_unit)?;
        let y_unit = YUnit::from_code(y_unit)?;
        let y = c_slice(y, len, "intensities")?;

        let outcome = connector.sdk.run_evenly_spaced(
            SessionHandle::from_raw(handle),
            technique,
            y,
            first_x,
            last_x,
            x_unit,
            y_unit,
            rows.len(),
        );
        deliver(&connector, handle, outcome, rows, count)
    })
}

/// Searches a spectrum with explicit x values, see [`searchsdk_run_search_evenly_spaced`].
#[no_mangle]
pub extern "C" fn searchsdk_run_search_unevenly_spaced(
    handle: u64,
    technique: u32,
    x: *const f64,
    y: *const f64,
    len: usize,
    x_unit: u16,
    y_unit: u16,
    out: *mut SearchSdkMatch,
    count: *mut i32,
) -> i32 {
    guarded(|| {
        let connector = connector()?;
        let (rows, count) = c_rows(out, count)?;
        let technique = Technique::from_code(technique)?;
        let x_unit = XUnit::from_code(x_unit)?;
        let y_unit = YUnit::from_code(y_unit)?;
        let x = c_slice(x, len, "x values")?;
        let y = c_slice(y, len, "intensities")?;

        let outcome =
            connector.sdk.run_unevenly_spaced(SessionHandle::from_raw(handle), technique, x, y, x_unit, y_unit, rows.len());
        deliver(&connector, handle, outcome, rows, count)
    })
}

#[no_mangle]
pub extern "C" fn searchsdk_cancel_search(handle: u64) -> i32 {
    guarded(|| connector()?.sdk.cancel(SessionHandle::from_raw(handle)))
}

#[no_mangle]
pub extern "C" fn searchsdk_get_progress_percentage(handle: u64, percentage: *mut f64) -> i32 {
    guarded(|| {
        if percentage.is_null() {
            return Err(SearchError::InvalidInput("progress output is null".to_string()));
        }
        let progress = connector()?.sdk.progress_percentage(SessionHandle::from_raw(handle))?;
        unsafe { *percentage = progress };
        Ok(())
    })
}

/// Encodes the latest results of a session in the transfer format.
///
/// Returns null on failure. The buffer must be released with `searchsdk_free_buffer`.
#[no_mangle]
pub extern "C" fn searchsdk_encode_results(handle: u64, out_len: *mut usize) -> *mut u8 {
    if out_len.is_null() {
        return ptr::null_mut();
    }
    let mut buffer = ptr::null_mut();
    let mut len = 0;
    let status = guarded(|| {
        let results = connector()?.sdk.results(SessionHandle::from_raw(handle))?;
        buffer = into_raw_buffer(encode_results(&results)?, &mut len);
        Ok(())
    });
    unsafe { *out_len = if status == SEARCHSDK_OK { len } else { 0 } };
    buffer
}
