use std::collections::HashMap;
use std::ptr;
use std::slice;
use parking_lot::Mutex;

use speccore::data::matches::ResultSet;

/// One result row as seen by C callers.
///
/// `match_name` points to a null-terminated UTF-16 string owned by the session; it stays
/// valid until the session is closed. Rows are byte packed (17 bytes on 64-bit targets).
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct SearchSdkMatch {
    pub match_percentage: f64,
    pub match_name: *const u16,
    pub locked: bool,
}

impl Default for SearchSdkMatch {
    fn default() -> Self {
        SearchSdkMatch { match_percentage: 0.0, match_name: ptr::null(), locked: false }
    }
}

/// Null-terminated UTF-16 names handed out per session.
#[derive(Default)]
pub struct NameArena {
    sessions: Mutex<HashMap<u64, Vec<Box<[u16]>>>>,
}

impl NameArena {
    /// Fills `out` with the first `out.len()` matches. The names join those of earlier runs
    /// on `session` and are freed by [`NameArena::release`].
    ///
    /// Returns the number of rows written.
    pub fn fill(&self, session: u64, results: &ResultSet, out: &mut [SearchSdkMatch]) -> usize {
        let names: Vec<Box<[u16]>> = results
            .iter()
            .take(out.len())
            .map(|m| m.name.encode_utf16().chain(std::iter::once(0)).collect::<Vec<u16>>().into_boxed_slice())
            .collect();

        for ((row, m), name) in out.iter_mut().zip(results.iter()).zip(names.iter()) {
            *row = SearchSdkMatch { match_percentage: m.percentage(), match_name: name.as_ptr(), locked: m.is_locked() };
        }

        let written = names.len();
        // boxed slices keep their address when the vector grows
        self.sessions.lock().entry(session).or_default().extend(names);
        written
    }

    /// True if `name` is one of the strings handed out for `session`.
    pub fn owns(&self, session: u64, name: *const u16) -> bool {
        self.sessions
            .lock()
            .get(&session)
            .is_some_and(|names| names.iter().any(|n| ptr::eq(n.as_ptr(), name)))
    }

    /// Number of sessions currently holding names.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn release(&self, session: u64) {
        self.sessions.lock().remove(&session);
    }

    pub fn clear(&self) {
        self.sessions.lock().clear();
    }
}

/// Moves an encoded block to the caller. Free it with [`searchsdk_free_buffer`].
pub(crate) fn into_raw_buffer(bytes: Vec<u8>, out_len: &mut usize) -> *mut u8 {
    let boxed = bytes.into_boxed_slice();
    *out_len = boxed.len();
    Box::into_raw(boxed) as *mut u8
}

/// Releases a buffer returned by `searchsdk_encode_results`.
#[no_mangle]
pub extern "C" fn searchsdk_free_buffer(buffer: *mut u8, len: usize) {
    if buffer.is_null() {
        return;
    }
    unsafe {
        let _ = Box::from_raw(slice::from_raw_parts_mut(buffer, len));
    }
}
