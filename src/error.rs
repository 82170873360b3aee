//! Error taxonomy for the bridge, plus the thread-local last-error slot
//! used by the C ABI exports.
//!
//! Rust callers get a [`Result`] from every operation. The `pycall_*`
//! exports flatten that into a sentinel return value and store the
//! message here; retrieve it with `pycall_last_error()`.
//!
//! **Ownership rules:**
//! - `pycall_last_error()` returns a pointer owned by TLS. Do NOT free it.

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading libpython or talking to it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("libpython not found (searched {} candidates)", searched.len())]
    LibraryNotFound { searched: Vec<PathBuf> },

    #[error("missing symbol in libpython: {0}")]
    MissingSymbol(&'static str),

    #[error("integer does not fit in a host word")]
    Overflow,

    #[error("{type_name}: {message}")]
    Foreign { type_name: String, message: String },

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("python discovery failed: {0}")]
    Discovery(String),

    #[error("pycall not initialized. Call pycall_init() first.")]
    NotInitialized,

    #[error("invalid handle: {0}")]
    InvalidHandle(isize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("string contains an interior nul byte: {0}")]
    NulByte(#[from] std::ffi::NulError),
}

impl Error {
    /// True if this is a foreign exception whose class is named `type_name`.
    pub fn is_foreign(&self, type_name: &str) -> bool {
        matches!(self, Error::Foreign { type_name: t, .. } if t == type_name)
    }

    pub(crate) fn conversion(msg: impl Into<String>) -> Self {
        Error::Conversion(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ==================== C ABI last-error slot ====================

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message in thread-local storage.
pub fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into();
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the thread-local error.
pub fn clear_last_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Copy of the last error message, if any.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|s| s.to_string_lossy().into_owned())
    })
}

/// Get a pointer to the last error message, or null if none.
///
/// The returned pointer is valid until the next `pycall_*` call.
/// Do NOT free this pointer.
#[no_mangle]
pub extern "C" fn pycall_last_error() -> *const c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |s| s.as_ptr())
    })
}

/// Clear the last error message.
#[no_mangle]
pub extern "C" fn pycall_last_error_clear() {
    clear_last_error();
}
