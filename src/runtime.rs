//! The process-wide libpython binding.
//!
//! [`Runtime`] owns the loaded library, its ABI profile and symbol table.
//! There is exactly one per process: [`Runtime::load`] runs discovery,
//! loading and interpreter start-up once and hands back the same
//! `&'static Runtime` on every later call.
//!
//! Locking: the bridge performs none of its own. Python requires the GIL
//! for nearly every call; take it with [`Runtime::with_gil`] or
//! [`Runtime::gil`]. Dropping a [`PyRef`] takes it on its own.

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr;

use libc::c_int;
use libloading::Library;
use once_cell::sync::OnceCell;

use crate::abi::AbiProfile;
use crate::config::Config;
use crate::convert;
use crate::discovery::{self, PythonConfig};
use crate::error::{Error, Result};
use crate::libpython::{Functions, Globals, PY_EVAL_INPUT, PY_FILE_INPUT};
use crate::object::{self, PyObject};
use crate::pyref::{Borrowed, PyRef};
use crate::value::Value;

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Filename reported in tracebacks for code passed to `eval`/`exec`.
const SOURCE_NAME: &CStr = c"<pycall>";

pub struct Runtime {
    pub(crate) api: Functions,
    pub(crate) globals: Globals,
    profile: AbiProfile,
    library_path: PathBuf,
    description: String,
    version: String,
    // Never dropped: the runtime lives in a static.
    _lib: Library,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("library_path", &self.library_path)
            .field("version", &self.version)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Load libpython and start the interpreter, once per process.
    ///
    /// Later calls return the already-loaded runtime and ignore `config`.
    /// A failed load is not cached, so a later call may try again.
    pub fn load(config: &Config) -> Result<&'static Runtime> {
        RUNTIME.get_or_try_init(|| Self::open(config))
    }

    /// [`Runtime::load`] with [`Config::from_env`].
    pub fn instance() -> Result<&'static Runtime> {
        match RUNTIME.get() {
            Some(rt) => Ok(rt),
            None => Self::load(&Config::from_env()),
        }
    }

    /// The runtime, if it has been loaded.
    pub fn get() -> Option<&'static Runtime> {
        RUNTIME.get()
    }

    fn open(config: &Config) -> Result<Runtime> {
        let (python, pyconfig) = probe(config);
        if config.set_python_home {
            if let Some(python) = &python {
                discovery::configure_python_home(python, &pyconfig);
            }
        }

        let (lib, library_path) = open_first(&pyconfig.candidates())?;
        let profile = AbiProfile::resolve(&lib);
        let api = Functions::bind(&lib, &profile);
        if let Some(name) = api.first_missing_required() {
            return Err(Error::MissingSymbol(name));
        }
        let globals = Globals::bind(&lib, &profile);

        // SAFETY: every function called here was checked above.
        unsafe {
            if api.Py_IsInitialized()? == 0 {
                api.Py_InitializeEx(c_int::from(config.init_signals))?;
                // Start-up leaves this thread holding the GIL; hand it back
                // so any thread can take it through PyGILState_Ensure.
                api.PyEval_SaveThread()?;
                log::debug!("initialized the interpreter");
            }
        }

        // SAFETY: Py_GetVersion returns a static nul-terminated string.
        let description = unsafe {
            let ptr = api.Py_GetVersion()?;
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        let version = short_version(&description).to_string();
        log::info!("loaded {} (Python {version})", library_path.display());

        Ok(Runtime {
            api,
            globals,
            profile,
            library_path,
            description,
            version,
            _lib: lib,
        })
    }

    pub fn profile(&self) -> &AbiProfile {
        &self.profile
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    /// Full `sys.version` text, e.g. `3.11.4 (main, Jul  5 2023, ...) [GCC 11.2.0]`.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Version number alone, e.g. `3.11.4`.
    pub fn version(&self) -> &str {
        &self.version
    }

    // ==================== GIL ====================

    /// Take the GIL until the guard is dropped. Re-entrant.
    pub fn gil(&self) -> Result<GilGuard<'_>> {
        // SAFETY: PyGILState_Ensure may be called from any thread once the
        // interpreter is initialized.
        let state = unsafe { self.api.PyGILState_Ensure()? };
        Ok(GilGuard { rt: self, state })
    }

    /// Run `f` with the GIL held.
    pub fn with_gil<R>(&'static self, f: impl FnOnce(&'static Runtime) -> Result<R>) -> Result<R> {
        let _gil = self.gil()?;
        f(self)
    }

    // ==================== Reference counting ====================

    pub(crate) fn incref(&self, obj: *mut PyObject) {
        // SAFETY: Py_IncRef is a required symbol and tolerates any live object.
        let _ = unsafe { self.api.Py_IncRef(obj) };
    }

    /// Drop one reference, taking the GIL around the decrement.
    pub(crate) fn release(&self, obj: *mut PyObject) {
        // SAFETY: both GIL functions and Py_DecRef are required symbols.
        unsafe {
            let Ok(state) = self.api.PyGILState_Ensure() else {
                return;
            };
            let _ = self.api.Py_DecRef(obj);
            let _ = self.api.PyGILState_Release(state);
        }
    }

    /// Wrap a *new* reference returned by a libpython call. Null means the
    /// call failed and an exception is pending.
    pub(crate) fn owned(&'static self, obj: *mut PyObject) -> Result<PyRef> {
        // SAFETY: callers pass the direct result of a new-reference API.
        match unsafe { PyRef::from_owned_ptr(self, obj) } {
            Some(r) => Ok(r),
            None => Err(self.error_after_null()),
        }
    }

    /// View a *borrowed* reference returned by a libpython call.
    pub(crate) fn borrowed<'a>(&'static self, obj: *mut PyObject) -> Result<Borrowed<'a>> {
        // SAFETY: callers pass the direct result of a borrowed-reference API
        // whose owner outlives `'a`.
        match unsafe { Borrowed::from_ptr(self, obj) } {
            Some(b) => Ok(b),
            None => Err(self.error_after_null()),
        }
    }

    /// Check a C status return: `-1` means an exception is pending.
    pub(crate) fn status(&'static self, rc: c_int) -> Result<c_int> {
        if rc == -1 {
            Err(self.error_after_null())
        } else {
            Ok(rc)
        }
    }

    fn error_after_null(&'static self) -> Error {
        self.take_error()
            .unwrap_or_else(|| Error::conversion("libpython call failed without setting an exception"))
    }

    // ==================== Errors ====================

    /// Convert a pending Python exception into an [`Error`], clearing it.
    pub fn check_error(&'static self) -> Result<()> {
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Fetch and clear the pending exception, if any.
    pub(crate) fn take_error(&'static self) -> Option<Error> {
        // SAFETY: PyErr_Occurred returns a borrowed pointer we only test.
        let pending = unsafe { self.api.PyErr_Occurred() };
        match pending {
            Ok(p) if !p.is_null() => Some(self.fetch_error()),
            Ok(_) => None,
            Err(e) => Some(e),
        }
    }

    fn fetch_error(&'static self) -> Error {
        let mut ty: *mut PyObject = ptr::null_mut();
        let mut value: *mut PyObject = ptr::null_mut();
        let mut tb: *mut PyObject = ptr::null_mut();
        // SAFETY: PyErr_Fetch hands us owned references (or nulls); every
        // non-null one is released below.
        unsafe {
            if let Err(e) = self.api.PyErr_Fetch(&mut ty, &mut value, &mut tb) {
                return e;
            }
            let _ = self.api.PyErr_NormalizeException(&mut ty, &mut value, &mut tb);
        }

        let type_name = if ty.is_null() {
            "<unknown>".to_string()
        } else {
            // SAFETY: an exception type is a type object.
            unsafe { object::type_name(ty.cast()) }.into_owned()
        };
        let message = if value.is_null() {
            String::new()
        } else {
            // SAFETY: `value` is a live owned reference until released below.
            let text = unsafe { self.str_of(value) };
            text.unwrap_or_default()
        };

        for obj in [ty, value, tb] {
            if !obj.is_null() {
                self.release(obj);
            }
        }
        // Anything raised while formatting the message is discarded.
        // SAFETY: PyErr_Clear is a required symbol.
        let _ = unsafe { self.api.PyErr_Clear() };

        Error::Foreign { type_name, message }
    }

    /// `str(obj)` without going through `PyRef`, for use while an exception
    /// is being fetched.
    unsafe fn str_of(&'static self, obj: *mut PyObject) -> Option<String> {
        let s = unsafe { self.api.PyObject_Str(obj) }.ok()?;
        if s.is_null() {
            return None;
        }
        // SAFETY: PyObject_Str returns a new reference.
        let s = unsafe { PyRef::from_owned_ptr(self, s) }?;
        convert::text_of(s.as_borrowed()).ok()
    }

    // ==================== Singletons ====================

    /// A new reference to `None`.
    pub fn none(&'static self) -> Result<PyRef> {
        let none = self
            .globals
            ._Py_NoneStruct
            .ok_or(Error::MissingSymbol("_Py_NoneStruct"))?;
        Ok(self.borrowed(none.as_ptr())?.to_owned())
    }

    /// True if `obj` is `None`.
    pub fn is_none(&self, obj: *mut PyObject) -> bool {
        self.globals
            ._Py_NoneStruct
            .is_some_and(|none| none.is(obj))
    }

    // ==================== Code ====================

    /// Evaluate one expression in `__main__`'s namespace.
    pub fn eval(&'static self, src: &str) -> Result<PyRef> {
        self.run(src, PY_EVAL_INPUT)
    }

    /// Evaluate one expression and convert the result to a host value.
    pub fn eval_value(&'static self, src: &str) -> Result<Value> {
        self.eval(src)?.to_value()
    }

    /// Execute statements in `__main__`'s namespace.
    pub fn exec(&'static self, src: &str) -> Result<()> {
        self.run(src, PY_FILE_INPUT).map(drop)
    }

    fn run(&'static self, src: &str, start: c_int) -> Result<PyRef> {
        let src = CString::new(src)?;
        // SAFETY: both strings are nul-terminated and outlive the call.
        let code = self.owned(unsafe {
            self.api
                .Py_CompileString(src.as_ptr(), SOURCE_NAME.as_ptr(), start)?
        })?;
        let globals = self.main_dict()?;
        // SAFETY: code and globals are live; globals doubles as locals.
        self.owned(unsafe {
            self.api
                .PyEval_EvalCode(code.as_ptr(), globals.as_ptr(), globals.as_ptr())?
        })
    }

    /// `__main__.__dict__`.
    pub fn main_dict(&'static self) -> Result<PyRef> {
        // SAFETY: PyImport_AddModule returns a borrowed reference kept
        // alive by sys.modules.
        let main = self.borrowed(unsafe { self.api.PyImport_AddModule(c"__main__".as_ptr())? })?;
        // SAFETY: PyModule_GetDict borrows from `main`, promoted at once.
        let dict = unsafe { PyRef::from_borrowed_ptr(self, self.api.PyModule_GetDict(main.as_ptr())?) };
        dict.ok_or_else(|| self.error_after_null())
    }

    /// `import name`.
    pub fn import(&'static self, name: &str) -> Result<PyRef> {
        let name = CString::new(name)?;
        // SAFETY: nul-terminated name outlives the call.
        self.owned(unsafe { self.api.PyImport_ImportModule(name.as_ptr())? })
    }

    /// Build a foreign object from a host value.
    pub fn to_foreign(&'static self, value: &Value) -> Result<PyRef> {
        convert::to_foreign(self, value)
    }
}

/// Holds the GIL; releases it on drop.
pub struct GilGuard<'rt> {
    rt: &'rt Runtime,
    state: c_int,
}

impl Drop for GilGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: `state` came from the matching PyGILState_Ensure.
        let _ = unsafe { self.rt.api.PyGILState_Release(self.state) };
    }
}

/// Run the discovery probe with the first executable that answers.
fn probe(config: &Config) -> (Option<String>, PythonConfig) {
    for exe in config.executables() {
        match discovery::investigate(&exe) {
            Ok(pyconfig) => return (Some(exe), pyconfig),
            Err(e) => log::debug!("{e}"),
        }
    }
    log::warn!("no python executable answered the discovery probe");
    (None, PythonConfig::default())
}

fn open_first(candidates: &[PathBuf]) -> Result<(Library, PathBuf)> {
    for path in candidates {
        log::debug!("trying {}", path.display());
        if !path.is_file() {
            continue;
        }
        match open_library(path) {
            Ok(lib) => return Ok((lib, path.clone())),
            Err(e) => log::debug!("{}: {e}", path.display()),
        }
    }
    Err(Error::LibraryNotFound {
        searched: candidates.to_vec(),
    })
}

/// Load with global symbol visibility so C extension modules imported
/// later can resolve libpython symbols.
fn open_library(path: &Path) -> std::result::Result<Library, libloading::Error> {
    #[cfg(unix)]
    {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_LAZY};
        // SAFETY: loading libpython runs no user initializers beyond its own.
        unsafe { UnixLibrary::open(Some(path), RTLD_LAZY | RTLD_GLOBAL) }.map(Library::from)
    }
    #[cfg(not(unix))]
    {
        // SAFETY: as above.
        unsafe { Library::new(path) }
    }
}

/// `"3.11.4 (main, ...)"` -> `"3.11.4"`.
fn short_version(description: &str) -> &str {
    description.split(' ').next().unwrap_or(description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_version_is_text_before_first_space() {
        assert_eq!(
            short_version("3.11.4 (main, Jul  5 2023, 13:45:01) [GCC 11.2.0]"),
            "3.11.4"
        );
        assert_eq!(short_version("2.7.18"), "2.7.18");
        assert_eq!(short_version(""), "");
    }

    #[test]
    fn open_first_reports_every_candidate() {
        let candidates = vec![
            PathBuf::from("/nonexistent/libpython9.9.so"),
            PathBuf::from("/nonexistent/libpython.so"),
        ];
        match open_first(&candidates) {
            Err(Error::LibraryNotFound { searched }) => assert_eq!(searched, candidates),
            other => panic!("expected LibraryNotFound, got {other:?}"),
        }
    }
}
