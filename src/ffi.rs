//! `pycall_*` exports: a handle-based C ABI for hosts that cannot hold a
//! [`PyRef`] themselves.
//!
//! Each export resets the thread's last-error slot, runs under the GIL and
//! reports failure through a sentinel:
//!
//! | Return type | Failure value |
//! |-------------|---------------|
//! | `isize` handle | `0` |
//! | `i32` status   | `-1` (`0` is success) |
//! | `*const c_char` | `""` |
//!
//! The message behind a sentinel is read with `pycall_last_error`.
//!
//! Strings handed back live in a per-thread buffer that the next `pycall_*`
//! call on the same thread overwrites. Every handle owns one reference and
//! must be given back with `pycall_drop`.

use std::os::raw::c_char;

use crate::config::Config;
use crate::convert;
use crate::error::{clear_last_error, set_last_error, Error, Result};
use crate::pyref::PyRef;
use crate::registry;
use crate::runtime::Runtime;
use crate::value::Value;

// ==================== Helpers ====================

/// Take the GIL on the loaded runtime and run `f`.
fn with_runtime<R>(f: impl FnOnce(&'static Runtime) -> Result<R>) -> Result<R> {
    let rt = Runtime::get().ok_or(Error::NotInitialized)?;
    rt.with_gil(f)
}

/// Run `f`, return handle (0 on error).
fn gil_handle(f: impl FnOnce(&'static Runtime) -> Result<isize>) -> isize {
    clear_last_error();
    match with_runtime(f) {
        Ok(h) => h,
        Err(e) => {
            set_last_error(e.to_string());
            0
        }
    }
}

/// Run `f`, return status (0=ok, -1=error).
fn gil_status(f: impl FnOnce(&'static Runtime) -> Result<()>) -> i32 {
    clear_last_error();
    match with_runtime(f) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(e.to_string());
            -1
        }
    }
}

/// Run `f`, return string via TLS buffer ("" on error).
fn gil_str(f: impl FnOnce(&'static Runtime) -> Result<String>) -> *const c_char {
    clear_last_error();
    match with_runtime(f) {
        Ok(s) => convert::set_return_str(s),
        Err(e) => {
            set_last_error(e.to_string());
            convert::set_return_str(String::new())
        }
    }
}

/// Copy a C string argument.
///
/// # Safety
/// `ptr` must be null or point to a nul-terminated string.
unsafe fn arg_str(ptr: *const c_char) -> Result<String> {
    unsafe { convert::cstr_to_str(ptr) }.map(str::to_owned)
}

/// Record an argument error and return `sentinel`.
fn arg_error<T>(e: Error, sentinel: T) -> T {
    clear_last_error();
    set_last_error(e.to_string());
    sentinel
}

fn reg_insert(obj: PyRef) -> Result<isize> {
    registry::insert(obj)
}

/// Tuple of positional arguments from an args handle; 0 means no arguments.
fn args_tuple(rt: &'static Runtime, args: isize) -> Result<PyRef> {
    if args == 0 {
        return rt.to_foreign(&Value::Tuple(Default::default()));
    }
    let seq = registry::get(args)?;
    // SAFETY: live object; PySequence_Tuple returns a new reference.
    rt.owned(unsafe { rt.api.PySequence_Tuple(seq.as_ptr())? })
}

// ==================== Lifecycle ====================

/// Load libpython, start the interpreter and the handle registry.
///
/// `python` names the executable to probe; null falls back to `$PYTHON`,
/// then `python3`, then `python`.
///
/// Returns `0` on success, `-1` on error.
#[no_mangle]
pub unsafe extern "C" fn pycall_init(python: *const c_char) -> i32 {
    clear_last_error();
    let mut config = Config::from_env();
    if !python.is_null() {
        match unsafe { arg_str(python) } {
            Ok(exe) => config = config.python(exe),
            Err(e) => return arg_error(e, -1),
        }
    }
    match Runtime::load(&config) {
        Ok(_) => {
            registry::init_registry();
            0
        }
        Err(e) => {
            set_last_error(e.to_string());
            -1
        }
    }
}

/// Release every handle. The interpreter itself stays up.
#[no_mangle]
pub extern "C" fn pycall_finalize() {
    clear_last_error();
    registry::destroy_registry();
}

/// Python's version number, e.g. `3.11.4`. Returns via TLS buffer.
#[no_mangle]
pub extern "C" fn pycall_version() -> *const c_char {
    clear_last_error();
    match Runtime::get() {
        Some(rt) => convert::set_return_str(rt.version().to_string()),
        None => {
            set_last_error(Error::NotInitialized.to_string());
            convert::set_return_str(String::new())
        }
    }
}

// ==================== Evaluation ====================

/// Handle to the value of one expression, evaluated in `__main__`.
#[no_mangle]
pub unsafe extern "C" fn pycall_eval(code: *const c_char) -> isize {
    let code = match unsafe { arg_str(code) } {
        Ok(s) => s,
        Err(e) => return arg_error(e, 0),
    };
    gil_handle(|rt| reg_insert(rt.eval(&code)?))
}

/// Run statements in `__main__`. Status return.
#[no_mangle]
pub unsafe extern "C" fn pycall_exec(code: *const c_char) -> i32 {
    let code = match unsafe { arg_str(code) } {
        Ok(s) => s,
        Err(e) => return arg_error(e, -1),
    };
    gil_status(|rt| rt.exec(&code))
}

/// Handle to an imported module.
#[no_mangle]
pub unsafe extern "C" fn pycall_import(module_name: *const c_char) -> isize {
    let name = match unsafe { arg_str(module_name) } {
        Ok(s) => s,
        Err(e) => return arg_error(e, 0),
    };
    gil_handle(|rt| reg_insert(rt.import(&name)?))
}

// ==================== Attribute / Item Access ====================

/// Handle to `obj.name`.
#[no_mangle]
pub unsafe extern "C" fn pycall_getattr(obj: isize, name: *const c_char) -> isize {
    let attr_name = match unsafe { arg_str(name) } {
        Ok(s) => s,
        Err(e) => return arg_error(e, 0),
    };
    gil_handle(|_| registry::with_object(obj, |o| reg_insert(o.getattr(&attr_name)?)))
}

/// `obj.name = value`. Status return.
#[no_mangle]
pub unsafe extern "C" fn pycall_setattr(obj: isize, name: *const c_char, value: isize) -> i32 {
    let attr_name = match unsafe { arg_str(name) } {
        Ok(s) => s,
        Err(e) => return arg_error(e, -1),
    };
    gil_status(|_| {
        let val = registry::get(value)?;
        registry::with_object(obj, |o| o.setattr(&attr_name, &val))
    })
}

/// `obj[key]`, both given as handles.
///
/// Returns `0` on error.
#[no_mangle]
pub extern "C" fn pycall_getitem(obj: isize, key: isize) -> isize {
    gil_handle(|_| {
        let key = registry::get(key)?;
        registry::with_object(obj, |o| reg_insert(o.getitem(&key)?))
    })
}

// ==================== Calls ====================

/// Call a callable handle: `callable(*args)`.
///
/// `args` is a handle to any sequence, or `0` for no arguments.
/// Returns `0` on error.
#[no_mangle]
pub extern "C" fn pycall_call(callable: isize, args: isize) -> isize {
    gil_handle(|rt| {
        let args = args_tuple(rt, args)?;
        registry::with_object(callable, |c| reg_insert(c.call_tuple(&args)?))
    })
}

// ==================== Python -> C ====================

/// `str(obj)`, in the return buffer.
#[no_mangle]
pub extern "C" fn pycall_to_str(obj: isize) -> *const c_char {
    gil_str(|_| registry::with_object(obj, PyRef::str))
}

/// `repr(obj)`, in the return buffer.
#[no_mangle]
pub extern "C" fn pycall_to_repr(obj: isize) -> *const c_char {
    gil_str(|_| registry::with_object(obj, PyRef::repr))
}

/// The integer value of an `int` or `bool` handle.
///
/// A failure also returns `0`; `pycall_last_error` tells the two apart.
#[no_mangle]
pub extern "C" fn pycall_to_int(obj: isize) -> i64 {
    clear_last_error();
    let result = with_runtime(|_| {
        registry::with_object(obj, |o| match o.to_value()? {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            other => Err(Error::conversion(format!("expected int, got {}", other.kind()))),
        })
    });
    match result {
        Ok(v) => v,
        Err(e) => {
            set_last_error(e.to_string());
            0
        }
    }
}

/// The value of a `float` handle. `int` handles are widened.
///
/// A failure returns `0.0` and sets the last error.
#[no_mangle]
pub extern "C" fn pycall_to_float(obj: isize) -> f64 {
    clear_last_error();
    let result = with_runtime(|_| {
        registry::with_object(obj, |o| match o.to_value()? {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(Error::conversion(format!("expected float, got {}", other.kind()))),
        })
    });
    match result {
        Ok(v) => v,
        Err(e) => {
            set_last_error(e.to_string());
            0.0
        }
    }
}

// ==================== C -> Python ====================

/// New `int` handle.
#[no_mangle]
pub extern "C" fn pycall_from_int(val: i64) -> isize {
    gil_handle(|rt| reg_insert(rt.to_foreign(&Value::Int(val))?))
}

/// New `float` handle.
#[no_mangle]
pub extern "C" fn pycall_from_float(val: f64) -> isize {
    gil_handle(|rt| reg_insert(rt.to_foreign(&Value::Float(val))?))
}

/// New text handle from a UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn pycall_from_str(val: *const c_char) -> isize {
    let s = match unsafe { arg_str(val) } {
        Ok(s) => s,
        Err(e) => return arg_error(e, 0),
    };
    gil_handle(|rt| reg_insert(rt.to_foreign(&Value::Text(s))?))
}

// ==================== None ====================

/// Handle to `None`.
#[no_mangle]
pub extern "C" fn pycall_none() -> isize {
    gil_handle(|rt| reg_insert(rt.none()?))
}

/// `1` if the handle is `None`, `0` if not, `-1` on failure.
#[no_mangle]
pub extern "C" fn pycall_is_none(obj: isize) -> i32 {
    clear_last_error();
    match with_runtime(|_| registry::with_object(obj, |o| Ok(o.is_none()))) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            set_last_error(e.to_string());
            -1
        }
    }
}

// ==================== Handles ====================

/// Give a handle back. Its reference is released and later use of the
/// handle reports `InvalidHandle`.
#[no_mangle]
pub extern "C" fn pycall_drop(handle: isize) {
    clear_last_error();
    if let Err(e) = registry::remove(handle) {
        set_last_error(e.to_string());
    }
}

/// Live handle count, `-1` before `pycall_init`.
#[no_mangle]
pub extern "C" fn pycall_handle_count() -> i64 {
    clear_last_error();
    match registry::len() {
        Ok(n) => n as i64,
        Err(e) => {
            set_last_error(e.to_string());
            -1
        }
    }
}
