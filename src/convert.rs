//! Conversion between host [`Value`]s and Python objects.
//!
//! Host -> Python builds containers element by element. Each element is an
//! owned [`PyRef`] until the container takes it, so a failure partway
//! through releases everything already built and leaves refcounts where
//! they started.
//!
//! Python -> host dispatches on the exact type pointer against the type
//! objects bound at load. Unknown types come back as [`Value::Opaque`].
//!
//! Also home to the C string helpers used by the `pycall_*` exports.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use libc::c_long;

use crate::error::{Error, Result};
use crate::libpython::Global;
use crate::object::{self, PyObject, PyTypeObject, Py_ssize_t};
use crate::pyref::{Borrowed, PyRef};
use crate::runtime::Runtime;
use crate::value::{Complex, Dict, Set, Tuple, Value};

/// What a Python object is, judged by its exact type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    None,
    Bool,
    /// `int` (legacy `int` on Python 2).
    Int,
    /// Python 2 `long`. Never produced on Python 3, where it is `Int`.
    Long,
    Float,
    Complex,
    /// Python 2 `str` or Python 3 `bytes`.
    String,
    Unicode,
    List,
    Tuple,
    Dict,
    Set,
    Callable,
    Opaque,
}

/// Classify `obj` by its type pointer.
pub fn kind_of(obj: Borrowed<'_>) -> Kind {
    let rt = obj.runtime();
    if rt.is_none(obj.as_ptr()) {
        return Kind::None;
    }
    // SAFETY: a borrowed reference points at a live object.
    let ty = unsafe { object::type_of(obj.as_ptr()) };
    let g = &rt.globals;
    let is = |global: Option<Global<PyTypeObject>>| global.is_some_and(|t| t.is(ty));

    if is(g.PyBool_Type) {
        Kind::Bool
    } else if is(g.PyInt_Type) {
        Kind::Int
    } else if is(g.PyLong_Type) {
        Kind::Long
    } else if is(g.PyFloat_Type) {
        Kind::Float
    } else if is(g.PyComplex_Type) {
        Kind::Complex
    } else if is(g.PyString_Type) {
        Kind::String
    } else if is(g.PyUnicode_Type) {
        Kind::Unicode
    } else if is(g.PyList_Type) {
        Kind::List
    } else if is(g.PyTuple_Type) {
        Kind::Tuple
    } else if is(g.PyDict_Type) {
        Kind::Dict
    } else if is(g.PySet_Type) {
        Kind::Set
    } else if is(g.PyFunction_Type) || is(g.PyMethod_Type) || is(g.PyCFunction_Type) {
        Kind::Callable
    } else {
        Kind::Opaque
    }
}

// ==================== Host -> Python ====================

/// Build a new Python object for `value`.
pub fn to_foreign(rt: &'static Runtime, value: &Value) -> Result<PyRef> {
    let api = &rt.api;
    // SAFETY: every call below passes live objects or plain data, and
    // every new reference goes straight into `rt.owned`.
    unsafe {
        match value {
            Value::None => rt.none(),
            Value::Bool(b) => rt.owned(api.PyBool_FromLong(c_long::from(*b))?),
            Value::Int(i) => {
                let i = Py_ssize_t::try_from(*i).map_err(|_| Error::Overflow)?;
                rt.owned(api.PyInt_FromSsize_t(i)?)
            }
            Value::Float(f) => rt.owned(api.PyFloat_FromDouble(*f)?),
            Value::Complex(c) => rt.owned(api.PyComplex_FromDoubles(c.re, c.im)?),
            Value::Text(s) => rt.owned(api.PyUnicode_DecodeUTF8(
                s.as_ptr().cast(),
                s.len() as Py_ssize_t,
                ptr::null(),
            )?),
            Value::Bytes(b) => rt.owned(
                api.PyString_FromStringAndSize(b.as_ptr().cast(), b.len() as Py_ssize_t)?,
            ),
            Value::List(items) => {
                let list = rt.owned(api.PyList_New(items.len() as Py_ssize_t)?)?;
                for (i, item) in items.iter().enumerate() {
                    let item = to_foreign(rt, item)?;
                    // Steals `item` even on failure.
                    rt.status(api.PyList_SetItem(
                        list.as_ptr(),
                        i as Py_ssize_t,
                        item.into_ptr(),
                    )?)?;
                }
                Ok(list)
            }
            Value::Tuple(Tuple(items)) => {
                let tuple = rt.owned(api.PyTuple_New(items.len() as Py_ssize_t)?)?;
                for (i, item) in items.iter().enumerate() {
                    let item = to_foreign(rt, item)?;
                    // Steals `item` even on failure.
                    rt.status(api.PyTuple_SetItem(
                        tuple.as_ptr(),
                        i as Py_ssize_t,
                        item.into_ptr(),
                    )?)?;
                }
                Ok(tuple)
            }
            Value::Dict(entries) => {
                let dict = rt.owned(api.PyDict_New()?)?;
                for (k, v) in entries.iter() {
                    let k = to_foreign(rt, k)?;
                    let v = to_foreign(rt, v)?;
                    rt.status(api.PyDict_SetItem(dict.as_ptr(), k.as_ptr(), v.as_ptr())?)?;
                }
                expect_size(&dict, entries.len(), "dict keys")?;
                Ok(dict)
            }
            Value::Set(items) => {
                let set = rt.owned(api.PySet_New(ptr::null_mut())?)?;
                for item in items.iter() {
                    let item = to_foreign(rt, item)?;
                    rt.status(api.PySet_Add(set.as_ptr(), item.as_ptr())?)?;
                }
                expect_size(&set, items.len(), "set members")?;
                Ok(set)
            }
            Value::Callable(r) | Value::Opaque(r) => Ok(r.clone()),
        }
    }
}

// ==================== Python -> Host ====================

/// Convert a Python object to a host value.
///
/// Containers are converted recursively. Objects that stay references
/// (callables, unknown types) are promoted to owned references.
pub fn to_host(obj: Borrowed<'_>) -> Result<Value> {
    let rt = obj.runtime();
    let api = &rt.api;
    let p = obj.as_ptr();
    // SAFETY: `obj` is live for the whole call; items read from containers
    // are borrowed from `obj` and converted before it can change.
    unsafe {
        match kind_of(obj) {
            Kind::None => Ok(Value::None),
            Kind::Bool => Ok(Value::Bool(rt.status(api.PyObject_IsTrue(p)?)? == 1)),
            Kind::Int => int_value(rt, api.PyInt_AsSsize_t(p)?),
            Kind::Long => int_value(rt, api.PyLong_AsSsize_t(p)?),
            Kind::Float => {
                let f = api.PyFloat_AsDouble(p)?;
                if f == -1.0 {
                    rt.check_error()?;
                }
                Ok(Value::Float(f))
            }
            Kind::Complex => {
                let re = api.PyComplex_RealAsDouble(p)?;
                let im = api.PyComplex_ImagAsDouble(p)?;
                if re == -1.0 || im == -1.0 {
                    rt.check_error()?;
                }
                Ok(Value::Complex(Complex { re, im }))
            }
            Kind::String => {
                let bytes = string_bytes(obj)?;
                if rt.profile().uses_bytes_for_legacy_string_type {
                    return Ok(Value::Bytes(bytes));
                }
                // Python 2 `str` is text when it decodes as UTF-8.
                Ok(match String::from_utf8(bytes) {
                    Ok(s) => Value::Text(s),
                    Err(e) => Value::Bytes(e.into_bytes()),
                })
            }
            Kind::Unicode => {
                // Lone surrogates have no UTF-8 form.
                let encoded = rt.owned(api.PyUnicode_AsUTF8String(p)?).map_err(|e| {
                    if e.is_foreign("UnicodeEncodeError") {
                        Error::conversion(format!("str is not valid UTF-8: {e}"))
                    } else {
                        e
                    }
                })?;
                let bytes = string_bytes(encoded.as_borrowed())?;
                String::from_utf8(bytes)
                    .map(Value::Text)
                    .map_err(|e| Error::conversion(format!("invalid UTF-8 from Python: {e}")))
            }
            Kind::List => {
                let n = rt_len(rt, api.PyList_Size(p)?)?;
                let mut items = Vec::with_capacity(n);
                for i in 0..n {
                    let item = rt.borrowed(api.PyList_GetItem(p, i as Py_ssize_t)?)?;
                    items.push(to_host(item)?);
                }
                Ok(Value::List(items))
            }
            Kind::Tuple => {
                let n = rt_len(rt, api.PyTuple_Size(p)?)?;
                let mut items = Vec::with_capacity(n);
                for i in 0..n {
                    let item = rt.borrowed(api.PyTuple_GetItem(p, i as Py_ssize_t)?)?;
                    items.push(to_host(item)?);
                }
                Ok(Value::Tuple(Tuple(items)))
            }
            Kind::Dict => {
                let mut dict = Dict::new();
                let mut pos: Py_ssize_t = 0;
                let mut key: *mut PyObject = ptr::null_mut();
                let mut value: *mut PyObject = ptr::null_mut();
                while api.PyDict_Next(p, &mut pos, &mut key, &mut value)? != 0 {
                    let k = to_host(rt.borrowed(key)?)?;
                    let v = to_host(rt.borrowed(value)?)?;
                    dict.insert(k, v);
                }
                Ok(Value::Dict(dict))
            }
            Kind::Set => {
                let mut set = Set::new();
                let owned = obj.to_owned();
                for item in owned.iter()? {
                    set.insert(to_host(item?.as_borrowed())?);
                }
                Ok(Value::Set(set))
            }
            Kind::Callable => Ok(Value::Callable(obj.to_owned())),
            Kind::Opaque => Ok(Value::Opaque(obj.to_owned())),
        }
    }
}

/// Text of a `str`/`unicode`/`bytes` object, e.g. the result of `str()`.
pub fn text_of(obj: Borrowed<'_>) -> Result<String> {
    match to_host(obj)? {
        Value::Text(s) => Ok(s),
        Value::Bytes(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
        other => Err(Error::conversion(format!(
            "expected text, got {}",
            other.kind()
        ))),
    }
}

fn int_value(rt: &'static Runtime, n: Py_ssize_t) -> Result<Value> {
    if n == -1 {
        match rt.check_error() {
            Err(e) if e.is_foreign("OverflowError") => return Err(Error::Overflow),
            other => other?,
        }
    }
    i64::try_from(n).map(Value::Int).map_err(|_| Error::Overflow)
}

fn rt_len(rt: &'static Runtime, n: Py_ssize_t) -> Result<usize> {
    if n < 0 {
        rt.check_error()?;
        return Err(Error::conversion("negative container size"));
    }
    Ok(n as usize)
}

/// Python merged some keys that were distinct on the host, e.g. through a
/// user-defined `__eq__`.
fn expect_size(obj: &PyRef, expected: usize, what: &str) -> Result<()> {
    let rt = obj.runtime();
    // SAFETY: live object.
    let n = rt_len(rt, unsafe { rt.api.PyObject_Size(obj.as_ptr())? })?;
    if n != expected {
        return Err(Error::conversion(format!(
            "{expected} {what} collapsed to {n} in Python"
        )));
    }
    Ok(())
}

/// Copy the contents of a Python 2 `str` / Python 3 `bytes` object.
fn string_bytes(obj: Borrowed<'_>) -> Result<Vec<u8>> {
    let rt = obj.runtime();
    let mut buf: *mut c_char = ptr::null_mut();
    let mut len: Py_ssize_t = 0;
    // SAFETY: the buffer is borrowed from `obj` and copied before returning.
    unsafe {
        rt.status(
            rt.api
                .PyString_AsStringAndSize(obj.as_ptr(), &mut buf, &mut len)?,
        )?;
        if buf.is_null() || len <= 0 {
            return Ok(Vec::new());
        }
        Ok(std::slice::from_raw_parts(buf.cast::<u8>(), len as usize).to_vec())
    }
}

// ==================== C string helpers ====================

thread_local! {
    /// Reusable buffer for returning C strings from FFI functions.
    /// Valid until the next `set_return_str` call.
    static RETURN_BUF: RefCell<CString> = RefCell::new(CString::default());
}

/// Store a string in the TLS buffer and return a pointer to it.
///
/// The pointer is valid until the next call to `set_return_str` on this
/// thread. Interior nul bytes truncate the string.
pub fn set_return_str(s: String) -> *const c_char {
    let cstr = CString::new(s).unwrap_or_else(|e| {
        let nul = e.nul_position();
        let mut bytes = e.into_vec();
        bytes.truncate(nul);
        CString::new(bytes).unwrap_or_default()
    });
    RETURN_BUF.with(|cell| {
        *cell.borrow_mut() = cstr;
        cell.borrow().as_ptr()
    })
}

/// Safely convert a `*const c_char` to `&str`.
///
/// # Safety
/// The pointer must be null or valid and nul-terminated.
pub unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::conversion("null string pointer"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| Error::conversion(format!("invalid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_buffer_holds_last_string() {
        let ptr = set_return_str("hello".to_string());
        let s = unsafe { cstr_to_str(ptr) }.unwrap();
        assert_eq!(s, "hello");
    }

    #[test]
    fn return_buffer_truncates_at_nul() {
        let ptr = set_return_str("ab\0cd".to_string());
        assert_eq!(unsafe { cstr_to_str(ptr) }.unwrap(), "ab");
    }

    #[test]
    fn null_pointer_is_an_error() {
        let err = unsafe { cstr_to_str(ptr::null()) }.unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }
}
