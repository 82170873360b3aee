//! In-memory layout of the interpreter's object headers.
//!
//! Only the common prologue is mirrored: enough to read a refcount, follow
//! the type pointer and read the type's name. Nothing here writes through
//! a pointer; all mutation goes through libpython functions.

#![allow(non_camel_case_types)]

use std::borrow::Cow;
use std::ffi::CStr;

use libc::{c_char, ssize_t};

pub type Py_ssize_t = ssize_t;

/// `PyObject`: refcount followed by the type pointer.
#[repr(C)]
pub struct PyObject {
    pub ob_refcnt: Py_ssize_t,
    pub ob_type: *mut PyTypeObject,
}

/// Leading fields of `PyTypeObject` (a `PyVarObject` plus `tp_name`).
#[repr(C)]
pub struct PyTypeObject {
    pub ob_base: PyObject,
    pub ob_size: Py_ssize_t,
    pub tp_name: *const c_char,
}

/// Current refcount of `obj`.
///
/// # Safety
/// `obj` must point to a live Python object.
pub unsafe fn refcount(obj: *mut PyObject) -> Py_ssize_t {
    unsafe { (*obj).ob_refcnt }
}

/// Type pointer of `obj`.
///
/// # Safety
/// `obj` must point to a live Python object.
pub unsafe fn type_of(obj: *mut PyObject) -> *mut PyTypeObject {
    unsafe { (*obj).ob_type }
}

/// `tp_name` of a type object, e.g. `"int"` or `"collections.OrderedDict"`.
///
/// # Safety
/// `ty` must point to a live type object.
pub unsafe fn type_name<'a>(ty: *mut PyTypeObject) -> Cow<'a, str> {
    let name = unsafe { (*ty).tp_name };
    if name.is_null() {
        return Cow::Borrowed("<unnamed>");
    }
    unsafe { CStr::from_ptr(name) }.to_string_lossy()
}

/// Name of the concrete type of `obj`.
///
/// # Safety
/// `obj` must point to a live Python object.
pub unsafe fn type_name_of<'a>(obj: *mut PyObject) -> Cow<'a, str> {
    unsafe { type_name(type_of(obj)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn header_layout_matches_c() {
        let word = size_of::<usize>();
        assert_eq!(size_of::<PyObject>(), 2 * word);
        assert_eq!(offset_of!(PyTypeObject, ob_size), 2 * word);
        assert_eq!(offset_of!(PyTypeObject, tp_name), 3 * word);
    }

    #[test]
    fn reads_fields_from_a_fake_object() {
        let name = c"widget";
        let mut ty = PyTypeObject {
            ob_base: PyObject {
                ob_refcnt: 1,
                ob_type: std::ptr::null_mut(),
            },
            ob_size: 0,
            tp_name: name.as_ptr(),
        };
        let mut obj = PyObject {
            ob_refcnt: 3,
            ob_type: &mut ty,
        };
        let ptr: *mut PyObject = &mut obj;
        unsafe {
            assert_eq!(refcount(ptr), 3);
            assert_eq!(type_name_of(ptr), "widget");
        }
    }
}
