//! The libpython symbol table.
//!
//! Every function and global the bridge uses is listed once, under its
//! canonical name (see [`crate::abi`]). Binding resolves each canonical name
//! through the [`AbiProfile`] and stores `None` for anything the library
//! does not export; calling an unbound function fails with
//! [`Error::MissingSymbol`] instead of crashing.
//!
//! Ownership of returned objects follows the C API documentation and is
//! noted per function: *new* means an owned reference, *borrowed* means
//! the caller must not release it, *steals* means the argument's reference
//! is consumed.

#![allow(non_snake_case)]

use std::ffi::c_void;
use std::ptr::NonNull;

use libc::{c_char, c_double, c_int, c_long};
use libloading::Library;

use crate::abi::{AbiProfile, Capability};
use crate::error::{Error, Result};
use crate::object::{PyObject, PyTypeObject, Py_ssize_t};

/// `Py_CompileString` start symbol for a single expression.
pub const PY_EVAL_INPUT: c_int = 258;
/// `Py_CompileString` start symbol for a module body.
pub const PY_FILE_INPUT: c_int = 257;

/// Address of a global inside libpython. Globals live as long as the
/// library, which is never unloaded.
pub struct Global<T>(NonNull<T>);

// SAFETY: the address is immutable once bound; the pointee is only read
// through libpython calls made under the interpreter's own locking.
unsafe impl<T> Send for Global<T> {}
unsafe impl<T> Sync for Global<T> {}

impl<T> Global<T> {
    pub fn as_ptr(self) -> *mut T {
        self.0.as_ptr()
    }

    /// True if `ptr` is this global's address.
    pub fn is(self, ptr: *const T) -> bool {
        std::ptr::eq(self.0.as_ptr(), ptr)
    }
}

impl<T> Clone for Global<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Global<T> {}

impl<T> std::fmt::Debug for Global<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Global({:p})", self.0)
    }
}

/// Copy a function pointer or data address out of the library.
///
/// # Safety
/// `T` must match the real type of `symbol`.
unsafe fn lookup<T: Copy>(lib: &Library, symbol: &str) -> Option<T> {
    unsafe { lib.get::<T>(symbol.as_bytes()) }.ok().map(|s| *s)
}

fn resolve<T: Copy>(lib: &Library, profile: &AbiProfile, canonical: &'static str) -> Option<T> {
    match profile.capability(canonical) {
        // SAFETY: the type comes from the declaration list below.
        Capability::BoundAs(symbol) => unsafe { lookup(lib, symbol) },
        Capability::Unavailable => None,
    }
}

macro_rules! foreign_functions {
    ($( $(#[$meta:meta])* fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty; )*) => {
        /// Bound libpython functions, one slot per canonical name.
        pub struct Functions {
            $( $name: Option<unsafe extern "C" fn($($ty),*) -> $ret>, )*
        }

        impl Functions {
            pub(crate) fn bind(lib: &Library, profile: &AbiProfile) -> Self {
                Self {
                    $( $name: resolve(lib, profile, stringify!($name)), )*
                }
            }

            /// A table with every slot empty.
            #[cfg(test)]
            pub(crate) fn unbound() -> Self {
                Self {
                    $( $name: None, )*
                }
            }

            /// Whether the canonical function `name` was found.
            pub fn is_bound(&self, name: &str) -> bool {
                match name {
                    $( stringify!($name) => self.$name.is_some(), )*
                    _ => false,
                }
            }

            $(
                $(#[$meta])*
                ///
                /// # Safety
                /// Arguments must satisfy the C API contract of this function
                /// and the caller must hold the GIL where the C API requires it.
                #[allow(clippy::unused_unit)]
                pub unsafe fn $name(&self, $($arg: $ty),*) -> Result<$ret> {
                    let f = self.$name.ok_or(Error::MissingSymbol(stringify!($name)))?;
                    Ok(unsafe { f($($arg),*) })
                }
            )*
        }
    };
}

macro_rules! foreign_globals {
    ($( $(#[$meta:meta])* $name:ident: $ty:ty; )*) => {
        /// Addresses of libpython globals, one slot per canonical name.
        pub struct Globals {
            $( $(#[$meta])* pub $name: Option<Global<$ty>>, )*
        }

        impl Globals {
            pub(crate) fn bind(lib: &Library, profile: &AbiProfile) -> Self {
                Self {
                    $(
                        $name: resolve::<*mut $ty>(lib, profile, stringify!($name))
                            .and_then(NonNull::new)
                            .map(Global),
                    )*
                }
            }
        }
    };
}

foreign_globals! {
    _Py_NoneStruct: PyObject;
    PyBool_Type: PyTypeObject;
    /// `int`: the legacy Python 2 type, or `long` under Python 3.
    PyInt_Type: PyTypeObject;
    PyLong_Type: PyTypeObject;
    PyFloat_Type: PyTypeObject;
    PyComplex_Type: PyTypeObject;
    /// Python 2 `str`, or `bytes` under Python 3.
    PyString_Type: PyTypeObject;
    PyUnicode_Type: PyTypeObject;
    PyList_Type: PyTypeObject;
    PyTuple_Type: PyTypeObject;
    PyDict_Type: PyTypeObject;
    PySet_Type: PyTypeObject;
    PyFunction_Type: PyTypeObject;
    PyMethod_Type: PyTypeObject;
    PyCFunction_Type: PyTypeObject;
}

foreign_functions! {
    // Interpreter

    fn Py_GetVersion() -> *const c_char;
    fn Py_InitializeEx(initsigs: c_int) -> ();
    fn Py_IsInitialized() -> c_int;
    fn Py_IncRef(o: *mut PyObject) -> ();
    fn Py_DecRef(o: *mut PyObject) -> ();
    /// Returns an opaque `PyGILState_STATE`.
    fn PyGILState_Ensure() -> c_int;
    fn PyGILState_Release(state: c_int) -> ();
    fn PyEval_SaveThread() -> *mut c_void;

    // Object

    /// New reference.
    fn PyObject_RichCompare(a: *mut PyObject, b: *mut PyObject, op: c_int) -> *mut PyObject;
    /// New reference.
    fn PyObject_GetAttrString(o: *mut PyObject, name: *const c_char) -> *mut PyObject;
    /// Passing a null value deletes the attribute.
    fn PyObject_SetAttrString(o: *mut PyObject, name: *const c_char, v: *mut PyObject) -> c_int;
    fn PyObject_HasAttrString(o: *mut PyObject, name: *const c_char) -> c_int;
    /// New reference.
    fn PyObject_GetItem(o: *mut PyObject, key: *mut PyObject) -> *mut PyObject;
    fn PyObject_SetItem(o: *mut PyObject, key: *mut PyObject, v: *mut PyObject) -> c_int;
    fn PyObject_DelItem(o: *mut PyObject, key: *mut PyObject) -> c_int;
    /// New reference. `kwargs` may be null.
    fn PyObject_Call(callable: *mut PyObject, args: *mut PyObject, kwargs: *mut PyObject) -> *mut PyObject;
    /// New reference.
    fn PyObject_Dir(o: *mut PyObject) -> *mut PyObject;
    /// New reference.
    fn PyObject_Repr(o: *mut PyObject) -> *mut PyObject;
    /// New reference.
    fn PyObject_Str(o: *mut PyObject) -> *mut PyObject;
    fn PyObject_Size(o: *mut PyObject) -> Py_ssize_t;
    fn PyObject_IsTrue(o: *mut PyObject) -> c_int;
    fn PyObject_IsInstance(inst: *mut PyObject, cls: *mut PyObject) -> c_int;
    /// New reference.
    fn PyObject_GetIter(o: *mut PyObject) -> *mut PyObject;
    /// New reference, or null when exhausted or on error.
    fn PyIter_Next(iter: *mut PyObject) -> *mut PyObject;

    // Bool

    /// New reference.
    fn PyBool_FromLong(v: c_long) -> *mut PyObject;

    // Integer

    fn PyInt_AsSsize_t(o: *mut PyObject) -> Py_ssize_t;
    /// New reference.
    fn PyInt_FromSsize_t(v: Py_ssize_t) -> *mut PyObject;
    /// Python 2 `long`; the same function as `PyInt_AsSsize_t` under Python 3.
    fn PyLong_AsSsize_t(o: *mut PyObject) -> Py_ssize_t;

    // Float

    /// New reference.
    fn PyFloat_FromDouble(v: c_double) -> *mut PyObject;
    fn PyFloat_AsDouble(o: *mut PyObject) -> c_double;

    // Complex

    /// New reference.
    fn PyComplex_FromDoubles(real: c_double, imag: c_double) -> *mut PyObject;
    fn PyComplex_RealAsDouble(o: *mut PyObject) -> c_double;
    fn PyComplex_ImagAsDouble(o: *mut PyObject) -> c_double;

    // String (Python 2 `str` / Python 3 `bytes`)

    /// New reference.
    fn PyString_FromStringAndSize(s: *const c_char, len: Py_ssize_t) -> *mut PyObject;
    /// The buffer is borrowed from `o`.
    fn PyString_AsStringAndSize(o: *mut PyObject, buf: *mut *mut c_char, len: *mut Py_ssize_t) -> c_int;

    // Unicode

    /// New reference. `errors` may be null.
    fn PyUnicode_DecodeUTF8(s: *const c_char, len: Py_ssize_t, errors: *const c_char) -> *mut PyObject;
    /// New reference to a `bytes` (Python 3) or `str` (Python 2) object.
    fn PyUnicode_AsUTF8String(o: *mut PyObject) -> *mut PyObject;

    // Tuple

    /// New reference.
    fn PyTuple_New(len: Py_ssize_t) -> *mut PyObject;
    /// Borrowed reference.
    fn PyTuple_GetItem(t: *mut PyObject, i: Py_ssize_t) -> *mut PyObject;
    /// Steals `item`, even on failure.
    fn PyTuple_SetItem(t: *mut PyObject, i: Py_ssize_t, item: *mut PyObject) -> c_int;
    fn PyTuple_Size(t: *mut PyObject) -> Py_ssize_t;

    // List

    /// New reference.
    fn PyList_New(len: Py_ssize_t) -> *mut PyObject;
    fn PyList_Size(l: *mut PyObject) -> Py_ssize_t;
    /// Borrowed reference.
    fn PyList_GetItem(l: *mut PyObject, i: Py_ssize_t) -> *mut PyObject;
    /// Steals `item`, even on failure.
    fn PyList_SetItem(l: *mut PyObject, i: Py_ssize_t, item: *mut PyObject) -> c_int;

    // Sequence

    fn PySequence_Contains(seq: *mut PyObject, item: *mut PyObject) -> c_int;
    /// New reference.
    fn PySequence_Tuple(seq: *mut PyObject) -> *mut PyObject;

    // Slice

    /// New reference. Null bounds mean `None`.
    fn PySlice_New(start: *mut PyObject, stop: *mut PyObject, step: *mut PyObject) -> *mut PyObject;

    // Dict

    /// New reference.
    fn PyDict_New() -> *mut PyObject;
    fn PyDict_SetItem(d: *mut PyObject, key: *mut PyObject, v: *mut PyObject) -> c_int;
    /// Key and value come back borrowed.
    fn PyDict_Next(d: *mut PyObject, pos: *mut Py_ssize_t, key: *mut *mut PyObject, value: *mut *mut PyObject) -> c_int;

    // Set

    /// New reference. `iterable` may be null.
    fn PySet_New(iterable: *mut PyObject) -> *mut PyObject;
    fn PySet_Add(s: *mut PyObject, key: *mut PyObject) -> c_int;

    // Module / import

    /// Borrowed reference.
    fn PyModule_GetDict(m: *mut PyObject) -> *mut PyObject;
    /// New reference.
    fn PyImport_ImportModule(name: *const c_char) -> *mut PyObject;
    /// Borrowed reference.
    fn PyImport_AddModule(name: *const c_char) -> *mut PyObject;

    // Number

    /// New reference.
    fn PyNumber_Add(a: *mut PyObject, b: *mut PyObject) -> *mut PyObject;
    /// New reference.
    fn PyNumber_Subtract(a: *mut PyObject, b: *mut PyObject) -> *mut PyObject;
    /// New reference.
    fn PyNumber_Multiply(a: *mut PyObject, b: *mut PyObject) -> *mut PyObject;
    /// New reference.
    fn PyNumber_TrueDivide(a: *mut PyObject, b: *mut PyObject) -> *mut PyObject;

    // Compiler

    /// New reference.
    fn Py_CompileString(src: *const c_char, filename: *const c_char, start: c_int) -> *mut PyObject;
    /// New reference.
    fn PyEval_EvalCode(code: *mut PyObject, globals: *mut PyObject, locals: *mut PyObject) -> *mut PyObject;

    // Error

    fn PyErr_Clear() -> ();
    /// Borrowed reference.
    fn PyErr_Occurred() -> *mut PyObject;
    /// Transfers ownership of all three to the caller.
    fn PyErr_Fetch(ty: *mut *mut PyObject, value: *mut *mut PyObject, tb: *mut *mut PyObject) -> ();
    fn PyErr_NormalizeException(ty: *mut *mut PyObject, value: *mut *mut PyObject, tb: *mut *mut PyObject) -> ();
}

/// Functions the bridge cannot run without. Checked at load.
pub const REQUIRED_FUNCTIONS: &[&str] = &[
    "Py_GetVersion",
    "Py_InitializeEx",
    "Py_IsInitialized",
    "Py_IncRef",
    "Py_DecRef",
    "PyGILState_Ensure",
    "PyGILState_Release",
    "PyErr_Occurred",
    "PyErr_Fetch",
    "PyErr_Clear",
];

impl Functions {
    /// First entry of [`REQUIRED_FUNCTIONS`] that is not bound.
    pub fn first_missing_required(&self) -> Option<&'static str> {
        REQUIRED_FUNCTIONS
            .iter()
            .copied()
            .find(|name| !self.is_bound(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn empty_slot_reports_missing_symbol() {
        let api = Functions::unbound();
        assert!(!api.is_bound("PyUnicode_DecodeUTF8"));
        // SAFETY: the slot is empty, so nothing is called.
        let err = unsafe { api.PyUnicode_DecodeUTF8(ptr::null(), 0, ptr::null()) }.unwrap_err();
        assert!(matches!(err, Error::MissingSymbol("PyUnicode_DecodeUTF8")));
    }

    #[test]
    fn first_missing_required_follows_list_order() {
        let api = Functions::unbound();
        assert_eq!(api.first_missing_required(), Some(REQUIRED_FUNCTIONS[0]));
    }

    #[test]
    fn unknown_names_are_never_bound() {
        assert!(!Functions::unbound().is_bound("PyNotAFunction"));
    }
}
