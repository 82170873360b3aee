//! Host-side handles to Python objects.
//!
//! - [`PyRef`] is an *owned* reference: it holds one count on the object
//!   and releases it exactly once on drop. Cloning takes another count.
//! - [`Borrowed`] is a *borrowed* reference: it holds no count and never
//!   releases. It cannot outlive the reference it was borrowed from;
//!   [`Borrowed::to_owned`] promotes it explicitly.
//!
//! Every method that calls into Python expects the GIL to be held (see
//! [`Runtime::with_gil`]). Dropping is the exception: it takes the GIL
//! itself.

use std::ffi::CString;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use libc::c_int;

use crate::convert;
use crate::error::{Error, Result};
use crate::object::{self, PyObject, Py_ssize_t};
use crate::runtime::Runtime;
use crate::value::Value;

/// Rich-comparison operators, numbered as in the C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CompareOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

/// An owned reference to a Python object.
pub struct PyRef {
    ptr: NonNull<PyObject>,
    rt: &'static Runtime,
}

// SAFETY: moving the handle between threads is fine; using it requires
// the GIL, which serializes access, and Drop takes the GIL itself.
unsafe impl Send for PyRef {}

/// A borrowed reference, valid for `'a`.
#[derive(Clone, Copy)]
pub struct Borrowed<'a> {
    ptr: NonNull<PyObject>,
    rt: &'static Runtime,
    _owner: PhantomData<&'a PyObject>,
}

impl<'a> Borrowed<'a> {
    /// # Safety
    /// `ptr` must be null or a live object kept alive for `'a` by someone else.
    pub(crate) unsafe fn from_ptr(rt: &'static Runtime, ptr: *mut PyObject) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            rt,
            _owner: PhantomData,
        })
    }

    pub fn as_ptr(&self) -> *mut PyObject {
        self.ptr.as_ptr()
    }

    pub fn runtime(&self) -> &'static Runtime {
        self.rt
    }

    /// Promote to an owned reference by taking one more count.
    pub fn to_owned(self) -> PyRef {
        self.rt.incref(self.as_ptr());
        PyRef {
            ptr: self.ptr,
            rt: self.rt,
        }
    }

    pub fn type_name(&self) -> String {
        // SAFETY: a borrowed reference points at a live object.
        unsafe { object::type_name_of(self.as_ptr()) }.into_owned()
    }
}

impl fmt::Debug for Borrowed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<borrowed {} at {:p}>", self.type_name(), self.ptr)
    }
}

impl PyRef {
    /// Take ownership of a new reference.
    ///
    /// # Safety
    /// `ptr` must be null or an owned reference the caller is handing over.
    pub unsafe fn from_owned_ptr(rt: &'static Runtime, ptr: *mut PyObject) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, rt })
    }

    /// Promote a borrowed pointer to an owned reference.
    ///
    /// # Safety
    /// `ptr` must be null or a live object.
    pub unsafe fn from_borrowed_ptr(rt: &'static Runtime, ptr: *mut PyObject) -> Option<Self> {
        unsafe { Borrowed::from_ptr(rt, ptr) }.map(Borrowed::to_owned)
    }

    pub fn as_ptr(&self) -> *mut PyObject {
        self.ptr.as_ptr()
    }

    /// Give up ownership without releasing, for APIs that steal references.
    pub fn into_ptr(self) -> *mut PyObject {
        let ptr = self.as_ptr();
        std::mem::forget(self);
        ptr
    }

    pub fn as_borrowed(&self) -> Borrowed<'_> {
        Borrowed {
            ptr: self.ptr,
            rt: self.rt,
            _owner: PhantomData,
        }
    }

    pub fn runtime(&self) -> &'static Runtime {
        self.rt
    }

    /// Current refcount, read straight from the object header.
    pub fn refcount(&self) -> isize {
        // SAFETY: we own a reference, so the object is live.
        unsafe { object::refcount(self.as_ptr()) }
    }

    /// Name of the object's concrete type.
    pub fn type_name(&self) -> String {
        self.as_borrowed().type_name()
    }

    pub fn is_none(&self) -> bool {
        self.rt.is_none(self.as_ptr())
    }

    /// Convert to a host value.
    pub fn to_value(&self) -> Result<Value> {
        convert::to_host(self.as_borrowed())
    }

    // ==================== Attributes ====================

    pub fn getattr(&self, name: &str) -> Result<PyRef> {
        let name = CString::new(name)?;
        // SAFETY: live object, nul-terminated name.
        self.rt.owned(unsafe {
            self.rt
                .api
                .PyObject_GetAttrString(self.as_ptr(), name.as_ptr())?
        })
    }

    pub fn setattr(&self, name: &str, value: &PyRef) -> Result<()> {
        let name = CString::new(name)?;
        // SAFETY: live objects; SetAttr does not steal `value`.
        let rc = unsafe {
            self.rt
                .api
                .PyObject_SetAttrString(self.as_ptr(), name.as_ptr(), value.as_ptr())?
        };
        self.rt.status(rc).map(drop)
    }

    pub fn delattr(&self, name: &str) -> Result<()> {
        let name = CString::new(name)?;
        // SAFETY: a null value means delete.
        let rc = unsafe {
            self.rt
                .api
                .PyObject_SetAttrString(self.as_ptr(), name.as_ptr(), ptr::null_mut())?
        };
        self.rt.status(rc).map(drop)
    }

    pub fn hasattr(&self, name: &str) -> Result<bool> {
        let name = CString::new(name)?;
        // SAFETY: live object, nul-terminated name. Never raises.
        let rc = unsafe {
            self.rt
                .api
                .PyObject_HasAttrString(self.as_ptr(), name.as_ptr())?
        };
        Ok(rc == 1)
    }

    /// `getattr` converted to a host value.
    pub fn attr(&self, name: &str) -> Result<Value> {
        self.getattr(name)?.to_value()
    }

    pub fn set_attr(&self, name: &str, value: &Value) -> Result<()> {
        let value = self.rt.to_foreign(value)?;
        self.setattr(name, &value)
    }

    // ==================== Items ====================

    pub fn getitem(&self, key: &PyRef) -> Result<PyRef> {
        // SAFETY: live objects.
        self.rt.owned(unsafe {
            self.rt
                .api
                .PyObject_GetItem(self.as_ptr(), key.as_ptr())?
        })
    }

    pub fn setitem(&self, key: &PyRef, value: &PyRef) -> Result<()> {
        // SAFETY: live objects; SetItem does not steal.
        let rc = unsafe {
            self.rt
                .api
                .PyObject_SetItem(self.as_ptr(), key.as_ptr(), value.as_ptr())?
        };
        self.rt.status(rc).map(drop)
    }

    pub fn delitem(&self, key: &PyRef) -> Result<()> {
        // SAFETY: live objects.
        let rc = unsafe { self.rt.api.PyObject_DelItem(self.as_ptr(), key.as_ptr())? };
        self.rt.status(rc).map(drop)
    }

    /// `self[key]` with a host key, converted to a host value.
    pub fn item(&self, key: &Value) -> Result<Value> {
        let key = self.rt.to_foreign(key)?;
        self.getitem(&key)?.to_value()
    }

    pub fn set_item(&self, key: &Value, value: &Value) -> Result<()> {
        let key = self.rt.to_foreign(key)?;
        let value = self.rt.to_foreign(value)?;
        self.setitem(&key, &value)
    }

    pub fn del_item(&self, key: &Value) -> Result<()> {
        let key = self.rt.to_foreign(key)?;
        self.delitem(&key)
    }

    /// `self[start:stop:step]`. `None` leaves that bound open.
    pub fn slice(&self, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Result<PyRef> {
        let bound = |b: Option<i64>| b.map(|i| self.rt.to_foreign(&Value::Int(i))).transpose();
        let (start, stop, step) = (bound(start)?, bound(stop)?, bound(step)?);
        let raw = |b: &Option<PyRef>| b.as_ref().map_or(ptr::null_mut(), PyRef::as_ptr);
        // SAFETY: live bounds or null for `None`; PySlice_New does not steal.
        let slice = self.rt.owned(unsafe {
            self.rt
                .api
                .PySlice_New(raw(&start), raw(&stop), raw(&step))?
        })?;
        self.getitem(&slice)
    }

    // ==================== Calls ====================

    /// `self(*args)`.
    pub fn call(&self, args: &[PyRef]) -> Result<PyRef> {
        let tuple = self.rt.owned(
            // SAFETY: PyTuple_New returns a new reference.
            unsafe { self.rt.api.PyTuple_New(args.len() as Py_ssize_t)? },
        )?;
        for (i, arg) in args.iter().enumerate() {
            let arg = arg.clone();
            // SAFETY: SetItem steals `arg`, even on failure.
            let rc = unsafe {
                self.rt
                    .api
                    .PyTuple_SetItem(tuple.as_ptr(), i as Py_ssize_t, arg.into_ptr())?
            };
            self.rt.status(rc)?;
        }
        self.call_tuple(&tuple)
    }

    /// `self(*args)` where `args` is already a tuple.
    pub fn call_tuple(&self, args: &PyRef) -> Result<PyRef> {
        // SAFETY: live objects; null kwargs.
        self.rt.owned(unsafe {
            self.rt
                .api
                .PyObject_Call(self.as_ptr(), args.as_ptr(), ptr::null_mut())?
        })
    }

    /// Call with host arguments and convert the result back.
    pub fn call_values(&self, args: &[Value]) -> Result<Value> {
        let args = args
            .iter()
            .map(|a| self.rt.to_foreign(a))
            .collect::<Result<Vec<_>>>()?;
        self.call(&args)?.to_value()
    }

    /// `self.name(*args)`.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.getattr(name)?.call_values(args)
    }

    // ==================== Comparison / text ====================

    pub fn compare(&self, other: &PyRef, op: CompareOp) -> Result<PyRef> {
        // SAFETY: live objects, valid opcode.
        self.rt.owned(unsafe {
            self.rt
                .api
                .PyObject_RichCompare(self.as_ptr(), other.as_ptr(), op as c_int)?
        })
    }

    pub fn compare_bool(&self, other: &PyRef, op: CompareOp) -> Result<bool> {
        self.compare(other, op)?.is_true()
    }

    /// `str(self)`.
    pub fn str(&self) -> Result<String> {
        // SAFETY: live object.
        let s = self.rt.owned(unsafe { self.rt.api.PyObject_Str(self.as_ptr())? })?;
        convert::text_of(s.as_borrowed())
    }

    /// `repr(self)`.
    pub fn repr(&self) -> Result<String> {
        // SAFETY: live object.
        let s = self.rt.owned(unsafe { self.rt.api.PyObject_Repr(self.as_ptr())? })?;
        convert::text_of(s.as_borrowed())
    }

    /// `dir(self)`.
    pub fn dir(&self) -> Result<Vec<String>> {
        // SAFETY: live object.
        let names = self.rt.owned(unsafe { self.rt.api.PyObject_Dir(self.as_ptr())? })?;
        names
            .iter()?
            .map(|name| convert::text_of(name?.as_borrowed()))
            .collect()
    }

    // ==================== Protocols ====================

    pub fn len(&self) -> Result<usize> {
        // SAFETY: live object.
        let n = unsafe { self.rt.api.PyObject_Size(self.as_ptr())? };
        if n < 0 {
            return Err(self.rt.check_error().err().unwrap_or_else(|| {
                Error::conversion(format!("{} has no length", self.type_name()))
            }));
        }
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    /// Truthiness, as `bool(self)`.
    pub fn is_true(&self) -> Result<bool> {
        // SAFETY: live object.
        let rc = unsafe { self.rt.api.PyObject_IsTrue(self.as_ptr())? };
        Ok(self.rt.status(rc)? == 1)
    }

    /// `item in self`.
    pub fn contains(&self, item: &PyRef) -> Result<bool> {
        // SAFETY: live objects.
        let rc = unsafe {
            self.rt
                .api
                .PySequence_Contains(self.as_ptr(), item.as_ptr())?
        };
        Ok(self.rt.status(rc)? == 1)
    }

    /// `iter(self)`.
    pub fn iter(&self) -> Result<PyIter> {
        // SAFETY: live object.
        let iter = self.rt.owned(unsafe { self.rt.api.PyObject_GetIter(self.as_ptr())? })?;
        Ok(PyIter { iter })
    }

    /// `__dict__` of a module, as a new reference.
    pub fn module_dict(&self) -> Result<PyRef> {
        // SAFETY: PyModule_GetDict borrows from `self`, which outlives the
        // promotion.
        let dict = unsafe {
            PyRef::from_borrowed_ptr(self.rt, self.rt.api.PyModule_GetDict(self.as_ptr())?)
        };
        dict.ok_or_else(|| {
            self.rt.check_error().err().unwrap_or_else(|| {
                Error::conversion(format!("{} is not a module", self.type_name()))
            })
        })
    }

    /// `isinstance(self, cls)`. `cls` may also be a tuple of classes.
    pub fn is_instance(&self, cls: &PyRef) -> Result<bool> {
        // SAFETY: live objects.
        let rc = unsafe {
            self.rt
                .api
                .PyObject_IsInstance(self.as_ptr(), cls.as_ptr())?
        };
        Ok(self.rt.status(rc)? == 1)
    }

    // ==================== Arithmetic ====================

    pub fn add(&self, other: &PyRef) -> Result<PyRef> {
        // SAFETY: live objects.
        self.rt.owned(unsafe { self.rt.api.PyNumber_Add(self.as_ptr(), other.as_ptr())? })
    }

    pub fn sub(&self, other: &PyRef) -> Result<PyRef> {
        // SAFETY: live objects.
        self.rt.owned(unsafe {
            self.rt
                .api
                .PyNumber_Subtract(self.as_ptr(), other.as_ptr())?
        })
    }

    pub fn mul(&self, other: &PyRef) -> Result<PyRef> {
        // SAFETY: live objects.
        self.rt.owned(unsafe {
            self.rt
                .api
                .PyNumber_Multiply(self.as_ptr(), other.as_ptr())?
        })
    }

    pub fn true_div(&self, other: &PyRef) -> Result<PyRef> {
        // SAFETY: live objects.
        self.rt.owned(unsafe {
            self.rt
                .api
                .PyNumber_TrueDivide(self.as_ptr(), other.as_ptr())?
        })
    }
}

impl Clone for PyRef {
    fn clone(&self) -> Self {
        self.as_borrowed().to_owned()
    }
}

impl Drop for PyRef {
    fn drop(&mut self) {
        self.rt.release(self.as_ptr());
    }
}

/// Identity, as Python's `is`.
impl PartialEq for PyRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl fmt::Debug for PyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} at {:p}>", self.type_name(), self.ptr)
    }
}

/// Owned references produced by a Python iterator.
pub struct PyIter {
    iter: PyRef,
}

impl Iterator for PyIter {
    type Item = Result<PyRef>;

    fn next(&mut self) -> Option<Self::Item> {
        let rt = self.iter.rt;
        // SAFETY: live iterator; PyIter_Next returns a new reference.
        let next = match unsafe { rt.api.PyIter_Next(self.iter.as_ptr()) } {
            Ok(p) => p,
            Err(e) => return Some(Err(e)),
        };
        // SAFETY: new reference or null.
        match unsafe { PyRef::from_owned_ptr(rt, next) } {
            Some(item) => Some(Ok(item)),
            // Null is either exhaustion or an error.
            None => rt.take_error().map(Err),
        }
    }
}
