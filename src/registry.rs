//! Handle registry: maps integer handles to owned Python references.
//!
//! Used by the C ABI exports, where callers cannot hold a [`PyRef`]
//! directly. Handles are monotonically increasing `isize` values starting
//! from 1. Handle 0 is reserved as the null/error sentinel.
//!
//! The map is `Mutex`-protected. Entries are owned references, so removing
//! one releases its count; that takes the GIL, so never drop an entry while
//! holding the registry lock.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::pyref::PyRef;

/// Global handle registry, initialized by `pycall_init()`.
static REGISTRY: Mutex<Option<HandleRegistry>> = Mutex::new(None);

struct HandleRegistry {
    objects: HashMap<isize, PyRef>,
    next_id: isize,
}

impl HandleRegistry {
    fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }
}

fn lock() -> std::sync::MutexGuard<'static, Option<HandleRegistry>> {
    // A panic while holding the lock leaves the map itself consistent.
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

// ==================== Public API ====================

/// Initialize the registry. Keeps existing handles if already initialized.
pub fn init_registry() {
    let mut guard = lock();
    if guard.is_none() {
        *guard = Some(HandleRegistry::new());
    }
}

/// Release every handle and tear the registry down.
pub fn destroy_registry() {
    let old = lock().take();
    // Dropped after the lock is released.
    drop(old);
}

/// Insert an owned reference and return its handle.
pub fn insert(obj: PyRef) -> Result<isize> {
    let mut guard = lock();
    let reg = guard.as_mut().ok_or(Error::NotInitialized)?;
    let id = reg.next_id;
    reg.next_id = reg
        .next_id
        .checked_add(1)
        .ok_or_else(|| Error::conversion("handle counter overflow"))?;
    reg.objects.insert(id, obj);
    Ok(id)
}

/// Another owned reference to the object behind `handle`; the handle stays valid.
pub fn get(handle: isize) -> Result<PyRef> {
    let guard = lock();
    let reg = guard.as_ref().ok_or(Error::NotInitialized)?;
    reg.objects
        .get(&handle)
        .cloned()
        .ok_or(Error::InvalidHandle(handle))
}

/// Remove a handle and return its reference.
pub fn remove(handle: isize) -> Result<PyRef> {
    let mut guard = lock();
    let reg = guard.as_mut().ok_or(Error::NotInitialized)?;
    reg.objects
        .remove(&handle)
        .ok_or(Error::InvalidHandle(handle))
}

/// Run `f` on the object behind `handle`.
///
/// The reference is cloned and the lock released before `f` runs, so `f`
/// may insert new handles without deadlocking.
pub fn with_object<F, R>(handle: isize, f: F) -> Result<R>
where
    F: FnOnce(&PyRef) -> Result<R>,
{
    let obj = get(handle)?;
    f(&obj)
}

/// Number of live handles (for diagnostics).
pub fn len() -> Result<usize> {
    let guard = lock();
    let reg = guard.as_ref().ok_or(Error::NotInitialized)?;
    Ok(reg.objects.len())
}
