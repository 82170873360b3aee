#![allow(dead_code)]

use pycall::{Result, Runtime};

/// The shared runtime, or `None` when this machine has no usable libpython.
pub fn runtime() -> Option<&'static Runtime> {
    match Runtime::instance() {
        Ok(rt) => Some(rt),
        Err(e) => {
            eprintln!("skipping: no python runtime ({e})");
            None
        }
    }
}

/// Run `f` under the GIL, or skip the test when Python is unavailable.
pub fn with_python(f: impl FnOnce(&'static Runtime) -> Result<()>) {
    let Some(rt) = runtime() else {
        return;
    };
    if let Err(e) = rt.with_gil(f) {
        panic!("python error: {e}");
    }
}

pub fn is_python3(rt: &Runtime) -> bool {
    rt.version().starts_with('3')
}
