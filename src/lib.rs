//! pycall: load libpython at runtime and exchange values with it.
//!
//! Nothing links against Python at build time. On first use the crate asks
//! a `python` executable where its shared library lives, opens it with
//! `libloading`, works out which C API flavour it exports (Python 2 or 3,
//! narrow or wide unicode) and starts the interpreter.
//!
//! - [`Runtime`]: the loaded library, one per process
//! - [`PyRef`] / [`Borrowed`]: owned and borrowed object references
//! - [`Value`]: host-side values and the conversions both ways
//! - [`ffi`]: `pycall_*` C ABI exports over integer handles
//!
//! ```no_run
//! let rt = pycall::Runtime::instance()?;
//! let v = rt.with_gil(|rt| rt.eval_value("1 + 2"))?;
//! assert_eq!(v, pycall::Value::Int(3));
//! # Ok::<(), pycall::Error>(())
//! ```

pub mod abi;
pub mod config;
pub mod convert;
pub mod discovery;
pub mod error;
pub mod ffi;
pub mod libpython;
pub mod object;
pub mod pyref;
pub mod registry;
pub mod runtime;
pub mod value;

pub use abi::AbiProfile;
pub use config::Config;
pub use error::{Error, Result};
pub use pyref::{Borrowed, CompareOp, PyIter, PyRef};
pub use runtime::Runtime;
pub use value::{Complex, Dict, Set, Tuple, Value};

/// Evaluate an expression and convert the result.
pub fn eval(src: &str) -> Result<Value> {
    Runtime::instance()?.with_gil(|rt| rt.eval_value(src))
}

/// Import a module.
pub fn import(name: &str) -> Result<PyRef> {
    Runtime::instance()?.with_gil(|rt| rt.import(name))
}

/// Attribute names of the result of evaluating `src`.
pub fn dir(src: &str) -> Result<Vec<String>> {
    Runtime::instance()?.with_gil(|rt| rt.eval(src)?.dir())
}

/// Full version banner of the loaded interpreter.
pub fn python_description() -> Result<String> {
    Ok(Runtime::instance()?.description().to_string())
}

/// Version number of the loaded interpreter, e.g. `3.11.4`.
pub fn python_version() -> Result<String> {
    Ok(Runtime::instance()?.version().to_string())
}
