//! pybridge: drive an embedded CPython interpreter from Rust.
//!
//! This crate builds both an `rlib` for Rust hosts and a `cdylib` whose
//! `pyb_*` C ABI functions let foreign hosts do the same through integer
//! handles. It covers:
//!
//! - Runtime lifecycle (one interpreter per process, explicit finalization)
//! - Value conversion between [`HostValue`] and guest objects
//! - Object proxies with attribute, item and call access
//! - Guest iterators and context managers as Rust iterators and scopes
//! - Running guest source with stdout capture and warning suppression
//! - Error handling (guest exceptions keep their type and message)
//!
//! ```no_run
//! use pybridge::{HostValue, Kwargs, Runtime};
//!
//! # fn main() -> pybridge::Result<()> {
//! let rt = Runtime::embedded()?;
//! rt.run_string("def add(a, b):\n    return a + b\n")?;
//! let add = rt.main_module()?.get_attr_proxy("add")?;
//! let sum = add.call(&[HostValue::int(2), HostValue::int(3)], &Kwargs::new())?;
//! assert_eq!(sum.as_i64(), Some(5));
//! # Ok(())
//! # }
//! ```

pub mod callable;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod exec;
pub mod ffi;
pub mod iterate;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod value;

pub use config::{InterpreterConfig, RuntimeOptions};
pub use context::ContextScope;
pub use error::{BridgeError, GuestException, Result};
pub use exec::{CapturedOutput, GuestWarning};
pub use iterate::GuestIter;
pub use proxy::{Capabilities, GuestRef, ObjectProxy, NULL_SENTINEL};
pub use runtime::Runtime;
pub use value::{ArrayData, Callable, DType, HostFunction, HostKey, HostValue, Kwargs, NdArray};
