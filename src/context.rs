//! Guest context managers as scoped acquisition.
//!
//! `__exit__` runs exactly once per successful `__enter__`: on normal
//! completion, when the body fails, and when the body panics (the
//! [`ContextScope`] drop guard). The body's error is the one surfaced; a
//! truthy `__exit__` return never swallows a host failure.

use pyo3::exceptions::PyRuntimeError;
use pyo3::intern;
use pyo3::prelude::*;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::proxy::ObjectProxy;
use crate::value::HostValue;

/// Why `__exit__` is being called.
enum ExitReason<'a> {
    Clean,
    Failed(&'a BridgeError),
    Panicked,
}

/// An entered guest context manager. Exits when finished or dropped.
pub struct ContextScope {
    manager: ObjectProxy,
    exit: ObjectProxy,
    entered: ObjectProxy,
    armed: bool,
}

impl ContextScope {
    /// The value `__enter__` returned, converted.
    pub fn value(&self) -> Result<HostValue> {
        self.entered.to_host()
    }

    /// The value `__enter__` returned, left on the guest side.
    pub fn entered_proxy(&self) -> &ObjectProxy {
        &self.entered
    }

    /// Exit with the outcome of the scoped body.
    ///
    /// If `__exit__` itself raises, that error is returned with the body
    /// error (if any) attached as its cause.
    pub fn finish<R>(mut self, outcome: Result<R>) -> Result<R> {
        self.armed = false;
        match outcome {
            Ok(value) => {
                self.call_exit(ExitReason::Clean)?;
                Ok(value)
            }
            Err(body) => match self.call_exit(ExitReason::Failed(&body)) {
                Ok(()) => Err(body),
                Err(exit) => Err(exit.superseding(body)),
            },
        }
    }

    fn call_exit(&self, reason: ExitReason<'_>) -> Result<()> {
        let rt = self.manager.runtime();
        rt.with_gil(|py| {
            let manager = self.manager.bind(py)?;
            let exit = self.exit.bind(py)?;
            let exc = match reason {
                ExitReason::Clean => None,
                ExitReason::Failed(err) => Some(exception_value(py, err)),
                ExitReason::Panicked => Some(
                    PyRuntimeError::new_err("host code panicked inside guest context")
                        .value(py)
                        .clone()
                        .into_any(),
                ),
            };
            let args = match &exc {
                None => {
                    let none = py.None().into_bound(py);
                    (manager, none.clone(), none.clone(), none)
                }
                Some(exc) => {
                    let tb = exc
                        .getattr(intern!(py, "__traceback__"))
                        .unwrap_or_else(|_| py.None().into_bound(py));
                    (manager, exc.get_type().into_any(), exc.clone(), tb)
                }
            };
            match exit.call1(args) {
                Ok(_) => {
                    debug!(failed = exc.is_some(), "exited guest context");
                    Ok(())
                }
                // Re-raising the exception it was handed is not a new failure.
                Err(e) if exc.as_ref().is_some_and(|x| x.as_ptr() == e.value(py).as_ptr()) => Ok(()),
                Err(e) => Err(BridgeError::guest(py, e)),
            }
        })
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let reason = if std::thread::panicking() {
            ExitReason::Panicked
        } else {
            ExitReason::Clean
        };
        if let Err(e) = self.call_exit(reason) {
            warn!(error = %e, "context exit failed during drop");
        }
    }
}

/// Guest exception object to hand to `__exit__` for a host-side failure.
fn exception_value<'py>(py: Python<'py>, err: &BridgeError) -> Bound<'py, PyAny> {
    match err.guest_exception().and_then(|exc| exc.value(py)) {
        Some(value) => value,
        None => PyRuntimeError::new_err(err.to_string())
            .value(py)
            .clone()
            .into_any(),
    }
}

impl ObjectProxy {
    /// Call `__enter__` and return a scope that will call `__exit__`.
    ///
    /// Both methods are looked up on the type, as the guest `with`
    /// statement does. When `__enter__` raises, `__exit__` is not called.
    pub fn enter(&self) -> Result<ContextScope> {
        let rt = self.runtime();
        self.with_bound(|py, obj| {
            let ty = obj.get_type();
            let enter = ty
                .getattr(intern!(py, "__enter__"))
                .map_err(|e| BridgeError::attribute(py, "__enter__", e))?;
            let exit = ty
                .getattr(intern!(py, "__exit__"))
                .map_err(|e| BridgeError::attribute(py, "__exit__", e))?;
            let entered = enter.call1((obj,)).map_err(|e| BridgeError::guest(py, e))?;
            Ok(ContextScope {
                manager: self.clone(),
                exit: ObjectProxy::new(rt, exit),
                entered: ObjectProxy::new(rt, entered),
                armed: true,
            })
        })
    }

    /// Run `body` with the converted `__enter__` value inside the context.
    pub fn with_context<F, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(HostValue) -> Result<R>,
    {
        let scope = self.enter()?;
        let outcome = scope.value().and_then(body);
        scope.finish(outcome)
    }

    /// Like [`with_context`](Self::with_context) but hands the body the
    /// unconverted `__enter__` value.
    pub fn with_context_proxy<F, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&ObjectProxy) -> Result<R>,
    {
        let scope = self.enter()?;
        let outcome = body(scope.entered_proxy());
        scope.finish(outcome)
    }
}
