//! Calls across the boundary, in both directions.
//!
//! Host → guest: arguments are converted, the guest callable runs, and the
//! result is converted back. A guest exception becomes
//! [`BridgeError::GuestExecution`] with the guest type and message intact.
//!
//! Guest → host: a [`HostFunction`] is exposed to guest code as a builtin
//! function. Host failures (errors and panics) are raised inside the guest as
//! exceptions; they never unwind through guest frames.

use std::panic::{catch_unwind, AssertUnwindSafe};

use pyo3::prelude::*;
use pyo3::types::{PyCFunction, PyDict, PyString, PyTuple};
use tracing::{debug, warn};

use crate::convert::{to_guest_bound, to_host_bound};
use crate::error::{BridgeError, Result};
use crate::proxy::{guest_type_name, ObjectProxy};
use crate::runtime::Runtime;
use crate::value::{Callable, HostFunction, HostValue, Kwargs};

fn pack_args<'py>(
    rt: &Runtime,
    py: Python<'py>,
    args: &[HostValue],
    kwargs: &Kwargs,
) -> Result<(Bound<'py, PyTuple>, Option<Bound<'py, PyDict>>)> {
    let positional = args
        .iter()
        .map(|a| to_guest_bound(rt, py, a))
        .collect::<Result<Vec<_>>>()?;
    let positional = PyTuple::new(py, positional).map_err(|e| BridgeError::guest(py, e))?;
    if kwargs.is_empty() {
        return Ok((positional, None));
    }
    let named = PyDict::new(py);
    for (name, value) in kwargs {
        named
            .set_item(name, to_guest_bound(rt, py, value)?)
            .map_err(|e| BridgeError::guest(py, e))?;
    }
    Ok((positional, Some(named)))
}

/// Call `callable` with host arguments and return the raw guest result.
pub(crate) fn call_guest_raw<'py>(
    rt: &Runtime,
    py: Python<'py>,
    callable: &Bound<'py, PyAny>,
    args: &[HostValue],
    kwargs: &Kwargs,
) -> Result<Bound<'py, PyAny>> {
    if !callable.is_callable() {
        return Err(BridgeError::NotCallable {
            operation: format!("call of '{}' object", guest_type_name(py, callable)?),
        });
    }
    let (positional, named) = pack_args(rt, py, args, kwargs)?;
    callable
        .call(positional, named.as_ref())
        .map_err(|e| BridgeError::guest(py, e))
}

/// Call `callable` with host arguments and convert the result.
pub(crate) fn call_guest<'py>(
    rt: &Runtime,
    py: Python<'py>,
    callable: &Bound<'py, PyAny>,
    args: &[HostValue],
    kwargs: &Kwargs,
) -> Result<HostValue> {
    let result = call_guest_raw(rt, py, callable, args, kwargs)?;
    to_host_bound(rt, py, &result)
}

impl ObjectProxy {
    /// Call the guest object. Fails with [`BridgeError::NotCallable`] when the
    /// object is not callable.
    pub fn call(&self, args: &[HostValue], kwargs: &Kwargs) -> Result<HostValue> {
        if !self.capabilities()?.callable {
            return Err(BridgeError::NotCallable {
                operation: format!("call of '{}' object", self.type_name()?),
            });
        }
        let rt = self.runtime();
        self.with_bound(|py, obj| call_guest(rt, py, obj, args, kwargs))
    }

    /// Like [`call`](Self::call) but keeps the result on the guest side.
    pub fn call_proxy(&self, args: &[HostValue], kwargs: &Kwargs) -> Result<ObjectProxy> {
        let rt = self.runtime();
        self.with_bound(|py, obj| {
            call_guest_raw(rt, py, obj, args, kwargs).map(|r| ObjectProxy::new(rt, r))
        })
    }

    /// `obj.name(*args, **kwargs)`.
    pub fn call_method(&self, name: &str, args: &[HostValue], kwargs: &Kwargs) -> Result<HostValue> {
        self.get_attr_proxy(name)?.call(args, kwargs)
    }

    /// Call with arguments that already live on the guest side: `args` is any
    /// guest sequence, `kwargs` any guest mapping.
    pub fn call_packed(
        &self,
        args: Option<&ObjectProxy>,
        kwargs: Option<&ObjectProxy>,
    ) -> Result<ObjectProxy> {
        let rt = self.runtime();
        self.with_bound(|py, obj| {
            if !obj.is_callable() {
                return Err(BridgeError::NotCallable {
                    operation: format!("call of '{}' object", guest_type_name(py, obj)?),
                });
            }
            let positional = match args {
                Some(a) => {
                    let a = a.bind(py)?;
                    rt.builtins_bound(py)
                        .getattr("tuple")
                        .and_then(|t| t.call1((a,)))
                        .and_then(|t| Ok(t.downcast_into::<PyTuple>()?))
                        .map_err(|e| BridgeError::guest(py, e))?
                }
                None => PyTuple::empty(py),
            };
            let named = match kwargs {
                Some(k) => {
                    let k = k.bind(py)?;
                    let d = rt
                        .builtins_bound(py)
                        .getattr("dict")
                        .and_then(|d| d.call1((k,)))
                        .and_then(|d| Ok(d.downcast_into::<PyDict>()?))
                        .map_err(|e| BridgeError::guest(py, e))?;
                    Some(d)
                }
                None => None,
            };
            obj.call(positional, named.as_ref())
                .map(|r| ObjectProxy::new(rt, r))
                .map_err(|e| BridgeError::guest(py, e))
        })
    }
}

impl Callable {
    /// Invoke from the host side. Host functions run directly; guest
    /// functions go through the guest call protocol.
    pub fn call(&self, args: &[HostValue], kwargs: &Kwargs) -> Result<HostValue> {
        match self {
            Callable::Host(func) => func.invoke(args, kwargs).map_err(BridgeError::HostFunction),
            Callable::Guest(proxy) => proxy.call(args, kwargs),
        }
    }
}

/// Expose `func` to guest code as a builtin function.
pub(crate) fn wrap_host_function<'py>(
    rt: &Runtime,
    py: Python<'py>,
    func: &HostFunction,
) -> Result<Bound<'py, PyAny>> {
    let rt = rt.clone();
    let func = func.clone();
    let trampoline = PyCFunction::new_closure(
        py,
        None,
        Some(c"Host function exposed to guest code."),
        move |args: &Bound<'_, PyTuple>, kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<Py<PyAny>> {
            let py = args.py();
            invoke_host(&rt, py, &func, args, kwargs)
                .map(Bound::unbind)
                .map_err(|e| e.into_pyerr(py))
        },
    )
    .map_err(|e| BridgeError::guest(py, e))?;
    Ok(trampoline.into_any())
}

fn invoke_host<'py>(
    rt: &Runtime,
    py: Python<'py>,
    func: &HostFunction,
    args: &Bound<'py, PyTuple>,
    kwargs: Option<&Bound<'py, PyDict>>,
) -> Result<Bound<'py, PyAny>> {
    let host_args = args
        .iter()
        .map(|a| to_host_bound(rt, py, &a))
        .collect::<Result<Vec<_>>>()?;
    let mut host_kwargs = Kwargs::new();
    if let Some(kwargs) = kwargs {
        for (k, v) in kwargs.iter() {
            let name = k
                .downcast::<PyString>()
                .map_err(|_| BridgeError::conversion("keyword", "keyword names must be strings"))?
                .to_string_lossy()
                .into_owned();
            host_kwargs.insert(name, to_host_bound(rt, py, &v)?);
        }
    }

    debug!(function = func.name(), args = host_args.len(), "guest called host function");
    // Host logic runs without the GIL so other host threads can cross.
    let outcome = py.allow_threads(|| {
        catch_unwind(AssertUnwindSafe(|| func.invoke(&host_args, &host_kwargs)))
    });

    match outcome {
        Ok(Ok(value)) => to_guest_bound(rt, py, &value),
        Ok(Err(err)) => Err(match err.downcast::<BridgeError>() {
            Ok(bridge) => bridge,
            Err(err) => BridgeError::HostFunction(err),
        }),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            warn!(function = func.name(), "host function panicked: {msg}");
            Err(BridgeError::HostFunction(anyhow::anyhow!(
                "host function '{}' panicked: {msg}",
                func.name()
            )))
        }
    }
}
