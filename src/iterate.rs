//! Iteration in both directions.
//!
//! [`GuestIter`] pulls values from a guest iterator lazily. Each step calls
//! the guest `next(it, sentinel)` with a sentinel object private to the
//! adapter, so the end of iteration (`None` on the Rust side) can never be
//! confused with a guest `None` value (`Some(Ok(HostValue::Null))`).
//!
//! [`Runtime::guest_iterator`] goes the other way and exposes a host
//! iterator to guest code.

use std::iter::FusedIterator;

use parking_lot::Mutex;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::convert::{to_guest_bound, to_host_bound};
use crate::error::{BridgeError, Result};
use crate::proxy::ObjectProxy;
use crate::runtime::Runtime;
use crate::value::HostValue;

/// Lazy sequence over a guest iterator. Not restartable.
pub struct GuestIter {
    iterator: ObjectProxy,
    sentinel: ObjectProxy,
    done: bool,
}

enum Step {
    Value(HostValue),
    End,
}

impl GuestIter {
    /// The guest iterator being consumed.
    pub fn iterator(&self) -> &ObjectProxy {
        &self.iterator
    }

    pub fn is_exhausted(&self) -> bool {
        self.done
    }

    fn step(&self) -> Result<Step> {
        let rt = self.iterator.runtime();
        rt.with_gil(|py| {
            let it = self.iterator.bind(py)?;
            let sentinel = self.sentinel.bind(py)?;
            let next = rt
                .builtins_bound(py)
                .call_method1("next", (it, &sentinel))
                .map_err(|e| BridgeError::guest(py, e))?;
            if next.as_ptr() == sentinel.as_ptr() {
                Ok(Step::End)
            } else {
                to_host_bound(rt, py, &next).map(Step::Value)
            }
        })
    }

    /// Callback mode: hand every value to `f`, discarding results.
    pub fn for_each_value<F>(self, mut f: F) -> Result<()>
    where
        F: FnMut(HostValue),
    {
        for value in self {
            f(value?);
        }
        Ok(())
    }

    /// Eager mode: collect every value. With `Some(limit)`, fails with
    /// [`BridgeError::IterationLimit`] as soon as the iterator produces more
    /// than `limit` values instead of truncating.
    pub fn collect_all(self, limit: Option<usize>) -> Result<Vec<HostValue>> {
        let mut out = Vec::new();
        for value in self {
            if let Some(limit) = limit {
                if out.len() >= limit {
                    return Err(BridgeError::IterationLimit { limit });
                }
            }
            out.push(value?);
        }
        Ok(out)
    }
}

impl Iterator for GuestIter {
    type Item = Result<HostValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Step::Value(v)) => Some(Ok(v)),
            Ok(Step::End) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for GuestIter {}

impl ObjectProxy {
    /// Acquire an iterator over this object.
    ///
    /// An object that is already an iterator is consumed in place, so a
    /// second call after exhaustion yields nothing. Any other iterable gets a
    /// fresh guest iterator each call.
    pub fn iterate(&self) -> Result<GuestIter> {
        let caps = self.capabilities()?;
        if !caps.iterable {
            return Err(BridgeError::Attribute {
                name: "__iter__".to_string(),
                message: format!("'{}' object is not iterable", self.type_name()?),
            });
        }
        let rt = self.runtime();
        self.with_bound(|py, obj| {
            let iterator = if caps.iterator {
                obj.clone()
            } else {
                rt.builtins_bound(py)
                    .call_method1("iter", (obj,))
                    .map_err(|e| BridgeError::guest(py, e))?
            };
            let sentinel = rt
                .builtins_bound(py)
                .call_method0("object")
                .map_err(|e| BridgeError::guest(py, e))?;
            Ok(GuestIter {
                iterator: ObjectProxy::new(rt, iterator),
                sentinel: ObjectProxy::new(rt, sentinel),
                done: false,
            })
        })
    }
}

/// Host iterator seen from guest code.
#[pyclass(name = "HostIterator", module = "pybridge")]
pub(crate) struct HostIterator {
    runtime: Runtime,
    source: Mutex<Box<dyn Iterator<Item = HostValue> + Send>>,
}

#[pymethods]
impl HostIterator {
    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(&self, py: Python<'_>) -> PyResult<Option<Py<PyAny>>> {
        let Some(mut source) = self.source.try_lock() else {
            return Err(PyValueError::new_err("host iterator already executing"));
        };
        match source.next() {
            None => Ok(None),
            Some(value) => to_guest_bound(&self.runtime, py, &value)
                .map(|v| Some(v.unbind()))
                .map_err(|e| e.into_pyerr(py)),
        }
    }
}

impl Runtime {
    /// Expose a host iterator to guest code as a guest iterator object.
    pub fn guest_iterator<I>(&self, values: I) -> Result<ObjectProxy>
    where
        I: IntoIterator<Item = HostValue>,
        I::IntoIter: Send + 'static,
    {
        let source: Box<dyn Iterator<Item = HostValue> + Send> = Box::new(values.into_iter());
        self.with_gil(|py| {
            let iter = Bound::new(
                py,
                HostIterator {
                    runtime: self.clone(),
                    source: Mutex::new(source),
                },
            )
            .map_err(|e| BridgeError::guest(py, e))?;
            Ok(ObjectProxy::new(self, iter.into_any()))
        })
    }

    /// Collect a guest iterable into host values, `limit` as in
    /// [`GuestIter::collect_all`].
    pub fn collect_iterable(
        &self,
        iterable: &ObjectProxy,
        limit: Option<usize>,
    ) -> Result<Vec<HostValue>> {
        iterable.iterate()?.collect_all(limit)
    }
}
