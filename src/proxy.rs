//! Host-side proxies for guest objects.
//!
//! A [`GuestRef`] owns one strong reference to a guest object (or nothing,
//! for a null handle). An [`ObjectProxy`] shares a `GuestRef` between host
//! owners and caches what the object can do. Proxies compare equal when they
//! point at the same guest object, whichever proxy instance wraps it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use pyo3::exceptions::{PyAttributeError, PyTypeError};
use pyo3::intern;
use pyo3::prelude::*;

use crate::convert::{to_guest_bound, to_host_bound};
use crate::error::{BridgeError, Result};
use crate::runtime::Runtime;
use crate::value::HostValue;

/// What `str_repr` prints for a null handle.
pub const NULL_SENTINEL: &str = "<pointer: 0x0>";

/// Owned reference to a single guest object.
///
/// Creating one takes a guest reference; dropping it releases the reference
/// with the GIL held.
pub struct GuestRef {
    obj: Option<Py<PyAny>>,
}

impl GuestRef {
    pub(crate) fn new(obj: Py<PyAny>) -> Self {
        Self { obj: Some(obj) }
    }

    pub fn null() -> Self {
        Self { obj: None }
    }

    pub fn is_null(&self) -> bool {
        self.obj.is_none()
    }

    /// Guest identity (object address), `0` for a null handle.
    pub fn address(&self) -> usize {
        self.obj.as_ref().map_or(0, |o| o.as_ptr() as usize)
    }

    pub(crate) fn bind<'py>(&self, py: Python<'py>) -> Result<Bound<'py, PyAny>> {
        self.obj
            .as_ref()
            .map(|o| o.bind(py).clone())
            .ok_or(BridgeError::NullReference)
    }
}

impl Drop for GuestRef {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            Python::with_gil(|_py| drop(obj));
        }
    }
}

/// What a guest object supports, probed once per proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// `dir()` lists at least one name. Informational only: objects with a
    /// custom `__dir__` may still resolve attributes it does not report.
    pub attributes: bool,
    pub callable: bool,
    pub iterable: bool,
    pub iterator: bool,
    pub context_manager: bool,
}

impl Capabilities {
    fn probe(obj: &Bound<'_, PyAny>) -> Self {
        let py = obj.py();
        let ty = obj.get_type();
        let has = |name: &str| ty.hasattr(name).unwrap_or(false);
        let attributes = py
            .import("builtins")
            .and_then(|b| b.call_method1("dir", (obj,)))
            .and_then(|d| d.len())
            .map(|n| n > 0)
            .unwrap_or(false);
        let iterator = has("__next__") && has("__iter__");
        let caps = Self {
            attributes,
            callable: obj.is_callable(),
            iterable: iterator || has("__iter__") || has("__getitem__"),
            iterator,
            context_manager: has("__enter__") && has("__exit__"),
        };
        tracing::trace!(capabilities = ?caps, "probed guest object");
        caps
    }
}

struct ProxyInner {
    runtime: Runtime,
    guest: GuestRef,
    capabilities: OnceLock<Capabilities>,
}

/// Shared handle to a guest object.
#[derive(Clone)]
pub struct ObjectProxy {
    inner: Arc<ProxyInner>,
}

impl ObjectProxy {
    pub(crate) fn new(runtime: &Runtime, obj: Bound<'_, PyAny>) -> Self {
        Self::from_ref(runtime, GuestRef::new(obj.unbind()))
    }

    fn from_ref(runtime: &Runtime, guest: GuestRef) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                runtime: runtime.clone(),
                guest,
                capabilities: OnceLock::new(),
            }),
        }
    }

    /// A proxy with no underlying object. Every guest operation on it fails
    /// with [`BridgeError::NullReference`].
    pub fn null(runtime: &Runtime) -> Self {
        Self::from_ref(runtime, GuestRef::null())
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn is_null(&self) -> bool {
        self.inner.guest.is_null()
    }

    /// Guest identity of the wrapped object.
    pub fn id(&self) -> usize {
        self.inner.guest.address()
    }

    /// Whether two proxy instances are the same host-side handle.
    pub fn same_proxy(&self, other: &ObjectProxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn bind<'py>(&self, py: Python<'py>) -> Result<Bound<'py, PyAny>> {
        self.inner.guest.bind(py)
    }

    /// Run `f` with the GIL held and the object bound.
    pub(crate) fn with_bound<F, R>(&self, f: F) -> Result<R>
    where
        F: for<'py> FnOnce(Python<'py>, &Bound<'py, PyAny>) -> Result<R>,
    {
        self.inner.runtime.with_gil(|py| {
            let obj = self.bind(py)?;
            f(py, &obj)
        })
    }

    pub fn capabilities(&self) -> Result<Capabilities> {
        if let Some(caps) = self.inner.capabilities.get() {
            return Ok(*caps);
        }
        let caps = self.with_bound(|_py, obj| Ok(Capabilities::probe(obj)))?;
        Ok(*self.inner.capabilities.get_or_init(|| caps))
    }

    /// Name of the guest object's type.
    pub fn type_name(&self) -> Result<String> {
        self.with_bound(|py, obj| guest_type_name(py, obj))
    }

    /// Convert the wrapped object to a host value.
    pub fn to_host(&self) -> Result<HostValue> {
        let rt = self.runtime();
        self.with_bound(|py, obj| to_host_bound(rt, py, obj))
    }

    pub fn get_attr(&self, name: &str) -> Result<HostValue> {
        let rt = self.runtime();
        self.lookup(name, |py, attr| to_host_bound(rt, py, &attr))
    }

    /// Like [`get_attr`](Self::get_attr) but keeps the result on the guest side.
    pub fn get_attr_proxy(&self, name: &str) -> Result<ObjectProxy> {
        let rt = self.runtime();
        self.lookup(name, |_py, attr| Ok(ObjectProxy::new(rt, attr)))
    }

    fn lookup<F, R>(&self, name: &str, f: F) -> Result<R>
    where
        F: for<'py> FnOnce(Python<'py>, Bound<'py, PyAny>) -> Result<R>,
    {
        self.with_bound(|py, obj| {
            let attr = obj
                .getattr(name)
                .map_err(|e| BridgeError::attribute(py, name, e))?;
            f(py, attr)
        })
    }

    pub fn set_attr(&self, name: &str, value: &HostValue) -> Result<()> {
        let rt = self.runtime();
        self.with_bound(|py, obj| {
            let value = to_guest_bound(rt, py, value)?;
            obj.setattr(name, value).map_err(|e| {
                if e.is_instance_of::<PyAttributeError>(py) || e.is_instance_of::<PyTypeError>(py) {
                    BridgeError::Attribute {
                        name: name.to_string(),
                        message: e.value(py).to_string(),
                    }
                } else {
                    BridgeError::guest(py, e)
                }
            })
        })
    }

    /// Never fails: any probe failure (including a null handle) is `false`.
    pub fn has_attr(&self, name: &str) -> bool {
        self.with_bound(|_py, obj| Ok(obj.hasattr(name).unwrap_or(false)))
            .unwrap_or(false)
    }

    pub fn del_attr(&self, name: &str) -> Result<()> {
        self.with_bound(|py, obj| {
            obj.delattr(name)
                .map_err(|e| BridgeError::attribute(py, name, e))
        })
    }

    /// Attribute names, as reported by the guest `dir()`.
    pub fn dir(&self) -> Result<Vec<String>> {
        let rt = self.runtime();
        self.with_bound(|py, obj| {
            rt.builtins_bound(py)
                .call_method1(intern!(py, "dir"), (obj,))
                .and_then(|names| names.extract::<Vec<String>>())
                .map_err(|e| BridgeError::guest(py, e))
        })
    }

    pub fn get_item(&self, key: &HostValue) -> Result<HostValue> {
        let rt = self.runtime();
        self.with_bound(|py, obj| {
            let key = to_guest_bound(rt, py, key)?;
            let item = obj.get_item(key).map_err(|e| BridgeError::guest(py, e))?;
            to_host_bound(rt, py, &item)
        })
    }

    pub fn set_item(&self, key: &HostValue, value: &HostValue) -> Result<()> {
        let rt = self.runtime();
        self.with_bound(|py, obj| {
            let key = to_guest_bound(rt, py, key)?;
            let value = to_guest_bound(rt, py, value)?;
            obj.set_item(key, value).map_err(|e| BridgeError::guest(py, e))
        })
    }

    pub fn len(&self) -> Result<usize> {
        self.with_bound(|py, obj| obj.len().map_err(|e| BridgeError::guest(py, e)))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// `str(obj)`. A null handle prints [`NULL_SENTINEL`] and never
    /// dereferences; a failing `__str__` prints a placeholder naming the
    /// guest exception.
    pub fn str_repr(&self) -> String {
        if self.is_null() {
            return NULL_SENTINEL.to_string();
        }
        match self.with_bound(|py, obj| {
            obj.str()
                .map(|s| s.to_string_lossy().into_owned())
                .map_err(|e| BridgeError::guest(py, e))
        }) {
            Ok(s) => s,
            Err(BridgeError::GuestExecution { exception, .. }) => {
                format!("<unprintable object: {exception}>")
            }
            Err(e) => format!("<unavailable object: {e}>"),
        }
    }

    /// `repr(obj)`.
    pub fn repr(&self) -> Result<String> {
        self.with_bound(|py, obj| {
            obj.repr()
                .map(|s| s.to_string_lossy().into_owned())
                .map_err(|e| BridgeError::guest(py, e))
        })
    }

    /// Serialize with the guest `json.dumps()`.
    pub fn to_json(&self) -> Result<String> {
        self.with_bound(|py, obj| {
            crate::convert::py_to_json(py, obj).map_err(|e| BridgeError::guest(py, e))
        })
    }
}

pub(crate) fn guest_type_name(py: Python<'_>, obj: &Bound<'_, PyAny>) -> Result<String> {
    obj.get_type()
        .getattr(intern!(py, "__name__"))
        .and_then(|n| n.extract::<String>())
        .map_err(|e| BridgeError::guest(py, e))
}

impl PartialEq for ObjectProxy {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ObjectProxy {}

impl Hash for ObjectProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("ObjectProxy(null)")
        } else {
            write!(f, "ObjectProxy({:#x})", self.id())
        }
    }
}

impl fmt::Display for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.str_repr())
    }
}
