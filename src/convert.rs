//! Value conversion between [`HostValue`] and guest objects.
//!
//! Host → guest is driven by the `HostValue` variant. Guest → host probes the
//! guest type in a fixed order (singletons, scalars, sequences, mappings,
//! arrays, functions) and falls back to an [`ObjectProxy`] for everything
//! else. The fallback is checked last so no structural rule is shadowed.

use pyo3::intern;
use pyo3::prelude::*;
use pyo3::types::{
    PyBool, PyByteArray, PyBytes, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple,
};
use tracing::trace;

use crate::callable::wrap_host_function;
use crate::error::{BridgeError, Result};
use crate::proxy::{guest_type_name, ObjectProxy};
use crate::runtime::{NumpyTypes, Runtime};
use crate::value::{collapse_homogeneous, ArrayData, Callable, DType, HostKey, HostValue, NdArray};

impl Runtime {
    /// Convert a host value into a guest object.
    pub fn to_guest(&self, value: &HostValue) -> Result<ObjectProxy> {
        self.with_gil(|py| Ok(ObjectProxy::new(self, to_guest_bound(self, py, value)?)))
    }

    /// Materialize a guest object as a host value.
    pub fn to_host(&self, obj: &ObjectProxy) -> Result<HostValue> {
        self.with_gil(|py| to_host_bound(self, py, &obj.bind(py)?))
    }

    /// Parse JSON with the guest `json.loads()`.
    pub fn from_json(&self, json: &str) -> Result<ObjectProxy> {
        self.with_gil(|py| {
            let obj = json_to_py(py, json).map_err(|e| BridgeError::guest(py, e))?;
            Ok(ObjectProxy::new(self, obj))
        })
    }
}

fn guest_err(py: Python<'_>) -> impl FnOnce(PyErr) -> BridgeError + '_ {
    move |e| BridgeError::guest(py, e)
}

fn int_object(py: Python<'_>, i: i64) -> Bound<'_, PyAny> {
    match i.into_pyobject(py) {
        Ok(obj) => obj.into_any(),
        Err(never) => match never {},
    }
}

/// One element for length-1 vectors, a guest list otherwise.
fn scalar_or_list<'py, T>(
    py: Python<'py>,
    items: &[T],
    mut element: impl FnMut(&T) -> Bound<'py, PyAny>,
) -> Result<Bound<'py, PyAny>> {
    if let [only] = items {
        return Ok(element(only));
    }
    let elements: Vec<_> = items.iter().map(element).collect();
    Ok(PyList::new(py, elements).map_err(guest_err(py))?.into_any())
}

pub(crate) fn to_guest_bound<'py>(
    rt: &Runtime,
    py: Python<'py>,
    value: &HostValue,
) -> Result<Bound<'py, PyAny>> {
    match value {
        HostValue::Null => Ok(py.None().into_bound(py)),
        HostValue::Logical(v) => {
            scalar_or_list(py, v, |b| PyBool::new(py, *b).to_owned().into_any())
        }
        HostValue::Integer(v) => scalar_or_list(py, v, |i| int_object(py, *i)),
        HostValue::Double(v) => scalar_or_list(py, v, |f| PyFloat::new(py, *f).into_any()),
        HostValue::Str(v) => scalar_or_list(py, v, |s| PyString::new(py, s).into_any()),
        HostValue::Bytes(b) => Ok(PyBytes::new(py, b).into_any()),
        HostValue::List(items) => {
            let elements = items
                .iter()
                .map(|v| to_guest_bound(rt, py, v))
                .collect::<Result<Vec<_>>>()?;
            Ok(PyList::new(py, elements).map_err(guest_err(py))?.into_any())
        }
        HostValue::Tuple(items) => {
            let elements = items
                .iter()
                .map(|v| to_guest_bound(rt, py, v))
                .collect::<Result<Vec<_>>>()?;
            Ok(PyTuple::new(py, elements).map_err(guest_err(py))?.into_any())
        }
        HostValue::Dict(map) => {
            let dict = PyDict::new(py);
            for (k, v) in map {
                let key = key_to_guest(py, k)?;
                let value = to_guest_bound(rt, py, v)?;
                dict.set_item(key, value).map_err(guest_err(py))?;
            }
            Ok(dict.into_any())
        }
        HostValue::Array(array) => array_to_guest(rt, py, array),
        HostValue::Callable(Callable::Host(func)) => wrap_host_function(rt, py, func),
        HostValue::Callable(Callable::Guest(proxy)) | HostValue::Object(proxy) => proxy.bind(py),
    }
}

fn key_to_guest<'py>(py: Python<'py>, key: &HostKey) -> Result<Bound<'py, PyAny>> {
    Ok(match key {
        HostKey::None => py.None().into_bound(py),
        HostKey::Bool(b) => PyBool::new(py, *b).to_owned().into_any(),
        HostKey::Int(i) => int_object(py, *i),
        HostKey::Float(f) => PyFloat::new(py, *f).into_any(),
        HostKey::Str(s) => PyString::new(py, s).into_any(),
        HostKey::Bytes(b) => PyBytes::new(py, b).into_any(),
        HostKey::Tuple(items) => {
            let elements = items
                .iter()
                .map(|k| key_to_guest(py, k))
                .collect::<Result<Vec<_>>>()?;
            PyTuple::new(py, elements).map_err(guest_err(py))?.into_any()
        }
        HostKey::Object(proxy) => proxy.bind(py)?,
    })
}

pub(crate) fn to_host_bound<'py>(
    rt: &Runtime,
    py: Python<'py>,
    obj: &Bound<'py, PyAny>,
) -> Result<HostValue> {
    if obj.is_none() {
        return Ok(HostValue::Null);
    }
    // bool before int: bool is an int subclass.
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Ok(HostValue::bool(b.is_true()));
    }
    if obj.is_instance_of::<PyInt>() {
        return Ok(match obj.extract::<i64>() {
            Ok(i) => HostValue::int(i),
            Err(_) => {
                trace!("integer outside i64 range stays on the guest side");
                HostValue::Object(ObjectProxy::new(rt, obj.clone()))
            }
        });
    }
    if let Ok(f) = obj.downcast::<PyFloat>() {
        return Ok(HostValue::float(f.value()));
    }
    if let Ok(s) = obj.downcast::<PyString>() {
        return Ok(HostValue::string(s.to_string_lossy().into_owned()));
    }
    if let Ok(b) = obj.downcast::<PyBytes>() {
        return Ok(HostValue::Bytes(b.as_bytes().to_vec()));
    }
    if let Ok(b) = obj.downcast::<PyByteArray>() {
        return Ok(HostValue::Bytes(b.to_vec()));
    }
    if let Ok(list) = obj.downcast::<PyList>() {
        let items = list
            .iter()
            .map(|item| to_host_bound(rt, py, &item))
            .collect::<Result<Vec<_>>>()?;
        return Ok(collapse_homogeneous(&items).unwrap_or(HostValue::List(items)));
    }
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        let items = tuple
            .iter()
            .map(|item| to_host_bound(rt, py, &item))
            .collect::<Result<Vec<_>>>()?;
        return Ok(collapse_homogeneous(&items).unwrap_or(HostValue::Tuple(items)));
    }
    if let Ok(dict) = obj.downcast::<PyDict>() {
        let mut map = indexmap::IndexMap::with_capacity(dict.len());
        for (k, v) in dict.iter() {
            map.insert(key_to_host(rt, py, &k)?, to_host_bound(rt, py, &v)?);
        }
        return Ok(HostValue::Dict(map));
    }
    match rt.numpy() {
        Some(np) => {
            if obj.is_instance(np.ndarray.bind(py)).map_err(guest_err(py))? {
                if let Some(array) = array_to_host(np, py, obj)? {
                    return Ok(HostValue::Array(array));
                }
            } else if obj.is_instance(np.generic.bind(py)).map_err(guest_err(py))? {
                let item = obj.call_method0("item").map_err(guest_err(py))?;
                if !item.is_instance(np.generic.bind(py)).map_err(guest_err(py))? {
                    return to_host_bound(rt, py, &item);
                }
            }
        }
        None if is_ndarray(obj) => {
            return Err(BridgeError::conversion(
                "ndarray",
                "array conversion support (numpy) is not available",
            ));
        }
        None => {}
    }
    if obj
        .is_instance(rt.function_types(py).as_any())
        .map_err(guest_err(py))?
    {
        return Ok(HostValue::Callable(Callable::Guest(ObjectProxy::new(rt, obj.clone()))));
    }
    if !rt.is_available() {
        return Err(BridgeError::conversion(
            guest_type_name(py, obj)?,
            "guest runtime is not live",
        ));
    }
    Ok(HostValue::Object(ObjectProxy::new(rt, obj.clone())))
}

fn key_to_host<'py>(rt: &Runtime, py: Python<'py>, key: &Bound<'py, PyAny>) -> Result<HostKey> {
    if key.is_none() {
        return Ok(HostKey::None);
    }
    if let Ok(b) = key.downcast::<PyBool>() {
        return Ok(HostKey::Bool(b.is_true()));
    }
    if key.is_instance_of::<PyInt>() {
        if let Ok(i) = key.extract::<i64>() {
            return Ok(HostKey::Int(i));
        }
    } else if let Ok(f) = key.downcast::<PyFloat>() {
        return Ok(HostKey::Float(f.value()));
    } else if let Ok(s) = key.downcast::<PyString>() {
        return Ok(HostKey::Str(s.to_string_lossy().into_owned()));
    } else if let Ok(b) = key.downcast::<PyBytes>() {
        return Ok(HostKey::Bytes(b.as_bytes().to_vec()));
    } else if let Ok(t) = key.downcast::<PyTuple>() {
        let items = t
            .iter()
            .map(|k| key_to_host(rt, py, &k))
            .collect::<Result<Vec<_>>>()?;
        return Ok(HostKey::Tuple(items));
    }
    Ok(HostKey::Object(ObjectProxy::new(rt, key.clone())))
}

// ==================== Arrays ====================

fn array_to_guest<'py>(rt: &Runtime, py: Python<'py>, array: &NdArray) -> Result<Bound<'py, PyAny>> {
    let np = rt.numpy().ok_or_else(|| {
        BridgeError::conversion("array", "array conversion support (numpy) is not available")
    })?;
    let flat = match array.data() {
        ArrayData::Bool(v) => PyList::new(py, v.iter().copied()),
        ArrayData::Int8(v) => PyList::new(py, v.iter().copied()),
        ArrayData::Int16(v) => PyList::new(py, v.iter().copied()),
        ArrayData::Int32(v) => PyList::new(py, v.iter().copied()),
        ArrayData::Int64(v) => PyList::new(py, v.iter().copied()),
        ArrayData::UInt8(v) => PyList::new(py, v.iter().copied()),
        ArrayData::UInt16(v) => PyList::new(py, v.iter().copied()),
        ArrayData::UInt32(v) => PyList::new(py, v.iter().copied()),
        ArrayData::UInt64(v) => PyList::new(py, v.iter().copied()),
        ArrayData::Float32(v) => PyList::new(py, v.iter().copied()),
        ArrayData::Float64(v) => PyList::new(py, v.iter().copied()),
    }
    .map_err(guest_err(py))?;
    let shape = PyTuple::new(py, array.shape().iter().copied()).map_err(guest_err(py))?;
    let kwargs = PyDict::new(py);
    kwargs
        .set_item("dtype", array.dtype().name())
        .map_err(guest_err(py))?;
    np.module
        .bind(py)
        .call_method("array", (flat,), Some(&kwargs))
        .and_then(|a| a.call_method1("reshape", (shape,)))
        .map_err(guest_err(py))
}

/// Whether `obj` is a `numpy.ndarray` (or subclass), judged by type names
/// alone so it works without importing numpy.
fn is_ndarray(obj: &Bound<'_, PyAny>) -> bool {
    let py = obj.py();
    for ty in obj.get_type().mro().iter() {
        let module = ty.getattr(intern!(py, "__module__")).and_then(|m| m.extract::<String>());
        let name = ty.getattr(intern!(py, "__name__")).and_then(|n| n.extract::<String>());
        if let (Ok(module), Ok(name)) = (module, name) {
            if module == "numpy" && name == "ndarray" {
                return true;
            }
        }
    }
    false
}

/// `None` when the dtype has no host counterpart; the caller then falls back
/// to a proxy.
fn array_to_host<'py>(
    np: &NumpyTypes,
    py: Python<'py>,
    obj: &Bound<'py, PyAny>,
) -> Result<Option<NdArray>> {
    let dtype_name: String = obj
        .getattr("dtype")
        .and_then(|d| d.getattr("name"))
        .and_then(|n| n.extract())
        .map_err(guest_err(py))?;
    let Some(dtype) = DType::from_name(&dtype_name) else {
        trace!(dtype = %dtype_name, "unsupported array dtype stays on the guest side");
        return Ok(None);
    };
    let shape: Vec<usize> = obj
        .getattr("shape")
        .and_then(|s| s.extract())
        .map_err(guest_err(py))?;
    let flat = np
        .module
        .bind(py)
        .call_method1("ravel", (obj,))
        .and_then(|a| a.call_method0("tolist"))
        .map_err(guest_err(py))?;
    let data = match dtype {
        DType::Bool => flat.extract().map(ArrayData::Bool),
        DType::Int8 => flat.extract().map(ArrayData::Int8),
        DType::Int16 => flat.extract().map(ArrayData::Int16),
        DType::Int32 => flat.extract().map(ArrayData::Int32),
        DType::Int64 => flat.extract().map(ArrayData::Int64),
        DType::UInt8 => flat.extract().map(ArrayData::UInt8),
        DType::UInt16 => flat.extract().map(ArrayData::UInt16),
        DType::UInt32 => flat.extract().map(ArrayData::UInt32),
        DType::UInt64 => flat.extract().map(ArrayData::UInt64),
        DType::Float32 => flat.extract().map(ArrayData::Float32),
        DType::Float64 => flat.extract().map(ArrayData::Float64),
    }
    .map_err(guest_err(py))?;
    NdArray::new(shape, data)
        .map(Some)
        .ok_or_else(|| BridgeError::conversion("ndarray", "array data does not match its shape"))
}

// ==================== JSON Bridge ====================

/// Convert a guest object to a JSON string using `json.dumps()`.
pub(crate) fn py_to_json(py: Python<'_>, obj: &Bound<'_, PyAny>) -> PyResult<String> {
    let json_mod = py.import("json")?;
    let result = json_mod.call_method1("dumps", (obj,))?;
    result.extract::<String>()
}

/// Parse a JSON string into a guest object using `json.loads()`.
pub(crate) fn json_to_py<'py>(py: Python<'py>, json_str: &str) -> PyResult<Bound<'py, PyAny>> {
    let json_mod = py.import("json")?;
    json_mod.call_method1("loads", (json_str,))
}
