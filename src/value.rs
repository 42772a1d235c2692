//! Host-side value model.
//!
//! [`HostValue`] is the closed set of shapes a guest value can take once it
//! reaches the host. Atomic vectors (`Logical`, `Integer`, `Double`, `Str`)
//! model host vectors: a length-1 vector is a scalar, anything else is a
//! sequence. Guest objects with no structural counterpart stay on the guest
//! side behind an [`ObjectProxy`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::proxy::ObjectProxy;

/// Named arguments, in call order.
pub type Kwargs = IndexMap<String, HostValue>;

/// Signature of host logic callable from guest code.
pub type HostFn = dyn Fn(&[HostValue], &Kwargs) -> anyhow::Result<HostValue> + Send + Sync;

/// A host function that can be handed to guest code.
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    func: Arc<HostFn>,
}

impl HostFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[HostValue], &Kwargs) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: &[HostValue], kwargs: &Kwargs) -> anyhow::Result<HostValue> {
        (self.func)(args, kwargs)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFunction({})", self.name)
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

/// Something that can be called from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    /// Host logic; becomes a guest trampoline when it crosses.
    Host(HostFunction),
    /// A guest function, kept on the guest side.
    Guest(ObjectProxy),
}

/// Element type of an [`NdArray`], named like the guest's dtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => DType::Bool,
            "int8" => DType::Int8,
            "int16" => DType::Int16,
            "int32" => DType::Int32,
            "int64" => DType::Int64,
            "uint8" => DType::UInt8,
            "uint16" => DType::UInt16,
            "uint32" => DType::UInt32,
            "uint64" => DType::UInt64,
            "float32" => DType::Float32,
            "float64" => DType::Float64,
            _ => return None,
        })
    }
}

/// Flat, row-major element storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::Int8(_) => DType::Int8,
            ArrayData::Int16(_) => DType::Int16,
            ArrayData::Int32(_) => DType::Int32,
            ArrayData::Int64(_) => DType::Int64,
            ArrayData::UInt8(_) => DType::UInt8,
            ArrayData::UInt16(_) => DType::UInt16,
            ArrayData::UInt32(_) => DType::UInt32,
            ArrayData::UInt64(_) => DType::UInt64,
            ArrayData::Float32(_) => DType::Float32,
            ArrayData::Float64(_) => DType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Int8(v) => v.len(),
            ArrayData::Int16(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::UInt8(v) => v.len(),
            ArrayData::UInt16(v) => v.len(),
            ArrayData::UInt32(v) => v.len(),
            ArrayData::UInt64(v) => v.len(),
            ArrayData::Float32(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rectangular numeric array.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    /// Returns `None` when `data` does not fill `shape` exactly.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
}

/// Hashable subset of values usable as mapping keys.
#[derive(Debug, Clone)]
pub enum HostKey {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<HostKey>),
    Object(ObjectProxy),
}

impl PartialEq for HostKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostKey::None, HostKey::None) => true,
            (HostKey::Bool(a), HostKey::Bool(b)) => a == b,
            (HostKey::Int(a), HostKey::Int(b)) => a == b,
            (HostKey::Float(a), HostKey::Float(b)) => a.to_bits() == b.to_bits(),
            (HostKey::Str(a), HostKey::Str(b)) => a == b,
            (HostKey::Bytes(a), HostKey::Bytes(b)) => a == b,
            (HostKey::Tuple(a), HostKey::Tuple(b)) => a == b,
            (HostKey::Object(a), HostKey::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for HostKey {}

impl Hash for HostKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            HostKey::None => {}
            HostKey::Bool(b) => b.hash(state),
            HostKey::Int(i) => i.hash(state),
            HostKey::Float(f) => f.to_bits().hash(state),
            HostKey::Str(s) => s.hash(state),
            HostKey::Bytes(b) => b.hash(state),
            HostKey::Tuple(t) => t.hash(state),
            HostKey::Object(p) => p.hash(state),
        }
    }
}

impl From<&str> for HostKey {
    fn from(s: &str) -> Self {
        HostKey::Str(s.to_string())
    }
}

impl From<String> for HostKey {
    fn from(s: String) -> Self {
        HostKey::Str(s)
    }
}

impl From<i64> for HostKey {
    fn from(i: i64) -> Self {
        HostKey::Int(i)
    }
}

/// A guest value materialized for host consumption.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Logical(Vec<bool>),
    Integer(Vec<i64>),
    Double(Vec<f64>),
    Str(Vec<String>),
    Bytes(Vec<u8>),
    /// Heterogeneous sequence; crosses as a guest list.
    List(Vec<HostValue>),
    /// Heterogeneous sequence marked tuple-like; crosses as a guest tuple.
    Tuple(Vec<HostValue>),
    Dict(IndexMap<HostKey, HostValue>),
    Array(NdArray),
    Callable(Callable),
    Object(ObjectProxy),
}

/// Kind of a length-1 atomic vector, used to decide whether a guest
/// sequence is homogeneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarKind {
    Logical,
    Integer,
    Double,
    Str,
}

impl HostValue {
    pub fn bool(b: bool) -> Self {
        HostValue::Logical(vec![b])
    }

    pub fn int(i: i64) -> Self {
        HostValue::Integer(vec![i])
    }

    pub fn float(f: f64) -> Self {
        HostValue::Double(vec![f])
    }

    pub fn string(s: impl Into<String>) -> Self {
        HostValue::Str(vec![s.into()])
    }

    pub fn function<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[HostValue], &Kwargs) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        HostValue::Callable(Callable::Host(HostFunction::new(name, func)))
    }

    /// Build a mapping from `(key, value)` pairs, keeping the first
    /// occurrence's position when a key repeats.
    pub fn dict<K, I>(pairs: I) -> Self
    where
        K: Into<HostKey>,
        I: IntoIterator<Item = (K, HostValue)>,
    {
        HostValue::Dict(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Short tag used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Logical(_) => "logical",
            HostValue::Integer(_) => "integer",
            HostValue::Double(_) => "double",
            HostValue::Str(_) => "character",
            HostValue::Bytes(_) => "raw",
            HostValue::List(_) => "list",
            HostValue::Tuple(_) => "tuple",
            HostValue::Dict(_) => "dict",
            HostValue::Array(_) => "array",
            HostValue::Callable(_) => "function",
            HostValue::Object(_) => "object",
        }
    }

    pub(crate) fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            HostValue::Logical(v) if v.len() == 1 => Some(ScalarKind::Logical),
            HostValue::Integer(v) if v.len() == 1 => Some(ScalarKind::Integer),
            HostValue::Double(v) if v.len() == 1 => Some(ScalarKind::Double),
            HostValue::Str(v) if v.len() == 1 => Some(ScalarKind::Str),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Logical(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::Integer(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Double(v) if v.len() == 1 => Some(v[0]),
            HostValue::Integer(v) if v.len() == 1 => Some(v[0] as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(v) if v.len() == 1 => Some(&v[0]),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&ObjectProxy> {
        match self {
            HostValue::Object(p) | HostValue::Callable(Callable::Guest(p)) => Some(p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            HostValue::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// Collapse a run of scalars of one kind into a single atomic vector.
/// Returns `None` when the items are empty or not all the same scalar kind.
pub(crate) fn collapse_homogeneous(items: &[HostValue]) -> Option<HostValue> {
    let kind = items.first()?.scalar_kind()?;
    if items.iter().any(|v| v.scalar_kind() != Some(kind)) {
        return None;
    }
    Some(match kind {
        ScalarKind::Logical => HostValue::Logical(items.iter().filter_map(HostValue::as_bool).collect()),
        ScalarKind::Integer => HostValue::Integer(items.iter().filter_map(HostValue::as_i64).collect()),
        ScalarKind::Double => HostValue::Double(
            items
                .iter()
                .filter_map(|v| match v {
                    HostValue::Double(d) => d.first().copied(),
                    _ => None,
                })
                .collect(),
        ),
        ScalarKind::Str => HostValue::Str(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
    })
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        HostValue::int(i)
    }
}

impl From<i32> for HostValue {
    fn from(i: i32) -> Self {
        HostValue::int(i64::from(i))
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        HostValue::float(f)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::string(s)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::string(s)
    }
}

impl From<Vec<i64>> for HostValue {
    fn from(v: Vec<i64>) -> Self {
        HostValue::Integer(v)
    }
}

impl From<Vec<f64>> for HostValue {
    fn from(v: Vec<f64>) -> Self {
        HostValue::Double(v)
    }
}

impl From<Vec<String>> for HostValue {
    fn from(v: Vec<String>) -> Self {
        HostValue::Str(v)
    }
}

impl From<NdArray> for HostValue {
    fn from(a: NdArray) -> Self {
        HostValue::Array(a)
    }
}

impl From<ObjectProxy> for HostValue {
    fn from(p: ObjectProxy) -> Self {
        HostValue::Object(p)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(HostValue::Null, Into::into)
    }
}
