//! Error taxonomy for boundary crossings, plus the thread-local last-error
//! cell used by the C ABI surface.
//!
//! Rust callers get a [`BridgeError`] from every fallible operation.
//! Foreign hosts going through `pyb_*` functions get a sentinel return value
//! and read the message with `pyb_last_error()`.
//!
//! **Ownership rules:**
//! - `pyb_last_error()` returns a pointer owned by TLS. Do NOT free it.

use std::cell::RefCell;
use std::ffi::CString;
use std::fmt;
use std::os::raw::c_char;

use pyo3::exceptions::{PyAttributeError, PyRuntimeError};
use pyo3::intern;
use pyo3::prelude::*;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// A guest exception captured at the boundary.
///
/// The type name and message are copied out verbatim. The exception object
/// itself is retained so it can be handed back to guest code unchanged
/// (context-manager `__exit__`, host functions re-raising).
#[derive(Debug)]
pub struct GuestException {
    pub type_name: String,
    pub message: String,
    pub traceback: Option<String>,
    value: Option<Py<PyAny>>,
}

impl GuestException {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            traceback: None,
            value: None,
        }
    }

    pub(crate) fn from_pyerr(py: Python<'_>, err: &PyErr) -> Self {
        let type_name = err
            .get_type(py)
            .getattr(intern!(py, "__name__"))
            .and_then(|n| n.extract::<String>())
            .unwrap_or_else(|_| "BaseException".to_string());
        let value = err.value(py);
        let message = value
            .str()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let traceback = err.traceback(py).and_then(|tb| tb.format().ok());
        Self {
            type_name,
            message,
            traceback,
            value: Some(value.clone().into_any().unbind()),
        }
    }

    /// The original guest exception object, when one was captured.
    pub(crate) fn value<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyAny>> {
        self.value.as_ref().map(|v| v.bind(py).clone())
    }

    /// Message with the guest traceback prepended, for diagnostics.
    pub fn detailed(&self) -> String {
        match &self.traceback {
            Some(tb) => format!("{tb}{self}"),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for GuestException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No usable guest runtime, a conflicting re-initialization, or use
    /// after finalization.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cannot convert {type_name}: {message}")]
    Conversion { type_name: String, message: String },

    #[error("null guest reference")]
    NullReference,

    #[error("attribute error on '{name}': {message}")]
    Attribute { name: String, message: String },

    #[error("object is not callable: {operation}")]
    NotCallable { operation: String },

    #[error("guest exception {exception}")]
    GuestExecution {
        exception: GuestException,
        #[source]
        cause: Option<Box<BridgeError>>,
    },

    /// A host function failed while called from the host side.
    #[error("host function failed: {0:#}")]
    HostFunction(anyhow::Error),

    /// A C ABI handle that was never issued or has been dropped.
    #[error("invalid handle: {0}")]
    InvalidHandle(isize),

    /// A context manager's `__exit__` failed without a guest exception
    /// while the scoped body had already failed.
    #[error("context exit failed: {error}")]
    ContextExit {
        error: Box<BridgeError>,
        #[source]
        cause: Box<BridgeError>,
    },

    #[error("iterator produced more than {limit} values")]
    IterationLimit { limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn guest(py: Python<'_>, err: PyErr) -> Self {
        BridgeError::GuestExecution {
            exception: GuestException::from_pyerr(py, &err),
            cause: None,
        }
    }

    pub(crate) fn conversion(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Conversion {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Map a failed attribute probe: guest `AttributeError` becomes
    /// [`BridgeError::Attribute`], anything else stays a guest exception.
    pub(crate) fn attribute(py: Python<'_>, name: &str, err: PyErr) -> Self {
        if err.is_instance_of::<PyAttributeError>(py) {
            let message = err
                .value(py)
                .str()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            BridgeError::Attribute {
                name: name.to_string(),
                message,
            }
        } else {
            BridgeError::guest(py, err)
        }
    }

    pub fn is_null_reference(&self) -> bool {
        matches!(self, BridgeError::NullReference)
    }

    /// The guest exception carried by this error, if any.
    pub fn guest_exception(&self) -> Option<&GuestException> {
        match self {
            BridgeError::GuestExecution { exception, .. } => Some(exception),
            _ => None,
        }
    }

    /// Attach `body` as the cause of this error, which replaces it.
    pub(crate) fn superseding(self, body: BridgeError) -> Self {
        match self {
            BridgeError::GuestExecution {
                exception,
                cause: None,
            } => BridgeError::GuestExecution {
                exception,
                cause: Some(Box::new(body)),
            },
            error => BridgeError::ContextExit {
                error: Box::new(error),
                cause: Box::new(body),
            },
        }
    }

    /// Translate into a guest exception so it can be raised inside guest code.
    pub(crate) fn into_pyerr(self, py: Python<'_>) -> PyErr {
        match self {
            BridgeError::GuestExecution { ref exception, .. } => match exception.value(py) {
                Some(value) => PyErr::from_value(value),
                None => PyRuntimeError::new_err(exception.to_string()),
            },
            BridgeError::Attribute { name, message } => {
                PyAttributeError::new_err(format!("{name}: {message}"))
            }
            BridgeError::HostFunction(err) => PyRuntimeError::new_err(format!("{err:#}")),
            other => PyRuntimeError::new_err(other.to_string()),
        }
    }

    /// Full diagnostic text, including guest traceback when present.
    pub fn detailed(&self) -> String {
        match self {
            BridgeError::GuestExecution { exception, cause } => {
                let mut out = exception.detailed();
                if let Some(cause) = cause {
                    out.push_str(&format!("\n(while handling: {cause})"));
                }
                out
            }
            BridgeError::ContextExit { error, cause } => {
                format!("{}\n(while handling: {cause})", error.detailed())
            }
            other => other.to_string(),
        }
    }
}

// ==================== Thread-local last error ====================

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message in thread-local storage.
pub fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into();
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = CString::new(msg.replace('\0', "\\0")).ok();
    });
}

/// Clear the thread-local error.
pub fn clear_last_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Copy of the last error message, if any.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|s| s.to_string_lossy().into_owned())
    })
}

/// Get a pointer to the last error message, or null if none.
///
/// The returned pointer is valid until the next `pyb_*` call.
/// Do NOT free this pointer.
#[no_mangle]
pub extern "C" fn pyb_last_error() -> *const c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |s| s.as_ptr())
    })
}

/// Clear the last error message.
#[no_mangle]
pub extern "C" fn pyb_last_error_clear() {
    clear_last_error();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_round_trip() {
        clear_last_error();
        assert!(last_error().is_none());
        assert!(pyb_last_error().is_null());

        set_last_error("boom");
        assert_eq!(last_error().as_deref(), Some("boom"));
        assert!(!pyb_last_error().is_null());

        pyb_last_error_clear();
        assert!(last_error().is_none());
    }

    #[test]
    fn interior_nul_does_not_drop_message() {
        set_last_error("a\0b");
        assert_eq!(last_error().as_deref(), Some("a\\0b"));
        clear_last_error();
    }

    #[test]
    fn guest_exception_display_keeps_message_verbatim() {
        let exc = GuestException::new("ValueError", "bad value");
        assert_eq!(exc.to_string(), "ValueError: bad value");
        assert_eq!(GuestException::new("StopIteration", "").to_string(), "StopIteration");

        let err = BridgeError::GuestExecution {
            exception: exc,
            cause: Some(Box::new(BridgeError::NullReference)),
        };
        let exc = err.guest_exception().expect("guest exception");
        assert_eq!(exc.type_name, "ValueError");
        assert_eq!(exc.message, "bad value");
        assert!(err.detailed().contains("null guest reference"));
    }

    #[test]
    fn exit_failure_supersedes_body_error() {
        let exit = BridgeError::GuestExecution {
            exception: GuestException::new("OSError", "close failed"),
            cause: None,
        };
        let err = exit.superseding(BridgeError::NullReference);
        assert_eq!(err.guest_exception().expect("exit exception").type_name, "OSError");
        assert!(matches!(
            err,
            BridgeError::GuestExecution { cause: Some(ref c), .. } if c.is_null_reference()
        ));

        let exit = BridgeError::Configuration("guest runtime finalized".to_string());
        let err = exit.superseding(BridgeError::IterationLimit { limit: 3 });
        let BridgeError::ContextExit { error, cause } = &err else {
            panic!("expected a context exit error, got {err:?}");
        };
        assert!(matches!(**error, BridgeError::Configuration(_)));
        assert!(matches!(**cause, BridgeError::IterationLimit { limit: 3 }));
        assert!(err.to_string().starts_with("context exit failed: configuration error"));
        assert!(err.detailed().contains("more than 3 values"));
    }
}
