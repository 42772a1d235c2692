//! Runtime handle: owns the embedded interpreter's lifecycle and the
//! process-wide conversion context.
//!
//! There is at most one guest interpreter per process. [`Runtime::initialize`]
//! creates the context on first use, hands back the same context for the same
//! configuration, and rejects any other configuration. Every component gets
//! the context through a [`Runtime`] value rather than looking it up.
//!
//! All guest access goes through [`Runtime::with_gil`], which holds the GIL
//! for the duration of the closure and releases it on every exit path.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule, PyTuple};
use tracing::{debug, info, warn};

use crate::config::{InterpreterConfig, RuntimeOptions};
use crate::error::{BridgeError, Result};
use crate::proxy::ObjectProxy;

enum Slot {
    Empty,
    Live(Runtime),
    Finalized(InterpreterConfig),
}

static RUNTIME: Mutex<Slot> = parking_lot::const_mutex(Slot::Empty);

pub(crate) struct NumpyTypes {
    pub(crate) module: Py<PyModule>,
    pub(crate) ndarray: Py<PyAny>,
    pub(crate) generic: Py<PyAny>,
}

struct Context {
    config: InterpreterConfig,
    options: RuntimeOptions,
    main: Py<PyModule>,
    globals: Py<PyDict>,
    builtins: Py<PyModule>,
    function_types: Py<PyTuple>,
    numpy: Option<NumpyTypes>,
    finalized: AtomicBool,
}

/// Handle to the live conversion context. Cloning is cheap.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Context>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("executable", &self.inner.config.executable)
            .field("version", &self.inner.config.version)
            .field("array_support", &self.has_array_support())
            .field("available", &self.is_available())
            .finish()
    }
}

impl Runtime {
    /// Initialize the guest interpreter for `config`, or return the context
    /// already created for the same interpreter.
    ///
    /// Fails with [`BridgeError::Configuration`] when the configuration is not
    /// usable, does not match the linked interpreter, names a different
    /// interpreter than the live one, or the runtime was already finalized.
    pub fn initialize(config: InterpreterConfig, options: RuntimeOptions) -> Result<Runtime> {
        let mut slot = RUNTIME.lock();
        match &*slot {
            Slot::Live(rt) => {
                if !rt.inner.config.same_interpreter(&config) {
                    return Err(BridgeError::Configuration(format!(
                        "guest interpreter {} ({}) is already initialized; refusing to initialize {} ({})",
                        rt.inner.config.executable.display(),
                        rt.inner.config.version,
                        config.executable.display(),
                        config.version,
                    )));
                }
                if rt.inner.options != options {
                    warn!("runtime already initialized; ignoring new runtime options");
                }
                return Ok(rt.clone());
            }
            Slot::Finalized(old) => {
                return Err(BridgeError::Configuration(format!(
                    "guest interpreter {} was finalized and cannot be re-initialized",
                    old.executable.display()
                )));
            }
            Slot::Empty => {}
        }

        if !config.usable {
            return Err(BridgeError::Configuration(format!(
                "interpreter {} is not usable",
                config.executable.display()
            )));
        }

        promote_libpython(&config);
        pyo3::prepare_freethreaded_python();

        let context = Python::with_gil(|py| build_context(py, config, options))?;
        let rt = Runtime {
            inner: Arc::new(context),
        };
        if rt.inner.options.finalize_at_exit {
            // SAFETY: registering a plain extern "C" fn with no captured state.
            if unsafe { libc::atexit(finalize_at_exit) } != 0 {
                warn!("could not register guest finalization at process exit");
            }
        }
        info!(
            executable = %rt.inner.config.executable.display(),
            version = %rt.inner.config.version,
            array_support = rt.has_array_support(),
            "guest runtime initialized"
        );
        *slot = Slot::Live(rt.clone());
        Ok(rt)
    }

    /// Initialize with the interpreter this crate is linked against and
    /// default options.
    pub fn embedded() -> Result<Runtime> {
        Self::initialize(InterpreterConfig::embedded()?, RuntimeOptions::default())
    }

    /// The live runtime, if one has been initialized and not finalized.
    pub fn current() -> Option<Runtime> {
        match &*RUNTIME.lock() {
            Slot::Live(rt) => Some(rt.clone()),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.inner.finalized.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.inner.config
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    /// Whether rectangular numeric arrays can cross the boundary.
    pub fn has_array_support(&self) -> bool {
        self.inner.numpy.is_some()
    }

    pub fn same_runtime(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` with the GIL held.
    pub fn with_gil<F, R>(&self, f: F) -> Result<R>
    where
        F: for<'py> FnOnce(Python<'py>) -> Result<R>,
    {
        self.ensure_live()?;
        Python::with_gil(f)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BridgeError::Configuration(
                "guest runtime has been finalized".to_string(),
            ))
        }
    }

    pub(crate) fn globals<'py>(&self, py: Python<'py>) -> &Bound<'py, PyDict> {
        self.inner.globals.bind(py)
    }

    pub(crate) fn builtins_bound<'py>(&self, py: Python<'py>) -> &Bound<'py, PyModule> {
        self.inner.builtins.bind(py)
    }

    /// Guest types that cross as [`Callable::Guest`](crate::Callable::Guest):
    /// plain functions, builtins and bound methods.
    pub(crate) fn function_types<'py>(&self, py: Python<'py>) -> &Bound<'py, PyTuple> {
        self.inner.function_types.bind(py)
    }

    pub(crate) fn numpy(&self) -> Option<&NumpyTypes> {
        self.inner.numpy.as_ref()
    }

    /// Proxy for the persistent `__main__` module.
    pub fn main_module(&self) -> Result<ObjectProxy> {
        self.with_gil(|py| Ok(ObjectProxy::new(self, self.inner.main.bind(py).clone().into_any())))
    }

    pub fn builtins(&self) -> Result<ObjectProxy> {
        self.with_gil(|py| Ok(ObjectProxy::new(self, self.builtins_bound(py).clone().into_any())))
    }

    /// Import a guest module.
    pub fn import(&self, module: &str) -> Result<ObjectProxy> {
        self.with_gil(|py| {
            let m = py.import(module).map_err(|e| BridgeError::guest(py, e))?;
            Ok(ObjectProxy::new(self, m.into_any()))
        })
    }

    /// Tear the context down: run guest `atexit` callbacks and flush guest
    /// stdio. Afterwards every crossing fails with a configuration error and
    /// the process can never initialize another interpreter. Calling it again
    /// is a no-op.
    pub fn finalize(&self) -> Result<()> {
        let mut slot = RUNTIME.lock();
        if self.inner.finalized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        Python::with_gil(|py| {
            let teardown = || -> PyResult<()> {
                py.import("atexit")?.call_method0("_run_exitfuncs")?;
                let sys = py.import("sys")?;
                for stream in ["stdout", "stderr"] {
                    let s = sys.getattr(stream)?;
                    if !s.is_none() {
                        s.call_method0("flush")?;
                    }
                }
                Ok(())
            };
            if let Err(e) = teardown() {
                debug!(error = %BridgeError::guest(py, e), "guest teardown reported an error");
            }
        });
        *slot = Slot::Finalized(self.inner.config.clone());
        info!("guest runtime finalized");
        Ok(())
    }
}

extern "C" fn finalize_at_exit() {
    if let Some(rt) = Runtime::current() {
        let _ = rt.finalize();
    }
}

fn build_context(
    py: Python<'_>,
    config: InterpreterConfig,
    options: RuntimeOptions,
) -> Result<Context> {
    let sys = py.import("sys").map_err(|e| BridgeError::guest(py, e))?;
    let live: (u32, u32) = sys
        .getattr("version_info")
        .and_then(|v| Ok((v.getattr("major")?.extract()?, v.getattr("minor")?.extract()?)))
        .map_err(|e| BridgeError::guest(py, e))?;
    debug!(major = live.0, minor = live.1, "linked interpreter version");
    match config.major_minor() {
        Some(wanted) if wanted == live => {}
        Some(wanted) => {
            return Err(BridgeError::Configuration(format!(
                "configuration asks for python {}.{} but the linked interpreter is {}.{}",
                wanted.0, wanted.1, live.0, live.1
            )))
        }
        None => {
            return Err(BridgeError::Configuration(format!(
                "unparseable interpreter version '{}'",
                config.version
            )))
        }
    }

    let setup = || -> PyResult<(Py<PyModule>, Py<PyDict>, Py<PyModule>, Py<PyTuple>)> {
        let path = sys.getattr("path")?;
        let path = path.downcast::<PyList>()?;
        for entry in options.sys_path.iter().rev() {
            path.insert(0, entry.to_string_lossy().as_ref())?;
        }
        let main = py.import("__main__")?;
        let globals = main.dict();
        let builtins = py.import("builtins")?;
        let types = py.import("types")?;
        let function_types = PyTuple::new(
            py,
            [
                types.getattr("FunctionType")?,
                types.getattr("BuiltinFunctionType")?,
                types.getattr("MethodType")?,
                types.getattr("BuiltinMethodType")?,
            ],
        )?;
        Ok((main.unbind(), globals.unbind(), builtins.unbind(), function_types.unbind()))
    };
    let (main, globals, builtins, function_types) =
        setup().map_err(|e| BridgeError::guest(py, e))?;

    let numpy = match (options.array_support, config.numpy) {
        (true, true) => load_numpy(py),
        (true, false) => {
            debug!("interpreter reports no numpy; array conversion disabled");
            None
        }
        (false, _) => None,
    };

    Ok(Context {
        config,
        options,
        main,
        globals,
        builtins,
        function_types,
        numpy,
        finalized: AtomicBool::new(false),
    })
}

fn load_numpy(py: Python<'_>) -> Option<NumpyTypes> {
    let load = || -> PyResult<NumpyTypes> {
        let module = py.import("numpy")?;
        let ndarray = module.getattr("ndarray")?.unbind();
        let generic = module.getattr("generic")?.unbind();
        Ok(NumpyTypes {
            module: module.unbind(),
            ndarray,
            generic,
        })
    };
    match load() {
        Ok(types) => Some(types),
        Err(e) => {
            debug!(error = %BridgeError::guest(py, e), "numpy unavailable; array conversion disabled");
            None
        }
    }
}

/// Re-open libpython with `RTLD_GLOBAL` so that C extensions (numpy and
/// friends) can resolve interpreter symbols when we are loaded as a plugin.
#[cfg(target_os = "linux")]
fn promote_libpython(config: &InterpreterConfig) {
    use std::ffi::CString;

    use libc::{dlopen, RTLD_GLOBAL, RTLD_NOLOAD, RTLD_NOW};

    let mut candidates: Vec<CString> = Vec::new();
    if let Some(lib) = &config.library {
        if let Ok(c) = CString::new(lib.to_string_lossy().into_owned()) {
            candidates.push(c);
        }
    }
    if let Some((major, minor)) = config.major_minor() {
        if let Ok(c) = CString::new(format!("libpython{major}.{minor}.so")) {
            candidates.push(c);
        }
        if let Ok(c) = CString::new(format!("libpython{major}.{minor}.so.1.0")) {
            candidates.push(c);
        }
    }
    if let Ok(c) = CString::new("libpython3.so") {
        candidates.push(c);
    }

    for name in &candidates {
        // SAFETY: `name` is a valid NUL-terminated string; RTLD_NOLOAD only
        // succeeds for a library that is already mapped.
        unsafe {
            let handle = dlopen(name.as_ptr(), RTLD_NOW | RTLD_NOLOAD);
            if !handle.is_null() {
                dlopen(name.as_ptr(), RTLD_NOW | RTLD_GLOBAL);
                debug!(library = ?name, "promoted libpython to RTLD_GLOBAL");
                break;
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn promote_libpython(_config: &InterpreterConfig) {}
