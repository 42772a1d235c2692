//! Interpreter configuration handed to us by runtime discovery.
//!
//! Discovery (scanning PATH, virtualenvs, conda) lives outside this crate.
//! It produces an [`InterpreterConfig`], usually as JSON, and we only decide
//! whether that configuration is usable and matches the interpreter we are
//! linked against.

use std::path::PathBuf;

use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// A resolved guest interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Path of the python executable.
    pub executable: PathBuf,
    /// Path of libpython, when known.
    #[serde(default)]
    pub library: Option<PathBuf>,
    /// Full version string, e.g. `3.12.4`.
    pub version: String,
    /// Whether numpy is importable from this interpreter.
    #[serde(default)]
    pub numpy: bool,
    /// Discovery's verdict on whether this interpreter can be embedded.
    #[serde(default = "default_usable")]
    pub usable: bool,
}

fn default_usable() -> bool {
    true
}

impl InterpreterConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BridgeError::Configuration(format!("invalid interpreter config: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| BridgeError::Configuration(format!("cannot encode interpreter config: {e}")))
    }

    /// Describe the interpreter this crate is linked against.
    ///
    /// Prepares the embedded interpreter if needed but does not create the
    /// conversion context.
    pub fn embedded() -> Result<Self> {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let query = || -> PyResult<Self> {
                let sys = py.import("sys")?;
                let executable: String = sys.getattr("executable")?.extract()?;
                let info = sys.getattr("version_info")?;
                let (major, minor, micro): (u32, u32, u32) = (
                    info.getattr("major")?.extract()?,
                    info.getattr("minor")?.extract()?,
                    info.getattr("micro")?.extract()?,
                );
                let sysconfig = py.import("sysconfig")?;
                let libdir: Option<String> = sysconfig
                    .call_method1("get_config_var", ("LIBDIR",))?
                    .extract()?;
                let ldlibrary: Option<String> = sysconfig
                    .call_method1("get_config_var", ("LDLIBRARY",))?
                    .extract()?;
                let library = match (libdir, ldlibrary) {
                    (Some(dir), Some(lib)) => Some(PathBuf::from(dir).join(lib)),
                    _ => None,
                };
                let numpy = !py
                    .import("importlib.util")?
                    .call_method1("find_spec", ("numpy",))?
                    .is_none();
                Ok(Self {
                    executable: PathBuf::from(executable),
                    library,
                    version: format!("{major}.{minor}.{micro}"),
                    numpy,
                    usable: true,
                })
            };
            query().map_err(|e| BridgeError::guest(py, e))
        })
    }

    /// `(major, minor)` parsed from [`version`](Self::version).
    pub fn major_minor(&self) -> Option<(u32, u32)> {
        let mut parts = self.version.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts
            .next()?
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .ok()?;
        Some((major, minor))
    }

    /// Whether two configurations name the same interpreter instance.
    pub fn same_interpreter(&self, other: &Self) -> bool {
        self.executable == other.executable
            && self.library == other.library
            && self.version == other.version
    }
}

/// Knobs applied when the conversion context is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Entries prepended to the guest `sys.path`, in order.
    pub sys_path: Vec<PathBuf>,
    /// Try to import numpy and enable array conversion. Ignored when the
    /// interpreter config reports no numpy.
    pub array_support: bool,
    /// Register [`Runtime::finalize`](crate::Runtime::finalize) with the
    /// process exit hooks.
    pub finalize_at_exit: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            sys_path: vec![PathBuf::from("."), PathBuf::from("./python")],
            array_support: true,
            finalize_at_exit: false,
        }
    }
}

impl RuntimeOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BridgeError::Configuration(format!("invalid runtime options: {e}")))
    }
}
