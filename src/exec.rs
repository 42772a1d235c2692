//! Running guest source in the persistent `__main__` namespace, with
//! optional stdout capture and warning suppression.

use std::ffi::CString;
use std::fmt;
use std::path::Path;

use pyo3::intern;
use pyo3::prelude::*;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::proxy::ObjectProxy;
use crate::runtime::Runtime;
use crate::value::{HostValue, Kwargs};

fn source_cstring(source: &str) -> Result<CString> {
    CString::new(source)
        .map_err(|e| BridgeError::conversion("str", format!("guest source contains NUL: {e}")))
}

impl Runtime {
    /// Execute statements in `__main__`. Returns the main module.
    pub fn run_string(&self, source: &str) -> Result<ObjectProxy> {
        let code = source_cstring(source)?;
        self.with_gil(|py| {
            py.run(code.as_c_str(), Some(self.globals(py)), None)
                .map_err(|e| BridgeError::guest(py, e))
        })?;
        self.main_module()
    }

    /// Execute a guest source file in `__main__` with `__file__` set to
    /// `path` for the duration. The previous `__file__` is restored on every
    /// path out.
    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<ObjectProxy> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let filename = path.to_string_lossy().into_owned();
        debug!(path = %filename, "running guest file");
        self.with_gil(|py| {
            let globals = self.globals(py);
            let key = intern!(py, "__file__");
            let previous = globals
                .get_item(key)
                .map_err(|e| BridgeError::guest(py, e))?;
            globals
                .set_item(key, &filename)
                .map_err(|e| BridgeError::guest(py, e))?;

            let builtins = self.builtins_bound(py);
            let outcome = builtins
                .call_method1("compile", (source.as_str(), filename.as_str(), "exec"))
                .and_then(|code| builtins.call_method1("exec", (code, globals)))
                .map_err(|e| BridgeError::guest(py, e));

            let restored = match previous {
                Some(prev) => globals.set_item(key, prev),
                None => globals.del_item(key),
            };
            outcome?;
            restored.map_err(|e| BridgeError::guest(py, e))
        })?;
        self.main_module()
    }

    /// Evaluate an expression in `__main__` and convert the result.
    pub fn eval(&self, expr: &str) -> Result<HostValue> {
        self.eval_proxy(expr)?.to_host()
    }

    /// Evaluate an expression in `__main__`, keeping the result guest-side.
    pub fn eval_proxy(&self, expr: &str) -> Result<ObjectProxy> {
        let code = source_cstring(expr)?;
        self.with_gil(|py| {
            let value = py
                .eval(code.as_c_str(), Some(self.globals(py)), None)
                .map_err(|e| BridgeError::guest(py, e))?;
            Ok(ObjectProxy::new(self, value))
        })
    }

    /// Run `f` with guest `sys.stdout` redirected into a buffer and return
    /// what was written, split into lines. Host-side writes are not captured.
    pub fn capture_output<F, R>(&self, f: F) -> Result<(R, CapturedOutput)>
    where
        F: FnOnce() -> Result<R>,
    {
        let none = Kwargs::new();
        let buffer = self
            .import("io")?
            .get_attr_proxy("StringIO")?
            .call_proxy(&[], &none)?;
        let redirect = self
            .import("contextlib")?
            .get_attr_proxy("redirect_stdout")?
            .call_proxy(&[HostValue::Object(buffer.clone())], &none)?;
        let value = redirect.with_context_proxy(|_| f())?;
        let text = buffer.call_method("getvalue", &[], &none)?;
        let output = CapturedOutput::from_text(text.as_str().unwrap_or_default());
        debug!(lines = output.lines.len(), "captured guest output");
        Ok((value, output))
    }

    /// Execute `source` under output capture.
    pub fn eval_captured(&self, source: &str) -> Result<CapturedOutput> {
        self.capture_output(|| self.run_string(source).map(drop))
            .map(|(_, output)| output)
    }

    /// Run `f` with guest warnings recorded instead of printed. Every warning
    /// raised during `f` is returned, none reach guest stderr.
    pub fn suppress_warnings<F, R>(&self, f: F) -> Result<(R, Vec<GuestWarning>)>
    where
        F: FnOnce() -> Result<R>,
    {
        let warnings = self.import("warnings")?;
        let mut record = Kwargs::new();
        record.insert("record".to_string(), HostValue::bool(true));
        let catcher = warnings
            .get_attr_proxy("catch_warnings")?
            .call_proxy(&[], &record)?;
        let (value, log) = catcher.with_context_proxy(|log| {
            warnings.call_method("simplefilter", &["always".into()], &Kwargs::new())?;
            let value = f()?;
            Ok((value, log.clone()))
        })?;

        let mut recorded = Vec::new();
        for entry in log.iterate()? {
            let warning = match entry? {
                HostValue::Object(record) => GuestWarning::from_record(&record)?,
                other => {
                    return Err(BridgeError::conversion(
                        other.type_name(),
                        "unexpected entry in warning log",
                    ))
                }
            };
            debug!(%warning, "suppressed guest warning");
            recorded.push(warning);
        }
        Ok((value, recorded))
    }

    /// Evaluate `expr` with warnings suppressed.
    pub fn eval_suppressing_warnings(&self, expr: &str) -> Result<(HostValue, Vec<GuestWarning>)> {
        self.suppress_warnings(|| self.eval(expr))
    }
}

/// Lines written to guest stdout during a capture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapturedOutput {
    lines: Vec<String>,
}

impl CapturedOutput {
    pub(crate) fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_owned).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The captured lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

impl IntoIterator for CapturedOutput {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

/// A guest warning recorded by [`Runtime::suppress_warnings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestWarning {
    /// Warning class name, e.g. `DeprecationWarning`.
    pub category: String,
    pub message: String,
    pub filename: String,
    pub lineno: i64,
}

impl GuestWarning {
    fn from_record(record: &ObjectProxy) -> Result<Self> {
        let text = |name: &str| -> Result<String> {
            let value = record.get_attr(name)?;
            Ok(value.as_str().map(str::to_owned).unwrap_or_default())
        };
        let category = record
            .get_attr_proxy("category")?
            .get_attr("__name__")?
            .as_str()
            .map(str::to_owned)
            .unwrap_or_default();
        Ok(Self {
            category,
            message: record.get_attr_proxy("message")?.str_repr(),
            filename: text("filename")?,
            lineno: record.get_attr("lineno")?.as_i64().unwrap_or(0),
        })
    }
}

impl fmt::Display for GuestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.filename, self.lineno, self.category, self.message
        )
    }
}
