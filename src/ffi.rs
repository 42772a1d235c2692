//! C ABI exports for foreign hosts.
//!
//! Every `pyb_*` function follows this contract:
//!
//! 1. Clears the last error
//! 2. Performs the operation (crossings take the GIL internally)
//! 3. On error: stores the message via `set_last_error`, returns a sentinel
//! 4. On success: returns the result
//!
//! **Sentinel values:**
//! - Handle functions (`-> isize`): `0` means error
//! - Status functions (`-> i32`):   `-1` means error, `0` means success
//! - Flag functions (`-> i32`):     `1` true, `0` false, `-1` error
//! - String functions (`-> cstr`):  `""` means error (check `pyb_last_error`)
//!
//! **Memory:**
//! - Returned `cstr` pointers use a TLS buffer, valid until the next `pyb_*`
//!   call on the same thread. Copy before calling again.
//! - Handles (`isize`) are opaque references to guest objects in the
//!   registry. They MUST be freed with `pyb_drop` when no longer needed.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use crate::config::{InterpreterConfig, RuntimeOptions};
use crate::error::{clear_last_error, set_last_error, BridgeError, Result};
use crate::proxy::ObjectProxy;
use crate::registry;
use crate::runtime::Runtime;
use crate::value::HostValue;

// ==================== Internal Helpers ====================

thread_local! {
    /// Reusable buffer for returned C strings.
    static RETURN_BUF: RefCell<CString> = RefCell::new(CString::default());
}

/// Store a string in the TLS buffer and return a pointer to it.
fn set_return_str(s: String) -> *const c_char {
    RETURN_BUF.with(|cell| {
        *cell.borrow_mut() = CString::new(s.replace('\0', "\\0")).unwrap_or_default();
        cell.borrow().as_ptr()
    })
}

/// Read a C string argument.
///
/// # Safety
/// The pointer must be null or valid and NUL-terminated.
unsafe fn arg_str<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(BridgeError::conversion("char*", "null string pointer"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| BridgeError::conversion("char*", format!("invalid UTF-8: {e}")))
}

fn fail(e: BridgeError) {
    set_last_error(e.detailed());
}

/// Run `f` and register the resulting proxy (0 on error).
fn ffi_handle(f: impl FnOnce() -> Result<ObjectProxy>) -> isize {
    clear_last_error();
    match f().and_then(registry::insert) {
        Ok(h) => h,
        Err(e) => {
            fail(e);
            0
        }
    }
}

/// Run `f` and return a status (0 ok, -1 error).
fn ffi_status(f: impl FnOnce() -> Result<()>) -> i32 {
    clear_last_error();
    match f() {
        Ok(()) => 0,
        Err(e) => {
            fail(e);
            -1
        }
    }
}

/// Run `f` and return a flag (1 true, 0 false, -1 error).
fn ffi_flag(f: impl FnOnce() -> Result<bool>) -> i32 {
    clear_last_error();
    match f() {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            fail(e);
            -1
        }
    }
}

/// Run `f` and return its string via the TLS buffer ("" on error).
fn ffi_str(f: impl FnOnce() -> Result<String>) -> *const c_char {
    clear_last_error();
    match f() {
        Ok(s) => set_return_str(s),
        Err(e) => {
            fail(e);
            set_return_str(String::new())
        }
    }
}

/// Run `f` and return a scalar, `fallback` on error.
fn ffi_scalar<T>(fallback: T, f: impl FnOnce() -> Result<T>) -> T {
    clear_last_error();
    f().unwrap_or_else(|e| {
        fail(e);
        fallback
    })
}

fn runtime() -> Result<Runtime> {
    Runtime::current()
        .ok_or_else(|| BridgeError::Configuration("not initialized, call pyb_init() first".into()))
}

/// `0` means "not given".
fn optional(handle: isize) -> Result<Option<ObjectProxy>> {
    if handle == 0 {
        Ok(None)
    } else {
        registry::get(handle).map(Some)
    }
}

fn scalar_error(value: &HostValue, wanted: &str) -> BridgeError {
    BridgeError::conversion(value.type_name(), format!("not a {wanted} scalar"))
}

// ==================== Lifecycle ====================

/// Initialize the guest runtime this library is linked against, plus the
/// handle registry. Calling it again is harmless.
///
/// Returns `0` on success, `-1` on error.
#[no_mangle]
pub extern "C" fn pyb_init() -> i32 {
    ffi_status(|| {
        Runtime::embedded()?;
        registry::init_registry();
        Ok(())
    })
}

/// Initialize from an interpreter description (JSON, as printed by the
/// discovery tooling) and optional runtime options (JSON or null).
///
/// Returns `0` on success, `-1` on error.
///
/// # Safety
/// `config` must be a valid C string; `options` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn pyb_init_with_config(
    config: *const c_char,
    options: *const c_char,
) -> i32 {
    ffi_status(|| {
        let config = InterpreterConfig::from_json(unsafe { arg_str(config) }?)?;
        let options = if options.is_null() {
            RuntimeOptions::default()
        } else {
            RuntimeOptions::from_json(unsafe { arg_str(options) }?)?
        };
        Runtime::initialize(config, options)?;
        registry::init_registry();
        Ok(())
    })
}

/// Drop every handle and finalize the guest runtime. After this, every
/// `pyb_*` call fails and `pyb_init` is rejected.
#[no_mangle]
pub extern "C" fn pyb_finalize() -> i32 {
    ffi_status(|| {
        registry::destroy_registry();
        match Runtime::current() {
            Some(rt) => rt.finalize(),
            None => Ok(()),
        }
    })
}

// ==================== Execution ====================

/// Execute statements in `__main__`.
///
/// # Safety
/// `code` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_run_string(code: *const c_char) -> i32 {
    ffi_status(|| {
        let code = unsafe { arg_str(code) }?;
        runtime()?.run_string(code).map(drop)
    })
}

/// Execute a guest source file in `__main__`.
///
/// # Safety
/// `path` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_run_file(path: *const c_char) -> i32 {
    ffi_status(|| {
        let path = unsafe { arg_str(path) }?;
        runtime()?.run_file(path).map(drop)
    })
}

/// Evaluate an expression in `__main__` and return a handle to the result.
///
/// # Safety
/// `expr` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_eval(expr: *const c_char) -> isize {
    ffi_handle(|| {
        let expr = unsafe { arg_str(expr) }?;
        runtime()?.eval_proxy(expr)
    })
}

/// Execute statements with guest stdout captured; returns the output.
///
/// # Safety
/// `code` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_capture(code: *const c_char) -> *const c_char {
    ffi_str(|| {
        let code = unsafe { arg_str(code) }?;
        runtime()?.eval_captured(code).map(|out| out.text())
    })
}

/// Import a module and return a handle.
///
/// # Safety
/// `module` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_import(module: *const c_char) -> isize {
    ffi_handle(|| {
        let module = unsafe { arg_str(module) }?;
        runtime()?.import(module)
    })
}

// ==================== Attribute Access ====================

/// # Safety
/// `name` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_getattr(obj: isize, name: *const c_char) -> isize {
    ffi_handle(|| {
        let name = unsafe { arg_str(name) }?;
        registry::get(obj)?.get_attr_proxy(name)
    })
}

/// # Safety
/// `name` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_setattr(obj: isize, name: *const c_char, value: isize) -> i32 {
    ffi_status(|| {
        let name = unsafe { arg_str(name) }?;
        let value = HostValue::Object(registry::get(value)?);
        registry::get(obj)?.set_attr(name, &value)
    })
}

/// `1` if the attribute exists, `0` if not, `-1` for an invalid handle.
///
/// # Safety
/// `name` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_hasattr(obj: isize, name: *const c_char) -> i32 {
    ffi_flag(|| {
        let name = unsafe { arg_str(name) }?;
        Ok(registry::get(obj)?.has_attr(name))
    })
}

// ==================== Calls ====================

/// Call `callable(*args, **kwargs)`. `args` is a handle to any sequence and
/// `kwargs` to any mapping; pass `0` for either to omit it.
#[no_mangle]
pub extern "C" fn pyb_call(callable: isize, args: isize, kwargs: isize) -> isize {
    ffi_handle(|| {
        let callable = registry::get(callable)?;
        callable.call_packed(optional(args)?.as_ref(), optional(kwargs)?.as_ref())
    })
}

/// Call `obj.method(*args, **kwargs)`, arguments as for [`pyb_call`].
///
/// # Safety
/// `method` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_call_method(
    obj: isize,
    method: *const c_char,
    args: isize,
    kwargs: isize,
) -> isize {
    ffi_handle(|| {
        let method = unsafe { arg_str(method) }?;
        let bound = registry::get(obj)?.get_attr_proxy(method)?;
        bound.call_packed(optional(args)?.as_ref(), optional(kwargs)?.as_ref())
    })
}

// ==================== Guest → C ====================

/// `str(obj)`. Returns via TLS buffer.
#[no_mangle]
pub extern "C" fn pyb_to_str(obj: isize) -> *const c_char {
    ffi_str(|| Ok(registry::get(obj)?.str_repr()))
}

/// `repr(obj)`. Returns via TLS buffer.
#[no_mangle]
pub extern "C" fn pyb_to_repr(obj: isize) -> *const c_char {
    ffi_str(|| registry::get(obj)?.repr())
}

/// Returns `0` on error. Check `pyb_last_error` to tell it from a real zero.
#[no_mangle]
pub extern "C" fn pyb_to_int(obj: isize) -> i64 {
    ffi_scalar(0, || {
        let value = registry::get(obj)?.to_host()?;
        value.as_i64().ok_or_else(|| scalar_error(&value, "integer"))
    })
}

/// Integers widen. Returns `0.0` on error.
#[no_mangle]
pub extern "C" fn pyb_to_float(obj: isize) -> f64 {
    ffi_scalar(0.0, || {
        let value = registry::get(obj)?.to_host()?;
        value.as_f64().ok_or_else(|| scalar_error(&value, "float"))
    })
}

#[no_mangle]
pub extern "C" fn pyb_to_bool(obj: isize) -> i32 {
    ffi_flag(|| {
        let value = registry::get(obj)?.to_host()?;
        value.as_bool().ok_or_else(|| scalar_error(&value, "logical"))
    })
}

/// Serialize with guest `json.dumps`. Returns via TLS buffer.
#[no_mangle]
pub extern "C" fn pyb_to_json(obj: isize) -> *const c_char {
    ffi_str(|| registry::get(obj)?.to_json())
}

// ==================== C → Guest ====================

#[no_mangle]
pub extern "C" fn pyb_from_int(val: i64) -> isize {
    ffi_handle(|| runtime()?.to_guest(&HostValue::int(val)))
}

#[no_mangle]
pub extern "C" fn pyb_from_float(val: f64) -> isize {
    ffi_handle(|| runtime()?.to_guest(&HostValue::float(val)))
}

/// `0` is False, anything else True.
#[no_mangle]
pub extern "C" fn pyb_from_bool(val: i32) -> isize {
    ffi_handle(|| runtime()?.to_guest(&HostValue::bool(val != 0)))
}

/// # Safety
/// `val` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_from_str(val: *const c_char) -> isize {
    ffi_handle(|| {
        let val = unsafe { arg_str(val) }?;
        runtime()?.to_guest(&HostValue::string(val))
    })
}

/// Deserialize with guest `json.loads`.
///
/// # Safety
/// `json` must be a valid C string.
#[no_mangle]
pub unsafe extern "C" fn pyb_from_json(json: *const c_char) -> isize {
    ffi_handle(|| {
        let json = unsafe { arg_str(json) }?;
        runtime()?.from_json(json)
    })
}

// ==================== None & Identity ====================

#[no_mangle]
pub extern "C" fn pyb_none() -> isize {
    ffi_handle(|| runtime()?.to_guest(&HostValue::Null))
}

#[no_mangle]
pub extern "C" fn pyb_is_none(obj: isize) -> i32 {
    ffi_flag(|| Ok(registry::get(obj)?.type_name()? == "NoneType"))
}

/// `1` when both handles refer to the same guest object.
#[no_mangle]
pub extern "C" fn pyb_same(a: isize, b: isize) -> i32 {
    ffi_flag(|| Ok(registry::get(a)? == registry::get(b)?))
}

// ==================== Handles ====================

/// Release a handle. Using it afterwards is an error.
#[no_mangle]
pub extern "C" fn pyb_drop(handle: isize) {
    clear_last_error();
    match registry::remove(handle) {
        // The registry lock is already released when the proxy drops.
        Ok(proxy) => drop(proxy),
        Err(e) => fail(e),
    }
}

/// Number of live handles (for diagnostics), `-1` before `pyb_init`.
#[no_mangle]
pub extern "C" fn pyb_handle_count() -> i64 {
    ffi_scalar(-1, || Ok(registry::len()? as i64))
}
