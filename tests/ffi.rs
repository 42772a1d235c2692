use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use pybridge::error::{last_error, pyb_last_error};
use pybridge::ffi::*;

fn c(s: &str) -> CString {
    CString::new(s).expect("no interior NUL")
}

fn read(ptr: *const c_char) -> String {
    assert!(!ptr.is_null());
    unsafe { CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

// One test: the handle count is process-wide and would race otherwise.
#[test]
fn c_abi_surface() {
    assert_eq!(pyb_init(), 0, "{:?}", last_error());
    assert_eq!(pyb_init(), 0, "init is idempotent");
    let baseline = pyb_handle_count();
    assert!(baseline >= 0);

    unsafe {
        // Execution and evaluation.
        assert_eq!(pyb_run_string(c("ffi_base = 40").as_ptr()), 0);
        let h = pyb_eval(c("ffi_base + 2").as_ptr());
        assert_ne!(h, 0);
        assert_eq!(pyb_to_int(h), 42);
        assert_eq!(pyb_to_float(h), 42.0);
        assert_eq!(read(pyb_to_str(h)), "42");
        pyb_drop(h);

        // Errors use sentinels plus the last-error cell.
        assert_eq!(pyb_eval(c("1 / 0").as_ptr()), 0);
        assert!(read(pyb_last_error()).contains("ZeroDivisionError"));
        assert_eq!(pyb_eval(std::ptr::null()), 0);
        assert!(last_error().is_some_and(|e| e.contains("null string pointer")));

        // Scalars.
        let s = pyb_from_str(c("héllo").as_ptr());
        assert_eq!(read(pyb_to_repr(s)), "'héllo'");
        let t = pyb_from_bool(1);
        assert_eq!(pyb_to_bool(t), 1);
        let f = pyb_from_float(1.5);
        assert_eq!(pyb_to_float(f), 1.5);
        assert_eq!(pyb_to_int(s), 0);
        assert!(last_error().is_some());
        let none = pyb_none();
        assert_eq!(pyb_is_none(none), 1);
        assert_eq!(pyb_is_none(t), 0);

        // Attributes and calls.
        let math = pyb_import(c("math").as_ptr());
        assert_ne!(math, 0);
        assert_eq!(pyb_hasattr(math, c("sqrt").as_ptr()), 1);
        assert_eq!(pyb_hasattr(math, c("nope").as_ptr()), 0);
        let sqrt = pyb_getattr(math, c("sqrt").as_ptr());
        let args = pyb_from_json(c("[16]").as_ptr());
        let r = pyb_call(sqrt, args, 0);
        assert_eq!(pyb_to_float(r), 4.0);

        let text = pyb_from_str(c("a-b-c").as_ptr());
        let sep = pyb_from_json(c(r#"["-"]"#).as_ptr());
        let parts = pyb_call_method(text, c("split").as_ptr(), sep, 0);
        assert_eq!(read(pyb_to_json(parts)), r#"["a", "b", "c"]"#);

        let kwargs = pyb_from_json(c(r#"{"sep": "+"}"#).as_ptr());
        let print_args = pyb_from_json(c(r#"["x", "y"]"#).as_ptr());
        let builtins = pyb_import(c("builtins").as_ptr());
        let print = pyb_getattr(builtins, c("print").as_ptr());
        assert_eq!(read(pyb_capture(c("print('captured')").as_ptr())), "captured");
        let printed = pyb_call(print, print_args, kwargs);
        assert_eq!(pyb_is_none(printed), 1);

        let obj = pyb_eval(c("type('Box', (), {})()").as_ptr());
        assert_eq!(pyb_setattr(obj, c("size").as_ptr(), f), 0);
        let size = pyb_getattr(obj, c("size").as_ptr());
        assert_eq!(pyb_same(size, f), 1);
        assert_eq!(pyb_same(size, t), 0);

        for h in [
            s, t, f, none, math, sqrt, args, r, text, sep, parts, kwargs, print_args, builtins,
            print, printed, obj, size,
        ] {
            pyb_drop(h);
        }
    }

    assert_eq!(pyb_handle_count(), baseline);
    pyb_drop(123_456_789);
    assert!(last_error().is_some_and(|e| e.contains("invalid handle")));
}
