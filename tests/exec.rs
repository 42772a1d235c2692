use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use pybridge::{BridgeError, HostValue};

mod common;

// These tests swap process-wide guest state (`__file__`, `sys.stdout`,
// warning filters), so they run one at a time.
static GUEST_STATE: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    GUEST_STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

#[test]
fn run_string_persists_in_main_namespace() {
    let _guard = serial();
    let rt = common::runtime();
    let main = rt.run_string("persisted_total = sum(range(5))\n").expect("run");
    assert_eq!(main.get_attr("persisted_total").expect("attr"), HostValue::int(10));
    assert_eq!(rt.eval("persisted_total * 2").expect("eval"), HostValue::int(20));
}

#[test]
fn syntax_errors_are_guest_errors() {
    let _guard = serial();
    let rt = common::runtime();
    let err = rt.run_string("def broken(:\n").unwrap_err();
    assert_eq!(err.guest_exception().expect("guest").type_name, "SyntaxError");
}

#[test]
fn run_file_sets_file_for_its_duration() {
    let _guard = serial();
    let rt = common::runtime();
    let mut script = tempfile::Builder::new()
        .suffix(".py")
        .tempfile()
        .expect("temp file");
    writeln!(script, "seen_file = __file__").expect("write");
    writeln!(script, "file_answer = 6 * 7").expect("write");

    rt.run_file(script.path()).expect("run file");
    assert_eq!(rt.eval("file_answer").expect("eval"), HostValue::int(42));
    assert_eq!(
        rt.eval("seen_file").expect("eval"),
        HostValue::string(script.path().to_string_lossy())
    );
    assert_eq!(
        rt.eval("'__file__' in globals()").expect("eval"),
        HostValue::bool(false)
    );
}

#[test]
fn run_file_failure_still_restores_file() {
    let _guard = serial();
    let rt = common::runtime();
    let mut script = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(script, "raise LookupError('from file')").expect("write");

    let err = rt.run_file(script.path()).unwrap_err();
    assert_eq!(err.guest_exception().expect("guest").message, "from file");
    assert_eq!(
        rt.eval("'__file__' in globals()").expect("eval"),
        HostValue::bool(false)
    );
}

#[test]
fn missing_file_is_io_error() {
    let _guard = serial();
    let rt = common::runtime();
    let dir = tempfile::tempdir().expect("temp dir");
    let err = rt.run_file(dir.path().join("absent.py")).unwrap_err();
    assert!(matches!(err, BridgeError::Io(_)), "{err}");
}

#[test]
fn output_capture_returns_lines() {
    let _guard = serial();
    let rt = common::runtime();
    let out = rt
        .eval_captured("print('first')\nprint('second', 2)\n")
        .expect("capture");
    assert_eq!(out.lines(), ["first", "second 2"]);

    let (value, out) = rt
        .capture_output(|| {
            rt.run_string("print('inside')")?;
            rt.eval("40 + 2")
        })
        .expect("capture");
    assert_eq!(value, HostValue::int(42));
    assert_eq!(out.into_lines(), vec!["inside".to_string()]);

    let quiet = rt.eval_captured("quiet = 1").expect("capture");
    assert!(quiet.is_empty());
}

#[test]
fn capture_restores_stdout_after_error() {
    let _guard = serial();
    let rt = common::runtime();
    let before = rt.eval_proxy("__import__('sys').stdout").expect("stdout");
    assert!(rt.eval_captured("raise ValueError('x')").is_err());
    let after = rt.eval_proxy("__import__('sys').stdout").expect("stdout");
    assert_eq!(before, after);
}

#[test]
fn warnings_are_recorded_not_printed() {
    let _guard = serial();
    let rt = common::runtime();
    rt.run_string(
        "import warnings\ndef warns_once():\n    warnings.warn('old api', DeprecationWarning)\n    return 5\n",
    )
    .expect("define");
    let (value, warnings) = rt.eval_suppressing_warnings("warns_once()").expect("eval");
    assert_eq!(value, HostValue::int(5));
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].category, "DeprecationWarning");
    assert_eq!(warnings[0].message, "old api");
    assert!(warnings[0].lineno > 0);

    let (_, none) = rt.suppress_warnings(|| rt.eval("1 + 1")).expect("eval");
    assert!(none.is_empty());
}
