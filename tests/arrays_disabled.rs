//! Array conversion switched off at initialization. The runtime is a
//! process singleton, so these options need their own test binary.

use pybridge::{
    ArrayData, BridgeError, HostValue, InterpreterConfig, NdArray, Runtime, RuntimeOptions,
};

fn runtime() -> Runtime {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let options = RuntimeOptions {
        array_support: false,
        ..RuntimeOptions::default()
    };
    let config = InterpreterConfig::embedded().expect("describe linked interpreter");
    Runtime::initialize(config, options).expect("initialize without arrays")
}

// Stands in for numpy so the check does not depend on it being installed.
const FAKE_NUMPY: &str = "\
import sys, types
fake_numpy = types.ModuleType('numpy')
exec('class ndarray:\\n    pass\\nclass matrix(ndarray):\\n    pass\\n', fake_numpy.__dict__)
sys.modules['numpy'] = fake_numpy
";

#[test]
fn guest_ndarray_fails_to_convert() {
    let rt = runtime();
    assert!(!rt.has_array_support());
    rt.run_string(FAKE_NUMPY).expect("install fake numpy");

    for source in ["__import__('numpy').ndarray()", "__import__('numpy').matrix()"] {
        match rt.eval(source).unwrap_err() {
            BridgeError::Conversion { type_name, message } => {
                assert_eq!(type_name, "ndarray");
                assert!(message.contains("not available"), "{message}");
            }
            other => panic!("expected a conversion error for {source}, got {other}"),
        }
        // Keeping it on the guest side still works.
        rt.eval_proxy(source).expect("proxy");
    }
}

#[test]
fn lookalike_outside_numpy_stays_a_proxy() {
    let rt = runtime();
    rt.run_string("class ndarray:\n    pass\n").expect("define");
    let value = rt.eval("ndarray()").expect("eval");
    assert!(matches!(value, HostValue::Object(_)), "{value:?}");
}

#[test]
fn host_arrays_are_rejected() {
    let rt = runtime();
    let array = NdArray::new(vec![2], ArrayData::Int64(vec![1, 2])).expect("shape matches");
    let err = rt.to_guest(&HostValue::Array(array)).unwrap_err();
    assert!(matches!(err, BridgeError::Conversion { .. }), "{err}");
}
