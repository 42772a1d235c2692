#![allow(dead_code)]

use pybridge::{HostValue, Kwargs, ObjectProxy, Runtime};

/// The process-wide runtime, with test logging installed once.
pub fn runtime() -> Runtime {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Runtime::embedded().expect("embedded interpreter initializes")
}

/// Define guest code in `__main__` and fetch one name from it.
pub fn define(rt: &Runtime, source: &str, name: &str) -> ObjectProxy {
    rt.run_string(source).expect("guest source runs");
    rt.main_module()
        .expect("main module")
        .get_attr_proxy(name)
        .expect("name defined by guest source")
}

pub fn no_kwargs() -> Kwargs {
    Kwargs::new()
}

pub fn ints(values: &[i64]) -> HostValue {
    HostValue::Integer(values.to_vec())
}
