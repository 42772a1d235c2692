use std::path::{Path, PathBuf};
use std::thread;

use pybridge::{BridgeError, HostValue, InterpreterConfig, Kwargs, Runtime, RuntimeOptions};

mod common;

#[test]
fn same_configuration_returns_the_live_runtime() {
    let rt = common::runtime();
    let again = Runtime::initialize(rt.config().clone(), RuntimeOptions::default())
        .expect("same interpreter");
    assert!(rt.same_runtime(&again));
    assert!(Runtime::current().is_some_and(|cur| cur.same_runtime(&rt)));
}

#[test]
fn second_distinct_configuration_is_rejected() {
    let rt = common::runtime();
    let mut other = rt.config().clone();
    other.executable = PathBuf::from("/opt/other/bin/python3");
    let err = Runtime::initialize(other, RuntimeOptions::default()).unwrap_err();
    assert!(matches!(err, BridgeError::Configuration(_)), "{err}");
    assert!(err.to_string().contains("already initialized"), "{err}");
}

#[test]
fn embedded_config_describes_the_linked_interpreter() {
    let rt = common::runtime();
    let config = rt.config();
    assert!(config.usable);
    assert!(config.major_minor().is_some_and(|(major, _)| major == 3));
    let version = rt
        .import("sys")
        .expect("sys")
        .get_attr_proxy("version_info")
        .expect("version_info")
        .get_item(&HostValue::int(0))
        .expect("major");
    assert_eq!(version, HostValue::int(3));

    let json = config.to_json().expect("to json");
    assert_eq!(&InterpreterConfig::from_json(&json).expect("from json"), config);
}

#[test]
fn default_search_path_entries_are_present() {
    let rt = common::runtime();
    let path = rt.eval("__import__('sys').path[:2]").expect("eval");
    let HostValue::Str(entries) = path else {
        panic!("expected strings");
    };
    for entry in &rt.options().sys_path {
        assert!(
            entries.iter().any(|e| Path::new(e) == entry.as_path()),
            "{} missing from {entries:?}",
            entry.display()
        );
    }
}

#[test]
fn host_threads_cross_concurrently() {
    let rt = common::runtime();
    common::define(
        &rt,
        "def square_sum(n):\n    return sum(i * i for i in range(n))\n",
        "square_sum",
    );
    let handles: Vec<_> = (0..8i64)
        .map(|t| {
            let rt = rt.clone();
            thread::spawn(move || {
                let func = rt
                    .main_module()
                    .expect("main")
                    .get_attr_proxy("square_sum")
                    .expect("func");
                (0..50i64)
                    .map(|i| {
                        func.call(&[HostValue::int(t + i)], &Kwargs::new())
                            .expect("call")
                            .as_i64()
                            .expect("int")
                    })
                    .sum::<i64>()
            })
        })
        .collect();

    let expected = |n: i64| (0..n).map(|i| i * i).sum::<i64>();
    for (t, handle) in handles.into_iter().enumerate() {
        let t = t as i64;
        let got = handle.join().expect("thread");
        assert_eq!(got, (0..50).map(|i| expected(t + i)).sum::<i64>());
    }
}
