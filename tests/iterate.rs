use pybridge::{BridgeError, HostValue};

mod common;

#[test]
fn list_iterates_in_both_modes() {
    let rt = common::runtime();
    let list = rt.eval_proxy("[10, 20, 30]").expect("eval");

    let mut seen = Vec::new();
    list.iterate()
        .expect("iterate")
        .for_each_value(|v| seen.push(v))
        .expect("callback mode");
    assert_eq!(seen, [HostValue::int(10), HostValue::int(20), HostValue::int(30)]);

    let collected = list.iterate().expect("iterate").collect_all(None).expect("eager mode");
    assert_eq!(collected, seen);
}

#[test]
fn iterator_is_consumed_and_not_restartable() {
    let rt = common::runtime();
    let it = rt.eval_proxy("iter([10, 20, 30])").expect("eval");

    let mut adapter = it.iterate().expect("iterate");
    assert_eq!(adapter.next().and_then(Result::ok), Some(HostValue::int(10)));
    let rest: Vec<_> = adapter.by_ref().collect::<Result<_, _>>().expect("rest");
    assert_eq!(rest, [HostValue::int(20), HostValue::int(30)]);
    assert!(adapter.is_exhausted());
    assert!(adapter.next().is_none());

    let again = it.iterate().expect("iterate").collect_all(None).expect("collect");
    assert!(again.is_empty());
}

#[test]
fn yielded_none_is_not_the_end() {
    let rt = common::runtime();
    let gen = common::define(
        &rt,
        "def with_gaps():\n    yield 1\n    yield None\n    yield 3\n",
        "with_gaps",
    );
    let values = gen
        .call_proxy(&[], &common::no_kwargs())
        .expect("generator")
        .iterate()
        .expect("iterate")
        .collect_all(None)
        .expect("collect");
    assert_eq!(values, [HostValue::int(1), HostValue::Null, HostValue::int(3)]);
}

#[test]
fn eager_collection_enforces_limit() {
    let rt = common::runtime();
    let endless = rt.eval_proxy("__import__('itertools').count()").expect("eval");
    let err = endless.iterate().expect("iterate").collect_all(Some(5)).unwrap_err();
    assert!(matches!(err, BridgeError::IterationLimit { limit: 5 }), "{err}");

    let exact = rt.eval_proxy("range(5)").expect("eval");
    assert_eq!(
        rt.collect_iterable(&exact, Some(5)).expect("within limit").len(),
        5
    );
}

#[test]
fn guest_error_mid_iteration_surfaces_and_fuses() {
    let rt = common::runtime();
    let gen = common::define(
        &rt,
        "def fails_second():\n    yield 1\n    raise KeyError('missing')\n",
        "fails_second",
    );
    let mut adapter = gen
        .call_proxy(&[], &common::no_kwargs())
        .expect("generator")
        .iterate()
        .expect("iterate");
    assert!(matches!(adapter.next(), Some(Ok(_))));
    let err = adapter.next().expect("error item").unwrap_err();
    assert_eq!(err.guest_exception().expect("guest").type_name, "KeyError");
    assert!(adapter.next().is_none());
}

#[test]
fn non_iterable_is_rejected() {
    let rt = common::runtime();
    let err = rt.eval_proxy("3.5").expect("eval").iterate().err().expect("not iterable");
    assert!(matches!(err, BridgeError::Attribute { .. }), "{err}");
}

#[test]
fn host_iterator_drives_guest_loop() {
    let rt = common::runtime();
    let source = rt
        .guest_iterator((1..=4).map(HostValue::int))
        .expect("guest iterator");
    rt.main_module()
        .expect("main")
        .set_attr("host_numbers", &HostValue::Object(source))
        .expect("set");
    assert_eq!(rt.eval("sum(host_numbers)").expect("eval"), HostValue::int(10));
    assert_eq!(rt.eval("list(host_numbers)").expect("eval"), HostValue::List(vec![]));
}
