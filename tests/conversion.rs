use pybridge::{ArrayData, BridgeError, DType, HostKey, HostValue, NdArray};

mod common;

fn round_trip(value: HostValue) -> HostValue {
    let rt = common::runtime();
    let guest = rt.to_guest(&value).expect("to guest");
    rt.to_host(&guest).expect("to host")
}

#[test]
fn scalars_round_trip_with_their_type() {
    let cases = [
        HostValue::bool(true),
        HostValue::int(-42),
        HostValue::float(2.5),
        HostValue::string("héllo"),
        HostValue::Bytes(b"\x00\xffraw".to_vec()),
    ];
    for value in cases {
        let back = round_trip(value.clone());
        assert_eq!(back.type_name(), value.type_name());
        assert_eq!(back, value);
    }
    assert!(round_trip(HostValue::Null).is_null());
}

#[test]
fn scalars_land_as_guest_scalars() {
    let rt = common::runtime();
    for (value, ty) in [
        (HostValue::bool(false), "bool"),
        (HostValue::int(7), "int"),
        (HostValue::float(1.0), "float"),
        (HostValue::string("x"), "str"),
        (HostValue::Null, "NoneType"),
    ] {
        let guest = rt.to_guest(&value).expect("to guest");
        assert_eq!(guest.type_name().expect("type name"), ty);
    }
}

#[test]
fn atomic_vectors_become_lists_and_collapse_back() {
    let rt = common::runtime();
    let guest = rt.to_guest(&common::ints(&[1, 2, 3])).expect("to guest");
    assert_eq!(guest.type_name().expect("type name"), "list");
    assert_eq!(guest.len().expect("len"), 3);
    assert_eq!(guest.to_host().expect("to host"), common::ints(&[1, 2, 3]));

    let mixed = rt.eval("[1, 2.0]").expect("eval");
    assert_eq!(
        mixed,
        HostValue::List(vec![HostValue::int(1), HostValue::float(2.0)])
    );
    assert_eq!(rt.eval("[]").expect("eval"), HostValue::List(vec![]));
}

#[test]
fn heterogeneous_tuple_keeps_order_and_types() {
    let value = HostValue::Tuple(vec![
        HostValue::int(1),
        HostValue::string("a"),
        HostValue::bool(true),
        HostValue::Null,
    ]);
    let rt = common::runtime();
    let guest = rt.to_guest(&value).expect("to guest");
    assert_eq!(guest.type_name().expect("type name"), "tuple");
    assert_eq!(guest.to_host().expect("to host"), value);
}

#[test]
fn mapping_keeps_key_order() {
    let value = HostValue::dict([
        ("zeta", HostValue::int(1)),
        ("alpha", HostValue::int(2)),
        ("mid", HostValue::int(3)),
    ]);
    let rt = common::runtime();
    rt.main_module()
        .expect("main module")
        .set_attr("ordered_map", &value)
        .expect("set attr");
    assert_eq!(
        rt.eval("list(ordered_map)").expect("eval"),
        HostValue::Str(vec!["zeta".into(), "alpha".into(), "mid".into()])
    );

    let guest = rt.to_guest(&value).expect("to guest");
    let HostValue::Dict(map) = guest.to_host().expect("to host") else {
        panic!("expected a dict");
    };
    let order: Vec<_> = map.keys().cloned().collect();
    assert_eq!(
        order,
        vec![HostKey::from("zeta"), HostKey::from("alpha"), HostKey::from("mid")]
    );

    let from_guest = rt.eval("{3: 'c', 1: 'a', 2: 'b'}").expect("eval");
    let HostValue::Dict(map) = from_guest else {
        panic!("expected a dict");
    };
    let order: Vec<_> = map.keys().cloned().collect();
    assert_eq!(order, vec![HostKey::Int(3), HostKey::Int(1), HostKey::Int(2)]);
}

#[test]
fn float_matrix_keeps_shape_and_dtype() {
    let rt = common::runtime();
    let array = NdArray::new(
        vec![2, 3],
        ArrayData::Float64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
    )
    .expect("shape matches data");

    if !rt.has_array_support() {
        let err = rt.to_guest(&HostValue::Array(array)).unwrap_err();
        assert!(matches!(err, BridgeError::Conversion { .. }), "{err}");
        return;
    }

    let guest = rt.to_guest(&HostValue::Array(array.clone())).expect("to guest");
    assert_eq!(guest.type_name().expect("type name"), "ndarray");
    assert_eq!(
        guest.get_attr("shape").expect("shape"),
        common::ints(&[2, 3])
    );
    let back = guest.to_host().expect("to host");
    let back = back.as_array().expect("array");
    assert_eq!(back.shape(), &[2, 3]);
    assert_eq!(back.dtype(), DType::Float64);
    assert_eq!(back, &array);
}

#[test]
fn big_integers_stay_on_the_guest_side() {
    let rt = common::runtime();
    let value = rt.eval("2 ** 80").expect("eval");
    let proxy = value.as_proxy().expect("proxy for out-of-range int");
    assert_eq!(proxy.str_repr(), "1208925819614629174706176");
}

#[test]
fn unknown_objects_become_proxies() {
    let rt = common::runtime();
    let value = rt.eval("object()").expect("eval");
    let proxy = value.as_proxy().expect("proxy");
    assert_eq!(proxy.type_name().expect("type name"), "object");
}

#[test]
fn json_bridge() {
    let rt = common::runtime();
    let obj = rt.from_json(r#"{"a": [1, 2], "b": null}"#).expect("from json");
    assert_eq!(obj.to_json().expect("to json"), r#"{"a": [1, 2], "b": null}"#);
}
