mod common;

use common::{is_python3, runtime, with_python};
use proptest::prelude::*;
use pycall::abi::Capability;
use pycall::{Complex, Dict, Error, Runtime, Set, Tuple, Value};

fn round_trip(rt: &'static Runtime, value: &Value) -> Value {
    rt.with_gil(|rt| rt.to_foreign(value)?.to_value())
        .unwrap_or_else(|e| panic!("round trip of {value:?} failed: {e}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scalar_round_trip(
        b in any::<bool>(),
        i in any::<i64>(),
        f in -1e300f64..1e300,
        re in -1e6f64..1e6,
        im in -1e6f64..1e6,
        s in ".*",
    ) {
        let Some(rt) = runtime() else {
            return Ok(());
        };
        for value in [
            Value::Bool(b),
            Value::Int(i),
            Value::Float(f),
            Value::Complex(Complex::new(re, im)),
            Value::Text(s.clone()),
        ] {
            prop_assert_eq!(round_trip(rt, &value), value);
        }
    }
}

#[test]
fn special_floats_survive() {
    let Some(rt) = runtime() else {
        return;
    };
    for f in [0.0, -0.0, f64::INFINITY, f64::NEG_INFINITY, f64::MIN_POSITIVE] {
        assert_eq!(round_trip(rt, &Value::Float(f)), Value::Float(f));
    }
    assert!(matches!(round_trip(rt, &Value::Float(f64::NAN)), Value::Float(f) if f.is_nan()));
    // -1.0 doubles as the C API error marker.
    assert_eq!(round_trip(rt, &Value::Float(-1.0)), Value::Float(-1.0));
    assert_eq!(round_trip(rt, &Value::Int(-1)), Value::Int(-1));
    assert_eq!(
        round_trip(rt, &Value::Complex(Complex::new(-1.0, -1.0))),
        Value::Complex(Complex::new(-1.0, -1.0))
    );
}

#[test]
fn containers_round_trip() {
    let Some(rt) = runtime() else {
        return;
    };
    let mixed = vec![
        Value::None,
        Value::Bool(true),
        Value::Int(7),
        Value::Float(2.5),
        Value::Complex(Complex::new(0.0, 1.0)),
        Value::Text("héllo".into()),
    ];

    let list = Value::List(mixed.clone());
    assert_eq!(round_trip(rt, &list), list);

    let tuple = Value::Tuple(Tuple(mixed));
    assert_eq!(round_trip(rt, &tuple), tuple);

    let mut dict = Dict::new();
    dict.insert("int", 1);
    dict.insert(2, "two");
    dict.insert(Value::Tuple(Tuple::from_iter([1, 2])), 3.5);
    dict.insert("nested", Value::List(vec![1.into(), Value::None]));
    let dict = Value::Dict(dict);
    assert_eq!(round_trip(rt, &dict), dict);

    let set = Value::Set(Set::from_iter([Value::Int(1), "a".into(), Value::Bool(false)]));
    assert_eq!(round_trip(rt, &set), set);

    assert_eq!(round_trip(rt, &Value::List(vec![])), Value::List(vec![]));
    assert_eq!(round_trip(rt, &Value::Dict(Dict::new())), Value::Dict(Dict::new()));
}

#[test]
fn tuple_and_list_stay_distinct() {
    with_python(|rt| {
        let tuple = rt.to_foreign(&Value::Tuple(Tuple::from_iter([1, 2])))?;
        let list = rt.to_foreign(&Value::List(vec![1.into(), 2.into()]))?;
        assert_eq!(tuple.type_name(), "tuple");
        assert_eq!(list.type_name(), "list");
        assert_ne!(tuple.to_value()?, list.to_value()?);
        Ok(())
    });
}

#[test]
fn bytes_round_trip() {
    with_python(|rt| {
        let value = Value::Bytes(vec![0, 159, 255, b'a']);
        let obj = rt.to_foreign(&value)?;
        if is_python3(rt) {
            assert_eq!(obj.type_name(), "bytes");
            assert_eq!(obj.to_value()?, value);
        } else {
            // Python 2 `str` is just bytes; non-UTF-8 content stays bytes.
            assert_eq!(obj.to_value()?, value);
        }
        Ok(())
    });
}

#[test]
fn references_pass_through_unchanged() {
    with_python(|rt| {
        let obj = rt.eval("object()")?;
        let Value::Opaque(back) = rt.to_foreign(&Value::Opaque(obj.clone()))?.to_value()? else {
            panic!("expected an opaque value");
        };
        assert_eq!(back, obj);

        for src in ["len", "lambda: 1", "'x'.upper"] {
            let v = rt.eval_value(src)?;
            assert!(matches!(v, Value::Callable(_)), "{src} -> {v:?}");
        }
        Ok(())
    });
}

#[test]
fn subclasses_of_builtins_are_opaque() {
    with_python(|rt| {
        rt.exec("class PycallIntList(list):\n    pass\n")?;
        let v = rt.eval_value("PycallIntList([1, 2])")?;
        assert_eq!(v.kind(), "opaque");
        Ok(())
    });
}

#[test]
fn big_integer_is_overflow_and_leaks_nothing() {
    with_python(|rt| {
        let list = rt.eval("[object(), 2 ** 70]")?;
        let first = list.getitem(&rt.to_foreign(&Value::Int(0))?)?;
        let before = first.refcount();

        let err = list.to_value().unwrap_err();
        assert!(matches!(err, Error::Overflow), "{err}");
        assert_eq!(first.refcount(), before);

        // The pending OverflowError was consumed.
        assert_eq!(rt.eval_value("1")?, Value::Int(1));
        Ok(())
    });
}

#[test]
fn failed_dict_build_restores_refcounts() {
    with_python(|rt| {
        let marker = rt.eval("object()")?;
        let mut dict = Dict::new();
        dict.insert("first", Value::Opaque(marker.clone()));
        // Lists are unhashable, so this entry fails.
        dict.insert(Value::List(vec![1.into()]), 2);
        let dict = Value::Dict(dict);

        let before = marker.refcount();
        let err = rt.to_foreign(&dict).unwrap_err();
        assert!(err.is_foreign("TypeError"), "{err}");
        assert_eq!(marker.refcount(), before);
        Ok(())
    });
}

#[test]
fn numeric_keys_merge_as_in_python() {
    let Some(rt) = runtime() else { return };

    let set = Set::from_iter([Value::Int(1), Value::Float(1.0), Value::Bool(true)]);
    assert_eq!(set.len(), 1);
    assert_eq!(round_trip(rt, &Value::Set(set.clone())), Value::Set(set));

    let mut dict = Dict::new();
    dict.insert(1, "int");
    dict.insert(true, "bool");
    dict.insert(Value::Float(1.0), "float");
    assert_eq!(dict.len(), 1);
    let back = round_trip(rt, &Value::Dict(dict.clone()));
    assert_eq!(back, Value::Dict(dict));
    match back {
        Value::Dict(d) => assert_eq!(d.get(&Value::Int(1)), Some(&Value::from("float"))),
        other => panic!("expected a dict, got {other:?}"),
    }
}

#[test]
fn keys_merged_by_custom_eq_are_a_conversion_error() {
    with_python(|rt| {
        rt.exec(
            "class PycallAlwaysEqual:\n    \
             def __eq__(self, other):\n        return True\n    \
             def __hash__(self):\n        return 0\n",
        )?;
        let a = rt.eval("PycallAlwaysEqual()")?;
        let b = rt.eval("PycallAlwaysEqual()")?;
        let set = Set::from_iter([Value::Opaque(a.clone()), Value::Opaque(b.clone())]);
        assert_eq!(set.len(), 2);

        let before = (a.refcount(), b.refcount());
        let err = rt.to_foreign(&Value::Set(set)).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)), "{err}");
        assert_eq!((a.refcount(), b.refcount()), before);

        let dict = Dict::from_iter([(Value::Opaque(a), 1), (Value::Opaque(b), 2)]);
        let err = rt.to_foreign(&Value::Dict(dict)).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)), "{err}");
        Ok(())
    });
}

#[test]
fn lone_surrogate_is_a_conversion_error() {
    with_python(|rt| {
        if !is_python3(rt) {
            return Ok(());
        }
        let err = rt.eval("'\\ud800'")?.to_value().unwrap_err();
        assert!(matches!(err, Error::Conversion(_)), "{err}");
        // The UnicodeEncodeError was consumed.
        assert_eq!(rt.eval_value("'ok'")?, Value::from("ok"));
        Ok(())
    });
}

#[test]
fn failed_call_restores_refcounts() {
    with_python(|rt| {
        let f = rt.eval("lambda x: 1 / 0")?;
        let arg = rt.eval("object()")?;
        let before = arg.refcount();

        let err = f.call(&[arg.clone()]).unwrap_err();
        assert!(err.is_foreign("ZeroDivisionError"), "{err}");
        assert_eq!(arg.refcount(), before);
        Ok(())
    });
}

#[test]
fn python3_resolves_unified_symbols() {
    with_python(|rt| {
        let profile = rt.profile();
        if !is_python3(rt) {
            assert!(profile.has_legacy_int_type);
            return Ok(());
        }
        assert!(!profile.has_legacy_int_type);
        assert!(profile.uses_bytes_for_legacy_string_type);
        assert_eq!(
            profile.capability("PyInt_FromSsize_t"),
            Capability::BoundAs("PyLong_FromSsize_t")
        );
        assert_eq!(
            profile.capability("PyString_FromStringAndSize"),
            Capability::BoundAs("PyBytes_FromStringAndSize")
        );
        // Integer and text conversion work through the substitutes.
        assert_eq!(rt.eval_value("10 ** 9")?, Value::Int(1_000_000_000));
        assert_eq!(rt.eval_value("'abc'")?, Value::Text("abc".into()));
        Ok(())
    });
}
