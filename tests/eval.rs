mod common;

use common::with_python;
use pycall::{Complex, Tuple, Value};

#[test]
fn none_and_booleans() {
    with_python(|rt| {
        assert_eq!(rt.eval_value("None")?, Value::None);
        assert_eq!(rt.eval_value("True")?, Value::Bool(true));
        assert_eq!(rt.eval_value("False")?, Value::Bool(false));
        Ok(())
    });
}

#[test]
fn numbers() {
    with_python(|rt| {
        assert_eq!(rt.eval_value("1")?, Value::Int(1));
        assert_eq!(rt.eval_value("-42")?, Value::Int(-42));
        assert_eq!(rt.eval_value("1.0")?, Value::Float(1.0));
        assert_eq!(
            rt.eval_value("complex(1, 2)")?,
            Value::Complex(Complex::new(1.0, 2.0))
        );
        Ok(())
    });
}

#[test]
fn text() {
    with_python(|rt| {
        assert_eq!(rt.eval_value("\"python\"")?, Value::Text("python".into()));
        assert_eq!(rt.eval_value("u'caf\\xe9'")?, Value::Text("café".into()));
        Ok(())
    });
}

#[test]
fn list_keeps_order() {
    with_python(|rt| {
        assert_eq!(
            rt.eval_value("[1, 2, 3]")?,
            Value::List(vec![1.into(), 2.into(), 3.into()])
        );
        Ok(())
    });
}

#[test]
fn tuple_is_not_a_list() {
    with_python(|rt| {
        let v = rt.eval_value("(1, 2, 3)")?;
        assert_eq!(v, Value::Tuple(Tuple::from_iter([1, 2, 3])));
        assert_ne!(v, Value::List(vec![1.into(), 2.into(), 3.into()]));
        assert_eq!(v.kind(), "tuple");
        Ok(())
    });
}

#[test]
fn dict_lookup() {
    with_python(|rt| {
        let Value::Dict(d) = rt.eval_value("{\"a\": 1, \"b\": 2}")? else {
            panic!("expected a dict");
        };
        assert_eq!(d.get(&"a".into()), Some(&Value::Int(1)));
        assert_eq!(d.get(&"b".into()), Some(&Value::Int(2)));
        assert_eq!(d.get(&"c".into()), None);
        Ok(())
    });
}

#[test]
fn set_membership() {
    with_python(|rt| {
        let Value::Set(s) = rt.eval_value("{1, 2, 3}")? else {
            panic!("expected a set");
        };
        assert_eq!(s.len(), 3);
        for i in 1..=3 {
            assert!(s.contains(&Value::Int(i)));
        }
        assert!(!s.contains(&Value::Int(0)));
        assert!(!s.contains(&Value::Int(4)));
        Ok(())
    });
}

#[test]
fn dir_lists_class_attribute() {
    with_python(|rt| {
        for src in ["1", "[]", "object()", "None"] {
            let names = rt.eval(src)?.dir()?;
            assert!(names.iter().any(|n| n == "__class__"), "{src}: {names:?}");
        }
        Ok(())
    });
}

#[test]
fn syntax_error_is_reported() {
    with_python(|rt| {
        let err = rt.eval("1 +").unwrap_err();
        assert!(err.is_foreign("SyntaxError"), "{err}");
        Ok(())
    });
}

#[test]
fn exec_then_eval_share_main_namespace() {
    with_python(|rt| {
        rt.exec("pycall_eval_test = 6 * 7")?;
        assert_eq!(rt.eval_value("pycall_eval_test")?, Value::Int(42));
        Ok(())
    });
}

#[test]
fn version_matches_sys_version() {
    with_python(|rt| {
        let sys_version = rt.eval_value("__import__('sys').version")?;
        assert_eq!(sys_version.as_str(), Some(rt.description()));
        assert!(rt.description().starts_with(rt.version()));
        assert!(rt.library_path().is_file());
        Ok(())
    });
}

#[test]
fn crate_level_helpers() {
    if common::runtime().is_none() {
        return;
    }
    assert_eq!(pycall::eval("2 ** 10").unwrap(), Value::Int(1024));
    assert!(pycall::dir("object()").unwrap().contains(&"__class__".to_string()));
    let math = pycall::import("math").unwrap();
    let rt = math.runtime();
    let pi = rt.with_gil(|_| math.attr("pi")).unwrap();
    assert!(matches!(pi, Value::Float(f) if (f - std::f64::consts::PI).abs() < 1e-12));
    assert!(!pycall::python_version().unwrap().is_empty());
    assert!(pycall::python_description()
        .unwrap()
        .starts_with(&pycall::python_version().unwrap()));
}
