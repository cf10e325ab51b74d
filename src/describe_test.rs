use std::collections::BTreeMap;

use crate::describe::{ParamType, Parameter, Parameters};
use crate::error::AppError;

fn params() -> Parameters {
    Parameters(vec![
        Parameter::new("broker-address", ParamType::Url, true, "address to connect to").with_examples(&["tcp://0.0.0.0:1883"]),
        Parameter::new("buffer-size", ParamType::Int, false, "messages buffered per channel").with_default("10"),
        Parameter::new("pretty", ParamType::Bool, false, "pretty print output"),
    ])
}

fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn values_missing_required_parameter_is_named() {
    let err = params().values(&config(&[])).expect_err("expected validation to fail");
    assert_eq!(
        err,
        AppError::config("required parameter : broker-address not supplied"),
        "unexpected error for missing required parameter, got {}",
        err
    );
}

#[test]
fn values_applies_declared_defaults() {
    let values = params().values(&config(&[("broker-address", "tcp://0.0.0.0:1883")])).expect("expected validation to succeed");
    assert_eq!(values.int_or("buffer-size", 0), 10, "expected declared default to be applied");
    assert!(!values.bool_or("pretty", false), "expected absent optional bool to fall back to call-site default");
}

#[test]
fn values_coerces_declared_types() {
    let values = params()
        .values(&config(&[("broker-address", "tcp://0.0.0.0:1883"), ("buffer-size", "32"), ("pretty", "true")]))
        .expect("expected validation to succeed");
    assert_eq!(values.must_string("broker-address").expect("expected url value"), "tcp://0.0.0.0:1883");
    assert_eq!(values.int_or("buffer-size", 0), 32);
    assert!(values.bool_or("pretty", false));
}

#[test]
fn values_unconvertible_int_is_named() {
    let err = params()
        .values(&config(&[("broker-address", "tcp://0.0.0.0:1883"), ("buffer-size", "lots")]))
        .expect_err("expected validation to fail");
    assert_eq!(err, AppError::config("parameter : buffer-size is not a valid int : lots"), "unexpected error, got {}", err);
}

#[test]
fn values_rejects_malformed_url() {
    let err = params().values(&config(&[("broker-address", "not-a-url")])).expect_err("expected validation to fail");
    assert_eq!(
        err,
        AppError::config("parameter : broker-address is not a valid url : not-a-url"),
        "unexpected error, got {}",
        err
    );
}

#[test]
fn parameter_describe_includes_default() {
    let rendered = Parameter::new("buffer-size", ParamType::Int, false, "messages buffered").with_default("10").describe();
    assert!(rendered.contains("Default : 10"), "expected rendered description to include default, got {}", rendered);
}
