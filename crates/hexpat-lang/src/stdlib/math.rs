// std::math - floating point functions

use crate::eval::function::{FunctionRegistry, ParameterCount};
use crate::eval::value::Value;

const UNARY: &[(&str, fn(f64) -> f64)] = &[
    ("floor", f64::floor),
    ("ceil", f64::ceil),
    ("round", f64::round),
    ("trunc", f64::trunc),
    ("log10", f64::log10),
    ("log2", f64::log2),
    ("ln", f64::ln),
    ("sqrt", f64::sqrt),
    ("cbrt", f64::cbrt),
    ("sin", f64::sin),
    ("cos", f64::cos),
    ("tan", f64::tan),
    ("asin", f64::asin),
    ("acos", f64::acos),
    ("atan", f64::atan),
    ("sinh", f64::sinh),
    ("cosh", f64::cosh),
    ("tanh", f64::tanh),
    ("asinh", f64::asinh),
    ("acosh", f64::acosh),
    ("atanh", f64::atanh),
];

const BINARY: &[(&str, fn(f64, f64) -> f64)] = &[
    ("fmod", |a, b| a % b),
    ("pow", f64::powf),
    ("atan2", f64::atan2),
];

fn float_arg(args: &[Value], index: usize) -> Result<f64, String> {
    args[index].to_float().map_err(|e| e.message)
}

pub fn register(registry: &mut FunctionRegistry) {
    for &(name, f) in UNARY {
        registry.register(format!("std::math::{}", name), ParameterCount::Exactly(1), move |_, args| {
            Ok(Some(Value::Float(f(float_arg(args, 0)?))))
        });
    }

    for &(name, f) in BINARY {
        registry.register(format!("std::math::{}", name), ParameterCount::Exactly(2), move |_, args| {
            Ok(Some(Value::Float(f(float_arg(args, 0)?, float_arg(args, 1)?))))
        });
    }

    // abs keeps integers integral
    registry.register("std::math::abs", ParameterCount::Exactly(1), |_, args| {
        Ok(Some(match &args[0] {
            Value::Float(f) => Value::Float(f.abs()),
            Value::Signed(i) => Value::Signed(i.wrapping_abs()),
            Value::Unsigned(u) => Value::Unsigned(*u),
            other => return Err(format!("abs requires a number, got {}", other.kind_name())),
        }))
    });

    registry.register("std::math::min", ParameterCount::Exactly(2), |_, args| {
        Ok(Some(Value::Float(float_arg(args, 0)?.min(float_arg(args, 1)?))))
    });

    registry.register("std::math::max", ParameterCount::Exactly(2), |_, args| {
        Ok(Some(Value::Float(float_arg(args, 0)?.max(float_arg(args, 1)?))))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::test_util::call;

    fn math(name: &str, args: &[Value]) -> Value {
        let (result, _) = call(&format!("std::math::{}", name), args, &[], 0);
        result.unwrap().unwrap()
    }

    #[test]
    fn test_rounding() {
        assert_eq!(math("floor", &[Value::Float(3.7)]), Value::Float(3.0));
        assert_eq!(math("ceil", &[Value::Float(3.2)]), Value::Float(4.0));
        assert_eq!(math("round", &[Value::Float(2.5)]), Value::Float(3.0));
        assert_eq!(math("trunc", &[Value::Float(-2.7)]), Value::Float(-2.0));
    }

    #[test]
    fn test_integer_arguments_become_floats() {
        assert_eq!(math("sqrt", &[Value::Unsigned(16)]), Value::Float(4.0));
        match math("cbrt", &[Value::Signed(-27)]) {
            Value::Float(f) => assert!((f + 3.0).abs() < 1e-12, "{}", f),
            other => panic!("expected a float, got {:?}", other),
        }
        assert_eq!(math("pow", &[Value::Unsigned(2), Value::Unsigned(10)]), Value::Float(1024.0));
    }

    #[test]
    fn test_logarithms() {
        assert_eq!(math("log2", &[Value::Float(8.0)]), Value::Float(3.0));
        assert_eq!(math("log10", &[Value::Float(1000.0)]), Value::Float(3.0));
        assert_eq!(math("ln", &[Value::Float(1.0)]), Value::Float(0.0));
    }

    #[test]
    fn test_fmod_and_trig() {
        assert_eq!(math("fmod", &[Value::Float(7.5), Value::Float(2.0)]), Value::Float(1.5));
        assert_eq!(math("sin", &[Value::Float(0.0)]), Value::Float(0.0));
        assert_eq!(math("cos", &[Value::Float(0.0)]), Value::Float(1.0));
        assert_eq!(math("atan2", &[Value::Float(0.0), Value::Float(1.0)]), Value::Float(0.0));
        assert_eq!(math("tanh", &[Value::Float(0.0)]), Value::Float(0.0));
    }

    #[test]
    fn test_abs_min_max() {
        assert_eq!(math("abs", &[Value::Signed(-42)]), Value::Signed(42));
        assert_eq!(math("abs", &[Value::Unsigned(7)]), Value::Unsigned(7));
        assert_eq!(math("abs", &[Value::Float(-0.5)]), Value::Float(0.5));
        assert_eq!(math("min", &[Value::Float(-1.0), Value::Float(1.0)]), Value::Float(-1.0));
        assert_eq!(math("max", &[Value::Unsigned(3), Value::Unsigned(7)]), Value::Float(7.0));
    }

    #[test]
    fn test_non_numeric_argument() {
        let (result, _) = call("std::math::floor", &[Value::String("x".into())], &[], 0);
        assert!(result.is_err());
        let (result, _) = call("std::math::abs", &[Value::Bool(true)], &[], 0);
        assert!(result.is_err());
    }
}
