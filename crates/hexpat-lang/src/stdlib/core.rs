// std core functions: assertions and parameter packs

use crate::eval::function::{FunctionRegistry, ParameterCount};
use crate::eval::value::Value;

fn message_arg(args: &[Value]) -> String {
    args.get(1).map(Value::to_display_string).unwrap_or_default()
}

pub fn register(registry: &mut FunctionRegistry) {
    // std::assert(condition, message) - abort the run when the condition is false
    registry.register("std::assert", ParameterCount::Exactly(2), |_, args| {
        if args[0].to_bool().map_err(|e| e.message)? {
            Ok(None)
        } else {
            Err(message_arg(args))
        }
    });

    // std::assert_warn(condition, message) - log a warning instead of aborting
    registry.register("std::assert_warn", ParameterCount::Exactly(2), |ctx, args| {
        if !args[0].to_bool().map_err(|e| e.message)? {
            ctx.console.warning(message_arg(args));
        }
        Ok(None)
    });

    // std::sizeof_pack(pack...) - packs arrive expanded, so this counts the arguments
    registry.register("std::sizeof_pack", ParameterCount::AtLeast(0), |_, args| {
        Ok(Some(Value::Unsigned(args.len() as u128)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::console::Level;
    use crate::stdlib::test_util::call;

    #[test]
    fn test_assert_passes() {
        let (result, console) = call("std::assert", &[Value::Bool(true), Value::String("x".into())], &[], 0);
        assert_eq!(result, Ok(None));
        assert!(console.is_empty());
    }

    #[test]
    fn test_assert_fails_with_message() {
        let (result, _) = call(
            "std::assert",
            &[Value::Unsigned(0), Value::String("bad magic".into())],
            &[],
            0,
        );
        assert_eq!(result, Err("bad magic".to_string()));
    }

    #[test]
    fn test_assert_warn_logs() {
        let (result, console) = call(
            "std::assert_warn",
            &[Value::Bool(false), Value::String("odd".into())],
            &[],
            0,
        );
        assert_eq!(result, Ok(None));
        assert_eq!(console.entries()[0].level, Level::Warning);
        assert_eq!(console.entries()[0].message, "odd");
    }

    #[test]
    fn test_sizeof_pack_counts_arguments() {
        let (result, _) = call("std::sizeof_pack", &[], &[], 0);
        assert_eq!(result, Ok(Some(Value::Unsigned(0))));
        let (result, _) = call(
            "std::sizeof_pack",
            &[Value::Unsigned(1), Value::String("a".into()), Value::Bool(false)],
            &[],
            0,
        );
        assert_eq!(result, Ok(Some(Value::Unsigned(3))));
    }
}
