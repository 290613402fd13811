// std::string - string manipulation functions

use crate::eval::function::{FunctionRegistry, ParameterCount};
use crate::eval::value::Value;

use super::u64_arg;

fn string_arg(args: &[Value], index: usize) -> Result<String, String> {
    match &args[index] {
        Value::String(s) => Ok(s.clone()),
        Value::Char(c) => Ok(c.to_string()),
        other => Err(format!("expected a string, got {}", other.kind_name())),
    }
}

/// Leading integer of `s` in `base` (0 picks the base from a `0x`/`0` prefix).
/// Text after the digits is ignored and no digits at all reads as 0.
fn parse_int(s: &str, base: u32) -> Result<i128, String> {
    if base == 1 || base > 36 {
        return Err(format!("invalid base {}", base));
    }
    let s = s.split('\0').next().unwrap_or_default().trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
    let (base, s) = match (base, hex) {
        (0 | 16, Some(rest)) => (16, rest),
        (0, None) if s.starts_with('0') && s.len() > 1 => (8, &s[1..]),
        (0, None) => (10, s),
        (base, _) => (base, s),
    };
    let digits = s.len() - s.trim_start_matches(|c: char| c.is_digit(base)).len();
    if digits == 0 {
        return Ok(0);
    }
    let value = i128::from_str_radix(&s[..digits], base)
        .map_err(|_| format!("'{}' does not fit in 128 bits", &s[..digits]))?;
    Ok(if negative { -value } else { value })
}

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("std::string::length", ParameterCount::Exactly(1), |_, args| {
        Ok(Some(Value::Unsigned(string_arg(args, 0)?.chars().count() as u128)))
    });

    // std::string::at(string, index) - negative indices count from the end
    registry.register("std::string::at", ParameterCount::Exactly(2), |_, args| {
        let s: Vec<char> = string_arg(args, 0)?.chars().collect();
        let index = args[1].to_signed().map_err(|e| e.message)?;
        let position = if index < 0 {
            usize::try_from(index.unsigned_abs()).ok().and_then(|back| s.len().checked_sub(back))
        } else {
            usize::try_from(index).ok().filter(|i| *i < s.len())
        };
        match position {
            Some(i) => Ok(Some(Value::Char(s[i]))),
            None => Err(format!("character index {} out of range for a string of length {}", index, s.len())),
        }
    });

    // std::string::substr(string, pos, count) - count is clamped to the end
    registry.register("std::string::substr", ParameterCount::Exactly(3), |_, args| {
        let s = string_arg(args, 0)?;
        let pos = u64_arg(args, 1, "position")?;
        let count = u64_arg(args, 2, "count")?;
        let len = s.chars().count();
        if pos > len as u64 {
            return Err(format!("character index {} out of range for a string of length {}", pos, len));
        }
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        Ok(Some(Value::String(s.chars().skip(pos as usize).take(count).collect())))
    });

    registry.register("std::string::parse_int", ParameterCount::Exactly(2), |_, args| {
        let s = string_arg(args, 0)?;
        let base = u32::try_from(u64_arg(args, 1, "base")?).map_err(|_| "invalid base".to_string())?;
        Ok(Some(Value::Signed(parse_int(&s, base)?)))
    });

    registry.register("std::string::parse_float", ParameterCount::Exactly(1), |_, args| {
        let s = string_arg(args, 0)?;
        let trimmed = s.split('\0').next().unwrap_or_default().trim();
        if trimmed.is_empty() {
            return Ok(Some(Value::Float(0.0)));
        }
        let value = trimmed
            .parse::<f64>()
            .map_err(|e| format!("cannot parse '{}' as a float: {}", trimmed, e))?;
        Ok(Some(Value::Float(value)))
    });
}
