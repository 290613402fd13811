// std io functions: console output and string formatting

use crate::eval::function::{FunctionRegistry, ParameterCount};
use crate::eval::provider::ByteProvider;
use crate::eval::value::Value;

/// `{[index][:[#][0][width][.precision][x|X|b|o|d]]}`
#[derive(Debug, Default, PartialEq, Eq)]
struct Spec {
    alternate: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    radix: Option<char>,
}

/// Widest field or longest precision a placeholder may ask for
const MAX_FORMAT_WIDTH: usize = 4096;

fn parse_bounded(digits: &str, what: &str, spec: &str) -> Result<usize, String> {
    match digits.parse::<usize>() {
        Ok(n) if n <= MAX_FORMAT_WIDTH => Ok(n),
        _ => Err(format!("{} in '{}' exceeds the maximum of {}", what, spec, MAX_FORMAT_WIDTH)),
    }
}

fn parse_spec(spec: &str) -> Result<Spec, String> {
    let mut out = Spec::default();
    let mut rest = spec;
    if let Some(r) = rest.strip_prefix('#') {
        out.alternate = true;
        rest = r;
    }
    if let Some(r) = rest.strip_prefix('0') {
        out.zero = true;
        rest = r;
    }
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        out.width = parse_bounded(&rest[..digits], "width", spec)?;
        rest = &rest[digits..];
    }
    if let Some(r) = rest.strip_prefix('.') {
        let digits = r.len() - r.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return Err(format!("missing precision in '{}'", spec));
        }
        out.precision = Some(parse_bounded(&r[..digits], "precision", spec)?);
        rest = &r[digits..];
    }
    match rest {
        "" => {}
        "x" | "X" | "b" | "o" | "d" => out.radix = rest.chars().next(),
        _ => return Err(format!("invalid format specifier '{}'", spec)),
    }
    Ok(out)
}

fn radix_digits(value: &Value, radix: char) -> Result<String, String> {
    Ok(match value {
        Value::Signed(v) => match radix {
            'x' => format!("{:x}", v),
            'X' => format!("{:X}", v),
            'b' => format!("{:b}", v),
            'o' => format!("{:o}", v),
            _ => v.to_string(),
        },
        other => {
            let v = other.to_unsigned().map_err(|e| e.message)?;
            match radix {
                'x' => format!("{:x}", v),
                'X' => format!("{:X}", v),
                'b' => format!("{:b}", v),
                'o' => format!("{:o}", v),
                _ => v.to_string(),
            }
        }
    })
}

fn format_value(value: &Value, spec: &Spec, provider: &dyn ByteProvider) -> Result<String, String> {
    let (prefix, body, numeric) = match (value, spec.radix) {
        (Value::Float(f), _) => match spec.precision {
            Some(p) => (String::new(), format!("{:.*}", p, f), true),
            None => (String::new(), f.to_string(), true),
        },
        (Value::Unsigned(_) | Value::Signed(_) | Value::Bool(_) | Value::Char(_), Some(radix)) => {
            let prefix = match radix {
                'x' | 'X' if spec.alternate => "0x",
                'b' if spec.alternate => "0b",
                'o' if spec.alternate => "0o",
                _ => "",
            };
            (prefix.to_string(), radix_digits(value, radix)?, true)
        }
        (Value::Unsigned(_) | Value::Signed(_), None) => (String::new(), value.to_display_string(), true),
        (Value::Pattern(p), _) => (String::new(), p.formatted_value(provider), false),
        (other, _) => (String::new(), other.to_display_string(), false),
    };

    let len = prefix.chars().count() + body.chars().count();
    if len >= spec.width {
        return Ok(prefix + &body);
    }
    let fill = spec.width - len;
    Ok(if numeric && spec.zero {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(d) => ("-", d),
            None => ("", body.as_str()),
        };
        format!("{}{}{}{}", sign, prefix, "0".repeat(fill), digits)
    } else if numeric {
        format!("{}{}{}", " ".repeat(fill), prefix, body)
    } else {
        format!("{}{}", body, " ".repeat(fill))
    })
}

/// Expand `{}` placeholders in `fmt` with `args`
pub fn format_string(fmt: &str, args: &[Value], provider: &dyn ByteProvider) -> Result<String, String> {
    let mut out = String::with_capacity(fmt.len());
    let mut next = 0;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(format!("unterminated placeholder in format string '{}'", fmt)),
                    }
                }
                let (index, spec) = match field.split_once(':') {
                    Some((index, spec)) => (index, spec),
                    None => (field.as_str(), ""),
                };
                let index = if index.is_empty() {
                    next += 1;
                    next - 1
                } else {
                    index
                        .parse::<usize>()
                        .map_err(|_| format!("invalid argument index '{}'", index))?
                };
                let value = args.get(index).ok_or_else(|| {
                    format!(
                        "format string refers to argument {} but only {} were given",
                        index,
                        args.len()
                    )
                })?;
                out.push_str(&format_value(value, &parse_spec(spec)?, provider)?);
            }
            '}' => return Err(format!("unmatched '}}' in format string '{}'", fmt)),
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_args(args: &[Value], provider: &dyn ByteProvider) -> Result<String, String> {
    match &args[0] {
        Value::String(fmt) => format_string(fmt, &args[1..], provider),
        other => Ok(other.to_display_string()),
    }
}

pub fn register(registry: &mut FunctionRegistry) {
    // std::print(fmt, args...) - info entry in the console
    registry.register("std::print", ParameterCount::AtLeast(1), |ctx, args| {
        let message = format_args(args, ctx.provider)?;
        ctx.console.info(message);
        Ok(None)
    });

    registry.register("std::format", ParameterCount::AtLeast(1), |ctx, args| {
        Ok(Some(Value::String(format_args(args, ctx.provider)?)))
    });

    registry.register("std::warning", ParameterCount::AtLeast(1), |ctx, args| {
        let message = format_args(args, ctx.provider)?;
        ctx.console.warning(message);
        Ok(None)
    });

    // std::error(msg) - error entry in the console, then abort
    registry.register("std::error", ParameterCount::AtLeast(1), |ctx, args| {
        let message = format_args(args, ctx.provider)?;
        ctx.console.error(message.clone());
        Err(message)
    });
}
