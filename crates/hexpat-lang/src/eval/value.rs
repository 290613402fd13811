// Runtime value type for the pattern language evaluator

use std::fmt;

use crate::error::EvalError;

use super::pattern::{sign_extend, Pattern, PatternKind};

/// Runtime value during evaluation
#[derive(Debug, Clone)]
pub enum Value {
    Unsigned(u128),
    Signed(i128),
    Float(f64),
    Bool(bool),
    Char(char),
    String(String),
    Null,
    /// A composite pattern (struct, union, array, ...) used as a value
    Pattern(Box<Pattern>),
}

impl Value {
    /// Scalar view of a pattern, if it has one
    pub fn scalar_of(pattern: &Pattern) -> Option<Value> {
        let value = match &pattern.kind {
            PatternKind::Unsigned(v) => Value::Unsigned(*v),
            PatternKind::Signed(v) => Value::Signed(*v),
            PatternKind::Float(v) => Value::Float(*v),
            PatternKind::Boolean(b) => Value::Bool(*b),
            PatternKind::Character(c) | PatternKind::WideCharacter(c) => Value::Char(*c),
            PatternKind::String(s) | PatternKind::WideString(s) => Value::String(s.clone()),
            PatternKind::Enum { value, signed, .. } => {
                if *signed {
                    Value::Signed(sign_extend(*value, pattern.size))
                } else {
                    Value::Unsigned(*value)
                }
            }
            PatternKind::BitfieldField { value, .. } => Value::Unsigned(*value),
            PatternKind::Pointer { address, .. } => Value::Unsigned(*address),
            _ => return None,
        };
        Some(value)
    }

    /// Scalar view of a pattern, or the pattern itself for composites
    pub fn from_pattern(pattern: Pattern) -> Value {
        match Value::scalar_of(&pattern) {
            Some(v) => v,
            None => Value::Pattern(Box::new(pattern)),
        }
    }

    /// Convert to unsigned integer (two's complement for negative values)
    #[inline]
    pub fn to_unsigned(&self) -> Result<u128, EvalError> {
        match self {
            Value::Unsigned(v) => Ok(*v),
            Value::Signed(v) => Ok(*v as u128),
            Value::Float(v) => Ok(*v as u128),
            Value::Bool(v) => Ok(u128::from(*v)),
            Value::Char(v) => Ok(*v as u128),
            _ => Err(EvalError::new(format!(
                "cannot use {} as an integer",
                self.kind_name()
            ))),
        }
    }

    /// Convert to signed integer
    #[inline]
    pub fn to_signed(&self) -> Result<i128, EvalError> {
        match self {
            Value::Unsigned(v) => Ok(*v as i128),
            Value::Signed(v) => Ok(*v),
            Value::Float(v) => Ok(*v as i128),
            Value::Bool(v) => Ok(i128::from(*v)),
            Value::Char(v) => Ok(*v as i128),
            _ => Err(EvalError::new(format!(
                "cannot use {} as an integer",
                self.kind_name()
            ))),
        }
    }

    /// Convert to float
    pub fn to_float(&self) -> Result<f64, EvalError> {
        match self {
            Value::Unsigned(v) => Ok(*v as f64),
            Value::Signed(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Value::Char(v) => Ok(*v as u32 as f64),
            _ => Err(EvalError::new(format!(
                "cannot use {} as a floating point value",
                self.kind_name()
            ))),
        }
    }

    /// Convert to boolean
    #[inline]
    pub fn to_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Unsigned(v) => Ok(*v != 0),
            Value::Signed(v) => Ok(*v != 0),
            Value::Float(v) => Ok(*v != 0.0),
            Value::Bool(v) => Ok(*v),
            Value::Char(v) => Ok(*v != '\0'),
            Value::String(s) => Ok(!s.is_empty()),
            Value::Null => Ok(false),
            Value::Pattern(_) => Err(EvalError::new(format!(
                "cannot use {} as a condition",
                self.kind_name()
            ))),
        }
    }

    /// Convert to string representation
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Unsigned(v) => v.to_string(),
            Value::Signed(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Char(v) => v.to_string(),
            Value::String(v) => v.clone(),
            Value::Null => "null".to_string(),
            Value::Pattern(p) => format!("{} {}", p.type_name, p.name),
        }
    }

    /// Short description used in error messages
    pub fn kind_name(&self) -> String {
        match self {
            Value::Unsigned(_) => "unsigned integer".to_string(),
            Value::Signed(_) => "signed integer".to_string(),
            Value::Float(_) => "floating point value".to_string(),
            Value::Bool(_) => "boolean".to_string(),
            Value::Char(_) => "character".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Null => "void".to_string(),
            Value::Pattern(p) => format!("pattern '{}' of type '{}'", p.name, p.type_name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unsigned(a), Value::Unsigned(b)) => a == b,
            (Value::Signed(a), Value::Signed(b)) => a == b,
            (Value::Unsigned(a), Value::Signed(b)) | (Value::Signed(b), Value::Unsigned(a)) => {
                *b >= 0 && *a == *b as u128
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Pattern(a), Value::Pattern(b)) => a == b,
            _ => false,
        }
    }
}
