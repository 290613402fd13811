// Expression evaluation methods for the evaluator
use super::function::FunctionContext;
use super::pattern::{mask, sign_extend, PatternKind};
use super::scope::{Binding, CompositeKind, Frame, FrameKind};
use super::*;

/// Integer operand after promotion
#[derive(Debug, Clone, Copy)]
enum Int {
    U(u128),
    S(i128),
}

/// One `.member` or `[index]` step of a place expression
enum Step {
    Member(Name),
    Index(u128),
}

/// Where a place expression starts
enum Root {
    Name(Name),
    Frame(usize),
    Value(Value),
}

/// Intermediate result while walking a place expression
enum Place<'s> {
    Borrowed(&'s Pattern),
    Owned(Pattern),
    Value(Value),
    /// A composite still under construction (`this`, `parent`)
    Frame(usize),
}

impl Place<'_> {
    fn into_owned<'x>(self) -> Place<'x> {
        match self {
            Place::Borrowed(p) => Place::Owned(p.clone()),
            Place::Owned(p) => Place::Owned(p),
            Place::Value(v) => Place::Value(v),
            Place::Frame(i) => Place::Frame(i),
        }
    }
}

fn scalarize(value: Value) -> Value {
    match value {
        Value::Pattern(p) => Value::from_pattern(*p),
        other => other,
    }
}

fn shift_amount(amount: i128) -> Result<u32, EvalError> {
    if !(0..128).contains(&amount) {
        return Err(EvalError::new(format!("invalid shift amount {}", amount)));
    }
    Ok(amount as u32)
}

fn int_operand(value: &Value) -> Result<Int, EvalError> {
    match value {
        Value::Signed(v) => Ok(Int::S(*v)),
        other => Ok(Int::U(other.to_unsigned()?)),
    }
}

/// Raw two's complement bits of an integer-like value
fn int_bits(value: &Value) -> Result<u128, EvalError> {
    match value {
        Value::Float(f) => Ok((*f as i128) as u128),
        other => other.to_unsigned(),
    }
}

fn swap_bytes(value: u128, size: u64) -> u128 {
    let bytes = value.to_le_bytes();
    let mut out = [0u8; 16];
    let size = size as usize;
    for i in 0..size {
        out[i] = bytes[size - 1 - i];
    }
    u128::from_le_bytes(out)
}

macro_rules! int_binary_op {
    ($op:expr, $l:expr, $r:expr, $variant:ident) => {
        match $op {
            BinOp::Add => Ok(Value::$variant($l.wrapping_add($r))),
            BinOp::Sub => Ok(Value::$variant($l.wrapping_sub($r))),
            BinOp::Mul => Ok(Value::$variant($l.wrapping_mul($r))),
            BinOp::Div if $r == 0 => Err(EvalError::new("division by zero")),
            BinOp::Div => Ok(Value::$variant($l.wrapping_div($r))),
            BinOp::Mod if $r == 0 => Err(EvalError::new("modulo by zero")),
            BinOp::Mod => Ok(Value::$variant($l.wrapping_rem($r))),
            BinOp::BitAnd => Ok(Value::$variant($l & $r)),
            BinOp::BitOr => Ok(Value::$variant($l | $r)),
            BinOp::BitXor => Ok(Value::$variant($l ^ $r)),
            BinOp::Shl => Ok(Value::$variant($l.wrapping_shl(shift_amount($r as i128)?))),
            BinOp::Shr => Ok(Value::$variant($l.wrapping_shr(shift_amount($r as i128)?))),
            BinOp::Eq => Ok(Value::Bool($l == $r)),
            BinOp::Ne => Ok(Value::Bool($l != $r)),
            BinOp::Lt => Ok(Value::Bool($l < $r)),
            BinOp::Gt => Ok(Value::Bool($l > $r)),
            BinOp::Le => Ok(Value::Bool($l <= $r)),
            BinOp::Ge => Ok(Value::Bool($l >= $r)),
            BinOp::LogAnd => Ok(Value::Bool($l != 0 && $r != 0)),
            BinOp::LogOr => Ok(Value::Bool($l != 0 || $r != 0)),
            BinOp::LogXor => Ok(Value::Bool(($l != 0) != ($r != 0))),
        }
    };
}

impl<'a> Evaluator<'a> {
    pub(crate) fn eval_expr(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval_expr_kind(expr)
            .map_err(|e| e.with_span_if_none(expr.span))
    }

    fn eval_expr_kind(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match &expr.kind {
            ExprKind::IntLiteral(v) => Ok(Value::Unsigned(*v)),
            ExprKind::FloatLiteral(v) => Ok(Value::Float(*v)),
            ExprKind::StringLiteral(s) => Ok(Value::String(s.clone())),
            ExprKind::CharLiteral(c) => Ok(Value::Char(*c)),
            ExprKind::BoolLiteral(b) => Ok(Value::Bool(*b)),
            ExprKind::Dollar => Ok(Value::Unsigned(u128::from(self.cursor))),
            ExprKind::Scoped(path) => self.eval_scoped(path),
            ExprKind::Ident(_)
            | ExprKind::This
            | ExprKind::Parent
            | ExprKind::Member { .. }
            | ExprKind::Index { .. } => Ok(scalarize(self.eval_place(expr)?)),
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            ExprKind::Unary { op, expr: inner } => {
                let value = self.eval_expr(inner)?;
                self.unary_op(*op, value)
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.eval_expr(cond)?.to_bool()? {
                    self.eval_expr(then_expr)
                } else {
                    self.eval_expr(else_expr)
                }
            }
            ExprKind::Cast { ty, expr: inner } => {
                let value = self.eval_expr(inner)?;
                self.cast(value, ty)
            }
            ExprKind::Sizeof(arg) => {
                let size = match &**arg {
                    SizeofArg::Type(ty) => self.type_size(ty)?,
                    SizeofArg::Expr(e) => self.expr_size(e)?,
                };
                Ok(Value::Unsigned(u128::from(size)))
            }
            ExprKind::Addressof(inner) => match self.eval_place(inner)? {
                Value::Pattern(p) => Ok(Value::Unsigned(u128::from(p.offset))),
                other => Err(EvalError::new(format!(
                    "addressof needs a pattern, got {}",
                    other.kind_name()
                ))),
            },
            ExprKind::Call { func, args } => self.eval_call(func, args, expr.span),
            ExprKind::Assign { op, lhs, rhs } => self.eval_assign(*op, lhs, rhs),
        }
    }

    // ---- places ----

    /// Evaluate a name, member or index chain without scalarizing the result
    fn eval_place(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        let mut steps = Vec::new();
        let mut root = expr;
        loop {
            match &root.kind {
                ExprKind::Member { expr, member } => {
                    steps.push(Step::Member(*member));
                    root = expr;
                }
                ExprKind::Index { expr, index } => {
                    let i = self.eval_expr(index)?.to_unsigned()?;
                    steps.push(Step::Index(i));
                    root = expr;
                }
                _ => break,
            }
        }
        steps.reverse();

        let start = match &root.kind {
            ExprKind::Ident(name) => Root::Name(*name),
            ExprKind::This => Root::Frame(
                self.scope
                    .composite_index(0)
                    .ok_or_else(|| EvalError::new("'this' used outside of a type body"))?,
            ),
            ExprKind::Parent => Root::Frame(
                self.scope
                    .composite_index(1)
                    .ok_or_else(|| EvalError::new("'parent' used without an enclosing type"))?,
            ),
            _ => Root::Value(self.eval_expr(root)?),
        };
        self.walk(start, &steps)
    }

    fn walk(&self, root: Root, steps: &[Step]) -> Result<Value, EvalError> {
        let mut place = match root {
            Root::Name(name) => {
                let name_str = self.interner.resolve(name);
                match self.scope.lookup(name, name_str) {
                    Some(Binding::Var(var)) => match &var.value {
                        Value::Pattern(p) => Place::Borrowed(p.as_ref()),
                        other => Place::Value(other.clone()),
                    },
                    Some(Binding::Pattern(p)) => Place::Borrowed(p),
                    None => {
                        return Err(EvalError::new(format!(
                            "unknown identifier '{}'",
                            name_str
                        )))
                    }
                }
            }
            Root::Frame(index) => Place::Frame(index),
            Root::Value(Value::Pattern(p)) => Place::Owned(*p),
            Root::Value(v) => Place::Value(v),
        };
        for step in steps {
            place = self.step(place, step)?;
        }
        Ok(match place {
            Place::Borrowed(p) => Value::Pattern(Box::new(p.clone())),
            Place::Owned(p) => Value::Pattern(Box::new(p)),
            Place::Value(v) => v,
            Place::Frame(index) => Value::Pattern(Box::new(self.frame_snapshot(index))),
        })
    }

    fn step<'s>(&'s self, place: Place<'s>, step: &Step) -> Result<Place<'s>, EvalError> {
        match (place, step) {
            (Place::Frame(index), Step::Member(member)) => {
                let member_str = self.interner.resolve(*member);
                let frame = self.scope.frame(index);
                if let Some(p) = frame.members.iter().rev().find(|p| p.name == member_str) {
                    return Ok(Place::Borrowed(p));
                }
                if let Some(var) = frame.vars.get(member) {
                    return Ok(match &var.value {
                        Value::Pattern(p) => Place::Borrowed(p.as_ref()),
                        other => Place::Value(other.clone()),
                    });
                }
                if member_str == "parent" {
                    return self
                        .scope
                        .enclosing_composite(index)
                        .map(Place::Frame)
                        .ok_or_else(|| EvalError::new("'parent' used without an enclosing type"));
                }
                Err(self.no_member(&self.frame_type_name(index), member_str))
            }
            (Place::Frame(index), Step::Index(_)) => Err(EvalError::new(format!(
                "'{}' cannot be indexed",
                self.frame_type_name(index)
            ))),
            (Place::Borrowed(p), Step::Member(member)) => {
                let member_str = self.interner.resolve(*member);
                p.member(member_str)
                    .map(Place::Borrowed)
                    .ok_or_else(|| self.no_member(&p.type_name, member_str))
            }
            (Place::Owned(p), Step::Member(member)) => {
                let member_str = self.interner.resolve(*member);
                p.member(member_str)
                    .cloned()
                    .map(Place::Owned)
                    .ok_or_else(|| self.no_member(&p.type_name, member_str))
            }
            (Place::Borrowed(p), Step::Index(i)) => self.index_pattern(p, *i),
            (Place::Owned(p), Step::Index(i)) => Ok(self.index_pattern(&p, *i)?.into_owned()),
            (Place::Value(Value::String(s)), Step::Index(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Place::Value(Value::Char(c)))
                .ok_or_else(|| {
                    EvalError::new(format!(
                        "index {} is out of bounds for a string of length {}",
                        i,
                        s.chars().count()
                    ))
                }),
            (Place::Value(v), _) => Err(EvalError::new(format!(
                "cannot access members or entries of {}",
                v.kind_name()
            ))),
        }
    }

    fn no_member(&self, type_name: &str, member: &str) -> EvalError {
        EvalError::new(format!("'{}' has no member named '{}'", type_name, member))
    }

    fn index_pattern<'p>(&self, pattern: &'p Pattern, index: u128) -> Result<Place<'p>, EvalError> {
        let out_of_bounds = || {
            EvalError::new(format!(
                "index {} is out of bounds for '{}' with {} entries",
                index,
                pattern.name,
                pattern.entry_count()
            ))
        };
        let i = u64::try_from(index).map_err(|_| out_of_bounds())?;
        match &pattern.kind {
            PatternKind::ArrayDynamic { entries } => usize::try_from(i)
                .ok()
                .and_then(|i| entries.get(i))
                .map(Place::Borrowed)
                .ok_or_else(out_of_bounds),
            PatternKind::ArrayStatic { .. } => pattern
                .entry(i, self.provider)
                .map(Place::Owned)
                .ok_or_else(out_of_bounds),
            PatternKind::String(s) | PatternKind::WideString(s) => usize::try_from(i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Place::Value(Value::Char(c)))
                .ok_or_else(out_of_bounds),
            PatternKind::Pointer { pointee, .. } => self.index_pattern(pointee, index),
            _ => Err(EvalError::new(format!(
                "'{}' of type '{}' cannot be indexed",
                pattern.name, pattern.type_name
            ))),
        }
    }

    fn frame_type_name(&self, index: usize) -> String {
        self.scope
            .frame(index)
            .composite
            .as_ref()
            .map(|c| c.type_name.clone())
            .unwrap_or_default()
    }

    /// The composite under construction at `index`, as it stands right now
    fn frame_snapshot(&self, index: usize) -> Pattern {
        let frame = self.scope.frame(index);
        let Some(composite) = frame.composite.as_ref() else {
            return Pattern::new("this", "", self.cursor, 0, PatternKind::Struct { members: Vec::new() });
        };
        let members = frame.members.clone();
        let (size, kind) = match composite.kind {
            CompositeKind::Struct => (
                self.cursor.saturating_sub(composite.start),
                PatternKind::Struct { members },
            ),
            CompositeKind::Union => (
                composite.union_end.saturating_sub(composite.start),
                PatternKind::Union { members },
            ),
            CompositeKind::Bitfield => (
                composite.bits.as_ref().map_or(0, |b| u64::from(b.bit.div_ceil(8))),
                PatternKind::Bitfield { fields: members },
            ),
        };
        Pattern::new("this", composite.type_name.as_str(), composite.start, size, kind)
            .with_endian(self.endian)
    }

    fn eval_scoped(&mut self, path: &[Name]) -> Result<Value, EvalError> {
        let unknown = |ev: &Self| {
            EvalError::new(format!(
                "unknown identifier '{}'",
                ev.interner.resolve_path(path)
            ))
        };
        let Some((entry_name, type_path)) = path.split_last() else {
            return Err(unknown(self));
        };
        let entry = match self.resolve_type(type_path) {
            Some(entry) => entry,
            None => return Err(unknown(self)),
        };
        let TypeDef::Enum(def) = entry.def else {
            return Err(EvalError::new(format!("'{}' is not an enum", entry.display)));
        };
        let (entries, bt) = self.enum_entries(&entry, def)?;
        let entry_str = self.interner.resolve(*entry_name);
        let found = entries.iter().find(|e| e.name == entry_str).ok_or_else(|| {
            EvalError::new(format!(
                "enum '{}' has no entry named '{}'",
                entry.display, entry_str
            ))
        })?;
        Ok(if bt.is_signed() {
            Value::Signed(sign_extend(found.value, bt.size().unwrap_or_default()))
        } else {
            Value::Unsigned(found.value)
        })
    }

    // ---- operators ----

    fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<Value, EvalError> {
        match op {
            BinOp::LogAnd => {
                if !self.eval_expr(lhs)?.to_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_expr(rhs)?.to_bool()?))
            }
            BinOp::LogOr => {
                if self.eval_expr(lhs)?.to_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_expr(rhs)?.to_bool()?))
            }
            _ => {
                let l = self.eval_expr(lhs)?;
                let r = self.eval_expr(rhs)?;
                self.binary_op(op, l, r)
            }
        }
    }

    pub(crate) fn binary_op(&mut self, op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
        if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
            return string_op(op, left, right);
        }
        for operand in [&left, &right] {
            if matches!(operand, Value::Pattern(_) | Value::Null) {
                return Err(EvalError::new(format!(
                    "invalid operand {} for operator '{}'",
                    operand.kind_name(),
                    op.symbol()
                )));
            }
        }
        if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) {
            return float_op(op, left.to_float()?, right.to_float()?);
        }

        match (int_operand(&left)?, int_operand(&right)?) {
            (Int::U(l), Int::U(r)) => match op {
                // Unsigned subtraction that would underflow yields a negative result
                BinOp::Sub if l < r => match (i128::try_from(l), i128::try_from(r)) {
                    (Ok(l), Ok(r)) => Ok(Value::Signed(l - r)),
                    _ => Ok(Value::Unsigned(l.wrapping_sub(r))),
                },
                _ => int_binary_op!(op, l, r, Unsigned),
            },
            (Int::S(l), Int::S(r)) => int_binary_op!(op, l, r, Signed),
            (Int::S(l), Int::U(r)) => match i128::try_from(r) {
                Ok(r) => int_binary_op!(op, l, r, Signed),
                Err(_) => {
                    self.warn_mixed_sign(op, r);
                    let l = l as u128;
                    int_binary_op!(op, l, r, Unsigned)
                }
            },
            (Int::U(l), Int::S(r)) => match i128::try_from(l) {
                Ok(l) => int_binary_op!(op, l, r, Signed),
                Err(_) => {
                    self.warn_mixed_sign(op, l);
                    let r = r as u128;
                    int_binary_op!(op, l, r, Unsigned)
                }
            },
        }
    }

    fn warn_mixed_sign(&mut self, op: BinOp, unsigned: u128) {
        self.log_warning(format!(
            "mixed signed and unsigned operands in '{}': 0x{:X} does not fit a signed integer, using unsigned arithmetic",
            op.symbol(),
            unsigned
        ));
    }

    fn unary_op(&self, op: UnaryOp, value: Value) -> Result<Value, EvalError> {
        match (op, value) {
            (UnaryOp::Not, v) => Ok(Value::Bool(!v.to_bool()?)),
            (UnaryOp::Plus, v @ (Value::Unsigned(_) | Value::Signed(_) | Value::Float(_))) => Ok(v),
            (UnaryOp::Plus, v @ (Value::Bool(_) | Value::Char(_))) => Ok(Value::Unsigned(v.to_unsigned()?)),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Neg, Value::Signed(s)) => Ok(Value::Signed(s.wrapping_neg())),
            (UnaryOp::Neg, v @ (Value::Unsigned(_) | Value::Bool(_) | Value::Char(_))) => {
                Ok(Value::Signed((v.to_unsigned()? as i128).wrapping_neg()))
            }
            (UnaryOp::BitNot, Value::Unsigned(u)) => Ok(Value::Unsigned(!u)),
            (UnaryOp::BitNot, Value::Signed(s)) => Ok(Value::Signed(!s)),
            (UnaryOp::BitNot, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::BitNot, Value::Char(c)) => Ok(Value::Unsigned(!(c as u128) & 0xFF)),
            (op, v) => Err(EvalError::new(format!(
                "invalid operand {} for unary operator '{}'",
                v.kind_name(),
                match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                }
            ))),
        }
    }

    // ---- conversions ----

    /// Convert a value to a builtin type, wrapping integers to its width
    pub(crate) fn convert(&self, value: Value, bt: BuiltinType) -> Result<Value, EvalError> {
        if bt == BuiltinType::Str {
            return Ok(Value::String(match value {
                Value::String(s) => s,
                Value::Char(c) => c.to_string(),
                other => other.to_display_string(),
            }));
        }
        if matches!(value, Value::String(_) | Value::Pattern(_) | Value::Null) {
            return Err(EvalError::new(format!(
                "cannot convert {} to '{}'",
                value.kind_name(),
                bt.name()
            )));
        }
        let size = bt.size().unwrap_or(16);
        Ok(match bt {
            BuiltinType::Float => Value::Float(value.to_float()? as f32 as f64),
            BuiltinType::Double => Value::Float(value.to_float()?),
            BuiltinType::Bool => Value::Bool(value.to_bool()?),
            BuiltinType::Char => Value::Char((int_bits(&value)? & 0xFF) as u8 as char),
            BuiltinType::Char16 => Value::Char(
                char::from_u32((int_bits(&value)? & 0xFFFF) as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
            ),
            bt if bt.is_signed() => Value::Signed(sign_extend(int_bits(&value)? & mask(size), size)),
            _ => Value::Unsigned(int_bits(&value)? & mask(size)),
        })
    }

    /// `Type(value)`: convert, then byte-swap when the cast names a foreign endianness
    fn cast(&mut self, value: Value, ty: &TypeExpr) -> Result<Value, EvalError> {
        let (bt, endian) = self.resolve_builtin(ty).ok_or_else(|| {
            EvalError::new(format!("cannot cast to non-builtin type '{}'", self.type_display(ty)))
        })?;
        let converted = self.convert(value, bt)?;
        let size = bt.size().unwrap_or(1);
        match (endian, converted) {
            (Some(e), Value::Unsigned(v)) if e != Endianness::native() && size > 1 => {
                Ok(Value::Unsigned(swap_bytes(v, size)))
            }
            (Some(e), Value::Signed(v)) if e != Endianness::native() && size > 1 => Ok(Value::Signed(
                sign_extend(swap_bytes(v as u128 & mask(size), size), size),
            )),
            (_, converted) => Ok(converted),
        }
    }

    // ---- sizeof ----

    fn type_size(&mut self, ty: &TypeExpr) -> Result<u64, EvalError> {
        if let Some((bt, _)) = self.resolve_builtin(ty) {
            return bt
                .size()
                .ok_or_else(|| EvalError::new("'str' has no fixed size"));
        }
        self.materialize_size(|ev| ev.create_pattern(ty, ""))
    }

    fn expr_size(&mut self, expr: &Expr) -> Result<u64, EvalError> {
        // A bare name that is not bound to a value names a type
        let type_path = match &expr.kind {
            ExprKind::Ident(name) => {
                let name_str = self.interner.resolve(*name);
                if self.scope.lookup(*name, name_str).is_none() {
                    Some(vec![*name])
                } else {
                    None
                }
            }
            ExprKind::Scoped(path) => match path.split_last() {
                Some((_, enum_path))
                    if self
                        .resolve_type(enum_path)
                        .is_some_and(|e| matches!(e.def, TypeDef::Enum(_))) =>
                {
                    None
                }
                _ => Some(path.clone()),
            },
            _ => None,
        };
        if let Some(path) = type_path {
            if self.resolve_type(&path).is_some() {
                let ty = TypeExpr::new(TypeExprKind::Named(path), expr.span);
                return self.type_size(&ty);
            }
        }

        if let ExprKind::Ident(name) = &expr.kind {
            let name_str = self.interner.resolve(*name);
            if let Some(Binding::Var(var)) = self.scope.lookup(*name, name_str) {
                if let (Some(bt), false) = (var.ty, matches!(var.value, Value::Pattern(_))) {
                    if let Some(size) = bt.size() {
                        return Ok(size);
                    }
                }
            }
        }

        match self.eval_place(expr)? {
            Value::Pattern(p) => Ok(p.size),
            Value::String(s) => Ok(s.len() as u64),
            other => Err(EvalError::new(format!(
                "sizeof needs a pattern or a type, got {}",
                other.kind_name()
            ))),
        }
    }

    // ---- calls ----

    fn eval_call(&mut self, func: &[Name], args: &[Expr], span: Span) -> Result<Value, EvalError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            if let ExprKind::Ident(name) = &arg.kind {
                if let Some((pack, rest)) = self.scope.pack() {
                    if pack == name {
                        values.extend(rest.iter().cloned());
                        continue;
                    }
                }
            }
            values.push(self.eval_expr(arg)?);
        }

        if let Some(entry) = self.resolve_function(func) {
            return self.call_user_function(&entry, values, span);
        }

        let name = self.interner.resolve_path(func);
        let functions = self.functions;
        let function = functions
            .get(&name)
            .ok_or_else(|| EvalError::with_span(format!("unknown function '{}'", name), span))?;
        if !function.params.accepts(values.len()) {
            return Err(EvalError::with_span(
                format!(
                    "function '{}' expects {} parameters, got {}",
                    name,
                    function.params,
                    values.len()
                ),
                span,
            ));
        }
        tracing::trace!(function = %name, args = values.len(), "calling builtin");
        let mut ctx = FunctionContext {
            provider: self.provider,
            console: &mut self.console,
            offset: self.cursor,
            base_address: self.provider.base_address(),
            default_endian: self.endian,
        };
        match (function.body)(&mut ctx, &values) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Ok(Value::Null),
            Err(message) => Err(EvalError::with_span(message, span)),
        }
    }

    pub(crate) fn call_user_function(
        &mut self,
        entry: &FunctionEntry<'a>,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, EvalError> {
        let def = entry.def;
        let expected = def.params.len();
        let accepted = if def.pack.is_some() {
            args.len() >= expected
        } else {
            args.len() == expected
        };
        if !accepted {
            return Err(EvalError::with_span(
                format!(
                    "function '{}' expects {}{} parameters, got {}",
                    entry.display,
                    if def.pack.is_some() { "at least " } else { "" },
                    expected,
                    args.len()
                ),
                span,
            ));
        }
        self.nested(&entry.display, |ev| {
            ev.in_namespace(&entry.namespace, |ev| {
                let depth = ev.scope.depth();
                ev.scope.push(Frame::new(FrameKind::Function));
                let result = ev.run_function_body(def, args);
                ev.scope.truncate(depth);
                result
            })
        })
    }

    fn run_function_body(&mut self, def: &FnDefData, args: Vec<Value>) -> Result<Value, EvalError> {
        let mut args = args.into_iter();
        for param in &def.params {
            let value = args.next().unwrap_or(Value::Null);
            let builtin = self.resolve_builtin(&param.ty).map(|(bt, _)| bt);
            let value = match builtin {
                Some(bt) => self
                    .convert(value, bt)
                    .map_err(|e| e.with_span_if_none(param.span))?,
                None => value,
            };
            self.scope.define_var(param.name, value, builtin);
        }
        if let Some(pack) = def.pack {
            self.scope.set_pack(pack, args.collect());
        }
        for stmt in &def.body {
            match self.eval_stmt(stmt)? {
                ControlFlow::None => {}
                ControlFlow::Return(value) => return Ok(value.unwrap_or(Value::Null)),
                ControlFlow::Break | ControlFlow::Continue => break,
            }
        }
        Ok(Value::Null)
    }

    // ---- assignment ----

    fn eval_assign(&mut self, op: AssignOp, lhs: &Expr, rhs: &Expr) -> Result<Value, EvalError> {
        let rhs_value = self.eval_expr(rhs)?;
        let value = match op.binary_op() {
            Some(bop) => {
                let current = self.eval_expr(lhs)?;
                self.binary_op(bop, current, rhs_value)?
            }
            None => rhs_value,
        };
        match &lhs.kind {
            ExprKind::Dollar => {
                self.cursor = u64::try_from(value.to_unsigned()?)
                    .map_err(|_| EvalError::new("cursor moved out of the address range"))?;
            }
            ExprKind::Ident(name) => {
                let name_str = self.interner.resolve(*name).to_string();
                let Some(ty) = self.scope.lookup_var_mut(*name).map(|var| var.ty) else {
                    let message = if self.scope.is_pattern(*name, &name_str) {
                        format!("cannot assign to pattern '{}'", name_str)
                    } else {
                        format!("unknown identifier '{}'", name_str)
                    };
                    return Err(EvalError::new(message));
                };
                let value = match ty {
                    Some(bt) => self.convert(value, bt)?,
                    None => value,
                };
                if let Some(var) = self.scope.lookup_var_mut(*name) {
                    var.value = value.clone();
                }
                return Ok(value);
            }
            _ => return Err(EvalError::new("invalid assignment target")),
        }
        Ok(value)
    }
}

fn float_op(op: BinOp, l: f64, r: f64) -> Result<Value, EvalError> {
    Ok(match op {
        BinOp::Add => Value::Float(l + r),
        BinOp::Sub => Value::Float(l - r),
        BinOp::Mul => Value::Float(l * r),
        BinOp::Div if r == 0.0 => return Err(EvalError::new("division by zero")),
        BinOp::Div => Value::Float(l / r),
        BinOp::Mod if r == 0.0 => return Err(EvalError::new("modulo by zero")),
        BinOp::Mod => Value::Float(l % r),
        BinOp::Eq => Value::Bool(l == r),
        BinOp::Ne => Value::Bool(l != r),
        BinOp::Lt => Value::Bool(l < r),
        BinOp::Gt => Value::Bool(l > r),
        BinOp::Le => Value::Bool(l <= r),
        BinOp::Ge => Value::Bool(l >= r),
        BinOp::LogAnd => Value::Bool(l != 0.0 && r != 0.0),
        BinOp::LogOr => Value::Bool(l != 0.0 || r != 0.0),
        BinOp::LogXor => Value::Bool((l != 0.0) != (r != 0.0)),
        _ => {
            return Err(EvalError::new(format!(
                "invalid operator '{}' for floating point values",
                op.symbol()
            )))
        }
    })
}

/// Largest string a repetition may produce
const STRING_LIMIT: usize = 0x100_0000;

fn string_op(op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match (op, left, right) {
        (BinOp::Add, Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (BinOp::Add, Value::String(mut a), Value::Char(c)) => {
            a.push(c);
            Ok(Value::String(a))
        }
        (BinOp::Add, Value::Char(c), Value::String(b)) => Ok(Value::String(format!("{}{}", c, b))),
        (BinOp::Mul, Value::String(s), n) | (BinOp::Mul, n, Value::String(s)) => {
            let count = n.to_unsigned()?;
            let len = u128::try_from(s.len())
                .ok()
                .and_then(|l| l.checked_mul(count))
                .filter(|l| *l <= STRING_LIMIT as u128)
                .ok_or_else(|| {
                    EvalError::new(format!(
                        "repeating a string of {} bytes {} times exceeds the string limit of 0x{:X} bytes",
                        s.len(),
                        count,
                        STRING_LIMIT
                    ))
                })?;
            // `len` fits, so `count` fits a usize unless the string is empty
            Ok(Value::String(if len == 0 { String::new() } else { s.repeat(count as usize) }))
        }
        (BinOp::Eq, Value::String(a), Value::String(b)) => Ok(Value::Bool(a == b)),
        (BinOp::Ne, Value::String(a), Value::String(b)) => Ok(Value::Bool(a != b)),
        (BinOp::Lt, Value::String(a), Value::String(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Gt, Value::String(a), Value::String(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Le, Value::String(a), Value::String(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Ge, Value::String(a), Value::String(b)) => Ok(Value::Bool(a >= b)),
        (op, l, r) => Err(EvalError::new(format!(
            "invalid operator '{}' for {} and {}",
            op.symbol(),
            l.kind_name(),
            r.kind_name()
        ))),
    }
}
