// Semantic validation pass
//
// Runs between parsing and evaluation and rejects programs the grammar accepts
// but the evaluator cannot give a meaning to. Stops at the first violation.

use rustc_hash::FxHashSet;

use crate::error::ValidationError;
use crate::name::{Name, StringInterner};
use crate::parser::ast::*;
use crate::span::Span;

/// Where a statement sits, which decides what it may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Global,
    Namespace,
    /// Struct or union body
    Member,
    Bitfield,
    Function,
}

impl Context {
    fn is_global(self) -> bool {
        matches!(self, Context::Global | Context::Namespace)
    }
}

/// What an attribute is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrTarget {
    Variable,
    Member,
    BitfieldField,
    Type,
}

const VARIABLE_ATTRS: &[&str] = &["color", "name", "comment", "hidden", "inline"];
const MEMBER_ATTRS: &[&str] = &["color", "name", "comment", "hidden", "inline", "no_unique_address"];
const BITFIELD_FIELD_ATTRS: &[&str] = &["color", "name", "comment", "hidden"];
const TYPE_ATTRS: &[&str] = &["color", "comment", "hidden", "inline", "export"];
const VALUE_ATTRS: &[&str] = &["color", "name", "comment"];

/// Bit width assumed for a bitfield without a declared container
const MAX_BITFIELD_BITS: i128 = 128;

/// Validate a parsed program.
pub fn validate(ast: &Ast, interner: &StringInterner) -> Result<(), ValidationError> {
    let mut validator = Validator {
        interner,
        loop_depth: 0,
        in_function: false,
    };
    validator.validate_block(&ast.stmts, Context::Global)?;
    tracing::debug!(stmts = ast.stmts.len(), "validation passed");
    Ok(())
}

struct Validator<'a> {
    interner: &'a StringInterner,
    loop_depth: u32,
    in_function: bool,
}

impl<'a> Validator<'a> {
    fn name(&self, name: Name) -> &str {
        self.interner.resolve(name)
    }

    fn validate_block(&mut self, stmts: &[Stmt], ctx: Context) -> Result<(), ValidationError> {
        // Type names defined directly in this block. Forward declarations
        // (`using A;`) never conflict.
        let mut types: FxHashSet<Name> = FxHashSet::default();

        for stmt in stmts {
            let is_forward = matches!(&stmt.kind, StmtKind::TypeAlias(t) if t.ty.is_none());
            if let Some(name) = type_def_name(stmt).filter(|_| !is_forward) {
                if !types.insert(name) {
                    return Err(ValidationError::new(
                        format!("redefinition of type '{}'", self.name(name)),
                        stmt.span,
                    ));
                }
            }
            self.validate_stmt(stmt, ctx)?;
        }
        Ok(())
    }

    fn validate_stmt(&mut self, stmt: &Stmt, ctx: Context) -> Result<(), ValidationError> {
        match &stmt.kind {
            StmtKind::VarDecl(decl) => self.validate_var_decl(decl, stmt.span, ctx),
            StmtKind::StructDef(def) => {
                self.check_type_def_allowed(ctx, stmt.span)?;
                self.check_attrs(&def.attrs, AttrTarget::Type, ctx)?;
                self.check_unique_members(&def.body, "struct", def.name)?;
                self.validate_type_body(&def.body, Context::Member)
            }
            StmtKind::UnionDef(def) => {
                self.check_type_def_allowed(ctx, stmt.span)?;
                self.check_attrs(&def.attrs, AttrTarget::Type, ctx)?;
                self.check_unique_members(&def.body, "union", def.name)?;
                self.validate_type_body(&def.body, Context::Member)
            }
            StmtKind::BitfieldDef(def) => {
                self.check_type_def_allowed(ctx, stmt.span)?;
                self.check_attrs(&def.attrs, AttrTarget::Type, ctx)?;
                self.check_unique_members(&def.body, "bitfield", def.name)?;
                self.validate_bitfield(def, stmt.span)?;
                self.validate_type_body(&def.body, Context::Bitfield)
            }
            StmtKind::EnumDef(def) => {
                self.check_type_def_allowed(ctx, stmt.span)?;
                self.check_attrs(&def.attrs, AttrTarget::Type, ctx)?;
                self.validate_enum(def)
            }
            StmtKind::TypeAlias(alias) => {
                self.check_type_def_allowed(ctx, stmt.span)?;
                self.check_attrs(&alias.attrs, AttrTarget::Type, ctx)
            }
            StmtKind::BitfieldField(field) => {
                if ctx != Context::Bitfield {
                    return Err(ValidationError::new(
                        "bitfield fields are only allowed inside bitfields",
                        stmt.span,
                    ));
                }
                self.check_attrs(&field.attrs, AttrTarget::BitfieldField, ctx)
            }
            StmtKind::FnDef(def) => self.validate_fn(def, stmt.span, ctx),
            StmtKind::Namespace(ns) => {
                if !ctx.is_global() {
                    return Err(ValidationError::new(
                        "namespaces are only allowed at global scope",
                        stmt.span,
                    ));
                }
                self.validate_block(&ns.body, Context::Namespace)
            }
            StmtKind::If(data) => {
                self.validate_block(&data.then_body, ctx)?;
                self.validate_block(&data.else_body, ctx)
            }
            StmtKind::While(data) => self.validate_loop_body(&data.body, ctx),
            StmtKind::For(data) => {
                for init in &data.init {
                    self.validate_stmt(init, ctx)?;
                }
                self.validate_loop_body(&data.body, ctx)
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    let keyword = if matches!(stmt.kind, StmtKind::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    return Err(ValidationError::new(
                        format!("'{}' outside of a loop", keyword),
                        stmt.span,
                    ));
                }
                Ok(())
            }
            StmtKind::Return(_) => {
                if !self.in_function {
                    return Err(ValidationError::new(
                        "'return' outside of a function",
                        stmt.span,
                    ));
                }
                Ok(())
            }
            StmtKind::Expr(_) => Ok(()),
        }
    }

    fn validate_loop_body(&mut self, body: &[Stmt], ctx: Context) -> Result<(), ValidationError> {
        self.loop_depth += 1;
        let result = self.validate_block(body, ctx);
        self.loop_depth -= 1;
        result
    }

    /// Struct, union and bitfield bodies: loops outside do not reach in
    fn validate_type_body(&mut self, body: &[Stmt], ctx: Context) -> Result<(), ValidationError> {
        let saved = std::mem::replace(&mut self.loop_depth, 0);
        let result = self.validate_block(body, ctx);
        self.loop_depth = saved;
        result
    }

    fn check_type_def_allowed(&self, ctx: Context, span: Span) -> Result<(), ValidationError> {
        if ctx.is_global() {
            Ok(())
        } else {
            Err(ValidationError::new(
                "types can only be defined at global scope",
                span,
            ))
        }
    }

    fn validate_var_decl(&mut self, decl: &VarDeclData, span: Span, ctx: Context) -> Result<(), ValidationError> {
        if decl.direction.is_some() && !ctx.is_global() {
            return Err(ValidationError::new(
                "in/out variables are only allowed at global scope",
                span,
            ));
        }
        if decl.direction.is_some() && (decl.placement.is_some() || decl.init.is_some()) {
            return Err(ValidationError::new(
                "in/out variables cannot be placed or initialized",
                span,
            ));
        }
        if ctx == Context::Function && decl.placement.is_none() && !decl.attrs.is_empty() {
            return Err(ValidationError::new(
                "attributes are not allowed on function variables",
                span,
            ));
        }
        let target = if matches!(ctx, Context::Member | Context::Bitfield) {
            AttrTarget::Member
        } else {
            AttrTarget::Variable
        };
        self.check_attrs(&decl.attrs, target, ctx)
    }

    fn validate_fn(&mut self, def: &FnDefData, span: Span, ctx: Context) -> Result<(), ValidationError> {
        if !ctx.is_global() {
            return Err(ValidationError::new(
                "functions can only be defined at global scope",
                span,
            ));
        }

        let mut seen = FxHashSet::default();
        for name in def.params.iter().map(|p| p.name).chain(def.pack) {
            if !seen.insert(name) {
                return Err(ValidationError::new(
                    format!(
                        "duplicate parameter '{}' in function '{}'",
                        self.name(name),
                        self.name(def.name)
                    ),
                    span,
                ));
            }
        }

        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        let saved_fn = std::mem::replace(&mut self.in_function, true);
        let result = self.validate_block(&def.body, Context::Function);
        self.loop_depth = saved_loops;
        self.in_function = saved_fn;
        result
    }

    // ========== Members ==========

    /// Names declared directly in a type body must be unique. Declarations in
    /// different branches of an `if` may share a name.
    fn check_unique_members(&self, body: &[Stmt], kind: &str, type_name: Name) -> Result<(), ValidationError> {
        let mut seen = FxHashSet::default();
        for stmt in body {
            let name = match &stmt.kind {
                StmtKind::VarDecl(decl) => decl.name,
                StmtKind::BitfieldField(field) => field.name,
                _ => None,
            };
            if let Some(name) = name {
                if !seen.insert(name) {
                    return Err(ValidationError::new(
                        format!(
                            "duplicate member '{}' in {} '{}'",
                            self.name(name),
                            kind,
                            self.name(type_name)
                        ),
                        stmt.span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_enum(&self, def: &EnumDefData) -> Result<(), ValidationError> {
        let underlying = match &def.underlying.kind {
            TypeExprKind::Builtin(b) => Some(*b),
            TypeExprKind::Endian(_, inner) => match inner.kind {
                TypeExprKind::Builtin(b) => Some(b),
                _ => None,
            },
            _ => None,
        };
        if let Some(b) = underlying {
            if !(b.is_integer() || matches!(b, BuiltinType::Char | BuiltinType::Char16)) {
                return Err(ValidationError::new(
                    format!(
                        "enum '{}' has non-integer underlying type '{}'",
                        self.name(def.name),
                        b.name()
                    ),
                    def.underlying.span,
                ));
            }
        }

        let mut seen = FxHashSet::default();
        let mut next: Option<i128> = Some(0);
        for member in &def.members {
            if !seen.insert(member.name) {
                return Err(ValidationError::new(
                    format!(
                        "duplicate entry '{}' in enum '{}'",
                        self.name(member.name),
                        self.name(def.name)
                    ),
                    member.span,
                ));
            }

            let value = match &member.value {
                Some(expr) => const_fold(expr),
                None => next,
            };
            if let (Some(v), Some(b)) = (value, underlying) {
                if !fits(v, b) {
                    return Err(ValidationError::new(
                        format!(
                            "value {} of enum entry '{}' does not fit in '{}'",
                            v,
                            self.name(member.name),
                            b.name()
                        ),
                        member.span,
                    ));
                }
            }
            next = value.and_then(|v| v.checked_add(1));
        }
        Ok(())
    }

    fn validate_bitfield(&self, def: &BitfieldDefData, span: Span) -> Result<(), ValidationError> {
        let container_bits = match &def.container {
            None => MAX_BITFIELD_BITS,
            Some(container) => match container_builtin(&container.kind) {
                Some(b) if b.is_integer() => b_bits(b),
                _ => {
                    return Err(ValidationError::new(
                        format!(
                            "bitfield '{}' must use an integer container type",
                            self.name(def.name)
                        ),
                        container.span,
                    ));
                }
            },
        };

        let total = self.bitfield_width(&def.body)?;
        if total > container_bits {
            return Err(ValidationError::new(
                format!(
                    "bitfield '{}' is {} bits wide but its container holds {} bits",
                    self.name(def.name),
                    total,
                    container_bits
                ),
                span,
            ));
        }
        Ok(())
    }

    /// Sum of constant field widths; for `if`/`else` the wider branch counts.
    fn bitfield_width(&self, body: &[Stmt]) -> Result<i128, ValidationError> {
        let mut total: i128 = 0;
        for stmt in body {
            match &stmt.kind {
                StmtKind::BitfieldField(field) => {
                    if let Some(width) = const_fold(&field.width) {
                        if width <= 0 {
                            let name = field.name.map_or("padding", |n| self.name(n));
                            return Err(ValidationError::new(
                                format!("bitfield field '{}' must have a positive width", name),
                                stmt.span,
                            ));
                        }
                        total = total.saturating_add(width);
                    }
                }
                StmtKind::If(data) => {
                    let then_width = self.bitfield_width(&data.then_body)?;
                    let else_width = self.bitfield_width(&data.else_body)?;
                    total = total.saturating_add(then_width.max(else_width));
                }
                _ => {}
            }
        }
        Ok(total)
    }

    // ========== Attributes ==========

    fn check_attrs(&self, attrs: &[Attribute], target: AttrTarget, ctx: Context) -> Result<(), ValidationError> {
        let allowed = match target {
            AttrTarget::Variable => VARIABLE_ATTRS,
            AttrTarget::Member => MEMBER_ATTRS,
            AttrTarget::BitfieldField => BITFIELD_FIELD_ATTRS,
            AttrTarget::Type => TYPE_ATTRS,
        };

        for attr in attrs {
            let name = self.name(attr.name);
            let known = VARIABLE_ATTRS
                .iter()
                .chain(MEMBER_ATTRS)
                .chain(TYPE_ATTRS)
                .any(|a| *a == name);
            if !known {
                return Err(ValidationError::new(
                    format!("unknown attribute '{}'", name),
                    attr.span,
                ));
            }
            if !allowed.contains(&name) {
                let message = match name {
                    "export" => "attribute 'export' is only allowed on top-level types".to_string(),
                    "no_unique_address" => {
                        "attribute 'no_unique_address' is only allowed on struct members".to_string()
                    }
                    _ => format!("attribute '{}' is not allowed here", name),
                };
                return Err(ValidationError::new(message, attr.span));
            }
            if name == "export" && ctx != Context::Global {
                return Err(ValidationError::new(
                    "attribute 'export' is only allowed on top-level types",
                    attr.span,
                ));
            }

            let takes_value = VALUE_ATTRS.contains(&name);
            match (&attr.value, takes_value) {
                (None, true) => {
                    return Err(ValidationError::new(
                        format!("attribute '{}' requires an argument", name),
                        attr.span,
                    ));
                }
                (Some(_), false) => {
                    return Err(ValidationError::new(
                        format!("attribute '{}' takes no arguments", name),
                        attr.span,
                    ));
                }
                (Some(value), true) if name == "color" && parse_color(value).is_none() => {
                    return Err(ValidationError::new(
                        format!("invalid color '{}'", value),
                        attr.span,
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn type_def_name(stmt: &Stmt) -> Option<Name> {
    match &stmt.kind {
        StmtKind::StructDef(d) => Some(d.name),
        StmtKind::UnionDef(d) => Some(d.name),
        StmtKind::EnumDef(d) => Some(d.name),
        StmtKind::BitfieldDef(d) => Some(d.name),
        StmtKind::TypeAlias(d) => Some(d.name),
        _ => None,
    }
}

fn container_builtin(kind: &TypeExprKind) -> Option<BuiltinType> {
    match kind {
        TypeExprKind::Builtin(b) => Some(*b),
        TypeExprKind::Endian(_, inner) => container_builtin(&inner.kind),
        _ => None,
    }
}

fn b_bits(b: BuiltinType) -> i128 {
    b.size().map_or(MAX_BITFIELD_BITS, |s| s as i128 * 8)
}

fn fits(value: i128, ty: BuiltinType) -> bool {
    let Some(size) = ty.size() else {
        return true;
    };
    let bits = size as u32 * 8;
    if ty.is_signed() {
        if bits >= 128 {
            return true;
        }
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << (bits - 1)) - 1;
        (min..=max).contains(&value)
    } else {
        if value < 0 {
            return false;
        }
        bits >= 128 || value < (1i128 << bits)
    }
}

/// Parse `RRGGBB`, `#RRGGBB` or `RRGGBBAA` into packed RGBA.
pub fn parse_color(value: &str) -> Option<u32> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => u32::from_str_radix(hex, 16).ok().map(|rgb| (rgb << 8) | 0xFF),
        8 => u32::from_str_radix(hex, 16).ok(),
        _ => None,
    }
}

/// Fold literal-only integer expressions; anything else yields None.
pub fn const_fold(expr: &Expr) -> Option<i128> {
    match &expr.kind {
        ExprKind::IntLiteral(v) => i128::try_from(*v).ok(),
        ExprKind::CharLiteral(c) => Some(*c as i128),
        ExprKind::BoolLiteral(b) => Some(*b as i128),
        ExprKind::Unary { op, expr } => {
            let v = const_fold(expr)?;
            match op {
                UnaryOp::Neg => v.checked_neg(),
                UnaryOp::Plus => Some(v),
                UnaryOp::BitNot => Some(!v),
                UnaryOp::Not => Some((v == 0) as i128),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = const_fold(lhs)?;
            let r = const_fold(rhs)?;
            match op {
                BinOp::Add => l.checked_add(r),
                BinOp::Sub => l.checked_sub(r),
                BinOp::Mul => l.checked_mul(r),
                BinOp::Div => l.checked_div(r),
                BinOp::Mod => l.checked_rem(r),
                BinOp::BitAnd => Some(l & r),
                BinOp::BitOr => Some(l | r),
                BinOp::BitXor => Some(l ^ r),
                BinOp::Shl => u32::try_from(r).ok().and_then(|r| l.checked_shl(r)),
                BinOp::Shr => u32::try_from(r).ok().and_then(|r| l.checked_shr(r)),
                _ => None,
            }
        }
        _ => None,
    }
}
