// Statement evaluation methods for the evaluator
use super::pattern::PatternKind;
use super::scope::{Composite, CompositeKind, Frame, FrameKind};
use super::*;

/// Value a declared but uninitialised variable starts with
fn default_value(bt: BuiltinType) -> Value {
    match bt {
        BuiltinType::Str => Value::String(String::new()),
        BuiltinType::Float | BuiltinType::Double => Value::Float(0.0),
        BuiltinType::Bool => Value::Bool(false),
        BuiltinType::Char | BuiltinType::Char16 => Value::Char('\0'),
        bt if bt.is_signed() => Value::Signed(0),
        _ => Value::Unsigned(0),
    }
}

fn is_padding(ty: &TypeExpr) -> bool {
    matches!(&ty.kind, TypeExprKind::Array(elem, _) if matches!(elem.kind, TypeExprKind::Padding))
}

impl<'a> Evaluator<'a> {
    /// Evaluate a statement
    pub(crate) fn eval_stmt(&mut self, stmt: &Stmt) -> Result<ControlFlow, EvalError> {
        self.stmt_count += 1;
        self.check_cancelled()?;
        self.eval_stmt_kind(stmt)
            .map_err(|e| e.with_span_if_none(stmt.span))
    }

    fn eval_stmt_kind(&mut self, stmt: &Stmt) -> Result<ControlFlow, EvalError> {
        match &stmt.kind {
            StmtKind::VarDecl(decl) => self.eval_var_decl(decl)?,
            StmtKind::BitfieldField(field) => self.eval_bitfield_field(field)?,
            StmtKind::If(d) => {
                let body = if self.eval_expr(&d.cond)?.to_bool()? {
                    &d.then_body
                } else {
                    &d.else_body
                };
                return self.eval_block(body);
            }
            StmtKind::While(d) => return self.eval_while(d),
            StmtKind::For(d) => {
                let depth = self.scope.depth();
                self.scope.push(Frame::new(FrameKind::Block));
                let result = self.eval_for(d);
                self.scope.truncate(depth);
                return result;
            }
            StmtKind::Break => return Ok(ControlFlow::Break),
            StmtKind::Continue => return Ok(ControlFlow::Continue),
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(e) => Some(self.eval_expr(e)?),
                    None => None,
                };
                return Ok(ControlFlow::Return(value));
            }
            StmtKind::Expr(expr) => {
                self.eval_expr(expr)?;
            }
            StmtKind::Namespace(ns) => {
                let mut inner = self.namespace.clone();
                inner.extend_from_slice(&ns.path);
                self.in_namespace(&inner, |ev| {
                    for stmt in &ns.body {
                        ev.eval_stmt(stmt)?;
                    }
                    Ok(())
                })?;
            }
            // Hoisted before execution
            StmtKind::StructDef(_)
            | StmtKind::UnionDef(_)
            | StmtKind::EnumDef(_)
            | StmtKind::BitfieldDef(_)
            | StmtKind::FnDef(_)
            | StmtKind::TypeAlias(_) => {}
        }
        Ok(ControlFlow::None)
    }

    /// Evaluate statements in a fresh block scope
    pub(crate) fn eval_block(&mut self, body: &[Stmt]) -> Result<ControlFlow, EvalError> {
        let depth = self.scope.depth();
        self.scope.push(Frame::new(FrameKind::Block));
        let mut result = Ok(ControlFlow::None);
        for stmt in body {
            match self.eval_stmt(stmt) {
                Ok(ControlFlow::None) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.scope.truncate(depth);
        result
    }

    fn count_iteration(&self, iterations: &mut u64) -> Result<(), EvalError> {
        self.check_cancelled()?;
        *iterations += 1;
        if *iterations > self.limits.loops {
            return Err(EvalError::new(format!(
                "loop iterations exceeded the loop limit of {}",
                self.limits.loops
            )));
        }
        Ok(())
    }

    fn eval_while(&mut self, d: &WhileData) -> Result<ControlFlow, EvalError> {
        let mut iterations = 0;
        while self.eval_expr(&d.cond)?.to_bool()? {
            self.count_iteration(&mut iterations)?;
            match self.eval_block(&d.body)? {
                ControlFlow::Break => break,
                ControlFlow::Return(v) => return Ok(ControlFlow::Return(v)),
                ControlFlow::None | ControlFlow::Continue => {}
            }
        }
        Ok(ControlFlow::None)
    }

    fn eval_for(&mut self, d: &ForData) -> Result<ControlFlow, EvalError> {
        for stmt in &d.init {
            self.eval_stmt(stmt)?;
        }
        let mut iterations = 0;
        while self.eval_expr(&d.cond)?.to_bool()? {
            self.count_iteration(&mut iterations)?;
            match self.eval_block(&d.body)? {
                ControlFlow::Break => break,
                ControlFlow::Return(v) => return Ok(ControlFlow::Return(v)),
                ControlFlow::None | ControlFlow::Continue => {}
            }
            self.eval_expr(&d.step)?;
        }
        Ok(ControlFlow::None)
    }

    fn in_bitfield(&self) -> bool {
        self.scope.context() == FrameKind::Composite
            && matches!(
                self.scope.current_composite(),
                Some(Composite {
                    kind: CompositeKind::Bitfield,
                    ..
                })
            )
    }

    fn eval_var_decl(&mut self, decl: &VarDeclData) -> Result<(), EvalError> {
        if is_padding(&decl.ty) && self.scope.context() != FrameKind::Composite {
            return Err(EvalError::new("padding is only allowed inside structs and unions"));
        }
        match decl.direction {
            Some(VarDirection::In) => return self.define_in_variable(decl),
            Some(VarDirection::Out) => return self.define_out_variable(decl),
            None => {}
        }

        if let Some(init) = &decl.init {
            let name = decl
                .name
                .ok_or_else(|| EvalError::new("initialised variables need a name"))?;
            let value = self.eval_expr(init)?;
            let builtin = self.resolve_builtin(&decl.ty).map(|(bt, _)| bt);
            let value = match builtin {
                Some(bt) => self.convert(value, bt)?,
                None => value,
            };
            self.scope.define_var(name, value, builtin);
            return Ok(());
        }

        match self.scope.context() {
            FrameKind::Function => self.declare_local(decl),
            FrameKind::Global | FrameKind::Block if decl.placement.is_none() => self.declare_local(decl),
            FrameKind::Composite if self.in_bitfield() => Err(EvalError::new(
                "only fields of the form 'name : bits' can be declared inside a bitfield",
            )),
            _ => self.place_member(decl),
        }
    }

    /// A variable (or function-local pattern) that does not become part of the output
    fn declare_local(&mut self, decl: &VarDeclData) -> Result<(), EvalError> {
        let name = decl
            .name
            .ok_or_else(|| EvalError::new("anonymous declarations need a placement"))?;
        let name_str = self.interner.resolve(name).to_string();

        if let Some(placement) = &decl.placement {
            let address = self.eval_address(placement)?;
            let saved = std::mem::replace(&mut self.cursor, address);
            let result = self.create_pattern(&decl.ty, &name_str);
            self.cursor = saved;
            let mut pattern = result?;
            self.apply_attributes(&mut pattern, &decl.attrs)?;
            self.scope
                .define_var(name, Value::Pattern(Box::new(pattern)), None);
            return Ok(());
        }

        if matches!(decl.ty.kind, TypeExprKind::Auto) {
            self.scope.define_var(name, Value::Null, None);
            return Ok(());
        }
        match self.resolve_builtin(&decl.ty) {
            Some((bt, _)) => {
                self.scope.define_var(name, default_value(bt), Some(bt));
                Ok(())
            }
            None => Err(EvalError::new(format!(
                "'{}' of type '{}' requires a placement",
                name_str,
                self.type_display(&decl.ty)
            ))),
        }
    }

    pub(crate) fn eval_address(&mut self, expr: &Expr) -> Result<u64, EvalError> {
        let address = self.eval_expr(expr)?.to_unsigned()?;
        u64::try_from(address)
            .map_err(|_| EvalError::with_span(format!("address 0x{:X} is out of range", address), expr.span))
    }

    fn define_in_variable(&mut self, decl: &VarDeclData) -> Result<(), EvalError> {
        let name = decl.name.ok_or_else(|| EvalError::new("in variables need a name"))?;
        let name_str = self.interner.resolve(name).to_string();
        let (bt, _) = self.resolve_builtin(&decl.ty).ok_or_else(|| {
            EvalError::new(format!("in variable '{}' must have a builtin type", name_str))
        })?;
        let value = self.in_variables.get(&name_str).cloned().ok_or_else(|| {
            EvalError::new(format!("no value provided for in variable '{}'", name_str))
        })?;
        let value = self.convert(value, bt)?;
        self.scope.define_var(name, value, Some(bt));
        Ok(())
    }

    fn define_out_variable(&mut self, decl: &VarDeclData) -> Result<(), EvalError> {
        let name = decl.name.ok_or_else(|| EvalError::new("out variables need a name"))?;
        let (bt, _) = self.resolve_builtin(&decl.ty).ok_or_else(|| {
            EvalError::new(format!(
                "out variable '{}' must have a builtin type",
                self.interner.resolve(name)
            ))
        })?;
        let value = match &decl.init {
            Some(init) => {
                let value = self.eval_expr(init)?;
                self.convert(value, bt)?
            }
            None => default_value(bt),
        };
        self.scope.define_var(name, value, Some(bt));
        self.out_names.push(name);
        Ok(())
    }

    /// Place a pattern and attach it to the enclosing composite or the globals
    fn place_member(&mut self, decl: &VarDeclData) -> Result<(), EvalError> {
        let name_str = decl
            .name
            .map(|n| self.interner.resolve(n).to_string())
            .unwrap_or_default();
        let saved = self.cursor;
        let union_start = match self.scope.current_composite() {
            Some(Composite {
                kind: CompositeKind::Union,
                start,
                ..
            }) if self.scope.context() == FrameKind::Composite => Some(*start),
            _ => None,
        };

        if let Some(placement) = &decl.placement {
            self.cursor = self.eval_address(placement)?;
        } else if let Some(start) = union_start {
            self.cursor = start;
        }

        let mut pattern = self.create_pattern(&decl.ty, &name_str)?;
        let end = self.cursor;
        self.apply_attributes(&mut pattern, &decl.attrs)?;

        if decl.placement.is_some() || self.has_attribute(&decl.attrs, "no_unique_address") {
            self.cursor = saved;
        } else if let Some(start) = union_start {
            if let Some(composite) = self.scope.current_composite_mut() {
                composite.union_end = composite.union_end.max(end);
            }
            self.cursor = start;
        }

        tracing::trace!(
            name = %pattern.name,
            offset = pattern.offset,
            size = pattern.size,
            "placed pattern"
        );
        self.scope.push_member(pattern);
        Ok(())
    }

    fn eval_bitfield_field(&mut self, field: &BitfieldFieldData) -> Result<(), EvalError> {
        let width = self.eval_expr(&field.width)?.to_unsigned()?;
        if !(1..=128).contains(&width) {
            return Err(EvalError::with_span(
                format!("bitfield field width must be between 1 and 128 bits, got {}", width),
                field.width.span,
            ));
        }
        let width = width as u32;
        let (start, bit, value) = self.take_bits(width)?;

        let Some(name) = field.name else {
            return Ok(());
        };
        self.count_pattern()?;
        let color = self.take_color();
        let offset = start + u64::from(bit / 8);
        let size = u64::from((bit % 8 + width).div_ceil(8));
        let kind = PatternKind::BitfieldField {
            bit_offset: bit,
            bit_size: width,
            value,
        };
        let mut pattern = Pattern::new(self.interner.resolve(name), "bits", offset, size, kind)
            .with_endian(self.endian);
        pattern.color = color;
        self.apply_attributes(&mut pattern, &field.attrs)?;
        self.scope.push_member(pattern);
        Ok(())
    }
}
