// Pattern creation: reading typed data at the cursor
use super::pattern::{bytes_to_unsigned, mask, sign_extend, PatternKind};
use super::scope::{BitCursor, Composite, CompositeKind, Frame, FrameKind};
use super::*;

const NO_ATTRIBUTES: &[Attribute] = &[];

pub(crate) fn decode_builtin(bt: BuiltinType, bytes: &[u8], endian: Endianness) -> PatternKind {
    let raw = bytes_to_unsigned(bytes, endian);
    match bt {
        BuiltinType::Float => PatternKind::Float(f32::from_bits(raw as u32) as f64),
        BuiltinType::Double => PatternKind::Float(f64::from_bits(raw as u64)),
        BuiltinType::Char => PatternKind::Character(raw as u8 as char),
        BuiltinType::Char16 => PatternKind::WideCharacter(
            char::from_u32(raw as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
        ),
        BuiltinType::Bool => PatternKind::Boolean(raw != 0),
        bt if bt.is_signed() => PatternKind::Signed(sign_extend(raw, bytes.len() as u64)),
        _ => PatternKind::Unsigned(raw),
    }
}

/// `width` bits starting at bit `bit` of `bytes`, least significant bit first
fn extract_bits(bytes: &[u8], bit: u32, width: u32) -> u128 {
    (0..width)
        .map(|i| bit + i)
        .filter(|b| (bytes[(b / 8) as usize] >> (b % 8)) & 1 == 1)
        .fold(0u128, |value, b| value | 1u128 << (b - bit))
}

fn bit_mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

impl<'a> Evaluator<'a> {
    /// Create a pattern of type `ty` at the cursor and advance the cursor past it
    pub(crate) fn create_pattern(&mut self, ty: &TypeExpr, name: &str) -> Result<Pattern, EvalError> {
        self.check_cancelled()?;
        self.count_pattern()?;
        let color = self.take_color();
        let (mut pattern, type_attrs) = self.build_pattern(ty, name)?;
        pattern.color = color;
        if let PatternKind::ArrayStatic { template, .. } = &mut pattern.kind {
            template.color = color;
        }
        self.apply_attributes(&mut pattern, type_attrs)?;

        if pattern.offset < self.provider.base_address() || pattern.end() > self.data_end() {
            return Err(EvalError::new(format!(
                "pattern '{}' at 0x{:X} with size 0x{:X} lies outside of the data",
                pattern.name, pattern.offset, pattern.size
            )));
        }
        tracing::trace!(
            name = %pattern.name,
            type_name = %pattern.type_name,
            offset = pattern.offset,
            size = pattern.size,
            "created pattern"
        );
        Ok(pattern)
    }

    /// Size of a pattern built by `f`, leaving no trace of it
    pub(crate) fn materialize_size(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<Pattern, EvalError>,
    ) -> Result<u64, EvalError> {
        let cursor = self.cursor;
        let count = self.pattern_count;
        let color = self.next_color;
        let result = f(self);
        self.cursor = cursor;
        self.pattern_count = count;
        self.next_color = color;
        Ok(result?.size)
    }

    /// Build the pattern and return the type-level attributes that apply to it
    fn build_pattern(
        &mut self,
        ty: &TypeExpr,
        name: &str,
    ) -> Result<(Pattern, &'a [Attribute]), EvalError> {
        match &ty.kind {
            TypeExprKind::Builtin(bt) => Ok((self.read_builtin(*bt, name)?, NO_ATTRIBUTES)),
            TypeExprKind::Endian(endian, inner) => {
                let saved = std::mem::replace(&mut self.endian, *endian);
                let result = self.build_pattern(inner, name);
                self.endian = saved;
                result
            }
            TypeExprKind::Named(path) => self.build_named(path, name),
            TypeExprKind::Array(elem, size) => Ok((self.build_array(elem, size, name)?, NO_ATTRIBUTES)),
            TypeExprKind::Pointer(pointee, size_ty) => {
                Ok((self.build_pointer(pointee, size_ty, name)?, NO_ATTRIBUTES))
            }
            TypeExprKind::Padding => Err(EvalError::new(
                "padding must be declared with a size: 'padding[size]'",
            )),
            TypeExprKind::Auto => Err(EvalError::new("'auto' cannot be used to place a pattern")),
        }
    }

    fn read_builtin(&mut self, bt: BuiltinType, name: &str) -> Result<Pattern, EvalError> {
        let size = bt
            .size()
            .ok_or_else(|| EvalError::new("type 'str' cannot be placed, use a char array instead"))?;
        let offset = self.cursor;
        let bytes = self.read_bytes(offset, size)?;
        self.cursor = offset + size;
        Ok(
            Pattern::new(name, bt.name(), offset, size, decode_builtin(bt, &bytes, self.endian))
                .with_endian(self.endian),
        )
    }

    fn build_named(
        &mut self,
        path: &[Name],
        name: &str,
    ) -> Result<(Pattern, &'a [Attribute]), EvalError> {
        let entry = self.resolve_type(path).ok_or_else(|| {
            EvalError::new(format!("unknown type '{}'", self.interner.resolve_path(path)))
        })?;
        let display = entry.display.clone();
        self.nested(&display, |ev| {
            ev.in_namespace(&entry.namespace, |ev| match entry.def {
                TypeDef::Struct(def) => Ok((ev.build_struct(def, &display, name)?, &def.attrs[..])),
                TypeDef::Union(def) => Ok((ev.build_union(def, &display, name)?, &def.attrs[..])),
                TypeDef::Bitfield(def) => {
                    Ok((ev.build_bitfield(def, &display, name)?, &def.attrs[..]))
                }
                TypeDef::Enum(def) => Ok((ev.build_enum(&entry, def, name)?, &def.attrs[..])),
                TypeDef::Alias(alias) => match &alias.ty {
                    Some(target) => {
                        let (mut pattern, inner_attrs) = ev.build_pattern(target, name)?;
                        ev.apply_attributes(&mut pattern, inner_attrs)?;
                        pattern.type_name = display.clone();
                        Ok((pattern, &alias.attrs[..]))
                    }
                    None => Err(EvalError::new(format!(
                        "type '{}' is declared but never defined",
                        display
                    ))),
                },
            })
        })
    }

    /// Run a composite body in a fresh frame and return the frame's members
    fn eval_composite(
        &mut self,
        composite: Composite,
        body: impl FnOnce(&mut Self) -> Result<(), EvalError>,
    ) -> Result<(Vec<Pattern>, Composite), EvalError> {
        let depth = self.scope.depth();
        self.scope.push(Frame::composite(composite));
        let result = body(self);
        self.scope.truncate(depth + 1);
        let frame = self.scope.pop();
        result?;
        match frame {
            Some(Frame {
                members,
                composite: Some(composite),
                ..
            }) => Ok((members, composite)),
            _ => Err(EvalError::new("composite frame lost during evaluation")),
        }
    }

    pub(crate) fn eval_type_body(&mut self, body: &[Stmt]) -> Result<(), EvalError> {
        for stmt in body {
            match self.eval_stmt(stmt)? {
                ControlFlow::None => {}
                _ => break,
            }
        }
        Ok(())
    }

    fn eval_struct_body(&mut self, def: &'a StructDefData) -> Result<(), EvalError> {
        for parent in &def.parents {
            let entry = self.resolve_type(parent).ok_or_else(|| {
                EvalError::new(format!(
                    "unknown parent type '{}'",
                    self.interner.resolve_path(parent)
                ))
            })?;
            match entry.def {
                TypeDef::Struct(parent_def) => {
                    self.nested(&entry.display, |ev| {
                        ev.in_namespace(&entry.namespace, |ev| ev.eval_struct_body(parent_def))
                    })?;
                }
                _ => {
                    return Err(EvalError::new(format!(
                        "cannot inherit from '{}': only structs can be inherited from",
                        entry.display
                    )))
                }
            }
        }
        self.eval_type_body(&def.body)
    }

    fn build_struct(
        &mut self,
        def: &'a StructDefData,
        display: &str,
        name: &str,
    ) -> Result<Pattern, EvalError> {
        let start = self.cursor;
        let composite = Composite {
            kind: CompositeKind::Struct,
            type_name: display.to_string(),
            start,
            union_end: start,
            bits: None,
        };
        let (members, _) = self.eval_composite(composite, |ev| ev.eval_struct_body(def))?;
        let size = self.cursor.saturating_sub(start);
        Ok(Pattern::new(name, display, start, size, PatternKind::Struct { members }).with_endian(self.endian))
    }

    fn build_union(
        &mut self,
        def: &'a UnionDefData,
        display: &str,
        name: &str,
    ) -> Result<Pattern, EvalError> {
        let start = self.cursor;
        let composite = Composite {
            kind: CompositeKind::Union,
            type_name: display.to_string(),
            start,
            union_end: start,
            bits: None,
        };
        let (members, composite) = self.eval_composite(composite, |ev| ev.eval_type_body(&def.body))?;
        let size = composite.union_end.saturating_sub(start);
        self.cursor = start + size;
        Ok(Pattern::new(name, display, start, size, PatternKind::Union { members }).with_endian(self.endian))
    }

    fn build_bitfield(
        &mut self,
        def: &'a BitfieldDefData,
        display: &str,
        name: &str,
    ) -> Result<Pattern, EvalError> {
        let start = self.cursor;
        let container = match &def.container {
            Some(ty) => {
                let (bt, endian) = self
                    .resolve_builtin(ty)
                    .filter(|(bt, _)| bt.is_integer())
                    .ok_or_else(|| {
                        EvalError::new(format!(
                            "bitfield '{}' needs an integer container type",
                            display
                        ))
                    })?;
                let size = bt.size().unwrap_or_default();
                let bytes = self.read_bytes(start, size)?;
                let value = bytes_to_unsigned(&bytes, endian.unwrap_or(self.endian));
                Some((value, (size * 8) as u32))
            }
            None => None,
        };
        let composite = Composite {
            kind: CompositeKind::Bitfield,
            type_name: display.to_string(),
            start,
            union_end: start,
            bits: Some(BitCursor {
                container,
                ..BitCursor::default()
            }),
        };
        let (fields, composite) = self.eval_composite(composite, |ev| ev.eval_type_body(&def.body))?;
        let used = composite.bits.map_or(0, |b| b.bit);
        let size = match container {
            Some((_, width)) => u64::from(width / 8),
            None => u64::from(used.div_ceil(8)),
        };
        self.cursor = start + size;
        Ok(Pattern::new(name, display, start, size, PatternKind::Bitfield { fields }).with_endian(self.endian))
    }

    /// Extract a field from the bitfield under construction
    pub(crate) fn take_bits(&mut self, width: u32) -> Result<(u64, u32, u128), EvalError> {
        let (start, bit, container, mut loaded) = match self.scope.current_composite_mut() {
            Some(Composite {
                kind: CompositeKind::Bitfield,
                start,
                bits: Some(bits),
                ..
            }) => (*start, bits.bit, bits.container, std::mem::take(&mut bits.loaded)),
            _ => return Err(EvalError::new("bitfield fields are only allowed inside bitfields")),
        };
        let value = match container {
            Some((container, container_bits)) => {
                if bit + width > container_bits {
                    return Err(EvalError::new(format!(
                        "bitfield fields exceed the container width of {} bits",
                        container_bits
                    )));
                }
                (container >> bit) & bit_mask(width)
            }
            None => {
                let needed = (u64::from(bit) + u64::from(width)).div_ceil(8);
                let have = loaded.len() as u64;
                if needed > have {
                    loaded.extend(self.read_bytes(start + have, needed - have)?);
                }
                extract_bits(&loaded, bit, width)
            }
        };
        if let Some(Composite { bits: Some(bits), .. }) = self.scope.current_composite_mut() {
            bits.loaded = loaded;
            bits.bit += width;
        }
        Ok((start, bit, value))
    }

    /// Entries of an enum, evaluated once per run
    pub(crate) fn enum_entries(
        &mut self,
        entry: &TypeEntry<'a>,
        def: &'a EnumDefData,
    ) -> Result<(Arc<[EnumEntry]>, BuiltinType), EvalError> {
        self.in_namespace(&entry.namespace, |ev| {
            let (bt, _) = ev
                .resolve_builtin(&def.underlying)
                .filter(|(bt, _)| bt.is_integer() || matches!(bt, BuiltinType::Char | BuiltinType::Char16))
                .ok_or_else(|| {
                    EvalError::new(format!("enum '{}' needs an integer underlying type", entry.display))
                })?;
            let key = ev.interner.intern(&entry.display);
            if let Some(cached) = ev.enum_cache.get(&key) {
                return Ok((Arc::clone(cached), bt));
            }
            let size = bt.size().unwrap_or_default();
            ev.scope.push(Frame::new(FrameKind::Block));
            let result = ev.compute_enum_entries(def, size);
            ev.scope.pop();
            let entries: Arc<[EnumEntry]> = result?.into();
            ev.enum_cache.insert(key, Arc::clone(&entries));
            Ok((entries, bt))
        })
    }

    fn compute_enum_entries(&mut self, def: &EnumDefData, size: u64) -> Result<Vec<EnumEntry>, EvalError> {
        let mut next = 0u128;
        let mut entries = Vec::with_capacity(def.members.len());
        for member in &def.members {
            let value = match &member.value {
                Some(expr) => self.eval_expr(expr)?.to_unsigned()?,
                None => next,
            } & mask(size);
            self.scope.define_var(member.name, Value::Unsigned(value), None);
            entries.push(EnumEntry {
                name: self.interner.resolve(member.name).to_string(),
                value,
            });
            next = value.wrapping_add(1) & mask(size);
        }
        Ok(entries)
    }

    fn build_enum(
        &mut self,
        entry: &TypeEntry<'a>,
        def: &'a EnumDefData,
        name: &str,
    ) -> Result<Pattern, EvalError> {
        let (entries, bt) = self.enum_entries(entry, def)?;
        let endian = self
            .resolve_builtin(&def.underlying)
            .and_then(|(_, e)| e)
            .unwrap_or(self.endian);
        let size = bt.size().unwrap_or_default();
        let offset = self.cursor;
        let bytes = self.read_bytes(offset, size)?;
        self.cursor = offset + size;
        let kind = PatternKind::Enum {
            value: bytes_to_unsigned(&bytes, endian) & mask(size),
            signed: bt.is_signed(),
            entries,
        };
        Ok(Pattern::new(name, entry.display.as_str(), offset, size, kind).with_endian(endian))
    }

    fn check_array_limit(&self, count: u128) -> Result<u64, EvalError> {
        if count > u128::from(self.limits.array) {
            return Err(EvalError::new(format!(
                "array of {} entries exceeds the array limit of {}",
                count, self.limits.array
            )));
        }
        Ok(count as u64)
    }

    fn build_array(&mut self, elem: &TypeExpr, size: &ArraySize, name: &str) -> Result<Pattern, EvalError> {
        let scalar = match &elem.kind {
            TypeExprKind::Builtin(bt) => Some((*bt, self.endian)),
            TypeExprKind::Endian(e, inner) => match inner.kind {
                TypeExprKind::Builtin(bt) => Some((bt, *e)),
                _ => None,
            },
            TypeExprKind::Padding => return self.build_padding(size, name),
            _ => None,
        };
        match scalar {
            Some((BuiltinType::Str, _)) => Err(EvalError::new("arrays of 'str' are not allowed")),
            Some((bt @ (BuiltinType::Char | BuiltinType::Char16), endian)) => {
                self.build_string(bt, endian, size, name)
            }
            Some((bt, endian)) => self.build_scalar_array(bt, endian, size, name),
            None => self.build_dynamic_array(elem, size, name),
        }
    }

    fn build_padding(&mut self, size: &ArraySize, name: &str) -> Result<Pattern, EvalError> {
        let ArraySize::Fixed(expr) = size else {
            return Err(EvalError::new("padding needs a fixed size"));
        };
        let len = self.eval_expr(expr)?.to_unsigned()?;
        let len = u64::try_from(len).map_err(|_| EvalError::new("padding size is too large"))?;
        let start = self.cursor;
        self.cursor = start.saturating_add(len);
        let name = if name.is_empty() { "padding" } else { name };
        Ok(Pattern::new(name, "padding", start, len, PatternKind::Padding).with_endian(self.endian))
    }

    /// Number of `elem_size` elements at `start` described by `size`
    fn element_count(&mut self, size: &ArraySize, start: u64, elem_size: u64) -> Result<u64, EvalError> {
        match size {
            ArraySize::Fixed(expr) => {
                let count = self.eval_expr(expr)?.to_unsigned()?;
                self.check_array_limit(count)
            }
            ArraySize::While(cond) => {
                let mut count = 0u64;
                loop {
                    self.check_cancelled()?;
                    self.cursor = start + count * elem_size;
                    if !self.eval_expr(cond)?.to_bool()? {
                        break;
                    }
                    count = self.check_array_limit(u128::from(count) + 1)?;
                }
                self.cursor = start;
                Ok(count)
            }
            ArraySize::Unsized => {
                let mut count = 0u64;
                loop {
                    self.check_cancelled()?;
                    let bytes = self.read_bytes(start + count * elem_size, elem_size)?;
                    count = self.check_array_limit(u128::from(count) + 1)?;
                    if bytes.iter().all(|b| *b == 0) {
                        break;
                    }
                }
                Ok(count)
            }
        }
    }

    fn build_string(
        &mut self,
        bt: BuiltinType,
        endian: Endianness,
        size: &ArraySize,
        name: &str,
    ) -> Result<Pattern, EvalError> {
        let start = self.cursor;
        let unit = bt.size().unwrap_or(1);
        let count = self.element_count(size, start, unit)?;
        let total = count * unit;
        let bytes = self.read_bytes(start, total)?;
        let kind = if bt == BuiltinType::Char {
            PatternKind::String(bytes.iter().take_while(|b| **b != 0).map(|b| *b as char).collect())
        } else {
            let units = bytes
                .chunks_exact(2)
                .map(|c| bytes_to_unsigned(c, endian) as u16)
                .take_while(|u| *u != 0);
            PatternKind::WideString(
                char::decode_utf16(units)
                    .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect(),
            )
        };
        self.cursor = start + total;
        let type_name = format!("{}[{}]", bt.name(), count);
        Ok(Pattern::new(name, type_name, start, total, kind).with_endian(endian))
    }

    fn build_scalar_array(
        &mut self,
        bt: BuiltinType,
        endian: Endianness,
        size: &ArraySize,
        name: &str,
    ) -> Result<Pattern, EvalError> {
        let start = self.cursor;
        let elem_size = bt.size().unwrap_or(1);
        let count = self.element_count(size, start, elem_size)?;
        let total = count
            .checked_mul(elem_size)
            .ok_or_else(|| EvalError::new("array size overflows"))?;
        let first = if count > 0 {
            if start.saturating_add(total) > self.data_end() {
                return Err(EvalError::new(format!(
                    "array '{}' of {} bytes at 0x{:X} runs past the end of the data",
                    name, total, start
                )));
            }
            self.read_bytes(start, elem_size)?
        } else {
            vec![0; elem_size as usize]
        };
        let template = Pattern::new("[0]", bt.name(), start, elem_size, decode_builtin(bt, &first, endian))
            .with_endian(endian);
        self.cursor = start + total;
        let type_name = format!("{}[{}]", bt.name(), count);
        let kind = PatternKind::ArrayStatic {
            template: Box::new(template),
            count,
        };
        Ok(Pattern::new(name, type_name, start, total, kind).with_endian(endian))
    }

    fn build_dynamic_array(
        &mut self,
        elem: &TypeExpr,
        size: &ArraySize,
        name: &str,
    ) -> Result<Pattern, EvalError> {
        let start = self.cursor;
        let mut entries = Vec::new();
        match size {
            ArraySize::Fixed(expr) => {
                let count = self.eval_expr(expr)?.to_unsigned()?;
                let count = self.check_array_limit(count)?;
                for i in 0..count {
                    entries.push(self.create_pattern(elem, &format!("[{}]", i))?);
                }
            }
            ArraySize::While(cond) => loop {
                if !self.eval_expr(cond)?.to_bool()? {
                    break;
                }
                self.check_array_limit(entries.len() as u128 + 1)?;
                let index = entries.len();
                entries.push(self.create_pattern(elem, &format!("[{}]", index))?);
            },
            ArraySize::Unsized => {
                return Err(EvalError::new(format!(
                    "unsized array '{}' needs a builtin element type",
                    name
                )))
            }
        }
        let total = self.cursor.saturating_sub(start);
        let type_name = format!("{}[{}]", self.type_display(elem), entries.len());
        Ok(Pattern::new(name, type_name, start, total, PatternKind::ArrayDynamic { entries })
            .with_endian(self.endian))
    }

    fn build_pointer(
        &mut self,
        pointee: &TypeExpr,
        size_ty: &TypeExpr,
        name: &str,
    ) -> Result<Pattern, EvalError> {
        let (bt, endian) = self
            .resolve_builtin(size_ty)
            .filter(|(bt, _)| bt.is_integer())
            .ok_or_else(|| EvalError::new(format!("pointer '{}' needs an integer size type", name)))?;
        let size = bt.size().unwrap_or_default();
        let endian = endian.unwrap_or(self.endian);
        let offset = self.cursor;
        let bytes = self.read_bytes(offset, size)?;
        let raw = bytes_to_unsigned(&bytes, endian);
        let address = if bt.is_signed() {
            sign_extend(raw, size) as u128
        } else {
            raw
        };
        let target = u64::try_from(address)
            .map_err(|_| EvalError::new(format!("pointer '{}' holds an invalid address 0x{:X}", name, address)))?;

        self.cursor = target;
        let result = self.create_pattern(pointee, &format!("*({})", name));
        self.cursor = offset + size;
        let target_pattern = result?;

        let type_name = format!("{}*", self.type_display(pointee));
        let kind = PatternKind::Pointer {
            pointee: Box::new(target_pattern),
            address,
        };
        Ok(Pattern::new(name, type_name, offset, size, kind).with_endian(endian))
    }
}
