// Tree-walking evaluator for the pattern language

pub mod console;
mod expr;
pub mod function;
pub mod pattern;
pub mod provider;
mod read_type;
pub(crate) mod scope;
mod stmt;
pub mod value;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::EvalError;
use crate::name::{Name, StringInterner};
use crate::parser::ast::*;
use crate::span::Span;
use crate::validator::parse_color;
use console::Console;
use function::FunctionRegistry;
use pattern::{EnumEntry, Pattern, PALETTE};
use provider::ByteProvider;
use scope::{FunctionEntry, Scope, TypeDef, TypeEntry};
use value::Value;

/// Control flow signal from statement evaluation
pub(crate) enum ControlFlow {
    None,
    Break,
    Continue,
    Return(Option<Value>),
}

/// Resource ceilings for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum nesting of type instantiations and function calls
    pub recursion: u32,
    /// Maximum entries in a single array
    pub array: u64,
    /// Maximum patterns created in one run
    pub pattern: u64,
    /// Maximum iterations of a single `while`/`for` loop
    pub loops: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            recursion: 32,
            array: 0x1000,
            pattern: 0x2000,
            loops: 0x1000,
        }
    }
}

/// Alias chains longer than this are treated as cyclic
const MAX_ALIAS_CHAIN: usize = 64;

/// Evaluator that processes an AST against a byte provider
pub struct Evaluator<'a> {
    provider: &'a dyn ByteProvider,
    functions: &'a FunctionRegistry,
    pub(crate) interner: StringInterner,
    scope: Scope<'a>,
    console: Console,
    /// Current cursor (logical address)
    cursor: u64,
    /// Endianness applied to reads without an explicit `be`/`le`
    endian: Endianness,
    /// Namespace names are resolved from
    namespace: Vec<Name>,
    depth: u32,
    limits: Limits,
    pattern_count: u64,
    next_color: usize,
    cancelled: Option<Arc<AtomicBool>>,
    in_variables: FxHashMap<String, Value>,
    out_names: Vec<Name>,
    main_result: Option<Value>,
    enum_cache: FxHashMap<Name, Arc<[EnumEntry]>>,
    stmt_count: u64,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        provider: &'a dyn ByteProvider,
        functions: &'a FunctionRegistry,
        interner: StringInterner,
    ) -> Self {
        Self {
            provider,
            functions,
            interner,
            scope: Scope::new(),
            console: Console::new(),
            cursor: provider.base_address(),
            endian: Endianness::native(),
            namespace: Vec::new(),
            depth: 0,
            limits: Limits::default(),
            pattern_count: 0,
            next_color: 0,
            cancelled: None,
            in_variables: FxHashMap::default(),
            out_names: Vec::new(),
            main_result: None,
            enum_cache: FxHashMap::default(),
            stmt_count: 0,
        }
    }

    /// Set default endianness
    pub fn set_default_endian(&mut self, endian: Endianness) {
        self.endian = endian;
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    /// Start reading at `base_address + offset`
    pub fn set_start_offset(&mut self, offset: u64) {
        self.cursor = self.provider.base_address().saturating_add(offset);
    }

    /// Cancellation token; evaluation stops with an interrupted error once it is set
    pub fn set_cancellation_token(&mut self, token: Arc<AtomicBool>) {
        self.cancelled = Some(token);
    }

    /// Values for `in` variables, keyed by variable name
    pub fn set_in_variables(&mut self, values: FxHashMap<String, Value>) {
        self.in_variables = values;
    }

    pub fn take_console(&mut self) -> Console {
        std::mem::take(&mut self.console)
    }

    /// Value returned by `main()`, if the program defines one
    pub fn main_result(&self) -> Option<&Value> {
        self.main_result.as_ref()
    }

    /// Final values of the `out` variables, in declaration order
    pub fn out_variables(&self) -> Vec<(String, Value)> {
        self.out_names
            .iter()
            .filter_map(|name| {
                let var = self.scope.global().vars.get(name)?;
                Some((self.interner.resolve(*name).to_string(), var.value.clone()))
            })
            .collect()
    }

    /// Run the program and return the global patterns in placement order
    pub fn evaluate(&mut self, ast: &'a Ast) -> Result<Vec<Pattern>, EvalError> {
        self.register_definitions(&ast.stmts, &[]);
        tracing::debug!(
            types = self.scope.types.len(),
            functions = self.scope.functions.len(),
            "registered definitions"
        );

        for stmt in &ast.stmts {
            self.eval_stmt(stmt)?;
        }

        let main = self.interner.intern("main");
        if let Some(entry) = self.scope.functions.get(&main).cloned() {
            let span = Span::new(0, 0, entry.def.body.first().map_or(0, |s| s.line()));
            let result = self.call_user_function(&entry, Vec::new(), span)?;
            self.main_result = Some(result);
        }

        let patterns = self.scope.take_globals();
        tracing::debug!(
            patterns = patterns.len(),
            created = self.pattern_count,
            statements = self.stmt_count,
            "evaluation finished"
        );
        Ok(patterns)
    }

    /// Hoist type and function definitions so they can be used before their declaration
    fn register_definitions(&mut self, stmts: &'a [Stmt], namespace: &[Name]) {
        for stmt in stmts {
            let (name, def) = match &stmt.kind {
                StmtKind::StructDef(d) => (d.name, TypeDef::Struct(d)),
                StmtKind::UnionDef(d) => (d.name, TypeDef::Union(d)),
                StmtKind::EnumDef(d) => (d.name, TypeDef::Enum(d)),
                StmtKind::BitfieldDef(d) => (d.name, TypeDef::Bitfield(d)),
                StmtKind::TypeAlias(d) => (d.name, TypeDef::Alias(d)),
                StmtKind::FnDef(d) => {
                    let display = self.qualified_string(namespace, &[d.name]);
                    let key = self.interner.intern(&display);
                    self.scope.functions.insert(
                        key,
                        FunctionEntry {
                            def: d,
                            namespace: namespace.to_vec(),
                            display,
                        },
                    );
                    continue;
                }
                StmtKind::Namespace(ns) => {
                    let mut inner = namespace.to_vec();
                    inner.extend_from_slice(&ns.path);
                    self.register_definitions(&ns.body, &inner);
                    continue;
                }
                _ => continue,
            };
            let display = self.qualified_string(namespace, &[name]);
            let key = self.interner.intern(&display);
            let forward = matches!(def, TypeDef::Alias(a) if a.ty.is_none());
            if forward && self.scope.types.contains_key(&key) {
                continue;
            }
            self.scope.types.insert(
                key,
                TypeEntry {
                    def,
                    namespace: namespace.to_vec(),
                    display,
                },
            );
        }
    }

    fn qualified_string(&self, namespace: &[Name], path: &[Name]) -> String {
        let mut parts: Vec<&str> = namespace.iter().map(|n| self.interner.resolve(*n)).collect();
        parts.extend(path.iter().map(|n| self.interner.resolve(*n)));
        parts.join("::")
    }

    /// Resolve a type path from the current namespace outwards
    pub(crate) fn resolve_type(&mut self, path: &[Name]) -> Option<TypeEntry<'a>> {
        for i in (0..=self.namespace.len()).rev() {
            let qualified = self.qualified_string(&self.namespace[..i], path);
            if let Some(key) = self.interner.lookup(&qualified) {
                if let Some(entry) = self.scope.types.get(&key) {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    pub(crate) fn resolve_function(&mut self, path: &[Name]) -> Option<FunctionEntry<'a>> {
        for i in (0..=self.namespace.len()).rev() {
            let qualified = self.qualified_string(&self.namespace[..i], path);
            if let Some(key) = self.interner.lookup(&qualified) {
                if let Some(entry) = self.scope.functions.get(&key) {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    /// Builtin type behind `ty`, following `be`/`le` prefixes and aliases
    pub(crate) fn resolve_builtin(&mut self, ty: &TypeExpr) -> Option<(BuiltinType, Option<Endianness>)> {
        let mut current = ty.clone();
        let mut endian = None;
        for _ in 0..MAX_ALIAS_CHAIN {
            match current.kind {
                TypeExprKind::Builtin(bt) => return Some((bt, endian)),
                TypeExprKind::Endian(e, inner) => {
                    endian = endian.or(Some(e));
                    current = *inner;
                }
                TypeExprKind::Named(path) => match self.resolve_type(&path)?.def {
                    TypeDef::Alias(alias) => current = alias.ty.clone()?,
                    _ => return None,
                },
                _ => return None,
            }
        }
        None
    }

    /// Human-readable name of a type expression
    pub(crate) fn type_display(&self, ty: &TypeExpr) -> String {
        match &ty.kind {
            TypeExprKind::Builtin(bt) => bt.name().to_string(),
            TypeExprKind::Named(path) => self.interner.resolve_path(path),
            TypeExprKind::Endian(_, inner) => self.type_display(inner),
            TypeExprKind::Array(elem, _) => format!("{}[]", self.type_display(elem)),
            TypeExprKind::Pointer(pointee, _) => format!("{}*", self.type_display(pointee)),
            TypeExprKind::Padding => "padding".to_string(),
            TypeExprKind::Auto => "auto".to_string(),
        }
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), EvalError> {
        match &self.cancelled {
            Some(token) if token.load(Ordering::Relaxed) => Err(EvalError::interrupted()),
            _ => Ok(()),
        }
    }

    /// Run `f` one nesting level deeper, failing once the recursion limit is exceeded
    pub(crate) fn nested<T>(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        if self.depth >= self.limits.recursion {
            return Err(EvalError::new(format!(
                "recursion limit of {} exceeded while evaluating '{}'",
                self.limits.recursion, what
            )));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Run `f` with names resolving from `namespace`
    pub(crate) fn in_namespace<T>(
        &mut self,
        namespace: &[Name],
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        let saved = std::mem::replace(&mut self.namespace, namespace.to_vec());
        let result = f(self);
        self.namespace = saved;
        result
    }

    pub(crate) fn count_pattern(&mut self) -> Result<(), EvalError> {
        self.pattern_count += 1;
        if self.pattern_count > self.limits.pattern {
            return Err(EvalError::new(format!(
                "pattern limit of {} exceeded",
                self.limits.pattern
            )));
        }
        Ok(())
    }

    pub(crate) fn take_color(&mut self) -> u32 {
        let color = PALETTE[self.next_color % PALETTE.len()];
        self.next_color += 1;
        color
    }

    /// One past the last logical address of the data
    pub(crate) fn data_end(&self) -> u64 {
        self.provider.base_address().saturating_add(self.provider.size())
    }

    /// Read `size` bytes at a logical address
    pub(crate) fn read_bytes(&self, address: u64, size: u64) -> Result<Vec<u8>, EvalError> {
        let out_of_range = || {
            EvalError::new(format!(
                "cannot read {} bytes at 0x{:X}: outside of the data (0x{:X}..0x{:X})",
                size,
                address,
                self.provider.base_address(),
                self.data_end()
            ))
        };
        let physical = address
            .checked_sub(self.provider.base_address())
            .ok_or_else(out_of_range)?;
        let len = usize::try_from(size).map_err(|_| out_of_range())?;
        if physical.saturating_add(size) > self.provider.size() {
            return Err(out_of_range());
        }
        let mut buf = vec![0u8; len];
        self.provider
            .read(physical, &mut buf)
            .map_err(|e| EvalError::new(format!("cannot read {} bytes at 0x{:X}: {}", size, address, e)))?;
        Ok(buf)
    }

    /// Apply `color`, `name`, `comment`, `hidden` and `inline`
    pub(crate) fn apply_attributes(
        &self,
        pattern: &mut Pattern,
        attrs: &[Attribute],
    ) -> Result<(), EvalError> {
        for attr in attrs {
            let value = attr.value.as_deref();
            match self.interner.resolve(attr.name) {
                "color" => {
                    let text = value.unwrap_or_default();
                    pattern.color = parse_color(text).ok_or_else(|| {
                        EvalError::with_span(format!("invalid color '{}'", text), attr.span)
                    })?;
                }
                "name" => pattern.display_name = value.map(str::to_string),
                "comment" => pattern.comment = value.map(str::to_string),
                "hidden" => pattern.hidden = true,
                "inline" => pattern.inlined = true,
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn has_attribute(&self, attrs: &[Attribute], name: &str) -> bool {
        attrs.iter().any(|a| self.interner.resolve(a.name) == name)
    }

    pub(crate) fn log_warning(&mut self, message: String) {
        self.console.warning(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::pattern::PatternKind;
    use crate::eval::provider::SliceProvider;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn parse(source: &str, interner: &mut StringInterner) -> Ast {
        let tokens = Lexer::new(source, interner).tokenize().expect("lex failed");
        Parser::new(tokens, interner).parse().expect("parse failed")
    }

    fn run(source: &str, data: &[u8]) -> Result<(Vec<Pattern>, Console), EvalError> {
        let mut interner = StringInterner::new();
        let ast = parse(source, &mut interner);
        let provider = SliceProvider::new(data);
        let functions = FunctionRegistry::with_std();
        let mut evaluator = Evaluator::new(&provider, &functions, interner);
        evaluator.set_default_endian(Endianness::Little);
        let patterns = evaluator.evaluate(&ast)?;
        Ok((patterns, evaluator.take_console()))
    }

    fn eval_pattern(source: &str, data: &[u8]) -> Vec<Pattern> {
        run(source, data).expect("evaluation failed").0
    }

    fn eval_err(source: &str, data: &[u8]) -> EvalError {
        run(source, data).expect_err("evaluation should fail")
    }

    #[test]
    fn test_simple_u8() {
        let patterns = eval_pattern("u8 x @ 0x00;", &[0x42]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].name, "x");
        assert_eq!(patterns[0].kind, PatternKind::Unsigned(0x42));
    }

    #[test]
    fn test_u32_le_and_be() {
        let data = [0x01, 0x00, 0x00, 0x00];
        assert_eq!(eval_pattern("u32 v @ 0;", &data)[0].kind, PatternKind::Unsigned(1));
        assert_eq!(
            eval_pattern("be u32 v @ 0;", &data)[0].kind,
            PatternKind::Unsigned(0x0100_0000)
        );
    }

    #[test]
    fn test_signed_and_float() {
        let patterns = eval_pattern("s16 a @ 0; float f @ 2;", &[0xFE, 0xFF, 0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(patterns[0].kind, PatternKind::Signed(-2));
        assert_eq!(patterns[1].kind, PatternKind::Float(1.0));
    }

    #[test]
    fn test_struct_members_advance() {
        let patterns = eval_pattern(
            "struct H { u8 a; u16 b; u8 c; }; H h @ 0;",
            &[1, 2, 0, 3],
        );
        let h = &patterns[0];
        assert_eq!(h.size, 4);
        let offsets: Vec<u64> = h.children().iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 1, 3]);
        assert_eq!(h.children()[1].kind, PatternKind::Unsigned(2));
    }

    #[test]
    fn test_pascal_string() {
        let patterns = eval_pattern(
            "struct Pascal { u8 len; char data[len]; }; Pascal s @ 0x00;",
            &[0x03, 0x41, 0x42, 0x43, 0x00],
        );
        let s = &patterns[0];
        assert_eq!(s.size, 4);
        let data = &s.children()[1];
        assert_eq!(data.size, 3);
        assert_eq!(data.kind, PatternKind::String("ABC".into()));
        assert_eq!(data.formatted_value(&SliceProvider::new(&[])), "\"ABC\"");
    }

    #[test]
    fn test_union_members_share_offset() {
        let patterns = eval_pattern(
            "union U { u32 i; float f; u8 b; }; U u @ 0x00;",
            &[0x7F, 0xFF, 0xFF, 0xFF],
        );
        let u = &patterns[0];
        assert_eq!(u.size, 4);
        assert!(u.children().iter().all(|c| c.offset == 0));
        assert_eq!(u.children()[2].size, 1);
    }

    #[test]
    fn test_pointer() {
        let patterns = eval_pattern("u8 *p : u32 @ 0x00;", &[0x04, 0x00, 0x00, 0x00, 0xAA]);
        let p = &patterns[0];
        assert_eq!((p.offset, p.size), (0, 4));
        match &p.kind {
            PatternKind::Pointer { pointee, address } => {
                assert_eq!(*address, 4);
                assert_eq!(pointee.offset, 4);
                assert_eq!(pointee.name, "*(p)");
                assert_eq!(pointee.kind, PatternKind::Unsigned(0xAA));
            }
            other => panic!("expected pointer, got {:?}", other),
        }
    }

    #[test]
    fn test_recursion_limit() {
        let err = std::thread::Builder::new()
            .stack_size(16 * 1024 * 1024)
            .spawn(|| eval_err("struct S { S inner; }; S s @ 0;", &[0; 4]))
            .unwrap()
            .join()
            .unwrap();
        assert!(err.message.contains("recursion limit"), "{}", err.message);
        assert!(!err.interrupted);
    }

    #[test]
    fn test_enum_values_and_unknown_entry() {
        let source = "enum Kind : u8 { A = 1, B, C = 0x10 }; Kind k @ 0; Kind m @ 1;";
        let patterns = eval_pattern(source, &[0x02, 0x07]);
        let provider = SliceProvider::new(&[]);
        assert_eq!(patterns[0].formatted_value(&provider), "Kind::B");
        assert_eq!(patterns[1].formatted_value(&provider), "Kind::???");
    }

    #[test]
    fn test_enum_entry_reference() {
        let source = r#"
            enum Kind : u8 { A = 1, B };
            Kind k @ 0;
            u8 follow @ 1 [[name("ok")]];
            if (k == Kind::B) { u8 extra @ 2; }
        "#;
        let patterns = eval_pattern(source, &[0x02, 0, 9]);
        assert_eq!(patterns.len(), 3);
        assert_eq!(patterns[2].name, "extra");
        assert_eq!(patterns[1].display_name(), "ok");
    }

    #[test]
    fn test_missing_enum_entry_is_error() {
        let err = eval_err("enum E : u8 { A }; u8 x = E::Missing;", &[]);
        assert!(err.message.contains("Missing"));
    }

    #[test]
    fn test_bitfield_without_container() {
        let source = "bitfield F { a : 4; b : 4; c : 8; }; F f @ 0;";
        let patterns = eval_pattern(source, &[0x21, 0x43]);
        let f = &patterns[0];
        assert_eq!(f.size, 2);
        let values: Vec<u128> = f
            .children()
            .iter()
            .map(|c| match c.kind {
                PatternKind::BitfieldField { value, .. } => value,
                _ => panic!("not a field"),
            })
            .collect();
        assert_eq!(values, vec![1, 2, 0x43]);
    }

    /// Counts the bytes handed out, to check that nothing is read twice
    struct CountingProvider<'d> {
        data: &'d [u8],
        bytes_read: std::cell::Cell<u64>,
    }

    impl ByteProvider for CountingProvider<'_> {
        fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), String> {
            self.bytes_read.set(self.bytes_read.get() + buf.len() as u64);
            SliceProvider::new(self.data).read(offset, buf)
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }
    }

    #[test]
    fn test_bitfield_without_container_reads_each_byte_once() {
        let mut interner = StringInterner::new();
        let ast = parse("bitfield F { a : 3; b : 7; c : 6; d : 8; }; F f @ 0;", &mut interner);
        let provider = CountingProvider {
            data: &[0b1111_0101, 0b1010_0110, 0x7E],
            bytes_read: std::cell::Cell::new(0),
        };
        let functions = FunctionRegistry::with_std();
        let mut evaluator = Evaluator::new(&provider, &functions, interner);
        let patterns = evaluator.evaluate(&ast).unwrap();

        assert_eq!(provider.bytes_read.get(), 3);
        assert_eq!(patterns[0].size, 3);
        let values: Vec<u128> = patterns[0]
            .children()
            .iter()
            .map(|c| match c.kind {
                PatternKind::BitfieldField { value, .. } => value,
                _ => panic!("not a field"),
            })
            .collect();
        assert_eq!(values, vec![0b101, 0b101_1110, 0b10_1001, 0x7E]);
    }

    #[test]
    fn test_bitfield_with_container_reads_once() {
        let source = "bitfield F : u16 { lo : 4; padding : 4; hi : 8; }; be F f @ 0;";
        let patterns = eval_pattern(source, &[0x12, 0x34]);
        let f = &patterns[0];
        assert_eq!(f.size, 2);
        assert_eq!(f.children().len(), 2);
        match f.children()[1].kind {
            PatternKind::BitfieldField { bit_offset, value, .. } => {
                assert_eq!(bit_offset, 8);
                assert_eq!(value, 0x12);
            }
            _ => panic!("not a field"),
        }
    }

    #[test]
    fn test_static_and_dynamic_arrays() {
        let source = "struct P { u8 x; }; u16 a[2] @ 0; P ps[2] @ 0;";
        let patterns = eval_pattern(source, &[1, 0, 2, 0]);
        assert!(matches!(patterns[0].kind, PatternKind::ArrayStatic { count: 2, .. }));
        assert_eq!(patterns[0].type_name, "u16[2]");
        assert_eq!(patterns[1].children().len(), 2);
        assert_eq!(patterns[1].children()[1].name, "[1]");
    }

    #[test]
    fn test_unsized_char_array_stops_at_nul() {
        let patterns = eval_pattern("char s[] @ 0;", b"hi\0rest");
        assert_eq!(patterns[0].size, 3);
        assert_eq!(patterns[0].kind, PatternKind::String("hi".into()));
    }

    #[test]
    fn test_while_array() {
        let source = "u8 bytes[while(std::mem::read_unsigned($, 1) != 0xFF)] @ 0;";
        let patterns = eval_pattern(source, &[1, 2, 3, 0xFF]);
        assert_eq!(patterns[0].size, 3);
    }

    #[test]
    fn test_zero_sized_members() {
        let patterns = eval_pattern("struct E {}; struct S { E e[5]; }; S s @ 0;", &[]);
        assert_eq!(patterns[0].size, 0);
        assert_eq!(patterns[0].children()[0].children().len(), 5);
    }

    #[test]
    fn test_placement_past_end_is_error() {
        let err = eval_err("u32 x @ 0;", &[]);
        assert!(err.message.contains("outside of the data"), "{}", err.message);
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn test_no_unique_address_and_at_members() {
        let source = r#"
            struct S {
                u16 whole [[no_unique_address]];
                u8 lo;
                u8 hi;
                u8 tail @ 0x03;
            };
            S s @ 0;
        "#;
        let patterns = eval_pattern(source, &[0x34, 0x12, 0, 0x99]);
        let s = &patterns[0];
        assert_eq!(s.size, 2);
        assert_eq!(s.children()[0].offset, 0);
        assert_eq!(s.children()[1].offset, 0);
        assert_eq!(s.children()[3].kind, PatternKind::Unsigned(0x99));
    }

    #[test]
    fn test_this_and_parent() {
        let source = r#"
            struct Inner { u8 data[parent.count]; };
            struct Outer { u8 count; Inner inner; u8 copy = this.count; };
            Outer o @ 0;
        "#;
        let patterns = eval_pattern(source, &[2, 0xAA, 0xBB]);
        let inner = &patterns[0].children()[1];
        assert_eq!(inner.size, 2);
    }

    #[test]
    fn test_struct_inheritance() {
        let source = "struct A { u8 a; }; struct B : A { u8 b; }; B x @ 0;";
        let patterns = eval_pattern(source, &[1, 2]);
        let names: Vec<&str> = patterns[0].children().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_function_call_and_print() {
        let source = r#"
            fn twice(u32 x) { return x * 2; };
            std::print("value: {}", twice(21));
        "#;
        let (_, console) = run(source, &[]).unwrap();
        assert_eq!(console.entries()[0].message, "value: 42");
    }

    #[test]
    fn test_division_by_zero_is_error() {
        let err = eval_err("u32 x = 1 / 0;", &[]);
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn test_invalid_shift_is_error() {
        let err = eval_err("u32 x = 1 << 200;", &[]);
        assert!(err.message.contains("shift"));
    }

    #[test]
    fn test_mixed_sign_promotion() {
        let source = "s32 a = -2; u32 b = 3; s32 c = a + b; std::print(\"{}\", c);";
        let (_, console) = run(source, &[]).unwrap();
        assert_eq!(console.entries()[0].message, "1");
    }

    #[test]
    fn test_mixed_sign_out_of_range_warns() {
        let source = "u128 big = 0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF; s8 one = 1; u128 r = big - one;";
        let (_, console) = run(source, &[]).unwrap();
        assert_eq!(console.entries().len(), 1);
        assert_eq!(console.entries()[0].level, console::Level::Warning);
    }

    #[test]
    fn test_cast_wraps() {
        let source = "u8 x = u8(0x1FF); s8 y = s8(0xFF); std::print(\"{} {}\", x, y);";
        let (_, console) = run(source, &[]).unwrap();
        assert_eq!(console.entries()[0].message, "255 -1");
    }

    #[test]
    fn test_sizeof_and_addressof() {
        let source = r#"
            struct H { u8 a; u16 b; };
            H h @ 1;
            std::print("{} {} {} {}", sizeof(h), addressof(h.b), sizeof(H), sizeof(u64));
        "#;
        let (_, console) = run(source, &[0; 4]).unwrap();
        assert_eq!(console.entries()[0].message, "3 2 3 8");
    }

    #[test]
    fn test_loop_limit() {
        let mut interner = StringInterner::new();
        let ast = parse("u32 i = 0; while (true) { i += 1; }", &mut interner);
        let provider = SliceProvider::new(&[]);
        let functions = FunctionRegistry::with_std();
        let mut evaluator = Evaluator::new(&provider, &functions, interner);
        evaluator.set_limits(Limits {
            loops: 10,
            ..Limits::default()
        });
        let err = evaluator.evaluate(&ast).unwrap_err();
        assert!(err.message.contains("loop"), "{}", err.message);
    }

    #[test]
    fn test_array_limit() {
        let err = eval_err("u8 x[0x2000] @ 0;", &[0; 16]);
        assert!(err.message.contains("array limit"), "{}", err.message);
    }

    #[test]
    fn test_cancellation() {
        let mut interner = StringInterner::new();
        let ast = parse("u8 x @ 0;", &mut interner);
        let provider = SliceProvider::new(&[1]);
        let functions = FunctionRegistry::with_std();
        let mut evaluator = Evaluator::new(&provider, &functions, interner);
        let token = Arc::new(AtomicBool::new(true));
        evaluator.set_cancellation_token(token);
        let err = evaluator.evaluate(&ast).unwrap_err();
        assert!(err.interrupted);
    }

    #[test]
    fn test_namespaces() {
        let source = r#"
            namespace fmt {
                struct Header { u8 magic; };
                fn magic_ok(u8 m) { return m == 0x7F; };
            }
            fmt::Header h @ 0;
            std::assert(fmt::magic_ok(h.magic), "bad magic");
        "#;
        let patterns = eval_pattern(source, &[0x7F]);
        assert_eq!(patterns[0].type_name, "fmt::Header");
    }

    #[test]
    fn test_assert_failure_aborts() {
        let err = eval_err("std::assert(1 == 2, \"nope\");", &[]);
        assert_eq!(err.message, "nope");
    }

    #[test]
    fn test_main_and_out_variables() {
        let mut interner = StringInterner::new();
        let ast = parse("u32 total out; fn main() { total = 5; return 7; };", &mut interner);
        let provider = SliceProvider::new(&[]);
        let functions = FunctionRegistry::with_std();
        let mut evaluator = Evaluator::new(&provider, &functions, interner);
        evaluator.evaluate(&ast).unwrap();
        assert_eq!(evaluator.main_result(), Some(&Value::Unsigned(7)));
        assert_eq!(
            evaluator.out_variables(),
            vec![("total".to_string(), Value::Unsigned(5))]
        );
    }

    #[test]
    fn test_in_variables() {
        let mut interner = StringInterner::new();
        let ast = parse("u8 count in; u8 data[count] @ 0;", &mut interner);
        let provider = SliceProvider::new(&[1, 2, 3]);
        let functions = FunctionRegistry::with_std();
        let mut evaluator = Evaluator::new(&provider, &functions, interner);
        let mut inputs = FxHashMap::default();
        inputs.insert("count".to_string(), Value::Unsigned(2));
        evaluator.set_in_variables(inputs);
        let patterns = evaluator.evaluate(&ast).unwrap();
        assert_eq!(patterns[0].size, 2);
    }

    #[test]
    fn test_missing_in_variable_is_error() {
        let err = eval_err("u8 count in;", &[]);
        assert!(err.message.contains("count"));
    }

    #[test]
    fn test_parameter_pack() {
        let source = r#"
            fn sum(auto ... rest) { return std::format("{}-{}", rest); };
            std::print(sum(1, 2));
        "#;
        let (_, console) = run(source, &[]).unwrap();
        assert_eq!(console.entries()[0].message, "1-2");
    }

    #[test]
    fn test_palette_colors_and_color_attribute() {
        let source = "u8 a @ 0; u8 b @ 1 [[color(\"FF0000\")]]; u8 c @ 2;";
        let patterns = eval_pattern(source, &[0; 3]);
        assert_eq!(patterns[0].color, PALETTE[0]);
        assert_eq!(patterns[1].color, 0xFF0000FF);
        assert_eq!(patterns[2].color, PALETTE[2]);
    }

    #[test]
    fn test_base_address_offsets_are_logical() {
        let mut interner = StringInterner::new();
        let ast = parse("u8 x @ 0x1001; u32 here = $;", &mut interner);
        let data = [0x10, 0x20];
        let provider = SliceProvider::new(&data).with_base_address(0x1000);
        let functions = FunctionRegistry::with_std();
        let mut evaluator = Evaluator::new(&provider, &functions, interner);
        let patterns = evaluator.evaluate(&ast).unwrap();
        assert_eq!(patterns[0].offset, 0x1001);
        assert_eq!(patterns[0].kind, PatternKind::Unsigned(0x20));
    }

    #[test]
    fn test_error_undefined_identifier() {
        let err = eval_err("u32 x = y + 1;", &[]);
        assert!(err.message.contains("'y'"));
    }

    #[test]
    fn test_error_unknown_type() {
        let err = eval_err("Missing m @ 0;", &[0; 4]);
        assert!(err.message.contains("Missing"));
    }

    #[test]
    fn test_for_loop_with_break() {
        let source = r#"
            u32 total = 0;
            for (u32 i = 0, i < 10, i += 1) {
                if (i == 4) { break; }
                total += i;
            }
            std::print("{}", total);
        "#;
        let (_, console) = run(source, &[]).unwrap();
        assert_eq!(console.entries()[0].message, "6");
    }
}
