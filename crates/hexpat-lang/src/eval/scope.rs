// Scope stack and definition tables for the evaluator

use rustc_hash::FxHashMap;

use crate::name::Name;
use crate::parser::ast::{
    BitfieldDefData, BuiltinType, EnumDefData, FnDefData, StructDefData, TypeAliasData,
    UnionDefData,
};

use super::pattern::Pattern;
use super::value::Value;

/// A variable in scope
#[derive(Debug, Clone)]
pub struct Variable {
    pub value: Value,
    /// Declared builtin type; assignments are converted to it
    pub ty: Option<BuiltinType>,
}

/// A user-defined type, borrowed from the AST it was declared in
#[derive(Debug, Clone, Copy)]
pub(crate) enum TypeDef<'a> {
    Struct(&'a StructDefData),
    Union(&'a UnionDefData),
    Enum(&'a EnumDefData),
    Bitfield(&'a BitfieldDefData),
    Alias(&'a TypeAliasData),
}

#[derive(Debug, Clone)]
pub(crate) struct TypeEntry<'a> {
    pub def: TypeDef<'a>,
    /// Namespace the type was declared in; names in its body resolve from here
    pub namespace: Vec<Name>,
    /// Qualified name shown as the pattern type name
    pub display: String,
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionEntry<'a> {
    pub def: &'a FnDefData,
    pub namespace: Vec<Name>,
    pub display: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Global,
    /// `if`/`while`/`for` bodies
    Block,
    Function,
    /// Body of a struct, union or bitfield being instantiated
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompositeKind {
    Struct,
    Union,
    Bitfield,
}

/// State of a bitfield being read
#[derive(Debug, Clone, Default)]
pub(crate) struct BitCursor {
    /// Next bit to hand out, relative to the bitfield start
    pub bit: u32,
    /// Container value read once up front, with its width in bits
    pub container: Option<(u128, u32)>,
    /// Without a container: the bytes read so far, extended as fields need them
    pub loaded: Vec<u8>,
}

/// A struct, union or bitfield under construction
#[derive(Debug, Clone)]
pub(crate) struct Composite {
    pub kind: CompositeKind,
    pub type_name: String,
    pub start: u64,
    /// Furthest end reached by a union member
    pub union_end: u64,
    pub bits: Option<BitCursor>,
}

#[derive(Debug)]
pub(crate) struct Frame {
    pub kind: FrameKind,
    pub vars: FxHashMap<Name, Variable>,
    /// Patterns placed in this frame (globals or composite members)
    pub members: Vec<Pattern>,
    pub composite: Option<Composite>,
    /// Parameter pack of a function frame
    pub pack: Option<(Name, Vec<Value>)>,
}

impl Frame {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            vars: FxHashMap::default(),
            members: Vec::new(),
            composite: None,
            pack: None,
        }
    }

    pub fn composite(composite: Composite) -> Self {
        let mut frame = Self::new(FrameKind::Composite);
        frame.composite = Some(composite);
        frame
    }

    fn member(&self, name: &str) -> Option<&Pattern> {
        self.members.iter().rev().find(|p| p.name == name)
    }
}

/// What a name resolved to
pub(crate) enum Binding<'s> {
    Var(&'s Variable),
    Pattern(&'s Pattern),
}

/// Scope chain for variable and pattern resolution.
///
/// Lookups walk from the innermost frame outwards. A function frame hides
/// everything between it and the global frame.
pub(crate) struct Scope<'a> {
    frames: Vec<Frame>,
    pub types: FxHashMap<Name, TypeEntry<'a>>,
    pub functions: FxHashMap<Name, FunctionEntry<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::new(FrameKind::Global)],
            types: FxHashMap::default(),
            functions: FxHashMap::default(),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Pop the innermost frame. The global frame is never popped.
    pub fn pop(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pop frames until only `depth` remain
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth.max(1));
    }

    pub fn global(&self) -> &Frame {
        &self.frames[0]
    }

    pub fn global_mut(&mut self) -> &mut Frame {
        &mut self.frames[0]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Frame indices visible from the top, innermost first
    fn visible(&self) -> impl Iterator<Item = usize> {
        let boundary = self.frames.iter().rposition(|f| f.kind == FrameKind::Function);
        let lower = boundary.unwrap_or(0);
        let top = self.frames.len();
        (lower..top)
            .rev()
            .chain(boundary.filter(|b| *b > 0).map(|_| 0))
    }

    /// Kind of the innermost frame that is not a block
    pub fn context(&self) -> FrameKind {
        self.frames
            .iter()
            .rev()
            .map(|f| f.kind)
            .find(|k| *k != FrameKind::Block)
            .unwrap_or(FrameKind::Global)
    }

    pub fn define_var(&mut self, name: Name, value: Value, ty: Option<BuiltinType>) {
        self.top_mut().vars.insert(name, Variable { value, ty });
    }

    pub fn lookup(&self, name: Name, name_str: &str) -> Option<Binding<'_>> {
        for i in self.visible() {
            let frame = &self.frames[i];
            if let Some(var) = frame.vars.get(&name) {
                return Some(Binding::Var(var));
            }
            if let Some(p) = frame.member(name_str) {
                return Some(Binding::Pattern(p));
            }
        }
        None
    }

    pub fn lookup_var_mut(&mut self, name: Name) -> Option<&mut Variable> {
        let index = self.visible().find(|i| self.frames[*i].vars.contains_key(&name))?;
        self.frames[index].vars.get_mut(&name)
    }

    /// Whether `name` resolves to a placed pattern rather than a variable
    pub fn is_pattern(&self, name: Name, name_str: &str) -> bool {
        matches!(self.lookup(name, name_str), Some(Binding::Pattern(_)))
    }

    /// Index of the `level`-th composite frame from the top (0 = `this`)
    pub fn composite_index(&self, level: usize) -> Option<usize> {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .take_while(|(_, f)| f.kind != FrameKind::Function)
            .filter(|(_, f)| f.kind == FrameKind::Composite)
            .map(|(i, _)| i)
            .nth(level)
    }

    /// Composite frame enclosing the one at `index`, if any
    pub fn enclosing_composite(&self, index: usize) -> Option<usize> {
        self.frames[..index]
            .iter()
            .enumerate()
            .rev()
            .take_while(|(_, f)| f.kind != FrameKind::Function)
            .find(|(_, f)| f.kind == FrameKind::Composite)
            .map(|(i, _)| i)
    }

    pub fn frame(&self, index: usize) -> &Frame {
        &self.frames[index]
    }

    /// Innermost composite under construction
    pub fn current_composite(&self) -> Option<&Composite> {
        self.composite_index(0)
            .and_then(|i| self.frames[i].composite.as_ref())
    }

    pub fn current_composite_mut(&mut self) -> Option<&mut Composite> {
        let index = self.composite_index(0)?;
        self.frames[index].composite.as_mut()
    }

    /// Attach a pattern to the innermost composite, or to the globals
    pub fn push_member(&mut self, pattern: Pattern) {
        let index = self
            .frames
            .iter()
            .rposition(|f| matches!(f.kind, FrameKind::Composite | FrameKind::Global))
            .unwrap_or(0);
        self.frames[index].members.push(pattern);
    }

    /// Parameter pack of the innermost function frame
    pub fn pack(&self) -> Option<&(Name, Vec<Value>)> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.kind == FrameKind::Function)
            .and_then(|f| f.pack.as_ref())
    }

    pub fn set_pack(&mut self, name: Name, values: Vec<Value>) {
        self.top_mut().pack = Some((name, values));
    }

    /// Take the global patterns out of the scope
    pub fn take_globals(&mut self) -> Vec<Pattern> {
        std::mem::take(&mut self.frames[0].members)
    }
}
