// AST node definitions for the pattern language

use crate::name::Name;
use crate::span::Span;

/// Top-level AST: a list of statements
#[derive(Debug, Clone)]
pub struct Ast {
    pub stmts: Vec<Stmt>,
}

/// A statement with source span
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn line(&self) -> u32 {
        self.span.line
    }
}

// --- Boxed data structs for large StmtKind variants ---

/// `[attrs] Type name[dims] [in|out] [@ offset] [= init] [attrs];`
///
/// Anonymous placements (`Header @ 0x00;`) and `padding[N];` have no name.
#[derive(Debug, Clone)]
pub struct VarDeclData {
    pub ty: TypeExpr,
    pub name: Option<Name>,
    pub placement: Option<Expr>,
    pub init: Option<Expr>,
    pub direction: Option<VarDirection>,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct StructDefData {
    pub name: Name,
    pub parents: Vec<Vec<Name>>,
    pub body: Vec<Stmt>,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct UnionDefData {
    pub name: Name,
    pub body: Vec<Stmt>,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct EnumDefData {
    pub name: Name,
    pub underlying: TypeExpr,
    pub members: Vec<EnumMember>,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct BitfieldDefData {
    pub name: Name,
    /// Declared container type: `bitfield Flags : u16 { ... }`
    pub container: Option<TypeExpr>,
    pub body: Vec<Stmt>,
    pub attrs: Vec<Attribute>,
}

/// `name : width;` inside a bitfield body. `padding : width;` has no name.
#[derive(Debug, Clone)]
pub struct BitfieldFieldData {
    pub name: Option<Name>,
    pub width: Expr,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct FnDefData {
    pub name: Name,
    pub params: Vec<Param>,
    /// Trailing parameter pack: `auto ... rest`
    pub pack: Option<Name>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct TypeAliasData {
    pub name: Name,
    pub ty: Option<TypeExpr>,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct NamespaceData {
    pub path: Vec<Name>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct IfData {
    pub cond: Expr,
    pub then_body: Vec<Stmt>,
    pub else_body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct WhileData {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct ForData {
    pub init: Vec<Stmt>,
    pub cond: Expr,
    pub step: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Variable declaration or placement. Whether it produces a pattern or a
    /// plain variable is decided by the evaluator from context.
    VarDecl(Box<VarDeclData>),

    StructDef(Box<StructDefData>),
    UnionDef(Box<UnionDefData>),
    EnumDef(Box<EnumDefData>),
    BitfieldDef(Box<BitfieldDefData>),
    BitfieldField(Box<BitfieldFieldData>),
    FnDef(Box<FnDefData>),

    /// `using Name = Type;` or forward declaration `using Name;`
    TypeAlias(Box<TypeAliasData>),

    Namespace(Box<NamespaceData>),

    If(Box<IfData>),
    While(Box<WhileData>),
    For(Box<ForData>),
    Break,
    Continue,
    Return(Option<Expr>),

    /// Expression statement
    Expr(Expr),
}

/// Expression with source span
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLiteral(u128),
    FloatLiteral(f64),
    StringLiteral(String),
    CharLiteral(char),
    BoolLiteral(bool),

    Ident(Name),
    /// Scoped identifier: `Foo::Bar::Baz`
    Scoped(Vec<Name>),

    /// Current offset: `$`
    Dollar,
    This,
    Parent,

    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },

    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },

    /// Builtin-type cast: `u8(x)`, `be u32(x)`
    Cast {
        ty: Box<TypeExpr>,
        expr: Box<Expr>,
    },

    Sizeof(Box<SizeofArg>),
    Addressof(Box<Expr>),

    /// Function call by (possibly qualified) name
    Call {
        func: Vec<Name>,
        args: Vec<Expr>,
    },

    Member {
        expr: Box<Expr>,
        member: Name,
    },

    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
    },

    Assign {
        op: AssignOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    LogAnd,
    LogOr,
    LogXor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
            BinOp::LogXor => "^^",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    BitAndAssign,
    BitOrAssign,
    BitXorAssign,
    ShlAssign,
    ShrAssign,
}

impl AssignOp {
    /// Binary operator a compound assignment applies before storing
    pub fn binary_op(self) -> Option<BinOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::AddAssign => Some(BinOp::Add),
            AssignOp::SubAssign => Some(BinOp::Sub),
            AssignOp::MulAssign => Some(BinOp::Mul),
            AssignOp::DivAssign => Some(BinOp::Div),
            AssignOp::ModAssign => Some(BinOp::Mod),
            AssignOp::BitAndAssign => Some(BinOp::BitAnd),
            AssignOp::BitOrAssign => Some(BinOp::BitOr),
            AssignOp::BitXorAssign => Some(BinOp::BitXor),
            AssignOp::ShlAssign => Some(BinOp::Shl),
            AssignOp::ShrAssign => Some(BinOp::Shr),
        }
    }
}

/// Type expression
#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

impl TypeExpr {
    pub fn new(kind: TypeExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone)]
pub enum TypeExprKind {
    Builtin(BuiltinType),

    /// Named type (possibly with namespace path)
    Named(Vec<Name>),

    /// Endian-prefixed type: `le Type` or `be Type`
    Endian(Endianness, Box<TypeExpr>),

    /// Array type: `Type name[size]`, `Type name[while(cond)]`, `Type name[]`
    Array(Box<TypeExpr>, ArraySize),

    /// Pointer: `Pointee *name : SizeType`
    Pointer(Box<TypeExpr>, Box<TypeExpr>),

    /// `padding[N]`
    Padding,

    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    U8,
    U16,
    U32,
    U64,
    U128,
    S8,
    S16,
    S32,
    S64,
    S128,
    Float,
    Double,
    Char,
    Char16,
    Bool,
    Str,
}

impl BuiltinType {
    pub fn from_str(s: &str) -> Option<BuiltinType> {
        match s {
            "u8" => Some(BuiltinType::U8),
            "u16" => Some(BuiltinType::U16),
            "u32" => Some(BuiltinType::U32),
            "u64" => Some(BuiltinType::U64),
            "u128" => Some(BuiltinType::U128),
            "s8" => Some(BuiltinType::S8),
            "s16" => Some(BuiltinType::S16),
            "s32" => Some(BuiltinType::S32),
            "s64" => Some(BuiltinType::S64),
            "s128" => Some(BuiltinType::S128),
            "float" => Some(BuiltinType::Float),
            "double" => Some(BuiltinType::Double),
            "char" => Some(BuiltinType::Char),
            "char16" => Some(BuiltinType::Char16),
            "bool" => Some(BuiltinType::Bool),
            "str" => Some(BuiltinType::Str),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::U8 => "u8",
            BuiltinType::U16 => "u16",
            BuiltinType::U32 => "u32",
            BuiltinType::U64 => "u64",
            BuiltinType::U128 => "u128",
            BuiltinType::S8 => "s8",
            BuiltinType::S16 => "s16",
            BuiltinType::S32 => "s32",
            BuiltinType::S64 => "s64",
            BuiltinType::S128 => "s128",
            BuiltinType::Float => "float",
            BuiltinType::Double => "double",
            BuiltinType::Char => "char",
            BuiltinType::Char16 => "char16",
            BuiltinType::Bool => "bool",
            BuiltinType::Str => "str",
        }
    }

    /// Size in bytes; None for `str`, which has no fixed width
    pub fn size(self) -> Option<u64> {
        match self {
            BuiltinType::U8 | BuiltinType::S8 | BuiltinType::Char | BuiltinType::Bool => Some(1),
            BuiltinType::U16 | BuiltinType::S16 | BuiltinType::Char16 => Some(2),
            BuiltinType::U32 | BuiltinType::S32 | BuiltinType::Float => Some(4),
            BuiltinType::U64 | BuiltinType::S64 | BuiltinType::Double => Some(8),
            BuiltinType::U128 | BuiltinType::S128 => Some(16),
            BuiltinType::Str => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            BuiltinType::S8 | BuiltinType::S16 | BuiltinType::S32 | BuiltinType::S64 | BuiltinType::S128
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            BuiltinType::U8 | BuiltinType::U16 | BuiltinType::U32 | BuiltinType::U64 | BuiltinType::U128
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(self) -> bool {
        matches!(self, BuiltinType::Float | BuiltinType::Double)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

#[derive(Debug, Clone)]
pub enum ArraySize {
    /// `Type name[N]`
    Fixed(Box<Expr>),
    /// `Type name[while(cond)]`
    While(Box<Expr>),
    /// `Type name[]`: runs until a zero element
    Unsized,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: TypeExpr,
    pub name: Name,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarDirection {
    In,
    Out,
}

#[derive(Debug, Clone)]
pub struct EnumMember {
    pub name: Name,
    pub value: Option<Expr>,
    pub span: Span,
}

/// Attribute: `[[name]]` or `[[name("value")]]`
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: Name,
    pub value: Option<String>,
    pub span: Span,
}

/// `sizeof` takes either a type or an expression
#[derive(Debug, Clone)]
pub enum SizeofArg {
    Type(TypeExpr),
    Expr(Expr),
}
