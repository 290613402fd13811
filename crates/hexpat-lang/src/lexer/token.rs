// Token definitions for the pattern language

use crate::name::Name;
use crate::span::Span;

/// A single token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// 1-based source line of the token
    pub fn line(&self) -> u32 {
        self.span.line
    }
}

/// All possible token types in the pattern language
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    IntLiteral(u128),
    FloatLiteral(f64),
    StringLiteral(String),
    WideStringLiteral(String),
    CharLiteral(char),
    WideCharLiteral(char),
    BoolLiteral(bool),

    // Identifier
    Ident(Name),

    // Keywords - declarations
    KwStruct,
    KwUnion,
    KwEnum,
    KwBitfield,
    KwFn,
    KwUsing,
    KwNamespace,

    // Keywords - control flow
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwBreak,
    KwContinue,
    KwReturn,

    // Keywords - variable direction
    KwIn,
    KwOut,

    // Keywords - endianness
    KwLe,
    KwBe,

    // Keywords - expressions
    KwSizeof,
    KwAddressof,
    KwParent,
    KwThis,

    // Keywords - special types
    KwAuto,
    KwPadding,

    // Arithmetic operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Bitwise operators
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,

    // Logical operators
    AmpAmp,
    PipePipe,
    CaretCaret,
    Bang,

    // Comparison
    EqEq,
    BangEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Assignment
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,

    // Punctuation
    Question,
    Colon,
    ColonColon,
    Dot,
    DotDotDot,
    Comma,
    Semicolon,
    At,
    Dollar,

    // Brackets
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::IntLiteral(v) => write!(f, "{}", v),
            TokenKind::FloatLiteral(v) => write!(f, "{}", v),
            TokenKind::StringLiteral(s) => write!(f, "\"{}\"", s),
            TokenKind::WideStringLiteral(s) => write!(f, "L\"{}\"", s),
            TokenKind::CharLiteral(c) => write!(f, "'{}'", c),
            TokenKind::WideCharLiteral(c) => write!(f, "L'{}'", c),
            TokenKind::BoolLiteral(b) => write!(f, "{}", b),
            TokenKind::Ident(_) => write!(f, "identifier"),
            TokenKind::Eof => write!(f, "end of input"),
            other => match other.punct_str().or_else(|| other.keyword_str()) {
                Some(s) => write!(f, "'{}'", s),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

impl TokenKind {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        self.keyword_str().is_some()
    }

    /// Check if this token is one of the (compound) assignment operators
    pub fn is_assign_op(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
                | TokenKind::PercentEq
                | TokenKind::AmpEq
                | TokenKind::PipeEq
                | TokenKind::CaretEq
                | TokenKind::ShlEq
                | TokenKind::ShrEq
        )
    }

    /// Get the keyword token for an identifier string
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        let kw = match s {
            "struct" => TokenKind::KwStruct,
            "union" => TokenKind::KwUnion,
            "enum" => TokenKind::KwEnum,
            "bitfield" => TokenKind::KwBitfield,
            "fn" => TokenKind::KwFn,
            "using" => TokenKind::KwUsing,
            "namespace" => TokenKind::KwNamespace,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "while" => TokenKind::KwWhile,
            "for" => TokenKind::KwFor,
            "break" => TokenKind::KwBreak,
            "continue" => TokenKind::KwContinue,
            "return" => TokenKind::KwReturn,
            "in" => TokenKind::KwIn,
            "out" => TokenKind::KwOut,
            "le" => TokenKind::KwLe,
            "be" => TokenKind::KwBe,
            "sizeof" => TokenKind::KwSizeof,
            "addressof" => TokenKind::KwAddressof,
            "parent" => TokenKind::KwParent,
            "this" => TokenKind::KwThis,
            "auto" => TokenKind::KwAuto,
            "padding" => TokenKind::KwPadding,
            "true" => TokenKind::BoolLiteral(true),
            "false" => TokenKind::BoolLiteral(false),
            _ => return None,
        };
        Some(kw)
    }

    fn keyword_str(&self) -> Option<&'static str> {
        let s = match self {
            TokenKind::KwStruct => "struct",
            TokenKind::KwUnion => "union",
            TokenKind::KwEnum => "enum",
            TokenKind::KwBitfield => "bitfield",
            TokenKind::KwFn => "fn",
            TokenKind::KwUsing => "using",
            TokenKind::KwNamespace => "namespace",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwWhile => "while",
            TokenKind::KwFor => "for",
            TokenKind::KwBreak => "break",
            TokenKind::KwContinue => "continue",
            TokenKind::KwReturn => "return",
            TokenKind::KwIn => "in",
            TokenKind::KwOut => "out",
            TokenKind::KwLe => "le",
            TokenKind::KwBe => "be",
            TokenKind::KwSizeof => "sizeof",
            TokenKind::KwAddressof => "addressof",
            TokenKind::KwParent => "parent",
            TokenKind::KwThis => "this",
            TokenKind::KwAuto => "auto",
            TokenKind::KwPadding => "padding",
            _ => return None,
        };
        Some(s)
    }

    fn punct_str(&self) -> Option<&'static str> {
        let s = match self {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::AmpAmp => "&&",
            TokenKind::PipePipe => "||",
            TokenKind::CaretCaret => "^^",
            TokenKind::Bang => "!",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::Eq => "=",
            TokenKind::PlusEq => "+=",
            TokenKind::MinusEq => "-=",
            TokenKind::StarEq => "*=",
            TokenKind::SlashEq => "/=",
            TokenKind::PercentEq => "%=",
            TokenKind::AmpEq => "&=",
            TokenKind::PipeEq => "|=",
            TokenKind::CaretEq => "^=",
            TokenKind::ShlEq => "<<=",
            TokenKind::ShrEq => ">>=",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::ColonColon => "::",
            TokenKind::Dot => ".",
            TokenKind::DotDotDot => "...",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::At => "@",
            TokenKind::Dollar => "$",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            _ => return None,
        };
        Some(s)
    }
}
