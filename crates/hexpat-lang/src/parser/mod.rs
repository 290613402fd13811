// Recursive descent parser for the pattern language

pub mod ast;
mod expr;

use crate::error::ParseError;
use crate::lexer::token::{Token, TokenKind};
use crate::name::{Name, StringInterner};
use crate::span::Span;
use ast::*;

/// Parser that converts a token stream into an AST. The first error aborts.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    /// When true, `name : width;` is parsed as a bitfield field
    in_bitfield: bool,
    interner: &'a mut StringInterner,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, interner: &'a mut StringInterner) -> Self {
        Self {
            tokens,
            pos: 0,
            in_bitfield: false,
            interner,
        }
    }

    /// Parse the entire token stream into an AST
    pub fn parse(mut self) -> Result<Ast, ParseError> {
        let mut stmts = Vec::new();
        while !self.at_eof() {
            // Skip empty statements (trailing semicolons)
            if self.eat(&TokenKind::Semicolon) {
                continue;
            }
            stmts.extend(self.parse_stmt()?);
        }
        Ok(Ast { stmts })
    }

    // ========== Token helpers ==========

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_else(Span::dummy)
    }

    fn peek_ahead(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Span of the most recently consumed token
    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|p| self.tokens.get(p))
            .map(|t| t.span)
            .unwrap_or_else(Span::dummy)
    }

    fn advance(&mut self) -> Token {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, self.peek_span()));
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn unexpected(&self, expected: impl Into<String>) -> ParseError {
        ParseError::expected(
            format!("unexpected token {}", self.peek()),
            expected,
            self.peek_span(),
        )
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<Token, ParseError> {
        if self.check(expected) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected.to_string()))
        }
    }

    fn expect_ident(&mut self) -> Result<(Name, Span), ParseError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                let span = self.peek_span();
                self.advance();
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_semicolon(&mut self) -> Result<(), ParseError> {
        self.expect(&TokenKind::Semicolon)?;
        Ok(())
    }

    /// Accept either comma or semicolon as separator (for `for` statement)
    fn expect_comma_or_semicolon(&mut self) -> Result<(), ParseError> {
        if matches!(self.peek(), TokenKind::Comma | TokenKind::Semicolon) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected("';' or ','"))
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    /// Check if current position is at `[[` (attribute open)
    fn check_lattr(&self) -> bool {
        matches!(self.peek(), TokenKind::LBracket)
            && matches!(self.peek_ahead(1), TokenKind::LBracket)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_builtin_name(&self, name: Name) -> bool {
        BuiltinType::from_str(self.interner.resolve(name)).is_some()
    }

    // ========== Statements ==========

    fn parse_stmt(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let attrs = self.parse_attributes()?;
        let start = self.peek_span();

        if self.in_bitfield && self.looks_like_bitfield_field() {
            return self.parse_bitfield_field(attrs).map(|s| vec![s]);
        }

        match self.peek() {
            TokenKind::KwStruct => self.parse_struct_def(attrs).map(|s| vec![s]),
            TokenKind::KwUnion => self.parse_union_def(attrs).map(|s| vec![s]),
            TokenKind::KwEnum => self.parse_enum_def(attrs).map(|s| vec![s]),
            TokenKind::KwBitfield => self.parse_bitfield_def(attrs).map(|s| vec![s]),
            TokenKind::KwFn => self.parse_fn_def().map(|s| vec![s]),
            TokenKind::KwNamespace => self.parse_namespace().map(|s| vec![s]),
            TokenKind::KwUsing => self.parse_using_stmt(attrs).map(|s| vec![s]),
            TokenKind::KwIf => self.parse_if_stmt().map(|s| vec![s]),
            TokenKind::KwWhile => self.parse_while_stmt().map(|s| vec![s]),
            TokenKind::KwFor => self.parse_for_stmt().map(|s| vec![s]),
            TokenKind::KwBreak => {
                self.advance();
                self.expect_semicolon()?;
                Ok(vec![Stmt {
                    kind: StmtKind::Break,
                    span: start,
                }])
            }
            TokenKind::KwContinue => {
                self.advance();
                self.expect_semicolon()?;
                Ok(vec![Stmt {
                    kind: StmtKind::Continue,
                    span: start,
                }])
            }
            TokenKind::KwReturn => self.parse_return_stmt().map(|s| vec![s]),
            _ if self.looks_like_decl() => {
                let stmts = self.parse_decl(attrs, false)?;
                self.expect_semicolon()?;
                Ok(stmts)
            }
            _ => {
                if let Some(attr) = attrs.first() {
                    return Err(ParseError::new(
                        "attributes are only allowed on declarations",
                        attr.span,
                    ));
                }
                let expr = self.parse_expr()?;
                self.expect_semicolon()?;
                Ok(vec![Stmt {
                    span: start.merge(expr.span),
                    kind: StmtKind::Expr(expr),
                }])
            }
        }
    }

    /// `{ stmts }` with the bitfield-field mode set for the duration of the block
    fn parse_braced_body(&mut self, in_bitfield: bool) -> Result<(Vec<Stmt>, Span), ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let saved = std::mem::replace(&mut self.in_bitfield, in_bitfield);
        let mut stmts = Vec::new();
        let result = loop {
            if self.check(&TokenKind::RBrace) || self.at_eof() {
                break Ok(());
            }
            if self.eat(&TokenKind::Semicolon) {
                continue;
            }
            match self.parse_stmt() {
                Ok(parsed) => stmts.extend(parsed),
                Err(e) => break Err(e),
            }
        };
        self.in_bitfield = saved;
        result?;
        let end = self.expect(&TokenKind::RBrace)?;
        Ok((stmts, end.span))
    }

    /// Body of if/else/while/for: a braced block or a single statement
    fn parse_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.check(&TokenKind::LBrace) {
            let in_bitfield = self.in_bitfield;
            Ok(self.parse_braced_body(in_bitfield)?.0)
        } else {
            self.parse_stmt()
        }
    }

    // ========== Attributes ==========

    fn parse_attributes(&mut self) -> Result<Vec<Attribute>, ParseError> {
        let mut attrs = Vec::new();
        while self.check_lattr() {
            self.advance(); // consume first [
            self.advance(); // consume second [

            loop {
                let (name, start) = self.expect_ident().map_err(|e| {
                    ParseError::expected("malformed attribute", "attribute name", e.span)
                })?;
                let value = if self.eat(&TokenKind::LParen) {
                    let value = match self.peek().clone() {
                        TokenKind::StringLiteral(s) | TokenKind::WideStringLiteral(s) => s,
                        TokenKind::IntLiteral(v) => v.to_string(),
                        _ => {
                            return Err(ParseError::expected(
                                "malformed attribute",
                                "string argument",
                                self.peek_span(),
                            ));
                        }
                    };
                    self.advance();
                    self.expect(&TokenKind::RParen)?;
                    Some(value)
                } else {
                    None
                };

                attrs.push(Attribute {
                    name,
                    value,
                    span: start.merge(self.prev_span()),
                });

                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }

            if !(self.eat(&TokenKind::RBracket) && self.eat(&TokenKind::RBracket)) {
                return Err(ParseError::expected(
                    "malformed attribute",
                    "']]'",
                    self.peek_span(),
                ));
            }
        }
        Ok(attrs)
    }

    /// Parse post-definition attributes and merge with pre-definition attrs.
    fn parse_and_merge_attrs(&mut self, mut pre: Vec<Attribute>) -> Result<Vec<Attribute>, ParseError> {
        let post = self.parse_attributes()?;
        pre.extend(post);
        Ok(pre)
    }

    // ========== Types ==========

    fn parse_type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let start = self.peek_span();
        let endianness = match self.peek() {
            TokenKind::KwLe => Some(Endianness::Little),
            TokenKind::KwBe => Some(Endianness::Big),
            _ => None,
        };
        if endianness.is_some() {
            self.advance();
        }

        let ty = self.parse_base_type()?;
        Ok(match endianness {
            Some(endian) => {
                let span = start.merge(ty.span);
                TypeExpr::new(TypeExprKind::Endian(endian, Box::new(ty)), span)
            }
            None => ty,
        })
    }

    fn parse_base_type(&mut self) -> Result<TypeExpr, ParseError> {
        let start = self.peek_span();
        match self.peek().clone() {
            TokenKind::KwAuto => {
                self.advance();
                Ok(TypeExpr::new(TypeExprKind::Auto, start))
            }
            TokenKind::KwPadding => {
                self.advance();
                Ok(TypeExpr::new(TypeExprKind::Padding, start))
            }
            TokenKind::Ident(name) => {
                if let Some(builtin) = BuiltinType::from_str(self.interner.resolve(name)) {
                    self.advance();
                    return Ok(TypeExpr::new(TypeExprKind::Builtin(builtin), start));
                }
                let path = self.parse_path()?;
                Ok(TypeExpr::new(
                    TypeExprKind::Named(path),
                    start.merge(self.prev_span()),
                ))
            }
            _ => Err(self.unexpected("type")),
        }
    }

    /// `a::b::c`
    fn parse_path(&mut self) -> Result<Vec<Name>, ParseError> {
        let mut path = vec![self.expect_ident()?.0];
        while self.eat(&TokenKind::ColonColon) {
            path.push(self.expect_ident()?.0);
        }
        Ok(path)
    }

    /// Parse array dimensions after a declarator name: `[N]`, `[while(cond)]`, `[]`.
    /// `T m[2][3]` is two arrays of three.
    fn parse_array_dims(&mut self, ty: TypeExpr) -> Result<TypeExpr, ParseError> {
        let mut sizes = Vec::new();
        while matches!(self.peek(), TokenKind::LBracket) && !self.check_lattr() {
            self.advance();
            let size = if matches!(self.peek(), TokenKind::RBracket) {
                ArraySize::Unsized
            } else if self.eat(&TokenKind::KwWhile) {
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                ArraySize::While(Box::new(cond))
            } else {
                ArraySize::Fixed(Box::new(self.parse_expr()?))
            };
            let end = self.expect(&TokenKind::RBracket)?;
            sizes.push((size, end.span));
        }

        let start = ty.span;
        Ok(sizes.into_iter().rev().fold(ty, |inner, (size, end)| {
            TypeExpr::new(TypeExprKind::Array(Box::new(inner), size), start.merge(end))
        }))
    }

    // ========== Declarations ==========

    /// Heuristic to detect variable declarations: a type followed by a name,
    /// a pointer declarator or an anonymous placement.
    fn looks_like_decl(&self) -> bool {
        match *self.peek() {
            TokenKind::KwLe | TokenKind::KwBe | TokenKind::KwAuto | TokenKind::KwPadding => true,
            TokenKind::Ident(name) => {
                let mut i = 1;
                if !self.is_builtin_name(name) {
                    while matches!(self.peek_ahead(i), TokenKind::ColonColon)
                        && matches!(self.peek_ahead(i + 1), TokenKind::Ident(_))
                    {
                        i += 2;
                    }
                }
                match self.peek_ahead(i) {
                    TokenKind::Ident(_) | TokenKind::At => true,
                    // `T *name : SizeType` (anything else is a multiplication)
                    TokenKind::Star => {
                        matches!(self.peek_ahead(i + 1), TokenKind::Ident(_))
                            && matches!(self.peek_ahead(i + 2), TokenKind::Colon)
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Parse a declaration without its terminating semicolon. `single` stops
    /// after one declarator (for-loop headers use `,` as a separator).
    fn parse_decl(&mut self, attrs: Vec<Attribute>, single: bool) -> Result<Vec<Stmt>, ParseError> {
        let start = self.peek_span();
        let base = self.parse_type_expr()?;

        if matches!(base.kind, TypeExprKind::Padding) {
            self.expect(&TokenKind::LBracket)?;
            let size = self.parse_expr()?;
            let end = self.expect(&TokenKind::RBracket)?;
            let attrs = self.parse_and_merge_attrs(attrs)?;
            let ty = TypeExpr::new(
                TypeExprKind::Array(Box::new(base), ArraySize::Fixed(Box::new(size))),
                start.merge(end.span),
            );
            return Ok(vec![Stmt {
                kind: StmtKind::VarDecl(Box::new(VarDeclData {
                    ty,
                    name: None,
                    placement: None,
                    init: None,
                    direction: None,
                    attrs,
                })),
                span: start.merge(end.span),
            }]);
        }

        let mut stmts = Vec::new();
        loop {
            let decl_start = if stmts.is_empty() { start } else { self.peek_span() };
            let is_pointer = self.eat(&TokenKind::Star);

            // Anonymous placement: `Type @ expr;`
            let name = if !is_pointer && matches!(self.peek(), TokenKind::At | TokenKind::Semicolon) {
                None
            } else {
                Some(self.expect_ident()?.0)
            };

            let mut ty = self.parse_array_dims(base.clone())?;
            if is_pointer {
                self.expect(&TokenKind::Colon)?;
                let size_ty = self.parse_type_expr()?;
                let span = ty.span.merge(size_ty.span);
                ty = TypeExpr::new(TypeExprKind::Pointer(Box::new(ty), Box::new(size_ty)), span);
            }

            let direction = match self.peek() {
                TokenKind::KwIn => Some(VarDirection::In),
                TokenKind::KwOut => Some(VarDirection::Out),
                _ => None,
            };
            if direction.is_some() {
                self.advance();
            }

            let placement = if self.eat(&TokenKind::At) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            let init = if self.eat(&TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };

            let attrs = self.parse_and_merge_attrs(attrs.clone())?;
            stmts.push(Stmt {
                kind: StmtKind::VarDecl(Box::new(VarDeclData {
                    ty,
                    name,
                    placement,
                    init,
                    direction,
                    attrs,
                })),
                span: decl_start.merge(self.prev_span()),
            });

            if single || name.is_none() || !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(stmts)
    }

    // ========== Type definitions ==========

    fn parse_struct_def(&mut self, attrs: Vec<Attribute>) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwStruct)?;
        let (name, _) = self.expect_ident()?;

        // Optional inheritance: `: Parent, ns::Other`
        let mut parents = Vec::new();
        if self.eat(&TokenKind::Colon) {
            loop {
                parents.push(self.parse_path()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let (body, end) = self.parse_braced_body(false)?;
        let attrs = self.parse_and_merge_attrs(attrs)?;
        self.eat(&TokenKind::Semicolon);

        Ok(Stmt {
            kind: StmtKind::StructDef(Box::new(StructDefData {
                name,
                parents,
                body,
                attrs,
            })),
            span: start.merge(end),
        })
    }

    fn parse_union_def(&mut self, attrs: Vec<Attribute>) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwUnion)?;
        let (name, _) = self.expect_ident()?;

        let (body, end) = self.parse_braced_body(false)?;
        let attrs = self.parse_and_merge_attrs(attrs)?;
        self.eat(&TokenKind::Semicolon);

        Ok(Stmt {
            kind: StmtKind::UnionDef(Box::new(UnionDefData { name, body, attrs })),
            span: start.merge(end),
        })
    }

    fn parse_enum_def(&mut self, attrs: Vec<Attribute>) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwEnum)?;
        let (name, _) = self.expect_ident()?;

        // Underlying type: `: u8`
        self.expect(&TokenKind::Colon)?;
        let underlying = self.parse_type_expr()?;

        self.expect(&TokenKind::LBrace)?;
        let mut members = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            let (member_name, member_span) = self.expect_ident()?;
            let value = if self.eat(&TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            members.push(EnumMember {
                name: member_name,
                value,
                span: member_span,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.expect(&TokenKind::RBrace)?;

        let attrs = self.parse_and_merge_attrs(attrs)?;
        self.eat(&TokenKind::Semicolon);

        Ok(Stmt {
            kind: StmtKind::EnumDef(Box::new(EnumDefData {
                name,
                underlying,
                members,
                attrs,
            })),
            span: start.merge(end.span),
        })
    }

    fn parse_bitfield_def(&mut self, attrs: Vec<Attribute>) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwBitfield)?;
        let (name, _) = self.expect_ident()?;

        let container = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        let (body, end) = self.parse_braced_body(true)?;
        let attrs = self.parse_and_merge_attrs(attrs)?;
        self.eat(&TokenKind::Semicolon);

        Ok(Stmt {
            kind: StmtKind::BitfieldDef(Box::new(BitfieldDefData {
                name,
                container,
                body,
                attrs,
            })),
            span: start.merge(end),
        })
    }

    /// `name : width;` or `padding : width;`
    fn looks_like_bitfield_field(&self) -> bool {
        matches!(self.peek(), TokenKind::Ident(_) | TokenKind::KwPadding)
            && matches!(self.peek_ahead(1), TokenKind::Colon)
    }

    fn parse_bitfield_field(&mut self, attrs: Vec<Attribute>) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        let name = match self.advance().kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        };
        self.expect(&TokenKind::Colon)?;
        let width = self.parse_expr()?;
        let attrs = self.parse_and_merge_attrs(attrs)?;
        self.expect_semicolon()?;
        Ok(Stmt {
            kind: StmtKind::BitfieldField(Box::new(BitfieldFieldData { name, width, attrs })),
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_fn_def(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwFn)?;
        let (name, _) = self.expect_ident()?;

        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut pack = None;
        while !self.check(&TokenKind::RParen) && !self.at_eof() {
            let param_start = self.peek_span();
            let ty = self.parse_type_expr()?;
            // Parameter pack: `auto ... rest`, always last
            if self.eat(&TokenKind::DotDotDot) {
                pack = Some(self.expect_ident()?.0);
                break;
            }
            let (param_name, _) = self.expect_ident()?;
            params.push(Param {
                ty,
                name: param_name,
                span: param_start.merge(self.prev_span()),
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;

        let (body, end) = self.parse_braced_body(false)?;
        self.eat(&TokenKind::Semicolon);

        Ok(Stmt {
            kind: StmtKind::FnDef(Box::new(FnDefData {
                name,
                params,
                pack,
                body,
            })),
            span: start.merge(end),
        })
    }

    fn parse_namespace(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwNamespace)?;
        let path = self.parse_path()?;
        let (body, end) = self.parse_braced_body(false)?;
        self.eat(&TokenKind::Semicolon);

        Ok(Stmt {
            kind: StmtKind::Namespace(Box::new(NamespaceData { path, body })),
            span: start.merge(end),
        })
    }

    fn parse_using_stmt(&mut self, attrs: Vec<Attribute>) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwUsing)?;
        let (name, _) = self.expect_ident()?;

        // Forward declaration: `using Name;`
        let ty = if self.eat(&TokenKind::Eq) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let attrs = self.parse_and_merge_attrs(attrs)?;
        self.expect_semicolon()?;

        Ok(Stmt {
            kind: StmtKind::TypeAlias(Box::new(TypeAliasData { name, ty, attrs })),
            span: start.merge(self.prev_span()),
        })
    }

    // ========== Control flow ==========

    fn parse_if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwIf)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;

        let then_body = self.parse_body()?;
        let else_body = if self.eat(&TokenKind::KwElse) {
            self.parse_body()?
        } else {
            Vec::new()
        };

        Ok(Stmt {
            kind: StmtKind::If(Box::new(IfData {
                cond,
                then_body,
                else_body,
            })),
            span: start,
        })
    }

    fn parse_while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwWhile)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_body()?;

        Ok(Stmt {
            kind: StmtKind::While(Box::new(WhileData { cond, body })),
            span: start,
        })
    }

    fn parse_for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwFor)?;
        self.expect(&TokenKind::LParen)?;

        let init = if self.looks_like_decl() {
            self.parse_decl(Vec::new(), true)?
        } else {
            let expr = self.parse_expr()?;
            vec![Stmt {
                span: expr.span,
                kind: StmtKind::Expr(expr),
            }]
        };
        self.expect_comma_or_semicolon()?;

        let cond = self.parse_expr()?;
        self.expect_comma_or_semicolon()?;

        let step = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;

        let body = self.parse_body()?;

        Ok(Stmt {
            kind: StmtKind::For(Box::new(ForData {
                init,
                cond,
                step,
                body,
            })),
            span: start,
        })
    }

    fn parse_return_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek_span();
        self.expect(&TokenKind::KwReturn)?;
        let value = if !self.check(&TokenKind::Semicolon) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_semicolon()?;
        Ok(Stmt {
            kind: StmtKind::Return(value),
            span: start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_with_interner(input: &str) -> (Ast, StringInterner) {
        let mut interner = StringInterner::new();
        let tokens = Lexer::new(input, &mut interner)
            .tokenize()
            .expect("lex failed");
        let ast = Parser::new(tokens, &mut interner)
            .parse()
            .expect("parse failed");
        (ast, interner)
    }

    fn parse(input: &str) -> Ast {
        parse_with_interner(input).0
    }

    fn parse_err(input: &str) -> ParseError {
        let mut interner = StringInterner::new();
        let tokens = Lexer::new(input, &mut interner)
            .tokenize()
            .expect("lex failed");
        Parser::new(tokens, &mut interner)
            .parse()
            .expect_err("expected a parse error")
    }

    fn var_decl(stmt: &Stmt) -> &VarDeclData {
        match &stmt.kind {
            StmtKind::VarDecl(d) => d,
            other => panic!("expected VarDecl, got {:?}", other),
        }
    }

    // ========== Declarations ==========

    #[test]
    fn test_placement() {
        let (ast, interner) = parse_with_interner("u32 value @ 0x00;");
        assert_eq!(ast.stmts.len(), 1);
        let d = var_decl(&ast.stmts[0]);
        assert_eq!(interner.resolve(d.name.unwrap()), "value");
        assert!(matches!(d.ty.kind, TypeExprKind::Builtin(BuiltinType::U32)));
        assert!(matches!(
            d.placement.as_ref().map(|e| &e.kind),
            Some(ExprKind::IntLiteral(0))
        ));
    }

    #[test]
    fn test_endian_prefix() {
        let ast = parse("be u32 value @ 0x00;");
        let d = var_decl(&ast.stmts[0]);
        match &d.ty.kind {
            TypeExprKind::Endian(Endianness::Big, inner) => {
                assert!(matches!(inner.kind, TypeExprKind::Builtin(BuiltinType::U32)));
            }
            other => panic!("expected endian type, got {:?}", other),
        }
    }

    #[test]
    fn test_local_var_with_init() {
        let ast = parse("u32 x = 1 + 2;");
        let d = var_decl(&ast.stmts[0]);
        assert!(d.init.is_some());
        assert!(d.placement.is_none());
    }

    #[test]
    fn test_array_forms() {
        let ast = parse("u8 a[4]; u8 b[while($ < 8)]; char c[]; u8 m[2][3];");
        assert!(matches!(
            var_decl(&ast.stmts[0]).ty.kind,
            TypeExprKind::Array(_, ArraySize::Fixed(_))
        ));
        assert!(matches!(
            var_decl(&ast.stmts[1]).ty.kind,
            TypeExprKind::Array(_, ArraySize::While(_))
        ));
        assert!(matches!(
            var_decl(&ast.stmts[2]).ty.kind,
            TypeExprKind::Array(_, ArraySize::Unsized)
        ));
        // Outer dimension first
        match &var_decl(&ast.stmts[3]).ty.kind {
            TypeExprKind::Array(inner, ArraySize::Fixed(outer)) => {
                assert!(matches!(outer.kind, ExprKind::IntLiteral(2)));
                assert!(matches!(
                    &inner.kind,
                    TypeExprKind::Array(_, ArraySize::Fixed(n)) if matches!(n.kind, ExprKind::IntLiteral(3))
                ));
            }
            other => panic!("expected nested array, got {:?}", other),
        }
    }

    #[test]
    fn test_pointer_decl() {
        let ast = parse("u8 *p : u32 @ 0x00;");
        let d = var_decl(&ast.stmts[0]);
        match &d.ty.kind {
            TypeExprKind::Pointer(pointee, size) => {
                assert!(matches!(pointee.kind, TypeExprKind::Builtin(BuiltinType::U8)));
                assert!(matches!(size.kind, TypeExprKind::Builtin(BuiltinType::U32)));
            }
            other => panic!("expected pointer, got {:?}", other),
        }
        assert!(d.placement.is_some());
    }

    #[test]
    fn test_multiply_is_not_pointer() {
        let ast = parse("fn f() { a * b; };");
        match &ast.stmts[0].kind {
            StmtKind::FnDef(f) => assert!(matches!(f.body[0].kind, StmtKind::Expr(_))),
            other => panic!("expected fn, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_declarators() {
        let (ast, interner) = parse_with_interner("struct A { u8 a, b[2], c; };");
        match &ast.stmts[0].kind {
            StmtKind::StructDef(s) => {
                let names: Vec<&str> = s
                    .body
                    .iter()
                    .map(|st| interner.resolve(var_decl(st).name.unwrap()))
                    .collect();
                assert_eq!(names, vec!["a", "b", "c"]);
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_anonymous_placement_and_padding() {
        let ast = parse("Header @ 0x10; padding[4];");
        assert!(var_decl(&ast.stmts[0]).name.is_none());
        let d = var_decl(&ast.stmts[1]);
        assert!(d.name.is_none());
        assert!(matches!(
            &d.ty.kind,
            TypeExprKind::Array(inner, ArraySize::Fixed(_)) if matches!(inner.kind, TypeExprKind::Padding)
        ));
    }

    #[test]
    fn test_in_out_variables() {
        let ast = parse("u32 count in; u32 result out;");
        assert_eq!(var_decl(&ast.stmts[0]).direction, Some(VarDirection::In));
        assert_eq!(var_decl(&ast.stmts[1]).direction, Some(VarDirection::Out));
    }

    #[test]
    fn test_attributes_prefix_and_suffix() {
        let (ast, interner) =
            parse_with_interner("[[hidden]] u8 a @ 0 [[color(\"FF0000\"), name(\"A\")]];");
        let d = var_decl(&ast.stmts[0]);
        let names: Vec<&str> = d.attrs.iter().map(|a| interner.resolve(a.name)).collect();
        assert_eq!(names, vec!["hidden", "color", "name"]);
        assert_eq!(d.attrs[1].value.as_deref(), Some("FF0000"));
    }

    #[test]
    fn test_malformed_attribute() {
        let err = parse_err("u8 a @ 0 [[color(1 + 2)]];");
        assert!(err.message.contains("malformed attribute"));
        let err = parse_err("u8 a @ 0 [[hidden];");
        assert!(err.message.contains("malformed attribute"));
    }

    // ========== Type definitions ==========

    #[test]
    fn test_struct_with_inheritance() {
        let (ast, interner) = parse_with_interner("struct B : A, ns::C { u8 x; };");
        match &ast.stmts[0].kind {
            StmtKind::StructDef(s) => {
                assert_eq!(interner.resolve(s.name), "B");
                assert_eq!(s.parents.len(), 2);
                assert_eq!(interner.resolve_path(&s.parents[1]), "ns::C");
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_def() {
        let ast = parse("enum E : u8 { A, B = 5, C, };");
        match &ast.stmts[0].kind {
            StmtKind::EnumDef(e) => {
                assert_eq!(e.members.len(), 3);
                assert!(e.members[0].value.is_none());
                assert!(e.members[1].value.is_some());
            }
            other => panic!("expected enum, got {:?}", other),
        }
    }

    #[test]
    fn test_bitfield_def() {
        let (ast, interner) =
            parse_with_interner("bitfield F : u16 { a : 3; padding : 1; if (a == 1) { b : 4; } };");
        match &ast.stmts[0].kind {
            StmtKind::BitfieldDef(b) => {
                assert!(b.container.is_some());
                assert_eq!(b.body.len(), 3);
                match &b.body[0].kind {
                    StmtKind::BitfieldField(f) => assert_eq!(interner.resolve(f.name.unwrap()), "a"),
                    other => panic!("expected field, got {:?}", other),
                }
                match &b.body[1].kind {
                    StmtKind::BitfieldField(f) => assert!(f.name.is_none()),
                    other => panic!("expected padding field, got {:?}", other),
                }
                match &b.body[2].kind {
                    StmtKind::If(i) => assert!(matches!(i.then_body[0].kind, StmtKind::BitfieldField(_))),
                    other => panic!("expected if, got {:?}", other),
                }
            }
            other => panic!("expected bitfield, got {:?}", other),
        }
    }

    #[test]
    fn test_fn_def_with_pack() {
        let (ast, interner) = parse_with_interner("fn f(u32 a, auto ... rest) { return a; };");
        match &ast.stmts[0].kind {
            StmtKind::FnDef(f) => {
                assert_eq!(f.params.len(), 1);
                assert_eq!(interner.resolve(f.pack.unwrap()), "rest");
            }
            other => panic!("expected fn, got {:?}", other),
        }
    }

    #[test]
    fn test_using_and_namespace() {
        let (ast, interner) = parse_with_interner("namespace a::b { using T = u32; using F; }");
        match &ast.stmts[0].kind {
            StmtKind::Namespace(n) => {
                assert_eq!(interner.resolve_path(&n.path), "a::b");
                assert_eq!(n.body.len(), 2);
                assert!(matches!(&n.body[1].kind, StmtKind::TypeAlias(t) if t.ty.is_none()));
            }
            other => panic!("expected namespace, got {:?}", other),
        }
    }

    // ========== Control flow ==========

    #[test]
    fn test_for_with_commas() {
        let ast = parse("fn f() { for (u8 i = 0, i < 4, i += 1) { continue; } };");
        match &ast.stmts[0].kind {
            StmtKind::FnDef(f) => match &f.body[0].kind {
                StmtKind::For(data) => {
                    assert_eq!(data.init.len(), 1);
                    assert!(matches!(data.step.kind, ExprKind::Assign { op: AssignOp::AddAssign, .. }));
                }
                other => panic!("expected for, got {:?}", other),
            },
            other => panic!("expected fn, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else_chain() {
        let ast = parse("if (1) u8 a @ 0; else if (2) u8 b @ 1; else { u8 c @ 2; }");
        match &ast.stmts[0].kind {
            StmtKind::If(i) => {
                assert_eq!(i.then_body.len(), 1);
                assert!(matches!(i.else_body[0].kind, StmtKind::If(_)));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    // ========== Errors ==========

    #[test]
    fn test_missing_semicolon() {
        let err = parse_err("u8 a @ 0\nu8 b @ 1;");
        assert_eq!(err.span.line, 2);
        assert_eq!(err.expected.as_deref(), Some("';'"));
    }

    #[test]
    fn test_unmatched_brace() {
        let err = parse_err("struct A {\n u8 x;\n");
        assert!(err.message.contains("end of input"), "{}", err.message);
        assert_eq!(err.expected.as_deref(), Some("'}'"));
    }

    #[test]
    fn test_unexpected_token() {
        let err = parse_err("u8 a @ ;");
        assert!(err.message.contains("unexpected token ';'"));
    }
}
