// Expression parsing: precedence climbing from assignment down to primaries

use super::ast::*;
use super::Parser;
use crate::error::ParseError;
use crate::lexer::token::TokenKind;
use crate::span::Span;

impl<'a> Parser<'a> {
    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    /// Assignment is the lowest-precedence expression (right-associative).
    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_ternary()?;
        let Some(op) = self.try_parse_assign_op() else {
            return Ok(lhs);
        };
        if !matches!(
            lhs.kind,
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. } | ExprKind::Dollar
        ) {
            return Err(ParseError::new("invalid assignment target", lhs.span));
        }
        let rhs = self.parse_assignment()?;
        let span = lhs.span.merge(rhs.span);
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        ))
    }

    fn try_parse_assign_op(&mut self) -> Option<AssignOp> {
        let op = match self.peek() {
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::AddAssign,
            TokenKind::MinusEq => AssignOp::SubAssign,
            TokenKind::StarEq => AssignOp::MulAssign,
            TokenKind::SlashEq => AssignOp::DivAssign,
            TokenKind::PercentEq => AssignOp::ModAssign,
            TokenKind::AmpEq => AssignOp::BitAndAssign,
            TokenKind::PipeEq => AssignOp::BitOrAssign,
            TokenKind::CaretEq => AssignOp::BitXorAssign,
            TokenKind::ShlEq => AssignOp::ShlAssign,
            TokenKind::ShrEq => AssignOp::ShrAssign,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_logical_or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expr()?;
        self.expect(&TokenKind::Colon)?;
        let else_expr = self.parse_ternary()?;
        let span = cond.span.merge(else_expr.span);
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        ))
    }

    /// Helper: parse left-associative binary operators.
    /// Calls `next_fn` for operands, `map_op` to convert current token to BinOp.
    fn parse_binary_op(
        &mut self,
        next_fn: fn(&mut Self) -> Result<Expr, ParseError>,
        map_op: fn(&TokenKind) -> Option<BinOp>,
    ) -> Result<Expr, ParseError> {
        let mut lhs = next_fn(self)?;
        while let Some(op) = map_op(self.peek()) {
            self.advance();
            let rhs = next_fn(self)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_logical_xor, |tok| match tok {
            TokenKind::PipePipe => Some(BinOp::LogOr),
            _ => None,
        })
    }

    fn parse_logical_xor(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_logical_and, |tok| match tok {
            TokenKind::CaretCaret => Some(BinOp::LogXor),
            _ => None,
        })
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bitwise_or, |tok| match tok {
            TokenKind::AmpAmp => Some(BinOp::LogAnd),
            _ => None,
        })
    }

    fn parse_bitwise_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bitwise_xor, |tok| match tok {
            TokenKind::Pipe => Some(BinOp::BitOr),
            _ => None,
        })
    }

    fn parse_bitwise_xor(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bitwise_and, |tok| match tok {
            TokenKind::Caret => Some(BinOp::BitXor),
            _ => None,
        })
    }

    fn parse_bitwise_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_equality, |tok| match tok {
            TokenKind::Amp => Some(BinOp::BitAnd),
            _ => None,
        })
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_comparison, |tok| match tok {
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::BangEq => Some(BinOp::Ne),
            _ => None,
        })
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_shift, |tok| match tok {
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::LtEq => Some(BinOp::Le),
            TokenKind::Gt => Some(BinOp::Gt),
            TokenKind::GtEq => Some(BinOp::Ge),
            _ => None,
        })
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_additive, |tok| match tok {
            TokenKind::Shl => Some(BinOp::Shl),
            TokenKind::Shr => Some(BinOp::Shr),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_multiplicative, |tok| match tok {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_unary, |tok| match tok {
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::Percent => Some(BinOp::Mod),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let expr = self.parse_unary()?;
        let span = start.merge(expr.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                // Array index (not `[[` attribute syntax)
                TokenKind::LBracket if !self.check_lattr() => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end = self.expect(&TokenKind::RBracket)?;
                    let span = expr.span.merge(end.span);
                    expr = Expr::new(
                        ExprKind::Index {
                            expr: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let member_span = self.peek_span();
                    let member = if self.eat(&TokenKind::KwParent) {
                        self.interner.intern("parent")
                    } else {
                        self.expect_ident()?.0
                    };
                    let span = expr.span.merge(member_span);
                    expr = Expr::new(
                        ExprKind::Member {
                            expr: Box::new(expr),
                            member,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();

        match self.peek().clone() {
            TokenKind::IntLiteral(val) => self.parse_literal(ExprKind::IntLiteral(val), start),
            TokenKind::FloatLiteral(val) => self.parse_literal(ExprKind::FloatLiteral(val), start),
            TokenKind::StringLiteral(val) | TokenKind::WideStringLiteral(val) => {
                self.parse_literal(ExprKind::StringLiteral(val), start)
            }
            TokenKind::CharLiteral(val) | TokenKind::WideCharLiteral(val) => {
                self.parse_literal(ExprKind::CharLiteral(val), start)
            }
            TokenKind::BoolLiteral(val) => self.parse_literal(ExprKind::BoolLiteral(val), start),
            TokenKind::Dollar => self.parse_literal(ExprKind::Dollar, start),
            TokenKind::KwThis => self.parse_literal(ExprKind::This, start),
            TokenKind::KwParent => self.parse_literal(ExprKind::Parent, start),
            TokenKind::KwSizeof => self.parse_sizeof(start),
            TokenKind::KwAddressof => self.parse_addressof(start),
            TokenKind::LParen => self.parse_paren_expr(),
            TokenKind::KwBe | TokenKind::KwLe => self.parse_cast(start),
            TokenKind::Ident(name)
                if self.is_builtin_name(name) && matches!(self.peek_ahead(1), TokenKind::LParen) =>
            {
                self.parse_cast(start)
            }
            TokenKind::Ident(_) => self.parse_ident_or_call(start),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_literal(&mut self, kind: ExprKind, span: Span) -> Result<Expr, ParseError> {
        self.advance();
        Ok(Expr::new(kind, span))
    }

    fn parse_sizeof(&mut self, start: Span) -> Result<Expr, ParseError> {
        self.advance();
        self.expect(&TokenKind::LParen)?;
        // Builtin and endian-prefixed types are unambiguous; a bare name is
        // parsed as an expression and resolved to a variable or type later.
        let is_type = match self.peek() {
            TokenKind::KwBe | TokenKind::KwLe | TokenKind::KwPadding => true,
            TokenKind::Ident(name) => {
                self.is_builtin_name(*name) && !matches!(self.peek_ahead(1), TokenKind::LParen)
            }
            _ => false,
        };
        let arg = if is_type {
            SizeofArg::Type(self.parse_type_expr()?)
        } else {
            SizeofArg::Expr(self.parse_expr()?)
        };
        let end = self.expect(&TokenKind::RParen)?;
        Ok(Expr::new(ExprKind::Sizeof(Box::new(arg)), start.merge(end.span)))
    }

    fn parse_addressof(&mut self, start: Span) -> Result<Expr, ParseError> {
        self.advance();
        self.expect(&TokenKind::LParen)?;
        let inner = self.parse_expr()?;
        let end = self.expect(&TokenKind::RParen)?;
        Ok(Expr::new(ExprKind::Addressof(Box::new(inner)), start.merge(end.span)))
    }

    fn parse_paren_expr(&mut self) -> Result<Expr, ParseError> {
        self.advance();
        let expr = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        Ok(expr)
    }

    /// `u32(x)`, `be u16(x)`
    fn parse_cast(&mut self, start: Span) -> Result<Expr, ParseError> {
        let ty = self.parse_type_expr()?;
        let builtin = match &ty.kind {
            TypeExprKind::Builtin(_) => true,
            TypeExprKind::Endian(_, inner) => matches!(inner.kind, TypeExprKind::Builtin(_)),
            _ => false,
        };
        if !builtin {
            return Err(ParseError::expected(
                "invalid cast",
                "builtin type",
                ty.span,
            ));
        }
        self.expect(&TokenKind::LParen)?;
        let expr = self.parse_expr()?;
        let end = self.expect(&TokenKind::RParen)?;
        Ok(Expr::new(
            ExprKind::Cast {
                ty: Box::new(ty),
                expr: Box::new(expr),
            },
            start.merge(end.span),
        ))
    }

    fn parse_ident_or_call(&mut self, start: Span) -> Result<Expr, ParseError> {
        let path = self.parse_path()?;

        if self.eat(&TokenKind::LParen) {
            let mut args = Vec::new();
            while !self.check(&TokenKind::RParen) && !self.at_eof() {
                args.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            let end = self.expect(&TokenKind::RParen)?;
            return Ok(Expr::new(
                ExprKind::Call { func: path, args },
                start.merge(end.span),
            ));
        }

        let span = start.merge(self.prev_span());
        Ok(match path.as_slice() {
            [name] => Expr::new(ExprKind::Ident(*name), span),
            _ => Expr::new(ExprKind::Scoped(path), span),
        })
    }
}
