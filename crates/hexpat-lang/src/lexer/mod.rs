// Hand-written lexer for the pattern language

pub mod token;

use crate::error::LexError;
use crate::name::StringInterner;
use crate::span::Span;
use token::{Token, TokenKind};

/// Lexer that converts preprocessed source text into tokens
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    interner: &'a mut StringInterner,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, interner: &'a mut StringInterner) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            interner,
        }
    }

    /// Tokenize the entire source. The stream always ends with `Eof`.
    /// Lexing stops at the first malformed lexeme.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            if self.pos >= self.bytes.len() {
                tokens.push(Token::new(TokenKind::Eof, self.span_from(self.pos)));
                break;
            }
            let token = self.next_token()?;
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start as u32, self.pos as u32, self.line)
    }

    fn error(&self, message: impl Into<String>, start: usize) -> LexError {
        LexError::new(message, self.span_from(start))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while let Some(b) = self.peek() {
                if !b.is_ascii_whitespace() {
                    break;
                }
                if b == b'\n' {
                    self.line += 1;
                }
                self.pos += 1;
            }

            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'/') {
                while self.peek().is_some_and(|b| b != b'\n') {
                    self.pos += 1;
                }
                continue;
            }

            // Block comments do not nest: the first "*/" closes them.
            if self.peek() == Some(b'/') && self.peek_at(1) == Some(b'*') {
                let start = self.pos;
                let start_line = self.line;
                self.pos += 2;
                loop {
                    match self.peek() {
                        None => {
                            return Err(LexError::new(
                                "unterminated comment",
                                Span::new(start as u32, self.pos as u32, start_line),
                            ));
                        }
                        Some(b'*') if self.peek_at(1) == Some(b'/') => {
                            self.pos += 2;
                            break;
                        }
                        Some(b) => {
                            if b == b'\n' {
                                self.line += 1;
                            }
                            self.pos += 1;
                        }
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let Some(b) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, self.span_from(start)));
        };

        if b.is_ascii_digit() {
            return self.lex_number(start);
        }

        // Wide literals: L'x' and L"..."
        if b == b'L' && matches!(self.peek_at(1), Some(b'\'') | Some(b'"')) {
            self.pos += 1;
            return match self.peek() {
                Some(b'"') => self.lex_string(start, true),
                _ => self.lex_char(start, true),
            };
        }

        if b == b'"' {
            return self.lex_string(start, false);
        }

        if b == b'\'' {
            return self.lex_char(start, false);
        }

        if b.is_ascii_alphabetic() || b == b'_' {
            return Ok(self.lex_ident(start));
        }

        match self.lex_operator(start) {
            Some(token) => Ok(token),
            None => {
                let c = self.source[start..].chars().next().unwrap_or('?');
                self.pos += c.len_utf8();
                Err(self.error(format!("unexpected character '{}'", c), start))
            }
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, LexError> {
        if self.bytes[self.pos] == b'0' {
            match self.peek_at(1) {
                Some(b'x') | Some(b'X') => {
                    self.pos += 2;
                    return self.lex_radix_number(start, 16, "hexadecimal");
                }
                Some(b'o') | Some(b'O') => {
                    self.pos += 2;
                    return self.lex_radix_number(start, 8, "octal");
                }
                Some(b'b') | Some(b'B') => {
                    self.pos += 2;
                    return self.lex_radix_number(start, 2, "binary");
                }
                Some(b'0'..=b'9') | Some(b'\'') | Some(b'_') => {
                    // C-style octal: 0755
                    if !self.decimal_run_is_float() {
                        self.pos += 1;
                        return self.lex_radix_number(start, 8, "octal");
                    }
                }
                _ => {}
            }
        }
        self.lex_decimal_number(start)
    }

    /// Look ahead over a run of decimal digits to decide whether it is a float.
    fn decimal_run_is_float(&self) -> bool {
        let mut i = self.pos;
        while i < self.bytes.len() && (self.bytes[i].is_ascii_digit() || self.bytes[i] == b'_' || self.bytes[i] == b'\'') {
            i += 1;
        }
        matches!(self.bytes.get(i), Some(b'.') | Some(b'e') | Some(b'E'))
            && !matches!(self.bytes.get(i + 1), Some(b'.'))
    }

    /// Consume an alphanumeric run and accumulate it in `radix`.
    /// The prefix (0x, 0o, 0b or the leading 0) has already been skipped.
    fn lex_radix_number(&mut self, start: usize, radix: u32, radix_name: &str) -> Result<Token, LexError> {
        let digit_start = self.pos;
        let mut value: u128 = 0;
        let mut digits = 0usize;
        let mut overflow = false;
        while let Some(b) = self.peek() {
            if b == b'_' || b == b'\'' {
                self.pos += 1;
                continue;
            }
            if !b.is_ascii_alphanumeric() {
                break;
            }
            // Integer suffixes end the digit run
            if matches!(b, b'u' | b'U' | b'l' | b'L') {
                break;
            }
            let Some(d) = (b as char).to_digit(radix) else {
                self.pos += 1;
                return Err(self.error(
                    format!("invalid digit '{}' in {} literal", b as char, radix_name),
                    start,
                ));
            };
            match value.checked_mul(radix as u128).and_then(|v| v.checked_add(d as u128)) {
                Some(v) => value = v,
                None => overflow = true,
            }
            digits += 1;
            self.pos += 1;
        }
        let has_prefix = digit_start - start == 2;
        if digits == 0 && has_prefix {
            return Err(self.error(
                format!("expected {} digits after '{}'", radix_name, &self.source[start..digit_start]),
                start,
            ));
        }
        self.skip_int_suffix();
        if overflow {
            return Err(self.error("integer literal overflow", start));
        }
        Ok(Token::new(TokenKind::IntLiteral(value), self.span_from(start)))
    }

    fn skip_int_suffix(&mut self) {
        while matches!(self.peek(), Some(b'u') | Some(b'U') | Some(b'l') | Some(b'L')) {
            self.pos += 1;
        }
    }

    fn consume_digits(&mut self) -> usize {
        let mut count = 0;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                count += 1;
                self.pos += 1;
            } else if (b == b'_' || b == b'\'') && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) {
                self.pos += 1;
            } else {
                break;
            }
        }
        count
    }

    fn lex_decimal_number(&mut self, start: usize) -> Result<Token, LexError> {
        self.consume_digits();

        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            self.consume_digits();
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+') | Some(b'-')));
            if self.peek_at(1 + sign).is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign;
                self.consume_digits();
            }
        }

        let text: String = self.source[start..self.pos]
            .chars()
            .filter(|&c| c != '_' && c != '\'')
            .collect();

        match self.peek() {
            Some(b'f') | Some(b'F') => {
                self.pos += 1;
                let value = self.parse_float(&text, start)?;
                return Ok(Token::new(
                    TokenKind::FloatLiteral(value as f32 as f64),
                    self.span_from(start),
                ));
            }
            Some(b'd') | Some(b'D') => {
                self.pos += 1;
                let value = self.parse_float(&text, start)?;
                return Ok(Token::new(TokenKind::FloatLiteral(value), self.span_from(start)));
            }
            _ => {}
        }

        if is_float {
            let value = self.parse_float(&text, start)?;
            return Ok(Token::new(TokenKind::FloatLiteral(value), self.span_from(start)));
        }

        self.skip_int_suffix();
        if self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
            return Err(self.error("invalid integer literal", start));
        }
        match text.parse::<u128>() {
            Ok(value) => Ok(Token::new(TokenKind::IntLiteral(value), self.span_from(start))),
            Err(_) => Err(self.error("integer literal overflow", start)),
        }
    }

    fn parse_float(&self, text: &str, start: usize) -> Result<f64, LexError> {
        text.parse::<f64>()
            .map_err(|_| self.error("invalid floating point literal", start))
    }

    /// Decode one (possibly escaped) character inside a string or char literal.
    fn lex_literal_char(&mut self, start: usize, what: &str) -> Result<char, LexError> {
        let Some(b) = self.peek() else {
            return Err(self.error(format!("unterminated {} literal", what), start));
        };
        if b == b'\n' {
            return Err(self.error(format!("unterminated {} literal", what), start));
        }
        if b != b'\\' {
            let c = self.source[self.pos..].chars().next().unwrap_or('\u{FFFD}');
            self.pos += c.len_utf8();
            return Ok(c);
        }

        self.pos += 1;
        let Some(esc) = self.peek() else {
            return Err(self.error(format!("unterminated {} literal", what), start));
        };
        self.pos += 1;
        let c = match esc {
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'\\' => '\\',
            b'"' => '"',
            b'\'' => '\'',
            b'0' => '\0',
            b'a' => '\x07',
            b'b' => '\x08',
            b'f' => '\x0C',
            b'v' => '\x0B',
            b'x' => {
                let hex = self.source.get(self.pos..self.pos + 2).unwrap_or("");
                let value = u8::from_str_radix(hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 2)
                    .ok_or_else(|| self.error("invalid hex escape sequence", start))?;
                self.pos += 2;
                value as char
            }
            b'u' => {
                let hex = self.source.get(self.pos..self.pos + 4).unwrap_or("");
                let value = u32::from_str_radix(hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error("invalid unicode escape sequence", start))?;
                self.pos += 4;
                value
            }
            other => {
                return Err(self.error(
                    format!("unknown escape sequence '\\{}'", other as char),
                    start,
                ));
            }
        };
        Ok(c)
    }

    fn lex_string(&mut self, start: usize, wide: bool) -> Result<Token, LexError> {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                _ => value.push(self.lex_literal_char(start, "string")?),
            }
        }
        let kind = if wide {
            TokenKind::WideStringLiteral(value)
        } else {
            TokenKind::StringLiteral(value)
        };
        Ok(Token::new(kind, self.span_from(start)))
    }

    fn lex_char(&mut self, start: usize, wide: bool) -> Result<Token, LexError> {
        self.pos += 1; // opening quote
        if self.peek() == Some(b'\'') {
            self.pos += 1;
            return Err(self.error("empty character literal", start));
        }
        let c = self.lex_literal_char(start, "character")?;
        if self.peek() != Some(b'\'') {
            return Err(self.error("unterminated character literal", start));
        }
        self.pos += 1;
        if !wide && (c as u32) > 0xFF {
            return Err(self.error("character literal does not fit in a char", start));
        }
        let kind = if wide {
            TokenKind::WideCharLiteral(c)
        } else {
            TokenKind::CharLiteral(c)
        };
        Ok(Token::new(kind, self.span_from(start)))
    }

    fn lex_ident(&mut self, start: usize) -> Token {
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];
        let kind = TokenKind::keyword_from_str(text)
            .unwrap_or_else(|| TokenKind::Ident(self.interner.intern(text)));
        Token::new(kind, self.span_from(start))
    }

    fn lex_operator(&mut self, start: usize) -> Option<Token> {
        let b0 = self.peek()?;
        let b1 = self.peek_at(1);
        let b2 = self.peek_at(2);

        let (kind, len) = match (b0, b1, b2) {
            (b'<', Some(b'<'), Some(b'=')) => (TokenKind::ShlEq, 3),
            (b'>', Some(b'>'), Some(b'=')) => (TokenKind::ShrEq, 3),
            (b'.', Some(b'.'), Some(b'.')) => (TokenKind::DotDotDot, 3),

            (b':', Some(b':'), _) => (TokenKind::ColonColon, 2),
            (b'=', Some(b'='), _) => (TokenKind::EqEq, 2),
            (b'!', Some(b'='), _) => (TokenKind::BangEq, 2),
            (b'<', Some(b'='), _) => (TokenKind::LtEq, 2),
            (b'>', Some(b'='), _) => (TokenKind::GtEq, 2),
            (b'<', Some(b'<'), _) => (TokenKind::Shl, 2),
            (b'>', Some(b'>'), _) => (TokenKind::Shr, 2),
            (b'&', Some(b'&'), _) => (TokenKind::AmpAmp, 2),
            (b'|', Some(b'|'), _) => (TokenKind::PipePipe, 2),
            (b'^', Some(b'^'), _) => (TokenKind::CaretCaret, 2),
            (b'+', Some(b'='), _) => (TokenKind::PlusEq, 2),
            (b'-', Some(b'='), _) => (TokenKind::MinusEq, 2),
            (b'*', Some(b'='), _) => (TokenKind::StarEq, 2),
            (b'/', Some(b'='), _) => (TokenKind::SlashEq, 2),
            (b'%', Some(b'='), _) => (TokenKind::PercentEq, 2),
            (b'&', Some(b'='), _) => (TokenKind::AmpEq, 2),
            (b'|', Some(b'='), _) => (TokenKind::PipeEq, 2),
            (b'^', Some(b'='), _) => (TokenKind::CaretEq, 2),

            (b'+', _, _) => (TokenKind::Plus, 1),
            (b'-', _, _) => (TokenKind::Minus, 1),
            (b'*', _, _) => (TokenKind::Star, 1),
            (b'/', _, _) => (TokenKind::Slash, 1),
            (b'%', _, _) => (TokenKind::Percent, 1),
            (b'&', _, _) => (TokenKind::Amp, 1),
            (b'|', _, _) => (TokenKind::Pipe, 1),
            (b'^', _, _) => (TokenKind::Caret, 1),
            (b'~', _, _) => (TokenKind::Tilde, 1),
            (b'!', _, _) => (TokenKind::Bang, 1),
            (b'=', _, _) => (TokenKind::Eq, 1),
            (b'<', _, _) => (TokenKind::Lt, 1),
            (b'>', _, _) => (TokenKind::Gt, 1),
            (b'?', _, _) => (TokenKind::Question, 1),
            (b':', _, _) => (TokenKind::Colon, 1),
            (b'.', _, _) => (TokenKind::Dot, 1),
            (b',', _, _) => (TokenKind::Comma, 1),
            (b';', _, _) => (TokenKind::Semicolon, 1),
            (b'@', _, _) => (TokenKind::At, 1),
            (b'$', _, _) => (TokenKind::Dollar, 1),
            (b'(', _, _) => (TokenKind::LParen, 1),
            (b')', _, _) => (TokenKind::RParen, 1),
            (b'{', _, _) => (TokenKind::LBrace, 1),
            (b'}', _, _) => (TokenKind::RBrace, 1),
            (b'[', _, _) => (TokenKind::LBracket, 1),
            (b']', _, _) => (TokenKind::RBracket, 1),
            _ => return None,
        };
        self.pos += len;
        Some(Token::new(kind, self.span_from(start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> (Vec<TokenKind>, StringInterner) {
        let mut interner = StringInterner::new();
        let tokens = Lexer::new(input, &mut interner)
            .tokenize()
            .expect("lexing failed");
        (tokens.into_iter().map(|t| t.kind).collect(), interner)
    }

    fn lex_err(input: &str) -> LexError {
        let mut interner = StringInterner::new();
        Lexer::new(input, &mut interner)
            .tokenize()
            .expect_err("expected a lex error")
    }

    #[test]
    fn test_integer_radixes() {
        let (kinds, _) = lex("42 0x2A 0X2a 0b101010 0o52 052 0");
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral(42),
                TokenKind::IntLiteral(42),
                TokenKind::IntLiteral(42),
                TokenKind::IntLiteral(42),
                TokenKind::IntLiteral(42),
                TokenKind::IntLiteral(42),
                TokenKind::IntLiteral(0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_separators_and_suffixes() {
        let (kinds, _) = lex("1'000 1_000 0xFF'FF 10u 10UL 0x10u");
        assert_eq!(kinds[0], TokenKind::IntLiteral(1000));
        assert_eq!(kinds[1], TokenKind::IntLiteral(1000));
        assert_eq!(kinds[2], TokenKind::IntLiteral(0xFFFF));
        assert_eq!(kinds[3], TokenKind::IntLiteral(10));
        assert_eq!(kinds[4], TokenKind::IntLiteral(10));
        assert_eq!(kinds[5], TokenKind::IntLiteral(0x10));
    }

    #[test]
    fn test_u128_max_is_exact() {
        let (kinds, _) = lex("340282366920938463463374607431768211455");
        assert_eq!(kinds[0], TokenKind::IntLiteral(u128::MAX));
        let (kinds, _) = lex("0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF");
        assert_eq!(kinds[0], TokenKind::IntLiteral(u128::MAX));
    }

    #[test]
    fn test_u128_max_plus_one_overflows() {
        let err = lex_err("340282366920938463463374607431768211456");
        assert!(err.message.contains("overflow"), "{}", err.message);
        let err = lex_err("0x100000000000000000000000000000000");
        assert!(err.message.contains("overflow"), "{}", err.message);
    }

    #[test]
    fn test_invalid_digits() {
        assert!(lex_err("0b102").message.contains("invalid digit"));
        assert!(lex_err("089").message.contains("invalid digit"));
        assert!(lex_err("0x").message.contains("expected hexadecimal digits"));
        assert!(lex_err("12abc").message.contains("invalid integer literal"));
    }

    #[test]
    fn test_floats() {
        let (kinds, _) = lex("1.5 2.5e2 1e3 0.1f 3.0d 7f");
        assert_eq!(kinds[0], TokenKind::FloatLiteral(1.5));
        assert_eq!(kinds[1], TokenKind::FloatLiteral(250.0));
        assert_eq!(kinds[2], TokenKind::FloatLiteral(1000.0));
        assert_eq!(kinds[3], TokenKind::FloatLiteral(0.1f32 as f64));
        assert_eq!(kinds[4], TokenKind::FloatLiteral(3.0));
        assert_eq!(kinds[5], TokenKind::FloatLiteral(7.0));
    }

    #[test]
    fn test_integer_followed_by_member_access() {
        let (kinds, _) = lex("1.x");
        assert_eq!(kinds[0], TokenKind::IntLiteral(1));
        assert_eq!(kinds[1], TokenKind::Dot);
    }

    #[test]
    fn test_strings_and_escapes() {
        let (kinds, _) = lex(r#""hi\n\t\"q\"" "\x41\x42" L"wide""#);
        assert_eq!(kinds[0], TokenKind::StringLiteral("hi\n\t\"q\"".into()));
        assert_eq!(kinds[1], TokenKind::StringLiteral("AB".into()));
        assert_eq!(kinds[2], TokenKind::WideStringLiteral("wide".into()));
    }

    #[test]
    fn test_chars() {
        let (kinds, _) = lex(r"'a' '\n' '\x7F' L'z'");
        assert_eq!(kinds[0], TokenKind::CharLiteral('a'));
        assert_eq!(kinds[1], TokenKind::CharLiteral('\n'));
        assert_eq!(kinds[2], TokenKind::CharLiteral('\x7F'));
        assert_eq!(kinds[3], TokenKind::WideCharLiteral('z'));
    }

    #[test]
    fn test_unterminated_literals() {
        assert!(lex_err("\"abc").message.contains("unterminated string"));
        assert!(lex_err("\"abc\nd\"").message.contains("unterminated string"));
        assert!(lex_err("'a").message.contains("unterminated character"));
        assert!(lex_err("''").message.contains("empty character"));
    }

    #[test]
    fn test_keywords() {
        let (kinds, _) = lex("struct union enum bitfield fn using namespace if else while for break continue return in out le be sizeof addressof parent this auto padding true false");
        assert_eq!(
            kinds,
            vec![
                TokenKind::KwStruct,
                TokenKind::KwUnion,
                TokenKind::KwEnum,
                TokenKind::KwBitfield,
                TokenKind::KwFn,
                TokenKind::KwUsing,
                TokenKind::KwNamespace,
                TokenKind::KwIf,
                TokenKind::KwElse,
                TokenKind::KwWhile,
                TokenKind::KwFor,
                TokenKind::KwBreak,
                TokenKind::KwContinue,
                TokenKind::KwReturn,
                TokenKind::KwIn,
                TokenKind::KwOut,
                TokenKind::KwLe,
                TokenKind::KwBe,
                TokenKind::KwSizeof,
                TokenKind::KwAddressof,
                TokenKind::KwParent,
                TokenKind::KwThis,
                TokenKind::KwAuto,
                TokenKind::KwPadding,
                TokenKind::BoolLiteral(true),
                TokenKind::BoolLiteral(false),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_identifiers_are_interned() {
        let (kinds, interner) = lex("u32 header _tmp u32");
        let TokenKind::Ident(a) = kinds[0] else {
            panic!("expected identifier")
        };
        assert_eq!(interner.resolve(a), "u32");
        assert_eq!(kinds[0], kinds[3]);
        let TokenKind::Ident(b) = kinds[2] else {
            panic!("expected identifier")
        };
        assert_eq!(interner.resolve(b), "_tmp");
    }

    #[test]
    fn test_operators() {
        let (kinds, _) = lex("+ - * / % & | ^ ~ << >> && || ^^ ! == != < > <= >= = += <<= >>= ? : :: . ... , ; @ $");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Amp,
                TokenKind::Pipe,
                TokenKind::Caret,
                TokenKind::Tilde,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::CaretCaret,
                TokenKind::Bang,
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::Eq,
                TokenKind::PlusEq,
                TokenKind::ShlEq,
                TokenKind::ShrEq,
                TokenKind::Question,
                TokenKind::Colon,
                TokenKind::ColonColon,
                TokenKind::Dot,
                TokenKind::DotDotDot,
                TokenKind::Comma,
                TokenKind::Semicolon,
                TokenKind::At,
                TokenKind::Dollar,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let (kinds, _) = lex("1 // line\n/* block\n */ 2");
        assert_eq!(
            kinds,
            vec![TokenKind::IntLiteral(1), TokenKind::IntLiteral(2), TokenKind::Eof]
        );
    }

    #[test]
    fn test_block_comments_do_not_nest() {
        // The first "*/" closes the comment, leaving a stray "*/"
        let (kinds, _) = lex("/* a /* b */ 3 */");
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral(3),
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_comment() {
        let err = lex_err("1\n/* open");
        assert_eq!(err.message, "unterminated comment");
        assert_eq!(err.span.line, 2);
    }

    #[test]
    fn test_line_numbers() {
        let mut interner = StringInterner::new();
        let tokens = Lexer::new("u8 a;\n\n/* x\n y */ u16 b;", &mut interner)
            .tokenize()
            .unwrap();
        let lines: Vec<u32> = tokens.iter().map(|t| t.line()).collect();
        assert_eq!(lines, vec![1, 1, 1, 4, 4, 4, 4]);
    }

    #[test]
    fn test_illegal_character() {
        let err = lex_err("u8 x;\n#");
        assert_eq!(err.message, "unexpected character '#'");
        assert_eq!(err.span.line, 2);
    }

    #[test]
    fn test_empty_input() {
        let (kinds, _) = lex("");
        assert_eq!(kinds, vec![TokenKind::Eof]);
    }
}
