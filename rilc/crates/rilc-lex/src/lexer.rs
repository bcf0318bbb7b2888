//! Main lexer implementation for the Ril programming language.
//!
//! This module provides the `Lexer` struct which transforms source code
//! into a stream of tokens. It handles all token types including keywords,
//! identifiers, literals, operators, and delimiters.
//!
//! Two details set Ril lexing apart from the usual:
//!
//! - Newlines are tokens. Blocks separate statements by newline (or `;`),
//!   so the lexer only elides spaces, tabs, and carriage returns.
//! - Bitwise operators carry a trailing `b` (`&b`, `<<b`, `~b`, ...). The
//!   lexer commits to the bitwise form only when the `b` is present and not
//!   the start of an identifier, so `x &b y` is bitwise-and while `a | b`
//!   stays a pipe into the identifier `b`.

use rilc_util::diagnostic::codes;
use rilc_util::{Handler, Span, Symbol};

use crate::cursor::Cursor;
use crate::token::{keyword_from_ident, Token};

/// A token paired with its source span.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenWithSpan {
    pub token: Token,
    pub span: Span,
}

/// The main lexer for Ril source code.
///
/// # Example
///
/// ```
/// use rilc_util::Handler;
/// use rilc_lex::lexer::Lexer;
/// use rilc_lex::token::Token;
///
/// let handler = Handler::new();
/// let mut lexer = Lexer::new("x := 42", &handler);
///
/// assert_eq!(lexer.next_token(), Token::Ident(rilc_util::Symbol::intern("x")));
/// assert_eq!(lexer.next_token(), Token::Walrus);
/// assert_eq!(lexer.next_token(), Token::Int(42));
/// ```
pub struct Lexer<'a> {
    /// Character cursor for traversing source.
    cursor: Cursor<'a>,

    /// Diagnostic handler for error reporting.
    handler: &'a Handler,

    /// Start position of the current token.
    token_start: usize,

    /// Start line of the current token.
    token_start_line: u32,

    /// Start column of the current token.
    token_start_column: u32,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given source code.
    pub fn new(source: &'a str, handler: &'a Handler) -> Self {
        Self {
            cursor: Cursor::new(source),
            handler,
            token_start: 0,
            token_start_line: 1,
            token_start_column: 1,
        }
    }

    /// Returns the next token from the source.
    ///
    /// Skips spaces, tabs, `\r`, and `//` comments, then dispatches on the
    /// first character. Returns `Token::Eof` at end of input.
    pub fn next_token(&mut self) -> Token {
        self.skip_blanks_and_comments();

        self.token_start = self.cursor.position();
        self.token_start_line = self.cursor.line();
        self.token_start_column = self.cursor.column();

        if self.cursor.is_at_end() {
            return Token::Eof;
        }

        match self.cursor.current_char() {
            '\n' => {
                self.cursor.advance();
                Token::Newline
            }

            // Single-character delimiters
            '(' => {
                self.cursor.advance();
                Token::LParen
            }
            ')' => {
                self.cursor.advance();
                Token::RParen
            }
            '{' => {
                self.cursor.advance();
                Token::LBrace
            }
            '}' => {
                self.cursor.advance();
                Token::RBrace
            }
            '[' => {
                self.cursor.advance();
                Token::LBracket
            }
            ']' => {
                self.cursor.advance();
                Token::RBracket
            }
            ',' => {
                self.cursor.advance();
                Token::Comma
            }
            ';' => {
                self.cursor.advance();
                Token::Semicolon
            }
            '#' => {
                self.cursor.advance();
                Token::Hash
            }

            // Multi-character operators - dispatch to specific handlers
            '+' => {
                self.cursor.advance();
                Token::Plus
            }
            '-' => self.lex_minus(),
            '*' => self.lex_star(),
            '/' => {
                // Comments were skipped above, so this is division.
                self.cursor.advance();
                Token::Slash
            }
            '%' => self.lex_percent(),
            '=' => self.lex_equals(),
            '!' => self.lex_bang(),
            '<' => self.lex_less(),
            '>' => self.lex_greater(),
            '&' => self.lex_ampersand(),
            '|' => self.lex_pipe(),
            '^' => self.lex_caret(),
            '~' => self.lex_tilde(),
            ':' => self.lex_colon(),
            '.' => self.lex_dot(),
            '@' => self.lex_at(),

            // String literals
            '"' => self.lex_string(),

            // Identifiers and keywords
            c if c == '_' || c.is_ascii_alphabetic() => self.lex_identifier(),

            // Numbers
            c if c.is_ascii_digit() => self.lex_number(),

            // Unknown character
            c => {
                self.report_error(
                    codes::E_LEX_UNKNOWN_CHAR,
                    format!("unexpected character '{}'", c),
                );
                self.cursor.advance();
                Token::Invalid(c.to_string())
            }
        }
    }

    /// Returns the next token together with its span.
    pub fn next_token_with_span(&mut self) -> TokenWithSpan {
        let token = self.next_token();
        TokenWithSpan {
            token,
            span: self.current_span(),
        }
    }

    /// Tokenizes the whole source, including the final `Eof`.
    pub fn tokenize(source: &'a str, handler: &'a Handler) -> Vec<TokenWithSpan> {
        let mut lexer = Lexer::new(source, handler);
        let mut tokens = Vec::new();
        loop {
            let tws = lexer.next_token_with_span();
            let done = tws.token == Token::Eof;
            tokens.push(tws);
            if done {
                break;
            }
        }
        tokens
    }

    /// Span of the token most recently returned.
    pub fn current_span(&self) -> Span {
        Span::new(
            self.token_start,
            self.cursor.position(),
            self.token_start_line,
            self.token_start_column,
        )
    }

    /// The original text of the token most recently returned.
    pub fn current_lexeme(&self) -> &'a str {
        self.cursor.slice_from(self.token_start)
    }

    // =========================================================================
    // OPERATOR HANDLERS
    // =========================================================================

    fn lex_minus(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('>') {
            Token::Arrow
        } else {
            Token::Minus
        }
    }

    fn lex_star(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('*') {
            Token::StarStar
        } else {
            Token::Star
        }
    }

    fn lex_percent(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('%') {
            Token::PercentPercent
        } else {
            Token::Percent
        }
    }

    fn lex_equals(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('=') {
            Token::EqEq
        } else if self.cursor.match_char('>') {
            Token::FatArrow
        } else {
            Token::Assign
        }
    }

    fn lex_bang(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('=') {
            Token::Ne
        } else {
            self.report_error(
                codes::E_LEX_UNKNOWN_CHAR,
                "'!' is only valid in '!=' and 'or!'".to_string(),
            );
            Token::Invalid("!".to_string())
        }
    }

    fn lex_less(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('=') {
            return Token::Le;
        }
        if self.cursor.match_char('-') {
            return Token::LeftArrow;
        }
        if self.cursor.match_char('>') {
            return Token::Diamond;
        }
        if self.cursor.current_char() == '<' {
            self.cursor.advance();
            if self.bitwise_suffix() {
                return Token::ShlB;
            }
            return Token::Shl;
        }
        Token::Lt
    }

    fn lex_greater(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('=') {
            return Token::Ge;
        }
        if self.cursor.current_char() == '>' {
            self.cursor.advance();
            if self.bitwise_suffix() {
                return Token::ShrB;
            }
            return Token::Shr;
        }
        Token::Gt
    }

    fn lex_ampersand(&mut self) -> Token {
        self.cursor.advance();
        if self.bitwise_suffix() {
            Token::AmpB
        } else {
            self.report_error(
                codes::E_LEX_UNKNOWN_CHAR,
                "bare '&' is not an operator; bitwise-and is spelled '&b'".to_string(),
            );
            Token::Invalid("&".to_string())
        }
    }

    fn lex_pipe(&mut self) -> Token {
        self.cursor.advance();
        if self.bitwise_suffix() {
            return Token::PipeB;
        }
        if self.cursor.match_char('|') {
            return Token::PipePipe;
        }
        Token::Pipe
    }

    fn lex_caret(&mut self) -> Token {
        self.cursor.advance();
        if self.bitwise_suffix() {
            Token::CaretB
        } else {
            self.report_error(
                codes::E_LEX_UNKNOWN_CHAR,
                "bare '^' is not an operator; bitwise-xor is spelled '^b'".to_string(),
            );
            Token::Invalid("^".to_string())
        }
    }

    fn lex_tilde(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('>') {
            return Token::SquigArrow;
        }
        if self.bitwise_suffix() {
            return Token::TildeB;
        }
        self.report_error(
            codes::E_LEX_UNKNOWN_CHAR,
            "bare '~' is not an operator; bitwise-not is spelled '~b'".to_string(),
        );
        Token::Invalid("~".to_string())
    }

    fn lex_colon(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('=') {
            Token::Walrus
        } else {
            Token::Colon
        }
    }

    fn lex_dot(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.current_char() == '.' {
            self.cursor.advance();
            if self.cursor.match_char('<') {
                return Token::DotDotLt;
            }
            return Token::DotDot;
        }
        Token::Dot
    }

    fn lex_at(&mut self) -> Token {
        self.cursor.advance();
        if self.cursor.match_char('@') {
            Token::AtAt
        } else {
            Token::At
        }
    }

    /// Consumes the `b` marker of a bitwise operator.
    ///
    /// The `b` counts only when it does not begin an identifier: `x |b y`
    /// is bitwise-or, `x | bits` pipes into `bits`.
    fn bitwise_suffix(&mut self) -> bool {
        if self.cursor.current_char() == 'b' {
            let after = self.cursor.peek_char(1);
            if !(after == '_' || after.is_ascii_alphanumeric()) {
                self.cursor.advance();
                return true;
            }
        }
        false
    }

    // =========================================================================
    // LITERALS, IDENTIFIERS, NUMBERS
    // =========================================================================

    fn lex_identifier(&mut self) -> Token {
        let start = self.cursor.position();
        while {
            let c = self.cursor.current_char();
            c == '_' || c.is_ascii_alphanumeric()
        } {
            self.cursor.advance();
        }
        let text = self.cursor.slice_from(start);

        // `or` fused with a bang is the unwrap operator.
        if text == "or" && self.cursor.current_char() == '!' {
            self.cursor.advance();
            return Token::OrBang;
        }

        match keyword_from_ident(text) {
            Some(kw) => kw,
            None => Token::Ident(Symbol::intern(text)),
        }
    }

    fn lex_string(&mut self) -> Token {
        self.cursor.advance(); // opening quote
        let mut value = String::new();

        loop {
            match self.cursor.current_char() {
                '"' => {
                    self.cursor.advance();
                    return Token::Str(Symbol::intern(&value));
                }
                '\0' | '\n' => {
                    self.report_error(
                        codes::E_LEX_UNTERMINATED_STRING,
                        "unterminated string literal".to_string(),
                    );
                    return Token::Invalid(value);
                }
                '\\' => {
                    self.cursor.advance();
                    let esc = self.cursor.current_char();
                    self.cursor.advance();
                    match esc {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        '"' => value.push('"'),
                        '\\' => value.push('\\'),
                        other => {
                            self.report_error(
                                codes::E_LEX_INVALID_ESCAPE,
                                format!("invalid escape sequence '\\{}'", other),
                            );
                        }
                    }
                }
                c => {
                    value.push(c);
                    self.cursor.advance();
                }
            }
        }
    }

    fn lex_number(&mut self) -> Token {
        let start = self.cursor.position();

        if self.cursor.current_char() == '0' {
            match self.cursor.peek_char(1) {
                'x' | 'X' => return self.lex_radix_int(start, 16),
                'b' | 'B' => return self.lex_radix_int(start, 2),
                _ => {}
            }
        }

        while self.cursor.current_char().is_ascii_digit() {
            self.cursor.advance();
        }

        let mut is_float = false;

        // A '.' continues the number only when followed by a digit;
        // `0..5` must leave the range operator alone.
        if self.cursor.current_char() == '.' && self.cursor.peek_char(1).is_ascii_digit() {
            is_float = true;
            self.cursor.advance();
            while self.cursor.current_char().is_ascii_digit() {
                self.cursor.advance();
            }
        }

        if matches!(self.cursor.current_char(), 'e' | 'E') {
            let mut lookahead = 1;
            if matches!(self.cursor.peek_char(1), '+' | '-') {
                lookahead = 2;
            }
            if self.cursor.peek_char(lookahead).is_ascii_digit() {
                is_float = true;
                self.cursor.advance_n(lookahead);
                while self.cursor.current_char().is_ascii_digit() {
                    self.cursor.advance();
                }
            }
        }

        let text = self.cursor.slice_from(start);

        if self.cursor.current_char().is_ascii_alphabetic() {
            self.report_error(
                codes::E_LEX_MALFORMED_NUMBER,
                format!("malformed numeric literal starting with '{}'", text),
            );
            while self.cursor.current_char().is_ascii_alphanumeric() {
                self.cursor.advance();
            }
            return Token::Invalid(self.cursor.slice_from(start).to_string());
        }

        if is_float {
            match text.parse::<f64>() {
                Ok(v) => Token::Float(v),
                Err(_) => {
                    self.report_error(
                        codes::E_LEX_MALFORMED_NUMBER,
                        format!("malformed float literal '{}'", text),
                    );
                    Token::Invalid(text.to_string())
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => Token::Int(v),
                Err(_) => {
                    self.report_error(
                        codes::E_LEX_MALFORMED_NUMBER,
                        format!("integer literal '{}' out of range", text),
                    );
                    Token::Invalid(text.to_string())
                }
            }
        }
    }

    fn lex_radix_int(&mut self, start: usize, radix: u32) -> Token {
        self.cursor.advance_n(2); // 0x / 0b prefix
        let digits_start = self.cursor.position();
        while self.cursor.current_char().is_digit(radix) || self.cursor.current_char() == '_' {
            self.cursor.advance();
        }
        let digits: String = self
            .cursor
            .slice_from(digits_start)
            .chars()
            .filter(|&c| c != '_')
            .collect();

        if digits.is_empty() || self.cursor.current_char().is_ascii_alphanumeric() {
            while self.cursor.current_char().is_ascii_alphanumeric() {
                self.cursor.advance();
            }
            let text = self.cursor.slice_from(start);
            self.report_error(
                codes::E_LEX_MALFORMED_NUMBER,
                format!("malformed numeric literal '{}'", text),
            );
            return Token::Invalid(text.to_string());
        }

        match i64::from_str_radix(&digits, radix) {
            Ok(v) => Token::Int(v),
            Err(_) => {
                let text = self.cursor.slice_from(start);
                self.report_error(
                    codes::E_LEX_MALFORMED_NUMBER,
                    format!("integer literal '{}' out of range", text),
                );
                Token::Invalid(text.to_string())
            }
        }
    }

    // =========================================================================
    // WHITESPACE AND ERRORS
    // =========================================================================

    /// Skips spaces, tabs, carriage returns, and `//` comments.
    ///
    /// Newlines survive: they are statement separators.
    fn skip_blanks_and_comments(&mut self) {
        loop {
            match self.cursor.current_char() {
                ' ' | '\t' | '\r' => self.cursor.advance(),
                '/' if self.cursor.peek_char(1) == '/' => {
                    while !self.cursor.is_at_end() && self.cursor.current_char() != '\n' {
                        self.cursor.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn report_error(&mut self, code: rilc_util::DiagnosticCode, message: String) {
        let span = Span::new(
            self.token_start,
            self.cursor.position().max(self.token_start + 1),
            self.token_start_line,
            self.token_start_column,
        );
        self.handler.error(code, message, span);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> Vec<Token> {
        let handler = Handler::new();
        let mut lexer = Lexer::new(source, &handler);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            if token == Token::Eof {
                break;
            }
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn test_walrus_and_update() {
        let t = lex_all("x := 1\nx <- 2");
        assert_eq!(
            t,
            vec![
                Token::Ident(Symbol::intern("x")),
                Token::Walrus,
                Token::Int(1),
                Token::Newline,
                Token::Ident(Symbol::intern("x")),
                Token::LeftArrow,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_bitwise_b_suffix_vs_pipe() {
        assert_eq!(
            lex_all("a |b c"),
            vec![
                Token::Ident(Symbol::intern("a")),
                Token::PipeB,
                Token::Ident(Symbol::intern("c")),
            ]
        );
        assert_eq!(
            lex_all("a | bits"),
            vec![
                Token::Ident(Symbol::intern("a")),
                Token::Pipe,
                Token::Ident(Symbol::intern("bits")),
            ]
        );
    }

    #[test]
    fn test_shift_family() {
        assert_eq!(lex_all("<<b")[0], Token::ShlB);
        assert_eq!(lex_all(">>b")[0], Token::ShrB);
        assert_eq!(lex_all("<<")[0], Token::Shl);
        assert_eq!(lex_all(">>")[0], Token::Shr);
    }

    #[test]
    fn test_range_vs_float() {
        assert_eq!(
            lex_all("0..<5"),
            vec![Token::Int(0), Token::DotDotLt, Token::Int(5)]
        );
        assert_eq!(
            lex_all("0..5"),
            vec![Token::Int(0), Token::DotDot, Token::Int(5)]
        );
        assert_eq!(lex_all("0.5"), vec![Token::Float(0.5)]);
    }

    #[test]
    fn test_arrows() {
        assert_eq!(lex_all("=>")[0], Token::FatArrow);
        assert_eq!(lex_all("~>")[0], Token::SquigArrow);
        assert_eq!(lex_all("->")[0], Token::Arrow);
        assert_eq!(lex_all("<>")[0], Token::Diamond);
    }

    #[test]
    fn test_or_bang() {
        assert_eq!(
            lex_all("v or! 0"),
            vec![Token::Ident(Symbol::intern("v")), Token::OrBang, Token::Int(0)]
        );
        // `or` without the bang stays a keyword
        assert_eq!(lex_all("a or c")[1], Token::Or);
    }

    #[test]
    fn test_loop_introducers() {
        assert_eq!(lex_all("@")[0], Token::At);
        assert_eq!(lex_all("@@")[0], Token::AtAt);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            lex_all(r#""a\n\t\"\\b""#),
            vec![Token::Str(Symbol::intern("a\n\t\"\\b"))]
        );
    }

    #[test]
    fn test_unterminated_string_reports() {
        let handler = Handler::new();
        let mut lexer = Lexer::new("\"abc", &handler);
        let t = lexer.next_token();
        assert!(matches!(t, Token::Invalid(_)));
        assert!(handler.has_errors());
    }

    #[test]
    fn test_radix_literals() {
        assert_eq!(lex_all("0xFF")[0], Token::Int(255));
        assert_eq!(lex_all("0b1010")[0], Token::Int(10));
    }

    #[test]
    fn test_power_operator() {
        assert_eq!(
            lex_all("6 ** 2"),
            vec![Token::Int(6), Token::StarStar, Token::Int(2)]
        );
    }

    #[test]
    fn test_comment_skipped_newline_kept() {
        let t = lex_all("1 // comment\n2");
        assert_eq!(t, vec![Token::Int(1), Token::Newline, Token::Int(2)]);
    }

    #[test]
    fn test_float_exponent() {
        assert_eq!(lex_all("1e3")[0], Token::Float(1000.0));
        assert_eq!(lex_all("2.5e-1")[0], Token::Float(0.25));
    }

    #[test]
    fn test_spans_track_columns() {
        let handler = Handler::new();
        let tokens = Lexer::tokenize("x := 42", &handler);
        assert_eq!(tokens[1].span.column, 3);
        assert_eq!(tokens[2].span.column, 6);
    }
}
