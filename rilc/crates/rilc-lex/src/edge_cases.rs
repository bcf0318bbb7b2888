//! Edge case tests for rilc-lex

#[cfg(test)]
mod tests {
    use crate::{Lexer, Token};
    use rilc_util::{Handler, Symbol};

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

    // ==================== EDGE CASES ====================

    #[test]
    fn test_edge_empty_source() {
        assert!(lex_all("").is_empty());
    }

    #[test]
    fn test_edge_only_whitespace() {
        assert!(lex_all("  \t  \r").is_empty());
    }

    #[test]
    fn test_edge_only_comment() {
        assert!(lex_all("// nothing here").is_empty());
    }

    #[test]
    fn test_edge_single_char_ident() {
        let t = lex_all("x");
        assert_eq!(t[0], Token::Ident(Symbol::intern("x")));
    }

    #[test]
    fn test_edge_long_identifier() {
        let name = "a".repeat(10000);
        let t = lex_all(&name);
        assert_eq!(t[0], Token::Ident(Symbol::intern(&name)));
    }

    #[test]
    fn test_edge_keywords_not_idents() {
        let t = lex_all("shadow arena defer");
        assert_eq!(t[0], Token::Shadow);
        assert_eq!(t[1], Token::Arena);
        assert_eq!(t[2], Token::Defer);
    }

    #[test]
    fn test_edge_keyword_prefix_is_ident() {
        // Identifier that merely starts with a keyword
        let t = lex_all("arenas");
        assert_eq!(t[0], Token::Ident(Symbol::intern("arenas")));
    }

    #[test]
    fn test_edge_hex_bounds() {
        let t = lex_all("0x0 0xFF");
        assert_eq!(t[0], Token::Int(0));
        assert_eq!(t[1], Token::Int(255));
    }

    #[test]
    fn test_edge_binary() {
        let t = lex_all("0b0 0b1010");
        assert_eq!(t[1], Token::Int(10));
    }

    #[test]
    fn test_edge_hex_without_digits() {
        let handler = Handler::new();
        let mut lexer = Lexer::new("0x", &handler);
        assert!(matches!(lexer.next_token(), Token::Invalid(_)));
        assert!(handler.has_errors());
    }

    #[test]
    fn test_edge_number_then_ident_reports() {
        let handler = Handler::new();
        let mut lexer = Lexer::new("12abc", &handler);
        assert!(matches!(lexer.next_token(), Token::Invalid(_)));
        assert!(handler.has_errors());
    }

    #[test]
    fn test_edge_adjacent_operators() {
        // `<=` must win over `<` `=`, `:=` over `:` `=`
        assert_eq!(lex_all("<=")[0], Token::Le);
        assert_eq!(lex_all(":=")[0], Token::Walrus);
        assert_eq!(lex_all("<-")[0], Token::LeftArrow);
    }

    #[test]
    fn test_edge_tilde_forms() {
        assert_eq!(lex_all("~>")[0], Token::SquigArrow);
        assert_eq!(lex_all("~b")[0], Token::TildeB);
    }

    #[test]
    fn test_edge_pipe_pipe() {
        assert_eq!(lex_all("||")[0], Token::PipePipe);
    }

    #[test]
    fn test_edge_bare_ampersand_invalid() {
        let handler = Handler::new();
        let mut lexer = Lexer::new("a & c", &handler);
        lexer.next_token();
        assert!(matches!(lexer.next_token(), Token::Invalid(_)));
        assert!(handler.has_errors());
    }

    #[test]
    fn test_edge_crlf_newlines() {
        let t = lex_all("1\r\n2");
        assert_eq!(t, vec![Token::Int(1), Token::Newline, Token::Int(2)]);
    }

    #[test]
    fn test_edge_consecutive_newlines() {
        let t = lex_all("1\n\n\n2");
        assert_eq!(
            t,
            vec![
                Token::Int(1),
                Token::Newline,
                Token::Newline,
                Token::Newline,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_edge_string_with_operators_inside() {
        let t = lex_all(r#""a := b | c""#);
        assert_eq!(t, vec![Token::Str(Symbol::intern("a := b | c"))]);
    }

    #[test]
    fn test_edge_invalid_escape_continues() {
        let handler = Handler::new();
        let mut lexer = Lexer::new(r#""a\qb""#, &handler);
        // Still produces a string token so the parser can continue
        assert!(matches!(lexer.next_token(), Token::Str(_)));
        assert!(handler.has_errors());
    }

    #[test]
    fn test_edge_max_i64() {
        let t = lex_all("9223372036854775807");
        assert_eq!(t[0], Token::Int(i64::MAX));
    }

    #[test]
    fn test_edge_i64_overflow_reports() {
        let handler = Handler::new();
        let mut lexer = Lexer::new("9223372036854775808", &handler);
        assert!(matches!(lexer.next_token(), Token::Invalid(_)));
        assert!(handler.has_errors());
    }

    #[test]
    fn test_edge_underscore_ident() {
        let t = lex_all("_tmp");
        assert_eq!(t[0], Token::Ident(Symbol::intern("_tmp")));
    }
}
