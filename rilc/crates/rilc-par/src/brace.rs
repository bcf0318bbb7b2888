//! Brace classifier - the central lookahead oracle.
//!
//! An opening brace begins one of three constructs and the grammar gives
//! no prefix hint. The classifier scans the balanced interior and decides
//! at the first unambiguous token, never committing early:
//!
//! - `:` at depth 0 before anything else decisive  → **map literal**
//! - `=>` or `~>` at depth 0                       → **match expression**
//! - `=` / `:=` at depth 0 before any arrow        → **statement block**
//!   (an assignment can only be a statement, and a lambda bound inside a
//!   block would otherwise make its `=>` look like a match arm)
//! - none of the above in the whole interior       → **statement block**
//!
//! Depth counts `{`/`(`/`[` nesting, so arrows inside nested lambdas or
//! maps inside arms never leak into the outer decision.

use rilc_lex::{Token, TokenWithSpan};

/// Classification of a brace-delimited construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BraceKind {
    /// `{key: value, ...}`
    Map,
    /// `{pat => body ...}` or guard form `{| cond => body ...}`
    Match,
    /// `{stmt; stmt; ...}`
    Block,
}

/// Classify the construct opened by the `{` at `tokens[open]`.
///
/// `open` must index an `LBrace`. The scan is bounded by the matching
/// close brace (or end of input for unbalanced source, which the parser
/// reports separately).
pub fn classify(tokens: &[TokenWithSpan], open: usize) -> BraceKind {
    debug_assert!(matches!(tokens[open].token, Token::LBrace));

    let mut depth = 0u32;
    let mut idx = open + 1;

    while idx < tokens.len() {
        match &tokens[idx].token {
            Token::Eof => break,
            Token::LBrace | Token::LParen | Token::LBracket => depth += 1,
            Token::RBrace | Token::RParen | Token::RBracket => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            token if depth == 0 => match token {
                Token::Colon => return BraceKind::Map,
                Token::FatArrow | Token::SquigArrow => return BraceKind::Match,
                // An assignment statement means this is a block; any
                // arrow later belongs to a lambda bound inside it.
                Token::Assign | Token::Walrus => return BraceKind::Block,
                _ => {}
            },
            _ => {}
        }
        idx += 1;
    }

    BraceKind::Block
}

#[cfg(test)]
mod tests {
    use super::*;
    use rilc_lex::Lexer;
    use rilc_util::Handler;

    fn classify_source(source: &str) -> BraceKind {
        let handler = Handler::new();
        let tokens = Lexer::tokenize(source, &handler);
        let open = tokens
            .iter()
            .position(|t| t.token == Token::LBrace)
            .expect("fixture must contain a brace");
        classify(&tokens, open)
    }

    // Fixture triples per the disambiguation contract: each construct in
    // its canonical shape plus the confusable edge forms.

    #[test]
    fn test_map_simple() {
        assert_eq!(classify_source("{x: 1, y: 2}"), BraceKind::Map);
    }

    #[test]
    fn test_map_expression_keys() {
        assert_eq!(classify_source("{1 + 2: 3}"), BraceKind::Map);
        assert_eq!(classify_source("{f(a): g(b)}"), BraceKind::Map);
    }

    #[test]
    fn test_match_value_arms() {
        assert_eq!(classify_source("{1 => 10\n2 => 20}"), BraceKind::Match);
    }

    #[test]
    fn test_match_fallthrough_only() {
        assert_eq!(classify_source("{~> 0}"), BraceKind::Match);
    }

    #[test]
    fn test_match_guard_arms() {
        assert_eq!(
            classify_source("{\n| x > 3 => 1\n| x > 0 => 2\n~> 0\n}"),
            BraceKind::Match
        );
    }

    #[test]
    fn test_block_simple() {
        assert_eq!(classify_source("{println(1)\nprintln(2)}"), BraceKind::Block);
    }

    #[test]
    fn test_block_empty() {
        assert_eq!(classify_source("{}"), BraceKind::Block);
    }

    #[test]
    fn test_block_with_inner_lambda() {
        // The `:=` decides block before the lambda's `=>` is reached.
        assert_eq!(
            classify_source("{d := x => x * 2\nd(2)}"),
            BraceKind::Block
        );
    }

    #[test]
    fn test_nested_map_inside_match_arm() {
        // The map's colon is at depth 1 and must not decide.
        assert_eq!(classify_source("{1 => [2]\n2 => f({a: 1})}"), BraceKind::Match);
    }

    #[test]
    fn test_nested_match_inside_map_value() {
        assert_eq!(classify_source("{k: (x { 1 => 2 })}"), BraceKind::Map);
    }

    #[test]
    fn test_nested_block_inside_match_body() {
        assert_eq!(
            classify_source("{1 => 2\n~> 9}"),
            BraceKind::Match
        );
    }

    #[test]
    fn test_block_call_only() {
        assert_eq!(classify_source("{f(a, b)}"), BraceKind::Block);
    }

    #[test]
    fn test_block_pipeline() {
        assert_eq!(classify_source("{xs | sum}"), BraceKind::Block);
    }
}
