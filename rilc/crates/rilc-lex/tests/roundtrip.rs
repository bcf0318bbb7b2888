//! Lexer round-trip property: concatenating the lexemes of every token
//! reconstructs the input up to whitespace.

use proptest::prelude::*;

use rilc_lex::Lexer;
use rilc_util::Handler;

/// The closed operator/delimiter vocabulary.
const OPERATORS: &[&str] = &[
    ":=", "<-", "<=", ">=", "==", "!=", "..", "..<", "**", "=>", "~>", "<>", "||", "@@", "<<b",
    ">>b", "&b", "|b", "^b", "~b", "(", ")", "[", "]", "{", "}", ",", "#", "+", "-", "*", "/",
];

/// One lexable word from the surface vocabulary.
fn word() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-z0-9_]{0,8}".prop_map(|s| s),
        (0i64..=99999).prop_map(|n| n.to_string()),
        (0u32..999, 1u32..999).prop_map(|(a, b)| format!("{}.{}", a, b)),
        "\"[a-z ]{0,12}\"".prop_map(|s| s),
        proptest::sample::select(OPERATORS).prop_map(|s| s.to_string()),
    ]
}

proptest! {
    #[test]
    fn lexemes_reconstruct_input(words in proptest::collection::vec(word(), 0..40)) {
        let source = words.join(" ");
        let handler = Handler::new();
        let tokens = Lexer::tokenize(&source, &handler);
        prop_assert!(!handler.has_errors(), "vocabulary should lex cleanly: {:?}", source);

        let mut rebuilt = String::new();
        for t in &tokens {
            rebuilt.push_str(&source[t.span.start..t.span.end]);
        }

        let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        prop_assert_eq!(squash(&rebuilt), squash(&source));
    }

    #[test]
    fn lexer_total_no_panic(source in "\\PC{0,120}") {
        // Arbitrary printable input may produce errors but never a panic.
        let handler = Handler::new();
        let _ = Lexer::tokenize(&source, &handler);
    }
}
