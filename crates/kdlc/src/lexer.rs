//! Lexical analysis for KDL.
//!
//! Tokenization is logos-based. KDL distinguishes several closely related
//! identifier classes by shape alone:
//!
//! - `field-or-key` — all-lowercase, could be either (`spec`, `value`)
//! - `definite-key` — contains a dash (`list-map`, `create-only`)
//! - `definite-field` — lowercase start with an inner capital (`nodeName`)
//! - `type-ident` — uppercase start (`Pod`)
//! - paths — `Pod::Spec`, `core/v1::Pod`, `core/v1`, `kgo::name`, `.name`
//!
//! The `alias::name` marker path versus `key:` followed immediately by a
//! value is the one genuinely nasty case, and longest-match with
//! backtracking resolves it: `key:value` falls back to `key`, `:`,
//! `value`.
//!
//! Comments are skipped during lexing; doc comments (`///…`) are a real
//! token class. Invalid input becomes [`Token::Unexpected`] with recovery
//! to the next `}` or `)` so one bad run of bytes produces one diagnostic.

use crate::trace::{Context, NoteValue};
use logos::Logos;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

/// Lexer error detail, attached to `Unexpected` tokens via diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LexError {
    #[default]
    UnexpectedCharacter,
    /// A DNS label in a group name exceeded 63 bytes.
    LabelTooLong,
    /// A group name exceeded 253 bytes.
    GroupTooLong,
    /// A DNS label in a group name ended with a dash.
    LabelEndsWithDash,
}

impl LexError {
    fn message(self) -> &'static str {
        match self {
            LexError::UnexpectedCharacter => "unexpected input",
            LexError::LabelTooLong => "DNS labels in group names may not be longer than 63 bytes",
            LexError::GroupTooLong => "group names may not be longer than 253 bytes",
            LexError::LabelEndsWithDash => "the last character of a DNS label may not be a dash",
        }
    }
}

/// Validate the group portion of a qualified path / import name.
fn check_group(slice: &str) -> Result<Rc<str>, LexError> {
    let group = slice.split('/').next().unwrap_or("");
    if group.len() > 253 {
        return Err(LexError::GroupTooLong);
    }
    for label in group.split('.') {
        if label.len() > 63 {
            return Err(LexError::LabelTooLong);
        }
        if label.ends_with('-') {
            return Err(LexError::LabelEndsWithDash);
        }
    }
    Ok(Rc::from(slice))
}

fn unescape_string(raw: &str) -> Option<String> {
    // strip the surrounding quotes; the regex guarantees they are present
    let content = &raw[1..raw.len() - 1];
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next()? {
            '"' => result.push('"'),
            '\\' => result.push('\\'),
            '/' => result.push('/'),
            'b' => result.push('\u{0008}'),
            'f' => result.push('\u{000C}'),
            'n' => result.push('\n'),
            'r' => result.push('\r'),
            't' => result.push('\t'),
            'u' => {
                let digits: String = chars.by_ref().take(4).collect();
                if digits.len() != 4 {
                    return None;
                }
                let code = u32::from_str_radix(&digits, 16).ok()?;
                result.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            _ => return None,
        }
    }
    Some(result)
}

/// A KDL token.
///
/// Identifier-ish payloads are `Rc<str>` for cheap cloning through the
/// parser.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^/\n][^\n]*")] // line comment (but not ///)
#[logos(skip r"//")] // bare // before a newline
#[logos(skip r"/\*([^*]|\*[^/])*\*/")] // block comment
pub enum Token {
    // === Keywords ===
    #[token("import")]
    Import,
    #[token("types")]
    Types,
    #[token("markers")]
    Markers,
    #[token("from")]
    From,
    #[token("group-version")]
    GroupVersion,
    #[token("kind")]
    Kind,
    #[token("struct")]
    Struct,
    #[token("union")]
    Union,
    #[token("enum")]
    Enum,
    #[token("newtype")]
    Newtype,
    #[token("marker")]
    Marker,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // === Punctuation ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token("@")]
    At,

    // === Identifier classes ===
    /// All-lowercase identifier: a field name or a key, parser decides.
    #[regex(r"[a-z][a-z0-9]*", |lex| Rc::from(lex.slice()))]
    FieldOrKey(Rc<str>),

    /// Kebab-case: definitely a key.
    #[regex(r"[a-z][a-z0-9]*(-[a-z0-9]+)+", |lex| Rc::from(lex.slice()))]
    DefKey(Rc<str>),

    /// Lowercase start with an inner capital: definitely a field name.
    /// `_inline` is the one non-lowercase-start member of this class.
    #[regex(r"[a-z][a-z0-9]*[A-Z][a-zA-Z0-9]*", |lex| Rc::from(lex.slice()))]
    #[token("_inline", |lex| Rc::from(lex.slice()))]
    DefField(Rc<str>),

    /// Uppercase start: a type identifier.
    #[regex(r"[A-Z][a-zA-Z0-9]*", |lex| Rc::from(lex.slice()))]
    TypeIdent(Rc<str>),

    /// `Type::Nested(::Deeper)*` without a group-version.
    #[regex(r"[A-Z][a-zA-Z0-9]*(::[A-Z][a-zA-Z0-9]*)+", |lex| Rc::from(lex.slice()))]
    UnqualPath(Rc<str>),

    /// `group/version::Type(::Nested)*`.
    #[regex(
        r"[a-z][a-z0-9-]*(\.[a-z][a-z0-9-]*)*/(v[1-9][0-9]*((alpha|beta)[1-9][0-9]*)?|__internal)::[A-Z][a-zA-Z0-9]*(::[A-Z][a-zA-Z0-9]*)*",
        |lex| check_group(lex.slice())
    )]
    QualPath(Rc<str>),

    /// `group/version` as used in import lists.
    #[regex(
        r"[a-z][a-z0-9-]*(\.[a-z][a-z0-9-]*)*/(v[1-9][0-9]*((alpha|beta)[1-9][0-9]*)?|__internal)",
        |lex| check_group(lex.slice())
    )]
    ImportName(Rc<str>),

    /// `alias::name` for an imported marker.
    #[regex(
        r"[a-z][a-z0-9]*(-[a-z0-9]+)*::[a-z][a-z0-9]*(-[a-z0-9]+)*",
        |lex| Rc::from(lex.slice())
    )]
    MarkerPath(Rc<str>),

    /// `.fieldName` schema-side field reference. Payload excludes the dot.
    #[regex(r"\.[a-z][a-zA-Z0-9]*", |lex| Rc::from(&lex.slice()[1..]))]
    FieldPath(Rc<str>),

    /// Raw back-tick identifier, classified by [`lex`] into `DefKey` or
    /// `FieldOrKey` before the parser sees it. Payload excludes the ticks.
    #[regex(r"`[a-zA-Z0-9-]+`", |lex| { let s = lex.slice(); Rc::from(&s[1..s.len()-1]) })]
    RawIdent(Rc<str>),

    // === Literals ===
    /// Integer literal; no leading zeros, no decimals.
    #[regex(r"-?[1-9][0-9]*", |lex| lex.slice().parse::<i64>().ok())]
    Number(i64),

    /// String literal with the JSON escape set (plus `\uXXXX`); raw
    /// newlines are rejected by the pattern itself.
    #[regex(
        r#""([^"\\\r\n]|\\(["\\/bfnrt]|u[0-9a-fA-F]{4}))*""#,
        |lex| unescape_string(lex.slice()).map(|s| Rc::from(s.as_str()))
    )]
    String(Rc<str>),

    /// `///` doc line; payload is everything after the slashes, untrimmed
    /// (the parser cares about the leading space and `# ` section titles).
    #[regex(r"///[^\n]*", |lex| Rc::from(&lex.slice()[3..]), priority = 10)]
    Doc(Rc<str>),

    /// Placeholder emitted for unlexable input after recovery.
    Unexpected,
}

impl Token {
    /// Class name used in expected-token diagnostics.
    pub fn class_name(&self) -> &'static str {
        match self {
            Token::Import => "import",
            Token::Types => "types",
            Token::Markers => "markers",
            Token::From => "from",
            Token::GroupVersion => "group-version",
            Token::Kind => "kind",
            Token::Struct => "struct",
            Token::Union => "union",
            Token::Enum => "enum",
            Token::Newtype => "newtype",
            Token::Marker => "marker",
            Token::True => "true",
            Token::False => "false",
            Token::LParen => "`(`",
            Token::RParen => "`)`",
            Token::LBrace => "`{`",
            Token::RBrace => "`}`",
            Token::LBracket => "`[`",
            Token::RBracket => "`]`",
            Token::Colon => "`:`",
            Token::Comma => "`,`",
            Token::Semi => "`;`",
            Token::At => "`@`",
            Token::FieldOrKey(_) => "<field-or-key>",
            Token::DefKey(_) => "<key>",
            Token::DefField(_) => "<field>",
            Token::TypeIdent(_) => "<type>",
            Token::UnqualPath(_) => "<unqualified-path>",
            Token::QualPath(_) => "<qualified-path>",
            Token::ImportName(_) => "<import-name>",
            Token::MarkerPath(_) => "<qualified-marker>",
            Token::FieldPath(_) => "<field-path>",
            Token::RawIdent(_) => "<raw-identifier>",
            Token::Number(_) => "<number>",
            Token::String(_) => "<string>",
            Token::Doc(_) => "<doc>",
            Token::Unexpected => "<unexpected>",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::FieldOrKey(s)
            | Token::DefKey(s)
            | Token::DefField(s)
            | Token::TypeIdent(s)
            | Token::UnqualPath(s)
            | Token::QualPath(s)
            | Token::ImportName(s)
            | Token::MarkerPath(s)
            | Token::RawIdent(s) => write!(f, "{}", s),
            Token::FieldPath(s) => write!(f, ".{}", s),
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "{:?}", s),
            Token::Doc(text) => write!(f, "///{}", text),
            other => {
                // strip the backticks the class names carry for prose
                let name = other.class_name();
                write!(f, "{}", name.trim_matches('`'))
            }
        }
    }
}

/// Tokenize `source`, reporting lexical errors through `ctx`.
///
/// Errors become a single [`Token::Unexpected`] covering the bad input;
/// recovery skips ahead past the next `}` or `)` so the parser can pick
/// back up at a stable boundary.
pub fn lex(ctx: &Context, file_id: u16, source: &str) -> Vec<(Token, Range<usize>)> {
    let ctx = ctx.describe("scanner");
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(Token::RawIdent(content)) => {
                // dash means this raw identifier can only be a key
                let token = if content.contains('-') {
                    Token::DefKey(content)
                } else {
                    Token::FieldOrKey(content)
                };
                tokens.push((token, span));
            }
            Ok(token) => tokens.push((token, span)),
            Err(err) => {
                let err_ctx = ctx
                    .note("unexpected", NoteValue::Str(lexer.slice().to_string()))
                    .in_span(crate::foundation::Span::new(
                        file_id,
                        span.start as u32,
                        span.end as u32,
                    ));
                err_ctx.error_at(err.message());

                // skip forward past the next scope terminator
                let rest = lexer.remainder();
                if let Some(idx) = rest.find(['}', ')']) {
                    lexer.bump(idx + 1);
                } else {
                    lexer.bump(rest.len());
                }
                tokens.push((Token::Unexpected, span.start..lexer.span().end));
            }
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Diagnostics;

    /// Lex and strip spans; panics if anything failed to lex.
    fn lex_strict(source: &str) -> Vec<Token> {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let tokens: Vec<Token> = lex(&ctx, 0, source).into_iter().map(|(t, _)| t).collect();
        assert!(!sink.had_error(), "lexing failed for {:?}", source);
        tokens
    }

    fn field(s: &str) -> Token {
        Token::FieldOrKey(Rc::from(s))
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            lex_strict("import types markers from kind struct union enum newtype marker"),
            vec![
                Token::Import,
                Token::Types,
                Token::Markers,
                Token::From,
                Token::Kind,
                Token::Struct,
                Token::Union,
                Token::Enum,
                Token::Newtype,
                Token::Marker,
            ]
        );
    }

    #[test]
    fn test_group_version_keyword_beats_key() {
        assert_eq!(lex_strict("group-version"), vec![Token::GroupVersion]);
        assert_eq!(
            lex_strict("group-versions"),
            vec![Token::DefKey(Rc::from("group-versions"))]
        );
    }

    #[test]
    fn test_identifier_classes() {
        assert_eq!(
            lex_strict("spec nodeName create-only Pod"),
            vec![
                field("spec"),
                Token::DefField(Rc::from("nodeName")),
                Token::DefKey(Rc::from("create-only")),
                Token::TypeIdent(Rc::from("Pod")),
            ]
        );
    }

    #[test]
    fn test_inline_is_definitely_field() {
        assert_eq!(
            lex_strict("_inline"),
            vec![Token::DefField(Rc::from("_inline"))]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            lex_strict("42 -17 100"),
            vec![Token::Number(42), Token::Number(-17), Token::Number(100)]
        );
    }

    #[test]
    fn test_zero_is_not_a_number() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let tokens = lex(&ctx, 0, "0");
        assert!(sink.had_error());
        assert!(matches!(tokens[0].0, Token::Unexpected));
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            lex_strict(r#""hello" "a\nb" "q\"q" "A""#),
            vec![
                Token::String(Rc::from("hello")),
                Token::String(Rc::from("a\nb")),
                Token::String(Rc::from("q\"q")),
                Token::String(Rc::from("A")),
            ]
        );
    }

    #[test]
    fn test_string_rejects_raw_newline() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        lex(&ctx, 0, "\"abc\ndef\"");
        assert!(sink.had_error());
    }

    #[test]
    fn test_field_path() {
        assert_eq!(
            lex_strict(".name .hostPath"),
            vec![
                Token::FieldPath(Rc::from("name")),
                Token::FieldPath(Rc::from("hostPath")),
            ]
        );
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            lex_strict("Pod::Spec core/v1::Pod k8s.example.io/v1alpha2::Foo::Bar core/v1"),
            vec![
                Token::UnqualPath(Rc::from("Pod::Spec")),
                Token::QualPath(Rc::from("core/v1::Pod")),
                Token::QualPath(Rc::from("k8s.example.io/v1alpha2::Foo::Bar")),
                Token::ImportName(Rc::from("core/v1")),
            ]
        );
    }

    #[test]
    fn test_internal_version() {
        assert_eq!(
            lex_strict("core/__internal"),
            vec![Token::ImportName(Rc::from("core/__internal"))]
        );
    }

    #[test]
    fn test_marker_path_vs_key_colon() {
        // the two-lookahead case: `key:value` is a key, a colon, a value
        assert_eq!(
            lex_strict("kgo::name"),
            vec![Token::MarkerPath(Rc::from("kgo::name"))]
        );
        assert_eq!(
            lex_strict("key:value"),
            vec![field("key"), Token::Colon, field("value")]
        );
    }

    #[test]
    fn test_raw_idents() {
        // raw identifiers escape keyword collisions; a dash forces key
        assert_eq!(lex_strict("`from`"), vec![field("from")]);
        assert_eq!(
            lex_strict("`created-at`"),
            vec![Token::DefKey(Rc::from("created-at"))]
        );
        // legacy exception: capital start still lexes
        assert_eq!(lex_strict("`Weird`"), vec![field("Weird")]);
    }

    #[test]
    fn test_comments_skipped_docs_kept() {
        assert_eq!(
            lex_strict("// plain\n/* block\ncomment */ kind /// a doc\nPod"),
            vec![
                Token::Kind,
                Token::Doc(Rc::from(" a doc")),
                Token::TypeIdent(Rc::from("Pod")),
            ]
        );
    }

    #[test]
    fn test_doc_section_payload_untrimmed() {
        assert_eq!(
            lex_strict("/// # Example\n"),
            vec![Token::Doc(Rc::from(" # Example"))]
        );
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            lex_strict("( ) { } [ ] : , ; @"),
            vec![
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::LBracket,
                Token::RBracket,
                Token::Colon,
                Token::Comma,
                Token::Semi,
                Token::At,
            ]
        );
    }

    #[test]
    fn test_group_label_too_long() {
        let long_label = "a".repeat(64);
        let source = format!("{}/v1::Pod", long_label);
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        lex(&ctx, 0, &source);
        assert!(sink.had_error());
    }

    #[test]
    fn test_error_recovery_skips_to_terminator() {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let tokens = lex(&ctx, 0, "kind Pod { % ?? } struct Spec {");
        assert!(sink.had_error());
        // one Unexpected swallowing the junk through the terminator,
        // then lexing resumes
        let kinds: Vec<&Token> = tokens.iter().map(|(t, _)| t).collect();
        assert!(kinds.contains(&&Token::Unexpected));
        assert!(kinds.contains(&&Token::Struct));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_field_with_trailing_digits() {
        assert_eq!(
            lex_strict("ipv4 addr2"),
            vec![field("ipv4"), field("addr2")]
        );
    }

    /// Token spans tile the source: everything between two consecutive
    /// tokens is whitespace or a comment.
    #[test]
    fn test_token_spans_tile_source_modulo_trivia() {
        let source = concat!(
            "group-version(group: \"core\", version: \"v1\") { // api group\n",
            "    kind Pod { spec: Spec, } /* done */\n",
            "}\n",
        );
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let tokens = lex(&ctx, 0, source);
        assert!(!sink.had_error());

        let mut pos = 0;
        for (_, range) in &tokens {
            let gap = source[pos..range.start].trim_start();
            assert!(
                gap.is_empty() || gap.starts_with("//") || gap.starts_with("/*"),
                "unexpected gap between tokens: {:?}",
                gap
            );
            pos = range.end;
        }
        assert!(source[pos..].trim_start().is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(Token::GroupVersion.to_string(), "group-version");
        assert_eq!(Token::LBrace.to_string(), "{");
        assert_eq!(field("spec").to_string(), "spec");
        assert_eq!(Token::Number(-3).to_string(), "-3");
        assert_eq!(Token::FieldPath(Rc::from("name")).to_string(), ".name");
    }
}
