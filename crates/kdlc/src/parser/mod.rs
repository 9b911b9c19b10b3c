//! Hand-written recursive descent parser for KDL.
//!
//! Single token of lookahead, spans on every production, and best-effort
//! error recovery: every diagnostic goes through the trace [`Context`], the
//! parser never aborts, and every error path makes forward progress. On a
//! mismatch, [`Parser::expect_or_recover`] skips ahead to the expected
//! token or the end of the current scope so one typo does not cascade.
//!
//! Module layout:
//! - `stream` — token stream wrapper with lookahead
//! - `decl` — imports, group-versions, declarations, marker decl sets
//! - this module — the `Parser` itself plus the shared small grammars
//!   (values, parameter lists, docs, markers)

mod decl;
mod stream;

pub use stream::TokenStream;

use crate::ast;
use crate::foundation::Span;
use crate::lexer::Token;
use crate::trace::{Context, NoteValue};
use std::ops::Range;

/// Parse a lexed file into an AST.
///
/// Errors are reported through `ctx`; the returned [`ast::File`] is as
/// complete as the input allowed. Callers should gate on
/// `ctx.had_error()` before trusting it.
pub fn parse_file(ctx: &Context, file_id: u16, tokens: &[(Token, Range<usize>)]) -> ast::File {
    let mut parser = Parser::new(tokens, file_id);
    parser.parse(ctx)
}

pub struct Parser<'src> {
    stream: TokenStream<'src>,
}

impl<'src> Parser<'src> {
    pub fn new(tokens: &'src [(Token, Range<usize>)], file_id: u16) -> Self {
        Self {
            stream: TokenStream::new(tokens, file_id),
        }
    }

    // === error reporting ===

    fn found_class(&self) -> &'static str {
        self.stream.peek().map(Token::class_name).unwrap_or("<eof>")
    }

    /// Report an unexpected token and consume it so the parser always
    /// makes forward progress.
    fn mark_err_exp(&mut self, ctx: &Context, expected: &[&Token]) {
        let expected: Vec<String> = expected
            .iter()
            .map(|t| t.class_name().to_string())
            .collect();
        ctx.note("found token", NoteValue::Raw(self.found_class().into()))
            .note("expected token", NoteValue::List(expected))
            .error_at_span(self.stream.current_span(), "unexpected token");
        self.stream.advance();
    }

    // === token plumbing ===

    fn check(&self, expected: &Token) -> bool {
        self.stream.check(expected)
    }

    fn at_end(&self) -> bool {
        self.stream.at_end()
    }

    /// Expect a specific token; on mismatch, report and consume whatever
    /// was there instead.
    fn expect(&mut self, ctx: &Context, expected: &Token) -> Option<Span> {
        if self.stream.check(expected) {
            return self.stream.advance().map(|(_, span)| span);
        }
        self.mark_err_exp(ctx, &[expected]);
        None
    }

    /// Expect a specific token; on mismatch, skip forward until it (or
    /// EOF) turns up.
    fn expect_or_recover(&mut self, ctx: &Context, expected: &Token) -> Span {
        if let Some(span) = if self.stream.check(expected) {
            self.stream.advance().map(|(_, span)| span)
        } else {
            None
        } {
            return span;
        }

        ctx.note("found token", NoteValue::Raw(self.found_class().into()))
            .note("expected token", NoteValue::Raw(expected.class_name().into()))
            .error_at_span(self.stream.current_span(), "unexpected token");

        while !self.stream.at_end() && !self.stream.check(expected) {
            self.stream.advance();
        }
        if self.stream.at_end() {
            ctx.note(
                "unterminated block missing",
                NoteValue::Raw(expected.class_name().into()),
            )
            .error_at_span(self.stream.current_span(), "unexpected end of file");
            return self.stream.current_span();
        }
        self.stream.advance().map(|(_, span)| span).unwrap_or_default()
    }

    /// Skip to the end of the current declaration: a `;` at this nesting
    /// level or the `}` closing the first block we enter.
    fn recover_till_decl_end(&mut self, ctx: &Context) {
        let mut block_count = 0u32;
        while let Some((token, _)) = self.stream.advance() {
            match token {
                Token::Semi if block_count == 0 => return,
                Token::RBrace if block_count <= 1 => return,
                Token::RBrace => block_count -= 1,
                Token::LBrace => block_count += 1,
                _ => {}
            }
        }
        ctx.describe("unterminated declaration")
            .error_at_span(self.stream.current_span(), "unexpected end of file");
    }

    /// Run `body` until `term` (or EOF) is next. Bodies are expected to
    /// consume input; if one does not, a token is dropped so the loop
    /// cannot wedge.
    fn until(&mut self, term: &Token, mut body: impl FnMut(&mut Self)) {
        while !self.stream.at_end() && !self.stream.check(term) {
            let before = self.stream.pos();
            body(self);
            if self.stream.pos() == before {
                self.stream.advance();
            }
        }
    }

    fn until_either(&mut self, term1: &Token, term2: &Token, mut body: impl FnMut(&mut Self)) {
        while !self.stream.at_end() && !self.stream.check(term1) && !self.stream.check(term2) {
            let before = self.stream.pos();
            body(self);
            if self.stream.pos() == before {
                self.stream.advance();
            }
        }
    }

    // === small shared grammars ===

    /// A key: all-lowercase, kebab-case, or a raw identifier that lexed to
    /// either.
    fn parse_key(&mut self, ctx: &Context) -> Option<(String, Span)> {
        match self.stream.peek() {
            Some(Token::FieldOrKey(name)) | Some(Token::DefKey(name)) => {
                let name = name.to_string();
                let (_, span) = self.stream.advance().expect("peeked");
                Some((name, span))
            }
            _ => {
                self.mark_err_exp(ctx, &[&Token::DefKey("".into())]);
                None
            }
        }
    }

    fn parse_string(&mut self, ctx: &Context) -> (String, Span) {
        let ctx = ctx.describe("string");
        match self.stream.peek() {
            Some(Token::String(value)) => {
                let value = value.to_string();
                let (_, span) = self.stream.advance().expect("peeked");
                (value, span)
            }
            _ => {
                let span = self.stream.current_span();
                self.mark_err_exp(&ctx, &[&Token::String("".into())]);
                (String::new(), span)
            }
        }
    }

    fn parse_type_ident(&mut self, ctx: &Context) -> Option<ast::Ident> {
        match self.stream.peek() {
            Some(Token::TypeIdent(name)) => {
                let name = name.to_string();
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Ident::new(name, span))
            }
            _ => {
                self.mark_err_exp(ctx, &[&Token::TypeIdent("".into())]);
                None
            }
        }
    }

    /// A `group/version::Name(::Sub)*` reference.
    fn parse_qual_path(&mut self, text: &str, span: Span) -> ast::RefModifier {
        // the lexer guarantees the shape, so splitting cannot fail
        let (group, rest) = text.split_once('/').expect("lexer-checked qualified path");
        let (version, name) = rest.split_once("::").expect("lexer-checked qualified path");
        ast::RefModifier {
            group_version: Some(ast::GroupVersionRef::new(group, version)),
            name: ast::Ident::new(name, span),
            span,
        }
    }

    /// A literal or type-ish value in parameter position.
    fn parse_value(&mut self, ctx: &Context) -> Option<ast::Value> {
        let ctx = ctx.describe("value");
        match self.stream.peek().cloned() {
            Some(Token::String(_)) => {
                let (value, span) = self.parse_string(&ctx);
                Some(ast::Value::Str(value, span))
            }
            Some(Token::Number(value)) => {
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Value::Num(value, span))
            }
            Some(Token::True) => {
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Value::Bool(true, span))
            }
            Some(Token::False) => {
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Value::Bool(false, span))
            }
            Some(Token::LBrace) => {
                let (_, start) = self.stream.advance().expect("peeked");
                let mut key_values = Vec::new();
                self.until(&Token::RBrace, |p| {
                    let key_ctx = ctx.describe("struct key");
                    let Some((key, key_span)) = p.parse_key(&key_ctx) else {
                        return;
                    };
                    p.expect(&key_ctx, &Token::Colon);
                    let value = p.parse_value(&ctx.describe("struct value"));
                    let span = value
                        .as_ref()
                        .map(|v| key_span.merge(&v.span()))
                        .unwrap_or(key_span);
                    key_values.push(ast::KeyValue {
                        key: ast::Ident::new(key, key_span),
                        value,
                        span,
                    });
                    if !p.check(&Token::RBrace) {
                        p.expect(&ctx, &Token::Comma);
                    }
                });
                let end = self.expect_or_recover(&ctx.describe("struct end"), &Token::RBrace);
                Some(ast::Value::Struct(key_values, start.merge(&end)))
            }
            Some(Token::LBracket) => {
                let (_, start) = self.stream.advance().expect("peeked");
                let mut values = Vec::new();
                self.until(&Token::RBracket, |p| {
                    if let Some(value) = p.parse_value(&ctx.describe("list item")) {
                        values.push(value);
                    }
                    if !p.check(&Token::RBracket) {
                        // trailing comma is optional
                        p.expect(&ctx, &Token::Comma);
                    }
                });
                let end = self.expect_or_recover(&ctx.describe("list end"), &Token::RBracket);
                Some(ast::Value::List(values, start.merge(&end)))
            }
            Some(Token::FieldPath(name)) => {
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Value::FieldPath(ast::Ident::new(name.to_string(), span)))
            }
            Some(Token::TypeIdent(name)) => {
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Value::RefType(ast::RefModifier {
                    group_version: None,
                    name: ast::Ident::new(name.to_string(), span),
                    span,
                }))
            }
            Some(Token::FieldOrKey(name)) | Some(Token::DefKey(name)) => {
                // a primitive (`string`) or compound (`list(value: ...)`)
                // type in value position
                let (_, span) = self.stream.advance().expect("peeked");
                let ident = ast::Ident::new(name.to_string(), span);
                if self.check(&Token::LParen) {
                    let params = self.parse_any_param_list(&ctx.describe("modifier parameters"));
                    let span = span.merge(&params.span);
                    Some(ast::Value::CompoundType(ast::KeyishModifier {
                        name: ident,
                        parameters: Some(params),
                        span,
                    }))
                } else {
                    Some(ast::Value::PrimitiveType(ident))
                }
            }
            Some(Token::QualPath(text)) => {
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Value::RefType(self.parse_qual_path(&text, span)))
            }
            Some(Token::UnqualPath(name)) => {
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Value::RefType(ast::RefModifier {
                    group_version: None,
                    name: ast::Ident::new(name.to_string(), span),
                    span,
                }))
            }
            _ => {
                self.mark_err_exp(
                    &ctx,
                    &[
                        &Token::String("".into()),
                        &Token::Number(0),
                        &Token::True,
                        &Token::False,
                        &Token::LBrace,
                        &Token::LBracket,
                        &Token::FieldPath("".into()),
                        &Token::TypeIdent("".into()),
                        &Token::QualPath("".into()),
                        &Token::UnqualPath("".into()),
                    ],
                );
                None
            }
        }
    }

    /// `( key: value, ... )` with arbitrary keys and values.
    fn parse_any_param_list(&mut self, ctx: &Context) -> ast::ParameterList {
        let ctx = ctx.describe("parameter list");
        let start = self
            .expect(&ctx.describe("parameter list start"), &Token::LParen)
            .unwrap_or_else(|| self.stream.current_span());

        let mut params = Vec::new();
        self.until(&Token::RParen, |p| {
            let Some((key, key_span)) = p.parse_key(&ctx.describe("parameter key")) else {
                return;
            };
            let kv_ctx = ctx.note("name", key.clone());

            p.expect(&kv_ctx.describe("between keys and values"), &Token::Colon);
            let value = p.parse_value(&kv_ctx.describe("parameter value"));

            let span = value
                .as_ref()
                .map(|v| key_span.merge(&v.span()))
                .unwrap_or(key_span);
            params.push(ast::KeyValue {
                key: ast::Ident::new(key, key_span),
                value,
                span,
            });

            if !p.check(&Token::RParen) {
                // a trailing comma is allowed but not required
                p.expect_or_recover(&kv_ctx, &Token::Comma);
            }
        });

        let end = self.expect_or_recover(&ctx.describe("parameter list end"), &Token::RParen);
        ast::ParameterList {
            params,
            span: start.merge(&end),
        }
    }

    /// Typed parameter list (`group-version(group:, version:)`,
    /// `union(tag:, untagged:)`).
    fn parse_param_list(&mut self, ctx: &Context, defs: &mut [&mut dyn Param]) -> Span {
        let ctx = ctx.describe("parameter list");
        let start = self
            .expect(&ctx.describe("parameter list start"), &Token::LParen)
            .unwrap_or_else(|| self.stream.current_span());

        self.until(&Token::RParen, |p| {
            let Some((key, key_span)) = p.parse_key(&ctx.describe("parameter key")) else {
                return;
            };
            let param_ctx = ctx.note("name", key.clone());
            p.expect(&param_ctx.describe("between keys and values"), &Token::Colon);

            match defs.iter_mut().find(|def| def.name() == key) {
                Some(def) => {
                    if def.present() {
                        param_ctx
                            .error_at_span(key_span, "cannot set the same parameter twice");
                    }
                    def.parse(&param_ctx.describe("parameter value"), p);
                }
                None => {
                    param_ctx.error_at_span(key_span, "unknown parameter");
                    // still consume the value to stay in sync
                    p.parse_value(&param_ctx);
                }
            }

            if !p.check(&Token::RParen) {
                p.expect_or_recover(&param_ctx, &Token::Comma);
            }
        });

        let end = self.expect_or_recover(&ctx.describe("parameter list end"), &Token::RParen);
        start.merge(&end)
    }

    fn required_args(&mut self, ctx: &Context, span: Span, args: &[&dyn Param]) {
        for arg in args {
            if !arg.present() {
                ctx.note("missing parameter", NoteValue::Raw(arg.name().into()))
                    .error_at_span(span, "missing required parameter");
            }
        }
    }

    // === docs & markers ===

    /// Zero or more `///` lines, grouped into sections. A line of the form
    /// `/// # Title` starts a new section; the leading untitled section is
    /// the description.
    fn maybe_docs(&mut self, ctx: &Context) -> ast::Docs {
        let ctx = ctx.describe("documentation");
        let mut sections: Vec<ast::DocSection> = Vec::new();
        let mut current: Option<ast::DocSection> = None;
        let mut full_span: Option<Span> = None;

        while let Some(Token::Doc(_)) = self.stream.peek() {
            let Some((Token::Doc(text), span)) = self.stream.advance() else {
                unreachable!("peeked a doc token");
            };
            full_span = Some(full_span.map(|s| s.merge(&span)).unwrap_or(span));
            let section = current.get_or_insert_with(|| ast::DocSection {
                title: String::new(),
                lines: Vec::new(),
                span,
            });
            section.span = section.span.merge(&span);

            if text.is_empty() {
                section.lines.push(String::new());
                continue;
            }
            let Some(text) = text.strip_prefix(' ') else {
                ctx.error_at_span(span, "doc comments must have a space after the slashes");
                continue;
            };
            if let Some(title) = text.strip_prefix('#') {
                let finished = current.take().expect("section initialized above");
                if !finished.title.is_empty() || !finished.lines.is_empty() {
                    sections.push(finished);
                }
                current = Some(ast::DocSection {
                    title: title.trim().to_string(),
                    lines: Vec::new(),
                    span,
                });
            } else {
                section.lines.push(text.to_string());
            }
        }

        if let Some(finished) = current.take() {
            if !finished.title.is_empty() || !finished.lines.is_empty() {
                sections.push(finished);
            }
        }

        ast::Docs {
            sections,
            span: full_span.unwrap_or_else(|| self.stream.current_span()),
        }
    }

    /// Zero or more `@name(params)` attachments.
    fn maybe_markers(&mut self, ctx: &Context) -> Vec<ast::AbstractMarker> {
        let ctx = ctx.describe("markers");
        let mut markers = Vec::new();

        while self.check(&Token::At) {
            let marker_ctx = ctx.describe("marker");
            let (_, at_span) = self.stream.advance().expect("peeked `@`");

            let name = match self.stream.peek() {
                Some(Token::MarkerPath(name))
                | Some(Token::FieldOrKey(name))
                | Some(Token::DefKey(name)) => {
                    let name = name.to_string();
                    let (_, span) = self.stream.advance().expect("peeked");
                    ast::Ident::new(name, span)
                }
                _ => {
                    self.mark_err_exp(
                        &marker_ctx,
                        &[&Token::MarkerPath("".into()), &Token::DefKey("".into())],
                    );
                    continue;
                }
            };
            let marker_ctx = marker_ctx.note("marker name", name.name.clone());

            let parameters = if self.check(&Token::LParen) {
                Some(self.parse_any_param_list(&marker_ctx.describe("marker parameters")))
            } else {
                None
            };

            let end = parameters
                .as_ref()
                .map(|p| p.span)
                .unwrap_or(name.span);
            markers.push(ast::AbstractMarker {
                name,
                parameters,
                resolved: None,
                span: at_span.merge(&end),
            });
        }

        markers
    }

    fn maybe_docs_markers(&mut self, ctx: &Context) -> (ast::Docs, Vec<ast::AbstractMarker>) {
        let docs = self.maybe_docs(ctx);
        let markers = self.maybe_markers(ctx);
        (docs, markers)
    }
}

/// A single named parameter in a typed parameter list.
trait Param {
    fn name(&self) -> &'static str;
    fn parse(&mut self, ctx: &Context, p: &mut Parser);
    fn present(&self) -> bool;
}

struct StringParam {
    name: &'static str,
    value: Option<String>,
}

impl StringParam {
    fn new(name: &'static str) -> Self {
        Self { name, value: None }
    }
}

impl Param for StringParam {
    fn name(&self) -> &'static str {
        self.name
    }
    fn parse(&mut self, ctx: &Context, p: &mut Parser) {
        let (value, _) = p.parse_string(ctx);
        self.value = Some(value);
    }
    fn present(&self) -> bool {
        self.value.is_some()
    }
}

struct BoolParam {
    name: &'static str,
    value: Option<bool>,
}

impl BoolParam {
    fn new(name: &'static str) -> Self {
        Self { name, value: None }
    }
}

impl Param for BoolParam {
    fn name(&self) -> &'static str {
        self.name
    }
    fn parse(&mut self, ctx: &Context, p: &mut Parser) {
        match p.stream.peek() {
            Some(Token::True) => {
                p.stream.advance();
                self.value = Some(true);
            }
            Some(Token::False) => {
                p.stream.advance();
                self.value = Some(false);
            }
            _ => {
                p.mark_err_exp(ctx, &[&Token::True, &Token::False]);
                self.value = Some(false);
            }
        }
    }
    fn present(&self) -> bool {
        self.value.is_some()
    }
}
