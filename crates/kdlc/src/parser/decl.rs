//! Declaration parsers: imports, group-versions, kinds, subtypes, fields,
//! and marker declaration sets.

use super::{BoolParam, Parser, StringParam};
use crate::ast;
use crate::lexer::Token;
use crate::trace::{Context, NoteValue};

impl<'src> Parser<'src> {
    /// Parse a whole file: optional imports, then group-versions and
    /// marker declaration sets until EOF.
    pub fn parse(&mut self, ctx: &Context) -> ast::File {
        let mut file = ast::File::default();

        if self.check(&Token::Import) {
            file.imports = Some(self.parse_imports(ctx));
        }

        while !self.at_end() {
            let (docs, markers) = self.maybe_docs_markers(ctx);
            match self.stream.peek() {
                Some(Token::GroupVersion) => {
                    file.group_versions
                        .push(self.parse_group_version(ctx, docs, markers));
                }
                Some(Token::Markers) => {
                    if let Some(marker) = markers.first() {
                        ctx.describe("marker declaration set")
                            .error_at_span(marker.span, "markers cannot be attached here");
                    }
                    file.marker_decls.push(self.parse_marker_decl_set(ctx, docs));
                }
                _ => {
                    self.mark_err_exp(ctx, &[&Token::GroupVersion, &Token::Markers]);
                    // resynchronize on the next top-level keyword
                    while !self.at_end()
                        && !self.check(&Token::GroupVersion)
                        && !self.check(&Token::Markers)
                    {
                        self.stream.advance();
                    }
                }
            }
        }

        file
    }

    // === imports ===

    fn parse_imports(&mut self, ctx: &Context) -> ast::Imports {
        let ctx = ctx.describe("import block");
        let start = self
            .expect(&ctx, &Token::Import)
            .unwrap_or_else(|| self.stream.current_span());

        match self.stream.peek() {
            Some(Token::LParen) => {
                self.expect(&ctx, &Token::LParen);
                let types = self.parse_type_imports(&ctx);
                let markers = self.parse_marker_imports(&ctx);
                let end = self.expect_or_recover(&ctx.describe("import block end"), &Token::RParen);
                ast::Imports {
                    types: Some(types),
                    markers: Some(markers),
                    span: start.merge(&end),
                }
            }
            Some(Token::Markers) => {
                let markers = self.parse_marker_imports(&ctx);
                let span = start.merge(&markers.span);
                ast::Imports {
                    types: None,
                    markers: Some(markers),
                    span,
                }
            }
            Some(Token::Types) => {
                let types = self.parse_type_imports(&ctx);
                let span = start.merge(&types.span);
                ast::Imports {
                    types: Some(types),
                    markers: None,
                    span,
                }
            }
            _ => {
                self.mark_err_exp(&ctx, &[&Token::LParen, &Token::Markers, &Token::Types]);
                ast::Imports {
                    types: None,
                    markers: None,
                    span: start,
                }
            }
        }
    }

    fn parse_type_imports(&mut self, ctx: &Context) -> ast::TypeImports {
        let ctx = ctx.describe("type imports");
        let start = self
            .expect(&ctx, &Token::Types)
            .unwrap_or_else(|| self.stream.current_span());
        self.expect(&ctx.describe("start of types import block"), &Token::LParen);

        let mut imports = indexmap::IndexMap::new();
        self.until(&Token::RParen, |p| {
            let list_ctx = ctx.describe("group-version list");
            let clause_start = p
                .expect(&list_ctx.describe("group-version list start"), &Token::LBrace)
                .unwrap_or_else(|| p.stream.current_span());

            let mut gvs = Vec::new();
            p.until(&Token::RBrace, |p| {
                if let Some(gv) = p.parse_import_gv(&list_ctx) {
                    gvs.push(gv);
                }
                if !p.check(&Token::RBrace) {
                    // optional trailing comma
                    p.expect(&list_ctx, &Token::Comma);
                }
            });
            p.expect(&list_ctx.describe("group-version list end"), &Token::RBrace);

            p.expect(&list_ctx, &Token::From);
            let (path, _) = p.parse_string(&list_ctx.describe("types import source"));
            let end = p.expect_or_recover(&list_ctx, &Token::Semi);

            let span = clause_start.merge(&end);
            for gv in gvs {
                // a later clause importing the same group-version replaces
                // the earlier one
                imports.insert(
                    gv.clone(),
                    ast::TypeImport {
                        group_version: gv,
                        src: path.clone(),
                        span,
                    },
                );
            }
        });

        let end = self.expect_or_recover(&ctx.describe("end of types import block"), &Token::RParen);
        ast::TypeImports {
            imports,
            span: start.merge(&end),
        }
    }

    fn parse_import_gv(&mut self, ctx: &Context) -> Option<ast::GroupVersionRef> {
        let ctx = ctx.describe("group-version import name");
        match self.stream.peek() {
            Some(Token::ImportName(raw)) => {
                let raw = raw.to_string();
                self.stream.advance();
                // the lexer guarantees the shape
                let (group, version) = raw.split_once('/').expect("lexer-checked import name");
                Some(ast::GroupVersionRef::new(group, version))
            }
            _ => {
                self.mark_err_exp(&ctx, &[&Token::ImportName("".into())]);
                None
            }
        }
    }

    fn parse_marker_imports(&mut self, ctx: &Context) -> ast::MarkerImports {
        let ctx = ctx.describe("marker imports");
        let start = self
            .expect(&ctx, &Token::Markers)
            .unwrap_or_else(|| self.stream.current_span());
        self.expect(&ctx.describe("start of markers import block"), &Token::LParen);

        let mut imports = indexmap::IndexMap::new();
        self.until(&Token::RParen, |p| {
            let import_ctx = ctx.describe("marker import");
            let Some((alias, alias_span)) =
                p.parse_key(&import_ctx.describe("marker import alias"))
            else {
                return;
            };

            p.expect(&import_ctx, &Token::From);
            let (path, _) = p.parse_string(&import_ctx.describe("marker import source"));
            let end = p.expect_or_recover(&import_ctx.describe("marker import end"), &Token::Semi);

            imports.insert(
                alias.clone(),
                ast::MarkerImport {
                    alias,
                    src: path,
                    span: alias_span.merge(&end),
                },
            );
        });

        let end =
            self.expect_or_recover(&ctx.describe("end of markers import block"), &Token::RParen);
        ast::MarkerImports {
            imports,
            span: start.merge(&end),
        }
    }

    // === group-versions & declarations ===

    fn parse_group_version(
        &mut self,
        ctx: &Context,
        docs: ast::Docs,
        markers: Vec<ast::AbstractMarker>,
    ) -> ast::GroupVersion {
        let ctx = ctx.describe("group-version");
        let start = self
            .expect(&ctx, &Token::GroupVersion)
            .unwrap_or_else(|| self.stream.current_span());

        let mut group = StringParam::new("group");
        let mut version = StringParam::new("version");
        let args_ctx = ctx.describe("group-version parameters");
        let args_span = self.parse_param_list(&args_ctx, &mut [&mut group, &mut version]);
        self.required_args(&args_ctx, args_span, &[&group, &version]);

        let group = group.value.unwrap_or_default();
        let version = version.value.unwrap_or_default();
        let ctx = ctx
            .note("group", group.clone())
            .note("version", version.clone());

        self.expect(&ctx.describe("group-version block start"), &Token::LBrace);

        let mut decls = Vec::new();
        self.until(&Token::RBrace, |p| {
            if let Some(decl) = p.parse_decl(&ctx) {
                decls.push(decl);
            }
        });

        let end = self.expect_or_recover(&ctx.describe("group-version block end"), &Token::RBrace);
        ast::GroupVersion {
            group,
            version,
            docs,
            markers,
            decls,
            span: start.merge(&end),
        }
    }

    fn parse_decl(&mut self, ctx: &Context) -> Option<ast::Decl> {
        let ctx = ctx.describe("declaration");
        let (docs, markers) = self.maybe_docs_markers(&ctx);

        if self.check(&Token::Kind) {
            let mut decl = self.parse_kind_rest(&ctx.describe("kind"))?;
            decl.docs = docs;
            decl.markers = markers;
            return Some(ast::Decl::Kind(decl));
        }

        let mut decl = self.parse_subtype_decl_rest(&ctx)?;
        decl.docs = docs;
        decl.markers = markers;
        Some(ast::Decl::Subtype(decl))
    }

    fn parse_kind_rest(&mut self, ctx: &Context) -> Option<ast::KindDecl> {
        let start = self.expect(ctx, &Token::Kind)?;

        let name = self
            .parse_type_ident(&ctx.describe("kind name"))
            .unwrap_or_default();
        let ctx = ctx.note("name", name.name.clone());

        let (fields, subtypes, block_span) = self.parse_field_block(&ctx);
        Some(ast::KindDecl {
            docs: ast::Docs::default(),
            markers: Vec::new(),
            name,
            fields,
            subtypes,
            resolved_name: None,
            span: start.merge(&block_span),
        })
    }

    fn parse_subtype_decl_rest(&mut self, ctx: &Context) -> Option<ast::SubtypeDecl> {
        let ctx = ctx.describe("subtype");
        let keyword = match self.stream.peek() {
            Some(Token::Struct) => Token::Struct,
            Some(Token::Union) => Token::Union,
            Some(Token::Enum) => Token::Enum,
            Some(Token::Newtype) => Token::Newtype,
            _ => {
                self.mark_err_exp(
                    &ctx,
                    &[&Token::Struct, &Token::Enum, &Token::Union, &Token::Newtype],
                );
                self.recover_till_decl_end(&ctx);
                return None;
            }
        };

        let ctx = ctx.note("type", NoteValue::Raw(keyword.class_name().into()));
        let (_, start) = self.stream.advance().expect("peeked keyword");

        // union headers may carry (tag:, untagged:) parameters
        let mut union_tag = "type".to_string();
        let mut union_untagged = false;
        if keyword == Token::Union && self.check(&Token::LParen) {
            let mut tag = StringParam::new("tag");
            let mut untagged = BoolParam::new("untagged");
            self.parse_param_list(&ctx.describe("union params"), &mut [&mut tag, &mut untagged]);
            if let Some(tag) = tag.value {
                union_tag = tag;
            }
            if let Some(untagged) = untagged.value {
                union_untagged = untagged;
            }
        }

        let name = self
            .parse_type_ident(&ctx.describe("subtype name"))
            .unwrap_or_default();
        let ctx = ctx.note("name", name.name.clone());

        let body = match keyword {
            Token::Struct => {
                let (fields, subtypes, span) = self.parse_field_block(&ctx);
                ast::SubtypeBody::Struct(ast::StructBody {
                    fields,
                    subtypes,
                    span,
                })
            }
            Token::Union => {
                // unions parse like structs; the differences are sorted
                // out during modifier resolution and type checking
                let (variants, subtypes, span) = self.parse_field_block(&ctx);
                ast::SubtypeBody::Union(ast::UnionBody {
                    variants,
                    subtypes,
                    tag: union_tag,
                    untagged: union_untagged,
                    span,
                })
            }
            Token::Enum => ast::SubtypeBody::Enum(self.parse_enum_block(&ctx)),
            Token::Newtype => ast::SubtypeBody::Newtype(self.parse_newtype_rest(&ctx)),
            _ => unreachable!("keyword checked above"),
        };

        let span = start.merge(&body.span());
        Some(ast::SubtypeDecl {
            docs: ast::Docs::default(),
            markers: Vec::new(),
            name,
            body,
            resolved_name: None,
            span,
        })
    }

    fn parse_field_block(
        &mut self,
        ctx: &Context,
    ) -> (Vec<ast::Field>, Vec<ast::SubtypeDecl>, crate::foundation::Span) {
        let ctx = ctx.describe("field block");
        let start = self
            .expect(&ctx.describe("field block start"), &Token::LBrace)
            .unwrap_or_else(|| self.stream.current_span());

        let mut fields = Vec::new();
        let mut subtypes = Vec::new();

        self.until(&Token::RBrace, |p| {
            let (docs, markers) = p.maybe_docs_markers(&ctx.describe("field or subtype"));

            match p.stream.peek() {
                Some(Token::FieldOrKey(_)) | Some(Token::DefField(_)) => {
                    let mut field = p.parse_field(&ctx);
                    field.docs = docs;
                    field.markers = markers;
                    fields.push(field);
                }
                _ => {
                    if let Some(mut decl) = p.parse_subtype_decl_rest(&ctx) {
                        decl.docs = docs;
                        decl.markers = markers;
                        subtypes.push(decl);
                    }
                }
            }
        });

        let end = self.expect_or_recover(&ctx.describe("field block end"), &Token::RBrace);
        (fields, subtypes, start.merge(&end))
    }

    fn parse_field(&mut self, ctx: &Context) -> ast::Field {
        let ctx = ctx.describe("field");
        let start = self.stream.current_span();

        let mut name = ast::Ident::default();
        match self.stream.peek() {
            Some(Token::DefField(n)) | Some(Token::FieldOrKey(n)) => {
                let n = n.to_string();
                let (_, span) = self.stream.advance().expect("peeked");
                name = ast::Ident::new(n, span);
            }
            _ => {
                self.mark_err_exp(&ctx.describe("field name"), &[&Token::DefField("".into())]);
            }
        }

        let embedded = name.name == "_inline";
        if embedded {
            name.name.clear();
        }
        let ctx = ctx.note("name", name.name.clone());

        self.expect(&ctx, &Token::Colon);
        let mut modifiers = Vec::new();
        self.until_either(&Token::Comma, &Token::RBrace, |p| {
            if let Some(modifier) = p.parse_modifier(&ctx) {
                modifiers.push(modifier);
            }
        });

        // a comma terminates the field; tolerate a missing one right
        // before the block closes so the block itself still parses
        let end = if self.check(&Token::Comma) {
            self.stream.advance().map(|(_, s)| s).unwrap_or(start)
        } else {
            ctx.note("found token", NoteValue::Raw(self.found_class().into()))
                .note(
                    "expected token",
                    NoteValue::Raw(Token::Comma.class_name().into()),
                )
                .error_at_span(self.stream.current_span(), "unexpected token");
            if !self.check(&Token::RBrace) {
                self.stream.advance();
            }
            self.stream.previous_span()
        };

        ast::Field {
            docs: ast::Docs::default(),
            markers: Vec::new(),
            name,
            modifiers,
            resolved_type: None,
            embedded,
            span: start.merge(&end),
        }
    }

    /// One modifier: a key (with optional parameters) or a type reference.
    pub(super) fn parse_modifier(&mut self, ctx: &Context) -> Option<ast::Modifier> {
        let ctx = ctx.describe("type modifier");
        match self.stream.peek() {
            Some(Token::FieldOrKey(key)) | Some(Token::DefKey(key)) => {
                let key = key.to_string();
                let (_, span) = self.stream.advance().expect("peeked");
                let ctx = ctx.note("modifier name", key.clone());
                let name = ast::Ident::new(key, span);
                if self.check(&Token::LParen) {
                    let params = self.parse_any_param_list(&ctx.describe("modifier parameters"));
                    let span = span.merge(&params.span);
                    Some(ast::Modifier::Keyish(ast::KeyishModifier {
                        name,
                        parameters: Some(params),
                        span,
                    }))
                } else {
                    Some(ast::Modifier::Keyish(ast::KeyishModifier {
                        name,
                        parameters: None,
                        span,
                    }))
                }
            }
            Some(Token::TypeIdent(name)) => {
                let name = name.to_string();
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Modifier::Ref(ast::RefModifier {
                    group_version: None,
                    name: ast::Ident::new(name, span),
                    span,
                }))
            }
            Some(Token::QualPath(text)) => {
                let text = text.to_string();
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Modifier::Ref(self.parse_qual_path(&text, span)))
            }
            Some(Token::UnqualPath(name)) => {
                let name = name.to_string();
                let (_, span) = self.stream.advance().expect("peeked");
                Some(ast::Modifier::Ref(ast::RefModifier {
                    group_version: None,
                    name: ast::Ident::new(name, span),
                    span,
                }))
            }
            _ => {
                self.mark_err_exp(
                    &ctx,
                    &[
                        &Token::DefKey("".into()),
                        &Token::TypeIdent("".into()),
                        &Token::QualPath("".into()),
                        &Token::UnqualPath("".into()),
                    ],
                );
                None
            }
        }
    }

    fn parse_newtype_rest(&mut self, ctx: &Context) -> ast::NewtypeBody {
        let ctx = ctx.describe("newtype spec");
        let start = self
            .expect(&ctx, &Token::Colon)
            .unwrap_or_else(|| self.stream.current_span());

        let mut modifiers = Vec::new();
        self.until(&Token::Semi, |p| {
            if let Some(modifier) = p.parse_modifier(&ctx) {
                modifiers.push(modifier);
            }
        });
        let end = self.expect_or_recover(&ctx, &Token::Semi);

        ast::NewtypeBody {
            modifiers,
            resolved_type: None,
            span: start.merge(&end),
        }
    }

    fn parse_enum_block(&mut self, ctx: &Context) -> ast::EnumBody {
        let ctx = ctx.describe("enum block");
        let start = self
            .expect(&ctx.describe("enum block start"), &Token::LBrace)
            .unwrap_or_else(|| self.stream.current_span());

        let mut variants = Vec::new();
        self.until(&Token::RBrace, |p| {
            let variant_ctx = ctx.describe("enum variant");
            let (docs, markers) = p.maybe_docs_markers(&variant_ctx);
            let Some(name) = p.parse_type_ident(&variant_ctx) else {
                return;
            };
            let span = name.span;
            variants.push(ast::EnumVariant {
                docs,
                markers,
                name,
                span,
            });
            if !p.check(&Token::RBrace) {
                // comma, optional on the last entry
                p.expect(&variant_ctx, &Token::Comma);
            }
        });

        let end = self.expect_or_recover(&ctx.describe("enum block end"), &Token::RBrace);
        ast::EnumBody {
            variants,
            span: start.merge(&end),
        }
    }

    // === marker declaration sets ===

    fn parse_marker_decl_set(&mut self, ctx: &Context, docs: ast::Docs) -> ast::MarkerDeclSet {
        let ctx = ctx.describe("marker declaration set");
        let start = self
            .expect(&ctx, &Token::Markers)
            .unwrap_or_else(|| self.stream.current_span());

        let mut package = StringParam::new("package");
        let args_ctx = ctx.describe("marker set parameters");
        let args_span = self.parse_param_list(&args_ctx, &mut [&mut package]);
        self.required_args(&args_ctx, args_span, &[&package]);
        let package = package.value.unwrap_or_default();
        let ctx = ctx.note("package", package.clone());

        self.expect(&ctx.describe("marker set block start"), &Token::LBrace);

        let mut decls = Vec::new();
        self.until(&Token::RBrace, |p| {
            if let Some(decl) = p.parse_marker_decl(&ctx) {
                decls.push(decl);
            }
        });

        let end = self.expect_or_recover(&ctx.describe("marker set block end"), &Token::RBrace);
        ast::MarkerDeclSet {
            package,
            docs,
            decls,
            span: start.merge(&end),
        }
    }

    fn parse_marker_decl(&mut self, ctx: &Context) -> Option<ast::MarkerDecl> {
        let ctx = ctx.describe("marker declaration");
        let (docs, markers) = self.maybe_docs_markers(&ctx);

        if !self.check(&Token::Marker) {
            self.mark_err_exp(&ctx, &[&Token::Marker]);
            self.recover_till_decl_end(&ctx);
            return None;
        }
        let (_, start) = self.stream.advance().expect("peeked `marker`");

        let name = match self.parse_key(&ctx.describe("marker name")) {
            Some((name, span)) => ast::Ident::new(name, span),
            None => ast::Ident::default(),
        };
        let ctx = ctx.note("name", name.name.clone());

        // marker bodies are plain field lists; nested declarations are not
        // allowed in the marker type system
        let block_ctx = ctx.describe("marker field block");
        self.expect(&block_ctx, &Token::LBrace);
        let mut fields = Vec::new();
        self.until(&Token::RBrace, |p| {
            let (field_docs, field_markers) = p.maybe_docs_markers(&block_ctx);
            let mut field = p.parse_field(&block_ctx);
            field.docs = field_docs;
            field.markers = field_markers;
            fields.push(field);
        });
        let end = self.expect_or_recover(&block_ctx, &Token::RBrace);

        Some(ast::MarkerDecl {
            docs,
            markers,
            name,
            fields,
            span: start.merge(&end),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::trace::Diagnostics;

    fn parse(source: &str) -> (ast::File, Diagnostics) {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let tokens = lexer::lex(&ctx, 0, source);
        let file = super::super::parse_file(&ctx, 0, &tokens);
        (file, sink)
    }

    fn parse_ok(source: &str) -> ast::File {
        let (file, sink) = parse(source);
        assert!(
            !sink.had_error(),
            "unexpected parse errors: {:?}",
            sink.snapshot()
                .iter()
                .map(|d| d.message.clone())
                .collect::<Vec<_>>()
        );
        file
    }

    #[test]
    fn test_parse_empty_group_version() {
        let file = parse_ok(r#"group-version(group: "core", version: "v1") {}"#);
        assert_eq!(file.group_versions.len(), 1);
        assert_eq!(file.group_versions[0].group, "core");
        assert_eq!(file.group_versions[0].version, "v1");
        assert!(file.group_versions[0].decls.is_empty());
    }

    #[test]
    fn test_parse_kind_with_nested_struct() {
        let file = parse_ok(
            r#"
            group-version(group: "core", version: "v1") {
                kind Pod {
                    spec: Spec,
                    struct Spec {
                        nodeName: optional string,
                    }
                }
            }
            "#,
        );
        let gv = &file.group_versions[0];
        assert_eq!(gv.decls.len(), 1);
        let ast::Decl::Kind(kind) = &gv.decls[0] else {
            panic!("expected a kind");
        };
        assert_eq!(kind.name.name, "Pod");
        assert_eq!(kind.fields.len(), 1);
        assert_eq!(kind.fields[0].name.name, "spec");
        assert_eq!(kind.subtypes.len(), 1);
        assert_eq!(kind.subtypes[0].name.name, "Spec");

        let ast::SubtypeBody::Struct(body) = &kind.subtypes[0].body else {
            panic!("expected a struct body");
        };
        assert_eq!(body.fields.len(), 1);
        assert_eq!(body.fields[0].name.name, "nodeName");
        assert_eq!(body.fields[0].modifiers.len(), 2);
    }

    #[test]
    fn test_parse_union_with_params() {
        let file = parse_ok(
            r#"
            group-version(group: "core", version: "v1") {
                union(tag: "kind", untagged: false) Source {
                    hostPath: HostPath,
                    struct HostPath { path: string, }
                }
            }
            "#,
        );
        let ast::Decl::Subtype(subtype) = &file.group_versions[0].decls[0] else {
            panic!("expected a subtype");
        };
        let ast::SubtypeBody::Union(union) = &subtype.body else {
            panic!("expected a union");
        };
        assert_eq!(union.tag, "kind");
        assert!(!union.untagged);
        assert_eq!(union.variants.len(), 1);
        assert_eq!(union.subtypes.len(), 1);
    }

    #[test]
    fn test_union_default_tag() {
        let file = parse_ok(
            r#"
            group-version(group: "core", version: "v1") {
                union Source { hostPath: string, }
            }
            "#,
        );
        let ast::Decl::Subtype(subtype) = &file.group_versions[0].decls[0] else {
            panic!("expected a subtype");
        };
        let ast::SubtypeBody::Union(union) = &subtype.body else {
            panic!("expected a union");
        };
        assert_eq!(union.tag, "type");
    }

    #[test]
    fn test_parse_enum() {
        let file = parse_ok(
            r#"
            group-version(group: "core", version: "v1") {
                enum Protocol {
                    /// The usual one.
                    TCP,
                    UDP,
                    SCTP
                }
            }
            "#,
        );
        let ast::Decl::Subtype(subtype) = &file.group_versions[0].decls[0] else {
            panic!("expected a subtype");
        };
        let ast::SubtypeBody::Enum(body) = &subtype.body else {
            panic!("expected an enum");
        };
        let names: Vec<&str> = body.variants.iter().map(|v| v.name.name.as_str()).collect();
        assert_eq!(names, vec!["TCP", "UDP", "SCTP"]);
        assert!(!body.variants[0].docs.is_empty());
    }

    #[test]
    fn test_parse_newtype() {
        let file = parse_ok(
            r#"
            group-version(group: "core", version: "v1") {
                newtype Port: int32 validates(min: 1, max: 65535);
            }
            "#,
        );
        let ast::Decl::Subtype(subtype) = &file.group_versions[0].decls[0] else {
            panic!("expected a subtype");
        };
        assert_eq!(subtype.name.name, "Port");
        let ast::SubtypeBody::Newtype(body) = &subtype.body else {
            panic!("expected a newtype");
        };
        assert_eq!(body.modifiers.len(), 2);
    }

    #[test]
    fn test_parse_imports() {
        let file = parse_ok(
            r#"
            import (
                types (
                    {core/v1, apps/v1} from "core.kdl";
                )
                markers (
                    kgo from "k.kdl";
                )
            )
            group-version(group: "example", version: "v1") {}
            "#,
        );
        let imports = file.imports.unwrap();
        let types = imports.types.unwrap();
        assert_eq!(types.imports.len(), 2);
        assert_eq!(
            types.imports[&ast::GroupVersionRef::new("core", "v1")].src,
            "core.kdl"
        );
        let markers = imports.markers.unwrap();
        assert_eq!(markers.imports["kgo"].src, "k.kdl");
    }

    #[test]
    fn test_parse_types_only_import() {
        let file = parse_ok(
            r#"
            import types ( {core/v1} from "core.kdl"; )
            group-version(group: "example", version: "v1") {}
            "#,
        );
        let imports = file.imports.unwrap();
        assert!(imports.types.is_some());
        assert!(imports.markers.is_none());
    }

    #[test]
    fn test_duplicate_type_import_last_wins() {
        let file = parse_ok(
            r#"
            import types (
                {core/v1} from "a.kdl";
                {core/v1} from "b.kdl";
            )
            group-version(group: "example", version: "v1") {}
            "#,
        );
        let types = file.imports.unwrap().types.unwrap();
        assert_eq!(
            types.imports[&ast::GroupVersionRef::new("core", "v1")].src,
            "b.kdl"
        );
    }

    #[test]
    fn test_parse_marker_decl_set() {
        let file = parse_ok(
            r#"
            markers(package: "kgo") {
                /// Renames a field in generated Go.
                marker name {
                    as: string,
                }
                marker deprecated {
                    message: optional string,
                }
            }
            "#,
        );
        assert_eq!(file.marker_decls.len(), 1);
        let set = &file.marker_decls[0];
        assert_eq!(set.package, "kgo");
        assert_eq!(set.decls.len(), 2);
        assert_eq!(set.decls[0].name.name, "name");
        assert_eq!(set.decls[0].fields.len(), 1);
        assert_eq!(set.decls[1].fields[0].modifiers.len(), 2);
    }

    #[test]
    fn test_inline_field() {
        let file = parse_ok(
            r#"
            group-version(group: "core", version: "v1") {
                struct Wrapper {
                    _inline: Inner,
                    struct Inner { x: string, }
                }
            }
            "#,
        );
        let ast::Decl::Subtype(subtype) = &file.group_versions[0].decls[0] else {
            panic!("expected a subtype");
        };
        let ast::SubtypeBody::Struct(body) = &subtype.body else {
            panic!("expected a struct");
        };
        assert!(body.fields[0].embedded);
        assert_eq!(body.fields[0].name.name, "");
    }

    #[test]
    fn test_docs_and_markers_attach() {
        let file = parse_ok(
            r#"
            group-version(group: "core", version: "v1") {
                /// A pod.
                /// # Example
                /// pods are cool
                @nonpersisted
                kind Pod {
                    spec: string,
                }
            }
            "#,
        );
        let ast::Decl::Kind(kind) = &file.group_versions[0].decls[0] else {
            panic!("expected a kind");
        };
        assert_eq!(kind.docs.sections.len(), 2);
        assert_eq!(kind.markers.len(), 1);
        assert_eq!(kind.markers[0].name.name, "nonpersisted");
    }

    #[test]
    fn test_recovery_continues_to_next_decl() {
        let (file, sink) = parse(
            r#"
            group-version(group: "core", version: "v1") {
                kind Pod {
                    spec: @ string,
                }
                kind Service {
                    spec: string,
                }
            }
            "#,
        );
        assert!(sink.had_error());
        // the second kind still parses
        let names: Vec<String> = file.group_versions[0]
            .decls
            .iter()
            .filter_map(|d| match d {
                ast::Decl::Kind(k) => Some(k.name.name.clone()),
                _ => None,
            })
            .collect();
        assert!(names.contains(&"Service".to_string()), "decls: {:?}", names);
    }

    #[test]
    fn test_error_has_group_version_context() {
        let (_, sink) = parse(r#"group-version(group: "core", version: "v1") { kind pod {} }"#);
        assert!(sink.had_error());
        let diags = sink.snapshot();
        assert!(!diags.is_empty());
    }
}
