//! Scope and nesting resolution.
//!
//! Computes the fully-qualified (`::`-joined) name of every declaration,
//! then rewrites unqualified references in modifier lists to qualified form
//! by walking the lexical scope stack outward. Sibling declarations are
//! registered before any of them is descended into, so forward references
//! between siblings resolve.
//!
//! This is the first pass after parsing; modifier lowering happens here as
//! a side effect because reference resolution needs the lowered form to
//! know which values are references at all.

use super::mods;
use crate::ast::{self, ResolvedName, ResolvedType, ResolvedTypeInfo};
use crate::trace::Context;
use ckdl_ir::types;
use indexmap::IndexSet;

/// Resolve every group-version in the file.
pub fn resolve_nested(ctx: &Context, file: &mut ast::File) {
    for gv in &mut file.group_versions {
        let gv_ref = gv.gv_ref();
        let ctx = ctx
            .describe("group-version")
            .note("group", gv.group.clone())
            .note("version", gv.version.clone())
            .in_span(gv.span);

        let mut resolver = Resolver {
            group_version: gv_ref,
            stack: vec![Frame::default()],
        };
        for decl in &mut gv.decls {
            resolver.register_decl(&ctx, decl);
        }
        for decl in &mut gv.decls {
            resolver.enter_decl(&ctx, decl);
        }
    }
}

#[derive(Default)]
struct Frame {
    /// Name of the declaration that owns this scope; empty at the
    /// group-version root.
    name: String,
    /// Short names declared directly in this scope.
    in_scope: IndexSet<String>,
}

struct Resolver {
    group_version: ast::GroupVersionRef,
    stack: Vec<Frame>,
}

impl Resolver {
    /// The `::`-joined path of the current scope, or empty at the root.
    fn full_name(&self) -> String {
        self.stack
            .iter()
            .map(|frame| frame.name.as_str())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join("::")
    }

    fn full_name_for(&self, depth: usize, name: &str) -> String {
        let prefix = self.stack[..=depth]
            .iter()
            .map(|frame| frame.name.as_str())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join("::");
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}::{}", prefix, name)
        }
    }

    fn register(&mut self, ctx: &Context, name: &ast::Ident) -> ResolvedName {
        let prefix = self.full_name();
        let full_name = if prefix.is_empty() {
            name.name.clone()
        } else {
            format!("{}::{}", prefix, name.name)
        };

        let scope = self.stack.last_mut().expect("root frame always present");
        if !scope.in_scope.insert(name.name.clone()) {
            ctx.note("name", name.name.clone())
                .error_at_span(name.span, "sibling type with this name already exists");
        }

        ResolvedName {
            group_version: self.group_version.clone(),
            full_name,
        }
    }

    fn register_decl(&mut self, ctx: &Context, decl: &mut ast::Decl) {
        match decl {
            ast::Decl::Kind(kind) => {
                let ctx = ctx.describe("kind").in_span(kind.span);
                kind.resolved_name = Some(self.register(&ctx, &kind.name));
            }
            ast::Decl::Subtype(subtype) => self.register_subtype(ctx, subtype),
        }
    }

    fn register_subtype(&mut self, ctx: &Context, subtype: &mut ast::SubtypeDecl) {
        let ctx = ctx.describe("subtype").in_span(subtype.span);
        subtype.resolved_name = Some(self.register(&ctx, &subtype.name));
    }

    fn enter_decl(&mut self, ctx: &Context, decl: &mut ast::Decl) {
        match decl {
            ast::Decl::Kind(kind) => {
                let ctx = ctx
                    .describe("kind")
                    .note("name", kind.name.name.clone())
                    .in_span(kind.span);
                self.stack.push(Frame {
                    name: kind.name.name.clone(),
                    in_scope: IndexSet::new(),
                });
                self.resolve_subtypes(&ctx, &mut kind.subtypes);
                self.resolve_fields(&ctx, &mut kind.fields);
                self.stack.pop();
            }
            ast::Decl::Subtype(subtype) => self.enter_subtype(ctx, subtype),
        }
    }

    fn resolve_subtypes(&mut self, ctx: &Context, subtypes: &mut [ast::SubtypeDecl]) {
        for subtype in subtypes.iter_mut() {
            self.register_subtype(ctx, subtype);
        }
        for subtype in subtypes.iter_mut() {
            self.enter_subtype(ctx, subtype);
        }
    }

    fn enter_subtype(&mut self, ctx: &Context, subtype: &mut ast::SubtypeDecl) {
        let ctx = ctx
            .describe("subtype")
            .note("name", subtype.name.name.clone())
            .in_span(subtype.span);
        self.stack.push(Frame {
            name: subtype.name.name.clone(),
            in_scope: IndexSet::new(),
        });

        match &mut subtype.body {
            ast::SubtypeBody::Struct(body) => {
                self.resolve_subtypes(&ctx, &mut body.subtypes);
                self.resolve_fields(&ctx, &mut body.fields);
            }
            ast::SubtypeBody::Union(body) => {
                self.resolve_subtypes(&ctx, &mut body.subtypes);
                self.resolve_fields(&ctx, &mut body.variants);
            }
            ast::SubtypeBody::Enum(_) => {}
            ast::SubtypeBody::Newtype(body) => {
                body.resolved_type = Some(self.resolve_modifiers(&ctx, &body.modifiers));
            }
        }

        self.stack.pop();
    }

    fn resolve_fields(&mut self, ctx: &Context, fields: &mut [ast::Field]) {
        for field in fields.iter_mut() {
            let ctx = ctx
                .describe("field")
                .note("name", field.name.name.clone())
                .in_span(field.span);
            field.resolved_type = Some(self.resolve_modifiers(&ctx, &field.modifiers));
        }
    }

    /// Lower a modifier list, then qualify every reference inside the
    /// lowered type.
    fn resolve_modifiers(&mut self, ctx: &Context, modifiers: &ast::ModifierList) -> ResolvedTypeInfo {
        let mut info = mods::modifiers_to_known(ctx, modifiers);
        let ctx = match info.type_span {
            Some(span) => ctx.describe("type modifier").in_span(span),
            None => ctx.describe("type modifier"),
        };

        match &mut info.r#type {
            Some(ResolvedType::Reference(reference)) => {
                self.resolve_ref(&ctx, reference);
            }
            Some(ResolvedType::List(list)) => {
                if let Some(types::list::Items::Reference(reference)) = &mut list.items {
                    self.resolve_ref(&ctx, reference);
                }
            }
            Some(ResolvedType::Set(set)) => {
                if let Some(types::set::Items::Reference(reference)) = &mut set.items {
                    self.resolve_ref(&ctx, reference);
                }
            }
            Some(ResolvedType::ListMap(list_map)) => {
                if let Some(items) = &mut list_map.items {
                    self.resolve_ref(&ctx, items);
                }
            }
            Some(ResolvedType::PrimitiveMap(map)) => {
                if let Some(types::primitive_map::Key::ReferenceKey(reference)) = &mut map.key {
                    self.resolve_ref(&ctx, reference);
                }
                match &mut map.value {
                    Some(types::primitive_map::Value::ReferenceValue(reference)) => {
                        self.resolve_ref(&ctx, reference);
                    }
                    Some(types::primitive_map::Value::SimpleListValue(list)) => {
                        if let Some(types::list::Items::Reference(reference)) = &mut list.items {
                            self.resolve_ref(&ctx, reference);
                        }
                    }
                    _ => {}
                }
            }
            // primitives carry no references
            Some(ResolvedType::Primitive(_)) | None => {}
        }

        info
    }

    /// Qualify an unqualified reference: fill in the enclosing
    /// group-version and resolve the bare name through the scope stack.
    fn resolve_ref(&mut self, ctx: &Context, reference: &mut types::Reference) {
        if reference.group_version.is_some() {
            // already group-qualified; the name is taken as fully
            // qualified within that group-version
            return;
        }
        reference.group_version = Some((&self.group_version).into());
        reference.name = self.resolve_name(ctx, &reference.name);
    }

    fn resolve_name(&self, ctx: &Context, name: &str) -> String {
        if name.contains("::") {
            // an unqualified path is already rooted at the group-version
            return name.to_string();
        }
        for depth in (0..self.stack.len()).rev() {
            if self.stack[depth].in_scope.contains(name) {
                return self.full_name_for(depth, name);
            }
        }
        ctx.note("identifier", name.to_string())
            .error_at("unresolvable identifier");
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::parser;
    use crate::trace::Diagnostics;

    fn resolve(source: &str) -> (ast::File, Diagnostics) {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        let tokens = lexer::lex(&ctx, 0, source);
        let mut file = parser::parse_file(&ctx, 0, &tokens);
        assert!(!sink.had_error(), "parse should succeed");
        resolve_nested(&ctx, &mut file);
        (file, sink)
    }

    fn field_ref<'f>(field: &'f ast::Field) -> &'f types::Reference {
        match field.resolved_type.as_ref().unwrap().r#type.as_ref().unwrap() {
            ResolvedType::Reference(reference) => reference,
            other => panic!("expected a reference, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_types_auto_qualify() {
        let (file, sink) = resolve(
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
        assert!(!sink.had_error());
        let ast::Decl::Kind(kind) = &file.group_versions[0].decls[0] else {
            panic!("expected kind");
        };
        assert_eq!(kind.resolved_name.as_ref().unwrap().full_name, "Pod");

        let reference = field_ref(&kind.fields[0]);
        assert_eq!(reference.name, "Pod::Spec");
        assert_eq!(
            reference.group_version.as_ref().unwrap().group,
            "core"
        );

        assert_eq!(
            kind.subtypes[0].resolved_name.as_ref().unwrap().full_name,
            "Pod::Spec"
        );
    }

    #[test]
    fn test_sibling_forward_reference() {
        let (file, sink) = resolve(
            r#"
            group-version(group: "core", version: "v1") {
                struct A { other: B, }
                struct B { x: string, }
            }
            "#,
        );
        assert!(!sink.had_error());
        let ast::Decl::Subtype(a) = &file.group_versions[0].decls[0] else {
            panic!("expected subtype");
        };
        let ast::SubtypeBody::Struct(body) = &a.body else {
            panic!("expected struct");
        };
        assert_eq!(field_ref(&body.fields[0]).name, "B");
    }

    #[test]
    fn test_inner_scope_shadows_outer() {
        let (file, sink) = resolve(
            r#"
            group-version(group: "core", version: "v1") {
                struct Thing { x: string, }
                kind Pod {
                    thing: Thing,
                    struct Thing { y: string, }
                }
            }
            "#,
        );
        assert!(!sink.had_error());
        let ast::Decl::Kind(kind) = &file.group_versions[0].decls[1] else {
            panic!("expected kind");
        };
        // the nested Thing wins over the group-version-level one
        assert_eq!(field_ref(&kind.fields[0]).name, "Pod::Thing");
    }

    #[test]
    fn test_unresolvable_identifier() {
        let (_, sink) = resolve(
            r#"
            group-version(group: "g", version: "v1") {
                kind K { x: DoesNotExist, }
            }
            "#,
        );
        assert!(sink.had_error());
        let diags = sink.snapshot();
        assert_eq!(
            diags
                .iter()
                .filter(|d| d.message == "unresolvable identifier")
                .count(),
            1
        );
    }

    #[test]
    fn test_qualified_reference_left_alone() {
        let (file, sink) = resolve(
            r#"
            group-version(group: "apps", version: "v1") {
                kind Deployment { template: core/v1::Pod, }
            }
            "#,
        );
        assert!(!sink.had_error());
        let ast::Decl::Kind(kind) = &file.group_versions[0].decls[0] else {
            panic!("expected kind");
        };
        let reference = field_ref(&kind.fields[0]);
        assert_eq!(reference.name, "Pod");
        assert_eq!(reference.group_version.as_ref().unwrap().group, "core");
    }

    #[test]
    fn test_duplicate_siblings_error() {
        let (_, sink) = resolve(
            r#"
            group-version(group: "g", version: "v1") {
                struct A { x: string, }
                struct A { y: string, }
            }
            "#,
        );
        assert!(sink.had_error());
    }

    #[test]
    fn test_list_map_value_reference_resolves() {
        let (file, sink) = resolve(
            r#"
            group-version(group: "core", version: "v1") {
                kind Pod {
                    containers: list-map(value: Container),
                    struct Container { name: string, }
                }
            }
            "#,
        );
        assert!(!sink.had_error());
        let ast::Decl::Kind(kind) = &file.group_versions[0].decls[0] else {
            panic!("expected kind");
        };
        let Some(ResolvedType::ListMap(lm)) =
            &kind.fields[0].resolved_type.as_ref().unwrap().r#type
        else {
            panic!("expected list-map");
        };
        assert_eq!(lm.items.as_ref().unwrap().name, "Pod::Container");
    }

    #[test]
    fn test_newtype_reference_resolves() {
        let (file, sink) = resolve(
            r#"
            group-version(group: "core", version: "v1") {
                struct Inner { x: string, }
                newtype Wrapper: Inner;
            }
            "#,
        );
        assert!(!sink.had_error());
        let ast::Decl::Subtype(subtype) = &file.group_versions[0].decls[1] else {
            panic!("expected subtype");
        };
        let ast::SubtypeBody::Newtype(body) = &subtype.body else {
            panic!("expected newtype");
        };
        let Some(ResolvedType::Reference(reference)) =
            &body.resolved_type.as_ref().unwrap().r#type
        else {
            panic!("expected reference");
        };
        assert_eq!(reference.name, "Inner");
    }
}
