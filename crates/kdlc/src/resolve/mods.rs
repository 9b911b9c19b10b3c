//! Modifier lowering: collapse the open-ended modifier list of a field or
//! newtype into the closed [`ResolvedTypeInfo`] model.
//!
//! The surface grammar treats `optional string validates(max-length: 5)` as
//! a flat list; this pass classifies every entry as the (single) core type,
//! a behavior modifier, or an error, rejecting duplicates and unknown
//! names early so later passes only see the closed algebra.

use crate::ast::{self, ResolvedType, ResolvedTypeInfo, ValidatesInfo};
use crate::trace::{Context, NoteValue};
use ckdl_ir::types::{self, primitive};
use std::collections::HashMap;

/// Lower a full modifier list.
pub fn modifiers_to_known(ctx: &Context, mods: &ast::ModifierList) -> ResolvedTypeInfo {
    let ctx = ctx.describe("type modifiers");

    let mut info = ResolvedTypeInfo::default();
    for modifier in mods {
        update_type_info(&ctx, &mut info, modifier);
    }

    // behavior modifiers alone do not make a type
    if info.r#type.is_none() {
        let ctx = match mods.first() {
            Some(first) => ctx.in_span(first.span().merge(&mods[mods.len() - 1].span())),
            None => ctx.clone(),
        };
        ctx.error_at("modifier list does not specify a type");
    }

    info
}

/// The primitive table: modifier keys that name primitives.
pub fn key_to_primitive(key: &str) -> Option<primitive::Type> {
    Some(match key {
        "string" => primitive::Type::String,
        "int32" => primitive::Type::Legacyint32,
        "int64" => primitive::Type::Int64,
        "quantity" => primitive::Type::Quantity,
        "time" => primitive::Type::Time,
        "duration" => primitive::Type::Duration,
        "bytes" => primitive::Type::Bytes,
        "bool" => primitive::Type::Bool,
        "dangerous-float64" => primitive::Type::Legacyfloat64,
        "int-or-string" => primitive::Type::Intorstring,
        _ => return None,
    })
}

pub fn ref_mod_to_ref(modifier: &ast::RefModifier) -> types::Reference {
    types::Reference {
        group_version: modifier.group_version.as_ref().map(Into::into),
        name: modifier.name.name.clone(),
        constraints: None,
    }
}

fn set_type_from(ctx: &Context, info: &mut ResolvedTypeInfo, span: crate::foundation::Span, ty: ResolvedType) {
    let ctx = ctx.describe("type");
    if info.r#type.is_some() {
        let ctx = match info.type_span {
            Some(other) => ctx.note("other type", NoteValue::Raw(other.to_string())),
            None => ctx,
        };
        ctx.error_at("cannot have two different types in the same modifier list");
    }
    info.r#type = Some(ty);
    info.type_span = Some(span);
}

fn prim_from_value(ctx: &Context, ident: &ast::Ident) -> types::Primitive {
    let ty = match key_to_primitive(&ident.name) {
        Some(ty) => ty,
        None => {
            ctx.note("name", ident.name.clone())
                .error_at_span(ident.span, "unknown primitive type");
            // make progress
            primitive::Type::String
        }
    };
    types::Primitive {
        r#type: ty as i32,
        specific_constraints: None,
    }
}

/// Interpret a `list(value: ...)` compound modifier, or `None` if the
/// modifier is not a list at all.
fn mod_to_list(ctx: &Context, modifier: &ast::KeyishModifier) -> Option<types::List> {
    if modifier.name.name != "list" {
        return None;
    }

    let params = valid_parameters(ctx, modifier.parameters.as_ref(), &["value"], &[]);
    let mut list = types::List::default();
    match params.get("value").copied().flatten().and_then(|kv| kv.value.as_ref()) {
        Some(ast::Value::PrimitiveType(ident)) => {
            list.items = Some(types::list::Items::Primitive(prim_from_value(ctx, ident)));
        }
        Some(ast::Value::RefType(ref_mod)) => {
            list.items = Some(types::list::Items::Reference(ref_mod_to_ref(ref_mod)));
        }
        Some(other) => {
            ctx.error_at_span(
                other.span(),
                "invalid value for list, expected primitive or reference",
            );
        }
        // do nothing, we already errored
        None => {}
    }
    Some(list)
}

fn update_type_info(ctx: &Context, info: &mut ResolvedTypeInfo, modifier: &ast::Modifier) {
    let ctx = ctx.describe("modifier").in_span(modifier.span());

    match modifier {
        ast::Modifier::Keyish(keyish) => {
            if let Some(prim) = key_to_primitive(&keyish.name.name) {
                set_type_from(&ctx, info, keyish.span, ResolvedType::Primitive(prim));
                return;
            }

            match keyish.name.name.as_str() {
                "list" => {
                    let ctx = ctx.note("name", "list");
                    let list = mod_to_list(&ctx, keyish).expect("name checked above");
                    set_type_from(&ctx, info, keyish.span, ResolvedType::List(list));
                }
                "list-map" => {
                    let ctx = ctx.note("name", "list-map");
                    let params =
                        valid_parameters(&ctx, keyish.parameters.as_ref(), &["value"], &["keys"]);
                    let mut list_map = types::ListMap::default();

                    match params.get("value").copied().flatten().and_then(|kv| kv.value.as_ref()) {
                        Some(ast::Value::RefType(ref_mod)) => {
                            list_map.items = Some(ref_mod_to_ref(ref_mod));
                        }
                        Some(other) => {
                            ctx.describe("value").error_at_span(
                                other.span(),
                                "invalid value for list-map, expected reference",
                            );
                        }
                        None => {}
                    }

                    if let Some(kv) = params.get("keys").copied().flatten() {
                        info.keys_span = Some(kv.span);
                    }
                    match params.get("keys").copied().flatten().and_then(|kv| kv.value.as_ref()) {
                        // the default key is just `.name`
                        None => list_map.key_field.push("name".to_string()),
                        Some(ast::Value::List(keys, span)) => {
                            let keys_ctx = ctx.describe("keys").in_span(*span);
                            for key in keys {
                                match key {
                                    ast::Value::FieldPath(ident) => {
                                        list_map.key_field.push(ident.name.clone());
                                    }
                                    other => {
                                        keys_ctx.describe("key").error_at_span(
                                            other.span(),
                                            "invalid key, expected a field path",
                                        );
                                    }
                                }
                            }
                        }
                        Some(other) => {
                            ctx.describe("keys").error_at_span(
                                other.span(),
                                "invalid keys for list-map, expected a list of field paths",
                            );
                        }
                    }
                    set_type_from(&ctx, info, keyish.span, ResolvedType::ListMap(list_map));
                }
                "set" => {
                    let ctx = ctx.note("name", "set");
                    let params = valid_parameters(&ctx, keyish.parameters.as_ref(), &["value"], &[]);
                    let mut set = types::Set::default();
                    match params.get("value").copied().flatten().and_then(|kv| kv.value.as_ref()) {
                        Some(ast::Value::PrimitiveType(ident)) => {
                            set.items =
                                Some(types::set::Items::Primitive(prim_from_value(&ctx, ident)));
                        }
                        Some(ast::Value::RefType(ref_mod)) => {
                            set.items = Some(types::set::Items::Reference(ref_mod_to_ref(ref_mod)));
                        }
                        Some(other) => {
                            ctx.error_at_span(
                                other.span(),
                                "invalid value for set, expected primitive or reference",
                            );
                        }
                        None => {}
                    }
                    set_type_from(&ctx, info, keyish.span, ResolvedType::Set(set));
                }
                "simple-map" => {
                    let ctx = ctx.note("name", "simple-map");
                    let params =
                        valid_parameters(&ctx, keyish.parameters.as_ref(), &["value"], &["key"]);
                    let mut map = types::PrimitiveMap::default();

                    match params.get("value").copied().flatten().and_then(|kv| kv.value.as_ref()) {
                        Some(ast::Value::PrimitiveType(ident)) => {
                            map.value = Some(types::primitive_map::Value::PrimitiveValue(
                                prim_from_value(&ctx, ident),
                            ));
                        }
                        Some(ast::Value::RefType(ref_mod)) => {
                            map.value = Some(types::primitive_map::Value::ReferenceValue(
                                ref_mod_to_ref(ref_mod),
                            ));
                        }
                        Some(ast::Value::CompoundType(compound)) => {
                            let value_ctx = ctx.describe("value").in_span(compound.span);
                            match mod_to_list(&value_ctx, compound) {
                                Some(list) => {
                                    map.value =
                                        Some(types::primitive_map::Value::SimpleListValue(list));
                                }
                                None => {
                                    value_ctx.error_at(
                                        "invalid value for simple-map, expected primitive, reference, or (primitive-y) list",
                                    );
                                }
                            }
                        }
                        Some(other) => {
                            ctx.describe("value").error_at_span(
                                other.span(),
                                "invalid value for simple-map, expected primitive, reference, or (primitive-y) list",
                            );
                        }
                        None => {}
                    }

                    match params.get("key").copied().flatten().and_then(|kv| kv.value.as_ref()) {
                        // keys default to plain strings
                        None => {
                            map.key = Some(types::primitive_map::Key::PrimitiveKey(
                                types::Primitive {
                                    r#type: primitive::Type::String as i32,
                                    specific_constraints: None,
                                },
                            ));
                        }
                        Some(ast::Value::PrimitiveType(ident)) => {
                            map.key = Some(types::primitive_map::Key::PrimitiveKey(
                                prim_from_value(&ctx, ident),
                            ));
                        }
                        Some(ast::Value::RefType(ref_mod)) => {
                            map.key = Some(types::primitive_map::Key::ReferenceKey(
                                ref_mod_to_ref(ref_mod),
                            ));
                        }
                        Some(other) => {
                            ctx.describe("key").error_at_span(
                                other.span(),
                                "invalid key for simple-map, expected primitive or reference to one",
                            );
                        }
                    }
                    set_type_from(&ctx, info, keyish.span, ResolvedType::PrimitiveMap(map));
                }
                "optional" => {
                    let ctx = ctx.note("name", "optional");
                    if info.optional {
                        let ctx = match info.optional_span {
                            Some(other) => ctx.note("other optional", NoteValue::Raw(other.to_string())),
                            None => ctx.clone(),
                        };
                        ctx.error_at("cannot set optional twice in the same modifier list");
                    }
                    info.optional = true;
                    info.optional_span = Some(keyish.span);

                    let params =
                        valid_parameters(&ctx, keyish.parameters.as_ref(), &[], &["default"]);
                    if let Some(kv) = params.get("default").copied().flatten() {
                        info.default = kv.value.clone();
                    }
                }
                "create-only" => {
                    let ctx = ctx.note("name", "create-only");
                    if info.create_only {
                        let ctx = match info.create_only_span {
                            Some(other) => {
                                ctx.note("other create-only", NoteValue::Raw(other.to_string()))
                            }
                            None => ctx.clone(),
                        };
                        ctx.error_at("cannot set create-only twice in the same modifier list");
                    }
                    info.create_only = true;
                    info.create_only_span = Some(keyish.span);
                }
                "preserves-unknown-fields" | "embedded-kind" => {
                    // recognized but deliberately unimplemented; the exact
                    // semantics are still an open question upstream
                    ctx.note("name", keyish.name.name.clone())
                        .error_at("this modifier is not supported yet");
                }
                "validates" => {
                    let ctx = ctx.note("name", "validates");
                    if info.validates.is_some() {
                        let ctx = match info.validates_span {
                            Some(other) => {
                                ctx.note("other validates", NoteValue::Raw(other.to_string()))
                            }
                            None => ctx.clone(),
                        };
                        ctx.error_at("cannot set validates twice in the same modifier list");
                    }
                    let mut validates = ValidatesInfo::default();
                    if let Some(params) = &keyish.parameters {
                        for param in &params.params {
                            update_validates(&ctx, &mut validates, param);
                        }
                    }
                    info.validates = Some(validates);
                    info.validates_span = Some(keyish.span);
                }
                _ => {
                    ctx.note("modifier", keyish.name.name.clone())
                        .error_at("unknown type modifier");
                }
            }
        }
        ast::Modifier::Ref(ref_mod) => {
            set_type_from(
                &ctx,
                info,
                ref_mod.span,
                ResolvedType::Reference(ref_mod_to_ref(ref_mod)),
            );
        }
    }
}

fn update_validates(ctx: &Context, validates: &mut ValidatesInfo, kv: &ast::KeyValue) {
    let ctx = ctx.describe("validator").in_span(kv.span);
    let value = kv.value.as_ref();

    match kv.key.name.as_str() {
        "max" => {
            validates.number.get_or_insert_with(Default::default).maximum =
                assert_number(&ctx, value);
        }
        "min" => {
            validates.number.get_or_insert_with(Default::default).minimum =
                assert_number(&ctx, value);
        }
        "exclusive-max" => {
            validates
                .number
                .get_or_insert_with(Default::default)
                .exclusive_maximum = assert_bool(&ctx, value);
        }
        "exclusive-min" => {
            validates
                .number
                .get_or_insert_with(Default::default)
                .exclusive_minimum = assert_bool(&ctx, value);
        }
        "multiple-of" => {
            validates
                .number
                .get_or_insert_with(Default::default)
                .multiple_of = assert_number(&ctx, value);
        }
        "max-length" => {
            validates
                .string
                .get_or_insert_with(Default::default)
                .max_length = assert_unsigned(&ctx, value);
        }
        "min-length" => {
            validates
                .string
                .get_or_insert_with(Default::default)
                .min_length = assert_unsigned(&ctx, value);
        }
        "pattern" => {
            validates.string.get_or_insert_with(Default::default).pattern =
                assert_string(&ctx, value);
        }
        "max-items" => {
            validates.list.get_or_insert_with(Default::default).max_items =
                assert_unsigned(&ctx, value);
        }
        "min-items" => {
            validates.list.get_or_insert_with(Default::default).min_items =
                assert_unsigned(&ctx, value);
        }
        "unique-items" => {
            validates
                .list
                .get_or_insert_with(Default::default)
                .unique_items = assert_bool(&ctx, value);
        }
        "max-props" => {
            validates
                .objectish
                .get_or_insert_with(Default::default)
                .max_properties = assert_unsigned(&ctx, value);
        }
        "min-props" => {
            validates
                .objectish
                .get_or_insert_with(Default::default)
                .min_properties = assert_unsigned(&ctx, value);
        }
        _ => {
            ctx.note("validator", kv.key.name.clone())
                .error_at("unknown validator");
        }
    }
}

/// Check a parameter list against required/optional names; unknown and
/// duplicate parameters are errors, missing required ones too. Returns
/// each declared name mapped to the parameter that filled it (if any).
pub fn valid_parameters<'p>(
    ctx: &Context,
    params: Option<&'p ast::ParameterList>,
    required: &[&'static str],
    optional: &[&'static str],
) -> HashMap<&'static str, Option<&'p ast::KeyValue>> {
    let ctx = ctx.describe("parameters");
    let ctx = match params {
        Some(params) => ctx.in_span(params.span),
        None => ctx,
    };

    let mut present: HashMap<&'static str, Option<&ast::KeyValue>> = HashMap::new();
    for name in required.iter().chain(optional) {
        present.insert(name, None);
    }

    if let Some(params) = params {
        for param in &params.params {
            let name = param.key.name.as_str();
            let param_ctx = ctx
                .describe("parameter")
                .note("name", param.key.name.clone())
                .in_span(param.span);

            match present.iter_mut().find(|(known, _)| **known == name) {
                Some((_, slot)) => {
                    if slot.is_some() {
                        param_ctx.error_at("cannot set the same parameter twice");
                    }
                    *slot = Some(param);
                }
                None => param_ctx.error_at("unknown parameter"),
            }
        }
    }

    for name in required {
        if present[name].is_none() {
            ctx.note("missing", NoteValue::Raw((*name).into()))
                .error_at("missing required parameter");
        }
    }

    present
}

fn assert_number(ctx: &Context, value: Option<&ast::Value>) -> i64 {
    match value {
        Some(ast::Value::Num(n, _)) => *n,
        Some(other) => {
            ctx.error_at_span(other.span(), "expected number");
            0
        }
        None => 0,
    }
}

fn assert_unsigned(ctx: &Context, value: Option<&ast::Value>) -> u64 {
    match value {
        Some(ast::Value::Num(n, span)) => {
            if *n < 0 {
                ctx.error_at_span(*span, "expected number >= 0");
                return 0;
            }
            *n as u64
        }
        Some(other) => {
            ctx.error_at_span(other.span(), "expected number >= 0");
            0
        }
        None => 0,
    }
}

fn assert_bool(ctx: &Context, value: Option<&ast::Value>) -> bool {
    match value {
        Some(ast::Value::Bool(b, _)) => *b,
        Some(other) => {
            ctx.error_at_span(other.span(), "expected boolean");
            false
        }
        None => false,
    }
}

fn assert_string(ctx: &Context, value: Option<&ast::Value>) -> String {
    match value {
        Some(ast::Value::Str(s, _)) => s.clone(),
        Some(other) => {
            ctx.error_at_span(other.span(), "expected string");
            String::new()
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::parser::Parser;
    use crate::trace::Diagnostics;

    fn lower(source: &str) -> (ResolvedTypeInfo, Diagnostics) {
        let sink = Diagnostics::new();
        let ctx = Context::new(&sink);
        // wrap in a field inside a synthetic group-version so the full
        // modifier-list grammar applies
        let full = format!(
            "group-version(group: \"g\", version: \"v1\") {{ struct S {{ x: {}, }} }}",
            source
        );
        let tokens = lexer::lex(&ctx, 0, &full);
        let mut parser = Parser::new(&tokens, 0);
        let file = parser.parse(&ctx);
        let crate::ast::Decl::Subtype(subtype) = &file.group_versions[0].decls[0] else {
            panic!("expected subtype");
        };
        let crate::ast::SubtypeBody::Struct(body) = &subtype.body else {
            panic!("expected struct");
        };
        let info = modifiers_to_known(&ctx, &body.fields[0].modifiers);
        (info, sink)
    }

    #[test]
    fn test_primitive() {
        let (info, sink) = lower("int32");
        assert!(!sink.had_error());
        assert!(matches!(
            info.r#type,
            Some(ResolvedType::Primitive(primitive::Type::Legacyint32))
        ));
        assert!(!info.optional);
    }

    #[test]
    fn test_optional_with_default() {
        let (info, sink) = lower("optional(default: 3) int32");
        assert!(!sink.had_error());
        assert!(info.optional);
        assert!(matches!(info.default, Some(ast::Value::Num(3, _))));
    }

    #[test]
    fn test_duplicate_type_is_error() {
        let (_, sink) = lower("string int32");
        assert!(sink.had_error());
    }

    #[test]
    fn test_duplicate_optional_is_error() {
        let (_, sink) = lower("optional optional string");
        assert!(sink.had_error());
    }

    #[test]
    fn test_unknown_modifier() {
        let (_, sink) = lower("string fancy");
        assert!(sink.had_error());
    }

    #[test]
    fn test_list_of_primitive() {
        let (info, sink) = lower("list(value: int32)");
        assert!(!sink.had_error());
        let Some(ResolvedType::List(list)) = info.r#type else {
            panic!("expected a list");
        };
        assert!(matches!(
            list.items,
            Some(types::list::Items::Primitive(p)) if p.r#type == primitive::Type::Legacyint32 as i32
        ));
    }

    #[test]
    fn test_list_map_defaults_keys_to_name() {
        let (info, sink) = lower("list-map(value: Container)");
        assert!(!sink.had_error());
        let Some(ResolvedType::ListMap(lm)) = info.r#type else {
            panic!("expected a list-map");
        };
        assert_eq!(lm.key_field, vec!["name"]);
        assert_eq!(lm.items.unwrap().name, "Container");
    }

    #[test]
    fn test_list_map_explicit_keys() {
        let (info, sink) = lower("list-map(value: Source, keys: [.kind, .path])");
        assert!(!sink.had_error());
        let Some(ResolvedType::ListMap(lm)) = info.r#type else {
            panic!("expected a list-map");
        };
        assert_eq!(lm.key_field, vec!["kind", "path"]);
    }

    #[test]
    fn test_simple_map_defaults_key_to_string() {
        let (info, sink) = lower("simple-map(value: int64)");
        assert!(!sink.had_error());
        let Some(ResolvedType::PrimitiveMap(map)) = info.r#type else {
            panic!("expected a simple-map");
        };
        assert!(matches!(
            map.key,
            Some(types::primitive_map::Key::PrimitiveKey(p))
                if p.r#type == primitive::Type::String as i32
        ));
    }

    #[test]
    fn test_simple_map_list_value() {
        let (info, sink) = lower("simple-map(value: list(value: string))");
        assert!(!sink.had_error());
        let Some(ResolvedType::PrimitiveMap(map)) = info.r#type else {
            panic!("expected a simple-map");
        };
        assert!(matches!(
            map.value,
            Some(types::primitive_map::Value::SimpleListValue(_))
        ));
    }

    #[test]
    fn test_validates_families() {
        let (info, sink) = lower("int32 validates(min: 1, max: 10, exclusive-max: true)");
        assert!(!sink.had_error());
        let validates = info.validates.unwrap();
        let number = validates.number.unwrap();
        assert_eq!(number.minimum, 1);
        assert_eq!(number.maximum, 10);
        assert!(number.exclusive_maximum);
        assert!(validates.string.is_none());
    }

    #[test]
    fn test_validates_collects_mismatched_family_without_judging() {
        // lowering just partitions; family/type agreement is checked later
        let (info, sink) = lower("int32 validates(min-length: 2)");
        assert!(!sink.had_error());
        assert!(info.validates.unwrap().string.is_some());
    }

    #[test]
    fn test_unknown_validator() {
        let (_, sink) = lower("int32 validates(shiny: 2)");
        assert!(sink.had_error());
    }

    #[test]
    fn test_unsupported_modifiers_are_rejected() {
        let (_, sink) = lower("preserves-unknown-fields string");
        assert!(sink.had_error());
    }

    #[test]
    fn test_missing_required_parameter() {
        let (_, sink) = lower("list");
        assert!(sink.had_error());
    }

    #[test]
    fn test_create_only() {
        let (info, sink) = lower("create-only string");
        assert!(!sink.had_error());
        assert!(info.create_only);
    }

    #[test]
    fn test_behavior_modifiers_alone_are_not_a_type() {
        let (info, sink) = lower("optional create-only");
        assert!(sink.had_error());
        assert!(info.r#type.is_none());
    }
}
